use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;
use uuid::Uuid;

use crate::middleware::auth::AuthContext;

const WINDOW: Duration = Duration::from_secs(1);

/// Idle per-user windows are dropped once the map grows past this.
const MAX_TRACKED_KEYS: usize = 10_000;

#[derive(Debug, Clone, Copy)]
struct WindowState {
    start: Instant,
    count: u32,
}

impl WindowState {
    fn new(now: Instant) -> Self {
        Self {
            start: now,
            count: 0,
        }
    }

    fn try_take(&mut self, now: Instant, limit: u32) -> bool {
        if now.duration_since(self.start) >= WINDOW {
            self.start = now;
            self.count = 0;
        }
        if self.count < limit {
            self.count += 1;
            true
        } else {
            false
        }
    }
}

fn too_many_requests() -> Response {
    (
        StatusCode::TOO_MANY_REQUESTS,
        Json(json!({
            "error": "rate_limit_exceeded",
            "message": "Too many requests, slow down"
        })),
    )
        .into_response()
}

/// One fixed window shared by every caller of a route group.
#[derive(Clone, Debug)]
pub struct RateLimiter {
    rps: u32,
    window: Arc<Mutex<WindowState>>,
}

impl RateLimiter {
    pub fn new(rps: u32) -> Self {
        Self {
            rps: rps.max(1),
            window: Arc::new(Mutex::new(WindowState::new(Instant::now()))),
        }
    }

    fn allow(&self) -> bool {
        let mut guard = self.window.lock().unwrap_or_else(|p| p.into_inner());
        guard.try_take(Instant::now(), self.rps)
    }
}

pub async fn rps_middleware(
    State(state): State<RateLimiter>,
    req: Request<Body>,
    next: Next,
) -> Response {
    if !state.allow() {
        tracing::warn!(path = %req.uri().path(), "Global rate limit exceeded");
        return too_many_requests();
    }
    next.run(req).await
}

/// A fixed window per authenticated user. Must run after the auth middleware.
#[derive(Clone, Debug)]
pub struct UserRateLimiter {
    rps: u32,
    windows: Arc<Mutex<HashMap<Uuid, WindowState>>>,
}

impl UserRateLimiter {
    pub fn new(rps: u32) -> Self {
        Self {
            rps: rps.max(1),
            windows: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn allow(&self, user_id: Uuid) -> bool {
        let now = Instant::now();
        let mut windows = self.windows.lock().unwrap_or_else(|p| p.into_inner());
        if windows.len() > MAX_TRACKED_KEYS {
            windows.retain(|_, w| now.duration_since(w.start) < WINDOW);
        }
        windows
            .entry(user_id)
            .or_insert_with(|| WindowState::new(now))
            .try_take(now, self.rps)
    }
}

pub async fn per_user_middleware(
    State(state): State<UserRateLimiter>,
    req: Request<Body>,
    next: Next,
) -> Response {
    if let Some(auth) = req.extensions().get::<AuthContext>() {
        if !state.allow(auth.user_id) {
            tracing::warn!(user_id = %auth.user_id, path = %req.uri().path(), "Per-user rate limit exceeded");
            return too_many_requests();
        }
    }
    next.run(req).await
}
