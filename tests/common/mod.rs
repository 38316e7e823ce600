#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::Value as JsonValue;
use tower::ServiceExt;
use uuid::Uuid;

use exam_proctor::config::Config;
use exam_proctor::database::memory::{InMemoryCatalog, InMemorySubmissionStore};
use exam_proctor::middleware::auth::{issue_token, Role};
use exam_proctor::models::exam::{
    Batch, Enrollment, EnrollmentStatus, Exam, ExamStatus, NegativeMarking, ResultPublication,
};
use exam_proctor::models::question::{Question, QuestionKind};
use exam_proctor::routes::build_router;
use exam_proctor::services::audit_service::TracingAuditSink;
use exam_proctor::utils::time::ManualClock;
use exam_proctor::AppState;

pub const SECRET: &str = "test_secret_key";

pub fn at(h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 5, 4, h, m, 0).unwrap()
}

pub struct TestApp {
    pub router: Router,
    pub catalog: Arc<InMemoryCatalog>,
    pub store: Arc<InMemorySubmissionStore>,
    pub clock: Arc<ManualClock>,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_config(Config::for_tests(SECRET))
    }

    pub fn with_config(config: Config) -> Self {
        let catalog = Arc::new(InMemoryCatalog::new());
        let store = Arc::new(InMemorySubmissionStore::new());
        let clock = Arc::new(ManualClock::new(at(10, 5)));
        let state = AppState::new(
            config,
            catalog.clone(),
            store.clone(),
            Arc::new(TracingAuditSink),
            clock.clone(),
        );
        Self {
            router: build_router(state),
            catalog,
            store,
            clock,
        }
    }

    /// Published 10:00-11:00 exam with every given student actively enrolled.
    pub async fn seed_exam(
        &self,
        students: &[Uuid],
        questions: &[Question],
        customize: impl FnOnce(&mut Exam),
    ) -> Exam {
        let mut exam = Exam {
            id: Uuid::new_v4(),
            title: "Mechanics Midterm".to_string(),
            description: Some("Chapters 1-4".to_string()),
            instructions: Some("No calculators".to_string()),
            status: ExamStatus::Published,
            question_ids: questions.iter().map(|q| q.id).collect(),
            batches: vec![Batch {
                id: Uuid::new_v4(),
                name: "Section A".to_string(),
                enrollments: students
                    .iter()
                    .map(|id| Enrollment {
                        student_id: *id,
                        status: EnrollmentStatus::Active,
                    })
                    .collect(),
            }],
            scheduled_at: at(10, 0),
            duration_minutes: 60,
            schedule: None,
            max_attempts: 1,
            result_publication: ResultPublication::Immediate,
            results_published: false,
            negative_marking: NegativeMarking::default(),
        };
        customize(&mut exam);
        for q in questions {
            self.catalog.insert_question(q.clone()).await;
        }
        self.catalog.insert_exam(exam.clone()).await;
        exam
    }

    pub async fn request(
        &self,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<JsonValue>,
    ) -> (StatusCode, JsonValue) {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .header("user-agent", "integration-test")
            .header("x-forwarded-for", "203.0.113.7, 10.0.0.1");
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {}", token));
        }
        let body = match body {
            Some(json) => Body::from(json.to_string()),
            None => Body::empty(),
        };
        let res = self
            .router
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();
        let status = res.status();
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let json = if bytes.is_empty() {
            JsonValue::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(JsonValue::Null)
        };
        (status, json)
    }
}

pub fn token(user_id: Uuid, role: Role) -> String {
    issue_token(SECRET, user_id, role, Duration::hours(1)).unwrap()
}

pub fn mcq(marks: i32, correct_option: usize) -> Question {
    Question {
        id: Uuid::new_v4(),
        text: "Which law applies?".to_string(),
        marks,
        explanation: Some("Newton's second law".to_string()),
        kind: QuestionKind::Mcq {
            options: vec![
                "First".to_string(),
                "Second".to_string(),
                "Third".to_string(),
            ],
            correct_option,
        },
    }
}

pub fn descriptive(marks: i32) -> Question {
    Question {
        id: Uuid::new_v4(),
        text: "Derive the work-energy theorem".to_string(),
        marks,
        explanation: None,
        kind: QuestionKind::Descriptive {
            model_answer: Some("W = ΔK".to_string()),
        },
    }
}
