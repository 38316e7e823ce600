use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::database::SubmissionStore;
use crate::error::{Error, Result};
use crate::models::audit_log::AuditEntry;
use crate::models::submission::{EventType, ExamSubmission};
use crate::services::audit_service::AuditService;
use crate::services::integrity_monitor::IntegrityMonitor;
use crate::utils::time::Clock;

/// Keeps each open attempt bound to the browser that opened it.
#[derive(Clone)]
pub struct SessionGuard {
    store: Arc<dyn SubmissionStore>,
    integrity: IntegrityMonitor,
    audit: AuditService,
    clock: Arc<dyn Clock>,
}

impl SessionGuard {
    pub fn new(
        store: Arc<dyn SubmissionStore>,
        integrity: IntegrityMonitor,
        audit: AuditService,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            integrity,
            audit,
            clock,
        }
    }

    pub async fn enforce_single_session(
        &self,
        exam_id: Uuid,
        student_id: Uuid,
        fingerprint: &str,
    ) -> Result<()> {
        match self.store.find_in_progress(exam_id, student_id).await? {
            Some(existing) => self.ensure_same_session(&existing, fingerprint).await,
            None => Ok(()),
        }
    }

    /// Fails with `ConcurrentSession` after logging a `multiple_sessions` event against the open attempt.
    pub async fn ensure_same_session(
        &self,
        submission: &ExamSubmission,
        fingerprint: &str,
    ) -> Result<()> {
        let conflicting = matches!(
            submission.browser_fingerprint.as_deref(),
            Some(bound) if bound != fingerprint
        );
        if !conflicting {
            return Ok(());
        }

        tracing::warn!(
            submission_id = %submission.id,
            student_id = %submission.student_id,
            "Concurrent session detected"
        );

        let metadata = json!({ "attempted_fingerprint": fingerprint });
        match self
            .integrity
            .record_event(submission.id, EventType::MultipleSessions, metadata)
            .await
        {
            Ok(_) => {}
            // Submitted between lookup and append; nothing left to protect.
            Err(Error::AlreadySubmitted) => {}
            Err(e) => return Err(e),
        }

        self.audit
            .record(AuditEntry::submission(
                Some(submission.student_id),
                "concurrent_session",
                submission.id,
                Some(json!({ "exam_id": submission.exam_id })),
                self.clock.now(),
            ))
            .await;

        Err(Error::ConcurrentSession)
    }
}
