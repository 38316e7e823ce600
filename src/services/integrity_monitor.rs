use serde::Serialize;
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;
use uuid::Uuid;

use crate::database::SubmissionStore;
use crate::error::{Error, Result};
use crate::models::audit_log::AuditEntry;
use crate::models::submission::{EventType, ExamSubmission, SuspiciousEvent};
use crate::services::audit_service::AuditService;
use crate::utils::time::Clock;

/// More events than this flags the attempt regardless of type.
const MAX_EVENTS_BEFORE_FLAG: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrityRating {
    Excellent,
    Good,
    Suspicious,
    HighlySuspicious,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IntegrityReport {
    pub score: u32,
    pub rating: IntegrityRating,
    pub event_count: usize,
    pub flagged: bool,
}

pub fn event_weight(event_type: EventType) -> u32 {
    match event_type {
        EventType::TabSwitch => 1,
        EventType::FullscreenExit => 2,
        EventType::CopyAttempt => 3,
        EventType::PasteAttempt => 3,
        EventType::RightClick => 1,
        EventType::ContextMenu => 1,
        EventType::DevToolsOpen => 5,
        EventType::MultipleSessions => 10,
    }
}

pub fn compute_integrity_score(events: &[SuspiciousEvent]) -> u32 {
    events.iter().map(|e| event_weight(e.event_type)).sum()
}

pub fn rate(score: u32) -> IntegrityRating {
    match score {
        0 => IntegrityRating::Excellent,
        1..=4 => IntegrityRating::Good,
        5..=9 => IntegrityRating::Suspicious,
        _ => IntegrityRating::HighlySuspicious,
    }
}

/// Whether the event log alone warrants staff review.
pub fn compute_flag(events: &[SuspiciousEvent]) -> bool {
    events.len() > MAX_EVENTS_BEFORE_FLAG
        || events.iter().any(|e| {
            matches!(
                e.event_type,
                EventType::MultipleSessions | EventType::DevToolsOpen
            )
        })
}

pub fn report(submission: &ExamSubmission) -> IntegrityReport {
    let score = compute_integrity_score(&submission.suspicious_events);
    IntegrityReport {
        score,
        rating: rate(score),
        event_count: submission.suspicious_events.len(),
        flagged: submission.flagged_for_review,
    }
}

/// Records anti-cheat events and keeps the review flag in step with the log.
#[derive(Clone)]
pub struct IntegrityMonitor {
    store: Arc<dyn SubmissionStore>,
    audit: AuditService,
    clock: Arc<dyn Clock>,
}

impl IntegrityMonitor {
    pub fn new(store: Arc<dyn SubmissionStore>, audit: AuditService, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            audit,
            clock,
        }
    }

    pub async fn record_event(
        &self,
        submission_id: Uuid,
        event_type: EventType,
        metadata: JsonValue,
    ) -> Result<ExamSubmission> {
        let event = SuspiciousEvent {
            event_type,
            timestamp: self.clock.now(),
            metadata,
        };

        let mut submission = self
            .store
            .append_event(submission_id, event)
            .await?
            .ok_or(Error::AlreadySubmitted)?;

        tracing::info!(
            submission_id = %submission_id,
            event_type = event_type.as_str(),
            event_count = submission.suspicious_events.len(),
            "Integrity event recorded"
        );

        self.apply_flag(&mut submission).await?;
        Ok(submission)
    }

    /// Raises `flagged_for_review` when the events call for it. Idempotent and never lowers the flag.
    pub async fn apply_flag(&self, submission: &mut ExamSubmission) -> Result<()> {
        if submission.flagged_for_review || !compute_flag(&submission.suspicious_events) {
            return Ok(());
        }

        self.store
            .mark_flagged(submission.id, None, self.clock.now())
            .await?;
        submission.flagged_for_review = true;

        let integrity = report(submission);
        tracing::warn!(
            submission_id = %submission.id,
            student_id = %submission.student_id,
            integrity_score = integrity.score,
            "Submission auto-flagged for review"
        );
        self.audit
            .record(AuditEntry::submission(
                Some(submission.student_id),
                "auto_flagged",
                submission.id,
                Some(json!({
                    "integrity_score": integrity.score,
                    "event_count": integrity.event_count,
                })),
                self.clock.now(),
            ))
            .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory::InMemorySubmissionStore;
    use crate::database::{StartOutcome, SubmissionStore};
    use crate::models::submission::{NewSubmission, SessionMetadata};
    use crate::services::audit_service::MockAuditSink;
    use crate::services::fixtures::at;
    use crate::utils::time::ManualClock;

    fn event(event_type: EventType) -> SuspiciousEvent {
        SuspiciousEvent {
            event_type,
            timestamp: at(10, 10),
            metadata: JsonValue::Null,
        }
    }

    #[test]
    fn weights_and_ratings() {
        let events = vec![
            event(EventType::TabSwitch),
            event(EventType::FullscreenExit),
            event(EventType::CopyAttempt),
        ];
        assert_eq!(compute_integrity_score(&events), 6);
        assert_eq!(rate(0), IntegrityRating::Excellent);
        assert_eq!(rate(4), IntegrityRating::Good);
        assert_eq!(rate(6), IntegrityRating::Suspicious);
        assert_eq!(rate(10), IntegrityRating::HighlySuspicious);
    }

    #[test]
    fn score_never_decreases_as_events_accumulate() {
        let sequence = [
            EventType::RightClick,
            EventType::ContextMenu,
            EventType::PasteAttempt,
            EventType::TabSwitch,
            EventType::DevToolsOpen,
        ];
        let mut events = Vec::new();
        let mut last = 0;
        for t in sequence {
            events.push(event(t));
            let score = compute_integrity_score(&events);
            assert!(score >= last);
            last = score;
        }
    }

    #[test]
    fn flag_rules() {
        assert!(!compute_flag(&[event(EventType::TabSwitch)]));
        assert!(compute_flag(&[event(EventType::DevToolsOpen)]));
        assert!(compute_flag(&[event(EventType::MultipleSessions)]));

        let ten: Vec<_> = (0..10).map(|_| event(EventType::TabSwitch)).collect();
        assert!(!compute_flag(&ten));
        let eleven: Vec<_> = (0..11).map(|_| event(EventType::TabSwitch)).collect();
        assert!(compute_flag(&eleven));
    }

    async fn open_attempt(store: &InMemorySubmissionStore) -> ExamSubmission {
        let outcome = store
            .create_or_resume(
                NewSubmission {
                    exam_id: Uuid::new_v4(),
                    student_id: Uuid::new_v4(),
                    question_ids: vec![],
                    started_at: at(10, 0),
                    session: SessionMetadata {
                        browser_fingerprint: "fp".to_string(),
                        ..Default::default()
                    },
                },
                0,
            )
            .await
            .unwrap();
        match outcome {
            StartOutcome::Created(s) => s,
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn dev_tools_flags_once_and_audits_once() {
        let store = Arc::new(InMemorySubmissionStore::new());
        let submission = open_attempt(&store).await;

        let mut sink = MockAuditSink::new();
        sink.expect_record()
            .withf(|entry| entry.action == "auto_flagged")
            .times(1)
            .returning(|_| Ok(()));
        let monitor = IntegrityMonitor::new(
            store.clone(),
            AuditService::new(Arc::new(sink)),
            Arc::new(ManualClock::new(at(10, 10))),
        );

        let after_first = monitor
            .record_event(submission.id, EventType::DevToolsOpen, JsonValue::Null)
            .await
            .unwrap();
        assert!(after_first.flagged_for_review);

        let after_second = monitor
            .record_event(submission.id, EventType::TabSwitch, json!({"count": 2}))
            .await
            .unwrap();
        assert!(after_second.flagged_for_review);
        assert_eq!(report(&after_second).score, 6);
    }

    #[tokio::test]
    async fn staff_cleared_flag_stays_cleared_until_next_event() {
        let store = Arc::new(InMemorySubmissionStore::new());
        let submission = open_attempt(&store).await;
        let mut sink = MockAuditSink::new();
        sink.expect_record().returning(|_| Ok(()));
        let monitor = IntegrityMonitor::new(
            store.clone(),
            AuditService::new(Arc::new(sink)),
            Arc::new(ManualClock::new(at(10, 10))),
        );

        monitor
            .record_event(submission.id, EventType::MultipleSessions, JsonValue::Null)
            .await
            .unwrap();
        let cleared = store
            .set_review(submission.id, false, Some("false positive".to_string()), at(10, 15))
            .await
            .unwrap();
        assert!(!cleared.flagged_for_review);

        let reread = store.find_by_id(submission.id).await.unwrap().unwrap();
        assert!(!reread.flagged_for_review);
    }
}
