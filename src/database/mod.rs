pub mod catalog;
pub mod memory;
pub mod pool;
pub mod submissions;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::models::exam::Exam;
use crate::models::question::Question;
use crate::models::submission::{
    AnswerRecord, DraftAnswer, ExamSubmission, GradingUpdate, NewSubmission, SuspiciousEvent,
};

/// Read-only exam data owned by the course administration collaborator.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExamCatalog: Send + Sync {
    /// The exam with its batches and their active enrollments populated.
    async fn find_exam(&self, exam_id: Uuid) -> Result<Option<Exam>>;

    /// Questions for the given ids; order of the result is unspecified.
    async fn find_questions(&self, question_ids: &[Uuid]) -> Result<Vec<Question>>;
}

/// Result of the atomic find-or-create behind `start()`.
#[derive(Debug, Clone)]
pub enum StartOutcome {
    Resumed(ExamSubmission),
    Created(ExamSubmission),
    LimitReached { consumed: i64 },
}

/// Durable attempt ledger. Every mutating call is conditional on the status it expects.
#[async_trait]
pub trait SubmissionStore: Send + Sync {
    async fn find_by_id(&self, submission_id: Uuid) -> Result<Option<ExamSubmission>>;

    async fn find_in_progress(&self, exam_id: Uuid, student_id: Uuid)
        -> Result<Option<ExamSubmission>>;

    /// All attempts of a student at an exam, ordered by attempt number.
    async fn list_for_student(&self, exam_id: Uuid, student_id: Uuid)
        -> Result<Vec<ExamSubmission>>;

    async fn list_for_exam(&self, exam_id: Uuid) -> Result<Vec<ExamSubmission>>;

    /// Submitted attempts whose grading never completed, oldest first.
    async fn list_ungraded(&self, limit: i64) -> Result<Vec<ExamSubmission>>;

    /// Returns the open attempt if there is one; otherwise creates attempt `n + 1`
    /// unless `max_attempts > 0` and the consumed attempts already reach it.
    async fn create_or_resume(&self, new: NewSubmission, max_attempts: i32)
        -> Result<StartOutcome>;

    /// `None` when the attempt is not open or not owned by `student_id`.
    async fn save_drafts(
        &self,
        submission_id: Uuid,
        student_id: Uuid,
        drafts: Vec<DraftAnswer>,
        now: DateTime<Utc>,
    ) -> Result<Option<ExamSubmission>>;

    /// Atomic append to `suspicious_events`, stamped with the event's timestamp.
    /// `None` when the attempt is not open.
    async fn append_event(
        &self,
        submission_id: Uuid,
        event: SuspiciousEvent,
    ) -> Result<Option<ExamSubmission>>;

    /// Sets `flagged_for_review` to true. Never clears it.
    async fn mark_flagged(
        &self,
        submission_id: Uuid,
        note: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<()>;

    /// `in_progress -> absent`, appending `note` to the review notes. The attempt keeps its
    /// number but does not count against the limit. `None` when it was not open for this student.
    async fn close_absent(
        &self,
        submission_id: Uuid,
        student_id: Uuid,
        note: String,
        now: DateTime<Utc>,
    ) -> Result<Option<ExamSubmission>>;

    /// `in_progress -> submitted`. `None` when the attempt was not open for this student.
    async fn freeze(
        &self,
        submission_id: Uuid,
        student_id: Uuid,
        answers: Vec<AnswerRecord>,
        submitted_at: DateTime<Utc>,
    ) -> Result<Option<ExamSubmission>>;

    /// Writes scoring fields on a submitted or evaluated attempt and bumps `grading_version`.
    /// `None` when the version moved on since `update.expected_version` was read, or the
    /// attempt is no longer gradeable; the caller reloads and decides.
    async fn save_grading(&self, submission_id: Uuid, update: GradingUpdate)
        -> Result<Option<ExamSubmission>>;

    async fn set_review(
        &self,
        submission_id: Uuid,
        flagged: bool,
        review_notes: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<ExamSubmission>;

    async fn set_remarks(
        &self,
        submission_id: Uuid,
        remarks: String,
        evaluated_by: Uuid,
        evaluated_at: DateTime<Utc>,
    ) -> Result<ExamSubmission>;
}
