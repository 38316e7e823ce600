//! In-process stores with the same conditional-update semantics as the PostgreSQL ones.
//! Each store guards its map with a single async mutex, so every trait call is atomic.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::database::{ExamCatalog, StartOutcome, SubmissionStore};
use crate::error::{Error, Result};
use crate::models::exam::Exam;
use crate::models::question::Question;
use crate::models::submission::{
    AnswerRecord, DraftAnswer, ExamSubmission, GradingUpdate, NewSubmission, SubmissionStatus,
    SuspiciousEvent,
};

#[derive(Default)]
pub struct InMemoryCatalog {
    exams: Mutex<HashMap<Uuid, Exam>>,
    questions: Mutex<HashMap<Uuid, Question>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_exam(&self, exam: Exam) {
        self.exams.lock().await.insert(exam.id, exam);
    }

    pub async fn insert_question(&self, question: Question) {
        self.questions.lock().await.insert(question.id, question);
    }
}

#[async_trait]
impl ExamCatalog for InMemoryCatalog {
    async fn find_exam(&self, exam_id: Uuid) -> Result<Option<Exam>> {
        Ok(self.exams.lock().await.get(&exam_id).cloned())
    }

    async fn find_questions(&self, question_ids: &[Uuid]) -> Result<Vec<Question>> {
        let questions = self.questions.lock().await;
        Ok(question_ids
            .iter()
            .filter_map(|id| questions.get(id).cloned())
            .collect())
    }
}

#[derive(Default)]
pub struct InMemorySubmissionStore {
    submissions: Mutex<HashMap<Uuid, ExamSubmission>>,
}

impl InMemorySubmissionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a record as-is; used to seed history such as absent attempts.
    pub async fn insert(&self, submission: ExamSubmission) {
        self.submissions.lock().await.insert(submission.id, submission);
    }

    pub async fn count(&self) -> usize {
        self.submissions.lock().await.len()
    }
}

fn missing(submission_id: Uuid) -> Error {
    Error::NotFound(format!("Submission {} not found", submission_id))
}

fn append_note(submission: &mut ExamSubmission, note: String) {
    submission.review_notes = Some(match submission.review_notes.take() {
        Some(existing) => format!("{}\n{}", existing, note),
        None => note,
    });
}

#[async_trait]
impl SubmissionStore for InMemorySubmissionStore {
    async fn find_by_id(&self, submission_id: Uuid) -> Result<Option<ExamSubmission>> {
        Ok(self.submissions.lock().await.get(&submission_id).cloned())
    }

    async fn find_in_progress(
        &self,
        exam_id: Uuid,
        student_id: Uuid,
    ) -> Result<Option<ExamSubmission>> {
        Ok(self
            .submissions
            .lock()
            .await
            .values()
            .find(|s| s.exam_id == exam_id && s.student_id == student_id && s.is_in_progress())
            .cloned())
    }

    async fn list_for_student(
        &self,
        exam_id: Uuid,
        student_id: Uuid,
    ) -> Result<Vec<ExamSubmission>> {
        let mut rows: Vec<ExamSubmission> = self
            .submissions
            .lock()
            .await
            .values()
            .filter(|s| s.exam_id == exam_id && s.student_id == student_id)
            .cloned()
            .collect();
        rows.sort_by_key(|s| s.attempt_number);
        Ok(rows)
    }

    async fn list_for_exam(&self, exam_id: Uuid) -> Result<Vec<ExamSubmission>> {
        let mut rows: Vec<ExamSubmission> = self
            .submissions
            .lock()
            .await
            .values()
            .filter(|s| s.exam_id == exam_id)
            .cloned()
            .collect();
        rows.sort_by_key(|s| (s.started_at, s.attempt_number));
        Ok(rows)
    }

    async fn list_ungraded(&self, limit: i64) -> Result<Vec<ExamSubmission>> {
        let mut rows: Vec<ExamSubmission> = self
            .submissions
            .lock()
            .await
            .values()
            .filter(|s| s.is_ungraded())
            .cloned()
            .collect();
        rows.sort_by_key(|s| s.submitted_at);
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }

    async fn create_or_resume(
        &self,
        new: NewSubmission,
        max_attempts: i32,
    ) -> Result<StartOutcome> {
        let mut submissions = self.submissions.lock().await;

        let mut total = 0i64;
        let mut consumed = 0i64;
        for s in submissions
            .values()
            .filter(|s| s.exam_id == new.exam_id && s.student_id == new.student_id)
        {
            if s.is_in_progress() {
                return Ok(StartOutcome::Resumed(s.clone()));
            }
            total += 1;
            if s.consumes_attempt() {
                consumed += 1;
            }
        }

        if max_attempts > 0 && consumed >= max_attempts as i64 {
            return Ok(StartOutcome::LimitReached { consumed });
        }

        let submission = ExamSubmission {
            id: Uuid::new_v4(),
            exam_id: new.exam_id,
            student_id: new.student_id,
            attempt_number: (total + 1) as i32,
            answers: new
                .question_ids
                .iter()
                .copied()
                .map(AnswerRecord::placeholder)
                .collect(),
            draft_answers: Vec::new(),
            started_at: new.started_at,
            submitted_at: None,
            time_spent_seconds: None,
            score: None,
            percentage: None,
            status: SubmissionStatus::InProgress,
            suspicious_events: Vec::new(),
            flagged_for_review: false,
            review_notes: None,
            evaluated_by: None,
            evaluated_at: None,
            remarks: None,
            grading_version: 0,
            browser_fingerprint: Some(new.session.browser_fingerprint),
            ip_address: new.session.ip_address,
            user_agent: new.session.user_agent,
            created_at: new.started_at,
            updated_at: new.started_at,
        };
        submissions.insert(submission.id, submission.clone());
        Ok(StartOutcome::Created(submission))
    }

    async fn save_drafts(
        &self,
        submission_id: Uuid,
        student_id: Uuid,
        drafts: Vec<DraftAnswer>,
        now: DateTime<Utc>,
    ) -> Result<Option<ExamSubmission>> {
        let mut submissions = self.submissions.lock().await;
        match submissions.get_mut(&submission_id) {
            Some(s) if s.student_id == student_id && s.is_in_progress() => {
                s.draft_answers = drafts;
                s.updated_at = now;
                Ok(Some(s.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn append_event(
        &self,
        submission_id: Uuid,
        event: SuspiciousEvent,
    ) -> Result<Option<ExamSubmission>> {
        let mut submissions = self.submissions.lock().await;
        match submissions.get_mut(&submission_id) {
            Some(s) if s.is_in_progress() => {
                s.updated_at = event.timestamp;
                s.suspicious_events.push(event);
                Ok(Some(s.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn mark_flagged(
        &self,
        submission_id: Uuid,
        note: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut submissions = self.submissions.lock().await;
        let s = submissions
            .get_mut(&submission_id)
            .ok_or_else(|| missing(submission_id))?;
        s.flagged_for_review = true;
        if let Some(note) = note {
            append_note(s, note);
        }
        s.updated_at = now;
        Ok(())
    }

    async fn close_absent(
        &self,
        submission_id: Uuid,
        student_id: Uuid,
        note: String,
        now: DateTime<Utc>,
    ) -> Result<Option<ExamSubmission>> {
        let mut submissions = self.submissions.lock().await;
        match submissions.get_mut(&submission_id) {
            Some(s) if s.student_id == student_id && s.is_in_progress() => {
                s.status = SubmissionStatus::Absent;
                append_note(s, note);
                s.updated_at = now;
                Ok(Some(s.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn freeze(
        &self,
        submission_id: Uuid,
        student_id: Uuid,
        answers: Vec<AnswerRecord>,
        submitted_at: DateTime<Utc>,
    ) -> Result<Option<ExamSubmission>> {
        let mut submissions = self.submissions.lock().await;
        match submissions.get_mut(&submission_id) {
            Some(s) if s.student_id == student_id && s.is_in_progress() => {
                s.answers = answers;
                s.draft_answers.clear();
                s.submitted_at = Some(submitted_at);
                s.time_spent_seconds = Some((submitted_at - s.started_at).num_seconds().max(0) as i32);
                s.status = SubmissionStatus::Submitted;
                s.updated_at = submitted_at;
                Ok(Some(s.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn save_grading(
        &self,
        submission_id: Uuid,
        update: GradingUpdate,
    ) -> Result<Option<ExamSubmission>> {
        let mut submissions = self.submissions.lock().await;
        let Some(s) = submissions.get_mut(&submission_id) else {
            return Ok(None);
        };
        if !s.consumes_attempt() || s.grading_version != update.expected_version {
            return Ok(None);
        }
        s.answers = update.answers;
        s.score = Some(update.score);
        s.percentage = Some(update.percentage);
        s.status = update.status;
        if update.evaluated_by.is_some() {
            s.evaluated_by = update.evaluated_by;
        }
        if update.evaluated_at.is_some() {
            s.evaluated_at = update.evaluated_at;
        }
        s.grading_version += 1;
        s.updated_at = update.graded_at;
        Ok(Some(s.clone()))
    }

    async fn set_review(
        &self,
        submission_id: Uuid,
        flagged: bool,
        review_notes: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<ExamSubmission> {
        let mut submissions = self.submissions.lock().await;
        let s = submissions
            .get_mut(&submission_id)
            .ok_or_else(|| missing(submission_id))?;
        s.flagged_for_review = flagged;
        if review_notes.is_some() {
            s.review_notes = review_notes;
        }
        s.updated_at = now;
        Ok(s.clone())
    }

    async fn set_remarks(
        &self,
        submission_id: Uuid,
        remarks: String,
        evaluated_by: Uuid,
        evaluated_at: DateTime<Utc>,
    ) -> Result<ExamSubmission> {
        let mut submissions = self.submissions.lock().await;
        let s = submissions
            .get_mut(&submission_id)
            .ok_or_else(|| missing(submission_id))?;
        s.remarks = Some(remarks);
        s.evaluated_by = Some(evaluated_by);
        s.evaluated_at = Some(evaluated_at);
        s.updated_at = evaluated_at;
        Ok(s.clone())
    }
}
