use rust_decimal::Decimal;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::database::{ExamCatalog, SubmissionStore};
use crate::dto::decimal_to_f64;
use crate::dto::staff_dto::{
    AdminAnswerDetail, AdminResultResponse, GradeAnswerRequest, ReviewQueueItem,
    ReviewQueueResponse,
};
use crate::error::{Error, Result};
use crate::middleware::auth::AuthContext;
use crate::models::audit_log::AuditEntry;
use crate::models::exam::Exam;
use crate::models::question::Question;
use crate::models::submission::ExamSubmission;
use crate::services::audit_service::AuditService;
use crate::services::grading_service::{self, is_pending_review, GradingEngine};
use crate::services::integrity_monitor::report;
use crate::utils::time::Clock;

/// Instructor and admin operations. These bypass the result gate.
#[derive(Clone)]
pub struct StaffService {
    catalog: Arc<dyn ExamCatalog>,
    store: Arc<dyn SubmissionStore>,
    grading: GradingEngine,
    audit: AuditService,
    clock: Arc<dyn Clock>,
}

impl StaffService {
    pub fn new(
        catalog: Arc<dyn ExamCatalog>,
        store: Arc<dyn SubmissionStore>,
        audit: AuditService,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            grading: GradingEngine::new(catalog.clone(), store.clone(), clock.clone()),
            catalog,
            store,
            audit,
            clock,
        }
    }

    async fn load_submission(&self, submission_id: Uuid) -> Result<ExamSubmission> {
        self.store
            .find_by_id(submission_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Submission {} not found", submission_id)))
    }

    async fn load_exam(&self, exam_id: Uuid) -> Result<Exam> {
        self.catalog
            .find_exam(exam_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Exam {} not found", exam_id)))
    }

    async fn view(&self, submission: ExamSubmission) -> Result<AdminResultResponse> {
        let exam = self.load_exam(submission.exam_id).await?;
        let questions = exam.order_questions(self.catalog.find_questions(&exam.question_ids).await?);
        Ok(admin_view(&exam, submission, &questions))
    }

    pub async fn admin_result(&self, submission_id: Uuid) -> Result<AdminResultResponse> {
        let submission = self.load_submission(submission_id).await?;
        self.view(submission).await
    }

    pub async fn grade_answer(
        &self,
        submission_id: Uuid,
        auth: &AuthContext,
        req: GradeAnswerRequest,
    ) -> Result<AdminResultResponse> {
        let marks = Decimal::try_from(req.marks)
            .map_err(|_| Error::BadRequest("Marks must be a finite number".to_string()))?
            .round_dp(2);

        let result = self
            .grading
            .apply_manual_grade(submission_id, req.question_id, marks, req.feedback, auth.user_id)
            .await?;

        tracing::info!(
            submission_id = %submission_id,
            question_id = %req.question_id,
            graded_by = %auth.user_id,
            marks = %marks,
            "Answer graded"
        );
        self.audit
            .record(AuditEntry::submission(
                Some(auth.user_id),
                "answer_graded",
                submission_id,
                Some(json!({
                    "question_id": req.question_id,
                    "marks": decimal_to_f64(marks),
                    "status": result.submission.status,
                })),
                self.clock.now(),
            ))
            .await;

        self.view(result.submission).await
    }

    pub async fn regrade(&self, submission_id: Uuid, auth: &AuthContext) -> Result<AdminResultResponse> {
        let result = self.grading.auto_grade(submission_id).await?;
        tracing::info!(
            submission_id = %submission_id,
            requested_by = %auth.user_id,
            needs_manual_review = result.needs_manual_review,
            "Submission regraded"
        );
        self.view(result.submission).await
    }

    pub async fn clear_flag(
        &self,
        submission_id: Uuid,
        auth: &AuthContext,
        review_notes: Option<String>,
    ) -> Result<AdminResultResponse> {
        let before = self.load_submission(submission_id).await?;
        let now = self.clock.now();
        let updated = self
            .store
            .set_review(submission_id, false, review_notes.clone(), now)
            .await?;

        tracing::info!(
            submission_id = %submission_id,
            cleared_by = %auth.user_id,
            was_flagged = before.flagged_for_review,
            "Review flag cleared"
        );
        self.audit
            .record(AuditEntry::submission(
                Some(auth.user_id),
                "flag_cleared",
                submission_id,
                Some(json!({
                    "was_flagged": before.flagged_for_review,
                    "review_notes": review_notes,
                })),
                now,
            ))
            .await;

        self.view(updated).await
    }

    pub async fn set_remarks(
        &self,
        submission_id: Uuid,
        auth: &AuthContext,
        remarks: String,
    ) -> Result<AdminResultResponse> {
        let submission = self.load_submission(submission_id).await?;
        if !submission.consumes_attempt() {
            return Err(Error::BadRequest(
                "Remarks can only be added to submitted attempts".to_string(),
            ));
        }

        let now = self.clock.now();
        let updated = self
            .store
            .set_remarks(submission_id, remarks, auth.user_id, now)
            .await?;

        self.audit
            .record(AuditEntry::submission(
                Some(auth.user_id),
                "remarks_set",
                submission_id,
                None,
                now,
            ))
            .await;

        self.view(updated).await
    }

    /// Attempts that are flagged, still awaiting a staff grade, or never finished grading.
    pub async fn review_queue(&self, exam_id: Uuid) -> Result<ReviewQueueResponse> {
        let exam = self.load_exam(exam_id).await?;
        let questions = self.catalog.find_questions(&exam.question_ids).await?;
        let submissions = self.store.list_for_exam(exam_id).await?;

        let items: Vec<ReviewQueueItem> = submissions
            .iter()
            .filter_map(|s| {
                let needs_manual_review = s.consumes_attempt()
                    && (s.is_ungraded()
                        || grading_service::needs_manual_review(&s.answers, &questions));
                if !s.flagged_for_review && !needs_manual_review {
                    return None;
                }
                let integrity = report(s);
                Some(ReviewQueueItem {
                    submission_id: s.id,
                    student_id: s.student_id,
                    attempt_number: s.attempt_number,
                    status: s.status,
                    submitted_at: s.submitted_at,
                    flagged_for_review: s.flagged_for_review,
                    needs_manual_review,
                    integrity_score: integrity.score,
                    integrity_rating: integrity.rating,
                })
            })
            .collect();

        Ok(ReviewQueueResponse {
            exam_id,
            total: items.len(),
            items,
        })
    }
}

fn admin_view(exam: &Exam, submission: ExamSubmission, questions: &[Question]) -> AdminResultResponse {
    let by_id: HashMap<Uuid, &Question> = questions.iter().map(|q| (q.id, q)).collect();
    let answers: Vec<AdminAnswerDetail> = submission
        .answers
        .iter()
        .map(|a| {
            let question = by_id.get(&a.question_id).copied();
            AdminAnswerDetail::new(a, question, is_pending_review(a, question))
        })
        .collect();
    let needs_manual_review = submission.consumes_attempt() && answers.iter().any(|a| a.pending_review);

    AdminResultResponse {
        submission_id: submission.id,
        exam_id: exam.id,
        exam_title: exam.title.clone(),
        student_id: submission.student_id,
        attempt_number: submission.attempt_number,
        status: submission.status,
        started_at: submission.started_at,
        submitted_at: submission.submitted_at,
        time_spent_seconds: submission.time_spent_seconds,
        score: submission.score.map(decimal_to_f64),
        percentage: submission.percentage.map(decimal_to_f64),
        total_marks: grading_service::total_marks(questions),
        needs_manual_review,
        flagged_for_review: submission.flagged_for_review,
        integrity: report(&submission),
        review_notes: submission.review_notes,
        remarks: submission.remarks,
        evaluated_by: submission.evaluated_by,
        evaluated_at: submission.evaluated_at,
        suspicious_events: submission.suspicious_events,
        browser_fingerprint: submission.browser_fingerprint,
        ip_address: submission.ip_address,
        user_agent: submission.user_agent,
        answers,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory::{InMemoryCatalog, InMemorySubmissionStore};
    use crate::middleware::auth::Role;
    use crate::models::submission::{AnswerRecord, SubmissionStatus};
    use crate::services::audit_service::TracingAuditSink;
    use crate::services::fixtures::{at, descriptive, exam_for, mcq, submission};
    use crate::utils::time::ManualClock;

    struct Harness {
        service: StaffService,
        store: Arc<InMemorySubmissionStore>,
        staff: AuthContext,
        questions: Vec<Question>,
        submission_id: Uuid,
    }

    async fn harness() -> Harness {
        let student = Uuid::new_v4();
        let questions = vec![mcq(5, 0), descriptive(10)];
        let exam = exam_for(student, &questions);
        let catalog = Arc::new(InMemoryCatalog::new());
        catalog.insert_exam(exam.clone()).await;
        for q in &questions {
            catalog.insert_question(q.clone()).await;
        }

        let mut sub = submission(&exam, student, SubmissionStatus::Submitted);
        sub.answers = vec![
            AnswerRecord {
                answer: json!(0),
                ..AnswerRecord::placeholder(questions[0].id)
            },
            AnswerRecord {
                answer: json!("Momentum is conserved"),
                ..AnswerRecord::placeholder(questions[1].id)
            },
        ];
        let submission_id = sub.id;
        let store = Arc::new(InMemorySubmissionStore::new());
        store.insert(sub).await;

        let service = StaffService::new(
            catalog,
            store.clone(),
            AuditService::new(Arc::new(TracingAuditSink)),
            Arc::new(ManualClock::new(at(12, 0))),
        );
        Harness {
            service,
            store,
            staff: AuthContext {
                user_id: Uuid::new_v4(),
                role: Role::Instructor,
            },
            questions,
            submission_id,
        }
    }

    #[tokio::test]
    async fn admin_result_exposes_the_key() {
        let h = harness().await;
        let view = h.service.admin_result(h.submission_id).await.unwrap();
        assert_eq!(view.answers[0].correct_option, Some(0));
        assert_eq!(view.answers[0].explanation.as_deref(), Some("Because"));
        assert!(view.answers[1].pending_review);
        assert_eq!(view.total_marks, 15);
    }

    #[tokio::test]
    async fn grading_the_last_descriptive_answer_evaluates() {
        let h = harness().await;
        h.service.regrade(h.submission_id, &h.staff).await.unwrap();

        let view = h
            .service
            .grade_answer(
                h.submission_id,
                &h.staff,
                GradeAnswerRequest {
                    question_id: h.questions[1].id,
                    marks: 7.0,
                    feedback: Some("Missing the formula".to_string()),
                },
            )
            .await
            .unwrap();

        assert_eq!(view.status, SubmissionStatus::Evaluated);
        assert_eq!(view.score, Some(12.0));
        assert_eq!(view.percentage, Some(80.0));
        assert_eq!(view.evaluated_by, Some(h.staff.user_id));
        assert!(!view.needs_manual_review);
        assert_eq!(view.answers[1].graded_by, Some(h.staff.user_id));
    }

    #[tokio::test]
    async fn marks_above_the_question_maximum_are_rejected() {
        let h = harness().await;
        let err = h
            .service
            .grade_answer(
                h.submission_id,
                &h.staff,
                GradeAnswerRequest {
                    question_id: h.questions[1].id,
                    marks: 11.0,
                    feedback: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::BadRequest(_)));
    }

    #[tokio::test]
    async fn review_queue_lists_pending_and_flagged() {
        let h = harness().await;
        let exam_id = h.store.find_by_id(h.submission_id).await.unwrap().unwrap().exam_id;

        let queue = h.service.review_queue(exam_id).await.unwrap();
        assert_eq!(queue.total, 1);
        assert!(queue.items[0].needs_manual_review);

        h.store
            .mark_flagged(h.submission_id, None, at(12, 0))
            .await
            .unwrap();
        let cleared = h
            .service
            .clear_flag(h.submission_id, &h.staff, Some("Reviewed".to_string()))
            .await
            .unwrap();
        assert!(!cleared.flagged_for_review);
        assert_eq!(cleared.review_notes.as_deref(), Some("Reviewed"));
    }

    #[tokio::test]
    async fn remarks_record_the_evaluator() {
        let h = harness().await;
        let view = h
            .service
            .set_remarks(h.submission_id, &h.staff, "Well done".to_string())
            .await
            .unwrap();
        assert_eq!(view.remarks.as_deref(), Some("Well done"));
        assert_eq!(view.evaluated_by, Some(h.staff.user_id));
    }
}
