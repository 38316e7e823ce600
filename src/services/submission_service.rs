use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;

use crate::config::{Config, LateSubmissionPolicy};
use crate::database::{ExamCatalog, StartOutcome, SubmissionStore};
use crate::dto::decimal_to_f64;
use crate::dto::student_dto::{
    AnswerInput, AnswerResult, AttemptSummary, AttemptsResponse, DraftSavedResponse, ExamBrief,
    EventRecordedResponse, ExamSummary, InstructionsResponse, ResultDetail, SanitizedExam,
    StartExamResponse, StudentResultResponse, SubmissionView, SubmitExamResponse, WithheldResult,
};
use crate::error::{Error, Result};
use crate::middleware::auth::AuthContext;
use crate::models::audit_log::AuditEntry;
use crate::models::exam::Exam;
use crate::models::question::Question;
use crate::models::submission::{
    AnswerRecord, DraftAnswer, EventType, ExamSubmission, NewSubmission, SessionMetadata,
};
use crate::services::access_validator::AccessValidator;
use crate::services::audit_service::AuditService;
use crate::services::grading_service::{self, GradingEngine};
use crate::services::integrity_monitor::{compute_integrity_score, IntegrityMonitor};
use crate::services::result_gate::{consumed_attempts, resolve_visibility, Visibility};
use crate::services::session_guard::SessionGuard;
use crate::services::timing_guard::{ElapsedCheck, TimingGuard};
use crate::utils::time::Clock;

/// What the instructions page gets back. Timing failures still carry the exam brief.
#[derive(Debug)]
pub enum InstructionsOutcome {
    Available(InstructionsResponse),
    Unavailable { error: Error, exam: ExamBrief },
}

/// Student-facing lifecycle of an attempt: start, autosave, events, submit, results.
#[derive(Clone)]
pub struct SubmissionService {
    catalog: Arc<dyn ExamCatalog>,
    store: Arc<dyn SubmissionStore>,
    access: AccessValidator,
    timing: TimingGuard,
    session: SessionGuard,
    integrity: IntegrityMonitor,
    grading: GradingEngine,
    audit: AuditService,
    clock: Arc<dyn Clock>,
    late_policy: LateSubmissionPolicy,
}

impl SubmissionService {
    pub fn new(
        catalog: Arc<dyn ExamCatalog>,
        store: Arc<dyn SubmissionStore>,
        audit: AuditService,
        clock: Arc<dyn Clock>,
        config: &Config,
    ) -> Self {
        let integrity = IntegrityMonitor::new(store.clone(), audit.clone(), clock.clone());
        Self {
            access: AccessValidator::new(catalog.clone()),
            timing: TimingGuard::new(config.grace_period_minutes),
            session: SessionGuard::new(
                store.clone(),
                integrity.clone(),
                audit.clone(),
                clock.clone(),
            ),
            grading: GradingEngine::new(catalog.clone(), store.clone(), clock.clone()),
            integrity,
            catalog,
            store,
            audit,
            clock,
            late_policy: config.late_submission_policy,
        }
    }

    async fn load_exam(&self, exam_id: Uuid) -> Result<Exam> {
        self.catalog
            .find_exam(exam_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Exam {} not found", exam_id)))
    }

    async fn load_questions(&self, exam: &Exam) -> Result<Vec<Question>> {
        let questions = self.catalog.find_questions(&exam.question_ids).await?;
        Ok(exam.order_questions(questions))
    }

    /// Submissions owned by someone else are reported as missing.
    async fn load_owned(&self, submission_id: Uuid, auth: &AuthContext) -> Result<ExamSubmission> {
        self.store
            .find_by_id(submission_id)
            .await?
            .filter(|s| s.student_id == auth.user_id)
            .ok_or_else(|| Error::NotFound(format!("Submission {} not found", submission_id)))
    }

    async fn load_open(&self, submission_id: Uuid, auth: &AuthContext) -> Result<ExamSubmission> {
        let submission = self.load_owned(submission_id, auth).await?;
        if !submission.is_in_progress() {
            return Err(Error::AlreadySubmitted);
        }
        Ok(submission)
    }

    /// Closes an attempt that the reject policy will never accept as `absent`, freeing the slot.
    async fn close_late(
        &self,
        submission: &ExamSubmission,
        elapsed: &ElapsedCheck,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let note = format!(
            "Closed as absent: {} minute(s) after start, {} allowed",
            elapsed.elapsed_minutes, elapsed.allowed_minutes
        );
        let Some(closed) = self
            .store
            .close_absent(submission.id, submission.student_id, note, now)
            .await?
        else {
            return Ok(());
        };

        tracing::info!(
            submission_id = %closed.id,
            exam_id = %closed.exam_id,
            student_id = %closed.student_id,
            elapsed_minutes = elapsed.elapsed_minutes,
            "Late attempt closed as absent"
        );
        self.audit
            .record(AuditEntry::submission(
                Some(closed.student_id),
                "attempt_closed_late",
                closed.id,
                Some(json!({
                    "attempt_number": closed.attempt_number,
                    "elapsed_minutes": elapsed.elapsed_minutes,
                    "allowed_minutes": elapsed.allowed_minutes,
                })),
                now,
            ))
            .await;
        Ok(())
    }

    /// Under the reject policy an open attempt past `duration + grace` can never be submitted.
    async fn expire_overdue(&self, exam: &Exam, student_id: Uuid, now: DateTime<Utc>) -> Result<()> {
        if self.late_policy != LateSubmissionPolicy::Reject {
            return Ok(());
        }
        let Some(open) = self.store.find_in_progress(exam.id, student_id).await? else {
            return Ok(());
        };
        let elapsed = self.timing.validate_elapsed(&open, exam, now);
        if elapsed.exceeded {
            self.close_late(&open, &elapsed, now).await?;
        }
        Ok(())
    }

    pub async fn instructions(
        &self,
        exam_id: Uuid,
        auth: &AuthContext,
    ) -> Result<InstructionsOutcome> {
        let grant = self.access.validate_access(exam_id, auth.user_id).await?;
        let exam = grant.exam;

        let window = match self.timing.validate_window(&exam, self.clock.now()) {
            Ok(window) => window,
            Err(error) if error.is_timing() => {
                return Ok(InstructionsOutcome::Unavailable {
                    exam: ExamBrief::from(&exam),
                    error,
                });
            }
            Err(error) => return Err(error),
        };

        let questions = self.load_questions(&exam).await?;
        let attempts = self.store.list_for_student(exam_id, auth.user_id).await?;
        let open = attempts.iter().find(|s| s.is_in_progress());

        Ok(InstructionsOutcome::Available(InstructionsResponse {
            exam: ExamSummary::new(&exam, grading_service::total_marks(&questions)),
            can_resume: open.is_some(),
            submission_id: open.map(|s| s.id),
            attempts_used: consumed_attempts(&attempts),
            time_remaining_seconds: window.time_remaining_seconds,
        }))
    }

    pub async fn start(
        &self,
        exam_id: Uuid,
        auth: &AuthContext,
        session: SessionMetadata,
    ) -> Result<StartExamResponse> {
        let exam = self.access.validate_access(exam_id, auth.user_id).await?.exam;
        let now = self.clock.now();
        self.timing.validate_window(&exam, now)?;
        self.expire_overdue(&exam, auth.user_id, now).await?;
        self.session
            .enforce_single_session(exam_id, auth.user_id, &session.browser_fingerprint)
            .await?;

        let fingerprint = session.browser_fingerprint.clone();
        let outcome = self
            .store
            .create_or_resume(
                NewSubmission {
                    exam_id,
                    student_id: auth.user_id,
                    question_ids: exam.question_ids.clone(),
                    started_at: now,
                    session,
                },
                exam.max_attempts,
            )
            .await?;

        let (submission, is_resume) = match outcome {
            StartOutcome::Resumed(existing) => {
                // Another browser may have opened the attempt between the guard and the upsert.
                self.session.ensure_same_session(&existing, &fingerprint).await?;
                tracing::info!(
                    submission_id = %existing.id,
                    exam_id = %exam_id,
                    student_id = %auth.user_id,
                    "Attempt resumed"
                );
                (existing, true)
            }
            StartOutcome::Created(created) => {
                tracing::info!(
                    submission_id = %created.id,
                    exam_id = %exam_id,
                    student_id = %auth.user_id,
                    attempt_number = created.attempt_number,
                    "Attempt started"
                );
                self.audit
                    .record(AuditEntry::submission(
                        Some(auth.user_id),
                        "exam_started",
                        created.id,
                        Some(json!({
                            "exam_id": exam_id,
                            "attempt_number": created.attempt_number,
                        })),
                        now,
                    ))
                    .await;
                (created, false)
            }
            StartOutcome::LimitReached { consumed } => {
                tracing::info!(
                    exam_id = %exam_id,
                    student_id = %auth.user_id,
                    consumed,
                    max_attempts = exam.max_attempts,
                    "Attempt limit reached"
                );
                return Err(Error::AttemptLimit {
                    max_attempts: exam.max_attempts,
                });
            }
        };

        let questions = self.load_questions(&exam).await?;
        Ok(StartExamResponse {
            submission: SubmissionView {
                id: submission.id,
                exam_id: submission.exam_id,
                attempt_number: submission.attempt_number,
                status: submission.status,
                started_at: submission.started_at,
                time_remaining_seconds: time_remaining(&exam, &submission, now),
                draft_answers: submission.draft_answers,
            },
            exam: SanitizedExam::new(&exam, &questions),
            is_resume,
        })
    }

    pub async fn save_draft(
        &self,
        submission_id: Uuid,
        auth: &AuthContext,
        answers: Vec<AnswerInput>,
    ) -> Result<DraftSavedResponse> {
        let submission = self.load_open(submission_id, auth).await?;
        let provided = collect_answers(&submission, answers)?;
        let now = self.clock.now();

        let drafts: Vec<DraftAnswer> = submission
            .answers
            .iter()
            .filter_map(|a| provided.get(&a.question_id))
            .map(|input| DraftAnswer {
                question_id: input.question_id,
                answer: input.answer.clone(),
                saved_at: now,
            })
            .collect();
        let saved = drafts.len();

        self.store
            .save_drafts(submission_id, auth.user_id, drafts, now)
            .await?
            .ok_or(Error::AlreadySubmitted)?;

        tracing::debug!(submission_id = %submission_id, saved, "Draft saved");
        Ok(DraftSavedResponse {
            submission_id,
            saved,
            saved_at: now,
        })
    }

    pub async fn submit(
        &self,
        submission_id: Uuid,
        auth: &AuthContext,
        answers: Vec<AnswerInput>,
    ) -> Result<SubmitExamResponse> {
        let submission = self.load_open(submission_id, auth).await?;
        let exam = self.load_exam(submission.exam_id).await?;
        let mut provided = collect_answers(&submission, answers)?;
        let now = self.clock.now();

        let elapsed = self.timing.validate_elapsed(&submission, &exam, now);
        if elapsed.exceeded {
            tracing::warn!(
                submission_id = %submission_id,
                elapsed_minutes = elapsed.elapsed_minutes,
                allowed_minutes = elapsed.allowed_minutes,
                policy = ?self.late_policy,
                "Late submission"
            );
            self.audit
                .record(AuditEntry::submission(
                    Some(auth.user_id),
                    "late_submission",
                    submission_id,
                    Some(json!({
                        "elapsed_minutes": elapsed.elapsed_minutes,
                        "allowed_minutes": elapsed.allowed_minutes,
                        "policy": format!("{:?}", self.late_policy).to_lowercase(),
                    })),
                    now,
                ))
                .await;
            if self.late_policy == LateSubmissionPolicy::Reject {
                self.close_late(&submission, &elapsed, now).await?;
                return Err(Error::LateSubmission {
                    elapsed_minutes: elapsed.elapsed_minutes,
                });
            }
        }

        let frozen_answers: Vec<AnswerRecord> = submission
            .answers
            .iter()
            .map(|placeholder| AnswerRecord {
                answer: provided
                    .remove(&placeholder.question_id)
                    .map(|input| input.answer)
                    .unwrap_or_default(),
                ..AnswerRecord::placeholder(placeholder.question_id)
            })
            .collect();

        let mut frozen = self
            .store
            .freeze(submission_id, auth.user_id, frozen_answers, now)
            .await?
            .ok_or(Error::AlreadySubmitted)?;

        tracing::info!(
            submission_id = %submission_id,
            exam_id = %frozen.exam_id,
            student_id = %auth.user_id,
            "Attempt submitted"
        );

        if elapsed.exceeded && self.late_policy == LateSubmissionPolicy::Flag {
            let note = format!(
                "Submitted {} minute(s) after start; {} allowed",
                elapsed.elapsed_minutes, elapsed.allowed_minutes
            );
            self.store
                .mark_flagged(submission_id, Some(note), now)
                .await?;
            frozen.flagged_for_review = true;
        }
        self.integrity.apply_flag(&mut frozen).await?;

        self.audit
            .record(AuditEntry::submission(
                Some(auth.user_id),
                "exam_submitted",
                submission_id,
                Some(json!({
                    "exam_id": frozen.exam_id,
                    "attempt_number": frozen.attempt_number,
                    "late": elapsed.exceeded,
                })),
                now,
            ))
            .await;

        let (graded, needs_manual_review, grading_pending) =
            match self.grading.auto_grade(submission_id).await {
                Ok(result) => (result.submission, result.needs_manual_review, false),
                Err(e) => {
                    // The sweeper picks this attempt up again.
                    tracing::error!(submission_id = %submission_id, error = ?e, "Grading failed after submit");
                    (frozen, false, true)
                }
            };

        let attempts = self.store.list_for_student(graded.exam_id, auth.user_id).await?;
        let visibility = resolve_visibility(&exam, &graded, &attempts, now);
        let (score, percentage) = match visibility {
            Visibility::Shown => (
                graded.score.map(decimal_to_f64),
                graded.percentage.map(decimal_to_f64),
            ),
            Visibility::Withheld(_) => (None, None),
        };

        let message = if grading_pending {
            "Submission received; grading is pending".to_string()
        } else if needs_manual_review {
            "Submission received; some answers await manual grading".to_string()
        } else {
            match visibility {
                Visibility::Shown => "Submission graded".to_string(),
                Visibility::Withheld(reason) => reason.message().to_string(),
            }
        };

        Ok(SubmitExamResponse {
            submission_id,
            status: graded.status,
            submitted_at: graded.submitted_at,
            score,
            percentage,
            needs_manual_review,
            grading_pending,
            late: elapsed.exceeded,
            message,
        })
    }

    pub async fn report_event(
        &self,
        submission_id: Uuid,
        auth: &AuthContext,
        event_type: EventType,
        metadata: serde_json::Value,
        fingerprint: Option<String>,
    ) -> Result<EventRecordedResponse> {
        let submission = self.load_open(submission_id, auth).await?;
        if let Some(fingerprint) = fingerprint.as_deref() {
            self.session.ensure_same_session(&submission, fingerprint).await?;
        }

        let updated = self
            .integrity
            .record_event(submission_id, event_type, metadata)
            .await?;

        Ok(EventRecordedResponse {
            submission_id,
            event_count: updated.suspicious_events.len(),
            integrity_score: compute_integrity_score(&updated.suspicious_events),
            flagged_for_review: updated.flagged_for_review,
        })
    }

    pub async fn result_for_submission(
        &self,
        submission_id: Uuid,
        auth: &AuthContext,
    ) -> Result<StudentResultResponse> {
        let submission = self.load_owned(submission_id, auth).await?;
        let exam = self.load_exam(submission.exam_id).await?;
        let attempts = self.store.list_for_student(exam.id, auth.user_id).await?;
        self.gated_result(&exam, &submission, &attempts).await
    }

    /// Result of the student's latest finished attempt, or the open one if nothing was submitted.
    pub async fn result_for_exam(
        &self,
        exam_id: Uuid,
        auth: &AuthContext,
    ) -> Result<StudentResultResponse> {
        let exam = self.load_exam(exam_id).await?;
        let attempts = self.store.list_for_student(exam_id, auth.user_id).await?;
        let latest = attempts
            .iter()
            .filter(|s| s.consumes_attempt())
            .max_by_key(|s| s.attempt_number)
            .or_else(|| attempts.iter().max_by_key(|s| s.attempt_number))
            .ok_or_else(|| Error::NotFound(format!("No attempts at exam {}", exam_id)))?;
        self.gated_result(&exam, latest, &attempts).await
    }

    async fn gated_result(
        &self,
        exam: &Exam,
        submission: &ExamSubmission,
        attempts: &[ExamSubmission],
    ) -> Result<StudentResultResponse> {
        let now = self.clock.now();
        if let Visibility::Withheld(reason) = resolve_visibility(exam, submission, attempts, now) {
            return Ok(StudentResultResponse::Withheld(WithheldResult {
                status: submission.status,
                submitted_at: submission.submitted_at,
                message: reason.message().to_string(),
            }));
        }

        let questions = self.load_questions(exam).await?;
        let by_id: HashMap<Uuid, &Question> = questions.iter().map(|q| (q.id, q)).collect();
        Ok(StudentResultResponse::Shown(ResultDetail {
            submission_id: submission.id,
            exam_id: exam.id,
            attempt_number: submission.attempt_number,
            status: submission.status,
            submitted_at: submission.submitted_at,
            score: submission.score.map(decimal_to_f64),
            percentage: submission.percentage.map(decimal_to_f64),
            total_marks: grading_service::total_marks(&questions),
            needs_manual_review: grading_service::needs_manual_review(
                &submission.answers,
                &questions,
            ),
            remarks: submission.remarks.clone(),
            answers: submission
                .answers
                .iter()
                .map(|a| AnswerResult::new(a, by_id.get(&a.question_id).copied()))
                .collect(),
        }))
    }

    pub async fn my_attempts(&self, exam_id: Uuid, auth: &AuthContext) -> Result<AttemptsResponse> {
        let exam = self.load_exam(exam_id).await?;
        let attempts = self.store.list_for_student(exam_id, auth.user_id).await?;
        Ok(AttemptsResponse {
            exam_id,
            max_attempts: exam.max_attempts,
            attempts_used: consumed_attempts(&attempts),
            attempts: attempts.iter().map(AttemptSummary::from).collect(),
        })
    }
}

/// Indexes the caller's answers by question, rejecting ids that are not part of the attempt.
fn collect_answers(
    submission: &ExamSubmission,
    answers: Vec<AnswerInput>,
) -> Result<HashMap<Uuid, AnswerInput>> {
    let known: HashSet<Uuid> = submission.answers.iter().map(|a| a.question_id).collect();
    let mut provided = HashMap::with_capacity(answers.len());
    for input in answers {
        if !known.contains(&input.question_id) {
            return Err(Error::BadRequest(format!(
                "Question {} is not part of this exam",
                input.question_id
            )));
        }
        provided.insert(input.question_id, input);
    }
    Ok(provided)
}

/// Seconds left before either the attempt's own duration or the exam window runs out.
fn time_remaining(exam: &Exam, submission: &ExamSubmission, now: DateTime<Utc>) -> i64 {
    let attempt_deadline =
        submission.started_at + Duration::minutes(exam.duration_minutes as i64);
    let deadline = attempt_deadline.min(exam.end_time());
    (deadline - now).num_seconds().max(0)
}
