use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::database::{ExamCatalog, SubmissionStore};
use crate::error::{Error, Result};
use crate::models::exam::{Exam, NegativeMarking};
use crate::models::question::{Question, QuestionKind};
use crate::models::submission::{AnswerRecord, ExamSubmission, GradingUpdate, SubmissionStatus};
use crate::utils::time::Clock;

#[derive(Debug, Clone)]
pub struct GradeOutcome {
    pub answers: Vec<AnswerRecord>,
    pub score: Decimal,
    pub percentage: Decimal,
    pub total_marks: i32,
    pub needs_manual_review: bool,
}

#[derive(Debug, Clone)]
pub struct GradeResult {
    pub submission: ExamSubmission,
    pub needs_manual_review: bool,
    pub total_marks: i32,
}

/// Blank answers never incur a penalty.
pub fn is_blank(answer: &JsonValue) -> bool {
    match answer {
        JsonValue::Null => true,
        JsonValue::String(s) => s.trim().is_empty(),
        JsonValue::Array(items) => items.is_empty(),
        JsonValue::Object(map) => map.get("selected").map(is_blank).unwrap_or(map.is_empty()),
        _ => false,
    }
}

/// Accepts `2`, `"2"` or `{"selected": 2}`.
pub fn selected_option(answer: &JsonValue) -> Option<usize> {
    match answer {
        JsonValue::Number(n) => n.as_u64().and_then(|v| usize::try_from(v).ok()),
        JsonValue::String(s) => s.trim().parse().ok(),
        JsonValue::Object(map) => map.get("selected").and_then(selected_option),
        _ => None,
    }
}

pub fn total_marks(questions: &[Question]) -> i32 {
    questions.iter().map(|q| q.marks.max(0)).sum()
}

/// Descriptive answers without a staff grade are still pending.
pub fn is_pending_review(answer: &AnswerRecord, question: Option<&Question>) -> bool {
    matches!(question.map(|q| &q.kind), Some(QuestionKind::Descriptive { .. })) && answer.graded_at.is_none()
}

pub fn needs_manual_review(answers: &[AnswerRecord], questions: &[Question]) -> bool {
    let by_id: HashMap<Uuid, &Question> = questions.iter().map(|q| (q.id, q)).collect();
    answers
        .iter()
        .any(|a| is_pending_review(a, by_id.get(&a.question_id).copied()))
}

/// Scores `answers` against the question bank. Staff-graded descriptive answers keep their marks.
pub fn grade_answers(
    questions: &[Question],
    answers: &[AnswerRecord],
    negative_marking: &NegativeMarking,
    now: DateTime<Utc>,
) -> GradeOutcome {
    let by_id: HashMap<Uuid, &Question> = questions.iter().map(|q| (q.id, q)).collect();
    let total = total_marks(questions);
    let mut graded = Vec::with_capacity(answers.len());
    let mut earned = Decimal::ZERO;
    let mut needs_manual_review = false;

    for answer in answers {
        let mut record = answer.clone();
        let Some(question) = by_id.get(&answer.question_id) else {
            record.is_correct = false;
            record.marks_awarded = Decimal::ZERO;
            graded.push(record);
            continue;
        };
        let marks = Decimal::from(question.marks.max(0));

        match &question.kind {
            QuestionKind::Mcq { correct_option, .. } => {
                let is_correct = selected_option(&answer.answer) == Some(*correct_option);
                record.is_correct = is_correct;
                record.marks_awarded = if is_correct {
                    marks
                } else if negative_marking.enabled && !is_blank(&answer.answer) {
                    -(marks * negative_marking.percentage / Decimal::ONE_HUNDRED)
                } else {
                    Decimal::ZERO
                };
                record.graded_by = None;
                record.graded_at = Some(now);
            }
            QuestionKind::Descriptive { .. } => {
                if record.graded_at.is_none() {
                    needs_manual_review = true;
                    record.is_correct = false;
                    record.marks_awarded = Decimal::ZERO;
                    record.graded_by = None;
                }
            }
        }

        earned += record.marks_awarded;
        graded.push(record);
    }

    let total_dec = Decimal::from(total);
    let score = earned.max(Decimal::ZERO).min(total_dec);
    let percentage = if total > 0 {
        (score * Decimal::ONE_HUNDRED / total_dec).round_dp(2)
    } else {
        Decimal::ZERO
    };

    GradeOutcome {
        answers: graded,
        score,
        percentage,
        total_marks: total,
        needs_manual_review,
    }
}

/// Lost compare-and-swap rounds tolerated before a grading call gives up.
const MAX_GRADING_ATTEMPTS: usize = 5;

/// The only writer of scoring fields.
#[derive(Clone)]
pub struct GradingEngine {
    catalog: Arc<dyn ExamCatalog>,
    store: Arc<dyn SubmissionStore>,
    clock: Arc<dyn Clock>,
}

impl GradingEngine {
    pub fn new(
        catalog: Arc<dyn ExamCatalog>,
        store: Arc<dyn SubmissionStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            catalog,
            store,
            clock,
        }
    }

    async fn load(&self, submission_id: Uuid) -> Result<(ExamSubmission, Exam, Vec<Question>)> {
        let submission = self
            .store
            .find_by_id(submission_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Submission {} not found", submission_id)))?;
        if !submission.consumes_attempt() {
            return Err(Error::BadRequest(format!(
                "Submission {} is {} and cannot be graded",
                submission_id, submission.status
            )));
        }
        let exam = self
            .catalog
            .find_exam(submission.exam_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Exam {} not found", submission.exam_id)))?;
        let questions = self.catalog.find_questions(&exam.question_ids).await?;
        Ok((submission, exam, questions))
    }

    /// `None` when another grader wrote first.
    async fn persist(
        &self,
        submission: &ExamSubmission,
        exam: &Exam,
        questions: &[Question],
        answers: &[AnswerRecord],
        evaluated_by: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<Option<GradeResult>> {
        let outcome = grade_answers(questions, answers, &exam.negative_marking, now);
        let status = if outcome.needs_manual_review {
            SubmissionStatus::Submitted
        } else {
            SubmissionStatus::Evaluated
        };
        let finished = status == SubmissionStatus::Evaluated;

        let Some(updated) = self
            .store
            .save_grading(
                submission.id,
                GradingUpdate {
                    answers: outcome.answers,
                    score: outcome.score,
                    percentage: outcome.percentage,
                    status,
                    evaluated_by: evaluated_by.filter(|_| finished),
                    evaluated_at: finished.then_some(now),
                    expected_version: submission.grading_version,
                    graded_at: now,
                },
            )
            .await?
        else {
            return Ok(None);
        };

        tracing::info!(
            submission_id = %submission.id,
            score = %outcome.score,
            percentage = %outcome.percentage,
            status = %status,
            "Submission graded"
        );

        Ok(Some(GradeResult {
            submission: updated,
            needs_manual_review: outcome.needs_manual_review,
            total_marks: outcome.total_marks,
        }))
    }

    /// Reload, edit, regrade and compare-and-swap until the write lands on the version it read.
    async fn grade_with<F>(
        &self,
        submission_id: Uuid,
        evaluated_by: Option<Uuid>,
        mut edit: F,
    ) -> Result<GradeResult>
    where
        F: FnMut(&[Question], &mut Vec<AnswerRecord>, DateTime<Utc>) -> Result<()> + Send,
    {
        for attempt in 1..=MAX_GRADING_ATTEMPTS {
            let (submission, exam, questions) = self.load(submission_id).await?;
            let now = self.clock.now();
            let mut answers = submission.answers.clone();
            edit(&questions, &mut answers, now)?;

            if let Some(result) = self
                .persist(&submission, &exam, &questions, &answers, evaluated_by, now)
                .await?
            {
                return Ok(result);
            }
            tracing::debug!(
                submission_id = %submission_id,
                attempt,
                "Grading write lost a race, retrying"
            );
        }
        Err(Error::Conflict(format!(
            "Submission {} is being graded concurrently",
            submission_id
        )))
    }

    /// Safe to re-run from `submitted` or `evaluated`.
    pub async fn auto_grade(&self, submission_id: Uuid) -> Result<GradeResult> {
        self.grade_with(submission_id, None, |_, _, _| Ok(())).await
    }

    /// Staff grading pass for a descriptive answer.
    pub async fn apply_manual_grade(
        &self,
        submission_id: Uuid,
        question_id: Uuid,
        marks: Decimal,
        feedback: Option<String>,
        graded_by: Uuid,
    ) -> Result<GradeResult> {
        self.grade_with(submission_id, Some(graded_by), |questions, answers, now| {
            let question = questions
                .iter()
                .find(|q| q.id == question_id)
                .ok_or_else(|| {
                    Error::NotFound(format!("Question {} is not part of this exam", question_id))
                })?;

            if !matches!(question.kind, QuestionKind::Descriptive { .. }) {
                return Err(Error::BadRequest(
                    "Only descriptive answers are graded manually".to_string(),
                ));
            }
            let max = Decimal::from(question.marks.max(0));
            if marks < Decimal::ZERO || marks > max {
                return Err(Error::BadRequest(format!(
                    "Marks must be between 0 and {}",
                    max
                )));
            }

            let answer = answers
                .iter_mut()
                .find(|a| a.question_id == question_id)
                .ok_or_else(|| {
                    Error::NotFound("Question answer not found in submission".to_string())
                })?;
            answer.marks_awarded = marks;
            answer.is_correct = marks == max && max > Decimal::ZERO;
            answer.graded_by = Some(graded_by);
            answer.graded_at = Some(now);
            answer.feedback = feedback.clone();
            Ok(())
        })
        .await
    }

    /// Finishes grading that was interrupted after freeze. Returns how many attempts were graded.
    pub async fn sweep_ungraded(&self, limit: i64) -> Result<usize> {
        let pending = self.store.list_ungraded(limit).await?;
        let mut graded = 0;
        for submission in pending {
            match self.auto_grade(submission.id).await {
                Ok(_) => graded += 1,
                Err(e) => {
                    tracing::error!(submission_id = %submission.id, error = ?e, "Deferred grading failed");
                }
            }
        }
        Ok(graded)
    }
}
