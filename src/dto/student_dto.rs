use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;
use validator::Validate;

use crate::dto::decimal_to_f64;
use crate::models::exam::Exam;
use crate::models::question::Question;
use crate::models::submission::{
    AnswerRecord, DraftAnswer, EventType, ExamSubmission, SubmissionStatus,
};

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct StartExamRequest {
    #[validate(length(min = 1, max = 512))]
    pub fingerprint: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerInput {
    pub question_id: Uuid,
    #[serde(default)]
    pub answer: JsonValue,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SaveDraftRequest {
    #[validate(length(max = 1000))]
    pub answers: Vec<AnswerInput>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SubmitExamRequest {
    #[validate(length(max = 1000))]
    pub answers: Vec<AnswerInput>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ReportEventRequest {
    #[serde(rename = "type")]
    pub event_type: EventType,
    #[serde(default)]
    pub metadata: JsonValue,
    #[validate(length(min = 1, max = 512))]
    pub fingerprint: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExamSummary {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub instructions: Option<String>,
    pub scheduled_at: DateTime<Utc>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_minutes: i32,
    pub total_questions: usize,
    pub total_marks: i32,
    pub max_attempts: i32,
}

impl ExamSummary {
    pub fn new(exam: &Exam, total_marks: i32) -> Self {
        Self {
            id: exam.id,
            title: exam.title.clone(),
            description: exam.description.clone(),
            instructions: exam.instructions.clone(),
            scheduled_at: exam.scheduled_at,
            start_time: exam.start_time(),
            end_time: exam.end_time(),
            duration_minutes: exam.duration_minutes,
            total_questions: exam.question_ids.len(),
            total_marks,
            max_attempts: exam.max_attempts,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstructionsResponse {
    pub exam: ExamSummary,
    pub can_resume: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submission_id: Option<Uuid>,
    pub attempts_used: i64,
    pub time_remaining_seconds: i64,
}

/// Payload of the 403 returned when instructions are requested outside the window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExamBrief {
    pub title: String,
    pub scheduled_at: DateTime<Utc>,
    pub duration: i32,
}

impl From<&Exam> for ExamBrief {
    fn from(exam: &Exam) -> Self {
        Self {
            title: exam.title.clone(),
            scheduled_at: exam.scheduled_at,
            duration: exam.duration_minutes,
        }
    }
}

/// A question as the student sees it: no correct option, no explanation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SanitizedQuestion {
    pub id: Uuid,
    pub text: String,
    #[serde(rename = "type")]
    pub question_type: String,
    pub options: Vec<String>,
    pub marks: i32,
}

impl From<&Question> for SanitizedQuestion {
    fn from(q: &Question) -> Self {
        Self {
            id: q.id,
            text: q.text.clone(),
            question_type: q.kind.type_name().to_string(),
            options: q.kind.options().to_vec(),
            marks: q.marks,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SanitizedExam {
    pub id: Uuid,
    pub title: String,
    pub instructions: Option<String>,
    pub duration_minutes: i32,
    pub end_time: DateTime<Utc>,
    pub questions: Vec<SanitizedQuestion>,
}

impl SanitizedExam {
    pub fn new(exam: &Exam, questions: &[Question]) -> Self {
        Self {
            id: exam.id,
            title: exam.title.clone(),
            instructions: exam.instructions.clone(),
            duration_minutes: exam.duration_minutes,
            end_time: exam.end_time(),
            questions: questions.iter().map(SanitizedQuestion::from).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionView {
    pub id: Uuid,
    pub exam_id: Uuid,
    pub attempt_number: i32,
    pub status: SubmissionStatus,
    pub started_at: DateTime<Utc>,
    pub draft_answers: Vec<DraftAnswer>,
    pub time_remaining_seconds: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartExamResponse {
    pub submission: SubmissionView,
    pub exam: SanitizedExam,
    pub is_resume: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DraftSavedResponse {
    pub submission_id: Uuid,
    pub saved: usize,
    pub saved_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitExamResponse {
    pub submission_id: Uuid,
    pub status: SubmissionStatus,
    pub submitted_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percentage: Option<f64>,
    pub needs_manual_review: bool,
    pub grading_pending: bool,
    pub late: bool,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecordedResponse {
    pub submission_id: Uuid,
    pub event_count: usize,
    pub integrity_score: u32,
    pub flagged_for_review: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptSummary {
    pub submission_id: Uuid,
    pub attempt_number: i32,
    pub status: SubmissionStatus,
    pub started_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
}

impl From<&ExamSubmission> for AttemptSummary {
    fn from(s: &ExamSubmission) -> Self {
        Self {
            submission_id: s.id,
            attempt_number: s.attempt_number,
            status: s.status,
            started_at: s.started_at,
            submitted_at: s.submitted_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptsResponse {
    pub exam_id: Uuid,
    pub max_attempts: i32,
    pub attempts_used: i64,
    pub attempts: Vec<AttemptSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerResult {
    pub question_id: Uuid,
    pub text: String,
    #[serde(rename = "type")]
    pub question_type: String,
    pub options: Vec<String>,
    pub max_marks: i32,
    pub answer: JsonValue,
    pub is_correct: bool,
    pub marks_awarded: f64,
    pub feedback: Option<String>,
}

impl AnswerResult {
    pub fn new(record: &AnswerRecord, question: Option<&Question>) -> Self {
        Self {
            question_id: record.question_id,
            text: question.map(|q| q.text.clone()).unwrap_or_default(),
            question_type: question
                .map(|q| q.kind.type_name().to_string())
                .unwrap_or_default(),
            options: question.map(|q| q.kind.options().to_vec()).unwrap_or_default(),
            max_marks: question.map(|q| q.marks).unwrap_or(0),
            answer: record.answer.clone(),
            is_correct: record.is_correct,
            marks_awarded: decimal_to_f64(record.marks_awarded),
            feedback: record.feedback.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultDetail {
    pub submission_id: Uuid,
    pub exam_id: Uuid,
    pub attempt_number: i32,
    pub status: SubmissionStatus,
    pub submitted_at: Option<DateTime<Utc>>,
    pub score: Option<f64>,
    pub percentage: Option<f64>,
    pub total_marks: i32,
    pub needs_manual_review: bool,
    pub remarks: Option<String>,
    pub answers: Vec<AnswerResult>,
}

/// The only fields a student sees while the result is gated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithheldResult {
    pub status: SubmissionStatus,
    pub submitted_at: Option<DateTime<Utc>>,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StudentResultResponse {
    Shown(ResultDetail),
    Withheld(WithheldResult),
}
