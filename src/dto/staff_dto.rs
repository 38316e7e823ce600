use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;
use validator::Validate;

use crate::dto::decimal_to_f64;
use crate::models::question::{Question, QuestionKind};
use crate::models::submission::{AnswerRecord, SubmissionStatus, SuspiciousEvent};
use crate::services::integrity_monitor::{IntegrityRating, IntegrityReport};

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct GradeAnswerRequest {
    pub question_id: Uuid,
    #[validate(range(min = 0.0))]
    pub marks: f64,
    #[validate(length(max = 5000))]
    pub feedback: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ClearFlagRequest {
    #[validate(length(max = 5000))]
    pub review_notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RemarksRequest {
    #[validate(length(min = 1, max = 5000))]
    pub remarks: String,
}

/// Full answer detail including the key; staff only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminAnswerDetail {
    pub question_id: Uuid,
    pub text: String,
    #[serde(rename = "type")]
    pub question_type: String,
    pub options: Vec<String>,
    pub correct_option: Option<usize>,
    pub model_answer: Option<String>,
    pub explanation: Option<String>,
    pub max_marks: i32,
    pub answer: JsonValue,
    pub is_correct: bool,
    pub marks_awarded: f64,
    pub graded_by: Option<Uuid>,
    pub graded_at: Option<DateTime<Utc>>,
    pub feedback: Option<String>,
    pub pending_review: bool,
}

impl AdminAnswerDetail {
    pub fn new(record: &AnswerRecord, question: Option<&Question>, pending_review: bool) -> Self {
        let (correct_option, model_answer) = match question.map(|q| &q.kind) {
            Some(QuestionKind::Mcq { correct_option, .. }) => (Some(*correct_option), None),
            Some(QuestionKind::Descriptive { model_answer }) => (None, model_answer.clone()),
            None => (None, None),
        };
        Self {
            question_id: record.question_id,
            text: question.map(|q| q.text.clone()).unwrap_or_default(),
            question_type: question
                .map(|q| q.kind.type_name().to_string())
                .unwrap_or_default(),
            options: question.map(|q| q.kind.options().to_vec()).unwrap_or_default(),
            correct_option,
            model_answer,
            explanation: question.and_then(|q| q.explanation.clone()),
            max_marks: question.map(|q| q.marks).unwrap_or(0),
            answer: record.answer.clone(),
            is_correct: record.is_correct,
            marks_awarded: decimal_to_f64(record.marks_awarded),
            graded_by: record.graded_by,
            graded_at: record.graded_at,
            feedback: record.feedback.clone(),
            pending_review,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AdminResultResponse {
    pub submission_id: Uuid,
    pub exam_id: Uuid,
    pub exam_title: String,
    pub student_id: Uuid,
    pub attempt_number: i32,
    pub status: SubmissionStatus,
    pub started_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub time_spent_seconds: Option<i32>,
    pub score: Option<f64>,
    pub percentage: Option<f64>,
    pub total_marks: i32,
    pub needs_manual_review: bool,
    pub flagged_for_review: bool,
    pub review_notes: Option<String>,
    pub remarks: Option<String>,
    pub evaluated_by: Option<Uuid>,
    pub evaluated_at: Option<DateTime<Utc>>,
    pub integrity: IntegrityReport,
    pub suspicious_events: Vec<SuspiciousEvent>,
    pub browser_fingerprint: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub answers: Vec<AdminAnswerDetail>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReviewQueueItem {
    pub submission_id: Uuid,
    pub student_id: Uuid,
    pub attempt_number: i32,
    pub status: SubmissionStatus,
    pub submitted_at: Option<DateTime<Utc>>,
    pub flagged_for_review: bool,
    pub needs_manual_review: bool,
    pub integrity_score: u32,
    pub integrity_rating: IntegrityRating,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReviewQueueResponse {
    pub exam_id: Uuid,
    pub total: usize,
    pub items: Vec<ReviewQueueItem>,
}
