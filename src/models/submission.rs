use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// One numbered attempt at an exam. Never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExamSubmission {
    pub id: Uuid,
    pub exam_id: Uuid,
    pub student_id: Uuid,
    pub attempt_number: i32,
    pub answers: Vec<AnswerRecord>,
    pub draft_answers: Vec<DraftAnswer>,
    pub started_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub time_spent_seconds: Option<i32>,
    pub score: Option<Decimal>,
    pub percentage: Option<Decimal>,
    pub status: SubmissionStatus,
    pub suspicious_events: Vec<SuspiciousEvent>,
    pub flagged_for_review: bool,
    pub review_notes: Option<String>,
    pub evaluated_by: Option<Uuid>,
    pub evaluated_at: Option<DateTime<Utc>>,
    pub remarks: Option<String>,
    /// Bumped by every grading write; graders compare-and-swap on it.
    #[serde(default)]
    pub grading_version: i32,
    pub browser_fingerprint: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ExamSubmission {
    pub fn is_in_progress(&self) -> bool {
        self.status == SubmissionStatus::InProgress
    }

    /// Submitted or evaluated; an in-progress attempt resumes instead of consuming one.
    pub fn consumes_attempt(&self) -> bool {
        self.status.consumes_attempt()
    }

    /// Submitted but grading never completed (e.g. the grader failed after freeze).
    pub fn is_ungraded(&self) -> bool {
        self.status == SubmissionStatus::Submitted && self.score.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    InProgress,
    Submitted,
    Evaluated,
    Absent,
    Flagged,
}

impl SubmissionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionStatus::InProgress => "in_progress",
            SubmissionStatus::Submitted => "submitted",
            SubmissionStatus::Evaluated => "evaluated",
            SubmissionStatus::Absent => "absent",
            SubmissionStatus::Flagged => "flagged",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "in_progress" => Some(Self::InProgress),
            "submitted" => Some(Self::Submitted),
            "evaluated" => Some(Self::Evaluated),
            "absent" => Some(Self::Absent),
            "flagged" => Some(Self::Flagged),
            _ => None,
        }
    }

    pub fn consumes_attempt(&self) -> bool {
        matches!(self, SubmissionStatus::Submitted | SubmissionStatus::Evaluated)
    }
}

impl std::fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerRecord {
    pub question_id: Uuid,
    #[serde(default)]
    pub answer: JsonValue,
    #[serde(default)]
    pub is_correct: bool,
    #[serde(default)]
    pub marks_awarded: Decimal,
    pub graded_by: Option<Uuid>,
    pub graded_at: Option<DateTime<Utc>>,
    pub feedback: Option<String>,
}

impl AnswerRecord {
    pub fn placeholder(question_id: Uuid) -> Self {
        Self {
            question_id,
            answer: JsonValue::Null,
            is_correct: false,
            marks_awarded: Decimal::ZERO,
            graded_by: None,
            graded_at: None,
            feedback: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftAnswer {
    pub question_id: Uuid,
    #[serde(default)]
    pub answer: JsonValue,
    pub saved_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuspiciousEvent {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: JsonValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    TabSwitch,
    FullscreenExit,
    CopyAttempt,
    PasteAttempt,
    RightClick,
    ContextMenu,
    DevToolsOpen,
    MultipleSessions,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::TabSwitch => "tab_switch",
            EventType::FullscreenExit => "fullscreen_exit",
            EventType::CopyAttempt => "copy_attempt",
            EventType::PasteAttempt => "paste_attempt",
            EventType::RightClick => "right_click",
            EventType::ContextMenu => "context_menu",
            EventType::DevToolsOpen => "dev_tools_open",
            EventType::MultipleSessions => "multiple_sessions",
        }
    }
}

/// Fields captured from the request that opened the attempt.
#[derive(Debug, Clone, Default)]
pub struct SessionMetadata {
    pub browser_fingerprint: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// Input to the store's atomic find-or-create.
#[derive(Debug, Clone)]
pub struct NewSubmission {
    pub exam_id: Uuid,
    pub student_id: Uuid,
    pub question_ids: Vec<Uuid>,
    pub started_at: DateTime<Utc>,
    pub session: SessionMetadata,
}

/// Scoring fields written back by the grading engine.
#[derive(Debug, Clone)]
pub struct GradingUpdate {
    pub answers: Vec<AnswerRecord>,
    pub score: Decimal,
    pub percentage: Decimal,
    pub status: SubmissionStatus,
    pub evaluated_by: Option<Uuid>,
    pub evaluated_at: Option<DateTime<Utc>>,
    /// The `grading_version` the answers were read at.
    pub expected_version: i32,
    pub graded_at: DateTime<Utc>,
}
