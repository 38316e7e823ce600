use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::models::question::Question;

/// Exam as served by the catalog collaborator, with batches and their active enrollments populated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Exam {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub instructions: Option<String>,
    pub status: ExamStatus,
    /// Question ids in presentation order.
    pub question_ids: Vec<Uuid>,
    pub batches: Vec<Batch>,
    pub scheduled_at: DateTime<Utc>,
    pub duration_minutes: i32,
    pub schedule: Option<Schedule>,
    /// 0 means unlimited.
    pub max_attempts: i32,
    pub result_publication: ResultPublication,
    pub results_published: bool,
    pub negative_marking: NegativeMarking,
}

impl Exam {
    pub fn start_time(&self) -> DateTime<Utc> {
        self.schedule
            .as_ref()
            .and_then(|s| s.start_time)
            .unwrap_or(self.scheduled_at)
    }

    pub fn end_time(&self) -> DateTime<Utc> {
        self.schedule
            .as_ref()
            .and_then(|s| s.end_time)
            .unwrap_or_else(|| self.start_time() + Duration::minutes(self.duration_minutes as i64))
    }

    pub fn is_published(&self) -> bool {
        self.status == ExamStatus::Published
    }

    /// Reorders catalog questions into presentation order, dropping any not on this exam.
    pub fn order_questions(&self, questions: Vec<Question>) -> Vec<Question> {
        let mut by_id: HashMap<Uuid, Question> = questions.into_iter().map(|q| (q.id, q)).collect();
        self.question_ids
            .iter()
            .filter_map(|id| by_id.remove(id))
            .collect()
    }

    pub fn has_active_enrollment(&self, student_id: Uuid) -> bool {
        self.batches.iter().any(|batch| {
            batch
                .enrollments
                .iter()
                .any(|e| e.student_id == student_id && e.status == EnrollmentStatus::Active)
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExamStatus {
    Draft,
    Published,
    Closed,
}

impl ExamStatus {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "draft" => Some(Self::Draft),
            "published" => Some(Self::Published),
            "closed" => Some(Self::Closed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Schedule {
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultPublication {
    #[default]
    Immediate,
    AfterExamEnd,
}

impl ResultPublication {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "immediate" => Some(Self::Immediate),
            "after_exam_end" => Some(Self::AfterExamEnd),
            _ => None,
        }
    }
}

/// Penalty applied to wrong, non-blank MCQ answers, as a percentage of the question's marks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NegativeMarking {
    pub enabled: bool,
    pub percentage: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    pub id: Uuid,
    pub name: String,
    pub enrollments: Vec<Enrollment>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Enrollment {
    pub student_id: Uuid,
    pub status: EnrollmentStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrollmentStatus {
    Active,
    Inactive,
    Completed,
    Dropped,
}

impl EnrollmentStatus {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "active" => Some(Self::Active),
            "inactive" => Some(Self::Inactive),
            "completed" => Some(Self::Completed),
            "dropped" => Some(Self::Dropped),
            _ => None,
        }
    }
}
