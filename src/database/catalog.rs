use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use std::collections::HashMap;
use uuid::Uuid;

use crate::database::ExamCatalog;
use crate::error::{Error, Result};
use crate::models::exam::{
    Batch, Enrollment, EnrollmentStatus, Exam, ExamStatus, NegativeMarking, ResultPublication,
    Schedule,
};
use crate::models::question::{Question, QuestionKind};

#[derive(Debug, FromRow)]
struct ExamRow {
    id: Uuid,
    title: String,
    description: Option<String>,
    instructions: Option<String>,
    status: String,
    scheduled_at: DateTime<Utc>,
    duration_minutes: i32,
    schedule_start: Option<DateTime<Utc>>,
    schedule_end: Option<DateTime<Utc>>,
    max_attempts: i32,
    result_publication: String,
    results_published: bool,
    negative_marking_enabled: bool,
    negative_marking_percent: Decimal,
}

#[derive(Debug, FromRow)]
struct BatchRow {
    id: Uuid,
    name: String,
}

#[derive(Debug, FromRow)]
struct EnrollmentRow {
    batch_id: Uuid,
    student_id: Uuid,
    status: String,
}

#[derive(Debug, FromRow)]
struct QuestionRow {
    id: Uuid,
    text: String,
    question_type: String,
    options: Option<Json<Vec<String>>>,
    correct_option: Option<i32>,
    model_answer: Option<String>,
    explanation: Option<String>,
    marks: i32,
}

impl TryFrom<QuestionRow> for Question {
    type Error = Error;

    fn try_from(row: QuestionRow) -> Result<Self> {
        let kind = match row.question_type.as_str() {
            "mcq" => {
                let options = row.options.map(|o| o.0).unwrap_or_default();
                let correct_option = row
                    .correct_option
                    .and_then(|c| usize::try_from(c).ok())
                    .filter(|c| *c < options.len())
                    .ok_or_else(|| {
                        Error::Internal(format!("Question {} has no valid correct option", row.id))
                    })?;
                QuestionKind::Mcq {
                    options,
                    correct_option,
                }
            }
            "descriptive" => QuestionKind::Descriptive {
                model_answer: row.model_answer,
            },
            other => {
                return Err(Error::Internal(format!(
                    "Question {} has unknown type '{}'",
                    row.id, other
                )))
            }
        };

        Ok(Question {
            id: row.id,
            text: row.text,
            marks: row.marks,
            explanation: row.explanation,
            kind,
        })
    }
}

/// Reads exams, questions and enrollments from the collaborator's tables.
#[derive(Clone)]
pub struct PgExamCatalog {
    pool: PgPool,
}

impl PgExamCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ExamCatalog for PgExamCatalog {
    async fn find_exam(&self, exam_id: Uuid) -> Result<Option<Exam>> {
        let Some(row) = sqlx::query_as::<_, ExamRow>(
            r#"
            SELECT id, title, description, instructions, status, scheduled_at, duration_minutes,
                   schedule_start, schedule_end, max_attempts, result_publication, results_published,
                   negative_marking_enabled, negative_marking_percent
            FROM exams WHERE id = $1
            "#,
        )
        .bind(exam_id)
        .fetch_optional(&self.pool)
        .await?
        else {
            return Ok(None);
        };

        let question_ids: Vec<Uuid> = sqlx::query_scalar(
            r#"SELECT question_id FROM exam_questions WHERE exam_id = $1 ORDER BY position"#,
        )
        .bind(exam_id)
        .fetch_all(&self.pool)
        .await?;

        let batch_rows = sqlx::query_as::<_, BatchRow>(
            r#"
            SELECT b.id, b.name
            FROM batches b
            JOIN exam_batches eb ON eb.batch_id = b.id
            WHERE eb.exam_id = $1
            "#,
        )
        .bind(exam_id)
        .fetch_all(&self.pool)
        .await?;

        let batch_ids: Vec<Uuid> = batch_rows.iter().map(|b| b.id).collect();
        let enrollment_rows = sqlx::query_as::<_, EnrollmentRow>(
            r#"
            SELECT batch_id, student_id, status
            FROM enrollments
            WHERE batch_id = ANY($1) AND status = 'active'
            "#,
        )
        .bind(&batch_ids)
        .fetch_all(&self.pool)
        .await?;

        let mut by_batch: HashMap<Uuid, Vec<Enrollment>> = HashMap::new();
        for e in enrollment_rows {
            let Some(status) = EnrollmentStatus::parse(&e.status) else {
                tracing::warn!(batch_id = %e.batch_id, status = %e.status, "Skipping enrollment with unknown status");
                continue;
            };
            by_batch.entry(e.batch_id).or_default().push(Enrollment {
                student_id: e.student_id,
                status,
            });
        }

        let batches = batch_rows
            .into_iter()
            .map(|b| Batch {
                enrollments: by_batch.remove(&b.id).unwrap_or_default(),
                id: b.id,
                name: b.name,
            })
            .collect();

        let status = ExamStatus::parse(&row.status)
            .ok_or_else(|| Error::Internal(format!("Exam {} has unknown status '{}'", row.id, row.status)))?;
        let result_publication = ResultPublication::parse(&row.result_publication).ok_or_else(|| {
            Error::Internal(format!(
                "Exam {} has unknown result publication '{}'",
                row.id, row.result_publication
            ))
        })?;
        let schedule = (row.schedule_start.is_some() || row.schedule_end.is_some()).then(|| Schedule {
            start_time: row.schedule_start,
            end_time: row.schedule_end,
        });

        Ok(Some(Exam {
            id: row.id,
            title: row.title,
            description: row.description,
            instructions: row.instructions,
            status,
            question_ids,
            batches,
            scheduled_at: row.scheduled_at,
            duration_minutes: row.duration_minutes,
            schedule,
            max_attempts: row.max_attempts,
            result_publication,
            results_published: row.results_published,
            negative_marking: NegativeMarking {
                enabled: row.negative_marking_enabled,
                percentage: row.negative_marking_percent,
            },
        }))
    }

    async fn find_questions(&self, question_ids: &[Uuid]) -> Result<Vec<Question>> {
        let rows = sqlx::query_as::<_, QuestionRow>(
            r#"
            SELECT id, text, question_type, options, correct_option, model_answer, explanation, marks
            FROM questions WHERE id = ANY($1)
            "#,
        )
        .bind(question_ids)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Question::try_from).collect()
    }
}
