use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::database::{StartOutcome, SubmissionStore};
use crate::error::{Error, Result};
use crate::models::submission::{
    AnswerRecord, DraftAnswer, ExamSubmission, GradingUpdate, NewSubmission, SubmissionStatus,
    SuspiciousEvent,
};

const UNIQUE_VIOLATION: &str = "23505";

#[derive(Debug, FromRow)]
struct SubmissionRow {
    id: Uuid,
    exam_id: Uuid,
    student_id: Uuid,
    attempt_number: i32,
    answers: Json<Vec<AnswerRecord>>,
    draft_answers: Json<Vec<DraftAnswer>>,
    started_at: DateTime<Utc>,
    submitted_at: Option<DateTime<Utc>>,
    time_spent_seconds: Option<i32>,
    score: Option<Decimal>,
    percentage: Option<Decimal>,
    status: String,
    suspicious_events: Json<Vec<SuspiciousEvent>>,
    flagged_for_review: bool,
    review_notes: Option<String>,
    evaluated_by: Option<Uuid>,
    evaluated_at: Option<DateTime<Utc>>,
    remarks: Option<String>,
    grading_version: i32,
    browser_fingerprint: Option<String>,
    ip_address: Option<String>,
    user_agent: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<SubmissionRow> for ExamSubmission {
    type Error = Error;

    fn try_from(row: SubmissionRow) -> Result<Self> {
        let status = SubmissionStatus::parse(&row.status).ok_or_else(|| {
            Error::Internal(format!("Submission {} has unknown status '{}'", row.id, row.status))
        })?;
        Ok(ExamSubmission {
            id: row.id,
            exam_id: row.exam_id,
            student_id: row.student_id,
            attempt_number: row.attempt_number,
            answers: row.answers.0,
            draft_answers: row.draft_answers.0,
            started_at: row.started_at,
            submitted_at: row.submitted_at,
            time_spent_seconds: row.time_spent_seconds,
            score: row.score,
            percentage: row.percentage,
            status,
            suspicious_events: row.suspicious_events.0,
            flagged_for_review: row.flagged_for_review,
            review_notes: row.review_notes,
            evaluated_by: row.evaluated_by,
            evaluated_at: row.evaluated_at,
            remarks: row.remarks,
            grading_version: row.grading_version,
            browser_fingerprint: row.browser_fingerprint,
            ip_address: row.ip_address,
            user_agent: row.user_agent,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn into_submission(row: Option<SubmissionRow>) -> Result<Option<ExamSubmission>> {
    row.map(ExamSubmission::try_from).transpose()
}

fn into_submissions(rows: Vec<SubmissionRow>) -> Result<Vec<ExamSubmission>> {
    rows.into_iter().map(ExamSubmission::try_from).collect()
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some(UNIQUE_VIOLATION))
}

#[derive(Clone)]
pub struct PgSubmissionStore {
    pool: PgPool,
}

impl PgSubmissionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn find_in_progress_tx(
        tx: &mut Transaction<'_, Postgres>,
        exam_id: Uuid,
        student_id: Uuid,
    ) -> Result<Option<ExamSubmission>> {
        let row = sqlx::query_as::<_, SubmissionRow>(
            r#"SELECT * FROM exam_submissions WHERE exam_id = $1 AND student_id = $2 AND status = 'in_progress'"#,
        )
        .bind(exam_id)
        .bind(student_id)
        .fetch_optional(&mut **tx)
        .await?;
        into_submission(row)
    }

    async fn try_create(&self, new: &NewSubmission, max_attempts: i32) -> Result<StartOutcome> {
        let mut tx = self.pool.begin().await?;

        // Serialises concurrent starts for the same pair; released at commit.
        sqlx::query(r#"SELECT pg_advisory_xact_lock(hashtextextended($1, 0))"#)
            .bind(format!("{}:{}", new.exam_id, new.student_id))
            .execute(&mut *tx)
            .await?;

        if let Some(existing) = Self::find_in_progress_tx(&mut tx, new.exam_id, new.student_id).await? {
            tx.commit().await?;
            return Ok(StartOutcome::Resumed(existing));
        }

        let (total, consumed): (i64, i64) = sqlx::query_as(
            r#"
            SELECT COUNT(*),
                   COUNT(*) FILTER (WHERE status IN ('submitted', 'evaluated'))
            FROM exam_submissions
            WHERE exam_id = $1 AND student_id = $2
            "#,
        )
        .bind(new.exam_id)
        .bind(new.student_id)
        .fetch_one(&mut *tx)
        .await?;

        if max_attempts > 0 && consumed >= max_attempts as i64 {
            tx.commit().await?;
            return Ok(StartOutcome::LimitReached { consumed });
        }

        let answers: Vec<AnswerRecord> = new
            .question_ids
            .iter()
            .copied()
            .map(AnswerRecord::placeholder)
            .collect();

        let row = sqlx::query_as::<_, SubmissionRow>(
            r#"
            INSERT INTO exam_submissions (
                id, exam_id, student_id, attempt_number, answers, draft_answers, started_at,
                status, suspicious_events, flagged_for_review, browser_fingerprint, ip_address, user_agent,
                created_at, updated_at
            ) VALUES (
                $1, $2, $3, $4, $5, '[]'::jsonb, $6,
                'in_progress', '[]'::jsonb, FALSE, $7, $8, $9,
                $6, $6
            )
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(new.exam_id)
        .bind(new.student_id)
        .bind((total + 1) as i32)
        .bind(Json(&answers))
        .bind(new.started_at)
        .bind(&new.session.browser_fingerprint)
        .bind(&new.session.ip_address)
        .bind(&new.session.user_agent)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(StartOutcome::Created(ExamSubmission::try_from(row)?))
    }
}

#[async_trait]
impl SubmissionStore for PgSubmissionStore {
    async fn find_by_id(&self, submission_id: Uuid) -> Result<Option<ExamSubmission>> {
        let row = sqlx::query_as::<_, SubmissionRow>(r#"SELECT * FROM exam_submissions WHERE id = $1"#)
            .bind(submission_id)
            .fetch_optional(&self.pool)
            .await?;
        into_submission(row)
    }

    async fn find_in_progress(
        &self,
        exam_id: Uuid,
        student_id: Uuid,
    ) -> Result<Option<ExamSubmission>> {
        let row = sqlx::query_as::<_, SubmissionRow>(
            r#"SELECT * FROM exam_submissions WHERE exam_id = $1 AND student_id = $2 AND status = 'in_progress'"#,
        )
        .bind(exam_id)
        .bind(student_id)
        .fetch_optional(&self.pool)
        .await?;
        into_submission(row)
    }

    async fn list_for_student(
        &self,
        exam_id: Uuid,
        student_id: Uuid,
    ) -> Result<Vec<ExamSubmission>> {
        let rows = sqlx::query_as::<_, SubmissionRow>(
            r#"SELECT * FROM exam_submissions WHERE exam_id = $1 AND student_id = $2 ORDER BY attempt_number"#,
        )
        .bind(exam_id)
        .bind(student_id)
        .fetch_all(&self.pool)
        .await?;
        into_submissions(rows)
    }

    async fn list_for_exam(&self, exam_id: Uuid) -> Result<Vec<ExamSubmission>> {
        let rows = sqlx::query_as::<_, SubmissionRow>(
            r#"SELECT * FROM exam_submissions WHERE exam_id = $1 ORDER BY started_at"#,
        )
        .bind(exam_id)
        .fetch_all(&self.pool)
        .await?;
        into_submissions(rows)
    }

    async fn list_ungraded(&self, limit: i64) -> Result<Vec<ExamSubmission>> {
        let rows = sqlx::query_as::<_, SubmissionRow>(
            r#"
            SELECT * FROM exam_submissions
            WHERE status = 'submitted' AND score IS NULL
            ORDER BY submitted_at
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        into_submissions(rows)
    }

    async fn create_or_resume(
        &self,
        new: NewSubmission,
        max_attempts: i32,
    ) -> Result<StartOutcome> {
        match self.try_create(&new, max_attempts).await {
            Err(Error::Database(err)) if is_unique_violation(&err) => {
                // Lost a race the advisory lock did not cover; the winner's attempt is the one to resume.
                tracing::warn!(exam_id = %new.exam_id, student_id = %new.student_id, "Concurrent start resolved by unique index");
                self.find_in_progress(new.exam_id, new.student_id)
                    .await?
                    .map(StartOutcome::Resumed)
                    .ok_or_else(|| Error::Internal("Open attempt vanished after conflict".to_string()))
            }
            other => other,
        }
    }

    async fn save_drafts(
        &self,
        submission_id: Uuid,
        student_id: Uuid,
        drafts: Vec<DraftAnswer>,
        now: DateTime<Utc>,
    ) -> Result<Option<ExamSubmission>> {
        let row = sqlx::query_as::<_, SubmissionRow>(
            r#"
            UPDATE exam_submissions
            SET draft_answers = $3, updated_at = $4
            WHERE id = $1 AND student_id = $2 AND status = 'in_progress'
            RETURNING *
            "#,
        )
        .bind(submission_id)
        .bind(student_id)
        .bind(Json(&drafts))
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        into_submission(row)
    }

    async fn append_event(
        &self,
        submission_id: Uuid,
        event: SuspiciousEvent,
    ) -> Result<Option<ExamSubmission>> {
        let row = sqlx::query_as::<_, SubmissionRow>(
            r#"
            UPDATE exam_submissions
            SET suspicious_events = suspicious_events || jsonb_build_array($2::jsonb),
                updated_at = $3
            WHERE id = $1 AND status = 'in_progress'
            RETURNING *
            "#,
        )
        .bind(submission_id)
        .bind(Json(&event))
        .bind(event.timestamp)
        .fetch_optional(&self.pool)
        .await?;
        into_submission(row)
    }

    async fn mark_flagged(
        &self,
        submission_id: Uuid,
        note: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE exam_submissions
            SET flagged_for_review = TRUE,
                review_notes = CASE
                    WHEN $2::text IS NULL THEN review_notes
                    WHEN review_notes IS NULL THEN $2
                    ELSE review_notes || E'\n' || $2
                END,
                updated_at = $3
            WHERE id = $1
            "#,
        )
        .bind(submission_id)
        .bind(note)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn close_absent(
        &self,
        submission_id: Uuid,
        student_id: Uuid,
        note: String,
        now: DateTime<Utc>,
    ) -> Result<Option<ExamSubmission>> {
        let row = sqlx::query_as::<_, SubmissionRow>(
            r#"
            UPDATE exam_submissions
            SET status = 'absent',
                review_notes = CASE
                    WHEN review_notes IS NULL THEN $3
                    ELSE review_notes || E'\n' || $3
                END,
                updated_at = $4
            WHERE id = $1 AND student_id = $2 AND status = 'in_progress'
            RETURNING *
            "#,
        )
        .bind(submission_id)
        .bind(student_id)
        .bind(note)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        into_submission(row)
    }

    async fn freeze(
        &self,
        submission_id: Uuid,
        student_id: Uuid,
        answers: Vec<AnswerRecord>,
        submitted_at: DateTime<Utc>,
    ) -> Result<Option<ExamSubmission>> {
        let row = sqlx::query_as::<_, SubmissionRow>(
            r#"
            UPDATE exam_submissions
            SET answers = $3,
                draft_answers = '[]'::jsonb,
                submitted_at = $4,
                time_spent_seconds = GREATEST(0, ROUND(EXTRACT(EPOCH FROM ($4 - started_at))))::integer,
                status = 'submitted',
                updated_at = $4
            WHERE id = $1 AND student_id = $2 AND status = 'in_progress'
            RETURNING *
            "#,
        )
        .bind(submission_id)
        .bind(student_id)
        .bind(Json(&answers))
        .bind(submitted_at)
        .fetch_optional(&self.pool)
        .await?;
        into_submission(row)
    }

    async fn save_grading(
        &self,
        submission_id: Uuid,
        update: GradingUpdate,
    ) -> Result<Option<ExamSubmission>> {
        let row = sqlx::query_as::<_, SubmissionRow>(
            r#"
            UPDATE exam_submissions
            SET answers = $2,
                score = $3,
                percentage = $4,
                status = $5,
                evaluated_by = COALESCE($6, evaluated_by),
                evaluated_at = COALESCE($7, evaluated_at),
                grading_version = grading_version + 1,
                updated_at = $9
            WHERE id = $1 AND status IN ('submitted', 'evaluated') AND grading_version = $8
            RETURNING *
            "#,
        )
        .bind(submission_id)
        .bind(Json(&update.answers))
        .bind(update.score)
        .bind(update.percentage)
        .bind(update.status.as_str())
        .bind(update.evaluated_by)
        .bind(update.evaluated_at)
        .bind(update.expected_version)
        .bind(update.graded_at)
        .fetch_optional(&self.pool)
        .await?;
        into_submission(row)
    }

    async fn set_review(
        &self,
        submission_id: Uuid,
        flagged: bool,
        review_notes: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<ExamSubmission> {
        let row = sqlx::query_as::<_, SubmissionRow>(
            r#"
            UPDATE exam_submissions
            SET flagged_for_review = $2, review_notes = COALESCE($3, review_notes), updated_at = $4
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(submission_id)
        .bind(flagged)
        .bind(review_notes)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        ExamSubmission::try_from(row)
    }

    async fn set_remarks(
        &self,
        submission_id: Uuid,
        remarks: String,
        evaluated_by: Uuid,
        evaluated_at: DateTime<Utc>,
    ) -> Result<ExamSubmission> {
        let row = sqlx::query_as::<_, SubmissionRow>(
            r#"
            UPDATE exam_submissions
            SET remarks = $2, evaluated_by = $3, evaluated_at = $4, updated_at = $4
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(submission_id)
        .bind(remarks)
        .bind(evaluated_by)
        .bind(evaluated_at)
        .fetch_one(&self.pool)
        .await?;
        ExamSubmission::try_from(row)
    }
}
