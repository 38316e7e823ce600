//! Runs against the database in `DATABASE_URL`; skipped when it is not set.

mod common;

use std::env;
use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
};
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use serde_json::{json, Value as JsonValue};
use sqlx::PgPool;
use tower::ServiceExt;
use uuid::Uuid;

use exam_proctor::config::Config;
use exam_proctor::database::catalog::PgExamCatalog;
use exam_proctor::database::pool::{create_pool, run_migrations};
use exam_proctor::database::submissions::PgSubmissionStore;
use exam_proctor::database::{ExamCatalog, StartOutcome, SubmissionStore};
use exam_proctor::middleware::auth::Role;
use exam_proctor::models::exam::{EnrollmentStatus, ExamStatus};
use exam_proctor::models::question::QuestionKind;
use exam_proctor::models::submission::{
    EventType, GradingUpdate, NewSubmission, SessionMetadata, SubmissionStatus, SuspiciousEvent,
};
use exam_proctor::routes::build_router;
use exam_proctor::AppState;

use common::{token, SECRET};

async fn setup_pool() -> Option<PgPool> {
    dotenvy::dotenv().ok();
    let Ok(url) = env::var("DATABASE_URL") else {
        eprintln!("DATABASE_URL not set, skipping PostgreSQL store tests");
        return None;
    };
    let pool = create_pool(&url).await.expect("pool");
    run_migrations(&pool).await.expect("migrations");
    Some(pool)
}

fn new_submission(exam_id: Uuid, student_id: Uuid, fingerprint: &str) -> NewSubmission {
    NewSubmission {
        exam_id,
        student_id,
        question_ids: vec![Uuid::new_v4(), Uuid::new_v4()],
        started_at: Utc::now(),
        session: SessionMetadata {
            browser_fingerprint: fingerprint.to_string(),
            ip_address: Some("203.0.113.7".to_string()),
            user_agent: Some("store-test".to_string()),
        },
    }
}

async fn open_attempt(store: &PgSubmissionStore, max_attempts: i32) -> (Uuid, Uuid, Uuid) {
    let (exam_id, student_id) = (Uuid::new_v4(), Uuid::new_v4());
    match store
        .create_or_resume(new_submission(exam_id, student_id, "fp"), max_attempts)
        .await
        .expect("create")
    {
        StartOutcome::Created(s) => (s.id, exam_id, student_id),
        other => panic!("unexpected outcome {:?}", other),
    }
}

/// Published exam open from five minutes ago, one MCQ and one descriptive question.
async fn seed_exam(pool: &PgPool, student_id: Uuid) -> (Uuid, Uuid, Uuid) {
    let (exam_id, mcq_id, essay_id, batch_id) =
        (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

    sqlx::query(
        r#"INSERT INTO exams (id, title, description, status, scheduled_at, duration_minutes,
                              max_attempts, result_publication, negative_marking_enabled,
                              negative_marking_percent)
           VALUES ($1, 'Thermodynamics Quiz', 'Laws 0-2', 'published', $2, 60, 2, 'after_exam_end', TRUE, 25)"#,
    )
    .bind(exam_id)
    .bind(Utc::now() - Duration::minutes(5))
    .execute(pool)
    .await
    .expect("seed exam");

    sqlx::query(
        r#"INSERT INTO questions (id, text, question_type, options, correct_option, explanation, marks)
           VALUES ($1, 'Which law defines entropy?', 'mcq', $2, 2, 'Second law', 4)"#,
    )
    .bind(mcq_id)
    .bind(json!(["Zeroth", "First", "Second"]))
    .execute(pool)
    .await
    .expect("seed mcq");

    sqlx::query(
        r#"INSERT INTO questions (id, text, question_type, model_answer, marks)
           VALUES ($1, 'Explain a heat engine', 'descriptive', 'Work from heat flow', 6)"#,
    )
    .bind(essay_id)
    .execute(pool)
    .await
    .expect("seed descriptive");

    for (position, question_id) in [(1, essay_id), (2, mcq_id)] {
        sqlx::query(r#"INSERT INTO exam_questions (exam_id, question_id, position) VALUES ($1, $2, $3)"#)
            .bind(exam_id)
            .bind(question_id)
            .bind(position)
            .execute(pool)
            .await
            .expect("seed exam question");
    }

    sqlx::query(r#"INSERT INTO batches (id, name) VALUES ($1, 'Evening')"#)
        .bind(batch_id)
        .execute(pool)
        .await
        .expect("seed batch");
    sqlx::query(r#"INSERT INTO exam_batches (exam_id, batch_id) VALUES ($1, $2)"#)
        .bind(exam_id)
        .bind(batch_id)
        .execute(pool)
        .await
        .expect("seed exam batch");
    for (student, status) in [(student_id, "active"), (Uuid::new_v4(), "dropped")] {
        sqlx::query(r#"INSERT INTO enrollments (batch_id, student_id, status) VALUES ($1, $2, $3)"#)
            .bind(batch_id)
            .bind(student)
            .bind(status)
            .execute(pool)
            .await
            .expect("seed enrollment");
    }

    (exam_id, mcq_id, essay_id)
}

#[tokio::test]
async fn catalog_maps_exam_rows() {
    let Some(pool) = setup_pool().await else { return };
    let student = Uuid::new_v4();
    let (exam_id, mcq_id, essay_id) = seed_exam(&pool, student).await;
    let catalog = PgExamCatalog::new(pool.clone());

    let exam = catalog.find_exam(exam_id).await.unwrap().expect("exam");
    assert_eq!(exam.status, ExamStatus::Published);
    assert_eq!(exam.question_ids, vec![essay_id, mcq_id]);
    assert_eq!(exam.max_attempts, 2);
    assert!(exam.negative_marking.enabled);
    assert_eq!(exam.negative_marking.percentage, Decimal::from(25));
    assert!(exam.schedule.is_none());
    assert_eq!(exam.batches.len(), 1);
    assert_eq!(exam.batches[0].enrollments.len(), 1);
    assert_eq!(exam.batches[0].enrollments[0].student_id, student);
    assert_eq!(exam.batches[0].enrollments[0].status, EnrollmentStatus::Active);

    let questions = catalog.find_questions(&exam.question_ids).await.unwrap();
    assert_eq!(questions.len(), 2);
    let mcq = questions.iter().find(|q| q.id == mcq_id).unwrap();
    match &mcq.kind {
        QuestionKind::Mcq {
            options,
            correct_option,
        } => {
            assert_eq!(options.len(), 3);
            assert_eq!(*correct_option, 2);
        }
        other => panic!("expected an MCQ, got {:?}", other),
    }
    let essay = questions.iter().find(|q| q.id == essay_id).unwrap();
    assert!(matches!(essay.kind, QuestionKind::Descriptive { .. }));

    assert!(catalog.find_exam(Uuid::new_v4()).await.unwrap().is_none());
}

#[tokio::test]
async fn concurrent_create_or_resume_keeps_one_open_row() {
    let Some(pool) = setup_pool().await else { return };
    let store = Arc::new(PgSubmissionStore::new(pool.clone()));
    let (exam_id, student_id) = (Uuid::new_v4(), Uuid::new_v4());

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .create_or_resume(new_submission(exam_id, student_id, "fp"), 0)
                    .await
                    .expect("create_or_resume")
            })
        })
        .collect();

    let mut created = 0;
    let mut ids = Vec::new();
    for handle in handles {
        match handle.await.unwrap() {
            StartOutcome::Created(s) => {
                created += 1;
                ids.push(s.id);
            }
            StartOutcome::Resumed(s) => ids.push(s.id),
            StartOutcome::LimitReached { .. } => panic!("unlimited exam hit the limit"),
        }
    }
    ids.sort();
    ids.dedup();
    assert_eq!(created, 1);
    assert_eq!(ids.len(), 1);

    let (total, open): (i64, i64) = sqlx::query_as(
        r#"SELECT COUNT(*), COUNT(*) FILTER (WHERE status = 'in_progress')
           FROM exam_submissions WHERE exam_id = $1 AND student_id = $2"#,
    )
    .bind(exam_id)
    .bind(student_id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!((total, open), (1, 1));
}

#[tokio::test]
async fn concurrent_event_appends_are_not_lost() {
    let Some(pool) = setup_pool().await else { return };
    let store = Arc::new(PgSubmissionStore::new(pool));
    let (submission_id, _, _) = open_attempt(&store, 0).await;

    let handles: Vec<_> = (0..24)
        .map(|n| {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .append_event(
                        submission_id,
                        SuspiciousEvent {
                            event_type: EventType::TabSwitch,
                            timestamp: Utc::now(),
                            metadata: json!({ "seq": n }),
                        },
                    )
                    .await
                    .expect("append")
            })
        })
        .collect();
    for handle in handles {
        assert!(handle.await.unwrap().is_some());
    }

    let stored = store.find_by_id(submission_id).await.unwrap().unwrap();
    assert_eq!(stored.suspicious_events.len(), 24);
    let mut seqs: Vec<i64> = stored
        .suspicious_events
        .iter()
        .map(|e| e.metadata["seq"].as_i64().unwrap())
        .collect();
    seqs.sort();
    assert_eq!(seqs, (0..24).collect::<Vec<i64>>());
}

#[tokio::test]
async fn attempt_limit_counts_only_consumed_attempts() {
    let Some(pool) = setup_pool().await else { return };
    let store = PgSubmissionStore::new(pool);
    let (first_id, exam_id, student_id) = open_attempt(&store, 1).await;

    let closed = store
        .close_absent(first_id, student_id, "late".to_string(), Utc::now())
        .await
        .unwrap()
        .expect("closed");
    assert_eq!(closed.status, SubmissionStatus::Absent);

    let second = match store
        .create_or_resume(new_submission(exam_id, student_id, "fp"), 1)
        .await
        .unwrap()
    {
        StartOutcome::Created(s) => s,
        other => panic!("unexpected outcome {:?}", other),
    };
    assert_eq!(second.attempt_number, 2);

    let frozen = store
        .freeze(second.id, student_id, second.answers.clone(), Utc::now())
        .await
        .unwrap()
        .expect("frozen");
    assert_eq!(frozen.status, SubmissionStatus::Submitted);
    assert!(store
        .freeze(second.id, student_id, Vec::new(), Utc::now())
        .await
        .unwrap()
        .is_none());

    let outcome = store
        .create_or_resume(new_submission(exam_id, student_id, "fp"), 1)
        .await
        .unwrap();
    assert!(matches!(outcome, StartOutcome::LimitReached { consumed: 1 }));
}

#[tokio::test]
async fn grading_write_with_stale_version_is_refused() {
    let Some(pool) = setup_pool().await else { return };
    let store = PgSubmissionStore::new(pool);
    let (submission_id, _, student_id) = open_attempt(&store, 0).await;
    let now = Utc::now();
    let frozen = store
        .freeze(submission_id, student_id, Vec::new(), now)
        .await
        .unwrap()
        .expect("frozen");

    let update = |expected_version| GradingUpdate {
        answers: frozen.answers.clone(),
        score: Decimal::ZERO,
        percentage: Decimal::ZERO,
        status: SubmissionStatus::Evaluated,
        evaluated_by: None,
        evaluated_at: Some(now),
        expected_version,
        graded_at: now,
    };

    let first = store.save_grading(submission_id, update(0)).await.unwrap();
    assert_eq!(first.map(|s| s.grading_version), Some(1));
    assert!(store.save_grading(submission_id, update(0)).await.unwrap().is_none());
    let second = store.save_grading(submission_id, update(1)).await.unwrap();
    assert_eq!(second.map(|s| s.grading_version), Some(2));
}

#[tokio::test]
async fn router_over_postgres_starts_once_under_contention() {
    let Some(pool) = setup_pool().await else { return };
    let student = Uuid::new_v4();
    let (exam_id, _, _) = seed_exam(&pool, student).await;
    let router = build_router(AppState::with_postgres(Config::for_tests(SECRET), pool.clone()));
    let tok = token(student, Role::Student);

    let handles: Vec<_> = (0..12)
        .map(|_| {
            let router = router.clone();
            let tok = tok.clone();
            tokio::spawn(async move {
                let req = Request::builder()
                    .method("POST")
                    .uri(format!("/api/student/exams/{}/start", exam_id))
                    .header("content-type", "application/json")
                    .header("authorization", format!("Bearer {}", tok))
                    .body(Body::from(json!({ "fingerprint": "laptop" }).to_string()))
                    .unwrap();
                let res = router.oneshot(req).await.unwrap();
                let status = res.status();
                let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
                let body: JsonValue = serde_json::from_slice(&bytes).unwrap();
                (status, body)
            })
        })
        .collect();

    let mut created = 0;
    let mut ids = Vec::new();
    for handle in handles {
        let (status, body) = handle.await.unwrap();
        assert!(status.is_success(), "unexpected {} {}", status, body);
        if status == StatusCode::CREATED {
            created += 1;
        }
        ids.push(body["submission"]["id"].as_str().unwrap().to_string());
    }
    ids.sort();
    ids.dedup();
    assert_eq!(created, 1);
    assert_eq!(ids.len(), 1);

    let open: i64 = sqlx::query_scalar(
        r#"SELECT COUNT(*) FROM exam_submissions WHERE exam_id = $1 AND status = 'in_progress'"#,
    )
    .bind(exam_id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(open, 1);
}
