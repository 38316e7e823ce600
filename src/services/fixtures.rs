use chrono::{DateTime, TimeZone, Utc};
use uuid::Uuid;

use crate::models::exam::{
    Batch, Enrollment, EnrollmentStatus, Exam, ExamStatus, NegativeMarking, ResultPublication,
};
use crate::models::question::{Question, QuestionKind};
use crate::models::submission::{AnswerRecord, ExamSubmission, SubmissionStatus};

pub fn at(h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 5, 4, h, m, 0).unwrap()
}

/// Published exam at 10:00 for 60 minutes with `student_id` actively enrolled.
pub fn exam_for(student_id: Uuid, questions: &[Question]) -> Exam {
    Exam {
        id: Uuid::new_v4(),
        title: "Physics".to_string(),
        description: None,
        instructions: Some("Answer every question".to_string()),
        status: ExamStatus::Published,
        question_ids: questions.iter().map(|q| q.id).collect(),
        batches: vec![Batch {
            id: Uuid::new_v4(),
            name: "Morning".to_string(),
            enrollments: vec![Enrollment {
                student_id,
                status: EnrollmentStatus::Active,
            }],
        }],
        scheduled_at: at(10, 0),
        duration_minutes: 60,
        schedule: None,
        max_attempts: 1,
        result_publication: ResultPublication::Immediate,
        results_published: false,
        negative_marking: NegativeMarking::default(),
    }
}

pub fn mcq(marks: i32, correct_option: usize) -> Question {
    Question {
        id: Uuid::new_v4(),
        text: "Pick one".to_string(),
        marks,
        explanation: Some("Because".to_string()),
        kind: QuestionKind::Mcq {
            options: vec!["a".into(), "b".into(), "c".into(), "d".into()],
            correct_option,
        },
    }
}

pub fn descriptive(marks: i32) -> Question {
    Question {
        id: Uuid::new_v4(),
        text: "Explain".to_string(),
        marks,
        explanation: None,
        kind: QuestionKind::Descriptive { model_answer: None },
    }
}

pub fn submission(exam: &Exam, student_id: Uuid, status: SubmissionStatus) -> ExamSubmission {
    let started_at = at(10, 5);
    ExamSubmission {
        id: Uuid::new_v4(),
        exam_id: exam.id,
        student_id,
        attempt_number: 1,
        answers: exam
            .question_ids
            .iter()
            .copied()
            .map(AnswerRecord::placeholder)
            .collect(),
        draft_answers: vec![],
        started_at,
        submitted_at: status.consumes_attempt().then(|| at(10, 50)),
        time_spent_seconds: None,
        score: None,
        percentage: None,
        status,
        suspicious_events: vec![],
        flagged_for_review: false,
        review_notes: None,
        evaluated_by: None,
        evaluated_at: None,
        remarks: None,
        grading_version: 0,
        browser_fingerprint: Some("fp-1".to_string()),
        ip_address: None,
        user_agent: None,
        created_at: started_at,
        updated_at: started_at,
    }
}
