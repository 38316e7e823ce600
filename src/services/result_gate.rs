use chrono::{DateTime, Utc};

use crate::models::exam::{Exam, ResultPublication};
use crate::models::submission::ExamSubmission;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WithheldReason {
    InProgress,
    AttemptsRemaining,
    AwaitingExamEnd,
    AwaitingPublication,
}

impl WithheldReason {
    pub fn message(&self) -> &'static str {
        match self {
            WithheldReason::InProgress => "This attempt has not been submitted yet",
            WithheldReason::AttemptsRemaining => {
                "Results will be available once all attempts are used"
            }
            WithheldReason::AwaitingExamEnd => "Results will be available after the exam ends",
            WithheldReason::AwaitingPublication => {
                "Results will be available once they are published"
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Shown,
    Withheld(WithheldReason),
}

impl Visibility {
    pub fn is_shown(&self) -> bool {
        matches!(self, Visibility::Shown)
    }
}

pub fn consumed_attempts(attempts: &[ExamSubmission]) -> i64 {
    attempts.iter().filter(|s| s.consumes_attempt()).count() as i64
}

/// Decides whether a student may see the graded detail of `submission`.
///
/// A manual publication always wins. Otherwise `immediate` exams reveal once the
/// student has used every attempt (unlimited exams never auto-reveal) and
/// `after_exam_end` exams reveal once the window has closed.
pub fn resolve_visibility(
    exam: &Exam,
    submission: &ExamSubmission,
    attempts: &[ExamSubmission],
    now: DateTime<Utc>,
) -> Visibility {
    if submission.is_in_progress() {
        return Visibility::Withheld(WithheldReason::InProgress);
    }
    if exam.results_published {
        return Visibility::Shown;
    }

    match exam.result_publication {
        ResultPublication::Immediate => {
            if exam.max_attempts <= 0 {
                Visibility::Withheld(WithheldReason::AwaitingPublication)
            } else if consumed_attempts(attempts) >= exam.max_attempts as i64 {
                Visibility::Shown
            } else {
                Visibility::Withheld(WithheldReason::AttemptsRemaining)
            }
        }
        ResultPublication::AfterExamEnd => {
            if now > exam.end_time() {
                Visibility::Shown
            } else {
                Visibility::Withheld(WithheldReason::AwaitingExamEnd)
            }
        }
    }
}
