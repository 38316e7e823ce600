use chrono::{DateTime, Duration, Utc};

use crate::error::{Error, Result};
use crate::models::exam::Exam;
use crate::models::submission::ExamSubmission;
use crate::utils::time::{minutes_between, minutes_until_ceil};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowStatus {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub time_remaining_seconds: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElapsedCheck {
    pub exceeded: bool,
    pub elapsed_minutes: i64,
    pub allowed_minutes: i64,
}

/// Availability window and per-attempt grace period.
#[derive(Debug, Clone, Copy)]
pub struct TimingGuard {
    grace_minutes: i64,
}

impl TimingGuard {
    pub fn new(grace_minutes: i64) -> Self {
        Self {
            grace_minutes: grace_minutes.max(0),
        }
    }

    pub fn validate_window(&self, exam: &Exam, now: DateTime<Utc>) -> Result<WindowStatus> {
        let start_time = exam.start_time();
        let end_time = exam.end_time();

        if now < start_time {
            return Err(Error::NotStarted {
                minutes_until_start: minutes_until_ceil(now, start_time),
            });
        }
        if now > end_time {
            return Err(Error::WindowClosed);
        }

        Ok(WindowStatus {
            start_time,
            end_time,
            time_remaining_seconds: (end_time - now).num_seconds().max(0),
        })
    }

    /// Advisory lateness check against `duration + grace`; the caller decides what to do with it.
    pub fn validate_elapsed(
        &self,
        submission: &ExamSubmission,
        exam: &Exam,
        now: DateTime<Utc>,
    ) -> ElapsedCheck {
        let allowed_minutes = exam.duration_minutes as i64 + self.grace_minutes;
        let elapsed = now - submission.started_at;
        ElapsedCheck {
            exceeded: elapsed > Duration::minutes(allowed_minutes),
            elapsed_minutes: minutes_between(submission.started_at, now),
            allowed_minutes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::exam::Schedule;
    use crate::models::submission::SubmissionStatus;
    use crate::services::fixtures::{at, exam_for, submission};
    use uuid::Uuid;

    fn exam(schedule: Option<Schedule>) -> Exam {
        Exam {
            schedule,
            ..exam_for(Uuid::new_v4(), &[])
        }
    }

    #[test]
    fn before_start_reports_minutes_until_start() {
        let guard = TimingGuard::new(2);
        let err = guard.validate_window(&exam(None), at(9, 45)).unwrap_err();
        assert!(matches!(err, Error::NotStarted { minutes_until_start: 15 }));
    }

    #[test]
    fn end_defaults_to_start_plus_duration() {
        let guard = TimingGuard::new(2);
        let status = guard.validate_window(&exam(None), at(10, 30)).unwrap();
        assert_eq!(status.end_time, at(11, 0));
        assert_eq!(status.time_remaining_seconds, 30 * 60);
        assert!(matches!(
            guard.validate_window(&exam(None), at(11, 1)),
            Err(Error::WindowClosed)
        ));
    }

    #[test]
    fn explicit_schedule_overrides_scheduled_at() {
        let guard = TimingGuard::new(2);
        let e = exam(Some(Schedule {
            start_time: Some(at(8, 0)),
            end_time: Some(at(18, 0)),
        }));
        assert!(guard.validate_window(&e, at(9, 0)).is_ok());
        assert!(guard.validate_window(&e, at(17, 59)).is_ok());
    }

    #[test]
    fn elapsed_allows_grace_period() {
        let guard = TimingGuard::new(2);
        let e = exam(None);
        let mut s = submission(&e, Uuid::new_v4(), SubmissionStatus::InProgress);
        s.started_at = at(10, 0);

        let on_time = guard.validate_elapsed(&s, &e, at(11, 2));
        assert!(!on_time.exceeded);
        assert_eq!(on_time.allowed_minutes, 62);

        let late = guard.validate_elapsed(&s, &e, at(11, 5));
        assert!(late.exceeded);
        assert_eq!(late.elapsed_minutes, 65);
    }
}
