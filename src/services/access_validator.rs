use std::sync::Arc;
use uuid::Uuid;

use crate::database::ExamCatalog;
use crate::error::{Error, Result};
use crate::models::exam::Exam;

#[derive(Debug, Clone)]
pub struct AccessGrant {
    pub exam: Exam,
    pub authorized: bool,
}

/// Confirms an exam exists, is published, and the student holds an active enrollment in one of its batches.
#[derive(Clone)]
pub struct AccessValidator {
    catalog: Arc<dyn ExamCatalog>,
}

impl AccessValidator {
    pub fn new(catalog: Arc<dyn ExamCatalog>) -> Self {
        Self { catalog }
    }

    pub async fn validate_access(&self, exam_id: Uuid, student_id: Uuid) -> Result<AccessGrant> {
        let exam = self
            .catalog
            .find_exam(exam_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Exam {} not found", exam_id)))?;

        check_access(&exam, student_id)?;

        Ok(AccessGrant {
            exam,
            authorized: true,
        })
    }
}

pub fn check_access(exam: &Exam, student_id: Uuid) -> Result<()> {
    if !exam.is_published() {
        return Err(Error::NotPublished);
    }
    if !exam.has_active_enrollment(student_id) {
        return Err(Error::NotEnrolled);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::MockExamCatalog;
    use crate::models::exam::{EnrollmentStatus, ExamStatus};
    use crate::services::fixtures::exam_for;

    #[tokio::test]
    async fn missing_exam_is_not_found() {
        let mut catalog = MockExamCatalog::new();
        catalog.expect_find_exam().returning(|_| Ok(None));
        let validator = AccessValidator::new(Arc::new(catalog));

        let err = validator
            .validate_access(Uuid::new_v4(), Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn draft_exam_is_not_published() {
        let student = Uuid::new_v4();
        let exam = Exam {
            status: ExamStatus::Draft,
            ..exam_for(student, &[])
        };
        let mut catalog = MockExamCatalog::new();
        catalog
            .expect_find_exam()
            .returning(move |_| Ok(Some(exam.clone())));
        let validator = AccessValidator::new(Arc::new(catalog));

        let err = validator
            .validate_access(Uuid::new_v4(), student)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotPublished));
    }

    #[test]
    fn inactive_enrollment_does_not_grant_access() {
        let student = Uuid::new_v4();
        let mut exam = exam_for(student, &[]);
        exam.batches[0].enrollments[0].status = EnrollmentStatus::Dropped;

        assert!(matches!(check_access(&exam, student), Err(Error::NotEnrolled)));
        assert!(matches!(check_access(&exam, Uuid::new_v4()), Err(Error::NotEnrolled)));
    }

    #[test]
    fn active_enrollment_grants_access() {
        let student = Uuid::new_v4();
        assert!(check_access(&exam_for(student, &[]), student).is_ok());
    }
}
