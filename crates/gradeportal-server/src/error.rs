//! Errors returned by the application services.

use gradeportal_storage::StorageError;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// Grades of the semester are not open for inquiry.
    #[error("grades for semester {semester} are not released")]
    NotReleased { semester: String },

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// The enrollment does not exist or belongs to another student.
    #[error("enrollment {enrollment_id} is not owned by the requesting student")]
    EnrollmentNotOwned { enrollment_id: i64 },

    #[error("policy row missing for semester {semester}")]
    UnknownSemester { semester: String },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl ServiceError {
    pub fn not_released(semester: impl Into<String>) -> Self {
        Self::NotReleased {
            semester: semester.into(),
        }
    }

    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// True for errors caused by the request rather than the system.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, Self::Storage(_))
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;
