use thiserror::Error;

#[derive(Error, Debug)]
pub enum TelehealthError {
    #[error("Required setting missing: {setting}")]
    ConfigurationMissing { setting: String },

    #[error("Telesalud backend unavailable: {message}")]
    BackendUnavailable { message: String },

    #[error("Telesalud backend rejected the request (HTTP {status}): {message}")]
    BackendRejected { status: u16, message: String },

    #[error("Telesalud backend error: {message}")]
    BackendError { message: String },

    #[error("Malformed response from telesalud backend: {message}")]
    MalformedResponse { message: String },

    #[error("Meeting not found on telesalud backend")]
    NotFound,

    #[error("Invalid webhook payload: {message}")]
    InvalidPayload { message: String },

    #[error("No meeting matches identifier {identifier}")]
    UnknownMeeting { identifier: String },

    #[error("No meeting exists for appointment {appointment_id}")]
    MeetingNotFound { appointment_id: i64 },

    #[error("Meeting for appointment {appointment_id} is {status} and cannot be changed")]
    InvalidState { appointment_id: i64, status: String },

    #[error("Join link is only available between {opens} and {closes}")]
    OutsideJoinWindow { opens: String, closes: String },

    #[error("Validation error: {message}")]
    ValidationError { message: String },

    #[error("Database error: {message}")]
    DatabaseError { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl TelehealthError {
    /// Transient failures the client may retry with backoff
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TelehealthError::BackendUnavailable { .. } | TelehealthError::BackendError { .. }
        )
    }

    /// Failures raised by the remote backend client
    pub fn is_backend_failure(&self) -> bool {
        matches!(
            self,
            TelehealthError::BackendUnavailable { .. }
                | TelehealthError::BackendRejected { .. }
                | TelehealthError::BackendError { .. }
                | TelehealthError::MalformedResponse { .. }
                | TelehealthError::NotFound
        )
    }

    pub fn kind(&self) -> &'static str {
        match self {
            TelehealthError::ConfigurationMissing { .. } => "configuration_missing",
            TelehealthError::BackendUnavailable { .. } => "backend_unavailable",
            TelehealthError::BackendRejected { .. } => "backend_rejected",
            TelehealthError::BackendError { .. } => "backend_error",
            TelehealthError::MalformedResponse { .. } => "malformed_response",
            TelehealthError::NotFound => "not_found",
            TelehealthError::InvalidPayload { .. } => "invalid_payload",
            TelehealthError::UnknownMeeting { .. } => "unknown_meeting",
            TelehealthError::MeetingNotFound { .. } => "meeting_not_found",
            TelehealthError::InvalidState { .. } => "invalid_state",
            TelehealthError::OutsideJoinWindow { .. } => "outside_join_window",
            TelehealthError::ValidationError { .. } => "validation_error",
            TelehealthError::DatabaseError { .. } => "database_error",
            TelehealthError::Internal { .. } => "internal",
        }
    }
}

impl From<anyhow::Error> for TelehealthError {
    fn from(err: anyhow::Error) -> Self {
        TelehealthError::DatabaseError {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for TelehealthError {
    fn from(err: serde_json::Error) -> Self {
        TelehealthError::DatabaseError {
            message: format!("row (de)serialization failed: {}", err),
        }
    }
}
