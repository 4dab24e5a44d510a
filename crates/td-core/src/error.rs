use std::fmt;

/// Machine-readable error codes shared by every `td` surface.
///
/// The string form is stable: agents branch on it, and JSON mode emits it as
/// `{"error": {"code": ..., "message": ...}}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    NotFound,
    InvalidInput,
    Conflict,
    CannotSelfApprove,
    HandoffRequired,
    DatabaseError,
    ParseError,
    ValidationError,
    Unauthorized,
    Forbidden,
}

impl ErrorCode {
    /// Stable code identifier for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::InvalidInput => "invalid_input",
            Self::Conflict => "conflict",
            Self::CannotSelfApprove => "cannot_self_approve",
            Self::HandoffRequired => "handoff_required",
            Self::DatabaseError => "database_error",
            Self::ParseError => "parse_error",
            Self::ValidationError => "validation_error",
            Self::Unauthorized => "unauthorized",
            Self::Forbidden => "forbidden",
        }
    }

    /// Process exit code for the CLI.
    ///
    /// 1 = user error, 2 = system error, 3 = workflow validation.
    #[must_use]
    pub const fn exit_code(self) -> i32 {
        match self {
            Self::NotFound
            | Self::InvalidInput
            | Self::Conflict
            | Self::ParseError
            | Self::Unauthorized
            | Self::Forbidden => 1,
            Self::DatabaseError => 2,
            Self::CannotSelfApprove | Self::HandoffRequired | Self::ValidationError => 3,
        }
    }

    /// Optional remediation hint that can be surfaced to operators and agents.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::NotFound => Some("Check the id with `td list` or `td show`."),
            Self::CannotSelfApprove => {
                Some("A different session must approve. Mark the issue minor to bypass.")
            }
            Self::HandoffRequired => Some("Record a handoff with `td handoff <id>` first."),
            Self::DatabaseError => Some("Retry once. If persistent, check .todos/issues.db."),
            Self::ParseError | Self::ValidationError => {
                Some("See `td query --help` for the TDQ grammar and fields.")
            }
            Self::Unauthorized => Some("Run `td auth login` to configure sync credentials."),
            Self::InvalidInput | Self::Conflict | Self::Forbidden => None,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Library error for every fallible `td-core` operation.
#[derive(Debug, thiserror::Error)]
pub enum TdError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("{0}")]
    InvalidInput(String),

    #[error("{0}")]
    Conflict(String),

    #[error("cannot approve {id}: session {session} was involved in its implementation")]
    CannotSelfApprove { id: String, session: String },

    #[error("cannot submit {id} for review: no handoff recorded")]
    HandoffRequired { id: String },

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Parse(#[from] crate::tdq::ParseError),

    #[error("{}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("query execution failed: {0}")]
    Execution(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),
}

impl TdError {
    #[must_use]
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    #[must_use]
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// Taxonomy code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound { .. } => ErrorCode::NotFound,
            Self::InvalidInput(_) => ErrorCode::InvalidInput,
            Self::Conflict(_) => ErrorCode::Conflict,
            Self::CannotSelfApprove { .. } => ErrorCode::CannotSelfApprove,
            Self::HandoffRequired { .. } => ErrorCode::HandoffRequired,
            Self::Database(_) | Self::Io(_) | Self::Json(_) | Self::Execution(_) => {
                ErrorCode::DatabaseError
            }
            Self::Parse(_) => ErrorCode::ParseError,
            Self::Validation(_) => ErrorCode::ValidationError,
            Self::Unauthorized(_) => ErrorCode::Unauthorized,
            Self::Forbidden(_) => ErrorCode::Forbidden,
        }
    }
}

pub type Result<T, E = TdError> = std::result::Result<T, E>;

/// Map `QueryReturnedNoRows` onto the taxonomy's `not_found`.
pub(crate) fn not_found_on_empty<T>(
    result: rusqlite::Result<T>,
    entity: &'static str,
    id: &str,
) -> Result<T> {
    match result {
        Ok(value) => Ok(value),
        Err(rusqlite::Error::QueryReturnedNoRows) => Err(TdError::not_found(entity, id)),
        Err(err) => Err(err.into()),
    }
}
