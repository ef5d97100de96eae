pub mod api;
pub mod parse;
pub mod sql;

pub use api::ApiError;
pub use parse::ParseError;
pub use sql::SqlError;

#[derive(Debug, PartialEq, Clone)]
pub enum Error {
    Parse(ParseError),
    Sql(SqlError),
    Api(ApiError),
}

impl Error {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Error::Api(ApiError::BadRequest(message.into()))
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Error::Api(ApiError::NotFound(message.into()))
    }

    /// An invariant of the orchestration was violated. These are never
    /// caused by bad input alone, so they are logged loudly.
    pub fn internal(message: impl Into<String>) -> Self {
        let message = message.into();
        tracing::error!(%message, "internal invariant violated");
        Error::Api(ApiError::Internal(message))
    }

    pub fn upstream(status: u16, message: impl Into<String>) -> Self {
        Error::Api(ApiError::Upstream {
            status,
            message: message.into(),
        })
    }

    /// HTTP status this error maps to.
    pub fn status(&self) -> u16 {
        match self {
            Error::Parse(_) => 400,
            Error::Sql(SqlError::UnsupportedFunction(_) | SqlError::InvalidArguments(_)) => 400,
            Error::Sql(_) => 500,
            Error::Api(e) => e.status(),
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Parse(e) => write!(f, "parse error: {}", e),
            Error::Sql(e) => write!(f, "SQL error: {}", e),
            Error::Api(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Parse(e) => Some(e),
            Error::Sql(e) => Some(e),
            Error::Api(e) => Some(e),
        }
    }
}

impl From<ParseError> for Error {
    fn from(err: ParseError) -> Self {
        Error::Parse(err)
    }
}

impl From<SqlError> for Error {
    fn from(err: SqlError) -> Self {
        Error::Sql(err)
    }
}

impl From<ApiError> for Error {
    fn from(err: ApiError) -> Self {
        Error::Api(err)
    }
}
