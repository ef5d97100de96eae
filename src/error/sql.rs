use thiserror::Error;

#[derive(Error, Debug, PartialEq, Clone)]
pub enum SqlError {
    #[error("empty table name")]
    EmptyTableName,

    #[error("unsupported function: {0}")]
    UnsupportedFunction(String),

    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("relationship not found: {0}")]
    RelationshipNotFound(String),

    #[error("no collection bound to query")]
    NoCollection,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sql_error_unsupported_function() {
        let err = SqlError::UnsupportedFunction("bogus".to_string());
        assert!(err.to_string().contains("bogus"));
    }

    #[test]
    fn test_sql_error_clone() {
        let err = SqlError::RelationshipNotFound("orders".to_string());
        assert_eq!(err.clone(), err);
    }
}
