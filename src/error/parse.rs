use thiserror::Error;

#[derive(Error, Debug, PartialEq, Clone)]
pub enum ParseError {
    #[error("unclosed parenthesis")]
    UnclosedParenthesis,

    #[error("unexpected closing parenthesis")]
    UnexpectedClosingParenthesis,

    #[error("unterminated quote: {0}")]
    UnterminatedQuote(String),

    #[error("unexpected token: {0}")]
    UnexpectedToken(String),

    #[error("'(' without a function name")]
    EmptyFunctionName,

    #[error("invalid integer value: {0}")]
    InvalidInteger(String),

    #[error("invalid JSON body: {0}")]
    InvalidJsonBody(String),

    #[error("invalid resource key: {0}")]
    InvalidResourceKey(String),
}
