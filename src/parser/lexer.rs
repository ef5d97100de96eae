use crate::error::ParseError;
use nom::{
    bytes::complete::{take_till, take_till1},
    character::complete::{char, multispace0, one_of},
    combinator::peek,
    sequence::delimited,
    IResult,
};

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// Unquoted text, whitespace-trimmed.
    Text(String),
    /// Quoted literal with its quote character.
    Quoted(String, char),
    Open,
    Close,
    Comma,
    Equals,
    Amp,
}

fn is_structural(c: char) -> bool {
    matches!(c, '(' | ')' | ',' | '=' | '&')
}

fn is_quote(c: char) -> bool {
    matches!(c, '\'' | '"' | '`')
}

pub fn quoted(i: &str) -> IResult<&str, Token> {
    let (_, q) = peek(one_of("'\"`"))(i)?;
    let (i, s) = delimited(char(q), take_till(move |c| c == q), char(q))(i)?;
    Ok((i, Token::Quoted(s.to_string(), q)))
}

pub fn punct(i: &str) -> IResult<&str, Token> {
    let (i, c) = one_of("(),=&")(i)?;
    let token = match c {
        '(' => Token::Open,
        ')' => Token::Close,
        ',' => Token::Comma,
        '=' => Token::Equals,
        _ => Token::Amp,
    };
    Ok((i, token))
}

pub fn bare(i: &str) -> IResult<&str, Token> {
    let (i, s) = take_till1(is_structural)(i)?;
    Ok((i, Token::Text(s.trim().to_string())))
}

/// Splits RQL text into tokens.
///
/// A value starting with a quote character must be closed by the same
/// character; quotes elsewhere in a value are ordinary characters.
pub fn tokenize(input: &str) -> Result<Vec<Token>, ParseError> {
    let mut tokens = Vec::new();
    let mut rest = input;

    loop {
        let (after_ws, _) = multispace0::<&str, nom::error::Error<&str>>(rest)
            .map_err(|_| ParseError::UnexpectedToken(rest.to_string()))?;
        rest = after_ws;

        let Some(first) = rest.chars().next() else {
            break;
        };

        let parsed = if is_quote(first) {
            quoted(rest).map_err(|_| ParseError::UnterminatedQuote(rest.to_string()))?
        } else if is_structural(first) {
            punct(rest).map_err(|_| ParseError::UnexpectedToken(rest.to_string()))?
        } else {
            bare(rest).map_err(|_| ParseError::UnexpectedToken(rest.to_string()))?
        };

        rest = parsed.0;
        tokens.push(parsed.1);
    }

    Ok(tokens)
}
