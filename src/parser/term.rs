use super::lexer::{tokenize, Token};
use crate::ast::Term;
use crate::error::ParseError;

/// Parses one RQL expression into a term.
///
/// Several `&`-joined fragments are combined under `and(...)`.
///
/// # Examples
///
/// ```
/// use rest_rql::parse;
///
/// let term = parse("eq(orderId,10257)").unwrap();
/// assert_eq!(term.token, "eq");
/// assert_eq!(term.args(), vec!["orderId", "10257"]);
///
/// // `name=value` is sugar for `eq(name,value)`
/// assert_eq!(parse("limit=5").unwrap().to_string(), "eq(limit,5)");
///
/// // a function value takes the left side as its first argument
/// assert_eq!(parse("total=gt(100)").unwrap().to_string(), "gt(total,100)");
/// ```
pub fn parse(text: &str) -> Result<Term, ParseError> {
    let mut terms = parse_terms(text)?;
    match terms.len() {
        0 => Err(ParseError::UnexpectedToken("end of input".to_string())),
        1 => Ok(terms.remove(0)),
        _ => Ok(Term::term("and", terms)),
    }
}

/// Parses `&`-separated RQL fragments into one term each.
///
/// # Errors
///
/// Returns `ParseError` if parentheses are unbalanced, a quote is not
/// closed, `=` appears inside a function, or two values are adjacent
/// without a separator.
pub fn parse_terms(text: &str) -> Result<Vec<Term>, ParseError> {
    let tokens = tokenize(text)?;
    tokens
        .split(|t| *t == Token::Amp)
        .filter(|fragment| !fragment.is_empty())
        .map(parse_fragment)
        .collect()
}

fn value_allowed(prev: Option<&Token>) -> bool {
    matches!(
        prev,
        None | Some(Token::Open) | Some(Token::Comma) | Some(Token::Equals)
    )
}

fn parse_fragment(tokens: &[Token]) -> Result<Term, ParseError> {
    // the bottom frame is a synthetic root that is unwrapped at the end
    let mut stack: Vec<Term> = vec![Term::leaf("")];
    let mut equals_seen = false;
    let mut prev: Option<&Token> = None;
    let mut i = 0;

    while i < tokens.len() {
        let token = &tokens[i];
        match token {
            Token::Text(text) => {
                if !value_allowed(prev) {
                    return Err(ParseError::UnexpectedToken(text.clone()));
                }
                if matches!(tokens.get(i + 1), Some(Token::Open)) {
                    if text.is_empty() {
                        return Err(ParseError::EmptyFunctionName);
                    }
                    stack.push(Term::term(text.as_str(), Vec::new()));
                    prev = tokens.get(i + 1);
                    i += 2;
                    continue;
                }
                top(&mut stack).push(Term::leaf(text.as_str()));
            }
            Token::Quoted(text, quote) => {
                if !value_allowed(prev) || matches!(tokens.get(i + 1), Some(Token::Open)) {
                    return Err(ParseError::UnexpectedToken(text.clone()));
                }
                top(&mut stack).push(Term::quoted(text.as_str(), *quote));
            }
            Token::Open => return Err(ParseError::EmptyFunctionName),
            Token::Close => {
                if stack.len() < 2 {
                    return Err(ParseError::UnexpectedClosingParenthesis);
                }
                if let Some(done) = stack.pop() {
                    top(&mut stack).push(done);
                }
            }
            Token::Comma => {}
            Token::Equals => {
                if stack.len() > 1 || equals_seen || stack[0].len() != 1 {
                    return Err(ParseError::UnexpectedToken("=".to_string()));
                }
                equals_seen = true;
            }
            Token::Amp => return Err(ParseError::UnexpectedToken("&".to_string())),
        }
        prev = Some(token);
        i += 1;
    }

    if stack.len() > 1 {
        return Err(ParseError::UnclosedParenthesis);
    }

    let mut root = stack.remove(0);

    if !equals_seen {
        return match root.terms.len() {
            1 => Ok(root.terms.remove(0)),
            0 => Err(ParseError::UnexpectedToken("end of input".to_string())),
            _ => Err(ParseError::UnexpectedToken(",".to_string())),
        };
    }

    let mut terms = std::mem::take(&mut root.terms);
    let lhs = terms.remove(0);
    if terms.is_empty() {
        return Ok(lhs);
    }

    if terms.len() == 1 && !terms[0].is_leaf() && !terms[0].is_quoted() {
        let mut function = terms.remove(0);
        function.terms.insert(0, lhs);
        return Ok(function);
    }

    terms.insert(0, lhs);
    Ok(Term::term("eq", terms))
}

fn top(stack: &mut [Term]) -> &mut Term {
    let last = stack.len() - 1;
    &mut stack[last]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_function() {
        let term = parse("eq(orderId,10257)").unwrap();
        assert_eq!(term.token, "eq");
        assert_eq!(term.len(), 2);
        assert!(term.terms[0].is_leaf());
        assert_eq!(term.args(), vec!["orderId", "10257"]);
    }

    #[test]
    fn test_parse_nested() {
        let term = parse("and(eq(a,1),or(gt(b,2),lt(c,3)))").unwrap();
        assert_eq!(term.to_string(), "and(eq(a,1),or(gt(b,2),lt(c,3)))");
    }

    #[test]
    fn test_parse_function_name_lowercased() {
        let term = parse("EQ(Name,Bob)").unwrap();
        assert_eq!(term.to_string(), "eq(Name,Bob)");
    }

    #[test]
    fn test_parse_bare_term() {
        let term = parse("collapseAll").unwrap();
        assert!(term.is_leaf());
        assert_eq!(term.token, "collapseAll");
    }

    #[test]
    fn test_parse_equals_literal() {
        assert_eq!(parse("limit=5").unwrap(), Term::call("eq", &["limit", "5"]));
    }

    #[test]
    fn test_parse_equals_list() {
        let term = parse("sort=-name,id").unwrap();
        assert_eq!(term.to_string(), "eq(sort,-name,id)");
    }

    #[test]
    fn test_parse_equals_function_inverts() {
        let term = parse("orders.total=eq(100)").unwrap();
        assert_eq!(term.to_string(), "eq(orders.total,100)");
    }

    #[test]
    fn test_parse_equals_empty_value() {
        assert_eq!(parse("includeTotal=").unwrap(), Term::leaf("includeTotal"));
    }

    #[test]
    fn test_parse_quoted_literal() {
        let term = parse("eq(name,'Smith, John')").unwrap();
        assert_eq!(term.terms[1].token, "Smith, John");
        assert_eq!(term.terms[1].quote, Some('\''));
    }

    #[test]
    fn test_parse_quoted_not_function() {
        let result = parse("'eq'(a,b)");
        assert!(matches!(result, Err(ParseError::UnexpectedToken(_))));
    }

    #[test]
    fn test_parse_terms_split_on_amp() {
        let terms = parse_terms("eq(a,b)&gt(c,d)").unwrap();
        assert_eq!(terms.len(), 2);
        assert_eq!(terms[1].to_string(), "gt(c,d)");
    }

    #[test]
    fn test_parse_amp_inside_quotes() {
        let terms = parse_terms("eq(name,'A&B')").unwrap();
        assert_eq!(terms.len(), 1);
        assert_eq!(terms[0].terms[1].token, "A&B");
    }

    #[test]
    fn test_parse_multiple_fragments_and() {
        let term = parse("a=1&b=2").unwrap();
        assert_eq!(term.to_string(), "and(eq(a,1),eq(b,2))");
    }

    #[test]
    fn test_parse_unclosed() {
        assert_eq!(parse("eq(a,b"), Err(ParseError::UnclosedParenthesis));
    }

    #[test]
    fn test_parse_unexpected_close() {
        assert_eq!(parse("eq(a,b))"), Err(ParseError::UnexpectedClosingParenthesis));
    }

    #[test]
    fn test_parse_equals_inside_function() {
        assert!(matches!(
            parse("and(a=b)"),
            Err(ParseError::UnexpectedToken(_))
        ));
    }

    #[test]
    fn test_parse_adjacent_values() {
        assert!(matches!(
            parse("eq('a' b)"),
            Err(ParseError::UnexpectedToken(_))
        ));
    }

    #[test]
    fn test_parse_empty_function_name() {
        assert_eq!(parse("(a,b)"), Err(ParseError::EmptyFunctionName));
    }

    #[test]
    fn test_render_round_trip() {
        let text = "and(eq(name,\"a,b\"),in(id,1,2,3),not(sw(city,San*)))";
        let term = parse(text).unwrap();
        assert_eq!(parse(&term.to_string()).unwrap(), term);
    }
}
