pub mod lexer;
pub mod term;

pub use lexer::{tokenize, Token};
pub use term::{parse, parse_terms};
