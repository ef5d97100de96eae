pub mod builder;

pub use builder::{quote_identifier, QueryResult, SqlBuilder};
