pub mod order;
pub mod schema;
pub mod term;

pub use order::{Direction, Sort};
pub use schema::{Collection, Index, IndexKind, Relationship, RelationshipKind, Row};
pub use term::Term;
