use super::clause::Clause;
use crate::ast::schema::decode_parts;
use crate::ast::{Collection, Index, Term};
use crate::error::Error;
use std::sync::Arc;

/// Prefix marking a column reference that lives on a related collection.
/// The marked token reads `~~relTbl_<relationship>.<column>`.
pub const RELATIONSHIP_MARKER: &str = "~~relTbl_";

const VOCABULARY: &[&str] = &[
    "and", "or", "not", "eq", "ne", "n", "nn", "gt", "ge", "lt", "le", "like", "sw", "ew", "w",
    "wo", "in", "out", "emp", "nemp", "_key", "_exists", "_notexists",
];

const LOGIC_FUNCTIONS: &[&str] = &["and", "or", "not"];

/// Predicates that can only hold when a related row exists.
const EXISTS_FUNCTIONS: &[&str] = &[
    "eq", "nn", "gt", "ge", "lt", "le", "like", "sw", "ew", "in", "w", "nemp",
];

/// Negative predicates and the positive function they are flipped to
/// before being wrapped in `_notexists`.
const NOT_EXISTS_FUNCTIONS: &[(&str, &str)] = &[
    ("ne", "eq"),
    ("n", "nn"),
    ("out", "in"),
    ("wo", "w"),
    ("emp", "nemp"),
];

/// Splits a marked token into `(relationship, column)`.
pub fn relationship_column(token: &str) -> Option<(&str, &str)> {
    token.strip_prefix(RELATIONSHIP_MARKER)?.split_once('.')
}

/// The filter clause.
///
/// Terms are rewritten before they are stored: relationship-qualified
/// columns become `_exists`/`_notexists` wrappers and `_key` shorthands
/// become equality trees. A root level `and` is flattened.
#[derive(Debug, Clone, Default)]
pub struct Where {
    collection: Option<Arc<Collection>>,
    terms: Vec<Term>,
}

impl Where {
    pub fn new(collection: Option<Arc<Collection>>) -> Self {
        Self {
            collection,
            terms: Vec::new(),
        }
    }

    /// Rewrites a filter tree bottom-up without touching the input.
    ///
    /// Every filter position must hold a function with arguments, so a bare
    /// `_key` or a leaf inside `and`/`or`/`not` is rejected.
    pub fn transform(&self, term: Term) -> Result<Term, Error> {
        if term.is_leaf() {
            return Err(Error::bad_request(format!(
                "filter '{}' has no arguments",
                term
            )));
        }

        if !self.claims(&term.token) {
            return Err(Error::bad_request(format!(
                "unknown filter function '{}' in '{}'",
                term.token, term
            )));
        }

        let Term {
            token,
            quote,
            terms,
        } = term;
        let logic = LOGIC_FUNCTIONS.contains(&token.as_str());
        let terms = terms
            .into_iter()
            .map(|child| {
                if child.is_leaf() && !logic {
                    Ok(child)
                } else {
                    self.transform(child)
                }
            })
            .collect::<Result<Vec<_>, _>>()?;
        let term = Term {
            token,
            quote,
            terms,
        };

        if term.token == "_key" {
            return self.expand_key(&term);
        }

        if let Some(rewritten) = self.rewrite_relationship(&term)? {
            return Ok(rewritten);
        }

        Ok(term)
    }

    fn rewrite_relationship(&self, term: &Term) -> Result<Option<Term>, Error> {
        let Some(collection) = self.collection.as_deref() else {
            return Ok(None);
        };
        let Some(first) = term.terms.first() else {
            return Ok(None);
        };
        if !first.is_leaf() || first.is_quoted() || first.token.starts_with(RELATIONSHIP_MARKER) {
            return Ok(None);
        }
        let Some((rel_name, column)) = first.token.split_once('.') else {
            return Ok(None);
        };
        let Some(relationship) = collection.relationship(rel_name) else {
            return Err(Error::bad_request(format!(
                "collection '{}' has no relationship '{}' in '{}'",
                collection.name, rel_name, term
            )));
        };

        let mut marked = term.clone();
        marked.terms[0] = Term::leaf(format!(
            "{}{}.{}",
            RELATIONSHIP_MARKER, relationship.name, column
        ));

        if EXISTS_FUNCTIONS.contains(&marked.token.as_str()) {
            return Ok(Some(Term::term("_exists", vec![marked])));
        }

        if let Some((_, positive)) = NOT_EXISTS_FUNCTIONS
            .iter()
            .find(|(negative, _)| *negative == marked.token)
        {
            marked.token = positive.to_string();
            return Ok(Some(Term::term("_notexists", vec![marked])));
        }

        Err(Error::internal(format!(
            "relationship rewrite reached unsupported function '{}'",
            term
        )))
    }

    fn expand_key(&self, term: &Term) -> Result<Term, Error> {
        let collection = self
            .collection
            .as_deref()
            .ok_or_else(|| Error::bad_request("_key requires a collection"))?;

        let index_name = term
            .token_at(0)
            .ok_or_else(|| Error::bad_request("_key requires an index name"))?;

        let index = collection
            .index(index_name)
            .filter(|i| i.is_unique())
            .ok_or_else(|| {
                Error::bad_request(format!(
                    "collection '{}' has no unique index '{}'",
                    collection.name, index_name
                ))
            })?;

        let keys = term.terms[1..]
            .iter()
            .map(|t| {
                if t.is_leaf() {
                    Ok(t.token.clone())
                } else {
                    Err(Error::bad_request(format!("_key value '{}' is not a literal", t)))
                }
            })
            .collect::<Result<Vec<_>, _>>()?;

        key_filter(index, &keys)
    }

    pub fn collection(&self) -> Option<&Collection> {
        self.collection.as_deref()
    }
}

/// Builds the filter selecting rows whose `index` columns match any of the
/// encoded resource `keys`.
///
/// A single column yields `eq`/`in`; a composite index yields
/// `or(and(eq,eq),...)`, collapsed to the lone `and` for a single key.
/// Column leaves are quoted so a column named like a clause function is
/// never read back as that function.
pub fn key_filter(index: &Index, keys: &[String]) -> Result<Term, Error> {
    if keys.is_empty() {
        return Err(Error::bad_request(format!(
            "no key values supplied for index '{}'",
            index.name
        )));
    }

    if index.columns.len() == 1 {
        let column = Term::quoted(index.columns[0].as_str(), '"');
        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            let parts = decode_parts(key);
            if parts.len() != 1 {
                return Err(Error::bad_request(format!(
                    "key '{}' does not match index '{}'",
                    key, index.name
                )));
            }
            values.extend(parts.into_iter().map(Term::leaf));
        }
        let function = if values.len() == 1 { "eq" } else { "in" };
        let mut terms = vec![column];
        terms.extend(values);
        return Ok(Term::term(function, terms));
    }

    let mut alternatives = keys
        .iter()
        .map(|key| -> Result<Term, Error> {
            let pairs = index.decode_key(key)?;
            Ok(Term::term(
                "and",
                pairs
                    .into_iter()
                    .map(|(c, v)| Term::term("eq", vec![Term::quoted(c, '"'), Term::leaf(v)]))
                    .collect(),
            ))
        })
        .collect::<Result<Vec<_>, _>>()?;

    if alternatives.len() == 1 {
        return Ok(alternatives.remove(0));
    }
    Ok(Term::term("or", alternatives))
}

impl Clause for Where {
    fn name(&self) -> &'static str {
        "where"
    }

    fn vocabulary(&self) -> &'static [&'static str] {
        VOCABULARY
    }

    fn accept(&mut self, term: Term) -> Result<(), Error> {
        let term = self.transform(term)?;
        if term.token == "and" {
            self.terms.extend(term.terms);
        } else {
            self.terms.push(term);
        }
        Ok(())
    }

    fn terms(&self) -> &[Term] {
        &self.terms
    }
}
