use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Asc,
    Desc,
}

/// One sort key resolved from a `sort`/`order` term.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Sort {
    pub property: String,
    pub direction: Direction,
}

impl Sort {
    pub fn new(property: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            direction: Direction::Asc,
        }
    }

    /// Parses `-name` (descending), `+name` or `name` (ascending).
    pub fn parse(spec: &str) -> Self {
        let spec = spec.trim();
        if let Some(rest) = spec.strip_prefix('-') {
            Self::new(rest).desc()
        } else if let Some(rest) = spec.strip_prefix('+') {
            Self::new(rest)
        } else {
            Self::new(spec)
        }
    }

    pub fn desc(mut self) -> Self {
        self.direction = Direction::Desc;
        self
    }

    pub fn asc(mut self) -> Self {
        self.direction = Direction::Asc;
        self
    }

    pub fn is_asc(&self) -> bool {
        self.direction == Direction::Asc
    }
}
