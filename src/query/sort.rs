use crate::error::QueryError;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Asc => "asc",
            SortOrder::Desc => "desc",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        if s.eq_ignore_ascii_case("asc") {
            Some(SortOrder::Asc)
        } else if s.eq_ignore_ascii_case("desc") {
            Some(SortOrder::Desc)
        } else {
            None
        }
    }
}

/// A single sort key. Accepts `field:asc` (Meilisearch) and `asc(field)`
/// (Algolia custom ranking); renders in the former.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortExpr {
    pub field: String,
    pub order: SortOrder,
}

impl SortExpr {
    pub fn parse(expression: &str) -> Result<Self, QueryError> {
        let invalid = || QueryError::InvalidSort {
            expression: expression.to_string(),
        };
        let trimmed = expression.trim();

        let (field, order) = if let Some((order, rest)) = trimmed.split_once('(') {
            let field = rest.strip_suffix(')').ok_or_else(invalid)?;
            (field.trim(), SortOrder::parse(order.trim()).ok_or_else(invalid)?)
        } else {
            let (field, order) = trimmed.rsplit_once(':').ok_or_else(invalid)?;
            (field.trim(), SortOrder::parse(order.trim()).ok_or_else(invalid)?)
        };

        if field.is_empty() || !field.chars().all(is_field_char) {
            return Err(invalid());
        }

        Ok(SortExpr {
            field: field.to_string(),
            order,
        })
    }
}

pub(crate) fn is_field_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '.' || c == '-'
}

impl fmt::Display for SortExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.field, self.order.as_str())
    }
}
