//! `Condition` and `Operator` — the typed form a raw JSON condition entry
//! parses into. Evaluation itself lives in `crate::conditions`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operator {
    Equals,
    NotEquals,
    GreaterThan,
    LessThan,
    Contains,
    Regex,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Condition {
    /// Dotted path into the event payload, e.g. `"interface.status"`.
    pub field: String,
    pub operator: Operator,
    pub value: String,
}
