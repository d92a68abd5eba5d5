//! Storage-query descriptor assembled by value-object middleware and consumed by storage backends.

use crate::entity::{Association, Entity};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

/// A row as exchanged with storage: column (or alias) name to value.
pub type Row = Map<String, Value>;

/// Equality filters keyed by column. Keys of the form `field.column` address a joined association.
pub type Filters = Map<String, Value>;

/// One projected column.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Attribute {
    /// Plain column `name`, returned under `alias`.
    Column { name: String, alias: String },
    /// Raw query expression returned under `alias`.
    Computed { expression: String, alias: String },
}

impl Attribute {
    pub fn column(name: impl Into<String>) -> Self {
        let name = name.into();
        Attribute::Column {
            alias: name.clone(),
            name,
        }
    }

    pub fn alias(&self) -> &str {
        match self {
            Attribute::Column { alias, .. } | Attribute::Computed { alias, .. } => alias,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

impl SortDirection {
    /// `asc`/`desc`, case-insensitive.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "asc" => Some(SortDirection::Asc),
            "desc" => Some(SortDirection::Desc),
            _ => None,
        }
    }

    pub fn as_sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

/// A joined association with its own projection and filters.
#[derive(Clone, Debug)]
pub struct Include {
    pub alias: String,
    pub association: Association,
    pub entity: Arc<Entity>,
    pub options: QueryOptions,
}

#[derive(Clone, Debug, Default)]
pub struct QueryOptions {
    pub attributes: Vec<Attribute>,
    pub filters: Filters,
    pub includes: Vec<Include>,
    pub order: Vec<(String, SortDirection)>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.insert(column.into(), value.into());
        self
    }

    pub fn filters(mut self, filters: Filters) -> Self {
        self.filters.extend(filters);
        self
    }

    pub fn order_by(mut self, column: impl Into<String>, direction: SortDirection) -> Self {
        self.order.push((column.into(), direction));
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Remove and return the filters addressed to `field` (`field.x` or `__field.x`), prefix stripped.
    pub(crate) fn take_nested_filters(&mut self, field: &str) -> Filters {
        let plain = format!("{}.", field);
        let aliased = format!("__{}.", field);
        let keys: Vec<String> = self
            .filters
            .keys()
            .filter(|k| k.starts_with(&plain) || k.starts_with(&aliased))
            .cloned()
            .collect();
        let mut out = Map::new();
        for key in keys {
            if let Some(v) = self.filters.remove(&key) {
                let rest = key
                    .strip_prefix(&plain)
                    .or_else(|| key.strip_prefix(&aliased))
                    .unwrap_or(&key)
                    .to_string();
                out.insert(rest, v);
            }
        }
        out
    }
}

/// De-duplicate preserving first-seen order.
pub(crate) fn dedup_attributes(attrs: Vec<Attribute>) -> Vec<Attribute> {
    let mut out: Vec<Attribute> = Vec::with_capacity(attrs.len());
    for a in attrs {
        if !out.contains(&a) {
            out.push(a);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn nested_filters_are_consumed() {
        let mut q = QueryOptions::new()
            .filter("title", "x")
            .filter("author.name", "ann")
            .filter("__author.company.name", "acme");
        let nested = q.take_nested_filters("author");
        assert_eq!(nested.get("name"), Some(&json!("ann")));
        assert_eq!(nested.get("company.name"), Some(&json!("acme")));
        assert_eq!(q.filters.len(), 1);
        assert!(q.filters.contains_key("title"));
    }

    #[test]
    fn dedup_keeps_first_order() {
        let attrs = vec![Attribute::column("b"), Attribute::column("a"), Attribute::column("b")];
        assert_eq!(dedup_attributes(attrs), vec![Attribute::column("b"), Attribute::column("a")]);
    }

    #[test]
    fn direction_parses_case_insensitively() {
        assert_eq!(SortDirection::parse("ASC"), Some(SortDirection::Asc));
        assert_eq!(SortDirection::parse("sideways"), None);
        assert_eq!(SortDirection::default(), SortDirection::Desc);
    }
}
