//! In-process storage for tests and demos.
//!
//! A transaction holds the store's lock from `begin` to `commit`/`rollback` and works on a
//! private copy, so transactions are fully serialized. Computed attributes cannot be
//! evaluated here and come back as `null`. Deletes do not cascade.

use crate::dto::{Attribute, Filters, Include, QueryOptions, Row, SortDirection};
use crate::entity::{AssociationKind, ColumnDefault, Entity};
use crate::error::AppError;
use crate::store::{Storage, Transaction};
use crate::types::StorageType;
use async_trait::async_trait;
use chrono::SecondsFormat;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Clone, Debug, Default)]
struct Tables {
    rows: HashMap<String, Vec<Row>>,
    sequences: HashMap<String, i64>,
}

#[derive(Clone, Default)]
pub struct MemoryStorage {
    state: Arc<Mutex<Tables>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Committed rows of `table`, in insertion order.
    pub async fn rows(&self, table: &str) -> Vec<Row> {
        self.state.lock().await.rows.get(table).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn begin(&self) -> Result<Box<dyn Transaction>, AppError> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        let work = guard.clone();
        Ok(Box::new(MemoryTransaction { guard, work }))
    }

    async fn sync(&self, entities: &[Arc<Entity>]) -> Result<(), AppError> {
        let mut state = self.state.lock().await;
        for entity in entities {
            state.rows.entry(entity.name().to_string()).or_default();
        }
        Ok(())
    }
}

struct MemoryTransaction {
    guard: OwnedMutexGuard<Tables>,
    work: Tables,
}

fn now() -> Value {
    Value::String(chrono::Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true))
}

/// Loosely type a value for its column, the way a text parameter cast would.
fn normalize(v: &Value, storage: &StorageType) -> Value {
    match (storage, v) {
        (StorageType::Integer | StorageType::BigInt, Value::String(s)) => {
            s.trim().parse::<i64>().map(Value::from).unwrap_or_else(|_| v.clone())
        }
        (StorageType::Float | StorageType::Double, Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .unwrap_or_else(|| v.clone()),
        (StorageType::Boolean, Value::String(s)) => match s.as_str() {
            "true" | "t" | "1" => Value::Bool(true),
            "false" | "f" | "0" => Value::Bool(false),
            _ => v.clone(),
        },
        (StorageType::Varchar(_) | StorageType::Text | StorageType::Enum(_), Value::Number(_) | Value::Bool(_)) => {
            Value::String(v.to_string())
        }
        _ => v.clone(),
    }
}

fn same(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn compare(a: &Value, b: &Value) -> Ordering {
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) => 4,
            Value::Object(_) => 5,
        }
    }
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(_), Value::Number(_)) => a
            .as_f64()
            .zip(b.as_f64())
            .and_then(|(x, y)| x.partial_cmp(&y))
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

impl MemoryTransaction {
    fn table(&self, name: &str) -> &[Row] {
        self.work.rows.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    fn matches(&self, entity: &Entity, row: &Row, filters: &Filters, includes: &[Include]) -> bool {
        let columns_match = filters.iter().all(|(col, expected)| {
            let Some(column) = entity.column(col) else { return false };
            let actual = row.get(col).unwrap_or(&Value::Null);
            if expected.is_null() {
                actual.is_null()
            } else {
                same(actual, &normalize(expected, &column.storage))
            }
        });
        columns_match
            && includes
                .iter()
                .filter(|inc| has_filters(inc))
                .all(|inc| !self.related(inc, row).is_empty())
    }

    /// Rows of the include's entity joined to `parent` and passing the include's filters.
    fn related(&self, inc: &Include, parent: &Row) -> Vec<&Row> {
        let key = parent.get(&inc.association.local_key).unwrap_or(&Value::Null);
        if key.is_null() {
            return Vec::new();
        }
        self.table(inc.entity.name())
            .iter()
            .filter(|r| same(r.get(&inc.association.target_key).unwrap_or(&Value::Null), key))
            .filter(|r| self.matches(&inc.entity, r, &inc.options.filters, &inc.options.includes))
            .collect()
    }

    fn project(&self, entity: &Entity, row: &Row, options: &QueryOptions) -> Row {
        let mut out = if options.attributes.is_empty() {
            row.clone()
        } else {
            let mut out = Row::new();
            for attr in &options.attributes {
                match attr {
                    Attribute::Column { name, alias } => {
                        if entity.has_attribute(name) {
                            out.insert(alias.clone(), row.get(name).cloned().unwrap_or(Value::Null));
                        }
                    }
                    Attribute::Computed { alias, .. } => {
                        out.insert(alias.clone(), Value::Null);
                    }
                }
            }
            out
        };
        for inc in &options.includes {
            let related = self.related(inc, row);
            let value = match inc.association.kind {
                AssociationKind::BelongsTo => related
                    .first()
                    .map(|r| Value::Object(self.project(&inc.entity, r, &inc.options)))
                    .unwrap_or(Value::Null),
                AssociationKind::HasMany => Value::Array(
                    related
                        .into_iter()
                        .map(|r| Value::Object(self.project(&inc.entity, r, &inc.options)))
                        .collect(),
                ),
            };
            out.insert(inc.alias.clone(), value);
        }
        out
    }

    fn check_unique(&self, entity: &Entity, candidate: &Row, skip: Option<usize>) -> Result<(), AppError> {
        for column in entity.columns().iter().filter(|c| c.unique || c.primary_key) {
            let Some(value) = candidate.get(&column.name).filter(|v| !v.is_null()) else { continue };
            let clash = self
                .table(entity.name())
                .iter()
                .enumerate()
                .any(|(i, r)| Some(i) != skip && r.get(&column.name).is_some_and(|v| same(v, value)));
            if clash {
                return Err(AppError::Storage(format!(
                    "duplicate key value violates unique constraint on \"{}\".\"{}\"",
                    entity.name(),
                    column.name
                )));
            }
        }
        Ok(())
    }
}

fn has_filters(inc: &Include) -> bool {
    !inc.options.filters.is_empty() || inc.options.includes.iter().any(has_filters)
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn select(&mut self, entity: &Entity, options: &QueryOptions) -> Result<Vec<Row>, AppError> {
        let mut rows: Vec<&Row> = self
            .table(entity.name())
            .iter()
            .filter(|r| self.matches(entity, r, &options.filters, &options.includes))
            .collect();
        for (col, dir) in options.order.iter().rev() {
            if !entity.has_attribute(col) {
                continue;
            }
            rows.sort_by(|a, b| {
                let ord = compare(a.get(col).unwrap_or(&Value::Null), b.get(col).unwrap_or(&Value::Null));
                match dir {
                    SortDirection::Asc => ord,
                    SortDirection::Desc => ord.reverse(),
                }
            });
        }
        let offset = options.offset.unwrap_or(0) as usize;
        let limit = options.limit.map(|n| n as usize).unwrap_or(usize::MAX);
        Ok(rows
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|r| self.project(entity, r, options))
            .collect())
    }

    async fn count(&mut self, entity: &Entity, options: &QueryOptions) -> Result<u64, AppError> {
        Ok(self
            .table(entity.name())
            .iter()
            .filter(|r| self.matches(entity, r, &options.filters, &options.includes))
            .count() as u64)
    }

    async fn insert(&mut self, entity: &Entity, row: &Row) -> Result<Row, AppError> {
        let mut stored = Row::new();
        for column in entity.columns() {
            let given = row.get(&column.name).filter(|v| !v.is_null());
            let value = match (given, &column.default) {
                (Some(v), _) if column.auto_increment => {
                    let value = normalize(v, &column.storage);
                    if let Some(explicit) = value.as_i64() {
                        let seq = self.work.sequences.entry(entity.name().to_string()).or_insert(0);
                        *seq = (*seq).max(explicit);
                    }
                    value
                }
                (Some(v), _) => normalize(v, &column.storage),
                (None, _) if column.auto_increment => {
                    let seq = self.work.sequences.entry(entity.name().to_string()).or_insert(0);
                    *seq += 1;
                    Value::from(*seq)
                }
                (None, Some(ColumnDefault::Now)) => now(),
                (None, Some(ColumnDefault::Value(v))) => v.clone(),
                (None, None) => Value::Null,
            };
            if value.is_null() && !column.nullable && !column.primary_key {
                return Err(AppError::Storage(format!(
                    "null value in column \"{}\" of \"{}\" violates not-null constraint",
                    column.name,
                    entity.name()
                )));
            }
            stored.insert(column.name.clone(), value);
        }
        self.check_unique(entity, &stored, None)?;
        self.work
            .rows
            .entry(entity.name().to_string())
            .or_default()
            .push(stored.clone());
        Ok(stored)
    }

    async fn update(&mut self, entity: &Entity, filters: &Filters, row: &Row) -> Result<u64, AppError> {
        let changes: Vec<(String, Value)> = entity
            .columns()
            .iter()
            .filter(|c| !c.primary_key)
            .filter_map(|c| row.get(&c.name).map(|v| (c.name.clone(), normalize(v, &c.storage))))
            .collect();
        if changes.is_empty() {
            return Ok(0);
        }
        let touch = entity.has_attribute("updated_at") && !row.contains_key("updated_at");
        let targets: Vec<usize> = self
            .table(entity.name())
            .iter()
            .enumerate()
            .filter(|(_, r)| self.matches(entity, r, filters, &[]))
            .map(|(i, _)| i)
            .collect();
        for &i in &targets {
            let mut updated = self.table(entity.name())[i].clone();
            for (k, v) in &changes {
                updated.insert(k.clone(), v.clone());
            }
            if touch {
                updated.insert("updated_at".into(), now());
            }
            self.check_unique(entity, &updated, Some(i))?;
            if let Some(slot) = self.work.rows.get_mut(entity.name()).and_then(|rows| rows.get_mut(i)) {
                *slot = updated;
            }
        }
        Ok(targets.len() as u64)
    }

    async fn delete(&mut self, entity: &Entity, filters: &Filters) -> Result<u64, AppError> {
        let keep: Vec<bool> = self
            .table(entity.name())
            .iter()
            .map(|r| !self.matches(entity, r, filters, &[]))
            .collect();
        let removed = keep.iter().filter(|k| !**k).count();
        if let Some(rows) = self.work.rows.get_mut(entity.name()) {
            let mut flags = keep.into_iter();
            rows.retain(|_| flags.next().unwrap_or(true));
        }
        Ok(removed as u64)
    }

    async fn commit(self: Box<Self>) -> Result<(), AppError> {
        let MemoryTransaction { mut guard, work } = *self;
        *guard = work;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), AppError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dto::{FieldSpec, QueryScope, ValueObject};
    use crate::entity::{ColumnSpec, EntityBuilder, EntityCatalog, EntityId};
    use crate::types::TypeDescriptor;
    use serde_json::json;

    fn entities() -> (Arc<Entity>, Arc<Entity>) {
        let mut catalog = EntityCatalog::new();
        let users = catalog
            .declare(
                EntityBuilder::new("users")
                    .with_all()
                    .column("name", ColumnSpec::new(TypeDescriptor::string()).required().unique()),
            )
            .unwrap();
        let posts = catalog
            .declare(
                EntityBuilder::new("posts")
                    .with_all()
                    .column("title", ColumnSpec::new(TypeDescriptor::string()))
                    .column(
                        "author",
                        ColumnSpec::new(TypeDescriptor::int())
                            .connect_to(&EntityId::named("users"))
                            .reverse_define(),
                    ),
            )
            .unwrap();
        catalog.finalize_associations().unwrap();
        (catalog.get(&users).unwrap(), catalog.get(&posts).unwrap())
    }

    fn row(v: Value) -> Row {
        v.as_object().cloned().unwrap_or_default()
    }

    #[tokio::test]
    async fn insert_assigns_ids_and_defaults() {
        let (users, _) = entities();
        let store = MemoryStorage::new();
        let mut tx = store.begin().await.unwrap();
        let a = tx.insert(&users, &row(json!({"name": "ann"}))).await.unwrap();
        let b = tx.insert(&users, &row(json!({"name": "bob"}))).await.unwrap();
        assert_eq!(a["id"], json!(1));
        assert_eq!(b["id"], json!(2));
        assert!(a["created_at"].is_string());
        let err = tx.insert(&users, &row(json!({"name": "ann"}))).await.unwrap_err();
        assert!(matches!(err, AppError::Storage(_)));
        let err = tx.insert(&users, &Row::new()).await.unwrap_err();
        assert!(err.to_string().contains("not-null"));
        tx.commit().await.unwrap();
        assert_eq!(store.rows("users").await.len(), 2);
    }

    #[tokio::test]
    async fn explicit_ids_advance_the_sequence() {
        let (users, _) = entities();
        let store = MemoryStorage::new();
        let mut tx = store.begin().await.unwrap();
        tx.insert(&users, &row(json!({"id": 5, "name": "ann"}))).await.unwrap();
        let next = tx.insert(&users, &row(json!({"name": "bob"}))).await.unwrap();
        assert_eq!(next["id"], json!(6));
        tx.insert(&users, &row(json!({"id": 2, "name": "cy"}))).await.unwrap();
        let after = tx.insert(&users, &row(json!({"name": "dee"}))).await.unwrap();
        assert_eq!(after["id"], json!(7));
    }

    #[tokio::test]
    async fn rollback_discards_work() {
        let (users, _) = entities();
        let store = MemoryStorage::new();
        let mut tx = store.begin().await.unwrap();
        tx.insert(&users, &row(json!({"name": "ann"}))).await.unwrap();
        tx.rollback().await.unwrap();
        assert!(store.rows("users").await.is_empty());
    }

    #[tokio::test]
    async fn select_joins_filters_and_orders() {
        let (users, posts) = entities();
        let store = MemoryStorage::new();
        let mut tx = store.begin().await.unwrap();
        tx.insert(&users, &row(json!({"name": "ann"}))).await.unwrap();
        tx.insert(&users, &row(json!({"name": "bob"}))).await.unwrap();
        for (title, author) in [("a", 1), ("b", 2), ("c", 1)] {
            tx.insert(&posts, &row(json!({"title": title, "author": author}))).await.unwrap();
        }

        let author = Arc::new(ValueObject::new(
            "Author",
            [("name", FieldSpec::new(TypeDescriptor::string()))],
            Some(Arc::clone(&users)),
        ));
        let vo = ValueObject::new(
            "Post",
            [
                ("title", FieldSpec::new(TypeDescriptor::string())),
                ("author", FieldSpec::new(author)),
            ],
            Some(Arc::clone(&posts)),
        );
        let options = vo.middleware(
            QueryOptions::new()
                .filter("author.name", "ann")
                .order_by("title", SortDirection::Desc),
            &QueryScope::new(),
        );
        let rows = tx.select(&posts, &options).await.unwrap();
        let titles: Vec<&Value> = rows.iter().map(|r| &r["title"]).collect();
        assert_eq!(titles, [&json!("c"), &json!("a")]);
        assert_eq!(rows[0]["__author"], json!({"name": "ann"}));
        assert_eq!(tx.count(&posts, &options).await.unwrap(), 2);

        let has_many = ValueObject::new(
            "UserPosts",
            [
                ("name", FieldSpec::new(TypeDescriptor::string())),
                (
                    "posts",
                    FieldSpec::new(TypeDescriptor::array(Arc::new(ValueObject::new(
                        "PostTitle",
                        [("title", FieldSpec::new(TypeDescriptor::string()))],
                        Some(Arc::clone(&posts)),
                    )))),
                ),
            ],
            Some(Arc::clone(&users)),
        );
        let options = has_many.middleware(QueryOptions::new().filter("id", "1"), &QueryScope::new());
        let rows = tx.select(&users, &options).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["__posts"], json!([{"title": "a"}, {"title": "c"}]));
    }

    #[tokio::test]
    async fn update_and_delete_by_filter() {
        let (users, _) = entities();
        let store = MemoryStorage::new();
        let mut tx = store.begin().await.unwrap();
        tx.insert(&users, &row(json!({"name": "ann"}))).await.unwrap();
        tx.insert(&users, &row(json!({"name": "bob"}))).await.unwrap();
        let mut f = Filters::new();
        f.insert("name".into(), json!("bob"));
        assert_eq!(tx.update(&users, &f, &row(json!({"name": "rob", "id": 99}))).await.unwrap(), 1);
        let mut f = Filters::new();
        f.insert("id".into(), json!(2));
        let rows = tx.select(&users, &QueryOptions::new().filters(f.clone())).await.unwrap();
        assert_eq!(rows[0]["name"], json!("rob"));
        assert_eq!(tx.delete(&users, &f).await.unwrap(), 1);
        assert_eq!(tx.count(&users, &QueryOptions::new()).await.unwrap(), 1);
    }
}
