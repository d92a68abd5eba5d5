//! Builds parameterized SELECT, INSERT, UPDATE, DELETE and DDL from entity declarations.
//!
//! Identifiers come from declarations only and are always quoted; values are parameters.
//! Row-returning statements wrap the result in `row_to_json` so every row comes back as a
//! single JSON column named `row`.

use crate::dto::{Attribute, Filters, Include, QueryOptions, Row};
use crate::entity::{AssociationKind, Column, ColumnDefault, Entity};
use crate::types::StorageType;
use serde_json::Value;

/// Quote identifier for PostgreSQL.
pub(crate) fn quoted(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

fn literal(v: &Value) -> String {
    match v {
        Value::Null => "NULL".into(),
        Value::Bool(b) => if *b { "TRUE" } else { "FALSE" }.into(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => format!("'{}'", s.replace('\'', "''")),
        Value::Array(_) | Value::Object(_) => format!("'{}'::jsonb", v.to_string().replace('\'', "''")),
    }
}

#[derive(Debug)]
pub struct QueryBuf {
    pub sql: String,
    pub params: Vec<Value>,
}

impl QueryBuf {
    fn new() -> Self {
        QueryBuf {
            sql: String::new(),
            params: Vec::new(),
        }
    }

    fn push_param(&mut self, v: Value) -> u32 {
        let n = self.params.len() as u32 + 1;
        self.params.push(v);
        n
    }

    /// `$n::type` for a value headed to `column`. JSON columns receive the serialized value.
    fn placeholder(&mut self, v: &Value, column: &Column) -> String {
        let v = match (&column.storage, v) {
            (StorageType::Json, Value::Null) => Value::Null,
            (StorageType::Json, other) => Value::String(other.to_string()),
            (_, other) => other.clone(),
        };
        let n = self.push_param(v);
        format!("${}::{}", n, column.storage.bind_cast())
    }
}

fn table_alias(depth: usize) -> String {
    format!("t{}", depth)
}

fn row_json(inner: &str) -> String {
    format!("SELECT row_to_json(r) AS row FROM ({}) r", inner)
}

fn select_list(entity: &Entity, options: &QueryOptions, alias: &str, depth: usize, q: &mut QueryBuf) -> String {
    let mut parts = Vec::new();
    if options.attributes.is_empty() {
        parts.push(format!("{}.*", alias));
    }
    for attr in &options.attributes {
        match attr {
            Attribute::Column { name, alias: as_name } => {
                if entity.has_attribute(name) {
                    parts.push(format!("{}.{} AS {}", alias, quoted(name), quoted(as_name)));
                }
            }
            Attribute::Computed { expression, alias: as_name } => {
                parts.push(format!("({}) AS {}", expression, quoted(as_name)));
            }
        }
    }
    for inc in &options.includes {
        let sub = include_subquery(inc, alias, depth, q);
        parts.push(format!("{} AS {}", sub, quoted(&inc.alias)));
    }
    parts.join(", ")
}

fn join_condition(inc: &Include, parent: &str, child: &str) -> String {
    format!(
        "{}.{} = {}.{}",
        child,
        quoted(&inc.association.target_key),
        parent,
        quoted(&inc.association.local_key)
    )
}

/// Scalar subquery: one JSON object for belongs-to, a JSON array for has-many.
fn include_subquery(inc: &Include, parent: &str, depth: usize, q: &mut QueryBuf) -> String {
    let alias = table_alias(depth + 1);
    let cols = select_list(&inc.entity, &inc.options, &alias, depth + 1, q);
    let mut conds = vec![join_condition(inc, parent, &alias)];
    conds.extend(conditions(&inc.entity, &inc.options.filters, &inc.options.includes, &alias, depth + 1, q));
    let inner = format!(
        "SELECT {} FROM {} {} WHERE {}",
        cols,
        quoted(inc.entity.name()),
        alias,
        conds.join(" AND ")
    );
    match inc.association.kind {
        AssociationKind::BelongsTo => format!("(SELECT row_to_json(sub) FROM ({} LIMIT 1) sub)", inner),
        AssociationKind::HasMany => format!(
            "(SELECT COALESCE(json_agg(row_to_json(sub)), '[]'::json) FROM ({}) sub)",
            inner
        ),
    }
}

fn has_filters(inc: &Include) -> bool {
    !inc.options.filters.is_empty() || inc.options.includes.iter().any(has_filters)
}

/// Equality filters on known columns, plus an EXISTS per filtered include.
fn conditions(
    entity: &Entity,
    filters: &Filters,
    includes: &[Include],
    alias: &str,
    depth: usize,
    q: &mut QueryBuf,
) -> Vec<String> {
    let mut out = Vec::new();
    for (col, val) in filters {
        let Some(column) = entity.column(col) else {
            out.push("FALSE".to_string());
            continue;
        };
        if val.is_null() {
            out.push(format!("{}.{} IS NULL", alias, quoted(col)));
        } else {
            let ph = q.placeholder(val, column);
            out.push(format!("{}.{} = {}", alias, quoted(col), ph));
        }
    }
    for inc in includes.iter().filter(|i| has_filters(i)) {
        let child = table_alias(depth + 1);
        let mut conds = vec![join_condition(inc, alias, &child)];
        conds.extend(conditions(&inc.entity, &inc.options.filters, &inc.options.includes, &child, depth + 1, q));
        out.push(format!(
            "EXISTS (SELECT 1 FROM {} {} WHERE {})",
            quoted(inc.entity.name()),
            child,
            conds.join(" AND ")
        ));
    }
    out
}

fn where_clause(conds: &[String]) -> String {
    if conds.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", conds.join(" AND "))
    }
}

/// SELECT with projection, joined includes, filters, order, limit and offset.
/// Order keys that are neither columns nor projected aliases are skipped.
pub fn select(entity: &Entity, options: &QueryOptions) -> QueryBuf {
    let mut q = QueryBuf::new();
    let alias = table_alias(0);
    let cols = select_list(entity, options, &alias, 0, &mut q);
    let conds = conditions(entity, &options.filters, &options.includes, &alias, 0, &mut q);

    let order: Vec<String> = options
        .order
        .iter()
        .filter_map(|(col, dir)| {
            if entity.has_attribute(col) {
                Some(format!("{}.{} {}", alias, quoted(col), dir.as_sql()))
            } else if options.attributes.iter().any(|a| a.alias() == col) {
                Some(format!("{} {}", quoted(col), dir.as_sql()))
            } else {
                None
            }
        })
        .collect();
    let order_clause = if order.is_empty() {
        String::new()
    } else {
        format!(" ORDER BY {}", order.join(", "))
    };
    let limit_clause = options.limit.map(|n| format!(" LIMIT {}", n)).unwrap_or_default();
    let offset_clause = options.offset.map(|n| format!(" OFFSET {}", n)).unwrap_or_default();

    let inner = format!(
        "SELECT {} FROM {} {}{}{}{}{}",
        cols,
        quoted(entity.name()),
        alias,
        where_clause(&conds),
        order_clause,
        limit_clause,
        offset_clause
    );
    q.sql = row_json(&inner);
    q
}

/// COUNT(*) under the same filters (and filtered includes) as `select`.
pub fn count(entity: &Entity, options: &QueryOptions) -> QueryBuf {
    let mut q = QueryBuf::new();
    let alias = table_alias(0);
    let conds = conditions(entity, &options.filters, &options.includes, &alias, 0, &mut q);
    q.sql = format!(
        "SELECT COUNT(*) AS count FROM {} {}{}",
        quoted(entity.name()),
        alias,
        where_clause(&conds)
    );
    q
}

/// INSERT of the row's known columns; omitted columns take their defaults.
pub fn insert(entity: &Entity, row: &Row) -> QueryBuf {
    let mut q = QueryBuf::new();
    let mut cols = Vec::new();
    let mut placeholders = Vec::new();
    for c in entity.columns() {
        let Some(v) = row.get(&c.name) else { continue };
        if c.auto_increment && v.is_null() {
            continue;
        }
        let ph = q.placeholder(v, c);
        cols.push(quoted(&c.name));
        placeholders.push(ph);
    }
    let table = quoted(entity.name());
    let insert = if cols.is_empty() {
        format!("INSERT INTO {} DEFAULT VALUES RETURNING *", table)
    } else {
        format!(
            "INSERT INTO {} ({}) VALUES ({}) RETURNING *",
            table,
            cols.join(", "),
            placeholders.join(", ")
        )
    };
    q.sql = format!("WITH r AS ({}) SELECT row_to_json(r) AS row FROM r", insert);
    q
}

/// UPDATE of the row's known non-key columns for every row matching `filters`.
/// Touches `updated_at` when the entity has one. `None` when there is nothing to set.
pub fn update(entity: &Entity, filters: &Filters, row: &Row) -> Option<QueryBuf> {
    let mut q = QueryBuf::new();
    let alias = table_alias(0);
    let mut sets = Vec::new();
    for c in entity.columns() {
        if c.primary_key {
            continue;
        }
        let Some(v) = row.get(&c.name) else { continue };
        let ph = q.placeholder(v, c);
        sets.push(format!("{} = {}", quoted(&c.name), ph));
    }
    if sets.is_empty() {
        return None;
    }
    if entity.has_attribute("updated_at") && !row.contains_key("updated_at") {
        sets.push(format!("{} = NOW()", quoted("updated_at")));
    }
    let conds = conditions(entity, filters, &[], &alias, 0, &mut q);
    q.sql = format!(
        "UPDATE {} AS {} SET {}{}",
        quoted(entity.name()),
        alias,
        sets.join(", "),
        where_clause(&conds)
    );
    Some(q)
}

pub fn delete(entity: &Entity, filters: &Filters) -> QueryBuf {
    let mut q = QueryBuf::new();
    let alias = table_alias(0);
    let conds = conditions(entity, filters, &[], &alias, 0, &mut q);
    q.sql = format!("DELETE FROM {} AS {}{}", quoted(entity.name()), alias, where_clause(&conds));
    q
}

fn column_definition(c: &Column) -> String {
    let typ = match (&c.storage, c.auto_increment) {
        (StorageType::Integer, true) => "SERIAL".to_string(),
        (StorageType::BigInt, true) => "BIGSERIAL".to_string(),
        (other, _) => other.pg_type(),
    };
    let name = quoted(&c.name);
    let mut def = format!("{} {}", name, typ);
    if c.primary_key {
        def.push_str(" PRIMARY KEY");
    } else if !c.nullable {
        def.push_str(" NOT NULL");
    }
    if c.unique && !c.primary_key {
        def.push_str(" UNIQUE");
    }
    match &c.default {
        Some(ColumnDefault::Now) => def.push_str(" DEFAULT NOW()"),
        Some(ColumnDefault::Value(v)) => {
            def.push_str(" DEFAULT ");
            def.push_str(&literal(v));
        }
        None => {}
    }
    if let Some(check) = c.storage.check_clause(&name) {
        def.push(' ');
        def.push_str(&check);
    }
    def
}

/// CREATE TABLE IF NOT EXISTS plus column comments. Never alters an existing table.
pub fn create_table(entity: &Entity) -> Vec<String> {
    let table = quoted(entity.name());
    let defs: Vec<String> = entity.columns().iter().map(column_definition).collect();
    let mut out = vec![format!("CREATE TABLE IF NOT EXISTS {} ({})", table, defs.join(", "))];
    for c in entity.columns() {
        if let Some(comment) = &c.comment {
            out.push(format!(
                "COMMENT ON COLUMN {}.{} IS '{}'",
                table,
                quoted(&c.name),
                comment.replace('\'', "''")
            ));
        }
    }
    out
}

/// One idempotent statement per belongs-to association, run after every table exists.
pub fn foreign_keys(entity: &Entity) -> Vec<String> {
    entity
        .associations()
        .iter()
        .filter(|a| a.kind == AssociationKind::BelongsTo)
        .map(|a| {
            let name = format!("fk_{}_{}", entity.name(), a.local_key);
            format!(
                "DO $$ BEGIN IF NOT EXISTS (SELECT 1 FROM pg_constraint WHERE conname = '{}') THEN \
                 ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({}) ON DELETE CASCADE; \
                 END IF; END $$",
                name.replace('\'', "''"),
                quoted(entity.name()),
                quoted(&name),
                quoted(&a.local_key),
                quoted(&a.target),
                quoted(&a.target_key)
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dto::{FieldSpec, QueryScope, SortDirection, ValueObject};
    use crate::entity::{ColumnSpec, EntityBuilder, EntityCatalog, EntityId};
    use crate::types::TypeDescriptor;
    use serde_json::json;
    use std::sync::Arc;

    fn entities() -> (Arc<Entity>, Arc<Entity>) {
        let mut catalog = EntityCatalog::new();
        let users = catalog
            .declare(
                EntityBuilder::new("users")
                    .with_all()
                    .column("name", ColumnSpec::new(TypeDescriptor::string()).required().comment("user's name"))
                    .column("role", ColumnSpec::new(TypeDescriptor::enumeration(["admin", "member"])).default_value(json!("member"))),
            )
            .unwrap();
        let posts = catalog
            .declare(
                EntityBuilder::new("posts")
                    .with_all()
                    .column("title", ColumnSpec::new(TypeDescriptor::string()))
                    .column("author", ColumnSpec::new(TypeDescriptor::int()).connect_to(&EntityId::named("users"))),
            )
            .unwrap();
        catalog.finalize_associations().unwrap();
        (catalog.get(&users).unwrap(), catalog.get(&posts).unwrap())
    }

    #[test]
    fn select_with_include_filters_and_order() {
        let (users, posts) = entities();
        let author = Arc::new(ValueObject::new(
            "Author",
            [("name", FieldSpec::new(TypeDescriptor::string()))],
            Some(users),
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
                .filter("title", "x")
                .filter("author.name", "ann")
                .order_by("created_at", SortDirection::Desc)
                .limit(30)
                .offset(60),
            &QueryScope::new(),
        );
        let q = select(&posts, &options);
        assert_eq!(
            q.sql,
            "SELECT row_to_json(r) AS row FROM (SELECT t0.\"title\" AS \"title\", \
             (SELECT row_to_json(sub) FROM (SELECT t1.\"name\" AS \"name\" FROM \"users\" t1 \
             WHERE t1.\"id\" = t0.\"author\" AND t1.\"name\" = $1::text LIMIT 1) sub) AS \"__author\" \
             FROM \"posts\" t0 WHERE t0.\"title\" = $2::text AND EXISTS (SELECT 1 FROM \"users\" t1 \
             WHERE t1.\"id\" = t0.\"author\" AND t1.\"name\" = $3::text) \
             ORDER BY t0.\"created_at\" DESC LIMIT 30 OFFSET 60) r"
        );
        assert_eq!(q.params, vec![json!("ann"), json!("x"), json!("ann")]);
    }

    #[test]
    fn count_and_delete_share_filter_conditions() {
        let (_, posts) = entities();
        let mut filters = Filters::new();
        filters.insert("author".into(), json!(3));
        filters.insert("title".into(), Value::Null);
        let q = count(&posts, &QueryOptions::new().filters(filters.clone()));
        assert_eq!(
            q.sql,
            "SELECT COUNT(*) AS count FROM \"posts\" t0 WHERE t0.\"author\" = $1::integer AND t0.\"title\" IS NULL"
        );
        let q = delete(&posts, &filters);
        assert!(q.sql.starts_with("DELETE FROM \"posts\" AS t0 WHERE"));
        assert_eq!(q.params, vec![json!(3)]);
    }

    #[test]
    fn unknown_filter_columns_match_nothing() {
        let (_, posts) = entities();
        let mut filters = Filters::new();
        filters.insert("bogus".into(), json!(1));
        let q = delete(&posts, &filters);
        assert_eq!(q.sql, "DELETE FROM \"posts\" AS t0 WHERE FALSE");
        assert!(q.params.is_empty());
    }

    #[test]
    fn insert_skips_absent_and_null_serial() {
        let (users, _) = entities();
        let mut row = Row::new();
        row.insert("id".into(), Value::Null);
        row.insert("name".into(), json!("ann"));
        let q = insert(&users, &row);
        assert_eq!(
            q.sql,
            "WITH r AS (INSERT INTO \"users\" (\"name\") VALUES ($1::text) RETURNING *) SELECT row_to_json(r) AS row FROM r"
        );
        let q = insert(&users, &Row::new());
        assert!(q.sql.contains("DEFAULT VALUES"));
    }

    #[test]
    fn update_touches_updated_at_and_skips_keys() {
        let (users, _) = entities();
        let mut filters = Filters::new();
        filters.insert("id".into(), json!(1));
        let mut row = Row::new();
        row.insert("id".into(), json!(1));
        row.insert("name".into(), json!("bob"));
        let q = update(&users, &filters, &row).unwrap();
        assert_eq!(
            q.sql,
            "UPDATE \"users\" AS t0 SET \"name\" = $1::text, \"updated_at\" = NOW() WHERE t0.\"id\" = $2::integer"
        );
        assert!(update(&users, &filters, &Row::new()).is_none());
    }

    #[test]
    fn ddl_for_table_and_foreign_keys() {
        let (users, posts) = entities();
        let stmts = create_table(&users);
        assert_eq!(
            stmts[0],
            "CREATE TABLE IF NOT EXISTS \"users\" (\"id\" SERIAL PRIMARY KEY, \"name\" VARCHAR(255) NOT NULL, \
             \"role\" TEXT DEFAULT 'member' CHECK (\"role\" IN ('admin', 'member')), \
             \"created_at\" TIMESTAMPTZ NOT NULL DEFAULT NOW(), \"updated_at\" TIMESTAMPTZ NOT NULL DEFAULT NOW())"
        );
        assert!(stmts.iter().any(|s| s == "COMMENT ON COLUMN \"users\".\"name\" IS 'user''s name'"));
        let fks = foreign_keys(&posts);
        assert_eq!(fks.len(), 1);
        assert!(fks[0].contains("FOREIGN KEY (\"author\") REFERENCES \"users\" (\"id\") ON DELETE CASCADE"));
        assert!(foreign_keys(&users).is_empty());
    }
}
