//! Named read projections over an entity: row mapping and query building.

use crate::auth::AuthUser;
use crate::dto::field::{ExpressionContext, FieldSpec};
use crate::dto::query::{dedup_attributes, Attribute, Filters, Include, QueryOptions, Row};
use crate::entity::{association_alias, Entity};
use crate::types::{Coerced, FieldType, TypeDescriptor};
use serde_json::{json, Map, Value};
use std::fmt;
use std::sync::Arc;

/// Row-level hook run while a projection is built: may add or remove attributes and filters
/// for the acting user.
pub type QueryHook = Arc<dyn Fn(&mut Vec<Attribute>, &mut Filters, Option<&AuthUser>) + Send + Sync>;

/// Per-call inputs to [`ValueObject::middleware`].
#[derive(Clone, Copy, Default)]
pub struct QueryScope<'a> {
    pub user: Option<&'a AuthUser>,
    pub params: Option<&'a Row>,
    /// Comma separated extra columns: `name` adds, `!name` removes, `*` adds every entity column.
    pub fields: Option<&'a str>,
}

impl<'a> QueryScope<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn user(mut self, user: Option<&'a AuthUser>) -> Self {
        self.user = user;
        self
    }

    pub fn params(mut self, params: &'a Row) -> Self {
        self.params = Some(params);
        self
    }

    pub fn fields(mut self, fields: &'a str) -> Self {
        self.fields = Some(fields);
        self
    }
}

pub struct ValueObject {
    name: String,
    properties: Vec<(String, FieldSpec)>,
    entity: Option<Arc<Entity>>,
    hook: Option<QueryHook>,
}

impl ValueObject {
    pub fn new<I, K>(name: impl Into<String>, properties: I, entity: Option<Arc<Entity>>) -> Self
    where
        I: IntoIterator<Item = (K, FieldSpec)>,
        K: Into<String>,
    {
        ValueObject {
            name: name.into(),
            properties: properties.into_iter().map(|(k, v)| (k.into(), v)).collect(),
            entity,
            hook: None,
        }
    }

    pub fn with_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut Vec<Attribute>, &mut Filters, Option<&AuthUser>) + Send + Sync + 'static,
    {
        self.hook = Some(Arc::new(hook));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn properties(&self) -> &[(String, FieldSpec)] {
        &self.properties
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.properties.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    pub fn entity(&self) -> Option<&Arc<Entity>> {
        self.entity.as_ref()
    }

    /// Shape one row into this object's fields. Never fails: absent columns stay absent.
    pub fn map(&self, row: &Row) -> Row {
        let mut out = Map::new();
        for (field, spec) in &self.properties {
            let joined = spec.nested().and_then(|vo| {
                let value = row.get(&association_alias(field))?;
                match value {
                    Value::Object(nested) => Some(Value::Object(vo.map(nested))),
                    Value::Array(items) => Some(Value::Array(
                        items
                            .iter()
                            .map(|item| match item {
                                Value::Object(o) => Value::Object(vo.map(o)),
                                other => other.clone(),
                            })
                            .collect(),
                    )),
                    _ => None,
                }
            });
            let value = match joined {
                Some(v) => Some(v),
                None => read_column(field, spec, row),
            };
            let value = match (value, &spec.render) {
                (Some(v), Some(render)) => Some(render(v)),
                (v, _) => v,
            };
            if let Some(v) = value {
                out.insert(field.clone(), v);
            }
        }
        out
    }

    pub fn collect(&self, rows: &[Row]) -> Vec<Row> {
        rows.iter().map(|r| self.map(r)).collect()
    }

    /// Extend `options` with this object's projection, computed columns and joins.
    ///
    /// Attributes already present in `options` are kept first. Plain columns that are not
    /// attributes of the backing entity are dropped; with no backing entity every plain
    /// column is dropped. A nested field whose value object (or association) is not wired
    /// to an entity contributes nothing.
    pub fn middleware(&self, options: QueryOptions, scope: &QueryScope<'_>) -> QueryOptions {
        self.build(options, scope, None)
    }

    fn build(&self, mut options: QueryOptions, scope: &QueryScope<'_>, path: Option<&str>) -> QueryOptions {
        let empty = Row::new();
        let ctx = ExpressionContext {
            user: scope.user,
            association: path,
            params: scope.params.unwrap_or(&empty),
        };

        let mut attrs = Vec::with_capacity(self.properties.len());
        for (field, spec) in &self.properties {
            if let Some(expr) = &spec.expression {
                attrs.push(Attribute::Computed {
                    expression: expr.expand(&ctx),
                    alias: field.clone(),
                });
            } else if let (Some(vo), true) = (spec.nested(), self.joins(field)) {
                let nested_filters = options.take_nested_filters(field);
                if let Some(include) = self.include_for(field, vo, nested_filters, scope, path) {
                    options.includes.push(include);
                }
            } else {
                attrs.push(Attribute::Column {
                    name: spec.column.clone().unwrap_or_else(|| field.clone()),
                    alias: field.clone(),
                });
            }
        }

        // Nested levels take their projection from the declaration only.
        if path.is_none() {
            if let Some(fields) = scope.fields {
                self.apply_field_selection(&mut attrs, fields);
            }
        }

        if let Some(hook) = &self.hook {
            hook(&mut attrs, &mut options.filters, scope.user);
        }

        let entity = self.entity.as_deref();
        attrs.retain(|a| match a {
            Attribute::Computed { .. } => true,
            Attribute::Column { name, .. } => entity.is_some_and(|e| e.has_attribute(name)),
        });

        let mut all = std::mem::take(&mut options.attributes);
        all.extend(attrs);
        options.attributes = dedup_attributes(all);
        options
    }

    /// Whether `field` names an association of the backing entity. Nested objects without one
    /// are read from a JSON column of the same name.
    fn joins(&self, field: &str) -> bool {
        self.entity
            .as_ref()
            .is_some_and(|e| e.association(&association_alias(field)).is_some())
    }

    fn include_for(
        &self,
        field: &str,
        vo: &Arc<ValueObject>,
        filters: Filters,
        scope: &QueryScope<'_>,
        path: Option<&str>,
    ) -> Option<Include> {
        let alias = association_alias(field);
        let association = self.entity.as_ref()?.association(&alias)?.clone();
        let target = vo.entity.as_ref()?;
        if target.name() != association.target {
            tracing::debug!(dto = %self.name, field, "nested value object does not match association target");
            return None;
        }
        let nested_path = match path {
            Some(p) => format!("{}.{}", p, alias),
            None => alias.clone(),
        };
        let nested = vo.build(QueryOptions::new().filters(filters), scope, Some(&nested_path));
        Some(Include {
            alias,
            association,
            entity: Arc::clone(target),
            options: nested,
        })
    }

    fn apply_field_selection(&self, attrs: &mut Vec<Attribute>, fields: &str) {
        for token in fields.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            if token == "*" {
                if let Some(entity) = &self.entity {
                    attrs.extend(entity.attribute_names().map(Attribute::column));
                }
            } else if let Some(name) = token.strip_prefix('!') {
                attrs.retain(|a| a.alias() != name);
            } else {
                attrs.push(Attribute::column(token));
            }
        }
    }

    /// Documentation component for this object.
    pub fn doc_schema(&self) -> Value {
        let properties: Map<String, Value> = self
            .properties
            .iter()
            .map(|(k, spec)| (k.clone(), spec.to_doc_schema()))
            .collect();
        let required: Vec<&str> = self
            .properties
            .iter()
            .filter(|(_, spec)| spec.required)
            .map(|(k, _)| k.as_str())
            .collect();
        let mut schema = json!({ "type": "object", "properties": properties });
        if !required.is_empty() {
            schema["required"] = json!(required);
        }
        schema
    }
}

fn read_column(field: &str, spec: &FieldSpec, row: &Row) -> Option<Value> {
    let raw = row
        .get(field)
        .or_else(|| spec.column.as_deref().and_then(|c| row.get(c)))?;
    match &spec.ty {
        FieldType::Scalar(t) if t.has_coercion() => match t.coerce(raw) {
            Coerced::Missing => None,
            Coerced::Invalid => Some(Value::Null),
            Coerced::Value(v) => Some(v),
        },
        FieldType::Scalar(TypeDescriptor::Json | TypeDescriptor::Array(_)) | FieldType::Reference(_) => {
            Some(parse_embedded_json(raw))
        }
        FieldType::Scalar(_) => Some(raw.clone()),
    }
}

/// Structured columns may come back serialized; decode them when they hold an object or array.
fn parse_embedded_json(raw: &Value) -> Value {
    if let Value::String(s) = raw {
        let trimmed = s.trim_start();
        if trimmed.starts_with('{') || trimmed.starts_with('[') {
            if let Ok(v) = serde_json::from_str::<Value>(s) {
                return v;
            }
        }
    }
    raw.clone()
}

impl fmt::Debug for ValueObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueObject")
            .field("name", &self.name)
            .field("fields", &self.properties.iter().map(|(k, _)| k.as_str()).collect::<Vec<_>>())
            .field("entity", &self.entity.as_ref().map(|e| e.name()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{ColumnSpec, EntityBuilder, EntityCatalog, EntityId};

    fn catalog() -> (Arc<Entity>, Arc<Entity>) {
        let mut catalog = EntityCatalog::new();
        let users = catalog
            .declare(
                EntityBuilder::new("users")
                    .with_all()
                    .column("name", ColumnSpec::new(TypeDescriptor::string()))
                    .column("email", ColumnSpec::new(TypeDescriptor::string())),
            )
            .unwrap();
        let posts = catalog
            .declare(
                EntityBuilder::new("posts")
                    .with_all()
                    .column("title", ColumnSpec::new(TypeDescriptor::string()))
                    .column("views", ColumnSpec::new(TypeDescriptor::int()))
                    .column("author", ColumnSpec::new(TypeDescriptor::int()).connect_to(&EntityId::named("users"))),
            )
            .unwrap();
        catalog.finalize_associations().unwrap();
        (catalog.get(&users).unwrap(), catalog.get(&posts).unwrap())
    }

    fn row(v: Value) -> Row {
        v.as_object().cloned().unwrap_or_default()
    }

    fn author_vo(users: &Arc<Entity>) -> Arc<ValueObject> {
        Arc::new(ValueObject::new(
            "Author",
            [
                ("id", FieldSpec::new(TypeDescriptor::int())),
                ("name", FieldSpec::new(TypeDescriptor::string())),
            ],
            Some(Arc::clone(users)),
        ))
    }

    #[test]
    fn map_coerces_nests_and_renders() {
        let (users, posts) = catalog();
        let post = ValueObject::new(
            "Post",
            [
                ("id", FieldSpec::new(TypeDescriptor::int())),
                ("title", FieldSpec::new(TypeDescriptor::string()).render(|v| json!(format!("<{}>", v.as_str().unwrap_or_default())))),
                ("views", FieldSpec::new(TypeDescriptor::int())),
                ("author", FieldSpec::new(author_vo(&users))),
                ("tags", FieldSpec::new(TypeDescriptor::array(TypeDescriptor::string()))),
            ],
            Some(posts),
        );
        let out = post.map(&row(json!({
            "id": "3",
            "title": "hello",
            "views": null,
            "author": 1,
            "__author": {"id": 1, "name": "ann", "email": "x@y"},
            "tags": "[\"a\",\"b\"]",
            "extra": true,
        })));
        assert_eq!(
            Value::Object(out),
            json!({
                "id": 3,
                "title": "<hello>",
                "author": {"id": 1, "name": "ann"},
                "tags": ["a", "b"],
            })
        );
    }

    #[test]
    fn map_never_fails_on_missing_columns() {
        let vo = ValueObject::new("Empty", [("a", FieldSpec::new(TypeDescriptor::int()))], None);
        assert!(vo.map(&Row::new()).is_empty());
        assert_eq!(vo.collect(&[Row::new(), row(json!({"a": "1"}))]).len(), 2);
    }

    #[test]
    fn middleware_drops_unknown_columns_and_keeps_computed() {
        let (_, posts) = catalog();
        let vo = ValueObject::new(
            "PostSummary",
            [
                ("title", FieldSpec::new(TypeDescriptor::string())),
                ("headline", FieldSpec::new(TypeDescriptor::string()).column("title")),
                ("nonexistent", FieldSpec::new(TypeDescriptor::string())),
                ("score", FieldSpec::new(TypeDescriptor::int()).expression("views * 2")),
            ],
            Some(posts),
        );
        let q = vo.middleware(QueryOptions::new(), &QueryScope::new());
        assert_eq!(
            q.attributes,
            vec![
                Attribute::column("title"),
                Attribute::Column {
                    name: "title".into(),
                    alias: "headline".into()
                },
                Attribute::Computed {
                    expression: "views * 2".into(),
                    alias: "score".into()
                },
            ]
        );
    }

    #[test]
    fn middleware_without_entity_keeps_only_computed() {
        let vo = ValueObject::new(
            "Loose",
            [
                ("a", FieldSpec::new(TypeDescriptor::int())),
                ("b", FieldSpec::new(TypeDescriptor::int()).expression("1")),
            ],
            None,
        );
        let q = vo.middleware(QueryOptions::new(), &QueryScope::new());
        assert_eq!(q.attributes.len(), 1);
        assert_eq!(q.attributes[0].alias(), "b");
    }

    #[test]
    fn middleware_builds_include_and_routes_filters() {
        let (users, posts) = catalog();
        let vo = ValueObject::new(
            "Post",
            [
                ("title", FieldSpec::new(TypeDescriptor::string())),
                ("author", FieldSpec::new(author_vo(&users))),
            ],
            Some(posts),
        );
        let q = vo.middleware(
            QueryOptions::new().filter("title", "x").filter("author.name", "ann"),
            &QueryScope::new(),
        );
        assert_eq!(q.filters.len(), 1);
        assert_eq!(q.includes.len(), 1);
        let include = &q.includes[0];
        assert_eq!(include.alias, "__author");
        assert_eq!(include.entity.name(), "users");
        assert_eq!(include.options.filters.get("name"), Some(&json!("ann")));
        assert_eq!(
            include.options.attributes,
            vec![Attribute::column("id"), Attribute::column("name")]
        );
    }

    #[test]
    fn nested_reference_without_entity_is_silent() {
        let (_, posts) = catalog();
        let detached = Arc::new(ValueObject::new("Detached", [("id", FieldSpec::new(TypeDescriptor::int()))], None));
        let vo = ValueObject::new("Post", [("author", FieldSpec::new(detached))], Some(posts));
        let q = vo.middleware(QueryOptions::new(), &QueryScope::new());
        assert!(q.includes.is_empty());
        assert!(q.attributes.is_empty());
    }

    #[test]
    fn field_selection_and_dynamic_expressions() {
        let (users, _) = catalog();
        let vo = ValueObject::new(
            "User",
            [
                ("name", FieldSpec::new(TypeDescriptor::string())),
                ("email", FieldSpec::new(TypeDescriptor::string())),
                (
                    "mine",
                    FieldSpec::new(TypeDescriptor::boolean())
                        .dynamic_expression(|ctx| format!("id = {}", ctx.user.map(|u| u.id.to_string()).unwrap_or_default())),
                ),
            ],
            Some(users),
        )
        .with_hook(|attrs, filters, user| {
            if user.is_none() {
                attrs.retain(|a| a.alias() != "email");
                filters.insert("public".into(), json!(true));
            }
        });
        let me = AuthUser::new(9, ["member"]);
        let q = vo.middleware(QueryOptions::new(), &QueryScope::new().user(Some(&me)).fields("!name, id, bogus"));
        let aliases: Vec<&str> = q.attributes.iter().map(Attribute::alias).collect();
        assert_eq!(aliases, ["email", "mine", "id"]);
        assert!(matches!(&q.attributes[1], Attribute::Computed { expression, .. } if expression == "id = 9"));

        let anon = vo.middleware(QueryOptions::new(), &QueryScope::new());
        let aliases: Vec<&str> = anon.attributes.iter().map(Attribute::alias).collect();
        assert_eq!(aliases, ["name", "mine"]);
        assert_eq!(anon.filters.get("public"), Some(&json!(true)));
    }

    #[test]
    fn existing_attributes_come_first_and_dedupe() {
        let (users, _) = catalog();
        let vo = ValueObject::new("User", [("name", FieldSpec::new(TypeDescriptor::string()))], Some(users));
        let mut q = QueryOptions::new();
        q.attributes.push(Attribute::column("id"));
        q.attributes.push(Attribute::column("name"));
        let q = vo.middleware(q, &QueryScope::new().fields("*"));
        let aliases: Vec<&str> = q.attributes.iter().map(Attribute::alias).collect();
        assert_eq!(aliases, ["id", "name", "email", "created_at", "updated_at"]);
    }

    #[test]
    fn doc_schema_lists_fields_and_refs() {
        let (users, _) = catalog();
        let author = author_vo(&users);
        let vo = ValueObject::new(
            "Post",
            [
                ("title", FieldSpec::new(TypeDescriptor::string()).required().comment("headline")),
                ("author", FieldSpec::new(&author)),
            ],
            None,
        );
        let schema = vo.doc_schema();
        assert_eq!(schema["properties"]["title"]["description"], json!("headline"));
        assert_eq!(schema["properties"]["author"], json!({"$ref": "#/components/schemas/Author"}));
        assert_eq!(schema["required"], json!(["title"]));
    }
}
