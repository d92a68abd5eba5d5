//! Field declarations of value objects and route parameters.

use crate::auth::AuthUser;
use crate::dto::query::Row;
use crate::types::{FieldType, TypeDescriptor};
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;

/// What a dynamic query expression sees when it is expanded.
pub struct ExpressionContext<'a> {
    pub user: Option<&'a AuthUser>,
    /// Path-qualified association the expression is projected under, e.g. `__author.__company`.
    pub association: Option<&'a str>,
    pub params: &'a Row,
}

pub type ExpressionFn = Arc<dyn Fn(&ExpressionContext<'_>) -> String + Send + Sync>;

/// Output transform applied after coercion and nesting.
pub type RenderFn = Arc<dyn Fn(Value) -> Value + Send + Sync>;

/// Raw query expression projected as a computed column.
#[derive(Clone)]
pub enum Expression {
    Raw(String),
    Dynamic(ExpressionFn),
}

impl Expression {
    pub fn expand(&self, ctx: &ExpressionContext<'_>) -> String {
        match self {
            Expression::Raw(sql) => sql.clone(),
            Expression::Dynamic(f) => f(ctx),
        }
    }
}

impl fmt::Debug for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Raw(sql) => f.debug_tuple("Raw").field(sql).finish(),
            Expression::Dynamic(_) => f.write_str("Dynamic(..)"),
        }
    }
}

#[derive(Clone)]
pub struct FieldSpec {
    pub ty: FieldType,
    pub comment: Option<String>,
    pub default_value: Option<Value>,
    pub required: bool,
    /// Column read for this field when it differs from the field name.
    pub column: Option<String>,
    pub expression: Option<Expression>,
    pub render: Option<RenderFn>,
}

impl FieldSpec {
    pub fn new(ty: impl Into<FieldType>) -> Self {
        FieldSpec {
            ty: ty.into(),
            comment: None,
            default_value: None,
            required: false,
            column: None,
            expression: None,
            render: None,
        }
    }

    pub fn comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn default_value(mut self, value: Value) -> Self {
        self.default_value = Some(value);
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn column(mut self, column: impl Into<String>) -> Self {
        self.column = Some(column.into());
        self
    }

    pub fn expression(mut self, sql: impl Into<String>) -> Self {
        self.expression = Some(Expression::Raw(sql.into()));
        self
    }

    pub fn dynamic_expression<F>(mut self, f: F) -> Self
    where
        F: Fn(&ExpressionContext<'_>) -> String + Send + Sync + 'static,
    {
        self.expression = Some(Expression::Dynamic(Arc::new(f)));
        self
    }

    pub fn render<F>(mut self, f: F) -> Self
    where
        F: Fn(Value) -> Value + Send + Sync + 'static,
    {
        self.render = Some(Arc::new(f));
        self
    }

    /// Nested value object of this field, directly or as the element type of an array.
    pub(crate) fn nested(&self) -> Option<&Arc<crate::dto::ValueObject>> {
        match &self.ty {
            FieldType::Reference(vo) => Some(vo),
            FieldType::Scalar(TypeDescriptor::Array(inner)) => inner.reference(),
            FieldType::Scalar(_) => None,
        }
    }

    pub fn to_doc_schema(&self) -> Value {
        let mut schema = self.ty.to_doc_schema();
        if let (Some(obj), FieldType::Scalar(_)) = (schema.as_object_mut(), &self.ty) {
            if let Some(comment) = &self.comment {
                obj.insert("description".into(), json!(comment));
            }
            if let Some(default) = &self.default_value {
                obj.insert("default".into(), default.clone());
            }
        }
        schema
    }
}

impl fmt::Debug for FieldSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldSpec")
            .field("ty", &self.ty)
            .field("required", &self.required)
            .field("column", &self.column)
            .field("expression", &self.expression)
            .field("render", &self.render.is_some())
            .finish()
    }
}

impl From<TypeDescriptor> for FieldSpec {
    fn from(t: TypeDescriptor) -> Self {
        FieldSpec::new(t)
    }
}

impl From<FieldType> for FieldSpec {
    fn from(t: FieldType) -> Self {
        FieldSpec::new(t)
    }
}

impl From<Arc<crate::dto::ValueObject>> for FieldSpec {
    fn from(vo: Arc<crate::dto::ValueObject>) -> Self {
        FieldSpec::new(vo)
    }
}

impl From<&Arc<crate::dto::ValueObject>> for FieldSpec {
    fn from(vo: &Arc<crate::dto::ValueObject>) -> Self {
        FieldSpec::new(vo)
    }
}
