//! Field kinds and their three projections: documentation schema, storage column type, coercion.

use crate::dto::ValueObject;
use crate::error::ConfigError;
use crate::types::coerce::{coerce_bool, coerce_enum, coerce_float, coerce_int, coerce_string, Coerced};
use crate::types::StorageType;
use serde_json::{json, Value};
use std::sync::Arc;

/// Default `VARCHAR` length for the string kinds when none is given.
pub const DEFAULT_STRING_LENGTH: u32 = 255;

/// One scalar or composite wire/storage kind.
///
/// Enum and array descriptors carry their construction arguments; build a new one rather
/// than sharing when those differ.
#[derive(Clone, Debug, PartialEq)]
pub enum TypeDescriptor {
    Int,
    Long,
    Float,
    Double,
    String { length: u32 },
    Text,
    Password { length: u32 },
    Enum(Vec<String>),
    Json,
    Base64,
    Binary,
    Boolean,
    DateOnly,
    DateTime,
    Array(Box<FieldType>),
    /// Response-only page envelope around a list of the inner type.
    Paging(Box<FieldType>),
}

impl TypeDescriptor {
    pub fn int() -> Self {
        TypeDescriptor::Int
    }

    pub fn long() -> Self {
        TypeDescriptor::Long
    }

    pub fn float() -> Self {
        TypeDescriptor::Float
    }

    pub fn double() -> Self {
        TypeDescriptor::Double
    }

    pub fn string() -> Self {
        TypeDescriptor::String {
            length: DEFAULT_STRING_LENGTH,
        }
    }

    pub fn string_len(length: u32) -> Self {
        TypeDescriptor::String { length }
    }

    pub fn text() -> Self {
        TypeDescriptor::Text
    }

    pub fn password() -> Self {
        TypeDescriptor::Password {
            length: DEFAULT_STRING_LENGTH,
        }
    }

    pub fn enumeration<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        TypeDescriptor::Enum(values.into_iter().map(Into::into).collect())
    }

    pub fn json() -> Self {
        TypeDescriptor::Json
    }

    pub fn base64() -> Self {
        TypeDescriptor::Base64
    }

    pub fn binary() -> Self {
        TypeDescriptor::Binary
    }

    pub fn boolean() -> Self {
        TypeDescriptor::Boolean
    }

    pub fn date_only() -> Self {
        TypeDescriptor::DateOnly
    }

    pub fn date_time() -> Self {
        TypeDescriptor::DateTime
    }

    pub fn array(inner: impl Into<FieldType>) -> Self {
        TypeDescriptor::Array(Box::new(inner.into()))
    }

    pub fn paging(inner: impl Into<FieldType>) -> Self {
        TypeDescriptor::Paging(Box::new(inner.into()))
    }

    pub fn name(&self) -> &'static str {
        match self {
            TypeDescriptor::Int => "int",
            TypeDescriptor::Long => "long",
            TypeDescriptor::Float => "float",
            TypeDescriptor::Double => "double",
            TypeDescriptor::String { .. } => "string",
            TypeDescriptor::Text => "text",
            TypeDescriptor::Password { .. } => "password",
            TypeDescriptor::Enum(_) => "enum",
            TypeDescriptor::Json => "json",
            TypeDescriptor::Base64 => "base64",
            TypeDescriptor::Binary => "binary",
            TypeDescriptor::Boolean => "boolean",
            TypeDescriptor::DateOnly => "date",
            TypeDescriptor::DateTime => "datetime",
            TypeDescriptor::Array(_) => "array",
            TypeDescriptor::Paging(_) => "paging",
        }
    }

    pub fn to_doc_schema(&self) -> Value {
        match self {
            TypeDescriptor::Int => json!({ "type": "integer", "format": "int32" }),
            TypeDescriptor::Long => json!({ "type": "integer", "format": "int64" }),
            TypeDescriptor::Float => json!({ "type": "number", "format": "float" }),
            TypeDescriptor::Double => json!({ "type": "number", "format": "double" }),
            TypeDescriptor::String { .. } | TypeDescriptor::Text => json!({ "type": "string" }),
            TypeDescriptor::Password { .. } => json!({ "type": "string", "format": "password" }),
            TypeDescriptor::Enum(values) => json!({
                "type": "string",
                "enum": values,
                "example": values.first(),
            }),
            TypeDescriptor::Json => json!({ "type": "object" }),
            TypeDescriptor::Base64 => json!({ "type": "string", "format": "byte" }),
            TypeDescriptor::Binary => json!({ "type": "string", "format": "binary" }),
            TypeDescriptor::Boolean => json!({ "type": "boolean" }),
            TypeDescriptor::DateOnly => json!({ "type": "string", "format": "date" }),
            TypeDescriptor::DateTime => json!({ "type": "string", "format": "date-time" }),
            TypeDescriptor::Array(inner) => json!({ "type": "array", "items": inner.to_doc_schema() }),
            TypeDescriptor::Paging(inner) => json!({
                "type": "object",
                "properties": {
                    "items": { "type": "array", "items": inner.to_doc_schema() },
                    "page": { "type": "integer", "format": "int64" },
                    "page_size": { "type": "integer", "format": "int64" },
                    "max_page": { "type": "integer", "format": "int64" },
                    "has_prev": { "type": "boolean" },
                    "has_next": { "type": "boolean" },
                    "total_elements": { "type": "integer", "format": "int64" },
                },
            }),
        }
    }

    /// Column type for this kind. Paging envelopes are never persisted.
    pub fn to_storage_type(&self) -> Result<StorageType, ConfigError> {
        Ok(match self {
            TypeDescriptor::Int => StorageType::Integer,
            TypeDescriptor::Long => StorageType::BigInt,
            TypeDescriptor::Float => StorageType::Float,
            TypeDescriptor::Double => StorageType::Double,
            TypeDescriptor::String { length } | TypeDescriptor::Password { length } => StorageType::Varchar(*length),
            TypeDescriptor::Text | TypeDescriptor::Base64 => StorageType::Text,
            TypeDescriptor::Enum(values) => StorageType::Enum(values.clone()),
            TypeDescriptor::Json | TypeDescriptor::Array(_) => StorageType::Json,
            TypeDescriptor::Binary => StorageType::Blob,
            TypeDescriptor::Boolean => StorageType::Boolean,
            TypeDescriptor::DateOnly => StorageType::Date,
            TypeDescriptor::DateTime => StorageType::Timestamp,
            TypeDescriptor::Paging(_) => return Err(ConfigError::NotStorable(self.name())),
        })
    }

    /// Whether this kind defines a coercion; the others pass values through as opaque.
    pub fn has_coercion(&self) -> bool {
        matches!(
            self,
            TypeDescriptor::Int
                | TypeDescriptor::Long
                | TypeDescriptor::Float
                | TypeDescriptor::Double
                | TypeDescriptor::String { .. }
                | TypeDescriptor::Text
                | TypeDescriptor::Password { .. }
                | TypeDescriptor::Enum(_)
                | TypeDescriptor::Boolean
        )
    }

    /// Convert an untyped value into the canonical runtime value. Idempotent; `null` is `Missing`
    /// for every coercing kind.
    pub fn coerce(&self, raw: &Value) -> Coerced {
        match self {
            TypeDescriptor::Int | TypeDescriptor::Long => coerce_int(raw),
            TypeDescriptor::Float | TypeDescriptor::Double => coerce_float(raw),
            TypeDescriptor::String { .. } | TypeDescriptor::Text | TypeDescriptor::Password { .. } => {
                coerce_string(raw)
            }
            TypeDescriptor::Enum(values) => coerce_enum(raw, values),
            TypeDescriptor::Boolean => coerce_bool(raw),
            _ => Coerced::Value(raw.clone()),
        }
    }
}

/// A field's type: a scalar/composite descriptor or a reference to a registered value object.
#[derive(Clone, Debug)]
pub enum FieldType {
    Scalar(TypeDescriptor),
    Reference(Arc<ValueObject>),
}

impl FieldType {
    pub fn name(&self) -> &'static str {
        match self {
            FieldType::Scalar(t) => t.name(),
            FieldType::Reference(_) => "dto",
        }
    }

    pub fn to_doc_schema(&self) -> Value {
        match self {
            FieldType::Scalar(t) => t.to_doc_schema(),
            FieldType::Reference(vo) => json!({ "$ref": format!("#/components/schemas/{}", vo.name()) }),
        }
    }

    /// Fails for value-object references: a nested DTO is not a column type.
    pub fn to_storage_type(&self) -> Result<StorageType, ConfigError> {
        match self {
            FieldType::Scalar(t) => t.to_storage_type(),
            FieldType::Reference(_) => Err(ConfigError::NotStorable(self.name())),
        }
    }

    pub fn scalar(&self) -> Option<&TypeDescriptor> {
        match self {
            FieldType::Scalar(t) => Some(t),
            FieldType::Reference(_) => None,
        }
    }

    pub fn reference(&self) -> Option<&Arc<ValueObject>> {
        match self {
            FieldType::Reference(vo) => Some(vo),
            FieldType::Scalar(_) => None,
        }
    }
}

impl PartialEq for FieldType {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (FieldType::Scalar(a), FieldType::Scalar(b)) => a == b,
            (FieldType::Reference(a), FieldType::Reference(b)) => a.name() == b.name(),
            _ => false,
        }
    }
}

impl From<TypeDescriptor> for FieldType {
    fn from(t: TypeDescriptor) -> Self {
        FieldType::Scalar(t)
    }
}

impl From<Arc<ValueObject>> for FieldType {
    fn from(vo: Arc<ValueObject>) -> Self {
        FieldType::Reference(vo)
    }
}

impl From<&Arc<ValueObject>> for FieldType {
    fn from(vo: &Arc<ValueObject>) -> Self {
        FieldType::Reference(Arc::clone(vo))
    }
}
