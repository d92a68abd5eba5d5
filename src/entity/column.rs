//! Column declarations: what the caller writes, and what a finalized entity holds.

use crate::entity::EntityId;
use crate::types::{FieldType, StorageType};
use serde_json::Value;

/// One declared column of an entity.
#[derive(Clone, Debug)]
pub struct ColumnSpec {
    pub ty: FieldType,
    pub comment: Option<String>,
    pub default_value: Option<Value>,
    pub required: bool,
    pub unique: bool,
    pub primary_key: bool,
    pub auto_increment: bool,
    /// Belongs-to target; resolved into an association once every entity is declared.
    pub connect_to: Option<EntityId>,
    /// Also give the target a has-many association back to this entity.
    pub reverse_define: bool,
    /// Stored encrypted, decrypted transparently on read.
    pub secure: bool,
}

impl ColumnSpec {
    pub fn new(ty: impl Into<FieldType>) -> Self {
        ColumnSpec {
            ty: ty.into(),
            comment: None,
            default_value: None,
            required: false,
            unique: false,
            primary_key: false,
            auto_increment: false,
            connect_to: None,
            reverse_define: false,
            secure: false,
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

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }

    pub fn connect_to(mut self, target: &EntityId) -> Self {
        self.connect_to = Some(target.clone());
        self
    }

    pub fn reverse_define(mut self) -> Self {
        self.reverse_define = true;
        self
    }

    pub fn secure(mut self) -> Self {
        self.secure = true;
        self
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ColumnDefault {
    Value(Value),
    /// Current timestamp at insert time.
    Now,
}

/// Finalized column of an entity.
#[derive(Clone, Debug)]
pub struct Column {
    pub name: String,
    pub storage: StorageType,
    pub nullable: bool,
    pub primary_key: bool,
    pub auto_increment: bool,
    pub unique: bool,
    pub default: Option<ColumnDefault>,
    pub comment: Option<String>,
    pub secure: bool,
}

impl Column {
    pub(crate) fn generated_id() -> Self {
        Column {
            name: "id".into(),
            storage: StorageType::Integer,
            nullable: false,
            primary_key: true,
            auto_increment: true,
            unique: false,
            default: None,
            comment: Some("unique key".into()),
            secure: false,
        }
    }

    pub(crate) fn timestamp(name: &str, comment: &str) -> Self {
        Column {
            name: name.into(),
            storage: StorageType::Timestamp,
            nullable: false,
            primary_key: false,
            auto_increment: false,
            unique: false,
            default: Some(ColumnDefault::Now),
            comment: Some(comment.into()),
            secure: false,
        }
    }

    /// Whether an insert may omit this column.
    pub fn has_default(&self) -> bool {
        self.auto_increment || self.default.is_some()
    }
}
