//! Entity (table) definitions and their associations.

use crate::entity::column::{Column, ColumnSpec};
use crate::error::ConfigError;
use crate::types::{FieldType, StorageType};

/// Handle returned at declaration time, before associations are resolved.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct EntityId(pub(crate) String);

impl EntityId {
    /// Placeholder for an entity declared later; checked by `finalize_associations`.
    pub fn named(name: impl Into<String>) -> Self {
        EntityId(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

/// Alias under which an association's row is joined: field `x` joins as `__x`.
pub fn association_alias(field: &str) -> String {
    format!("__{}", field)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AssociationKind {
    /// This entity holds the foreign key (`local_key`) to the target's `target_key`.
    BelongsTo,
    /// The target holds the foreign key (`target_key`) back to this entity's `local_key`.
    HasMany,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Association {
    pub alias: String,
    pub kind: AssociationKind,
    pub target: String,
    pub local_key: String,
    pub target_key: String,
}

/// Declaration of one table: columns plus the generated `id`/`created_at`/`updated_at` columns on request.
#[derive(Clone, Debug)]
pub struct EntityBuilder {
    pub(crate) name: String,
    pub(crate) columns: Vec<(String, ColumnSpec)>,
    pub(crate) with_id: bool,
    pub(crate) with_created_at: bool,
    pub(crate) with_updated_at: bool,
}

impl EntityBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        EntityBuilder {
            name: name.into(),
            columns: Vec::new(),
            with_id: false,
            with_created_at: false,
            with_updated_at: false,
        }
    }

    pub fn column(mut self, name: impl Into<String>, spec: ColumnSpec) -> Self {
        self.columns.push((name.into(), spec));
        self
    }

    pub fn with_id(mut self) -> Self {
        self.with_id = true;
        self
    }

    pub fn with_created_at(mut self) -> Self {
        self.with_created_at = true;
        self
    }

    pub fn with_updated_at(mut self) -> Self {
        self.with_updated_at = true;
        self
    }

    /// `id`, `created_at` and `updated_at`.
    pub fn with_all(self) -> Self {
        self.with_id().with_created_at().with_updated_at()
    }

    /// Column list in table order. Value-object typed columns are stored as JSON, secure
    /// strings as TEXT.
    pub(crate) fn build_columns(&self) -> Result<Vec<Column>, ConfigError> {
        let mut out = Vec::with_capacity(self.columns.len() + 3);
        if self.with_id {
            out.push(Column::generated_id());
        }
        for (name, spec) in &self.columns {
            let storage = match &spec.ty {
                FieldType::Reference(_) => StorageType::Json,
                FieldType::Scalar(t) => match t.to_storage_type()? {
                    StorageType::Varchar(_) if spec.secure => StorageType::Text,
                    other => other,
                },
            };
            out.push(Column {
                name: name.clone(),
                storage,
                nullable: !spec.required,
                primary_key: spec.primary_key,
                auto_increment: spec.auto_increment,
                unique: spec.unique,
                default: spec.default_value.clone().map(crate::entity::ColumnDefault::Value),
                comment: spec.comment.clone(),
                secure: spec.secure,
            });
        }
        if self.with_created_at {
            out.push(Column::timestamp("created_at", "created at"));
        }
        if self.with_updated_at {
            out.push(Column::timestamp("updated_at", "updated at"));
        }
        Ok(out)
    }
}

/// A finalized table definition.
#[derive(Clone, Debug)]
pub struct Entity {
    pub(crate) name: String,
    pub(crate) columns: Vec<Column>,
    pub(crate) associations: Vec<Association>,
}

impl Entity {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    pub fn attribute_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub fn primary_key(&self) -> Option<&str> {
        self.columns.iter().find(|c| c.primary_key).map(|c| c.name.as_str())
    }

    /// Columns flagged secure, in table order.
    pub fn secure_fields(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().filter(|c| c.secure).map(|c| c.name.as_str())
    }

    pub fn associations(&self) -> &[Association] {
        &self.associations
    }

    pub fn association(&self, alias: &str) -> Option<&Association> {
        self.associations.iter().find(|a| a.alias == alias)
    }
}
