//! Persistence-layer table definitions.

mod catalog;
mod column;
mod model;

pub use catalog::EntityCatalog;
pub use column::{Column, ColumnDefault, ColumnSpec};
pub use model::{association_alias, Association, AssociationKind, Entity, EntityBuilder, EntityId};
