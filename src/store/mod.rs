//! Storage collaborator seam: one transaction per repository invocation.
//!
//! A transaction handle serializes its own operations (`&mut self`); issuing work from
//! several tasks against one handle is the caller's problem to avoid.

mod memory;
mod pg;

pub use memory::MemoryStorage;
pub use pg::{ensure_database_exists, PgStorage};

use crate::dto::{Filters, QueryOptions, Row};
use crate::entity::Entity;
use crate::error::AppError;
use async_trait::async_trait;
use std::sync::Arc;

#[async_trait]
pub trait Storage: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn Transaction>, AppError>;

    /// Create missing tables for `entities`. Existing tables are left untouched.
    async fn sync(&self, entities: &[Arc<Entity>]) -> Result<(), AppError>;
}

#[async_trait]
pub trait Transaction: Send {
    async fn select(&mut self, entity: &Entity, options: &QueryOptions) -> Result<Vec<Row>, AppError>;

    /// Rows matching the filters (and filtered includes) of `options`; projection, order and
    /// paging are ignored.
    async fn count(&mut self, entity: &Entity, options: &QueryOptions) -> Result<u64, AppError>;

    /// Returns the stored row, defaults and generated keys included.
    async fn insert(&mut self, entity: &Entity, row: &Row) -> Result<Row, AppError>;

    async fn update(&mut self, entity: &Entity, filters: &Filters, row: &Row) -> Result<u64, AppError>;

    async fn delete(&mut self, entity: &Entity, filters: &Filters) -> Result<u64, AppError>;

    async fn commit(self: Box<Self>) -> Result<(), AppError>;

    async fn rollback(self: Box<Self>) -> Result<(), AppError>;
}
