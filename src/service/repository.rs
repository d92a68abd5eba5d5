//! Repository capability bound to one storage transaction.

use crate::dto::{Attribute, Filters, QueryOptions, QueryScope, Row, ValueObject};
use crate::entity::Entity;
use crate::error::{AppError, ConfigError};
use crate::secure::FieldCipher;
use crate::service::paging::{Page, PageRequest};
use crate::store::Transaction;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Storage operations run inside the transaction the repository was opened with.
///
/// Clones share the transaction. Calls are serialized on it; once the owner commits or
/// rolls back, every clone fails with [`AppError::TransactionClosed`].
#[derive(Clone)]
pub struct Repository {
    tx: Arc<Mutex<Option<Box<dyn Transaction>>>>,
    cipher: Arc<FieldCipher>,
}

impl Repository {
    pub(crate) fn new(tx: Box<dyn Transaction>, cipher: Arc<FieldCipher>) -> Self {
        Repository {
            tx: Arc::new(Mutex::new(Some(tx))),
            cipher,
        }
    }

    pub async fn find_many(&self, entity: &Entity, options: QueryOptions) -> Result<Vec<Row>, AppError> {
        let options = self.seal_filters(entity, options)?;
        let mut guard = self.tx.lock().await;
        let tx = guard.as_mut().ok_or(AppError::TransactionClosed)?;
        let mut rows = tx.select(entity, &options).await?;
        for row in &mut rows {
            self.open_tree(entity, &options, row)?;
        }
        Ok(rows)
    }

    pub async fn find_one(&self, entity: &Entity, options: QueryOptions) -> Result<Option<Row>, AppError> {
        let rows = self.find_many(entity, options.limit(1)).await?;
        Ok(rows.into_iter().next())
    }

    /// `find_many` through the value object's projection, mapped to its fields.
    pub async fn export_many(
        &self,
        vo: &ValueObject,
        options: QueryOptions,
        scope: &QueryScope<'_>,
    ) -> Result<Vec<Row>, AppError> {
        let entity = backing_entity(vo)?;
        let rows = self.find_many(entity, vo.middleware(options, scope)).await?;
        Ok(vo.collect(&rows))
    }

    /// `find_one` through the value object's projection, mapped to its fields.
    pub async fn export_one(
        &self,
        vo: &ValueObject,
        options: QueryOptions,
        scope: &QueryScope<'_>,
    ) -> Result<Option<Row>, AppError> {
        let entity = backing_entity(vo)?;
        let row = self.find_one(entity, vo.middleware(options, scope)).await?;
        Ok(row.map(|r| vo.map(&r)))
    }

    /// Rows of the requested window plus the total under the same filters.
    pub async fn find_and_count(&self, entity: &Entity, options: QueryOptions) -> Result<(Vec<Row>, u64), AppError> {
        let total = self.count(entity, options.clone()).await?;
        let rows = self.find_many(entity, options).await?;
        Ok((rows, total))
    }

    pub async fn paginate(
        &self,
        entity: &Entity,
        options: QueryOptions,
        request: &PageRequest,
    ) -> Result<Page<Row>, AppError> {
        let options = options
            .order_by(request.sort.clone(), request.dir)
            .limit(request.limit)
            .offset(request.offset());
        let (rows, total) = self.find_and_count(entity, options).await?;
        Ok(Page::new(rows, request, total))
    }

    /// `paginate` through the value object's projection, items mapped to its fields.
    pub async fn paginate_as(
        &self,
        vo: &ValueObject,
        options: QueryOptions,
        request: &PageRequest,
        scope: &QueryScope<'_>,
    ) -> Result<Page<Row>, AppError> {
        let entity = backing_entity(vo)?;
        let page = self.paginate(entity, vo.middleware(options, scope), request).await?;
        Ok(page.map(|r| vo.map(&r)))
    }

    pub async fn count(&self, entity: &Entity, options: QueryOptions) -> Result<u64, AppError> {
        let options = self.seal_filters(entity, options)?;
        let mut guard = self.tx.lock().await;
        let tx = guard.as_mut().ok_or(AppError::TransactionClosed)?;
        tx.count(entity, &options).await
    }

    pub async fn create(&self, entity: &Entity, mut values: Row) -> Result<Row, AppError> {
        self.cipher.seal_row(entity, &mut values)?;
        let mut guard = self.tx.lock().await;
        let tx = guard.as_mut().ok_or(AppError::TransactionClosed)?;
        let mut created = tx.insert(entity, &values).await?;
        self.cipher.open_row(entity, &mut created)?;
        Ok(created)
    }

    /// Write back a loaded row, matched by primary key, refreshing `updated_at`. Returns the
    /// stored row.
    pub async fn save(&self, entity: &Entity, row: &Row) -> Result<Row, AppError> {
        let key = primary_key_filter(entity, row)?;
        let mut values = row.clone();
        values.remove("updated_at");
        let updated = self.update_all(entity, key.clone(), values).await?;
        if updated == 0 {
            return Err(AppError::NotFound(format!("{} row", entity.name())));
        }
        self.find_one(entity, QueryOptions::new().filters(key))
            .await?
            .ok_or_else(|| AppError::NotFound(format!("{} row", entity.name())))
    }

    /// Delete one loaded row, matched by primary key.
    pub async fn destroy(&self, entity: &Entity, row: &Row) -> Result<u64, AppError> {
        let key = primary_key_filter(entity, row)?;
        self.destroy_all(entity, key).await
    }

    /// Delete every row matching `filters`; empty filters delete the whole table.
    pub async fn destroy_all(&self, entity: &Entity, filters: Filters) -> Result<u64, AppError> {
        let filters = self.seal_filter_map(entity, filters)?;
        let mut guard = self.tx.lock().await;
        let tx = guard.as_mut().ok_or(AppError::TransactionClosed)?;
        tx.delete(entity, &filters).await
    }

    pub async fn update_all(&self, entity: &Entity, filters: Filters, mut values: Row) -> Result<u64, AppError> {
        let filters = self.seal_filter_map(entity, filters)?;
        self.cipher.seal_row(entity, &mut values)?;
        let mut guard = self.tx.lock().await;
        let tx = guard.as_mut().ok_or(AppError::TransactionClosed)?;
        tx.update(entity, &filters, &values).await
    }

    pub(crate) async fn commit(&self) -> Result<(), AppError> {
        let tx = self.tx.lock().await.take().ok_or(AppError::TransactionClosed)?;
        tx.commit().await
    }

    pub(crate) async fn rollback(&self) -> Result<(), AppError> {
        let tx = self.tx.lock().await.take().ok_or(AppError::TransactionClosed)?;
        tx.rollback().await
    }

    fn seal_filter_map(&self, entity: &Entity, mut filters: Filters) -> Result<Filters, AppError> {
        check_filter_keys(entity, &filters)?;
        self.cipher.seal_row(entity, &mut filters)?;
        Ok(filters)
    }

    fn seal_filters(&self, entity: &Entity, mut options: QueryOptions) -> Result<QueryOptions, AppError> {
        check_filter_keys(entity, &options.filters)?;
        self.cipher.seal_row(entity, &mut options.filters)?;
        for inc in &mut options.includes {
            let nested = std::mem::take(&mut inc.options);
            inc.options = self.seal_filters(&inc.entity, nested)?;
        }
        Ok(options)
    }

    /// Decrypt secure columns of a fetched row and of its joined rows, under their aliases.
    fn open_tree(&self, entity: &Entity, options: &QueryOptions, row: &mut Row) -> Result<(), AppError> {
        if options.attributes.is_empty() {
            self.cipher.open_row(entity, row)?;
        } else {
            let aliases = options.attributes.iter().filter_map(|a| match a {
                Attribute::Column { name, alias } if entity.column(name).is_some_and(|c| c.secure) => {
                    Some(alias.as_str())
                }
                _ => None,
            });
            self.cipher.open_fields(row, aliases)?;
        }
        for inc in &options.includes {
            match row.get_mut(&inc.alias) {
                Some(Value::Object(joined)) => self.open_tree(&inc.entity, &inc.options, joined)?,
                Some(Value::Array(items)) => {
                    for item in items {
                        if let Value::Object(joined) = item {
                            self.open_tree(&inc.entity, &inc.options, joined)?;
                        }
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }
}

/// Every filter key must name a column of `entity`.
fn check_filter_keys(entity: &Entity, filters: &Filters) -> Result<(), AppError> {
    match filters.keys().find(|key| entity.column(key).is_none()) {
        Some(key) => Err(AppError::BadRequest(format!(
            "unknown filter '{}' on {}",
            key,
            entity.name()
        ))),
        None => Ok(()),
    }
}

fn backing_entity(vo: &ValueObject) -> Result<&Entity, AppError> {
    vo.entity().map(|e| e.as_ref()).ok_or_else(|| {
        AppError::Config(ConfigError::MissingReference {
            kind: "entity of value object",
            id: vo.name().to_string(),
        })
    })
}

fn primary_key_filter(entity: &Entity, row: &Row) -> Result<Filters, AppError> {
    let pk = entity
        .primary_key()
        .ok_or_else(|| AppError::BadRequest(format!("{} has no primary key", entity.name())))?;
    let value = row
        .get(pk)
        .filter(|v| !v.is_null())
        .ok_or_else(|| AppError::BadRequest(format!("row of {} has no '{}'", entity.name(), pk)))?;
    let mut filters = Filters::new();
    filters.insert(pk.to_string(), value.clone());
    Ok(filters)
}
