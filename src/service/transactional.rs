//! Run business functions inside one storage transaction.

use crate::error::AppError;
use crate::secure::FieldCipher;
use crate::service::Repository;
use crate::store::Storage;
use std::future::Future;
use std::sync::Arc;

/// Opens transactions on a storage backend and hands each business function a
/// [`Repository`] bound to its own transaction.
#[derive(Clone)]
pub struct Transactional {
    storage: Arc<dyn Storage>,
    cipher: Arc<FieldCipher>,
}

impl Transactional {
    pub fn new(storage: Arc<dyn Storage>, cipher: Arc<FieldCipher>) -> Self {
        Transactional { storage, cipher }
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// Open a transaction. The caller owns it; dropping the repository without
    /// committing discards the work.
    pub async fn begin(&self) -> Result<Repository, AppError> {
        let tx = self.storage.begin().await?;
        Ok(Repository::new(tx, Arc::clone(&self.cipher)))
    }

    /// Run `f` in a fresh transaction: commit when it returns `Ok`, roll back when it returns
    /// `Err`. The function's error is returned as is.
    pub async fn run<F, Fut, T, E>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(Repository) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<AppError>,
    {
        let repo = self.begin().await?;
        match f(repo.clone()).await {
            Ok(value) => {
                repo.commit().await?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback) = repo.rollback().await {
                    tracing::warn!(error = %rollback, "rollback failed");
                }
                Err(e)
            }
        }
    }

    /// Turn `f` into a callable that owns a transaction per call, or joins one it is given.
    pub fn wrap<F>(&self, f: F) -> Wrapped<F> {
        Wrapped { tx: self.clone(), f }
    }
}

/// A business function bound to a [`Transactional`].
#[derive(Clone)]
pub struct Wrapped<F> {
    tx: Transactional,
    f: F,
}

impl<F> Wrapped<F> {
    /// Call in a new transaction, committed or rolled back on return.
    pub async fn call<A, Fut, T, E>(&self, args: A) -> Result<T, E>
    where
        F: Fn(Repository, A) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<AppError>,
    {
        self.tx.run(|repo| (self.f)(repo, args)).await
    }

    /// Call inside the caller's transaction. Commit and rollback stay with the caller.
    ///
    /// Calling [`Wrapped::call`] from inside another transaction instead opens a second one;
    /// on backends that serialize transactions (the in-memory store) that waits forever.
    pub async fn call_within<A, Fut>(&self, repo: &Repository, args: A) -> Fut::Output
    where
        F: Fn(Repository, A) -> Fut,
        Fut: Future,
    {
        (self.f)(repo.clone(), args).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dto::{QueryOptions, Row};
    use crate::entity::{ColumnSpec, Entity, EntityBuilder, EntityCatalog};
    use crate::store::MemoryStorage;
    use crate::types::TypeDescriptor;
    use axum::http::StatusCode;
    use serde_json::json;

    fn notes() -> Arc<Entity> {
        let mut catalog = EntityCatalog::new();
        let id = catalog
            .declare(
                EntityBuilder::new("notes")
                    .with_id()
                    .column("body", ColumnSpec::new(TypeDescriptor::string())),
            )
            .unwrap();
        catalog.finalize_associations().unwrap();
        catalog.get(&id).unwrap()
    }

    fn setup() -> (MemoryStorage, Transactional) {
        let store = MemoryStorage::new();
        let tx = Transactional::new(Arc::new(store.clone()), Arc::new(FieldCipher::new("k")));
        (store, tx)
    }

    fn body(text: &str) -> Row {
        json!({ "body": text }).as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn commits_on_success() {
        let (store, tx) = setup();
        let notes = notes();
        let created = tx
            .run(|repo| {
                let notes = Arc::clone(&notes);
                async move { repo.create(&notes, body("hi")).await }
            })
            .await
            .unwrap();
        assert_eq!(created["id"], json!(1));
        assert_eq!(store.rows("notes").await.len(), 1);
    }

    #[tokio::test]
    async fn rolls_back_and_returns_the_error_unchanged() {
        let (store, tx) = setup();
        let notes = notes();
        let err = tx
            .run(|repo| {
                let notes = Arc::clone(&notes);
                async move {
                    repo.create(&notes, body("lost")).await?;
                    Err::<(), _>(AppError::status(StatusCode::CONFLICT, "conflict"))
                }
            })
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
        assert!(store.rows("notes").await.is_empty());

        let fresh = tx.begin().await.unwrap();
        assert_eq!(fresh.count(&notes, QueryOptions::new()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn joined_calls_leave_the_outer_transaction_in_charge() {
        let (store, tx) = setup();
        let notes = notes();
        let target = Arc::clone(&notes);
        let add = tx.wrap(move |repo: Repository, text: String| {
            let notes = Arc::clone(&target);
            async move { repo.create(&notes, body(&text)).await }
        });
        add.call("one".to_string()).await.unwrap();

        let outer = tx.begin().await.unwrap();
        add.call_within(&outer, "two".to_string()).await.unwrap();
        assert_eq!(outer.count(&notes, QueryOptions::new()).await.unwrap(), 2);
        outer.rollback().await.unwrap();

        assert_eq!(store.rows("notes").await.len(), 1);
        assert!(matches!(
            outer.count(&notes, QueryOptions::new()).await,
            Err(AppError::TransactionClosed)
        ));
    }
}
