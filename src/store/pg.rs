//! PostgreSQL storage over a sqlx pool.

use crate::config::DatabaseOptions;
use crate::dto::{Filters, QueryOptions, Row};
use crate::entity::Entity;
use crate::error::AppError;
use crate::sql::{self, PgBindValue, QueryBuf};
use crate::store::{Storage, Transaction};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::{PgArguments, PgPoolOptions};
use sqlx::query::{Query, QueryScalar};
use sqlx::{ConnectOptions, PgPool, Postgres};
use std::str::FromStr;
use std::sync::Arc;

#[derive(Clone)]
pub struct PgStorage {
    pool: PgPool,
    /// Log statements at info instead of debug.
    debug: bool,
}

impl PgStorage {
    pub fn new(pool: PgPool) -> Self {
        PgStorage { pool, debug: false }
    }

    pub async fn connect(options: &DatabaseOptions) -> Result<Self, AppError> {
        let pool = PgPoolOptions::new()
            .max_connections(options.max_connections)
            .connect(&options.url)
            .await?;
        Ok(PgStorage {
            pool,
            debug: options.debug,
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Storage for PgStorage {
    async fn begin(&self) -> Result<Box<dyn Transaction>, AppError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTransaction { tx, debug: self.debug }))
    }

    async fn sync(&self, entities: &[Arc<Entity>]) -> Result<(), AppError> {
        for entity in entities {
            let mut statements = sql::create_table(entity).into_iter();
            if let Some(create) = statements.next() {
                sqlx::query(&create).execute(&self.pool).await?;
            }
            for comment in statements {
                if let Err(e) = sqlx::query(&comment).execute(&self.pool).await {
                    tracing::warn!(entity = %entity.name(), error = %e, "column comment failed");
                }
            }
            tracing::info!(entity = %entity.name(), "table synced");
        }
        for entity in entities {
            for fk in sql::foreign_keys(entity) {
                sqlx::query(&fk).execute(&self.pool).await?;
            }
        }
        Ok(())
    }
}

struct PgTransaction {
    tx: sqlx::Transaction<'static, Postgres>,
    debug: bool,
}

impl PgTransaction {
    fn log(&self, q: &QueryBuf) {
        if self.debug {
            tracing::info!(sql = %q.sql, params = ?q.params, "query");
        } else {
            tracing::debug!(sql = %q.sql, params = ?q.params, "query");
        }
    }
}

fn bind_all<'q>(mut query: Query<'q, Postgres, PgArguments>, params: &[Value]) -> Query<'q, Postgres, PgArguments> {
    for p in params {
        query = query.bind(PgBindValue::from_json(p));
    }
    query
}

fn bind_all_scalar<'q, O>(
    mut query: QueryScalar<'q, Postgres, O, PgArguments>,
    params: &[Value],
) -> QueryScalar<'q, Postgres, O, PgArguments> {
    for p in params {
        query = query.bind(PgBindValue::from_json(p));
    }
    query
}

fn into_row(v: Value) -> Row {
    match v {
        Value::Object(map) => map,
        _ => Row::new(),
    }
}

#[async_trait]
impl Transaction for PgTransaction {
    async fn select(&mut self, entity: &Entity, options: &QueryOptions) -> Result<Vec<Row>, AppError> {
        let q = sql::select(entity, options);
        self.log(&q);
        let rows: Vec<Value> = bind_all_scalar(sqlx::query_scalar(&q.sql), &q.params)
            .fetch_all(&mut *self.tx)
            .await?;
        Ok(rows.into_iter().map(into_row).collect())
    }

    async fn count(&mut self, entity: &Entity, options: &QueryOptions) -> Result<u64, AppError> {
        let q = sql::count(entity, options);
        self.log(&q);
        let n: i64 = bind_all_scalar(sqlx::query_scalar(&q.sql), &q.params)
            .fetch_one(&mut *self.tx)
            .await?;
        Ok(n.max(0) as u64)
    }

    async fn insert(&mut self, entity: &Entity, row: &Row) -> Result<Row, AppError> {
        let q = sql::insert(entity, row);
        self.log(&q);
        let created: Value = bind_all_scalar(sqlx::query_scalar(&q.sql), &q.params)
            .fetch_one(&mut *self.tx)
            .await?;
        Ok(into_row(created))
    }

    async fn update(&mut self, entity: &Entity, filters: &Filters, row: &Row) -> Result<u64, AppError> {
        let Some(q) = sql::update(entity, filters, row) else {
            return Ok(0);
        };
        self.log(&q);
        let done = bind_all(sqlx::query(&q.sql), &q.params).execute(&mut *self.tx).await?;
        Ok(done.rows_affected())
    }

    async fn delete(&mut self, entity: &Entity, filters: &Filters) -> Result<u64, AppError> {
        let q = sql::delete(entity, filters);
        self.log(&q);
        let done = bind_all(sqlx::query(&q.sql), &q.params).execute(&mut *self.tx).await?;
        Ok(done.rows_affected())
    }

    async fn commit(self: Box<Self>) -> Result<(), AppError> {
        let this = *self;
        this.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), AppError> {
        let this = *self;
        this.tx.rollback().await?;
        Ok(())
    }
}

/// Create the database named in `database_url` when it does not exist yet.
pub async fn ensure_database_exists(database_url: &str) -> Result<(), AppError> {
    let (admin_url, db_name) = split_db_name(database_url)?;
    if db_name.is_empty() || db_name == "postgres" {
        return Ok(());
    }
    let opts = sqlx::postgres::PgConnectOptions::from_str(&admin_url)
        .map_err(|e| AppError::BadRequest(format!("invalid DATABASE_URL: {}", e)))?;
    let mut conn: sqlx::PgConnection = opts.connect().await?;
    let exists: (bool,) = sqlx::query_as("SELECT EXISTS(SELECT 1 FROM pg_database WHERE datname = $1)")
        .bind(&db_name)
        .fetch_one(&mut conn)
        .await?;
    if !exists.0 {
        sqlx::query(&format!("CREATE DATABASE {}", sql::quoted(&db_name)))
            .execute(&mut conn)
            .await?;
        tracing::info!(database = %db_name, "database created");
    }
    Ok(())
}

fn split_db_name(url: &str) -> Result<(String, String), AppError> {
    let path_start = url
        .rfind('/')
        .ok_or_else(|| AppError::BadRequest("DATABASE_URL: no path".into()))?
        + 1;
    let path_and_query = url.get(path_start..).unwrap_or("");
    let db_name = path_and_query.split('?').next().unwrap_or("").trim();
    let base = url.get(..path_start).unwrap_or(url);
    Ok((format!("{}postgres", base), db_name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn database_name_is_split_from_url() {
        let (admin, name) = split_db_name("postgres://u:p@localhost:5432/app?sslmode=disable").unwrap();
        assert_eq!(admin, "postgres://u:p@localhost:5432/postgres");
        assert_eq!(name, "app");
    }
}
