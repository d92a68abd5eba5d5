//! Blueprint SDK: declarative CRUD API scaffolding over axum and sqlx.
//!
//! Declare entities, value objects and routes on a [`Registry`]; the SDK derives routing,
//! request coercion, role checks, transactional persistence with field encryption, and an
//! OpenAPI document from those declarations.

pub mod auth;
pub mod bootstrap;
pub mod config;
pub mod docs;
pub mod dto;
pub mod entity;
pub mod error;
pub mod registry;
pub mod response;
pub mod routes;
pub mod secure;
pub mod service;
mod sql;
pub mod state;
pub mod store;
pub mod types;

pub use auth::{AuthService, AuthUser, Claims, TokenPair, UserResolver};
pub use bootstrap::{app, connect, init_tracing, run, serve};
pub use config::{AuthOptions, DatabaseOptions, ServerOptions, SwaggerOptions};
pub use docs::ApiDoc;
pub use dto::{FieldSpec, QueryOptions, QueryScope, Row, SortDirection, ValueObject};
pub use entity::{ColumnSpec, Entity, EntityBuilder, EntityId};
pub use error::{AppError, ConfigError};
pub use registry::Registry;
pub use routes::{RawContext, RequestArgs, Role, Route, UploadedFile};
pub use secure::FieldCipher;
pub use service::{Page, PageRequest, Repository, Transactional};
pub use state::AppState;
pub use store::{MemoryStorage, PgStorage, Storage, Transaction};
pub use types::{FieldType, TypeDescriptor};
