//! Application registry: entities, value objects, documentation schemas and routes.
//!
//! Populated once during assembly, in order: entities, [`Registry::finalize`], value objects,
//! routes. Read-only once the router and document are built.

use crate::config::SwaggerOptions;
use crate::docs::ApiDoc;
use crate::dto::{FieldSpec, ValueObject};
use crate::entity::{Entity, EntityBuilder, EntityCatalog, EntityId};
use crate::error::ConfigError;
use crate::routes::{self, CompiledRoute, Route};
use crate::state::AppState;
use axum::Router;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Default)]
pub struct Registry {
    catalog: EntityCatalog,
    value_objects: BTreeMap<String, Arc<ValueObject>>,
    schemas: BTreeMap<String, Value>,
    routes: Vec<Arc<CompiledRoute>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a table. The handle resolves once [`Registry::finalize`] has run.
    pub fn entity(&mut self, builder: EntityBuilder) -> Result<EntityId, ConfigError> {
        self.catalog.declare(builder)
    }

    /// Resolve associations between declared entities.
    pub fn finalize(&mut self) -> Result<(), ConfigError> {
        self.catalog.finalize_associations()
    }

    pub fn model(&self, id: &EntityId) -> Result<Arc<Entity>, ConfigError> {
        self.catalog.get(id)
    }

    pub fn entities(&self) -> Result<&[Arc<Entity>], ConfigError> {
        self.catalog.entities()
    }

    /// Declare and register a value object, optionally backed by an entity.
    pub fn value_object<I, K>(
        &mut self,
        name: impl Into<String>,
        properties: I,
        entity: Option<&EntityId>,
    ) -> Result<Arc<ValueObject>, ConfigError>
    where
        I: IntoIterator<Item = (K, FieldSpec)>,
        K: Into<String>,
    {
        let entity = entity.map(|id| self.catalog.get(id)).transpose()?;
        Ok(self.register(ValueObject::new(name, properties, entity)))
    }

    /// Register a value object built by hand (e.g. one carrying a query hook). A later
    /// registration under the same name replaces the earlier schema.
    pub fn register(&mut self, vo: ValueObject) -> Arc<ValueObject> {
        let vo = Arc::new(vo);
        if self
            .schemas
            .insert(vo.name().to_string(), vo.doc_schema())
            .is_some()
        {
            tracing::debug!(name = %vo.name(), "value object schema replaced");
        }
        self.value_objects.insert(vo.name().to_string(), Arc::clone(&vo));
        vo
    }

    pub fn get_value_object(&self, name: &str) -> Option<&Arc<ValueObject>> {
        self.value_objects.get(name)
    }

    pub fn route(&mut self, route: Route) -> Result<(), ConfigError> {
        self.routes.push(Arc::new(route.compile()?));
        Ok(())
    }

    pub fn routes(&self) -> &[Arc<CompiledRoute>] {
        &self.routes
    }

    pub fn schemas(&self) -> &BTreeMap<String, Value> {
        &self.schemas
    }

    /// Every declared route bound to a router, fewer path parameters first.
    pub fn router(&self) -> Result<Router<AppState>, ConfigError> {
        routes::install(&self.routes)
    }

    pub fn api_doc(&self, options: &SwaggerOptions, prefix: &str) -> ApiDoc {
        ApiDoc::build(options, prefix, &self.schemas, &self.routes)
    }
}
