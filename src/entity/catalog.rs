//! Two-phase entity registration: declare every table, then resolve `connect_to` references.

use crate::entity::model::{association_alias, Association, AssociationKind, Entity, EntityBuilder, EntityId};
use crate::error::ConfigError;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Default)]
pub struct EntityCatalog {
    pending: Vec<EntityBuilder>,
    resolved: Option<Resolved>,
}

struct Resolved {
    order: Vec<Arc<Entity>>,
    by_name: HashMap<String, Arc<Entity>>,
}

impl EntityCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a table. Targets of `connect_to` may be declared later.
    pub fn declare(&mut self, builder: EntityBuilder) -> Result<EntityId, ConfigError> {
        if self.pending.iter().any(|b| b.name == builder.name) {
            return Err(ConfigError::DuplicateEntity(builder.name));
        }
        let id = EntityId(builder.name.clone());
        self.pending.push(builder);
        self.resolved = None;
        Ok(id)
    }

    /// Resolve every `connect_to` into a belongs-to association (and has-many on the target
    /// when `reverse_define` is set). Run once all entities are declared.
    pub fn finalize_associations(&mut self) -> Result<(), ConfigError> {
        let declared: HashMap<&str, &EntityBuilder> = self.pending.iter().map(|b| (b.name.as_str(), b)).collect();
        let mut associations: HashMap<String, Vec<Association>> = HashMap::new();

        for builder in &self.pending {
            for (field, spec) in &builder.columns {
                let Some(target) = &spec.connect_to else { continue };
                let target_builder = declared.get(target.name()).ok_or_else(|| ConfigError::MissingReference {
                    kind: "entity",
                    id: target.name().to_string(),
                })?;
                let target_key = primary_key_of(target_builder);
                associations.entry(builder.name.clone()).or_default().push(Association {
                    alias: association_alias(field),
                    kind: AssociationKind::BelongsTo,
                    target: target.name().to_string(),
                    local_key: field.clone(),
                    target_key: target_key.clone(),
                });
                if spec.reverse_define {
                    associations.entry(target.name().to_string()).or_default().push(Association {
                        alias: association_alias(&builder.name),
                        kind: AssociationKind::HasMany,
                        target: builder.name.clone(),
                        local_key: target_key,
                        target_key: field.clone(),
                    });
                }
            }
        }

        let mut order = Vec::with_capacity(self.pending.len());
        let mut by_name = HashMap::with_capacity(self.pending.len());
        for builder in &self.pending {
            let entity = Arc::new(Entity {
                name: builder.name.clone(),
                columns: builder.build_columns()?,
                associations: associations.remove(&builder.name).unwrap_or_default(),
            });
            tracing::debug!(entity = %entity.name, associations = entity.associations.len(), "entity finalized");
            by_name.insert(builder.name.clone(), Arc::clone(&entity));
            order.push(entity);
        }
        self.resolved = Some(Resolved { order, by_name });
        Ok(())
    }

    pub fn is_finalized(&self) -> bool {
        self.resolved.is_some()
    }

    pub fn get(&self, id: &EntityId) -> Result<Arc<Entity>, ConfigError> {
        self.get_by_name(id.name())
    }

    pub fn get_by_name(&self, name: &str) -> Result<Arc<Entity>, ConfigError> {
        let resolved = self.resolved.as_ref().ok_or(ConfigError::NotFinalized("entity lookup"))?;
        resolved
            .by_name
            .get(name)
            .cloned()
            .ok_or_else(|| ConfigError::MissingReference {
                kind: "entity",
                id: name.to_string(),
            })
    }

    /// Finalized entities in declaration order.
    pub fn entities(&self) -> Result<&[Arc<Entity>], ConfigError> {
        self.resolved
            .as_ref()
            .map(|r| r.order.as_slice())
            .ok_or(ConfigError::NotFinalized("entity listing"))
    }
}

fn primary_key_of(builder: &EntityBuilder) -> String {
    builder
        .columns
        .iter()
        .find(|(_, spec)| spec.primary_key)
        .map(|(name, _)| name.clone())
        .unwrap_or_else(|| "id".to_string())
}
