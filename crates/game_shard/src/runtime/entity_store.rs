//! Entity command buffer: stages entity mutations for the executing tick and
//! commits them to the key-value layer in a single atomic batch.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use serde_json::Value as JsonValue;

use super::error::WorldError;
use super::storage::{decode_u64, encode_u64, KeySpace, KeyValueStore, WriteOp};
use super::types::{EntityId, Tick};

#[derive(Debug, Clone, PartialEq)]
enum StagedOp {
    Set(JsonValue),
    Remove,
}

/// Staging layer over the key-value store. Reads observe staged ops layered
/// over committed state; writes only reach the store on `finalize_tick`.
pub struct EntityCommandBuffer {
    kv: Arc<dyn KeyValueStore>,
    keys: KeySpace,
    components: BTreeSet<String>,
    // Next tick to execute; persisted on every finalize so a restart
    // re-anchors the world's tick counter.
    tick: Tick,
    next_entity_id: EntityId,
    staged: BTreeMap<EntityId, BTreeMap<String, StagedOp>>,
    created: BTreeSet<EntityId>,
    destroyed: BTreeSet<EntityId>,
}

impl EntityCommandBuffer {
    pub fn new(kv: Arc<dyn KeyValueStore>, namespace: impl Into<String>) -> Result<Self, WorldError> {
        let keys = KeySpace::new(namespace);
        let tick = match kv.get(&keys.last_finalized_tick())? {
            Some(bytes) => decode_u64(&bytes)?,
            None => 0,
        };
        let next_entity_id = match kv.get(&keys.next_entity_id())? {
            Some(bytes) => decode_u64(&bytes)?,
            None => 0,
        };
        Ok(Self {
            kv,
            keys,
            components: BTreeSet::new(),
            tick,
            next_entity_id,
            staged: BTreeMap::new(),
            created: BTreeSet::new(),
            destroyed: BTreeSet::new(),
        })
    }

    /// Registers a component schema. Component types are immutable once
    /// registered.
    pub fn register_component(&mut self, name: &str) -> Result<(), WorldError> {
        if !self.components.insert(name.to_string()) {
            return Err(WorldError::ComponentAlreadyRegistered {
                component: name.to_string(),
            });
        }
        Ok(())
    }

    pub fn registered_components(&self) -> Vec<String> {
        self.components.iter().cloned().collect()
    }

    /// The next tick to execute, as recorded by the last finalize. Used at
    /// startup to re-anchor the world's tick counter.
    pub fn last_finalized_tick(&self) -> Tick {
        self.tick
    }

    pub fn create_entity(&mut self) -> EntityId {
        let entity = self.next_entity_id;
        self.next_entity_id += 1;
        self.created.insert(entity);
        self.staged.entry(entity).or_default();
        entity
    }

    pub fn destroy_entity(&mut self, entity: EntityId) -> Result<(), WorldError> {
        if self.created.remove(&entity) {
            self.staged.remove(&entity);
            return Ok(());
        }
        if !self.entity_persisted(entity)? || self.destroyed.contains(&entity) {
            return Err(WorldError::EntityNotFound { entity });
        }
        self.destroyed.insert(entity);
        self.staged.remove(&entity);
        Ok(())
    }

    pub fn set_component(
        &mut self,
        entity: EntityId,
        component: &str,
        value: JsonValue,
    ) -> Result<(), WorldError> {
        self.ensure_registered(component)?;
        self.ensure_exists(entity)?;
        self.staged
            .entry(entity)
            .or_default()
            .insert(component.to_string(), StagedOp::Set(value));
        Ok(())
    }

    pub fn remove_component(&mut self, entity: EntityId, component: &str) -> Result<(), WorldError> {
        self.ensure_registered(component)?;
        self.ensure_exists(entity)?;
        if !self.component_names_for_entity(entity)?.iter().any(|name| name == component) {
            return Err(WorldError::ComponentNotFound {
                entity,
                component: component.to_string(),
            });
        }
        self.staged
            .entry(entity)
            .or_default()
            .insert(component.to_string(), StagedOp::Remove);
        Ok(())
    }

    /// Component payload as raw JSON, staged ops first.
    pub fn component_for_entity_raw_json(
        &self,
        entity: EntityId,
        component: &str,
    ) -> Result<JsonValue, WorldError> {
        self.ensure_registered(component)?;
        if self.destroyed.contains(&entity) {
            return Err(WorldError::EntityNotFound { entity });
        }
        if let Some(ops) = self.staged.get(&entity) {
            match ops.get(component) {
                Some(StagedOp::Set(value)) => return Ok(value.clone()),
                Some(StagedOp::Remove) => {
                    return Err(WorldError::ComponentNotFound {
                        entity,
                        component: component.to_string(),
                    })
                }
                None => {}
            }
        }
        if self.created.contains(&entity) {
            return Err(WorldError::ComponentNotFound {
                entity,
                component: component.to_string(),
            });
        }
        match self.kv.get(&self.keys.component(entity, component))? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None if self.entity_persisted(entity)? => Err(WorldError::ComponentNotFound {
                entity,
                component: component.to_string(),
            }),
            None => Err(WorldError::EntityNotFound { entity }),
        }
    }

    /// Component names for an entity, staged ops layered over committed
    /// state, in sorted order.
    pub fn component_names_for_entity(&self, entity: EntityId) -> Result<Vec<String>, WorldError> {
        if self.destroyed.contains(&entity) {
            return Err(WorldError::EntityNotFound { entity });
        }
        let mut names: BTreeSet<String> = if self.created.contains(&entity) {
            BTreeSet::new()
        } else {
            match self.kv.get(&self.keys.entity(entity))? {
                Some(bytes) => serde_json::from_slice::<Vec<String>>(&bytes)?
                    .into_iter()
                    .collect(),
                None => return Err(WorldError::EntityNotFound { entity }),
            }
        };
        if let Some(ops) = self.staged.get(&entity) {
            for (component, op) in ops {
                match op {
                    StagedOp::Set(_) => {
                        names.insert(component.clone());
                    }
                    StagedOp::Remove => {
                        names.remove(component);
                    }
                }
            }
        }
        Ok(names.into_iter().collect())
    }

    /// Every live entity id, staged view, in ascending order.
    pub fn entity_ids(&self) -> Result<Vec<EntityId>, WorldError> {
        let prefix = self.keys.entity_prefix();
        let mut ids: BTreeSet<EntityId> = self
            .kv
            .scan_prefix(&prefix)?
            .into_iter()
            .filter_map(|(key, _)| key.strip_prefix(&prefix)?.parse().ok())
            .collect();
        ids.extend(self.created.iter().copied());
        for entity in &self.destroyed {
            ids.remove(entity);
        }
        Ok(ids.into_iter().collect())
    }

    /// Read-only view over committed state, detached from staged ops.
    pub fn to_read_only(&self) -> ReadOnlyStore {
        ReadOnlyStore {
            kv: Arc::clone(&self.kv),
            keys: self.keys.clone(),
        }
    }

    /// Commits every staged op, the advanced entity id cursor, and the next
    /// tick anchor in one atomic batch. On failure the buffer is unchanged
    /// and may be finalized again.
    pub fn finalize_tick(&mut self) -> Result<(), WorldError> {
        let mut batch = Vec::new();
        for entity in &self.destroyed {
            batch.push(WriteOp::Delete {
                key: self.keys.entity(*entity),
            });
            for (key, _) in self.kv.scan_prefix(&self.keys.component_prefix(*entity))? {
                batch.push(WriteOp::Delete { key });
            }
        }
        for (entity, ops) in &self.staged {
            let names = self.component_names_for_entity(*entity)?;
            batch.push(WriteOp::Set {
                key: self.keys.entity(*entity),
                value: serde_json::to_vec(&names)?,
            });
            for (component, op) in ops {
                match op {
                    StagedOp::Set(value) => batch.push(WriteOp::Set {
                        key: self.keys.component(*entity, component),
                        value: serde_json::to_vec(value)?,
                    }),
                    StagedOp::Remove => batch.push(WriteOp::Delete {
                        key: self.keys.component(*entity, component),
                    }),
                }
            }
        }
        batch.push(WriteOp::Set {
            key: self.keys.next_entity_id(),
            value: encode_u64(self.next_entity_id)?,
        });
        batch.push(WriteOp::Set {
            key: self.keys.last_finalized_tick(),
            value: encode_u64(self.tick + 1)?,
        });

        self.kv.commit(batch)?;

        self.tick += 1;
        self.staged.clear();
        self.created.clear();
        self.destroyed.clear();
        Ok(())
    }

    fn ensure_registered(&self, component: &str) -> Result<(), WorldError> {
        if !self.components.contains(component) {
            return Err(WorldError::ComponentNotRegistered {
                component: component.to_string(),
            });
        }
        Ok(())
    }

    fn ensure_exists(&self, entity: EntityId) -> Result<(), WorldError> {
        if self.created.contains(&entity) {
            return Ok(());
        }
        if self.destroyed.contains(&entity) || !self.entity_persisted(entity)? {
            return Err(WorldError::EntityNotFound { entity });
        }
        Ok(())
    }

    fn entity_persisted(&self, entity: EntityId) -> Result<bool, WorldError> {
        Ok(self.kv.get(&self.keys.entity(entity))?.is_some())
    }
}

impl fmt::Debug for EntityCommandBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityCommandBuffer")
            .field("tick", &self.tick)
            .field("next_entity_id", &self.next_entity_id)
            .field("staged_entities", &self.staged.len())
            .finish()
    }
}

/// Read-only view over committed entity state, safe to use outside a tick.
#[derive(Clone)]
pub struct ReadOnlyStore {
    kv: Arc<dyn KeyValueStore>,
    keys: KeySpace,
}

impl ReadOnlyStore {
    pub fn entity_ids(&self) -> Result<Vec<EntityId>, WorldError> {
        let prefix = self.keys.entity_prefix();
        Ok(self
            .kv
            .scan_prefix(&prefix)?
            .into_iter()
            .filter_map(|(key, _)| key.strip_prefix(&prefix)?.parse().ok())
            .collect())
    }

    pub fn component_names_for_entity(&self, entity: EntityId) -> Result<Vec<String>, WorldError> {
        match self.kv.get(&self.keys.entity(entity))? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Err(WorldError::EntityNotFound { entity }),
        }
    }

    pub fn component_for_entity_raw_json(
        &self,
        entity: EntityId,
        component: &str,
    ) -> Result<JsonValue, WorldError> {
        match self.kv.get(&self.keys.component(entity, component))? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None if self.kv.get(&self.keys.entity(entity))?.is_some() => {
                Err(WorldError::ComponentNotFound {
                    entity,
                    component: component.to_string(),
                })
            }
            None => Err(WorldError::EntityNotFound { entity }),
        }
    }
}
