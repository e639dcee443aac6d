//! Schema dictionary loaded from a JSON descriptor.
//!
//! ```json
//! {
//!   "entities": [{
//!     "schema": "app", "name": "users", "primary": ["uid"],
//!     "attributes": [
//!       { "name": "login_id", "alias": "uid", "type": "string", "required": true },
//!       { "name": "pwd", "alias": "password", "hidden": true }
//!     ]
//!   }],
//!   "classes": [{
//!     "name": "__ACCOUNT__", "entity": "app.users",
//!     "primary": "uid", "secondary": "name", "status": "enabled", "password": "password"
//!   }]
//! }
//! ```
//!
//! `primary` lists attribute aliases. Class bindings name aliases of the
//! class's entity.

use crate::entity::{Attribute, AttributeType, Entity};
use crate::error::DbsError;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
struct SchemaDescriptor {
    #[serde(default)]
    entities: Vec<EntityDescriptor>,
    #[serde(default)]
    classes: Vec<ClassDescriptor>,
}

#[derive(Debug, Deserialize)]
struct EntityDescriptor {
    #[serde(default)]
    catalog: Option<String>,
    #[serde(default)]
    schema: Option<String>,
    name: String,
    primary: Vec<String>,
    attributes: Vec<AttributeDescriptor>,
}

#[derive(Debug, Deserialize)]
struct AttributeDescriptor {
    name: String,
    /// Defaults to the column name
    #[serde(default)]
    alias: Option<String>,
    #[serde(default, rename = "type")]
    kind: AttributeType,
    #[serde(default)]
    required: bool,
    #[serde(default)]
    hidden: bool,
}

#[derive(Debug, Deserialize)]
struct ClassDescriptor {
    name: String,
    entity: String,
    primary: String,
    #[serde(default)]
    secondary: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    password: Option<String>,
}

/// An external object class bound to an entity.
///
/// The bindings tell the filter translator which columns stand for the
/// framework's identifier, name, enable flag and password.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectClass {
    name: String,
    entity: Arc<Entity>,
    primary: Attribute,
    secondary: Option<Attribute>,
    status: Option<Attribute>,
    password: Option<Attribute>,
}

impl ObjectClass {
    /// Bind `name` to `entity`; each binding is an attribute alias of the entity.
    pub fn new(
        name: impl Into<String>,
        entity: Arc<Entity>,
        primary: &str,
        secondary: Option<&str>,
        status: Option<&str>,
        password: Option<&str>,
    ) -> Result<Self, DbsError> {
        let name = name.into();
        let resolve = |alias: &str| {
            entity.lookup(alias).cloned().ok_or_else(|| {
                DbsError::schema_invalid(format!(
                    "class {name} binds unknown attribute {alias} of {}",
                    entity.id()
                ))
            })
        };
        let primary = resolve(primary)?;
        let secondary = secondary.map(resolve).transpose()?;
        let status = status.map(resolve).transpose()?;
        let password = password.map(resolve).transpose()?;
        Ok(Self {
            name,
            entity,
            primary,
            secondary,
            status,
            password,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn entity(&self) -> &Arc<Entity> {
        &self.entity
    }

    /// Column holding the framework identifier
    pub fn primary(&self) -> &Attribute {
        &self.primary
    }

    /// Column holding the descriptive name
    pub fn secondary(&self) -> Option<&Attribute> {
        self.secondary.as_ref()
    }

    pub fn status(&self) -> Option<&Attribute> {
        self.status.as_ref()
    }

    pub fn password(&self) -> Option<&Attribute> {
        self.password.as_ref()
    }
}

/// Entities by qualified id and object classes by name.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    entities: HashMap<String, Arc<Entity>>,
    classes: HashMap<String, ObjectClass>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(text: &str) -> Result<Self, DbsError> {
        let descriptor: SchemaDescriptor = serde_json::from_str(text)?;
        Self::from_descriptor(descriptor)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, DbsError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|err| {
            DbsError::schema_invalid(format!("{} could not be read: {err}", path.display()))
        })?;
        let schema = Self::from_json(&text)?;
        log::debug!(
            "loaded {} entities and {} classes from {}",
            schema.entities.len(),
            schema.classes.len(),
            path.display()
        );
        Ok(schema)
    }

    fn from_descriptor(descriptor: SchemaDescriptor) -> Result<Self, DbsError> {
        let mut schema = Schema::new();
        for entity in descriptor.entities {
            schema.add_entity(build_entity(entity)?)?;
        }
        for class in descriptor.classes {
            let entity = schema.entity(&class.entity).cloned().ok_or_else(|| {
                DbsError::schema_invalid(format!(
                    "class {} refers to unknown entity {}",
                    class.name, class.entity
                ))
            })?;
            schema.add_class(ObjectClass::new(
                class.name,
                entity,
                &class.primary,
                class.secondary.as_deref(),
                class.status.as_deref(),
                class.password.as_deref(),
            )?)?;
        }
        Ok(schema)
    }

    /// Register an entity under its qualified id.
    pub fn add_entity(&mut self, entity: Entity) -> Result<Arc<Entity>, DbsError> {
        let id = entity.id().to_string();
        if self.entities.contains_key(&id) {
            return Err(DbsError::schema_invalid(format!("entity {id} is declared twice")));
        }
        let entity = Arc::new(entity);
        self.entities.insert(id, Arc::clone(&entity));
        Ok(entity)
    }

    pub fn add_class(&mut self, class: ObjectClass) -> Result<(), DbsError> {
        if self.classes.contains_key(class.name()) {
            return Err(DbsError::schema_invalid(format!(
                "class {} is declared twice",
                class.name()
            )));
        }
        self.classes.insert(class.name().to_string(), class);
        Ok(())
    }

    pub fn entity(&self, id: &str) -> Option<&Arc<Entity>> {
        self.entities.get(id)
    }

    pub fn class(&self, name: &str) -> Option<&ObjectClass> {
        self.classes.get(name)
    }

    /// Like [`Schema::class`] but a miss is an entity-not-found error.
    pub fn require_class(&self, name: &str) -> Result<&ObjectClass, DbsError> {
        self.class(name).ok_or_else(|| DbsError::entity_not_found(name))
    }

    pub fn entities(&self) -> impl Iterator<Item = &Arc<Entity>> {
        self.entities.values()
    }
}

fn build_entity(descriptor: EntityDescriptor) -> Result<Entity, DbsError> {
    let attributes: Vec<Attribute> = descriptor
        .attributes
        .into_iter()
        .map(|a| {
            let alias = a.alias.unwrap_or_else(|| a.name.clone());
            Attribute::new(a.name, alias, a.kind)
                .required(a.required)
                .hidden(a.hidden)
        })
        .collect();

    let mut primary = Vec::with_capacity(descriptor.primary.len());
    for alias in &descriptor.primary {
        let position = attributes
            .iter()
            .position(|a| a.alias() == alias)
            .ok_or_else(|| {
                DbsError::schema_invalid(format!(
                    "primary key {alias} of {} is not an attribute",
                    descriptor.name
                ))
            })?;
        primary.push(position);
    }

    Entity::build(
        descriptor.catalog.as_deref(),
        descriptor.schema.as_deref(),
        &descriptor.name,
        &primary,
        attributes,
    )
}
