use super::errors::SchemaCatalogError;
use super::metamodel::{
    AttributeDescriptor, AttributeKind, CollectionKind, EntityMetamodel, ManagedType, TypeKind,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;

/// Schemas are defined in YAML with the following structure:
///
/// ```yaml
/// entities:
///   - name: Order
///     id: id                    # or a list for multi-attribute identifiers
///     attributes:
///       - name: id
///         target: Long
///       - name: customer
///         kind: many_to_one
///         target: Customer
///         optional: false
///         columns: [customer_id]
///       - name: items
///         kind: one_to_many
///         target: Item
///         collection: list
///   - name: VipCustomer
///     extends: Customer         # inherits attributes and identifier
///     attributes:
///       - name: level
///         target: Integer
/// embeddables:
///   - name: Address
///     attributes:
///       - name: city
///         target: String
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SchemaDefinition {
    #[serde(default)]
    pub entities: Vec<EntityDefinition>,
    #[serde(default)]
    pub embeddables: Vec<EmbeddableDefinition>,
}

/// Identifier type supporting both single and composite IDs
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum Identifier {
    Single(String),
    Composite(Vec<String>),
}

impl Identifier {
    pub fn attributes(&self) -> Vec<String> {
        match self {
            Identifier::Single(attr) => vec![attr.clone()],
            Identifier::Composite(attrs) => attrs.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityDefinition {
    pub name: String,
    #[serde(default)]
    pub extends: Option<String>,
    #[serde(default)]
    pub id: Option<Identifier>,
    #[serde(default)]
    pub attributes: Vec<AttributeDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddableDefinition {
    pub name: String,
    #[serde(default)]
    pub attributes: Vec<AttributeDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributeDefinition {
    pub name: String,
    #[serde(default)]
    pub kind: AttributeKind,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default = "default_optional")]
    pub optional: bool,
    #[serde(default)]
    pub collection: Option<CollectionKind>,
    #[serde(default)]
    pub columns: Vec<String>,
}

fn default_optional() -> bool {
    true
}

impl SchemaDefinition {
    /// Load a schema definition from a YAML file
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self, SchemaCatalogError> {
        let contents = fs::read_to_string(path).map_err(|e| SchemaCatalogError::ConfigReadError {
            error: e.to_string(),
        })?;

        Self::from_yaml_str(&contents)
    }

    /// Parse a schema definition from a YAML string
    pub fn from_yaml_str(yaml: &str) -> Result<Self, SchemaCatalogError> {
        serde_yaml::from_str(yaml).map_err(|e| SchemaCatalogError::ConfigParseError {
            error: e.to_string(),
        })
    }

    /// Structural checks that do not need the resolved type graph
    pub fn validate(&self) -> Result<(), SchemaCatalogError> {
        if self.entities.is_empty() {
            return Err(SchemaCatalogError::InvalidConfig {
                message: "Schema must contain at least one entity definition".to_string(),
            });
        }

        let mut seen = HashSet::new();
        let names = self
            .entities
            .iter()
            .map(|e| &e.name)
            .chain(self.embeddables.iter().map(|e| &e.name));
        for name in names {
            if !seen.insert(name) {
                return Err(SchemaCatalogError::DuplicateType {
                    type_name: name.clone(),
                });
            }
        }

        let attribute_lists = self
            .entities
            .iter()
            .map(|e| (&e.name, &e.attributes))
            .chain(self.embeddables.iter().map(|e| (&e.name, &e.attributes)));
        for (owner, attributes) in attribute_lists {
            let mut attr_names = HashSet::new();
            for attr in attributes {
                if !attr_names.insert(&attr.name) {
                    return Err(SchemaCatalogError::InvalidConfig {
                        message: format!("Duplicate attribute {}.{}", owner, attr.name),
                    });
                }
                if attr.collection.is_some() && !attr.kind.is_plural() {
                    return Err(SchemaCatalogError::InvalidConfig {
                        message: format!(
                            "Attribute {}.{} declares a collection kind but is not plural",
                            owner, attr.name
                        ),
                    });
                }
                if attr.kind != AttributeKind::Basic
                    && attr.kind != AttributeKind::ElementCollection
                    && attr.target.is_none()
                {
                    return Err(SchemaCatalogError::InvalidConfig {
                        message: format!("Attribute {}.{} requires a target", owner, attr.name),
                    });
                }
            }
        }

        Ok(())
    }

    /// Resolve inheritance, identifiers and targets into an [`EntityMetamodel`]
    pub fn to_metamodel(&self) -> Result<EntityMetamodel, SchemaCatalogError> {
        self.validate()?;

        let mut types = BTreeMap::new();
        for embeddable in &self.embeddables {
            let attributes = embeddable
                .attributes
                .iter()
                .map(|a| (a.name.clone(), descriptor(a, &embeddable.name, false)))
                .collect();
            types.insert(
                embeddable.name.clone(),
                ManagedType {
                    name: embeddable.name.clone(),
                    kind: TypeKind::Embeddable,
                    supertype: None,
                    id_attributes: Vec::new(),
                    attributes,
                },
            );
        }

        for entity in &self.entities {
            let mut visiting = Vec::new();
            let managed = self.resolve_entity(entity, &mut visiting)?;
            types.insert(entity.name.clone(), managed);
        }

        check_targets(&types)?;
        log::debug!("Loaded schema with {} managed types", types.len());
        Ok(EntityMetamodel::new(types))
    }

    fn resolve_entity(
        &self,
        entity: &EntityDefinition,
        visiting: &mut Vec<String>,
    ) -> Result<ManagedType, SchemaCatalogError> {
        if visiting.contains(&entity.name) {
            visiting.push(entity.name.clone());
            return Err(SchemaCatalogError::InvalidConfig {
                message: format!("Cyclic inheritance: {}", visiting.join(" -> ")),
            });
        }
        visiting.push(entity.name.clone());

        let (mut attributes, inherited_id) = match &entity.extends {
            Some(parent_name) => {
                let parent = self
                    .entities
                    .iter()
                    .find(|e| &e.name == parent_name)
                    .ok_or_else(|| SchemaCatalogError::UnknownType {
                        type_name: parent_name.clone(),
                    })?;
                let resolved = self.resolve_entity(parent, visiting)?;
                (resolved.attributes, resolved.id_attributes)
            }
            None => (BTreeMap::new(), Vec::new()),
        };

        let id_attributes = match &entity.id {
            Some(id) => id.attributes(),
            None => inherited_id,
        };
        if id_attributes.is_empty() {
            return Err(SchemaCatalogError::InvalidIdentifier {
                type_name: entity.name.clone(),
                message: "entity declares no identifier".to_string(),
            });
        }

        for attr in &entity.attributes {
            attributes.insert(
                attr.name.clone(),
                descriptor(attr, &entity.name, id_attributes.contains(&attr.name)),
            );
        }

        for id in &id_attributes {
            match attributes.get_mut(id) {
                Some(attr) if matches!(attr.kind, AttributeKind::Basic | AttributeKind::Embedded) => {
                    attr.is_id = true;
                }
                Some(_) => {
                    return Err(SchemaCatalogError::InvalidIdentifier {
                        type_name: entity.name.clone(),
                        message: format!("`{}` must be a basic or embedded attribute", id),
                    })
                }
                None => {
                    return Err(SchemaCatalogError::InvalidIdentifier {
                        type_name: entity.name.clone(),
                        message: format!("identifier attribute `{}` is not declared", id),
                    })
                }
            }
        }

        Ok(ManagedType {
            name: entity.name.clone(),
            kind: TypeKind::Entity,
            supertype: entity.extends.clone(),
            id_attributes,
            attributes,
        })
    }
}

fn descriptor(def: &AttributeDefinition, declaring_type: &str, is_id: bool) -> AttributeDescriptor {
    let collection = if def.kind.is_plural() {
        Some(def.collection.unwrap_or(CollectionKind::Set))
    } else {
        None
    };
    AttributeDescriptor {
        name: def.name.clone(),
        kind: def.kind,
        target: def.target.clone().unwrap_or_else(|| "Object".to_string()),
        optional: def.optional && !is_id,
        collection,
        columns: def.columns.clone(),
        declaring_type: declaring_type.to_string(),
        is_id,
    }
}

fn check_targets(types: &BTreeMap<String, ManagedType>) -> Result<(), SchemaCatalogError> {
    for managed in types.values() {
        for attr in managed.attributes.values() {
            let expected = match attr.kind {
                AttributeKind::Embedded => Some(TypeKind::Embeddable),
                AttributeKind::ManyToOne
                | AttributeKind::OneToOne
                | AttributeKind::OneToMany
                | AttributeKind::ManyToMany => Some(TypeKind::Entity),
                AttributeKind::Basic | AttributeKind::ElementCollection => None,
            };
            if let Some(expected) = expected {
                match types.get(&attr.target) {
                    Some(target) if target.kind == expected => {}
                    _ => {
                        return Err(SchemaCatalogError::InvalidConfig {
                            message: format!(
                                "Attribute {}.{} targets unknown {:?} `{}`",
                                managed.name, attr.name, expected, attr.target
                            ),
                        })
                    }
                }
            }
        }
    }
    Ok(())
}

impl EntityMetamodel {
    /// Load and resolve a metamodel from a YAML schema file
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self, SchemaCatalogError> {
        SchemaDefinition::from_yaml_file(path)?.to_metamodel()
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self, SchemaCatalogError> {
        SchemaDefinition::from_yaml_str(yaml)?.to_metamodel()
    }
}
