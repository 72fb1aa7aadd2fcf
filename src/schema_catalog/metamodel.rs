//! In-memory entity metamodel.
//!
//! Types and attributes are fully resolved at load time: inherited attributes are
//! copied into every subtype and identifier flags are set on the descriptors, so
//! lookups never walk the inheritance chain.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use super::errors::SchemaCatalogError;
use super::SchemaCatalog;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AttributeKind {
    #[default]
    Basic,
    Embedded,
    ManyToOne,
    OneToOne,
    OneToMany,
    ManyToMany,
    ElementCollection,
}

impl AttributeKind {
    pub fn is_plural(&self) -> bool {
        matches!(
            self,
            AttributeKind::OneToMany | AttributeKind::ManyToMany | AttributeKind::ElementCollection
        )
    }

    pub fn is_to_one(&self) -> bool {
        matches!(self, AttributeKind::ManyToOne | AttributeKind::OneToOne)
    }

    /// Attributes that produce a join node when dereferenced
    pub fn is_joinable(&self) -> bool {
        self.is_plural() || self.is_to_one()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionKind {
    Set,
    List,
    Map,
    Bag,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TypeKind {
    Entity,
    Embeddable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeDescriptor {
    pub name: String,
    pub kind: AttributeKind,
    /// Target managed type, or the basic type name for basic attributes and
    /// element collections of basic values
    pub target: String,
    pub optional: bool,
    pub collection: Option<CollectionKind>,
    /// Physical columns, used to detect attributes sharing storage
    pub columns: Vec<String>,
    pub declaring_type: String,
    pub is_id: bool,
}

impl AttributeDescriptor {
    pub fn is_plural(&self) -> bool {
        self.kind.is_plural()
    }

    pub fn is_indexed(&self) -> bool {
        matches!(self.collection, Some(CollectionKind::List | CollectionKind::Map))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagedType {
    pub name: String,
    pub kind: TypeKind,
    pub supertype: Option<String>,
    /// Identifier attribute names, own or inherited. Empty for embeddables.
    pub id_attributes: Vec<String>,
    pub attributes: BTreeMap<String, AttributeDescriptor>,
}

impl ManagedType {
    pub fn attribute(&self, name: &str) -> Option<&AttributeDescriptor> {
        self.attributes.get(name)
    }
}

/// Catalog backed by types loaded from a schema definition
#[derive(Debug, Clone, Default)]
pub struct EntityMetamodel {
    types: BTreeMap<String, ManagedType>,
    /// Transitive subtypes per type name
    subtypes: HashMap<String, Vec<String>>,
}

impl EntityMetamodel {
    pub(crate) fn new(types: BTreeMap<String, ManagedType>) -> Self {
        let mut subtypes: HashMap<String, Vec<String>> = HashMap::new();
        for managed in types.values() {
            let mut current = managed.supertype.clone();
            while let Some(parent) = current {
                subtypes
                    .entry(parent.clone())
                    .or_default()
                    .push(managed.name.clone());
                current = types.get(&parent).and_then(|t| t.supertype.clone());
            }
        }
        for names in subtypes.values_mut() {
            names.sort();
        }
        EntityMetamodel { types, subtypes }
    }

    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(|k| k.as_str())
    }

    pub fn require_type(&self, name: &str) -> Result<&ManagedType, SchemaCatalogError> {
        self.types
            .get(name)
            .ok_or_else(|| SchemaCatalogError::UnknownType {
                type_name: name.to_string(),
            })
    }
}

impl SchemaCatalog for EntityMetamodel {
    fn managed_type(&self, name: &str) -> Option<&ManagedType> {
        self.types.get(name)
    }

    fn subtypes(&self, name: &str) -> Vec<&ManagedType> {
        self.subtypes
            .get(name)
            .map(|names| names.iter().filter_map(|n| self.types.get(n)).collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema_catalog::testing::shop_metamodel;

    #[test]
    fn test_inherited_attributes_are_copied() {
        let model = shop_metamodel();
        let vip = model.require_type("VipCustomer").unwrap();
        assert!(vip.attribute("name").is_some());
        assert!(vip.attribute("level").is_some());
        assert_eq!(vip.id_attributes, vec!["id".to_string()]);
        assert_eq!(vip.attribute("name").unwrap().declaring_type, "Customer");
    }

    #[test]
    fn test_subtypes_are_transitive_and_sorted() {
        let model = shop_metamodel();
        let names: Vec<&str> = model
            .subtypes("Document")
            .iter()
            .map(|t| t.name.as_str())
            .collect();
        assert_eq!(names, vec!["Contract", "Memo", "Report"]);
        assert!(model.subtypes("Item").is_empty());
    }

    #[test]
    fn test_attribute_kind_classification() {
        assert!(AttributeKind::OneToMany.is_plural());
        assert!(AttributeKind::ElementCollection.is_joinable());
        assert!(AttributeKind::OneToOne.is_to_one());
        assert!(!AttributeKind::Embedded.is_joinable());
        assert!(!AttributeKind::Basic.is_plural());
    }

    #[test]
    fn test_require_type_unknown() {
        let model = shop_metamodel();
        assert_eq!(
            model.require_type("Nope"),
            Err(SchemaCatalogError::UnknownType {
                type_name: "Nope".to_string()
            })
        );
    }
}
