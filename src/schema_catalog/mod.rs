//! Schema catalog: the typed entity/attribute model path resolution runs against.
//!
//! The planner only needs read access through [`SchemaCatalog`]. [`EntityMetamodel`]
//! is the bundled implementation, loaded from a YAML schema definition.

pub mod config;
pub mod errors;
pub mod metamodel;

#[cfg(test)]
pub mod testing;

use std::fmt;

pub use config::{AttributeDefinition, EntityDefinition, Identifier, SchemaDefinition};
pub use errors::SchemaCatalogError;
pub use metamodel::{
    AttributeDescriptor, AttributeKind, CollectionKind, EntityMetamodel, ManagedType, TypeKind,
};

/// Read-only view of managed types, queried by type name.
pub trait SchemaCatalog: fmt::Debug {
    fn managed_type(&self, name: &str) -> Option<&ManagedType>;

    /// All transitive subtypes of `name`, excluding `name` itself
    fn subtypes(&self, name: &str) -> Vec<&ManagedType>;

    fn attribute(&self, type_name: &str, attribute: &str) -> Option<&AttributeDescriptor> {
        self.managed_type(type_name)?.attribute(attribute)
    }

    /// Looks up `attribute` on `type_name`, falling back to its subtypes. A subtype
    /// attribute is only accepted when every subtype declaring it agrees on kind and
    /// target.
    fn polymorphic_attribute(
        &self,
        type_name: &str,
        attribute: &str,
    ) -> Result<&AttributeDescriptor, SchemaCatalogError> {
        if let Some(attr) = self.attribute(type_name, attribute) {
            return Ok(attr);
        }
        if self.managed_type(type_name).is_none() {
            return Err(SchemaCatalogError::UnknownType {
                type_name: type_name.to_string(),
            });
        }

        let candidates: Vec<&AttributeDescriptor> = self
            .subtypes(type_name)
            .into_iter()
            .filter_map(|t| t.attribute(attribute))
            .collect();

        match candidates.split_first() {
            None => Err(SchemaCatalogError::UnknownAttribute {
                type_name: type_name.to_string(),
                attribute: attribute.to_string(),
            }),
            Some((first, rest)) => {
                if rest
                    .iter()
                    .all(|c| c.kind == first.kind && c.target == first.target)
                {
                    Ok(*first)
                } else {
                    let listed = candidates
                        .iter()
                        .map(|c| format!("{}.{} -> {}", c.declaring_type, c.name, c.target))
                        .collect::<Vec<_>>()
                        .join(", ");
                    Err(SchemaCatalogError::AmbiguousAttribute {
                        type_name: type_name.to_string(),
                        attribute: attribute.to_string(),
                        candidates: listed,
                    })
                }
            }
        }
    }

    /// Resolves a dotted attribute path through embeddables and to-one associations,
    /// e.g. `shippingAddress.city` or `customer.id`.
    fn resolve_attribute_path(
        &self,
        type_name: &str,
        path: &str,
    ) -> Result<&AttributeDescriptor, SchemaCatalogError> {
        let segments: Vec<&str> = path.split('.').collect();
        let mut current = type_name;
        for (i, segment) in segments.iter().enumerate() {
            let attr = self.polymorphic_attribute(current, segment)?;
            if i + 1 == segments.len() {
                return Ok(attr);
            }
            if attr.kind == AttributeKind::Embedded || attr.kind.is_to_one() {
                current = &attr.target;
            } else {
                return Err(SchemaCatalogError::attribute_error_with_context(
                    current,
                    segments[i + 1..].join("."),
                    format!("`{}` is not a singular managed attribute", segment),
                ));
            }
        }
        Err(SchemaCatalogError::UnknownAttribute {
            type_name: type_name.to_string(),
            attribute: path.to_string(),
        })
    }

    /// Identifier attributes of `type_name`, flattened through embedded identifiers
    /// (`id.orderNumber`, `id.lineNumber`).
    fn identifier_paths(&self, type_name: &str) -> Vec<String> {
        let Some(managed) = self.managed_type(type_name) else {
            return Vec::new();
        };
        let mut paths = Vec::new();
        for id in &managed.id_attributes {
            if let Some(attr) = managed.attribute(id) {
                collect_leaf_paths(self, attr, id.clone(), &mut paths);
            }
        }
        paths
    }

    /// Non-collection attributes of `type_name`, flattened. Used as the identifying
    /// set of types that declare no identifier.
    fn singular_paths(&self, type_name: &str) -> Vec<String> {
        let Some(managed) = self.managed_type(type_name) else {
            return Vec::new();
        };
        let mut paths = Vec::new();
        for attr in managed.attributes.values().filter(|a| !a.is_plural()) {
            collect_leaf_paths(self, attr, attr.name.clone(), &mut paths);
        }
        paths
    }

    /// Attribute paths of `type_name` stored in exactly the same columns as `path`.
    /// To-one associations are reported as `<association>.<target id>`.
    fn column_equivalent_attributes(&self, type_name: &str, path: &str) -> Vec<String> {
        let mut mapped = Vec::new();
        if let Some(managed) = self.managed_type(type_name) {
            for attr in managed.attributes.values().filter(|a| !a.is_plural()) {
                collect_column_paths(self, attr, attr.name.clone(), None, &mut mapped);
            }
        }

        let Some((_, columns)) = mapped.iter().find(|(p, _)| p == path) else {
            return Vec::new();
        };
        if columns.is_empty() {
            return Vec::new();
        }
        mapped
            .iter()
            .filter(|(p, c)| p != path && c == columns)
            .map(|(p, _)| p.clone())
            .collect()
    }
}

fn collect_leaf_paths<C: SchemaCatalog + ?Sized>(
    catalog: &C,
    attr: &AttributeDescriptor,
    prefix: String,
    out: &mut Vec<String>,
) {
    if attr.kind != AttributeKind::Embedded {
        out.push(prefix);
        return;
    }
    if let Some(embeddable) = catalog.managed_type(&attr.target) {
        for sub in embeddable.attributes.values().filter(|a| !a.is_plural()) {
            collect_leaf_paths(catalog, sub, format!("{}.{}", prefix, sub.name), out);
        }
    }
}

fn collect_column_paths<C: SchemaCatalog + ?Sized>(
    catalog: &C,
    attr: &AttributeDescriptor,
    prefix: String,
    column_prefix: Option<&str>,
    out: &mut Vec<(String, Vec<String>)>,
) {
    let qualify = |columns: &[String]| -> Vec<String> {
        match column_prefix {
            Some(p) => columns.iter().map(|c| format!("{}.{}", p, c)).collect(),
            None => columns.to_vec(),
        }
    };

    match attr.kind {
        AttributeKind::Embedded => {
            if let Some(embeddable) = catalog.managed_type(&attr.target) {
                let nested_prefix = match column_prefix {
                    Some(p) => format!("{}.{}", p, attr.name),
                    None => attr.name.clone(),
                };
                for sub in embeddable.attributes.values().filter(|a| !a.is_plural()) {
                    collect_column_paths(
                        catalog,
                        sub,
                        format!("{}.{}", prefix, sub.name),
                        Some(&nested_prefix),
                        out,
                    );
                }
            }
        }
        AttributeKind::ManyToOne | AttributeKind::OneToOne => {
            let target_ids = catalog
                .managed_type(&attr.target)
                .map(|t| t.id_attributes.clone())
                .unwrap_or_default();
            if let [id] = target_ids.as_slice() {
                out.push((format!("{}.{}", prefix, id), qualify(&attr.columns)));
            }
        }
        _ => out.push((prefix, qualify(&attr.columns))),
    }
}
