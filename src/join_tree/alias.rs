//! Alias registry.
//!
//! Every query (and every subquery) owns one [`AliasScope`]; scopes live in an arena
//! and point at their enclosing scope. An alias found through the parent chain rather
//! than in the scope doing the lookup is external.

use std::collections::HashMap;

use regex::Regex;

use super::JoinNodeId;
use crate::expression::Expression;
use crate::join_manager::errors::JoinError;

lazy_static::lazy_static! {
    static ref ALIAS_PATTERN: Regex =
        Regex::new(r"^[A-Za-z_$][A-Za-z0-9_$]*$").expect("alias pattern is valid");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(usize);

#[derive(Debug, Clone, PartialEq)]
pub enum AliasTarget {
    Join(JoinNodeId),
    Select(Expression),
}

#[derive(Debug, Clone, PartialEq)]
pub struct AliasInfo {
    pub alias: String,
    /// Absolute path the alias was registered for, e.g. `o.items`
    pub path: String,
    pub implicit: bool,
    pub owner: ScopeId,
    pub target: AliasTarget,
}

impl AliasInfo {
    pub fn join_node(&self) -> Option<JoinNodeId> {
        match self.target {
            AliasTarget::Join(id) => Some(id),
            AliasTarget::Select(_) => None,
        }
    }

    pub fn is_select_alias(&self) -> bool {
        matches!(self.target, AliasTarget::Select(_))
    }
}

#[derive(Debug, Clone)]
pub struct AliasScope {
    pub id: ScopeId,
    pub parent: Option<ScopeId>,
    aliases: HashMap<String, AliasInfo>,
    counters: HashMap<String, usize>,
}

#[derive(Debug, Clone, Default)]
pub struct AliasRegistry {
    scopes: Vec<AliasScope>,
}

pub fn is_valid_alias(alias: &str) -> bool {
    ALIAS_PATTERN.is_match(alias)
}

impl AliasRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_scope(&mut self, parent: Option<ScopeId>) -> ScopeId {
        let id = ScopeId(self.scopes.len());
        self.scopes.push(AliasScope {
            id,
            parent,
            aliases: HashMap::new(),
            counters: HashMap::new(),
        });
        id
    }

    pub fn scope(&self, id: ScopeId) -> &AliasScope {
        &self.scopes[id.0]
    }

    /// Looks up `alias` in `scope`, then in its enclosing scopes
    pub fn lookup(&self, scope: ScopeId, alias: &str) -> Option<&AliasInfo> {
        let mut current = Some(scope);
        while let Some(id) = current {
            let s = &self.scopes[id.0];
            if let Some(info) = s.aliases.get(alias) {
                return Some(info);
            }
            current = s.parent;
        }
        None
    }

    pub fn lookup_local(&self, scope: ScopeId, alias: &str) -> Option<&AliasInfo> {
        self.scopes[scope.0].aliases.get(alias)
    }

    /// True when `info` was registered by an enclosing query rather than `scope`
    pub fn is_external(&self, scope: ScopeId, info: &AliasInfo) -> bool {
        info.owner != scope
    }

    pub fn register(&mut self, info: AliasInfo) -> Result<(), JoinError> {
        if !is_valid_alias(&info.alias) {
            return Err(JoinError::InvalidAlias { alias: info.alias });
        }
        if let Some(existing) = self.lookup(info.owner, &info.alias) {
            return Err(conflict(existing, &info.alias, &info.path));
        }
        log::trace!("Registered alias {} for {}", info.alias, info.path);
        self.scopes[info.owner.0]
            .aliases
            .insert(info.alias.clone(), info);
        Ok(())
    }

    /// Fails if `alias` is visible from `scope` for anything but `path`
    pub fn check_available(&self, scope: ScopeId, alias: &str, path: &str) -> Result<(), JoinError> {
        if !is_valid_alias(alias) {
            return Err(JoinError::InvalidAlias {
                alias: alias.to_string(),
            });
        }
        match self.lookup(scope, alias) {
            Some(existing) if existing.is_select_alias() || existing.path != path => {
                Err(conflict(existing, alias, path))
            }
            _ => Ok(()),
        }
    }

    pub fn unregister(&mut self, scope: ScopeId, alias: &str) -> Option<AliasInfo> {
        self.scopes[scope.0].aliases.remove(alias)
    }

    /// `base` followed by the separator and the lowest counter that yields an alias
    /// not visible from `scope`: `items_1`, `items_2`, ...
    pub fn generate_postfixed_alias(&mut self, scope: ScopeId, base: &str, separator: &str) -> String {
        let mut counter = self.scopes[scope.0]
            .counters
            .get(base)
            .copied()
            .unwrap_or(0);
        loop {
            counter += 1;
            let candidate = format!("{}{}{}", base, separator, counter);
            if self.lookup(scope, &candidate).is_none() {
                self.scopes[scope.0].counters.insert(base.to_string(), counter);
                return candidate;
            }
        }
    }

    /// All aliases registered in `scope`, sorted
    pub fn local_aliases(&self, scope: ScopeId) -> Vec<&AliasInfo> {
        let mut all: Vec<&AliasInfo> = self.scopes[scope.0].aliases.values().collect();
        all.sort_by(|a, b| a.alias.cmp(&b.alias));
        all
    }
}

pub(crate) fn conflict(existing: &AliasInfo, alias: &str, path: &str) -> JoinError {
    match &existing.target {
        AliasTarget::Select(expression) => JoinError::SelectAliasConflict {
            alias: alias.to_string(),
            expression: expression.to_string(),
        },
        AliasTarget::Join(_) => JoinError::AliasConflict {
            existing_alias: existing.alias.clone(),
            existing_path: existing.path.clone(),
            alias: alias.to_string(),
            path: path.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn join_alias(scope: ScopeId, alias: &str, path: &str, node: usize) -> AliasInfo {
        AliasInfo {
            alias: alias.to_string(),
            path: path.to_string(),
            implicit: false,
            owner: scope,
            target: AliasTarget::Join(JoinNodeId::from_index(node)),
        }
    }

    #[test]
    fn test_lookup_falls_back_to_parent_scope() {
        let mut registry = AliasRegistry::new();
        let outer = registry.create_scope(None);
        let inner = registry.create_scope(Some(outer));
        registry.register(join_alias(outer, "o", "o", 0)).unwrap();

        let info = registry.lookup(inner, "o").unwrap();
        assert!(registry.is_external(inner, info));
        assert!(!registry.is_external(outer, info));
        assert!(registry.lookup_local(inner, "o").is_none());
    }

    #[test]
    fn test_register_conflict_reports_both_paths() {
        let mut registry = AliasRegistry::new();
        let scope = registry.create_scope(None);
        registry.register(join_alias(scope, "c", "o.customer", 0)).unwrap();
        let err = registry
            .register(join_alias(scope, "c", "o.items", 1))
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Alias conflict [c=o.customer, c=o.items]"
        );
    }

    #[test]
    fn test_select_alias_conflict() {
        let mut registry = AliasRegistry::new();
        let scope = registry.create_scope(None);
        registry
            .register(AliasInfo {
                alias: "total".to_string(),
                path: "total".to_string(),
                implicit: false,
                owner: scope,
                target: AliasTarget::Select(Expression::path("o.total")),
            })
            .unwrap();
        assert!(matches!(
            registry.check_available(scope, "total", "o.items"),
            Err(JoinError::SelectAliasConflict { .. })
        ));
    }

    #[test]
    fn test_check_available_same_path_is_ok() {
        let mut registry = AliasRegistry::new();
        let scope = registry.create_scope(None);
        registry.register(join_alias(scope, "c", "o.customer", 0)).unwrap();
        assert!(registry.check_available(scope, "c", "o.customer").is_ok());
        assert!(registry.check_available(scope, "d", "o.customer").is_ok());
    }

    #[test]
    fn test_generate_postfixed_alias_skips_taken() {
        let mut registry = AliasRegistry::new();
        let scope = registry.create_scope(None);
        registry.register(join_alias(scope, "items_1", "o.items", 0)).unwrap();
        assert_eq!(registry.generate_postfixed_alias(scope, "items", "_"), "items_2");
        assert_eq!(registry.generate_postfixed_alias(scope, "items", "_"), "items_3");
        assert_eq!(registry.generate_postfixed_alias(scope, "tags", "_"), "tags_1");
    }

    #[test]
    fn test_invalid_alias_rejected() {
        let mut registry = AliasRegistry::new();
        let scope = registry.create_scope(None);
        assert!(matches!(
            registry.register(join_alias(scope, "1abc", "o", 0)),
            Err(JoinError::InvalidAlias { .. })
        ));
        assert!(is_valid_alias("item_1"));
        assert!(!is_valid_alias("a.b"));
    }
}
