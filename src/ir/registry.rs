//! Alias-group registry.
//!
//! Tensor identity is resolved by name: two tensor objects with the same
//! name refer to one logical array, and `T__reduce_init` belongs to the group
//! of `T`. The registry keeps a name index over the tensor arena and the
//! buffer bound to each group, so rebinding a group touches only its members.

use crate::ir::tensor::{BufferId, TensorId, REDUCE_INIT_SUFFIX};
use std::collections::HashMap;

/// Registry of alias groups.
#[derive(Debug, Clone, Default)]
pub struct AliasRegistry {
    /// Tensor name -> tensor objects carrying that name
    by_name: HashMap<String, Vec<TensorId>>,
    /// Group base name -> bound buffer
    groups: HashMap<String, BufferId>,
}

impl AliasRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a tensor object under its name.
    pub fn register(&mut self, name: &str, id: TensorId) {
        let ids = self.by_name.entry(name.to_string()).or_default();
        if !ids.contains(&id) {
            ids.push(id);
        }
    }

    /// Tensor objects named exactly `name`.
    pub fn tensors_named(&self, name: &str) -> &[TensorId] {
        self.by_name.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Members of the alias group rooted at `base`: tensors named `base`
    /// and `base__reduce_init`.
    pub fn group_members(&self, base: &str) -> Vec<TensorId> {
        let companion = format!("{}{}", base, REDUCE_INIT_SUFFIX);
        let mut members = self.tensors_named(base).to_vec();
        members.extend_from_slice(self.tensors_named(&companion));
        members
    }

    /// Bind the group rooted at `base` to `buffer`. Returns the members whose
    /// cached binding must be refreshed.
    pub fn bind_group(&mut self, base: &str, buffer: BufferId) -> Vec<TensorId> {
        self.groups.insert(base.to_string(), buffer);
        self.groups.remove(&format!("{}{}", base, REDUCE_INIT_SUFFIX));
        self.group_members(base)
    }

    /// Record `buffer` under the exact name `key`. Takes precedence over the
    /// binding of the group `key` would otherwise fall into.
    pub fn set_binding(&mut self, key: &str, buffer: BufferId) {
        self.groups.insert(key.to_string(), buffer);
    }

    /// Recorded bindings as `(key, buffer)` pairs.
    pub fn bindings(&self) -> impl Iterator<Item = (&str, BufferId)> {
        self.groups.iter().map(|(k, &b)| (k.as_str(), b))
    }

    /// Rebuild the bindings from the buffers tensor objects carry. The first
    /// object of a name wins; companions agreeing with their base collapse
    /// into the base group.
    pub fn restore_bindings<'a>(&mut self, bound: impl IntoIterator<Item = (&'a str, BufferId)>) {
        for (name, buffer) in bound {
            self.groups.entry(name.to_string()).or_insert(buffer);
        }
        let redundant: Vec<String> = self
            .groups
            .iter()
            .filter(|(key, buffer)| {
                key.strip_suffix(REDUCE_INIT_SUFFIX)
                    .and_then(|base| self.groups.get(base))
                    == Some(*buffer)
            })
            .map(|(key, _)| key.clone())
            .collect();
        for key in redundant {
            self.groups.remove(&key);
        }
    }

    /// Buffer bound to the group a tensor named `name` belongs to, if any.
    pub fn binding_for(&self, name: &str) -> Option<BufferId> {
        if let Some(&buffer) = self.groups.get(name) {
            return Some(buffer);
        }
        name.strip_suffix(REDUCE_INIT_SUFFIX)
            .and_then(|base| self.groups.get(base).copied())
    }

    pub fn clear(&mut self) {
        self.by_name.clear();
        self.groups.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_members() {
        let mut registry = AliasRegistry::new();
        registry.register("C", TensorId(0));
        registry.register("C", TensorId(3));
        registry.register("C__reduce_init", TensorId(1));
        registry.register("D", TensorId(2));

        let members = registry.bind_group("C", BufferId(7));
        assert_eq!(members, vec![TensorId(0), TensorId(3), TensorId(1)]);
        assert_eq!(registry.binding_for("C__reduce_init"), Some(BufferId(7)));
        assert_eq!(registry.binding_for("D"), None);
    }

    #[test]
    fn test_restore_collapses_companions() {
        let mut registry = AliasRegistry::new();
        registry.restore_bindings(vec![
            ("C", BufferId(0)),
            ("C__reduce_init", BufferId(0)),
            ("D__reduce_init", BufferId(1)),
            ("C", BufferId(5)),
        ]);
        assert_eq!(registry.bindings().count(), 2);
        assert_eq!(registry.binding_for("C"), Some(BufferId(0)));
        assert_eq!(registry.binding_for("D__reduce_init"), Some(BufferId(1)));
        assert_eq!(registry.binding_for("D"), None);
    }

    #[test]
    fn test_exact_binding_overrides_group() {
        let mut registry = AliasRegistry::new();
        registry.bind_group("C", BufferId(0));
        registry.set_binding("C__reduce_init", BufferId(2));
        assert_eq!(registry.binding_for("C__reduce_init"), Some(BufferId(2)));
        // Rebinding the group pulls the companion back in
        registry.bind_group("C", BufferId(3));
        assert_eq!(registry.binding_for("C__reduce_init"), Some(BufferId(3)));
    }

    #[test]
    fn test_register_is_idempotent() {
        let mut registry = AliasRegistry::new();
        registry.register("A", TensorId(0));
        registry.register("A", TensorId(0));
        assert_eq!(registry.tensors_named("A").len(), 1);
    }
}
