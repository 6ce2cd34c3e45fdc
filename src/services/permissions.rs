use std::collections::{BTreeSet, HashSet};

/// Capability check backing section editability.
pub trait Permissions {
    fn has_permission(&self, name: &str) -> bool;
}

impl Permissions for HashSet<String> {
    fn has_permission(&self, name: &str) -> bool {
        self.contains(name)
    }
}

impl Permissions for BTreeSet<String> {
    fn has_permission(&self, name: &str) -> bool {
        self.contains(name)
    }
}

/// Grants everything. Used when no user context is wired in.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl Permissions for AllowAll {
    fn has_permission(&self, _name: &str) -> bool {
        true
    }
}
