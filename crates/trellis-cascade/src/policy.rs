use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use trellis_types::{FieldKind, FieldLink, FieldPolicy};

/// Cascade-on-delete configuration: one [`FieldPolicy`] per field name.
///
/// Fields without an entry use the default policy (`Inherit` unless
/// changed).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CascadePolicies {
    #[serde(default)]
    fields: BTreeMap<String, FieldPolicy>,
    #[serde(default)]
    default: FieldPolicy,
}

impl CascadePolicies {
    /// All fields `Inherit`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a field map and a default.
    pub fn from_map(fields: BTreeMap<String, FieldPolicy>, default: FieldPolicy) -> Self {
        Self { fields, default }
    }

    /// Builder-style per-field policy.
    pub fn with(mut self, field: impl Into<String>, policy: FieldPolicy) -> Self {
        self.fields.insert(field.into(), policy);
        self
    }

    /// Set the policy for one field.
    pub fn set(&mut self, field: impl Into<String>, policy: FieldPolicy) -> &mut Self {
        self.fields.insert(field.into(), policy);
        self
    }

    /// Set the policy used for fields without an entry.
    pub fn set_default(&mut self, policy: FieldPolicy) -> &mut Self {
        self.default = policy;
        self
    }

    /// Policy for a field name.
    pub fn policy_for(&self, field: &str) -> FieldPolicy {
        self.fields.get(field).copied().unwrap_or(self.default)
    }

    /// Levels left below a child reached through `link`, given the parent
    /// has `remaining` levels below it. `None` means the child is not
    /// entered.
    pub fn child_budget(&self, link: &FieldLink, remaining: u32) -> Option<u32> {
        match self.policy_for(&link.field) {
            FieldPolicy::ForceCascade => Some(0),
            FieldPolicy::ForceNoCascade => None,
            FieldPolicy::Inherit => match link.kind {
                FieldKind::Embedded => Some(0),
                FieldKind::Reference => remaining.checked_sub(1),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_types::ObjectId;

    fn reference(field: &str) -> FieldLink {
        FieldLink::reference(field, ObjectId::new(1))
    }

    #[test]
    fn unknown_fields_use_default() {
        let policies = CascadePolicies::new().with("owner", FieldPolicy::ForceNoCascade);
        assert_eq!(policies.policy_for("owner"), FieldPolicy::ForceNoCascade);
        assert_eq!(policies.policy_for("other"), FieldPolicy::Inherit);

        let mut policies = policies;
        policies.set_default(FieldPolicy::ForceCascade);
        assert_eq!(policies.policy_for("other"), FieldPolicy::ForceCascade);
    }

    #[test]
    fn inherit_passes_budget_down() {
        let policies = CascadePolicies::new();
        assert_eq!(policies.child_budget(&reference("a"), 3), Some(2));
        assert_eq!(policies.child_budget(&reference("a"), 0), None);
    }

    #[test]
    fn force_policies_ignore_budget() {
        let policies = CascadePolicies::new()
            .with("always", FieldPolicy::ForceCascade)
            .with("never", FieldPolicy::ForceNoCascade);
        assert_eq!(policies.child_budget(&reference("always"), 0), Some(0));
        assert_eq!(policies.child_budget(&reference("always"), 9), Some(0));
        assert_eq!(policies.child_budget(&reference("never"), 9), None);
    }

    #[test]
    fn embedded_inherit_always_enters_one_level() {
        let policies = CascadePolicies::new();
        let link = FieldLink::embedded("address", ObjectId::new(2));
        assert_eq!(policies.child_budget(&link, 0), Some(0));
        assert_eq!(policies.child_budget(&link, 7), Some(0));
    }

    #[test]
    fn serde_roundtrip() {
        let policies = CascadePolicies::new().with("items", FieldPolicy::ForceCascade);
        let json = serde_json::to_string(&policies).unwrap();
        let back: CascadePolicies = serde_json::from_str(&json).unwrap();
        assert_eq!(back, policies);
    }
}
