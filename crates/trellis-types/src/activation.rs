use serde::{Deserialize, Serialize};

/// Why an object is being activated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActivationPurpose {
    /// Read access only.
    Read,
    /// Write intent: the reference is marked dirty and joins the next commit
    /// even if no field is later mutated.
    Write,
}

impl ActivationPurpose {
    /// Returns `true` for [`ActivationPurpose::Write`].
    pub fn is_write(&self) -> bool {
        matches!(self, Self::Write)
    }
}

/// Lifecycle state of an object reference.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActivationState {
    /// Known by id only; the slot has never been decoded.
    Virgin,
    /// A decode is in flight.
    Activating,
    /// Decoded; the reference owns a live value.
    Active,
    /// Previously active; the value has been dropped.
    Deactivated,
}

impl ActivationState {
    /// Returns `true` if the reference holds a live value.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }

    /// Returns `true` if activation must read the slot.
    pub fn needs_read(&self) -> bool {
        matches!(self, Self::Virgin | Self::Deactivated)
    }
}

impl std::fmt::Display for ActivationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Virgin => write!(f, "virgin"),
            Self::Activating => write!(f, "activating"),
            Self::Active => write!(f, "active"),
            Self::Deactivated => write!(f, "deactivated"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_active_is_active() {
        assert!(ActivationState::Active.is_active());
        assert!(!ActivationState::Virgin.is_active());
        assert!(!ActivationState::Activating.is_active());
        assert!(!ActivationState::Deactivated.is_active());
    }

    #[test]
    fn read_required_for_virgin_and_deactivated() {
        assert!(ActivationState::Virgin.needs_read());
        assert!(ActivationState::Deactivated.needs_read());
        assert!(!ActivationState::Active.needs_read());
    }

    #[test]
    fn purpose_write_flag() {
        assert!(ActivationPurpose::Write.is_write());
        assert!(!ActivationPurpose::Read.is_write());
    }
}
