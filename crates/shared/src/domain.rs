use std::{
    collections::hash_map::DefaultHasher,
    fmt,
    hash::{Hash, Hasher},
};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! id_newtype {
    ($name:ident, $inner:ty) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub $inner);
    };
}

id_newtype!(ListenerId, u64);
id_newtype!(NotificationHandle, Uuid);
id_newtype!(DependencyKey, u64);

impl NotificationHandle {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for NotificationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl DependencyKey {
    /// Key with no dependencies; the submit handle then only changes with eligibility.
    pub const NONE: DependencyKey = DependencyKey(0);

    pub fn of<H: Hash + ?Sized>(dependencies: &H) -> Self {
        let mut hasher = DefaultHasher::new();
        dependencies.hash(&mut hasher);
        Self(hasher.finish())
    }
}

impl Default for DependencyKey {
    fn default() -> Self {
        Self::NONE
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubmitStatus {
    Available,
    Submitting,
    NoConnection,
    Disabled,
}

impl SubmitStatus {
    pub fn is_available(self) -> bool {
        self == SubmitStatus::Available
    }
}

impl fmt::Display for SubmitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SubmitStatus::Available => "AVAILABLE",
            SubmitStatus::Submitting => "SUBMITTING",
            SubmitStatus::NoConnection => "NO_CONNECTION",
            SubmitStatus::Disabled => "DISABLED",
        };
        f.write_str(label)
    }
}

/// Status of a submission slot as a pure function of its inputs.
///
/// A submission already in flight reports `Submitting` even if connectivity
/// drops or the slot is disabled afterwards.
pub fn derive_status(is_connected: bool, running: bool, disabled: bool) -> SubmitStatus {
    if running {
        SubmitStatus::Submitting
    } else if !is_connected {
        SubmitStatus::NoConnection
    } else if disabled {
        SubmitStatus::Disabled
    } else {
        SubmitStatus::Available
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_matches_truth_table_for_every_input() {
        for is_connected in [false, true] {
            for running in [false, true] {
                for disabled in [false, true] {
                    let expected = match (is_connected, running, disabled) {
                        (_, true, _) => SubmitStatus::Submitting,
                        (false, false, _) => SubmitStatus::NoConnection,
                        (true, false, true) => SubmitStatus::Disabled,
                        (true, false, false) => SubmitStatus::Available,
                    };
                    assert_eq!(
                        derive_status(is_connected, running, disabled),
                        expected,
                        "connected={is_connected} running={running} disabled={disabled}"
                    );
                }
            }
        }
    }

    #[test]
    fn only_connected_idle_enabled_slot_is_available() {
        assert!(derive_status(true, false, false).is_available());
        assert!(!derive_status(true, false, true).is_available());
        assert!(!derive_status(false, false, false).is_available());
        assert!(!derive_status(true, true, false).is_available());
    }

    #[test]
    fn dependency_key_is_stable_for_equal_inputs() {
        assert_eq!(DependencyKey::of(&("user", 7)), DependencyKey::of(&("user", 7)));
        assert_ne!(DependencyKey::of(&("user", 7)), DependencyKey::of(&("user", 8)));
    }

    #[test]
    fn generated_handles_are_distinct() {
        assert_ne!(NotificationHandle::generate(), NotificationHandle::generate());
    }

    #[test]
    fn status_serializes_in_screaming_case() {
        let raw = serde_json::to_string(&SubmitStatus::NoConnection).expect("serialize");
        assert_eq!(raw, "\"NO_CONNECTION\"");
        assert_eq!(SubmitStatus::NoConnection.to_string(), "NO_CONNECTION");
    }
}
