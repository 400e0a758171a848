//! Outcomes and snapshots returned by a coordinator

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Result of an acquire attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// The caller now holds the lock `hold_count` times
    Granted { hold_count: u32 },
    /// Another owner holds the lock; its lease has `remaining_ttl` left
    Denied { remaining_ttl: Duration },
}

impl AcquireOutcome {
    pub fn is_granted(&self) -> bool {
        matches!(self, AcquireOutcome::Granted { .. })
    }

    /// Remaining lease of the current holder, if the attempt was denied
    pub fn remaining_ttl(&self) -> Option<Duration> {
        match self {
            AcquireOutcome::Denied { remaining_ttl } => Some(*remaining_ttl),
            AcquireOutcome::Granted { .. } => None,
        }
    }
}

/// Result of a release attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReleaseOutcome {
    /// The record is absent or held by someone else; nothing changed
    NotOwner,
    /// One reentrant hold was released; the lock is still held
    Partial { remaining: u32 },
    /// The last hold was released and the record deleted
    FullyReleased,
}

impl ReleaseOutcome {
    /// Whether this call released a hold owned by the caller
    pub fn is_released(&self) -> bool {
        !matches!(self, ReleaseOutcome::NotOwner)
    }
}

/// Advisory view of a lock record
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LockSnapshot {
    pub held: bool,
    /// Remaining lease; `None` when the lock is not held
    #[serde(with = "millis", rename = "ttl_ms")]
    pub ttl: Option<Duration>,
    pub owner: Option<String>,
    pub hold_count: u32,
}

impl LockSnapshot {
    pub fn unlocked() -> Self {
        Self::default()
    }

    pub fn is_owned_by(&self, owner: &str) -> bool {
        self.held && self.owner.as_deref() == Some(owner)
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ttl: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match ttl {
            Some(ttl) => s.serialize_some(&(ttl.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}
