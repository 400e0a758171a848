//! Owner tokens
//!
//! A token is generated once per handle. With `OwnerScope::Task` the token
//! used on the wire is derived per call from the current tokio task.

use std::fmt;

use tenure_common::OwnerScope;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OwnerToken(String);

impl OwnerToken {
    /// A fresh token: random UUID plus the process id.
    pub fn generate() -> Self {
        Self(format!("{}:{}", Uuid::new_v4(), std::process::id()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The token that identifies the caller under `scope`.
    ///
    /// Outside a tokio task the handle token is used unchanged.
    pub fn scoped(&self, scope: OwnerScope) -> OwnerToken {
        match scope {
            OwnerScope::Process => self.clone(),
            OwnerScope::Task => match tokio::task::try_id() {
                Some(id) => Self(format!("{}:task-{}", self.0, id)),
                None => self.clone(),
            },
        }
    }
}

impl From<&str> for OwnerToken {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for OwnerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
