// SessionId - identifies one independent undo/redo history

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Opaque 128-bit identifier of a session.
///
/// The all-zero id is reserved for the engine's built-in session:
/// activating it reverts the calling thread to the default history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    /// The built-in session every thread starts on
    pub const DEFAULT: SessionId = SessionId(Uuid::nil());

    /// Create a fresh random session id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub const fn from_u128(value: u128) -> Self {
        Self(Uuid::from_u128(value))
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Returns true for the reserved built-in session id
    pub fn is_default(&self) -> bool {
        self.0.is_nil()
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl From<Uuid> for SessionId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_default() {
            write!(f, "default")
        } else {
            write!(f, "{}", self.0)
        }
    }
}
