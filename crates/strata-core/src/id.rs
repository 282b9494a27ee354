//! Statement handles.
//!
//! The processor hands these out from `create_statement`; callers keep them
//! opaque and pass them back to stop, destroy, or attach listeners.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatementId(u64);

impl StatementId {
    pub const fn new(v: u64) -> Self {
        Self(v)
    }

    pub const fn get(self) -> u64 {
        self.0
    }

    /// The handle allocated after this one.
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for StatementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stmt#{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn displays_and_orders() {
        let a = StatementId::new(1);
        assert_eq!(a.to_string(), "stmt#1");
        assert!(a < a.next());
        assert_eq!(a.next().get(), 2);
    }
}
