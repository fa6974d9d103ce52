//! Small shared value types: priority classes and identifiers.

use serde::{Deserialize, Serialize};

/// Identifier assigned to a task when it is added to the engine.
pub type TaskId = u64;

/// Priority class of a work item or callback.
///
/// `High` items are inserted at the front of their queue and therefore
/// precede every normal item that has not been claimed yet. Within one class
/// ordering is FIFO.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Appended to the back of the queue.
    #[default]
    Normal,
    /// Pushed to the front of the queue.
    High,
}

impl Priority {
    /// Returns `true` for [`Priority::High`].
    #[must_use]
    pub const fn is_high(self) -> bool {
        matches!(self, Self::High)
    }
}

/// Handle returned by `Engine::schedule_timed`, used to cancel the timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TimedHandle(pub(crate) u64);

impl TimedHandle {
    /// Raw numeric identifier, e.g. for handing to a scripting layer.
    #[must_use]
    pub const fn id(self) -> u64 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_default_is_normal() {
        assert_eq!(Priority::default(), Priority::Normal);
        assert!(Priority::High.is_high());
        assert!(!Priority::Normal.is_high());
    }

    #[test]
    fn test_priority_serde_names() {
        let json = serde_json::to_string(&Priority::High).unwrap();
        assert_eq!(json, "\"high\"");
        let parsed: Priority = serde_json::from_str("\"normal\"").unwrap();
        assert_eq!(parsed, Priority::Normal);
    }
}
