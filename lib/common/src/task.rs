use crate::config::MAX_TASK_NAME_LEN;
use serde::{Deserialize, Serialize};
use shrinkwraprs::Shrinkwrap;
use std::fmt;

/// Opaque handle of a scheduler task. Handles are only compared for equality (e.g. to
/// recognise the idle task of a core, or to look up a registered stack size).
#[derive(
    Debug,
    Default,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Shrinkwrap,
)]
pub struct TaskHandle(pub u64);

impl TaskHandle {
    pub fn new(handle: u64) -> Self {
        Self(handle)
    }
}

impl From<u64> for TaskHandle {
    fn from(handle: u64) -> Self {
        Self(handle)
    }
}

impl fmt::Display for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TaskHandle({:#x})", self.0)
    }
}

/// Name of a task, bounded the same way the scheduler bounds it.
///
/// Names longer than `MAX_TASK_NAME_LEN - 1` bytes are truncated at construction, on the
/// last UTF-8 character boundary that fits. Two names that only differ past that limit are
/// therefore the same task name.
#[derive(
    Debug, Default, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Shrinkwrap,
)]
#[serde(transparent)]
pub struct TaskName(String);

impl TaskName {
    pub const MAX_LEN: usize = MAX_TASK_NAME_LEN - 1;

    pub fn new(name: &str) -> Self {
        let mut end = name.len().min(Self::MAX_LEN);
        while !name.is_char_boundary(end) {
            end -= 1;
        }
        Self(name[..end].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TaskName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for TaskName {
    fn from(name: String) -> Self {
        Self::new(&name)
    }
}

impl PartialEq<str> for TaskName {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl fmt::Display for TaskName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod task_name_tests {
    use super::*;

    #[test]
    fn short_names_are_kept() {
        let name = TaskName::new("IDLE0");
        assert_eq!(name.as_str(), "IDLE0");
        assert_eq!(&name, "IDLE0");
    }

    #[test]
    fn long_names_are_truncated() {
        let name = TaskName::new("a_really_long_task_name");
        assert_eq!(name.len(), TaskName::MAX_LEN);
        assert_eq!(name.as_str(), "a_really_long_t");
    }

    #[test]
    fn names_equal_up_to_the_limit_collide() {
        assert_eq!(
            TaskName::new("sensor_fusion_task_a"),
            TaskName::new("sensor_fusion_task_b")
        );
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        // 14 ASCII bytes followed by a two-byte character that straddles the limit.
        let name = TaskName::new("abcdefghijklmné");
        assert_eq!(name.as_str(), "abcdefghijklmn");
    }
}
