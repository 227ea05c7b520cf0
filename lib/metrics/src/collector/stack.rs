use serde::Serialize;

/// Stack usage of a task, derived from its high-water-mark and registered stack size.
///
/// The high-water-mark only ever shrinks over a task's life, so the derived usage is the
/// worst case seen so far and never decreases until the task is recreated.
#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize)]
pub struct StackUsage {
    /// Registered stack size; `0` when the task was never registered.
    size_bytes: u32,
    high_water_mark_bytes: u32,
    used_bytes: u32,
    used_percent: f32,
}

impl StackUsage {
    pub fn compute(high_water_mark_words: u32, word_size: u32, registered: Option<u32>) -> Self {
        let high_water_mark_bytes = high_water_mark_words.saturating_mul(word_size);
        let size_bytes = registered.unwrap_or(0);

        if size_bytes == 0 {
            return Self {
                high_water_mark_bytes,
                ..Self::default()
            };
        }

        let used_bytes = size_bytes.saturating_sub(high_water_mark_bytes);
        Self {
            size_bytes,
            high_water_mark_bytes,
            used_bytes,
            used_percent: (used_bytes as f64 * 100.0 / size_bytes as f64) as f32,
        }
    }

    /// Whether a stack size was registered. Unregistered tasks report zero usage, which
    /// must be shown as unknown rather than as an empty stack.
    pub fn is_registered(&self) -> bool {
        self.size_bytes > 0
    }

    pub fn size_bytes(&self) -> u32 {
        self.size_bytes
    }

    pub fn high_water_mark_bytes(&self) -> u32 {
        self.high_water_mark_bytes
    }

    pub fn used_bytes(&self) -> u32 {
        self.used_bytes
    }

    pub fn used_percent(&self) -> f32 {
        self.used_percent
    }
}
