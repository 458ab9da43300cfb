use parking_lot::Mutex;
use ulid::{Generator, Ulid};

/// Identifier used for row sets and the files backing them.
pub type RowSetId = Ulid;

/// Thread-safe ULID generator scoped to a single tablet.
pub struct RowSetIdGenerator {
    inner: Mutex<Generator>,
}

impl RowSetIdGenerator {
    /// Create a new generator seeded with the current time.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Generator::new()),
        }
    }

    /// Produce the next [`RowSetId`] in a monotonic, time-ordered sequence.
    ///
    /// Falls back to a fresh random id if the generator's random component
    /// overflows within the same millisecond.
    pub fn generate(&self) -> RowSetId {
        self.inner.lock().generate().unwrap_or_else(|_| Ulid::new())
    }
}

impl Default for RowSetIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::RowSetIdGenerator;

    #[test]
    fn ids_are_monotonic() {
        let generator = RowSetIdGenerator::new();
        let first = generator.generate();
        let second = generator.generate();
        assert!(second > first);
    }
}
