use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::utils::error::EngineError;

pub struct MemoryTracker {
    maximum: u64,
    current: AtomicU64,
}

// Updates go through a single atomic so the tracker can be shared by every
// buffer a backend hands out without needing a mutable reference.

impl MemoryTracker {
    pub fn new(maximum: u64) -> Self {
        Self {
            maximum,
            current: AtomicU64::new(0),
        }
    }

    pub fn allocate(&self, size: u64) -> Result<(), EngineError> {
        let mut prev = self.current.load(Ordering::Acquire);
        loop {
            let new = prev.checked_add(size).ok_or_else(|| {
                EngineError::Backend(format!(
                    "Memory allocation would overflow: current {} + size {}",
                    prev, size
                ))
            })?;

            if new > self.maximum {
                return Err(EngineError::Backend(format!(
                    "Memory limit exceeded: tried to allocate {} bytes when {} of {} bytes are used",
                    size, prev, self.maximum
                )));
            }

            match self
                .current
                .compare_exchange_weak(prev, new, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return Ok(()),
                Err(actual) => prev = actual,
            }
        }
    }

    pub fn deallocate(&self, size: u64) {
        self.current.fetch_sub(size, Ordering::Release);
    }

    pub fn get_current(&self) -> u64 {
        self.current.load(Ordering::Acquire)
    }

    pub fn get_available(&self) -> u64 {
        self.maximum - self.get_current()
    }

    pub fn get_maximum(&self) -> u64 {
        self.maximum
    }
}

impl fmt::Debug for MemoryTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryTracker")
            .field("current", &self.get_current())
            .field("maximum", &self.maximum)
            .finish()
    }
}
