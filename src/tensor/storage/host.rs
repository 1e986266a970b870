use std::sync::Arc;

/// Immutable view over a shared f32 allocation.
///
/// Weight tensors are views into the single raw weight buffer; every other
/// host tensor owns its allocation outright (`offset == 0`, full length).
#[derive(Clone, Debug)]
pub struct HostStorage {
    data: Arc<Vec<f32>>,
    offset: usize,
    len: usize,
}

impl HostStorage {
    pub fn new(data: Vec<f32>) -> Self {
        let len = data.len();
        Self {
            data: Arc::new(data),
            offset: 0,
            len,
        }
    }

    /// Caller guarantees `offset + len <= data.len()`.
    pub fn view(data: Arc<Vec<f32>>, offset: usize, len: usize) -> Self {
        debug_assert!(offset + len <= data.len());
        Self { data, offset, len }
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data[self.offset..self.offset + self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Fresh allocation with the same contents.
    pub fn deep_copy(&self) -> Self {
        Self::new(self.as_slice().to_vec())
    }

    /// Take the values out, reusing the allocation when this view is its sole
    /// owner and covers all of it.
    pub fn into_vec(self) -> Vec<f32> {
        let full = self.offset == 0 && self.len == self.data.len();
        if full {
            match Arc::try_unwrap(self.data) {
                Ok(vec) => vec,
                Err(shared) => shared.as_slice().to_vec(),
            }
        } else {
            self.as_slice().to_vec()
        }
    }

    pub fn shares_allocation_with(&self, other: &HostStorage) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }
}
