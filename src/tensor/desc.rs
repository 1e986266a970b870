use std::fmt;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TensorDesc {
    dims: Vec<usize>,
}

impl TensorDesc {
    pub fn new(dims: Vec<usize>) -> Self {
        Self { dims }
    }

    pub fn num_elements(&self) -> usize {
        self.dims.iter().product()
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn ndim(&self) -> usize {
        self.dims.len()
    }

    pub fn last_dim(&self) -> usize {
        self.dims.last().copied().unwrap_or(1)
    }

    // Reshape to new dimensions (preserving total elements)
    pub fn reshape(&mut self, new_dims: Vec<usize>) -> Result<(), String> {
        let new_elements: usize = new_dims.iter().product();
        if new_elements != self.num_elements() {
            return Err(format!(
                "cannot reshape {} into {:?}: element count {} != {}",
                self,
                new_dims,
                self.num_elements(),
                new_elements
            ));
        }

        self.dims = new_dims;
        Ok(())
    }

    /// Resolve a Keras-style axis (which counts the batch dimension) into an index
    /// into these batchless dims. `-1` is the last axis, `1` is the first.
    pub fn resolve_axis(&self, axis: i64) -> Option<usize> {
        let ndim = self.ndim() as i64;
        let resolved = if axis < 0 { ndim + axis } else { axis - 1 };
        if resolved < 0 || resolved >= ndim {
            None
        } else {
            Some(resolved as usize)
        }
    }
}

impl fmt::Display for TensorDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dims: Vec<String> = self.dims.iter().map(|d| d.to_string()).collect();
        write!(f, "[{}]", dims.join("×"))
    }
}
