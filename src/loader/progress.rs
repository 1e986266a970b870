use std::sync::atomic::{AtomicU8, Ordering};

/// The three artifacts a model is built from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArtifactKind {
    Model,
    Weights,
    Metadata,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 3] = [Self::Model, Self::Weights, Self::Metadata];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Model => "model",
            Self::Weights => "weights",
            Self::Metadata => "metadata",
        }
    }

    fn index(&self) -> usize {
        match self {
            Self::Model => 0,
            Self::Weights => 1,
            Self::Metadata => 2,
        }
    }
}

/// Percent complete per artifact, updated by the loader threads.
#[derive(Debug, Default)]
pub struct LoadProgress {
    percent: [AtomicU8; 3],
}

impl LoadProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counter(&self, kind: ArtifactKind) -> &AtomicU8 {
        &self.percent[kind.index()]
    }

    pub fn get(&self, kind: ArtifactKind) -> u8 {
        self.counter(kind).load(Ordering::Relaxed)
    }

    /// Rounded mean of the three percentages.
    pub fn overall(&self) -> u8 {
        let sum: u32 = ArtifactKind::ALL.iter().map(|&k| self.get(k) as u32).sum();
        ((sum as f32) / 3.0).round() as u8
    }

    pub fn complete(&self) {
        for counter in &self.percent {
            counter.store(100, Ordering::Relaxed);
        }
    }
}
