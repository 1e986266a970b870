//! Concurrent artifact loading.
//!
//! Each of the three artifacts is fetched on its own scoped thread. The first
//! failure raises a shared cancel flag so the other fetches stop at their next
//! chunk, and that first failure is what the caller sees.

pub mod progress;
pub mod source;

use std::{
    collections::BTreeMap,
    sync::atomic::{AtomicBool, Ordering},
    thread,
};

use tracing::{info, warn};

use crate::{model::config::ModelFilepaths, utils::error::EngineError};

pub use progress::{ArtifactKind, LoadProgress};
pub use source::{ArtifactSource, FileSource};

/// Raw bytes of the three artifacts.
#[derive(Clone, Debug, Default)]
pub struct ArtifactBytes {
    pub model: Vec<u8>,
    pub weights: Vec<u8>,
    pub metadata: Vec<u8>,
}

pub fn load_artifacts(
    source: &dyn ArtifactSource,
    filepaths: &ModelFilepaths,
    headers: &BTreeMap<String, String>,
    progress: &LoadProgress,
) -> Result<ArtifactBytes, EngineError> {
    let cancel = AtomicBool::new(false);

    let fetch = |kind: ArtifactKind, location: &str| -> Result<Vec<u8>, EngineError> {
        let result = source.fetch(location, headers, progress.counter(kind), &cancel);
        if let Err(err) = &result {
            // Only the first failure is reported; the rest see Cancelled.
            if !cancel.swap(true, Ordering::SeqCst) {
                warn!(artifact = kind.as_str(), location, error = %err, "artifact load failed");
            }
        }
        result.map_err(|err| match err {
            EngineError::Cancelled(_) => err,
            other => EngineError::artifact_load(kind.as_str(), other.to_string()),
        })
    };

    let (model, weights, metadata) = thread::scope(|scope| {
        let model = scope.spawn(|| fetch(ArtifactKind::Model, &filepaths.model));
        let weights = scope.spawn(|| fetch(ArtifactKind::Weights, &filepaths.weights));
        let metadata = scope.spawn(|| fetch(ArtifactKind::Metadata, &filepaths.metadata));
        (join(model), join(weights), join(metadata))
    });

    let bytes = match [model, weights, metadata] {
        [Ok(model), Ok(weights), Ok(metadata)] => ArtifactBytes {
            model,
            weights,
            metadata,
        },
        results => return Err(first_failure(results)),
    };

    info!(
        model_bytes = bytes.model.len(),
        weight_bytes = bytes.weights.len(),
        metadata_bytes = bytes.metadata.len(),
        "artifacts loaded"
    );
    Ok(bytes)
}

fn join(
    handle: thread::ScopedJoinHandle<'_, Result<Vec<u8>, EngineError>>,
) -> Result<Vec<u8>, EngineError> {
    handle
        .join()
        .unwrap_or_else(|_| Err(EngineError::artifact_load("unknown", "loader thread panicked")))
}

// The real failure rather than the cancellations it caused.
fn first_failure(results: [Result<Vec<u8>, EngineError>; 3]) -> EngineError {
    results
        .into_iter()
        .filter_map(Result::err)
        .reduce(|first, next| match first {
            EngineError::Cancelled(_) => next,
            _ => first,
        })
        .unwrap_or_else(|| EngineError::Cancelled("artifact load".into()))
}
