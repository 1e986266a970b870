use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicBool, Ordering},
    },
};

use rustc_hash::FxHashMap;
use tracing::{debug, info, warn};

use crate::{
    gpu::{AcceleratedBackend, create_backend},
    layer::ComputeContext,
    loader::{ArtifactBytes, ArtifactSource, FileSource, LoadProgress, load_artifacts},
    scheduler::{ExecutionOutcome, ExecutionPlan, ScheduleOptions, create_execution_plan, execute_plan},
    tensor::Tensor,
    utils::{bytes::f32_buffer_from_bytes, error::EngineError},
};

use super::{
    config::{ExecutionOptions, ModelConfig},
    description::{DescriptionForm, ModelDescription},
    graph::{GraphBuilder, InputTensor, ModelGraph},
    weights::{WeightBinder, WeightMetadataEntry},
};

/// Output key used for Sequential models.
pub const SEQUENTIAL_OUTPUT_KEY: &str = "output";

/// Decoded artifacts, ready to build a graph from.
#[derive(Clone, Debug)]
pub struct ModelArtifacts {
    pub description: ModelDescription,
    pub weights: Arc<Vec<f32>>,
    pub metadata: Vec<WeightMetadataEntry>,
}

impl ModelArtifacts {
    pub fn new(
        description: ModelDescription,
        weights: Vec<f32>,
        metadata: Vec<WeightMetadataEntry>,
    ) -> Self {
        Self {
            description,
            weights: Arc::new(weights),
            metadata,
        }
    }

    pub fn from_bytes(bytes: &ArtifactBytes) -> Result<Self, EngineError> {
        let description =
            ModelDescription::from_bytes(&bytes.model).map_err(|e| parse_failure("model", e))?;
        let weights = f32_buffer_from_bytes(&bytes.weights)?;
        let metadata = WeightMetadataEntry::parse_table(&bytes.metadata)
            .map_err(|e| parse_failure("metadata", e))?;
        Ok(Self::new(description, weights, metadata))
    }
}

// Only undecodable bytes count as a load failure; engine errors pass through.
fn parse_failure(artifact: &str, err: EngineError) -> EngineError {
    match err {
        EngineError::Parse(e) => EngineError::artifact_load(artifact, e.to_string()),
        EngineError::Io(e) => EngineError::artifact_load(artifact, e.to_string()),
        other => other,
    }
}

/// What a `predict` call leaves behind. Results are host copies, so no
/// device buffer outlives the call that allocated it.
struct LastRun {
    order: Vec<String>,
    results: FxHashMap<String, Tensor>,
    devices: FxHashMap<String, String>,
}

impl LastRun {
    fn retain_on_host(outcome: ExecutionOutcome) -> Result<Self, EngineError> {
        let mut results = FxHashMap::default();
        let mut devices = FxHashMap::default();
        for (name, tensor) in outcome.results {
            devices.insert(name.clone(), tensor.storage().location_string());
            results.insert(name, tensor.to_host()?);
        }
        Ok(Self {
            order: outcome.order,
            results,
            devices,
        })
    }
}

struct BuiltModel {
    graph: ModelGraph,
    plan: ExecutionPlan,
}

/// Holds the running flag for one `predict` call and clears it on drop, so
/// an error anywhere in the call leaves the model usable.
struct RunningGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> RunningGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self, EngineError> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| EngineError::AlreadyRunning)?;
        Ok(Self { flag })
    }
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

pub struct Model {
    config: Option<ModelConfig>,
    options: ExecutionOptions,
    source: Box<dyn ArtifactSource>,
    progress: LoadProgress,
    built: Option<BuiltModel>,
    backend: Option<Arc<dyn AcceleratedBackend>>,
    is_running: AtomicBool,
    last_run: Mutex<Option<LastRun>>,
}

impl Model {
    /// Validate `config`. Artifacts are not touched until [`Model::ready`].
    pub fn new(config: ModelConfig) -> Result<Self, EngineError> {
        let config = config.build()?;
        let options = config.options();
        Ok(Self {
            config: Some(config),
            options,
            source: Box::new(FileSource::new()),
            progress: LoadProgress::new(),
            built: None,
            backend: None,
            is_running: AtomicBool::new(false),
            last_run: Mutex::new(None),
        })
    }

    pub fn with_source(mut self, source: impl ArtifactSource + 'static) -> Self {
        self.source = Box::new(source);
        self
    }

    /// Build directly from in-memory artifacts.
    pub fn from_artifacts(
        options: ExecutionOptions,
        artifacts: ModelArtifacts,
    ) -> Result<Self, EngineError> {
        options.validate()?;
        let binder = WeightBinder::new(artifacts.weights, artifacts.metadata);
        let graph = GraphBuilder::new(&binder).build(&artifacts.description)?;
        Self::from_graph(options, graph)
    }

    /// Wrap an already linked graph, e.g. one assembled by hand.
    pub fn from_graph(options: ExecutionOptions, graph: ModelGraph) -> Result<Self, EngineError> {
        options.validate()?;
        let mut model = Self {
            config: None,
            options,
            source: Box::new(FileSource::new()),
            progress: LoadProgress::new(),
            built: None,
            backend: None,
            is_running: AtomicBool::new(false),
            last_run: Mutex::new(None),
        };
        model.install(graph)?;
        model.progress.complete();
        Ok(model)
    }

    /// Fetch the artifacts, build the graph and bind weights. A no-op for
    /// models that are already built.
    pub fn ready(&mut self) -> Result<(), EngineError> {
        if self.built.is_some() {
            return Ok(());
        }
        let config = self.config.as_ref().ok_or(EngineError::NotReady)?;
        let filepaths = config.filepaths.as_ref().ok_or_else(|| {
            EngineError::Configuration("filepaths (model, weights, metadata) are required".into())
        })?;

        info!(model = %filepaths.model, weights = %filepaths.weights, "loading model artifacts");
        let bytes = load_artifacts(self.source.as_ref(), filepaths, &config.headers, &self.progress)?;
        warn_if_exceeds_host_memory(bytes.weights.len() as u64);

        let artifacts = ModelArtifacts::from_bytes(&bytes)?;
        let binder = WeightBinder::new(artifacts.weights, artifacts.metadata);
        let graph = GraphBuilder::new(&binder).build(&artifacts.description)?;
        self.install(graph)
    }

    fn install(&mut self, graph: ModelGraph) -> Result<(), EngineError> {
        let plan = create_execution_plan(&graph)?;
        info!(
            layers = graph.len(),
            inputs = graph.inputs().len(),
            outputs = plan.output_nodes.len(),
            parameters = graph.parameter_count(),
            "model ready"
        );
        self.built = Some(BuiltModel { graph, plan });
        if self.options.accelerate {
            self.toggle_acceleration(Some(true))?;
        }
        Ok(())
    }

    fn built(&self) -> Result<&BuiltModel, EngineError> {
        self.built.as_ref().ok_or(EngineError::NotReady)
    }

    pub fn is_ready(&self) -> bool {
        self.built.is_some()
    }

    pub fn graph(&self) -> Result<&ModelGraph, EngineError> {
        Ok(&self.built()?.graph)
    }

    pub fn inputs(&self) -> Result<&[InputTensor], EngineError> {
        Ok(self.built()?.graph.inputs())
    }

    pub fn options(&self) -> ExecutionOptions {
        self.options
    }

    pub fn backend(&self) -> Option<&dyn AcceleratedBackend> {
        self.backend.as_deref()
    }

    pub fn load_progress(&self) -> u8 {
        self.progress.overall()
    }

    /// Run one forward pass.
    ///
    /// `inputs` must name exactly the declared inputs, each with the declared
    /// element count. Outputs are keyed `"output"` for Sequential models and
    /// by node name otherwise.
    pub fn predict(
        &self,
        inputs: &HashMap<String, Vec<f32>>,
    ) -> Result<HashMap<String, Vec<f32>>, EngineError> {
        let built = self.built()?;
        let seeds = validate_inputs(built.graph.inputs(), inputs)?;
        let _guard = RunningGuard::acquire(&self.is_running)?;

        let ctx = ComputeContext::with_backend(self.backend.clone());
        let schedule = ScheduleOptions {
            pipeline_mode: self.options.pipeline_mode,
            yield_between_layers: self.options.yield_between_layers,
        };
        self.lock_last_run().take();
        let outcome = execute_plan(&built.graph, &built.plan, seeds, &ctx, schedule)?;
        let run = LastRun::retain_on_host(outcome)?;

        let mut outputs = HashMap::with_capacity(built.plan.output_nodes.len());
        for &id in &built.plan.output_nodes {
            let name = &built.graph.nodes()[id].name;
            let tensor = run.results.get(name).cloned().ok_or_else(|| {
                EngineError::Graph(format!("output '{}' produced no result", name))
            })?;
            let key = match built.graph.form() {
                DescriptionForm::Sequential => SEQUENTIAL_OUTPUT_KEY.to_string(),
                DescriptionForm::Graph => name.clone(),
            };
            outputs.insert(key, tensor.into_vec()?);
        }
        debug!(order = ?run.order, "predict complete");

        *self.lock_last_run() = Some(run);
        Ok(outputs)
    }

    /// Enable, disable (`Some`) or flip (`None`) accelerated execution on
    /// every layer that supports it. Returns the new state.
    pub fn toggle_acceleration(&mut self, enabled: Option<bool>) -> Result<bool, EngineError> {
        let enabled = enabled.unwrap_or(!self.options.accelerate);
        if enabled && self.backend.is_none() {
            let backend = create_backend(self.options.backend, self.options.device_memory_limit)?;
            info!(backend = backend.name(), "accelerated backend created");
            self.backend = Some(backend);
        }
        self.options.accelerate = enabled;

        if let Some(built) = self.built.as_mut() {
            let mut accelerated = 0;
            for layer in built.graph.layers_mut() {
                if !layer.supports_accelerated() {
                    continue;
                }
                layer.set_acceleration(enabled);
                if layer.is_accelerated() {
                    accelerated += 1;
                }
            }
            debug!(enabled, accelerated, "acceleration toggled");
        }
        Ok(enabled)
    }

    /// Host copy of a node's result from the last successful `predict`.
    pub fn layer_result(&self, name: &str) -> Result<Option<Vec<f32>>, EngineError> {
        let tensor = self
            .lock_last_run()
            .as_ref()
            .and_then(|run| run.results.get(name).cloned());
        tensor.map(Tensor::into_vec).transpose()
    }

    /// Node visit order of the last successful `predict`.
    pub fn execution_order(&self) -> Vec<String> {
        self.lock_last_run()
            .as_ref()
            .map(|run| run.order.clone())
            .unwrap_or_default()
    }

    pub fn print_model_stats(&self) -> Result<(), EngineError> {
        crate::compute::print_model_stats::print_model_stats(self)
    }

    pub(crate) fn last_result_device(&self, name: &str) -> Option<String> {
        self.lock_last_run()
            .as_ref()
            .and_then(|run| run.devices.get(name).cloned())
    }

    fn lock_last_run(&self) -> MutexGuard<'_, Option<LastRun>> {
        self.last_run
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn validate_inputs(
    declared: &[InputTensor],
    inputs: &HashMap<String, Vec<f32>>,
) -> Result<FxHashMap<String, Tensor>, EngineError> {
    if let Some(unknown) = inputs
        .keys()
        .find(|name| !declared.iter().any(|d| &d.name == *name))
    {
        return Err(EngineError::InvalidInput(format!(
            "'{}' is not an input of this model, expected {:?}",
            unknown,
            declared.iter().map(|d| d.name.as_str()).collect::<Vec<_>>()
        )));
    }

    let mut seeds = FxHashMap::default();
    for input in declared {
        let values = inputs
            .get(&input.name)
            .ok_or_else(|| EngineError::InvalidInput(format!("missing input '{}'", input.name)))?;
        if values.len() != input.num_elements() {
            return Err(EngineError::InvalidInput(format!(
                "input '{}' has {} values, shape {:?} needs {}",
                input.name,
                values.len(),
                input.shape,
                input.num_elements()
            )));
        }
        seeds.insert(
            input.name.clone(),
            Tensor::new(input.shape.clone(), values.clone())?,
        );
    }
    Ok(seeds)
}

fn warn_if_exceeds_host_memory(weight_bytes: u64) {
    match sys_info::mem_info() {
        Ok(mem) if weight_bytes > mem.avail * 1024 => warn!(
            weight_bytes,
            available_bytes = mem.avail * 1024,
            "weight buffer is larger than available host memory"
        ),
        Ok(_) => {}
        Err(e) => debug!(error = %e, "could not query host memory"),
    }
}
