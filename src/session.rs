//! Session facade (§4.8): binds configuration, graph, providers, optimizer,
//! memory planner and scheduler into the public run loop.
//!
//! **[SUPPLEMENT]** Entirely new relative to the teacher, which exposes a
//! bare `Graph` with no facade, config, or provider selection. Grounded on
//! the `ort`-style session builder pattern from the broader example pack
//! (`IntelligentRoboticsLab-yggdrasil` `crates/ml-ort/src/backend.rs`:
//! `Session::builder()...commit_from_file(...)`), adapted into
//! `Session::create(config) -> load_model(...) -> run(...)` while keeping
//! the teacher's own error type (`GPError`) and `tracing` idiom throughout.

use crate::backend::cpu::CpuProvider;
use crate::backend::registry::ExecutionProviderRegistry;
use crate::config::{Config, SchedulerKind};
use crate::errors::{GPError, GPResult};
use crate::graph::buffer_pool::BufferPool;
use crate::graph::memory_planner::{MemoryPlan, MemoryPlanner};
use crate::graph::optimizer::PassManager;
use crate::graph::{Graph, ValueId};
use crate::operator::registry::OperatorRegistry;
use crate::scheduler::{ExecutionPlan, ParallelScheduler, PipelineScheduler, Scheduler, TopologicalScheduler};
use crate::tensor::allocator::{Allocator, CpuAllocator};
use crate::tensor::Tensor;
use crate::types::{DeviceKind, Shape};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{info, instrument, warn};

/// Per-node wall-clock timing plus totals, returned by `Session::profile`.
#[derive(Debug, Clone)]
pub struct NodeTiming {
    pub node_name: String,
    pub op_type: String,
    pub duration: Duration,
}

#[derive(Debug, Clone)]
pub struct Profile {
    pub node_timings: Vec<NodeTiming>,
    pub total_duration: Duration,
    pub peak_bytes: usize,
}

/// Bookkeeping computed once by `initialize` and reused by every `run`.
///
/// `buffer_pool` is the one real backing allocation per plan block (§4.2);
/// `bind_values` hands each run a fresh view into it rather than sharing a
/// persisted tensor, so a kernel writing its output is always its sole
/// owner (§3).
struct Initialized {
    graph: Graph,
    plan: MemoryPlan,
    initializer_values: HashMap<ValueId, Tensor>,
    buffer_pool: BufferPool,
    preference_order: Vec<String>,
}

/// §4.8's facade. Not re-entrant on the same invocation (§4.8 item 5): `run`
/// and `run_async` both go through `run_mutex`, matching the "conservative
/// implementations serialize runs through an internal mutex" fallback the
/// spec names explicitly.
pub struct Session {
    config: Config,
    operators: Arc<OperatorRegistry>,
    providers: ExecutionProviderRegistry,
    allocator: Arc<dyn Allocator>,
    cancel: Arc<AtomicBool>,
    run_mutex: Mutex<()>,
    state: Option<Initialized>,
}

impl Session {
    /// Instantiates the requested providers (§4.8 item 1/3): CPU always
    /// succeeds, others are skipped with a warning if unavailable.
    #[instrument(skip(config))]
    pub fn create(config: Config) -> GPResult<Session> {
        let operators = Arc::new(OperatorRegistry::with_builtins());
        let mut providers = ExecutionProviderRegistry::new();
        providers.register(Arc::new(CpuProvider::new(operators.clone())));

        #[cfg(feature = "cuda")]
        {
            if config.execution_providers.iter().any(|p| p == "cuda") {
                match crate::backend::cuda::CudaProvider::new(config.device_id) {
                    Ok(cuda) => providers.register(Arc::new(cuda)),
                    Err(e) => warn!("cuda execution provider unavailable, skipping: {e}"),
                }
            }
        }

        Ok(Session {
            config,
            operators,
            providers,
            allocator: Arc::new(CpuAllocator::new()),
            cancel: Arc::new(AtomicBool::new(false)),
            run_mutex: Mutex::new(()),
            state: None,
        })
    }

    /// The model-file importer is out of scope (§1 non-goals); a path-based
    /// load has nothing to invoke and reports as much.
    pub fn load_model_from_path(&mut self, _path: impl AsRef<Path>) -> GPResult<()> {
        Err(GPError::NotImplemented(
            "loading a model from an on-disk file requires a model-file importer, which is out of scope for this runtime".into(),
        ))
    }

    /// Interprets `bytes` as this crate's own internal graph serialization
    /// (`Graph::serialize`/`deserialize`, §4.3) — the one byte format this
    /// runtime actually owns, since the external model-file format is out
    /// of scope and no importer is linked in.
    pub fn load_model_from_bytes(&mut self, bytes: &[u8]) -> GPResult<()> {
        let graph = Graph::deserialize(bytes)?;
        self.load_model(graph)
    }

    /// Takes ownership of an already-built graph (§4.8 item 2): runs
    /// `Validate`, then initializes.
    #[instrument(skip(self, graph))]
    pub fn load_model(&mut self, graph: Graph) -> GPResult<()> {
        graph.validate()?;
        for warning in self.operators.warn_unknown_ops(&graph) {
            warn!("{warning}");
        }
        self.initialize(graph)
    }

    /// §4.8 item 3: run the optimizer pipeline at the configured level,
    /// invoke each available provider's `optimize_graph`, plan memory, and
    /// build the buffer pool that plan commits to.
    fn initialize(&mut self, mut graph: Graph) -> GPResult<()> {
        let manager = PassManager::default_pipeline(self.config.graph_optimization_level, self.operators.clone());
        manager.run(&mut graph)?;

        let preference_order = self.config.execution_providers.clone();
        for name in &preference_order {
            if let Some(provider) = self.providers.get(name) {
                if provider.is_available() {
                    provider.optimize_graph(&mut graph)?;
                }
            }
        }

        if !graph.nodes().any(|(_, n)| n.device.is_some()) {
            if let Some(cpu) = self.providers.get("cpu") {
                cpu.optimize_graph(&mut graph)?;
            }
        }

        let plan = MemoryPlanner::plan(&graph)?;
        if self.config.memory_pool_size != 0 && plan.peak_bytes() > self.config.memory_pool_size {
            return Err(GPError::OutOfMemory(format!(
                "planned memory footprint {} bytes exceeds configured pool size {} bytes",
                plan.peak_bytes(),
                self.config.memory_pool_size
            )));
        }

        // One real allocation per plan block (§4.2/§5 "follow the planner's
        // block assignment"), reused for the session's lifetime; `bind_values`
        // hands out a fresh view into it per run rather than sharing a
        // persisted tensor across runs.
        let buffer_pool = BufferPool::for_plan(&plan, self.allocator.as_ref())?;

        let mut initializer_values: HashMap<ValueId, Tensor> = HashMap::new();
        for (id, value) in graph.values() {
            if let Some(constant) = &value.constant {
                initializer_values.insert(id, constant.share());
            }
        }

        // CPU's `prepare` no longer allocates (the buffer pool above covers
        // every CPU-resident value); it still validates that every node's
        // kernel can be created, so a missing op fails at load time.
        if let Some(cpu) = self.providers.get("cpu") {
            cpu.prepare(&graph)?;
        }

        self.state = Some(Initialized { graph, plan, initializer_values, buffer_pool, preference_order });
        Ok(())
    }

    fn state(&self) -> GPResult<&Initialized> {
        self.state.as_ref().ok_or_else(|| GPError::InvalidModel("no model loaded".into()))
    }

    pub fn input_names(&self) -> GPResult<Vec<String>> {
        let state = self.state()?;
        Ok(state
            .graph
            .inputs()
            .iter()
            .map(|&id| state.graph.value(id).and_then(|v| v.name.clone()).unwrap_or_default())
            .collect())
    }

    pub fn output_names(&self) -> GPResult<Vec<String>> {
        let state = self.state()?;
        Ok(state
            .graph
            .outputs()
            .iter()
            .map(|&id| state.graph.value(id).and_then(|v| v.name.clone()).unwrap_or_default())
            .collect())
    }

    pub fn input_shapes(&self) -> GPResult<Vec<Shape>> {
        let state = self.state()?;
        state
            .graph
            .inputs()
            .iter()
            .map(|&id| {
                state
                    .graph
                    .value(id)
                    .map(|v| v.shape.clone())
                    .ok_or_else(|| GPError::NotFound(format!("graph input {:?} missing", id)))
            })
            .collect()
    }

    pub fn output_shapes(&self) -> GPResult<Vec<Shape>> {
        let state = self.state()?;
        state
            .graph
            .outputs()
            .iter()
            .map(|&id| {
                state
                    .graph
                    .value(id)
                    .map(|v| v.shape.clone())
                    .ok_or_else(|| GPError::NotFound(format!("graph output {:?} missing", id)))
            })
            .collect()
    }

    /// Allocates a zero-initialized tensor shaped/typed like input `i`.
    pub fn create_input_tensor(&self, i: usize) -> GPResult<Tensor> {
        let state = self.state()?;
        let id = *state
            .graph
            .inputs()
            .get(i)
            .ok_or_else(|| GPError::InvalidArgument(format!("input index {i} out of range")))?;
        let value = state.graph.value(id).ok_or_else(|| GPError::NotFound(format!("graph input {:?} missing", id)))?;
        Tensor::tensor(value.shape.clone(), value.dtype, DeviceKind::Cpu)
    }

    /// Reads output `i` from the bindings left by the most recent `run`.
    pub fn get_output_tensor(&self, i: usize, bindings: &HashMap<ValueId, Tensor>) -> GPResult<Tensor> {
        let state = self.state()?;
        let id = *state
            .graph
            .outputs()
            .get(i)
            .ok_or_else(|| GPError::InvalidArgument(format!("output index {i} out of range")))?;
        bindings
            .get(&id)
            .map(Tensor::share)
            .ok_or_else(|| GPError::NotFound(format!("output value {:?} was not produced by the last run", id)))
    }

    /// Builds this run's value bindings. Every pre-allocated output or
    /// intermediate tensor is freshly materialized here rather than shared
    /// out of persisted session state: a kernel writing its result needs
    /// exclusive storage ownership (§3, `Tensor::check_writable`), and a
    /// tensor shared from a field that outlives the run would still be
    /// aliased by that field's own reference at write time.
    fn bind_values(&self, state: &Initialized, inputs: &[Tensor]) -> GPResult<HashMap<ValueId, Tensor>> {
        if inputs.len() != state.graph.inputs().len() {
            return Err(GPError::InvalidArgument(format!(
                "expected {} input tensor(s), got {}",
                state.graph.inputs().len(),
                inputs.len()
            )));
        }
        let mut values: HashMap<ValueId, Tensor> = HashMap::new();
        for (&id, tensor) in state.graph.inputs().iter().zip(inputs) {
            values.insert(id, tensor.share());
        }
        for (&id, tensor) in &state.initializer_values {
            values.entry(id).or_insert_with(|| tensor.share());
        }

        // Device-specific providers own a separate memory space from the CPU
        // buffer pool; each run gets its own fresh allocation from them so
        // it is never aliased by a sibling run or by provider-side state.
        for name in &state.preference_order {
            if name == "cpu" {
                continue;
            }
            if let Some(provider) = self.providers.get(name) {
                if provider.is_available() {
                    for (id, tensor) in provider.prepare(&state.graph)? {
                        values.entry(id).or_insert(tensor);
                    }
                }
            }
        }

        // Everything left follows the CPU memory plan (§4.2/§5): a fresh
        // view into this session's buffer pool for planned blocks, or an
        // independent allocation for values the planner could not size
        // (dynamic shapes).
        for (id, value) in state.graph.values() {
            if values.contains_key(&id) || value.producer.is_none() {
                continue;
            }
            let tensor = match state.plan.block_of(id) {
                // SAFETY: the plan's (birth, death) intervals guarantee no
                // two tensors from this run alias the same block, and the
                // pool outlives every tensor built from it.
                Some(block_id) => unsafe { state.buffer_pool.tensor_for_block(block_id, value.shape.clone(), value.dtype) },
                None => Tensor::tensor(value.shape.clone(), value.dtype, DeviceKind::Cpu)?,
            };
            values.insert(id, tensor);
        }
        Ok(values)
    }

    fn scheduler_for(&self) -> Box<dyn Scheduler> {
        match self.config.scheduler {
            SchedulerKind::Topological => Box::new(TopologicalScheduler),
            SchedulerKind::Pipeline { stages } => Box::new(PipelineScheduler::new(stages)),
            SchedulerKind::Parallel => Box::new(ParallelScheduler::new(self.config.resolved_thread_count())),
        }
    }

    /// Binds `inputs` (positional) onto the graph's declared inputs, runs
    /// the configured scheduler, and returns the output bindings (§4.8
    /// item 4).
    #[instrument(skip(self, inputs))]
    pub fn run(&self, inputs: &[Tensor]) -> GPResult<HashMap<ValueId, Tensor>> {
        let _guard = self.run_mutex.lock().map_err(|_| GPError::RuntimeError("session run mutex poisoned".into()))?;
        let state = self.state()?;
        let values = self.bind_values(state, inputs)?;

        let scheduler = self.scheduler_for();
        let plan = ExecutionPlan {
            graph: &state.graph,
            values: &values,
            operators: &self.operators,
            providers: &self.providers,
            preference_order: &state.preference_order,
        };
        scheduler.schedule(&plan, &self.cancel)?;

        let mut outputs = HashMap::new();
        for &id in state.graph.outputs() {
            let tensor = values
                .get(&id)
                .ok_or_else(|| GPError::NotFound(format!("graph output {:?} was never bound", id)))?;
            outputs.insert(id, tensor.share());
        }
        Ok(outputs)
    }

    /// Enqueues the whole run onto a background worker and returns a future
    /// completing with the same result (§4.8 item 5, §5 "Async execution").
    /// There is no cooperative suspension inside a kernel; this is a plain
    /// spawn-and-join, not a cooperative executor integration.
    pub fn run_async(self: &Arc<Self>, inputs: Vec<Tensor>) -> impl std::future::Future<Output = GPResult<HashMap<ValueId, Tensor>>> {
        let session = self.clone();
        let (tx, rx) = futures::channel::oneshot::channel();
        std::thread::spawn(move || {
            let result = session.run(&inputs);
            let _ = tx.send(result);
        });
        async move {
            match rx.await {
                Ok(result) => result,
                Err(_) => Err(GPError::RuntimeError("run_async worker thread dropped its result".into())),
            }
        }
    }

    /// Signals the scheduler to stop dispatching new work (§5
    /// "Cancellation"). Workers finish their current node, then observe the
    /// flag.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn reset_cancel(&self) {
        self.cancel.store(false, Ordering::SeqCst);
    }

    /// §4.8 item 6: runs once, measuring wall-clock per node and the
    /// planner's peak byte footprint.
    #[instrument(skip(self, inputs))]
    pub fn profile(&self, inputs: &[Tensor]) -> GPResult<Profile> {
        let _guard = self.run_mutex.lock().map_err(|_| GPError::RuntimeError("session run mutex poisoned".into()))?;
        let state = self.state()?;
        let values = self.bind_values(state, inputs)?;

        let overall_start = Instant::now();
        let mut node_timings = Vec::new();
        for nid in state.graph.topological_sort()? {
            let node = state.graph.node(nid).ok_or_else(|| GPError::NotFound(format!("node {:?}", nid)))?;
            let provider = self.providers.select(&node.op_type, &state.preference_order)?;
            let ctx = crate::backend::ExecutionContext::new(&values, &self.operators);
            let start = Instant::now();
            provider.execute_node(node, &ctx)?;
            node_timings.push(NodeTiming {
                node_name: node.name.clone().unwrap_or_default(),
                op_type: node.op_type.clone(),
                duration: start.elapsed(),
            });
        }
        let total_duration = overall_start.elapsed();
        info!(nodes = node_timings.len(), ?total_duration, "profile run complete");

        Ok(Profile { node_timings, total_duration, peak_bytes: state.plan.peak_bytes() })
    }

    /// Replaces the session's configuration. Per §6, provider/scheduler
    /// fields only take effect on the next `load_model` — a session never
    /// re-initializes a loaded graph out from under an in-flight `run`.
    pub fn set_config(&mut self, config: Config) {
        self.config = config;
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn allocator_stats(&self) -> crate::tensor::allocator::AllocatorStatsSnapshot {
        self.allocator.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::dsl::GraphBuilder;
    use crate::types::DataType;

    fn linear_relu_graph() -> Graph {
        let mut graph = Graph::new();
        let mut b = GraphBuilder::new(&mut graph);
        let x = b.val("x", Shape::new(vec![1, 4]), DataType::F32);
        let w = b.param("w", Tensor::tensor(Shape::new(vec![4, 2]), DataType::F32, DeviceKind::Cpu).unwrap());
        let bias = b.param("b", Tensor::tensor(Shape::new(vec![1, 2]), DataType::F32, DeviceKind::Cpu).unwrap());
        let y = b.linear(x, w, bias, Shape::new(vec![1, 2]));
        let y = b.relu(y);
        b.output(y);
        graph
    }

    #[test]
    fn run_produces_the_declared_output_count() {
        let mut session = Session::create(Config::default()).unwrap();
        session.load_model(linear_relu_graph()).unwrap();
        let x = Tensor::tensor(Shape::new(vec![1, 4]), DataType::F32, DeviceKind::Cpu).unwrap();
        x.with_f32_slice_mut(|s| s.copy_from_slice(&[1.0, 2.0, 3.0, 4.0])).unwrap();
        let outputs = session.run(&[x]).unwrap();
        assert_eq!(outputs.len(), session.output_names().unwrap().len());
    }

    #[test]
    fn run_rejects_wrong_input_arity() {
        let mut session = Session::create(Config::default()).unwrap();
        session.load_model(linear_relu_graph()).unwrap();
        assert!(session.run(&[]).is_err());
    }

    #[test]
    fn path_based_load_reports_not_implemented() {
        let mut session = Session::create(Config::default()).unwrap();
        assert!(session.load_model_from_path("model.onnx").is_err());
    }

    #[test]
    fn profile_reports_one_timing_per_node() {
        let mut session = Session::create(Config::default()).unwrap();
        session.load_model(linear_relu_graph()).unwrap();
        let x = Tensor::tensor(Shape::new(vec![1, 4]), DataType::F32, DeviceKind::Cpu).unwrap();
        let profile = session.profile(&[x]).unwrap();
        assert_eq!(profile.node_timings.len(), 3);
    }
}
