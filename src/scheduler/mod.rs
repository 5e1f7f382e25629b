//! Execution schedulers (§4.7): Topological, Pipeline, Parallel.
//!
//! **[SUPPLEMENT]** Entirely new relative to the teacher, which only ever
//! executed a graph through single-threaded recursion (`Graph::execute`
//! walking `Node::Op` inputs depth-first). Grounded on the teacher's
//! existing `rayon` dependency — already used inside `CPUBackend` for
//! elementwise ops — for `Parallel`'s worker pool, and on the teacher's
//! implicit postorder-by-recursion for `Topological`'s explicit
//! `topological_sort`-then-iterate form.

use crate::backend::registry::ExecutionProviderRegistry;
use crate::backend::ExecutionContext;
use crate::errors::{GPError, GPResult};
use crate::graph::{Graph, NodeId, ValueId};
use crate::operator::registry::OperatorRegistry;
use crate::tensor::Tensor;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use tracing::instrument;

/// Shared per-run state every scheduler variant reads from: bound input
/// tensors, pre-allocated intermediates/outputs, and the registries needed
/// to resolve a node's provider and kernel.
pub struct ExecutionPlan<'a> {
    pub graph: &'a Graph,
    pub values: &'a HashMap<ValueId, Tensor>,
    pub operators: &'a OperatorRegistry,
    pub providers: &'a ExecutionProviderRegistry,
    pub preference_order: &'a [String],
}

/// `{execution_order, schedule}` (§4.7). `schedule` checks `cancel` between
/// dispatches so a session can stop a long-running `run` early.
pub trait Scheduler: Send + Sync {
    fn name(&self) -> &str;
    fn execution_order(&self, graph: &Graph) -> GPResult<Vec<NodeId>>;
    fn schedule(&self, plan: &ExecutionPlan, cancel: &AtomicBool) -> GPResult<()>;
}

fn execute_one(plan: &ExecutionPlan, nid: NodeId) -> GPResult<()> {
    let node = plan
        .graph
        .node(nid)
        .ok_or_else(|| GPError::NotFound(format!("node {:?} missing from graph during schedule", nid)))?;
    let provider = plan.providers.select(&node.op_type, plan.preference_order)?;
    let ctx = ExecutionContext::new(plan.values, plan.operators);
    provider.execute_node(node, &ctx)
}

/// Zero concurrency, deterministic (§4.7, P7): executes the topological
/// order directly.
#[derive(Debug, Default)]
pub struct TopologicalScheduler;

impl Scheduler for TopologicalScheduler {
    fn name(&self) -> &str {
        "topological"
    }

    fn execution_order(&self, graph: &Graph) -> GPResult<Vec<NodeId>> {
        graph.topological_sort()
    }

    #[instrument(skip_all, name = "topological_schedule")]
    fn schedule(&self, plan: &ExecutionPlan, cancel: &AtomicBool) -> GPResult<()> {
        for nid in self.execution_order(plan.graph)? {
            if cancel.load(Ordering::SeqCst) {
                return Err(GPError::RuntimeError("run cancelled".into()));
            }
            execute_one(plan, nid)?;
        }
        Ok(())
    }
}

/// Partitions the topological order into contiguous stages; stages run in
/// sequence. Nodes within a stage are reserved for batched/streaming
/// extensions to run independently — this scheduler still executes them in
/// topological sub-order, since nothing here verifies the absence of
/// intra-stage dependencies the way `Parallel`'s ready-queue does.
pub struct PipelineScheduler {
    stage_count: usize,
}

impl PipelineScheduler {
    pub fn new(stage_count: usize) -> Self {
        Self { stage_count: stage_count.max(1) }
    }
}

impl Scheduler for PipelineScheduler {
    fn name(&self) -> &str {
        "pipeline"
    }

    fn execution_order(&self, graph: &Graph) -> GPResult<Vec<NodeId>> {
        graph.topological_sort()
    }

    #[instrument(skip_all, name = "pipeline_schedule", fields(stages = self.stage_count))]
    fn schedule(&self, plan: &ExecutionPlan, cancel: &AtomicBool) -> GPResult<()> {
        let order = self.execution_order(plan.graph)?;
        if order.is_empty() {
            return Ok(());
        }
        let stage_len = order.len().div_ceil(self.stage_count).max(1);
        for stage in order.chunks(stage_len) {
            if cancel.load(Ordering::SeqCst) {
                return Err(GPError::RuntimeError("run cancelled".into()));
            }
            for &nid in stage {
                execute_one(plan, nid)?;
            }
        }
        Ok(())
    }
}

/// Ready-queue worker pool (§4.7): every node starts with an unsatisfied-
/// input counter equal to its input arity (inputs with no producer, i.e.
/// graph inputs and initializers, are pre-satisfied); zero-counter nodes
/// enter the ready queue, a pool of `worker_count` threads drains it,
/// executing each node then decrementing its consumers' counters.
/// Deterministic ordering is **not** guaranteed (P7); on the first error,
/// workers stop pulling new work and the error propagates once every
/// worker has observed it.
pub struct ParallelScheduler {
    worker_count: usize,
}

impl ParallelScheduler {
    pub fn new(worker_count: usize) -> Self {
        Self { worker_count: worker_count.max(1) }
    }
}

impl Scheduler for ParallelScheduler {
    fn name(&self) -> &str {
        "parallel"
    }

    fn execution_order(&self, graph: &Graph) -> GPResult<Vec<NodeId>> {
        graph.topological_sort()
    }

    #[instrument(skip_all, name = "parallel_schedule", fields(workers = self.worker_count))]
    fn schedule(&self, plan: &ExecutionPlan, cancel: &AtomicBool) -> GPResult<()> {
        let node_ids: Vec<NodeId> = plan.graph.nodes().map(|(id, _)| id).collect();
        if node_ids.is_empty() {
            return Ok(());
        }

        let mut unsatisfied: HashMap<usize, AtomicUsize> = HashMap::new();
        let mut consumers_of: HashMap<usize, Vec<NodeId>> = HashMap::new();
        for &nid in &node_ids {
            let node = plan.graph.node(nid).expect("id came from graph.nodes()");
            unsatisfied.insert(nid.0, AtomicUsize::new(node.inputs.len()));
        }
        for &nid in &node_ids {
            let node = plan.graph.node(nid).expect("id came from graph.nodes()");
            for &inp in &node.inputs {
                match plan.graph.value(inp).and_then(|v| v.producer) {
                    Some(producer) => consumers_of.entry(producer.0).or_default().push(nid),
                    None => {
                        unsatisfied[&nid.0].fetch_sub(1, Ordering::SeqCst);
                    }
                }
            }
        }

        let ready: Mutex<VecDeque<NodeId>> = Mutex::new(
            node_ids.iter().copied().filter(|nid| unsatisfied[&nid.0].load(Ordering::SeqCst) == 0).collect(),
        );
        let remaining = AtomicUsize::new(node_ids.len());
        let first_error: Mutex<Option<GPError>> = Mutex::new(None);

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.worker_count)
            .build()
            .map_err(|e| GPError::RuntimeError(format!("failed to build parallel scheduler worker pool: {e}")))?;

        pool.scope(|scope| {
            for _ in 0..self.worker_count {
                scope.spawn(|_| loop {
                    if cancel.load(Ordering::SeqCst) || first_error.lock().unwrap().is_some() {
                        return;
                    }
                    let next = ready.lock().unwrap().pop_front();
                    let nid = match next {
                        Some(nid) => nid,
                        None => {
                            if remaining.load(Ordering::SeqCst) == 0 {
                                return;
                            }
                            std::thread::yield_now();
                            continue;
                        }
                    };

                    if let Err(e) = execute_one(plan, nid) {
                        *first_error.lock().unwrap() = Some(e);
                        remaining.fetch_sub(1, Ordering::SeqCst);
                        return;
                    }
                    remaining.fetch_sub(1, Ordering::SeqCst);

                    if let Some(consumers) = consumers_of.get(&nid.0) {
                        for &cid in consumers {
                            if unsatisfied[&cid.0].fetch_sub(1, Ordering::SeqCst) == 1 {
                                ready.lock().unwrap().push_back(cid);
                            }
                        }
                    }
                });
            }
        });

        if let Some(e) = first_error.into_inner().unwrap() {
            return Err(e);
        }
        if cancel.load(Ordering::SeqCst) {
            return Err(GPError::RuntimeError("run cancelled".into()));
        }
        Ok(())
    }
}
