//! Tensor-lifetime memory planner (§4.2).
//!
//! Grounded on the teacher's `graph::memory_planner::MemoryPlanner`
//! (per-node-index liveness array plus a greedy LIFO free-buffer stack),
//! generalized from the teacher's closed node-index-as-tensor-id model (one
//! buffer slot per *node*) to the spec's value-level lifetime intervals:
//! birth/death are computed per graph `Value`, values are grouped into
//! dtype/byte-size classes (only same-size buffers may alias), and each
//! class is packed independently by first-fit over a time-ordered interval
//! list, scanning classes largest-first (first-fit-decreasing over block
//! size, as the pipeline names it).

use super::{Graph, NodeId, ValueId};
use crate::errors::{GPError, GPResult};
use crate::types::DataType;
use std::collections::HashMap;

/// Half-open-by-convention [birth, death] node-index interval a value is
/// live for: `birth` is its producer's position in topological order,
/// `death` is the latest position among its consumers (or one past the end
/// if the value is a graph output, so it survives past the last node).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifetimeInterval {
    pub birth: usize,
    pub death: usize,
}

/// Output of `MemoryPlanner::plan`: every pooled value's block assignment,
/// plus each block's required byte size. Values with no producer
/// (graph inputs, initializers) are never pooled — they are not included in
/// `assignment` and keep whatever storage the caller already gave them.
#[derive(Debug, Default)]
pub struct MemoryPlan {
    pub assignment: HashMap<ValueId, usize>,
    pub block_bytes: Vec<usize>,
    pub intervals: HashMap<ValueId, LifetimeInterval>,
}

impl MemoryPlan {
    pub fn block_count(&self) -> usize {
        self.block_bytes.len()
    }

    pub fn block_of(&self, value: ValueId) -> Option<usize> {
        self.assignment.get(&value).copied()
    }

    /// Sum of every block's byte size — the resident footprint this plan
    /// commits to, as opposed to the unpooled sum of every individual
    /// value's size.
    pub fn peak_bytes(&self) -> usize {
        self.block_bytes.iter().sum()
    }
}

pub struct MemoryPlanner;

impl MemoryPlanner {
    /// Computes lifetime intervals for every producer-having value in
    /// `graph`, then assigns each dtype/size class its own first-fit
    /// packing of blocks (§4.2's guarantee: block bytes >= shape-implied
    /// size, blocks never hold two overlapping tenants).
    pub fn plan(graph: &Graph) -> GPResult<MemoryPlan> {
        let order = graph.topological_sort()?;
        let position: HashMap<NodeId, usize> = order.iter().enumerate().map(|(i, &n)| (n, i)).collect();
        let graph_outputs: std::collections::HashSet<usize> = graph.outputs().iter().map(|v| v.0).collect();

        let mut intervals: HashMap<ValueId, LifetimeInterval> = HashMap::new();
        for (vid, value) in graph.values() {
            let Some(producer) = value.producer else { continue };
            let birth = *position
                .get(&producer)
                .ok_or_else(|| GPError::InvalidModel(format!("value {:?} producer {:?} not in topological order", vid, producer)))?;
            let mut death = birth;
            for consumer in &value.consumers {
                if let Some(&p) = position.get(consumer) {
                    death = death.max(p);
                }
            }
            if graph_outputs.contains(&vid.0) {
                death = order.len();
            }
            intervals.insert(vid, LifetimeInterval { birth, death });
        }

        let mut classes: HashMap<(DataType, usize), Vec<ValueId>> = HashMap::new();
        for &vid in intervals.keys() {
            let value = graph.value(vid).expect("interval keys come from graph.values()");
            let size = value.shape.element_count() * value.dtype.size_bytes();
            classes.entry((value.dtype, size)).or_default().push(vid);
        }

        let mut class_keys: Vec<(DataType, usize)> = classes.keys().copied().collect();
        class_keys.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.wire_tag().cmp(&b.0.wire_tag())));

        let mut assignment = HashMap::new();
        let mut block_bytes = Vec::new();

        for key in class_keys {
            let (_, size) = key;
            let mut vids = classes.remove(&key).expect("key came from classes.keys()");
            vids.sort_by_key(|v| intervals[v].birth);

            let mut block_last_death: Vec<usize> = Vec::new();
            let mut block_ids: Vec<usize> = Vec::new();

            for vid in vids {
                let interval = intervals[&vid];
                let slot = block_last_death.iter().position(|&death| death < interval.birth);
                let local = match slot {
                    Some(i) => i,
                    None => {
                        let global_id = block_bytes.len();
                        block_bytes.push(size);
                        block_last_death.push(0);
                        block_ids.push(global_id);
                        block_last_death.len() - 1
                    }
                };
                block_last_death[local] = interval.death;
                assignment.insert(vid, block_ids[local]);
            }
        }

        Ok(MemoryPlan { assignment, block_bytes, intervals })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Node, Value};
    use crate::types::Shape;

    fn f32_value(graph: &mut Graph, extents: Vec<usize>) -> ValueId {
        graph.insert_value(Value::new(Shape::new(extents), DataType::F32))
    }

    #[test]
    fn disjoint_intervals_of_equal_size_share_a_block() {
        // x -> Relu -> a -> Relu -> b -> Relu -> c (graph output)
        // a's lifetime ends before c is even produced, so a and c (same
        // dtype/size) may share a block; b is disjoint from both in turn.
        let mut graph = Graph::new();
        let x = f32_value(&mut graph, vec![4]);
        let a = f32_value(&mut graph, vec![4]);
        let b = f32_value(&mut graph, vec![4]);
        let c = f32_value(&mut graph, vec![4]);
        graph.insert_node(Node::new("Relu", vec![x], vec![a]));
        graph.insert_node(Node::new("Relu", vec![a], vec![b]));
        graph.insert_node(Node::new("Relu", vec![b], vec![c]));
        graph.set_inputs(vec![x]);
        graph.set_outputs(vec![c]);

        let plan = MemoryPlanner::plan(&graph).unwrap();
        assert_eq!(plan.block_count(), 2);
        assert_ne!(plan.block_of(a), plan.block_of(b));
        assert_eq!(plan.block_of(a), plan.block_of(c));
    }

    #[test]
    fn different_byte_sizes_never_share_a_block() {
        let mut graph = Graph::new();
        let x = f32_value(&mut graph, vec![4]);
        let small = f32_value(&mut graph, vec![4]);
        let big = f32_value(&mut graph, vec![64]);
        graph.insert_node(Node::new("Relu", vec![x], vec![small]));
        graph.insert_node(Node::new("Relu", vec![small], vec![big]));
        graph.set_inputs(vec![x]);
        graph.set_outputs(vec![big]);

        let plan = MemoryPlanner::plan(&graph).unwrap();
        assert_ne!(plan.block_of(small), plan.block_of(big));
        assert_eq!(plan.block_bytes.len(), 2);
    }

    #[test]
    fn graph_inputs_and_initializers_are_not_pooled() {
        let mut graph = Graph::new();
        let x = f32_value(&mut graph, vec![4]);
        let y = f32_value(&mut graph, vec![4]);
        graph.insert_node(Node::new("Relu", vec![x], vec![y]));
        graph.set_inputs(vec![x]);
        graph.set_outputs(vec![y]);

        let plan = MemoryPlanner::plan(&graph).unwrap();
        assert!(plan.block_of(x).is_none());
        assert!(plan.block_of(y).is_some());
    }
}
