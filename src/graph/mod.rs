//! Graph IR: nodes, values, and the invariants of §3.
//!
//! Grounded on the teacher's `graph::Graph` (`Vec<Node>` arena, `NodeId` as
//! index, producer pointers expressed as input-`NodeId` lists), generalized
//! from the teacher's closed `Input`/`Param`/`Op` enum and opaque
//! `Box<dyn Operation>` payload to the spec's named-op-type-string plus
//! attribute-map `Node`, with explicit `Value` edges carrying shape/dtype
//! and producer/consumer pointers.

pub mod dot;
pub mod buffer_pool;
pub mod dsl;
pub mod memory_planner;
pub mod optimizer;
pub mod verifier;

use crate::errors::{GPError, GPResult};
use crate::tensor::Tensor;
use crate::types::{DataType, DeviceKind, Shape};
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};
use std::cmp::Reverse;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId(pub usize);

/// A tagged attribute value (§3). The node's attribute map is canonical —
/// there is no inheritance from anywhere else.
#[derive(Debug)]
pub enum AttributeValue {
    Int(i64),
    Float(f32),
    Str(String),
    Ints(Vec<i64>),
    Floats(Vec<f32>),
    Tensor(Tensor),
}

impl AttributeValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            AttributeValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f32> {
        match self {
            AttributeValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::Str(v) => Some(v.as_str()),
            _ => None,
        }
    }

    pub fn as_ints(&self) -> Option<&[i64]> {
        match self {
            AttributeValue::Ints(v) => Some(v.as_slice()),
            _ => None,
        }
    }

    fn deep_clone(&self) -> GPResult<AttributeValue> {
        Ok(match self {
            AttributeValue::Int(v) => AttributeValue::Int(*v),
            AttributeValue::Float(v) => AttributeValue::Float(*v),
            AttributeValue::Str(v) => AttributeValue::Str(v.clone()),
            AttributeValue::Ints(v) => AttributeValue::Ints(v.clone()),
            AttributeValue::Floats(v) => AttributeValue::Floats(v.clone()),
            AttributeValue::Tensor(t) => AttributeValue::Tensor(t.deep_clone()?),
        })
    }
}

/// A graph edge: (optional name, shape, dtype, optional constant tensor,
/// producer node pointer, consumer node list). Initializers are values
/// with a bound constant and no producer.
#[derive(Debug)]
pub struct Value {
    pub name: Option<String>,
    pub shape: Shape,
    pub dtype: DataType,
    pub constant: Option<Tensor>,
    pub producer: Option<NodeId>,
    pub consumers: Vec<NodeId>,
}

impl Value {
    pub fn new(shape: Shape, dtype: DataType) -> Self {
        Self {
            name: None,
            shape,
            dtype,
            constant: None,
            producer: None,
            consumers: Vec::new(),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_constant(mut self, tensor: Tensor) -> Self {
        self.constant = Some(tensor);
        self
    }

    pub fn is_initializer(&self) -> bool {
        self.producer.is_none() && self.constant.is_some()
    }

    fn deep_clone(&self) -> GPResult<Value> {
        Ok(Value {
            name: self.name.clone(),
            shape: self.shape.clone(),
            dtype: self.dtype,
            constant: match &self.constant {
                Some(t) => Some(t.deep_clone()?),
                None => None,
            },
            producer: self.producer,
            consumers: self.consumers.clone(),
        })
    }
}

/// (op-type string, optional name, ordered inputs/outputs, attribute map,
/// assigned device). Input order is significant; attribute keys are unique
/// (`HashMap` already enforces the latter).
#[derive(Debug)]
pub struct Node {
    pub op_type: String,
    pub name: Option<String>,
    pub inputs: Vec<ValueId>,
    pub outputs: Vec<ValueId>,
    pub attributes: HashMap<String, AttributeValue>,
    pub device: Option<DeviceKind>,
}

impl Node {
    pub fn new(op_type: impl Into<String>, inputs: Vec<ValueId>, outputs: Vec<ValueId>) -> Self {
        Self {
            op_type: op_type.into(),
            name: None,
            inputs,
            outputs,
            attributes: HashMap::new(),
            device: None,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: AttributeValue) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    fn deep_clone(&self) -> GPResult<Node> {
        let mut attributes = HashMap::with_capacity(self.attributes.len());
        for (k, v) in &self.attributes {
            attributes.insert(k.clone(), v.deep_clone()?);
        }
        Ok(Node {
            op_type: self.op_type.clone(),
            name: self.name.clone(),
            inputs: self.inputs.clone(),
            outputs: self.outputs.clone(),
            attributes,
            device: self.device,
        })
    }
}

/// Owns a set of nodes and values; exposes an ordered input list and an
/// ordered output list. Removed nodes/values leave a tombstone so ids
/// remain stable.
#[derive(Debug, Default)]
pub struct Graph {
    nodes: Vec<Option<Node>>,
    values: Vec<Option<Value>>,
    inputs: Vec<ValueId>,
    outputs: Vec<ValueId>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_value(&mut self, value: Value) -> ValueId {
        let id = ValueId(self.values.len());
        self.values.push(Some(value));
        id
    }

    /// Inserts a node and wires producer/consumer pointers on the values
    /// it references.
    pub fn insert_node(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.nodes.len());
        for &out in &node.outputs {
            if let Some(Some(value)) = self.values.get_mut(out.0) {
                value.producer = Some(id);
            }
        }
        for &inp in &node.inputs {
            if let Some(Some(value)) = self.values.get_mut(inp.0) {
                value.consumers.push(id);
            }
        }
        self.nodes.push(Some(node));
        id
    }

    pub fn remove_node(&mut self, id: NodeId) -> GPResult<Node> {
        let node = self
            .nodes
            .get_mut(id.0)
            .and_then(Option::take)
            .ok_or_else(|| GPError::NotFound(format!("node {:?}", id)))?;
        for &out in &node.outputs {
            if let Some(Some(value)) = self.values.get_mut(out.0) {
                if value.producer == Some(id) {
                    value.producer = None;
                }
            }
        }
        for &inp in &node.inputs {
            if let Some(Some(value)) = self.values.get_mut(inp.0) {
                value.consumers.retain(|&c| c != id);
            }
        }
        Ok(node)
    }

    pub fn remove_value(&mut self, id: ValueId) -> GPResult<Value> {
        self.values
            .get_mut(id.0)
            .and_then(Option::take)
            .ok_or_else(|| GPError::NotFound(format!("value {:?}", id)))
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0).and_then(Option::as_ref)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id.0).and_then(Option::as_mut)
    }

    pub fn value(&self, id: ValueId) -> Option<&Value> {
        self.values.get(id.0).and_then(Option::as_ref)
    }

    pub fn value_mut(&mut self, id: ValueId) -> Option<&mut Value> {
        self.values.get_mut(id.0).and_then(Option::as_mut)
    }

    /// First node with this name in id order, or `None`. Names need not be
    /// unique.
    pub fn node_by_name(&self, name: &str) -> Option<(NodeId, &Node)> {
        self.nodes().find(|(_, n)| n.name.as_deref() == Some(name))
    }

    pub fn value_by_name(&self, name: &str) -> Option<(ValueId, &Value)> {
        self.values().find(|(_, v)| v.name.as_deref() == Some(name))
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes
            .iter()
            .enumerate()
            .filter_map(|(i, n)| n.as_ref().map(|n| (NodeId(i), n)))
    }

    pub fn values(&self) -> impl Iterator<Item = (ValueId, &Value)> {
        self.values
            .iter()
            .enumerate()
            .filter_map(|(i, v)| v.as_ref().map(|v| (ValueId(i), v)))
    }

    pub fn inputs(&self) -> &[ValueId] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[ValueId] {
        &self.outputs
    }

    pub fn set_inputs(&mut self, inputs: Vec<ValueId>) {
        self.inputs = inputs;
    }

    pub fn set_outputs(&mut self, outputs: Vec<ValueId>) {
        self.outputs = outputs;
    }

    pub fn push_input(&mut self, id: ValueId) {
        self.inputs.push(id);
    }

    pub fn push_output(&mut self, id: ValueId) {
        self.outputs.push(id);
    }

    /// Kahn's algorithm; ties among simultaneously-ready nodes are broken
    /// by ascending `NodeId` (insertion order), for determinism (P1).
    pub fn topological_sort(&self) -> GPResult<Vec<NodeId>> {
        let mut in_degree: HashMap<usize, usize> = HashMap::new();
        let mut adjacency: HashMap<usize, Vec<usize>> = HashMap::new();

        for (id, _) in self.nodes() {
            in_degree.entry(id.0).or_insert(0);
        }
        for (id, node) in self.nodes() {
            for &input_id in &node.inputs {
                if let Some(value) = self.value(input_id) {
                    if let Some(producer) = value.producer {
                        if self.node(producer).is_some() {
                            *in_degree.entry(id.0).or_insert(0) += 1;
                            adjacency.entry(producer.0).or_default().push(id.0);
                        }
                    }
                }
            }
        }

        let mut remaining = in_degree.clone();
        let mut heap: BinaryHeap<Reverse<usize>> = in_degree
            .iter()
            .filter(|(_, &deg)| deg == 0)
            .map(|(&id, _)| Reverse(id))
            .collect();

        let mut order = Vec::with_capacity(in_degree.len());
        while let Some(Reverse(id)) = heap.pop() {
            order.push(NodeId(id));
            if let Some(succs) = adjacency.get(&id) {
                for &succ in succs {
                    let d = remaining.get_mut(&succ).expect("successor tracked in in_degree");
                    *d -= 1;
                    if *d == 0 {
                        heap.push(Reverse(succ));
                    }
                }
            }
        }

        if order.len() != in_degree.len() {
            return Err(GPError::InvalidModel(
                "graph contains a cycle among its nodes".into(),
            ));
        }
        Ok(order)
    }

    /// Copies all nodes, values and attributes (tensors included) and
    /// rewrites no ids: clone preserves every `NodeId`/`ValueId`.
    pub fn deep_clone(&self) -> GPResult<Graph> {
        let mut nodes = Vec::with_capacity(self.nodes.len());
        for slot in &self.nodes {
            nodes.push(match slot {
                Some(n) => Some(n.deep_clone()?),
                None => None,
            });
        }
        let mut values = Vec::with_capacity(self.values.len());
        for slot in &self.values {
            values.push(match slot {
                Some(v) => Some(v.deep_clone()?),
                None => None,
            });
        }
        Ok(Graph {
            nodes,
            values,
            inputs: self.inputs.clone(),
            outputs: self.outputs.clone(),
        })
    }

    fn reachable_from_inputs(&self) -> HashSet<usize> {
        let mut visited: HashSet<usize> = HashSet::new();
        let mut queue: VecDeque<usize> = VecDeque::new();
        for &v in &self.inputs {
            if visited.insert(v.0) {
                queue.push_back(v.0);
            }
        }
        while let Some(vid) = queue.pop_front() {
            if let Some(value) = self.value(ValueId(vid)) {
                for &consumer in &value.consumers {
                    if let Some(node) = self.node(consumer) {
                        for &out in &node.outputs {
                            if visited.insert(out.0) {
                                queue.push_back(out.0);
                            }
                        }
                    }
                }
            }
        }
        visited
    }

    /// Checks invariants 1–6 of §3. Never mutates the graph; on failure
    /// names the offending node or value. Invariant 5 (op-type present in
    /// the operator registry) is intentionally not checked here — per the
    /// spec it is advisory, not a structural property of the graph itself,
    /// so it lives in `operator::OperatorRegistry::validate_graph` instead.
    pub fn validate(&self) -> GPResult<()> {
        for (nid, node) in self.nodes() {
            for &out in &node.outputs {
                let value = self
                    .value(out)
                    .ok_or_else(|| GPError::InvalidModel(format!("node {:?} outputs unknown value {:?}", nid, out)))?;
                if value.producer != Some(nid) {
                    return Err(GPError::InvalidModel(format!(
                        "node {:?} lists value {:?} as an output, but the value's producer disagrees",
                        nid, out
                    )));
                }
            }
        }
        for (vid, value) in self.values() {
            if let Some(pid) = value.producer {
                let node = self.node(pid).ok_or_else(|| {
                    GPError::InvalidModel(format!(
                        "value {:?} names node {:?} as its producer, which is not in the graph",
                        vid, pid
                    ))
                })?;
                if !node.outputs.contains(&vid) {
                    return Err(GPError::InvalidModel(format!(
                        "value {:?} names node {:?} as its producer, but that node does not list it as an output",
                        vid, pid
                    )));
                }
            }
        }

        let mut expected_consumers: HashMap<usize, Vec<NodeId>> = HashMap::new();
        for (nid, node) in self.nodes() {
            for &inp in &node.inputs {
                expected_consumers.entry(inp.0).or_default().push(nid);
            }
        }
        for (vid, value) in self.values() {
            let mut expected = expected_consumers.get(&vid.0).cloned().unwrap_or_default();
            let mut actual = value.consumers.clone();
            expected.sort_by_key(|n| n.0);
            actual.sort_by_key(|n| n.0);
            if actual != expected {
                return Err(GPError::InvalidModel(format!(
                    "value {:?} consumer list does not match the nodes referencing it as input",
                    vid
                )));
            }
        }

        self.topological_sort()?;

        let reachable = self.reachable_from_inputs();
        for &out in &self.outputs {
            let value = self
                .value(out)
                .ok_or_else(|| GPError::InvalidModel(format!("graph output {:?} does not exist", out)))?;
            if !value.is_initializer() && !reachable.contains(&out.0) {
                return Err(GPError::InvalidModel(format!(
                    "graph output {:?} is not reachable from any graph input",
                    out
                )));
            }
        }

        Ok(())
    }

    /// Internal binary form. Not a public exchange format (§6 leaves
    /// model import to a separate importer) — used for graph snapshotting
    /// and round-tripping within this crate.
    pub fn serialize(&self) -> GPResult<Vec<u8>> {
        let mut out = Vec::new();
        out.extend_from_slice(b"GPG1");

        write_u64(&mut out, self.values.len() as u64);
        for slot in &self.values {
            match slot {
                None => out.push(0),
                Some(value) => {
                    out.push(1);
                    write_opt_string(&mut out, value.name.as_deref());
                    write_u64(&mut out, value.shape.rank() as u64);
                    for &e in value.shape.extents() {
                        write_u64(&mut out, e as u64);
                    }
                    for &d in value.shape.dynamic_axes() {
                        out.push(d as u8);
                    }
                    write_u32(&mut out, value.dtype.wire_tag());
                    match &value.constant {
                        None => out.push(0),
                        Some(t) => {
                            out.push(1);
                            let bytes = t.serialize()?;
                            write_u64(&mut out, bytes.len() as u64);
                            out.extend_from_slice(&bytes);
                        }
                    }
                    match value.producer {
                        None => out.push(0),
                        Some(p) => {
                            out.push(1);
                            write_u64(&mut out, p.0 as u64);
                        }
                    }
                    write_u64(&mut out, value.consumers.len() as u64);
                    for c in &value.consumers {
                        write_u64(&mut out, c.0 as u64);
                    }
                }
            }
        }

        write_u64(&mut out, self.nodes.len() as u64);
        for slot in &self.nodes {
            match slot {
                None => out.push(0),
                Some(node) => {
                    out.push(1);
                    write_string(&mut out, &node.op_type);
                    write_opt_string(&mut out, node.name.as_deref());
                    write_u64(&mut out, node.inputs.len() as u64);
                    for v in &node.inputs {
                        write_u64(&mut out, v.0 as u64);
                    }
                    write_u64(&mut out, node.outputs.len() as u64);
                    for v in &node.outputs {
                        write_u64(&mut out, v.0 as u64);
                    }
                    write_u64(&mut out, node.attributes.len() as u64);
                    for (k, v) in &node.attributes {
                        write_string(&mut out, k);
                        write_attribute(&mut out, v)?;
                    }
                    match node.device {
                        None => out.push(0),
                        Some(d) => {
                            out.push(1);
                            write_device(&mut out, d);
                        }
                    }
                }
            }
        }

        write_u64(&mut out, self.inputs.len() as u64);
        for v in &self.inputs {
            write_u64(&mut out, v.0 as u64);
        }
        write_u64(&mut out, self.outputs.len() as u64);
        for v in &self.outputs {
            write_u64(&mut out, v.0 as u64);
        }

        Ok(out)
    }

    pub fn deserialize(bytes: &[u8]) -> GPResult<Graph> {
        let mut r = Reader::new(bytes);
        if r.take(4)? != b"GPG1" {
            return Err(GPError::SerializationError("bad graph magic".into()));
        }

        let num_values = r.u64()? as usize;
        let mut values = Vec::with_capacity(num_values);
        for _ in 0..num_values {
            if r.u8()? == 0 {
                values.push(None);
                continue;
            }
            let name = r.opt_string()?;
            let rank = r.u64()? as usize;
            let mut extents = Vec::with_capacity(rank);
            for _ in 0..rank {
                extents.push(r.u64()? as usize);
            }
            let mut dynamic_axes = Vec::with_capacity(rank);
            for _ in 0..rank {
                dynamic_axes.push(r.u8()? != 0);
            }
            let dyn_axes: Vec<usize> = dynamic_axes
                .iter()
                .enumerate()
                .filter(|(_, &d)| d)
                .map(|(i, _)| i)
                .collect();
            let shape = Shape::with_dynamic(extents, &dyn_axes);
            let dtype = DataType::from_wire_tag(r.u32()?)
                .ok_or_else(|| GPError::SerializationError("unknown dtype tag in graph".into()))?;
            let constant = if r.u8()? == 1 {
                let n = r.u64()? as usize;
                let tbytes = r.take(n)?;
                Some(Tensor::deserialize(tbytes, DeviceKind::Cpu)?)
            } else {
                None
            };
            let producer = if r.u8()? == 1 { Some(NodeId(r.u64()? as usize)) } else { None };
            let num_consumers = r.u64()? as usize;
            let mut consumers = Vec::with_capacity(num_consumers);
            for _ in 0..num_consumers {
                consumers.push(NodeId(r.u64()? as usize));
            }
            values.push(Some(Value { name, shape, dtype, constant, producer, consumers }));
        }

        let num_nodes = r.u64()? as usize;
        let mut nodes = Vec::with_capacity(num_nodes);
        for _ in 0..num_nodes {
            if r.u8()? == 0 {
                nodes.push(None);
                continue;
            }
            let op_type = r.string()?;
            let name = r.opt_string()?;
            let num_inputs = r.u64()? as usize;
            let mut inputs = Vec::with_capacity(num_inputs);
            for _ in 0..num_inputs {
                inputs.push(ValueId(r.u64()? as usize));
            }
            let num_outputs = r.u64()? as usize;
            let mut outputs = Vec::with_capacity(num_outputs);
            for _ in 0..num_outputs {
                outputs.push(ValueId(r.u64()? as usize));
            }
            let num_attrs = r.u64()? as usize;
            let mut attributes = HashMap::with_capacity(num_attrs);
            for _ in 0..num_attrs {
                let key = r.string()?;
                let value = read_attribute(&mut r)?;
                attributes.insert(key, value);
            }
            let device = if r.u8()? == 1 { Some(r.device()?) } else { None };
            nodes.push(Some(Node { op_type, name, inputs, outputs, attributes, device }));
        }

        let num_graph_inputs = r.u64()? as usize;
        let mut inputs = Vec::with_capacity(num_graph_inputs);
        for _ in 0..num_graph_inputs {
            inputs.push(ValueId(r.u64()? as usize));
        }
        let num_graph_outputs = r.u64()? as usize;
        let mut outputs = Vec::with_capacity(num_graph_outputs);
        for _ in 0..num_graph_outputs {
            outputs.push(ValueId(r.u64()? as usize));
        }

        Ok(Graph { nodes, values, inputs, outputs })
    }
}

fn write_u64(out: &mut Vec<u8>, v: u64) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn write_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn write_string(out: &mut Vec<u8>, s: &str) {
    write_u64(out, s.len() as u64);
    out.extend_from_slice(s.as_bytes());
}

fn write_opt_string(out: &mut Vec<u8>, s: Option<&str>) {
    match s {
        None => out.push(0),
        Some(s) => {
            out.push(1);
            write_string(out, s);
        }
    }
}

fn write_device(out: &mut Vec<u8>, d: DeviceKind) {
    match d {
        DeviceKind::Cpu => out.push(0),
        DeviceKind::Cuda(idx) => {
            out.push(1);
            write_u32(out, idx);
        }
    }
}

fn write_attribute(out: &mut Vec<u8>, v: &AttributeValue) -> GPResult<()> {
    match v {
        AttributeValue::Int(i) => {
            out.push(0);
            out.extend_from_slice(&i.to_le_bytes());
        }
        AttributeValue::Float(f) => {
            out.push(1);
            out.extend_from_slice(&f.to_le_bytes());
        }
        AttributeValue::Str(s) => {
            out.push(2);
            write_string(out, s);
        }
        AttributeValue::Ints(v) => {
            out.push(3);
            write_u64(out, v.len() as u64);
            for i in v {
                out.extend_from_slice(&i.to_le_bytes());
            }
        }
        AttributeValue::Floats(v) => {
            out.push(4);
            write_u64(out, v.len() as u64);
            for f in v {
                out.extend_from_slice(&f.to_le_bytes());
            }
        }
        AttributeValue::Tensor(t) => {
            out.push(5);
            let bytes = t.serialize()?;
            write_u64(out, bytes.len() as u64);
            out.extend_from_slice(&bytes);
        }
    }
    Ok(())
}

fn read_attribute(r: &mut Reader) -> GPResult<AttributeValue> {
    Ok(match r.u8()? {
        0 => AttributeValue::Int(r.i64()?),
        1 => AttributeValue::Float(r.f32()?),
        2 => AttributeValue::Str(r.string()?),
        3 => {
            let n = r.u64()? as usize;
            let mut v = Vec::with_capacity(n);
            for _ in 0..n {
                v.push(r.i64()?);
            }
            AttributeValue::Ints(v)
        }
        4 => {
            let n = r.u64()? as usize;
            let mut v = Vec::with_capacity(n);
            for _ in 0..n {
                v.push(r.f32()?);
            }
            AttributeValue::Floats(v)
        }
        5 => {
            let n = r.u64()? as usize;
            let bytes = r.take(n)?;
            AttributeValue::Tensor(Tensor::deserialize(bytes, DeviceKind::Cpu)?)
        }
        tag => return Err(GPError::SerializationError(format!("unknown attribute tag {tag}"))),
    })
}

/// Minimal forward-only byte-cursor used by `Graph::deserialize`.
struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize) -> GPResult<&'a [u8]> {
        if self.pos + n > self.bytes.len() {
            return Err(GPError::SerializationError("truncated graph buffer".into()));
        }
        let s = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(s)
    }

    fn u8(&mut self) -> GPResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> GPResult<u32> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn u64(&mut self) -> GPResult<u64> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn i64(&mut self) -> GPResult<i64> {
        Ok(i64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn f32(&mut self) -> GPResult<f32> {
        Ok(f32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn string(&mut self) -> GPResult<String> {
        let n = self.u64()? as usize;
        let bytes = self.take(n)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| GPError::SerializationError(format!("invalid utf-8 string: {e}")))
    }

    fn opt_string(&mut self) -> GPResult<Option<String>> {
        if self.u8()? == 1 {
            Ok(Some(self.string()?))
        } else {
            Ok(None)
        }
    }

    fn device(&mut self) -> GPResult<DeviceKind> {
        Ok(match self.u8()? {
            0 => DeviceKind::Cpu,
            1 => DeviceKind::Cuda(self.u32()?),
            tag => return Err(GPError::SerializationError(format!("unknown device tag {tag}"))),
        })
    }
}
