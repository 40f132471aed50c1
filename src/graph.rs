//! Computation graph: an arena of operator nodes connected by edges.

use std::error::Error;
use std::fmt;
use std::num::NonZero;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::operator::{InferContext, OpError, Operator, OutputList, ValueMeta};
use crate::ops::Constant;
use crate::value::TensorValue;

/// ID of a node in a [`Graph`].
///
/// Stored with a bias of one so that `Option<NodeId>` is the same size as
/// `NodeId`.
#[derive(Copy, Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct NodeId(NonZero<u32>);

impl NodeId {
    pub(crate) fn from_u32(value: u32) -> NodeId {
        assert!(value < u32::MAX, "node id exceeds limit");
        match NonZero::new(value + 1) {
            Some(id) => NodeId(id),
            None => unreachable!(),
        }
    }

    pub fn as_u32(self) -> u32 {
        self.0.get() - 1
    }

    pub fn as_usize(self) -> usize {
        self.as_u32() as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u32())
    }
}

/// Reference to a single output of a node.
#[derive(Copy, Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct OutputRef {
    pub node: NodeId,
    pub index: usize,
}

impl OutputRef {
    pub fn new(node: NodeId, index: usize) -> OutputRef {
        OutputRef { node, index }
    }
}

impl From<NodeId> for OutputRef {
    fn from(node: NodeId) -> OutputRef {
        OutputRef { node, index: 0 }
    }
}

/// A node in a [`Graph`]: an operator plus the edges feeding it.
pub struct Node {
    name: Option<String>,
    operator: Arc<dyn Operator + Send + Sync>,
    inputs: Vec<OutputRef>,
    /// Inferred output metadata. `None` until the node has been validated.
    outputs: Option<OutputList>,
}

impl Node {
    /// Return the node's name, if it has one.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn operator(&self) -> &(dyn Operator + Send + Sync) {
        &*self.operator
    }

    pub fn inputs(&self) -> &[OutputRef] {
        &self.inputs
    }

    /// Return the inferred output metadata, if the node has been validated.
    pub fn outputs(&self) -> Option<&[ValueMeta]> {
        self.outputs.as_deref()
    }
}

/// Error produced when validation of a node fails.
#[derive(Clone, Debug, PartialEq)]
pub struct ValidationError {
    node: NodeId,
    name: String,
    error: OpError,
}

impl ValidationError {
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Name of the failing node, falling back to the operator name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn error(&self) -> &OpError {
        &self.error
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "validation failed for node \"{}\" (#{}): {}",
            self.name, self.node, self.error
        )
    }
}

impl Error for ValidationError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(&self.error)
    }
}

/// Record of gradient edges accumulated while differentiating a graph.
///
/// Maps each value in the forward graph to the deltas (partial adjoints)
/// contributed by the consumers differentiated so far.
#[derive(Default)]
pub struct Adjoints {
    deltas: FxHashMap<OutputRef, SmallVec<[OutputRef; 1]>>,
}

impl Adjoints {
    pub fn new() -> Adjoints {
        Adjoints::default()
    }

    /// Record `delta` as a contribution to the adjoint of `value`.
    pub fn add_delta(&mut self, value: OutputRef, delta: OutputRef) {
        self.deltas.entry(value).or_default().push(delta);
    }

    /// Return the deltas recorded for `value`.
    pub fn deltas(&self, value: OutputRef) -> &[OutputRef] {
        self.deltas.get(&value).map(|d| d.as_slice()).unwrap_or(&[])
    }
}

/// A directed acyclic graph of operator nodes.
///
/// Edges may only reference nodes already in the graph at insertion time,
/// so the graph is acyclic by construction. Every node in the graph has
/// been validated; [`Graph::validate`] re-runs the whole inference pass
/// after rewiring.
#[derive(Default)]
pub struct Graph {
    nodes: Vec<Node>,
}

impl Graph {
    pub fn new() -> Graph {
        Graph::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get_node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.as_usize())
    }

    /// Add a node to the graph and validate it immediately.
    ///
    /// On failure the node is not added.
    pub fn add_node<O>(
        &mut self,
        name: Option<&str>,
        op: O,
        inputs: &[OutputRef],
    ) -> Result<NodeId, ValidationError>
    where
        O: Operator + Send + Sync,
    {
        let id = NodeId::from_u32(self.nodes.len() as u32);
        for edge in inputs {
            if edge.node.as_usize() >= self.nodes.len() {
                return Err(ValidationError {
                    node: id,
                    name: name.unwrap_or(op.name()).to_string(),
                    error: OpError::InvalidValue("input refers to a node that is not in the graph"),
                });
            }
        }
        self.nodes.push(Node {
            name: name.map(|n| n.to_string()),
            operator: Arc::new(op),
            inputs: inputs.to_vec(),
            outputs: None,
        });
        match self.validate_node(id) {
            Ok(()) => Ok(id),
            Err(err) => {
                self.nodes.pop();
                Err(err)
            }
        }
    }

    /// Return the inferred metadata for a node output.
    pub fn output_meta(&self, output: OutputRef) -> Option<&ValueMeta> {
        self.get_node(output.node)?.outputs()?.get(output.index)
    }

    /// Return the value behind `output` if its producer is a `Constant`.
    pub fn constant_value(&self, output: OutputRef) -> Option<&TensorValue> {
        if output.index != 0 {
            return None;
        }
        let constant: &Constant = self.get_node(output.node)?.operator().downcast_ref()?;
        Some(constant.value())
    }

    /// Rewire every input edge currently reading `old` to read `new`.
    pub fn replace_uses(&mut self, old: OutputRef, new: OutputRef) {
        for node in &mut self.nodes {
            for edge in &mut node.inputs {
                if *edge == old {
                    *edge = new;
                }
            }
        }
    }

    /// Re-run type and shape inference for every node.
    ///
    /// Nodes are processed in dependency order. This is required after
    /// rewiring: replacement producers are appended after their consumers,
    /// so insertion order is no longer a valid schedule.
    pub fn validate(&mut self) -> Result<(), ValidationError> {
        for node in &mut self.nodes {
            node.outputs = None;
        }
        for id in self.topo_order() {
            self.validate_node(id)?;
        }
        Ok(())
    }

    /// Replace a node with an equivalent subgraph of simpler ops.
    ///
    /// Consumers of the node's outputs are rewired to the replacement
    /// outputs and the whole graph is re-validated. Returns the
    /// replacement outputs, in the same order as the node's outputs.
    pub fn decompose_node(&mut self, id: NodeId) -> Result<Vec<OutputRef>, ValidationError> {
        let Some(node) = self.get_node(id) else {
            return Err(ValidationError {
                node: id,
                name: String::new(),
                error: OpError::InvalidValue("node is not in the graph"),
            });
        };
        let op = node.operator.clone();
        if !op.can_decompose() {
            return Err(self.error_for(id, OpError::UnsupportedValue("operator does not decompose")));
        }
        let Some(n_outputs) = node.outputs().map(|o| o.len()) else {
            return Err(self.error_for(
                id,
                OpError::InvalidValue("node must be validated before decomposition"),
            ));
        };
        let replacements = op.decompose(self, id).map_err(|e| self.error_for(id, e))?;
        if replacements.len() != n_outputs {
            return Err(self.error_for(
                id,
                OpError::InvalidValue("decomposition produced the wrong number of outputs"),
            ));
        }
        for (index, replacement) in replacements.iter().enumerate() {
            self.replace_uses(OutputRef::new(id, index), *replacement);
        }
        self.validate()?;
        Ok(replacements)
    }

    /// Run a node's gradient rule, appending gradient ops to the graph and
    /// recording deltas for the node's inputs.
    pub fn generate_adjoints(
        &mut self,
        id: NodeId,
        adjoints: &mut Adjoints,
        deltas: &[OutputRef],
    ) -> Result<(), ValidationError> {
        let Some(node) = self.get_node(id) else {
            return Err(ValidationError {
                node: id,
                name: String::new(),
                error: OpError::InvalidValue("node is not in the graph"),
            });
        };
        let op = node.operator.clone();
        if !op.has_adjoints() {
            return Err(self.error_for(id, OpError::UnsupportedValue("operator has no gradient rule")));
        }
        op.generate_adjoints(self, id, adjoints, deltas)
            .map_err(|e| self.error_for(id, e))
    }

    /// Evaluate a node on concrete inputs via its reference implementation.
    ///
    /// Returns false if the node does not exist or evaluation is
    /// unavailable for its configuration.
    pub fn evaluate_node(
        &self,
        id: NodeId,
        inputs: &[&TensorValue],
        outputs: &mut [TensorValue],
    ) -> bool {
        let Some(node) = self.get_node(id) else {
            return false;
        };
        if !node.operator().has_evaluate() {
            return false;
        }
        let ctx = InferContext::new(self, id);
        node.operator().evaluate(&ctx, inputs, outputs)
    }

    fn validate_node(&mut self, id: NodeId) -> Result<(), ValidationError> {
        let op = self.nodes[id.as_usize()].operator.clone();
        let result = {
            let ctx = InferContext::new(self, id);
            op.validate_and_infer_types(&ctx)
        };
        match result {
            Ok(outputs) => {
                self.nodes[id.as_usize()].outputs = Some(outputs);
                Ok(())
            }
            Err(error) => Err(self.error_for(id, error)),
        }
    }

    fn error_for(&self, id: NodeId, error: OpError) -> ValidationError {
        let name = self
            .get_node(id)
            .map(|n| n.name().unwrap_or(n.operator().name()).to_string())
            .unwrap_or_default();
        ValidationError {
            node: id,
            name,
            error,
        }
    }

    /// Return all node IDs in dependency order.
    fn topo_order(&self) -> Vec<NodeId> {
        // 0 = unvisited, 1 = on stack, 2 = emitted
        let mut state = vec![0u8; self.nodes.len()];
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack: Vec<(usize, bool)> = Vec::new();

        for start in 0..self.nodes.len() {
            if state[start] != 0 {
                continue;
            }
            stack.push((start, false));
            while let Some((index, expanded)) = stack.pop() {
                if expanded {
                    state[index] = 2;
                    order.push(NodeId::from_u32(index as u32));
                    continue;
                }
                if state[index] != 0 {
                    continue;
                }
                state[index] = 1;
                stack.push((index, true));
                for edge in self.nodes[index].inputs.iter().rev() {
                    let dep = edge.node.as_usize();
                    if dep < self.nodes.len() && state[dep] == 0 {
                        stack.push((dep, false));
                    }
                }
            }
        }
        order
    }
}

#[cfg(test)]
mod tests {
    use super::{Graph, NodeId, OutputRef};
    use crate::dim::PartialShape;
    use crate::operator::OpError;
    use crate::ops::{Constant, Parameter};
    use crate::value::{ElementType, TensorValue};

    #[test]
    fn test_add_node_validates_immediately() {
        let mut graph = Graph::new();
        let param = graph
            .add_node(
                Some("x"),
                Parameter::new(ElementType::Float32, PartialShape::fixed(&[2, 3])),
                &[],
            )
            .unwrap();

        let node = graph.get_node(param).unwrap();
        assert_eq!(node.name(), Some("x"));
        let outputs = node.outputs().unwrap();
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].dtype, ElementType::Float32);
        assert_eq!(outputs[0].shape, PartialShape::fixed(&[2, 3]));
    }

    #[test]
    fn test_add_node_rejects_dangling_edge() {
        let mut graph = Graph::new();
        let missing = OutputRef::new(NodeId::from_u32(7), 0);
        let result = graph.add_node(
            None,
            Parameter::new(ElementType::Float32, PartialShape::Dynamic),
            &[missing],
        );
        let err = result.unwrap_err();
        assert_eq!(
            err.error(),
            &OpError::InvalidValue("input refers to a node that is not in the graph")
        );
        assert!(graph.is_empty());
    }

    #[test]
    fn test_constant_value_lookup() {
        let mut graph = Graph::new();
        let constant = graph
            .add_node(None, Constant::new(TensorValue::from_vec(vec![5i64, 3, 1])), &[])
            .unwrap();

        let value = graph.constant_value(constant.into()).unwrap();
        assert_eq!(value.as_i64_vec(), Some(vec![5, 3, 1]));

        let param = graph
            .add_node(
                None,
                Parameter::new(ElementType::Int64, PartialShape::fixed(&[3])),
                &[],
            )
            .unwrap();
        assert!(graph.constant_value(param.into()).is_none());
    }

    #[test]
    fn test_validation_error_display() {
        let mut graph = Graph::new();
        let err = graph
            .add_node(
                Some("bad"),
                Parameter::new(ElementType::Float32, PartialShape::Dynamic),
                &[OutputRef::new(NodeId::from_u32(3), 0)],
            )
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "validation failed for node \"bad\" (#0): invalid value: \
             input refers to a node that is not in the graph"
        );
    }

    #[test]
    fn test_validate_recomputes_all_outputs() {
        let mut graph = Graph::new();
        let a = graph
            .add_node(
                Some("a"),
                Parameter::new(ElementType::Float32, PartialShape::fixed(&[4])),
                &[],
            )
            .unwrap();
        let b = graph
            .add_node(
                Some("b"),
                Parameter::new(ElementType::Float32, PartialShape::fixed(&[8])),
                &[],
            )
            .unwrap();

        graph.validate().unwrap();
        assert_eq!(
            graph.output_meta(a.into()).unwrap().shape,
            PartialShape::fixed(&[4])
        );
        assert_eq!(
            graph.output_meta(b.into()).unwrap().shape,
            PartialShape::fixed(&[8])
        );
    }
}
