//! The [`Operator`] trait and supporting types.

use std::any::Any;
use std::error::Error;
use std::fmt;
use std::fmt::Debug;

use smallvec::SmallVec;

use crate::dim::PartialShape;
use crate::graph::{Adjoints, Graph, NodeId, OutputRef};
use crate::value::{ElementType, TensorValue};

/// Inferred element type and partial shape of one node output.
#[derive(Clone, Debug, PartialEq)]
pub struct ValueMeta {
    pub dtype: ElementType,
    pub shape: PartialShape,
}

/// Output metadata produced by [`Operator::validate_and_infer_types`].
///
/// Most operators produce one output.
pub type OutputList = SmallVec<[ValueMeta; 1]>;

/// Errors reported by operators during validation or rewriting.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum OpError {
    /// The node was wired with the wrong number of inputs.
    IncorrectInputCount,
    /// Input shapes are statically known to be illegal for this operator.
    IncompatibleShapes(&'static str),
    /// An attribute or constant input has an invalid value.
    InvalidValue(&'static str),
    /// The operator does not support this configuration.
    UnsupportedValue(&'static str),
}

impl fmt::Display for OpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpError::IncorrectInputCount => write!(f, "incorrect number of inputs"),
            OpError::IncompatibleShapes(details) => {
                write!(f, "incompatible input shapes: {}", details)
            }
            OpError::InvalidValue(details) => write!(f, "invalid value: {}", details),
            OpError::UnsupportedValue(details) => {
                write!(f, "unsupported value: {}", details)
            }
        }
    }
}

impl Error for OpError {}

/// View of a node's inputs passed to operator methods.
///
/// Operators read only the current metadata of their direct inputs through
/// this context, which keeps inference a pure function of the inputs.
pub struct InferContext<'a> {
    graph: &'a Graph,
    node: NodeId,
}

impl<'a> InferContext<'a> {
    pub(crate) fn new(graph: &'a Graph, node: NodeId) -> InferContext<'a> {
        InferContext { graph, node }
    }

    pub fn graph(&self) -> &Graph {
        self.graph
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Return the edges feeding this node, in input order.
    pub fn inputs(&self) -> &[OutputRef] {
        match self.graph.get_node(self.node) {
            Some(node) => node.inputs(),
            None => &[],
        }
    }

    pub fn input_count(&self) -> usize {
        self.inputs().len()
    }

    /// Return the edge feeding input `index`.
    pub fn input(&self, index: usize) -> Result<OutputRef, OpError> {
        self.inputs()
            .get(index)
            .copied()
            .ok_or(OpError::IncorrectInputCount)
    }

    /// Return the inferred metadata of input `index`.
    pub fn input_meta(&self, index: usize) -> Result<&'a ValueMeta, OpError> {
        let edge = self.input(index)?;
        self.graph
            .output_meta(edge)
            .ok_or(OpError::InvalidValue("input producer has not been validated"))
    }

    pub fn input_dtype(&self, index: usize) -> Result<ElementType, OpError> {
        Ok(self.input_meta(index)?.dtype)
    }

    pub fn input_shape(&self, index: usize) -> Result<&'a PartialShape, OpError> {
        Ok(&self.input_meta(index)?.shape)
    }

    /// Return the value of input `index` if it is produced by a `Constant`.
    pub fn input_constant(&self, index: usize) -> Option<&'a TensorValue> {
        let edge = self.input(index).ok()?;
        self.graph.constant_value(edge)
    }

    /// Return this node's own inferred output metadata, if already set.
    pub fn output_meta(&self, index: usize) -> Option<&'a ValueMeta> {
        self.graph.output_meta(OutputRef::new(self.node, index))
    }
}

/// An operator in a computation graph.
///
/// Every operator infers its output types and shapes. The remaining
/// methods are optional capabilities paired with a query (`can_decompose`,
/// `has_adjoints`, `has_evaluate`); the default implementations report the
/// capability as absent.
pub trait Operator: Any + Debug {
    /// Name of the operator type, e.g. "Broadcast".
    fn name(&self) -> &str;

    /// Validate this node's configuration and infer the type and partial
    /// shape of every output.
    ///
    /// Statically-provable illegal configurations must fail. Genuinely
    /// unknowable inputs (dynamic shapes, non-constant shape inputs) must
    /// degrade to dynamic output metadata, never to an error or an unset
    /// output.
    fn validate_and_infer_types(&self, ctx: &InferContext) -> Result<OutputList, OpError>;

    /// Return true if this operator can rewrite itself into simpler ops.
    fn can_decompose(&self) -> bool {
        false
    }

    /// Append an equivalent subgraph of simpler ops to `graph` and return
    /// the outputs replacing this node's outputs, in order.
    fn decompose(
        &self,
        graph: &mut Graph,
        node: NodeId,
    ) -> Result<Vec<OutputRef>, OpError> {
        let _ = (graph, node);
        Err(OpError::UnsupportedValue("operator does not decompose"))
    }

    /// Return true if this operator has a gradient rule.
    fn has_adjoints(&self) -> bool {
        false
    }

    /// Append gradient ops to `graph` and record a delta for each of this
    /// node's inputs. `deltas` holds the adjoint of each output.
    fn generate_adjoints(
        &self,
        graph: &mut Graph,
        node: NodeId,
        adjoints: &mut Adjoints,
        deltas: &[OutputRef],
    ) -> Result<(), OpError> {
        let _ = (graph, node, adjoints, deltas);
        Err(OpError::UnsupportedValue("operator has no gradient rule"))
    }

    /// Return true if this operator has a reference evaluation path.
    fn has_evaluate(&self) -> bool {
        false
    }

    /// Evaluate this node on concrete inputs, writing results over
    /// `outputs`.
    ///
    /// Returns false when evaluation is unavailable for this configuration
    /// (unsupported element type, unresolved shapes). Callers treat false
    /// as "use a fallback path", not as an error.
    fn evaluate(
        &self,
        ctx: &InferContext,
        inputs: &[&TensorValue],
        outputs: &mut [TensorValue],
    ) -> bool {
        let _ = (ctx, inputs, outputs);
        false
    }
}

impl dyn Operator {
    /// Downcast this operator to a concrete type.
    pub fn downcast_ref<T: Operator>(&self) -> Option<&T> {
        (self as &dyn Any).downcast_ref()
    }
}

impl dyn Operator + Send + Sync {
    /// Downcast this operator to a concrete type.
    pub fn downcast_ref<T: Operator>(&self) -> Option<&T> {
        (self as &dyn Any).downcast_ref()
    }
}
