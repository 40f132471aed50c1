//! tensor-ir is a tensor computation graph IR with shape and type
//! inference.
//!
//! A computation is a [`Graph`] of operator nodes. Each [`Operator`]
//! validates its configuration and infers an element type and
//! [`PartialShape`] for every output, working over shapes whose rank or
//! individual dimensions may be unknown until runtime. Operators may also
//! offer optional capabilities:
//!
//! - decomposition into simpler ops ([`Operator::decompose`]),
//! - a gradient rule ([`Operator::generate_adjoints`]),
//! - reference evaluation on concrete [`TensorValue`]s
//!   ([`Operator::evaluate`]), dispatched over a closed set of element
//!   types.
//!
//! ## Example
//!
//! ```
//! use tensor_ir::ops::{Broadcast, BroadcastSpec, Constant, Parameter};
//! use tensor_ir::{ElementType, Graph, PartialShape, TensorValue};
//!
//! let mut graph = Graph::new();
//! let x = graph.add_node(
//!     Some("x"),
//!     Parameter::new(ElementType::Float32, PartialShape::fixed(&[3, 1])),
//!     &[],
//! )?;
//! let shape = graph.add_node(
//!     None,
//!     Constant::new(TensorValue::from_vec(vec![5i64, 3, 1])),
//!     &[],
//! )?;
//! let bc = graph.add_node(
//!     None,
//!     Broadcast::new(BroadcastSpec::Numpy),
//!     &[x.into(), shape.into()],
//! )?;
//! assert_eq!(
//!     graph.output_meta(bc.into()).unwrap().shape,
//!     PartialShape::fixed(&[5, 3, 1])
//! );
//! # Ok::<(), tensor_ir::ValidationError>(())
//! ```

pub mod dim;
pub mod graph;
pub mod operator;
pub mod ops;
pub mod value;

pub use dim::{Dimension, PartialShape, Rank};
pub use graph::{Adjoints, Graph, Node, NodeId, OutputRef, ValidationError};
pub use operator::{InferContext, OpError, Operator, OutputList, ValueMeta};
pub use value::{Data, ElementType, TensorValue};
