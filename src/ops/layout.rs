//! Operators that change the layout or dimensionality of a tensor.

use std::collections::BTreeSet;

use smallvec::smallvec;

use crate::dim::{Dimension, PartialShape, Rank};
use crate::graph::{Graph, NodeId, OutputRef};
use crate::operator::{InferContext, OpError, Operator, OutputList, ValueMeta};
use crate::ops::resolve_axes;
use crate::value::TensorValue;

/// Reorder the axes of a tensor and reinterpret it with a new shape.
///
/// `input_order` is a permutation of the input axes applied before the
/// elements are reinterpreted as `output_shape`.
#[derive(Debug)]
pub struct Reshape {
    input_order: Vec<usize>,
    output_shape: Vec<usize>,
}

impl Reshape {
    pub fn new(input_order: Vec<usize>, output_shape: Vec<usize>) -> Reshape {
        Reshape {
            input_order,
            output_shape,
        }
    }

    pub fn input_order(&self) -> &[usize] {
        &self.input_order
    }

    pub fn output_shape(&self) -> &[usize] {
        &self.output_shape
    }

    fn is_identity_order(&self) -> bool {
        self.input_order.iter().enumerate().all(|(i, &axis)| i == axis)
    }
}

impl Operator for Reshape {
    fn name(&self) -> &str {
        "Reshape"
    }

    fn validate_and_infer_types(&self, ctx: &InferContext) -> Result<OutputList, OpError> {
        if ctx.input_count() != 1 {
            return Err(OpError::IncorrectInputCount);
        }
        let shape = ctx.input_shape(0)?;
        if let Rank::Fixed(rank) = shape.rank() {
            if self.input_order.len() != rank {
                return Err(OpError::InvalidValue(
                    "input order must be a permutation of the input axes",
                ));
            }
            let mut seen = vec![false; rank];
            for &axis in &self.input_order {
                if axis >= rank || seen[axis] {
                    return Err(OpError::InvalidValue(
                        "input order must be a permutation of the input axes",
                    ));
                }
                seen[axis] = true;
            }
        }
        if let Some(in_shape) = shape.to_shape() {
            let in_len: usize = in_shape.iter().product();
            let out_len: usize = self.output_shape.iter().product();
            if in_len != out_len {
                return Err(OpError::IncompatibleShapes(
                    "output shape must contain the same number of elements as the input",
                ));
            }
        }
        Ok(smallvec![ValueMeta {
            dtype: ctx.input_dtype(0)?,
            shape: PartialShape::fixed(&self.output_shape),
        }])
    }

    fn has_evaluate(&self) -> bool {
        true
    }

    /// Evaluation is supported for the identity axis order, where the
    /// element order does not change.
    fn evaluate(
        &self,
        _ctx: &InferContext,
        inputs: &[&TensorValue],
        outputs: &mut [TensorValue],
    ) -> bool {
        let Some(input) = inputs.first() else {
            return false;
        };
        if outputs.len() != 1 || !self.is_identity_order() {
            return false;
        }
        let out_len: usize = self.output_shape.iter().product();
        if input.len() != out_len {
            return false;
        }
        outputs[0] = TensorValue::new(self.output_shape.clone(), input.data().clone());
        true
    }
}

/// Remove size-1 axes from a tensor.
///
/// Inputs: the data tensor and a vector of axes to remove. An empty
/// constant axes vector means "remove every axis that is size 1".
#[derive(Debug)]
pub struct Squeeze;

impl Operator for Squeeze {
    fn name(&self) -> &str {
        "Squeeze"
    }

    fn validate_and_infer_types(&self, ctx: &InferContext) -> Result<OutputList, OpError> {
        if ctx.input_count() != 2 {
            return Err(OpError::IncorrectInputCount);
        }
        let axes_meta = ctx.input_meta(1)?;
        if !axes_meta.dtype.is_integer() {
            return Err(OpError::InvalidValue(
                "axes input must have an integer element type",
            ));
        }
        if let Rank::Fixed(rank) = axes_meta.shape.rank() {
            if rank > 1 {
                return Err(OpError::IncompatibleShapes("axes input must be a vector"));
            }
        }

        let dtype = ctx.input_dtype(0)?;
        let data_shape = ctx.input_shape(0)?;
        let dynamic = || {
            smallvec![ValueMeta {
                dtype,
                shape: PartialShape::Dynamic,
            }]
        };

        let Some(dims) = data_shape.dims() else {
            return Ok(dynamic());
        };
        let Some(axes) = ctx.input_constant(1).and_then(|v| v.as_i64_vec()) else {
            return Ok(dynamic());
        };

        if axes.is_empty() {
            // Remove every size-1 axis. Axes that are still unknown could
            // turn out to be size 1, so the whole shape must be static.
            if !data_shape.is_static() {
                return Ok(dynamic());
            }
            let out_dims: Vec<Dimension> = dims
                .iter()
                .copied()
                .filter(|dim| dim.fixed() != Some(1))
                .collect();
            return Ok(smallvec![ValueMeta {
                dtype,
                shape: PartialShape::Ranked(out_dims),
            }]);
        }

        let unique: BTreeSet<usize> = resolve_axes(dims.len(), &axes)?.into_iter().collect();
        if data_shape.is_static() {
            for &axis in &unique {
                if dims[axis].fixed() != Some(1) {
                    return Err(OpError::IncompatibleShapes(
                        "only axes of size 1 may be removed",
                    ));
                }
            }
        }
        let out_dims: Vec<Dimension> = dims
            .iter()
            .enumerate()
            .filter(|(i, _)| !unique.contains(i))
            .map(|(_, &dim)| dim)
            .collect();
        Ok(smallvec![ValueMeta {
            dtype,
            shape: PartialShape::Ranked(out_dims),
        }])
    }

    fn can_decompose(&self) -> bool {
        true
    }

    /// Lower to a `Reshape` with the identity axis order and the inferred
    /// output shape.
    fn decompose(&self, graph: &mut Graph, node: NodeId) -> Result<Vec<OutputRef>, OpError> {
        let (input, rank, out_shape) = {
            let ctx = InferContext::new(graph, node);
            let out_shape = ctx
                .output_meta(0)
                .and_then(|meta| meta.shape.to_shape())
                .ok_or(OpError::UnsupportedValue(
                    "cannot lower a squeeze whose output shape is not fully static",
                ))?;
            let rank = ctx
                .input_shape(0)?
                .rank()
                .fixed()
                .ok_or(OpError::UnsupportedValue(
                    "cannot lower a squeeze whose input rank is unknown",
                ))?;
            (ctx.input(0)?, rank, out_shape)
        };
        let order: Vec<usize> = (0..rank).collect();
        let reshape = graph
            .add_node(None, Reshape::new(order, out_shape), &[input])
            .map_err(|e| e.error().clone())?;
        Ok(vec![reshape.into()])
    }
}
