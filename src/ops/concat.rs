//! Concatenation operator.

use smallvec::smallvec;

use crate::dim::{Dimension, PartialShape, Rank};
use crate::operator::{InferContext, OpError, Operator, OutputList, ValueMeta};
use crate::ops::resolve_axis;

/// Concatenate tensors along an axis.
///
/// Besides its use as a regular operator, shape inference pattern-matches
/// a `Concat` producing a shape input to recover per-dimension information
/// from shapes assembled out of constant and computed pieces.
#[derive(Debug)]
pub struct Concat {
    axis: i64,
}

impl Concat {
    pub fn new(axis: i64) -> Concat {
        Concat { axis }
    }

    pub fn axis(&self) -> i64 {
        self.axis
    }
}

impl Operator for Concat {
    fn name(&self) -> &str {
        "Concat"
    }

    fn validate_and_infer_types(&self, ctx: &InferContext) -> Result<OutputList, OpError> {
        if ctx.input_count() == 0 {
            return Err(OpError::IncorrectInputCount);
        }

        let dtype = ctx.input_dtype(0)?;
        for i in 1..ctx.input_count() {
            if ctx.input_dtype(i)? != dtype {
                return Err(OpError::InvalidValue("input element types must match"));
            }
        }

        let mut rank = None;
        for i in 0..ctx.input_count() {
            if let Rank::Fixed(n) = ctx.input_shape(i)?.rank() {
                match rank {
                    None => rank = Some(n),
                    Some(r) if r != n => {
                        return Err(OpError::IncompatibleShapes(
                            "inputs must have the same rank",
                        ));
                    }
                    _ => {}
                }
            }
        }
        let Some(rank) = rank else {
            return Ok(smallvec![ValueMeta {
                dtype,
                shape: PartialShape::Dynamic,
            }]);
        };
        let axis = resolve_axis(rank, self.axis)?;

        let mut dims = vec![Dimension::Dynamic; rank];
        let mut axis_sum = Some(0usize);
        for i in 0..ctx.input_count() {
            let Some(in_dims) = ctx.input_shape(i)?.dims() else {
                // Unknown rank contributes nothing we can check, and an
                // unknown amount to the concatenated axis.
                axis_sum = None;
                continue;
            };
            for (d, &dim) in in_dims.iter().enumerate() {
                if d == axis {
                    axis_sum = match (axis_sum, dim.fixed()) {
                        (Some(total), Some(size)) => Some(total + size),
                        _ => None,
                    };
                } else {
                    dims[d] = dims[d].merge(dim).ok_or(OpError::IncompatibleShapes(
                        "input shapes must match outside the concatenation axis",
                    ))?;
                }
            }
        }
        dims[axis] = match axis_sum {
            Some(total) => Dimension::Fixed(total),
            None => Dimension::Dynamic,
        };

        Ok(smallvec![ValueMeta {
            dtype,
            shape: PartialShape::Ranked(dims),
        }])
    }
}
