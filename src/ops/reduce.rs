//! Reduction operators.

use std::collections::BTreeSet;
use std::ops::Add;

use smallvec::smallvec;

use crate::dim::PartialShape;
use crate::operator::{InferContext, OpError, Operator, OutputList, ValueMeta};
use crate::ops::resolve_axes;
use crate::value::{Data, TensorValue};

/// Sum a tensor over a set of axes.
///
/// The reduced axes are dropped from the output shape. This is also the
/// operator that broadcast gradients lower to: summing a delta over the
/// broadcast axes restores the pre-broadcast shape.
#[derive(Debug)]
pub struct ReduceSum {
    axes: Vec<i64>,
}

impl ReduceSum {
    pub fn new(axes: Vec<i64>) -> ReduceSum {
        ReduceSum { axes }
    }

    pub fn axes(&self) -> &[i64] {
        &self.axes
    }
}

impl Operator for ReduceSum {
    fn name(&self) -> &str {
        "ReduceSum"
    }

    fn validate_and_infer_types(&self, ctx: &InferContext) -> Result<OutputList, OpError> {
        if ctx.input_count() != 1 {
            return Err(OpError::IncorrectInputCount);
        }
        let dtype = ctx.input_dtype(0)?;
        let Some(dims) = ctx.input_shape(0)?.dims() else {
            return Ok(smallvec![ValueMeta {
                dtype,
                shape: PartialShape::Dynamic,
            }]);
        };
        let axes: BTreeSet<usize> = resolve_axes(dims.len(), &self.axes)?.into_iter().collect();
        let out_dims = dims
            .iter()
            .enumerate()
            .filter(|(i, _)| !axes.contains(i))
            .map(|(_, &dim)| dim)
            .collect();
        Ok(smallvec![ValueMeta {
            dtype,
            shape: PartialShape::Ranked(out_dims),
        }])
    }

    fn has_evaluate(&self) -> bool {
        true
    }

    fn evaluate(
        &self,
        _ctx: &InferContext,
        inputs: &[&TensorValue],
        outputs: &mut [TensorValue],
    ) -> bool {
        let Some(input) = inputs.first() else {
            return false;
        };
        if outputs.len() != 1 {
            return false;
        }
        let in_shape = input.shape();
        let Ok(axes) = resolve_axes(in_shape.len(), &self.axes) else {
            return false;
        };
        let axes: BTreeSet<usize> = axes.into_iter().collect();
        let out_shape: Vec<usize> = in_shape
            .iter()
            .enumerate()
            .filter(|(i, _)| !axes.contains(i))
            .map(|(_, &size)| size)
            .collect();
        let data = match input.data() {
            Data::Int8(buf) => Data::Int8(reduce_sum(buf, in_shape, &axes)),
            Data::Int16(buf) => Data::Int16(reduce_sum(buf, in_shape, &axes)),
            Data::Int32(buf) => Data::Int32(reduce_sum(buf, in_shape, &axes)),
            Data::Int64(buf) => Data::Int64(reduce_sum(buf, in_shape, &axes)),
            Data::UInt8(buf) => Data::UInt8(reduce_sum(buf, in_shape, &axes)),
            Data::UInt16(buf) => Data::UInt16(reduce_sum(buf, in_shape, &axes)),
            Data::UInt32(buf) => Data::UInt32(reduce_sum(buf, in_shape, &axes)),
            Data::UInt64(buf) => Data::UInt64(reduce_sum(buf, in_shape, &axes)),
            Data::Float32(buf) => Data::Float32(reduce_sum(buf, in_shape, &axes)),
            Data::Float64(buf) => Data::Float64(reduce_sum(buf, in_shape, &axes)),
            // No arithmetic representation for these types.
            Data::Bool(_) | Data::BFloat16(_) | Data::Float16(_) => return false,
        };
        outputs[0] = TensorValue::new(out_shape, data);
        true
    }
}

/// Sum `src` over `axes`, producing a buffer for the shape with those axes
/// removed.
fn reduce_sum<T>(src: &[T], in_shape: &[usize], axes: &BTreeSet<usize>) -> Vec<T>
where
    T: Copy + Default + Add<Output = T>,
{
    let out_len: usize = in_shape
        .iter()
        .enumerate()
        .filter(|(i, _)| !axes.contains(i))
        .map(|(_, &size)| size)
        .product();
    let mut out = vec![T::default(); out_len];

    // Step in the output taken when the coordinate along each input axis
    // advances. Zero for reduced axes.
    let mut out_steps = vec![0usize; in_shape.len()];
    let mut stride = 1;
    for i in (0..in_shape.len()).rev() {
        if !axes.contains(&i) {
            out_steps[i] = stride;
            stride *= in_shape[i];
        }
    }

    let mut coords = vec![0usize; in_shape.len()];
    let mut out_offset = 0usize;
    for &value in src {
        out[out_offset] = out[out_offset] + value;
        for axis in (0..in_shape.len()).rev() {
            coords[axis] += 1;
            out_offset += out_steps[axis];
            if coords[axis] < in_shape[axis] {
                break;
            }
            out_offset -= out_steps[axis] * coords[axis];
            coords[axis] = 0;
        }
    }
    out
}
