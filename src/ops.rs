//! Operator implementations.

use smallvec::{smallvec, SmallVec};

use crate::dim::PartialShape;
use crate::operator::{InferContext, OpError, Operator, OutputList, ValueMeta};
use crate::value::{ElementType, TensorValue};

mod broadcast;
mod concat;
mod layout;
mod patches;
mod reduce;

pub use broadcast::{Broadcast, BroadcastSpec};
pub use concat::Concat;
pub use layout::{Reshape, Squeeze};
pub use patches::{ExtractImagePatches, PadMode};
pub use reduce::ReduceSum;

/// Convert an index in `[-len, len)` to a positive index in `[0, len)`,
/// where negative values count back from the end.
pub fn resolve_index(len: usize, index: i64) -> Option<usize> {
    if index >= 0 {
        let index = index as usize;
        (index < len).then_some(index)
    } else {
        len.checked_sub(index.unsigned_abs() as usize)
    }
}

/// Resolve an axis for a tensor of rank `rank`, supporting negative
/// (from-the-end) axes.
pub fn resolve_axis(rank: usize, axis: i64) -> Result<usize, OpError> {
    resolve_index(rank, axis).ok_or(OpError::InvalidValue("axis is out of range"))
}

/// Resolve a list of axes for a tensor of rank `rank`.
///
/// Duplicates are preserved; callers that forbid them check separately.
pub fn resolve_axes(rank: usize, axes: &[i64]) -> Result<SmallVec<[usize; 4]>, OpError> {
    axes.iter().map(|&axis| resolve_axis(rank, axis)).collect()
}

/// Graph input with a declared element type and partial shape.
#[derive(Debug)]
pub struct Parameter {
    dtype: ElementType,
    shape: PartialShape,
}

impl Parameter {
    pub fn new(dtype: ElementType, shape: PartialShape) -> Parameter {
        Parameter { dtype, shape }
    }
}

impl Operator for Parameter {
    fn name(&self) -> &str {
        "Parameter"
    }

    fn validate_and_infer_types(&self, ctx: &InferContext) -> Result<OutputList, OpError> {
        if ctx.input_count() != 0 {
            return Err(OpError::IncorrectInputCount);
        }
        Ok(smallvec![ValueMeta {
            dtype: self.dtype,
            shape: self.shape.clone(),
        }])
    }
}

/// Leaf node holding a concrete tensor value.
///
/// Shape inference pattern-matches `Constant` producers (via
/// `downcast_ref`) to read shapes and axes at validation time.
#[derive(Debug)]
pub struct Constant {
    value: TensorValue,
}

impl Constant {
    pub fn new(value: TensorValue) -> Constant {
        Constant { value }
    }

    pub fn value(&self) -> &TensorValue {
        &self.value
    }
}

impl Operator for Constant {
    fn name(&self) -> &str {
        "Constant"
    }

    fn validate_and_infer_types(&self, ctx: &InferContext) -> Result<OutputList, OpError> {
        if ctx.input_count() != 0 {
            return Err(OpError::IncorrectInputCount);
        }
        Ok(smallvec![ValueMeta {
            dtype: self.value.element_type(),
            shape: PartialShape::fixed(self.value.shape()),
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
        if !inputs.is_empty() || outputs.len() != 1 {
            return false;
        }
        outputs[0] = self.value.clone();
        true
    }
}
