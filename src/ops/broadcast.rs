//! Broadcast operator.

use std::collections::BTreeSet;

use smallvec::smallvec;

use crate::dim::{Dimension, PartialShape};
use crate::graph::{Adjoints, Graph, NodeId, OutputRef};
use crate::operator::{InferContext, OpError, Operator, OutputList, ValueMeta};
use crate::ops::{Concat, ReduceSum};
use crate::value::{map_data, Data, TensorValue};

/// Broadcast convention used to align the input with the target shape.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BroadcastSpec {
    /// An explicit axes-mapping input pairs each input axis with a target
    /// axis. The mapping must be sorted; transposes are not permitted.
    Explicit,
    /// NumPy alignment: the input is aligned with the trailing axes of the
    /// target shape.
    Numpy,
    /// PaddlePaddle alignment: the input is aligned starting at a
    /// configured target axis.
    Pdpd { axis: i64 },
}

/// Replicate a tensor to a target shape.
///
/// Inputs: the data tensor, a rank-1 integer tensor holding the target
/// shape, and (Explicit mode only) a rank-1 integer axes mapping.
#[derive(Debug)]
pub struct Broadcast {
    spec: BroadcastSpec,
}

impl Broadcast {
    pub fn new(spec: BroadcastSpec) -> Broadcast {
        Broadcast { spec }
    }

    pub fn spec(&self) -> BroadcastSpec {
        self.spec
    }

    /// Compute the output axes along which the input is replicated.
    ///
    /// Returns `None` when the axes cannot be determined statically, e.g.
    /// because the target shape or axes mapping is not constant.
    pub fn broadcast_axes(&self, ctx: &InferContext) -> Option<BTreeSet<usize>> {
        match self.spec {
            BroadcastSpec::Explicit => {
                // The target rank is the length of the shape input, which
                // is known when that input's own shape is static.
                let shape_input_shape = ctx.input_shape(1).ok()?.to_shape()?;
                if shape_input_shape.len() != 1 {
                    return None;
                }
                let target_rank = shape_input_shape[0];
                let mapping = ctx.input_constant(2)?.as_i64_vec()?;
                let mut axes: BTreeSet<usize> = (0..target_rank).collect();
                for axis in mapping {
                    axes.remove(&usize::try_from(axis).ok()?);
                }
                Some(axes)
            }
            BroadcastSpec::Numpy | BroadcastSpec::Pdpd { .. } => {
                let arg = ctx.input_shape(0).ok()?.to_shape()?;
                let result = ctx.output_meta(0)?.shape.to_shape()?;
                let start = match self.spec {
                    BroadcastSpec::Pdpd { axis } => usize::try_from(axis).ok()?,
                    _ => result.len().checked_sub(arg.len())?,
                };
                let mut axes = BTreeSet::new();
                for i in 0..result.len() {
                    if i < start || i >= start + arg.len() || result[i] != arg[i - start] {
                        axes.insert(i);
                    }
                }
                Some(axes)
            }
        }
    }
}

impl Operator for Broadcast {
    fn name(&self) -> &str {
        "Broadcast"
    }

    fn validate_and_infer_types(&self, ctx: &InferContext) -> Result<OutputList, OpError> {
        let expected_inputs = match self.spec {
            BroadcastSpec::Explicit => 3,
            _ => 2,
        };
        if ctx.input_count() != expected_inputs {
            return Err(OpError::IncorrectInputCount);
        }

        let shape_meta = ctx.input_meta(1)?;
        if !shape_meta.dtype.is_integer() {
            return Err(OpError::InvalidValue(
                "target shape input must have an integer element type",
            ));
        }
        if !shape_meta.shape.rank().compatible(1) {
            return Err(OpError::IncompatibleShapes(
                "target shape input must be a rank 1 tensor",
            ));
        }
        if let BroadcastSpec::Explicit = self.spec {
            let axes_meta = ctx.input_meta(2)?;
            if !axes_meta.dtype.is_integer() {
                return Err(OpError::InvalidValue(
                    "axes mapping input must have an integer element type",
                ));
            }
            if !axes_meta.shape.rank().compatible(1) {
                return Err(OpError::IncompatibleShapes(
                    "axes mapping input must be a rank 1 tensor",
                ));
            }
        }

        let mut result_shape = resolve_target_shape(ctx)?;

        match self.spec {
            BroadcastSpec::Explicit => {
                let arg_shape = ctx.input_shape(0)?.to_shape();
                let axes_input_shape = ctx.input_meta(2)?.shape.to_shape();
                if let (Some(arg), Some(axes_shape)) = (arg_shape, axes_input_shape) {
                    let axes_size: usize = axes_shape.iter().product();
                    if axes_size != arg.len() {
                        return Err(OpError::IncompatibleShapes(
                            "axes mapping size must match the input rank",
                        ));
                    }
                    let target = ctx.input_constant(1).and_then(|v| v.as_i64_vec());
                    let mapping = ctx.input_constant(2).and_then(|v| v.as_i64_vec());
                    if let (Some(target), Some(mapping)) = (target, mapping) {
                        validate_explicit_mapping(&arg, &target, &mapping)?;
                    }
                }
            }
            BroadcastSpec::Numpy | BroadcastSpec::Pdpd { .. } => {
                let arg_shape = ctx.input_shape(0)?.to_shape();
                let target = ctx.input_constant(1).and_then(|v| v.as_i64_vec());
                if let (Some(arg), Some(target)) = (arg_shape, target) {
                    // Negative values were already rejected when resolving
                    // the target shape.
                    let target: Vec<usize> = target.iter().map(|&d| d as usize).collect();
                    let dims = infer_aligned_shape(self.spec, &arg, &target)?;
                    result_shape = PartialShape::Ranked(dims);
                }
            }
        }

        Ok(smallvec![ValueMeta {
            dtype: ctx.input_dtype(0)?,
            shape: result_shape,
        }])
    }

    fn has_adjoints(&self) -> bool {
        true
    }

    /// The adjoint of a broadcast sums the delta over the broadcast axes.
    fn generate_adjoints(
        &self,
        graph: &mut Graph,
        node: NodeId,
        adjoints: &mut Adjoints,
        deltas: &[OutputRef],
    ) -> Result<(), OpError> {
        let delta = *deltas.first().ok_or(OpError::IncorrectInputCount)?;
        let (axes, arg) = {
            let ctx = InferContext::new(graph, node);
            let axes = self.broadcast_axes(&ctx).ok_or(OpError::UnsupportedValue(
                "gradient requires statically known broadcast axes",
            ))?;
            (axes, ctx.input(0)?)
        };
        let axes: Vec<i64> = axes.into_iter().map(|axis| axis as i64).collect();
        let sum = graph
            .add_node(None, ReduceSum::new(axes), &[delta])
            .map_err(|e| e.error().clone())?;
        adjoints.add_delta(arg, sum.into());
        Ok(())
    }

    fn has_evaluate(&self) -> bool {
        true
    }

    fn evaluate(
        &self,
        ctx: &InferContext,
        inputs: &[&TensorValue],
        outputs: &mut [TensorValue],
    ) -> bool {
        let Some(input) = inputs.first() else {
            return false;
        };
        if outputs.len() != 1 {
            return false;
        }
        let Some(axes) = self.broadcast_axes(ctx) else {
            return false;
        };
        let Some(out_shape) = ctx.output_meta(0).and_then(|m| m.shape.to_shape()) else {
            return false;
        };
        let Some(strides) = broadcast_strides(input.shape(), &out_shape, &axes) else {
            return false;
        };
        let data = map_data!(input.data(), buf, broadcast_copy(buf, &out_shape, &strides));
        outputs[0] = TensorValue::new(out_shape, data);
        true
    }
}

/// Resolve the target shape from input 1.
///
/// A `Constant` input yields a static shape. A `Concat` of pieces yields a
/// shape where each constant piece contributes a known dimension and each
/// non-constant piece a dynamic one. Anything else yields a fully dynamic
/// shape.
fn resolve_target_shape(ctx: &InferContext) -> Result<PartialShape, OpError> {
    if let Some(value) = ctx.input_constant(1) {
        let values = value.as_i64_vec().ok_or(OpError::InvalidValue(
            "target shape input must have an integer element type",
        ))?;
        let dims: Result<Vec<Dimension>, OpError> = values
            .iter()
            .map(|&dim| {
                usize::try_from(dim).map(Dimension::Fixed).map_err(|_| {
                    OpError::InvalidValue("target shape must not contain negative dimensions")
                })
            })
            .collect();
        return Ok(PartialShape::Ranked(dims?));
    }

    let edge = ctx.input(1)?;
    let concat_node = ctx
        .graph()
        .get_node(edge.node)
        .filter(|node| edge.index == 0 && node.operator().downcast_ref::<Concat>().is_some());
    if let Some(node) = concat_node {
        let concat_shape = ctx.graph().output_meta(edge).and_then(|m| m.shape.to_shape());
        if let Some(concat_shape) = concat_shape {
            let total: usize = concat_shape.iter().product();
            // Each piece must contribute exactly one element.
            if concat_shape.len() == 1 && node.inputs().len() == total {
                let dims: Result<Vec<Dimension>, OpError> = node
                    .inputs()
                    .iter()
                    .map(|&piece| {
                        let values = ctx
                            .graph()
                            .constant_value(piece)
                            .and_then(|v| v.as_i64_vec());
                        match values.as_deref().and_then(|v| v.first().copied()) {
                            Some(dim) if dim >= 0 => Ok(Dimension::Fixed(dim as usize)),
                            Some(_) => Err(OpError::InvalidValue(
                                "target shape must not contain negative dimensions",
                            )),
                            None => Ok(Dimension::Dynamic),
                        }
                    })
                    .collect();
                return Ok(PartialShape::Ranked(dims?));
            }
        }
    }

    Ok(PartialShape::Dynamic)
}

fn validate_explicit_mapping(
    arg: &[usize],
    target: &[i64],
    mapping: &[i64],
) -> Result<(), OpError> {
    if !mapping.windows(2).all(|pair| pair[0] <= pair[1]) {
        return Err(OpError::InvalidValue(
            "broadcast does not permit transposes, axes mapping must be sorted",
        ));
    }
    for (i, &axis) in mapping.iter().enumerate() {
        let axis = usize::try_from(axis)
            .ok()
            .filter(|&axis| axis < target.len())
            .ok_or(OpError::InvalidValue(
                "axes mapping value is out of bounds of the target shape",
            ))?;
        if target[axis] != arg[i] as i64 {
            return Err(OpError::IncompatibleShapes(
                "target dimension at a mapped axis must equal the input dimension",
            ));
        }
    }
    Ok(())
}

/// Check a static input shape against a constant target shape for the
/// NumPy and PDPD conventions and return the result dimensions.
fn infer_aligned_shape(
    spec: BroadcastSpec,
    arg: &[usize],
    target: &[usize],
) -> Result<Vec<Dimension>, OpError> {
    let start_axis = match spec {
        BroadcastSpec::Pdpd { axis } => axis,
        _ => target.len() as i64 - arg.len() as i64,
    };
    if start_axis < 0 {
        return Err(OpError::IncompatibleShapes(
            "target shape has a smaller rank than the input",
        ));
    }
    let start = start_axis as usize;
    if start + arg.len() > target.len() {
        return Err(OpError::IncompatibleShapes(
            "input does not fit within the target shape at the start axis",
        ));
    }
    let mut dims: Vec<Dimension> = target.iter().copied().map(Dimension::Fixed).collect();
    for (i, &arg_dim) in arg.iter().enumerate() {
        let target_dim = target[start + i];
        if !(arg_dim == 1 || target_dim == 1 || arg_dim == target_dim) {
            return Err(OpError::IncompatibleShapes(
                "input dimension must be 1 or equal to the target dimension",
            ));
        }
        dims[start + i] = Dimension::Fixed(arg_dim).broadcast_max(Dimension::Fixed(target_dim));
    }
    Ok(dims)
}

/// For each output axis, compute the input offset step taken when the
/// output coordinate along that axis advances.
///
/// Broadcast axes step by zero. Non-broadcast axes consume input axes one
/// for one, in order; a broadcast axis additionally consumes a size-1
/// input axis when the input has more axes left than the remaining
/// non-broadcast output axes need.
///
/// Returns `None` if the input shape cannot be aligned with the output
/// shape under `axes`.
fn broadcast_strides(
    in_shape: &[usize],
    out_shape: &[usize],
    axes: &BTreeSet<usize>,
) -> Option<Vec<usize>> {
    let mut in_strides = vec![1usize; in_shape.len()];
    for i in (0..in_shape.len().saturating_sub(1)).rev() {
        in_strides[i] = in_strides[i + 1] * in_shape[i + 1];
    }

    // Number of non-broadcast output axes at or after each position.
    let mut non_bc_after = vec![0usize; out_shape.len() + 1];
    for i in (0..out_shape.len()).rev() {
        let non_bc = if axes.contains(&i) { 0 } else { 1 };
        non_bc_after[i] = non_bc_after[i + 1] + non_bc;
    }

    let mut strides = vec![0usize; out_shape.len()];
    let mut cursor = 0;
    for i in 0..out_shape.len() {
        if !axes.contains(&i) {
            let size = *in_shape.get(cursor)?;
            if size != out_shape[i] {
                return None;
            }
            strides[i] = in_strides[cursor];
            cursor += 1;
        } else if in_shape.len() - cursor > non_bc_after[i + 1]
            && in_shape.get(cursor) == Some(&1)
        {
            cursor += 1;
        }
    }
    (cursor == in_shape.len()).then_some(strides)
}

/// Copy `src` into a buffer of shape `out_shape`, reading each element at
/// the offset accumulated from the per-axis steps in `strides`.
fn broadcast_copy<T: Copy>(src: &[T], out_shape: &[usize], strides: &[usize]) -> Vec<T> {
    let len: usize = out_shape.iter().product();
    let mut out = Vec::with_capacity(len);
    let mut coords = vec![0usize; out_shape.len()];
    let mut offset = 0usize;
    for _ in 0..len {
        out.push(src[offset]);
        for axis in (0..out_shape.len()).rev() {
            coords[axis] += 1;
            offset += strides[axis];
            if coords[axis] < out_shape[axis] {
                break;
            }
            offset -= strides[axis] * coords[axis];
            coords[axis] = 0;
        }
    }
    out
}
