//! Image patch extraction.

use smallvec::smallvec;

use crate::dim::{Dimension, PartialShape};
use crate::operator::{InferContext, OpError, Operator, OutputList, ValueMeta};

/// Padding convention for [`ExtractImagePatches`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PadMode {
    /// No padding; only complete patches are produced.
    Valid,
    /// Pad so that the output covers every stride position, with surplus
    /// padding at the end.
    SameUpper,
    /// As `SameUpper`, with surplus padding at the start.
    SameLower,
}

/// Extract sliding `sizes` patches from an NCHW tensor.
///
/// Patches are sampled every `strides` pixels; `rates` dilates the patch
/// grid. The output is `[N, C * sizes.0 * sizes.1, out_h, out_w]`.
#[derive(Debug)]
pub struct ExtractImagePatches {
    sizes: [usize; 2],
    strides: [usize; 2],
    rates: [usize; 2],
    padding: PadMode,
}

impl ExtractImagePatches {
    pub fn new(
        sizes: [usize; 2],
        strides: [usize; 2],
        rates: [usize; 2],
        padding: PadMode,
    ) -> ExtractImagePatches {
        ExtractImagePatches {
            sizes,
            strides,
            rates,
            padding,
        }
    }

    /// Output size along one spatial axis for an input of size `input`.
    fn spatial_output(&self, input: usize, axis: usize) -> Result<usize, OpError> {
        let size = self.sizes[axis];
        let stride = self.strides[axis];
        let rate = self.rates[axis];
        match self.padding {
            PadMode::Valid => {
                let window = (size - 1) * rate + 1;
                let span = input.checked_sub(window).ok_or(OpError::IncompatibleShapes(
                    "patch window does not fit within the input",
                ))?;
                Ok(span / stride + 1)
            }
            PadMode::SameUpper | PadMode::SameLower => Ok(input.div_ceil(stride)),
        }
    }
}

impl Operator for ExtractImagePatches {
    fn name(&self) -> &str {
        "ExtractImagePatches"
    }

    fn validate_and_infer_types(&self, ctx: &InferContext) -> Result<OutputList, OpError> {
        if ctx.input_count() != 1 {
            return Err(OpError::IncorrectInputCount);
        }
        if self
            .sizes
            .iter()
            .chain(&self.strides)
            .chain(&self.rates)
            .any(|&attr| attr == 0)
        {
            return Err(OpError::InvalidValue(
                "sizes, strides and rates must be positive",
            ));
        }

        let dtype = ctx.input_dtype(0)?;
        let shape = ctx.input_shape(0)?;
        let Some(dims) = shape.dims() else {
            return Ok(smallvec![ValueMeta {
                dtype,
                shape: PartialShape::dynamic_rank(4),
            }]);
        };
        if dims.len() != 4 {
            return Err(OpError::IncompatibleShapes("input must be a 4D NCHW tensor"));
        }

        let depth = match dims[1].fixed() {
            Some(channels) => Dimension::Fixed(channels * self.sizes[0] * self.sizes[1]),
            None => Dimension::Dynamic,
        };
        let mut out_dims = vec![dims[0], depth, Dimension::Dynamic, Dimension::Dynamic];
        for axis in 0..2 {
            if let Some(input) = dims[2 + axis].fixed() {
                out_dims[2 + axis] = Dimension::Fixed(self.spatial_output(input, axis)?);
            }
        }
        Ok(smallvec![ValueMeta {
            dtype,
            shape: PartialShape::Ranked(out_dims),
        }])
    }
}

#[cfg(test)]
mod tests {
    use crate::dim::{Dimension, PartialShape};
    use crate::graph::Graph;
    use crate::operator::OpError;
    use crate::ops::{ExtractImagePatches, PadMode, Parameter};
    use crate::value::ElementType;

    fn infer(
        input_shape: PartialShape,
        sizes: [usize; 2],
        strides: [usize; 2],
        rates: [usize; 2],
        padding: PadMode,
    ) -> Result<PartialShape, OpError> {
        let mut graph = Graph::new();
        let input = graph
            .add_node(None, Parameter::new(ElementType::Int32, input_shape), &[])
            .unwrap();
        graph
            .add_node(
                None,
                ExtractImagePatches::new(sizes, strides, rates, padding),
                &[input.into()],
            )
            .map(|id| graph.output_meta(id.into()).unwrap().shape.clone())
            .map_err(|e| e.error().clone())
    }

    #[test]
    fn test_inference() {
        #[derive(Debug)]
        struct Case {
            input: Vec<usize>,
            sizes: [usize; 2],
            strides: [usize; 2],
            rates: [usize; 2],
            padding: PadMode,
            expected: Result<Vec<usize>, OpError>,
        }

        let cases = [
            Case {
                input: vec![64, 3, 10, 10],
                sizes: [3, 3],
                strides: [5, 5],
                rates: [1, 1],
                padding: PadMode::Valid,
                expected: Ok(vec![64, 27, 2, 2]),
            },
            Case {
                input: vec![64, 3, 10, 10],
                sizes: [3, 3],
                strides: [5, 5],
                rates: [2, 2],
                padding: PadMode::Valid,
                expected: Ok(vec![64, 27, 2, 2]),
            },
            Case {
                input: vec![64, 3, 9, 9],
                sizes: [3, 3],
                strides: [5, 5],
                rates: [2, 2],
                padding: PadMode::Valid,
                expected: Ok(vec![64, 27, 1, 1]),
            },
            Case {
                input: vec![64, 3, 10, 10],
                sizes: [4, 4],
                strides: [3, 3],
                rates: [1, 1],
                padding: PadMode::SameUpper,
                expected: Ok(vec![64, 48, 4, 4]),
            },
            // Patch window larger than the unpadded input.
            Case {
                input: vec![1, 1, 4, 4],
                sizes: [3, 3],
                strides: [1, 1],
                rates: [2, 2],
                padding: PadMode::Valid,
                expected: Err(OpError::IncompatibleShapes(
                    "patch window does not fit within the input",
                )),
            },
            Case {
                input: vec![64, 3, 10],
                sizes: [3, 3],
                strides: [5, 5],
                rates: [1, 1],
                padding: PadMode::Valid,
                expected: Err(OpError::IncompatibleShapes("input must be a 4D NCHW tensor")),
            },
            Case {
                input: vec![64, 3, 10, 10],
                sizes: [3, 3],
                strides: [0, 5],
                rates: [1, 1],
                padding: PadMode::Valid,
                expected: Err(OpError::InvalidValue(
                    "sizes, strides and rates must be positive",
                )),
            },
        ];

        for Case {
            input,
            sizes,
            strides,
            rates,
            padding,
            expected,
        } in cases
        {
            let result = infer(PartialShape::fixed(&input), sizes, strides, rates, padding)
                .map(|shape| shape.to_shape().unwrap());
            assert_eq!(result, expected);
        }
    }

    #[test]
    fn test_dynamic_dims_propagate() {
        let shape = PartialShape::Ranked(vec![
            Dimension::Dynamic,
            Dimension::Fixed(3),
            Dimension::Dynamic,
            Dimension::Fixed(10),
        ]);
        let result = infer(shape, [3, 3], [5, 5], [1, 1], PadMode::Valid).unwrap();
        assert_eq!(
            result,
            PartialShape::Ranked(vec![
                Dimension::Dynamic,
                Dimension::Fixed(27),
                Dimension::Dynamic,
                Dimension::Fixed(2),
            ])
        );

        let result = infer(PartialShape::Dynamic, [3, 3], [5, 5], [1, 1], PadMode::Valid);
        assert_eq!(result, Ok(PartialShape::dynamic_rank(4)));
    }
}
