//! Element types and concrete tensor values.

use std::fmt;

/// Element type of a tensor.
///
/// This is a closed set: reference evaluation dispatches over these
/// variants and must handle (or explicitly reject) every one.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ElementType {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    BFloat16,
    Float16,
    Float32,
    Float64,
}

impl ElementType {
    /// Return true if this is a signed or unsigned integer type.
    ///
    /// `Bool` is not an integer type. Inputs holding shapes or axes must
    /// satisfy this test.
    pub fn is_integer(self) -> bool {
        use ElementType::*;
        matches!(
            self,
            Int8 | Int16 | Int32 | Int64 | UInt8 | UInt16 | UInt32 | UInt64
        )
    }

    pub fn is_float(self) -> bool {
        use ElementType::*;
        matches!(self, BFloat16 | Float16 | Float32 | Float64)
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ElementType::Bool => "boolean",
            ElementType::Int8 => "i8",
            ElementType::Int16 => "i16",
            ElementType::Int32 => "i32",
            ElementType::Int64 => "i64",
            ElementType::UInt8 => "u8",
            ElementType::UInt16 => "u16",
            ElementType::UInt32 => "u32",
            ElementType::UInt64 => "u64",
            ElementType::BFloat16 => "bf16",
            ElementType::Float16 => "f16",
            ElementType::Float32 => "f32",
            ElementType::Float64 => "f64",
        };
        write!(f, "{}", name)
    }
}

/// Typed element buffer of a [`TensorValue`], one variant per
/// [`ElementType`].
///
/// `BFloat16` and `Float16` elements are stored as raw bit patterns.
/// Reference kernels only move elements between buffers, so no arithmetic
/// representation is needed for them.
#[derive(Clone, Debug, PartialEq)]
pub enum Data {
    Bool(Vec<bool>),
    Int8(Vec<i8>),
    Int16(Vec<i16>),
    Int32(Vec<i32>),
    Int64(Vec<i64>),
    UInt8(Vec<u8>),
    UInt16(Vec<u16>),
    UInt32(Vec<u32>),
    UInt64(Vec<u64>),
    BFloat16(Vec<u16>),
    Float16(Vec<u16>),
    Float32(Vec<f32>),
    Float64(Vec<f64>),
}

impl Data {
    pub fn element_type(&self) -> ElementType {
        match self {
            Data::Bool(_) => ElementType::Bool,
            Data::Int8(_) => ElementType::Int8,
            Data::Int16(_) => ElementType::Int16,
            Data::Int32(_) => ElementType::Int32,
            Data::Int64(_) => ElementType::Int64,
            Data::UInt8(_) => ElementType::UInt8,
            Data::UInt16(_) => ElementType::UInt16,
            Data::UInt32(_) => ElementType::UInt32,
            Data::UInt64(_) => ElementType::UInt64,
            Data::BFloat16(_) => ElementType::BFloat16,
            Data::Float16(_) => ElementType::Float16,
            Data::Float32(_) => ElementType::Float32,
            Data::Float64(_) => ElementType::Float64,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Data::Bool(buf) => buf.len(),
            Data::Int8(buf) => buf.len(),
            Data::Int16(buf) => buf.len(),
            Data::Int32(buf) => buf.len(),
            Data::Int64(buf) => buf.len(),
            Data::UInt8(buf) => buf.len(),
            Data::UInt16(buf) => buf.len(),
            Data::UInt32(buf) => buf.len(),
            Data::UInt64(buf) => buf.len(),
            Data::BFloat16(buf) => buf.len(),
            Data::Float16(buf) => buf.len(),
            Data::Float32(buf) => buf.len(),
            Data::Float64(buf) => buf.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

macro_rules! impl_data_from_vec {
    ($type:ty, $variant:ident) => {
        impl From<Vec<$type>> for Data {
            fn from(vec: Vec<$type>) -> Data {
                Data::$variant(vec)
            }
        }
    };
}

impl_data_from_vec!(bool, Bool);
impl_data_from_vec!(i8, Int8);
impl_data_from_vec!(i16, Int16);
impl_data_from_vec!(i32, Int32);
impl_data_from_vec!(i64, Int64);
impl_data_from_vec!(u8, UInt8);
impl_data_from_vec!(u16, UInt16);
impl_data_from_vec!(u32, UInt32);
impl_data_from_vec!(u64, UInt64);
impl_data_from_vec!(f32, Float32);
impl_data_from_vec!(f64, Float64);

/// Apply an expression to the typed buffer inside a [`Data`], re-wrapping
/// the result in the same variant.
///
/// This is the closed-table dispatch used by reference kernels: every
/// element type is listed, so adding a variant is a compile error until
/// each kernel handles it.
macro_rules! map_data {
    ($data:expr, $buf:ident, $expr:expr) => {
        match $data {
            Data::Bool($buf) => Data::Bool($expr),
            Data::Int8($buf) => Data::Int8($expr),
            Data::Int16($buf) => Data::Int16($expr),
            Data::Int32($buf) => Data::Int32($expr),
            Data::Int64($buf) => Data::Int64($expr),
            Data::UInt8($buf) => Data::UInt8($expr),
            Data::UInt16($buf) => Data::UInt16($expr),
            Data::UInt32($buf) => Data::UInt32($expr),
            Data::UInt64($buf) => Data::UInt64($expr),
            Data::BFloat16($buf) => Data::BFloat16($expr),
            Data::Float16($buf) => Data::Float16($expr),
            Data::Float32($buf) => Data::Float32($expr),
            Data::Float64($buf) => Data::Float64($expr),
        }
    };
}

pub(crate) use map_data;

/// A concrete tensor: a static shape plus a typed element buffer.
#[derive(Clone, Debug, PartialEq)]
pub struct TensorValue {
    shape: Vec<usize>,
    data: Data,
}

impl TensorValue {
    /// Construct a tensor from a shape and matching buffer.
    ///
    /// Panics if the buffer length does not equal the product of the shape.
    pub fn new(shape: Vec<usize>, data: Data) -> TensorValue {
        assert_eq!(
            shape.iter().product::<usize>(),
            data.len(),
            "buffer length does not match shape"
        );
        TensorValue { shape, data }
    }

    /// Construct a rank-1 tensor from a vector.
    pub fn from_vec<T>(vec: Vec<T>) -> TensorValue
    where
        Data: From<Vec<T>>,
    {
        let shape = vec![vec.len()];
        TensorValue::new(shape, vec.into())
    }

    /// Construct a rank-0 tensor holding a single element.
    pub fn from_scalar<T>(value: T) -> TensorValue
    where
        Data: From<Vec<T>>,
    {
        TensorValue::new(Vec::new(), vec![value].into())
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn element_type(&self) -> ElementType {
        self.data.element_type()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data(&self) -> &Data {
        &self.data
    }

    /// Read the elements as `i64` values, if this is an integer tensor.
    ///
    /// Used for inputs holding shapes or axes.
    pub fn as_i64_vec(&self) -> Option<Vec<i64>> {
        let values = match &self.data {
            Data::Int8(buf) => buf.iter().map(|&x| x as i64).collect(),
            Data::Int16(buf) => buf.iter().map(|&x| x as i64).collect(),
            Data::Int32(buf) => buf.iter().map(|&x| x as i64).collect(),
            Data::Int64(buf) => buf.clone(),
            Data::UInt8(buf) => buf.iter().map(|&x| x as i64).collect(),
            Data::UInt16(buf) => buf.iter().map(|&x| x as i64).collect(),
            Data::UInt32(buf) => buf.iter().map(|&x| x as i64).collect(),
            Data::UInt64(buf) => buf.iter().map(|&x| x as i64).collect(),
            _ => return None,
        };
        Some(values)
    }
}

#[cfg(test)]
mod tests {
    use super::{Data, ElementType, TensorValue};

    #[test]
    fn test_element_type_classification() {
        #[derive(Debug)]
        struct Case {
            dtype: ElementType,
            is_integer: bool,
            is_float: bool,
        }

        let cases = [
            Case {
                dtype: ElementType::Bool,
                is_integer: false,
                is_float: false,
            },
            Case {
                dtype: ElementType::Int64,
                is_integer: true,
                is_float: false,
            },
            Case {
                dtype: ElementType::UInt8,
                is_integer: true,
                is_float: false,
            },
            Case {
                dtype: ElementType::BFloat16,
                is_integer: false,
                is_float: true,
            },
            Case {
                dtype: ElementType::Float32,
                is_integer: false,
                is_float: true,
            },
        ];

        for Case {
            dtype,
            is_integer,
            is_float,
        } in cases
        {
            assert_eq!(dtype.is_integer(), is_integer);
            assert_eq!(dtype.is_float(), is_float);
        }
    }

    #[test]
    fn test_tensor_value_construction() {
        let tensor = TensorValue::new(vec![2, 3], Data::Float32(vec![0.; 6]));
        assert_eq!(tensor.shape(), &[2, 3]);
        assert_eq!(tensor.element_type(), ElementType::Float32);
        assert_eq!(tensor.len(), 6);

        let vec = TensorValue::from_vec(vec![5i64, 3, 1]);
        assert_eq!(vec.shape(), &[3]);
        assert_eq!(vec.element_type(), ElementType::Int64);

        let scalar = TensorValue::from_scalar(2u32);
        assert_eq!(scalar.shape(), &[] as &[usize]);
        assert_eq!(scalar.len(), 1);
    }

    #[test]
    fn test_as_i64_vec() {
        assert_eq!(
            TensorValue::from_vec(vec![1u8, 2, 3]).as_i64_vec(),
            Some(vec![1, 2, 3])
        );
        assert_eq!(
            TensorValue::from_vec(vec![-1i32, 4]).as_i64_vec(),
            Some(vec![-1, 4])
        );
        assert_eq!(TensorValue::from_vec(vec![1.0f32]).as_i64_vec(), None);
        assert_eq!(TensorValue::from_vec(vec![true]).as_i64_vec(), None);
    }
}
