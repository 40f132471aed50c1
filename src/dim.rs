//! Partially-known dimension, rank and shape types.
//!
//! Shape inference works over shapes where individual dimensions, or the
//! rank itself, may be unknown until runtime. [`PartialShape`] is the
//! lattice these computations run on: `Dynamic` (rank unknown) at the
//! bottom, fully static shapes at the top.

use std::fmt;

/// Size of a single tensor axis, which may be unknown.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub enum Dimension {
    /// Axis has a known size.
    Fixed(usize),
    /// Axis size is unknown until runtime.
    Dynamic,
}

impl Dimension {
    pub fn is_static(self) -> bool {
        matches!(self, Dimension::Fixed(_))
    }

    /// Return the size if known.
    pub fn fixed(self) -> Option<usize> {
        match self {
            Dimension::Fixed(size) => Some(size),
            Dimension::Dynamic => None,
        }
    }

    /// Return true if `self` and `other` could be the same size.
    pub fn compatible(self, other: Dimension) -> bool {
        match (self, other) {
            (Dimension::Fixed(a), Dimension::Fixed(b)) => a == b,
            _ => true,
        }
    }

    /// Combine two compatible dimensions into the more specific one.
    ///
    /// Returns `None` if the dimensions are incompatible.
    pub fn merge(self, other: Dimension) -> Option<Dimension> {
        match (self, other) {
            (Dimension::Fixed(a), Dimension::Fixed(b)) => (a == b).then_some(self),
            (Dimension::Fixed(_), Dimension::Dynamic) => Some(self),
            (Dimension::Dynamic, _) => Some(other),
        }
    }

    /// Result size when broadcasting an axis of size `self` against one of
    /// size `other`. Unknown if either side is unknown.
    pub fn broadcast_max(self, other: Dimension) -> Dimension {
        match (self, other) {
            (Dimension::Fixed(a), Dimension::Fixed(b)) => Dimension::Fixed(a.max(b)),
            _ => Dimension::Dynamic,
        }
    }
}

impl From<usize> for Dimension {
    fn from(size: usize) -> Dimension {
        Dimension::Fixed(size)
    }
}

impl fmt::Debug for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dimension::Fixed(size) => write!(f, "{}", size),
            Dimension::Dynamic => write!(f, "?"),
        }
    }
}

/// Number of axes of a tensor, which may be unknown.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Rank {
    Fixed(usize),
    Dynamic,
}

impl Rank {
    pub fn fixed(self) -> Option<usize> {
        match self {
            Rank::Fixed(n) => Some(n),
            Rank::Dynamic => None,
        }
    }

    /// Return true if the rank could be `n`.
    pub fn compatible(self, n: usize) -> bool {
        match self {
            Rank::Fixed(rank) => rank == n,
            Rank::Dynamic => true,
        }
    }
}

/// Shape of a tensor where the rank and individual dimensions may be
/// unknown.
#[derive(Clone, PartialEq, Eq, Hash)]
pub enum PartialShape {
    /// Rank is unknown, and hence every dimension too.
    Dynamic,
    /// Rank is known; each dimension may still be unknown.
    Ranked(Vec<Dimension>),
}

impl PartialShape {
    /// Construct a fully static shape.
    pub fn fixed(shape: &[usize]) -> PartialShape {
        PartialShape::Ranked(shape.iter().copied().map(Dimension::Fixed).collect())
    }

    /// Construct a shape with known rank but all dimensions unknown.
    pub fn dynamic_rank(rank: usize) -> PartialShape {
        PartialShape::Ranked(vec![Dimension::Dynamic; rank])
    }

    pub fn rank(&self) -> Rank {
        match self {
            PartialShape::Dynamic => Rank::Dynamic,
            PartialShape::Ranked(dims) => Rank::Fixed(dims.len()),
        }
    }

    /// Return true if the rank and every dimension are known.
    pub fn is_static(&self) -> bool {
        match self {
            PartialShape::Dynamic => false,
            PartialShape::Ranked(dims) => dims.iter().all(|d| d.is_static()),
        }
    }

    /// Return the dimensions if the rank is known.
    pub fn dims(&self) -> Option<&[Dimension]> {
        match self {
            PartialShape::Dynamic => None,
            PartialShape::Ranked(dims) => Some(dims),
        }
    }

    /// Return dimension `index`, or `None` if the rank is unknown or the
    /// index is out of range.
    pub fn dim(&self, index: usize) -> Option<Dimension> {
        self.dims()?.get(index).copied()
    }

    /// Convert to a concrete shape. Fails unless the shape is fully static.
    pub fn to_shape(&self) -> Option<Vec<usize>> {
        self.dims()?.iter().map(|d| d.fixed()).collect()
    }

    /// Return true if `self` and `other` could describe the same shape.
    pub fn compatible(&self, other: &PartialShape) -> bool {
        match (self.dims(), other.dims()) {
            (Some(a), Some(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.compatible(*y))
            }
            _ => true,
        }
    }

    /// Combine two compatible shapes dimension-wise into the more specific
    /// one. Returns `None` if the shapes are incompatible.
    pub fn merge(&self, other: &PartialShape) -> Option<PartialShape> {
        match (self.dims(), other.dims()) {
            (Some(a), Some(b)) => {
                if a.len() != b.len() {
                    return None;
                }
                let dims: Option<Vec<_>> =
                    a.iter().zip(b).map(|(x, y)| x.merge(*y)).collect();
                dims.map(PartialShape::Ranked)
            }
            (Some(_), None) => Some(self.clone()),
            (None, _) => Some(other.clone()),
        }
    }
}

impl From<Vec<Dimension>> for PartialShape {
    fn from(dims: Vec<Dimension>) -> PartialShape {
        PartialShape::Ranked(dims)
    }
}

impl fmt::Debug for PartialShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartialShape::Dynamic => write!(f, "?"),
            PartialShape::Ranked(dims) => {
                write!(f, "(")?;
                for (i, dim) in dims.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{:?}", dim)?;
                }
                write!(f, ")")
            }
        }
    }
}
