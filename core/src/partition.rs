//! Typed, keyed chunks of array data.
//!
//! A [`Partition`] is the unit every collective operation moves between
//! ranks. Its element kind is fixed at construction; the payload length only
//! changes when a [`Table`](crate::table::Table) combines two partitions.

use bincode::{Decode, Encode};
use chorus_common::{ChorusError, Result};
use std::fmt;

/// Element kind of a partition payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementKind {
    Int32,
    Int64,
    Double,
    Byte,
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ElementKind::Int32 => "int32",
            ElementKind::Int64 => "int64",
            ElementKind::Double => "double",
            ElementKind::Byte => "byte",
        };
        f.write_str(name)
    }
}

/// Contiguous, resizable payload of a single element kind.
#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub enum ArrayData {
    Int32(Vec<i32>),
    Int64(Vec<i64>),
    Double(Vec<f64>),
    Byte(Vec<u8>),
}

impl ArrayData {
    pub fn kind(&self) -> ElementKind {
        match self {
            ArrayData::Int32(_) => ElementKind::Int32,
            ArrayData::Int64(_) => ElementKind::Int64,
            ArrayData::Double(_) => ElementKind::Double,
            ArrayData::Byte(_) => ElementKind::Byte,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ArrayData::Int32(v) => v.len(),
            ArrayData::Int64(v) => v.len(),
            ArrayData::Double(v) => v.len(),
            ArrayData::Byte(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Payload size in bytes.
    pub fn size_in_bytes(&self) -> usize {
        match self {
            ArrayData::Int32(v) => v.len() * size_of::<i32>(),
            ArrayData::Int64(v) => v.len() * size_of::<i64>(),
            ArrayData::Double(v) => v.len() * size_of::<f64>(),
            ArrayData::Byte(v) => v.len(),
        }
    }

    /// Append `other` to this payload. Both must share the element kind.
    pub fn append(&mut self, other: ArrayData) -> Result<()> {
        match (self, other) {
            (ArrayData::Int32(a), ArrayData::Int32(b)) => a.extend(b),
            (ArrayData::Int64(a), ArrayData::Int64(b)) => a.extend(b),
            (ArrayData::Double(a), ArrayData::Double(b)) => a.extend(b),
            (ArrayData::Byte(a), ArrayData::Byte(b)) => a.extend(b),
            (a, b) => return Err(ChorusError::type_mismatch(a.kind(), b.kind())),
        }
        Ok(())
    }

    /// Free the backing storage while keeping the element kind.
    pub fn release(&mut self) {
        match self {
            ArrayData::Int32(v) => *v = Vec::new(),
            ArrayData::Int64(v) => *v = Vec::new(),
            ArrayData::Double(v) => *v = Vec::new(),
            ArrayData::Byte(v) => *v = Vec::new(),
        }
    }
}

/// Scalar types that can back an [`ArrayData`].
pub trait Element: Copy + Send + Sync + 'static {
    const KIND: ElementKind;

    fn slice(data: &ArrayData) -> Option<&[Self]>;

    fn slice_mut(data: &mut ArrayData) -> Option<&mut [Self]>;
}

macro_rules! impl_element {
    ($ty:ty, $variant:ident) => {
        impl Element for $ty {
            const KIND: ElementKind = ElementKind::$variant;

            fn slice(data: &ArrayData) -> Option<&[Self]> {
                match data {
                    ArrayData::$variant(v) => Some(v.as_slice()),
                    _ => None,
                }
            }

            fn slice_mut(data: &mut ArrayData) -> Option<&mut [Self]> {
                match data {
                    ArrayData::$variant(v) => Some(v.as_mut_slice()),
                    _ => None,
                }
            }
        }

        impl From<Vec<$ty>> for ArrayData {
            fn from(values: Vec<$ty>) -> Self {
                ArrayData::$variant(values)
            }
        }
    };
}

impl_element!(i32, Int32);
impl_element!(i64, Int64);
impl_element!(f64, Double);
impl_element!(u8, Byte);

/// Lifecycle marker of a partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode)]
pub enum PartitionStatus {
    /// Inserted as-is
    #[default]
    Normal,
    /// Holds the result of combining two partitions with the same key
    Combined,
    /// Removed from its table; the payload has been released
    Deleted,
}

/// A keyed chunk of typed array data owned by exactly one table.
#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct Partition {
    key: i32,
    data: ArrayData,
    status: PartitionStatus,
}

impl Partition {
    pub fn new(key: i32, data: impl Into<ArrayData>) -> Self {
        Self {
            key,
            data: data.into(),
            status: PartitionStatus::Normal,
        }
    }

    pub fn key(&self) -> i32 {
        self.key
    }

    pub fn kind(&self) -> ElementKind {
        self.data.kind()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data(&self) -> &ArrayData {
        &self.data
    }

    pub fn status(&self) -> PartitionStatus {
        self.status
    }

    /// Typed view of the payload.
    pub fn values<T: Element>(&self) -> Result<&[T]> {
        T::slice(&self.data).ok_or_else(|| ChorusError::type_mismatch(T::KIND, self.kind()))
    }

    /// Typed, length-preserving mutable view of the payload.
    pub fn values_mut<T: Element>(&mut self) -> Result<&mut [T]> {
        let found = self.kind();
        T::slice_mut(&mut self.data).ok_or_else(|| ChorusError::type_mismatch(T::KIND, found))
    }

    /// Free the payload and mark the partition deleted.
    pub fn release(&mut self) {
        self.data.release();
        self.status = PartitionStatus::Deleted;
    }

    pub(crate) fn into_data(self) -> ArrayData {
        self.data
    }

    pub(crate) fn data_mut(&mut self) -> &mut ArrayData {
        &mut self.data
    }

    pub(crate) fn set_status(&mut self, status: PartitionStatus) {
        self.status = status;
    }
}
