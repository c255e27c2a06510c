//! Reduction operators used to merge partitions that share a key.
//!
//! Operators must be associative and commutative for allreduce-style
//! operations to produce the same result on every rank. The runtime applies
//! them in a deterministic order but does not verify these properties.

use crate::partition::{ArrayData, Element, Partition, PartitionStatus};
use chorus_common::{ChorusError, Result};
use rayon::prelude::*;
use std::fmt::{self, Debug};
use std::sync::Arc;

/// Payloads at least this long are combined on the rayon pool.
const PARALLEL_COMBINE_THRESHOLD: usize = 1 << 15;

/// User supplied merge function.
pub type CombineFn = Arc<dyn Fn(Partition, Partition) -> Result<Partition> + Send + Sync>;

/// Reduction operator bound to a table.
#[derive(Clone)]
pub enum Combiner {
    /// Element-wise sum (wrapping for integer kinds)
    Sum,
    /// Element-wise maximum
    Max,
    /// Element-wise minimum
    Min,
    /// Append the incoming payload to the existing one
    Concat,
    /// Arbitrary merge function
    Custom(CombineFn),
}

impl Debug for Combiner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Combiner::Sum => f.write_str("Sum"),
            Combiner::Max => f.write_str("Max"),
            Combiner::Min => f.write_str("Min"),
            Combiner::Concat => f.write_str("Concat"),
            Combiner::Custom(_) => f.write_str("Custom(<function>)"),
        }
    }
}

impl Combiner {
    pub fn custom<F>(func: F) -> Self
    where
        F: Fn(Partition, Partition) -> Result<Partition> + Send + Sync + 'static,
    {
        Combiner::Custom(Arc::new(func))
    }

    /// Merge `incoming` into `current` and return the result.
    pub fn combine(&self, mut current: Partition, incoming: Partition) -> Result<Partition> {
        self.merge_into(&mut current, incoming)?;
        Ok(current)
    }

    /// Merge `incoming` into `slot` in place.
    ///
    /// On error `slot` is left untouched.
    pub(crate) fn merge_into(&self, slot: &mut Partition, incoming: Partition) -> Result<()> {
        if slot.key() != incoming.key() {
            return Err(ChorusError::combine_error(format!(
                "cannot combine partition {} with partition {}",
                slot.key(),
                incoming.key()
            )));
        }
        if slot.kind() != incoming.kind() {
            return Err(ChorusError::type_mismatch(slot.kind(), incoming.kind()));
        }

        match self {
            Combiner::Sum => apply_elementwise(ElementwiseOp::Sum, slot.data_mut(), incoming.data())?,
            Combiner::Max => apply_elementwise(ElementwiseOp::Max, slot.data_mut(), incoming.data())?,
            Combiner::Min => apply_elementwise(ElementwiseOp::Min, slot.data_mut(), incoming.data())?,
            Combiner::Concat => {
                slot.data_mut().append(incoming.into_data())?;
            }
            Combiner::Custom(func) => {
                let merged = func(slot.clone(), incoming)?;
                if merged.kind() != slot.kind() {
                    return Err(ChorusError::type_mismatch(slot.kind(), merged.kind()));
                }
                if merged.key() != slot.key() {
                    return Err(ChorusError::combine_error(format!(
                        "combine of partition {} produced partition {}",
                        slot.key(),
                        merged.key()
                    )));
                }
                *slot = merged;
            }
        }
        slot.set_status(PartitionStatus::Combined);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
enum ElementwiseOp {
    Sum,
    Max,
    Min,
}

trait Arith: Element {
    fn sum_of(a: Self, b: Self) -> Self;
    fn max_of(a: Self, b: Self) -> Self;
    fn min_of(a: Self, b: Self) -> Self;
}

macro_rules! impl_integer_arith {
    ($($ty:ty),*) => {
        $(impl Arith for $ty {
            fn sum_of(a: Self, b: Self) -> Self {
                a.wrapping_add(b)
            }

            fn max_of(a: Self, b: Self) -> Self {
                std::cmp::max(a, b)
            }

            fn min_of(a: Self, b: Self) -> Self {
                std::cmp::min(a, b)
            }
        })*
    };
}

impl_integer_arith!(i32, i64, u8);

impl Arith for f64 {
    fn sum_of(a: Self, b: Self) -> Self {
        a + b
    }

    fn max_of(a: Self, b: Self) -> Self {
        a.max(b)
    }

    fn min_of(a: Self, b: Self) -> Self {
        a.min(b)
    }
}

impl ElementwiseOp {
    fn func<T: Arith>(self) -> fn(T, T) -> T {
        match self {
            ElementwiseOp::Sum => T::sum_of,
            ElementwiseOp::Max => T::max_of,
            ElementwiseOp::Min => T::min_of,
        }
    }
}

fn zip_apply<T: Arith>(dst: &mut [T], src: &[T], func: fn(T, T) -> T) {
    if dst.len() >= PARALLEL_COMBINE_THRESHOLD {
        dst.par_iter_mut()
            .zip(src.par_iter())
            .for_each(|(a, b)| *a = func(*a, *b));
    } else {
        for (a, b) in dst.iter_mut().zip(src) {
            *a = func(*a, *b);
        }
    }
}

fn apply_elementwise(op: ElementwiseOp, dst: &mut ArrayData, src: &ArrayData) -> Result<()> {
    if dst.kind() != src.kind() {
        return Err(ChorusError::type_mismatch(dst.kind(), src.kind()));
    }
    if dst.len() != src.len() {
        return Err(ChorusError::combine_error(format!(
            "element-wise {:?} needs equal lengths, got {} and {}",
            op,
            dst.len(),
            src.len()
        )));
    }

    match (dst, src) {
        (ArrayData::Int32(d), ArrayData::Int32(s)) => zip_apply(d, s, op.func()),
        (ArrayData::Int64(d), ArrayData::Int64(s)) => zip_apply(d, s, op.func()),
        (ArrayData::Double(d), ArrayData::Double(s)) => zip_apply(d, s, op.func()),
        (ArrayData::Byte(d), ArrayData::Byte(s)) => zip_apply(d, s, op.func()),
        (d, s) => return Err(ChorusError::type_mismatch(d.kind(), s.kind())),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sum_combiner() {
        let merged = Combiner::Sum
            .combine(
                Partition::new(0, vec![1.0f64, 2.0]),
                Partition::new(0, vec![3.0f64, 4.0]),
            )
            .unwrap();
        assert_eq!(merged.values::<f64>().unwrap(), &[4.0, 6.0]);
        assert_eq!(merged.status(), PartitionStatus::Combined);
    }

    #[test]
    fn test_integer_sum_wraps() {
        let merged = Combiner::Sum
            .combine(Partition::new(1, vec![250u8]), Partition::new(1, vec![10u8]))
            .unwrap();
        assert_eq!(merged.values::<u8>().unwrap(), &[4]);
    }

    #[test]
    fn test_max_and_min() {
        let a = Partition::new(2, vec![1i32, 9, -3]);
        let b = Partition::new(2, vec![5i32, 2, -7]);
        let max = Combiner::Max.combine(a.clone(), b.clone()).unwrap();
        let min = Combiner::Min.combine(a, b).unwrap();
        assert_eq!(max.values::<i32>().unwrap(), &[5, 9, -3]);
        assert_eq!(min.values::<i32>().unwrap(), &[1, 2, -7]);
    }

    #[test]
    fn test_concat_grows_payload() {
        let merged = Combiner::Concat
            .combine(Partition::new(4, vec![1i64]), Partition::new(4, vec![2i64, 3]))
            .unwrap();
        assert_eq!(merged.values::<i64>().unwrap(), &[1, 2, 3]);
    }

    #[test]
    fn test_kind_mismatch_is_rejected() {
        let err = Combiner::Sum
            .combine(Partition::new(0, vec![1.0f64]), Partition::new(0, vec![1i32]))
            .unwrap_err();
        assert!(matches!(err, ChorusError::TypeMismatch { .. }));
    }

    #[test]
    fn test_length_mismatch_leaves_slot_untouched() {
        let mut slot = Partition::new(0, vec![1.0f64, 2.0]);
        let err = Combiner::Sum
            .merge_into(&mut slot, Partition::new(0, vec![1.0f64]))
            .unwrap_err();
        assert!(matches!(err, ChorusError::Combine { .. }));
        assert_eq!(slot.values::<f64>().unwrap(), &[1.0, 2.0]);
        assert_eq!(slot.status(), PartitionStatus::Normal);
    }

    #[test]
    fn test_large_payload_uses_parallel_path() {
        let len = PARALLEL_COMBINE_THRESHOLD * 2;
        let merged = Combiner::Sum
            .combine(
                Partition::new(0, vec![1i64; len]),
                Partition::new(0, vec![2i64; len]),
            )
            .unwrap();
        assert!(merged.values::<i64>().unwrap().iter().all(|v| *v == 3));
    }

    #[test]
    fn test_custom_combiner_must_keep_kind() {
        let keep_first = Combiner::custom(|a, _b| Ok(a));
        let merged = keep_first
            .combine(Partition::new(0, vec![1i32]), Partition::new(0, vec![2i32]))
            .unwrap();
        assert_eq!(merged.values::<i32>().unwrap(), &[1]);

        let bad = Combiner::custom(|a, _b| Ok(Partition::new(a.key(), vec![0.0f64])));
        let err = bad
            .combine(Partition::new(0, vec![1i32]), Partition::new(0, vec![2i32]))
            .unwrap_err();
        assert!(matches!(err, ChorusError::TypeMismatch { .. }));
    }
}
