use num_traits::{Float, NumAssignOps};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::{Debug, Display};

/// A trait representing the element types a graph can compute with.
///
/// Restricted to floating point types (`f32`, `f64`): gradients are only
/// meaningful over a field, and the kernels rely on `Float` for `min`,
/// `zero()` and `one()`. Elements are serde-serializable so leaf values can
/// be persisted by models.
pub trait DType:
    Float
    + NumAssignOps
    + Debug
    + Display
    + Default
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
    /// Key used to memoize scalar constants by exact value.
    ///
    /// Positive and negative zero compare equal and share a key. `NaN` never
    /// equals itself, so it has no key and is never memoized.
    fn constant_key(self) -> Option<u64>;
}

impl DType for f32 {
    fn constant_key(self) -> Option<u64> {
        if self.is_nan() {
            None
        } else if self == 0.0 {
            Some(0)
        } else {
            Some(u64::from(self.to_bits()))
        }
    }
}

impl DType for f64 {
    fn constant_key(self) -> Option<u64> {
        if self.is_nan() {
            None
        } else if self == 0.0 {
            Some(0)
        } else {
            Some(self.to_bits())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key_of<T: DType>(value: T) -> Option<u64> {
        value.constant_key()
    }

    #[test]
    fn test_signed_zeros_share_a_key() {
        assert_eq!(key_of(0.0f32), key_of(-0.0f32));
        assert_eq!(key_of(0.0f64), key_of(-0.0f64));
    }

    #[test]
    fn test_nan_has_no_key() {
        assert_eq!(key_of(f32::NAN), None);
        assert_eq!(key_of(f64::NAN), None);
    }

    #[test]
    fn test_distinct_values_have_distinct_keys() {
        assert_ne!(key_of(1.0f64), key_of(2.0f64));
        assert_ne!(key_of(1.0f32), key_of(0.0f32));
    }
}
