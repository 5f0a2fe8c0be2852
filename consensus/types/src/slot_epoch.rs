//! The `Slot` and `Epoch` types are defined as new types over u64 to enforce type-safety between
//! the two types.
//!
//! All math operations on `Slot` and `Epoch` are saturating, they never wrap.
//!
//! It would be easy to define `PartialOrd` and other traits generically across all types which
//! implement `Into<u64>`, however this would allow operations between `Slots` and `Epochs` which
//! may lead to programming errors which are not detected by the compiler.

use safe_arith::SafeArith;
use serde_derive::{Deserialize, Serialize};
use ssz::{Decode, DecodeError, Encode};
use std::fmt;
use std::ops::{Add, AddAssign, Rem, Sub, SubAssign};
use tree_hash::{Hash256, PackedEncoding, TreeHash, TreeHashType};

#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Slot(u64);

#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Epoch(u64);

macro_rules! impl_common {
    ($type: ident) => {
        impl $type {
            pub fn as_u64(self) -> u64 {
                self.0
            }

            pub fn as_usize(self) -> usize {
                self.0 as usize
            }
        }

        impl From<u64> for $type {
            fn from(value: u64) -> Self {
                $type(value)
            }
        }

        impl From<$type> for u64 {
            fn from(value: $type) -> u64 {
                value.0
            }
        }

        impl PartialEq<u64> for $type {
            fn eq(&self, other: &u64) -> bool {
                self.0 == *other
            }
        }

        impl Add<u64> for $type {
            type Output = $type;

            fn add(self, rhs: u64) -> $type {
                $type(self.0.saturating_add(rhs))
            }
        }

        impl AddAssign<u64> for $type {
            fn add_assign(&mut self, rhs: u64) {
                self.0 = self.0.saturating_add(rhs);
            }
        }

        impl Sub<u64> for $type {
            type Output = $type;

            fn sub(self, rhs: u64) -> $type {
                $type(self.0.saturating_sub(rhs))
            }
        }

        impl SubAssign<u64> for $type {
            fn sub_assign(&mut self, rhs: u64) {
                self.0 = self.0.saturating_sub(rhs);
            }
        }

        /// Distance between two values of the same kind, saturating at zero.
        impl Sub<$type> for $type {
            type Output = u64;

            fn sub(self, rhs: $type) -> u64 {
                self.0.saturating_sub(rhs.0)
            }
        }

        impl Rem<u64> for $type {
            type Output = u64;

            fn rem(self, rhs: u64) -> u64 {
                self.0 % rhs
            }
        }

        impl fmt::Display for $type {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl fmt::Debug for $type {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                write!(f, "{}({})", stringify!($type), self.0)
            }
        }

        impl Encode for $type {
            fn is_ssz_fixed_len() -> bool {
                <u64 as Encode>::is_ssz_fixed_len()
            }

            fn ssz_fixed_len() -> usize {
                <u64 as Encode>::ssz_fixed_len()
            }

            fn ssz_bytes_len(&self) -> usize {
                self.0.ssz_bytes_len()
            }

            fn ssz_append(&self, buf: &mut Vec<u8>) {
                self.0.ssz_append(buf)
            }
        }

        impl Decode for $type {
            fn is_ssz_fixed_len() -> bool {
                <u64 as Decode>::is_ssz_fixed_len()
            }

            fn ssz_fixed_len() -> usize {
                <u64 as Decode>::ssz_fixed_len()
            }

            fn from_ssz_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
                u64::from_ssz_bytes(bytes).map($type)
            }
        }

        impl TreeHash for $type {
            fn tree_hash_type() -> TreeHashType {
                <u64 as TreeHash>::tree_hash_type()
            }

            fn tree_hash_packed_encoding(&self) -> PackedEncoding {
                self.0.tree_hash_packed_encoding()
            }

            fn tree_hash_packing_factor() -> usize {
                <u64 as TreeHash>::tree_hash_packing_factor()
            }

            fn tree_hash_root(&self) -> Hash256 {
                self.0.tree_hash_root()
            }
        }
    };
}

impl_common!(Slot);
impl_common!(Epoch);

impl Slot {
    pub const fn new(slot: u64) -> Slot {
        Slot(slot)
    }

    /// The epoch this slot belongs to.
    pub fn epoch(self, slots_per_epoch: u64) -> Epoch {
        Epoch(
            self.0
                .safe_div(slots_per_epoch)
                .expect("slots_per_epoch is not 0"),
        )
    }

    /// `true` if this slot is the first slot of its epoch.
    pub fn is_epoch_boundary(self, slots_per_epoch: u64) -> bool {
        self % slots_per_epoch == 0
    }

    pub fn max_value() -> Slot {
        Slot(u64::MAX)
    }
}

impl Epoch {
    pub const fn new(epoch: u64) -> Epoch {
        Epoch(epoch)
    }

    /// The first slot in the epoch.
    pub fn start_slot(self, slots_per_epoch: u64) -> Slot {
        Slot(self.0.saturating_mul(slots_per_epoch))
    }

    /// The last slot in the epoch.
    pub fn end_slot(self, slots_per_epoch: u64) -> Slot {
        Slot(
            self.0
                .saturating_mul(slots_per_epoch)
                .saturating_add(slots_per_epoch.saturating_sub(1)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_epoch_conversions() {
        assert_eq!(Slot::new(0).epoch(8), Epoch::new(0));
        assert_eq!(Slot::new(7).epoch(8), Epoch::new(0));
        assert_eq!(Slot::new(8).epoch(8), Epoch::new(1));
        assert_eq!(Epoch::new(3).start_slot(8), Slot::new(24));
        assert_eq!(Epoch::new(3).end_slot(8), Slot::new(31));
    }

    #[test]
    fn epoch_boundary() {
        assert!(Slot::new(0).is_epoch_boundary(8));
        assert!(Slot::new(16).is_epoch_boundary(8));
        assert!(!Slot::new(17).is_epoch_boundary(8));
    }

    #[test]
    fn saturating_math() {
        assert_eq!(Slot::new(1) - 5, Slot::new(0));
        assert_eq!(Slot::new(3) - Slot::new(7), 0);
        assert_eq!(Slot::new(u64::MAX) + 1, Slot::max_value());
    }

    #[test]
    fn ssz_round_trip() {
        let slot = Slot::new(42);
        let bytes = slot.as_ssz_bytes();
        assert_eq!(Slot::from_ssz_bytes(&bytes).unwrap(), slot);
    }
}
