//! Compact (`nBits`) difficulty encoding
//!
//! A compact target packs a 256-bit target into 32 bits: the top byte is a
//! base-256 exponent, the low 23 bits a mantissa and bit 23 a sign flag.

use primitive_types::{H256, U256, U512};
use serde::{Deserialize, Serialize};

use crate::utils::hashing::meets_target;

/// Compact encoding of a difficulty target
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CompactTarget(pub u32);

/// Result of expanding a compact target, with the flags bitcoin reports
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExpandedTarget {
    /// Decoded magnitude
    pub value: U256,

    /// Sign bit was set on a non-zero mantissa
    pub negative: bool,

    /// Magnitude does not fit in 256 bits
    pub overflow: bool,
}

impl CompactTarget {
    /// Expand into a 256-bit value plus sign/overflow flags
    pub fn expand(self) -> ExpandedTarget {
        let bits = self.0;
        let size = bits >> 24;
        let mut word = bits & 0x007f_ffff;

        let value = if size <= 3 {
            word >>= 8 * (3 - size);
            U256::from(word)
        } else if size - 3 >= 32 {
            U256::zero()
        } else {
            U256::from(word) << (8 * (size - 3) as usize)
        };

        let negative = word != 0 && (bits & 0x0080_0000) != 0;
        let overflow =
            word != 0 && (size > 34 || (word > 0xff && size > 33) || (word > 0xffff && size > 32));

        ExpandedTarget {
            value,
            negative,
            overflow,
        }
    }

    /// Usable target, or `None` for negative, zero or overflowing encodings
    pub fn to_target(self) -> Option<U256> {
        let expanded = self.expand();
        if expanded.negative || expanded.overflow || expanded.value.is_zero() {
            None
        } else {
            Some(expanded.value)
        }
    }

    /// Encode a target, rounding the mantissa down
    pub fn from_target(target: U256) -> Self {
        let mut size = target.bits().div_ceil(8) as u32;
        let shifted = if size <= 3 {
            target.low_u64() << (8 * (3 - size))
        } else {
            (target >> (8 * (size - 3) as usize)).low_u64()
        };
        let mut compact = shifted as u32;

        // the sign bit must stay clear, so shift into the next exponent
        if compact & 0x0080_0000 != 0 {
            compact >>= 8;
            size += 1;
        }
        Self(compact | (size << 24))
    }

    /// Mantissa bits including the sign bit
    pub fn mantissa(self) -> u32 {
        self.0 & 0x00ff_ffff
    }

    /// Base-256 exponent
    pub fn exponent(self) -> u32 {
        (self.0 >> 24) & 0xff
    }
}

impl From<u32> for CompactTarget {
    fn from(bits: u32) -> Self {
        Self(bits)
    }
}

/// Proof-of-work check: `hash <= target(bits)`
pub fn check_proof_of_work(hash: &H256, bits: CompactTarget) -> bool {
    match bits.to_target() {
        Some(target) => meets_target(hash, &target),
        None => false,
    }
}

/// Target scaled by a stake value, as a 512-bit product
pub fn weighted_target(target: U256, value: u64) -> U512 {
    target.full_mul(U256::from(value))
}
