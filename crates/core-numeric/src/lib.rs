//! Extended-exponent arithmetic for products of many small probabilities.
//!
//! The sampler multiplies hundreds of factors well below 1.0; a plain `f64`
//! underflows long before the product is compared against other candidates.
//! Instead of logarithms, a value is carried as `frac * 2^exp` with `frac`
//! renormalized into `[1, 2)` every [`NORMALIZE_INTERVAL`] factors and the
//! binary exponent accumulated in a separate `i32`. Comparisons then happen
//! on the exponent first, and a candidate whose exponent has fallen
//! [`DOMINANCE_BITS`] below the best one seen so far can be abandoned: the
//! difference is no longer representable in a 52-bit mantissa.
//!
//! `f64::to_bits`/`from_bits` give well-defined access to the IEEE-754
//! binary64 fields, so unlike the usual pointer-punning formulation this
//! works on any platform Rust supports.

const SIGN_AND_MANTISSA: u64 = 0x800f_ffff_ffff_ffff;
const EXPONENT_SHIFT: u32 = 52;
const EXPONENT_BIAS: i32 = 1023;

/// Renormalize `frac` every this many multiplications.
pub const NORMALIZE_INTERVAL: usize = 16;

/// A candidate whose exponent trails the best by this many bits is
/// indistinguishable from zero next to it.
pub const DOMINANCE_BITS: i32 = 52;

/// Move the binary exponent of `frac` into `exp`, leaving
/// `frac` in `[1, 2)` (a zero input degenerates to `1.0` with the minimum
/// biased exponent folded into `exp`; callers guard against zero factors).
#[inline]
pub fn fix_exp(frac: &mut f64, exp: &mut i32) {
    let bits = frac.to_bits();
    *exp += ((bits >> EXPONENT_SHIFT) & 0x7ff) as i32 - EXPONENT_BIAS;
    *frac = f64::from_bits(bits & SIGN_AND_MANTISSA | (EXPONENT_BIAS as u64) << EXPONENT_SHIFT);
}

/// Install `exp` as the binary exponent of `frac` (assumed in `[1, 2)`),
/// yielding `frac * 2^exp`. Exponents outside the normal range saturate to
/// `0.0` and `f64::INFINITY`.
#[inline]
pub fn pack_exp(frac: f64, exp: i32) -> f64 {
    if exp < -1022 {
        return 0.0;
    }
    if exp > 1023 {
        return f64::INFINITY;
    }
    let bits = frac.to_bits();
    f64::from_bits(bits & SIGN_AND_MANTISSA | ((exp + EXPONENT_BIAS) as u64) << EXPONENT_SHIFT)
}

/// A running product in extended-exponent form.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExtExp {
    pub frac: f64,
    pub exp: i32,
}

impl ExtExp {
    pub fn one() -> Self {
        Self { frac: 1.0, exp: 0 }
    }

    pub fn from_f64(value: f64) -> Self {
        let mut out = Self {
            frac: value,
            exp: 0,
        };
        out.normalize();
        out
    }

    #[inline]
    pub fn mul(&mut self, factor: f64) {
        self.frac *= factor;
    }

    #[inline]
    pub fn normalize(&mut self) {
        fix_exp(&mut self.frac, &mut self.exp);
    }

    /// `self > other`, comparing exponent first. Both sides must be
    /// normalized.
    pub fn dominates(&self, other: &ExtExp) -> bool {
        self.exp > other.exp || (self.exp == other.exp && self.frac > other.frac)
    }

    /// Collapse to an ordinary `f64` scaled by `2^-reference`, so the
    /// largest of a candidate set (whose exponent is the reference) maps
    /// into `[1, 2)` and the rest underflow gracefully.
    pub fn pack_relative(&self, reference: i32) -> f64 {
        pack_exp(self.frac, self.exp - reference)
    }
}
