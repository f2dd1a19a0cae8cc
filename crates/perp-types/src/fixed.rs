//! 18-decimal fixed-point numerics.
//!
//! # Scale
//!
//! Every price, position size, collateral amount, rate and accumulator value
//! in the engine is a decimal with exactly 18 fractional digits:
//! `1.0 == 1_000_000_000_000_000_000` raw units.
//!
//! - [`UFixed18`] wraps a `u128` and represents non-negative quantities
//!   (sizes, collateral, fees, shares).
//! - [`Fixed18`] wraps an `i128` and represents signed quantities (prices,
//!   PnL deltas, accumulator values, funding rates).
//!
//! # Arithmetic
//!
//! There are no operator impls. All arithmetic goes through `try_*` methods
//! that return `Result<_, ArithmeticError>` so that overflow, underflow and
//! division by zero abort the enclosing operation instead of wrapping.
//!
//! Products and quotients are computed through a 256-bit intermediate
//! ([`mul_div`]) and truncate toward zero, so `a * b / c` never overflows
//! when the final result fits.
//!
//! The only clamping helpers are [`UFixed18::sub_or_zero`] and
//! [`UFixed18::unsafe_div`], whose clamping is part of their definition.

use std::fmt;
use std::str::FromStr;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Fractional decimal digits carried by every fixed-point value.
pub const DECIMALS: u32 = 18;

const BASE: u128 = 1_000_000_000_000_000_000;
const LOW_MASK: u128 = u128::MAX >> 64;

// ---------------------------------------------------------------------------
// ArithmeticError
// ---------------------------------------------------------------------------

/// Fatal numeric failure. Any operation that hits one of these is aborted.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ArithmeticError {
    Overflow,
    Underflow,
    DivisionByZero,
}

impl fmt::Display for ArithmeticError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArithmeticError::Overflow => write!(f, "fixed-point overflow"),
            ArithmeticError::Underflow => write!(f, "fixed-point underflow"),
            ArithmeticError::DivisionByZero => write!(f, "fixed-point division by zero"),
        }
    }
}

impl std::error::Error for ArithmeticError {}

// ---------------------------------------------------------------------------
// 256-bit intermediate
// ---------------------------------------------------------------------------

/// Full 128x128 -> 256 bit product, returned as `(high, low)`.
fn mul_wide(a: u128, b: u128) -> (u128, u128) {
    let (a_hi, a_lo) = (a >> 64, a & LOW_MASK);
    let (b_hi, b_lo) = (b >> 64, b & LOW_MASK);

    let ll = a_lo * b_lo;
    let lh = a_lo * b_hi;
    let hl = a_hi * b_lo;
    let hh = a_hi * b_hi;

    let mid = (ll >> 64) + (lh & LOW_MASK) + (hl & LOW_MASK);
    let low = (ll & LOW_MASK) | (mid << 64);
    let high = hh + (lh >> 64) + (hl >> 64) + (mid >> 64);
    (high, low)
}

/// `floor(a * b / d)` with a 256-bit intermediate.
///
/// Fails with `DivisionByZero` when `d == 0` and with `Overflow` when the
/// quotient does not fit in 128 bits.
pub fn mul_div(a: u128, b: u128, d: u128) -> Result<u128, ArithmeticError> {
    if d == 0 {
        return Err(ArithmeticError::DivisionByZero);
    }
    let (high, low) = mul_wide(a, b);
    if high == 0 {
        return Ok(low / d);
    }
    if high >= d {
        return Err(ArithmeticError::Overflow);
    }

    // Restoring long division of (high:low) by d, one bit at a time.
    // Invariant: rem < d at the top of every iteration.
    let mut rem = high;
    let mut quotient: u128 = 0;
    for bit in (0..128).rev() {
        let carry = rem >> 127;
        rem = (rem << 1) | ((low >> bit) & 1);
        quotient <<= 1;
        if carry == 1 || rem >= d {
            rem = rem.wrapping_sub(d);
            quotient |= 1;
        }
    }
    Ok(quotient)
}

/// `ceil(a * b / d)`; fails exactly where [`mul_div`] does.
pub fn mul_div_up(a: u128, b: u128, d: u128) -> Result<u128, ArithmeticError> {
    let quotient = mul_div(a, b, d)?;
    if mul_wide(quotient, d) == mul_wide(a, b) {
        return Ok(quotient);
    }
    quotient.checked_add(1).ok_or(ArithmeticError::Overflow)
}

// ---------------------------------------------------------------------------
// UFixed18
// ---------------------------------------------------------------------------

/// Unsigned 18-decimal fixed-point value.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UFixed18(u128);

impl UFixed18 {
    pub const ZERO: UFixed18 = UFixed18(0);
    pub const ONE: UFixed18 = UFixed18(BASE);
    pub const MAX: UFixed18 = UFixed18(u128::MAX);

    /// Construct from raw 1e-18 units.
    #[inline]
    pub const fn from_raw(raw: u128) -> Self {
        UFixed18(raw)
    }

    /// Raw 1e-18 units.
    #[inline]
    pub const fn raw(self) -> u128 {
        self.0
    }

    /// Whole-number value, e.g. `from_int(5) == 5.0`.
    #[inline]
    pub const fn from_int(n: u64) -> Self {
        UFixed18(n as u128 * BASE)
    }

    #[inline]
    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn try_add(self, rhs: UFixed18) -> Result<UFixed18, ArithmeticError> {
        self.0
            .checked_add(rhs.0)
            .map(UFixed18)
            .ok_or(ArithmeticError::Overflow)
    }

    pub fn try_sub(self, rhs: UFixed18) -> Result<UFixed18, ArithmeticError> {
        self.0
            .checked_sub(rhs.0)
            .map(UFixed18)
            .ok_or(ArithmeticError::Underflow)
    }

    /// `max(self - rhs, 0)`.
    #[inline]
    pub fn sub_or_zero(self, rhs: UFixed18) -> UFixed18 {
        UFixed18(self.0.saturating_sub(rhs.0))
    }

    pub fn try_mul(self, rhs: UFixed18) -> Result<UFixed18, ArithmeticError> {
        mul_div(self.0, rhs.0, BASE).map(UFixed18)
    }

    pub fn try_div(self, rhs: UFixed18) -> Result<UFixed18, ArithmeticError> {
        mul_div(self.0, BASE, rhs.0).map(UFixed18)
    }

    /// `self * num / den` without intermediate rounding.
    pub fn try_muldiv(self, num: UFixed18, den: UFixed18) -> Result<UFixed18, ArithmeticError> {
        mul_div(self.0, num.0, den.0).map(UFixed18)
    }

    /// Division with defined results for a zero divisor:
    /// `0 / 0 == 1` and `x / 0 == MAX` for `x > 0`. A quotient too large to
    /// represent is reported as `MAX`.
    pub fn unsafe_div(self, rhs: UFixed18) -> UFixed18 {
        if rhs.is_zero() {
            return if self.is_zero() {
                UFixed18::ONE
            } else {
                UFixed18::MAX
            };
        }
        self.try_div(rhs).unwrap_or(UFixed18::MAX)
    }
}

impl fmt::Display for UFixed18 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_decimal(f, false, self.0)
    }
}

impl FromStr for UFixed18 {
    type Err = ParseFixedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.starts_with('-') {
            return Err(ParseFixedError::Negative);
        }
        parse_magnitude(s.strip_prefix('+').unwrap_or(s)).map(UFixed18)
    }
}

// ---------------------------------------------------------------------------
// Fixed18
// ---------------------------------------------------------------------------

/// Signed 18-decimal fixed-point value.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Fixed18(i128);

impl Fixed18 {
    pub const ZERO: Fixed18 = Fixed18(0);
    pub const ONE: Fixed18 = Fixed18(BASE as i128);
    pub const NEG_ONE: Fixed18 = Fixed18(-(BASE as i128));

    #[inline]
    pub const fn from_raw(raw: i128) -> Self {
        Fixed18(raw)
    }

    #[inline]
    pub const fn raw(self) -> i128 {
        self.0
    }

    #[inline]
    pub const fn from_int(n: i64) -> Self {
        Fixed18(n as i128 * BASE as i128)
    }

    /// Lossless widening from unsigned; fails only above `i128::MAX` raw.
    pub fn from_unsigned(value: UFixed18) -> Result<Fixed18, ArithmeticError> {
        i128::try_from(value.raw())
            .map(Fixed18)
            .map_err(|_| ArithmeticError::Overflow)
    }

    /// Rebuild a signed value from `sign` (`1`, `0` or `-1`) and a magnitude.
    pub fn from_sign(sign: i8, magnitude: UFixed18) -> Result<Fixed18, ArithmeticError> {
        match sign {
            0 => Ok(Fixed18::ZERO),
            s if s > 0 => signed(false, magnitude.raw()),
            _ => signed(true, magnitude.raw()),
        }
    }

    #[inline]
    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub fn is_negative(self) -> bool {
        self.0 < 0
    }

    /// `1`, `0` or `-1`.
    #[inline]
    pub fn signum(self) -> i8 {
        self.0.signum() as i8
    }

    #[inline]
    pub fn abs(self) -> UFixed18 {
        UFixed18(self.0.unsigned_abs())
    }

    pub fn try_neg(self) -> Result<Fixed18, ArithmeticError> {
        self.0
            .checked_neg()
            .map(Fixed18)
            .ok_or(ArithmeticError::Overflow)
    }

    pub fn try_add(self, rhs: Fixed18) -> Result<Fixed18, ArithmeticError> {
        self.0
            .checked_add(rhs.0)
            .map(Fixed18)
            .ok_or(ArithmeticError::Overflow)
    }

    pub fn try_sub(self, rhs: Fixed18) -> Result<Fixed18, ArithmeticError> {
        self.0
            .checked_sub(rhs.0)
            .map(Fixed18)
            .ok_or(ArithmeticError::Overflow)
    }

    /// Product truncated toward zero.
    pub fn try_mul(self, rhs: Fixed18) -> Result<Fixed18, ArithmeticError> {
        let magnitude = mul_div(self.0.unsigned_abs(), rhs.0.unsigned_abs(), BASE)?;
        signed((self.0 < 0) != (rhs.0 < 0), magnitude)
    }

    /// Quotient truncated toward zero.
    pub fn try_div(self, rhs: Fixed18) -> Result<Fixed18, ArithmeticError> {
        let magnitude = mul_div(self.0.unsigned_abs(), BASE, rhs.0.unsigned_abs())?;
        signed((self.0 < 0) != (rhs.0 < 0), magnitude)
    }

    /// Quotient rounded toward negative infinity: a negative result is never
    /// smaller in magnitude than the exact one.
    pub fn try_div_floor(self, rhs: Fixed18) -> Result<Fixed18, ArithmeticError> {
        let negative = (self.0 < 0) != (rhs.0 < 0);
        let (a, d) = (self.0.unsigned_abs(), rhs.0.unsigned_abs());
        let magnitude = if negative {
            mul_div_up(a, BASE, d)?
        } else {
            mul_div(a, BASE, d)?
        };
        signed(negative, magnitude)
    }

    /// Divide by a plain integer count, truncating toward zero.
    pub fn try_div_int(self, n: i64) -> Result<Fixed18, ArithmeticError> {
        if n == 0 {
            return Err(ArithmeticError::DivisionByZero);
        }
        self.0
            .checked_div(n as i128)
            .map(Fixed18)
            .ok_or(ArithmeticError::Overflow)
    }
}

fn signed(negative: bool, magnitude: u128) -> Result<Fixed18, ArithmeticError> {
    let value = i128::try_from(magnitude).map_err(|_| ArithmeticError::Overflow)?;
    Ok(Fixed18(if negative { -value } else { value }))
}

impl fmt::Display for Fixed18 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_decimal(f, self.0 < 0, self.0.unsigned_abs())
    }
}

impl FromStr for Fixed18 {
    type Err = ParseFixedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (negative, digits) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s.strip_prefix('+').unwrap_or(s)),
        };
        let magnitude = parse_magnitude(digits)?;
        signed(negative, magnitude).map_err(|_| ParseFixedError::OutOfRange)
    }
}

// ---------------------------------------------------------------------------
// Decimal text
// ---------------------------------------------------------------------------

/// Failure to parse a decimal string into a fixed-point value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParseFixedError {
    Empty,
    InvalidDigit,
    TooManyDecimals,
    Negative,
    OutOfRange,
}

impl fmt::Display for ParseFixedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseFixedError::Empty => write!(f, "empty decimal string"),
            ParseFixedError::InvalidDigit => write!(f, "invalid digit in decimal string"),
            ParseFixedError::TooManyDecimals => {
                write!(f, "more than {DECIMALS} fractional digits")
            }
            ParseFixedError::Negative => write!(f, "negative value for unsigned decimal"),
            ParseFixedError::OutOfRange => write!(f, "decimal value out of range"),
        }
    }
}

impl std::error::Error for ParseFixedError {}

fn parse_magnitude(s: &str) -> Result<u128, ParseFixedError> {
    if s.is_empty() {
        return Err(ParseFixedError::Empty);
    }
    let (int_part, frac_part) = s.split_once('.').unwrap_or((s, ""));
    if int_part.is_empty() && frac_part.is_empty() {
        return Err(ParseFixedError::Empty);
    }
    let all_digits = |p: &str| p.bytes().all(|b| b.is_ascii_digit());
    if !all_digits(int_part) || !all_digits(frac_part) {
        return Err(ParseFixedError::InvalidDigit);
    }
    if frac_part.len() > DECIMALS as usize {
        return Err(ParseFixedError::TooManyDecimals);
    }

    let int: u128 = if int_part.is_empty() {
        0
    } else {
        int_part.parse().map_err(|_| ParseFixedError::OutOfRange)?
    };
    let frac: u128 = if frac_part.is_empty() {
        0
    } else {
        // At most 18 digits, always fits.
        let raw: u128 = frac_part.parse().map_err(|_| ParseFixedError::OutOfRange)?;
        raw * 10u128.pow(DECIMALS - frac_part.len() as u32)
    };

    int.checked_mul(BASE)
        .and_then(|v| v.checked_add(frac))
        .ok_or(ParseFixedError::OutOfRange)
}

/// Shortest exact decimal: `10010`, `0.5`, `-3.25`.
fn write_decimal(f: &mut fmt::Formatter<'_>, negative: bool, magnitude: u128) -> fmt::Result {
    let int = magnitude / BASE;
    let frac = magnitude % BASE;
    let sign = if negative { "-" } else { "" };
    if frac == 0 {
        return write!(f, "{sign}{int}");
    }
    let digits = format!("{frac:018}");
    write!(f, "{sign}{int}.{}", digits.trim_end_matches('0'))
}

// ---------------------------------------------------------------------------
// Serde: strings on the way out, strings or numbers on the way in
// ---------------------------------------------------------------------------

impl Serialize for UFixed18 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl Serialize for Fixed18 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

struct DecimalVisitor<T>(std::marker::PhantomData<T>);

impl<'de, T> Visitor<'de> for DecimalVisitor<T>
where
    T: FromStr<Err = ParseFixedError>,
{
    type Value = T;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "a decimal number or decimal string")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<T, E> {
        v.parse().map_err(E::custom)
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<T, E> {
        self.visit_str(&v.to_string())
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<T, E> {
        self.visit_str(&v.to_string())
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<T, E> {
        if !v.is_finite() {
            return Err(E::custom("non-finite decimal"));
        }
        self.visit_str(&v.to_string())
    }
}

impl<'de> Deserialize<'de> for UFixed18 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(DecimalVisitor(std::marker::PhantomData))
    }
}

impl<'de> Deserialize<'de> for Fixed18 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(DecimalVisitor(std::marker::PhantomData))
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn u(s: &str) -> UFixed18 {
        s.parse().unwrap()
    }

    fn i(s: &str) -> Fixed18 {
        s.parse().unwrap()
    }

    #[test]
    fn mul_div_matches_narrow_path() {
        assert_eq!(mul_div(6, 7, 3).unwrap(), 14);
        assert_eq!(mul_div(10, 1, 3).unwrap(), 3);
    }

    #[test]
    fn mul_div_survives_wide_intermediate() {
        // (2^100 * 2^100) / 2^90 = 2^110, the intermediate needs 200 bits.
        let a = 1u128 << 100;
        assert_eq!(mul_div(a, a, 1u128 << 90).unwrap(), 1u128 << 110);
        assert_eq!(mul_div(u128::MAX, u128::MAX, u128::MAX).unwrap(), u128::MAX);
    }

    #[test]
    fn mul_div_reports_overflow_and_zero_divisor() {
        assert_eq!(mul_div(u128::MAX, 2, 1), Err(ArithmeticError::Overflow));
        assert_eq!(mul_div(1, 1, 0), Err(ArithmeticError::DivisionByZero));
    }

    #[test]
    fn large_notional_products_do_not_overflow() {
        // 1e12 units * 1e6 price: raw product is 1e66, far beyond i128.
        let size = Fixed18::from_int(1_000_000_000_000);
        let price = Fixed18::from_int(1_000_000);
        assert_eq!(
            size.try_mul(price).unwrap(),
            Fixed18::from_int(1_000_000_000_000_000_000)
        );
    }

    #[test]
    fn signed_ops_truncate_toward_zero() {
        let third = Fixed18::NEG_ONE.try_div(Fixed18::from_int(3)).unwrap();
        assert_eq!(third.raw(), -333_333_333_333_333_333);
        assert_eq!(i("-1.5").try_mul(i("2")).unwrap(), i("-3"));
        assert_eq!(i("-1.5").try_mul(i("-2")).unwrap(), i("3"));
    }

    #[test]
    fn floor_division_rounds_debits_up() {
        let third = Fixed18::NEG_ONE.try_div_floor(Fixed18::from_int(3)).unwrap();
        assert_eq!(third.raw(), -333_333_333_333_333_334);
        let third = Fixed18::ONE.try_div_floor(Fixed18::from_int(3)).unwrap();
        assert_eq!(third.raw(), 333_333_333_333_333_333);
        assert_eq!(i("-3").try_div_floor(i("3")).unwrap(), i("-1"));
        assert_eq!(Fixed18::ZERO.try_div_floor(i("-3")).unwrap(), Fixed18::ZERO);
    }

    #[test]
    fn unsigned_subtraction_underflow_is_an_error() {
        assert_eq!(u("1").try_sub(u("2")), Err(ArithmeticError::Underflow));
        assert_eq!(u("1").sub_or_zero(u("2")), UFixed18::ZERO);
    }

    #[test]
    fn unsafe_div_defines_zero_divisor() {
        assert_eq!(UFixed18::ZERO.unsafe_div(UFixed18::ZERO), UFixed18::ONE);
        assert_eq!(u("3").unsafe_div(UFixed18::ZERO), UFixed18::MAX);
        assert_eq!(u("3").unsafe_div(u("2")), u("1.5"));
    }

    #[test]
    fn display_is_shortest_exact_decimal() {
        assert_eq!(u("10010").to_string(), "10010");
        assert_eq!(u("0.5").to_string(), "0.5");
        assert_eq!(i("-3.25").to_string(), "-3.25");
        assert_eq!(i("-0.000000000000000001").to_string(), "-0.000000000000000001");
    }

    #[test]
    fn parse_rejects_bad_input() {
        assert_eq!("".parse::<UFixed18>(), Err(ParseFixedError::Empty));
        assert_eq!("1.2.3".parse::<UFixed18>(), Err(ParseFixedError::InvalidDigit));
        assert_eq!("-1".parse::<UFixed18>(), Err(ParseFixedError::Negative));
        assert_eq!(
            "0.0000000000000000001".parse::<Fixed18>(),
            Err(ParseFixedError::TooManyDecimals)
        );
    }

    #[test]
    fn serde_accepts_numbers_and_strings() {
        let from_num: UFixed18 = serde_json::from_str("0.1").unwrap();
        let from_str: UFixed18 = serde_json::from_str("\"0.1\"").unwrap();
        assert_eq!(from_num, from_str);
        let neg: Fixed18 = serde_json::from_str("-2000").unwrap();
        assert_eq!(neg, Fixed18::from_int(-2000));
        assert_eq!(serde_json::to_string(&u("1.5")).unwrap(), "\"1.5\"");
    }

    #[test]
    fn sign_round_trip() {
        let x = i("-7.5");
        assert_eq!(Fixed18::from_sign(x.signum(), x.abs()).unwrap(), x);
        assert_eq!(Fixed18::from_sign(0, u("9")).unwrap(), Fixed18::ZERO);
    }
}
