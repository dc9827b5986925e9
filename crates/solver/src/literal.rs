//! Parsing of the engine's textual value renderings.
//!
//! Numerals arrive as decimal strings (`-12`, `3/4`, `0.5`, sometimes with a
//! trailing `?` for truncated algebraic numbers). Floating-point values
//! arrive either as special-value names, as a structural
//! `(fp #b<sign> #b<exponent> #b<significand>)` literal, or as a decimal
//! with an optional `*(2**e)` scale.

use num_bigint::BigInt;
use num_rational::BigRational;
use num_traits::{One, ToPrimitive, Zero};

pub(crate) fn parse_i64(text: &str) -> Option<i64> {
    strip_negation(text.trim()).and_then(|(negative, digits)| {
        let magnitude: i128 = digits.parse().ok()?;
        i64::try_from(if negative { -magnitude } else { magnitude }).ok()
    })
}

pub(crate) fn parse_u64(text: &str) -> Option<u64> {
    text.trim().parse().ok()
}

pub(crate) fn parse_big_int(text: &str) -> Option<BigInt> {
    let (negative, digits) = strip_negation(text.trim())?;
    let magnitude: BigInt = digits.parse().ok()?;
    Some(if negative { -magnitude } else { magnitude })
}

/// Accepts `a`, `-a`, `a/b`, `a.b` and the s-expression negation `(- a)`.
pub(crate) fn parse_rational(text: &str) -> Option<BigRational> {
    let text = text.trim().trim_end_matches('?');
    let (negative, body) = strip_negation(text)?;
    let value = if let Some((num, den)) = body.split_once('/') {
        let num: BigInt = num.trim().parse().ok()?;
        let den: BigInt = den.trim().parse().ok()?;
        if den.is_zero() {
            return None;
        }
        BigRational::new(num, den)
    } else if let Some((int, frac)) = body.split_once('.') {
        let digits: BigInt = format!("{int}{frac}").parse().ok()?;
        let scale = num_traits::pow(BigInt::from(10), frac.len());
        BigRational::new(digits, scale)
    } else {
        BigRational::from_integer(body.parse().ok()?)
    };
    Some(if negative { -value } else { value })
}

fn strip_negation(text: &str) -> Option<(bool, &str)> {
    if let Some(inner) = text.strip_prefix("(-").and_then(|t| t.strip_suffix(')')) {
        return Some((true, inner.trim()));
    }
    if let Some(rest) = text.strip_prefix('-') {
        return Some((true, rest));
    }
    if text.is_empty() {
        return None;
    }
    Some((false, text))
}

/// IEEE special values by rendering.
fn special_float(text: &str) -> Option<f64> {
    let name = match text.strip_prefix("(_ ").and_then(|t| t.strip_suffix(')')) {
        Some(inner) => inner.split_whitespace().next()?,
        None => text,
    };
    match name {
        "+zero" => Some(0.0),
        "-zero" => Some(-0.0),
        "+oo" => Some(f64::INFINITY),
        "-oo" => Some(f64::NEG_INFINITY),
        "NaN" => Some(f64::NAN),
        _ => None,
    }
}

/// A bit-vector literal `#b0101` or `#x1f`, as (value, width).
fn bit_literal(token: &str) -> Option<(u128, u32)> {
    if let Some(bits) = token.strip_prefix("#b") {
        let width = u32::try_from(bits.len()).ok()?;
        if width == 0 || width > 128 {
            return None;
        }
        return Some((u128::from_str_radix(bits, 2).ok()?, width));
    }
    if let Some(hex) = token.strip_prefix("#x") {
        let width = u32::try_from(hex.len()).ok()? * 4;
        if width == 0 || width > 128 {
            return None;
        }
        return Some((u128::from_str_radix(hex, 16).ok()?, width));
    }
    None
}

/// Sign, biased exponent and trailing significand of a structural literal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FpBits {
    negative: bool,
    exponent: u128,
    exponent_width: u32,
    significand: u128,
    significand_width: u32,
}

impl FpBits {
    fn parse(text: &str) -> Option<Self> {
        let inner = text.strip_prefix("(fp ")?.strip_suffix(')')?;
        let mut parts = inner.split_whitespace();
        let (sign, sign_width) = bit_literal(parts.next()?)?;
        let (exponent, exponent_width) = bit_literal(parts.next()?)?;
        let (significand, significand_width) = bit_literal(parts.next()?)?;
        if sign_width != 1 || parts.next().is_some() || exponent_width > 16 {
            return None;
        }
        Some(Self {
            negative: sign == 1,
            exponent,
            exponent_width,
            significand,
            significand_width,
        })
    }

    fn to_f64(self) -> f64 {
        if self.exponent_width == 11 && self.significand_width == 52 {
            let bits = (u64::from(self.negative) << 63)
                | ((self.exponent as u64) << 52)
                | (self.significand as u64);
            return f64::from_bits(bits);
        }
        let max_exponent = (1u128 << self.exponent_width) - 1;
        let bias = (1i32 << (self.exponent_width - 1)) - 1;
        let magnitude = if self.exponent == max_exponent {
            if self.significand == 0 {
                f64::INFINITY
            } else {
                return f64::NAN;
            }
        } else {
            let fraction =
                self.significand as f64 / 2f64.powi(self.significand_width as i32);
            if self.exponent == 0 {
                fraction * 2f64.powi(1 - bias)
            } else {
                (1.0 + fraction) * 2f64.powi(self.exponent as i32 - bias)
            }
        };
        if self.negative { -magnitude } else { magnitude }
    }

    fn to_f32(self) -> f32 {
        if self.exponent_width == 8 && self.significand_width == 23 {
            let bits = (u32::from(self.negative) << 31)
                | ((self.exponent as u32) << 23)
                | (self.significand as u32);
            return f32::from_bits(bits);
        }
        self.to_f64() as f32
    }
}

/// Decimal rendering with optional binary scale, e.g. `1.5*(2**3)`.
fn scaled_decimal(text: &str) -> Option<f64> {
    let (mantissa, scale) = match text.split_once("*(2**") {
        Some((m, rest)) => (m, rest.strip_suffix(')')?.trim().parse::<i32>().ok()?),
        None => (text, 0),
    };
    let mantissa = parse_rational(mantissa)?.to_f64()?;
    Some(mantissa * 2f64.powi(scale))
}

pub(crate) fn parse_f64(text: &str) -> Option<f64> {
    let text = text.trim();
    special_float(text)
        .or_else(|| FpBits::parse(text).map(FpBits::to_f64))
        .or_else(|| scaled_decimal(text))
}

pub(crate) fn parse_f32(text: &str) -> Option<f32> {
    let text = text.trim();
    if let Some(bits) = FpBits::parse(text) {
        return Some(bits.to_f32());
    }
    parse_f64(text).map(|v| v as f32)
}

/// Character literals: `(_ Char 97)`, `(_ char #x61)` or a one-character
/// quoted string.
pub(crate) fn parse_char(text: &str) -> Option<char> {
    let text = text.trim();
    if let Some(inner) = text.strip_prefix("(_ ").and_then(|t| t.strip_suffix(')')) {
        let mut parts = inner.split_whitespace();
        let head = parts.next()?;
        if !head.eq_ignore_ascii_case("char") {
            return None;
        }
        let code = parts.next()?;
        let code = match code.strip_prefix("#x") {
            Some(hex) => u32::from_str_radix(hex, 16).ok()?,
            None => code.parse().ok()?,
        };
        return char::from_u32(code);
    }
    let quoted = text.strip_prefix('"')?.strip_suffix('"')?;
    let mut chars = quoted.chars();
    let c = chars.next()?;
    chars.next().is_none().then_some(c)
}

/// Exact rational to `f64`, or `None` when out of range.
pub(crate) fn rational_to_f64(value: &BigRational) -> Option<f64> {
    if value.denom().is_one() {
        return value.numer().to_f64();
    }
    value.to_f64()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integers() {
        assert_eq!(parse_i64("42"), Some(42));
        assert_eq!(parse_i64("-7"), Some(-7));
        assert_eq!(parse_i64("(- 7)"), Some(-7));
        assert_eq!(parse_i64("99999999999999999999"), None);
        assert_eq!(parse_i64(""), None);
        assert_eq!(parse_u64("255"), Some(255));
        assert_eq!(parse_u64("-1"), None);
    }

    #[test]
    fn big_integers() {
        let big = parse_big_int("123456789012345678901234567890").unwrap();
        assert_eq!(big.to_string(), "123456789012345678901234567890");
        assert_eq!(parse_big_int("-5"), Some(BigInt::from(-5)));
    }

    #[test]
    fn rationals() {
        let half = BigRational::new(BigInt::from(1), BigInt::from(2));
        assert_eq!(parse_rational("1/2"), Some(half.clone()));
        assert_eq!(parse_rational("0.5"), Some(half.clone()));
        assert_eq!(parse_rational("-1/2"), Some(-half.clone()));
        assert_eq!(parse_rational("(- 0.5)"), Some(-half));
        assert_eq!(parse_rational("3"), Some(BigRational::from_integer(BigInt::from(3))));
        let approx = parse_rational("1.41421?").and_then(|r| r.to_f64()).unwrap();
        assert!((approx - 1.41421).abs() < 1e-12);
        assert_eq!(parse_rational("1/0"), None);
        assert_eq!(parse_rational("abc"), None);
    }

    #[test]
    fn float_special_values() {
        assert!(parse_f64("(_ NaN 11 53)").unwrap().is_nan());
        assert_eq!(parse_f64("(_ +oo 11 53)"), Some(f64::INFINITY));
        assert_eq!(parse_f64("-oo"), Some(f64::NEG_INFINITY));
        let neg_zero = parse_f64("(_ -zero 8 24)").unwrap();
        assert_eq!(neg_zero, 0.0);
        assert!(neg_zero.is_sign_negative());
        assert!(parse_f64("+zero").unwrap().is_sign_positive());
    }

    #[test]
    fn float_structural_literal() {
        // 1.5 as binary32: sign 0, exponent 127, significand 0x400000.
        let text = "(fp #b0 #b01111111 #b10000000000000000000000)";
        assert_eq!(parse_f32(text), Some(1.5));
        assert_eq!(parse_f64(text), Some(1.5));

        // -2.0 as binary64.
        let text = format!("(fp #b1 #b{:011b} #b{:052b})", 1024, 0);
        assert_eq!(parse_f64(&text), Some(-2.0));

        // Half precision 0.5: exponent 14, bias 15.
        assert_eq!(parse_f64("(fp #b0 #b01110 #b0000000000)"), Some(0.5));
    }

    #[test]
    fn float_structural_special_encodings() {
        assert_eq!(
            parse_f64("(fp #b0 #b11111 #b0000000000)"),
            Some(f64::INFINITY)
        );
        assert!(parse_f64("(fp #b0 #b11111 #b0000000001)").unwrap().is_nan());
        // Subnormal half: 2^-14 * 2^-10.
        assert_eq!(
            parse_f64("(fp #b0 #b00000 #b0000000001)"),
            Some(2f64.powi(-24))
        );
    }

    #[test]
    fn float_decimal_renderings() {
        assert_eq!(parse_f64("0.25"), Some(0.25));
        assert_eq!(parse_f64("-3"), Some(-3.0));
        assert_eq!(parse_f64("1.5*(2**3)"), Some(12.0));
        assert_eq!(parse_f64("1*(2**-2)"), Some(0.25));
        assert_eq!(parse_f64("fp?"), None);
    }

    #[test]
    fn chars() {
        assert_eq!(parse_char("(_ Char 97)"), Some('a'));
        assert_eq!(parse_char("(_ char #x41)"), Some('A'));
        assert_eq!(parse_char("\"z\""), Some('z'));
        assert_eq!(parse_char("\"zz\""), None);
        assert_eq!(parse_char("(_ Char 1114112)"), None);
    }

    #[test]
    fn rational_conversion() {
        let r = parse_rational("3/4").unwrap();
        assert_eq!(rational_to_f64(&r), Some(0.75));
    }
}
