//! JSON building blocks shared by the converters.
//!
//! Numeric values are rendered as lowercase hex strings with a `0x` prefix,
//! zero-padded to an even digit count when a byte width is known; negative
//! values carry a leading minus. These helpers are the single source of
//! truth for that formatting.

use num_bigint::{BigInt, Sign};
use num_traits::{One, Zero};
use serde_json::{json, Value};

/// Renders a value as `0x...` (or `-0x...`), zero-padded to `bytes` bytes.
/// `bytes == 0` emits the minimal representation.
///
/// Panics if the value does not fit in the requested byte count; callers
/// only pass widths obtained from the value's own type.
pub fn string_repr(value: &BigInt, bytes: usize) -> String {
    let (sign, magnitude) = value.clone().into_parts();
    let digits = magnitude.to_str_radix(16);
    let filler = if bytes > 0 {
        let want = bytes * 2;
        assert!(
            digits.len() <= want,
            "cannot represent {value} on {bytes} bytes"
        );
        "0".repeat(want - digits.len())
    } else {
        String::new()
    };
    let sign = if sign == Sign::Minus { "-" } else { "" };
    format!("{sign}0x{filler}{digits}")
}

/// All-ones mask of the given bit width.
pub fn mask(width: u32) -> BigInt {
    (BigInt::one() << width) - BigInt::one()
}

/// Mask with bits `lo..=hi` set.
pub fn mask_from_slice(hi: u32, lo: u32) -> BigInt {
    mask(hi - lo + 1) << lo
}

/// Bytes needed to hold `width` bits.
pub fn round_up_bytes(width: u32) -> usize {
    ((width + 7) / 8) as usize
}

/// A primitive operation object: `{"op": ..., "parameters": [...]}`.
pub fn mk_primitive(op: &str, parameters: Vec<Value>) -> Value {
    json!({ "op": op, "parameters": parameters })
}

/// Extracts the `value` field of a converted expression object. The
/// converters only call this on shapes they produced themselves.
pub fn inner_value(v: &Value) -> Value {
    v.as_object()
        .and_then(|o| o.get("value"))
        .unwrap_or_else(|| panic!("expected an object with a 'value' field, got {v}"))
        .clone()
}

/// The externally visible form of a declared name: any leading dot (an
/// absolute path) is stripped.
pub fn ext_name(name: &str) -> &str {
    name.strip_prefix('.').unwrap_or(name)
}

/// True if `value` is an all-ones mask of `width` bits.
pub fn is_full_mask(value: &BigInt, width: u32) -> bool {
    !value.is_zero() && *value == mask(width)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_representation() {
        assert_eq!(string_repr(&BigInt::from(0), 0), "0x0");
        assert_eq!(string_repr(&BigInt::from(0xaba), 0), "0xaba");
    }

    #[test]
    fn padded_to_bytes() {
        assert_eq!(string_repr(&BigInt::from(0x0f), 1), "0x0f");
        assert_eq!(string_repr(&BigInt::from(1), 4), "0x00000001");
        assert_eq!(string_repr(&BigInt::from(0xaba03), 3), "0x0aba03");
    }

    #[test]
    fn negative_values() {
        assert_eq!(string_repr(&BigInt::from(-5), 1), "-0x05");
    }

    #[test]
    #[should_panic(expected = "cannot represent")]
    fn too_wide_panics() {
        let _ = string_repr(&BigInt::from(0x1ff), 1);
    }

    #[test]
    fn masks() {
        assert_eq!(mask(8), BigInt::from(0xff));
        assert_eq!(mask_from_slice(7, 4), BigInt::from(0xf0));
        assert_eq!(mask_from_slice(3, 0), BigInt::from(0x0f));
    }

    #[test]
    fn byte_rounding() {
        assert_eq!(round_up_bytes(1), 1);
        assert_eq!(round_up_bytes(8), 1);
        assert_eq!(round_up_bytes(9), 2);
        assert_eq!(round_up_bytes(12), 2);
    }

    #[test]
    fn external_names_strip_leading_dot() {
        assert_eq!(ext_name(".ipv4_lpm"), "ipv4_lpm");
        assert_eq!(ext_name("ipv4_lpm"), "ipv4_lpm");
    }

    #[test]
    fn full_mask_detection() {
        assert!(is_full_mask(&BigInt::from(0xff), 8));
        assert!(!is_full_mask(&BigInt::from(0x7f), 8));
        assert!(!is_full_mask(&BigInt::from(0), 0));
    }
}
