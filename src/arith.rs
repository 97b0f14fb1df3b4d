//! Fixed-width integer arithmetic shared by every unit
//!
//! All operations either saturate or wrap; none of them panic. The test
//! oracle uses the same functions so both sides agree on overflow.

/// 8-bit × 8-bit product, exact in 16 bits
pub fn widening_mul_i8(a: i8, b: i8) -> i16 {
    // |-128 * -128| = 16384 fits in i16
    (a as i16) * (b as i16)
}

pub fn sat_add_i16(a: i16, b: i16) -> i16 {
    a.saturating_add(b)
}

pub fn sat_add_i32(a: i32, b: i32) -> i32 {
    a.saturating_add(b)
}

pub fn wrap_add_i32(a: i32, b: i32) -> i32 {
    a.wrapping_add(b)
}

/// Clamp a 32-bit value into the 8-bit range
pub fn sat_narrow_i32_to_i8(v: i32) -> i8 {
    v.clamp(i8::MIN as i32, i8::MAX as i32) as i8
}

/// Clamp a 32-bit value into the 16-bit range
pub fn sat_narrow_i32_to_i16(v: i32) -> i16 {
    v.clamp(i16::MIN as i32, i16::MAX as i32) as i16
}

/// Keep the low 8 bits
pub fn wrap_narrow_i32_to_i8(v: i32) -> i8 {
    v as i8
}

/// Clamp a 64-bit value into the 32-bit range
pub fn sat_narrow_i64_to_i32(v: i64) -> i32 {
    v.clamp(i32::MIN as i64, i32::MAX as i64) as i32
}

/// One multiply-accumulate step: `acc + x * w`
///
/// The product is formed in 16 bits and widened to the 32-bit accumulator,
/// which saturates instead of wrapping.
pub fn mac_i8(acc: i32, x: i8, w: i8) -> i32 {
    sat_add_i32(acc, widening_mul_i8(x, w) as i32)
}
