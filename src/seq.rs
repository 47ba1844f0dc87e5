//! Modular arithmetic over 32-bit sequence numbers.
//!
//! Sequence numbers wrap at 2^32; ordering between two of them is only
//! meaningful relative to a reference point, so comparisons are expressed
//! as a signed difference rather than a plain `<` (spec §7, §9).

/// `true` if `lhs` precedes `rhs` in sequence-number space, accounting for
/// wraparound (RFC 1323: a segment is "new" if its distance from the
/// reference point is less than 2^31).
pub fn wrapping_lt(lhs: u32, rhs: u32) -> bool {
    (lhs.wrapping_sub(rhs) as i32) < 0
}

/// `true` if `lhs` is less than or equal to `rhs` in wrapped sequence space.
pub fn wrapping_le(lhs: u32, rhs: u32) -> bool {
    lhs == rhs || wrapping_lt(lhs, rhs)
}
