//! Constant-time comparisons for credential and MAC checks.
//!
//! Never compare secret material with `==`; execution time must not
//! depend on where the first differing byte sits.

use subtle::ConstantTimeEq;

/// Constant-time equality of byte slices. Length is not secret; a
/// length mismatch returns early.
pub fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equal_slices() {
        assert!(ct_eq(b"token-hash", b"token-hash"));
    }

    #[test]
    fn test_unequal_slices() {
        assert!(!ct_eq(b"token-hash", b"token-hash!"));
        assert!(!ct_eq(b"aaaa", b"aaab"));
        assert!(!ct_eq(b"", b"a"));
    }

    #[test]
    fn test_empty_slices_are_equal() {
        assert!(ct_eq(b"", b""));
    }
}
