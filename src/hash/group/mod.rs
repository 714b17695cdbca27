//! Dispatches to a SIMD-backed `Group` implementation where available and a
//! portable SWAR one everywhere else. Both must agree bit-for-bit; the
//! generic path is exercised directly in tests to cross-check the SSE2 one.

cfg_if::cfg_if! {
    if #[cfg(all(
        target_feature = "sse2",
        any(target_arch = "x86", target_arch = "x86_64"),
        not(miri)
    ))] {
        mod sse2;
        pub(crate) use sse2::Group;
    } else {
        #[path = "generic.rs"]
        mod generic;
        pub(crate) use generic::Group;
    }
}

/// High bit set on `EMPTY` and `DELETED`, clear on every occupied byte
/// (spec §3: meta byte layout).
pub(crate) const EMPTY: u8 = 0x80;
pub(crate) const DELETED: u8 = 0xFF;

#[cfg(test)]
mod tests {
    use super::super::bitmask::BitMask;
    #[path = "generic.rs"]
    mod generic;

    use super::{Group, DELETED, EMPTY};

    fn sample() -> [u8; 16] {
        let mut g = [0x05u8; 16];
        g[1] = EMPTY;
        g[3] = DELETED;
        g[7] = EMPTY;
        g
    }

    #[test]
    fn sse2_and_generic_agree_on_match_byte() {
        let bytes = sample();
        let a = unsafe { Group::load(bytes.as_ptr()) }.match_byte(0x05);
        let b = unsafe { generic::Group::load(bytes.as_ptr()) }.match_byte(0x05);
        assert_eq!(bitset(a), bitset(b));
    }

    #[test]
    fn sse2_and_generic_agree_on_match_empty_or_deleted() {
        let bytes = sample();
        let a = unsafe { Group::load(bytes.as_ptr()) }.match_empty_or_deleted();
        let b = unsafe { generic::Group::load(bytes.as_ptr()) }.match_empty_or_deleted();
        assert_eq!(bitset(a), bitset(b));
    }

    #[test]
    fn sse2_and_generic_agree_on_match_empty() {
        let bytes = sample();
        let a = unsafe { Group::load(bytes.as_ptr()) }.match_empty();
        let b = unsafe { generic::Group::load(bytes.as_ptr()) }.match_empty();
        assert_eq!(bitset(a), bitset(b));
    }

    fn bitset(m: BitMask) -> Vec<usize> {
        m.into_iter().collect()
    }
}
