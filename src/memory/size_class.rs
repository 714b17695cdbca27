//! Size-class index (component A): maps a byte count to the index of the
//! smallest size class able to hold it.

/// The fixed size-class table (spec §6). Monotone, 30 entries, no gaps.
pub const CLASSES: [u32; 30] = [
    8, 16, 24, 32, 48, 64, 80, 96, 112, 128, 192, 256, 320, 384, 448, 512, 768, 1024, 1536, 2048,
    3072, 4096, 8192, 16384, 32768, 65536, 131072, 1048576, 2097152, 4194304,
];

/// Returns the smallest prefix length of `CLASSES` whose last element is
/// `>= cell_max_size`. Used by the pool to decide how many chunk groups it
/// needs for a given `Option::cell_max_size`.
pub fn classes_for_max(cell_max_size: u32) -> usize {
    match CLASSES.iter().position(|&c| c >= cell_max_size) {
        Some(i) => i + 1,
        None => CLASSES.len(),
    }
}

/// Maps `size = max(bytes, align)` to an index into the (conceptually
/// unbounded) size-class sequence: `CLASSES[i]` for `i < CLASSES.len()`, or
/// the power-of-two tail beyond it. Callers that only ever deal with sizes
/// routed through a `Pool` (bounded by `cell_max_size`) will never see an
/// index past `CLASSES.len() - 1`; the tail formula exists so this module
/// is correct standalone too.
#[inline]
pub fn classify(size: u32) -> u32 {
    debug_assert!(size >= 1);
    if size <= CLASSES[CLASSES.len() - 1] {
        classify_table(size)
    } else {
        // bit_width(size - 1) + K, K chosen so the formula agrees with the
        // power-of-two tail of the table (see SPEC_FULL.md for the derivation).
        let e = 32 - (size - 1).leading_zeros();
        e + 7
    }
}

#[inline]
fn classify_table(size: u32) -> u32 {
    cfg_if::cfg_if! {
        if #[cfg(all(any(target_arch = "x86", target_arch = "x86_64"), target_feature = "sse2"))] {
            classify_table_sse2(size)
        } else {
            classify_table_scalar(size)
        }
    }
}

/// Portable binary-search fallback; always correct, used when SSE2 isn't
/// available and exercised directly by tests to cross-check the SIMD path.
#[inline]
fn classify_table_scalar(size: u32) -> u32 {
    CLASSES.partition_point(|&c| c < size) as u32
}

#[cfg(all(any(target_arch = "x86", target_arch = "x86_64"), target_feature = "sse2"))]
#[inline]
fn classify_table_sse2(size: u32) -> u32 {
    #[cfg(target_arch = "x86")]
    use std::arch::x86::*;
    #[cfg(target_arch = "x86_64")]
    use std::arch::x86_64::*;

    // Compare `size - 1 < class` i.e. `class > size - 1`, four classes at a
    // time; the first group with a set bit contains our answer.
    unsafe {
        let needle = _mm_set1_epi32((size - 1) as i32);
        let mut base = 0u32;
        // 30 entries padded conceptually to 32; the last group's two pad
        // slots never get reached because index 29 (value 4194304) always
        // matches for any `size <= 4194304`.
        let mut chunks = CLASSES.chunks_exact(4);
        for chunk in &mut chunks {
            let v = _mm_set_epi32(
                chunk[3] as i32,
                chunk[2] as i32,
                chunk[1] as i32,
                chunk[0] as i32,
            );
            let gt = _mm_cmpgt_epi32(v, needle);
            let mask = _mm_movemask_epi8(gt) as u32;
            if mask != 0 {
                return base + (mask.trailing_zeros() >> 2);
            }
            base += 4;
        }
        // Remainder (CLASSES.len() % 4 == 2 for a 30-element table).
        for (i, &c) in chunks.remainder().iter().enumerate() {
            if c > size - 1 {
                return base + i as u32;
            }
        }
        unreachable!("size <= CLASSES[last] must match some class")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_matches_spec() {
        assert_eq!(CLASSES.len(), 30);
        assert_eq!(CLASSES[0], 8);
        assert_eq!(CLASSES[29], 4194304);
        for w in CLASSES.windows(2) {
            assert!(w[0] < w[1]);
        }
    }

    #[test]
    fn classify_exact_boundaries() {
        for (i, &c) in CLASSES.iter().enumerate() {
            assert_eq!(classify(c), i as u32, "class {c} should map to index {i}");
            if c > 1 {
                assert_eq!(classify(c - 1), i as u32);
            }
        }
    }

    #[test]
    fn simd_and_scalar_agree_over_full_sweep() {
        for size in 1..=CLASSES[CLASSES.len() - 1] {
            assert_eq!(classify_table_scalar(size), classify_table(size), "size={size}");
        }
    }

    #[test]
    fn tail_formula_routes_past_table() {
        let last = CLASSES[CLASSES.len() - 1];
        assert_eq!(classify(last + 1), CLASSES.len() as u32);
        assert_eq!(classify(last * 2), CLASSES.len() as u32);
        assert_eq!(classify(last * 2 + 1), CLASSES.len() as u32 + 1);
    }

    #[test]
    fn classes_for_max_matches_prefix_rule() {
        assert_eq!(classes_for_max(4096), 22);
        assert_eq!(classes_for_max(1), 1);
        assert_eq!(classes_for_max(4194304), 30);
    }
}
