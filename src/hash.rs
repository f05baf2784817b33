//! Hash functions used by the game formats.
//!
//! Field, entry, type and link names use FNV-1a 32-bit; file paths use
//! XXH64 with seed 0. Both namespaces hash the lowercased ASCII form of the
//! input, while hash tables keep the original casing for display.

const FNV_OFFSET: u32 = 0x811c9dc5;
const FNV_PRIME: u32 = 0x01000193;

#[inline]
fn ascii_lower(c: u8) -> u8 {
    if c.is_ascii_uppercase() {
        c - b'A' + b'a'
    } else {
        c
    }
}

/// FNV-1a over the lowercased ASCII bytes of `s`.
///
/// The empty string hashes to the offset basis.
pub fn fnv1a32(s: &str) -> u32 {
    let mut h = FNV_OFFSET;
    for c in s.bytes() {
        h = (h ^ ascii_lower(c) as u32).wrapping_mul(FNV_PRIME);
    }
    h
}

/// XXH64 (seed 0) over the lowercased ASCII bytes of `s`.
pub fn xxh64(s: &str) -> u64 {
    xxh64_bytes(s.as_bytes())
}

/// 8-digit lowercase hex form of a 32-bit hash.
pub fn hex32(h: u32) -> String {
    format!("{:08x}", h)
}

/// 16-digit lowercase hex form of a 64-bit hash.
pub fn hex64(h: u64) -> String {
    format!("{:016x}", h)
}

const PRIME1: u64 = 11400714785074694791;
const PRIME2: u64 = 14029467366897019727;
const PRIME3: u64 = 1609587929392839161;
const PRIME4: u64 = 9650029242287828579;
const PRIME5: u64 = 2870177450012600261;

#[inline]
fn lane(data: &[u8], idx: usize) -> u64 {
    let mut v = 0u64;
    for i in 0..8 {
        v |= (ascii_lower(data[idx + i]) as u64) << (i * 8);
    }
    v
}

#[inline]
fn round(acc: u64, lane: u64) -> u64 {
    acc.wrapping_add(lane.wrapping_mul(PRIME2))
        .rotate_left(31)
        .wrapping_mul(PRIME1)
}

#[inline]
fn merge_round(acc: u64, lane: u64) -> u64 {
    (acc ^ round(0, lane)).wrapping_mul(PRIME1).wrapping_add(PRIME4)
}

fn xxh64_bytes(data: &[u8]) -> u64 {
    let len = data.len();
    let mut ptr = 0;

    let mut acc = if len >= 32 {
        let mut v1 = PRIME1.wrapping_add(PRIME2);
        let mut v2 = PRIME2;
        let mut v3 = 0u64;
        let mut v4 = 0u64.wrapping_sub(PRIME1);

        while ptr + 32 <= len {
            v1 = round(v1, lane(data, ptr));
            v2 = round(v2, lane(data, ptr + 8));
            v3 = round(v3, lane(data, ptr + 16));
            v4 = round(v4, lane(data, ptr + 24));
            ptr += 32;
        }

        let mut acc = v1
            .rotate_left(1)
            .wrapping_add(v2.rotate_left(7))
            .wrapping_add(v3.rotate_left(12))
            .wrapping_add(v4.rotate_left(18));
        acc = merge_round(acc, v1);
        acc = merge_round(acc, v2);
        acc = merge_round(acc, v3);
        merge_round(acc, v4)
    } else {
        PRIME5
    };

    acc = acc.wrapping_add(len as u64);

    while ptr + 8 <= len {
        acc ^= round(0, lane(data, ptr));
        acc = acc.rotate_left(27).wrapping_mul(PRIME1).wrapping_add(PRIME4);
        ptr += 8;
    }

    if ptr + 4 <= len {
        let mut k = 0u64;
        for i in 0..4 {
            k |= (ascii_lower(data[ptr + i]) as u64) << (i * 8);
        }
        acc ^= k.wrapping_mul(PRIME1);
        acc = acc.rotate_left(23).wrapping_mul(PRIME2).wrapping_add(PRIME3);
        ptr += 4;
    }

    while ptr < len {
        acc ^= (ascii_lower(data[ptr]) as u64).wrapping_mul(PRIME5);
        acc = acc.rotate_left(11).wrapping_mul(PRIME1);
        ptr += 1;
    }

    acc ^= acc >> 33;
    acc = acc.wrapping_mul(PRIME2);
    acc ^= acc >> 29;
    acc = acc.wrapping_mul(PRIME3);
    acc ^= acc >> 32;
    acc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fnv1a32_reference_vector() {
        assert_eq!(fnv1a32("MaterialOverride"), 0x4f5a69e4);
        assert_eq!(fnv1a32("materialoverride"), 0x4f5a69e4);
    }

    #[test]
    fn fnv1a32_empty_is_offset_basis() {
        assert_eq!(fnv1a32(""), 0x811c9dc5);
    }

    #[test]
    fn xxh64_empty_reference_vector() {
        assert_eq!(xxh64(""), 0xef46db3751d8e999);
    }

    #[test]
    fn xxh64_is_case_insensitive() {
        assert_eq!(
            xxh64("ASSETS/Characters/Aatrox/Skins/Base/Aatrox.dds"),
            xxh64("assets/characters/aatrox/skins/base/aatrox.dds")
        );
        // Long enough to exercise the 32-byte stripe loop.
        let long = "Assets/".repeat(12);
        assert_eq!(xxh64(&long), xxh64(&long.to_ascii_lowercase()));
    }

    #[test]
    fn hex_forms_are_zero_padded() {
        assert_eq!(hex32(0x1a), "0000001a");
        assert_eq!(hex64(0x1a), "000000000000001a");
    }
}
