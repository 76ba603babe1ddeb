//! Bob Jenkins' 64-bit `lookup8` hash, applied to the fixed-size padded
//! directory-name buffer used by the VMFS6 directory hash table (spec.md
//! §4.6). Ported from the public-domain `lookup8` mixing function (as
//! surfaced by `dissect.util.hash.jenkins.lookup8_quads`, referenced but not
//! vendored in the retrieval pack this was built against); the "quads"
//! variant processes the key purely in 8-byte words with no partial-byte
//! tail, which is all the fixed 256-byte padded key ever needs.

const GOLDEN_RATIO: u64 = 0x9E37_79B9_7F4A_7C13;

fn mix(mut a: u64, mut b: u64, mut c: u64) -> (u64, u64, u64) {
    a = a.wrapping_sub(b).wrapping_sub(c);
    a ^= c >> 43;
    b = b.wrapping_sub(c).wrapping_sub(a);
    b ^= a << 9;
    c = c.wrapping_sub(a).wrapping_sub(b);
    c ^= b >> 8;
    a = a.wrapping_sub(b).wrapping_sub(c);
    a ^= c >> 38;
    b = b.wrapping_sub(c).wrapping_sub(a);
    b ^= a << 23;
    c = c.wrapping_sub(a).wrapping_sub(b);
    c ^= b >> 5;
    a = a.wrapping_sub(b).wrapping_sub(c);
    a ^= c >> 35;
    b = b.wrapping_sub(c).wrapping_sub(a);
    b ^= a << 49;
    c = c.wrapping_sub(a).wrapping_sub(b);
    c ^= b >> 11;
    a = a.wrapping_sub(b).wrapping_sub(c);
    a ^= c >> 12;
    b = b.wrapping_sub(c).wrapping_sub(a);
    b ^= a << 18;
    c = c.wrapping_sub(a).wrapping_sub(b);
    c ^= b >> 22;
    (a, b, c)
}

/// `data.len()` must be a multiple of 8. `seed` becomes the initial `a`/`b`
/// state; `c` is seeded from the key's byte length, per spec.md §4.6.
pub fn lookup8_quads(data: &[u8], seed: u64) -> u64 {
    debug_assert_eq!(data.len() % 8, 0);
    let quads: Vec<u64> = data
        .chunks_exact(8)
        .map(|chunk| u64::from_le_bytes(chunk.try_into().unwrap()))
        .collect();

    let mut a = seed;
    let mut b = seed;
    let mut c = data.len() as u64;

    let mut i = 0;
    while quads.len() - i >= 3 {
        a = a.wrapping_add(quads[i]);
        b = b.wrapping_add(quads[i + 1]);
        c = c.wrapping_add(quads[i + 2]);
        let (na, nb, nc) = mix(a, b, c);
        a = na;
        b = nb;
        c = nc;
        i += 3;
    }

    match quads.len() - i {
        2 => {
            b = b.wrapping_add(quads[i + 1]);
            a = a.wrapping_add(quads[i]);
        }
        1 => {
            a = a.wrapping_add(quads[i]);
        }
        _ => {}
    }
    let (_, _, c) = mix(a, b, c);
    c
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_input_hashes_identically() {
        let buf = [0u8; 256];
        assert_eq!(lookup8_quads(&buf, 42), lookup8_quads(&buf, 42));
    }

    #[test]
    fn different_names_usually_hash_differently() {
        let mut a = [0u8; 256];
        let mut b = [0u8; 256];
        a[0] = b'x';
        b[0] = b'y';
        assert_ne!(lookup8_quads(&a, 42), lookup8_quads(&b, 42));
    }
}
