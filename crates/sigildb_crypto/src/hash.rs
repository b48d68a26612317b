//! Hash primitives.

/// Length of a full hash output.
pub const HASH_LEN: usize = 32;

/// Hashes `data` with BLAKE3.
#[must_use]
pub fn hash(data: &[u8]) -> [u8; HASH_LEN] {
    *blake3::hash(data).as_bytes()
}

/// Keyed BLAKE3 hash of `data`.
#[must_use]
pub fn keyed_hash(key: &[u8; HASH_LEN], data: &[u8]) -> [u8; HASH_LEN] {
    *blake3::keyed_hash(key, data).as_bytes()
}

/// Returns the first `N` bytes of `hash(data)`.
#[must_use]
pub fn hash_prefix<const N: usize>(data: &[u8]) -> [u8; N] {
    let full = hash(data);
    let mut out = [0u8; N];
    out.copy_from_slice(&full[..N]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_matches_full_hash() {
        let full = hash(b"sigil");
        let short: [u8; 8] = hash_prefix(b"sigil");
        assert_eq!(&full[..8], &short);
    }

    #[test]
    fn hash_is_blake3() {
        assert_eq!(
            hex(&hash(b"")),
            "af1349b9f5f9a1a6a0404dea36dcc9499bcb25c9adc112b7cc9a93cae41f3262"
        );
    }

    fn hex(bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("{b:02x}")).collect()
    }

    #[test]
    fn keyed_hash_depends_on_key() {
        assert_ne!(keyed_hash(&[1; 32], b"x"), keyed_hash(&[2; 32], b"x"));
    }
}
