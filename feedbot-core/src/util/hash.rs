use sha3::digest::{ExtendableOutput, Update, XofReader};
use sha3::Shake128;

/// Compact 64-bit content identity: shake-128 digest truncated to 8 bytes,
/// read as a signed big-endian integer. Used only to tell content apart, not
/// for anything cryptographic.
pub fn content_id(data: &[u8]) -> i64 {
    let mut hasher = Shake128::default();
    hasher.update(data);
    let mut reader = hasher.finalize_xof();
    let mut buf = [0u8; 8];
    reader.read(&mut buf);
    i64::from_be_bytes(buf)
}

#[cfg(test)]
mod tests {
    use super::content_id;

    #[test]
    fn stable_and_distinct() {
        assert_eq!(content_id(b"abc"), content_id(b"abc"));
        assert_ne!(content_id(b"abc"), content_id(b"abd"));
        assert_ne!(content_id(b""), content_id(b"abc"));
    }
}
