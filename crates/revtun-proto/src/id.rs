//! Data-channel id generation.

use rand::Rng;

/// Generate a random channel id: 16 random bytes, hex-encoded.
///
/// Collisions within a single flush epoch are astronomically unlikely; the
/// pool does not need to guard against them beyond the `HashMap` overwrite
/// that a collision would otherwise cause.
pub fn generate_channel_id() -> String {
    let mut rng = rand::thread_rng();
    let bytes: [u8; 16] = rng.gen();
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_32_hex_chars() {
        let id = generate_channel_id();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn generates_distinct_ids() {
        let a = generate_channel_id();
        let b = generate_channel_id();
        assert_ne!(a, b);
    }
}
