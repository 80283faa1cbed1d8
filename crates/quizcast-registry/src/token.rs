use rand::Rng;

/// Generates a 128-bit random token as a 32-character lowercase hex string.
///
/// Used for reconnect tokens and generated host tokens.
pub fn generate_token() -> String {
    let bytes: [u8; 16] = rand::rng().random();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_token_is_32_hex_chars() {
        let token = generate_token();
        assert_eq!(token.len(), 32);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_generate_token_differs_between_calls() {
        assert_ne!(generate_token(), generate_token());
    }
}
