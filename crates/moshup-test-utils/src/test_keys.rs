//! Fixed session keys and announcement lines for deterministic tests.

use moshup_core::SessionKey;
use moshup_core::constants::MOSH_KEY_LEN;

/// Test keys and announcement text.
pub struct TestKeys;

impl TestKeys {
    /// A real key token as printed by `mosh-server`.
    pub const KEY_TOKEN: &'static str = "4NeCCgvZFe2RnPgrcU1PQw";

    /// A second key token for tests that need two sessions.
    pub const KEY_TOKEN_2: &'static str = "q83vASNFZ4mrze8BI0VniQ";

    /// The session key behind [`TestKeys::KEY_TOKEN`].
    pub fn session_key() -> SessionKey {
        Self::parse(Self::KEY_TOKEN)
    }

    /// The session key behind [`TestKeys::KEY_TOKEN_2`].
    pub fn session_key_2() -> SessionKey {
        Self::parse(Self::KEY_TOKEN_2)
    }

    /// Deterministic key from a seed byte.
    pub fn session_key_from_seed(seed: u8) -> SessionKey {
        SessionKey::from_bytes([seed; MOSH_KEY_LEN])
    }

    /// Output of a successful `mosh-server new`, including the blank line
    /// it prints first.
    pub fn announcement(port: u16) -> String {
        format!("\r\nMOSH CONNECT {} {}\r\n", port, Self::KEY_TOKEN)
    }

    fn parse(token: &str) -> SessionKey {
        match token.parse() {
            Ok(key) => key,
            Err(e) => panic!("invalid built-in test key {}: {}", token, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn built_in_keys_parse() {
        assert_eq!(TestKeys::session_key().to_base64(), TestKeys::KEY_TOKEN);
        assert_eq!(TestKeys::session_key_2().to_base64(), TestKeys::KEY_TOKEN_2);
        assert_ne!(TestKeys::session_key(), TestKeys::session_key_2());
    }

    #[test]
    fn seeded_keys_are_deterministic() {
        assert_eq!(
            TestKeys::session_key_from_seed(7),
            TestKeys::session_key_from_seed(7)
        );
        assert_ne!(
            TestKeys::session_key_from_seed(7),
            TestKeys::session_key_from_seed(8)
        );
    }

    #[test]
    fn announcement_shape() {
        let text = TestKeys::announcement(60001);
        assert!(text.contains("MOSH CONNECT 60001 4NeCCgvZFe2RnPgrcU1PQw"));
        assert!(text.ends_with('\n'));
    }
}
