//! Property-based tests for the announcement parser.
//!
//! - Well-formed lines parse back to the same port and key
//! - Arbitrary bytes never panic the parser
//! - Malformed lines are rejected deterministically

#![cfg(test)]

use proptest::prelude::*;

use super::announcement::{
    AnnouncementError, PartialAnnouncement, SessionKey, contains_announcement,
};
use crate::constants::MOSH_KEY_LEN;

prop_compose! {
    fn arb_key()(bytes in any::<[u8; MOSH_KEY_LEN]>()) -> SessionKey {
        SessionKey::from_bytes(bytes)
    }
}

proptest! {
    #[test]
    fn well_formed_line_roundtrips(port in any::<u16>(), key in arb_key()) {
        let line = format!("MOSH CONNECT {} {}", port, key.to_base64());
        let parsed = PartialAnnouncement::parse(line.as_bytes()).unwrap();
        prop_assert_eq!(parsed.udp_port, port);
        prop_assert_eq!(parsed.key, key);
    }

    #[test]
    fn surrounding_whitespace_is_tolerated(
        port in any::<u16>(),
        key in arb_key(),
        lead in "[ \t\r\n]{0,4}",
        trail in "[ \t\r\n]{0,4}",
    ) {
        let raw = format!("{}MOSH CONNECT {} {}{}", lead, port, key.to_base64(), trail);
        let parsed = PartialAnnouncement::parse(raw.as_bytes()).unwrap();
        prop_assert_eq!(parsed.udp_port, port);
    }

    #[test]
    fn arbitrary_bytes_never_panic(data in prop::collection::vec(any::<u8>(), 0..2048)) {
        let first = PartialAnnouncement::parse(&data);
        let second = PartialAnnouncement::parse(&data);
        prop_assert_eq!(first, second);
        let _ = contains_announcement(&data);
    }

    #[test]
    fn out_of_range_port_rejected(port in 65536u32..100_000, key in arb_key()) {
        let line = format!("MOSH CONNECT {} {}", port, key.to_base64());
        let is_invalid_port = matches!(
            PartialAnnouncement::parse_line(&line),
            Err(AnnouncementError::InvalidPort { .. })
        );
        prop_assert!(is_invalid_port);
    }

    #[test]
    fn non_numeric_port_rejected(port in "[A-Za-z+-][A-Za-z0-9]{0,4}", key in arb_key()) {
        let line = format!("MOSH CONNECT {} {}", port, key.to_base64());
        let is_invalid_port = matches!(
            PartialAnnouncement::parse_line(&line),
            Err(AnnouncementError::InvalidPort { .. })
        );
        prop_assert!(is_invalid_port);
    }

    #[test]
    fn wrong_leading_token_rejected(
        word in "[A-Z]{1,8}".prop_filter("must differ from MOSH", |w| w != "MOSH"),
        port in any::<u16>(),
        key in arb_key(),
    ) {
        let line = format!("{} CONNECT {} {}", word, port, key.to_base64());
        let is_unexpected = matches!(
            PartialAnnouncement::parse(line.as_bytes()),
            Err(AnnouncementError::UnexpectedLine { .. })
        );
        prop_assert!(is_unexpected);
    }

    #[test]
    fn truncated_line_rejected(port in any::<u16>(), key in arb_key(), cut in 0usize..22) {
        let token = key.to_base64();
        let line = format!("MOSH CONNECT {} {}", port, &token[..cut]);
        prop_assert!(PartialAnnouncement::parse_line(&line).is_err());
    }
}
