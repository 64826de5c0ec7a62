//! moshup-test-utils: Test infrastructure for moshup.
//!
//! Provides:
//! - MockDialer: scripted in-memory SSH transport with a call log
//! - TestKeys: fixed session keys and announcement text

mod mock_transport;
mod test_keys;

pub use mock_transport::{
    ExecScript, MOCK_PEER_IP, MockChannel, MockConnection, MockDialer, TransportEvent, TransportLog,
};
pub use test_keys::TestKeys;
