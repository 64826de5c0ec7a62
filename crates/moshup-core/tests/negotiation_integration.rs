//! End-to-end negotiation tests over the mock transport: fast path,
//! fallback, cancellation and connection teardown.

use std::net::{IpAddr, Ipv6Addr};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use moshup_core::bootstrap::RemoteEndpoint;
use moshup_core::error::Error;
use moshup_core::negotiate::Negotiator;
use moshup_core::params::{ClientParameters, HostConfig, NegotiationConfig, UdpPortSpec};
use moshup_test_utils::{ExecScript, MOCK_PEER_IP, MockDialer, TestKeys, TransportLog};

fn host() -> HostConfig {
    HostConfig::new("build.example.com", "alice")
}

fn negotiator(dialer: MockDialer) -> (Negotiator, TransportLog) {
    let log = dialer.log();
    (
        Negotiator::new(Arc::new(dialer), NegotiationConfig::default()),
        log,
    )
}

/// Wait until the spawned negotiation has issued `n` exec requests.
async fn wait_for_execs(log: &TransportLog, n: usize) {
    timeout(Duration::from_secs(5), async {
        while log.execs().len() < n {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("negotiation never reached exec");
}

// =============================================================================
// Normal Path
// =============================================================================

#[tokio::test]
async fn negotiates_over_ssh_and_backfills_peer_ip() {
    let peer = IpAddr::V6(Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 7));
    let dialer = MockDialer::new()
        .with_peer_ip(peer)
        .exec(ExecScript::output(TestKeys::announcement(60001)));
    let (negotiator, log) = negotiator(dialer);

    let announcement = negotiator
        .negotiate(&ClientParameters::default(), &host(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(announcement.remote, RemoteEndpoint::Ip(peer));
    assert_eq!(announcement.udp_port, 60001);
    assert_eq!(announcement.key, TestKeys::session_key());
    assert_eq!(log.dials(), 1);
    assert_eq!(
        log.execs(),
        ["mosh-server new -s -c 256 -l LC_ALL=en_US.UTF-8"]
    );
    assert_eq!(log.disconnects(), 1);
    assert_eq!(log.open_channels(), 0);
}

#[tokio::test]
async fn server_command_reflects_parameters() {
    let dialer = MockDialer::new().exec(ExecScript::output(TestKeys::announcement(60010)));
    let (negotiator, log) = negotiator(dialer);
    let params = ClientParameters::builder()
        .server_path("~/bin/mosh-server")
        .udp_port(UdpPortSpec::Range(60010, 60020))
        .colors(16)
        .remote_command(["tmux", "attach"])
        .build();

    negotiator
        .negotiate(&params, &host(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        log.execs(),
        ["~/bin/mosh-server new -s -c 16 -l LC_ALL=en_US.UTF-8 -p 60010:60020 -- tmux attach"]
    );
}

#[tokio::test]
async fn falls_back_to_pushed_server() {
    let mut binary = tempfile::NamedTempFile::new().unwrap();
    std::io::Write::write_all(&mut binary, b"\x7fELF static mosh-server").unwrap();

    let dialer = MockDialer::new()
        .exec(ExecScript::not_found())
        .exec(ExecScript::exit(0))
        .exec(ExecScript::output(TestKeys::announcement(60001)));
    let (negotiator, log) = negotiator(dialer);
    let params = ClientParameters::builder()
        .static_server(binary.path())
        .build();

    let announcement = negotiator
        .negotiate(&params, &host(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(announcement.remote, RemoteEndpoint::Ip(MOCK_PEER_IP));
    assert_eq!(log.execs().len(), 3);
    assert_eq!(log.disconnects(), 1);
}

#[tokio::test]
async fn exhaustion_disconnects() {
    let dialer = MockDialer::new().exec(ExecScript::not_found());
    let (negotiator, log) = negotiator(dialer);

    let err = negotiator
        .negotiate(&ClientParameters::default(), &host(), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::StrategyExhausted { .. }));
    assert!(!err.is_cancelled());
    assert_eq!(log.disconnects(), 1);
}

// =============================================================================
// Transport Errors
// =============================================================================

#[tokio::test]
async fn exec_rejection_is_fatal_even_with_fallback_available() {
    let mut binary = tempfile::NamedTempFile::new().unwrap();
    std::io::Write::write_all(&mut binary, b"binary").unwrap();

    let dialer = MockDialer::new()
        .exec(ExecScript::reject("exec rejected"))
        .exec(ExecScript::exit(0));
    let (negotiator, log) = negotiator(dialer);
    let params = ClientParameters::builder()
        .static_server(binary.path())
        .build();

    let err = negotiator
        .negotiate(&params, &host(), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Transport { .. }));
    assert_eq!(err.to_string(), "transport error: exec rejected");
    assert_eq!(log.execs().len(), 1);
    assert_eq!(log.disconnects(), 1);
}

#[tokio::test]
async fn dial_failure_is_surfaced() {
    let (negotiator, log) = negotiator(MockDialer::new().fail_auth());

    let err = negotiator
        .negotiate(&ClientParameters::default(), &host(), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::AuthenticationFailed));
    assert!(log.execs().is_empty());
    assert_eq!(log.disconnects(), 0);
}

// =============================================================================
// Pre-shared Key
// =============================================================================

#[tokio::test]
async fn preshared_key_never_dials() {
    let (negotiator, log) = negotiator(MockDialer::new().fail_dial("no network"));
    let params = ClientParameters::builder()
        .pre_shared_key(TestKeys::session_key())
        .udp_port(UdpPortSpec::Single(60001))
        .build();

    let announcement = negotiator
        .negotiate(&params, &host(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        announcement.remote,
        RemoteEndpoint::Host("build.example.com".into())
    );
    assert_eq!(log.dials(), 0);
}

#[tokio::test]
async fn preshared_key_without_port_fails_before_network() {
    let (negotiator, log) = negotiator(MockDialer::new());
    let params = ClientParameters::builder()
        .pre_shared_key(TestKeys::session_key())
        .build();

    let err = negotiator
        .negotiate(&params, &host(), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Configuration { .. }));
    assert!(err.is_fatal());
    assert!(log.events().is_empty());
}

// =============================================================================
// Cancellation
// =============================================================================

#[tokio::test]
async fn cancel_mid_read_releases_channel() {
    let dialer = MockDialer::new()
        .exec(ExecScript::Hang)
        .exec(ExecScript::output(TestKeys::announcement(60001)));
    let (negotiator, log) = negotiator(dialer);

    let handle = negotiator.spawn(ClientParameters::default(), host());
    wait_for_execs(&log, 1).await;
    assert_eq!(log.open_channels(), 1);

    handle.abort();
    let err = handle.outcome().await.unwrap_err();

    assert!(err.is_cancelled());
    assert_eq!(err.to_string(), "negotiation cancelled");
    assert_eq!(log.execs().len(), 1);
    assert_eq!(log.open_channels(), 0);
    assert_eq!(log.disconnects(), 1);
}

#[tokio::test]
async fn cancel_during_dial() {
    let (negotiator, log) = negotiator(MockDialer::new().hang_dial());

    let handle = negotiator.spawn(ClientParameters::default(), host());
    timeout(Duration::from_secs(5), async {
        while log.dials() == 0 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();

    let token = handle.cancel_token();
    std::thread::spawn(move || token.cancel()).join().unwrap();

    let err = handle.outcome().await.unwrap_err();
    assert!(err.is_cancelled());
    assert!(log.execs().is_empty());
}

#[tokio::test]
async fn cancel_after_success_has_no_effect() {
    let dialer = MockDialer::new().exec(ExecScript::output(TestKeys::announcement(60001)));
    let (negotiator, _log) = negotiator(dialer);
    let cancel = CancellationToken::new();

    let outcome = negotiator
        .negotiate(&ClientParameters::default(), &host(), &cancel)
        .await;
    cancel.cancel();

    assert_eq!(outcome.unwrap().udp_port, 60001);
}

#[tokio::test]
async fn concurrent_negotiations_are_independent() {
    let (first, first_log) = negotiator(
        MockDialer::new().exec(ExecScript::output(TestKeys::announcement(60001))),
    );
    let (second, second_log) = negotiator(MockDialer::new().exec(ExecScript::Hang));

    let a = first.spawn(ClientParameters::default(), host());
    let b = second.spawn(ClientParameters::default(), host());
    wait_for_execs(&second_log, 1).await;
    b.abort();

    assert_eq!(a.outcome().await.unwrap().udp_port, 60001);
    assert!(b.outcome().await.unwrap_err().is_cancelled());
    assert_eq!(first_log.disconnects(), 1);
    assert_eq!(second_log.disconnects(), 1);
}
