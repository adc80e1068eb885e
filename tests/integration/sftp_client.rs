use rsftp::sftp::client::SftpConn;
use rsftp::sftp::constants::{DEFAULT_NUM_REQUESTS, DEFAULT_TRANSFER_BUFLEN};
use rsftp::sftp::interrupt::Interrupt;
use rsftp::sftp::transport::SharedStream;

use super::test_utils;

fn live_conn() -> SftpConn<SharedStream<ssh2::Channel>, SharedStream<ssh2::Channel>> {
    let channel = test_utils::connect_and_auth().unwrap();
    let stream = SharedStream::new(channel);
    SftpConn::init(
        stream.clone(),
        stream,
        DEFAULT_TRANSFER_BUFLEN,
        DEFAULT_NUM_REQUESTS,
        Interrupt::new(),
    )
    .unwrap()
}

#[test]
#[ignore = "requires a reachable SFTP server"]
fn live_handshake() {
    let conn = live_conn();
    assert!(conn.proto_version() >= 3);
}

#[test]
#[ignore = "requires a reachable SFTP server"]
fn live_realpath_is_absolute() {
    let mut conn = live_conn();
    let canonical = conn.realpath(".").unwrap();
    assert!(canonical.starts_with('/'));
}

#[test]
#[ignore = "requires a reachable SFTP server"]
fn live_listing_has_safe_names() {
    let mut conn = live_conn();
    let entries = conn.readdir("/").unwrap();
    assert!(!entries.is_empty());
    for entry in &entries {
        assert!(!entry.filename.is_empty());
        assert!(!entry.filename.contains('/'));
    }
}
