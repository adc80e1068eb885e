use ssh2::{Channel, Session};
use std::net::TcpStream;

/// Connects and authenticates against the test server, returning a channel
/// with the sftp subsystem started. Server coordinates come from the
/// RSFTP_TEST_* environment variables, defaulting to the public rebex demo
/// account.
pub fn connect_and_auth() -> Result<Channel, Box<dyn std::error::Error>> {
    let addr = std::env::var("RSFTP_TEST_ADDR").unwrap_or_else(|_| "test.rebex.net:22".to_string());
    let user = std::env::var("RSFTP_TEST_USER").unwrap_or_else(|_| "demo".to_string());
    let password =
        std::env::var("RSFTP_TEST_PASSWORD").unwrap_or_else(|_| "password".to_string());

    let tcp = TcpStream::connect(addr)?;
    let mut session = Session::new()?;
    session.set_tcp_stream(tcp);
    session.handshake()?;
    session.userauth_password(&user, &password)?;
    if !session.authenticated() {
        return Err("Authentication failed".into());
    }

    let mut channel = session.channel_session()?;
    channel.subsystem("sftp")?;
    Ok(channel)
}
