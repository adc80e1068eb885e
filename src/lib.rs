pub mod sftp;

pub use sftp::client::SftpConn;
pub use sftp::error::SftpError;
pub use sftp::interrupt::Interrupt;
