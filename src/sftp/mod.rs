pub mod client;
pub mod constants;
pub mod error;
pub mod interrupt;
pub mod transport;
pub mod types;
pub mod wire;

mod transfer;

#[cfg(test)]
pub mod test_utils;

pub use client::SftpConn;
pub use error::SftpError;
pub use interrupt::Interrupt;
pub use types::{Attrib, DirEntry, StatVfs};
