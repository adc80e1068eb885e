use thiserror::Error;

use super::constants::*;

#[derive(Debug, Error)]
pub enum SftpError {
    #[error("Connection closed")]
    ConnectionClosed,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("protocol violation: {0}")]
    Protocol(String),
    #[error("connection unusable after an earlier protocol error")]
    Poisoned,
    #[error("server error: {}", fx2txt(*.code))]
    Server { code: u32 },
    #[error("{0} is not a regular file")]
    NotRegular(String),
    #[error("{0} is not a directory")]
    NotADirectory(String),
}

impl SftpError {
    /// The raw SFTP status code, when the server reported one.
    pub fn status_code(&self) -> Option<u32> {
        match self {
            SftpError::Server { code } => Some(*code),
            _ => None,
        }
    }
}

/// Human-readable rendering of an SFTP status code.
pub fn fx2txt(status: u32) -> &'static str {
    match status {
        SSH2_FX_OK => "No error",
        SSH2_FX_EOF => "End of file",
        SSH2_FX_NO_SUCH_FILE => "No such file or directory",
        SSH2_FX_PERMISSION_DENIED => "Permission denied",
        SSH2_FX_FAILURE => "Failure",
        SSH2_FX_BAD_MESSAGE => "Bad message",
        SSH2_FX_NO_CONNECTION => "No connection",
        SSH2_FX_CONNECTION_LOST => "Connection lost",
        SSH2_FX_OP_UNSUPPORTED => "Operation unsupported",
        _ => "Unknown status",
    }
}
