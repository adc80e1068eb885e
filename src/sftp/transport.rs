use log::{error, info};
use std::cell::RefCell;
use std::io::{self, IoSlice, Read, Write};
use std::rc::Rc;

use super::constants::SFTP_MAX_MSG_LENGTH;
use super::error::SftpError;
use super::wire::PacketBuf;

/// Frames an assembled message body: 4-byte big-endian length, then the
/// body, written as one vectored write retried until complete. The body
/// buffer is cleared on success so it can be reused.
pub fn send_packet<W: Write>(out: &mut W, buf: &mut PacketBuf) -> Result<(), SftpError> {
    if buf.len() > SFTP_MAX_MSG_LENGTH as usize {
        return Err(SftpError::Protocol(format!(
            "outbound message too long {}",
            buf.len()
        )));
    }

    let mlen = (buf.len() as u32).to_be_bytes();
    write_all_vectored(out, &mlen, buf.as_slice())?;
    out.flush()?;

    buf.clear();
    Ok(())
}

fn write_all_vectored<W: Write>(out: &mut W, head: &[u8], body: &[u8]) -> io::Result<()> {
    let total = head.len() + body.len();
    let mut written = 0;

    while written < total {
        let iov = if written < head.len() {
            [IoSlice::new(&head[written..]), IoSlice::new(body)]
        } else {
            [IoSlice::new(&[]), IoSlice::new(&body[written - head.len()..])]
        };
        let n = out.write_vectored(&iov)?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                "failed to write whole packet",
            ));
        }
        written += n;
    }
    Ok(())
}

/// Reads one framed message into `msg`: exactly 4 length bytes, then
/// exactly that many body bytes. Oversized frames are a protocol
/// violation; a closed peer surfaces as `ConnectionClosed`.
pub fn recv_packet<R: Read>(input: &mut R, msg: &mut Vec<u8>) -> Result<(), SftpError> {
    let mut mlen = [0u8; 4];
    read_exact_or_closed(input, &mut mlen)?;

    let msg_len = u32::from_be_bytes(mlen);
    if msg_len > SFTP_MAX_MSG_LENGTH {
        return Err(SftpError::Protocol(format!(
            "received message too long {msg_len}"
        )));
    }

    msg.clear();
    msg.resize(msg_len as usize, 0);
    read_exact_or_closed(input, msg)?;
    Ok(())
}

fn read_exact_or_closed<R: Read>(input: &mut R, buf: &mut [u8]) -> Result<(), SftpError> {
    match input.read_exact(buf) {
        Ok(()) => Ok(()),
        Err(e)
            if e.kind() == io::ErrorKind::UnexpectedEof
                || e.kind() == io::ErrorKind::BrokenPipe =>
        {
            info!("Connection closed");
            Err(SftpError::ConnectionClosed)
        }
        Err(e) => {
            error!("Couldn't read packet: {e}");
            Err(SftpError::Io(e))
        }
    }
}

/// Splits one duplex stream (an `ssh2::Channel`, a mock server) into the
/// reader and writer halves `SftpConn` expects. The engine is strictly
/// single-threaded, so runtime borrow conflicts cannot occur.
pub struct SharedStream<S>(pub Rc<RefCell<S>>);

impl<S> SharedStream<S> {
    pub fn new(stream: S) -> Self {
        Self(Rc::new(RefCell::new(stream)))
    }
}

impl<S> Clone for SharedStream<S> {
    fn clone(&self) -> Self {
        Self(Rc::clone(&self.0))
    }
}

impl<S: Read> Read for SharedStream<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.borrow_mut().read(buf)
    }
}

impl<S: Write> Write for SharedStream<S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.borrow_mut().flush()
    }
}
