use log::{debug, error, info};
use std::io::{Read, Write};

use super::constants::*;
use super::error::{fx2txt, SftpError};
use super::interrupt::Interrupt;
use super::transport::{recv_packet, send_packet};
use super::types::{Attrib, DirEntry, StatVfs};
use super::wire::{PacketBuf, PacketReader};

/// A live SFTP connection over a pre-established stream pair. How the
/// streams were obtained (an SSH channel, a subprocess, a mock) is the
/// caller's business; the engine only reads and writes framed messages.
///
/// A connection must not be shared between concurrent callers: the request
/// id space and the streams are one serialization domain, which exclusive
/// `&mut self` access enforces.
pub struct SftpConn<R: Read, W: Write> {
    input: R,
    output: W,
    pub(crate) version: u32,
    pub(crate) transfer_buflen: u32,
    pub(crate) num_requests: u32,
    pub(crate) msg_id: u32,
    pub(crate) exts: u32,
    pub(crate) interrupt: Interrupt,
    pub(crate) poisoned: bool,
}

impl<R: Read, W: Write> SftpConn<R, W> {
    /// Performs the INIT/VERSION handshake and returns the negotiated
    /// connection. `transfer_buflen` bounds the payload of each READ/WRITE
    /// request; `num_requests` bounds the pipeline depth of bulk transfers.
    pub fn init(
        input: R,
        output: W,
        transfer_buflen: u32,
        num_requests: u32,
        interrupt: Interrupt,
    ) -> Result<Self, SftpError> {
        let mut conn = SftpConn {
            input,
            output,
            version: 0,
            transfer_buflen,
            num_requests,
            msg_id: 1,
            exts: 0,
            interrupt,
            poisoned: false,
        };

        // INIT is the one message whose body carries no request id
        let mut msg = PacketBuf::new();
        msg.put_u8(SSH2_FXP_INIT);
        msg.put_u32(SFTP_PROTOCOL_VERSION);
        conn.send_msg(&mut msg)?;

        let reply = conn.recv_msg()?;
        let mut r = PacketReader::new(&reply);
        let msg_type = conn.guard(r.get_u8())?;
        if msg_type != SSH2_FXP_VERSION {
            return Err(conn.protocol_error(format!(
                "invalid packet back from SSH2_FXP_INIT (type {msg_type})"
            )));
        }
        conn.version = conn.guard(r.get_u32())?;
        debug!("Remote version: {}", conn.version);

        // The rest of the VERSION body is (name, value) extension pairs
        while r.remaining() > 0 {
            let name = conn.guard(r.get_string())?;
            let value = conn.guard(r.get_string())?;
            let known = match (name.as_str(), value.as_str()) {
                (EXT_POSIX_RENAME, "1") => {
                    conn.exts |= SFTP_EXT_POSIX_RENAME;
                    true
                }
                (EXT_STATVFS, "2") => {
                    conn.exts |= SFTP_EXT_STATVFS;
                    true
                }
                (EXT_FSTATVFS, "2") => {
                    conn.exts |= SFTP_EXT_FSTATVFS;
                    true
                }
                _ => false,
            };
            if known {
                debug!("Server supports extension \"{name}\" revision {value}");
            } else {
                debug!("Unrecognised server extension \"{name}\"");
            }
        }

        // Some filexfer v.0 servers don't support large packets
        if conn.version == 0 {
            conn.transfer_buflen = conn.transfer_buflen.min(LEGACY_TRANSFER_BUFLEN);
        }

        Ok(conn)
    }

    pub fn proto_version(&self) -> u32 {
        self.version
    }

    pub fn transfer_buflen(&self) -> u32 {
        self.transfer_buflen
    }

    pub fn num_requests(&self) -> u32 {
        self.num_requests
    }

    pub fn has_posix_rename(&self) -> bool {
        self.exts & SFTP_EXT_POSIX_RENAME != 0
    }

    pub(crate) fn next_id(&mut self) -> u32 {
        let id = self.msg_id;
        self.msg_id = self.msg_id.wrapping_add(1);
        id
    }

    pub(crate) fn check_usable(&self) -> Result<(), SftpError> {
        if self.poisoned {
            Err(SftpError::Poisoned)
        } else {
            Ok(())
        }
    }

    /// Records a terminal protocol violation. The stream can no longer be
    /// trusted to be request/reply aligned, so every later operation fails
    /// fast with `Poisoned`.
    pub(crate) fn protocol_error(&mut self, what: String) -> SftpError {
        error!("{what}");
        self.poisoned = true;
        SftpError::Protocol(what)
    }

    /// Marks the connection unusable and passes the error through; used
    /// when an operation stops while the server still owes replies.
    pub(crate) fn abandon(&mut self, e: SftpError) -> SftpError {
        self.poisoned = true;
        e
    }

    /// Poisons the connection when a result carries a protocol violation,
    /// leaving other error kinds untouched.
    pub(crate) fn guard<T>(&mut self, res: Result<T, SftpError>) -> Result<T, SftpError> {
        if let Err(SftpError::Protocol(_)) = &res {
            self.poisoned = true;
        }
        res
    }

    pub(crate) fn send_msg(&mut self, msg: &mut PacketBuf) -> Result<(), SftpError> {
        match send_packet(&mut self.output, msg) {
            Err(SftpError::Protocol(what)) => Err(self.protocol_error(what)),
            other => other,
        }
    }

    pub(crate) fn recv_msg(&mut self) -> Result<Vec<u8>, SftpError> {
        let mut msg = Vec::new();
        match recv_packet(&mut self.input, &mut msg) {
            Ok(()) => Ok(msg),
            Err(SftpError::Protocol(what)) => Err(self.protocol_error(what)),
            Err(e) => Err(e),
        }
    }

    fn send_string_request(&mut self, id: u32, code: u8, s: &[u8]) -> Result<(), SftpError> {
        let mut msg = PacketBuf::request(code, id);
        msg.put_bytes(s);
        self.send_msg(&mut msg)?;
        debug!("Sent message T:{code} I:{id}");
        Ok(())
    }

    fn send_string_attrs_request(
        &mut self,
        id: u32,
        code: u8,
        s: &[u8],
        a: &Attrib,
    ) -> Result<(), SftpError> {
        let mut msg = PacketBuf::request(code, id);
        msg.put_bytes(s);
        a.encode(&mut msg);
        self.send_msg(&mut msg)?;
        debug!("Sent message T:{code} I:{id}");
        Ok(())
    }

    /// Reads one reply for `expected_id` and returns its raw status code.
    pub(crate) fn expect_status(&mut self, expected_id: u32) -> Result<u32, SftpError> {
        let reply = self.recv_msg()?;
        self.guard(parse_status(&reply, expected_id))
    }

    fn status_result(&mut self, id: u32, what: &str) -> Result<(), SftpError> {
        let status = self.expect_status(id)?;
        if status != SSH2_FX_OK {
            error!("{what}: {}", fx2txt(status));
            return Err(SftpError::Server { code: status });
        }
        Ok(())
    }

    pub(crate) fn expect_handle(&mut self, expected_id: u32) -> Result<Vec<u8>, SftpError> {
        let reply = self.recv_msg()?;
        self.guard(parse_handle(&reply, expected_id))
    }

    fn expect_attrs(&mut self, expected_id: u32, quiet: bool) -> Result<Attrib, SftpError> {
        let reply = self.recv_msg()?;
        self.guard(parse_attrs(&reply, expected_id, quiet))
    }

    fn expect_statvfs(&mut self, expected_id: u32, quiet: bool) -> Result<StatVfs, SftpError> {
        let reply = self.recv_msg()?;
        self.guard(parse_statvfs(&reply, expected_id, quiet))
    }

    /// Closes a server-issued handle.
    pub fn close(&mut self, handle: &[u8]) -> Result<(), SftpError> {
        self.check_usable()?;
        let id = self.next_id();
        let mut msg = PacketBuf::request(SSH2_FXP_CLOSE, id);
        msg.put_bytes(handle);
        self.send_msg(&mut msg)?;
        debug!("Sent message SSH2_FXP_CLOSE I:{id}");
        self.status_result(id, "Couldn't close file")
    }

    pub fn remove(&mut self, path: &str) -> Result<(), SftpError> {
        self.check_usable()?;
        debug!("Sending SSH2_FXP_REMOVE \"{path}\"");
        let id = self.next_id();
        self.send_string_request(id, SSH2_FXP_REMOVE, path.as_bytes())?;
        self.status_result(id, "Couldn't delete file")
    }

    pub fn mkdir(&mut self, path: &str, a: &Attrib) -> Result<(), SftpError> {
        self.check_usable()?;
        let id = self.next_id();
        self.send_string_attrs_request(id, SSH2_FXP_MKDIR, path.as_bytes(), a)?;
        self.status_result(id, "Couldn't create directory")
    }

    pub fn rmdir(&mut self, path: &str) -> Result<(), SftpError> {
        self.check_usable()?;
        let id = self.next_id();
        self.send_string_request(id, SSH2_FXP_RMDIR, path.as_bytes())?;
        self.status_result(id, "Couldn't remove directory")
    }

    /// Stats `path`, following symlinks. With `quiet` the failure is logged
    /// at debug level instead of error.
    pub fn stat(&mut self, path: &str, quiet: bool) -> Result<Attrib, SftpError> {
        self.check_usable()?;
        let id = self.next_id();
        let code = if self.version == 0 {
            SSH2_FXP_STAT_VERSION_0
        } else {
            SSH2_FXP_STAT
        };
        self.send_string_request(id, code, path.as_bytes())?;
        self.expect_attrs(id, quiet)
    }

    /// Stats `path` without following symlinks. Protocol v0 has no lstat;
    /// those servers get a plain stat.
    pub fn lstat(&mut self, path: &str, quiet: bool) -> Result<Attrib, SftpError> {
        self.check_usable()?;
        if self.version == 0 {
            if quiet {
                debug!("Server version does not support lstat operation");
            } else {
                info!("Server version does not support lstat operation");
            }
            return self.stat(path, quiet);
        }
        let id = self.next_id();
        self.send_string_request(id, SSH2_FXP_LSTAT, path.as_bytes())?;
        self.expect_attrs(id, quiet)
    }

    /// Stats an open handle.
    pub fn fstat(&mut self, handle: &[u8], quiet: bool) -> Result<Attrib, SftpError> {
        self.check_usable()?;
        let id = self.next_id();
        self.send_string_request(id, SSH2_FXP_FSTAT, handle)?;
        self.expect_attrs(id, quiet)
    }

    pub fn setstat(&mut self, path: &str, a: &Attrib) -> Result<(), SftpError> {
        self.check_usable()?;
        let id = self.next_id();
        self.send_string_attrs_request(id, SSH2_FXP_SETSTAT, path.as_bytes(), a)?;
        self.status_result(id, &format!("Couldn't setstat on \"{path}\""))
    }

    pub fn fsetstat(&mut self, handle: &[u8], a: &Attrib) -> Result<(), SftpError> {
        self.check_usable()?;
        let id = self.next_id();
        self.send_string_attrs_request(id, SSH2_FXP_FSETSTAT, handle, a)?;
        self.status_result(id, "Couldn't fsetstat")
    }

    /// Canonicalizes `path` on the server.
    pub fn realpath(&mut self, path: &str) -> Result<String, SftpError> {
        self.check_usable()?;
        let id = self.next_id();
        self.send_string_request(id, SSH2_FXP_REALPATH, path.as_bytes())?;
        let reply = self.recv_msg()?;
        let filename = self.guard(parse_single_name(&reply, id, "SSH2_FXP_REALPATH"))?;
        debug!("SSH2_FXP_REALPATH {path} -> {filename}");
        Ok(filename)
    }

    /// Renames `oldpath` to `newpath`, through posix-rename@openssh.com
    /// when the server advertised it. Atomicity is the server's problem.
    pub fn rename(&mut self, oldpath: &str, newpath: &str) -> Result<(), SftpError> {
        self.check_usable()?;
        let id = self.next_id();
        let mut msg = if self.has_posix_rename() {
            let mut msg = PacketBuf::request(SSH2_FXP_EXTENDED, id);
            msg.put_cstring(EXT_POSIX_RENAME);
            msg
        } else {
            PacketBuf::request(SSH2_FXP_RENAME, id)
        };
        msg.put_cstring(oldpath);
        msg.put_cstring(newpath);
        self.send_msg(&mut msg)?;
        debug!(
            "Sent message {} \"{oldpath}\" -> \"{newpath}\"",
            if self.has_posix_rename() {
                EXT_POSIX_RENAME
            } else {
                "SSH2_FXP_RENAME"
            }
        );
        self.status_result(
            id,
            &format!("Couldn't rename file \"{oldpath}\" to \"{newpath}\""),
        )
    }

    /// Creates a symlink at `linkpath` pointing to `target`.
    pub fn symlink(&mut self, target: &str, linkpath: &str) -> Result<(), SftpError> {
        self.check_usable()?;
        if self.version < 3 {
            error!("This server does not support the symlink operation");
            return Err(SftpError::Server {
                code: SSH2_FX_OP_UNSUPPORTED,
            });
        }
        let id = self.next_id();
        let mut msg = PacketBuf::request(SSH2_FXP_SYMLINK, id);
        msg.put_cstring(target);
        msg.put_cstring(linkpath);
        self.send_msg(&mut msg)?;
        debug!("Sent message SSH2_FXP_SYMLINK \"{target}\" -> \"{linkpath}\"");
        self.status_result(
            id,
            &format!("Couldn't symlink file \"{target}\" to \"{linkpath}\""),
        )
    }

    /// Filesystem statistics for the filesystem holding `path`. Fails
    /// without touching the wire when the extension was not negotiated.
    pub fn statvfs(&mut self, path: &str, quiet: bool) -> Result<StatVfs, SftpError> {
        self.check_usable()?;
        if self.exts & SFTP_EXT_STATVFS == 0 {
            error!("Server does not support {EXT_STATVFS} extension");
            return Err(SftpError::Server {
                code: SSH2_FX_OP_UNSUPPORTED,
            });
        }
        let id = self.next_id();
        let mut msg = PacketBuf::request(SSH2_FXP_EXTENDED, id);
        msg.put_cstring(EXT_STATVFS);
        msg.put_cstring(path);
        self.send_msg(&mut msg)?;
        self.expect_statvfs(id, quiet)
    }

    /// `statvfs` by open handle, via fstatvfs@openssh.com.
    pub fn fstatvfs(&mut self, handle: &[u8], quiet: bool) -> Result<StatVfs, SftpError> {
        self.check_usable()?;
        if self.exts & SFTP_EXT_FSTATVFS == 0 {
            error!("Server does not support {EXT_FSTATVFS} extension");
            return Err(SftpError::Server {
                code: SSH2_FX_OP_UNSUPPORTED,
            });
        }
        let id = self.next_id();
        let mut msg = PacketBuf::request(SSH2_FXP_EXTENDED, id);
        msg.put_cstring(EXT_FSTATVFS);
        msg.put_bytes(handle);
        self.send_msg(&mut msg)?;
        self.expect_statvfs(id, quiet)
    }

    /// Lists a directory: opendir, READDIR until EOF, close. An interrupt
    /// mid-listing yields an empty result so a caller never mistakes a
    /// truncated listing for a complete one.
    pub fn readdir(&mut self, path: &str) -> Result<Vec<DirEntry>, SftpError> {
        self.check_usable()?;
        let id = self.next_id();
        let mut msg = PacketBuf::request(SSH2_FXP_OPENDIR, id);
        msg.put_cstring(path);
        self.send_msg(&mut msg)?;
        let handle = self.expect_handle(id)?;

        let mut entries: Vec<DirEntry> = Vec::new();
        let mut failure: Option<SftpError> = None;

        while !self.interrupt.is_set() {
            let id = self.next_id();
            debug!("Sending SSH2_FXP_READDIR I:{id}");
            let mut msg = PacketBuf::request(SSH2_FXP_READDIR, id);
            msg.put_bytes(&handle);
            self.send_msg(&mut msg)?;

            let reply = self.recv_msg()?;
            match self.guard(parse_readdir(&reply, id, path)) {
                Ok(Some(batch)) => entries.extend(batch),
                Ok(None) => break,
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        // Close the handle even on the failure path; its status must not
        // mask the more informative earlier error
        if let Some(e) = failure {
            let _ = self.close(&handle);
            return Err(e);
        }
        let _ = self.close(&handle);

        // Don't return partial listings on interrupt
        if self.interrupt.is_set() {
            entries.clear();
        }
        Ok(entries)
    }
}

fn parse_status(reply: &[u8], expected_id: u32) -> Result<u32, SftpError> {
    let mut r = PacketReader::new(reply);
    let msg_type = r.get_u8()?;
    let id = r.get_u32()?;
    if id != expected_id {
        return Err(violation(format!("ID mismatch ({id} != {expected_id})")));
    }
    if msg_type != SSH2_FXP_STATUS {
        return Err(violation(format!(
            "expected SSH2_FXP_STATUS({SSH2_FXP_STATUS}) packet, got {msg_type}"
        )));
    }
    let status = r.get_u32()?;
    debug!("SSH2_FXP_STATUS {status}");
    Ok(status)
}

fn parse_handle(reply: &[u8], expected_id: u32) -> Result<Vec<u8>, SftpError> {
    let mut r = PacketReader::new(reply);
    let msg_type = r.get_u8()?;
    let id = r.get_u32()?;
    if id != expected_id {
        return Err(violation(format!("ID mismatch ({id} != {expected_id})")));
    }
    if msg_type == SSH2_FXP_STATUS {
        let status = r.get_u32()?;
        error!("Couldn't get handle: {}", fx2txt(status));
        return Err(SftpError::Server { code: status });
    }
    if msg_type != SSH2_FXP_HANDLE {
        return Err(violation(format!(
            "expected SSH2_FXP_HANDLE({SSH2_FXP_HANDLE}) packet, got {msg_type}"
        )));
    }
    r.get_bytes()
}

fn parse_attrs(reply: &[u8], expected_id: u32, quiet: bool) -> Result<Attrib, SftpError> {
    let mut r = PacketReader::new(reply);
    let msg_type = r.get_u8()?;
    let id = r.get_u32()?;
    debug!("Received stat reply T:{msg_type} I:{id}");
    if id != expected_id {
        return Err(violation(format!("ID mismatch ({id} != {expected_id})")));
    }
    if msg_type == SSH2_FXP_STATUS {
        let status = r.get_u32()?;
        if quiet {
            debug!("Couldn't stat remote file: {}", fx2txt(status));
        } else {
            error!("Couldn't stat remote file: {}", fx2txt(status));
        }
        return Err(SftpError::Server { code: status });
    }
    if msg_type != SSH2_FXP_ATTRS {
        return Err(violation(format!(
            "expected SSH2_FXP_ATTRS({SSH2_FXP_ATTRS}) packet, got {msg_type}"
        )));
    }
    Attrib::decode(&mut r)
}

fn parse_statvfs(reply: &[u8], expected_id: u32, quiet: bool) -> Result<StatVfs, SftpError> {
    let mut r = PacketReader::new(reply);
    let msg_type = r.get_u8()?;
    let id = r.get_u32()?;
    debug!("Received statvfs reply T:{msg_type} I:{id}");
    if id != expected_id {
        return Err(violation(format!("ID mismatch ({id} != {expected_id})")));
    }
    if msg_type == SSH2_FXP_STATUS {
        let status = r.get_u32()?;
        if quiet {
            debug!("Couldn't statvfs: {}", fx2txt(status));
        } else {
            error!("Couldn't statvfs: {}", fx2txt(status));
        }
        return Err(SftpError::Server { code: status });
    }
    if msg_type != SSH2_FXP_EXTENDED_REPLY {
        return Err(violation(format!(
            "expected SSH2_FXP_EXTENDED_REPLY({SSH2_FXP_EXTENDED_REPLY}) packet, got {msg_type}"
        )));
    }
    StatVfs::decode(&mut r)
}

/// Parses a NAME reply that must carry exactly one entry; returns the
/// filename (the longname is display-only and discarded).
fn parse_single_name(reply: &[u8], expected_id: u32, op: &str) -> Result<String, SftpError> {
    let mut r = PacketReader::new(reply);
    let msg_type = r.get_u8()?;
    let id = r.get_u32()?;
    if id != expected_id {
        return Err(violation(format!("ID mismatch ({id} != {expected_id})")));
    }
    if msg_type == SSH2_FXP_STATUS {
        let status = r.get_u32()?;
        error!("Couldn't canonicalise: {}", fx2txt(status));
        return Err(SftpError::Server { code: status });
    }
    if msg_type != SSH2_FXP_NAME {
        return Err(violation(format!(
            "expected SSH2_FXP_NAME({SSH2_FXP_NAME}) packet, got {msg_type}"
        )));
    }
    let count = r.get_u32()?;
    if count != 1 {
        return Err(violation(format!("got multiple names ({count}) from {op}")));
    }
    let filename = r.get_string()?;
    let _longname = r.get_string()?;
    Attrib::decode(&mut r)?;
    Ok(filename)
}

/// One READDIR round trip: `Some(batch)` of surviving entries, or `None`
/// at end of directory.
fn parse_readdir(
    reply: &[u8],
    expected_id: u32,
    path: &str,
) -> Result<Option<Vec<DirEntry>>, SftpError> {
    let mut r = PacketReader::new(reply);
    let msg_type = r.get_u8()?;
    let id = r.get_u32()?;
    debug!("Received reply T:{msg_type} I:{id}");
    if id != expected_id {
        return Err(violation(format!("ID mismatch ({id} != {expected_id})")));
    }
    if msg_type == SSH2_FXP_STATUS {
        let status = r.get_u32()?;
        debug!("Received SSH2_FXP_STATUS {status}");
        if status == SSH2_FX_EOF {
            return Ok(None);
        }
        error!("Couldn't read directory: {}", fx2txt(status));
        return Err(SftpError::Server { code: status });
    }
    if msg_type != SSH2_FXP_NAME {
        return Err(violation(format!(
            "expected SSH2_FXP_NAME({SSH2_FXP_NAME}) packet, got {msg_type}"
        )));
    }

    let count = r.get_u32()?;
    if count == 0 {
        return Ok(None);
    }
    debug!("Received {count} SSH2_FXP_NAME responses");

    // The count is server-controlled; let the bounds-checked reads size
    // the vector rather than trusting it for an allocation
    let mut batch = Vec::new();
    for _ in 0..count {
        let filename = r.get_string()?;
        let longname = r.get_string()?;
        let attrs = Attrib::decode(&mut r)?;

        // Directory entries must never contain '/'; a hostile server could
        // use one to steer recursive operations outside the tree
        if filename.contains('/') {
            error!("Server sent suspect path \"{filename}\" during readdir of \"{path}\"");
            continue;
        }

        batch.push(DirEntry {
            filename,
            longname,
            attrs,
        });
    }
    Ok(Some(batch))
}

fn violation(what: String) -> SftpError {
    error!("{what}");
    SftpError::Protocol(what)
}
