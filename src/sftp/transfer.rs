use log::{debug, error};
use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use super::client::SftpConn;
use super::constants::*;
use super::error::{fx2txt, SftpError};
use super::types::{mode_is_regular, Attrib};
use super::wire::{PacketBuf, PacketReader};

/// An in-flight READ: the range requested under `id`, still awaiting its
/// DATA or STATUS reply.
struct PendingRead {
    id: u32,
    len: u32,
    offset: u64,
}

/// An unacknowledged WRITE awaiting its STATUS reply.
struct OutstandingAck {
    id: u32,
    len: u32,
    offset: u64,
}

impl<R: Read, W: Write> SftpConn<R, W> {
    fn send_read_request(
        &mut self,
        id: u32,
        offset: u64,
        len: u32,
        handle: &[u8],
    ) -> Result<(), SftpError> {
        let mut msg = PacketBuf::request(SSH2_FXP_READ, id);
        msg.put_bytes(handle);
        msg.put_u64(offset);
        msg.put_u32(len);
        self.send_msg(&mut msg)
    }

    /// Downloads `remote_path` into `local`, keeping up to `num_requests`
    /// READ requests in flight. The window opens at one request and grows
    /// additively; a short DATA reply re-requests the missing tail and
    /// shrinks the per-request size (never below `MIN_READ_SIZE`) to match
    /// what the server is willing to serve. With `preserve`, the remote
    /// permission bits are applied to the local file afterwards.
    pub fn download(
        &mut self,
        remote_path: &str,
        local: &mut File,
        preserve: bool,
    ) -> Result<(), SftpError> {
        self.check_usable()?;

        let a = self.stat(remote_path, false)?;

        // Do not preserve set[ug]id bits, as ownership is not preserved
        let mode = if a.has_perm() { a.perm & 0o777 } else { 0o666 };

        if a.has_perm() && !mode_is_regular(a.perm) {
            error!("Cannot download non-regular file: {remote_path}");
            return Err(SftpError::NotRegular(remote_path.to_string()));
        }

        // Size is only a hint to throttle the window near EOF
        let size = if a.has_size() { a.size } else { 0 };
        let mut buflen = self.transfer_buflen();

        let id = self.next_id();
        let mut msg = PacketBuf::request(SSH2_FXP_OPEN, id);
        msg.put_cstring(remote_path);
        msg.put_u32(SSH2_FXF_READ);
        Attrib::default().encode(&mut msg);
        self.send_msg(&mut msg)?;
        debug!("Sent message SSH2_FXP_OPEN I:{id} P:{remote_path}");

        let handle = self.expect_handle(id)?;

        let mut requests: VecDeque<PendingRead> = VecDeque::new();
        let mut read_error: Option<u32> = None;
        let mut write_error: Option<io::Error> = None;
        let mut offset: u64 = 0;
        let mut num_req: u32 = 0;
        let mut max_req: u32 = 1;

        while num_req > 0 || max_req > 0 {
            // Simulate EOF on interrupt: stop issuing new requests and let
            // the outstanding ones drain
            if self.interrupt.is_set() {
                if num_req == 0 {
                    break;
                }
                max_req = 0;
            }

            while num_req < max_req {
                debug!("Request range {offset} len {buflen} ({num_req}/{max_req})");
                let id = self.next_id();
                requests.push_back(PendingRead {
                    id,
                    len: buflen,
                    offset,
                });
                self.send_read_request(id, offset, buflen, &handle)?;
                offset += u64::from(buflen);
                num_req += 1;
            }

            let reply = self.recv_msg()?;
            let mut r = PacketReader::new(&reply);
            let msg_type = self.guard(r.get_u8())?;
            let id = self.guard(r.get_u32())?;
            debug!("Received reply T:{msg_type} I:{id} R:{max_req}");

            let pos = match requests.iter().position(|req| req.id == id) {
                Some(pos) => pos,
                None => return Err(self.protocol_error(format!("unexpected reply {id}"))),
            };

            match msg_type {
                SSH2_FXP_STATUS => {
                    let status = self.guard(r.get_u32())?;
                    if status != SSH2_FX_EOF {
                        read_error = Some(status);
                    }
                    max_req = 0;
                    requests.remove(pos);
                    num_req -= 1;
                }
                SSH2_FXP_DATA => {
                    let data = self.guard(r.get_bytes())?;
                    let len = data.len() as u32;
                    let req_offset = requests[pos].offset;
                    let req_len = requests[pos].len;
                    debug!("Received {len} bytes at {req_offset}");

                    if len > req_len {
                        return Err(self.protocol_error(format!(
                            "received more data than asked for {len} > {req_len}"
                        )));
                    }

                    let written = local
                        .seek(SeekFrom::Start(req_offset))
                        .and_then(|_| local.write_all(&data));
                    if let Err(e) = written {
                        if write_error.is_none() {
                            write_error = Some(e);
                            max_req = 0;
                        }
                    }

                    if len == req_len {
                        requests.remove(pos);
                        num_req -= 1;
                    } else {
                        // Short read: re-request the missing tail under a
                        // fresh id
                        debug!(
                            "Short data block, re-requesting {} len {} ({num_req})",
                            req_offset + u64::from(len),
                            req_len - len
                        );
                        let new_id = self.next_id();
                        {
                            let req = &mut requests[pos];
                            req.id = new_id;
                            req.len -= len;
                            req.offset += u64::from(len);
                        }
                        let (tail_offset, tail_len) = (requests[pos].offset, requests[pos].len);
                        self.send_read_request(new_id, tail_offset, tail_len, &handle)?;
                        // Respect the server's effective per-request cap
                        if len < buflen {
                            buflen = MIN_READ_SIZE.max(len);
                        }
                    }

                    if max_req > 0 {
                        // max_req == 0 iff EOF or an error has been seen
                        if size > 0 && offset > size {
                            // One request at a time past the expected EOF
                            debug!("Finish at {offset} ({num_req})");
                            max_req = 1;
                        } else if max_req < self.num_requests() {
                            max_req += 1;
                        }
                    }
                }
                _ => {
                    return Err(self.protocol_error(format!(
                        "expected SSH2_FXP_DATA({SSH2_FXP_DATA}) packet, got {msg_type}"
                    )))
                }
            }
        }

        if !requests.is_empty() {
            return Err(
                self.protocol_error("transfer complete, but requests still in queue".to_string())
            );
        }

        if let Some(status) = read_error {
            error!(
                "Couldn't read from remote file \"{remote_path}\": {}",
                fx2txt(status)
            );
            let _ = self.close(&handle);
            return Err(SftpError::Server { code: status });
        }
        if let Some(e) = write_error {
            error!("Couldn't write to local file: {e}");
            let _ = self.close(&handle);
            return Err(SftpError::Io(e));
        }

        self.close(&handle)?;

        // Override the umask if asked
        if preserve {
            if let Err(e) = local.set_permissions(std::fs::Permissions::from_mode(mode)) {
                error!("Couldn't set mode on local file: {e}");
            }
        }
        Ok(())
    }

    /// Uploads `local` to `remote_path`. WRITE requests are fire-and-forget
    /// up to a sliding window of `num_requests` unacknowledged writes; on
    /// interrupt or a failed write the local reads turn into EOF and the
    /// remaining acks drain. With `preserve`, attributes are re-applied via
    /// fsetstat before close. `local_path` is only used in diagnostics.
    pub fn upload(
        &mut self,
        local: &mut File,
        local_path: &Path,
        remote_path: &str,
        remote_attribs: Option<Attrib>,
        preserve: bool,
    ) -> Result<(), SftpError> {
        self.check_usable()?;

        let sb = match local.metadata() {
            Ok(sb) => sb,
            Err(e) => {
                error!(
                    "Couldn't fstat local file \"{}\": {e}",
                    local_path.display()
                );
                return Err(SftpError::Io(e));
            }
        };
        if !sb.file_type().is_file() {
            error!("{} is not a regular file", local_path.display());
            return Err(SftpError::NotRegular(local_path.display().to_string()));
        }

        let mut a = remote_attribs.unwrap_or_else(|| Attrib::from_metadata(&sb));
        // Never send size or ownership; timestamps only when preserving
        a.flags &= !SSH2_FILEXFER_ATTR_SIZE;
        a.flags &= !SSH2_FILEXFER_ATTR_UIDGID;
        a.perm &= 0o777;
        if !preserve {
            a.flags &= !SSH2_FILEXFER_ATTR_ACMODTIME;
        }

        let open_id = self.next_id();
        let mut msg = PacketBuf::request(SSH2_FXP_OPEN, open_id);
        msg.put_cstring(remote_path);
        msg.put_u32(SSH2_FXF_WRITE | SSH2_FXF_CREAT | SSH2_FXF_TRUNC);
        a.encode(&mut msg);
        self.send_msg(&mut msg)?;
        debug!("Sent message SSH2_FXP_OPEN I:{open_id} P:{remote_path}");

        let handle = self.expect_handle(open_id)?;

        let startid = open_id.wrapping_add(1);
        let mut ackid = startid;
        let mut id = open_id;
        let mut acks: VecDeque<OutstandingAck> = VecDeque::new();
        let mut data = vec![0u8; self.transfer_buflen() as usize];
        let mut offset: u64 = 0;
        let mut status: u32 = SSH2_FX_OK;

        loop {
            // Simulate EOF on interrupt or after a failed write, letting
            // the acks from the server drain
            let len = if self.interrupt.is_set() || status != SSH2_FX_OK {
                0
            } else {
                match read_retrying(local, &mut data) {
                    Ok(n) => n,
                    Err(e) => {
                        error!("Couldn't read from \"{}\": {e}", local_path.display());
                        // Unread WRITE replies leave the stream misaligned
                        return Err(self.abandon(SftpError::Io(e)));
                    }
                }
            };

            if len != 0 {
                id = self.next_id();
                acks.push_back(OutstandingAck {
                    id,
                    len: len as u32,
                    offset,
                });
                let mut msg = PacketBuf::request(SSH2_FXP_WRITE, id);
                msg.put_bytes(&handle);
                msg.put_u64(offset);
                msg.put_bytes(&data[..len]);
                self.send_msg(&mut msg)?;
                debug!("Sent message SSH2_FXP_WRITE I:{id} O:{offset} S:{len}");
            } else if acks.is_empty() {
                break;
            }

            if id == startid || len == 0 || id.wrapping_sub(ackid) >= self.num_requests() {
                let reply = self.recv_msg()?;
                let mut r = PacketReader::new(&reply);
                let msg_type = self.guard(r.get_u8())?;
                let r_id = self.guard(r.get_u32())?;

                if msg_type != SSH2_FXP_STATUS {
                    return Err(self.protocol_error(format!(
                        "expected SSH2_FXP_STATUS({SSH2_FXP_STATUS}) packet, got {msg_type}"
                    )));
                }
                let st = self.guard(r.get_u32())?;
                debug!("SSH2_FXP_STATUS {st}");
                if status == SSH2_FX_OK && st != SSH2_FX_OK {
                    status = st;
                }

                let pos = match acks.iter().position(|ack| ack.id == r_id) {
                    Some(pos) => pos,
                    None => {
                        return Err(
                            self.protocol_error(format!("can't find request for ID {r_id}"))
                        )
                    }
                };
                {
                    let ack = &acks[pos];
                    debug!(
                        "In write loop, ack for {} {} bytes at {}",
                        ack.id, ack.len, ack.offset
                    );
                }
                acks.remove(pos);
                ackid = ackid.wrapping_add(1);
            }

            offset = match offset.checked_add(len as u64) {
                Some(next) => next,
                None => return Err(self.protocol_error("upload offset overflow".to_string())),
            };
        }

        if status != SSH2_FX_OK {
            error!(
                "Couldn't write to remote file \"{remote_path}\": {}",
                fx2txt(status)
            );
        }

        // Override umask and utimes if asked
        if preserve {
            let _ = self.fsetstat(&handle, &a);
        }

        let close_result = self.close(&handle);
        if status != SSH2_FX_OK {
            return Err(SftpError::Server { code: status });
        }
        close_result
    }
}

/// Plain read with EINTR/EAGAIN retry. `read_exact` would swallow the
/// short final block of the file, so the raw count is kept.
fn read_retrying(f: &mut File, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        match f.read(buf) {
            Err(e)
                if e.kind() == io::ErrorKind::Interrupted
                    || e.kind() == io::ErrorKind::WouldBlock =>
            {
                continue
            }
            other => return other,
        }
    }
}
