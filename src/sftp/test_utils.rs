use std::collections::{HashMap, VecDeque};
use std::io::{self, Read, Write};

use super::client::SftpConn;
use super::constants::*;
use super::interrupt::Interrupt;
use super::transport::SharedStream;
use super::types::Attrib;
use super::wire::{PacketBuf, PacketReader};

/// Scripted in-memory sftp-server. Request frames written by the client are
/// parsed as they arrive and answered straight into a reply queue the
/// client then reads back, so the single-threaded engine can be driven end
/// to end without a network or a second thread.
///
/// `peak_pending` records the largest number of replies sitting unread in
/// the queue at the moment a new request arrived, which equals the
/// client's in-flight request count — the window-bound assertions hang off
/// it.
pub struct MockServer {
    inbox: Vec<u8>,
    outbox: VecDeque<u8>,
    queued_total: u64,
    read_total: u64,
    boundaries: VecDeque<u64>,
    pub peak_pending: usize,

    // behavior knobs
    pub version: u32,
    pub extensions: Vec<(String, String)>,
    pub files: HashMap<String, Vec<u8>>,
    pub attrs: HashMap<String, Attrib>,
    pub dir_listing: Vec<(String, String, Attrib)>,
    pub readdir_batch: usize,
    pub realpath_names: u32,
    pub short_read_cap: Option<u32>,
    pub read_status: Option<u32>,
    pub write_fail_after: Option<u32>,
    pub overserve: bool,
    pub statvfs_values: [u64; 11],
    pub interrupt_after_read: Option<(u32, Interrupt)>,
    pub interrupt_after_readdir: Option<(u32, Interrupt)>,

    // observability
    pub init_body: Option<Vec<u8>>,
    pub requests: Vec<(u8, u32)>,
    pub read_requests: Vec<(u64, u32)>,
    pub open_attrs: Vec<Attrib>,
    pub renamed: Vec<(String, String, bool)>,
    pub closed_handles: u32,

    handles: HashMap<Vec<u8>, String>,
    next_handle: u32,
    readdir_served: usize,
    read_count: u32,
    readdir_count: u32,
    write_count: u32,
}

impl Default for MockServer {
    fn default() -> Self {
        Self::new()
    }
}

impl MockServer {
    pub fn new() -> Self {
        MockServer {
            inbox: Vec::new(),
            outbox: VecDeque::new(),
            queued_total: 0,
            read_total: 0,
            boundaries: VecDeque::new(),
            peak_pending: 0,
            version: SFTP_PROTOCOL_VERSION,
            extensions: vec![
                (EXT_POSIX_RENAME.to_string(), "1".to_string()),
                (EXT_STATVFS.to_string(), "2".to_string()),
                (EXT_FSTATVFS.to_string(), "2".to_string()),
            ],
            files: HashMap::new(),
            attrs: HashMap::new(),
            dir_listing: Vec::new(),
            readdir_batch: 64,
            realpath_names: 1,
            short_read_cap: None,
            read_status: None,
            write_fail_after: None,
            overserve: false,
            statvfs_values: [
                4096, 512, 1_000_000, 500_000, 400_000, 65536, 32768, 30000, 0x1234, 0, 255,
            ],
            interrupt_after_read: None,
            interrupt_after_readdir: None,
            init_body: None,
            requests: Vec::new(),
            read_requests: Vec::new(),
            open_attrs: Vec::new(),
            renamed: Vec::new(),
            closed_handles: 0,
            handles: HashMap::new(),
            next_handle: 0,
            readdir_served: 0,
            read_count: 0,
            readdir_count: 0,
            write_count: 0,
        }
    }

    fn queue(&mut self, reply: PacketBuf) {
        self.peak_pending = self.peak_pending.max(self.boundaries.len());
        self.outbox.extend((reply.len() as u32).to_be_bytes());
        self.outbox.extend(reply.as_slice().iter().copied());
        self.queued_total += 4 + reply.len() as u64;
        self.boundaries.push_back(self.queued_total);
    }

    fn send_status(&mut self, id: u32, status: u32) {
        let mut reply = PacketBuf::request(SSH2_FXP_STATUS, id);
        reply.put_u32(status);
        reply.put_cstring("");
        reply.put_cstring("");
        self.queue(reply);
    }

    fn send_handle(&mut self, id: u32, handle: &[u8]) {
        let mut reply = PacketBuf::request(SSH2_FXP_HANDLE, id);
        reply.put_bytes(handle);
        self.queue(reply);
    }

    fn send_attrs(&mut self, id: u32, a: &Attrib) {
        let mut reply = PacketBuf::request(SSH2_FXP_ATTRS, id);
        a.encode(&mut reply);
        self.queue(reply);
    }

    fn alloc_handle(&mut self, path: String) -> Vec<u8> {
        self.next_handle += 1;
        let handle = format!("h{}", self.next_handle).into_bytes();
        self.handles.insert(handle.clone(), path);
        handle
    }

    fn stat_of(&self, path: &str) -> Option<Attrib> {
        if let Some(a) = self.attrs.get(path) {
            return Some(*a);
        }
        self.files.get(path).map(|contents| Attrib {
            flags: SSH2_FILEXFER_ATTR_SIZE | SSH2_FILEXFER_ATTR_PERMISSIONS,
            size: contents.len() as u64,
            perm: 0o100644,
            ..Attrib::default()
        })
    }

    fn process_frames(&mut self) {
        loop {
            if self.inbox.len() < 4 {
                return;
            }
            let frame_len =
                u32::from_be_bytes([self.inbox[0], self.inbox[1], self.inbox[2], self.inbox[3]])
                    as usize;
            if self.inbox.len() < 4 + frame_len {
                return;
            }
            let frame: Vec<u8> = self.inbox[4..4 + frame_len].to_vec();
            self.inbox.drain(..4 + frame_len);
            self.handle_frame(&frame);
        }
    }

    fn handle_frame(&mut self, frame: &[u8]) {
        let mut r = PacketReader::new(frame);
        let msg_type = r.get_u8().unwrap();

        if msg_type == SSH2_FXP_INIT {
            self.requests.push((msg_type, 0));
            self.init_body = Some(frame.to_vec());
            let mut reply = PacketBuf::new();
            reply.put_u8(SSH2_FXP_VERSION);
            reply.put_u32(self.version);
            for (name, value) in self.extensions.clone() {
                reply.put_cstring(&name);
                reply.put_cstring(&value);
            }
            self.queue(reply);
            return;
        }

        let id = r.get_u32().unwrap();
        self.requests.push((msg_type, id));

        match msg_type {
            SSH2_FXP_OPEN => {
                let path = r.get_string().unwrap();
                let pflags = r.get_u32().unwrap();
                let attrs = Attrib::decode(&mut r).unwrap();
                self.open_attrs.push(attrs);
                if pflags & SSH2_FXF_WRITE != 0
                    && (pflags & SSH2_FXF_TRUNC != 0 || !self.files.contains_key(&path))
                {
                    self.files.insert(path.clone(), Vec::new());
                }
                let handle = self.alloc_handle(path);
                self.send_handle(id, &handle);
            }
            SSH2_FXP_OPENDIR => {
                let _path = r.get_string().unwrap();
                self.readdir_served = 0;
                let handle = self.alloc_handle("<dir>".to_string());
                self.send_handle(id, &handle);
            }
            SSH2_FXP_CLOSE => {
                let handle = r.get_bytes().unwrap();
                self.handles.remove(&handle);
                self.closed_handles += 1;
                self.send_status(id, SSH2_FX_OK);
            }
            SSH2_FXP_READ => {
                self.read_count += 1;
                let handle = r.get_bytes().unwrap();
                let offset = r.get_u64().unwrap();
                let len = r.get_u32().unwrap();
                self.read_requests.push((offset, len));

                if let Some(status) = self.read_status {
                    self.send_status(id, status);
                } else {
                    let path = self.handles.get(&handle).cloned().unwrap();
                    let contents = self.files.get(&path).cloned().unwrap_or_default();
                    if offset as usize >= contents.len() {
                        self.send_status(id, SSH2_FX_EOF);
                    } else {
                        let mut take = len.min((contents.len() - offset as usize) as u32);
                        if let Some(cap) = self.short_read_cap {
                            take = take.min(cap);
                        }
                        let mut chunk =
                            contents[offset as usize..offset as usize + take as usize].to_vec();
                        if self.overserve {
                            chunk.push(0);
                        }
                        let mut reply = PacketBuf::request(SSH2_FXP_DATA, id);
                        reply.put_bytes(&chunk);
                        self.queue(reply);
                    }
                }

                if let Some((nth, interrupt)) = self.interrupt_after_read.clone() {
                    if self.read_count == nth {
                        interrupt.set();
                    }
                }
            }
            SSH2_FXP_WRITE => {
                self.write_count += 1;
                let handle = r.get_bytes().unwrap();
                let offset = r.get_u64().unwrap() as usize;
                let data = r.get_bytes().unwrap();

                if matches!(self.write_fail_after, Some(nth) if self.write_count == nth) {
                    self.send_status(id, SSH2_FX_FAILURE);
                } else {
                    let path = self.handles.get(&handle).cloned().unwrap();
                    let file = self.files.entry(path).or_default();
                    if file.len() < offset + data.len() {
                        file.resize(offset + data.len(), 0);
                    }
                    file[offset..offset + data.len()].copy_from_slice(&data);
                    self.send_status(id, SSH2_FX_OK);
                }
            }
            SSH2_FXP_READDIR => {
                self.readdir_count += 1;
                let _handle = r.get_bytes().unwrap();
                let batch: Vec<_> = self
                    .dir_listing
                    .iter()
                    .skip(self.readdir_served)
                    .take(self.readdir_batch)
                    .cloned()
                    .collect();
                if batch.is_empty() {
                    self.send_status(id, SSH2_FX_EOF);
                } else {
                    self.readdir_served += batch.len();
                    let mut reply = PacketBuf::request(SSH2_FXP_NAME, id);
                    reply.put_u32(batch.len() as u32);
                    for (filename, longname, attrs) in &batch {
                        reply.put_cstring(filename);
                        reply.put_cstring(longname);
                        attrs.encode(&mut reply);
                    }
                    self.queue(reply);
                }

                if let Some((nth, interrupt)) = self.interrupt_after_readdir.clone() {
                    if self.readdir_count == nth {
                        interrupt.set();
                    }
                }
            }
            SSH2_FXP_STAT | SSH2_FXP_LSTAT => {
                let path = r.get_string().unwrap();
                match self.stat_of(&path) {
                    Some(a) => self.send_attrs(id, &a),
                    None => self.send_status(id, SSH2_FX_NO_SUCH_FILE),
                }
            }
            SSH2_FXP_FSTAT => {
                let handle = r.get_bytes().unwrap();
                let known = self
                    .handles
                    .get(&handle)
                    .cloned()
                    .and_then(|path| self.stat_of(&path));
                match known {
                    Some(a) => self.send_attrs(id, &a),
                    None => self.send_status(id, SSH2_FX_NO_SUCH_FILE),
                }
            }
            SSH2_FXP_SETSTAT | SSH2_FXP_FSETSTAT | SSH2_FXP_MKDIR | SSH2_FXP_RMDIR
            | SSH2_FXP_REMOVE | SSH2_FXP_SYMLINK => {
                self.send_status(id, SSH2_FX_OK);
            }
            SSH2_FXP_RENAME => {
                let oldpath = r.get_string().unwrap();
                let newpath = r.get_string().unwrap();
                self.renamed.push((oldpath, newpath, false));
                self.send_status(id, SSH2_FX_OK);
            }
            SSH2_FXP_REALPATH => {
                let path = r.get_string().unwrap();
                let canonical = if path == "." {
                    "/home/test".to_string()
                } else if path.starts_with('/') {
                    path
                } else {
                    format!("/home/test/{path}")
                };
                let mut reply = PacketBuf::request(SSH2_FXP_NAME, id);
                reply.put_u32(self.realpath_names);
                for _ in 0..self.realpath_names {
                    reply.put_cstring(&canonical);
                    reply.put_cstring(&canonical);
                    Attrib::default().encode(&mut reply);
                }
                self.queue(reply);
            }
            SSH2_FXP_EXTENDED => {
                let name = r.get_string().unwrap();
                match name.as_str() {
                    EXT_POSIX_RENAME => {
                        let oldpath = r.get_string().unwrap();
                        let newpath = r.get_string().unwrap();
                        self.renamed.push((oldpath, newpath, true));
                        self.send_status(id, SSH2_FX_OK);
                    }
                    EXT_STATVFS | EXT_FSTATVFS => {
                        let _target = r.get_bytes().unwrap();
                        let mut reply = PacketBuf::request(SSH2_FXP_EXTENDED_REPLY, id);
                        for v in self.statvfs_values {
                            reply.put_u64(v);
                        }
                        self.queue(reply);
                    }
                    _ => self.send_status(id, SSH2_FX_OP_UNSUPPORTED),
                }
            }
            _ => self.send_status(id, SSH2_FX_OP_UNSUPPORTED),
        }
    }
}

impl Write for MockServer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inbox.extend_from_slice(buf);
        self.process_frames();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Read for MockServer {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = buf.len().min(self.outbox.len());
        for slot in buf.iter_mut().take(n) {
            *slot = self.outbox.pop_front().unwrap();
        }
        self.read_total += n as u64;
        while matches!(self.boundaries.front(), Some(&end) if end <= self.read_total) {
            self.boundaries.pop_front();
        }
        Ok(n)
    }
}

pub type MockConn = SftpConn<SharedStream<MockServer>, SharedStream<MockServer>>;

/// Handshakes a connection against `server`, returning the connection and
/// a handle for inspecting the server afterwards.
pub fn connect(
    server: MockServer,
    transfer_buflen: u32,
    num_requests: u32,
    interrupt: Interrupt,
) -> (MockConn, SharedStream<MockServer>) {
    let stream = SharedStream::new(server);
    let conn = SftpConn::init(
        stream.clone(),
        stream.clone(),
        transfer_buflen,
        num_requests,
        interrupt,
    )
    .expect("handshake against mock server");
    (conn, stream)
}
