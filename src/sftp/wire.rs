use super::error::SftpError;

/// Append-only buffer an outgoing message body is assembled into before
/// framing. All integers are written big-endian per the protocol.
#[derive(Debug, Default)]
pub struct PacketBuf {
    data: Vec<u8>,
}

impl PacketBuf {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a request body: opcode followed by the request id.
    pub fn request(code: u8, id: u32) -> Self {
        let mut buf = Self::new();
        buf.put_u8(code);
        buf.put_u32(id);
        buf
    }

    pub fn put_u8(&mut self, v: u8) {
        self.data.push(v);
    }

    pub fn put_u32(&mut self, v: u32) {
        self.data.extend_from_slice(&v.to_be_bytes());
    }

    pub fn put_u64(&mut self, v: u64) {
        self.data.extend_from_slice(&v.to_be_bytes());
    }

    /// Length-prefixed byte string.
    pub fn put_bytes(&mut self, s: &[u8]) {
        self.put_u32(s.len() as u32);
        self.data.extend_from_slice(s);
    }

    /// Same wire form as `put_bytes`; separate entry point for paths and
    /// extension names.
    pub fn put_cstring(&mut self, s: &str) {
        self.put_bytes(s.as_bytes());
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }
}

/// Cursor over a received message body. Every accessor checks the declared
/// length against what is actually left before consuming anything, so a
/// hostile length field can never read past the message boundary.
#[derive(Debug)]
pub struct PacketReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> PacketReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], SftpError> {
        if n > self.remaining() {
            return Err(SftpError::Protocol(format!(
                "message truncated: need {} bytes, {} left",
                n,
                self.remaining()
            )));
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn get_u8(&mut self) -> Result<u8, SftpError> {
        Ok(self.take(1)?[0])
    }

    pub fn get_u32(&mut self) -> Result<u32, SftpError> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn get_u64(&mut self) -> Result<u64, SftpError> {
        let bytes = self.take(8)?;
        Ok(u64::from_be_bytes([
            bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
        ]))
    }

    /// Length-prefixed byte string, returned owned.
    pub fn get_bytes(&mut self) -> Result<Vec<u8>, SftpError> {
        let len = self.get_u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    /// Length-prefixed string. Servers are not obliged to send valid UTF-8,
    /// so invalid sequences are replaced rather than rejected.
    pub fn get_string(&mut self) -> Result<String, SftpError> {
        let len = self.get_u32()? as usize;
        let bytes = self.take(len)?;
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }
}
