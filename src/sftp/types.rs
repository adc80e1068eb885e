use std::fs::Metadata;
use std::os::unix::fs::MetadataExt;

use super::constants::*;
use super::error::SftpError;
use super::wire::{PacketBuf, PacketReader};

/// File attribute record. Field validity is gated by `flags`, exactly as on
/// the wire, so an encode/decode round trip reproduces the original record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Attrib {
    pub flags: u32,
    pub size: u64,
    pub uid: u32,
    pub gid: u32,
    pub perm: u32,
    pub atime: u32,
    pub mtime: u32,
}

impl Attrib {
    pub fn has_size(&self) -> bool {
        self.flags & SSH2_FILEXFER_ATTR_SIZE != 0
    }

    pub fn has_uidgid(&self) -> bool {
        self.flags & SSH2_FILEXFER_ATTR_UIDGID != 0
    }

    pub fn has_perm(&self) -> bool {
        self.flags & SSH2_FILEXFER_ATTR_PERMISSIONS != 0
    }

    pub fn has_times(&self) -> bool {
        self.flags & SSH2_FILEXFER_ATTR_ACMODTIME != 0
    }

    pub fn encode(&self, buf: &mut PacketBuf) {
        buf.put_u32(self.flags);
        if self.has_size() {
            buf.put_u64(self.size);
        }
        if self.has_uidgid() {
            buf.put_u32(self.uid);
            buf.put_u32(self.gid);
        }
        if self.has_perm() {
            buf.put_u32(self.perm);
        }
        if self.has_times() {
            buf.put_u32(self.atime);
            buf.put_u32(self.mtime);
        }
    }

    pub fn decode(r: &mut PacketReader) -> Result<Self, SftpError> {
        let mut a = Attrib {
            flags: r.get_u32()?,
            ..Attrib::default()
        };
        if a.has_size() {
            a.size = r.get_u64()?;
        }
        if a.has_uidgid() {
            a.uid = r.get_u32()?;
            a.gid = r.get_u32()?;
        }
        if a.has_perm() {
            a.perm = r.get_u32()?;
        }
        if a.has_times() {
            a.atime = r.get_u32()?;
            a.mtime = r.get_u32()?;
        }
        if a.flags & SSH2_FILEXFER_ATTR_EXTENDED != 0 {
            let count = r.get_u32()?;
            for _ in 0..count {
                let _name = r.get_bytes()?;
                let _value = r.get_bytes()?;
            }
        }
        Ok(a)
    }

    /// Builds attributes from local file metadata, the way a client reports
    /// a local file to the server.
    pub fn from_metadata(md: &Metadata) -> Self {
        Attrib {
            flags: SSH2_FILEXFER_ATTR_SIZE
                | SSH2_FILEXFER_ATTR_UIDGID
                | SSH2_FILEXFER_ATTR_PERMISSIONS
                | SSH2_FILEXFER_ATTR_ACMODTIME,
            size: md.len(),
            uid: md.uid(),
            gid: md.gid(),
            perm: md.mode(),
            atime: md.atime() as u32,
            mtime: md.mtime() as u32,
        }
    }
}

pub fn mode_is_regular(perm: u32) -> bool {
    perm & S_IFMT == S_IFREG
}

pub fn mode_is_dir(perm: u32) -> bool {
    perm & S_IFMT == S_IFDIR
}

/// One readdir result. `longname` is the server's `ls -l`-style display
/// line; only `filename` is trusted for path construction.
#[derive(Debug, Clone)]
pub struct DirEntry {
    pub filename: String,
    pub longname: String,
    pub attrs: Attrib,
}

/// Parsed statvfs@openssh.com / fstatvfs@openssh.com reply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatVfs {
    pub f_bsize: u64,
    pub f_frsize: u64,
    pub f_blocks: u64,
    pub f_bfree: u64,
    pub f_bavail: u64,
    pub f_files: u64,
    pub f_ffree: u64,
    pub f_favail: u64,
    pub f_fsid: u64,
    pub f_flag: u64,
    pub f_namemax: u64,
}

impl StatVfs {
    pub(crate) fn decode(r: &mut PacketReader) -> Result<Self, SftpError> {
        let mut st = StatVfs {
            f_bsize: r.get_u64()?,
            f_frsize: r.get_u64()?,
            f_blocks: r.get_u64()?,
            f_bfree: r.get_u64()?,
            f_bavail: r.get_u64()?,
            f_files: r.get_u64()?,
            f_ffree: r.get_u64()?,
            f_favail: r.get_u64()?,
            f_fsid: r.get_u64()?,
            ..StatVfs::default()
        };
        let flag = r.get_u64()?;
        st.f_namemax = r.get_u64()?;

        if flag & SSH2_FXE_STATVFS_ST_RDONLY != 0 {
            st.f_flag |= ST_RDONLY;
        }
        if flag & SSH2_FXE_STATVFS_ST_NOSUID != 0 {
            st.f_flag |= ST_NOSUID;
        }
        Ok(st)
    }
}
