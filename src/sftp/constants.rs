pub const SFTP_PROTOCOL_VERSION: u32 = 3;

/// Upper bound on a single framed message, matching sftp-server.
pub const SFTP_MAX_MSG_LENGTH: u32 = 256 * 1024;

/// Minimum amount of data to request at a time during downloads.
pub const MIN_READ_SIZE: u32 = 512;

/// Some filexfer v.0 servers reject packets larger than this.
pub const LEGACY_TRANSFER_BUFLEN: u32 = 20480;

pub const DEFAULT_TRANSFER_BUFLEN: u32 = 32768;
pub const DEFAULT_NUM_REQUESTS: u32 = 64;

// SFTP protocol message types
pub const SSH2_FXP_INIT: u8 = 1;
pub const SSH2_FXP_VERSION: u8 = 2;
pub const SSH2_FXP_OPEN: u8 = 3;
pub const SSH2_FXP_CLOSE: u8 = 4;
pub const SSH2_FXP_READ: u8 = 5;
pub const SSH2_FXP_WRITE: u8 = 6;
pub const SSH2_FXP_LSTAT: u8 = 7;
pub const SSH2_FXP_FSTAT: u8 = 8;
pub const SSH2_FXP_SETSTAT: u8 = 9;
pub const SSH2_FXP_FSETSTAT: u8 = 10;
pub const SSH2_FXP_OPENDIR: u8 = 11;
pub const SSH2_FXP_READDIR: u8 = 12;
pub const SSH2_FXP_REMOVE: u8 = 13;
pub const SSH2_FXP_MKDIR: u8 = 14;
pub const SSH2_FXP_RMDIR: u8 = 15;
pub const SSH2_FXP_REALPATH: u8 = 16;
pub const SSH2_FXP_STAT: u8 = 17;
pub const SSH2_FXP_RENAME: u8 = 18;
pub const SSH2_FXP_SYMLINK: u8 = 20;
pub const SSH2_FXP_STATUS: u8 = 101;
pub const SSH2_FXP_HANDLE: u8 = 102;
pub const SSH2_FXP_DATA: u8 = 103;
pub const SSH2_FXP_NAME: u8 = 104;
pub const SSH2_FXP_ATTRS: u8 = 105;
pub const SSH2_FXP_EXTENDED: u8 = 200;
pub const SSH2_FXP_EXTENDED_REPLY: u8 = 201;

/// Protocol v0 servers used today's LSTAT number for stat.
pub const SSH2_FXP_STAT_VERSION_0: u8 = 7;

// Status codes carried by SSH2_FXP_STATUS
pub const SSH2_FX_OK: u32 = 0;
pub const SSH2_FX_EOF: u32 = 1;
pub const SSH2_FX_NO_SUCH_FILE: u32 = 2;
pub const SSH2_FX_PERMISSION_DENIED: u32 = 3;
pub const SSH2_FX_FAILURE: u32 = 4;
pub const SSH2_FX_BAD_MESSAGE: u32 = 5;
pub const SSH2_FX_NO_CONNECTION: u32 = 6;
pub const SSH2_FX_CONNECTION_LOST: u32 = 7;
pub const SSH2_FX_OP_UNSUPPORTED: u32 = 8;

// Open flags for SSH2_FXP_OPEN
pub const SSH2_FXF_READ: u32 = 0x00000001;
pub const SSH2_FXF_WRITE: u32 = 0x00000002;
pub const SSH2_FXF_APPEND: u32 = 0x00000004;
pub const SSH2_FXF_CREAT: u32 = 0x00000008;
pub const SSH2_FXF_TRUNC: u32 = 0x00000010;
pub const SSH2_FXF_EXCL: u32 = 0x00000020;

// File attribute flags
pub const SSH2_FILEXFER_ATTR_SIZE: u32 = 0x00000001;
pub const SSH2_FILEXFER_ATTR_UIDGID: u32 = 0x00000002;
pub const SSH2_FILEXFER_ATTR_PERMISSIONS: u32 = 0x00000004;
pub const SSH2_FILEXFER_ATTR_ACMODTIME: u32 = 0x00000008;
pub const SSH2_FILEXFER_ATTR_EXTENDED: u32 = 0x80000000;

// Recognized server extensions and the revision each must advertise
pub const EXT_POSIX_RENAME: &str = "posix-rename@openssh.com";
pub const EXT_STATVFS: &str = "statvfs@openssh.com";
pub const EXT_FSTATVFS: &str = "fstatvfs@openssh.com";

pub const SFTP_EXT_POSIX_RENAME: u32 = 0x00000001;
pub const SFTP_EXT_STATVFS: u32 = 0x00000002;
pub const SFTP_EXT_FSTATVFS: u32 = 0x00000004;

// Flag bits in a statvfs@openssh.com reply
pub const SSH2_FXE_STATVFS_ST_RDONLY: u64 = 0x1;
pub const SSH2_FXE_STATVFS_ST_NOSUID: u64 = 0x2;

// Mount flag bits reported in StatVfs::f_flag
pub const ST_RDONLY: u64 = 0x1;
pub const ST_NOSUID: u64 = 0x2;

// POSIX file type bits within Attrib::perm
pub const S_IFMT: u32 = 0o170000;
pub const S_IFREG: u32 = 0o100000;
pub const S_IFDIR: u32 = 0o040000;
