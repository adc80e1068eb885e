use chrono::DateTime;
use log::info;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use rsftp::sftp::client::SftpConn;
use rsftp::sftp::error::SftpError;
use rsftp::sftp::types::{mode_is_dir, Attrib};

use crate::interface::{CommandInterface, SftpCommand};

/// Interactive session state: the connection plus the remote working
/// directory relative paths resolve against.
pub struct Shell<R: Read, W: Write> {
    conn: SftpConn<R, W>,
    working_dir: PathBuf,
}

impl<R: Read, W: Write> Shell<R, W> {
    pub fn new(mut conn: SftpConn<R, W>) -> Result<Self, SftpError> {
        let working_dir = conn.realpath(".")?;
        info!("Initialized working directory: {working_dir}");
        Ok(Shell {
            conn,
            working_dir: PathBuf::from(working_dir),
        })
    }

    /// Runs one command. Returns `false` when the session should end.
    pub fn execute(&mut self, cmd: &SftpCommand) -> Result<bool, SftpError> {
        match cmd {
            SftpCommand::Ls { path } => self.list(path.as_deref())?,
            SftpCommand::Cd { path } => self.change_dir(path.as_deref())?,
            SftpCommand::Pwd => println!("{}", self.working_dir.display()),
            SftpCommand::Get {
                preserve,
                remote,
                local,
            } => self.get(remote, local.as_deref(), *preserve)?,
            SftpCommand::Put {
                preserve,
                local,
                remote,
            } => self.put(local, remote.as_deref(), *preserve)?,
            SftpCommand::Mkdir { path } => {
                let path = self.resolve(path);
                self.conn.mkdir(&path, &Attrib::default())?;
            }
            SftpCommand::Rmdir { path } => {
                let path = self.resolve(path);
                self.conn.rmdir(&path)?;
            }
            SftpCommand::Rm { path } => {
                let path = self.resolve(path);
                self.conn.remove(&path)?;
            }
            SftpCommand::Mv { old, new } => {
                let old = self.resolve(old);
                let new = self.resolve(new);
                self.conn.rename(&old, &new)?;
            }
            SftpCommand::Ln { target, link } => {
                // The link target is stored verbatim, only the link path is
                // anchored to the working directory
                let target = target.to_string_lossy().into_owned();
                let link = self.resolve(link);
                self.conn.symlink(&target, &link)?;
            }
            SftpCommand::Df { path } => self.df(path.as_deref())?,
            SftpCommand::Stat { path } => self.stat(path)?,
            SftpCommand::Help => CommandInterface::print_help(),
            SftpCommand::Bye => return Ok(false),
        }
        Ok(true)
    }

    fn resolve(&self, path: &Path) -> String {
        if path.is_absolute() {
            path.to_string_lossy().into_owned()
        } else {
            self.working_dir.join(path).to_string_lossy().into_owned()
        }
    }

    fn list(&mut self, path: Option<&Path>) -> Result<(), SftpError> {
        let target = match path {
            Some(p) => self.resolve(p),
            None => self.working_dir.to_string_lossy().into_owned(),
        };
        let entries = self.conn.readdir(&target)?;
        for entry in &entries {
            println!("{}", entry.longname);
        }
        Ok(())
    }

    fn change_dir(&mut self, path: Option<&Path>) -> Result<(), SftpError> {
        let target = match path {
            Some(p) => self.resolve(p),
            None => ".".to_string(),
        };
        let canonical = self.conn.realpath(&target)?;
        let attrs = self.conn.stat(&canonical, true)?;
        if attrs.has_perm() && !mode_is_dir(attrs.perm) {
            return Err(SftpError::NotADirectory(canonical));
        }
        self.working_dir = PathBuf::from(canonical);
        Ok(())
    }

    fn get(
        &mut self,
        remote: &Path,
        local: Option<&Path>,
        preserve: bool,
    ) -> Result<(), SftpError> {
        let remote_path = self.resolve(remote);
        let local_path = match local {
            Some(p) => p.to_path_buf(),
            None => PathBuf::from(
                remote
                    .file_name()
                    .ok_or_else(|| SftpError::NotRegular(remote_path.clone()))?,
            ),
        };
        let mut file = File::create(&local_path)?;
        self.conn.download(&remote_path, &mut file, preserve)?;
        println!(
            "Fetched {} -> {}",
            remote_path,
            local_path.display()
        );
        Ok(())
    }

    fn put(
        &mut self,
        local: &Path,
        remote: Option<&Path>,
        preserve: bool,
    ) -> Result<(), SftpError> {
        let remote_path = match remote {
            Some(p) => self.resolve(p),
            None => {
                let name = local
                    .file_name()
                    .ok_or_else(|| SftpError::NotRegular(local.display().to_string()))?;
                self.resolve(Path::new(name))
            }
        };
        let mut file = File::open(local)?;
        self.conn
            .upload(&mut file, local, &remote_path, None, preserve)?;
        println!("Sent {} -> {}", local.display(), remote_path);
        Ok(())
    }

    fn df(&mut self, path: Option<&Path>) -> Result<(), SftpError> {
        let target = match path {
            Some(p) => self.resolve(p),
            None => self.working_dir.to_string_lossy().into_owned(),
        };
        let st = self.conn.statvfs(&target, false)?;
        let frsize = st.f_frsize.max(1);
        println!(
            "Size: {} KB  Used: {} KB  Avail: {} KB",
            st.f_blocks * frsize / 1024,
            (st.f_blocks - st.f_bfree) * frsize / 1024,
            st.f_bavail * frsize / 1024
        );
        Ok(())
    }

    fn stat(&mut self, path: &Path) -> Result<(), SftpError> {
        let target = self.resolve(path);
        let attrs = self.conn.stat(&target, false)?;
        println!("{target}:");
        if attrs.has_size() {
            println!("  Size: {}", attrs.size);
        }
        if attrs.has_uidgid() {
            println!("  Owner: {}/{}", attrs.uid, attrs.gid);
        }
        if attrs.has_perm() {
            println!("  Permissions: 0{:o}", attrs.perm & 0o7777);
        }
        if attrs.has_times() {
            if let Some(mtime) = DateTime::from_timestamp(i64::from(attrs.mtime), 0) {
                println!("  Modified: {}", mtime.format("%Y-%m-%d %H:%M:%S"));
            }
        }
        Ok(())
    }
}
