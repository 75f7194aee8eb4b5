//! Local file I/O for the transferred file itself.
//!
//! An external collaborator by `spec.md` §1, but still part of this repo —
//! the binary needs somewhere to read from and write to. Grounded on
//! `original_source/network-tftp.c`'s `receive_file`/`send_file` helpers:
//! truncate-on-open, a "delete on failure" flag armed until the first
//! successful write, and clearing the execute bit once a download
//! completes.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// The destination side of a download: truncated on open, deleted if no
/// data is ever successfully written to it.
pub struct DestinationFile {
    path: PathBuf,
    handle: File,
    delete_on_failure: bool,
}

impl DestinationFile {
    pub fn create(path: impl Into<PathBuf>) -> Result<DestinationFile> {
        let path = path.into();
        let handle = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(Error::LocalWrite)?;
        Ok(DestinationFile {
            path,
            handle,
            delete_on_failure: true,
        })
    }

    /// Append one TFTP block's worth of payload. The first successful call
    /// disarms the delete-on-failure flag.
    pub fn write_block(&mut self, data: &[u8]) -> Result<()> {
        self.handle.write_all(data).map_err(Error::LocalWrite)?;
        self.delete_on_failure = false;
        Ok(())
    }

    /// Drop execute permissions and close. Called once the transfer
    /// completes successfully.
    pub fn finish(mut self) -> Result<()> {
        self.handle.flush().map_err(Error::LocalWrite)?;
        let mut perms = fs::metadata(&self.path)
            .map_err(Error::LocalWrite)?
            .permissions();
        let mode = perms.mode() & !0o111;
        perms.set_mode(mode);
        fs::set_permissions(&self.path, perms).map_err(Error::LocalWrite)?;
        Ok(())
    }

    /// Delete the file if nothing useful was ever written to it. Called on
    /// any failure path; a no-op once the flag has been disarmed.
    pub fn abandon(self) {
        if self.delete_on_failure {
            let _ = fs::remove_file(&self.path);
        }
    }
}

/// The source side of an upload: opened read-only, read sequentially in
/// block-sized chunks.
pub struct SourceFile {
    handle: File,
}

impl SourceFile {
    pub fn open(path: impl AsRef<Path>) -> Result<SourceFile> {
        let handle = File::open(path).map_err(Error::LocalRead)?;
        Ok(SourceFile { handle })
    }

    pub fn len(&self) -> Result<u64> {
        self.handle.metadata().map_err(Error::LocalRead).map(|m| m.len())
    }

    /// Read up to `buf.len()` bytes, returning how many were actually read
    /// (0 at EOF). A short read is how the caller detects the final block.
    pub fn read_block(&mut self, buf: &mut [u8]) -> Result<usize> {
        read_full(&mut self.handle, buf).map_err(Error::LocalRead)
    }
}

/// `Read::read` may return short reads from a pipe or a slow filesystem
/// well before EOF; TFTP's short-block-means-EOF convention requires us to
/// fill the buffer whenever data remains.
fn read_full(handle: &mut File, buf: &mut [u8]) -> io::Result<usize> {
    let mut total = 0;
    while total < buf.len() {
        match handle.read(&mut buf[total..])? {
            0 => break,
            n => total += n,
        }
    }
    Ok(total)
}

/// Derive a local basename from a remote path, for a destination the user
/// did not name explicitly (`spec.md` §4.4 "pre-flight checks").
pub fn basename(remote_path: &str) -> &str {
    remote_path
        .rsplit(['/', '\\'])
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or(remote_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read as _;

    #[test]
    fn basename_strips_directories() {
        assert_eq!(basename("/tmp/foo/bar.txt"), "bar.txt");
        assert_eq!(basename("bar.txt"), "bar.txt");
        assert_eq!(basename("dir/"), "dir/");
    }

    #[test]
    fn destination_file_round_trips_and_clears_execute_bit() {
        let dir = std::env::temp_dir().join(format!("rawtftp-test-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("out.bin");

        let mut dest = DestinationFile::create(&path).unwrap();
        dest.write_block(b"hello").unwrap();
        dest.finish().unwrap();

        let mut contents = Vec::new();
        File::open(&path).unwrap().read_to_end(&mut contents).unwrap();
        assert_eq!(contents, b"hello");

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o111, 0);

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn destination_file_abandon_deletes_when_nothing_written() {
        let dir = std::env::temp_dir().join(format!("rawtftp-test-abandon-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("never-written.bin");

        let dest = DestinationFile::create(&path).unwrap();
        dest.abandon();

        assert!(!path.exists());
    }
}
