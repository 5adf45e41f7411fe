//! Named-pipe sink
//!
//! The FIFO is created at startup if missing (mode 0666) and removed at
//! shutdown only if this process created it. The write end is opened
//! non-blocking and lazily: with no reader attached the open fails with
//! ENXIO, which is reported as a failed write and retried next cycle.

use std::ffi::CString;
use std::fs;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{FileTypeExt, PermissionsExt};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::net::unix::pipe;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::{Sink, SINK_WRITE_BUDGET};
use crate::error::{BridgeError, Result};

/// FIFO permissions, readable and writable by any local daemon
pub const FIFO_MODE: u32 = 0o666;

/// Named pipe feeding a position daemon
#[derive(Debug)]
pub struct FifoSink {
    path: PathBuf,
    created: bool,
    closed: bool,
    writer: Option<pipe::Sender>,
}

impl FifoSink {
    /// Make sure a FIFO exists at `path`, creating it if needed
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::SinkUnavailable`] if the path exists but is not
    /// a FIFO, or the FIFO cannot be created
    pub fn acquire<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let created = match fs::metadata(&path) {
            Ok(meta) if meta.file_type().is_fifo() => {
                debug!("Using existing FIFO {}", path.display());
                false
            }
            Ok(_) => {
                return Err(BridgeError::SinkUnavailable(format!(
                    "{} exists and is not a FIFO",
                    path.display()
                )));
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                make_fifo(&path)?;
                info!("Created FIFO {}", path.display());
                true
            }
            Err(e) => {
                return Err(BridgeError::SinkUnavailable(format!(
                    "cannot stat {}: {}",
                    path.display(),
                    e
                )));
            }
        };

        Ok(Self {
            path,
            created,
            closed: false,
            writer: None,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a reader was attached at the last write
    pub fn has_writer(&self) -> bool {
        self.writer.is_some()
    }

    fn writer(&mut self) -> Result<&mut pipe::Sender> {
        if self.closed {
            return Err(BridgeError::SinkWriteFailed("FIFO sink closed".to_string()));
        }

        if self.writer.is_none() {
            let sender = pipe::OpenOptions::new().open_sender(&self.path).map_err(|e| {
                if e.raw_os_error() == Some(libc::ENXIO) {
                    BridgeError::SinkWriteFailed(format!("no reader on {}", self.path.display()))
                } else {
                    BridgeError::SinkWriteFailed(format!("open {}: {}", self.path.display(), e))
                }
            })?;
            info!("Reader attached to {}", self.path.display());
            self.writer = Some(sender);
        }

        self.writer
            .as_mut()
            .ok_or_else(|| BridgeError::SinkWriteFailed("FIFO writer unavailable".to_string()))
    }
}

fn make_fifo(path: &Path) -> Result<()> {
    let c_path = CString::new(path.as_os_str().as_bytes()).map_err(|_| {
        BridgeError::SinkUnavailable(format!("{} contains a NUL byte", path.display()))
    })?;

    // SAFETY: c_path is a valid NUL-terminated string for the duration of the call
    let rc = unsafe { libc::mkfifo(c_path.as_ptr(), FIFO_MODE as libc::mode_t) };
    if rc != 0 {
        let err = io::Error::last_os_error();
        return Err(BridgeError::SinkUnavailable(format!(
            "mkfifo {}: {}",
            path.display(),
            err
        )));
    }

    // mkfifo is subject to the umask
    fs::set_permissions(path, fs::Permissions::from_mode(FIFO_MODE)).map_err(|e| {
        BridgeError::SinkUnavailable(format!("chmod {}: {}", path.display(), e))
    })
}

#[async_trait]
impl Sink for FifoSink {
    async fn write(&mut self, frame: &[u8]) -> Result<()> {
        let sender = self.writer()?;

        // A fresh sender has no readiness yet; try_write alone reports WouldBlock
        let result = match timeout(SINK_WRITE_BUDGET, sender.writable()).await {
            Ok(Ok(())) => sender.try_write(frame),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(io::ErrorKind::WouldBlock.into()),
        };

        match result {
            Ok(written) if written == frame.len() => Ok(()),
            Ok(written) => Err(BridgeError::SinkWriteFailed(format!(
                "short write to {}: {} of {} bytes",
                self.path.display(),
                written,
                frame.len()
            ))),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Err(BridgeError::SinkWriteFailed(
                format!("{} is full", self.path.display()),
            )),
            Err(e) => {
                // EPIPE: the reader went away; reopen on a later cycle
                self.writer = None;
                Err(BridgeError::SinkWriteFailed(format!(
                    "write {}: {}",
                    self.path.display(),
                    e
                )))
            }
        }
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.writer = None;

        if self.created {
            match fs::remove_file(&self.path) {
                Ok(()) => info!("Removed FIFO {}", self.path.display()),
                Err(e) => warn!("Failed to remove FIFO {}: {}", self.path.display(), e),
            }
        }
    }

    fn describe(&self) -> String {
        format!("fifo://{}", self.path.display())
    }
}
