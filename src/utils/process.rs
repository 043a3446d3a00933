//! Child process helpers

use std::io::Read;
use std::thread::JoinHandle;

/// Bytes of stderr kept for error reports
const TAIL_BYTES: usize = 16 * 1024;

/// Drains a child's stderr on its own thread, keeping only the tail.
///
/// A child that writes to a full stderr pipe stops reading its stdin, so any
/// process we feed frames to must have its stderr consumed concurrently.
pub struct StderrTail {
    handle: Option<JoinHandle<Vec<u8>>>,
}

impl StderrTail {
    pub fn spawn<R: Read + Send + 'static>(mut stderr: R) -> Self {
        let handle = std::thread::Builder::new()
            .name("stderr-drain".to_string())
            .spawn(move || {
                let mut tail = Vec::new();
                let mut chunk = [0u8; 4096];
                loop {
                    match stderr.read(&mut chunk) {
                        Ok(0) => break,
                        Ok(n) => {
                            tail.extend_from_slice(&chunk[..n]);
                            if tail.len() > TAIL_BYTES {
                                tail.drain(..tail.len() - TAIL_BYTES);
                            }
                        }
                        Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                        Err(_) => break,
                    }
                }
                tail
            });

        match handle {
            Ok(handle) => Self {
                handle: Some(handle),
            },
            Err(e) => {
                tracing::warn!("Failed to spawn stderr drain: {}", e);
                Self { handle: None }
            }
        }
    }

    /// Wait for the stream to close and return what was kept
    pub fn finish(mut self) -> String {
        let bytes = self
            .handle
            .take()
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default();
        String::from_utf8_lossy(&bytes).trim().to_string()
    }
}
