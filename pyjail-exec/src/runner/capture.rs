use std::io::{ErrorKind, Read};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};

/// Maximum number of bytes of standard output kept, the rest is drained and dropped.
///
/// Together with the result it must fit in the artifact, below the sandbox file-size limit.
pub const STDOUT_LIMIT: usize = 4 * 1024 * 1024;
/// Appended to the captured output when it got truncated.
pub const TRUNCATION_MARKER: &str = "\n[output truncated]\n";

/// A pipe of the interpreter, drained into memory by a background thread for as long as it stays
/// open.
///
/// Processes started by the script inherit the pipes of the interpreter and may keep them open
/// after it exits, so [`PipeCapture::finish`] waits for the end of the stream only for a bounded
/// time. A thread still blocked on the pipe is left behind, it ends with the runner.
#[derive(Debug)]
pub struct PipeCapture {
    captured: Arc<Mutex<Captured>>,
    done: Receiver<()>,
}

#[derive(Debug, Default)]
struct Captured {
    data: Vec<u8>,
    truncated: bool,
}

impl PipeCapture {
    /// Start draining `reader`, keeping at most `limit` bytes. A `None` reader captures nothing.
    pub fn start<R: Read + Send + 'static>(reader: Option<R>, limit: usize) -> PipeCapture {
        let captured = Arc::new(Mutex::new(Captured::default()));
        let (sender, done) = crossbeam_channel::bounded(1);
        if let Some(reader) = reader {
            let shared = captured.clone();
            let spawned = std::thread::Builder::new()
                .name("pipe capture".into())
                .spawn(move || {
                    drain(reader, limit, &shared);
                    let _ = sender.send(());
                });
            if let Err(e) = spawned {
                error!("Cannot spawn the capture thread: {}", e);
            }
        }
        // without a thread the sender is already gone and `finish` does not wait
        PipeCapture { captured, done }
    }

    /// Wait up to `wait` for the end of the stream and return what was captured so far, decoded
    /// as UTF-8.
    pub fn finish(self, wait: Duration) -> String {
        if let Err(RecvTimeoutError::Timeout) = self.done.recv_timeout(wait) {
            warn!("The pipe is still open after {:?}, keeping what was read", wait);
        }
        let captured = self.captured.lock().unwrap_or_else(|e| e.into_inner());
        let mut text = String::from_utf8_lossy(&captured.data).into_owned();
        if captured.truncated {
            text.push_str(TRUNCATION_MARKER);
        }
        text
    }
}

fn drain<R: Read>(mut reader: R, limit: usize, captured: &Mutex<Captured>) {
    let mut chunk = [0u8; 8192];
    loop {
        let n = match reader.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                warn!("Failed to read from the interpreter: {}", e);
                break;
            }
        };
        let mut captured = captured.lock().unwrap_or_else(|e| e.into_inner());
        let room = limit - captured.data.len();
        if n > room {
            captured.data.extend_from_slice(&chunk[..room]);
            captured.truncated = true;
        } else {
            captured.data.extend_from_slice(&chunk[..n]);
        }
    }
}
