//! Process-wide console and output capture
//!
//! Both output channels of executed code go to one process-wide
//! destination. During an execution the engine holds [`OUTPUT_LOCK`] and
//! points that destination at a [`CaptureBuffer`]; this serialisation is the
//! throughput ceiling of the whole service.

use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::worker::KillSwitch;

/// Serialises executions across the process
pub static OUTPUT_LOCK: Mutex<()> = Mutex::new(());

static CONSOLE: Mutex<Destination> = Mutex::new(Destination::Host);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Out,
    Err,
}

/// Where console writes currently go
#[derive(Debug, Clone)]
pub enum Destination {
    /// The host process's stdout and stderr
    Host,
    Capture(Arc<CaptureBuffer>),
}

/// Bounded in-memory sink shared by both channels
#[derive(Debug)]
pub struct CaptureBuffer {
    data: Mutex<Vec<u8>>,
    limit: usize,
    truncated: AtomicBool,
}

impl CaptureBuffer {
    pub fn new(limit: usize) -> Self {
        Self {
            data: Mutex::new(Vec::new()),
            limit,
            truncated: AtomicBool::new(false),
        }
    }

    pub fn write(&self, bytes: &[u8]) {
        let mut data = self.data.lock();
        let room = self.limit.saturating_sub(data.len());
        if bytes.len() > room {
            self.truncated.store(true, Ordering::Relaxed);
        }
        data.extend_from_slice(&bytes[..bytes.len().min(room)]);
    }

    /// Captured bytes decoded as UTF-8, invalid sequences replaced
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.data.lock()).into_owned()
    }

    pub fn is_truncated(&self) -> bool {
        self.truncated.load(Ordering::Relaxed)
    }
}

/// The write was refused because the writer has been killed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Killed;

/// Write to the current destination on behalf of a worker
///
/// The kill switch is checked while the console is held, so a killed
/// worker can never write to a destination restored after its deadline.
pub fn emit(channel: Channel, bytes: &[u8], kill: &KillSwitch) -> Result<(), Killed> {
    let console = CONSOLE.lock();
    if kill.is_killed() {
        return Err(Killed);
    }
    match &*console {
        Destination::Capture(buffer) => buffer.write(bytes),
        Destination::Host => {
            // Host console failures are not the executed code's concern
            let _ = match channel {
                Channel::Out => std::io::stdout().write_all(bytes),
                Channel::Err => std::io::stderr().write_all(bytes),
            };
        }
    }
    Ok(())
}

/// Points the console at a capture buffer until dropped
///
/// Dropping restores whatever destination was installed before, on every
/// exit path of the owner.
#[derive(Debug)]
pub struct ConsoleRedirect {
    previous: Option<Destination>,
}

impl ConsoleRedirect {
    pub fn install(buffer: Arc<CaptureBuffer>) -> Self {
        let previous = std::mem::replace(&mut *CONSOLE.lock(), Destination::Capture(buffer));
        Self {
            previous: Some(previous),
        }
    }
}

impl Drop for ConsoleRedirect {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            *CONSOLE.lock() = previous;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_truncates_at_limit() {
        let buffer = CaptureBuffer::new(5);
        buffer.write(b"abc");
        assert!(!buffer.is_truncated());
        buffer.write(b"defg");
        assert_eq!(buffer.contents(), "abcde");
        assert!(buffer.is_truncated());
    }

    #[test]
    fn redirect_captures_and_restores() {
        let _serial = OUTPUT_LOCK.lock();
        let kill = KillSwitch::new();
        let buffer = Arc::new(CaptureBuffer::new(1024));
        {
            let _redirect = ConsoleRedirect::install(Arc::clone(&buffer));
            emit(Channel::Out, b"out ", &kill).unwrap();
            emit(Channel::Err, b"err", &kill).unwrap();
        }
        assert_eq!(buffer.contents(), "out err");
        assert!(matches!(*CONSOLE.lock(), Destination::Host));
    }

    #[test]
    fn killed_writers_are_refused() {
        let _serial = OUTPUT_LOCK.lock();
        let kill = KillSwitch::new();
        let buffer = Arc::new(CaptureBuffer::new(1024));
        let _redirect = ConsoleRedirect::install(Arc::clone(&buffer));
        kill.kill();
        assert_eq!(emit(Channel::Out, b"late", &kill), Err(Killed));
        assert_eq!(buffer.contents(), "");
    }
}
