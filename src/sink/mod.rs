//! Output redirection
//!
//! The guest's `fd_write` calls end up here. An [`OutputSink`] decides what a
//! descriptor's bytes turn into; [`StdoutRedirector`] sends descriptor 1 to a
//! visible [`TextSink`] and keeps everything else off of it.

#[cfg(target_arch = "wasm32")]
pub mod dom;

#[cfg(target_arch = "wasm32")]
pub use dom::DomSink;

use crate::console_log;
use crate::config::StderrMode;
use crate::wasi::abi::fd;
use std::cell::RefCell;
use std::rc::Rc;

/// Capability the shim writes through: `emit(descriptor, bytes) -> consumed`
///
/// Implementations must report the full buffer length as consumed so the
/// guest never observes a short or failed write on a standard stream.
pub trait OutputSink {
    fn emit(&mut self, descriptor: u32, bytes: &[u8]) -> usize;
}

/// An append-only text surface
pub trait TextSink {
    fn append(&mut self, text: &str);
}

impl TextSink for String {
    fn append(&mut self, text: &str) {
        self.push_str(text);
    }
}

/// Shared handle, so the creator can still inspect what was appended
impl<T: TextSink> TextSink for Rc<RefCell<T>> {
    fn append(&mut self, text: &str) {
        self.borrow_mut().append(text);
    }
}

/// Redirects standard output to a text sink, one line per write
pub struct StdoutRedirector<T: TextSink> {
    sink: T,
    stderr: StderrMode,
}

impl<T: TextSink> StdoutRedirector<T> {
    pub fn new(sink: T) -> Self {
        Self {
            sink,
            stderr: StderrMode::default(),
        }
    }

    pub fn with_stderr(sink: T, stderr: StderrMode) -> Self {
        Self { sink, stderr }
    }

    pub fn sink(&self) -> &T {
        &self.sink
    }

    pub fn into_inner(self) -> T {
        self.sink
    }
}

impl<T: TextSink> OutputSink for StdoutRedirector<T> {
    fn emit(&mut self, descriptor: u32, bytes: &[u8]) -> usize {
        match descriptor {
            fd::STDOUT => {
                let mut line = String::from_utf8_lossy(bytes).into_owned();
                line.push('\n');
                self.sink.append(&line);
            }
            fd::STDERR => {
                if self.stderr == StderrMode::Console {
                    let text = String::from_utf8_lossy(bytes);
                    console_log!("[guest stderr] {}", text.trim_end_matches('\n'));
                }
            }
            // Accepted and dropped
            _ => {}
        }
        bytes.len()
    }
}
