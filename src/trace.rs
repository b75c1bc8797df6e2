//! Trace stream support.
//!
//! The trace stream is a guest-facing diagnostic: one line per CPU
//! instruction (with a diff of the register file), per port access, per
//! interrupt acknowledge and per disk/cassette/printer command. It is
//! separate from the `log` facade, which carries host-side diagnostics
//! only (bad configuration, missing images).
//!
//! Categories are a bitmask so the front end can enable any mix.

use std::fmt;
use std::io::Write;

/// No tracing.
pub const NONE: u32 = 0;
/// CPU execution and memory accesses.
pub const CPU: u32 = 0x01;
/// Port I/O, interrupt acknowledge, EOI.
pub const IO: u32 = 0x02;
/// Disk controller commands.
pub const DISK: u32 = 0x04;
/// Cassette I/O.
pub const CAS: u32 = 0x08;
/// Printer interface.
pub const PR: u32 = 0x10;
/// Everything.
pub const ALL: u32 = 0x1f;

/// Sink for the trace stream.
///
/// A disabled tracer ignores all output; every emit site checks the
/// category mask first so formatting cost is only paid when tracing.
pub struct Tracer {
    flags: u32,
    sink: Option<Box<dyn Write + Send>>,
}

impl Tracer {
    /// A tracer that drops everything.
    pub fn off() -> Self {
        Self {
            flags: NONE,
            sink: None,
        }
    }

    /// Trace the given categories into `sink`.
    pub fn new(flags: u32, sink: Box<dyn Write + Send>) -> Self {
        Self {
            flags,
            sink: Some(sink),
        }
    }

    /// Is any of the categories in `mask` enabled?
    #[inline]
    pub fn enabled(&self, mask: u32) -> bool {
        self.flags & mask != 0 && self.sink.is_some()
    }

    /// Emit preformatted text under the given categories.
    pub fn put(&mut self, mask: u32, text: &str) {
        if self.enabled(mask) {
            if let Some(sink) = &mut self.sink {
                let _ = sink.write_all(text.as_bytes());
            }
        }
    }

    /// Emit formatted text under the given categories.
    pub fn write(&mut self, mask: u32, args: fmt::Arguments) {
        if self.enabled(mask) {
            if let Some(sink) = &mut self.sink {
                let _ = sink.write_fmt(args);
            }
        }
    }

    /// Hex-dump a data block, 16 bytes per line with an ASCII gutter.
    pub fn dump_data(&mut self, mask: u32, prefix: &str, data: &[u8]) {
        if !self.enabled(mask) {
            return;
        }
        let Some(sink) = &mut self.sink else { return };

        for (i, chunk) in data.chunks(16).enumerate() {
            let _ = write!(sink, "{}: {:04x} : ", prefix, i * 16);

            for j in 0..16 {
                if let Some(b) = chunk.get(j) {
                    let _ = write!(sink, " {:02x}", b);
                } else {
                    let _ = sink.write_all(b"   ");
                }
                if j == 8 {
                    let _ = sink.write_all(b" -");
                }
            }

            let _ = sink.write_all(b" [");
            for j in 0..16 {
                let c = chunk.get(j).copied().unwrap_or(b' ');
                let c = if (b' '..=b'~').contains(&c) { c } else { b'.' };
                let _ = sink.write_all(&[c]);
            }
            let _ = sink.write_all(b"]\n");
        }
    }

    /// Flush the sink so trace output is not buffered indefinitely.
    pub fn flush(&mut self) {
        if let Some(sink) = &mut self.sink {
            let _ = sink.flush();
        }
    }
}

impl Default for Tracer {
    fn default() -> Self {
        Self::off()
    }
}
