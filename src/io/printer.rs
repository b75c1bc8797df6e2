//! Printer interface.
//!
//! Bytes the guest prints are captured for the front end to spool; the
//! reverse direction (status responses from an attached print server)
//! is a small ring the front end may feed. Two guest-side faces share
//! the channel: the ABC-bus printer interface on select code 60, and
//! the ABC802's PR: port on DART channel A.

const BUF_SIZE: usize = 512;

pub struct PrinterPort {
    /// Bytes from the guest, waiting for the front end.
    received: Vec<u8>,
    /// Ring of response bytes toward the guest.
    output: [u8; BUF_SIZE],
    head: usize,
    tail: usize,
    /// DART channel A write registers.
    dart_ctl: [u8; 8],
    /// RR0 reports RI asserted when the machine booted in 80 columns.
    pub startup_width40: bool,
}

impl PrinterPort {
    pub fn new() -> Self {
        Self {
            received: Vec::new(),
            output: [0; BUF_SIZE],
            head: 0,
            tail: 0,
            dart_ctl: [0; 8],
            startup_width40: false,
        }
    }

    /// Drain everything the guest has printed.
    pub fn take_received(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.received)
    }

    /// Front end: queue response data toward the guest. Data beyond
    /// the ring capacity is lost.
    pub fn send(&mut self, data: &[u8]) {
        for &b in data {
            let nt = (self.tail + 1) % BUF_SIZE;
            if nt == self.head {
                return; // Output buffer full - data lost
            }
            self.output[self.tail] = b;
            self.tail = nt;
        }
    }

    fn read(&mut self) -> Option<u8> {
        if self.head == self.tail {
            None
        } else {
            let c = self.output[self.head];
            self.head = (self.head + 1) % BUF_SIZE;
            Some(c)
        }
    }

    fn poll(&self) -> bool {
        self.head != self.tail
    }

    // ========== ABC-bus face (select code 60) ==========

    pub fn bus_out(&mut self, port: u8, value: u8) {
        match port {
            0 => self.received.push(value),
            4 => {
                // Re-init: drop buffered output
                self.head = 0;
                self.tail = 0;
            }
            _ => {}
        }
    }

    pub fn bus_in(&mut self, port: u8) -> u8 {
        match port {
            0 => self.read().unwrap_or(0xff),
            1 => {
                if self.poll() {
                    0x40
                } else {
                    0
                }
            }
            _ => 0xff,
        }
    }

    pub fn bus_reset(&mut self) {
        self.head = 0;
        self.tail = 0;
    }

    // ========== ABC802 DART channel A ==========

    pub fn dart_out(&mut self, port: u8, value: u8) {
        if port & 1 == 0 {
            // Data port: only when the transmitter is enabled
            if self.dart_ctl[5] & 0x08 != 0 {
                self.received.push(value);
            }
            return;
        }

        let reg = (self.dart_ctl[0] & 7) as usize;
        self.dart_ctl[0] &= !7;
        self.dart_ctl[reg] = value;
    }

    pub fn dart_in(&mut self, port: u8) -> u8 {
        if port & 1 == 0 {
            // Data port: only when the receiver is enabled
            return if self.dart_ctl[3] & 1 != 0 {
                self.read().unwrap_or(0)
            } else {
                0
            };
        }

        let reg = self.dart_ctl[0] & 7;
        self.dart_ctl[0] &= !7;

        match reg {
            0 => {
                // RR0: CTS + DCD + Tx empty, RI mirrors the boot-time
                // column jumper, bit 0 = receive character available
                0x2c | ((!self.startup_width40 as u8) << 4)
                    | (self.dart_ctl[3] & self.poll() as u8)
            }
            1 => 0x01, // All sent
            _ => 0,
        }
    }
}

impl Default for PrinterPort {
    fn default() -> Self {
        Self::new()
    }
}
