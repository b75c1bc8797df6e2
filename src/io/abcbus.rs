//! ABC-bus controller.
//!
//! The ABC-bus is the peripheral bus of the Luxor ABC machines. An OUT
//! to port 1 latches a 6-bit device select code; subsequent accesses on
//! ports 0-7 are forwarded to whichever device answers that code (disk
//! controllers, the printer interface, the bus clock/calendar card).
//! An IN from port 7 resets the bus and deselects everything.

use super::disk::DiskSet;
use super::printer::PrinterPort;
use super::rtc::BusClock;
use super::IoCtx;

pub struct AbcBus {
    /// Current select code; -1 when nothing is selected.
    select: i8,
    pub disks: DiskSet,
    pub clock: BusClock,
}

impl AbcBus {
    pub fn new(disks: DiskSet) -> Self {
        Self {
            select: -1,
            disks,
            clock: BusClock::new(),
        }
    }

    pub fn select(&self) -> i8 {
        self.select
    }

    pub fn out(&mut self, port: u8, value: u8, ctx: &mut IoCtx, printer: &mut PrinterPort) {
        if port == 1 {
            self.select = (value & 0x3f) as i8;
            return;
        }

        match self.select {
            36 | 44 | 45 | 46 => {
                self.disks
                    .out(self.select, port, value, ctx.regs, ctx.trace)
            }
            60 => printer.bus_out(port, value),
            _ => {}
        }
    }

    pub fn input(&mut self, port: u8, ctx: &mut IoCtx, printer: &mut PrinterPort) -> u8 {
        if port == 7 {
            // Reset all
            self.select = -1;
            self.disks.reset_all();
            printer.bus_reset();
            return 0xff;
        }

        match self.select {
            36 | 44 | 45 | 46 => self.disks.input(self.select, port, ctx.regs, ctx.trace),
            60 => printer.bus_in(port),
            55 => self.clock.input(port),
            _ => 0xff,
        }
    }
}
