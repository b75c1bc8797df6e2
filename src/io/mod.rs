//! Port I/O dispatch.
//!
//! The Z80's OUT and IN instructions land here. Decoding is
//! model-specific: the ABC80 decodes only five low port bits, the
//! ABC802 first collapses its partial-decode aliases with a mask table
//! and then fans out to the DARTs, SIO, CTC, CRTC and RTC. Both models
//! share the ABC-bus controller with its 6-bit device select latch.
//!
//! Devices get an [`IoCtx`] with the memory map, interrupt controller,
//! scheduler and tracer; the CPU register snapshot rides along for
//! trace output and the cassette filename snoop.

use crate::cpu::Regs;
use crate::irq::{IrqController, IrqHooks};
use crate::memory::Memory;
use crate::scheduler::Scheduler;
use crate::trace::{self, Tracer};

pub mod abcbus;
pub mod cassette;
pub mod crtc;
pub mod ctc;
pub mod disk;
pub mod keyboard;
pub mod printer;
pub mod rtc;

use crate::config::{Model, TapeOptions};
pub use disk::DiskSet;

/// Interrupt priorities. The Z80 daisy chain fixes priority by board
/// position; vectors are programmable, so interrupts are identified by
/// priority level.
pub mod prio {
    pub const ABC80_PIOA: u8 = 0;
    pub const ABC80_PIOB: u8 = 1;

    pub const ABC800_DARTA: u8 = 0;
    pub const ABC800_DARTB: u8 = 1;
    pub const ABC800_SIOA: u8 = 2;
    pub const ABC800_SIOB: u8 = 3;
    pub const ABC800_CTC0: u8 = 4;
    pub const ABC800_CTC1: u8 = 5;
    pub const ABC800_CTC2: u8 = 6;
    pub const ABC800_CTC3: u8 = 7;
}

/// Everything a device handler may need besides its own state.
pub struct IoCtx<'a> {
    pub mem: &'a mut Memory,
    pub irq: &'a mut IrqController,
    pub sched: &'a mut Scheduler,
    pub trace: &'a mut Tracer,
    pub regs: Regs,
}

/// The model's port decoder plus every port-mapped device.
pub struct IoPorts {
    model: Model,
    pub abcbus: abcbus::AbcBus,
    pub cassette: cassette::Cassette,
    pub keyboard: keyboard::Keyboard,
    pub crtc: crtc::Crtc,
    pub ctc: ctc::Ctc,
    pub rtc806: rtc::Rtc806,
    pub printer: printer::PrinterPort,
}

impl IoPorts {
    /// Wire up the devices for `model`, registering their interrupt
    /// priorities.
    pub fn new(
        model: Model,
        irq: &mut IrqController,
        disks: DiskSet,
        tape: TapeOptions,
        faketype: std::sync::Arc<std::sync::atomic::AtomicBool>,
    ) -> Self {
        let keyboard = match model {
            Model::Abc80 => keyboard::Keyboard::new_abc80(irq, faketype),
            Model::Abc802 => keyboard::Keyboard::new_abc802(irq),
        };
        let cassette = match model {
            Model::Abc80 => cassette::Cassette::new_abc80(irq, tape),
            Model::Abc802 => cassette::Cassette::new_abc802(irq, tape),
        };
        let ctc = match model {
            Model::Abc80 => ctc::Ctc::unwired(),
            Model::Abc802 => ctc::Ctc::new(irq),
        };
        if model == Model::Abc802 {
            // Printer DART channel A heads the chain; it does not
            // generate interrupts yet but the slot is its own
            let _ = irq.register(prio::ABC800_DARTA, false, false);
        }

        Self {
            model,
            abcbus: abcbus::AbcBus::new(disks),
            cassette,
            keyboard,
            crtc: crtc::Crtc::new(),
            ctc,
            rtc806: rtc::Rtc806::new(),
            printer: printer::PrinterPort::new(),
        }
    }

    pub fn model(&self) -> Model {
        self.model
    }

    /// OUT instruction entry point.
    pub fn out(&mut self, port: u8, value: u8, ctx: &mut IoCtx) {
        ctx.trace.write(
            trace::IO,
            format_args!(
                "OUT: port 0x{:02x} ({:3}) sel 0x{:02x} ({:2}) data 0x{:02x} ({:3}) PC={:04x}\n",
                port,
                port,
                self.abcbus.select() as u8,
                self.abcbus.select(),
                value,
                value,
                ctx.regs.pc
            ),
        );

        match self.model {
            Model::Abc80 => self.abc80_out(port, value, ctx),
            Model::Abc802 => self.abc802_out(port, value, ctx),
        }
    }

    /// IN instruction entry point.
    pub fn input(&mut self, port: u8, ctx: &mut IoCtx) -> u8 {
        let sel = self.abcbus.select();
        let value = match self.model {
            Model::Abc80 => self.abc80_in(port, ctx),
            Model::Abc802 => self.abc802_in(port, ctx),
        };

        ctx.trace.write(
            trace::IO,
            format_args!(
                " IN: port 0x{:02x} ({:3}) sel 0x{:02x} ({:2}) data 0x{:02x} ({:3}) PC={:04x}\n",
                port, port, sel as u8, sel, value, value, ctx.regs.pc
            ),
        );

        value
    }

    fn abc80_out(&mut self, port: u8, value: u8, ctx: &mut IoCtx) {
        let port = port & 0x17; // Only these bits decoded in ABC80

        match port {
            0..=5 => self.abcbus.out(port, value, ctx, &mut self.printer),

            6 => {
                // Sound generator; byte 131 is the BEL everyone uses
                if value == 131 {
                    print!("\x07");
                    use std::io::Write;
                    let _ = std::io::stdout().flush();
                }
            }

            7 => ctx.mem.abc80_set_map(value & 3), // Mikrodatorn 64K page latch

            0x11 => {
                // Keyboard control port (57): an even byte programs the
                // interrupt vector
                if value & 1 == 0 {
                    ctx.irq.set_vector(self.keyboard.prio(), value as i16);
                }
            }

            0x12 | 0x13 => self.cassette.piob_out(port, value, ctx),

            _ => {}
        }
    }

    fn abc80_in(&mut self, port: u8, ctx: &mut IoCtx) -> u8 {
        let port = port & 0x17;

        match port {
            0 | 1 | 7 => self.abcbus.input(port, ctx, &mut self.printer),

            3 => {
                self.set_mode40(true, ctx);
                0xff
            }
            4 => {
                self.set_mode40(false, ctx);
                0xff
            }

            0x10 => self.keyboard.abc80_data_in(), // Port 56

            0x12 => self.cassette.piob_in(), // Port 58

            _ => 0xff,
        }
    }

    fn abc802_out(&mut self, port: u8, value: u8, ctx: &mut IoCtx) {
        let port = abc800_mangle_port(port);

        match port {
            0..=5 => self.abcbus.out(port, value, ctx, &mut self.printer),
            32 | 33 => self.printer.dart_out(port, value),
            34 | 35 => {
                if let Some(mode40) = self.keyboard.dart_out(port, value, ctx) {
                    self.set_mode40(mode40, ctx);
                }
            }
            54 | 55 => self.rtc806.out(port, value),
            56 | 57 => self.crtc.out(port, value),
            66 | 67 => self.cassette.sio_out(port, value, ctx),
            96..=99 => self.ctc.out(port, value, ctx),
            _ => {}
        }
    }

    fn abc802_in(&mut self, port: u8, ctx: &mut IoCtx) -> u8 {
        let port = abc800_mangle_port(port);

        match port {
            0 | 1 | 2 | 7 => self.abcbus.input(port, ctx, &mut self.printer),
            32 | 33 => self.printer.dart_in(port),
            34 | 35 => self.keyboard.dart_in(port),
            54 | 55 => self.rtc806.input(port),
            56 | 57 => self.crtc.input(port),
            66 | 67 => self.cassette.sio_in(port, ctx),
            96..=99 => self.ctc.input(port, ctx),
            _ => 0xff,
        }
    }

    /// 40/80 column switch: video state, and on the ABC80 also the
    /// memory map.
    fn set_mode40(&mut self, mode40: bool, ctx: &mut IoCtx) {
        self.crtc.mode40 = mode40;
        if self.model == Model::Abc80 {
            ctx.mem.abc80_set_40col(mode40);
        }
    }
}

/// Interrupt acknowledge and EOI hooks, dispatched back from the
/// controller by priority.
impl IrqHooks for IoPorts {
    fn intack(&mut self, prio: u8, vector: i16) -> i16 {
        match (self.model, prio) {
            // Fake-typing keyboard latches the key byte at INTACK
            (Model::Abc80, prio::ABC80_PIOA) => self.keyboard.intack_fake(vector),
            // The cassette SIO answers with status-affects-vector
            (Model::Abc802, prio::ABC800_SIOB) => self.cassette.sio_intack(vector),
            _ => vector,
        }
    }

    fn eoi(&mut self, prio: u8) {
        match (self.model, prio) {
            (Model::Abc80, prio::ABC80_PIOB) => self.cassette.pio_eoi(),
            (Model::Abc802, prio::ABC800_SIOB) => self.cassette.sio_eoi(),
            _ => {}
        }
    }
}

/// Collapse the ABC802's partial port decoding so every alias of a
/// device lands on its canonical port number.
pub fn abc800_mangle_port(port: u8) -> u8 {
    if port & 0xe0 == 0x00 {
        port & 0xe7
    } else if port & 0xf0 == 0x20 {
        port & 0xf3
    } else if port & 0xf8 == 0x28 {
        port & 0xf9
    } else if port & 0xc0 == 0x40 {
        port & 0xe3
    } else {
        port
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mangle_port_aliases() {
        // Low bus ports alias on bits 3-4
        assert_eq!(abc800_mangle_port(0x08), 0x00);
        assert_eq!(abc800_mangle_port(0x19), 0x01);
        // DART aliases
        assert_eq!(abc800_mangle_port(0x2e), 0x22);
        // SIO aliases collapse to 0x40..0x43
        assert_eq!(abc800_mangle_port(0x5a), 0x42);
        // CTC ports unchanged
        assert_eq!(abc800_mangle_port(0x60), 0x60);
        assert_eq!(abc800_mangle_port(0x63), 0x63);
    }
}
