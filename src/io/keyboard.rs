//! Keyboard interface.
//!
//! The keyboard state shared with the event thread is a single 16-bit
//! word: bits 0-6 carry the ABC key code, bit 8 (NEW) is set on every
//! key-down and cleared when the CPU reads the code, bit 11 (DOWN)
//! tracks the physical key and is cleared on key-up. All mutations are
//! single atomic read-modify-writes, so the CPU thread and the event
//! thread never tear it.
//!
//! On the ABC80 the CPU reads the word directly through port 56 (the
//! PIO A data port); on the ABC802 it arrives through channel B of a
//! Z80 DART whose status vector is programmed through the control port.
//!
//! The bit constants are chosen to make the DART status read trivial:
//! NEW lands on RR0 bit 0 (receive character available) and DOWN on
//! RR0 bit 3 (DCD) after the shift by 8.

use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::Arc;

use super::{prio, IoCtx};
use crate::config::Model;
use crate::irq::{IrqController, IrqLine};

/// Key-down not yet seen by the CPU.
pub const KEYB_NEW: u16 = 0x100;
/// Key physically held down.
pub const KEYB_DOWN: u16 = 0x800;

/// The shared keyboard event word.
pub struct KeyboardWord(AtomicU16);

impl KeyboardWord {
    pub fn new(initial: u16) -> Self {
        Self(AtomicU16::new(initial))
    }

    /// Event thread: a key went down.
    pub fn post_down(&self, code: u8) {
        self.0
            .store(code as u16 | KEYB_NEW | KEYB_DOWN, Ordering::Release);
    }

    /// Event thread: the key came back up. Returns the prior word.
    pub fn post_up(&self) -> u16 {
        self.0.fetch_and(!KEYB_DOWN, Ordering::AcqRel)
    }

    /// CPU thread: read the word, clearing NEW. Returns the word as it
    /// was before the clear.
    pub fn consume(&self) -> u16 {
        self.0.fetch_and(!KEYB_NEW, Ordering::AcqRel)
    }

    pub fn load(&self) -> u16 {
        self.0.load(Ordering::Acquire)
    }
}

/// CPU-side keyboard device (ABC80 PIO port or ABC802 DART channel B).
pub struct Keyboard {
    word: Arc<KeyboardWord>,
    line: IrqLine,
    model: Model,
    /// Fake-typing mode: each key is delivered as a single interrupt
    /// with the byte latched at INTACK.
    faketype: Arc<AtomicBool>,
    fakedata: u8,
    /// DART write registers (WR0 holds the register pointer).
    dart_ctl: [u8; 8],
    /// Vsync as sampled by the reset-external-status command.
    dart_vsync: bool,
    /// Vsync edge since the last sample.
    vsync_pending: bool,
}

impl Keyboard {
    pub fn new_abc80(irq: &mut IrqController, faketype: Arc<AtomicBool>) -> Self {
        // Fake typing replaces the vector fetch with a hook that
        // latches the key byte; decided once at power-up
        let hook = faketype.load(Ordering::Acquire);
        let line = irq.register(prio::ABC80_PIOA, hook, false);

        Self {
            word: Arc::new(KeyboardWord::new(0)),
            line,
            model: Model::Abc80,
            faketype,
            fakedata: 0,
            dart_ctl: [0; 8],
            dart_vsync: false,
            vsync_pending: false,
        }
    }

    pub fn new_abc802(irq: &mut IrqController) -> Self {
        let line = irq.register(prio::ABC800_DARTB, false, false);

        Self {
            word: Arc::new(KeyboardWord::new(0xff)),
            line,
            model: Model::Abc802,
            faketype: Arc::new(AtomicBool::new(false)),
            fakedata: 0,
            dart_ctl: [0; 8],
            dart_vsync: false,
            vsync_pending: false,
        }
    }

    pub fn prio(&self) -> u8 {
        self.line.prio()
    }

    /// The shared word, for the event bridge.
    pub fn word(&self) -> Arc<KeyboardWord> {
        Arc::clone(&self.word)
    }

    /// The interrupt line the event bridge raises after posting a key.
    pub fn line(&self) -> IrqLine {
        self.line.clone()
    }

    pub fn model(&self) -> Model {
        self.model
    }

    /// Vertical retrace edge (ABC802), sampled by the DART status
    /// logic.
    pub fn note_vsync(&mut self) {
        self.vsync_pending = true;
    }

    /// ABC80 keyboard data port (56).
    pub fn abc80_data_in(&mut self) -> u8 {
        if self.faketype.load(Ordering::Acquire) {
            let v = self.fakedata;
            self.fakedata &= !0x80;
            v
        } else {
            let kbd = self.word.load();
            (kbd & 0x7f) as u8 | if kbd & KEYB_DOWN != 0 { 0x80 } else { 0 }
        }
    }

    /// INTACK hook for fake typing: latch the key byte, consume NEW.
    pub fn intack_fake(&mut self, vector: i16) -> i16 {
        let data = self.word.consume();
        self.fakedata = (data & 0x7f) as u8 | if data & KEYB_NEW != 0 { 0x80 } else { 0 };
        vector
    }

    /// ABC802 keyboard DART control/data write. Returns a 40-column
    /// request when WR5 changes the display width.
    pub fn dart_out(&mut self, port: u8, value: u8, ctx: &mut IoCtx) -> Option<bool> {
        if port & 1 == 0 {
            return None; // Data out - ignore for now
        }

        let mut mode40 = None;

        let reg = (self.dart_ctl[0] & 7) as usize;
        self.dart_ctl[0] &= !7; // Restore register 0

        self.dart_ctl[reg] = value;
        match reg {
            0 => match (value >> 3) & 7 {
                2 => {
                    // Reset external/status interrupts: sample vsync
                    self.dart_vsync = self.vsync_pending;
                    self.vsync_pending = false;
                }
                3 => self.dart_ctl = [0; 8], // Channel reset
                4 => {} // Allow IRQ to be enabled
                _ => {}
            },
            5 => {
                mode40 = Some(value & 2 != 0);
                ctx.mem.abc802_open_mem(value & 0x80 != 0);
            }
            _ => {}
        }

        // Vector selection follows the receive-interrupt mode bits
        if self.dart_ctl[1] & 0x18 == 0 {
            ctx.irq.set_vector(self.prio(), -1);
        } else if self.dart_ctl[1] & 0x04 != 0 {
            // Status affects vector
            ctx.irq
                .set_vector(self.prio(), ((self.dart_ctl[2] & !0x0f) | 0x04) as i16);
        } else {
            // Fixed vector
            ctx.irq
                .set_vector(self.prio(), (self.dart_ctl[2] & !0x01) as i16);
        }

        mode40
    }

    /// ABC802 keyboard DART read.
    pub fn dart_in(&mut self, port: u8) -> u8 {
        if port & 1 == 0 {
            // Data register: the key code, clearing NEW
            return self.word.consume() as u8;
        }

        let reg = self.dart_ctl[0] & 7;
        self.dart_ctl[0] &= !7;

        match reg {
            0 => {
                (self.word.load() >> 8) as u8
                    | (1 << 2)                        // Transmit buffer empty
                    | ((self.dart_vsync as u8) << 4)  // RI -> vsync
                    | (1 << 5) // CTS -> 60 Hz
            }
            1 => 1 << 0, // All sent
            2 => self.dart_ctl[2],
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::irq::NoHooks;

    #[test]
    fn test_word_new_clears_on_consume() {
        let word = KeyboardWord::new(0);
        word.post_down(0x41);

        let first = word.consume();
        assert_eq!(first & 0x7f, 0x41);
        assert_ne!(first & KEYB_NEW, 0);
        assert_ne!(first & KEYB_DOWN, 0);

        // NEW is gone, DOWN persists
        let second = word.consume();
        assert_eq!(second & KEYB_NEW, 0);
        assert_ne!(second & KEYB_DOWN, 0);
    }

    #[test]
    fn test_word_down_clears_on_key_up() {
        let word = KeyboardWord::new(0);
        word.post_down(0x20);
        word.post_up();
        assert_eq!(word.load() & KEYB_DOWN, 0);
        assert_eq!(word.load() & 0x7f, 0x20);
    }

    #[test]
    fn test_abc80_data_reflects_down_state() {
        let mut irq = IrqController::new();
        let mut kb = Keyboard::new_abc80(&mut irq, Arc::new(AtomicBool::new(false)));

        kb.word().post_down(0x41);
        assert_eq!(kb.abc80_data_in(), 0xC1);
        kb.word().post_up();
        assert_eq!(kb.abc80_data_in(), 0x41);
    }

    #[test]
    fn test_fake_intack_latches_byte() {
        let mut irq = IrqController::new();
        let faketype = Arc::new(AtomicBool::new(true));
        let mut kb = Keyboard::new_abc80(&mut irq, faketype);

        kb.word().post_down(0x30);
        assert_eq!(kb.intack_fake(0x40), 0x40);
        // First read has bit 7 set, the next does not
        assert_eq!(kb.abc80_data_in(), 0xB0);
        assert_eq!(kb.abc80_data_in(), 0x30);
    }

    #[test]
    fn test_dart_status_bits() {
        let mut irq = IrqController::new();
        let mut kb = Keyboard::new_abc802(&mut irq);
        kb.word().post_down(0x41);

        // RR0: NEW -> bit 0, DOWN -> bit 3, plus Tx empty and CTS
        let rr0 = kb.dart_in(35);
        assert_eq!(rr0 & 0x01, 0x01);
        assert_eq!(rr0 & 0x08, 0x08);
        assert_ne!(rr0 & 0x04, 0);
        assert_ne!(rr0 & 0x20, 0);

        // Data read consumes NEW
        assert_eq!(kb.dart_in(34), 0x41);
        let rr0 = kb.dart_in(35);
        assert_eq!(rr0 & 0x01, 0);
    }

    #[test]
    fn test_dart_vector_programming() {
        let mut irq = IrqController::new();
        let mut kb = Keyboard::new_abc802(&mut irq);
        let mut mem = crate::memory::Memory::new(
            Model::Abc802,
            64,
            &crate::config::RomSet::default(),
        );
        let quit = Arc::new(AtomicBool::new(false));
        let mut sched = crate::scheduler::Scheduler::new(
            0.0,
            crate::scheduler::TimeSource::manual(),
            quit,
        );
        let mut tracer = crate::trace::Tracer::off();

        {
            let mut ctx = IoCtx {
                mem: &mut mem,
                irq: &mut irq,
                sched: &mut sched,
                trace: &mut tracer,
                regs: Default::default(),
            };

            // WR1 = 0x18 (rx interrupt on all), WR2 = vector 0x40
            kb.dart_out(35, 1, &mut ctx);
            kb.dart_out(35, 0x18, &mut ctx);
            kb.dart_out(35, 2, &mut ctx);
            kb.dart_out(35, 0x40, &mut ctx);
        }

        assert_eq!(irq.vector(prio::ABC800_DARTB), 0x40);

        kb.word().post_down(0x41);
        kb.line().raise();
        assert_eq!(irq.intack(&mut NoHooks), 0x40);
    }
}
