//! Z80 CTC (ABC802).
//!
//! Four counter/timer channels at ports 96-99. Only channel 3 is
//! driven: the 93.75 Hz system tick raises its interrupt when the
//! channel is programmed for timer mode with interrupts enabled.
//! Reading a channel returns the down-count, interpolated between
//! scheduler ticks: in virtual (t-state) time when the CPU speed is
//! limited and in real time otherwise, so the guest sees a smoothly
//! decrementing counter either way.
//!
//! An even control byte programs the interrupt vector for all four
//! channels (bits 2:1 carry the channel number).
//!
//! # References
//! - Zilog Z80 Family CPU Peripherals User Manual (UM0081)

use super::{prio, IoCtx};
use crate::irq::{IrqController, IrqLine};
use crate::scheduler::TimerId;

pub struct Ctc {
    ctl: [u8; 4],
    div: [u8; 4],
    lines: Option<[IrqLine; 4]>,
}

impl Ctc {
    pub fn new(irq: &mut IrqController) -> Self {
        let lines = [
            irq.register(prio::ABC800_CTC0, false, false),
            irq.register(prio::ABC800_CTC1, false, false),
            irq.register(prio::ABC800_CTC2, false, false),
            irq.register(prio::ABC800_CTC3, false, false),
        ];

        Self {
            ctl: [0; 4],
            div: [0; 4],
            lines: Some(lines),
        }
    }

    /// A CTC that is not present (ABC80); reads float, writes vanish.
    pub fn unwired() -> Self {
        Self {
            ctl: [0; 4],
            div: [0; 4],
            lines: None,
        }
    }

    /// The 93.75 Hz tick: channel 3 interrupts when enabled in timer
    /// mode.
    pub fn tick(&mut self) {
        if self.ctl[3] & 0xc0 == 0x80 {
            if let Some(lines) = &self.lines {
                lines[3].raise();
            }
        }
    }

    pub fn out(&mut self, port: u8, value: u8, ctx: &mut IoCtx) {
        if self.lines.is_none() {
            return;
        }
        let ch = (port & 3) as usize;

        // A time-constant write follows a control word with bit 2 set
        if self.ctl[ch] & 4 != 0 {
            self.div[ch] = value;
            self.ctl[ch] &= !4;
            return;
        }

        if value & 1 == 0 {
            // Vector write: shared by all channels
            let base = value & !7;
            for i in 0..4u8 {
                ctx.irq
                    .set_vector(prio::ABC800_CTC0 + i, (base | (i << 1)) as i16);
            }
            return;
        }

        let mut value = value;
        if value & 2 != 0 {
            value = 1; // Reset channel
        }

        self.ctl[ch] = value;
    }

    pub fn input(&mut self, port: u8, ctx: &mut IoCtx) -> u8 {
        let ch = (port & 3) as usize;
        let div = self.div[ch];

        // Only channel 3 has a timebase behind it
        if ch != 3 || self.lines.is_none() {
            return 0xff;
        }
        let Some(timer) = ctx.sched.timer(TimerId::CtcTick) else {
            return 0xff;
        };

        let elapsed_ns = if ctx.sched.limit_speed() {
            // Interpolate in virtual time
            ((ctx.regs.tc - timer.ltst) as f64 * ctx.sched.ns_per_tstate()) as u64
        } else {
            // Interpolate in real time
            ctx.sched.now().saturating_sub(timer.last)
        };

        let remaining = timer.period.saturating_sub(elapsed_ns);
        ((remaining as u128 * div as u128) / timer.period as u128) as u8
    }
}
