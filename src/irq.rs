//! Z80 interrupt controller.
//!
//! Models the Z80 daisy chain as a 32-bit pending bitmap and a 32-bit
//! service mask. Priority 0 is the head of the chain and always wins
//! arbitration; a mask bit is cleared while that priority is in
//! service, and the EOI generated by RETI is directed at the
//! highest-priority interrupt currently in service, exactly as the
//! chain propagates IEI/IEO on real hardware.
//!
//! The pending bitmap is atomic because the event thread raises the
//! keyboard interrupt; everything else runs on the CPU thread.
//! Raising an interrupt happens-before the CPU's next poll (release
//! store against the acquire load in [`IrqController::poll`]).
//!
//! Devices do not hand callbacks to the controller; slots hold only the
//! programmed vector and the in-service flag, and the intack/EOI hooks
//! of devices that need them (the fake-typing keyboard, the PIO, the
//! cassette SIO) are dispatched back through [`IrqHooks`] by priority.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Number of priority levels in the chain.
pub const MAX_IRQ: usize = 32;

/// Device-side hooks invoked during acknowledge and end-of-interrupt.
pub trait IrqHooks {
    /// Called during INTACK for slots registered with an intack hook.
    /// `vector` is the slot's programmed vector; returning a negative
    /// value rejects the interrupt as spurious.
    fn intack(&mut self, prio: u8, vector: i16) -> i16 {
        let _ = prio;
        vector
    }

    /// Called when an EOI reaches this priority.
    fn eoi(&mut self, prio: u8) {
        let _ = prio;
    }
}

/// Hooks for contexts with no devices (tests, reset paths).
pub struct NoHooks;

impl IrqHooks for NoHooks {}

#[derive(Debug, Clone, Copy)]
struct IrqSlot {
    /// Vector placed on the bus at INTACK; -1 until programmed.
    vector: i16,
    /// Between INTACK and EOI.
    handled: bool,
    /// Dispatch [`IrqHooks::intack`] instead of using `vector` directly.
    intack_hook: bool,
    /// Dispatch [`IrqHooks::eoi`] on end-of-interrupt.
    eoi_hook: bool,
}

/// Cloneable handle for raising or clearing one interrupt line, safe to
/// use from any thread.
#[derive(Clone)]
pub struct IrqLine {
    pending: Arc<AtomicU32>,
    prio: u8,
}

impl IrqLine {
    pub fn raise(&self) {
        self.pending.fetch_or(1 << self.prio, Ordering::Release);
    }

    pub fn clear(&self) {
        self.pending.fetch_and(!(1 << self.prio), Ordering::Release);
    }

    pub fn prio(&self) -> u8 {
        self.prio
    }
}

/// The interrupt controller.
pub struct IrqController {
    pending: Arc<AtomicU32>,
    /// Bit clear = that priority is in service.
    mask: u32,
    slots: [Option<IrqSlot>; MAX_IRQ],
}

impl IrqController {
    pub fn new() -> Self {
        Self {
            pending: Arc::new(AtomicU32::new(0)),
            mask: !0,
            slots: [None; MAX_IRQ],
        }
    }

    /// Install a priority slot and hand back its line. Installing the
    /// same priority twice is a programmer error and panics.
    pub fn register(&mut self, prio: u8, intack_hook: bool, eoi_hook: bool) -> IrqLine {
        let slot = &mut self.slots[prio as usize];
        assert!(slot.is_none(), "irq priority {} registered twice", prio);

        *slot = Some(IrqSlot {
            vector: -1,
            handled: false,
            intack_hook,
            eoi_hook,
        });

        IrqLine {
            pending: Arc::clone(&self.pending),
            prio,
        }
    }

    /// Program the vector a slot returns at INTACK.
    pub fn set_vector(&mut self, prio: u8, vector: i16) {
        if let Some(slot) = &mut self.slots[prio as usize] {
            slot.vector = vector;
        }
    }

    pub fn vector(&self, prio: u8) -> i16 {
        self.slots[prio as usize].map_or(-1, |s| s.vector)
    }

    /// Is this priority between INTACK and EOI?
    pub fn in_service(&self, prio: u8) -> bool {
        self.mask & (1 << prio) == 0
    }

    /// Any interrupt pending that is not blocked by one in service?
    #[inline]
    pub fn poll(&self) -> bool {
        self.pending.load(Ordering::Acquire) & self.mask != 0
    }

    /// Interrupt acknowledge cycle. Returns the vector from the highest
    /// priority pending interrupt, or -1 if spurious.
    pub fn intack(&mut self, hooks: &mut dyn IrqHooks) -> i16 {
        loop {
            let pend = self.pending.load(Ordering::Acquire);
            let masked = pend & self.mask;
            if masked == 0 {
                return -1; // All interrupts went away
            }

            let prio = masked.trailing_zeros() as u8;
            let bit = 1u32 << prio;

            // Atomically consume the pending bit; it may race with a
            // device-side clear
            if self.pending.fetch_and(!bit, Ordering::AcqRel) & bit == 0 {
                continue; // This particular interrupt went away on us
            }

            let slot = self.slots[prio as usize]
                .as_mut()
                .expect("pending irq with no registered slot");

            let vector = if slot.intack_hook {
                hooks.intack(prio, slot.vector)
            } else {
                slot.vector
            };
            if vector < 0 {
                continue;
            }

            // Inside the handler for this interrupt
            self.mask &= !bit;
            slot.handled = true;
            return vector;
        }
    }

    /// A RETI was executed, which the chain interprets as an EOI for
    /// the highest-priority interrupt currently under service.
    pub fn eoi(&mut self, hooks: &mut dyn IrqHooks) {
        let in_service = !self.mask;
        if in_service == 0 {
            return; // No interrupts under service
        }

        let prio = in_service.trailing_zeros() as u8;
        if let Some(slot) = &mut self.slots[prio as usize] {
            slot.handled = false;
            self.mask |= 1 << prio;
            let eoi_hook = slot.eoi_hook;
            if eoi_hook {
                hooks.eoi(prio);
            }
        } else {
            self.mask |= 1 << prio;
        }
    }
}

impl Default for IrqController {
    fn default() -> Self {
        Self::new()
    }
}
