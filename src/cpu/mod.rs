//! Z80 CPU core.
//!
//! A cycle-counting interpreter for the Zilog Z80 as used in the Luxor
//! ABC80 and ABC802. All documented instructions are implemented, plus
//! the undocumented instructions the ABC system software relies on
//! (SLL, IXH/IXL/IYH/IYL arithmetic, the dual-writeback DDCB forms).
//! Flag bits 3 and 5 are not modeled.
//!
//! # Module Organization
//!
//! - `flags`: flag bit constants, flag lookup tables, cycle tables
//! - `helpers`: register accessors, ALU and rotate helpers, stack ops
//! - `execute`: instruction decode and execution
//!
//! The interpreter owns nothing but the register file; memory, port I/O,
//! the interrupt controller and the scheduler are reached through the
//! [`Bus`] passed into [`Cpu::run`].
//!
//! # References
//! - Zilog Z80 CPU User Manual (UM0080)

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::bus::Bus;
use crate::trace;

mod execute;
pub mod flags;
mod helpers;

#[cfg(test)]
mod tests;

/// Interrupt response modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InterruptMode {
    /// Mode 0: execute the byte on the data bus (assumed to be an RST)
    #[default]
    Mode0,
    /// Mode 1: fixed call to 0x0038
    Mode1,
    /// Mode 2: vectored through the I register
    Mode2,
}

/// Index register selection for the DD/FD prefixes.
///
/// `Hl` means no prefix is active; memory operands use (HL) and the H/L
/// register specifiers name H and L. Under `Ix`/`Iy`, memory operands
/// become (IX+d)/(IY+d) and bare H/L name the index register halves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Index {
    Hl,
    Ix,
    Iy,
}

/// Handle for requesting a non-maskable interrupt.
///
/// Cloneable and thread-safe; the event thread uses one for the NMI
/// hotkey and the ABC80 vsync timer uses another for the 50 Hz clock
/// interrupt.
#[derive(Clone)]
pub struct NmiLine(Arc<AtomicBool>);

impl NmiLine {
    /// Signal an NMI. The CPU consumes the request at the next
    /// instruction boundary, unless an NMI is already in progress.
    pub fn raise(&self) {
        self.0.store(true, Ordering::Release);
    }
}

/// Handle for requesting a CPU reset from another thread.
#[derive(Clone)]
pub struct ResetLine(Arc<AtomicBool>);

impl ResetLine {
    pub fn raise(&self) {
        self.0.store(true, Ordering::Release);
    }
}

/// Register snapshot handed to port I/O handlers, used by device trace
/// output, the cassette filename snoop, and the CTC down-count
/// interpolation.
#[derive(Debug, Clone, Copy, Default)]
pub struct Regs {
    pub pc: u16,
    pub sp: u16,
    pub bc: u16,
    pub de: u16,
    pub hl: u16,
    /// T-state counter at the access.
    pub tc: u64,
}

/// Register values remembered by the trace stream so that only changed
/// registers are printed per instruction.
#[derive(Debug, Clone, Copy, Default)]
struct TraceRegs {
    a: u8,
    f: u8,
    bc: u16,
    de: u16,
    hl: u16,
    ix: u16,
    iy: u16,
    sp: u16,
    af_prime: u16,
    bc_prime: u16,
    de_prime: u16,
    hl_prime: u16,
}

/// Z80 CPU state.
pub struct Cpu {
    /// Accumulator
    pub a: u8,
    /// Flags register
    pub f: u8,
    /// BC register pair
    pub bc: u16,
    /// DE register pair
    pub de: u16,
    /// HL register pair
    pub hl: u16,

    // Shadow registers (EX AF,AF' and EXX)
    pub a_prime: u8,
    pub f_prime: u8,
    pub bc_prime: u16,
    pub de_prime: u16,
    pub hl_prime: u16,

    /// IX index register
    pub ix: u16,
    /// IY index register
    pub iy: u16,

    /// Stack pointer
    pub sp: u16,
    /// Program counter
    pub pc: u16,

    /// Interrupt vector base register
    pub i: u8,
    /// Counting part of the refresh register (bits 6-0), incremented
    /// once per M1 cycle
    pub rc: u8,
    /// Fixed part of the refresh register (bit 7), written only by LD R,A
    pub rf: u8,

    /// Interrupt mode
    pub im: InterruptMode,
    /// Interrupt enable flip-flops
    pub iff1: bool,
    pub iff2: bool,
    /// One-instruction interrupt holdoff after EI
    ei_shadow: bool,
    /// EOI owed to the interrupt controller from a RETI, delivered at
    /// the next instruction boundary
    signal_eoi: bool,
    /// Set between NMI acknowledge and RETN; blocks nested NMIs
    nmi_in_progress: bool,

    /// Cross-thread NMI request
    nmi_request: Arc<AtomicBool>,
    /// Cross-thread reset request
    reset_request: Arc<AtomicBool>,

    /// T-state (clock cycle) counter
    pub tc: u64,

    /// Previous register values for the trace diff
    trace_old: TraceRegs,
}

impl Cpu {
    pub fn new() -> Self {
        Self {
            a: 0,
            f: 0,
            bc: 0,
            de: 0,
            hl: 0,
            a_prime: 0,
            f_prime: 0,
            bc_prime: 0,
            de_prime: 0,
            hl_prime: 0,
            ix: 0,
            iy: 0,
            sp: 0,
            pc: 0,
            i: 0,
            rc: 0,
            rf: 0,
            im: InterruptMode::Mode0,
            iff1: false,
            iff2: false,
            ei_shadow: false,
            signal_eoi: false,
            nmi_in_progress: false,
            nmi_request: Arc::new(AtomicBool::new(false)),
            reset_request: Arc::new(AtomicBool::new(false)),
            tc: 0,
            trace_old: TraceRegs::default(),
        }
    }

    /// Reset the CPU the way the RESET pin does: control state is
    /// cleared, the general-purpose registers keep their values.
    pub fn reset(&mut self) {
        self.pc = 0;
        self.i = 0;
        self.iff1 = false;
        self.iff2 = false;
        self.ei_shadow = false;
        self.im = InterruptMode::Mode0;
        self.nmi_in_progress = false;
        self.signal_eoi = false;
    }

    /// Handle for raising NMIs from timers or the event thread.
    pub fn nmi_line(&self) -> NmiLine {
        NmiLine(Arc::clone(&self.nmi_request))
    }

    /// Handle for requesting a reset from the event thread.
    pub fn reset_line(&self) -> ResetLine {
        ResetLine(Arc::clone(&self.reset_request))
    }

    /// Snapshot of the registers device handlers are allowed to see.
    pub fn regs(&self) -> Regs {
        Regs {
            pc: self.pc,
            sp: self.sp,
            bc: self.bc,
            de: self.de,
            hl: self.hl,
            tc: self.tc,
        }
    }

    /// Run the interpreter.
    ///
    /// With `continuous` set, executes until [`Bus::poll_external`]
    /// reports quit; otherwise executes a single instruction. `halted`
    /// carries the HALT state across calls; the updated value is
    /// returned. While halted the CPU burns 4 t-states per pass and
    /// keeps polling for external events and interrupts.
    pub fn run(&mut self, bus: &mut Bus, continuous: bool, mut halted: bool) -> bool {
        loop {
            if bus.trace.enabled(trace::CPU) {
                self.trace_diff(bus);
                bus.drain_mem_traces();
                bus.trace.put(trace::CPU, "\n");
            }

            self.check_eoi(bus);

            loop {
                // Poll for external events (timers, quit)
                if bus.poll_external(self.tc) {
                    return halted;
                }

                if self.reset_request.swap(false, Ordering::AcqRel) {
                    self.reset();
                    halted = false;
                }

                // NMI wins over maskable interrupts; a request arriving
                // while one is in service stays pending until RETN.
                if !self.nmi_in_progress && self.nmi_request.load(Ordering::Acquire) {
                    halted = false;
                    self.do_nmi(bus);
                } else if self.iff1 && !self.ei_shadow && bus.irq_poll() {
                    halted = false;
                    self.do_int(bus);
                }
                self.ei_shadow = false;

                if !halted {
                    break;
                }
                self.tc += 4;

                if !continuous {
                    return halted;
                }
            }

            if bus.trace.enabled(trace::CPU) {
                let text = crate::disasm::disassemble_at(bus, self.pc).text;
                bus.trace
                    .write(trace::CPU, format_args!("[{:12}] PC={:04X} {:<24}", self.tc, self.pc, text));
            }

            if self.execute_instruction(bus) {
                halted = true;
            }

            if !continuous {
                return halted;
            }
        }
    }

    /// Deliver a deferred EOI from a RETI executed by the previous
    /// instruction. A real Z80 needs the RETI opcode fetch cycles before
    /// the peripherals can snoop it; the one-instruction delay models
    /// that.
    fn check_eoi(&mut self, bus: &mut Bus) {
        if !self.signal_eoi {
            return;
        }

        bus.trace
            .write(trace::IO, format_args!("[{:12}] EOI: RETI executed\n", self.tc));

        self.signal_eoi = false;
        bus.eoi();
    }

    /// Accept a non-maskable interrupt.
    fn do_nmi(&mut self, bus: &mut Bus) {
        if !self.nmi_request.swap(false, Ordering::AcqRel) {
            return;
        }

        bus.trace
            .write(trace::IO | trace::CPU, format_args!("[{:12}] NMI: PC={:04x}\n", self.tc, self.pc));

        self.sp = self.sp.wrapping_sub(2);
        bus.write_word(self.sp, self.pc);
        self.iff2 = self.iff1;
        self.iff1 = false;
        self.nmi_in_progress = true;
        self.pc = 0x66;
        self.inc_r();
        self.tc += 11;
    }

    /// Accept a maskable interrupt: acknowledge through the controller
    /// and enter the current interrupt mode's response sequence.
    fn do_int(&mut self, bus: &mut Bus) {
        let old_pc = self.pc;
        let when = self.tc;

        let vector = bus.intack();
        if vector < 0 {
            return; // Spurious; every pending interrupt went away
        }

        self.iff1 = false;
        self.iff2 = false;
        self.sp = self.sp.wrapping_sub(2);
        bus.write_word(self.sp, self.pc);

        match self.im {
            InterruptMode::Mode0 => {
                // Assume the device feeds an RST instruction
                self.pc = (vector as u16) & 0x38;
                self.tc += 11;
            }
            InterruptMode::Mode1 => {
                self.pc = 0x38;
                self.tc += 11;
            }
            InterruptMode::Mode2 => {
                let table = ((self.i as u16) << 8) | ((vector as u16) & !1);
                self.pc = bus.read_word(table);
                self.tc += 19;
            }
        }

        bus.trace.write(
            trace::IO | trace::CPU,
            format_args!(
                "[{:12}] INT: vector 0x{:02x} ({:3}) I={:02x} PC={:04x} -> {:04x}\n",
                when, vector, vector, self.i, old_pc, self.pc
            ),
        );

        self.inc_r();
    }

    /// Print the registers that changed since the previous instruction.
    fn trace_diff(&mut self, bus: &mut Bus) {
        macro_rules! breg {
            ($name:literal, $field:ident) => {
                if self.$field != self.trace_old.$field {
                    bus.trace
                        .write(trace::CPU, format_args!(" {}={:02X}", $name, self.$field));
                    self.trace_old.$field = self.$field;
                }
            };
        }
        macro_rules! wreg {
            ($name:literal, $field:ident) => {
                if self.$field != self.trace_old.$field {
                    bus.trace
                        .write(trace::CPU, format_args!(" {}={:04X}", $name, self.$field));
                    self.trace_old.$field = self.$field;
                }
            };
        }

        breg!("A", a);
        wreg!("BC", bc);
        wreg!("DE", de);
        wreg!("HL", hl);
        wreg!("IX", ix);
        wreg!("IY", iy);
        wreg!("SP", sp);
        breg!("F", f);

        let af_prime = ((self.a_prime as u16) << 8) | self.f_prime as u16;
        if af_prime != self.trace_old.af_prime {
            bus.trace
                .write(trace::CPU, format_args!(" AFx={:04X}", af_prime));
            self.trace_old.af_prime = af_prime;
        }
        wreg!("BCx", bc_prime);
        wreg!("DEx", de_prime);
        wreg!("HLx", hl_prime);
    }
}

impl Default for Cpu {
    fn default() -> Self {
        Self::new()
    }
}
