//! System bus.
//!
//! Everything the CPU interpreter reaches for lives behind this struct:
//! the banked memory map, the port decoder with its devices, the
//! interrupt controller and the scheduler. [`crate::cpu::Cpu::run`]
//! takes `&mut Bus`, which is the whole contract between the
//! interpreter and the rest of the system — there is no global state.
//!
//! The bus also dispatches timer events: vertical retrace publishes the
//! video snapshot (and on the ABC80 raises the 50 Hz clock NMI), and
//! the ABC802 CTC tick feeds channel 3.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use crate::cpu::{NmiLine, Regs};
use crate::events::{VideoBridge, DUMP_MEM, DUMP_NONE, DUMP_RAM};
use crate::io::{IoCtx, IoPorts};
use crate::irq::IrqController;
use crate::memory::Memory;
use crate::scheduler::{Scheduler, TimerId};
use crate::trace::Tracer;

pub struct Bus {
    pub mem: Memory,
    pub irq: IrqController,
    pub sched: Scheduler,
    pub trace: Tracer,
    pub io: IoPorts,

    video: VideoBridge,
    /// The ABC80 50 Hz clock interrupt line.
    nmi: NmiLine,
    /// Hotkey-latched memory dump request.
    dump: Arc<AtomicU8>,
    dump_dir: PathBuf,
    /// Scratch list of due timers.
    fired: Vec<TimerId>,
}

impl Bus {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        mem: Memory,
        irq: IrqController,
        sched: Scheduler,
        trace: Tracer,
        io: IoPorts,
        video: VideoBridge,
        nmi: NmiLine,
        dump: Arc<AtomicU8>,
        dump_dir: PathBuf,
    ) -> Self {
        Self {
            mem,
            irq,
            sched,
            trace,
            io,
            video,
            nmi,
            dump,
            dump_dir,
            fired: Vec::new(),
        }
    }

    // ========== Memory ==========

    #[inline]
    pub fn read(&mut self, addr: u16) -> u8 {
        self.mem.read(addr)
    }

    #[inline]
    pub fn fetch(&mut self, addr: u16) -> u8 {
        self.mem.fetch(addr)
    }

    #[inline]
    pub fn fetch_m1(&mut self, addr: u16) -> u8 {
        self.mem.fetch_m1(addr)
    }

    #[inline]
    pub fn read_word(&mut self, addr: u16) -> u16 {
        self.mem.read_word(addr)
    }

    #[inline]
    pub fn fetch_word(&mut self, addr: u16) -> u16 {
        self.mem.fetch_word(addr)
    }

    #[inline]
    pub fn write(&mut self, addr: u16, value: u8) {
        self.mem.write(addr, value)
    }

    #[inline]
    pub fn write_word(&mut self, addr: u16, value: u16) {
        self.mem.write_word(addr, value)
    }

    /// Side-effect-free read for the disassembler.
    #[inline]
    pub fn peek(&self, addr: u16) -> u8 {
        self.mem.peek(addr)
    }

    // ========== Port I/O ==========

    pub fn port_read(&mut self, port: u8, regs: Regs) -> u8 {
        let mut ctx = IoCtx {
            mem: &mut self.mem,
            irq: &mut self.irq,
            sched: &mut self.sched,
            trace: &mut self.trace,
            regs,
        };
        self.io.input(port, &mut ctx)
    }

    pub fn port_write(&mut self, port: u8, value: u8, regs: Regs) {
        let mut ctx = IoCtx {
            mem: &mut self.mem,
            irq: &mut self.irq,
            sched: &mut self.sched,
            trace: &mut self.trace,
            regs,
        };
        self.io.out(port, value, &mut ctx);
    }

    // ========== Interrupts ==========

    #[inline]
    pub fn irq_poll(&self) -> bool {
        self.irq.poll()
    }

    pub fn intack(&mut self) -> i16 {
        self.irq.intack(&mut self.io)
    }

    pub fn eoi(&mut self) {
        self.irq.eoi(&mut self.io)
    }

    // ========== Scheduler ==========

    /// Poll for external events; services due timers and returns true
    /// when the CPU loop should terminate.
    pub fn poll_external(&mut self, tc: u64) -> bool {
        let mut fired = std::mem::take(&mut self.fired);
        fired.clear();

        let quit = self.sched.poll(tc, &mut fired);
        for &id in &fired {
            self.dispatch_timer(id);
        }

        self.fired = fired;
        quit
    }

    fn dispatch_timer(&mut self, id: TimerId) {
        match id {
            TimerId::ClockTick => {
                // ABC80: vertical retrace plus the 50 Hz clock NMI
                self.vsync_screen();
                self.nmi.raise();
            }
            TimerId::Vsync => {
                self.vsync_screen();
                self.io.keyboard.note_vsync();
            }
            TimerId::CtcTick => self.io.ctc.tick(),
        }
    }

    /// Vertical retrace housekeeping: publish the video snapshot,
    /// service a latched memory-dump request, keep the trace stream
    /// moving.
    fn vsync_screen(&mut self) {
        self.video.vsync(&self.io.crtc, self.mem.video_ram());

        match self.dump.swap(DUMP_NONE, Ordering::AcqRel) {
            DUMP_MEM => self.dump_memory(false),
            DUMP_RAM => self.dump_memory(true),
            _ => {}
        }

        self.trace.flush();
    }

    fn dump_memory(&mut self, ramonly: bool) {
        match self.mem.dump_to_dir(&self.dump_dir, ramonly) {
            Ok(path) => log::info!("memory dump written to {}", path.display()),
            Err(err) => log::warn!("memory dump failed: {}", err),
        }
    }

    /// Flush the memory-trace ring into the trace stream.
    pub fn drain_mem_traces(&mut self) {
        let Self { mem, trace, .. } = self;
        mem.drain_traces(trace);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Model, RomSet, TapeOptions};
    use crate::io::DiskSet;
    use crate::scheduler::TimeSource;
    use std::sync::atomic::AtomicBool;
    use std::sync::Mutex;

    fn test_bus(model: Model) -> Bus {
        let quit = Arc::new(AtomicBool::new(false));
        let mut irq = IrqController::new();
        let io = IoPorts::new(
            model,
            &mut irq,
            DiskSet::empty(),
            TapeOptions::default(),
            Arc::new(AtomicBool::new(false)),
        );
        let (tx, _rx) = crossbeam_channel::unbounded();
        let video = VideoBridge::for_tests(Arc::new(Mutex::new(Default::default())), tx);
        let cpu = crate::cpu::Cpu::new();

        Bus::new(
            Memory::new(model, 64, &RomSet::default()),
            irq,
            Scheduler::new(0.0, TimeSource::manual(), quit),
            Tracer::off(),
            io,
            video,
            cpu.nmi_line(),
            Arc::new(AtomicU8::new(0)),
            PathBuf::from("."),
        )
    }

    #[test]
    fn test_port_roundtrip_hits_devices() {
        let mut bus = test_bus(Model::Abc802);

        // CRTC register through the 802 decoder
        bus.port_write(56, 10, Regs::default());
        bus.port_write(57, 0x5A, Regs::default());
        assert_eq!(bus.port_read(57, Regs::default()), 0x5A);
    }

    #[test]
    fn test_memory_contract() {
        let mut bus = test_bus(Model::Abc80);

        bus.write_word(0xFFFF, 0xABCD);
        assert_eq!(bus.read(0xFFFF), 0xCD);
        assert_eq!(bus.read(0x0000), 0xAB);
        assert_eq!(bus.read_word(0xFFFF), 0xABCD);
    }
}
