//! CPU test suite.
//!
//! Tests drive the interpreter against a real bus with an all-RAM
//! ABC80 memory map, a manual time source and no speed limit, so
//! nothing external interferes with instruction-level assertions.

mod alu;

use std::sync::atomic::{AtomicBool, AtomicU8};
use std::sync::{Arc, Mutex};

use crate::bus::Bus;
use crate::config::{Model, RomSet, TapeOptions};
use crate::cpu::Cpu;
use crate::io::{DiskSet, IoPorts};
use crate::irq::IrqController;
use crate::memory::Memory;
use crate::scheduler::{Scheduler, TimeSource};
use crate::trace::Tracer;

/// An all-RAM bus with nothing scheduled.
pub(super) fn test_bus() -> Bus {
    let mut irq = IrqController::new();
    let io = IoPorts::new(
        Model::Abc80,
        &mut irq,
        DiskSet::empty(),
        TapeOptions::default(),
        Arc::new(AtomicBool::new(false)),
    );
    let (tx, _rx) = crossbeam_channel::unbounded();
    let video = crate::events::VideoBridge::for_tests(Arc::new(Mutex::new(Default::default())), tx);
    let cpu = Cpu::new();

    Bus::new(
        Memory::new(Model::Abc80, 64, &RomSet::default()),
        irq,
        Scheduler::new(0.0, TimeSource::manual(), Arc::new(AtomicBool::new(false))),
        Tracer::off(),
        io,
        video,
        cpu.nmi_line(),
        Arc::new(AtomicU8::new(0)),
        ".".into(),
    )
}

/// Place a program at `addr`.
pub(super) fn load(bus: &mut Bus, addr: u16, bytes: &[u8]) {
    for (i, &b) in bytes.iter().enumerate() {
        bus.write(addr.wrapping_add(i as u16), b);
    }
}

/// A CPU about to execute at `pc`.
pub(super) fn cpu_at(pc: u16) -> Cpu {
    let mut cpu = Cpu::new();
    cpu.pc = pc;
    cpu.sp = 0xF000;
    cpu
}

/// Execute a single instruction; returns the new halted state.
pub(super) fn step(cpu: &mut Cpu, bus: &mut Bus) -> bool {
    cpu.run(bus, false, false)
}
