//! Machine orchestrator.
//!
//! Builds a complete ABC80 or ABC802 from a [`MachineConfig`] and a
//! [`RomSet`], and runs the CPU loop. Construction hands back the
//! [`EventHub`] for the host event thread; the [`Machine`] itself
//! belongs to the CPU thread.
//!
//! The intended shape of a front end:
//!
//! ```ignore
//! let (mut machine, mut hub) = Machine::new(config, roms);
//! let cpu_thread = std::thread::spawn(move || machine.run());
//! while let Ok(event) = hub.events().recv() {
//!     match event {
//!         UiEvent::Refresh => paint(hub.latest_video()),
//!     }
//! }
//! cpu_thread.join().unwrap();
//! ```

use std::sync::atomic::{AtomicBool, AtomicU8};
use std::sync::{Arc, Mutex};

use crate::bus::Bus;
use crate::config::{MachineConfig, Model, RomSet};
use crate::cpu::Cpu;
use crate::events::{EventHub, EventWiring, VideoBridge, VideoState};
use crate::io::{DiskSet, IoPorts};
use crate::irq::IrqController;
use crate::memory::Memory;
use crate::scheduler::{Scheduler, TimeSource, TimerId};
use crate::trace::{self, Tracer};

/// ABC80 vertical retrace / clock interrupt: 20 ms = 50 Hz.
const VSYNC_PERIOD_NS: u64 = 20_000_000;
/// ABC802 CTC channel 3 tick: 10.67 ms = 93.75 Hz.
const CTC_PERIOD_NS: u64 = 10_666_667;

/// One complete machine, owned by the CPU thread.
pub struct Machine {
    cpu: Cpu,
    bus: Bus,
    halted: bool,
}

impl Machine {
    /// Build the machine and its event bridge.
    pub fn new(config: MachineConfig, roms: RomSet) -> (Machine, EventHub) {
        let tracer = make_tracer(&config);

        let quit = Arc::new(AtomicBool::new(false));
        let dump = Arc::new(AtomicU8::new(0));
        let faketype = Arc::new(AtomicBool::new(config.effective_faketype()));

        let mut sched = Scheduler::new(config.mhz, TimeSource::host(), Arc::clone(&quit));
        match config.model {
            Model::Abc80 => sched.add_timer(TimerId::ClockTick, VSYNC_PERIOD_NS),
            Model::Abc802 => {
                sched.add_timer(TimerId::CtcTick, CTC_PERIOD_NS);
                sched.add_timer(TimerId::Vsync, VSYNC_PERIOD_NS);
            }
        }

        let mut irq = IrqController::new();
        let disks = match &config.disk_dir {
            Some(dir) => DiskSet::load_dir(dir),
            None => DiskSet::empty(),
        };
        let mut io = IoPorts::new(
            config.model,
            &mut irq,
            disks,
            config.tape.clone(),
            Arc::clone(&faketype),
        );
        io.printer.startup_width40 = config.startup_width40;
        io.crtc.mode40 = config.startup_width40;

        let mut mem = Memory::new(config.model, config.kilobytes, &roms);
        if config.model == Model::Abc80 && config.startup_width40 {
            mem.abc80_set_40col(true);
        }
        mem.set_trace_cpu(tracer.enabled(trace::CPU));

        if let Some(memfile) = &config.memfile {
            if config.model != Model::Abc802 {
                log::warn!("memfile given for a system other than ABC802 - not possible");
            } else {
                match std::fs::read(memfile) {
                    Ok(data) => mem.load_memfile(&data),
                    Err(err) => log::warn!("cannot read memfile {}: {}", memfile.display(), err),
                }
            }
        }

        let cpu = Cpu::new();

        let transfer = Arc::new(Mutex::new(VideoState::default()));
        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        let video = VideoBridge::new(Arc::clone(&transfer), events_tx);

        let hub = EventHub::new(EventWiring {
            model: config.model,
            keyboard: io.keyboard.word(),
            keyboard_line: io.keyboard.line(),
            nmi: cpu.nmi_line(),
            reset: cpu.reset_line(),
            quit,
            dump: Arc::clone(&dump),
            faketype,
            transfer,
            events: events_rx,
        });

        let bus = Bus::new(
            mem,
            irq,
            sched,
            tracer,
            io,
            video,
            cpu.nmi_line(),
            dump,
            config.dump_dir.clone(),
        );

        (
            Machine {
                cpu,
                bus,
                halted: false,
            },
            hub,
        )
    }

    /// CPU-thread entry point: reset and run until the quit flag is
    /// raised.
    pub fn run(&mut self) {
        self.cpu.reset();
        self.halted = self.cpu.run(&mut self.bus, true, self.halted);
    }

    /// Execute a single instruction (debuggers, tests).
    pub fn step(&mut self) {
        self.halted = self.cpu.run(&mut self.bus, false, self.halted);
    }

    pub fn reset(&mut self) {
        self.cpu.reset();
    }

    pub fn halted(&self) -> bool {
        self.halted
    }

    pub fn cpu(&self) -> &Cpu {
        &self.cpu
    }

    pub fn cpu_mut(&mut self) -> &mut Cpu {
        &mut self.cpu
    }

    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut Bus {
        &mut self.bus
    }
}

/// Open the trace sink per configuration; a failed open logs and
/// disables tracing rather than aborting.
fn make_tracer(config: &MachineConfig) -> Tracer {
    if config.trace == trace::NONE {
        return Tracer::off();
    }

    match &config.trace_file {
        None => Tracer::new(config.trace, Box::new(std::io::stdout())),
        Some(path) => match std::fs::File::create(path) {
            Ok(file) => Tracer::new(config.trace, Box::new(file)),
            Err(err) => {
                log::warn!("unable to open trace file {}: {}", path.display(), err);
                Tracer::off()
            }
        },
    }
}
