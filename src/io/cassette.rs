//! Cassette interface.
//!
//! The "tape" is a sequence of framed 253-byte ABC blocks built from a
//! host file: 32 zero lead-in bytes, three 0x16 sync bytes, STX, a
//! block type (0xFF for the filename block, 0x00 for data), a
//! little-endian block number, the payload, ETX and a 16-bit checksum.
//! Block 0 carries the 11-byte filename and the total block count.
//!
//! Which file plays is decided when the motor relay closes: first any
//! queued filename from the front end, otherwise the filename the
//! system software left in guest memory (pointed to by SP+4 on the
//! ABC80, by DE on the ABC802), with a `.BAC -> .BAS` fallback.
//!
//! Two very different guest interfaces sit on top:
//! - ABC80: a Z80 PIO port B where software bit-bangs the clock line
//!   and reads data edges one bit at a time;
//! - ABC802: a Z80 SIO/2 channel that delivers whole bytes and finds
//!   block sync in hunt mode.
//!
//! # References
//! - Zilog Z80 Family CPU Peripherals User Manual (UM0081)

use std::collections::VecDeque;
use std::path::PathBuf;

use super::{prio, IoCtx};
use crate::abcfile::{self, AbcData};
use crate::config::{Model, TapeOptions};
use crate::irq::{IrqController, IrqLine};
use crate::trace::{self, Tracer};

// Frame layout of a cassette block
const SYNC: usize = 32;
const STX: usize = 35;
const BLKTYPE: usize = 36;
const BLKNO: usize = 37;
const DATA: usize = 39;
const ETX: usize = DATA + abcfile::BLOCK_DATA;
const CSUM: usize = ETX + 1;
/// Total frame size on the wire.
pub const BLOCK_SIZE: usize = CSUM + 2;

/// Where cassette files come from. The core never touches the host
/// filesystem beyond this seam.
pub trait TapeLibrary: Send {
    /// Open a file for reading. `in_tape_dir` selects the cassette
    /// directory for names snooped from guest memory; explicitly queued
    /// names are taken as given.
    fn open(&mut self, name: &str, in_tape_dir: bool) -> Option<Vec<u8>>;
}

/// Plain-filesystem library.
pub struct FsTapeLibrary {
    path: Option<PathBuf>,
}

impl FsTapeLibrary {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }
}

impl TapeLibrary for FsTapeLibrary {
    fn open(&mut self, name: &str, in_tape_dir: bool) -> Option<Vec<u8>> {
        let full = match (&self.path, in_tape_dir) {
            (Some(dir), true) => dir.join(name),
            _ => PathBuf::from(name),
        };
        std::fs::read(full).ok()
    }
}

/// Z80 PIO control-write sequencing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PioCtlState {
    Init,
    Mask,
    IrqMask,
}

/// One PIO port (the ABC80 uses port B for the cassette and sundry
/// control bits).
struct Pio {
    out: u8,
    input: u8,
    /// 1 = output bit (inverted from the PIO's own convention).
    mask: u8,
    mode: u8,
    irqmask: u8,
    irqctl: u8,
    ctlstate: PioCtlState,
    line: IrqLine,
}

impl Pio {
    fn new(line: IrqLine) -> Self {
        Self {
            out: 0,
            input: 0xff,
            mask: 0,
            mode: 0,
            irqmask: 0,
            irqctl: 0,
            ctlstate: PioCtlState::Init,
            line,
        }
    }

    fn readval(&self) -> u8 {
        (self.out & self.mask) | (self.input & !self.mask)
    }

    /// Mode 3 monitoring per the PIO datasheet: interrupts must be
    /// enabled, and with the AND function selected every masked,
    /// polarity-adjusted bit must be active.
    fn check_interrupt(&mut self) {
        let val = self.readval();

        let masked = if self.irqctl & 0x20 != 0 { val } else { !val } & self.irqmask;

        let trigger = self.irqctl & 0x80 != 0
            && if self.mode == 3 && self.irqctl & 0x40 != 0 {
                masked == self.irqmask
            } else {
                masked != 0
            };

        if trigger {
            self.line.raise();
        } else {
            self.line.clear();
        }
    }
}

/// The cassette deck plus its guest-side interface.
pub struct Cassette {
    model: Model,
    /// Filenames queued by the front end, tried before memory snooping.
    files: VecDeque<String>,
    library: Box<dyn TapeLibrary>,

    /// The file currently playing.
    file: Option<AbcData>,
    /// The formatted block on the "tape head".
    block: [u8; BLOCK_SIZE],
    /// -1 when idle / next block is the filename block.
    block_nr: i32,
    /// Bit counter for the ABC80 edge reader.
    bitctr: u32,
    /// Byte counter for the ABC802 SIO reader.
    bytectr: usize,

    /// ABC80 PIO port B.
    pio: Option<Pio>,

    /// ABC802 SIO channel B write registers.
    sio_ctl: [u8; 8],
    /// First receive interrupt after reset/enable is always delivered.
    first_rx_armed: bool,
    sio_line: Option<IrqLine>,
}

impl Cassette {
    pub fn new_abc80(irq: &mut IrqController, tape: TapeOptions) -> Self {
        let line = irq.register(prio::ABC80_PIOB, false, true);
        Self::new(Model::Abc80, tape, Some(Pio::new(line)), None)
    }

    pub fn new_abc802(irq: &mut IrqController, tape: TapeOptions) -> Self {
        let line = irq.register(prio::ABC800_SIOB, true, true);
        Self::new(Model::Abc802, tape, None, Some(line))
    }

    fn new(model: Model, tape: TapeOptions, pio: Option<Pio>, sio_line: Option<IrqLine>) -> Self {
        Self {
            model,
            files: tape.files.into(),
            library: Box::new(FsTapeLibrary::new(tape.path)),
            file: None,
            block: [0; BLOCK_SIZE],
            block_nr: -1,
            bitctr: 0,
            bytectr: 0,
            pio,
            sio_ctl: [0; 8],
            first_rx_armed: true,
            sio_line,
        }
    }

    /// Replace the file source (tests, exotic front ends).
    pub fn set_library(&mut self, library: Box<dyn TapeLibrary>) {
        self.library = library;
    }

    /// Queue a file for the next motor start.
    pub fn queue_file(&mut self, name: String) {
        self.files.push_back(name);
    }

    /// True if there is nothing on the "tape" right now.
    fn idle(&self) -> bool {
        self.file.is_none() && self.block_nr == -1
    }

    /// Frame the current payload: lead-in, sync, STX, type, number,
    /// ETX and the checksum over type+number+data+ETX.
    fn format_block(&mut self, tracer: &mut Tracer) {
        self.block[..SYNC].fill(0);
        self.block[SYNC..STX].fill(0x16);
        self.block[STX] = 0x02;
        self.block[BLKTYPE] = if self.block_nr < 0 { 0xff } else { 0 };
        self.block[BLKNO] = self.block_nr as u8;
        self.block[BLKNO + 1] = (self.block_nr >> 8) as u8;
        self.block[ETX] = 0x03;

        let csum: u16 = self.block[BLKTYPE..=ETX]
            .iter()
            .fold(0u16, |acc, &b| acc.wrapping_add(b as u16));
        self.block[CSUM] = csum as u8;
        self.block[CSUM + 1] = (csum >> 8) as u8;

        if tracer.enabled(trace::CAS) {
            tracer.write(
                trace::CAS,
                format_args!("CAS: block {:3} ready\n", self.block_nr),
            );
            tracer.dump_data(trace::CAS, "CAS", &self.block[BLKTYPE..]);
        }

        self.block_nr += 1;
        self.bitctr = 0;
        self.bytectr = 0;
    }

    /// Pull the next payload from the file, or fall idle at EOF.
    fn next_block(&mut self, tracer: &mut Tracer) {
        match self.file.take() {
            None => self.block_nr = -1, // Finished the EOF block, cassette idle
            Some(mut file) => {
                let data = (&mut self.block[DATA..ETX]).try_into().unwrap();
                if !file.next_block(data) {
                    self.file = Some(file);
                }
                self.format_block(tracer);
            }
        }
    }

    /// Motor relay edge. Closing the relay loads a file and builds the
    /// filename block; opening it rewinds to idle.
    fn enable(&mut self, enable: bool, ctx: &mut IoCtx) {
        ctx.trace.write(
            trace::CAS,
            format_args!("CAS: motor {}\n", if enable { "on" } else { "off" }),
        );

        // Reset the cassette position
        self.block_nr = -1;

        if self.file.take().is_some() {
            ctx.trace.put(trace::CAS, "CAS: closing file\n");
        }

        if !enable {
            return;
        }

        self.block[DATA..ETX].fill(0);
        let mut opened: Option<Vec<u8>> = None;

        // Queued filename list first
        while opened.is_none() {
            let Some(casfile) = self.files.pop_front() else {
                break; // Nothing more in the list
            };

            let name = abcfile::mangle(&casfile);
            self.block[DATA..DATA + 11].copy_from_slice(&name);
            opened = self.library.open(&casfile, false);

            ctx.trace.write(
                trace::CAS,
                format_args!(
                    "CAS: listed file {} {}\n",
                    casfile,
                    if opened.is_some() { "opened" } else { "not found" }
                ),
            );
        }

        if opened.is_none() {
            // Snoop guest memory to figure out what file the system
            // software wanted
            let mut fnaddr = match self.model {
                Model::Abc80 => ctx.mem.fetch_word(ctx.regs.sp.wrapping_add(4)),
                Model::Abc802 => ctx.regs.de,
            };

            let mut name = [0u8; 11];
            for slot in name.iter_mut() {
                let c = ctx.mem.peek(fnaddr);
                fnaddr = fnaddr.wrapping_add(1);
                if fnaddr == 0
                    || (c != b' ' && !c.is_ascii_digit() && !(b'A'..=b']').contains(&c))
                {
                    // Not an ABC filename character, or a memory
                    // wraparound: we must be off in the weeds
                    name[0] = b' ';
                    break;
                }
                *slot = c;
            }

            if name[0] != b' ' {
                self.block[DATA..DATA + 11].copy_from_slice(&name);
                let mut isbac = &name[8..11] == b"BAC";
                let mut casfile = abcfile::unmangle(&name);

                loop {
                    opened = self.library.open(&casfile, true);
                    ctx.trace.write(
                        trace::CAS,
                        format_args!(
                            "CAS: snooped file {} {}\n",
                            casfile,
                            if opened.is_some() { "opened" } else { "not found" }
                        ),
                    );

                    if opened.is_some() || !isbac {
                        break;
                    }

                    // Try BAC -> BAS, but keep telling the guest the
                    // name is .BAC or it will not find it on cassette
                    name[10] = b'S';
                    casfile = abcfile::unmangle(&name);
                    name[10] = b'C';
                    isbac = false;
                }
            }
        }

        let Some(bytes) = opened else {
            ctx.trace.put(trace::CAS, "CAS: no more files\n");
            return;
        };

        let abc = AbcData::new(bytes);
        let blks = abc.blocks();
        // Block count in the filename block, ABC-klubben standard
        self.block[DATA + 251] = blks as u8;
        self.block[DATA + 252] = (blks >> 8) as u8;

        ctx.trace.write(
            trace::CAS,
            format_args!(
                "CAS: file is a {} file, {} blocks\n",
                if abc.is_text() { "text" } else { "binary" },
                blks
            ),
        );

        self.file = Some(abc);
        self.format_block(ctx.trace);
    }

    /// ABC80 bit reader: even counts are clock edges (always 1), odd
    /// counts deliver data bits LSB first, 16 half-bits per byte.
    fn edge(&mut self, tracer: &mut Tracer) -> bool {
        let bc = self.bitctr;
        self.bitctr += 1;

        if self.idle() {
            tracer.write(
                trace::CAS,
                format_args!("CAS: reading with nothing, bit {:4}\n", bc),
            );
            return false;
        }

        let b = self.block[(bc >> 4) as usize];
        let bit = ((u32::from(b) >> ((bc >> 1) & 7)) | !bc) & 1 != 0;

        tracer.write(
            trace::CAS,
            format_args!(
                "CAS: block {:3} byte {:3} = {:02x} {} {} = {}\n",
                self.block_nr - 1,
                (bc >> 4) as i32 - DATA as i32,
                b,
                if bc & 1 != 0 { "bit" } else { "clk" },
                (bc >> 1) & 7,
                bit as u8
            ),
        );

        if self.bitctr >= (16 * BLOCK_SIZE) as u32 {
            // End of data, read another block
            self.next_block(tracer);
        }

        bit
    }

    // ========== ABC80 PIO port B ==========

    pub fn piob_out(&mut self, port: u8, value: u8, ctx: &mut IoCtx) {
        if self.pio.is_none() {
            return;
        }

        if port & 1 == 0 {
            // Data port
            let (old, mask) = {
                let pio = self.pio.as_mut().unwrap();
                let old = pio.readval();
                pio.out = value;
                (old, pio.mask)
            };

            // Cassette relay
            if (value ^ old) & mask & 0x20 != 0 {
                let on = value & mask & 0x20 != 0;
                self.enable(on, ctx);
            }

            // Clear edge (input is inverted)
            if !value & mask & 0x40 != 0 {
                self.pio.as_mut().unwrap().input |= 0x80;
            } else if !old & value & mask & 0x40 != 0 {
                // 0 -> 1 transition clocks a bit out of the tape
                if self.edge(ctx.trace) {
                    self.pio.as_mut().unwrap().input &= !0x80;
                }
            }
        } else {
            // Control port
            let oldirqctl = self.pio.as_ref().unwrap().irqctl;
            self.pio_control(value, ctx);
            if !oldirqctl & self.pio.as_ref().unwrap().irqctl & 0x80 != 0 {
                // Interrupts just enabled: resynchronize with the
                // bitstream so the next bit is a clock bit
                self.bitctr &= !1;
            }
        }

        if let Some(pio) = &mut self.pio {
            pio.check_interrupt();
        }
    }

    /// ABC80 PIO data port read.
    pub fn piob_in(&self) -> u8 {
        self.pio.as_ref().map_or(0xff, |p| p.readval())
    }

    /// EOI hook: the PIO reconsiders its interrupt condition.
    pub fn pio_eoi(&mut self) {
        if let Some(pio) = &mut self.pio {
            pio.check_interrupt();
        }
    }

    fn pio_control(&mut self, value: u8, ctx: &mut IoCtx) {
        let Some(pio) = &mut self.pio else { return };

        match pio.ctlstate {
            PioCtlState::Init => match value & 15 {
                0xf => {
                    pio.mode = value >> 6;
                    match pio.mode {
                        0 => pio.mask = 0xff, // All output
                        1 | 2 => pio.mask = 0, // All input / bidir
                        _ => pio.ctlstate = PioCtlState::Mask,
                    }
                }
                0x07 => {
                    pio.irqctl = value;
                    if pio.irqctl & 0x10 != 0 {
                        pio.ctlstate = PioCtlState::IrqMask;
                    }
                }
                0x03 => {
                    pio.irqctl = (pio.irqctl & 0x7f) | (value & 0x80);
                }
                _ => {
                    if value & 1 == 0 {
                        ctx.irq.set_vector(prio::ABC80_PIOB, value as i16);
                    }
                }
            },
            PioCtlState::Mask => {
                pio.mask = !value; // We use 1 = output, the PIO is opposite
                pio.ctlstate = PioCtlState::Init;
            }
            PioCtlState::IrqMask => {
                pio.irqmask = !value;
                pio.ctlstate = PioCtlState::Init;
            }
        }
    }

    // ========== ABC802 SIO/2 channel B ==========
    //
    // From a software perspective this is simple: RTS drives the motor
    // relay, hunt mode searches for the 16 02 sync sequence, and a
    // receive interrupt announces data.

    fn sio_have_sync(&self) -> bool {
        !self.idle() && self.sio_ctl[3] & 1 != 0
    }

    fn sio_have_data(&self) -> bool {
        self.sio_have_sync() && self.sio_ctl[3] & 0x10 == 0
    }

    fn sio_rx_interrupt(&self, huntok: bool) -> bool {
        self.sio_have_sync()
            && (huntok || self.sio_ctl[3] & 0x10 == 0)
            && (self.sio_ctl[1] & 0x10 != 0
                || (self.sio_ctl[1] & 0x08 != 0 && self.first_rx_armed))
    }

    fn sio_poll_interrupt(&mut self) {
        let Some(line) = self.sio_line.clone() else { return };

        if !self.sio_rx_interrupt(true) {
            line.clear();
            return;
        }

        // Actually signal a receive data interrupt
        self.sio_ctl[3] &= !0x10; // Not hunting anymore
        self.first_rx_armed = false;
        line.raise();
    }

    /// INTACK hook: status-affects-vector from WR2.
    pub fn sio_intack(&mut self, _vector: i16) -> i16 {
        ((self.sio_ctl[2] & 0xf0) | 0x04) as i16
    }

    /// EOI hook: reconsider the receive interrupt.
    pub fn sio_eoi(&mut self) {
        self.sio_poll_interrupt();
    }

    pub fn sio_out(&mut self, port: u8, value: u8, ctx: &mut IoCtx) {
        if port & 1 != 0 {
            let reg = (self.sio_ctl[0] & 7) as usize;
            self.sio_ctl[0] &= !7;
            self.sio_ctl[reg] = value;

            match reg {
                0 => match (value >> 3) & 7 {
                    3 => {
                        // Channel reset
                        self.sio_ctl = [0; 8];
                        self.first_rx_armed = true;
                    }
                    4 => self.first_rx_armed = true,
                    _ => {}
                },
                3 => {
                    if value & 0x10 != 0 {
                        // Entering hunt mode; skip to the next sync
                        if self.bytectr != 0 {
                            self.next_block(ctx.trace);
                        }
                        self.bytectr = 0;
                    }
                }
                5 => {
                    // RTS drives the motor relay
                    if value & 0x80 != 0 && self.idle() {
                        self.enable(true, ctx);
                    }
                }
                _ => {}
            }

            ctx.trace.write(
                trace::CAS,
                format_args!(
                    "CAS: SIO ctl {:02x} {:02x} {:02x} {:02x} - {:02x} {:02x} {:02x} {:02x}\n",
                    self.sio_ctl[0],
                    self.sio_ctl[1],
                    self.sio_ctl[2],
                    self.sio_ctl[3],
                    self.sio_ctl[4],
                    self.sio_ctl[5],
                    self.sio_ctl[6],
                    self.sio_ctl[7]
                ),
            );
        }

        self.sio_poll_interrupt();
    }

    pub fn sio_in(&mut self, port: u8, ctx: &mut IoCtx) -> u8 {
        let mut v = 0xff;

        if port & 1 == 0 {
            // Data port
            if self.sio_have_data() {
                if self.bytectr == 0 {
                    // Mark that this block has been read from
                    self.bytectr = BLKTYPE;
                }
                v = self.block[self.bytectr];
                ctx.trace.write(
                    trace::CAS,
                    format_args!(
                        "CAS: block {:3} byte {:3} = {:02x}\n",
                        self.block_nr - 1,
                        self.bytectr,
                        v
                    ),
                );
                self.bytectr += 1;
                if self.bytectr >= BLOCK_SIZE {
                    self.next_block(ctx.trace);
                    self.sio_ctl[3] |= 0x10;
                }
            }
        } else {
            // Control port
            let reg = self.sio_ctl[0] & 7;
            self.sio_ctl[0] &= !7;

            v = match reg {
                0 => {
                    let mut rr0 = self.sio_ctl[3] & 0x10; // Hunting
                    rr0 |= 0x20; // CTS
                    rr0 |= 0x04; // Transmit buffer empty
                    if self.sio_have_sync() {
                        if self.sio_have_data() {
                            rr0 |= 1; // Data available
                        } else {
                            // In hunt mode, establish "sync"
                            if self.bytectr != 0 {
                                self.next_block(ctx.trace);
                            }
                            self.sio_ctl[3] &= !0x10; // Not hunting anymore
                        }
                    }
                    rr0
                }
                1 => 0x01, // Transmit buffer empty
                2 => {
                    (self.sio_ctl[2] & !0x0e)
                        | if self.sio_rx_interrupt(false) { 0x04 } else { 0x06 }
                }
                _ => 0xff,
            };
        }

        self.sio_poll_interrupt();
        v
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RomSet;
    use crate::memory::Memory;
    use crate::scheduler::{Scheduler, TimeSource};
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    /// In-memory tape library.
    struct MemLibrary(Vec<(String, Vec<u8>)>);

    impl TapeLibrary for MemLibrary {
        fn open(&mut self, name: &str, _in_tape_dir: bool) -> Option<Vec<u8>> {
            self.0
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, d)| d.clone())
        }
    }

    struct Fixture {
        mem: Memory,
        irq: IrqController,
        sched: Scheduler,
        tracer: Tracer,
    }

    impl Fixture {
        fn new(model: Model) -> Self {
            Self {
                mem: Memory::new(model, 64, &RomSet::default()),
                irq: IrqController::new(),
                sched: Scheduler::new(
                    0.0,
                    TimeSource::manual(),
                    Arc::new(AtomicBool::new(false)),
                ),
                tracer: Tracer::off(),
            }
        }

        fn ctx(&mut self, regs: crate::cpu::Regs) -> IoCtx<'_> {
            IoCtx {
                mem: &mut self.mem,
                irq: &mut self.irq,
                sched: &mut self.sched,
                trace: &mut self.tracer,
                regs,
            }
        }
    }

    fn cassette_80(fx: &mut Fixture, files: &[(&str, &[u8])]) -> Cassette {
        let mut cas = Cassette::new_abc80(&mut fx.irq, TapeOptions::default());
        cas.set_library(Box::new(MemLibrary(
            files
                .iter()
                .map(|(n, d)| (n.to_string(), d.to_vec()))
                .collect(),
        )));
        cas
    }

    #[test]
    fn test_block_frame_layout_and_checksum() {
        let mut fx = Fixture::new(Model::Abc80);
        let mut cas = cassette_80(&mut fx, &[("prog.bas", b"10 REM\n")]);
        cas.queue_file("prog.bas".into());

        let mut ctx = fx.ctx(Default::default());
        cas.enable(true, &mut ctx);

        // Filename block: lead-in, sync, STX, type 0xFF, block 0
        assert!(cas.block[..32].iter().all(|&b| b == 0));
        assert_eq!(&cas.block[32..36], &[0x16, 0x16, 0x16, 0x02]);
        assert_eq!(cas.block[BLKTYPE], 0xff);
        assert_eq!(&cas.block[BLKNO..BLKNO + 2], &[0, 0]);
        assert_eq!(&cas.block[DATA..DATA + 11], b"PROG    BAS");
        assert_eq!(cas.block[ETX], 0x03);

        let expect: u16 = cas.block[BLKTYPE..=ETX]
            .iter()
            .fold(0u16, |a, &b| a.wrapping_add(b as u16));
        assert_eq!(
            u16::from_le_bytes([cas.block[CSUM], cas.block[CSUM + 1]]),
            expect
        );

        // Text file: 1 data block + EOF block
        assert_eq!(cas.block[DATA + 251], 2);
    }

    #[test]
    fn test_motor_off_goes_idle() {
        let mut fx = Fixture::new(Model::Abc80);
        let mut cas = cassette_80(&mut fx, &[("prog.bas", b"x")]);
        cas.queue_file("prog.bas".into());

        let mut ctx = fx.ctx(Default::default());
        cas.enable(true, &mut ctx);
        assert!(!cas.idle());
        cas.enable(false, &mut ctx);
        assert!(cas.idle());
    }

    #[test]
    fn test_snoop_filename_from_memory() {
        let mut fx = Fixture::new(Model::Abc80);
        let mut cas = cassette_80(&mut fx, &[("prog.bas", b"hello")]);

        // The guest keeps a pointer to the 11-byte name at (SP+4)
        let sp = 0xC100u16;
        fx.mem.write_word(sp.wrapping_add(4), 0xC200);
        for (i, &b) in b"PROG    BAS".iter().enumerate() {
            fx.mem.write(0xC200 + i as u16, b);
        }

        let regs = crate::cpu::Regs {
            sp,
            ..Default::default()
        };
        let mut ctx = fx.ctx(regs);
        cas.enable(true, &mut ctx);

        assert!(cas.file.is_some());
        assert_eq!(&cas.block[DATA..DATA + 11], b"PROG    BAS");
    }

    #[test]
    fn test_snoop_bac_falls_back_to_bas() {
        let mut fx = Fixture::new(Model::Abc802);
        let mut cas = Cassette::new_abc802(&mut fx.irq, TapeOptions::default());
        cas.set_library(Box::new(MemLibrary(vec![(
            "prog.bas".into(),
            b"listing".to_vec(),
        )])));

        for (i, &b) in b"PROG    BAC".iter().enumerate() {
            fx.mem.write(0x5000 + i as u16, b);
        }
        let regs = crate::cpu::Regs {
            de: 0x5000,
            ..Default::default()
        };
        let mut ctx = fx.ctx(regs);
        cas.enable(true, &mut ctx);

        assert!(cas.file.is_some());
        // The guest still sees the .BAC name it asked for
        assert_eq!(&cas.block[DATA..DATA + 11], b"PROG    BAC");
    }

    #[test]
    fn test_edge_stream_clock_and_data() {
        let mut fx = Fixture::new(Model::Abc80);
        let mut cas = cassette_80(&mut fx, &[("prog.bas", b"x")]);
        cas.queue_file("prog.bas".into());
        let mut ctx = fx.ctx(Default::default());
        cas.enable(true, &mut ctx);

        // Lead-in bytes are zero: clock edges high, data bits low
        let mut tracer = Tracer::off();
        assert!(cas.edge(&mut tracer)); // clock
        assert!(!cas.edge(&mut tracer)); // data bit 0 of 0x00

        // Skip to the sync byte at offset 32: 16 half-bits per byte
        cas.bitctr = (32 * 16) as u32;
        assert!(cas.edge(&mut tracer)); // clock
        assert!(!cas.edge(&mut tracer)); // 0x16 bit 0
        assert!(cas.edge(&mut tracer)); // clock
        assert!(cas.edge(&mut tracer)); // 0x16 bit 1
        assert!(cas.edge(&mut tracer)); // clock
        assert!(cas.edge(&mut tracer)); // 0x16 bit 2
        assert!(cas.edge(&mut tracer)); // clock
        assert!(!cas.edge(&mut tracer)); // 0x16 bit 3
    }

    #[test]
    fn test_sio_byte_reader_sees_frame_from_blktype() {
        let mut fx = Fixture::new(Model::Abc802);
        let mut cas = Cassette::new_abc802(&mut fx.irq, TapeOptions::default());
        cas.set_library(Box::new(MemLibrary(vec![(
            "prog.bas".into(),
            b"payload".to_vec(),
        )])));
        cas.queue_file("prog.bas".into());

        let mut ctx = fx.ctx(Default::default());
        // WR5 RTS on: motor starts
        cas.sio_out(67, 5, &mut ctx);
        cas.sio_out(67, 0x80, &mut ctx);
        assert!(!cas.idle());

        // WR3: Rx enable
        cas.sio_out(67, 3, &mut ctx);
        cas.sio_out(67, 0x01, &mut ctx);

        // First data byte is the block type of the filename block
        let v = cas.sio_in(66, &mut ctx);
        assert_eq!(v, 0xff);
        let v = cas.sio_in(66, &mut ctx);
        assert_eq!(v, 0x00); // Block number low
    }

    #[test]
    fn test_sio_rx_disabled_is_silent() {
        // WR3 bit 0 clear means the receiver is off no matter what
        // else is in the register
        let mut fx = Fixture::new(Model::Abc802);
        let mut cas = Cassette::new_abc802(&mut fx.irq, TapeOptions::default());
        cas.set_library(Box::new(MemLibrary(vec![("x.bas".into(), b"x".to_vec())])));
        cas.queue_file("x.bas".into());

        let mut ctx = fx.ctx(Default::default());
        cas.sio_out(67, 5, &mut ctx);
        cas.sio_out(67, 0x80, &mut ctx);

        // WR3 = 0x10: hunt bit set but Rx not enabled
        cas.sio_out(67, 3, &mut ctx);
        cas.sio_out(67, 0x10, &mut ctx);
        assert!(!cas.sio_have_sync());
        assert_eq!(cas.sio_in(66, &mut ctx), 0xff);
    }
}
