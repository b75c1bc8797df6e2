//! ABC-bus disk controllers.
//!
//! Four controller types share one protocol: the guest sends four "K"
//! bytes (command, unit, and the sector address), and the command bits
//! of K0 then run in order: bit 0 READ-SECTOR, bit 1 SECTOR-TO-HOST
//! (the guest reads 256 bytes back), bit 2 SECTOR-FROM-HOST (the guest
//! sends 256 bytes), bit 3 WRITE-SECTOR. Status reads report a
//! "not ready" countdown right after reset, then command status.
//!
//! Sector addressing comes in two flavours selected per drive type:
//! the old clustered form `((K2<<3) + (K3>>5)) * secperclust + (K3&31)`
//! and the "new addressing" linear form `(K2<<8) + K3`.
//!
//! Sector data lives behind [`SectorStore`]; the in-memory
//! implementation serves tests and pre-loaded images, and the front
//! end may supply file-backed stores.

use crate::cpu::Regs;
use crate::trace::{self, Tracer};

/// 256-byte sector backing store for one drive unit.
pub trait SectorStore: Send {
    fn read_at(&mut self, pos: usize, buf: &mut [u8; 256]);

    /// Returns false on a host-side write failure.
    fn write_at(&mut self, pos: usize, buf: &[u8; 256]) -> bool;

    fn writable(&self) -> bool;

    fn flush(&mut self) {}
}

/// Memory-backed sector store.
pub struct MemDisk {
    data: Vec<u8>,
    writable: bool,
}

impl MemDisk {
    pub fn new(data: Vec<u8>, writable: bool) -> Self {
        Self { data, writable }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

impl SectorStore for MemDisk {
    fn read_at(&mut self, pos: usize, buf: &mut [u8; 256]) {
        for (i, slot) in buf.iter_mut().enumerate() {
            *slot = self.data.get(pos + i).copied().unwrap_or(0);
        }
    }

    fn write_at(&mut self, pos: usize, buf: &[u8; 256]) -> bool {
        if self.data.len() < pos + 256 {
            self.data.resize(pos + 256, 0);
        }
        self.data[pos..pos + 256].copy_from_slice(buf);
        true
    }

    fn writable(&self) -> bool {
        self.writable
    }
}

/// Drive geometry per controller type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveKind {
    /// MOx: single-sided 40-track minifloppy
    Mo,
    /// MFx: double-sided 80-track minifloppy
    Mf,
    /// SFx: 8-inch floppy (track 0 side 0 unused)
    Sf,
    /// HDx: hard disk
    Hd,
}

impl DriveKind {
    fn secperclust(self) -> u32 {
        match self {
            Self::Mo => 1,
            Self::Mf | Self::Sf => 4,
            Self::Hd => 32,
        }
    }

    fn sectors(self) -> u32 {
        match self {
            Self::Mo => 40 * 16,
            Self::Mf => 80 * 2 * 16,
            Self::Sf => (77 * 2 - 1) * 26,
            Self::Hd => 238 * 8 * 32,
        }
    }

    /// Linear sector addressing instead of the clustered form.
    fn new_addressing(self) -> bool {
        // Irrelevant for HD in practice since secperclust is 32
        self == Self::Hd
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Mo => "mo",
            Self::Mf => "mf",
            Self::Sf => "sf",
            Self::Hd => "hd",
        }
    }

    /// ABC-bus select code.
    pub fn select(self) -> i8 {
        match self {
            Self::Hd => 36,
            Self::Mf => 44,
            Self::Mo => 45,
            Self::Sf => 46,
        }
    }
}

/// Interpretation of an "out" command stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutState {
    NeedInit,
    K0,
    K1,
    K2,
    K3,
    Upload,
    Download,
}

/// One controller (up to 8 units of one drive kind).
pub struct DiskController {
    kind: DriveKind,
    state: OutState,
    k: [u8; 4],
    /// Write pointer within the buffer during Upload.
    out_ptr: usize,
    /// Read pointer during Download; -1 when inactive.
    in_ptr: i32,
    status: u8,
    aux_status: u8,
    /// Status reads report not-ready this many times after reset.
    notready_ctr: u8,
    units: [Option<Box<dyn SectorStore>>; 8],
    /// 4 buffers selected by the top bits of K1.
    bufs: [[u8; 256]; 4],
}

impl DiskController {
    pub fn new(kind: DriveKind) -> Self {
        Self {
            kind,
            state: OutState::NeedInit,
            k: [0; 4],
            out_ptr: 0,
            in_ptr: -1,
            status: 0,
            aux_status: 0,
            notready_ctr: 0,
            units: Default::default(),
            bufs: [[0; 256]; 4],
        }
    }

    /// Attach a sector store as unit `unit`.
    pub fn attach(&mut self, unit: usize, store: Box<dyn SectorStore>) {
        self.units[unit] = Some(store);
    }

    fn ensure_init(&mut self) {
        if self.state == OutState::NeedInit {
            self.reset_state();
        }
    }

    fn reset_state(&mut self) {
        self.state = OutState::K0;
        self.status = 0;
        self.aux_status = 0;
        self.in_ptr = -1;
        self.out_ptr = 0;
        self.notready_ctr = 4;

        for unit in self.units.iter_mut().flatten() {
            unit.flush();
        }
    }

    pub fn reset(&mut self) {
        if self.state != OutState::NeedInit {
            self.reset_state();
        }
    }

    fn cur_sector(&self) -> u32 {
        let k2 = self.k[2] as u32;
        let k3 = self.k[3] as u32;

        if self.kind.new_addressing() {
            (k2 << 8) + k3
        } else {
            ((k2 << 3) + (k3 >> 5)) * self.kind.secperclust() + (k3 & 31)
        }
    }

    fn file_pos_valid(&self) -> bool {
        self.cur_sector() < self.kind.sectors()
    }

    fn file_pos(&self) -> usize {
        (self.cur_sector() as usize) << 8
    }

    /// Run the command bits of K0 after the K3 latch or a completed
    /// transfer phase.
    fn next_command(&mut self) {
        let unit = (self.k[1] & 7) as usize;
        let buf = (self.k[1] >> 6) as usize;

        if self.k[0] & 0x01 != 0 {
            // READ SECTOR
            let pos = self.file_pos();
            if let Some(store) = &mut self.units[unit] {
                store.read_at(pos, &mut self.bufs[buf]);
            }
            self.k[0] &= !0x01;
        }
        if self.k[0] & 0x02 != 0 {
            // SECTOR TO HOST
            self.in_ptr = 0;
            self.state = OutState::Download;
            self.k[0] &= !0x02;
            return;
        }
        if self.k[0] & 0x04 != 0 {
            // SECTOR FROM HOST
            self.state = OutState::Upload;
            self.out_ptr = 0;
            self.k[0] &= !0x04;
            return;
        }
        if self.k[0] & 0x08 != 0 {
            // WRITE SECTOR
            let pos = self.file_pos();
            if let Some(store) = &mut self.units[unit] {
                if !store.writable() {
                    self.status = 0x80;
                    self.aux_status = 0x40; // Write protect
                } else if !store.write_at(pos, &self.bufs[buf]) {
                    self.status = 0x08;
                    self.aux_status = 0x40;
                }
            }
            self.k[0] &= !0x08;
        }

        self.state = OutState::K0;
    }

    fn out0(&mut self, value: u8, regs: Regs, tracer: &mut Tracer) {
        match self.state {
            OutState::K0 | OutState::K1 | OutState::K2 => {
                self.status = 0;
                self.aux_status = 0;
                let idx = match self.state {
                    OutState::K0 => 0,
                    OutState::K1 => 1,
                    _ => 2,
                };
                self.k[idx] = value;
                self.state = match self.state {
                    OutState::K0 => OutState::K1,
                    OutState::K1 => OutState::K2,
                    _ => OutState::K3,
                };
            }
            OutState::K3 => {
                self.status = 0;
                self.aux_status = 0;
                self.k[3] = value;
                self.state = OutState::K0;

                if tracer.enabled(trace::DISK) {
                    tracer.write(
                        trace::DISK,
                        format_args!(
                            "{}{}: command {:02X} {:02X} {:02X} {:02X}\n",
                            self.kind.name(),
                            self.k[1] & 7,
                            self.k[0],
                            self.k[1],
                            self.k[2],
                            self.k[3]
                        ),
                    );
                    tracer.write(
                        trace::DISK,
                        format_args!(
                            "PC = {:04X}  BC = {:04X}  DE = {:04X}  HL = {:04X}\n",
                            regs.pc, regs.bc, regs.de, regs.hl
                        ),
                    );
                }

                // Bad drive or sector?
                if self.units[(self.k[1] & 7) as usize].is_none() {
                    self.status = 0x08;
                    self.aux_status = 0x80; // Device not ready
                } else if !self.file_pos_valid() {
                    self.status = 0x08;
                    self.aux_status = 0x10; // Seek error
                } else {
                    self.next_command();
                }
            }
            OutState::Upload => {
                let buf = (self.k[1] >> 6) as usize;
                self.bufs[buf][self.out_ptr] = value;
                self.out_ptr += 1;
                tracer.write(trace::DISK, format_args!("{:02X}", value));
                if self.out_ptr >= 256 {
                    tracer.write(
                        trace::DISK,
                        format_args!(
                            "\nPC = {:04X}  BC = {:04X}  DE = {:04X}  HL = {:04X}\n",
                            regs.pc, regs.bc, regs.de, regs.hl
                        ),
                    );
                    self.next_command();
                }
            }
            OutState::Download => {}
            OutState::NeedInit => unreachable!(),
        }
    }

    fn input(&mut self, port: u8, regs: Regs, tracer: &mut Tracer) -> u8 {
        let v = match port {
            0 => {
                if self.in_ptr >= 0 {
                    let buf = (self.k[1] >> 6) as usize;
                    let v = self.bufs[buf][self.in_ptr as usize];
                    self.in_ptr += 1;
                    if self.in_ptr >= 256 {
                        self.in_ptr = -1;
                        self.next_command();
                    }
                    v
                } else {
                    self.aux_status
                }
            }
            1 => {
                // Controller status
                if self.notready_ctr > 0 {
                    self.notready_ctr -= 1;
                    0x80
                } else {
                    0x01 | self.status | if self.state == OutState::K0 { 0x80 } else { 0 }
                }
            }
            _ => 0xff,
        };

        tracer.write(
            trace::DISK,
            format_args!(
                "IN {}/{}: {:02X} : PC = {:04X}  BC = {:04X}  DE = {:04X}  HL = {:04X}\n",
                self.kind.select(),
                port,
                v,
                regs.pc,
                regs.bc,
                regs.de,
                regs.hl
            ),
        );
        v
    }
}

/// The four controllers the ABC-bus knows about.
pub struct DiskSet {
    pub hd: DiskController,
    pub mf: DiskController,
    pub mo: DiskController,
    pub sf: DiskController,
}

impl DiskSet {
    pub fn empty() -> Self {
        Self {
            hd: DiskController::new(DriveKind::Hd),
            mf: DiskController::new(DriveKind::Mf),
            mo: DiskController::new(DriveKind::Mo),
            sf: DiskController::new(DriveKind::Sf),
        }
    }

    /// Load raw images named `{mo|mf|sf|hd}{0..7}` from a directory.
    /// Units whose image is missing simply report not ready.
    pub fn load_dir(dir: &std::path::Path) -> Self {
        let mut set = Self::empty();

        for kind in [DriveKind::Mo, DriveKind::Mf, DriveKind::Sf, DriveKind::Hd] {
            for unit in 0..8 {
                let path = dir.join(format!("{}{}", kind.name(), unit));
                let Ok(data) = std::fs::read(&path) else {
                    continue;
                };
                let writable = std::fs::metadata(&path)
                    .map(|m| !m.permissions().readonly())
                    .unwrap_or(false);

                log::info!(
                    "disk image {} ({} bytes{})",
                    path.display(),
                    data.len(),
                    if writable { "" } else { ", read-only" }
                );
                set.controller(kind)
                    .attach(unit, Box::new(MemDisk::new(data, writable)));
            }
        }

        set
    }

    pub fn controller(&mut self, kind: DriveKind) -> &mut DiskController {
        match kind {
            DriveKind::Hd => &mut self.hd,
            DriveKind::Mf => &mut self.mf,
            DriveKind::Mo => &mut self.mo,
            DriveKind::Sf => &mut self.sf,
        }
    }

    fn by_select(&mut self, sel: i8) -> Option<&mut DiskController> {
        match sel {
            36 => Some(&mut self.hd),
            44 => Some(&mut self.mf),
            45 => Some(&mut self.mo),
            46 => Some(&mut self.sf),
            _ => None,
        }
    }

    pub fn reset_all(&mut self) {
        self.hd.reset();
        self.mf.reset();
        self.mo.reset();
        self.sf.reset();
    }

    pub fn out(&mut self, sel: i8, port: u8, value: u8, regs: Regs, tracer: &mut Tracer) {
        match port {
            0 => {
                if let Some(c) = self.by_select(sel) {
                    c.ensure_init();
                    c.out0(value, regs, tracer);
                }
            }
            2 | 4 => {
                // Start command / reset
                if self.by_select(sel).is_some() {
                    tracer.write(
                        trace::DISK,
                        format_args!(
                            "OUT {}/{} : PC = {:04X}  BC = {:04X}  DE = {:04X}  HL = {:04X}\n",
                            sel, port, regs.pc, regs.bc, regs.de, regs.hl
                        ),
                    );
                    self.reset_all();
                }
            }
            _ => {}
        }
    }

    pub fn input(&mut self, sel: i8, port: u8, regs: Regs, tracer: &mut Tracer) -> u8 {
        match self.by_select(sel) {
            Some(c) => {
                c.ensure_init();
                c.input(port, regs, tracer)
            }
            None => 0xff,
        }
    }
}
