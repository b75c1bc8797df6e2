//! Memory subsystem for the ABC80 and ABC802.
//!
//! The 64 KiB address space is covered by up to eight banked memory
//! maps of 1 KiB pages. Each page resolves to a kilobyte of backing
//! store plus a write policy; reads always succeed, writes to ROM pages
//! are silently discarded.
//!
//! ABC80 map layout (map index = page-latch bits 2:1, 40-column flag in
//! bit 0):
//!
//! | Map | Contents                                                |
//! |-----|---------------------------------------------------------|
//! | 0/1 | BASIC ROM 0-16K, device ROMs 16-32K, video RAM split    |
//! | 2/3 | RAM over the ROM areas, video RAM at 0x7800             |
//! | 4/5 | all RAM, video RAM at the top of memory                 |
//! | 6/7 | all RAM                                                 |
//!
//! ABC802 maps: 0 = ROM + video RAM, 1 = the option-ROM shadow map used
//! while code executes in 0x7800-0x7FFF, 2 = the all-RAM map switched in
//! when the MEM: device opens the low 30 KiB.
//!
//! Map 7 is always all RAM so a raw-RAM dump is always obtainable.

use std::io;
use std::path::{Path, PathBuf};

use crate::config::{Model, RomSet};
use crate::trace::{self, Tracer};

/// Page granularity of the memory maps.
pub const PAGE_SHIFT: usize = 10;
pub const PAGE_SIZE: usize = 1 << PAGE_SHIFT;
pub const PAGE_MASK: usize = PAGE_SIZE - 1;
pub const PAGE_COUNT: usize = (1 << 16) / PAGE_SIZE;

/// Number of coexisting memory maps.
const MEM_MAPS: usize = 8;

/// Size of the video RAM region shared with the renderer.
pub const VRAM_SIZE: usize = 2048;

const K: usize = 1024;

/// Backing store a page resolves into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Region {
    Ram,
    Video,
    Basic80,
    Basic40,
    Devices,
    Rom802,
}

/// Write policy of a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Policy {
    /// Plain store
    Ram,
    /// Writes silently discarded
    Rom,
    /// Mapped device storage (video RAM); the store still lands so the
    /// renderer snapshot sees it
    Device,
}

#[derive(Debug, Clone, Copy)]
struct MemPage {
    region: Region,
    base: usize,
    policy: Policy,
}

/// One record of the memory-trace ring.
#[derive(Debug, Clone, Copy, Default)]
struct MemTrace {
    addr: u16,
    data: u16,
    size: u8,
    written: bool,
}

const MAX_TRACES: usize = 16;

/// The banked memory map.
pub struct Memory {
    ram: Box<[u8; 1 << 16]>,
    video: [u8; VRAM_SIZE],
    basic80: Vec<u8>,
    basic40: Vec<u8>,
    devices: Vec<u8>,
    rom802: Vec<u8>,

    maps: Box<[[MemPage; PAGE_COUNT]; MEM_MAPS]>,
    /// Active map for normal fetches and for fetches with the last M1
    /// in the option-ROM window.
    current: [usize; 2],
    /// Latched address of the last M1 (opcode) fetch.
    last_m1: u16,
    /// ABC80 page-latch/40-column map index.
    abc80_map: usize,

    model: Model,
    kilobytes: u32,

    /// Record data accesses for the CPU trace stream.
    trace_cpu: bool,
    traces: Vec<MemTrace>,
    trace_overflow: bool,
}

impl Memory {
    pub fn new(model: Model, kilobytes: u32, roms: &RomSet) -> Self {
        let mut kilobytes = kilobytes;
        if model == Model::Abc80 && !(1..=32).contains(&kilobytes) && kilobytes != 64 {
            log::warn!("invalid ABC80 memory size {}K, using 64K", kilobytes);
            kilobytes = 64;
        }

        let blank = MemPage {
            region: Region::Ram,
            base: 0,
            policy: Policy::Ram,
        };
        let mut mem = Self {
            ram: Box::new([0; 1 << 16]),
            video: [0; VRAM_SIZE],
            basic80: roms.basic80.clone().unwrap_or_default(),
            basic40: roms.basic40.clone().unwrap_or_default(),
            devices: roms.devices.clone().unwrap_or_default(),
            rom802: roms.abc802.clone().unwrap_or_default(),
            maps: Box::new([[blank; PAGE_COUNT]; MEM_MAPS]),
            current: [0, 0],
            last_m1: 0,
            abc80_map: 0,
            model,
            kilobytes,
            trace_cpu: false,
            traces: Vec::with_capacity(MAX_TRACES + 1),
            trace_overflow: false,
        };

        // Start from all-RAM everywhere; map 7 stays that way so raw
        // dumps always work
        mem.map(0xff, 0, 64 * K, Region::Ram, 0, Policy::Ram);

        match model {
            Model::Abc80 => mem.init_abc80(),
            Model::Abc802 => mem.init_abc802(),
        }

        mem
    }

    fn init_abc80(&mut self) {
        // Maps 0 (80-column) and 1 (40-column): BASIC ROM low, device
        // ROMs at 16K, split video RAM
        if !self.basic80.is_empty() {
            self.map(0x01, 0, 16 * K, Region::Basic80, 0, Policy::Rom);
        } else {
            log::warn!("no ABC80 80-column BASIC ROM image; leaving RAM");
        }
        if !self.basic40.is_empty() {
            self.map(0x02, 0, 16 * K, Region::Basic40, 0, Policy::Rom);
        }
        if !self.devices.is_empty() {
            // The device ROM area is writable in practice
            self.map(0x03, 16 * K, 16 * K, Region::Devices, 0, Policy::Ram);
        }
        self.map(0x01, 29 * K, K, Region::Video, 0, Policy::Device);
        self.map(0x03, 31 * K, K, Region::Video, K, Policy::Device);

        if self.kilobytes < 32 {
            // Simulate non-existent memory as read-only 0xFF. ABC80 RAM
            // grows from the top of memory downward toward 32K.
            let missing = (32 - self.kilobytes as usize) * K;
            self.ram[32 * K..32 * K + missing].fill(0xff);
            self.map(0x03, 32 * K, missing, Region::Ram, 32 * K, Policy::Rom);
        }

        // Maps 2/3: RAM over the ROM areas
        self.map(0x04, 30 * K, 2 * K, Region::Video, 0, Policy::Device);
        self.map(0x08, 31 * K, K, Region::Video, K, Policy::Device);

        // Maps 4/5: video RAM at the end
        self.map(0x10, 62 * K, 2 * K, Region::Video, 0, Policy::Device);
        self.map(0x20, 63 * K, K, Region::Video, K, Policy::Device);

        // Maps 6/7: all RAM

        self.abc80_map = 0;
        self.current = [0, 0];
    }

    fn init_abc802(&mut self) {
        // Map 0: normal execution
        if self.rom802.len() >= 32 * K {
            self.map(0x01, 0, 24 * K, Region::Rom802, 0, Policy::Rom);
            self.map(0x01, 24 * K, 6 * K, Region::Rom802, 24 * K, Policy::Rom);
            // Map 1: execution in the option ROM window sees the option
            // ROM itself and RAM everywhere else
            self.map(0x02, 30 * K, 2 * K, Region::Rom802, 30 * K, Policy::Rom);
        } else {
            log::warn!("no ABC802 ROM image (need 32K); leaving RAM");
        }
        self.map(0x01, 30 * K, 2 * K, Region::Video, 0, Policy::Device);

        // Map 2: MEM: area open in its entirety (all RAM)

        self.abc802_open_mem(false);
    }

    /// Point pages `where_..where_+size` of every map in the `maps`
    /// bitmask at `region` storage starting at `base`.
    fn map(&mut self, maps: u8, where_: usize, size: usize, region: Region, base: usize, policy: Policy) {
        assert_eq!((where_ | size) & PAGE_MASK, 0);

        for m in 0..MEM_MAPS {
            if maps & (1 << m) == 0 {
                continue;
            }

            let mut base = base;
            for page in where_ >> PAGE_SHIFT..(where_ + size) >> PAGE_SHIFT {
                self.maps[m][page] = MemPage {
                    region,
                    base,
                    policy,
                };
                base += PAGE_SIZE;
            }
        }
    }

    #[inline]
    fn page(&self, addr: u16) -> &MemPage {
        let shadow = (self.last_m1 & 0xf800) == 0x7800;
        &self.maps[self.current[shadow as usize]][addr as usize >> PAGE_SHIFT]
    }

    #[inline]
    fn slot(&self, page: &MemPage, addr: u16) -> usize {
        page.base + (addr as usize & PAGE_MASK)
    }

    fn region_data(&self, region: Region) -> &[u8] {
        match region {
            Region::Ram => &self.ram[..],
            Region::Video => &self.video,
            Region::Basic80 => &self.basic80,
            Region::Basic40 => &self.basic40,
            Region::Devices => &self.devices,
            Region::Rom802 => &self.rom802,
        }
    }

    #[inline]
    fn do_read(&self, addr: u16) -> u8 {
        let page = self.page(addr);
        let slot = self.slot(page, addr);
        let data = self.region_data(page.region);
        data.get(slot).copied().unwrap_or(0xff)
    }

    fn do_write(&mut self, addr: u16, value: u8) {
        let page = *self.page(addr);
        let slot = self.slot(&page, addr);
        match page.policy {
            Policy::Rom => {}
            Policy::Ram | Policy::Device => match page.region {
                Region::Ram => self.ram[slot] = value,
                Region::Video => self.video[slot] = value,
                Region::Devices => self.devices[slot] = value,
                // ROM regions are never mapped writable
                _ => {}
            },
        }
    }

    fn record(&mut self, addr: u16, data: u16, size: u8, written: bool) {
        if !self.trace_cpu {
            return;
        }

        if self.traces.len() < MAX_TRACES {
            self.traces.push(MemTrace {
                addr,
                data,
                size,
                written,
            });
        } else {
            self.trace_overflow = true;
        }
    }

    // ========== CPU-facing operations ==========

    /// Data read; lands in the trace ring.
    pub fn read(&mut self, addr: u16) -> u8 {
        let value = self.do_read(addr);
        self.record(addr, value as u16, 1, false);
        value
    }

    /// Instruction stream read (operands, prefixes); not traced.
    pub fn fetch(&self, addr: u16) -> u8 {
        self.do_read(addr)
    }

    /// First opcode byte of an instruction, corresponding to the M1
    /// signal; latches the address that selects the option-ROM map.
    pub fn fetch_m1(&mut self, addr: u16) -> u8 {
        self.last_m1 = addr;
        self.do_read(addr)
    }

    /// Untraced read with no side effects, for the disassembler and
    /// cassette filename snooping.
    pub fn peek(&self, addr: u16) -> u8 {
        self.do_read(addr)
    }

    /// Words are stored low byte first; the high byte wraps around the
    /// top of the address space.
    fn do_read_word(&self, addr: u16) -> u16 {
        let b0 = self.do_read(addr) as u16;
        let b1 = self.do_read(addr.wrapping_add(1)) as u16;
        (b1 << 8) | b0
    }

    pub fn read_word(&mut self, addr: u16) -> u16 {
        let value = self.do_read_word(addr);
        self.record(addr, value, 2, false);
        value
    }

    pub fn fetch_word(&self, addr: u16) -> u16 {
        self.do_read_word(addr)
    }

    pub fn write(&mut self, addr: u16, value: u8) {
        self.record(addr, value as u16, 1, true);
        self.do_write(addr, value);
    }

    pub fn write_word(&mut self, addr: u16, value: u16) {
        self.record(addr, value, 2, true);
        self.do_write(addr, value as u8);
        self.do_write(addr.wrapping_add(1), (value >> 8) as u8);
    }

    // ========== Map switching ==========

    /// ABC80 "Mikrodatorn" page latch (out to port 7). Only 64K
    /// machines can remap memory.
    pub fn abc80_set_map(&mut self, map: u8) {
        if self.kilobytes < 64 {
            return;
        }

        self.abc80_map = (((map & 3) as usize) << 1) | (self.abc80_map & !6);
        self.current = [self.abc80_map, self.abc80_map];
    }

    /// ABC80 40-column mode flips the low bit of the map index.
    pub fn abc80_set_40col(&mut self, mode40: bool) {
        self.abc80_map = (self.abc80_map & !1) | mode40 as usize;
        self.current = [self.abc80_map, self.abc80_map];
    }

    /// Open or close the ABC802 MEM: area.
    pub fn abc802_open_mem(&mut self, opened: bool) {
        if opened {
            self.current = [2, 2];
        } else {
            self.current = [0, 1];
        }
    }

    // ========== Renderer and host access ==========

    /// The video RAM backing store, for the vsync snapshot copy.
    pub fn video_ram(&self) -> &[u8; VRAM_SIZE] {
        &self.video
    }

    pub fn model(&self) -> Model {
        self.model
    }

    pub fn kilobytes(&self) -> u32 {
        self.kilobytes
    }

    /// Load a binary file into low (< 30K) RAM in the format used by
    /// the ABC802 MEM: device.
    pub fn load_memfile(&mut self, data: &[u8]) {
        let mut abc = crate::abcfile::AbcData::new(data.to_vec());
        let max_blocks = (30 * K >> 8) - 1;
        let mut offset = 0;

        for blk in 0..max_blocks {
            self.ram[offset] = 0x53;
            self.ram[offset + 1] = 0;
            self.ram[offset + 2] = blk as u8;
            let done = abc.next_block((&mut self.ram[offset + 3..offset + 256]).try_into().unwrap());
            offset += 256;
            if done {
                break;
            }
        }

        // Avoid possible stray magic after the last block
        self.ram[offset..offset + 3].fill(0);
    }

    // ========== Dumps ==========

    /// The 64 KiB as currently seen by the CPU (`ramonly` false) or the
    /// raw all-RAM map 7 (`ramonly` true).
    pub fn dump(&self, ramonly: bool) -> Vec<u8> {
        let map = if ramonly { 7 } else { self.current[0] };
        let mut out = Vec::with_capacity(1 << 16);

        for page in 0..PAGE_COUNT {
            let mp = self.maps[map][page];
            let data = self.region_data(mp.region);
            for i in 0..PAGE_SIZE {
                out.push(data.get(mp.base + i).copied().unwrap_or(0xff));
            }
        }

        out
    }

    /// Write a dump as `mem####.bin` or `ram####.bin` in `dir`, picking
    /// the lowest free 4-digit index.
    pub fn dump_to_dir(&self, dir: &Path, ramonly: bool) -> io::Result<PathBuf> {
        let stem = if ramonly { "ram" } else { "mem" };
        let path = numbered_file(dir, stem, "bin")?;
        std::fs::write(&path, self.dump(ramonly))?;
        Ok(path)
    }

    // ========== Trace ring ==========

    /// Enable recording of data accesses for the CPU trace.
    pub fn set_trace_cpu(&mut self, on: bool) {
        self.trace_cpu = on;
    }

    /// Print and reset the ring of accesses made by the last
    /// instruction.
    pub fn drain_traces(&mut self, tracer: &mut Tracer) {
        let mut last_addr = 0u32;
        let mut last_written = None;

        for t in &self.traces {
            tracer.put(trace::CPU, " ");
            if u32::from(t.addr) != last_addr || Some(t.written) != last_written {
                tracer.write(
                    trace::CPU,
                    format_args!("({:04X}){}", t.addr, if t.written { '=' } else { ':' }),
                );
            }
            match t.size {
                1 => tracer.write(trace::CPU, format_args!("{:02X}", t.data)),
                _ => tracer.write(trace::CPU, format_args!("{:04X}", t.data)),
            }
            last_addr = u32::from(t.addr) + u32::from(t.size);
            last_written = Some(t.written);
        }

        if self.trace_overflow {
            tracer.put(trace::CPU, " ...");
        }

        self.traces.clear();
        self.trace_overflow = false;
    }
}

/// Pick the lowest free `{stem}{0001..9999}.{ext}` in `dir`.
fn numbered_file(dir: &Path, stem: &str, ext: &str) -> io::Result<PathBuf> {
    for n in 1..=9999u32 {
        let candidate = dir.join(format!("{}{:04}.{}", stem, n, ext));
        if !candidate.exists() {
            return Ok(candidate);
        }
    }
    Err(io::Error::new(
        io::ErrorKind::AlreadyExists,
        "no free dump file index",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Model, RomSet};

    fn ram_only() -> Memory {
        Memory::new(Model::Abc80, 64, &RomSet::default())
    }

    fn with_basic() -> Memory {
        let roms = RomSet {
            basic80: Some(vec![0x11; 16 * K]),
            basic40: Some(vec![0x22; 16 * K]),
            devices: Some(vec![0x33; 16 * K]),
            abc802: None,
        };
        Memory::new(Model::Abc80, 64, &roms)
    }

    #[test]
    fn test_rom_write_discarded() {
        let mut mem = with_basic();
        assert_eq!(mem.read(0x0000), 0x11);
        mem.write(0x0000, 0x99);
        assert_eq!(mem.read(0x0000), 0x11);
    }

    #[test]
    fn test_device_rom_area_is_writable() {
        let mut mem = with_basic();
        assert_eq!(mem.read(0x4000), 0x33);
        mem.write(0x4000, 0x99);
        assert_eq!(mem.read(0x4000), 0x99);
    }

    #[test]
    fn test_word_read_wraps_at_top_of_memory() {
        let mut mem = ram_only();
        mem.write(0xffff, 0x34);
        mem.write(0x0000, 0x12);
        assert_eq!(mem.read_word(0xffff), 0x1234);
    }

    #[test]
    fn test_word_write_low_byte_first() {
        let mut mem = ram_only();
        mem.write_word(0x1000, 0xBEEF);
        assert_eq!(mem.read(0x1000), 0xEF);
        assert_eq!(mem.read(0x1001), 0xBE);
    }

    #[test]
    fn test_nonexistent_ram_reads_ff_and_is_readonly() {
        let mem_roms = RomSet::default();
        let mut mem = Memory::new(Model::Abc80, 16, &mem_roms);

        // 16K machine: 32K-48K missing, 48K-64K present
        assert_eq!(mem.read(0x8000), 0xff);
        mem.write(0x8000, 0x00);
        assert_eq!(mem.read(0x8000), 0xff);

        mem.write(0xC000, 0x42);
        assert_eq!(mem.read(0xC000), 0x42);
    }

    #[test]
    fn test_invalid_memory_size_clamped() {
        let mem = Memory::new(Model::Abc80, 48, &RomSet::default());
        assert_eq!(mem.kilobytes(), 64);
    }

    #[test]
    fn test_abc80_page_latch_needs_64k() {
        let roms = RomSet {
            basic80: Some(vec![0x11; 16 * K]),
            ..RomSet::default()
        };

        let mut mem = Memory::new(Model::Abc80, 16, &roms);
        mem.abc80_set_map(3);
        assert_eq!(mem.read(0x0000), 0x11); // Still map 0

        let mut mem = Memory::new(Model::Abc80, 64, &roms);
        mem.write(0x8000, 0x55);
        mem.abc80_set_map(3); // Maps 6/7: all RAM
        mem.write(0x0000, 0x77);
        assert_eq!(mem.read(0x0000), 0x77);
    }

    #[test]
    fn test_abc80_40col_flips_video_layout() {
        let mut mem = with_basic();

        // 80-column map: primary video RAM at 0x7400, secondary bank
        // at 0x7C00
        mem.write(0x7400, 0x41);
        assert_eq!(mem.video_ram()[0], 0x41);
        assert_eq!(mem.read(0x0000), 0x11); // 80-column BASIC

        mem.abc80_set_40col(true);
        // 40-column map: only the 0x7C00 bank is video RAM, and the
        // 40-column BASIC ROM is switched in
        mem.write(0x7C00, 0x42);
        assert_eq!(mem.video_ram()[1024], 0x42);
        assert_eq!(mem.read(0x0000), 0x22);

        mem.write(0x7400, 0x55);
        assert_eq!(mem.video_ram()[0], 0x41); // Not video RAM anymore
    }

    #[test]
    fn test_abc802_option_rom_shadow_map() {
        let mut rom = vec![0u8; 32 * K];
        rom[0x0000] = 0xAA; // BASIC ROM
        rom[30 * K] = 0xBB; // Option ROM content
        let roms = RomSet {
            abc802: Some(rom),
            ..RomSet::default()
        };
        let mut mem = Memory::new(Model::Abc802, 64, &roms);

        // Normal fetch: 0x7800 is video RAM
        mem.fetch_m1(0x0100);
        mem.write(0x7800, 0x21);
        assert_eq!(mem.read(0x7800), 0x21);

        // M1 fetch in the option ROM window switches the data map
        mem.fetch_m1(0x7800);
        assert_eq!(mem.read(0x7800), 0xBB);

        // MEM: open replaces everything with RAM
        mem.abc802_open_mem(true);
        mem.fetch_m1(0x0100);
        mem.write(0x0000, 0x99);
        assert_eq!(mem.read(0x0000), 0x99);
        mem.abc802_open_mem(false);
        assert_eq!(mem.read(0x0000), 0xAA);
    }

    #[test]
    fn test_dump_map7_always_raw_ram() {
        let mut mem = with_basic();
        mem.write(0xC000, 0x5A);
        let dump = mem.dump(true);
        assert_eq!(dump.len(), 1 << 16);
        assert_eq!(dump[0xC000], 0x5A);
        assert_eq!(dump[0x0000], 0x00); // RAM, not the BASIC ROM

        let cur = mem.dump(false);
        assert_eq!(cur[0x0000], 0x11); // BASIC ROM visible
    }

    #[test]
    fn test_memfile_preload_layout() {
        let mut mem = Memory::new(Model::Abc802, 64, &RomSet::default());
        let payload = vec![0x42u8; 300];
        mem.load_memfile(&payload);

        // Block 0 header
        assert_eq!(mem.peek(0x0000), 0x53);
        assert_eq!(mem.peek(0x0001), 0x00);
        assert_eq!(mem.peek(0x0002), 0x00);
        assert_eq!(mem.peek(0x0003), 0x42);
        // Block 1 header
        assert_eq!(mem.peek(0x0100), 0x53);
        assert_eq!(mem.peek(0x0102), 0x01);
    }
}
