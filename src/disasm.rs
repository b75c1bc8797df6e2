//! Z80 disassembler.
//!
//! Produces the one-line instruction text for the CPU trace stream.
//! All documented instructions plus the undocumented ones the
//! interpreter executes (SLL, index-register halves, the dual-writeback
//! DDCB forms). Undefined ED opcodes disassemble as `nop`, matching
//! what the CPU does with them.

use crate::bus::Bus;

/// One disassembled instruction.
#[derive(Debug, Clone)]
pub struct Disasm {
    /// Mnemonic with operands, e.g. `ld a,(ix+5)`.
    pub text: String,
    /// Instruction length in bytes.
    pub len: u16,
}

/// Active index register context.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Idx {
    Hl,
    Ix,
    Iy,
}

impl Idx {
    fn name(self) -> &'static str {
        match self {
            Idx::Hl => "hl",
            Idx::Ix => "ix",
            Idx::Iy => "iy",
        }
    }

    fn high(self) -> &'static str {
        match self {
            Idx::Hl => "h",
            Idx::Ix => "ixh",
            Idx::Iy => "iyh",
        }
    }

    fn low(self) -> &'static str {
        match self {
            Idx::Hl => "l",
            Idx::Ix => "ixl",
            Idx::Iy => "iyl",
        }
    }
}

const CC: [&str; 8] = ["nz", "z", "nc", "c", "po", "pe", "p", "m"];
const ALU: [&str; 8] = [
    "add a,", "adc a,", "sub ", "sbc a,", "and ", "xor ", "or ", "cp ",
];
const ROT: [&str; 8] = ["rlc", "rrc", "rl", "rr", "sla", "sra", "sll", "srl"];

struct Cursor<'a> {
    bus: &'a Bus,
    addr: u16,
    len: u16,
}

impl Cursor<'_> {
    fn byte(&mut self) -> u8 {
        let b = self.bus.peek(self.addr.wrapping_add(self.len));
        self.len += 1;
        b
    }

    fn word(&mut self) -> u16 {
        let lo = self.byte() as u16;
        let hi = self.byte() as u16;
        (hi << 8) | lo
    }

    /// Address following the instruction, for relative targets.
    fn here(&self) -> u16 {
        self.addr.wrapping_add(self.len)
    }
}

/// Displacement operand text, e.g. `(ix+5)` or `(iy-3)`.
fn mem_operand(ix: Idx, cur: &mut Cursor) -> String {
    match ix {
        Idx::Hl => "(hl)".to_string(),
        _ => {
            let d = cur.byte() as i8;
            if d < 0 {
                format!("({}-{})", ix.name(), -(d as i16))
            } else {
                format!("({}+{})", ix.name(), d)
            }
        }
    }
}

/// Register operand by specifier; 6 is the memory operand.
fn reg_operand(idx: u8, ix: Idx, cur: &mut Cursor) -> String {
    match idx {
        0 => "b".into(),
        1 => "c".into(),
        2 => "d".into(),
        3 => "e".into(),
        4 => ix.high().into(),
        5 => ix.low().into(),
        6 => mem_operand(ix, cur),
        _ => "a".into(),
    }
}

fn rp_name(p: u8, ix: Idx) -> &'static str {
    match p {
        0 => "bc",
        1 => "de",
        2 => ix.name(),
        _ => "sp",
    }
}

fn rp2_name(p: u8, ix: Idx) -> &'static str {
    match p {
        0 => "bc",
        1 => "de",
        2 => ix.name(),
        _ => "af",
    }
}

/// Disassemble the instruction at `addr`.
pub fn disassemble_at(bus: &Bus, addr: u16) -> Disasm {
    let mut cur = Cursor { bus, addr, len: 0 };
    let mut ix = Idx::Hl;

    let text = loop {
        let opcode = cur.byte();
        match opcode {
            0xDD => {
                ix = Idx::Ix;
                continue;
            }
            0xFD => {
                ix = Idx::Iy;
                continue;
            }
            0xCB => break disasm_cb(&mut cur, ix),
            0xED => break disasm_ed(&mut cur),
            _ => break disasm_main(&mut cur, opcode, ix),
        }
    };

    Disasm { text, len: cur.len }
}

fn disasm_main(cur: &mut Cursor, opcode: u8, ix: Idx) -> String {
    let x = opcode >> 6;
    let y = (opcode >> 3) & 7;
    let z = opcode & 7;
    let p = y >> 1;
    let q = y & 1;

    match x {
        0 => disasm_x0(cur, y, z, p, q, ix),
        1 => {
            if opcode == 0x76 {
                "halt".into()
            } else if y == 6 {
                let dst = mem_operand(ix, cur);
                let src = reg_operand(z, Idx::Hl, cur);
                format!("ld {},{}", dst, src)
            } else if z == 6 {
                let src = mem_operand(ix, cur);
                format!("ld {},{}", reg_operand(y, Idx::Hl, cur), src)
            } else {
                format!(
                    "ld {},{}",
                    reg_operand(y, ix, cur),
                    reg_operand(z, ix, cur)
                )
            }
        }
        2 => {
            let operand = if z == 6 {
                mem_operand(ix, cur)
            } else {
                reg_operand(z, ix, cur)
            };
            format!("{}{}", ALU[y as usize], operand)
        }
        _ => disasm_x3(cur, y, z, p, q, ix),
    }
}

fn disasm_x0(cur: &mut Cursor, y: u8, z: u8, p: u8, q: u8, ix: Idx) -> String {
    match z {
        0 => match y {
            0 => "nop".into(),
            1 => "ex af,af'".into(),
            2 => {
                let d = cur.byte() as i8;
                format!("djnz 0x{:04x}", cur.here().wrapping_add(d as u16))
            }
            3 => {
                let d = cur.byte() as i8;
                format!("jr 0x{:04x}", cur.here().wrapping_add(d as u16))
            }
            _ => {
                let d = cur.byte() as i8;
                format!(
                    "jr {},0x{:04x}",
                    CC[(y - 4) as usize],
                    cur.here().wrapping_add(d as u16)
                )
            }
        },
        1 => {
            if q == 0 {
                format!("ld {},0x{:04x}", rp_name(p, ix), cur.word())
            } else {
                format!("add {},{}", ix.name(), rp_name(p, ix))
            }
        }
        2 => match (q, p) {
            (0, 0) => "ld (bc),a".into(),
            (0, 1) => "ld (de),a".into(),
            (0, 2) => format!("ld (0x{:04x}),{}", cur.word(), ix.name()),
            (0, _) => format!("ld (0x{:04x}),a", cur.word()),
            (1, 0) => "ld a,(bc)".into(),
            (1, 1) => "ld a,(de)".into(),
            (1, 2) => format!("ld {},(0x{:04x})", ix.name(), cur.word()),
            _ => format!("ld a,(0x{:04x})", cur.word()),
        },
        3 => {
            if q == 0 {
                format!("inc {}", rp_name(p, ix))
            } else {
                format!("dec {}", rp_name(p, ix))
            }
        }
        4 | 5 => {
            let op = if z == 4 { "inc" } else { "dec" };
            let operand = if y == 6 {
                mem_operand(ix, cur)
            } else {
                reg_operand(y, ix, cur)
            };
            format!("{} {}", op, operand)
        }
        6 => {
            // For (ix+d) the displacement precedes the immediate
            let dst = if y == 6 {
                mem_operand(ix, cur)
            } else {
                reg_operand(y, ix, cur)
            };
            format!("ld {},0x{:02x}", dst, cur.byte())
        }
        _ => ["rlca", "rrca", "rla", "rra", "daa", "cpl", "scf", "ccf"][y as usize].into(),
    }
}

fn disasm_x3(cur: &mut Cursor, y: u8, z: u8, p: u8, q: u8, ix: Idx) -> String {
    match z {
        0 => format!("ret {}", CC[y as usize]),
        1 => {
            if q == 0 {
                format!("pop {}", rp2_name(p, ix))
            } else {
                match p {
                    0 => "ret".into(),
                    1 => "exx".into(),
                    2 => format!("jp ({})", ix.name()),
                    _ => format!("ld sp,{}", ix.name()),
                }
            }
        }
        2 => format!("jp {},0x{:04x}", CC[y as usize], cur.word()),
        3 => match y {
            0 => format!("jp 0x{:04x}", cur.word()),
            2 => format!("out (0x{:02x}),a", cur.byte()),
            3 => format!("in a,(0x{:02x})", cur.byte()),
            4 => format!("ex (sp),{}", ix.name()),
            5 => "ex de,hl".into(),
            6 => "di".into(),
            _ => "ei".into(),
        },
        4 => format!("call {},0x{:04x}", CC[y as usize], cur.word()),
        5 => {
            if q == 0 {
                format!("push {}", rp2_name(p, ix))
            } else {
                format!("call 0x{:04x}", cur.word())
            }
        }
        6 => format!("{}0x{:02x}", ALU[y as usize], cur.byte()),
        _ => format!("rst 0x{:02x}", y * 8),
    }
}

fn disasm_cb(cur: &mut Cursor, ix: Idx) -> String {
    // DDCB/FDCB: displacement byte comes before the sub-opcode
    let operand = if ix == Idx::Hl {
        None
    } else {
        Some(mem_operand(ix, cur))
    };
    let opcode = cur.byte();
    let x = opcode >> 6;
    let y = (opcode >> 3) & 7;
    let z = opcode & 7;

    let target = match &operand {
        Some(mem) => {
            // Dual writeback: the result also lands in a register
            // unless the specifier is 6 (BIT writes nothing anyway)
            if z == 6 || x == 1 {
                mem.clone()
            } else {
                format!("{},{}", mem, reg_operand(z, Idx::Hl, cur))
            }
        }
        None => reg_operand(z, Idx::Hl, cur),
    };

    match x {
        0 => format!("{} {}", ROT[y as usize], target),
        1 => format!("bit {},{}", y, target),
        2 => format!("res {},{}", y, target),
        _ => format!("set {},{}", y, target),
    }
}

fn disasm_ed(cur: &mut Cursor) -> String {
    let opcode = cur.byte();

    match opcode {
        0x4A | 0x5A | 0x6A | 0x7A => {
            format!("adc hl,{}", rp_name((opcode >> 4) & 3, Idx::Hl))
        }
        0x42 | 0x52 | 0x62 | 0x72 => {
            format!("sbc hl,{}", rp_name((opcode >> 4) & 3, Idx::Hl))
        }
        0x43 | 0x53 | 0x63 | 0x73 => {
            format!(
                "ld (0x{:04x}),{}",
                cur.word(),
                rp_name((opcode >> 4) & 3, Idx::Hl)
            )
        }
        0x4B | 0x5B | 0x6B | 0x7B => {
            format!(
                "ld {},(0x{:04x})",
                rp_name((opcode >> 4) & 3, Idx::Hl),
                cur.word()
            )
        }
        0x44 | 0x4C | 0x54 | 0x5C | 0x64 | 0x6C | 0x74 | 0x7C => "neg".into(),
        0x45 | 0x55 | 0x65 | 0x75 => "retn".into(),
        0x4D | 0x5D | 0x6D | 0x7D => "reti".into(),
        0x46 | 0x66 | 0x4E | 0x6E => "im 0".into(),
        0x56 | 0x76 => "im 1".into(),
        0x5E | 0x7E => "im 2".into(),
        0x40 | 0x48 | 0x50 | 0x58 | 0x60 | 0x68 | 0x78 => {
            let mut r = String::new();
            let spec = (opcode >> 3) & 7;
            r.push_str("in ");
            r.push_str(&reg_operand(spec, Idx::Hl, cur));
            r.push_str(",(c)");
            r
        }
        0x41 | 0x49 | 0x51 | 0x59 | 0x61 | 0x69 | 0x79 => {
            format!("out (c),{}", reg_operand((opcode >> 3) & 7, Idx::Hl, cur))
        }
        0x71 => "out (c),0".into(),
        0x47 => "ld i,a".into(),
        0x57 => "ld a,i".into(),
        0x4F => "ld r,a".into(),
        0x5F => "ld a,r".into(),
        0x67 => "rrd".into(),
        0x6F => "rld".into(),
        0xA0 => "ldi".into(),
        0xA8 => "ldd".into(),
        0xB0 => "ldir".into(),
        0xB8 => "lddr".into(),
        0xA1 => "cpi".into(),
        0xA9 => "cpd".into(),
        0xB1 => "cpir".into(),
        0xB9 => "cpdr".into(),
        0xA2 => "ini".into(),
        0xAA => "ind".into(),
        0xB2 => "inir".into(),
        0xBA => "indr".into(),
        0xA3 => "outi".into(),
        0xAB => "outd".into(),
        0xB3 => "otir".into(),
        0xBB => "otdr".into(),
        _ => "nop".into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Model, RomSet, TapeOptions};
    use crate::io::{DiskSet, IoPorts};
    use crate::irq::IrqController;
    use crate::memory::Memory;
    use crate::scheduler::{Scheduler, TimeSource};
    use crate::trace::Tracer;
    use std::sync::atomic::{AtomicBool, AtomicU8};
    use std::sync::{Arc, Mutex};

    fn bus_with(program: &[u8]) -> Bus {
        let mut irq = IrqController::new();
        let io = IoPorts::new(
            Model::Abc80,
            &mut irq,
            DiskSet::empty(),
            TapeOptions::default(),
            Arc::new(AtomicBool::new(false)),
        );
        let (tx, _rx) = crossbeam_channel::unbounded();
        let video =
            crate::events::VideoBridge::for_tests(Arc::new(Mutex::new(Default::default())), tx);
        let cpu = crate::cpu::Cpu::new();

        let mut bus = Bus::new(
            Memory::new(Model::Abc80, 64, &RomSet::default()),
            irq,
            Scheduler::new(0.0, TimeSource::manual(), Arc::new(AtomicBool::new(false))),
            Tracer::off(),
            io,
            video,
            cpu.nmi_line(),
            Arc::new(AtomicU8::new(0)),
            ".".into(),
        );
        for (i, &b) in program.iter().enumerate() {
            bus.write(0x4000 + i as u16, b);
        }
        bus
    }

    fn dis(program: &[u8]) -> (String, u16) {
        let bus = bus_with(program);
        let d = disassemble_at(&bus, 0x4000);
        (d.text, d.len)
    }

    #[test]
    fn test_basic_forms() {
        assert_eq!(dis(&[0x00]), ("nop".into(), 1));
        assert_eq!(dis(&[0x3E, 0x12]), ("ld a,0x12".into(), 2));
        assert_eq!(dis(&[0x21, 0x34, 0x12]), ("ld hl,0x1234".into(), 3));
        assert_eq!(dis(&[0x76]), ("halt".into(), 1));
        assert_eq!(dis(&[0xC9]), ("ret".into(), 1));
        assert_eq!(dis(&[0x86]), ("add a,(hl)".into(), 1));
        assert_eq!(dis(&[0xFE, 0x41]), ("cp 0x41".into(), 2));
    }

    #[test]
    fn test_relative_targets_resolved() {
        // JR -2 at 0x4000 targets itself
        assert_eq!(dis(&[0x18, 0xFE]), ("jr 0x4000".into(), 2));
        assert_eq!(dis(&[0x10, 0x00]), ("djnz 0x4002".into(), 2));
        assert_eq!(dis(&[0x20, 0x10]), ("jr nz,0x4012".into(), 2));
    }

    #[test]
    fn test_indexed_forms() {
        assert_eq!(dis(&[0xDD, 0x7E, 0x05]), ("ld a,(ix+5)".into(), 3));
        assert_eq!(dis(&[0xFD, 0x77, 0xFB]), ("ld (iy-5),a".into(), 3));
        assert_eq!(dis(&[0xDD, 0x24]), ("inc ixh".into(), 2));
        assert_eq!(
            dis(&[0xDD, 0x36, 0x02, 0x7F]),
            ("ld (ix+2),0x7f".into(), 4)
        );
        assert_eq!(dis(&[0xDD, 0xE3]), ("ex (sp),ix".into(), 2));
    }

    #[test]
    fn test_cb_and_ddcb_forms() {
        assert_eq!(dis(&[0xCB, 0x47]), ("bit 0,a".into(), 2));
        assert_eq!(dis(&[0xCB, 0x26]), ("sla (hl)".into(), 2));
        // Dual writeback spells out the register copy
        assert_eq!(dis(&[0xDD, 0xCB, 0x03, 0x10]), ("rl (ix+3),b".into(), 4));
        assert_eq!(dis(&[0xDD, 0xCB, 0x03, 0x46]), ("bit 0,(ix+3)".into(), 4));
    }

    #[test]
    fn test_ed_forms() {
        assert_eq!(dis(&[0xED, 0xB0]), ("ldir".into(), 2));
        assert_eq!(dis(&[0xED, 0x4D]), ("reti".into(), 2));
        assert_eq!(dis(&[0xED, 0x52]), ("sbc hl,de".into(), 2));
        assert_eq!(
            dis(&[0xED, 0x7B, 0x00, 0xC0]),
            ("ld sp,(0xc000)".into(), 4)
        );
        // Undefined ED opcodes read as the NOP they execute as
        assert_eq!(dis(&[0xED, 0xFF]), ("nop".into(), 2));
    }
}
