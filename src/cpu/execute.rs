//! Z80 instruction decode and execution.
//!
//! Opcodes are decoded by their x/y/z/p/q bit fields:
//!
//! ```text
//!   7 6   5 4 3   2 1 0
//!    x      y       z        p = y >> 1, q = y & 1
//! ```
//!
//! The main dispatch loop consumes DD/FD prefixes by re-fetching the
//! following byte with the index register substituted for HL; CB and ED
//! re-dispatch into their own groups. Every prefix byte is a separate M1
//! cycle and costs its own 4 t-states from the main clock table, except
//! the DDCB/FDCB sub-opcode which is fetched after the displacement and
//! does not count as an M1 cycle.
//!
//! # References
//! - Zilog Z80 CPU User Manual (UM0080)

use super::flags;
use super::{Cpu, Index};
use crate::bus::Bus;

impl Cpu {
    /// Fetch, decode and execute one instruction. Returns true if the
    /// instruction was HALT.
    pub(super) fn execute_instruction(&mut self, bus: &mut Bus) -> bool {
        let mut ix = Index::Hl;
        let mut opcode = bus.fetch_m1(self.pc);
        self.pc = self.pc.wrapping_add(1);

        loop {
            self.tc += flags::CLK_MAIN[opcode as usize] as u64;
            self.inc_r();

            match opcode {
                0xCB => self.execute_cb(bus, ix),
                0xED => self.execute_ed(bus),
                0xDD => {
                    ix = Index::Ix;
                    opcode = bus.fetch(self.pc);
                    self.pc = self.pc.wrapping_add(1);
                    continue;
                }
                0xFD => {
                    ix = Index::Iy;
                    opcode = bus.fetch(self.pc);
                    self.pc = self.pc.wrapping_add(1);
                    continue;
                }
                0x76 => return true, // HALT
                _ => self.execute_main(bus, opcode, ix),
            }

            return false;
        }
    }

    /// Fetch an immediate byte operand.
    #[inline]
    fn imm8(&mut self, bus: &mut Bus) -> u8 {
        let byte = bus.fetch(self.pc);
        self.pc = self.pc.wrapping_add(1);
        byte
    }

    /// Fetch an immediate word operand.
    #[inline]
    fn imm16(&mut self, bus: &mut Bus) -> u16 {
        let word = bus.fetch_word(self.pc);
        self.pc = self.pc.wrapping_add(2);
        word
    }

    /// ALU operation selected by the y field.
    fn alu_op(&mut self, y: u8, value: u8) {
        match y {
            0 => self.add_byte(value),
            1 => self.adc_byte(value),
            2 => self.sub_byte(value),
            3 => self.sbc_byte(value),
            4 => self.and_byte(value),
            5 => self.xor_byte(value),
            6 => self.or_byte(value),
            7 => self.cp(value),
            _ => {}
        }
    }

    /// Rotate/shift operation selected by the y field (CB group).
    fn rot_op(&mut self, y: u8, value: u8) -> u8 {
        match y {
            0 => self.rlc_byte(value),
            1 => self.rrc_byte(value),
            2 => self.rl_byte(value),
            3 => self.rr_byte(value),
            4 => self.sla_byte(value),
            5 => self.sra_byte(value),
            6 => self.sll_byte(value),
            7 => self.srl_byte(value),
            _ => value,
        }
    }

    /// Register pair by the p field for LD/INC/DEC/ADD (2 selects the
    /// active index register, 3 selects SP).
    fn rp(&self, p: u8, ix: Index) -> u16 {
        match p {
            0 => self.bc,
            1 => self.de,
            2 => self.idx_word(ix),
            _ => self.sp,
        }
    }

    fn set_rp(&mut self, p: u8, val: u16, ix: Index) {
        match p {
            0 => self.bc = val,
            1 => self.de = val,
            2 => self.set_idx_word(ix, val),
            _ => self.sp = val,
        }
    }

    /// Unprefixed and DD/FD-prefixed instructions outside the CB and ED
    /// groups.
    fn execute_main(&mut self, bus: &mut Bus, opcode: u8, ix: Index) {
        let x = opcode >> 6;
        let y = (opcode >> 3) & 7;
        let z = opcode & 7;
        let p = y >> 1;
        let q = y & 1;

        match x {
            0 => self.execute_x0(bus, y, z, p, q, ix),
            1 => {
                // LD r,r'
                if y == 6 {
                    let addr = self.hl_addr(bus, ix);
                    let val = self.reg8(z, Index::Hl);
                    bus.write(addr, val);
                } else if z == 6 {
                    let addr = self.hl_addr(bus, ix);
                    let val = bus.read(addr);
                    self.set_reg8(y, val, Index::Hl);
                } else {
                    let val = self.reg8(z, ix);
                    self.set_reg8(y, val, ix);
                }
            }
            2 => {
                // ALU A,r
                let val = if z == 6 {
                    let addr = self.hl_addr(bus, ix);
                    bus.read(addr)
                } else {
                    self.reg8(z, ix)
                };
                self.alu_op(y, val);
            }
            _ => self.execute_x3(bus, y, z, p, q, ix),
        }
    }

    fn execute_x0(&mut self, bus: &mut Bus, y: u8, z: u8, p: u8, q: u8, ix: Index) {
        match z {
            0 => match y {
                0 => {} // NOP
                1 => {
                    // EX AF,AF'
                    std::mem::swap(&mut self.a, &mut self.a_prime);
                    std::mem::swap(&mut self.f, &mut self.f_prime);
                }
                2 => {
                    // DJNZ d
                    let d = self.imm8(bus) as i8;
                    self.set_b(self.b().wrapping_sub(1));
                    if self.b() != 0 {
                        self.tc += 5;
                        self.pc = self.pc.wrapping_add(d as u16);
                    }
                }
                3 => {
                    // JR d
                    let d = self.imm8(bus) as i8;
                    self.pc = self.pc.wrapping_add(d as u16);
                }
                _ => {
                    // JR cc,d
                    let d = self.imm8(bus) as i8;
                    if self.check_cc(y - 4) {
                        self.tc += 5;
                        self.pc = self.pc.wrapping_add(d as u16);
                    }
                }
            },
            1 => {
                if q == 0 {
                    // LD rp,nn
                    let nn = self.imm16(bus);
                    self.set_rp(p, nn, ix);
                } else {
                    // ADD HL,rp
                    let val = self.rp(p, ix);
                    self.add_word(ix, val);
                }
            }
            2 => match (q, p) {
                (0, 0) => bus.write(self.bc, self.a), // LD (BC),A
                (0, 1) => bus.write(self.de, self.a), // LD (DE),A
                (0, 2) => {
                    // LD (nn),HL
                    let addr = self.imm16(bus);
                    bus.write_word(addr, self.idx_word(ix));
                }
                (0, _) => {
                    // LD (nn),A
                    let addr = self.imm16(bus);
                    bus.write(addr, self.a);
                }
                (1, 0) => self.a = bus.read(self.bc), // LD A,(BC)
                (1, 1) => self.a = bus.read(self.de), // LD A,(DE)
                (1, 2) => {
                    // LD HL,(nn)
                    let addr = self.imm16(bus);
                    let val = bus.read_word(addr);
                    self.set_idx_word(ix, val);
                }
                _ => {
                    // LD A,(nn)
                    let addr = self.imm16(bus);
                    self.a = bus.read(addr);
                }
            },
            3 => {
                // INC/DEC rp
                let val = self.rp(p, ix);
                let val = if q == 0 {
                    val.wrapping_add(1)
                } else {
                    val.wrapping_sub(1)
                };
                self.set_rp(p, val, ix);
            }
            4 => {
                // INC r
                if y == 6 {
                    let addr = self.hl_addr(bus, ix);
                    let val = bus.read(addr).wrapping_add(1);
                    bus.write(addr, val);
                    self.flags_inc_byte(val);
                } else {
                    let val = self.reg8(y, ix).wrapping_add(1);
                    self.set_reg8(y, val, ix);
                    self.flags_inc_byte(val);
                }
            }
            5 => {
                // DEC r
                if y == 6 {
                    let addr = self.hl_addr(bus, ix);
                    let val = bus.read(addr).wrapping_sub(1);
                    bus.write(addr, val);
                    self.flags_dec_byte(val);
                } else {
                    let val = self.reg8(y, ix).wrapping_sub(1);
                    self.set_reg8(y, val, ix);
                    self.flags_dec_byte(val);
                }
            }
            6 => {
                // LD r,n — for (IX+d) the displacement precedes the
                // immediate byte
                if y == 6 {
                    let addr = self.hl_addr(bus, ix);
                    let n = self.imm8(bus);
                    bus.write(addr, n);
                } else {
                    let n = self.imm8(bus);
                    self.set_reg8(y, n, ix);
                }
            }
            _ => match y {
                0 => self.rlca(),
                1 => self.rrca(),
                2 => self.rla(),
                3 => self.rra(),
                4 => self.daa(),
                5 => {
                    // CPL
                    self.a = !self.a;
                    self.f |= flags::H | flags::N;
                }
                6 => {
                    // SCF
                    self.f = (self.f | flags::C) & !(flags::N | flags::H);
                }
                _ => {
                    // CCF
                    self.f = (self.f ^ flags::C) & !flags::N;
                }
            },
        }
    }

    fn execute_x3(&mut self, bus: &mut Bus, y: u8, z: u8, p: u8, q: u8, ix: Index) {
        match z {
            0 => {
                // RET cc
                if self.check_cc(y) {
                    self.pc = self.pop_word(bus);
                    self.tc += 6;
                }
            }
            1 => {
                if q == 0 {
                    // POP rp2
                    let val = self.pop_word(bus);
                    match p {
                        0 => self.bc = val,
                        1 => self.de = val,
                        2 => self.set_idx_word(ix, val),
                        _ => {
                            self.a = (val >> 8) as u8;
                            self.f = val as u8;
                        }
                    }
                } else {
                    match p {
                        0 => self.pc = self.pop_word(bus), // RET
                        1 => {
                            // EXX
                            std::mem::swap(&mut self.bc, &mut self.bc_prime);
                            std::mem::swap(&mut self.de, &mut self.de_prime);
                            std::mem::swap(&mut self.hl, &mut self.hl_prime);
                        }
                        2 => self.pc = self.idx_word(ix), // JP (HL)
                        _ => self.sp = self.idx_word(ix), // LD SP,HL
                    }
                }
            }
            2 => {
                // JP cc,nn
                if self.check_cc(y) {
                    self.pc = bus.fetch_word(self.pc);
                } else {
                    self.pc = self.pc.wrapping_add(2);
                }
            }
            3 => match y {
                0 => self.pc = bus.fetch_word(self.pc), // JP nn
                2 => {
                    // OUT (n),A
                    let n = self.imm8(bus);
                    let regs = self.regs();
                    bus.port_write(n, self.a, regs);
                }
                3 => {
                    // IN A,(n)
                    let n = self.imm8(bus);
                    let regs = self.regs();
                    self.a = bus.port_read(n, regs);
                }
                4 => {
                    // EX (SP),HL
                    let tmp = bus.read_word(self.sp);
                    bus.write_word(self.sp, self.idx_word(ix));
                    self.set_idx_word(ix, tmp);
                }
                5 => std::mem::swap(&mut self.de, &mut self.hl), // EX DE,HL
                6 => {
                    // DI
                    self.iff1 = false;
                    self.iff2 = false;
                }
                7 => {
                    // EI — interrupts stay held off for one instruction
                    self.iff1 = true;
                    self.iff2 = true;
                    self.ei_shadow = true;
                }
                _ => {} // y == 1 is the CB prefix, handled by the dispatcher
            },
            4 => {
                // CALL cc,nn
                if self.check_cc(y) {
                    let addr = self.imm16(bus);
                    self.push_word(bus, self.pc);
                    self.pc = addr;
                    self.tc += 7;
                } else {
                    self.pc = self.pc.wrapping_add(2);
                }
            }
            5 => {
                if q == 0 {
                    // PUSH rp2
                    let val = match p {
                        0 => self.bc,
                        1 => self.de,
                        2 => self.idx_word(ix),
                        _ => ((self.a as u16) << 8) | self.f as u16,
                    };
                    self.push_word(bus, val);
                } else {
                    // CALL nn (p == 0; 1..3 are the DD/ED/FD prefixes,
                    // handled by the dispatcher)
                    let addr = self.imm16(bus);
                    self.push_word(bus, self.pc);
                    self.pc = addr;
                }
            }
            6 => {
                // ALU A,n
                let n = self.imm8(bus);
                self.alu_op(y, n);
            }
            _ => {
                // RST y*8
                self.push_word(bus, self.pc);
                self.pc = (y as u16) * 8;
            }
        }
    }

    /// CB-prefixed bit, rotate and shift instructions.
    ///
    /// The indexed forms are peculiar: the operand ALWAYS comes from
    /// (IX+d) and the result is ALWAYS written back there, but it is
    /// ALSO written to a general-purpose register unless the register
    /// specifier is 6. BIT writes nothing back at all.
    fn execute_cb(&mut self, bus: &mut Bus, ix: Index) {
        if ix == Index::Hl {
            let opcode = bus.fetch(self.pc);
            self.pc = self.pc.wrapping_add(1);
            self.inc_r();

            let x = opcode >> 6;
            let y = (opcode >> 3) & 7;
            let z = opcode & 7;

            // (HL) operands cost 7 extra clocks, 4 for BIT which skips
            // the writeback
            if z == 6 {
                self.tc += if x == 1 { 8 } else { 11 };
            } else {
                self.tc += 4;
            }

            let val = if z == 6 {
                bus.read(self.hl)
            } else {
                self.reg8(z, Index::Hl)
            };

            let result = match x {
                0 => self.rot_op(y, val),
                1 => {
                    self.test_bit(val, y);
                    return;
                }
                2 => val & !(1 << y),
                _ => val | (1 << y),
            };

            if z == 6 {
                bus.write(self.hl, result);
            } else {
                self.set_reg8(z, result, Index::Hl);
            }
        } else {
            // DDCB/FDCB: displacement byte first, then the sub-opcode,
            // which is not an M1 cycle and does not bump R
            let d = bus.fetch(self.pc) as i8;
            self.pc = self.pc.wrapping_add(1);
            let addr = self.idx_word(ix).wrapping_add(d as u16);
            let opcode = bus.fetch(self.pc);
            self.pc = self.pc.wrapping_add(1);

            self.tc += if opcode & 0xc0 == 0x40 { 12 } else { 15 };

            let mut data = bus.read(addr);

            match opcode >> 6 {
                0 => data = self.rot_op((opcode >> 3) & 7, data),
                1 => {
                    self.test_bit(data, (opcode >> 3) & 7);
                    return; // No writeback
                }
                2 => data &= !(1 << ((opcode >> 3) & 7)),
                _ => data |= 1 << ((opcode >> 3) & 7),
            }

            if opcode & 7 != 6 {
                self.set_reg8(opcode & 7, data, Index::Hl);
            }
            bus.write(addr, data);
        }
    }

    /// ED-prefixed instructions. A DD/FD prefix in front of ED has no
    /// effect. Undefined entries are NOPs:
    ///
    /// ```text
    /// ED 00-3F = NOP
    /// ED 80-BF = NOP unless documented
    /// ED C0-FF = NOP
    /// ED 40-7F duplicates:
    ///   NEG   at 4C, 54, 5C, 64, 6C, 74, 7C
    ///   RETN  at 55, 65, 75
    ///   RETI  at 5D, 6D, 7D
    ///   IM 0  at 66, 4E, 6E
    ///   IM 1  at 76
    ///   IM 2  at 7E
    /// ```
    fn execute_ed(&mut self, bus: &mut Bus) {
        let opcode = bus.fetch(self.pc);
        self.pc = self.pc.wrapping_add(1);
        self.inc_r();
        self.tc += flags::CLK_ED[opcode as usize] as u64;

        match opcode {
            // ADC HL,rp
            0x4A => self.adc_word(self.bc),
            0x5A => self.adc_word(self.de),
            0x6A => self.adc_word(self.hl),
            0x7A => self.adc_word(self.sp),

            // SBC HL,rp
            0x42 => self.sbc_word(self.bc),
            0x52 => self.sbc_word(self.de),
            0x62 => self.sbc_word(self.hl),
            0x72 => self.sbc_word(self.sp),

            // LD (nn),rp
            0x43 => {
                let addr = self.imm16(bus);
                bus.write_word(addr, self.bc);
            }
            0x53 => {
                let addr = self.imm16(bus);
                bus.write_word(addr, self.de);
            }
            0x63 => {
                let addr = self.imm16(bus);
                bus.write_word(addr, self.hl);
            }
            0x73 => {
                let addr = self.imm16(bus);
                bus.write_word(addr, self.sp);
            }

            // LD rp,(nn)
            0x4B => {
                let addr = self.imm16(bus);
                self.bc = bus.read_word(addr);
            }
            0x5B => {
                let addr = self.imm16(bus);
                self.de = bus.read_word(addr);
            }
            0x6B => {
                let addr = self.imm16(bus);
                self.hl = bus.read_word(addr);
            }
            0x7B => {
                let addr = self.imm16(bus);
                self.sp = bus.read_word(addr);
            }

            // NEG and its duplicates
            0x44 | 0x4C | 0x54 | 0x5C | 0x64 | 0x6C | 0x74 | 0x7C => self.negate(),

            // RETN: restore IFF1 and unblock nested NMIs
            0x45 | 0x55 | 0x65 | 0x75 => {
                self.pc = self.pop_word(bus);
                self.iff1 = self.iff2;
                self.nmi_in_progress = false;
            }

            // RETI: the EOI is delivered at the next instruction
            // boundary, after the peripherals have had a chance to
            // snoop the opcode off the bus
            0x4D | 0x5D | 0x6D | 0x7D => {
                self.pc = self.pop_word(bus);
                self.iff1 = self.iff2;
                self.signal_eoi = true;
            }

            // IM 0/1/2
            0x46 | 0x66 | 0x4E | 0x6E => self.im = super::InterruptMode::Mode0,
            0x56 | 0x76 => self.im = super::InterruptMode::Mode1,
            0x5E | 0x7E => self.im = super::InterruptMode::Mode2,

            // IN r,(C)
            0x78 => self.a = self.in_with_flags(bus, self.c()),
            0x40 => {
                let val = self.in_with_flags(bus, self.c());
                self.set_b(val);
            }
            0x48 => {
                let val = self.in_with_flags(bus, self.c());
                self.set_c(val);
            }
            0x50 => {
                let val = self.in_with_flags(bus, self.c());
                self.set_d(val);
            }
            0x58 => {
                let val = self.in_with_flags(bus, self.c());
                self.set_e(val);
            }
            0x60 => {
                let val = self.in_with_flags(bus, self.c());
                self.set_h(val);
            }
            0x68 => {
                let val = self.in_with_flags(bus, self.c());
                self.set_l(val);
            }

            // OUT (C),r
            0x79 => {
                let regs = self.regs();
                bus.port_write(self.c(), self.a, regs);
            }
            0x41 => {
                let regs = self.regs();
                bus.port_write(self.c(), self.b(), regs);
            }
            0x49 => {
                let regs = self.regs();
                bus.port_write(self.c(), self.c(), regs);
            }
            0x51 => {
                let regs = self.regs();
                bus.port_write(self.c(), self.d(), regs);
            }
            0x59 => {
                let regs = self.regs();
                bus.port_write(self.c(), self.e(), regs);
            }
            0x61 => {
                let regs = self.regs();
                bus.port_write(self.c(), self.h(), regs);
            }
            0x69 => {
                let regs = self.regs();
                bus.port_write(self.c(), self.l(), regs);
            }
            0x71 => {
                // OUT (C),0 — undocumented; NMOS parts put zero on
                // the bus
                let regs = self.regs();
                bus.port_write(self.c(), 0, regs);
            }

            // LD A,I / LD I,A / LD A,R / LD R,A
            0x57 => self.ld_a_ir(self.i),
            0x47 => self.i = self.a,
            0x5F => self.ld_a_ir(self.r()),
            0x4F => {
                self.rf = self.a;
                self.rc = self.a;
            }

            // RRD/RLD
            0x67 => self.rrd(bus),
            0x6F => self.rld(bus),

            // Block loads
            0xA0 => self.ldid(bus, 1),
            0xA8 => self.ldid(bus, -1),
            0xB0 => self.ldidr(bus, 1),
            0xB8 => self.ldidr(bus, -1),

            // Block compares
            0xA1 => self.cpid(bus, 1),
            0xA9 => self.cpid(bus, -1),
            0xB1 => self.cpidr(bus, 1),
            0xB9 => self.cpidr(bus, -1),

            // Block input
            0xA2 => self.inid(bus, 1),
            0xAA => self.inid(bus, -1),
            0xB2 => self.inidr(bus, 1),
            0xBA => self.inidr(bus, -1),

            // Block output
            0xA3 => self.outid(bus, 1),
            0xAB => self.outid(bus, -1),
            0xB3 => self.outidr(bus, 1),
            0xBB => self.outidr(bus, -1),

            // Everything else behaves as NOP
            _ => {}
        }
    }
}
