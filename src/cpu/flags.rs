//! Z80 flag bits and flag/cycle lookup tables.
//!
//! Flag layout in the F register:
//!
//! ```text
//!   7   6   5   4   3   2   1   0
//!   S   Z   -   H   -  P/V  N   C
//! ```
//!
//! Bits 3 and 5 are not modeled. Arithmetic flag computation is table
//! driven: sign, carry and overflow depend only on bit 7 of the two
//! operands and the result (bit 15 for word operations), half-carry only
//! on bit 3 (bit 11). The three bits are packed into an index and looked
//! up below.
//!
//! # References
//! - Zilog Z80 CPU User Manual (UM0080)

/// Carry flag (bit 0)
pub const C: u8 = 0x01;
/// Add/subtract flag (bit 1)
pub const N: u8 = 0x02;
/// Parity/overflow flag (bit 2)
pub const PV: u8 = 0x04;
/// Half-carry flag (bit 4)
pub const H: u8 = 0x10;
/// Zero flag (bit 6)
pub const Z: u8 = 0x40;
/// Sign flag (bit 7)
pub const S: u8 = 0x80;

/// Every modeled flag bit.
pub const ALL: u8 = C | N | PV | H | Z | S;

/// Sign/carry/overflow contribution for additions, indexed by
/// `(a.7 << 2) | (b.7 << 1) | result.7`.
pub const SIGN_CARRY_OVERFLOW: [u8; 8] = [
    0,
    PV | S,
    C,
    S,
    C,
    S,
    C | PV,
    C | S,
];

/// Half-carry contribution for additions, indexed by
/// `(a.3 << 2) | (b.3 << 1) | result.3`.
pub const HALF_CARRY: [u8; 8] = [0, 0, H, 0, H, 0, H, H];

/// Sign/carry/overflow contribution for subtractions.
pub const SUB_SIGN_CARRY_OVERFLOW: [u8; 8] = [
    0,
    C | S,
    C,
    PV | C | S,
    PV,
    S,
    0,
    C | S,
];

/// Half-carry (borrow) contribution for subtractions.
pub const SUB_HALF_CARRY: [u8; 8] = [0, H, H, H, 0, 0, 0, H];

/// Parity of every byte value; 1 = even parity.
#[rustfmt::skip]
pub const PARITY: [u8; 256] = [
    1, 0, 0, 1, 0, 1, 1, 0, 0, 1, 1, 0, 1, 0, 0, 1,
    0, 1, 1, 0, 1, 0, 0, 1, 1, 0, 0, 1, 0, 1, 1, 0,
    0, 1, 1, 0, 1, 0, 0, 1, 1, 0, 0, 1, 0, 1, 1, 0,
    1, 0, 0, 1, 0, 1, 1, 0, 0, 1, 1, 0, 1, 0, 0, 1,
    0, 1, 1, 0, 1, 0, 0, 1, 1, 0, 0, 1, 0, 1, 1, 0,
    1, 0, 0, 1, 0, 1, 1, 0, 0, 1, 1, 0, 1, 0, 0, 1,
    1, 0, 0, 1, 0, 1, 1, 0, 0, 1, 1, 0, 1, 0, 0, 1,
    0, 1, 1, 0, 1, 0, 0, 1, 1, 0, 0, 1, 0, 1, 1, 0,
    0, 1, 1, 0, 1, 0, 0, 1, 1, 0, 0, 1, 0, 1, 1, 0,
    1, 0, 0, 1, 0, 1, 1, 0, 0, 1, 1, 0, 1, 0, 0, 1,
    1, 0, 0, 1, 0, 1, 1, 0, 0, 1, 1, 0, 1, 0, 0, 1,
    0, 1, 1, 0, 1, 0, 0, 1, 1, 0, 0, 1, 0, 1, 1, 0,
    1, 0, 0, 1, 0, 1, 1, 0, 0, 1, 1, 0, 1, 0, 0, 1,
    0, 1, 1, 0, 1, 0, 0, 1, 1, 0, 0, 1, 0, 1, 1, 0,
    0, 1, 1, 0, 1, 0, 0, 1, 1, 0, 0, 1, 0, 1, 1, 0,
    1, 0, 0, 1, 0, 1, 1, 0, 0, 1, 1, 0, 1, 0, 0, 1,
];

/// T-states for the main opcode group.
///
/// This is the base clock count; in particular conditional JR, CALL,
/// DJNZ and RET are costed as not taken, block instructions as not
/// repeated, and HALT as a single pass. Prefix opcodes (CB, DD, ED, FD)
/// cost 4 cycles for the prefix byte itself.
#[rustfmt::skip]
pub const CLK_MAIN: [u8; 256] = [
    /*         0   1   2   3   4   5   6   7   8   9   a   b   c   d   e   f */
    /* 00 */   4, 10,  7,  6,  4,  4,  7,  4,  4, 11,  7,  6,  4,  4,  7,  4,
    /* 10 */   8, 10,  7,  6,  4,  4,  7,  4, 12, 11,  7,  6,  4,  4,  7,  4,
    /* 20 */   7, 10, 16,  6,  4,  4,  7,  4,  7, 11, 16,  6,  4,  4,  7,  4,
    /* 30 */   7, 10, 13,  6, 11, 11, 10,  4,  7, 11, 13,  6,  4,  4,  7,  4,
    /* 40 */   4,  4,  4,  4,  4,  4,  7,  4,  4,  4,  4,  4,  4,  4,  7,  4,
    /* 50 */   4,  4,  4,  4,  4,  4,  7,  4,  4,  4,  4,  4,  4,  4,  7,  4,
    /* 60 */   4,  4,  4,  4,  4,  4,  7,  4,  4,  4,  4,  4,  4,  4,  7,  4,
    /* 70 */   7,  7,  7,  7,  7,  7,  4,  7,  4,  4,  4,  4,  4,  4,  7,  4,
    /* 80 */   4,  4,  4,  4,  4,  4,  7,  4,  4,  4,  4,  4,  4,  4,  7,  4,
    /* 90 */   4,  4,  4,  4,  4,  4,  7,  4,  4,  4,  4,  4,  4,  4,  7,  4,
    /* a0 */   4,  4,  4,  4,  4,  4,  7,  4,  4,  4,  4,  4,  4,  4,  7,  4,
    /* b0 */   4,  4,  4,  4,  4,  4,  7,  4,  4,  4,  4,  4,  4,  4,  7,  4,
    /* c0 */   5, 10, 10, 10, 10, 11,  7, 11,  5, 10, 10,  4, 10, 17,  7, 11,
    /* d0 */   5, 10, 10, 11, 10, 11,  7, 11,  5,  4, 10, 11, 10,  4,  7, 11,
    /* e0 */   5, 10, 10, 19, 10, 11,  7, 11,  5,  4, 10,  4, 10,  4,  7, 11,
    /* f0 */   5, 10, 10,  4, 10, 11,  7, 11,  5,  6, 10,  4, 10,  4,  7, 11,
];

/// T-states for the ED opcode group, not counting the 4 cycles of the ED
/// prefix itself. Undefined entries behave as 4-cycle NOPs.
#[rustfmt::skip]
pub const CLK_ED: [u8; 256] = [
    /*         0   1   2   3   4   5   6   7   8   9   a   b   c   d   e   f */
    /* 00 */   4,  4,  4,  4,  4,  4,  4,  4,  4,  4,  4,  4,  4,  4,  4,  4,
    /* 10 */   4,  4,  4,  4,  4,  4,  4,  4,  4,  4,  4,  4,  4,  4,  4,  4,
    /* 20 */   4,  4,  4,  4,  4,  4,  4,  4,  4,  4,  4,  4,  4,  4,  4,  4,
    /* 30 */   4,  4,  4,  4,  4,  4,  4,  4,  4,  4,  4,  4,  4,  4,  4,  4,
    /* 40 */   8,  8, 11, 16,  4, 10,  4,  5,  8,  8, 11, 16,  4, 10,  4,  5,
    /* 50 */   8,  8, 11, 16,  4, 10,  4,  5,  8,  8, 11, 16,  4, 10,  4,  5,
    /* 60 */   8,  8, 11, 16,  4, 10,  4, 14,  8,  8, 11, 16,  4, 10,  4, 14,
    /* 70 */   8,  8, 11, 16,  4, 10,  4,  4,  8,  8, 11, 16,  4, 10,  4,  4,
    /* 80 */   4,  4,  4,  4,  4,  4,  4,  4,  4,  4,  4,  4,  4,  4,  4,  4,
    /* 90 */   4,  4,  4,  4,  4,  4,  4,  4,  4,  4,  4,  4,  4,  4,  4,  4,
    /* a0 */  12, 12, 12, 12,  4,  4,  4,  4, 12, 12, 12, 12,  4,  4,  4,  4,
    /* b0 */  12, 12, 12, 12,  4,  4,  4,  4, 12, 12, 12, 12,  4,  4,  4,  4,
    /* c0 */   4,  4,  4,  4,  4,  4,  4,  4,  4,  4,  4,  4,  4,  4,  4,  4,
    /* d0 */   4,  4,  4,  4,  4,  4,  4,  4,  4,  4,  4,  4,  4,  4,  4,  4,
    /* e0 */   4,  4,  4,  4,  4,  4,  4,  4,  4,  4,  4,  4,  4,  4,  4,  4,
    /* f0 */   4,  4,  4,  4,  4,  4,  4,  4,  4,  4,  4,  4,  4,  4,  4,  4,
];

/// Parity of a byte; true when the number of set bits is even.
#[inline]
pub fn parity(value: u8) -> bool {
    PARITY[value as usize] != 0
}
