//! Single-character variant alphabet used by ABV call bodies.
//!
//! `.` is the default variant 0, `B`..`/` of the base64 ordering carry
//! variants 1..=63 and `-`/`#` mark positions without a call. `A` sits at
//! index 0 of the ordering and is not a valid variant symbol.

use crate::error::{Result, TileError};

pub const SYMBOLS: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

pub const DEFAULT_SYMBOL: u8 = b'.';
pub const NO_CALL_SYMBOL: u8 = b'-';
pub const UNKNOWN_SYMBOL: u8 = b'#';

pub const MAX_VARIANT: u8 = 63;

const INVALID: u8 = 0xFF;
const NO_CALL: u8 = 0xFE;

/// Byte → variant lookup, built at compile time.
const DECODE_TABLE: [u8; 256] = {
    let mut table = [INVALID; 256];
    let mut i = 1;
    while i < SYMBOLS.len() {
        table[SYMBOLS[i] as usize] = i as u8;
        i += 1;
    }
    table[DEFAULT_SYMBOL as usize] = 0;
    table[NO_CALL_SYMBOL as usize] = NO_CALL;
    table[UNKNOWN_SYMBOL as usize] = NO_CALL;
    table
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Symbol {
    Variant(u8),
    NoCall,
}

/// Decode one body byte. `None` means the byte is outside the alphabet.
#[inline]
pub fn decode(byte: u8) -> Option<Symbol> {
    match DECODE_TABLE[byte as usize] {
        INVALID => None,
        NO_CALL => Some(Symbol::NoCall),
        v => Some(Symbol::Variant(v)),
    }
}

pub fn encode(variant: u32) -> Result<u8> {
    match variant {
        0 => Ok(DEFAULT_SYMBOL),
        v if v <= MAX_VARIANT as u32 => Ok(SYMBOLS[v as usize]),
        v => Err(TileError::VariantOutOfRange(v)),
    }
}
