use crate::common;
use derive_more::Display;
use num_derive::FromPrimitive;
use static_assertions::const_assert;
use std::convert::TryFrom;
use strum::IntoEnumIterator;
use strum_macros::EnumIter;

pub type Byte = u8;
pub type Word = u16;

/// The assembler does all arithmetic at this width and narrows on emission.
pub type Number = i64;

pub const BYTE_WIDTH: usize = 8;
pub const WORD_WIDTH: usize = 16;
pub const WORD_MAX: Word = 0xFFFF;
pub const ADDR_SPACE: usize = WORD_MAX as usize + 1;

const_assert!(ADDR_SPACE == 1 << WORD_WIDTH);

pub fn word_to_bytes(w: Word) -> [Byte; 2] {
    w.to_le_bytes()
}

/// Narrow to a byte, accepting both the signed and the unsigned readings.
pub fn byte_from_number(n: Number) -> Option<Byte> {
    if (-128..=255).contains(&n) {
        Some(n as Byte)
    } else {
        None
    }
}

/// Narrow to a word, accepting both the signed and the unsigned readings.
pub fn word_from_number(n: Number) -> Option<Word> {
    if (-32768..=0xFFFF).contains(&n) {
        Some(n as Word)
    } else {
        None
    }
}

pub fn displacement_from_number(n: Number) -> Option<Byte> {
    i8::try_from(n).ok().map(|d| d as Byte)
}

/*
    Registers and condition flags share one namespace in the operand grammar (`C` is both
    the register and the carry condition), so they share one enum here. The matcher only
    ever sees the rendered name, which is why we never need to tell the two apart.
*/
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, EnumIter)]
pub enum Register {
    A,
    B,
    C,
    D,
    E,
    H,
    L,
    I,
    R,
    AF,
    #[display(fmt = "AF'")]
    AFPrime,
    BC,
    DE,
    HL,
    SP,
    IX,
    IY,
    IXH,
    IXL,
    IYH,
    IYL,

    NZ,
    Z,
    NC,
    PO,
    PE,
    P,
    M,
}

impl Register {
    pub fn lookup(name: &str) -> Option<Register> {
        Register::iter().find(|reg| common::eq_ignore_case(name, &reg.to_string()))
    }

    pub fn is_index(self) -> bool {
        matches!(self, Register::IX | Register::IY)
    }

    pub fn is_condition(self) -> bool {
        matches!(
            self,
            Register::NZ
                | Register::Z
                | Register::NC
                | Register::PO
                | Register::PE
                | Register::P
                | Register::M
        )
    }
}

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, FromPrimitive)]
pub enum Radix {
    #[display(fmt = "binary")]
    Binary = 2,
    #[display(fmt = "octal")]
    Octal = 8,
    #[display(fmt = "decimal")]
    Decimal = 10,
    #[display(fmt = "hexadecimal")]
    Hex = 16,
}

impl Radix {
    pub fn base(self) -> u32 {
        self as u32
    }
}

impl Default for Radix {
    fn default() -> Radix {
        Radix::Decimal
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn register_lookup_ignores_case() {
        assert_eq!(Register::lookup("hl"), Some(Register::HL));
        assert_eq!(Register::lookup("af'"), Some(Register::AFPrime));
        assert_eq!(Register::lookup("Ixh"), Some(Register::IXH));
        assert_eq!(Register::lookup("hlx"), None);
    }

    #[test]
    fn narrowing_accepts_signed_and_unsigned() {
        assert_eq!(byte_from_number(-1), Some(0xFF));
        assert_eq!(byte_from_number(255), Some(0xFF));
        assert_eq!(byte_from_number(256), None);
        assert_eq!(word_from_number(-2), Some(0xFFFE));
        assert_eq!(word_from_number(0x10000), None);
        assert_eq!(displacement_from_number(128), None);
        assert_eq!(displacement_from_number(-128), Some(0x80));
    }
}
