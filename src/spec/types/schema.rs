use super::hw::Byte;
use bitflags::bitflags;
use derive_more::Constructor;
use enum_map::Enum;
use std::fmt::Display;
use strum_macros::EnumIter;

/*
    The catalog is a flat list of `OpCode` rows, one per opcode byte (or byte sequence).
    Each row carries a mnemonic *template*, in which the characters

        `@`   a 16-bit little-endian operand (nn)
        `#`   an 8-bit immediate operand (n)
        `$`   an 8-bit relative jump offset (e), measured from the instruction start + 2
        `%`   an 8-bit signed index displacement (d)

    stand in for the operand bytes, in the order they are emitted. Literal numbers inside a
    template (`RST 0x08`, `BIT 3,B`, `IM 1`) are part of the opcode itself; the matcher
    routes them into instruction groups rather than treating them as operand bytes.
*/

bitflags! {
    pub struct OpFlags: u16 {
        /// Execution may fall through to the next instruction.
        const CONTINUES  = 1 << 0;
        const JUMPS      = 1 << 1;
        const RETURNS    = 1 << 2;
        const RESTARTS   = 1 << 3;
        /// One of the operands is a memory address.
        const REF_ADDR   = 1 << 4;
        const PORT_REF   = 1 << 5;
        /// The accumulator is an implied first operand (`SUB B` == `SUB A,B`).
        const IMPLICIT_A = 1 << 6;
        const UNDOCUMENTED = 1 << 7;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Enum, EnumIter)]
pub enum PrefixGroup {
    Base,
    Cb,
    Dd,
    Ed,
    Fd,
    DdCb,
    FdCb,
}

impl PrefixGroup {
    pub fn prefix(self) -> &'static [Byte] {
        match self {
            PrefixGroup::Base => &[],
            PrefixGroup::Cb => &[0xCB],
            PrefixGroup::Dd => &[0xDD],
            PrefixGroup::Ed => &[0xED],
            PrefixGroup::Fd => &[0xFD],
            PrefixGroup::DdCb => &[0xDD, 0xCB],
            PrefixGroup::FdCb => &[0xFD, 0xCB],
        }
    }

    /// In the doubly-prefixed groups the displacement sits between the prefix
    /// and the opcode byte, so the opcode is emitted as a suffix.
    pub fn opcode_is_suffix(self) -> bool {
        matches!(self, PrefixGroup::DdCb | PrefixGroup::FdCb)
    }
}

impl Display for PrefixGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.prefix() {
            [] => write!(f, "--"),
            bytes => {
                for b in bytes {
                    write!(f, "{:02X}", b)?;
                }
                Ok(())
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Constructor)]
pub struct Cycles {
    pub taken: u8,
    /// Only present for conditional instructions, where it is the not-taken count.
    pub not_taken: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpCode {
    pub group: PrefixGroup,
    pub opcode: Byte,
    pub mnemonic: String,
    pub cycles: Cycles,
    pub flags: OpFlags,
}

impl OpCode {
    pub fn bytes(&self) -> (Vec<Byte>, Vec<Byte>) {
        let mut prefix = self.group.prefix().to_vec();
        if self.group.opcode_is_suffix() {
            (prefix, vec![self.opcode])
        } else {
            prefix.push(self.opcode);
            (prefix, vec![])
        }
    }
}

impl Display for OpCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {:02X}: {}", self.group, self.opcode, self.mnemonic)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn doubly_prefixed_opcode_is_a_suffix() {
        let op = OpCode {
            group: PrefixGroup::DdCb,
            opcode: 0x06,
            mnemonic: "RLC (IX+%)".to_owned(),
            cycles: Cycles::new(23, None),
            flags: OpFlags::CONTINUES,
        };
        assert_eq!(op.bytes(), (vec![0xDD, 0xCB], vec![0x06]));
    }

    #[test]
    fn prefix_display() {
        assert_eq!(PrefixGroup::Base.to_string(), "--");
        assert_eq!(PrefixGroup::FdCb.to_string(), "FDCB");
    }
}
