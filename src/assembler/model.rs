use crate::spec::types::{
    hw::{self, Byte, Number},
    schema::OpCode,
};
use std::collections::HashMap;
use std::fmt::Display;

/*
    The architecture of the instruction representation:

        1.  `OpCode`s: the catalog rows in `crate::spec::defs::opcodes`. Each carries a mnemonic
            template such as `LD (IX+%),#`.

        2.  `InstructionDefinition`s: a compiled `OpCode`. The template is split into the bytes
            which always appear (`prefix`, `suffix`) and the ordered list of `OperandKind`s which
            are encoded between them.

        3.  `InstructionGroup`s: several definitions whose templates differ only by a literal
            number baked into the opcode (`RST 0x08`, `BIT 3,(HL)`, `IM 1`). The group is keyed
            by that literal, and when encoding, the literal operand selects the member and is
            then dropped from the operand list.

        4.  `Instruction`s: what the matcher hands back for a pattern, either of the above.

    Patterns are the templates with every immediate (placeholder or literal) replaced by `?`,
    e.g. `LD (IX+?),?` or `BIT ?,(HL)`.
*/

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    /// `@`
    Word,
    /// `#`
    Byte,
    /// `$`
    Relative,
    /// `%`
    Displacement,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateSlot {
    Operand(OperandKind),
    Literal(Number),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    ValueOutOfRange(OperandKind, Number),
    RelativeOutOfRange(Number),
    NoGroupMember(Number),
    OperandCount(usize, usize),
}

#[derive(Debug)]
pub struct InstructionDefinition {
    pub opcode: &'static OpCode,
    pub prefix: Vec<Byte>,
    pub suffix: Vec<Byte>,
    pub operands: Vec<OperandKind>,
}

#[derive(Debug)]
pub struct InstructionGroup {
    /// Position of the literal among all of the pattern's immediates.
    pub literal_index: usize,
    pub members: HashMap<Number, InstructionDefinition>,
}

#[derive(Debug)]
pub enum Instruction {
    Single(InstructionDefinition),
    Group(InstructionGroup),
}

/// The result of encoding. Encoding never fails outright: bad operands are replaced by
/// filler bytes so the instruction keeps the length that was reserved for it.
#[derive(Debug, Default)]
pub struct Encoded {
    pub bytes: Vec<Byte>,
    pub errors: Vec<Error>,
}

pub const FILLER: Byte = 0x00;

impl OperandKind {
    pub fn from_char(c: char) -> Option<Self> {
        match c {
            '@' => Some(OperandKind::Word),
            '#' => Some(OperandKind::Byte),
            '$' => Some(OperandKind::Relative),
            '%' => Some(OperandKind::Displacement),
            _ => None,
        }
    }

    pub fn width(self) -> usize {
        match self {
            OperandKind::Word => 2,
            _ => 1,
        }
    }

    fn encode(self, ip: Number, value: Number, out: &mut Encoded) {
        let narrowed = match self {
            OperandKind::Word => hw::word_from_number(value).map(|w| hw::word_to_bytes(w).to_vec()),
            OperandKind::Byte => hw::byte_from_number(value).map(|b| vec![b]),
            OperandKind::Displacement => hw::displacement_from_number(value).map(|b| vec![b]),
            OperandKind::Relative => {
                let offset = value - (ip + 2);
                match hw::displacement_from_number(offset) {
                    Some(b) => Some(vec![b]),
                    None => {
                        out.errors.push(Error::RelativeOutOfRange(offset));
                        out.bytes.push(FILLER);
                        return;
                    }
                }
            }
        };

        match narrowed {
            Some(bytes) => out.bytes.extend(bytes),
            None => {
                out.errors.push(Error::ValueOutOfRange(self, value));
                out.bytes
                    .extend(std::iter::repeat(FILLER).take(self.width()));
            }
        }
    }
}

impl Display for OperandKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperandKind::Word => write!(f, "16-bit value"),
            OperandKind::Byte => write!(f, "8-bit value"),
            OperandKind::Relative => write!(f, "relative jump target"),
            OperandKind::Displacement => write!(f, "index displacement"),
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::ValueOutOfRange(kind, value) => {
                write!(f, "Value {} is out of range for a {}", value, kind)
            }
            Error::RelativeOutOfRange(offset) => write!(
                f,
                "Relative jump target out of range (offset {}, must be -128..127)",
                offset
            ),
            Error::NoGroupMember(value) => {
                write!(f, "Value {} is not valid for this instruction", value)
            }
            Error::OperandCount(expected, given) => write!(
                f,
                "Expected {} operand values, but {} were supplied",
                expected, given
            ),
        }
    }
}

impl InstructionDefinition {
    pub fn new(opcode: &'static OpCode, operands: Vec<OperandKind>) -> Self {
        let (prefix, suffix) = opcode.bytes();
        InstructionDefinition {
            opcode,
            prefix,
            suffix,
            operands,
        }
    }

    pub fn len(&self) -> usize {
        self.prefix.len()
            + self.suffix.len()
            + self.operands.iter().map(|k| k.width()).sum::<usize>()
    }

    /// Walk the template emitting the literal bytes, then each operand value in order,
    /// then the suffix.
    pub fn encode(&self, ip: Number, values: &[Number]) -> Encoded {
        let mut out = Encoded::default();
        out.bytes.extend_from_slice(&self.prefix);

        if values.len() != self.operands.len() {
            out.errors
                .push(Error::OperandCount(self.operands.len(), values.len()));
            out.bytes.resize(self.len() - self.suffix.len(), FILLER);
        } else {
            for (kind, value) in self.operands.iter().zip(values) {
                kind.encode(ip, *value, &mut out);
            }
        }

        out.bytes.extend_from_slice(&self.suffix);
        out
    }
}

impl InstructionGroup {
    fn any_member(&self) -> &InstructionDefinition {
        self.members
            .values()
            .next()
            .expect("instruction groups are never empty")
    }
}

impl Instruction {
    pub fn len(&self) -> usize {
        match self {
            Instruction::Single(def) => def.len(),
            Instruction::Group(group) => group.any_member().len(),
        }
    }

    pub fn definition_for(&self, values: &[Number]) -> Result<&InstructionDefinition, Error> {
        match self {
            Instruction::Single(def) => Ok(def),
            Instruction::Group(group) => {
                let literal = *values
                    .get(group.literal_index)
                    .ok_or(Error::OperandCount(group.literal_index + 1, values.len()))?;
                group
                    .members
                    .get(&literal)
                    .ok_or(Error::NoGroupMember(literal))
            }
        }
    }

    pub fn encode(&self, ip: Number, values: &[Number]) -> Encoded {
        match self {
            Instruction::Single(def) => def.encode(ip, values),
            Instruction::Group(group) => match self.definition_for(values) {
                Ok(def) => {
                    let mut rest = values.to_vec();
                    rest.remove(group.literal_index);
                    def.encode(ip, &rest)
                }
                Err(err) => Encoded {
                    bytes: vec![FILLER; self.len()],
                    errors: vec![err],
                },
            },
        }
    }
}
