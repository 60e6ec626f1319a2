use super::model::{
    Instruction, InstructionDefinition, InstructionGroup, OperandKind, TemplateSlot,
};
use crate::spec::{
    catalog::Catalog,
    types::{hw::Number, schema::OpFlags},
};
use once_cell::sync::Lazy;
use std::collections::{hash_map::Entry, HashMap, HashSet};

static STORAGE: Lazy<Lang> = Lazy::new(Lang::new);

/// Mnemonics which may appear as the leading word of an operand, e.g. `LD B,RES 3,(IX+1)`.
pub const SUB_OPS: [&str; 10] = [
    "RES", "SET", "RL", "RLC", "RR", "RRC", "SLA", "SLL", "SRA", "SRL",
];

pub const IMMEDIATE: &str = "?";

/// The compiled instruction set: catalog templates indexed by their normalised pattern.
pub struct Lang {
    instructions: HashMap<String, Instruction>,
    mnemonics: HashSet<String>,
}

impl Lang {
    pub fn sanitize_name(name: &str) -> String {
        name.trim().to_uppercase()
    }

    fn new() -> Self {
        let mut builder = Builder::new();
        for op in Catalog::get().iter() {
            builder.register(op);
        }
        builder.build()
    }

    pub fn get() -> &'static Lang {
        Lazy::force(&STORAGE)
    }

    pub fn lookup(&self, pattern: &str) -> Option<&Instruction> {
        self.instructions.get(pattern)
    }

    pub fn is_mnemonic(&self, name: &str) -> bool {
        self.mnemonics.contains(&Self::sanitize_name(name))
    }

    pub fn is_sub_op(name: &str) -> bool {
        let name = Self::sanitize_name(name);
        SUB_OPS.iter().any(|op| *op == name)
    }

    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.instructions.keys().map(String::as_str)
    }
}

/// Split a template into its pattern (immediates replaced by `?`) and the ordered immediates.
pub fn compile_template(template: &str) -> (String, Vec<TemplateSlot>) {
    let mut pattern = String::new();
    let mut slots = Vec::new();
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        if let Some(kind) = OperandKind::from_char(c) {
            pattern.push_str(IMMEDIATE);
            slots.push(TemplateSlot::Operand(kind));
        } else if c.is_ascii_digit()
            && !pattern
                .chars()
                .last()
                .map_or(false, |prev| prev.is_ascii_alphanumeric())
        {
            let mut literal = c.to_string();
            while let Some(&next) = chars.peek() {
                if !next.is_ascii_alphanumeric() {
                    break;
                }
                literal.push(next);
                chars.next();
            }
            pattern.push_str(IMMEDIATE);
            slots.push(TemplateSlot::Literal(parse_literal(&literal)));
        } else {
            pattern.push(c.to_ascii_uppercase());
        }
    }

    (pattern, slots)
}

fn parse_literal(literal: &str) -> Number {
    let lower = literal.to_lowercase();
    let parsed = if let Some(hex) = lower.strip_prefix("0x") {
        Number::from_str_radix(hex, 16)
    } else {
        lower.parse()
    };
    parsed.unwrap_or_else(|_| panic!("malformed literal in opcode template: {}", literal))
}

struct Builder {
    lang: Lang,
}

impl Builder {
    fn new() -> Self {
        Builder {
            lang: Lang {
                instructions: HashMap::new(),
                mnemonics: HashSet::new(),
            },
        }
    }

    fn build(self) -> Lang {
        self.lang
    }

    fn register(&mut self, op: &'static crate::spec::types::schema::OpCode) {
        let (pattern, slots) = compile_template(&op.mnemonic);

        self.register_pattern(pattern.clone(), op, &slots);

        if op.flags.contains(OpFlags::IMPLICIT_A) {
            if let Some((name, operands)) = pattern.split_once(' ') {
                let alias = format!("{} A,{}", name, operands);
                if !self.lang.instructions.contains_key(&alias) {
                    self.register_pattern(alias, op, &slots);
                }
            }
        }
    }

    fn register_pattern(
        &mut self,
        pattern: String,
        op: &'static crate::spec::types::schema::OpCode,
        slots: &[TemplateSlot],
    ) {
        let name = pattern.split(' ').next().unwrap_or(&pattern).to_owned();
        self.lang.mnemonics.insert(name);

        let operands = slots
            .iter()
            .filter_map(|slot| match slot {
                TemplateSlot::Operand(kind) => Some(*kind),
                TemplateSlot::Literal(_) => None,
            })
            .collect();
        let def = InstructionDefinition::new(op, operands);

        let literal = slots.iter().enumerate().find_map(|(idx, slot)| match slot {
            TemplateSlot::Literal(value) => Some((idx, *value)),
            TemplateSlot::Operand(_) => None,
        });

        match (literal, self.lang.instructions.entry(pattern)) {
            (None, Entry::Vacant(v)) => {
                v.insert(Instruction::Single(def));
            }
            (Some((literal_index, value)), Entry::Vacant(v)) => {
                let mut members = HashMap::new();
                members.insert(value, def);
                v.insert(Instruction::Group(InstructionGroup {
                    literal_index,
                    members,
                }));
            }
            (Some((literal_index, value)), Entry::Occupied(mut o)) => match o.get_mut() {
                Instruction::Group(group) => {
                    assert_eq!(group.literal_index, literal_index);
                    assert_eq!(group.members.values().next().map(|m| m.len()), Some(def.len()));
                    assert!(group.members.insert(value, def).is_none());
                }
                Instruction::Single(_) => panic!("pattern registered twice: {}", o.key()),
            },
            (None, Entry::Occupied(o)) => panic!("pattern registered twice: {}", o.key()),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn templates_compile_to_patterns() {
        let (pattern, slots) = compile_template("LD (IX+%),#");
        assert_eq!(pattern, "LD (IX+?),?");
        assert_eq!(
            slots,
            vec![
                TemplateSlot::Operand(OperandKind::Displacement),
                TemplateSlot::Operand(OperandKind::Byte)
            ]
        );

        let (pattern, slots) = compile_template("RST 0x38");
        assert_eq!(pattern, "RST ?");
        assert_eq!(slots, vec![TemplateSlot::Literal(0x38)]);

        let (pattern, _) = compile_template("EX AF,AF'");
        assert_eq!(pattern, "EX AF,AF'");
    }

    #[test]
    fn registers_are_not_literals() {
        let (pattern, slots) = compile_template("LD IXH,#");
        assert_eq!(pattern, "LD IXH,?");
        assert_eq!(slots.len(), 1);
    }

    #[test]
    fn lookup_and_lengths() {
        let lang = Lang::get();
        assert_eq!(lang.lookup("NOP").map(Instruction::len), Some(1));
        assert_eq!(lang.lookup("LD HL,?").map(Instruction::len), Some(3));
        assert_eq!(lang.lookup("LD (IX+?),?").map(Instruction::len), Some(4));
        assert_eq!(lang.lookup("BIT ?,(IY+?)").map(Instruction::len), Some(4));
        assert!(lang.lookup("LD HL,IX+?").is_none());
    }

    #[test]
    fn implicit_accumulator_aliases() {
        let lang = Lang::get();
        let short = lang.lookup("SUB B").unwrap().encode(0, &[]).bytes;
        let long = lang.lookup("SUB A,B").unwrap().encode(0, &[]).bytes;
        assert_eq!(short, vec![0x90]);
        assert_eq!(short, long);
    }

    #[test]
    fn groups_cover_literal_opcodes() {
        let lang = Lang::get();
        let rst = lang.lookup("RST ?").unwrap();
        assert_eq!(rst.encode(0, &[0x38]).bytes, vec![0xFF]);
        let bit = lang.lookup("BIT ?,(IX+?)").unwrap();
        assert_eq!(bit.encode(0, &[7, 3]).bytes, vec![0xDD, 0xCB, 0x03, 0x7E]);
        let res = lang.lookup("LD B,RES ?,(IX+?)").unwrap();
        assert_eq!(res.encode(0, &[0, 1]).bytes, vec![0xDD, 0xCB, 0x01, 0x80]);
    }

    #[test]
    fn mnemonics() {
        assert!(Lang::get().is_mnemonic("ld"));
        assert!(Lang::get().is_mnemonic("djnz"));
        assert!(!Lang::get().is_mnemonic("db"));
        assert!(Lang::is_sub_op("res"));
    }
}
