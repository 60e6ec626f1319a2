use crate::spec::{
    catalog::Builder,
    types::{
        hw::Byte,
        schema::{Cycles, OpCode, OpFlags, PrefixGroup},
    },
};

// Operand tables in the order of the 3-bit register/condition fields of the opcode byte.
const REG8: [&str; 8] = ["B", "C", "D", "E", "H", "L", "(HL)", "A"];
const REG16_SP: [&str; 4] = ["BC", "DE", "HL", "SP"];
const REG16_AF: [&str; 4] = ["BC", "DE", "HL", "AF"];
const COND: [&str; 8] = ["NZ", "Z", "NC", "C", "PO", "PE", "P", "M"];
const ALU: [&str; 8] = [
    "ADD A,", "ADC A,", "SUB ", "SBC A,", "AND ", "XOR ", "OR ", "CP ",
];
const ROT: [&str; 8] = ["RLC", "RRC", "RL", "RR", "SLA", "SRA", "SLL", "SRL"];

const HL_DEREF: usize = 6;

fn infer_flags(mnemonic: &str) -> OpFlags {
    let mut parts = mnemonic.splitn(2, ' ');
    let name = parts.next().unwrap_or("");
    let operands = parts.next().unwrap_or("");
    let conditional = operands
        .split(',')
        .next()
        .map_or(false, |first| COND.contains(&first) && name != "LD");

    let mut flags = match name {
        "JP" | "JR" => {
            if conditional {
                OpFlags::JUMPS | OpFlags::CONTINUES
            } else {
                OpFlags::JUMPS
            }
        }
        "DJNZ" | "CALL" => OpFlags::JUMPS | OpFlags::CONTINUES,
        "RET" | "RETI" | "RETN" => {
            if conditional {
                OpFlags::RETURNS | OpFlags::CONTINUES
            } else {
                OpFlags::RETURNS
            }
        }
        "RST" => OpFlags::RESTARTS | OpFlags::CONTINUES,
        "HALT" => OpFlags::empty(),
        _ => OpFlags::CONTINUES,
    };

    if operands.contains('@') {
        flags |= OpFlags::REF_ADDR;
    }

    if matches!(
        name,
        "IN" | "OUT" | "INI" | "INIR" | "IND" | "INDR" | "OUTI" | "OTIR" | "OUTD" | "OTDR"
    ) {
        flags |= OpFlags::PORT_REF;
    }

    if matches!(name, "SUB" | "AND" | "XOR" | "OR" | "CP") && !operands.contains(',') {
        flags |= OpFlags::IMPLICIT_A;
    }

    flags
}

fn reg(builder: &mut Builder, group: PrefixGroup, opcode: Byte, mnemonic: &str, cycles: u8) {
    reg_cond(builder, group, opcode, mnemonic, cycles, None)
}

fn reg_cond(
    builder: &mut Builder,
    group: PrefixGroup,
    opcode: Byte,
    mnemonic: &str,
    taken: u8,
    not_taken: Option<u8>,
) {
    builder.register(OpCode {
        group,
        opcode,
        mnemonic: mnemonic.to_owned(),
        cycles: Cycles::new(taken, not_taken),
        flags: infer_flags(mnemonic),
    });
}

fn reg_undocumented(
    builder: &mut Builder,
    group: PrefixGroup,
    opcode: Byte,
    mnemonic: &str,
    cycles: u8,
) {
    builder.register(OpCode {
        group,
        opcode,
        mnemonic: mnemonic.to_owned(),
        cycles: Cycles::new(cycles, None),
        flags: infer_flags(mnemonic) | OpFlags::UNDOCUMENTED,
    });
}

fn gen_base_misc(builder: &mut Builder) {
    use PrefixGroup::Base;

    reg(builder, Base, 0x00, "NOP", 4);
    reg(builder, Base, 0x02, "LD (BC),A", 7);
    reg(builder, Base, 0x07, "RLCA", 4);
    reg(builder, Base, 0x08, "EX AF,AF'", 4);
    reg(builder, Base, 0x0A, "LD A,(BC)", 7);
    reg(builder, Base, 0x0F, "RRCA", 4);
    reg_cond(builder, Base, 0x10, "DJNZ $", 13, Some(8));
    reg(builder, Base, 0x12, "LD (DE),A", 7);
    reg(builder, Base, 0x17, "RLA", 4);
    reg(builder, Base, 0x18, "JR $", 12);
    reg(builder, Base, 0x1A, "LD A,(DE)", 7);
    reg(builder, Base, 0x1F, "RRA", 4);
    reg(builder, Base, 0x22, "LD (@),HL", 16);
    reg(builder, Base, 0x27, "DAA", 4);
    reg(builder, Base, 0x2A, "LD HL,(@)", 16);
    reg(builder, Base, 0x2F, "CPL", 4);
    reg(builder, Base, 0x32, "LD (@),A", 13);
    reg(builder, Base, 0x37, "SCF", 4);
    reg(builder, Base, 0x3A, "LD A,(@)", 13);
    reg(builder, Base, 0x3F, "CCF", 4);
    reg(builder, Base, 0x76, "HALT", 4);
    reg(builder, Base, 0xC3, "JP @", 10);
    reg(builder, Base, 0xC9, "RET", 10);
    reg(builder, Base, 0xCD, "CALL @", 17);
    reg(builder, Base, 0xD3, "OUT (#),A", 11);
    reg(builder, Base, 0xD9, "EXX", 4);
    reg(builder, Base, 0xDB, "IN A,(#)", 11);
    reg(builder, Base, 0xE3, "EX (SP),HL", 19);
    reg(builder, Base, 0xE9, "JP (HL)", 4);
    reg(builder, Base, 0xEB, "EX DE,HL", 4);
    reg(builder, Base, 0xF3, "DI", 4);
    reg(builder, Base, 0xF9, "LD SP,HL", 6);
    reg(builder, Base, 0xFB, "EI", 4);
}

fn gen_base_regular(builder: &mut Builder) {
    use PrefixGroup::Base;

    for (p, rp) in REG16_SP.iter().enumerate() {
        let p = (p as Byte) << 4;
        reg(builder, Base, p | 0x01, &format!("LD {},@", rp), 10);
        reg(builder, Base, p | 0x03, &format!("INC {}", rp), 6);
        reg(builder, Base, p | 0x09, &format!("ADD HL,{}", rp), 11);
        reg(builder, Base, p | 0x0B, &format!("DEC {}", rp), 6);
    }

    for (p, rp) in REG16_AF.iter().enumerate() {
        let p = (p as Byte) << 4;
        reg(builder, Base, 0xC1 | p, &format!("POP {}", rp), 10);
        reg(builder, Base, 0xC5 | p, &format!("PUSH {}", rp), 11);
    }

    for (y, r) in REG8.iter().enumerate() {
        let mem = y == HL_DEREF;
        let y = (y as Byte) << 3;
        reg(builder, Base, 0x04 | y, &format!("INC {}", r), if mem { 11 } else { 4 });
        reg(builder, Base, 0x05 | y, &format!("DEC {}", r), if mem { 11 } else { 4 });
        reg(builder, Base, 0x06 | y, &format!("LD {},#", r), if mem { 10 } else { 7 });
    }

    for (y, dst) in REG8.iter().enumerate() {
        for (z, src) in REG8.iter().enumerate() {
            if y == HL_DEREF && z == HL_DEREF {
                // 0x76 is HALT.
                continue;
            }

            let cycles = if y == HL_DEREF || z == HL_DEREF { 7 } else { 4 };
            let opcode = 0x40 | ((y as Byte) << 3) | z as Byte;
            reg(builder, Base, opcode, &format!("LD {},{}", dst, src), cycles);
        }
    }

    for (y, op) in ALU.iter().enumerate() {
        for (z, r) in REG8.iter().enumerate() {
            let cycles = if z == HL_DEREF { 7 } else { 4 };
            let opcode = 0x80 | ((y as Byte) << 3) | z as Byte;
            reg(builder, Base, opcode, &format!("{}{}", op, r), cycles);
        }
        reg(builder, Base, 0xC6 | ((y as Byte) << 3), &format!("{}#", op), 7);
    }

    for (y, cc) in COND.iter().enumerate() {
        let y = (y as Byte) << 3;
        reg_cond(builder, Base, 0xC0 | y, &format!("RET {}", cc), 11, Some(5));
        reg(builder, Base, 0xC2 | y, &format!("JP {},@", cc), 10);
        reg_cond(builder, Base, 0xC4 | y, &format!("CALL {},@", cc), 17, Some(10));
        reg(builder, Base, 0xC7 | y, &format!("RST 0x{:02X}", y), 11);
    }

    for (y, cc) in COND.iter().take(4).enumerate() {
        let opcode = 0x20 | ((y as Byte) << 3);
        reg_cond(builder, Base, opcode, &format!("JR {},$", cc), 12, Some(7));
    }
}

fn gen_cb(builder: &mut Builder) {
    use PrefixGroup::Cb;

    for opcode in 0..=0xFFu8 {
        let (x, y, z) = (opcode >> 6, (opcode >> 3) & 7, (opcode & 7) as usize);
        let r = REG8[z];
        let mem = z == HL_DEREF;
        match x {
            0 => reg(builder, Cb, opcode, &format!("{} {}", ROT[y as usize], r), if mem { 15 } else { 8 }),
            1 => reg(builder, Cb, opcode, &format!("BIT {},{}", y, r), if mem { 12 } else { 8 }),
            2 => reg(builder, Cb, opcode, &format!("RES {},{}", y, r), if mem { 15 } else { 8 }),
            _ => reg(builder, Cb, opcode, &format!("SET {},{}", y, r), if mem { 15 } else { 8 }),
        }
    }
}

fn gen_ed(builder: &mut Builder) {
    use PrefixGroup::Ed;

    for (y, r) in REG8.iter().enumerate() {
        if y == HL_DEREF {
            continue;
        }
        let y = (y as Byte) << 3;
        reg(builder, Ed, 0x40 | y, &format!("IN {},(C)", r), 12);
        reg(builder, Ed, 0x41 | y, &format!("OUT (C),{}", r), 12);
    }

    for (p, rp) in REG16_SP.iter().enumerate() {
        let p = (p as Byte) << 4;
        reg(builder, Ed, 0x42 | p, &format!("SBC HL,{}", rp), 15);
        reg(builder, Ed, 0x4A | p, &format!("ADC HL,{}", rp), 15);
        if *rp != "HL" {
            // The HL forms duplicate the shorter unprefixed encodings.
            reg(builder, Ed, 0x43 | p, &format!("LD (@),{}", rp), 20);
            reg(builder, Ed, 0x4B | p, &format!("LD {},(@)", rp), 20);
        }
    }

    reg(builder, Ed, 0x44, "NEG", 8);
    reg(builder, Ed, 0x45, "RETN", 14);
    reg(builder, Ed, 0x4D, "RETI", 14);
    reg(builder, Ed, 0x46, "IM 0", 8);
    reg(builder, Ed, 0x56, "IM 1", 8);
    reg(builder, Ed, 0x5E, "IM 2", 8);
    reg(builder, Ed, 0x47, "LD I,A", 9);
    reg(builder, Ed, 0x4F, "LD R,A", 9);
    reg(builder, Ed, 0x57, "LD A,I", 9);
    reg(builder, Ed, 0x5F, "LD A,R", 9);
    reg(builder, Ed, 0x67, "RRD", 18);
    reg(builder, Ed, 0x6F, "RLD", 18);

    reg(builder, Ed, 0xA0, "LDI", 16);
    reg(builder, Ed, 0xA1, "CPI", 16);
    reg(builder, Ed, 0xA2, "INI", 16);
    reg(builder, Ed, 0xA3, "OUTI", 16);
    reg(builder, Ed, 0xA8, "LDD", 16);
    reg(builder, Ed, 0xA9, "CPD", 16);
    reg(builder, Ed, 0xAA, "IND", 16);
    reg(builder, Ed, 0xAB, "OUTD", 16);
    reg_cond(builder, Ed, 0xB0, "LDIR", 21, Some(16));
    reg_cond(builder, Ed, 0xB1, "CPIR", 21, Some(16));
    reg_cond(builder, Ed, 0xB2, "INIR", 21, Some(16));
    reg_cond(builder, Ed, 0xB3, "OTIR", 21, Some(16));
    reg_cond(builder, Ed, 0xB8, "LDDR", 21, Some(16));
    reg_cond(builder, Ed, 0xB9, "CPDR", 21, Some(16));
    reg_cond(builder, Ed, 0xBA, "INDR", 21, Some(16));
    reg_cond(builder, Ed, 0xBB, "OTDR", 21, Some(16));
}

/// Substitutes an index register into an 8-bit operand of the unprefixed encoding.
fn index_reg8(xy: &str, r: &str) -> String {
    match r {
        "H" => format!("{}H", xy),
        "L" => format!("{}L", xy),
        "(HL)" => format!("({}+%)", xy),
        r => r.to_owned(),
    }
}

fn gen_index(builder: &mut Builder, group: PrefixGroup, xy: &str) {
    for (p, rp) in REG16_SP.iter().enumerate() {
        let rp = if *rp == "HL" { xy } else { rp };
        reg(builder, group, 0x09 | ((p as Byte) << 4), &format!("ADD {},{}", xy, rp), 15);
    }

    reg(builder, group, 0x21, &format!("LD {},@", xy), 14);
    reg(builder, group, 0x22, &format!("LD (@),{}", xy), 20);
    reg(builder, group, 0x2A, &format!("LD {},(@)", xy), 20);
    reg(builder, group, 0x23, &format!("INC {}", xy), 10);
    reg(builder, group, 0x2B, &format!("DEC {}", xy), 10);
    reg(builder, group, 0x34, &format!("INC ({}+%)", xy), 23);
    reg(builder, group, 0x35, &format!("DEC ({}+%)", xy), 23);
    reg(builder, group, 0x36, &format!("LD ({}+%),#", xy), 19);
    reg(builder, group, 0xE1, &format!("POP {}", xy), 14);
    reg(builder, group, 0xE3, &format!("EX (SP),{}", xy), 23);
    reg(builder, group, 0xE5, &format!("PUSH {}", xy), 15);
    reg(builder, group, 0xE9, &format!("JP ({})", xy), 8);
    reg(builder, group, 0xF9, &format!("LD SP,{}", xy), 10);

    for (y, half) in ["H", "L"].iter().enumerate() {
        let y = (y as Byte + 4) << 3;
        let half = index_reg8(xy, half);
        reg_undocumented(builder, group, 0x04 | y, &format!("INC {}", half), 8);
        reg_undocumented(builder, group, 0x05 | y, &format!("DEC {}", half), 8);
        reg_undocumented(builder, group, 0x06 | y, &format!("LD {},#", half), 11);
    }

    for (y, dst) in REG8.iter().enumerate() {
        for (z, src) in REG8.iter().enumerate() {
            let opcode = 0x40 | ((y as Byte) << 3) | z as Byte;
            let mem = y == HL_DEREF || z == HL_DEREF;
            if (y == HL_DEREF && z == HL_DEREF) || !(mem || y == 4 || y == 5 || z == 4 || z == 5) {
                continue;
            }

            if mem {
                // Only the (HL) side is rewritten, H and L keep their meaning.
                let (dst, src) = if y == HL_DEREF {
                    (index_reg8(xy, dst), src.to_string())
                } else {
                    (dst.to_string(), index_reg8(xy, src))
                };
                reg(builder, group, opcode, &format!("LD {},{}", dst, src), 19);
            } else {
                let mnemonic = format!("LD {},{}", index_reg8(xy, dst), index_reg8(xy, src));
                reg_undocumented(builder, group, opcode, &mnemonic, 8);
            }
        }
    }

    for (y, op) in ALU.iter().enumerate() {
        let y = (y as Byte) << 3;
        reg_undocumented(builder, group, 0x84 | y, &format!("{}{}H", op, xy), 8);
        reg_undocumented(builder, group, 0x85 | y, &format!("{}{}L", op, xy), 8);
        reg(builder, group, 0x86 | y, &format!("{}({}+%)", op, xy), 19);
    }
}

fn gen_index_bits(builder: &mut Builder, group: PrefixGroup, xy: &str) {
    for opcode in 0..=0xFFu8 {
        let (x, y, z) = (opcode >> 6, (opcode >> 3) & 7, (opcode & 7) as usize);
        let operand = format!("({}+%)", xy);

        let op = match x {
            0 => format!("{} {}", ROT[y as usize], operand),
            1 => format!("BIT {},{}", y, operand),
            2 => format!("RES {},{}", y, operand),
            _ => format!("SET {},{}", y, operand),
        };

        if z == HL_DEREF {
            reg(builder, group, opcode, &op, if x == 1 { 20 } else { 23 });
        } else if x != 1 {
            // The undocumented forms also copy the result into a register; they are
            // written with the bit operation as a sub-op of a load.
            let mnemonic = format!("LD {},{}", REG8[z], op);
            reg_undocumented(builder, group, opcode, &mnemonic, 23);
        }
    }
}

pub(in crate::spec) fn register(builder: &mut Builder) {
    gen_base_misc(builder);
    gen_base_regular(builder);
    gen_cb(builder);
    gen_ed(builder);
    gen_index(builder, PrefixGroup::Dd, "IX");
    gen_index(builder, PrefixGroup::Fd, "IY");
    gen_index_bits(builder, PrefixGroup::DdCb, "IX");
    gen_index_bits(builder, PrefixGroup::FdCb, "IY");
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn flags_are_inferred_from_mnemonics() {
        assert_eq!(infer_flags("JP @"), OpFlags::JUMPS | OpFlags::REF_ADDR);
        assert!(infer_flags("JP NZ,@").contains(OpFlags::CONTINUES));
        assert!(infer_flags("RET Z").contains(OpFlags::RETURNS | OpFlags::CONTINUES));
        assert!(!infer_flags("RET").contains(OpFlags::CONTINUES));
        assert!(infer_flags("SUB B").contains(OpFlags::IMPLICIT_A));
        assert!(!infer_flags("ADD A,B").contains(OpFlags::IMPLICIT_A));
        assert!(infer_flags("IN A,(#)").contains(OpFlags::PORT_REF));
        assert!(!infer_flags("LD C,#").contains(OpFlags::JUMPS));
        assert!(infer_flags("HALT").is_empty());
    }

    #[test]
    fn index_substitution() {
        assert_eq!(index_reg8("IX", "H"), "IXH");
        assert_eq!(index_reg8("IY", "(HL)"), "(IY+%)");
        assert_eq!(index_reg8("IY", "A"), "A");
    }
}
