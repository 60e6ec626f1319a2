use criterion::{criterion_group, criterion_main, Criterion};
use std::fmt::Write;
use zasm::assembler::assemble_str;

fn program(routines: usize) -> String {
    let mut src = String::from(
        "org 0x100\n\
         Entry struct\n id byte ?\n target word ?\nends\n\
         push_all macro\n push af\n push bc\n push hl\nendm\n\
         pop_all macro\n pop hl\n pop bc\n pop af\nendm\n",
    );
    for i in 0..routines {
        let _ = write!(
            src,
            "routine{i}: proc\n push_all\n ld b,{n}\nloop: ld a,(ix+{n})\n add a,b\n djnz loop\n pop_all\n ret\nendp\n",
            i = i,
            n = i % 100
        );
    }
    src.push_str("table:\n");
    for i in 0..routines {
        let _ = writeln!(src, " Entry {{id: {}, target: routine{}}}", i % 256, i);
    }
    src
}

fn assemble_program(c: &mut Criterion) {
    let src = program(200);
    c.bench_function("assemble", |b| {
        b.iter(|| {
            let (result, diagnostics) = assemble_str(&src);
            assert!(diagnostics.is_empty());
            result.unwrap()
        })
    });
}

criterion_group!(benches, assemble_program);
criterion_main!(benches);
