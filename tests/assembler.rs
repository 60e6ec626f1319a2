mod common;

use common::{assemble_clean, assert_one_diagnostic, assemble_files, diagnostics};
use zasm::assembler::{assemble_str, intel_hex, phases::types::Abort, Error};

#[test]
fn instructions_encode() {
    assert_eq!(
        assemble_clean("ld a,5\nnop\nld hl,0x1234\nhalt\n"),
        vec![0x3E, 0x05, 0x00, 0x21, 0x34, 0x12, 0x76]
    );
}

#[test]
fn forward_references_resolve() {
    assert_eq!(
        assemble_clean("jp target\nnop\ntarget: ret\n"),
        vec![0xC3, 0x04, 0x00, 0x00, 0xC9]
    );
}

#[test]
fn index_register_displacements() {
    assert_eq!(
        assemble_clean("ld (ix+5),a\nld a,(iy+1)\nld (ix-3),7\n"),
        vec![0xDD, 0x77, 0x05, 0xFD, 0x7E, 0x01, 0xDD, 0x36, 0xFD, 0x07]
    );
}

#[test]
fn register_sub_operations() {
    assert_eq!(
        assemble_clean("ld b,res 0,(ix+1)\n"),
        vec![0xDD, 0xCB, 0x01, 0x80]
    );
}

#[test]
fn invalid_instruction_is_a_warning_and_takes_no_space() {
    assert_one_diagnostic("ld (ix+1),(iy+2)\n", "warning", "Invalid instruction");
    let (result, _) = assemble_str("ld (ix+1),(iy+2)\nnop\n");
    assert_eq!(result.unwrap().bytes, vec![0x00]);
}

#[test]
fn relative_jump_out_of_range_emits_filler() {
    let (result, diagnostics) = assemble_str("jr 200\nnop\n");
    assert_eq!(diagnostics.len(), 1, "{:#?}", diagnostics);
    assert!(diagnostics[0].starts_with("<input>:1:1: error:"));
    assert_eq!(result.unwrap().bytes, vec![0x18, 0x00, 0x00]);
}

#[test]
fn data_declarations() {
    assert_eq!(assemble_clean("db 1, 2, 3\n"), vec![1, 2, 3]);
    assert_eq!(assemble_clean("db \"AB\", 0\n"), vec![0x41, 0x42, 0]);
    assert_eq!(assemble_clean("db 3 dup 7\n"), vec![7, 7, 7]);
    assert_eq!(assemble_clean("dw 0x1234, 1\n"), vec![0x34, 0x12, 0x01, 0x00]);
    assert_one_diagnostic("db 256\n", "error", "out of range");
}

#[test]
fn reserve_with_fill() {
    assert_eq!(assemble_clean("ds 3, 0xAA\nnop\n"), vec![0xAA, 0xAA, 0xAA, 0x00]);
}

#[test]
fn failed_data_keeps_later_addresses() {
    let (result, diagnostics) = assemble_str("db 1, missing, 2\nlbl: db 7\ndw lbl\n");
    assert_eq!(diagnostics.len(), 1, "{:#?}", diagnostics);
    assert!(diagnostics[0].contains("Undefined symbol 'missing'"));
    assert_eq!(result.unwrap().bytes, vec![0x01, 0x00, 0x00, 0x07, 0x03, 0x00]);

    let (result, diagnostics) = assemble_str("ds 2, 300\nnop\n");
    assert_eq!(diagnostics.len(), 1, "{:#?}", diagnostics);
    assert!(diagnostics[0].contains("Value 300 is out of range for a byte"));
    assert_eq!(result.unwrap().bytes, vec![0x00, 0x00, 0x00]);
}

#[test]
fn oversized_data_is_an_error() {
    for source in &[
        "db 1\ndb 0x7FFFFFFFFFFFFFFF dup 0\n",
        "db 1\ndw 0x7FFFFFFFFFFFFFFF dup 0\n",
    ] {
        let (result, diagnostics) = assemble_str(source);
        assert!(matches!(result, Err(Error::ErrorsReported(1))), "{:?}", result);
        assert!(
            diagnostics[0].contains("out of range for a repeat count"),
            "{:#?}",
            diagnostics
        );
    }

    let (result, diagnostics) = assemble_str("dw 0x8000 dup 0, 1\n");
    assert!(matches!(result, Err(Error::ErrorsReported(1))), "{:?}", result);
    assert!(
        diagnostics[0].contains("out of range for a data length"),
        "{:#?}",
        diagnostics
    );
}

#[test]
fn structs_pack_by_field() {
    let source = "Point struct\n x byte ?\n y word ?\nends\n\
                  Point {x: 1, y: 2}\n\
                  Point [3, 4]\n\
                  db sizeof(Point), Point.y\n";
    assert_eq!(
        assemble_clean(source),
        vec![0x01, 0x02, 0x00, 0x03, 0x04, 0x00, 0x03, 0x01]
    );
}

#[test]
fn struct_map_literals_zero_fill_missing_fields() {
    let source = "Point struct\n x byte ?\n y word ?\nends\nPoint {y: 0x102}\n";
    assert_eq!(assemble_clean(source), vec![0x00, 0x02, 0x01]);
}

#[test]
fn struct_array_fields() {
    let source = "Buf struct\n len byte ?\n data byte 4 dup ?\nends\nBuf {len: 2, data: [9, 8]}\n";
    assert_eq!(assemble_clean(source), vec![2, 9, 8, 0, 0]);

    let source = "Buf struct\n data byte 2 dup ?\nends\nBuf {data: [1, 2, 3]}\n";
    assert_one_diagnostic(source, "error", "holds 2 element(s), but 3 were given");
}

#[test]
fn unknown_struct_fields_are_errors() {
    let source = "Point struct\n x byte ?\nends\nPoint {z: 1}\n";
    assert_one_diagnostic(source, "error", "no field named 'z'");
}

#[test]
fn macro_labels_are_local_to_each_expansion() {
    let source = "spin macro\nagain: nop\n jr again\nendm\nspin\nspin\n";
    assert_eq!(
        assemble_clean(source),
        vec![0x00, 0x18, 0xFD, 0x00, 0x18, 0xFD]
    );
}

#[test]
fn macro_arguments_substitute_operands() {
    let source = "load macro reg, val\n ld reg,val\nendm\nload b, 3\nload a, 1 + 1\n";
    assert_eq!(assemble_clean(source), vec![0x06, 0x03, 0x3E, 0x02]);
}

#[test]
fn recursive_macro_is_an_error() {
    let diagnostics = diagnostics("forever macro\n forever\nendm\nforever\n");
    assert!(!diagnostics.is_empty());
    assert!(diagnostics
        .iter()
        .any(|d| d.contains("Recursive invocation of macro 'forever'")));
}

#[test]
fn equ_position_is_where_it_is_defined() {
    assert_eq!(
        assemble_clean("org 0x100\nnop\nhere equ $\nld hl,here\n"),
        vec![0x00, 0x21, 0x01, 0x01]
    );
}

#[test]
fn parameterized_equ() {
    assert_eq!(
        assemble_clean("twice(x) equ x * 2\ndb twice(3), twice(twice(1))\n"),
        vec![6, 4]
    );
}

#[test]
fn recursive_equ_is_an_error() {
    let diagnostics = diagnostics("x equ y\ny equ x\ndb x\n");
    assert!(diagnostics
        .iter()
        .any(|d| d.contains("is defined in terms of itself")));
}

#[test]
fn undefined_operands_are_reported_at_generation() {
    let (result, diagnostics) = assemble_str("ld a,missing\nnop\n");
    assert_eq!(diagnostics.len(), 1, "{:#?}", diagnostics);
    assert!(diagnostics[0].contains("Undefined symbol 'missing'"));
    assert_eq!(result.unwrap().bytes, vec![0x00, 0x00, 0x00]);
}

#[test]
fn register_names_cannot_be_labels() {
    assert_one_diagnostic("p: nop\n", "error", "register or instruction name");
}

#[test]
fn duplicate_labels_are_errors() {
    assert_one_diagnostic("start: nop\nstart: nop\n", "error", "already defined");
}

#[test]
fn procedures_scope_their_labels() {
    let source = "first: proc\nloop: nop\n jr loop\nendp\nsecond: proc\nloop: nop\nendp\n";
    assert_eq!(assemble_clean(source), vec![0x00, 0x18, 0xFD, 0x00]);
    assert_one_diagnostic(
        "outer: proc\ninner: nop\nendp\njp inner\n",
        "error",
        "Undefined symbol 'inner'",
    );
}

#[test]
fn conditions_are_decided_once() {
    let source = "if defined(later)\n db 1\nelse\n db 2\nendif\nlater equ 1\n";
    assert_eq!(assemble_clean(source), vec![2]);
    assert_eq!(
        assemble_clean("k equ 3\nif k == 1\ndb 1\nelseif k == 3\ndb 3\nelse\ndb 0\nendif\n"),
        vec![3]
    );
}

#[test]
fn user_messages() {
    assert_one_diagnostic("error \"stop here\"\n", "error", "stop here");
    assert_one_diagnostic("warning \"careful\"\nnop\n", "warning", "careful");
}

#[test]
fn org_gap_is_filled_and_opens_a_block() {
    let (result, diagnostics) = assemble_str("db 1\norg 4\ndb 2\n");
    assert!(diagnostics.is_empty());
    let output = result.unwrap();
    assert_eq!(output.bytes, vec![1, 0xFF, 0xFF, 0xFF, 2]);
    assert_eq!(output.blocks.len(), 2);
    assert_eq!(output.blocks[1].address, 4);
    assert_eq!(output.blocks[1].bytes(&output), &[2]);
}

#[test]
fn reserving_over_written_bytes_keeps_one_block() {
    let (result, diagnostics) = assemble_str("db 1,2\norg 0\nds 2\n");
    assert!(diagnostics.is_empty(), "{:#?}", diagnostics);
    let output = result.unwrap();
    assert_eq!(output.bytes, vec![1, 2]);
    assert_eq!(output.blocks.len(), 1);
    assert_eq!(intel_hex(&output), ":020000000102FB\n:00000001FF\n");
}

#[test]
fn first_org_sets_the_load_address() {
    let (result, _) = assemble_str("org 0x8000\nnop\n");
    let output = result.unwrap();
    assert_eq!(output.bytes, vec![0x00]);
    assert_eq!(output.blocks[0].address, 0x8000);
}

#[test]
fn overwriting_output_aborts() {
    match assemble_str("db 1\norg 0\ndb 2\n").0 {
        Err(Error::Abort(Abort::OutputOverwrite(msg))) => {
            assert!(msg.as_ref().contains("already been written"))
        }
        other => panic!("{:?}", other),
    }
}

#[test]
fn layout_errors_prevent_generation() {
    match assemble_str("ds missing\nnop\n").0 {
        Err(Error::ErrorsReported(1)) => (),
        other => panic!("{:?}", other),
    }
}

#[test]
fn includes_share_the_root_scope() {
    let (mut asm, output) = assemble_files(&[
        ("main.asm", "include \"defs.inc\"\nld a,K\n"),
        ("defs.inc", "K equ 7\n"),
    ]);
    assert_eq!(output.bytes, vec![0x3E, 0x07]);
    assert_eq!(asm.symbols(), vec![("K".to_owned(), 7)]);
}

#[test]
fn symbol_table() {
    let (mut asm, _) = assemble_files(&[(
        "main.asm",
        "org 0x100\nstart: nop\nK equ 5\nf(x) equ x\nm macro\nendm\n",
    )]);
    assert_eq!(
        asm.symbols(),
        vec![("K".to_owned(), 5), ("start".to_owned(), 0x100)]
    );
}

#[test]
fn intel_hex_export() {
    let (result, _) = assemble_str("org 0x100\nld a,1\n");
    assert_eq!(
        intel_hex(&result.unwrap()),
        ":020100003E01BE\n:00000001FF\n"
    );
}

#[test]
fn listing_shows_addresses_and_bytes() {
    let (result, _) = assemble_str("org 0x100\nld a,1\n");
    let listing = result.unwrap().listing;
    assert!(listing.contains("0100 3E 01"), "{}", listing);
    assert!(listing.contains("ld a,1"), "{}", listing);
}

#[test]
fn bitmaps() {
    let source = "defbits '#', \"1\"\ndefbits '.', \"0\"\nbitmap 8\n \"#......#\"\n \".######.\"\nendb\n";
    assert_eq!(assemble_clean(source), vec![0x81, 0x7E]);
    assert_one_diagnostic(
        "bitmap 8\n \"xxxxxxxx\"\nendb\n",
        "error",
        "No DEFBITS pattern for character 'x'",
    );
}
