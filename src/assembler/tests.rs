// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Whole-program scenario tests driving `Assembler` over in-memory
//! sources.

use std::cell::RefCell;
use std::io::{self, Write};
use std::rc::Rc;

use super::*;

#[derive(Clone, Default)]
struct SharedBuf(Rc<RefCell<Vec<u8>>>);

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl SharedBuf {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.borrow()).into_owned()
    }
}

struct Run {
    asm: Assembler,
    good: bool,
    errors: String,
    prints: String,
}

fn assemble_with(format: BinaryFormat, src: &str) -> Run {
    let errors = SharedBuf::default();
    let prints = SharedBuf::default();
    let mut asm = Assembler::new(
        "test.s",
        src.as_bytes().to_vec(),
        format,
        GpuDeviceType::CapeVerde,
        Box::new(errors.clone()),
        Box::new(prints.clone()),
    );
    let good = asm.assemble();
    Run {
        asm,
        good,
        errors: errors.text(),
        prints: prints.text(),
    }
}

fn assemble(src: &str) -> Run {
    assemble_with(BinaryFormat::Amd, src)
}

fn sym<'a>(asm: &'a Assembler, name: &str) -> &'a AsmSymbol {
    let table = asm.symbol_table();
    let id = table
        .lookup(name)
        .unwrap_or_else(|| panic!("symbol '{name}' missing"));
    table.get(id)
}

#[track_caller]
fn assert_sym(
    asm: &Assembler,
    name: &str,
    value: u64,
    section: u32,
    defined: bool,
    once: bool,
    base: bool,
) {
    let s = sym(asm, name);
    assert_eq!(s.value, value, "symbol '{name}' value");
    assert_eq!(s.section_id, section, "symbol '{name}' section");
    assert_eq!(s.has_value, defined, "symbol '{name}' defined");
    assert_eq!(s.once_defined, once, "symbol '{name}' onceDefined");
    assert_eq!(s.base, base, "symbol '{name}' base");
}

fn words_le(values: &[u32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

#[test]
fn empty_input_defines_only_output_counter() {
    let run = assemble("");
    assert!(run.good);
    assert!(run.errors.is_empty());
    assert!(run.asm.sections().is_empty());
    assert_eq!(run.asm.symbol_table().len(), 1);
    assert_sym(&run.asm, ".", 0, 0, true, false, false);
}

#[test]
fn forward_reference_chain_resolves_eagerly() {
    let run = assemble(
        r#"sym1 = 7
        sym2 = 81
        sym3 = sym7*sym4
        sym4 = sym5*sym6+sym7 - sym1
        sym5 = 17
        sym6 = 43
        sym7 = 91"#,
    );
    assert!(run.good, "errors: {}", run.errors);
    assert_sym(&run.asm, "sym1", 7, ASMSECT_ABS, true, false, false);
    assert_sym(&run.asm, "sym2", 81, ASMSECT_ABS, true, false, false);
    assert_sym(&run.asm, "sym3", 91 * (17 * 43 + 91 - 7), ASMSECT_ABS, true, false, false);
    assert_sym(&run.asm, "sym4", 17 * 43 + 91 - 7, ASMSECT_ABS, true, false, false);
    assert_sym(&run.asm, "sym5", 17, ASMSECT_ABS, true, false, false);
    assert_sym(&run.asm, "sym6", 43, ASMSECT_ABS, true, false, false);
    assert_sym(&run.asm, "sym7", 91, ASMSECT_ABS, true, false, false);
    assert_eq!(run.asm.symbol_table().len(), 8);
}

#[test]
fn undefined_and_self_referencing_symbols_stay_undefined() {
    let run = assemble(
        r#"sym1 = 7
        sym2 = 81
        sym3 = sym7*sym4
        sym4 = sym5*sym6+sym7 - sym1
        sym5 = 17
        sym6 = 43
        sym9 = sym9
        sym10 = sym10
        sym10 = sym2+7"#,
    );
    assert!(run.good, "errors: {}", run.errors);
    assert_sym(&run.asm, "sym10", 88, ASMSECT_ABS, true, false, false);
    assert_sym(&run.asm, "sym3", 0, ASMSECT_ABS, false, false, false);
    assert_sym(&run.asm, "sym4", 0, ASMSECT_ABS, false, false, false);
    assert_sym(&run.asm, "sym7", 0, ASMSECT_ABS, false, false, false);
    assert_sym(&run.asm, "sym9", 0, ASMSECT_ABS, false, false, false);
}

#[test]
fn labels_and_local_labels_in_raw_code() {
    let src = r#".rawcode
start: .int 3,5,6
label1: vx0 = start
        vx2 = label1+6
        vx3 = label2+8
        .int 1,2,3,4
label2: .int 3,6,7
        vx4 = 2f
2:      .int 11
        vx5 = 2b
        vx6 = 2f
        vx7 = 3f
2:      .int 12
3:      vx8 = 3b"#;
    let run = assemble(src);
    assert!(run.good, "errors: {}", run.errors);
    assert_eq!(run.asm.sections().len(), 1);
    assert_eq!(
        run.asm.sections()[0].content,
        words_le(&[3, 5, 6, 1, 2, 3, 4, 3, 6, 7, 11, 12])
    );
    assert_sym(&run.asm, ".", 48, 0, true, false, false);
    assert_sym(&run.asm, "2b", 44, 0, true, false, false);
    assert_sym(&run.asm, "2f", 44, 0, false, false, false);
    assert_sym(&run.asm, "3b", 48, 0, true, false, false);
    assert_sym(&run.asm, "3f", 48, 0, false, false, false);
    assert_sym(&run.asm, "label1", 12, 0, true, true, false);
    assert_sym(&run.asm, "label2", 28, 0, true, true, false);
    assert_sym(&run.asm, "start", 0, 0, true, true, false);
    assert_sym(&run.asm, "vx0", 0, 0, true, false, false);
    assert_sym(&run.asm, "vx2", 18, 0, true, false, false);
    assert_sym(&run.asm, "vx3", 36, 0, true, false, false);
    assert_sym(&run.asm, "vx4", 40, 0, true, false, false);
    assert_sym(&run.asm, "vx5", 40, 0, true, false, false);
    assert_sym(&run.asm, "vx6", 44, 0, true, false, false);
    assert_sym(&run.asm, "vx7", 48, 0, true, false, false);
    assert_sym(&run.asm, "vx8", 48, 0, true, false, false);
    assert_eq!(run.asm.symbol_table().len(), 16);
}

#[test]
fn labels_in_abs_addressable_section_resolve_to_absolute() {
    let run = assemble(
        r#"label1:
3:      v1 = label1
        v2 = 3b"#,
    );
    assert!(run.good, "errors: {}", run.errors);
    assert_eq!(run.asm.sections().len(), 1);
    assert_eq!(run.asm.sections()[0].section_type, AsmSectionType::Data);
    assert!(run.asm.sections()[0].content.is_empty());
    assert_sym(&run.asm, "label1", 0, 0, true, true, false);
    assert_sym(&run.asm, "3b", 0, 0, true, false, false);
    assert_sym(&run.asm, "v1", 0, ASMSECT_ABS, true, false, false);
    assert_sym(&run.asm, "v2", 0, ASMSECT_ABS, true, false, false);
}

#[test]
fn assignment_and_redefinition_rules() {
    let src = r#".rawcode
start: .byte 0xfa, 0xfd, 0xfb, 0xda
start:  # try define again this same label
        start = 132 # try define by assignment
        .byte zx
        zx = 9
        .byte zx
        zx = 10
1:      .byte zx
        1 = 6       # illegal assignment of local label
        # by .set
        .byte zy
        .set zy, 10
        .byte zy
        .set zy, 11
        .byte zy
        # by .equ
        .byte zz
        .equ zz, 100
        .byte zz
        .equ zz, 120
        .byte zz
        # by equiv
        .byte testx
        .equiv testx, 130   # illegal by equiv
        .byte testx
        .equiv testx, 150
        .byte testx
        myval = 0x12
        .equiv myval,0x15   # illegal by equiv
        .equiv myval,0x15   # illegal by equiv
        myval = 6       # legal by normal assignment
        .set myval,8    # legal
        .equ myval,9    # legal
        testx = 566
        .set testx,55"#;
    let run = assemble(src);
    assert!(!run.good);
    assert_eq!(
        run.asm.sections()[0].content,
        vec![
            0xfa, 0xfd, 0xfb, 0xda, 0x09, 0x09, 0x0a, 0x0a, 0x0a, 0x0b, 0x64, 0x64, 0x78,
            0x82, 0x82, 0x82
        ]
    );
    let expected_errors = "\
test.s:3:1: Error: Symbol 'start' is already defined
test.s:4:9: Error: Symbol 'start' is already defined
test.s:10:9: Error: Illegal number at statement begin
test.s:10:11: Error: Garbages at end of line with pseudo-op
test.s:27:16: Error: Symbol 'testx' is already defined
test.s:30:16: Error: Symbol 'myval' is already defined
test.s:31:16: Error: Symbol 'myval' is already defined
test.s:35:9: Error: Symbol 'testx' is already defined
test.s:36:14: Error: Symbol 'testx' is already defined
";
    assert_eq!(run.errors, expected_errors);
    assert_sym(&run.asm, ".", 16, 0, true, false, false);
    assert_sym(&run.asm, "1b", 6, 0, true, false, false);
    assert_sym(&run.asm, "1f", 6, 0, false, false, false);
    assert_sym(&run.asm, "myval", 9, ASMSECT_ABS, true, false, false);
    assert_sym(&run.asm, "start", 0, 0, true, true, false);
    assert_sym(&run.asm, "testx", 130, ASMSECT_ABS, true, true, false);
    assert_sym(&run.asm, "zx", 10, ASMSECT_ABS, true, false, false);
    assert_sym(&run.asm, "zy", 11, ASMSECT_ABS, true, false, false);
    assert_sym(&run.asm, "zz", 120, ASMSECT_ABS, true, false, false);
}

#[test]
fn eqv_snapshots_capture_values_at_use_sites() {
    let src = r#"        z=5
        .eqv v1,v+t
        .eqv v,z*y
        .int v1
        .int v+v
        z=8
        .int v+v
        z=9
        y=3
        t=7
        .int v1
        t=8
        y=2
        .int v1+v"#;
    let run = assemble(src);
    assert!(run.good, "errors: {}", run.errors);
    assert_eq!(
        run.asm.sections()[0].content,
        words_le(&[0x16, 0x1e, 0x30, 0x22, 0x2c])
    );
    assert_sym(&run.asm, ".", 20, 0, true, false, false);
    assert_sym(&run.asm, "t", 8, ASMSECT_ABS, true, false, false);
    assert_sym(&run.asm, "v", 0, ASMSECT_ABS, false, true, true);
    assert_sym(&run.asm, "v1", 0, ASMSECT_ABS, false, true, true);
    assert_sym(&run.asm, "y", 2, ASMSECT_ABS, true, false, false);
    assert_sym(&run.asm, "z", 9, ASMSECT_ABS, true, false, false);
}

#[test]
fn eqv_snapshots_track_leaves_undefined_at_capture() {
    let src = r#".int y+7
        t=8
        tx=3
        .eqv y,t*tx+2

        .int y2+7
        t2=8
        .eqv y2,t2*tx2+3
        tx2=5

        n1=7
        n2=6
        .eqv out0,n1*n2+2
        .int out0
        n2=5
        .int out0

        t2=3
        t3=4
        .eqv x0,2*t2*t3
        .eqv out1,x0*2
        .int out1

        .eqv x1,2
        .eqv out2,x1*2
        .int out2"#;
    let run = assemble(src);
    assert!(run.good, "errors: {}", run.errors);
    assert_eq!(
        run.asm.sections()[0].content,
        words_le(&[0x21, 0x32, 0x2c, 0x25, 0x30, 0x04])
    );
    assert_sym(&run.asm, "n1", 7, ASMSECT_ABS, true, false, false);
    assert_sym(&run.asm, "n2", 5, ASMSECT_ABS, true, false, false);
    assert_sym(&run.asm, "out0", 0, ASMSECT_ABS, false, true, true);
    assert_sym(&run.asm, "out1", 0, ASMSECT_ABS, false, true, true);
    assert_sym(&run.asm, "out2", 0, ASMSECT_ABS, false, true, true);
    assert_sym(&run.asm, "t", 8, ASMSECT_ABS, true, false, false);
    assert_sym(&run.asm, "t2", 3, ASMSECT_ABS, true, false, false);
    assert_sym(&run.asm, "t3", 4, ASMSECT_ABS, true, false, false);
    assert_sym(&run.asm, "tx", 3, ASMSECT_ABS, true, false, false);
    assert_sym(&run.asm, "tx2", 5, ASMSECT_ABS, true, false, false);
    assert_sym(&run.asm, "x0", 0, ASMSECT_ABS, false, true, true);
    assert_sym(&run.asm, "x1", 2, ASMSECT_ABS, true, true, false);
    assert_sym(&run.asm, "y", 0, ASMSECT_ABS, false, true, true);
    assert_sym(&run.asm, "y2", 0, ASMSECT_ABS, false, true, true);
}

#[test]
fn eqv_with_pending_references_in_various_orders() {
    let src = r#"x00t = 6
            x00u = x00t+9
            .eqv x03,6
            .eqv x02,x03+2*x03+x00u
            .eqv x01,x02*x02+x00t
            x00 = x01+x02*x03
            .int x00
            z00 = x00

            x10u = x10t+11
            x10t = 8
            .eqv x12,x13+2*x13+x10u
            .eqv x13,14
            .eqv x11,x12*x12+x10t
            x10 = x11+x12*x13
            .int x10
            z10 = x10

            x20u = x20t+3
            x20t = 11
            .eqv x21,x22*x22+x20t
            .eqv x22,x23+2*x23+x20u
            .eqv x23,78
            x20 = x21+x22*x23
            .int x20
            z20 = x20

            x30u = x30t+21
            x30t = 31
            x30 = x31+x32*x33
            .eqv x31,x32*x32+x30t
            .eqv x32,x33+2*x33+x30u
            .eqv x33,5
            .int x30
            z30 = x30

            z40 = x40
            .int x40
            x40u = x40t+71
            x40t = 22
            x40 = x41+x42*x43
            .eqv x41,x42*x42+x40t
            .eqv x42,x43+2*x43+x40u
            .eqv x43,12

            z50 = x50
            .int x50
            x50t = 15
            x50 = x51+x52*x53
            .eqv x51,x52*x52+x50t
            .eqv x52,x53+2*x53+x50u
            .eqv x53,23
            x50u = x50t+19"#;
    let run = assemble(src);
    assert!(run.good, "errors: {}", run.errors);
    let values = [1293u32, 4583, 80859, 4855, 18211, 12993];
    assert_eq!(run.asm.sections()[0].content, words_le(&values));
    for (group, value) in values.iter().enumerate() {
        let x = format!("x{}0", group);
        let z = format!("z{}0", group);
        assert_sym(&run.asm, &x, *value as u64, ASMSECT_ABS, true, false, false);
        assert_sym(&run.asm, &z, *value as u64, ASMSECT_ABS, true, false, false);
    }
    assert_sym(&run.asm, "x03", 6, ASMSECT_ABS, true, true, false);
    assert_sym(&run.asm, "x01", 0, ASMSECT_ABS, false, true, true);
    assert_sym(&run.asm, "x42", 0, ASMSECT_ABS, false, true, true);
}

#[test]
fn eqv_bases_with_defined_leaves_stay_unresolved_templates() {
    let src = r#"x00t = 6
            x00u = x00t+9
            .eqv x03,x00u*x00t+6
            .eqv x02,x03+2*x03+x00u
            .eqv x01,x02*x02+x00t
            x00 = x01+x02*x03
            .int x00
            z00 = x00

            z50 = x50
            .int x50
            x50t = 15
            x50 = x51+x52*x53
            .eqv x51,x52*x52+x50t
            .eqv x52,x53+2*x53+x50u
            .eqv x53,x50u*x50t+23
            x50u = x50t+19"#;
    let run = assemble(src);
    assert!(run.good, "errors: {}", run.errors);
    assert_eq!(
        run.asm.sections()[0].content,
        words_le(&[120903, 3537093])
    );
    assert_sym(&run.asm, "x00", 120903, ASMSECT_ABS, true, false, false);
    assert_sym(&run.asm, "x03", 0, ASMSECT_ABS, false, true, true);
    assert_sym(&run.asm, "x50", 3537093, ASMSECT_ABS, true, false, false);
    assert_sym(&run.asm, "z50", 3537093, ASMSECT_ABS, true, false, false);
}

#[test]
fn if_else_emits_only_taken_branch() {
    let run = assemble(".rawcode\n.if 0\n.byte 1\n.else\n.byte 2\n.endif\n");
    assert!(run.good, "errors: {}", run.errors);
    assert_eq!(run.asm.sections()[0].content, vec![2]);
}

#[test]
fn nested_untaken_conditionals_are_scanned_not_assembled() {
    let run = assemble(
        ".rawcode\n.if 0\n.if 1\n.byte 1\n.endif\n.else\n.byte 3\n.endif\n",
    );
    assert!(run.good, "errors: {}", run.errors);
    assert_eq!(run.asm.sections()[0].content, vec![3]);
}

#[test]
fn elseif_chain_takes_first_true_arm_only() {
    let run = assemble(
        ".rawcode\n.if 0\n.byte 1\n.elseif 1\n.byte 2\n.elseif 1\n.byte 3\n.else\n.byte 4\n.endif\n",
    );
    assert!(run.good, "errors: {}", run.errors);
    assert_eq!(run.asm.sections()[0].content, vec![2]);
}

#[test]
fn ifdef_checks_symbol_definedness() {
    let run = assemble(".rawcode\na = 1\n.ifdef a\n.byte 1\n.endif\n.ifdef b\n.byte 2\n.endif\n.ifndef b\n.byte 3\n.endif\n");
    assert!(run.good, "errors: {}", run.errors);
    assert_eq!(run.asm.sections()[0].content, vec![1, 3]);
}

#[test]
fn unterminated_if_is_reported_at_end() {
    let run = assemble(".if 1\n.byte 1\n");
    assert!(!run.good);
    assert!(run.errors.contains("Unterminated '.if'"), "{}", run.errors);
}

#[test]
fn dangling_endif_is_an_error() {
    let run = assemble(".endif\n");
    assert!(!run.good);
    assert!(run.errors.contains("'.endif' without '.if'"), "{}", run.errors);
}

#[test]
fn else_after_else_is_an_error() {
    let run = assemble(".if 0\n.else\n.else\n.endif\n");
    assert!(!run.good);
    assert!(run.errors.contains("'.else' after '.else'"), "{}", run.errors);
}

#[test]
fn macro_expansion_with_defaults_and_counter() {
    let src = r#".rawcode
.macro store a, b=7
.byte \a, \b
.endm
store 1, 2
store 3
.macro tag
.byte \@
.endm
tag
tag
"#;
    let run = assemble(src);
    assert!(run.good, "errors: {}", run.errors);
    // \@ counts every macro substitution, store's two included
    assert_eq!(run.asm.sections()[0].content, vec![1, 2, 3, 7, 2, 3]);
}

#[test]
fn macro_required_argument_is_enforced() {
    let run = assemble(".macro need x:req\n.byte \\x\n.endm\nneed\n");
    assert!(!run.good);
    assert!(
        run.errors.contains("Value required for macro argument 'x'"),
        "{}",
        run.errors
    );
}

#[test]
fn macro_redefinition_is_an_error_and_purgem_clears_it() {
    let run = assemble(".macro m\n.endm\n.macro m\n.endm\n");
    assert!(!run.good);
    assert!(run.errors.contains("Macro 'm' is already defined"), "{}", run.errors);

    let run = assemble(".rawcode\n.macro m\n.byte 1\n.endm\n.purgem m\n.macro m\n.byte 2\n.endm\nm\n");
    assert!(run.good, "errors: {}", run.errors);
    assert_eq!(run.asm.sections()[0].content, vec![2]);
}

#[test]
fn exitm_stops_macro_expansion() {
    let run = assemble(".rawcode\n.macro m\n.byte 1\n.exitm\n.byte 2\n.endm\nm\n");
    assert!(run.good, "errors: {}", run.errors);
    assert_eq!(run.asm.sections()[0].content, vec![1]);
}

#[test]
fn macro_recursion_hits_depth_limit() {
    let run = assemble(".macro m\nm\n.endm\nm\n");
    assert!(!run.good);
    assert!(
        run.errors.contains("Macro substitution depth exceeded"),
        "{}",
        run.errors
    );
}

#[test]
fn rept_replays_body_with_counter() {
    let run = assemble(".rawcode\n.rept 3\n.byte \\+\n.endr\n");
    assert!(run.good, "errors: {}", run.errors);
    assert_eq!(run.asm.sections()[0].content, vec![0, 1, 2]);
}

#[test]
fn nested_rept_multiplies_repetitions() {
    let run = assemble(".rawcode\n.rept 2\n.rept 2\n.byte 1\n.endr\n.endr\n");
    assert!(run.good, "errors: {}", run.errors);
    assert_eq!(run.asm.sections()[0].content, vec![1, 1, 1, 1]);
}

#[test]
fn rept_zero_drops_body() {
    let run = assemble(".rawcode\n.rept 0\n.byte 1\n.endr\n.byte 9\n");
    assert!(run.good, "errors: {}", run.errors);
    assert_eq!(run.asm.sections()[0].content, vec![9]);
}

#[test]
fn include_pushes_stream_filter() {
    let dir = std::env::temp_dir().join(format!("gcnforge-test-{}", std::process::id()));
    std::fs::create_dir_all(&dir).expect("tempdir");
    let path = dir.join("defs.s");
    std::fs::write(&path, "seven = 7\n").expect("write include");

    let errors = SharedBuf::default();
    let prints = SharedBuf::default();
    let src = ".include \"defs.s\"\nresult = seven+1\n".to_string();
    let mut asm = Assembler::new(
        "test.s",
        src.into_bytes(),
        BinaryFormat::Amd,
        GpuDeviceType::CapeVerde,
        Box::new(errors.clone()),
        Box::new(prints),
    );
    asm.add_include_dir(&dir);
    let good = asm.assemble();
    assert!(good, "errors: {}", errors.text());
    assert_sym(&asm, "result", 8, ASMSECT_ABS, true, false, false);

    let _ = std::fs::remove_file(&path);
    let _ = std::fs::remove_dir(&dir);
}

#[test]
fn missing_include_file_is_reported() {
    let run = assemble(".include \"no-such-file-anywhere.s\"\n");
    assert!(!run.good);
    assert!(
        run.errors.contains("Cannot include file 'no-such-file-anywhere.s'"),
        "{}",
        run.errors
    );
}

#[test]
fn division_by_zero_in_assignment() {
    let run = assemble("a = 1/0\n");
    assert!(!run.good);
    assert!(run.errors.contains("Division by zero"), "{}", run.errors);
    assert!(run
        .asm
        .diagnostics()
        .iter()
        .any(|d| d.kind() == crate::core::error::AsmErrorKind::DivideByZero));
}

#[test]
fn cross_section_subtraction_is_rejected() {
    let src = ".gallium\na:\n.byte 1\n.comment\nb:\nx = b - a\n";
    let run = assemble_with(BinaryFormat::Amd, src);
    assert!(!run.good);
    assert!(
        run.errors
            .contains("Subtraction of relative values from different sections"),
        "{}",
        run.errors
    );
}

#[test]
fn same_section_label_arithmetic_is_absolute() {
    let run = assemble(".rawcode\na:\n.int 1,2\nb:\nsize = b - a\nmid = a + 4\n");
    assert!(run.good, "errors: {}", run.errors);
    assert_sym(&run.asm, "size", 8, ASMSECT_ABS, true, false, false);
    assert_sym(&run.asm, "mid", 4, 0, true, false, false);
}

#[test]
fn data_slot_overflow_warns_and_truncates() {
    let run = assemble(".rawcode\n.byte 256\n");
    assert!(run.good, "errors: {}", run.errors);
    assert!(run.errors.contains("Warning"), "{}", run.errors);
    assert!(
        run.errors.contains("does not fit in 8 bits"),
        "{}",
        run.errors
    );
    assert_eq!(run.asm.sections()[0].content, vec![0]);
}

#[test]
fn negative_values_fit_slots_without_warning() {
    let run = assemble(".rawcode\n.byte -1\n.short -2\n");
    assert!(run.good, "errors: {}", run.errors);
    assert!(run.errors.is_empty(), "{}", run.errors);
    assert_eq!(run.asm.sections()[0].content, vec![0xff, 0xfe, 0xff]);
}

#[test]
fn disabled_warnings_are_suppressed() {
    let errors = SharedBuf::default();
    let prints = SharedBuf::default();
    let mut asm = Assembler::new(
        "test.s",
        b".rawcode\n.byte 256\n".to_vec(),
        BinaryFormat::Amd,
        GpuDeviceType::CapeVerde,
        Box::new(errors.clone()),
        Box::new(prints),
    );
    asm.set_warnings(false);
    assert!(asm.assemble());
    assert!(errors.text().is_empty());
    assert!(asm.diagnostics().is_empty());
}

#[test]
fn unresolved_data_reference_is_an_error() {
    let run = assemble(".int nosuch\n");
    assert!(!run.good);
    assert!(
        run.errors
            .contains("Expression contains unresolved symbol 'nosuch'"),
        "{}",
        run.errors
    );
}

#[test]
fn unresolved_symbol_assignment_is_not_an_error() {
    let run = assemble("a = nosuch+1\n");
    assert!(run.good, "errors: {}", run.errors);
    assert_sym(&run.asm, "a", 0, ASMSECT_ABS, false, false, false);
}

#[test]
fn eqv_cycle_is_reported() {
    let run = assemble(".eqv a, b+1\n.eqv b, a+1\n.int a\n");
    assert!(!run.good);
    assert!(
        run.errors.contains("Circular reference at symbol"),
        "{}",
        run.errors
    );
}

#[test]
fn amd_kernels_get_their_own_code_sections() {
    let run = assemble(".kernel vadd\n.byte 1\n.kernel vsub\n.byte 2, 3\n");
    assert!(run.good, "errors: {}", run.errors);
    assert_eq!(run.asm.kernel_names(), vec!["vadd", "vsub"]);
    // global data + two per-kernel code sections
    assert_eq!(run.asm.sections().len(), 3);
    assert_eq!(run.asm.sections()[1].content, vec![1]);
    assert_eq!(run.asm.sections()[2].content, vec![2, 3]);
    assert_eq!(run.asm.sections()[1].kernel_id, 0);
    assert_eq!(run.asm.sections()[2].kernel_id, 1);
}

#[test]
fn duplicate_kernel_is_an_error() {
    let run = assemble(".kernel k\n.kernel k\n");
    assert!(!run.good);
    assert!(run.errors.contains("Kernel 'k' is already defined"), "{}", run.errors);
}

#[test]
fn rawcode_rejects_kernels() {
    let run = assemble(".rawcode\n.kernel k\n");
    assert!(!run.good);
    assert!(
        run.errors.contains("Kernels are not allowed in raw code format"),
        "{}",
        run.errors
    );
}

#[test]
fn format_change_after_output_started_is_an_error() {
    let run = assemble(".byte 1\n.rawcode\n");
    assert!(!run.good);
    assert!(
        run.errors.contains("Output format has already been initialized"),
        "{}",
        run.errors
    );
}

#[test]
fn gallium_kernels_share_text_and_extra_sections() {
    let run = assemble(".gallium\n.kernel a\n.byte 1\n.kernel b\n.byte 2\n.comment\n.ascii \"hi\"\n");
    assert!(run.good, "errors: {}", run.errors);
    assert_eq!(run.asm.kernel_names(), vec!["a", "b"]);
    assert_eq!(run.asm.sections()[0].content, vec![1, 2]);
    let comment = run
        .asm
        .sections()
        .iter()
        .find(|s| s.section_type == AsmSectionType::GalliumComment)
        .expect("comment section");
    assert_eq!(comment.content, b"hi");
}

#[test]
fn print_directive_writes_to_print_stream() {
    let run = assemble(".print \"hello\"\n.print \"world\"\n");
    assert!(run.good, "errors: {}", run.errors);
    assert_eq!(run.prints, "hello\nworld\n");
}

#[test]
fn output_counter_assignment_pads_with_zeros() {
    let run = assemble(".rawcode\n.byte 1\n. = 4\n.byte 5\n");
    assert!(run.good, "errors: {}", run.errors);
    assert_eq!(run.asm.sections()[0].content, vec![1, 0, 0, 0, 5]);
}

#[test]
fn output_counter_cannot_move_backwards() {
    let run = assemble(".rawcode\n.byte 1, 2\n. = 1\n");
    assert!(!run.good);
    assert!(
        run.errors.contains("Output counter cannot be moved backwards"),
        "{}",
        run.errors
    );
}

#[test]
fn expression_operators_and_precedence() {
    let run = assemble(
        r#"a = 2+3*4
        b = (2+3)*4
        c = 1 ? 2 : 3
        d = 0 ? 2 : 3
        e = 10/3
        f = 10/@3
        g = 7 & ~1
        h = 1 << 4
        i = -16 >>> 2
        j = -16 >> 60
        k = 5 ! 2
        l = 3 < 5
        m = -1 <@ 1
        n = -1 < 1
        o = 2 == 2 && 3 != 4
        p = 0 || 1
        q = 1 ? 2 : 3 ? 4 : 5"#,
    );
    assert!(run.good, "errors: {}", run.errors);
    assert_eq!(sym(&run.asm, "a").value, 14);
    assert_eq!(sym(&run.asm, "b").value, 20);
    assert_eq!(sym(&run.asm, "c").value, 2);
    assert_eq!(sym(&run.asm, "d").value, 3);
    assert_eq!(sym(&run.asm, "e").value, 3);
    assert_eq!(sym(&run.asm, "f").value, 3);
    assert_eq!(sym(&run.asm, "g").value, 6);
    assert_eq!(sym(&run.asm, "h").value, 16);
    assert_eq!(sym(&run.asm, "i").value, (-4i64) as u64);
    assert_eq!(sym(&run.asm, "j").value, 15);
    assert_eq!(sym(&run.asm, "k").value, 5 | !2u64);
    assert_eq!(sym(&run.asm, "l").value, 1);
    assert_eq!(sym(&run.asm, "m").value, 0);
    assert_eq!(sym(&run.asm, "n").value, 1);
    assert_eq!(sym(&run.asm, "o").value, 1);
    assert_eq!(sym(&run.asm, "p").value, 1);
    assert_eq!(sym(&run.asm, "q").value, 2);
}

#[test]
fn character_and_string_data() {
    let run = assemble(".rawcode\n.byte 'A', '\\n'\n.ascii \"AB\"\n.asciz \"C\"\n");
    assert!(run.good, "errors: {}", run.errors);
    assert_eq!(
        run.asm.sections()[0].content,
        vec![0x41, 0x0a, 0x41, 0x42, 0x43, 0x00]
    );
}

#[test]
fn fill_and_skip_reserve_bytes() {
    let run = assemble(".rawcode\n.fill 2, 2, 0x1234\n.skip 3, 0xff\n.skip 1\n");
    assert!(run.good, "errors: {}", run.errors);
    assert_eq!(
        run.asm.sections()[0].content,
        vec![0x34, 0x12, 0x34, 0x12, 0xff, 0xff, 0xff, 0x00]
    );
}

#[test]
fn quad_and_short_emit_little_endian() {
    let run = assemble(".rawcode\n.short 0x1234\n.quad 0x1122334455667788\n");
    assert!(run.good, "errors: {}", run.errors);
    assert_eq!(
        run.asm.sections()[0].content,
        vec![0x34, 0x12, 0x88, 0x77, 0x66, 0x55, 0x44, 0x33, 0x22, 0x11]
    );
}

#[test]
fn statement_separator_splits_statements() {
    let run = assemble(".rawcode\n.byte 1; .byte 2\nsym = 5; .byte sym\n");
    assert!(run.good, "errors: {}", run.errors);
    assert_eq!(run.asm.sections()[0].content, vec![1, 2, 5]);
}

#[test]
fn semicolon_inside_string_is_not_a_separator() {
    let run = assemble(".rawcode\n.ascii \"a;b\"\n");
    assert!(run.good, "errors: {}", run.errors);
    assert_eq!(run.asm.sections()[0].content, b"a;b");
}

#[test]
fn line_continuation_and_comments_in_expressions() {
    let run = assemble("a = 1 + \\\n    2\nb = 3 /* three */ + 4\n");
    assert!(run.good, "errors: {}", run.errors);
    assert_eq!(sym(&run.asm, "a").value, 3);
    assert_eq!(sym(&run.asm, "b").value, 7);
}

#[test]
fn garbage_after_pseudo_op_is_reported() {
    let run = assemble(".rawcode\n.byte 1 x\n");
    assert!(!run.good);
    assert!(
        run.errors
            .contains("Garbages at end of line with pseudo-op"),
        "{}",
        run.errors
    );
}

#[test]
fn unknown_pseudo_op_and_mnemonic_are_reported() {
    let run = assemble(".nosuchop\n");
    assert!(!run.good);
    assert!(run.errors.contains("Unknown pseudo-op '.nosuchop'"), "{}", run.errors);

    let run = assemble("v_add_f32 v0, v1, v2\n");
    assert!(!run.good);
    assert!(run.errors.contains("Unknown mnemonic 'v_add_f32'"), "{}", run.errors);
}

#[test]
fn reserved_names_cannot_be_defined() {
    let run = assemble(".byte = 5\n");
    assert!(!run.good);
    assert!(run.errors.contains("reserved name"), "{}", run.errors);
}

#[test]
fn initial_defsyms_are_visible_to_the_first_line() {
    let errors = SharedBuf::default();
    let prints = SharedBuf::default();
    let mut asm = Assembler::new(
        "test.s",
        b"a = FOO+1\n".to_vec(),
        BinaryFormat::Amd,
        GpuDeviceType::CapeVerde,
        Box::new(errors.clone()),
        Box::new(prints),
    );
    asm.add_initial_defsym("FOO", 41);
    assert!(asm.assemble(), "errors: {}", errors.text());
    assert_eq!(sym(&asm, "a").value, 42);
}

#[test]
fn invalid_defsym_is_reported_before_source() {
    let errors = SharedBuf::default();
    let prints = SharedBuf::default();
    let mut asm = Assembler::new(
        "test.s",
        b"\n".to_vec(),
        BinaryFormat::Amd,
        GpuDeviceType::CapeVerde,
        Box::new(errors.clone()),
        Box::new(prints),
    );
    asm.add_initial_defsym("not a name", 1);
    assert!(!asm.assemble());
    assert!(
        errors.text().starts_with("<command-line>: Error:"),
        "{}",
        errors.text()
    );
}

#[test]
fn global_size_and_type_set_symbol_metadata() {
    let run = assemble("a = 5\n.globl a\n.size a, 16\n.type a, @object\n");
    assert!(run.good, "errors: {}", run.errors);
    let s = sym(&run.asm, "a");
    assert_eq!(s.info, SYM_BIND_GLOBAL | SYM_TYPE_OBJECT);
    assert_eq!(s.size, 16);
}

#[test]
fn symbols_json_reports_definition_state() {
    let run = assemble("a = 5\nb = undef1\n");
    let report = run.asm.symbols_json();
    let symbols = report["symbols"].as_array().expect("symbols array");
    let a = symbols
        .iter()
        .find(|s| s["name"] == "a")
        .expect("a present");
    assert_eq!(a["value"], 5);
    assert_eq!(a["defined"], true);
    let b = symbols
        .iter()
        .find(|s| s["name"] == "b")
        .expect("b present");
    assert_eq!(b["defined"], false);
}

#[test]
fn macro_errors_point_at_the_invocation_site() {
    let src = ".macro bad\n.byte novalue\n.endm\nbad\n";
    let run = assemble(src);
    assert!(!run.good);
    assert!(
        run.errors.contains("In macro substituted from test.s:4:1:"),
        "{}",
        run.errors
    );
}

#[test]
fn write_binary_dumps_rawcode_section() {
    let run = assemble(".rawcode\n.byte 1, 2, 3\n");
    assert!(run.good, "errors: {}", run.errors);
    let mut out = Vec::new();
    run.asm.write_binary(&mut out).expect("write");
    assert_eq!(out, vec![1, 2, 3]);
}

#[test]
fn split_statements_honours_quotes() {
    let line = b".ascii \"a;b\"; .byte 1";
    let stmts = split_statements(line);
    assert_eq!(stmts.len(), 2);
    assert_eq!(&line[stmts[0].0..stmts[0].1], b".ascii \"a;b\"".as_slice());
    assert_eq!(&line[stmts[1].0..stmts[1].1], b" .byte 1".as_slice());
}
