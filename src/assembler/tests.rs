// SPDX-License-Identifier: GPL-3.0-or-later

//! Engine tests: instruction encodings, directives, scopes,
//! conditionals, macros and pass behavior.

use std::fs;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use super::Asm;
use crate::core::error::{AsmError, Severity};

fn assemble(src: &str) -> Asm {
    let mut asm = Asm::new();
    asm.load_source("test.asm", src).expect("load");
    asm.process().expect("assemble");
    asm
}

fn code(src: &str) -> Vec<u8> {
    assemble(src).code().to_vec()
}

fn asm_err(src: &str) -> AsmError {
    let mut asm = Asm::new();
    asm.load_source("test.asm", src).expect("load");
    asm.process().expect_err("expected an assembly error")
}

fn has_warning(asm: &Asm, needle: &str) -> bool {
    asm.diagnostics()
        .iter()
        .any(|d| d.severity == Severity::Warning && d.message.contains(needle))
}

fn temp_path(name: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let pid = std::process::id();
    std::env::temp_dir().join(format!("z80forge-test-{pid}-{nanos}-{name}"))
}

// ----- Instruction encodings. -----

#[test]
fn encodes_ld_register_forms() {
    assert_eq!(code("LD A, 5\n"), vec![0x3E, 0x05]);
    assert_eq!(code("LD B, A\n"), vec![0x47]);
    assert_eq!(code("LD H, (HL)\n"), vec![0x66]);
    assert_eq!(code("LD (HL), 5\n"), vec![0x36, 0x05]);
    assert_eq!(code("LD A, (BC)\n"), vec![0x0A]);
    assert_eq!(code("LD A, (DE)\n"), vec![0x1A]);
    assert_eq!(code("LD E, (IX+2)\n"), vec![0xDD, 0x5E, 0x02]);
    assert_eq!(code("LD (IY-1), C\n"), vec![0xFD, 0x71, 0xFF]);
    assert_eq!(code("LD (IX+5), 10H\n"), vec![0xDD, 0x36, 0x05, 0x10]);
    assert_eq!(code("LD IXH, 5\n"), vec![0xDD, 0x26, 0x05]);
    assert_eq!(code("LD IXL, B\n"), vec![0xDD, 0x68]);
}

#[test]
fn encodes_ld_absolute_forms() {
    assert_eq!(code("LD A, (1234H)\n"), vec![0x3A, 0x34, 0x12]);
    assert_eq!(code("LD (1234H), A\n"), vec![0x32, 0x34, 0x12]);
    assert_eq!(code("LD HL, (1234H)\n"), vec![0x2A, 0x34, 0x12]);
    assert_eq!(code("LD (1234H), HL\n"), vec![0x22, 0x34, 0x12]);
    assert_eq!(code("LD BC, (1234H)\n"), vec![0xED, 0x4B, 0x34, 0x12]);
    assert_eq!(code("LD (1234H), SP\n"), vec![0xED, 0x73, 0x34, 0x12]);
    assert_eq!(code("LD IX, (1234H)\n"), vec![0xDD, 0x2A, 0x34, 0x12]);
}

#[test]
fn encodes_ld_16bit_and_special() {
    assert_eq!(code("LD HL, 1234H\n"), vec![0x21, 0x34, 0x12]);
    assert_eq!(code("LD SP, 8000H\n"), vec![0x31, 0x00, 0x80]);
    assert_eq!(code("LD SP, HL\n"), vec![0xF9]);
    assert_eq!(code("LD SP, IX\n"), vec![0xDD, 0xF9]);
    assert_eq!(code("LD IY, 5\n"), vec![0xFD, 0x21, 0x05, 0x00]);
    assert_eq!(code("LD A, I\n"), vec![0xED, 0x57]);
    assert_eq!(code("LD I, A\n"), vec![0xED, 0x47]);
    assert_eq!(code("LD R, A\n"), vec![0xED, 0x4F]);
    assert_eq!(code("LD (BC), A\n"), vec![0x02]);
    assert_eq!(code("LD (DE), A\n"), vec![0x12]);
}

#[test]
fn encodes_byte_arithmetic() {
    assert_eq!(code("ADD A, B\n"), vec![0x80]);
    assert_eq!(code("ADD A, 5\n"), vec![0xC6, 0x05]);
    assert_eq!(code("ADD A, (HL)\n"), vec![0x86]);
    assert_eq!(code("ADC A, (IX+1)\n"), vec![0xDD, 0x8E, 0x01]);
    assert_eq!(code("SUB 5\n"), vec![0xD6, 0x05]);
    assert_eq!(code("SBC A, C\n"), vec![0x99]);
    assert_eq!(code("AND 0FH\n"), vec![0xE6, 0x0F]);
    assert_eq!(code("XOR A\n"), vec![0xAF]);
    assert_eq!(code("OR B\n"), vec![0xB0]);
    assert_eq!(code("CP (HL)\n"), vec![0xBE]);
}

#[test]
fn encodes_16bit_arithmetic() {
    assert_eq!(code("ADD HL, DE\n"), vec![0x19]);
    assert_eq!(code("ADD HL, SP\n"), vec![0x39]);
    assert_eq!(code("ADC HL, BC\n"), vec![0xED, 0x4A]);
    assert_eq!(code("SBC HL, DE\n"), vec![0xED, 0x52]);
    assert_eq!(code("ADD IX, BC\n"), vec![0xDD, 0x09]);
    assert_eq!(code("ADD IY, IY\n"), vec![0xFD, 0x29]);
}

#[test]
fn encodes_inc_dec() {
    assert_eq!(code("INC A\n"), vec![0x3C]);
    assert_eq!(code("DEC B\n"), vec![0x05]);
    assert_eq!(code("INC HL\n"), vec![0x23]);
    assert_eq!(code("DEC SP\n"), vec![0x3B]);
    assert_eq!(code("INC (HL)\n"), vec![0x34]);
    assert_eq!(code("INC (IX+2)\n"), vec![0xDD, 0x34, 0x02]);
    assert_eq!(code("DEC IY\n"), vec![0xFD, 0x2B]);
    assert_eq!(code("INC IXL\n"), vec![0xDD, 0x2C]);
}

#[test]
fn encodes_stack_and_exchange() {
    assert_eq!(code("PUSH BC\n"), vec![0xC5]);
    assert_eq!(code("POP AF\n"), vec![0xF1]);
    assert_eq!(code("PUSH IX\n"), vec![0xDD, 0xE5]);
    assert_eq!(code("EX DE, HL\n"), vec![0xEB]);
    assert_eq!(code("EX AF, AF'\n"), vec![0x08]);
    assert_eq!(code("EX (SP), HL\n"), vec![0xE3]);
    assert_eq!(code("EX (SP), IY\n"), vec![0xFD, 0xE3]);
}

#[test]
fn encodes_jumps_and_calls() {
    assert_eq!(code("CALL 1234H\n"), vec![0xCD, 0x34, 0x12]);
    assert_eq!(code("CALL NZ, 1234H\n"), vec![0xC4, 0x34, 0x12]);
    assert_eq!(code("RET\n"), vec![0xC9]);
    assert_eq!(code("RET Z\n"), vec![0xC8]);
    assert_eq!(code("JP 1234H\n"), vec![0xC3, 0x34, 0x12]);
    assert_eq!(code("JP C, 1234H\n"), vec![0xDA, 0x34, 0x12]);
    assert_eq!(code("JP (HL)\n"), vec![0xE9]);
    assert_eq!(code("JP (IX)\n"), vec![0xDD, 0xE9]);
    assert_eq!(code("RST 38H\n"), vec![0xFF]);
    assert_eq!(code("RST 8\n"), vec![0xCF]);
    assert_eq!(code("IM 1\n"), vec![0xED, 0x56]);
}

#[test]
fn encodes_relative_jumps() {
    assert_eq!(code("ORG 0\nJR $\n"), vec![0x18, 0xFE]);
    assert_eq!(code("ORG 0\nJR NZ, $\n"), vec![0x20, 0xFE]);
    assert_eq!(code("ORG 0\nDJNZ $\n"), vec![0x10, 0xFE]);
    assert_eq!(
        code("ORG 0\nloop: NOP\nJR loop\n"),
        vec![0x00, 0x18, 0xFD]
    );
}

#[test]
fn relative_jump_out_of_range_fails() {
    let err = asm_err("ORG 0\nJR 200H\n");
    assert!(err.message().contains("Relative jump out of range"));
}

#[test]
fn jr_rejects_parity_flags() {
    let err = asm_err("JR PE, 0\n");
    assert!(err.message().contains("Invalid flag for JR"));
}

#[test]
fn encodes_rotates_and_bits() {
    assert_eq!(code("RLC B\n"), vec![0xCB, 0x00]);
    assert_eq!(code("RL C\n"), vec![0xCB, 0x11]);
    assert_eq!(code("SRL (HL)\n"), vec![0xCB, 0x3E]);
    assert_eq!(code("SLA A\n"), vec![0xCB, 0x27]);
    assert_eq!(code("BIT 7, A\n"), vec![0xCB, 0x7F]);
    assert_eq!(code("SET 0, B\n"), vec![0xCB, 0xC0]);
    assert_eq!(code("RES 1, (IX+2)\n"), vec![0xDD, 0xCB, 0x02, 0x8E]);
}

#[test]
fn bit_position_is_checked() {
    let err = asm_err("BIT 8, A\n");
    assert!(err.message().contains("Bit position out of range"));
}

#[test]
fn encodes_io() {
    assert_eq!(code("IN A, (0FEH)\n"), vec![0xDB, 0xFE]);
    assert_eq!(code("IN B, (C)\n"), vec![0xED, 0x40]);
    assert_eq!(code("OUT (0FEH), A\n"), vec![0xD3, 0xFE]);
    assert_eq!(code("OUT (C), E\n"), vec![0xED, 0x59]);
}

#[test]
fn encodes_simple_instructions() {
    assert_eq!(code("NOP\n"), vec![0x00]);
    assert_eq!(code("HALT\n"), vec![0x76]);
    assert_eq!(code("DI\nEI\n"), vec![0xF3, 0xFB]);
    assert_eq!(code("EXX\n"), vec![0xD9]);
    assert_eq!(code("LDIR\n"), vec![0xED, 0xB0]);
    assert_eq!(code("NEG\n"), vec![0xED, 0x44]);
    assert_eq!(code("RETI\n"), vec![0xED, 0x4D]);
    assert_eq!(code("RLD\n"), vec![0xED, 0x6F]);
    assert_eq!(code("CCF\nSCF\nCPL\nDAA\n"), vec![0x3F, 0x37, 0x2F, 0x27]);
}

#[test]
fn offset_range_is_checked() {
    assert!(asm_err("LD A, (IX+300)\n")
        .message()
        .contains("Offset out of range"));
    assert!(asm_err("LD A, (IX-129)\n")
        .message()
        .contains("Offset out of range"));
    // Positive offsets above 127 are admitted as byte values.
    assert_eq!(code("LD A, (IX+0FFH)\n"), vec![0xDD, 0x7E, 0xFF]);
}

// ----- Data directives. -----

#[test]
fn defb_emits_bytes_strings_and_expressions() {
    assert_eq!(code("DEFB 1, 2, 3, 4\n"), vec![1, 2, 3, 4]);
    assert_eq!(code("DEFB \"AB\", 0\n"), vec![0x41, 0x42, 0x00]);
    assert_eq!(code("DEFB 'E' + 1\n"), vec![0x46]);
    assert_eq!(code("DB 10H\n"), vec![0x10]);
    assert_eq!(code("DEFM \"HI\"\n"), vec![0x48, 0x49]);
}

#[test]
fn defw_emits_little_endian_words() {
    assert_eq!(code("DEFW 1234H, 5\n"), vec![0x34, 0x12, 0x05, 0x00]);
    assert_eq!(code("DW 'AB'\n"), vec![0x41, 0x42]);
}

#[test]
fn defs_reserves_space() {
    assert_eq!(code("DEFS 3\n"), vec![0, 0, 0]);
    assert_eq!(code("DEFS 2, 0AAH\n"), vec![0xAA, 0xAA]);
    // Uninitialized reservation advances without touching memory.
    let asm = assemble("ORG 0\nDEFB 1\nDEFS 2, ?\nDEFB 2\n");
    assert_eq!(asm.min_used(), 0);
    assert_eq!(asm.max_used(), 3);
    assert_eq!(asm.peek_byte(0), 1);
    assert_eq!(asm.peek_byte(3), 2);
}

#[test]
fn defb_question_mark_skips_a_byte() {
    let asm = assemble("ORG 0\nDEFB 1, ?, 2\n");
    assert_eq!(asm.peek_byte(0), 1);
    assert_eq!(asm.peek_byte(2), 2);
    assert_eq!(asm.max_used(), 2);
}

// ----- Labels, EQU, DEFL, ORG. -----

#[test]
fn org_and_labels_place_code() {
    let asm = assemble("ORG 100H\nLD A, 5\nLD B, A\nRET\n");
    assert_eq!(asm.min_used(), 0x100);
    assert_eq!(asm.max_used(), 0x103);
    assert_eq!(asm.code(), &[0x3E, 0x05, 0x47, 0xC9]);
}

#[test]
fn labeled_org_defines_the_label_at_the_new_address() {
    let asm = assemble("here ORG 800H\nNOP\n");
    assert_eq!(asm.get_value("here"), Some(0x800));
    assert_eq!(asm.min_used(), 0x800);
}

#[test]
fn forward_references_resolve_on_pass_2() {
    let mut asm = Asm::new();
    asm.set_base(0x8000);
    asm.load_source("test.asm", "LD HL, foo\nfoo: NOP\n").unwrap();
    asm.process().unwrap();
    assert_eq!(asm.code(), &[0x21, 0x03, 0x80, 0x00]);
}

#[test]
fn label_points_at_start_of_data() {
    let asm = assemble("label: DEFB 1, 2, 3, 4\nLD HL, label\n");
    let code = asm.code();
    assert_eq!(&code[code.len() - 3..], &[0x21, 0x00, 0x00]);
}

#[test]
fn equ_defines_and_rejects_redefinition() {
    let asm = assemble("five EQU 5\nLD A, five\n");
    assert_eq!(asm.code(), &[0x3E, 0x05]);

    let err = asm_err("x EQU 1\nx EQU 2\n");
    assert!(err.message().contains("previously defined as EQU or label"));
}

#[test]
fn defl_reassigns_but_equ_conflicts() {
    assert_eq!(
        code("v DEFL 1\nDEFB v\nv DEFL v + 1\nDEFB v\n"),
        vec![1, 2]
    );
    let err = asm_err("v DEFL 1\nv EQU 2\n");
    assert!(err.message().contains("previously defined as DEFL"));
    let err = asm_err("v EQU 1\nv DEFL 2\n");
    assert!(err.message().contains("previously defined as EQU"));
}

#[test]
fn equ_without_label_is_an_error() {
    assert!(asm_err("EQU 5\n").message().contains("EQU without label"));
    assert!(asm_err("DEFL 5\n").message().contains("DEFL without label"));
}

#[test]
fn undefined_symbol_fails_on_pass_2() {
    let err = asm_err("LD A, nowhere\n");
    assert!(err.message().contains("Undefined symbol 'nowhere'"));
}

#[test]
fn predefines_behave_like_equ() {
    let mut asm = Asm::new();
    asm.predefine("DEBUG=1").unwrap();
    asm.load_source("test.asm", "IF DEBUG\nDEFB 1\nELSE\nDEFB 2\nENDIF\n")
        .unwrap();
    asm.process().unwrap();
    assert_eq!(asm.code(), &[1]);

    let mut asm = Asm::new();
    asm.predefine("FLAG").unwrap();
    asm.load_source("test.asm", "DEFB FLAG AND 1\n").unwrap();
    asm.process().unwrap();
    assert_eq!(asm.code(), &[1]);
}

#[test]
fn predefined_symbols_cannot_be_redefined() {
    let mut asm = Asm::new();
    asm.predefine("FIXED=2").unwrap();
    asm.load_source("test.asm", "FIXED EQU 3\n").unwrap();
    let err = asm.process().unwrap_err();
    assert!(err.message().contains("is predefined"));
}

// ----- Expressions. -----

#[test]
fn expression_precedence_and_wrapping() {
    assert_eq!(code("DEFB 2 + 3 * 4\n"), vec![14]);
    assert_eq!(code("DEFW 1 SHL 8\n"), vec![0x00, 0x01]);
    assert_eq!(code("DEFB 7 MOD 4\n"), vec![3]);
    assert_eq!(code("DEFB 255 AND 0FH\n"), vec![0x0F]);
    assert_eq!(code("DEFB 1 OR 2\n"), vec![3]);
    assert_eq!(code("DEFB HIGH 1234H\n"), vec![0x12]);
    assert_eq!(code("DEFB LOW 1234H\n"), vec![0x34]);
    assert_eq!(code("DEFW -1\n"), vec![0xFF, 0xFF]);
    assert_eq!(code("DEFW NOT 0\n"), vec![0xFF, 0xFF]);
}

#[test]
fn comparisons_yield_ffff_or_zero() {
    assert_eq!(code("DEFW 1 = 1\n"), vec![0xFF, 0xFF]);
    assert_eq!(code("DEFW 1 > 2\n"), vec![0x00, 0x00]);
    assert_eq!(code("DEFW 1 <> 2\n"), vec![0xFF, 0xFF]);
    assert_eq!(code("DEFW 3 <= 3\n"), vec![0xFF, 0xFF]);
}

#[test]
fn ternary_selects_a_branch() {
    assert_eq!(code("DEFB 1 ? 10 : 20\n"), vec![10]);
    assert_eq!(code("DEFB 0 ? 10 : 20\n"), vec![20]);
}

#[test]
fn division_by_zero_is_reported() {
    let err = asm_err("DEFB 1 / 0\n");
    assert!(err.message().contains("Division by zero"));
    let err = asm_err("DEFB 1 MOD 0\n");
    assert!(err.message().contains("Division by zero"));
}

#[test]
fn short_circuit_guards_skip_undefined_symbols() {
    // The right side of && is ignored once the left is false.
    assert_eq!(code("DEFW DEFINED X && X = 0\n"), vec![0x00, 0x00]);
    // A DEFINED probe shields the guarded comparison entirely.
    assert_eq!(code("DEFW DEFINED X || X = 0\n"), vec![0xFF, 0xFF]);
    // Division by zero inside an ignored branch stays silent.
    assert_eq!(code("DEFW 1 || 1 / 0\n"), vec![0xFF, 0xFF]);
}

#[test]
fn nul_tests_for_an_empty_rest_of_line() {
    assert_eq!(code("DEFW NUL\n"), vec![0xFF, 0xFF]);
    assert_eq!(code("DEFW NUL something\n"), vec![0x00, 0x00]);
}

#[test]
fn dollar_is_the_current_instruction_address() {
    let asm = assemble("ORG 200H\nDEFW $\nhere EQU $\n");
    assert_eq!(asm.code(), &[0x00, 0x02]);
    assert_eq!(asm.get_value("here"), Some(0x202));
}

#[test]
fn char_literals_pack_into_words() {
    assert_eq!(code("DEFW 'A'\n"), vec![0x41, 0x00]);
    assert_eq!(code("DEFW 'AB'\n"), vec![0x41, 0x42]);
}

// ----- Conditionals. -----

#[test]
fn if_else_endif_selects_branches() {
    assert_eq!(code("IF 0\nDEFB 0FFH\nELSE\nDEFB 0AAH\nENDIF\n"), vec![0xAA]);
    assert_eq!(code("IF 1\nDEFB 0FFH\nELSE\nDEFB 0AAH\nENDIF\n"), vec![0xFF]);
}

#[test]
fn conditionals_nest() {
    let src = "IF 1\nIF 0\nDEFB 1\nELSE\nDEFB 2\nENDIF\nDEFB 3\nENDIF\n";
    assert_eq!(code(src), vec![2, 3]);
    let src = "IF 0\nIF 1\nDEFB 1\nENDIF\nDEFB 2\nELSE\nDEFB 3\nENDIF\n";
    assert_eq!(code(src), vec![3]);
}

#[test]
fn ifdef_and_ifndef() {
    assert_eq!(code("x EQU 1\nIFDEF x\nDEFB 1\nELSE\nDEFB 2\nENDIF\n"), vec![1]);
    assert_eq!(code("IFDEF nope\nDEFB 1\nELSE\nDEFB 2\nENDIF\n"), vec![2]);
    assert_eq!(code("IFNDEF nope\nDEFB 1\nELSE\nDEFB 2\nENDIF\n"), vec![1]);
}

#[test]
fn unbalanced_conditionals_are_errors() {
    assert!(asm_err("IF 1\nDEFB 1\n").message().contains("IF without ENDIF"));
    assert!(asm_err("ENDIF\n").message().contains("ENDIF without IF"));
    assert!(asm_err("ELSE\n").message().contains("ELSE without IF"));
}

// ----- PROC / LOCAL / auto-local scopes. -----

#[test]
fn proc_local_restores_outer_bindings() {
    let src = "\
value EQU 1
PROC
LOCAL value
value EQU 2
DEFB value
ENDP
DEFB value
";
    assert_eq!(code(src), vec![2, 1]);
}

#[test]
fn local_labels_differ_between_procs() {
    let src = "\
ORG 0
PROC
LOCAL loop
loop: NOP
JP loop
ENDP
PROC
LOCAL loop
loop: NOP
JP loop
ENDP
";
    assert_eq!(
        code(src),
        vec![0x00, 0xC3, 0x00, 0x00, 0x00, 0xC3, 0x04, 0x00]
    );
}

#[test]
fn endp_without_proc_is_an_error() {
    assert!(asm_err("ENDP\n").message().contains("Unbalanced ENDP"));
}

#[test]
fn unclosed_proc_is_an_error() {
    assert!(asm_err("PROC\nNOP\n").message().contains("Unbalanced PROC"));
}

#[test]
fn auto_local_names_are_scoped_between_globals() {
    let src = "\
ORG 0
first: NOP
_x: NOP
JP _x
second: NOP
_x: NOP
JP _x
";
    let mut asm = Asm::new();
    asm.auto_local();
    asm.load_source("test.asm", src).unwrap();
    asm.process().unwrap();
    // Each _x binds inside its own auto block, reopened after the next
    // global label.
    assert_eq!(
        asm.code(),
        &[0x00, 0x00, 0xC3, 0x01, 0x00, 0x00, 0x00, 0xC3, 0x06, 0x00]
    );
}

#[test]
fn endp_warns_about_unused_locals() {
    let src = "\
PROC
LOCAL unused
unused EQU 5
ENDP
NOP
";
    let asm = assemble(src);
    assert!(has_warning(&asm, "Local var unused is never used"));
}

// ----- Macros. -----

#[test]
fn macro_expands_with_parameters() {
    let src = "\
move MACRO dst, src
LD dst, src
ENDM
move A, 5
move B, A
";
    assert_eq!(code(src), vec![0x3E, 0x05, 0x47]);
}

#[test]
fn macro_directive_first_style() {
    let src = "\
MACRO store, value
DEFB value
ENDM
store 7
";
    assert_eq!(code(src), vec![7]);
}

#[test]
fn macro_invocation_with_label() {
    let src = "\
emit MACRO v
DEFB v
ENDM
here: emit 9
LD HL, here
";
    let asm = assemble(src);
    assert_eq!(asm.get_value("here"), Some(asm.min_used()));
    assert_eq!(asm.code()[0], 9);
}

#[test]
fn macro_missing_arguments_expand_to_nothing() {
    let src = "\
pair MACRO a, b
DEFB a b
ENDM
pair 1
";
    // `b` expands to nothing, leaving `DEFB 1`.
    assert_eq!(code(src), vec![1]);
}

#[test]
fn macro_sharp_sharp_builds_identifiers() {
    let src = "\
def MACRO name, value
lbl ## name EQU value
ENDM
def one, 1
def two, 2
DEFB lblone, lbltwo
";
    assert_eq!(code(src), vec![1, 2]);
}

#[test]
fn macro_ampersand_splices_into_strings() {
    let src = "\
greet MACRO who
DEFM \"hi &who\"
ENDM
greet bob
";
    assert_eq!(code(src), b"hi bob".to_vec());
}

#[test]
fn rept_with_counter() {
    assert_eq!(code("REPT 3, i\nDEFB i\nENDM\n"), vec![0, 1, 2]);
    assert_eq!(code("REPT 3, i, 5, 10\nDEFB i\nENDM\n"), vec![5, 15, 25]);
    assert_eq!(code("REPT 2\nDEFB 7\nENDM\n"), vec![7, 7]);
}

#[test]
fn rept_zero_skips_the_body() {
    assert_eq!(code("REPT 0\nDEFB 1\nENDM\nDEFB 2\n"), vec![2]);
}

#[test]
fn irp_iterates_over_arguments() {
    assert_eq!(code("IRP x, 1, 2, 3\nDEFB x\nENDM\n"), vec![1, 2, 3]);
    let src = "IRP r, B, C, D\nINC r\nENDM\n";
    assert_eq!(code(src), vec![0x04, 0x0C, 0x14]);
}

#[test]
fn irp_without_arguments_is_an_error() {
    assert!(asm_err("IRP x,\nDEFB x\nENDM\n")
        .message()
        .contains("IRP without parameters"));
}

#[test]
fn irpc_iterates_over_characters() {
    assert_eq!(code("IRPC d, 123\nDEFB d\nENDM\n"), vec![1, 2, 3]);
    assert_eq!(code("IRPC c, \"AB\"\nDEFB 'c'\nENDM\n").len(), 2);
}

#[test]
fn exitm_stops_expansion() {
    let src = "\
m MACRO
DEFB 1
EXITM
DEFB 2
ENDM
m
DEFB 3
";
    assert_eq!(code(src), vec![1, 3]);
    assert_eq!(code("REPT 5\nDEFB 1\nEXITM\nENDM\nDEFB 9\n"), vec![1, 9]);
}

#[test]
fn shift_consumes_macro_arguments() {
    let src = "\
bytes MACRO a, b, c
DEFB a
.SHIFT
DEFB a
.SHIFT
DEFB a
ENDM
bytes 1, 2, 3
";
    assert_eq!(code(src), vec![1, 2, 3]);
}

#[test]
fn shift_outside_macro_is_an_error() {
    assert!(asm_err(".SHIFT\n").message().contains(".SHIFT outside MACRO"));
}

#[test]
fn rept_inside_macro_sees_outer_parameters() {
    let src = "\
fill MACRO n, v
REPT n
DEFB v
ENDM
ENDM
fill 3, 0AAH
";
    assert_eq!(code(src), vec![0xAA, 0xAA, 0xAA]);
}

#[test]
fn nested_macro_invocations() {
    let src = "\
inner MACRO x
DEFB x
ENDM
outer MACRO y
inner y
inner y + 1
ENDM
outer 5
";
    assert_eq!(code(src), vec![5, 6]);
}

#[test]
fn conditionals_inside_macro_bodies() {
    let src = "\
pick MACRO f
IF f
DEFB 1
ELSE
DEFB 2
ENDIF
ENDM
pick 1
pick 0
";
    assert_eq!(code(src), vec![1, 2]);
}

#[test]
fn unterminated_if_inside_macro_is_closed_on_exit() {
    let src = "\
open MACRO f
IF f
DEFB 1
ENDM
open 1
DEFB 2
";
    // The IF left open inside the body does not leak out.
    assert_eq!(code(src), vec![1, 2]);
}

#[test]
fn macro_without_endm_is_an_error() {
    assert!(asm_err("m MACRO\nDEFB 1\n")
        .message()
        .contains("MACRO without ENDM"));
    assert!(asm_err("REPT 2\nDEFB 1\n")
        .message()
        .contains("REPT without ENDM"));
    assert!(asm_err("ENDM\n").message().contains("ENDM outside of MACRO"));
}

#[test]
fn macro_redefinition_replaces_the_body() {
    let src = "\
m MACRO
DEFB 1
ENDM
m MACRO
DEFB 2
ENDM
m
";
    assert_eq!(code(src), vec![2]);
}

// ----- Pass behavior. -----

#[test]
fn two_passes_by_default() {
    let asm = assemble("NOP\n");
    assert_eq!(asm.last_pass(), 2);
    assert_eq!(asm.pass(), 2);
}

#[test]
fn phase_change_escalates_to_three_passes() {
    let src = "\
ORG 0
size EQU limit >= 3 ? 2 : 0
DEFB 1, 2, 3
DEFS size, 0AAH
limit: NOP
";
    let asm = assemble(src);
    assert_eq!(asm.last_pass(), 3);
    assert!(has_warning(&asm, "Switching to 3 pass mode"));
    assert_eq!(asm.code(), &[1, 2, 3, 0xAA, 0xAA, 0x00]);
    assert_eq!(asm.get_value("limit"), Some(5));
}

#[test]
fn forced_three_passes_match_two_pass_output() {
    let src = "ORG 100H\nstart: LD HL, data\ndata: DEFW start\n";
    let two = assemble(src);
    let mut asm = Asm::new();
    asm.set_pass3();
    asm.load_source("test.asm", src).unwrap();
    asm.process().unwrap();
    assert_eq!(two.code(), asm.code());
    assert_eq!(asm.last_pass(), 3);
}

#[test]
fn end_directive_sets_entry_point_and_stops() {
    let asm = assemble("ORG 100H\nstart: RET\nEND start\nDEFB 0FFH\n");
    assert!(asm.has_entry_point());
    assert_eq!(asm.entry_point(), 0x100);
    // The line after END was not assembled.
    assert_eq!(asm.code(), &[0xC9]);
}

#[test]
fn final_check_warns_on_unused_symbols() {
    let asm = assemble("orphan EQU 5\nNOP\n");
    assert!(has_warning(&asm, "Var orphan is never used"));

    let asm = assemble("PUBLIC exported\nexported EQU 5\nNOP\n");
    assert!(!has_warning(&asm, "Var exported is never used"));
}

#[test]
fn werror_promotes_warnings() {
    let mut asm = Asm::new();
    asm.set_werror();
    asm.load_source("test.asm", "orphan EQU 5\nNOP\n").unwrap();
    let err = asm.process().unwrap_err();
    assert!(err.message().contains("Warning treated as error"));
}

// ----- Modes. -----

#[test]
fn warn_8080_flags_z80_only_instructions() {
    let mut asm = Asm::new();
    asm.warn_8080();
    asm.load_source("test.asm", "ORG 0\nEXX\nJR $\nNOP\n").unwrap();
    asm.process().unwrap();
    assert!(has_warning(&asm, "not a 8080 instruction"));
}

#[test]
fn mode86_translates_common_instructions() {
    let mut asm = Asm::new();
    asm.set_86();
    asm.load_source("test.asm", "ORG 0\nNOP\nLD A, 5\nRET\n").unwrap();
    asm.process().unwrap();
    assert_eq!(asm.code(), &[0x90, 0xB0, 0x05, 0xC3]);
}

#[test]
fn mode86_translates_jumps_with_offsets() {
    let mut asm = Asm::new();
    asm.set_86();
    asm.load_source("test.asm", "ORG 0\nJP 1000H\n").unwrap();
    asm.process().unwrap();
    // JMP rel16: target - (pc + 3).
    assert_eq!(asm.code(), &[0xE9, 0xFD, 0x0F]);
}

#[test]
fn mode86_rejects_untranslatable_instructions() {
    let mut asm = Asm::new();
    asm.set_86();
    asm.load_source("test.asm", "EXX\n").unwrap();
    let err = asm.process().unwrap_err();
    assert!(err.message().contains("not valid in 86 mode"));
}

#[test]
fn bracket_only_mode_makes_parens_group() {
    let mut asm = Asm::new();
    asm.bracket_only();
    asm.load_source("test.asm", "LD A, (5)\nLD A, [HL]\n").unwrap();
    asm.process().unwrap();
    // (5) is an expression, [HL] the memory operand.
    assert_eq!(asm.code(), &[0x3E, 0x05, 0x7E]);
}

#[test]
fn case_insensitive_mode_merges_symbols() {
    let mut asm = Asm::new();
    asm.case_insensitive();
    asm.load_source("test.asm", "Value EQU 7\nld a, VALUE\n").unwrap();
    asm.process().unwrap();
    assert_eq!(asm.code(), &[0x3E, 0x07]);
}

#[test]
fn paren_immediate_warns_about_lookalike_instruction() {
    let asm = assemble("LD B, (5 + 3)\n");
    assert_eq!(asm.code(), &[0x06, 0x08]);
    assert!(has_warning(&asm, "looks like a non existent instruction"));
}

// ----- Files: INCLUDE / INCBIN. -----

#[test]
fn include_splices_files() {
    let inc = temp_path("inc.asm");
    fs::write(&inc, "DEFB 2\n").unwrap();
    let main = format!("DEFB 1\nINCLUDE {}\nDEFB 3\n", inc.display());
    let mut asm = Asm::new();
    asm.load_source("main.asm", &main).unwrap();
    asm.process().unwrap();
    fs::remove_file(&inc).ok();
    assert_eq!(asm.code(), &[1, 2, 3]);
}

#[test]
fn incbin_inserts_raw_bytes() {
    let bin = temp_path("data.bin");
    fs::write(&bin, [0xDE, 0xAD]).unwrap();
    let main = format!("DEFB 1\nINCBIN {}\n", bin.display());
    let mut asm = Asm::new();
    asm.load_source("main.asm", &main).unwrap();
    asm.process().unwrap();
    fs::remove_file(&bin).ok();
    assert_eq!(asm.code(), &[1, 0xDE, 0xAD]);
}

#[test]
fn missing_include_is_an_error() {
    let mut asm = Asm::new();
    let err = asm
        .load_source("main.asm", "INCLUDE nowhere-to-be-found.asm\n")
        .unwrap_err();
    assert!(err.message().contains("Cannot open file"));
}

// ----- Misc directives. -----

#[test]
fn error_directive_aborts() {
    let err = asm_err(".ERROR \"boom\"\n");
    assert!(err.message().contains("boom"));
}

#[test]
fn warning_directive_warns() {
    let asm = assemble(".WARNING \"heads up\"\nNOP\n");
    assert!(has_warning(&asm, "heads up"));
}

#[test]
fn z80_directive_is_accepted_and_8080_rejected() {
    assert_eq!(code(".Z80\nNOP\n"), vec![0x00]);
    assert!(asm_err(".8080\n").message().contains("8080 mode not supported"));
}
