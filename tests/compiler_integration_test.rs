//! Integration tests for rule compilation: fixtures, error kinds and
//! locations, incremental units and configured limits.

use scan_engine::{compile, Compiler, CompilerConfig, EngineConfig, EngineError, ErrorKind};
use std::fs;
use std::io::Write;

fn fixture(name: &str) -> String {
    let path = format!("{}/tests/rules/{name}", env!("CARGO_MANIFEST_DIR"));
    fs::read_to_string(&path).unwrap_or_else(|e| panic!("cannot read {path}: {e}"))
}

fn error_kind(source: &str) -> ErrorKind {
    match compile(source) {
        Ok(_) => panic!("expected compilation of {source:?} to fail"),
        Err(error) => error.kind(),
    }
}

#[test]
fn test_fixture_files_compile() {
    let basic = compile(&fixture("basic.yar")).unwrap();
    assert_eq!(basic.rule_count(), 8);
    assert_eq!(
        basic.rule_names().collect::<Vec<_>>(),
        [
            "always_true",
            "ab_literal",
            "mz_at_start",
            "hex_jump",
            "cd_and_later",
            "later_rule",
            "counted",
            "regex_digits",
        ]
    );

    let modifiers = compile(&fixture("modifiers.yar")).unwrap();
    assert_eq!(modifiers.rule_count(), 7);
}

#[test]
fn test_globals_fixture_needs_external_variable() {
    let source = fixture("globals.yar");
    assert_eq!(error_kind(&source), ErrorKind::Semantic);

    let mut compiler = Compiler::new();
    compiler.define_global("min_size", 4).unwrap();
    compiler.add_source(&source).unwrap();
    assert_eq!(compiler.rule_count(), 4);
}

#[test]
fn test_cyclic_references_rejected() {
    let err = compile(&fixture("cycle.yar")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Semantic);
    assert!(
        err.to_string().contains("a -> b -> a"),
        "unexpected message: {err}"
    );
}

#[test]
fn test_syntax_error_has_location() {
    let err = compile("rule broken {\n    condition:\n}").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Syntax);
    assert_eq!(err.location().map(|l| l.line), Some(3));

    assert_eq!(error_kind("rule { condition: true }"), ErrorKind::Syntax);
    assert_eq!(error_kind("rule a { condition: true"), ErrorKind::Syntax);
    assert_eq!(
        error_kind("rule a { strings: $a = \"x\" condition: $a and }"),
        ErrorKind::Syntax
    );
}

#[test]
fn test_semantic_errors() {
    let cases = [
        "rule a { condition: true } rule a { condition: true }",
        "rule a { strings: $x = \"1\" $x = \"2\" condition: $x }",
        "rule a : t t { condition: true }",
        "rule a { condition: $missing }",
        "rule a { condition: unknown_rule }",
        "rule a { strings: $x = \"1\" condition: #x == \"one\" }",
        "rule a { strings: $x = \"1\" condition: $x in (10..1) }",
        "rule a { condition: any of them }",
        "include \"other.yar\" rule a { condition: true }",
        "import \"pe\" rule a { condition: true }",
        "global rule g { condition: n } rule n { condition: true }",
    ];
    for source in cases {
        assert_eq!(error_kind(source), ErrorKind::Semantic, "{source}");
    }
}

#[test]
fn test_duplicate_metadata_keys_allowed() {
    let rules = compile(
        r#"rule a { meta: ref = "x" ref = "y" condition: true }"#,
    )
    .unwrap();
    assert_eq!(rules.rule_count(), 1);
}

#[test]
fn test_pattern_errors() {
    let cases = [
        r#"rule a { strings: $x = "" condition: $x }"#,
        r#"rule a { strings: $x = { 4D 5 } condition: $x }"#,
        r#"rule a { strings: $x = { } condition: $x }"#,
        r#"rule a { strings: $x = { 4D [2-] 5A } condition: $x }"#,
        r#"rule a { strings: $x = { [2] 4D } condition: $x }"#,
        r#"rule a { strings: $x = { 4D [3-1] 5A } condition: $x }"#,
        r#"rule a { strings: $x = "abc" nocase xor condition: $x }"#,
        r#"rule a { strings: $x = "abc" base64 fullword condition: $x }"#,
        r#"rule a { strings: $x = "abc" wide wide condition: $x }"#,
        r#"rule a { strings: $x = /abc/ wide condition: $x }"#,
        r#"rule a { strings: $x = /ab(c/ condition: $x }"#,
        r#"rule a { strings: $x = { 4D 5A } nocase condition: $x }"#,
    ];
    for source in cases {
        assert_eq!(error_kind(source), ErrorKind::Pattern, "{source}");
    }

    match compile(r#"rule a { strings: $bad = "" condition: $bad }"#) {
        Err(EngineError::Pattern { identifier, .. }) => assert_eq!(identifier, "$bad"),
        other => panic!("expected pattern error, got {other:?}"),
    }
}

#[test]
fn test_incremental_units_and_rollback() {
    let mut compiler = Compiler::new();
    compiler
        .add_source(r#"rule base { strings: $a = "base" condition: $a }"#)
        .unwrap();

    // Second unit fails on its last rule; nothing of it survives.
    let err = compiler
        .add_source(
            r#"
            rule uses_base { condition: base }
            rule broken { strings: $x = { 4D [2-] } condition: $x }
            "#,
        )
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Pattern);
    assert_eq!(compiler.rule_count(), 1);

    compiler
        .add_source("rule uses_base { condition: base }")
        .unwrap();
    let rules = compiler.build().unwrap();
    assert_eq!(rules.rule_count(), 2);
    assert!(rules.scan(b"the base case").matched("uses_base"));
}

#[test]
fn test_duplicate_rule_across_units() {
    let mut compiler = Compiler::new();
    compiler.add_source("rule a { condition: true }").unwrap();
    let err = compiler.add_source("rule a { condition: false }").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Semantic);
}

#[test]
fn test_patterns_shared_across_rules() {
    let rules = compile(
        r#"
        rule one { strings: $a = "common" condition: $a }
        rule two { strings: $b = "common" $c = "common" nocase condition: $b or $c }
        "#,
    )
    .unwrap();
    assert_eq!(rules.pattern_count(), 2);
}

#[test]
fn test_max_hex_jump_from_yaml_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "compiler:\n  max_hex_jump: 2").unwrap();
    let config = EngineConfig::from_yaml_file(file.path()).unwrap();
    assert_eq!(config.compiler.max_hex_jump, 2);

    let mut compiler = Compiler::with_config(config.compiler);
    let err = compiler
        .add_source("rule j { strings: $h = { 61 [1-3] 62 } condition: $h }")
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Pattern);
}

#[test]
fn test_invalid_yaml_config() {
    let err = EngineConfig::from_yaml_str("compiler:\n  max_atom_len: 0\n").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    assert!(EngineConfig::from_yaml_str("compiler: [").is_err());
}

#[test]
fn test_atom_limit_is_resource_error() {
    let mut compiler = Compiler::with_config(CompilerConfig {
        max_atoms: 1,
        ..Default::default()
    });
    compiler
        .add_source(r#"rule a { strings: $x = "first" $y = "second" condition: any of them }"#)
        .unwrap();
    let err = compiler.build().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Resource);
}

#[test]
fn test_variant_limit_is_resource_error() {
    let mut compiler = Compiler::with_config(CompilerConfig {
        max_pattern_variants: 10,
        ..Default::default()
    });
    let err = compiler
        .add_source(r#"rule a { strings: $x = "abc" xor condition: $x }"#)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Resource);
}

#[test]
fn test_deeply_nested_condition_is_syntax_error() {
    let source = format!("rule deep {{ condition: {}true }}", "not ".repeat(200_000));
    let err = compile(&source).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Syntax);
    assert!(err.to_string().contains("nested too deeply"));

    let source = format!(
        "rule deep {{ condition: {}true{} }}",
        "(".repeat(200_000),
        ")".repeat(200_000)
    );
    assert_eq!(compile(&source).unwrap_err().kind(), ErrorKind::Syntax);
}

#[test]
fn test_deeply_nested_hex_is_pattern_error() {
    let source = format!(
        "rule deep {{ strings: $h = {{ 01 {} }} condition: $h }}",
        "(".repeat(200_000)
    );
    let err = compile(&source).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Pattern);
    assert!(err.to_string().contains("nested too deeply"));
}

#[test]
fn test_nesting_limit_is_configurable() {
    let source = "rule r { condition: ((((true)))) }";
    assert!(compile(source).is_ok());

    let mut compiler = Compiler::with_config(CompilerConfig {
        max_nesting: 3,
        ..Default::default()
    });
    let err = compiler.add_source(source).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Syntax);
    assert_eq!(compiler.rule_count(), 0);
}
