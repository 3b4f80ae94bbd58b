use py2mcu_ast::embedded::{extract_embedded, EMBEDDED_MARKER};
use py2mcu_ast::fold::ConstValue;
use py2mcu_ast::macros::promote_macros;
use py2mcu_ast::ErrorKind;
use py2mcu_parser::parse_module;

#[test]
fn test_macros_keep_declaration_order() {
    let source = "\
LED_PIN = 5  # @#define uint8_t
BLINK_MS: int = 500  # @#define
SCALE = 3.3  # @#define
plain: int = 1
";
    let module = parse_module(source).unwrap();
    let macros = promote_macros(&module).unwrap();
    let names: Vec<&str> = macros.iter().map(|m| m.name.as_str()).collect();
    assert_eq!(names, ["LED_PIN", "BLINK_MS", "SCALE"]);
    assert_eq!(macros.get("LED_PIN").unwrap().type_hint.as_deref(), Some("uint8_t"));
    assert_eq!(macros.get("BLINK_MS").unwrap().type_hint, None);
    assert_eq!(macros.value("SCALE"), Some(ConstValue::Float(3.3)));
    assert!(macros.get("plain").is_none());
}

#[test]
fn test_macro_expressions_fold() {
    let source = "\
MASK = (1 << 4) | 1  # @#define
HALF = -7 // 2  # @#define
";
    let module = parse_module(source).unwrap();
    let macros = promote_macros(&module).unwrap();
    assert_eq!(macros.value("MASK"), Some(ConstValue::Int(17)));
    assert_eq!(macros.value("HALF"), Some(ConstValue::Int(-4)));
}

#[test]
fn test_macro_needing_runtime_fails() {
    let module = parse_module("X = read_adc()  # @#define\n").unwrap();
    let err = promote_macros(&module).unwrap_err();
    assert_eq!(err.kind, ErrorKind::UnresolvedMacroExpression);

    let module = parse_module("A = 1  # @#define\nB = A + 1  # @#define\n").unwrap();
    let err = promote_macros(&module).unwrap_err();
    assert_eq!(err.kind, ErrorKind::UnresolvedMacroExpression);
}

#[test]
fn test_embedded_block_is_extracted() {
    let source = format!(
        "def led_on() -> None:\n    \"\"\"\n    {}\n    HAL_GPIO_WritePin(GPIOA, GPIO_PIN_5, 1);\n    \"\"\"\n    pass\n",
        EMBEDDED_MARKER
    );
    let module = parse_module(&source).unwrap();
    let table = extract_embedded(&module).unwrap();
    assert!(table.contains("led_on"));
}

#[test]
fn test_two_markers_in_one_docstring() {
    let source = format!(
        "def f() -> None:\n    \"\"\"\n    {m}\n    a();\n    {m}\n    b();\n    \"\"\"\n    pass\n",
        m = EMBEDDED_MARKER
    );
    let module = parse_module(&source).unwrap();
    let err = extract_embedded(&module).unwrap_err();
    assert_eq!(err.kind, ErrorKind::DuplicateEmbeddedBlock);
}
