use py2mcu_ast::{
    BinaryOp, CmpOp, Constant, ErrorKind, ExprKind, FStringPart, ParamKind, StmtKind, UnaryOp,
};
use py2mcu_parser::*;

#[test]
fn test_parse_simple_function() {
    let src = r#"
def add(a: int, b: int) -> int:
    return a + b
"#;
    let module = parse_module(src).unwrap();
    assert_eq!(module.body.len(), 1);
    let def = module.function("add").unwrap();
    assert_eq!(def.params.len(), 2);
    assert_eq!(def.params[0].name, "a");
    assert!(def.returns.is_some());
    assert!(matches!(def.body[0].kind, StmtKind::Return(Some(_))));
}

#[test]
fn test_parse_annotated_global_with_comment() {
    let src = "LED_PIN: int = 13  # @#define uint8_t\n";
    let module = parse_module(src).unwrap();
    match &module.body[0].kind {
        StmtKind::AnnAssign { target, value, comment, .. } => {
            assert_eq!(target.as_name(), Some("LED_PIN"));
            assert!(matches!(
                value.as_ref().map(|v| &v.kind),
                Some(ExprKind::Constant(Constant::Int(13)))
            ));
            assert_eq!(comment.as_deref(), Some(" @#define uint8_t"));
        }
        other => panic!("expected annotated assignment, got {:?}", other),
    }
}

#[test]
fn test_parse_precedence() {
    let module = parse_module("x = 1 + 2 * 3\n").unwrap();
    let StmtKind::Assign { value, .. } = &module.body[0].kind else {
        panic!("expected assignment");
    };
    let ExprKind::BinOp { op, right, .. } = &value.kind else {
        panic!("expected binary operation");
    };
    assert_eq!(*op, BinaryOp::Add);
    assert!(matches!(right.kind, ExprKind::BinOp { op: BinaryOp::Mul, .. }));
}

#[test]
fn test_parse_power_binds_tighter_than_unary_minus() {
    let module = parse_module("x = -2 ** 2\n").unwrap();
    let StmtKind::Assign { value, .. } = &module.body[0].kind else {
        panic!("expected assignment");
    };
    let ExprKind::UnaryOp { op, operand } = &value.kind else {
        panic!("expected unary operation, got {:?}", value.kind);
    };
    assert_eq!(*op, UnaryOp::Neg);
    assert!(matches!(operand.kind, ExprKind::BinOp { op: BinaryOp::Pow, .. }));
}

#[test]
fn test_parse_chained_comparison() {
    let module = parse_module("ok = 0 <= x < 10\n").unwrap();
    let StmtKind::Assign { value, .. } = &module.body[0].kind else {
        panic!("expected assignment");
    };
    let ExprKind::Compare { ops, .. } = &value.kind else {
        panic!("expected comparison");
    };
    assert_eq!(ops, &[CmpOp::LtE, CmpOp::Lt]);
}

#[test]
fn test_parse_not_in_and_is_not() {
    let module = parse_module("a = x not in y\nb = x is not None\n").unwrap();
    let ops: Vec<CmpOp> = module
        .body
        .iter()
        .filter_map(|s| match &s.kind {
            StmtKind::Assign { value, .. } => match &value.kind {
                ExprKind::Compare { ops, .. } => Some(ops[0]),
                _ => None,
            },
            _ => None,
        })
        .collect();
    assert_eq!(ops, vec![CmpOp::NotIn, CmpOp::IsNot]);
}

#[test]
fn test_parse_if_elif_else() {
    let src = r#"
def f(x: int) -> int:
    if x > 0:
        return 1
    elif x < 0:
        return -1
    else:
        return 0
"#;
    let module = parse_module(src).unwrap();
    let def = module.function("f").unwrap();
    let StmtKind::If { orelse, .. } = &def.body[0].kind else {
        panic!("expected if");
    };
    assert_eq!(orelse.len(), 1);
    let StmtKind::If { orelse, .. } = &orelse[0].kind else {
        panic!("elif should nest as an if");
    };
    assert!(matches!(orelse[0].kind, StmtKind::Return(Some(_))));
}

#[test]
fn test_parse_for_range_and_while() {
    let src = r#"
def loop() -> None:
    total: int = 0
    for i in range(0, 10, 2):
        total += i
    while total > 0:
        total -= 1
        if total == 3:
            break
"#;
    let module = parse_module(src).unwrap();
    let def = module.function("loop").unwrap();
    assert_eq!(def.body.len(), 3);
    let StmtKind::For { target, body, .. } = &def.body[1].kind else {
        panic!("expected for");
    };
    assert_eq!(target.as_name(), Some("i"));
    assert!(matches!(body[0].kind, StmtKind::AugAssign { op: BinaryOp::Add, .. }));
    assert!(matches!(def.body[2].kind, StmtKind::While { .. }));
}

#[test]
fn test_parse_docstring_raw_text() {
    let src = r#"
def blink() -> None:
    """
    __C_CODE__
    HAL_GPIO_TogglePin(GPIOA, GPIO_PIN_5);
    """
    time.sleep(0.5)
"#;
    let module = parse_module(src).unwrap();
    let def = module.function("blink").unwrap();
    let doc = def.docstring.as_ref().unwrap();
    assert!(doc.raw.contains("__C_CODE__"));
    assert!(doc.raw.contains("HAL_GPIO_TogglePin(GPIOA, GPIO_PIN_5);"));
    assert_eq!(def.body.len(), 1);
}

#[test]
fn test_docstring_raw_keeps_escapes() {
    let module = parse_module("def f() -> None:\n    \"a\\nb\"\n").unwrap();
    let doc = module.function("f").unwrap().docstring.clone().unwrap();
    assert_eq!(doc.value, "a\nb");
    assert_eq!(doc.raw, "a\\nb");
}

#[test]
fn test_parse_module_docstring() {
    let module = parse_module("'''Blink an LED.'''\nx: int = 1\n").unwrap();
    assert_eq!(module.docstring.unwrap().value, "Blink an LED.");
    assert_eq!(module.body.len(), 1);
}

#[test]
fn test_parse_decorators() {
    let src = r#"
@py2mcu.arena
@inline_c(header="x.h")
def work() -> None:
    pass
"#;
    let module = parse_module(src).unwrap();
    let def = module.function("work").unwrap();
    let names: Vec<_> = def.decorators.iter().filter_map(|d| d.name()).collect();
    assert_eq!(names, vec!["arena", "inline_c"]);
}

#[test]
fn test_parse_list_annotations_and_repeat() {
    let src = "buf: list[int] = [0] * 16\nvals: list[float] = [1.0, 2.5]\n";
    let module = parse_module(src).unwrap();
    let StmtKind::AnnAssign { annotation, value, .. } = &module.body[0].kind else {
        panic!("expected annotated assignment");
    };
    assert!(matches!(annotation.kind, ExprKind::Subscript { .. }));
    assert!(matches!(
        value.as_ref().unwrap().kind,
        ExprKind::BinOp { op: BinaryOp::Mul, .. }
    ));
}

#[test]
fn test_parse_numbers() {
    let src = "a = 0xFF\nb = 0b1010\nc = 1_000\nd = 2.5e3\ne = .5\n";
    let module = parse_module(src).unwrap();
    let values: Vec<_> = module
        .body
        .iter()
        .map(|s| match &s.kind {
            StmtKind::Assign { value, .. } => value.kind.clone(),
            _ => panic!("expected assignment"),
        })
        .collect();
    assert_eq!(values[0], ExprKind::Constant(Constant::Int(255)));
    assert_eq!(values[1], ExprKind::Constant(Constant::Int(10)));
    assert_eq!(values[2], ExprKind::Constant(Constant::Int(1000)));
    assert_eq!(values[3], ExprKind::Constant(Constant::Float(2500.0)));
    assert_eq!(values[4], ExprKind::Constant(Constant::Float(0.5)));
}

#[test]
fn test_parse_fstring() {
    let module = parse_module("print(f\"v={x:.2f} {{ok}}\")\n").unwrap();
    let StmtKind::Expr(call) = &module.body[0].kind else {
        panic!("expected expression statement");
    };
    let ExprKind::Call { args, .. } = &call.kind else {
        panic!("expected call");
    };
    let ExprKind::FString(parts) = &args[0].kind else {
        panic!("expected f-string, got {:?}", args[0].kind);
    };
    assert_eq!(parts.len(), 3);
    assert_eq!(parts[0], FStringPart::Literal("v=".into()));
    match &parts[1] {
        FStringPart::Field { expr, spec, .. } => {
            assert_eq!(expr.as_name(), Some("x"));
            assert_eq!(spec.as_deref(), Some(".2f"));
        }
        other => panic!("expected field, got {:?}", other),
    }
    assert_eq!(parts[2], FStringPart::Literal(" {ok}".into()));
}

#[test]
fn test_parse_implicit_string_concatenation() {
    let module = parse_module("s = 'ab' \"cd\"\n").unwrap();
    let StmtKind::Assign { value, .. } = &module.body[0].kind else {
        panic!("expected assignment");
    };
    assert_eq!(value.as_str(), Some("abcd"));
}

#[test]
fn test_parse_main_guard() {
    let src = r#"
def main() -> None:
    pass

if __name__ == "__main__":
    main()
"#;
    let module = parse_module(src).unwrap();
    assert_eq!(module.body.len(), 2);
    assert!(matches!(module.body[1].kind, StmtKind::If { .. }));
}

#[test]
fn test_parse_rejected_constructs_still_parse() {
    let src = r#"
import time
from machine import Pin, ADC
class Sensor(Base):
    def read(self):
        return [x * 2 for x in range(3) if x]

try:
    pass
except ValueError as e:
    raise
finally:
    pass
with open("f") as fh:
    data = {"a": 1, **rest}
g = lambda a, b=2: a + b
"#;
    let module = parse_module(src).unwrap();
    assert_eq!(module.body.len(), 7);
    assert!(matches!(module.body[2].kind, StmtKind::ClassDef(_)));
}

#[test]
fn test_parse_param_kinds() {
    let module = parse_module("def f(a, *args, b=1, **kw):\n    pass\n").unwrap();
    let kinds: Vec<_> = module.function("f").unwrap().params.iter().map(|p| p.kind).collect();
    assert_eq!(
        kinds,
        vec![
            ParamKind::Normal,
            ParamKind::VarArgs,
            ParamKind::KeywordOnly,
            ParamKind::VarKeywords
        ]
    );
}

#[test]
fn test_parse_multiline_call_and_continuation() {
    let src = "x = max(1,\n        2)\ny = 1 + \\\n    2\n";
    let module = parse_module(src).unwrap();
    assert_eq!(module.body.len(), 2);
    assert_eq!(module.body[1].span.line, 3);
}

#[test]
fn test_parse_semicolons_and_inline_suite() {
    let module = parse_module("def f() -> None: a = 1; b = 2\n").unwrap();
    assert_eq!(module.function("f").unwrap().body.len(), 2);
}

#[test]
fn test_parse_spans() {
    let src = "x: int = 1\n\ndef f() -> None:\n    y: int = 2\n";
    let module = parse_module(src).unwrap();
    let def = module.function("f").unwrap();
    assert_eq!((def.span.line, def.span.column), (3, 1));
    assert_eq!((def.body[0].span.line, def.body[0].span.column), (4, 5));
}

#[test]
fn test_parse_error_invalid_syntax() {
    let err = parse_module("x = = 1\n").unwrap_err();
    assert_eq!(err.kind, ErrorKind::ParseError);
    assert_eq!(err.location.unwrap().line, 1);
}

#[test]
fn test_parse_error_missing_block() {
    let err = parse_module("def f() -> None:\nx = 1\n").unwrap_err();
    assert_eq!(err.kind, ErrorKind::ParseError);
    assert!(err.message.contains("indented block"), "got: {}", err.message);
}

#[test]
fn test_parse_error_unexpected_indent() {
    let err = parse_module("x = 1\n    y = 2\n").unwrap_err();
    assert_eq!(err.kind, ErrorKind::ParseError);
    assert_eq!(err.location.unwrap().line, 2);
}

#[test]
fn test_parse_error_unclosed_bracket() {
    let err = parse_module("x = (1,\n").unwrap_err();
    assert_eq!(err.kind, ErrorKind::ParseError);
}

#[test]
fn test_parse_error_integer_too_large() {
    let err = parse_module("x = 999999999999999999999999999999999999999999\n").unwrap_err();
    assert!(err.message.contains("too large"), "got: {}", err.message);
}

#[test]
fn test_parse_expression() {
    let expr = parse_expression("list[int]").unwrap();
    assert!(matches!(expr.kind, ExprKind::Subscript { .. }));
}
