use py2mcu_ast::embedded::extract_embedded;
use py2mcu_ast::macros::promote_macros;
use py2mcu_ast::resolve::{resolve_module, EntryPoint, GlobalInit};
use py2mcu_ast::scope::SymbolKind;
use py2mcu_ast::{ArrayLength, CompileResult, ErrorKind, TypeDescriptor};
use py2mcu_parser::parse_module;

fn resolve(source: &str) -> CompileResult<py2mcu_ast::resolve::ResolvedModule> {
    let module = parse_module(source)?;
    let embedded = extract_embedded(&module)?;
    let macros = promote_macros(&module)?;
    resolve_module(&module, &macros, &embedded)
}

fn resolve_err(source: &str) -> py2mcu_ast::CompileError {
    match resolve(source) {
        Ok(_) => panic!("expected an error for:\n{}", source),
        Err(err) => err,
    }
}

#[test]
fn test_unannotated_local_is_rejected() {
    let err = resolve_err("def f() -> None:\n    x = 1\n");
    assert_eq!(err.kind, ErrorKind::MissingAnnotation);
    let span = err.location.expect("location");
    assert_eq!(span.line, 2);
}

#[test]
fn test_annotation_checked_in_every_function() {
    let source = "\
def a() -> None:
    x: int = 1

def b() -> None:
    y = 2
";
    let err = resolve_err(source);
    assert_eq!(err.kind, ErrorKind::MissingAnnotation);
    assert_eq!(err.location.map(|s| s.line), Some(5));
}

#[test]
fn test_parameter_and_return_annotations_required() {
    let err = resolve_err("def f(x) -> int:\n    return 1\n");
    assert_eq!(err.kind, ErrorKind::MissingAnnotation);

    let err = resolve_err("def f(x: int):\n    return x\n");
    assert_eq!(err.kind, ErrorKind::MissingAnnotation);
}

#[test]
fn test_undefined_name() {
    let err = resolve_err("def f() -> int:\n    return z\n");
    assert_eq!(err.kind, ErrorKind::UndefinedSymbol);
}

#[test]
fn test_forward_reference_to_later_function() {
    let source = "\
def f() -> int:
    return g(2)

def g(x: int) -> int:
    return x * 2
";
    let resolved = resolve(source).unwrap();
    assert!(resolved.signature("g").is_some());
    assert!(matches!(resolved.body("f"), Some(Ok(_))));
}

#[test]
fn test_array_capacity_is_longest_literal() {
    let source = "\
def f() -> None:
    buf: list[int] = [1, 2]
    buf = [1, 2, 3, 4]
";
    let resolved = resolve(source).unwrap();
    let table = match resolved.body("f") {
        Some(Ok(table)) => table,
        other => panic!("no body: {:?}", other),
    };
    let buf = table.get("buf").unwrap();
    assert_eq!(buf.ty.array_length(), Some(ArrayLength::Const(4)));
    assert_eq!(buf.ty.element(), Some(&TypeDescriptor::INT32));
}

#[test]
fn test_list_without_initializer_has_no_length() {
    let err = resolve_err("def f() -> None:\n    buf: list[int]\n");
    assert_eq!(err.kind, ErrorKind::UnresolvedArrayLength);
}

#[test]
fn test_locals_in_blocks_are_hoisted() {
    let source = "\
def f(c: bool) -> int:
    if c:
        y: int = 1
        return y
    for i in range(3):
        pass
    return 0
";
    let resolved = resolve(source).unwrap();
    let Some(Ok(table)) = resolved.body("f") else {
        panic!("no body");
    };
    assert!(table.get("y").unwrap().hoisted);
    let i = table.get("i").unwrap();
    assert_eq!(i.kind, SymbolKind::LoopVar);
    assert!(i.hoisted);
    assert_eq!(table.get("c").unwrap().kind, SymbolKind::Param);
}

#[test]
fn test_entry_point_detection() {
    let source = "\
def setup() -> None:
    pass

def loop() -> None:
    pass

def main() -> None:
    setup()
";
    let resolved = resolve(source).unwrap();
    assert_eq!(resolved.entry, EntryPoint::SetupLoop);
    assert!(resolved.host_only.iter().any(|name| name == "main"));
    assert!(!resolved.is_translated("main"));

    let resolved = resolve("def main() -> int:\n    return 0\n").unwrap();
    assert_eq!(resolved.entry, EntryPoint::Main);

    let resolved = resolve("def helper(x: int) -> int:\n    return x\n").unwrap();
    assert_eq!(resolved.entry, EntryPoint::Library);
}

#[test]
fn test_loop_entry_takes_no_parameters() {
    let source = "\
def setup() -> None:
    pass

def loop(n: int) -> None:
    pass
";
    assert!(resolve(source).is_err());
}

#[test]
fn test_module_variables() {
    let source = "\
counter: int = 0
SAMPLES: list[int] = [3, 1, 4]

def bump() -> None:
    global counter
    counter += 1
";
    let resolved = resolve(source).unwrap();
    let counter = resolved.globals.iter().find(|g| g.name == "counter").unwrap();
    assert!(matches!(counter.init, GlobalInit::Scalar(_) | GlobalInit::Zeroed));
    let samples = resolved.globals.iter().find(|g| g.name == "SAMPLES").unwrap();
    assert_eq!(samples.ty.array_length(), Some(ArrayLength::Const(3)));
}

#[test]
fn test_global_statement_of_unknown_name() {
    let err = resolve_err("def f() -> None:\n    global missing\n    missing = 1\n");
    assert_eq!(err.kind, ErrorKind::UndefinedSymbol);
}

#[test]
fn test_unsupported_constructs() {
    for source in [
        "def f() -> None:\n    for i in range(3):\n        pass\n    else:\n        pass\n",
        "def f() -> None:\n    break\n",
        "def f() -> None:\n    def g() -> None:\n        pass\n",
    ] {
        let err = resolve_err(source);
        assert_eq!(err.kind, ErrorKind::UnsupportedConstruct, "for:\n{}", source);
    }
}

#[test]
fn test_range_step_must_be_nonzero() {
    let err = resolve_err("def f() -> None:\n    for i in range(0, 10, 0):\n        pass\n");
    assert_eq!(err.kind, ErrorKind::UnsupportedConstruct);
}

#[test]
fn test_embedded_function_defers_body_errors() {
    let source = "\
def wait(ms: int) -> None:
    \"\"\"
    __C_CODE__
    HAL_Delay(ms);
    \"\"\"
    import time
    time.sleep(ms / 1000)
";
    let resolved = resolve(source).unwrap();
    assert!(matches!(resolved.body("wait"), Some(Err(_))));
    assert!(resolved.signature("wait").is_some());
}

#[test]
fn test_or_and_take_the_operand_type() {
    let source = "\
def f(x: int, flag: bool, name: str) -> int:
    y: int = x or 5
    z: int = x and y
    label: str = name or \"none\"
    on: bool = flag and (x > 0)
    if flag or x:
        return y
    return z
";
    assert!(matches!(resolve(source).unwrap().body("f"), Some(Ok(_))));
}

#[test]
fn test_or_value_with_mixed_operands() {
    let err = resolve_err("def f(x: int, flag: bool) -> int:\n    y: int = flag or x\n    return y\n");
    assert_eq!(err.kind, ErrorKind::TypeMismatch);
    let err = resolve_err("def f(x: int, s: str) -> int:\n    y: int = x and s\n    return y\n");
    assert_eq!(err.kind, ErrorKind::TypeMismatch);
}

#[test]
fn test_repeat_length_beyond_int32_is_rejected() {
    for source in [
        "def f() -> None:\n    buf: list[int] = [0, 0] * 9223372036854775808\n",
        "def f() -> None:\n    buf: list[int] = [0] * 4294967296\n",
        "buf: list[int] = [0, 0, 0] * 1000000000\n",
    ] {
        let err = resolve_err(source);
        assert_eq!(err.kind, ErrorKind::UnsupportedConstruct, "for:\n{}", source);
    }
    assert!(resolve("def f() -> None:\n    buf: list[int] = [0] * 16\n").is_ok());
}
