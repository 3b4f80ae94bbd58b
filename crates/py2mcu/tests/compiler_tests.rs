//! End-to-end tests for the compile entry points.

use std::fs;

use py2mcu::{
    compile, compile_for_targets, CompileOptions, Compiler, ErrorKind, OptLevel, Tracer,
};

const BLINK: &str = r#"
LED_PIN = 13  # @#define uint8_t
BLINK_MS: int = 500  # @#define

def setup() -> None:
    print("Setting up LED on pin", LED_PIN)

def loop() -> None:
    led_toggle()

def led_toggle() -> None:
    """Toggle the LED.

    __C_CODE__
    HAL_GPIO_TogglePin(GPIOA, GPIO_PIN_5);
    HAL_Delay(BLINK_MS);
    """
    print("LED toggled")
"#;

#[test]
fn test_blink_for_stm32() {
    let c_code = compile(BLINK, "stm32f4", 2).unwrap();
    assert!(c_code.contains("#define LED_PIN ((uint8_t)13)"), "Got:\n{}", c_code);
    assert!(c_code.contains("#define BLINK_MS INT32_C(500)"), "Got:\n{}", c_code);
    assert!(c_code.contains("HAL_GPIO_TogglePin(GPIOA, GPIO_PIN_5);"), "Got:\n{}", c_code);
    assert!(c_code.contains("setup();"), "Got:\n{}", c_code);
    assert!(c_code.contains("loop();"), "Got:\n{}", c_code);
    assert!(!c_code.contains("LED toggled"), "Fallback must not reach the MCU, got:\n{}", c_code);
}

#[test]
fn test_blink_for_pc_uses_fallback_and_hooks() {
    let c_code = compile(BLINK, "pc", 0).unwrap();
    assert!(c_code.contains("printf(\"LED toggled\\n\");"), "Got:\n{}", c_code);
    assert!(!c_code.contains("HAL_GPIO_TogglePin"), "Got:\n{}", c_code);
    assert!(c_code.contains("sim_hook_"), "Expected simulation hooks, got:\n{}", c_code);
}

#[test]
fn test_target_spellings() {
    let plain = compile(BLINK, "esp32", 2).unwrap();
    let prefixed = compile(BLINK, "TARGET_ESP32", 2).unwrap();
    let mixed = compile(BLINK, "Target_Esp32", 2).unwrap();
    assert_eq!(plain, prefixed);
    assert_eq!(plain, mixed);
    assert!(plain.contains("app_main"), "Got:\n{}", plain);
}

#[test]
fn test_unknown_target() {
    let err = compile(BLINK, "avr", 2).unwrap_err();
    assert_eq!(err.kind, ErrorKind::UnknownTarget);
    let err = Compiler::new("msp430").unwrap_err();
    assert_eq!(err.kind, ErrorKind::UnknownTarget);
}

#[test]
fn test_unknown_target_checked_before_source() {
    let err = compile("def broken(:\n", "avr", 2).unwrap_err();
    assert_eq!(err.kind, ErrorKind::UnknownTarget);
}

#[test]
fn test_invalid_optimization_level() {
    let err = compile(BLINK, "pc", 7).unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidOption);
}

#[test]
fn test_compile_is_deterministic() {
    let compiler = Compiler::new("rp2040").unwrap();
    let first = compiler.compile_string(BLINK).unwrap();
    let second = compiler.compile_string(BLINK).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_missing_annotation_produces_no_unit() {
    let source = "def setup() -> None:\n    x = 1\n\ndef loop() -> None:\n    pass\n";
    let err = compile(source, "pc", 2).unwrap_err();
    assert_eq!(err.kind, ErrorKind::MissingAnnotation);
    let location = err.location.expect("diagnostic location");
    assert_eq!(location.line, 2);
    assert!(err.to_string().starts_with("MissingAnnotation at 2:"), "Got: {}", err);
}

#[test]
fn test_macro_needing_runtime_value() {
    let source = "X = read_adc()  # @#define\n";
    let err = compile(source, "pc", 2).unwrap_err();
    assert_eq!(err.kind, ErrorKind::UnresolvedMacroExpression);
}

#[test]
fn test_stack_function_with_runtime_length() {
    let source = "\
@static_alloc
def fill(n: int) -> int:
    buf: list[int] = [0] * n
    return len(buf)
";
    let err = compile(source, "stm32f4", 2).unwrap_err();
    assert_eq!(err.kind, ErrorKind::StackAllocationViolation);
}

#[test]
fn test_duplicate_embedded_block() {
    let source = r#"
def f() -> None:
    """
    __C_CODE__
    a();
    __C_CODE__
    b();
    """
    pass
"#;
    let err = compile(source, "stm32f4", 2).unwrap_err();
    assert_eq!(err.kind, ErrorKind::DuplicateEmbeddedBlock);
}

#[test]
fn test_optimization_level_controls_early_free() {
    let source = "\
def work() -> int:
    tmp: list[int] = [1, 2, 3]
    n: int = len(tmp)
    n += 1
    return n
";
    let eager = compile(source, "pc", 2).unwrap();
    let free = eager.find("mcu_free(tmp);").unwrap_or_else(|| panic!("Got:\n{}", eager));
    let bump = eager.find("n += 1;").unwrap();
    assert!(free < bump, "Expected the free before the dead code, got:\n{}", eager);

    let lazy = compile(source, "pc", 0).unwrap();
    let free = lazy.find("mcu_free(tmp);").unwrap_or_else(|| panic!("Got:\n{}", lazy));
    let bump = lazy.find("n += 1;").unwrap();
    assert!(free > bump, "Expected the free at exit, got:\n{}", lazy);
}

#[test]
fn test_arena_size_option() {
    let source = "\
@arena
def scan(limit: int) -> int:
    buf: list[int] = [0] * 8
    return buf[0] + limit
";
    let options = CompileOptions::new("stm32f4").with_arena_size(256);
    let c_code = Compiler::with_options(options).unwrap().compile_string(source).unwrap();
    assert!(c_code.contains("#define PY2MCU_ARENA_SIZE 256"), "Got:\n{}", c_code);

    let err = Compiler::with_options(CompileOptions::new("pc").with_arena_size(0)).unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidOption);
}

#[test]
fn test_compile_for_several_targets() {
    let options = CompileOptions::default().with_opt_level(OptLevel::O1);
    let units = compile_for_targets(BLINK, &["stm32f4", "PC", "target_rp2040"], &options).unwrap();
    let ids: Vec<&str> = units.iter().map(|u| u.target).collect();
    assert_eq!(ids, ["stm32f4", "pc", "rp2040"]);
    for unit in &units {
        assert_eq!(unit.source, compile(BLINK, unit.target, 1).unwrap());
    }
}

#[test]
fn test_compile_for_targets_rejects_any_unknown() {
    let err = compile_for_targets(BLINK, &["pc", "z80"], &CompileOptions::default()).unwrap_err();
    assert_eq!(err.kind, ErrorKind::UnknownTarget);
}

#[test]
fn test_tracer_records_every_stage() {
    let compiler = Compiler::new("stm32f4").unwrap();
    let mut tracer = Tracer::new(true);
    compiler.compile_traced(BLINK, &mut tracer).unwrap();
    let stages: Vec<&str> = tracer
        .lines()
        .iter()
        .filter_map(|line| line.strip_prefix("py2mcu: "))
        .filter_map(|line| line.split(':').next())
        .collect();
    assert_eq!(
        stages,
        ["parse", "embedded", "macros", "resolve", "strategy", "codegen"]
    );
    assert!(tracer.lines()[2].contains("LED_PIN, BLINK_MS"), "Got: {:?}", tracer.lines());
}

#[test]
fn test_compile_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("blink.py");
    fs::write(&path, BLINK).unwrap();

    let compiler = Compiler::new("pc").unwrap();
    let from_file = compiler.compile_file(&path).unwrap();
    assert_eq!(from_file, compiler.compile_string(BLINK).unwrap());
}

#[test]
fn test_compile_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let err = Compiler::new("pc")
        .unwrap()
        .compile_file(dir.path().join("absent.py"))
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Io);
}
