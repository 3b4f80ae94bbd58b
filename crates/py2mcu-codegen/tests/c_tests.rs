//! Tests for the C code generator.

use py2mcu_ast::embedded::extract_embedded;
use py2mcu_ast::macros::promote_macros;
use py2mcu_ast::resolve::resolve_module;
use py2mcu_ast::strategy::classify;
use py2mcu_ast::{CompileResult, ErrorKind};
use py2mcu_codegen::{compile_to_c_with_options, lookup_target, CCodegenOptions, TypedModule};
use py2mcu_parser::parse_module;

fn generate_with(source: &str, target: &str, options: CCodegenOptions) -> CompileResult<String> {
    let module = parse_module(source)?;
    let embedded = extract_embedded(&module)?;
    let macros = promote_macros(&module)?;
    let resolved = resolve_module(&module, &macros, &embedded)?;
    let plans = classify(&module, &resolved, &macros, &embedded, options.elide_dead_stores)?;
    let typed = TypedModule {
        module: &module,
        macros: &macros,
        embedded: &embedded,
        resolved: &resolved,
        plans: &plans,
    };
    compile_to_c_with_options(&typed, lookup_target(target)?, options)
}

fn generate(source: &str, target: &str) -> String {
    generate_with(source, target, CCodegenOptions::default()).unwrap()
}

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
fn test_macro_with_type_hint_precedes_prototypes() {
    let c_code = generate(BLINK, "stm32f4");
    let define = c_code
        .find("#define LED_PIN ((uint8_t)13)")
        .unwrap_or_else(|| panic!("Expected typed LED_PIN macro, got:\n{}", c_code));
    let prototypes = c_code
        .find("/* Function prototypes */")
        .unwrap_or_else(|| panic!("Expected prototypes, got:\n{}", c_code));
    assert!(define < prototypes, "Macro must precede prototypes, got:\n{}", c_code);
    assert!(
        c_code.contains("#define BLINK_MS INT32_C(500)"),
        "Expected default 32-bit macro, got:\n{}",
        c_code
    );
}

#[test]
fn test_macros_keep_source_order() {
    let c_code = generate(BLINK, "esp32");
    let led = c_code.find("#define LED_PIN").unwrap();
    let blink = c_code.find("#define BLINK_MS").unwrap();
    assert!(led < blink, "Expected source order, got:\n{}", c_code);
}

#[test]
fn test_embedded_block_is_verbatim_on_mcu() {
    let c_code = generate(BLINK, "stm32f4");
    assert!(
        c_code.contains(
            "void led_toggle(void) {\n    HAL_GPIO_TogglePin(GPIOA, GPIO_PIN_5);\n    HAL_Delay(BLINK_MS);\n}\n"
        ),
        "Expected the raw block, got:\n{}",
        c_code
    );
    assert!(!c_code.contains("LED toggled"), "Fallback must not be emitted, got:\n{}", c_code);
}

#[test]
fn test_embedded_function_uses_fallback_on_pc() {
    let c_code = generate(BLINK, "pc");
    assert!(
        c_code.contains("printf(\"LED toggled\\n\");"),
        "Expected the translated fallback, got:\n{}",
        c_code
    );
    assert!(!c_code.contains("HAL_GPIO_TogglePin"), "Got:\n{}", c_code);
}

#[test]
fn test_superloop_on_mcu() {
    let c_code = generate(BLINK, "stm32f4");
    assert!(
        c_code.contains(
            "int main(void) {\n    HAL_Init();\n    setup();\n    for (;;) {\n        loop();\n    }\n}"
        ),
        "Expected the superloop, got:\n{}",
        c_code
    );
    assert!(!c_code.contains("sim_hook"), "Got:\n{}", c_code);
}

#[test]
fn test_esp32_entry_is_app_main() {
    let c_code = generate(BLINK, "esp32");
    assert!(c_code.contains("void app_main(void) {"), "Got:\n{}", c_code);
    assert!(c_code.contains("#define TARGET_ESP32 1"), "Got:\n{}", c_code);
}

#[test]
fn test_sim_hooks_follow_each_iteration() {
    let c_code = generate(BLINK, "pc");
    assert!(c_code.contains("void sim_hook_idle(void);"), "Got:\n{}", c_code);
    assert!(c_code.contains("void sim_hook_process_events(void);"), "Got:\n{}", c_code);
    assert!(
        c_code.contains("        loop();\n        sim_hook_idle();\n        sim_hook_process_events();\n"),
        "Expected hook calls after loop(), got:\n{}",
        c_code
    );
}

#[test]
fn test_header_chain_covers_every_target() {
    let c_code = generate(BLINK, "rp2040");
    for guard in ["TARGET_PC", "TARGET_STM32F4", "TARGET_ESP32", "TARGET_RP2040"] {
        assert!(c_code.contains(&format!("defined({})", guard)), "Missing {}, got:\n{}", guard, c_code);
    }
    assert!(c_code.contains("#include \"pico/stdlib.h\""), "Got:\n{}", c_code);
    assert!(c_code.contains("    stdio_init_all();\n"), "Got:\n{}", c_code);
}

#[test]
fn test_print_with_macro_argument() {
    let c_code = generate(BLINK, "pc");
    assert!(
        c_code.contains("printf(\"Setting up LED on pin %lu\\n\", (unsigned long)(LED_PIN));"),
        "Got:\n{}",
        c_code
    );
}

#[test]
fn test_generation_is_deterministic() {
    assert_eq!(generate(BLINK, "pc"), generate(BLINK, "pc"));
    assert_eq!(generate(BLINK, "stm32f4"), generate(BLINK, "stm32f4"));
}

const STACK_AVERAGE: &str = r#"
@static_alloc
def average() -> int:
    buf: list[int] = [1, 2, 3, 4, 5]
    total: int = 0
    for v in buf:
        total += v
    return total // len(buf)
"#;

#[test]
fn test_stack_list_is_fixed_array() {
    let c_code = generate(STACK_AVERAGE, "stm32f4");
    assert!(c_code.contains("int32_t buf[5];"), "Expected a 5-element array, got:\n{}", c_code);
    assert!(c_code.contains("buf[4] = 5;"), "Got:\n{}", c_code);
    assert!(c_code.contains("buf__len = 5;"), "Got:\n{}", c_code);
    assert!(c_code.contains("return total / buf__len;"), "Got:\n{}", c_code);
    for call in ["malloc", "mcu_alloc", "mcu_rc_alloc", "mcu_arena_alloc"] {
        assert!(!c_code.contains(call), "Unexpected {}, got:\n{}", call, c_code);
    }
}

#[test]
fn test_list_iteration_uses_length_companion() {
    let c_code = generate(STACK_AVERAGE, "pc");
    assert!(
        c_code.contains("for (int32_t i__1 = 0; i__1 < buf__len; i__1++) {"),
        "Got:\n{}",
        c_code
    );
    assert!(c_code.contains("v = buf[i__1];"), "Got:\n{}", c_code);
    assert!(c_code.contains("total += v;"), "Got:\n{}", c_code);
}

const ARENA_SCAN: &str = r#"
@arena
def scan(limit: int) -> int:
    buf: list[int] = [0] * 8
    if limit < 0:
        return 0
    return buf[0] + limit
"#;

#[test]
fn test_arena_acquires_once_and_releases_on_every_exit() {
    let c_code = generate(ARENA_SCAN, "stm32f4");
    assert_eq!(c_code.matches("mcu_arena_acquire()").count(), 1, "Got:\n{}", c_code);
    assert_eq!(
        c_code.matches("mcu_arena_release(arena__mark);").count(),
        2,
        "Expected one release per return, got:\n{}",
        c_code
    );
    assert!(c_code.contains("mcu_arena_alloc(sizeof(int32_t)"), "Got:\n{}", c_code);
    assert!(c_code.contains("#define PY2MCU_ARENA_SIZE 4096"), "Got:\n{}", c_code);
    assert!(!c_code.contains("malloc"), "Arena code must not touch the heap, got:\n{}", c_code);
}

#[test]
fn test_arena_size_option() {
    let options = CCodegenOptions::new().with_arena_size(1024);
    let c_code = generate_with(ARENA_SCAN, "pc", options).unwrap();
    assert!(c_code.contains("#define PY2MCU_ARENA_SIZE 1024"), "Got:\n{}", c_code);
}

const COUNTED: &str = r#"
def make(n: int) -> list[int]:
    out: list[int] = [0] * n
    return out

def total() -> int:
    data: list[int] = make(4)
    alias: list[int] = data
    s: int = 0
    for v in alias:
        s += v
    return s
"#;

#[test]
fn test_returned_list_uses_out_length() {
    let c_code = generate(COUNTED, "pc");
    assert!(
        c_code.contains("int32_t *make(int32_t n, int32_t *ret__len);"),
        "Got:\n{}",
        c_code
    );
    assert!(c_code.contains("mcu_rc_alloc(sizeof(int32_t) * (size_t)list__1__len)"), "Got:\n{}", c_code);
    assert!(c_code.contains("*ret__len = out__len;"), "Got:\n{}", c_code);
    assert!(c_code.contains("return out;"), "Got:\n{}", c_code);
}

#[test]
fn test_alias_retains_and_scope_exit_releases() {
    let c_code = generate(COUNTED, "pc");
    assert!(c_code.contains("make(4, &list__1__len)"), "Got:\n{}", c_code);
    assert!(c_code.contains("mcu_rc_retain(data);"), "Got:\n{}", c_code);
    assert!(c_code.contains("mcu_rc_release(data);"), "Got:\n{}", c_code);
    assert!(c_code.contains("mcu_rc_release(alias);"), "Got:\n{}", c_code);
    assert!(c_code.contains("static void mcu_rc_release(void *block)"), "Got:\n{}", c_code);
}

#[test]
fn test_unique_list_is_freed_after_last_use() {
    let src = r#"
def peak() -> int:
    samples: list[int] = [3, 9, 4]
    best: int = max(samples[0], samples[1], samples[2])
    print(best)
    return best
"#;
    let eager = generate_with(src, "pc", CCodegenOptions::new().with_dead_store_elision(true)).unwrap();
    let free = eager.find("mcu_free(samples);").unwrap_or_else(|| panic!("Got:\n{}", eager));
    let print = eager.find("printf(").unwrap();
    assert!(free < print, "Expected the free before print, got:\n{}", eager);
    assert_eq!(eager.matches("mcu_free(samples);").count(), 1, "Got:\n{}", eager);

    let lazy = generate(src, "pc");
    let free = lazy.find("mcu_free(samples);").unwrap_or_else(|| panic!("Got:\n{}", lazy));
    let print = lazy.find("printf(").unwrap();
    assert!(free > print, "Expected the free at exit, got:\n{}", lazy);
}

#[test]
fn test_format_specs_in_print() {
    let src = r#"
def report(channel: int, value: int, volts: float) -> None:
    print(f"ADC {channel}: {value:04x}", "ok", sep=" | ")
    print(f"{volts:.2f} V", end="")
"#;
    let c_code = generate(src, "pc");
    assert!(
        c_code.contains(
            "printf(\"ADC %ld: %04lx | ok\\n\", (long)(channel), (unsigned long)(value));"
        ),
        "Got:\n{}",
        c_code
    );
    assert!(c_code.contains("printf(\"%.2f V\", (double)(volts));"), "Got:\n{}", c_code);
}

#[test]
fn test_globals_and_negative_index() {
    let src = r#"
SAMPLES: list[int] = [1, 2, 3]
counter: int = 0

def bump() -> None:
    global counter
    counter += SAMPLES[-1]
"#;
    let c_code = generate(src, "pc");
    assert!(c_code.contains("int32_t SAMPLES[3] = {1, 2, 3};"), "Got:\n{}", c_code);
    assert!(c_code.contains("const int32_t SAMPLES__len = 3;"), "Got:\n{}", c_code);
    assert!(c_code.contains("int32_t counter = 0;"), "Got:\n{}", c_code);
    assert!(c_code.contains("counter += SAMPLES[SAMPLES__len - 1];"), "Got:\n{}", c_code);
}

#[test]
fn test_main_entry() {
    let src = r#"
def main() -> None:
    x: int = 3
    print(x)
"#;
    let c_code = generate(src, "stm32f4");
    assert!(c_code.contains("int main(void) {\n    HAL_Init();\n"), "Got:\n{}", c_code);
    assert!(c_code.contains("printf(\"%ld\\n\", (long)(x));"), "Got:\n{}", c_code);
    assert!(c_code.contains("    return 0;\n}"), "Got:\n{}", c_code);
    assert!(!c_code.contains("main(void);"), "main needs no prototype, got:\n{}", c_code);
}

#[test]
fn test_control_flow() {
    let src = r#"
def classify(x: int) -> int:
    if x < 0:
        return -1
    elif x == 0:
        return 0
    else:
        y: int = 0
        while y < x and y < 10:
            y += 2
        for i in range(10, 0, -2):
            y -= i
        return y
"#;
    let c_code = generate(src, "pc");
    assert!(c_code.contains("if (x < 0) {"), "Got:\n{}", c_code);
    assert!(c_code.contains("} else if (x == 0) {"), "Got:\n{}", c_code);
    assert!(c_code.contains("} else {"), "Got:\n{}", c_code);
    assert!(c_code.contains("while ((y < x) && (y < 10)) {"), "Got:\n{}", c_code);
    assert!(
        c_code.contains("for (int32_t i__1 = 10; i__1 > 0; i__1 -= 2) {"),
        "Got:\n{}",
        c_code
    );
    assert!(c_code.contains("i = i__1;"), "Got:\n{}", c_code);
    assert!(c_code.contains("return -1;"), "Got:\n{}", c_code);
}

#[test]
fn test_float_division_and_floor() {
    let src = r#"
def ratio(a: int, b: int) -> float:
    r: float = a / b
    r = r // 2.0
    return r
"#;
    let c_code = generate(src, "pc");
    assert!(c_code.contains("double r = (double)a / b;"), "Got:\n{}", c_code);
    assert!(c_code.contains("r = floor(r / 2.0);"), "Got:\n{}", c_code);
}

#[test]
fn test_deferred_body_error_only_on_pc() {
    let src = r#"
def wait() -> None:
    """
    __C_CODE__
    HAL_Delay(10);
    """
    import time
    time.sleep(0.01)
"#;
    let c_code = generate(src, "stm32f4");
    assert!(c_code.contains("HAL_Delay(10);"), "Got:\n{}", c_code);
    assert!(generate_with(src, "pc", CCodegenOptions::default()).is_err());
}

#[test]
fn test_unknown_target() {
    let err = generate_with(BLINK, "avr", CCodegenOptions::default()).unwrap_err();
    assert_eq!(err.kind, ErrorKind::UnknownTarget);
}

#[test]
fn test_banner_option() {
    let with = generate(BLINK, "pc");
    assert!(with.starts_with("/* Generated by py2mcu for target pc. Do not edit. */"));
    let without = generate_with(BLINK, "pc", CCodegenOptions::new().without_banner()).unwrap();
    assert!(without.starts_with("#ifndef TARGET_PC"), "Got:\n{}", without);
}

const HELPERS: &str = r#"
def next_sample() -> int:
    return 1

def pair(a: int, b: int) -> int:
    return a - b
"#;

#[test]
fn test_or_and_yield_an_operand() {
    let src = r#"
def pick(x: int, flag: bool, limit: int) -> int:
    y: int = x or 5
    z: int = x and limit
    w: int = x or limit or 9
    if flag or x:
        return y
    return z + w
"#;
    let c_code = generate(src, "pc");
    assert!(c_code.contains("int32_t y = x ? x : 5;"), "Got:\n{}", c_code);
    assert!(c_code.contains("int32_t z = x ? limit : x;"), "Got:\n{}", c_code);
    assert!(c_code.contains("int32_t w = x ? x : (limit ? limit : 9);"), "Got:\n{}", c_code);
    assert!(c_code.contains("if (flag || x) {"), "Got:\n{}", c_code);
}

#[test]
fn test_or_value_rejects_side_effects_before_last_operand() {
    let src = format!("{}\ndef f() -> int:\n    y: int = next_sample() or 5\n    return y\n", HELPERS);
    let err = generate_with(&src, "pc", CCodegenOptions::default()).unwrap_err();
    assert_eq!(err.kind, ErrorKind::UnsupportedConstruct);

    let src = format!("{}\ndef f(x: int) -> int:\n    y: int = x or next_sample()\n    return y\n", HELPERS);
    let c_code = generate(&src, "pc");
    assert!(c_code.contains("int32_t y = x ? x : next_sample();"), "Got:\n{}", c_code);
}

#[test]
fn test_range_counter_is_separate_from_loop_variable() {
    let src = r#"
def count() -> int:
    total: int = 0
    for i in range(3):
        i = i + 10
        total += i
    return i
"#;
    let c_code = generate(src, "pc");
    assert!(c_code.contains("for (int32_t i__1 = 0; i__1 < 3; i__1++) {"), "Got:\n{}", c_code);
    let rebind = c_code.find("i = i__1;").unwrap_or_else(|| panic!("Got:\n{}", c_code));
    let body = c_code.find("i = i + 10;").unwrap_or_else(|| panic!("Got:\n{}", c_code));
    assert!(rebind < body, "Expected the rebinding first, got:\n{}", c_code);
    assert!(!c_code.contains("for (i ="), "Got:\n{}", c_code);
    assert!(c_code.contains("return i;"), "Got:\n{}", c_code);
}

#[test]
fn test_range_bounds_are_evaluated_in_order() {
    let src = format!(
        "{}\ndef f(n: int) -> int:\n    total: int = 0\n    for i in range(next_sample(), n):\n        total += i\n    return total\n",
        HELPERS
    );
    let c_code = generate(&src, "pc");
    let start = c_code
        .find("const int32_t start__1 = next_sample();")
        .unwrap_or_else(|| panic!("Got:\n{}", c_code));
    let stop = c_code
        .find("const int32_t stop__2 = n;")
        .unwrap_or_else(|| panic!("Got:\n{}", c_code));
    assert!(start < stop, "Got:\n{}", c_code);
    assert!(
        c_code.contains("for (int32_t i__3 = start__1; i__3 < stop__2; i__3++) {"),
        "Got:\n{}",
        c_code
    );
}

#[test]
fn test_unformatted_float_print_keeps_point() {
    let src = r#"
def main() -> None:
    v: float = 1.0
    print(v, f"{v:8}", f"{v:.2f}")
"#;
    let c_code = generate(src, "pc");
    assert!(
        c_code.contains(
            "printf(\"%s %8s %.2f\\n\", mcu_float_repr((char[32]){0}, 32, (double)(v)), \
             mcu_float_repr((char[32]){0}, 32, (double)(v)), (double)(v));"
        ),
        "Got:\n{}",
        c_code
    );
    assert!(
        c_code.contains("static const char *mcu_float_repr(char *buf, size_t size, double v) {"),
        "Got:\n{}",
        c_code
    );
    assert!(c_code.contains("#include <stdlib.h>"), "Got:\n{}", c_code);
}

#[test]
fn test_float_helper_only_when_printed() {
    let src = "def main() -> None:\n    v: float = 1.0\n    print(f\"{v:.3f}\")\n";
    let c_code = generate(src, "pc");
    assert!(!c_code.contains("mcu_float_repr"), "Got:\n{}", c_code);
}

#[test]
fn test_arguments_with_side_effects_keep_source_order() {
    let src = format!(
        "{}\ndef work(x: int) -> int:\n    r: int = pair(next_sample(), x)\n    s: int = pair(b=next_sample(), a=next_sample())\n    print(next_sample(), next_sample())\n    return r + s\n",
        HELPERS
    );
    let c_code = generate(&src, "pc");
    assert!(c_code.contains("int32_t arg__1 = next_sample();"), "Got:\n{}", c_code);
    assert!(c_code.contains("int32_t r = pair(arg__1, x);"), "Got:\n{}", c_code);
    let b = c_code
        .find("int32_t arg__2 = next_sample();")
        .unwrap_or_else(|| panic!("Got:\n{}", c_code));
    let a = c_code
        .find("int32_t arg__3 = next_sample();")
        .unwrap_or_else(|| panic!("Got:\n{}", c_code));
    assert!(b < a, "Keyword arguments run in source order, got:\n{}", c_code);
    assert!(c_code.contains("int32_t s = pair(arg__3, arg__2);"), "Got:\n{}", c_code);
    assert!(
        c_code.contains("printf(\"%ld %ld\\n\", (long)(arg__4), (long)(arg__5));"),
        "Got:\n{}",
        c_code
    );
}

#[test]
fn test_single_side_effect_stays_inline() {
    let src = format!("{}\ndef work() -> int:\n    return pair(next_sample(), 2)\n", HELPERS);
    let c_code = generate(&src, "pc");
    assert!(c_code.contains("return pair(next_sample(), 2);"), "Got:\n{}", c_code);
    assert!(!c_code.contains("arg__"), "Got:\n{}", c_code);
}

#[test]
fn test_ordered_arguments_in_elif_and_while() {
    let src = format!(
        "{}\ndef choose(x: int) -> int:\n    if x > 0:\n        return 1\n    elif pair(next_sample(), x) > 0:\n        return 2\n    return 3\n",
        HELPERS
    );
    let c_code = generate(&src, "pc");
    assert!(c_code.contains("} else {"), "Got:\n{}", c_code);
    assert!(c_code.contains("int32_t arg__1 = next_sample();"), "Got:\n{}", c_code);
    assert!(c_code.contains("if (pair(arg__1, x) > 0) {"), "Got:\n{}", c_code);

    let src = format!(
        "{}\ndef spin(x: int) -> None:\n    while pair(next_sample(), x) > 0:\n        x += 1\n",
        HELPERS
    );
    let err = generate_with(&src, "pc", CCodegenOptions::default()).unwrap_err();
    assert_eq!(err.kind, ErrorKind::UnsupportedConstruct);
}

#[test]
fn test_int_keeps_integer_operand_type() {
    let src = r#"
def convert(a: uint64, b: float, flag: bool) -> int:
    c: uint64 = int(a)
    d: int = int(b) + int(flag)
    return d
"#;
    let c_code = generate(src, "pc");
    assert!(c_code.contains("uint64_t c = (uint64_t)a;"), "Got:\n{}", c_code);
    assert!(c_code.contains("((int32_t)b)"), "Got:\n{}", c_code);
    assert!(c_code.contains("((int32_t)flag)"), "Got:\n{}", c_code);
}
