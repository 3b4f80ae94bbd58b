//! Builds generated `pc` units with the host C compiler and checks what they
//! print. Skipped when no `cc` is installed.

use std::fs;
use std::process::Command;

use py2mcu::compile;

fn have_cc() -> bool {
    Command::new("cc")
        .arg("--version")
        .output()
        .map(|out| out.status.success())
        .unwrap_or(false)
}

/// Compile `source` for `pc`, build it and return its stdout.
fn run(source: &str) -> Option<String> {
    if !have_cc() {
        eprintln!("cc not found, skipping");
        return None;
    }
    let c_code = compile(source, "pc", 2).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let c_path = dir.path().join("unit.c");
    let exe = dir.path().join("unit");
    fs::write(&c_path, &c_code).unwrap();

    let build = Command::new("cc")
        .arg("-std=c99")
        .arg("-o")
        .arg(&exe)
        .arg(&c_path)
        .arg("-lm")
        .output()
        .unwrap();
    assert!(
        build.status.success(),
        "cc failed:\n{}\nsource:\n{}",
        String::from_utf8_lossy(&build.stderr),
        c_code
    );
    let out = Command::new(&exe).output().unwrap();
    assert!(out.status.success(), "program failed, source:\n{}", c_code);
    Some(String::from_utf8(out.stdout).unwrap())
}

#[test]
fn test_or_and_print_the_deciding_operand() {
    let source = "\
def main() -> int:
    x: int = 0
    y: int = x or 5
    z: int = y and 7
    w: int = x and 7
    print(y, z, w)
    return 0
";
    let Some(stdout) = run(source) else { return };
    assert_eq!(stdout, "5 7 0\n");
}

#[test]
fn test_loop_variable_rebinding() {
    let source = "\
def main() -> int:
    for i in range(3):
        i = i + 10
        print(i)
    print(i)
    return 0
";
    let Some(stdout) = run(source) else { return };
    assert_eq!(stdout, "10\n11\n12\n12\n");
}

#[test]
fn test_float_text_matches_host_print() {
    let source = "\
def main() -> int:
    a: float = 1.0
    b: float = 0.1
    print(a, b, 2.5e-05, 1e16, 1234.5, -0.0, 100.0 / 3.0, b + 0.2)
    return 0
";
    let Some(stdout) = run(source) else { return };
    assert_eq!(
        stdout,
        "1.0 0.1 2.5e-05 1e+16 1234.5 -0.0 33.333333333333336 0.30000000000000004\n"
    );
}

#[test]
fn test_arguments_run_left_to_right() {
    let source = "\
counter: int = 0

def tick() -> int:
    global counter
    counter += 1
    return counter

def diff(a: int, b: int) -> int:
    return a - b

def main() -> int:
    print(diff(tick(), tick()), diff(b=tick(), a=tick()))
    return 0
";
    let Some(stdout) = run(source) else { return };
    assert_eq!(stdout, "-1 1\n");
}
