//! Every program under `demos/` compiles for every target.

use std::fs;
use std::path::{Path, PathBuf};

use py2mcu::{compile_for_targets, CompileOptions, TARGETS};
use walkdir::WalkDir;

fn demos_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .unwrap()
        .parent()
        .unwrap()
        .join("demos")
}

fn demo_sources() -> Vec<(PathBuf, String)> {
    let mut sources: Vec<(PathBuf, String)> = WalkDir::new(demos_dir())
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "py"))
        .map(|entry| {
            let path = entry.into_path();
            let source = fs::read_to_string(&path)
                .unwrap_or_else(|e| panic!("Failed to read {}: {}", path.display(), e));
            (path, source)
        })
        .collect();
    sources.sort();
    sources
}

fn demo(name: &str) -> String {
    fs::read_to_string(demos_dir().join(name)).unwrap()
}

fn unit(source: &str, target: &str) -> String {
    let units = compile_for_targets(source, &[target], &CompileOptions::default()).unwrap();
    units.into_iter().next().unwrap().source
}

#[test]
fn test_every_demo_compiles_for_every_target() {
    let sources = demo_sources();
    assert!(!sources.is_empty(), "No demos found in {}", demos_dir().display());

    let targets: Vec<&str> = TARGETS.iter().map(|t| t.id).collect();
    for (path, source) in &sources {
        match compile_for_targets(source, &targets, &CompileOptions::default()) {
            Ok(units) => assert_eq!(units.len(), targets.len()),
            Err(e) => panic!("{} failed: {}", path.display(), e),
        }
    }
}

#[test]
fn test_blink_demo_drives_the_superloop() {
    let c_code = unit(&demo("blink.py"), "stm32f4");
    assert!(c_code.contains("HAL_GPIO_TogglePin(GPIOA, GPIO_PIN_5);"), "Got:\n{}", c_code);
    assert!(c_code.contains("ticks += 1;"), "Got:\n{}", c_code);
    assert!(!c_code.contains("time.sleep"), "Host driver leaked, got:\n{}", c_code);
}

#[test]
fn test_adc_demo_stays_off_the_heap() {
    let c_code = unit(&demo("adc_average.py"), "rp2040");
    assert!(c_code.contains("int32_t samples[8];"), "Got:\n{}", c_code);
    for call in ["malloc", "mcu_rc_alloc", "mcu_arena_alloc"] {
        assert!(!c_code.contains(call), "Unexpected {}, got:\n{}", call, c_code);
    }
}

#[test]
fn test_memory_demo_uses_every_runtime() {
    let c_code = unit(&demo("memory_strategies.py"), "esp32");
    assert!(c_code.contains("mcu_arena_acquire()"), "Got:\n{}", c_code);
    assert!(c_code.contains("mcu_rc_retain(data);"), "Got:\n{}", c_code);
    assert!(c_code.contains("mcu_free(samples);"), "Got:\n{}", c_code);
}

#[test]
fn test_defines_demo_exports_macros_in_order() {
    let c_code = unit(&demo("defines.py"), "pc");
    let order: Vec<usize> = ["BAUD_RATE", "STATUS_MASK", "DEVICE_NAME", "DEBUG"]
        .iter()
        .map(|name| {
            c_code
                .find(&format!("#define {} ", name))
                .unwrap_or_else(|| panic!("Missing {}, got:\n{}", name, c_code))
        })
        .collect();
    assert!(order.windows(2).all(|w| w[0] < w[1]), "Got:\n{}", c_code);
    assert!(c_code.contains("#define DEVICE_NAME \"sensor-7\""), "Got:\n{}", c_code);
}
