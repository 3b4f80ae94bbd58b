//! Code generation targets.
//!
//! Every generated unit carries the header selection chain for all targets,
//! so embedded C blocks can test `TARGET_*` guards themselves; the unit
//! defines the guard of the target it was generated for.

use alloc::format;
use alloc::string::String;

use py2mcu_ast::{CompileError, CompileResult, ErrorKind};

/// A supported target.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TargetDescriptor {
    /// Canonical lowercase id, e.g. `stm32f4`.
    pub id: &'static str,
    /// Preprocessor guard token, e.g. `TARGET_STM32F4`.
    pub guard: &'static str,
    /// Runs on the host and calls the simulation hooks.
    pub simulation: bool,
    /// Headers included when the guard is defined.
    pub headers: &'static [&'static str],
    /// Signature of the function that starts the program.
    pub entry: &'static str,
    /// Statements run before `setup()`.
    pub init: &'static [&'static str],
}

pub const PC: TargetDescriptor = TargetDescriptor {
    id: "pc",
    guard: "TARGET_PC",
    simulation: true,
    headers: &["<stdlib.h>", "<time.h>"],
    entry: "int main(void)",
    init: &[],
};

pub const STM32F4: TargetDescriptor = TargetDescriptor {
    id: "stm32f4",
    guard: "TARGET_STM32F4",
    simulation: false,
    headers: &["\"stm32f4xx_hal.h\""],
    entry: "int main(void)",
    init: &["HAL_Init();"],
};

pub const ESP32: TargetDescriptor = TargetDescriptor {
    id: "esp32",
    guard: "TARGET_ESP32",
    simulation: false,
    headers: &[
        "\"freertos/FreeRTOS.h\"",
        "\"freertos/task.h\"",
        "\"driver/gpio.h\"",
    ],
    entry: "void app_main(void)",
    init: &[],
};

pub const RP2040: TargetDescriptor = TargetDescriptor {
    id: "rp2040",
    guard: "TARGET_RP2040",
    simulation: false,
    headers: &["\"pico/stdlib.h\"", "\"hardware/gpio.h\""],
    entry: "int main(void)",
    init: &["stdio_init_all();"],
};

/// All targets in header-chain order.
pub const TARGETS: &[TargetDescriptor] = &[PC, STM32F4, ESP32, RP2040];

/// Canonical spelling of a target name: trimmed, lowercased, and without a
/// leading `target_`.
pub fn normalize_target(name: &str) -> String {
    let lower = name.trim().to_ascii_lowercase();
    match lower.strip_prefix("target_") {
        Some(rest) => String::from(rest),
        None => lower,
    }
}

/// Look up a target by any accepted spelling.
pub fn lookup_target(name: &str) -> CompileResult<&'static TargetDescriptor> {
    let id = normalize_target(name);
    TARGETS.iter().find(|t| t.id == id).ok_or_else(|| {
        let known: alloc::vec::Vec<&str> = TARGETS.iter().map(|t| t.id).collect();
        CompileError::new(
            ErrorKind::UnknownTarget,
            &format!(
                "unknown target `{}`; expected one of {}",
                name.trim(),
                known.join(", ")
            ),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefixed_and_cased_spellings_agree() {
        for spelling in ["stm32f4", "STM32F4", "target_stm32f4", "TARGET_STM32F4", " Stm32F4 "] {
            assert_eq!(lookup_target(spelling).unwrap().id, "stm32f4", "{}", spelling);
        }
    }

    #[test]
    fn test_guard_matches_id() {
        for target in TARGETS {
            assert_eq!(target.guard, format!("TARGET_{}", target.id.to_ascii_uppercase()));
        }
    }

    #[test]
    fn test_unknown_target() {
        let err = lookup_target("avr").unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnknownTarget);
        assert!(err.message.contains("pc, stm32f4, esp32, rp2040"), "{}", err.message);
    }

    #[test]
    fn test_only_pc_simulates() {
        let sims: alloc::vec::Vec<&str> =
            TARGETS.iter().filter(|t| t.simulation).map(|t| t.id).collect();
        assert_eq!(sims, ["pc"]);
    }
}
