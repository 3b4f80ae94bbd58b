//! C identifier mapping.
//!
//! Source names are kept as-is in the generated C unless they collide with
//! a C keyword, a C library function the generated code calls, or one of
//! the runtime prefixes; those get a trailing `_`.
//!
//! Names containing `__` are reserved for generated companions such as
//! `buf__len` and are rejected in source by [`check_user_identifier`].
//!
//! | Source | C |
//! |--------|---|
//! | `count` | `count` |
//! | `int` | `int_` |
//! | `printf` | `printf_` |
//! | `mcu_led` | `mcu_led_` |

use alloc::format;
use alloc::string::{String, ToString};

use crate::{CompileError, CompileResult, Span};

const C_RESERVED: &[&str] = &[
    "auto", "bool", "break", "case", "char", "const", "continue", "default", "do", "double",
    "else", "enum", "extern", "false", "float", "for", "goto", "if", "inline", "int", "long",
    "register", "restrict", "return", "short", "signed", "sizeof", "static", "struct", "switch",
    "true", "typedef", "union", "unsigned", "void", "volatile", "while", "_Bool", "NULL",
    // Library functions referenced by generated code.
    "abs", "exit", "fabs", "floor", "fmod", "free", "main", "malloc", "pow", "printf", "strcmp",
    "strlen",
];

const RESERVED_PREFIXES: &[&str] = &["mcu_", "sim_hook_", "PY2MCU_", "TARGET_"];

/// Map a source identifier to its C spelling.
///
/// `main` is mapped like any other reserved name; the entry point is
/// emitted by the generator, never through this function.
pub fn c_identifier(name: &str) -> String {
    if C_RESERVED.contains(&name) || RESERVED_PREFIXES.iter().any(|p| name.starts_with(p)) {
        format!("{}_", name)
    } else {
        name.to_string()
    }
}

/// Reject identifiers that would clash with generated names.
pub fn check_user_identifier(name: &str, span: Span) -> CompileResult<()> {
    if name.contains("__") {
        return Err(CompileError::unsupported(
            &format!(
                "identifier `{}` contains `__`, which is reserved for generated names",
                name
            ),
            span,
        ));
    }
    Ok(())
}

/// Companion variable holding an array's current length.
pub fn length_name(c_name: &str) -> String {
    format!("{}__len", c_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_names_pass_through() {
        assert_eq!(c_identifier("led_pin"), "led_pin");
        assert_eq!(c_identifier("Sensor"), "Sensor");
    }

    #[test]
    fn test_reserved_names_get_suffix() {
        assert_eq!(c_identifier("int"), "int_");
        assert_eq!(c_identifier("free"), "free_");
        assert_eq!(c_identifier("mcu_state"), "mcu_state_");
    }

    #[test]
    fn test_double_underscore_rejected() {
        assert!(check_user_identifier("buf__len", Span::default()).is_err());
        assert!(check_user_identifier("buf_len", Span::default()).is_ok());
    }
}
