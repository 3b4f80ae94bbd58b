//! Runtime support emitted into generated units.
//!
//! Only the pieces a unit uses are written, as `static` functions, so the
//! output needs no separate runtime library. Besides the memory strategies
//! this covers the shortest round-trip float text used by `print()`.

use alloc::format;
use alloc::string::String;

/// Which runtime sections a unit needs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RuntimeNeeds {
    pub arena: bool,
    pub counted: bool,
    pub unique: bool,
    /// `mcu_float_repr`, for floats printed without a format spec.
    pub float_repr: bool,
}

impl RuntimeNeeds {
    pub fn any(&self) -> bool {
        self.memory() || self.float_repr
    }

    pub fn memory(&self) -> bool {
        self.arena || self.counted || self.unique
    }

    pub fn merge(&mut self, other: RuntimeNeeds) {
        self.arena |= other.arena;
        self.counted |= other.counted;
        self.unique |= other.unique;
        self.float_repr |= other.float_repr;
    }

    pub fn heap(&self) -> bool {
        self.counted || self.unique
    }
}

const ARENA: &str = r#"static uintptr_t mcu_arena_buffer[(PY2MCU_ARENA_SIZE + sizeof(uintptr_t) - 1) / sizeof(uintptr_t)];
static size_t mcu_arena_top = 0;

static size_t mcu_arena_acquire(void) {
    return mcu_arena_top;
}

static void *mcu_arena_alloc(size_t size) {
    size_t aligned = (size + sizeof(uintptr_t) - 1) & ~(sizeof(uintptr_t) - 1);
    if (aligned > sizeof(mcu_arena_buffer) - mcu_arena_top) {
        return NULL;
    }
    void *block = (uint8_t *)mcu_arena_buffer + mcu_arena_top;
    mcu_arena_top += aligned;
    return block;
}

static void mcu_arena_release(size_t mark) {
    mcu_arena_top = mark;
}
"#;

const COUNTED: &str = r#"typedef union {
    size_t refs;
    max_align_t align;
} mcu_rc_header;

static void *mcu_rc_alloc(size_t size) {
    mcu_rc_header *header = (mcu_rc_header *)malloc(sizeof(mcu_rc_header) + size);
    if (header == NULL) {
        return NULL;
    }
    header->refs = 1;
    return header + 1;
}

static void mcu_rc_retain(void *block) {
    if (block != NULL) {
        ((mcu_rc_header *)block - 1)->refs += 1;
    }
}

static void mcu_rc_release(void *block) {
    if (block == NULL) {
        return;
    }
    mcu_rc_header *header = (mcu_rc_header *)block - 1;
    header->refs -= 1;
    if (header->refs == 0) {
        free(header);
    }
}
"#;

const UNIQUE: &str = r#"static void *mcu_alloc(size_t size) {
    return malloc(size);
}

static void mcu_free(void *block) {
    free(block);
}
"#;

/// Shortest digits that read back as `v`, in the host's `repr` layout:
/// positional between 1e-4 and 1e16, always with a `.` or an exponent.
const FLOAT_REPR: &str = r#"static const char *mcu_float_repr(char *buf, size_t size, double v) {
    int digits;
    if (v != v) {
        return "nan";
    }
    if (v - v != 0.0) {
        return v > 0 ? "inf" : "-inf";
    }
    for (digits = 1; digits < 17; digits++) {
        snprintf(buf, size, "%.*e", digits - 1, v);
        if (strtod(buf, NULL) == v) {
            break;
        }
    }
    snprintf(buf, size, "%.*e", digits - 1, v);
    int exponent = (int)strtol(strchr(buf, 'e') + 1, NULL, 10);
    if (exponent >= -4 && exponent < 16) {
        int decimals = digits - 1 - exponent;
        snprintf(buf, size, "%.*f", decimals > 0 ? decimals : 0, v);
        size_t n = strlen(buf);
        if (strchr(buf, '.') == NULL && n + 2 < size) {
            buf[n] = '.';
            buf[n + 1] = '0';
            buf[n + 2] = '\0';
        }
    }
    return buf;
}
"#;

/// Size of the scratch buffer passed to `mcu_float_repr` at each use.
pub const FLOAT_REPR_BUFFER: usize = 32;

/// The runtime sections selected by `needs`, or an empty string.
pub fn runtime_prelude(needs: RuntimeNeeds, arena_size: usize) -> String {
    let mut out = String::new();
    if !needs.any() {
        return out;
    }
    if needs.heap() || needs.float_repr {
        out.push_str("#include <stdlib.h>\n\n");
    }
    if needs.float_repr {
        out.push_str("/* py2mcu float formatting */\n");
        out.push_str(FLOAT_REPR);
        out.push('\n');
    }
    if needs.memory() {
        out.push_str("/* py2mcu memory runtime */\n");
    }
    if needs.arena {
        out.push_str(&format!(
            "#ifndef PY2MCU_ARENA_SIZE\n#define PY2MCU_ARENA_SIZE {}\n#endif\n\n",
            arena_size
        ));
        out.push_str(ARENA);
        out.push('\n');
    }
    if needs.counted {
        out.push_str(COUNTED);
        out.push('\n');
    }
    if needs.unique {
        out.push_str(UNIQUE);
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nothing_needed_is_empty() {
        assert!(runtime_prelude(RuntimeNeeds::default(), 4096).is_empty());
    }

    #[test]
    fn test_arena_only_has_no_heap() {
        let needs = RuntimeNeeds {
            arena: true,
            ..RuntimeNeeds::default()
        };
        let text = runtime_prelude(needs, 512);
        assert!(text.contains("#define PY2MCU_ARENA_SIZE 512"), "got:\n{}", text);
        assert!(text.contains("mcu_arena_acquire"));
        assert!(!text.contains("malloc"), "got:\n{}", text);
    }

    #[test]
    fn test_float_repr_without_memory_runtime() {
        let needs = RuntimeNeeds {
            float_repr: true,
            ..RuntimeNeeds::default()
        };
        let text = runtime_prelude(needs, 4096);
        assert!(text.starts_with("#include <stdlib.h>"), "got:\n{}", text);
        assert!(text.contains("static const char *mcu_float_repr(char *buf, size_t size, double v)"));
        assert!(text.contains("buf[n] = '.';"), "got:\n{}", text);
        assert!(!text.contains("memory runtime"), "got:\n{}", text);
    }

    #[test]
    fn test_counted_and_unique_sections() {
        let needs = RuntimeNeeds {
            counted: true,
            unique: true,
            ..RuntimeNeeds::default()
        };
        let text = runtime_prelude(needs, 4096);
        assert!(text.contains("static void *mcu_rc_alloc(size_t size)"));
        assert!(text.contains("static void mcu_free(void *block)"));
        assert!(!text.contains("PY2MCU_ARENA_SIZE"));
    }
}
