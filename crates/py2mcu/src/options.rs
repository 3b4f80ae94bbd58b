//! Compile options.

use alloc::format;
use alloc::string::{String, ToString};
use core::fmt;
use core::str::FromStr;

use py2mcu_ast::{CompileError, CompileResult, ErrorKind};
use py2mcu_codegen::CCodegenOptions;

/// Optimization level, `O0` through `O3`.
///
/// Every level above `O0` frees unique lists after their last use instead
/// of at function exit. Higher levels are accepted for compatibility and
/// currently behave like `O1`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OptLevel(u8);

impl OptLevel {
    pub const O0: OptLevel = OptLevel(0);
    pub const O1: OptLevel = OptLevel(1);
    pub const O2: OptLevel = OptLevel(2);
    pub const O3: OptLevel = OptLevel(3);

    pub fn new(level: u8) -> CompileResult<Self> {
        if level > 3 {
            return Err(CompileError::new(
                ErrorKind::InvalidOption,
                &format!("optimization level {} is out of range 0-3", level),
            ));
        }
        Ok(OptLevel(level))
    }

    pub fn level(&self) -> u8 {
        self.0
    }

    pub fn elides_dead_stores(&self) -> bool {
        self.0 >= 1
    }
}

impl Default for OptLevel {
    fn default() -> Self {
        OptLevel::O2
    }
}

impl fmt::Display for OptLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "O{}", self.0)
    }
}

impl FromStr for OptLevel {
    type Err = CompileError;

    /// Accepts `2`, `O2` and `-O2`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let digits = trimmed
            .strip_prefix("-O")
            .or_else(|| trimmed.strip_prefix('O'))
            .unwrap_or(trimmed);
        let invalid = || {
            CompileError::new(
                ErrorKind::InvalidOption,
                &format!("`{}` is not an optimization level; expected 0, 1, 2 or 3", trimmed),
            )
        };
        if digits.len() != 1 {
            return Err(invalid());
        }
        let level: u8 = digits.parse().map_err(|_| invalid())?;
        OptLevel::new(level).map_err(|_| invalid())
    }
}

/// Options for one compiler instance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompileOptions {
    /// Target id in any accepted spelling.
    pub target: String,
    pub opt_level: OptLevel,
    /// Trace each stage to stderr.
    pub verbose: bool,
    /// Default arena capacity in bytes.
    pub arena_size: usize,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            target: String::from("pc"),
            opt_level: OptLevel::default(),
            verbose: false,
            arena_size: 4096,
        }
    }
}

impl CompileOptions {
    pub fn new(target: &str) -> Self {
        Self {
            target: target.to_string(),
            ..Self::default()
        }
    }

    pub fn with_target(mut self, target: &str) -> Self {
        self.target = target.to_string();
        self
    }

    pub fn with_opt_level(mut self, opt_level: OptLevel) -> Self {
        self.opt_level = opt_level;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn with_arena_size(mut self, arena_size: usize) -> Self {
        self.arena_size = arena_size;
        self
    }

    /// Reject values no target can use.
    pub fn validate(&self) -> CompileResult<()> {
        if self.arena_size == 0 {
            return Err(CompileError::new(
                ErrorKind::InvalidOption,
                "arena size must be at least one byte",
            ));
        }
        Ok(())
    }

    pub(crate) fn codegen_options(&self) -> CCodegenOptions {
        CCodegenOptions::new()
            .with_dead_store_elision(self.opt_level.elides_dead_stores())
            .with_arena_size(self.arena_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_levels() {
        assert_eq!("0".parse::<OptLevel>().unwrap(), OptLevel::O0);
        assert_eq!("O3".parse::<OptLevel>().unwrap(), OptLevel::O3);
        assert_eq!("-O1".parse::<OptLevel>().unwrap(), OptLevel::O1);
        assert_eq!(OptLevel::default().to_string(), "O2");
    }

    #[test]
    fn test_bad_levels() {
        for text in ["4", "O", "-O12", "fast", ""] {
            let err = text.parse::<OptLevel>().unwrap_err();
            assert_eq!(err.kind, ErrorKind::InvalidOption, "for `{}`", text);
        }
        assert!(OptLevel::new(9).is_err());
    }

    #[test]
    fn test_only_o0_keeps_dead_stores() {
        assert!(!OptLevel::O0.elides_dead_stores());
        assert!(OptLevel::O1.elides_dead_stores());
        assert!(OptLevel::O3.elides_dead_stores());
    }

    #[test]
    fn test_builder() {
        let options = CompileOptions::new("stm32f4")
            .with_opt_level(OptLevel::O0)
            .with_arena_size(512)
            .with_verbose(true);
        assert_eq!(options.target, "stm32f4");
        assert!(options.verbose);
        assert!(!options.codegen_options().elide_dead_stores);
        assert_eq!(options.codegen_options().arena_size, 512);
        assert!(CompileOptions::default().with_arena_size(0).validate().is_err());
    }
}
