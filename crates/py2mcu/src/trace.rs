//! Stage tracing for one compile invocation.

use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;

/// Collects one line per pipeline stage when enabled.
///
/// With the `std` feature each line is also written to stderr as it is
/// recorded. A disabled tracer never builds its messages.
#[derive(Clone, Debug, Default)]
pub struct Tracer {
    enabled: bool,
    lines: Vec<String>,
}

impl Tracer {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            lines: Vec::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Record `stage` with the detail produced by `detail`.
    pub fn stage<F>(&mut self, stage: &str, detail: F)
    where
        F: FnOnce() -> String,
    {
        if !self.enabled {
            return;
        }
        let line = format!("py2mcu: {}: {}", stage, detail());
        #[cfg(feature = "std")]
        std::eprintln!("{}", line);
        self.lines.push(line);
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_tracer_skips_detail() {
        let mut tracer = Tracer::new(false);
        tracer.stage("parse", || unreachable!());
        assert!(tracer.lines().is_empty());
    }

    #[test]
    fn test_lines_are_prefixed() {
        let mut tracer = Tracer::new(true);
        tracer.stage("parse", || String::from("3 statements"));
        assert_eq!(tracer.lines(), ["py2mcu: parse: 3 statements"]);
    }
}
