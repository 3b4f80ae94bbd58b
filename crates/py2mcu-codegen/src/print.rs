//! `print()` lowering.
//!
//! A call such as
//!
//! ```text
//! print(f"ADC {channel}: {value:04x}", "ok", sep=" | ")
//! ```
//!
//! becomes a single `printf` whose format string is assembled from the
//! literal pieces and one conversion per value:
//!
//! ```text
//! printf("ADC %ld: %04lx | ok\n", (long)(channel), (unsigned long)(value));
//! ```
//!
//! Integers are passed through `long`/`long long` casts so the format does
//! not depend on how the target defines `int32_t`. Floats without a format
//! spec go through the `mcu_float_repr` runtime helper, which prints the
//! shortest digits that read back as the same value and keeps a `.0` on
//! whole numbers, so `print(1.0)` shows `1.0`.

use alloc::format;
use alloc::string::{String, ToString};
use alloc::vec::Vec;

use py2mcu_ast::{CompileError, CompileResult, Span, TypeDescriptor};

use crate::runtime::FLOAT_REPR_BUFFER;

/// Append `text` to `out` escaped for a C string literal. With `printf`,
/// `%` is doubled as well.
pub(crate) fn escape_c(text: &str, out: &mut String, printf: bool) {
    let mut prev = 0u8;
    for &b in text.as_bytes() {
        match b {
            b'\\' => out.push_str("\\\\"),
            b'"' => out.push_str("\\\""),
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            b'\t' => out.push_str("\\t"),
            b'%' if printf => out.push_str("%%"),
            // Keep `??x` from forming a trigraph.
            b'?' if prev == b'?' => out.push_str("\\?"),
            0x20..=0x7e => out.push(b as char),
            _ => out.push_str(&format!("\\{:03o}", b)),
        }
        prev = b;
    }
}

/// A quoted C string literal.
pub(crate) fn c_string(text: &str) -> String {
    let mut out = String::from("\"");
    escape_c(text, &mut out, false);
    out.push('"');
    out
}

/// The parts of a format spec that have a `printf` counterpart.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct FormatSpec {
    align: Option<char>,
    sign: Option<char>,
    alternate: bool,
    zero: bool,
    width: Option<u32>,
    precision: Option<u32>,
    conv: Option<char>,
}

fn digits(spec: &str) -> (Option<u32>, &str) {
    let end = spec
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(spec.len());
    if end == 0 {
        return (None, spec);
    }
    (spec[..end].parse().ok(), &spec[end..])
}

impl FormatSpec {
    /// Parse `[[fill]align][sign][#][0][width][.precision][type]`.
    fn parse(spec: &str) -> Result<Self, String> {
        let mut parsed = FormatSpec::default();
        let mut rest = spec;

        let mut chars = rest.chars();
        let first = chars.next();
        let second = chars.next();
        match (first, second) {
            (Some(fill), Some(align)) if matches!(align, '<' | '>' | '^' | '=') => {
                if fill != ' ' {
                    return Err(format!("fill character `{}` is not supported", fill));
                }
                parsed.align = Some(align);
                rest = &rest[fill.len_utf8() + 1..];
            }
            (Some(align), _) if matches!(align, '<' | '>' | '^' | '=') => {
                parsed.align = Some(align);
                rest = &rest[1..];
            }
            _ => {}
        }
        if matches!(parsed.align, Some('^') | Some('=')) {
            return Err(String::from("centered and `=` alignment are not supported"));
        }

        if let Some(sign @ ('+' | '-' | ' ')) = rest.chars().next() {
            parsed.sign = Some(sign);
            rest = &rest[1..];
        }
        if let Some(r) = rest.strip_prefix('#') {
            parsed.alternate = true;
            rest = r;
        }
        if let Some(r) = rest.strip_prefix('0') {
            parsed.zero = true;
            rest = r;
        }
        let (width, r) = digits(rest);
        parsed.width = width;
        rest = r;
        if rest.starts_with(',') || rest.starts_with('_') {
            return Err(String::from("digit grouping is not supported"));
        }
        if let Some(r) = rest.strip_prefix('.') {
            let (precision, r) = digits(r);
            if precision.is_none() {
                return Err(String::from("missing precision after `.`"));
            }
            parsed.precision = precision;
            rest = r;
        }
        match rest {
            "" => {}
            "d" | "x" | "X" | "o" | "f" | "F" | "e" | "E" | "g" | "G" | "s" => {
                parsed.conv = rest.chars().next();
            }
            other => return Err(format!("format type `{}` is not supported", other)),
        }
        Ok(parsed)
    }

    /// No type, precision, sign or zero padding: the value's own text,
    /// at most aligned in a field.
    fn is_repr(&self) -> bool {
        self.conv.is_none()
            && self.precision.is_none()
            && matches!(self.sign, None | Some('-'))
            && !self.zero
            && !self.alternate
    }

    fn flags(&self, left_default: bool) -> String {
        let mut flags = String::new();
        let left = match self.align {
            Some('<') => true,
            Some(_) => false,
            None => left_default,
        };
        if left {
            flags.push('-');
        }
        if let Some(sign @ ('+' | ' ')) = self.sign {
            flags.push(sign);
        }
        if self.alternate {
            flags.push('#');
        }
        if self.zero && !left {
            flags.push('0');
        }
        if let Some(width) = self.width {
            flags.push_str(&width.to_string());
        }
        if let Some(precision) = self.precision {
            flags.push('.');
            flags.push_str(&precision.to_string());
        }
        flags
    }
}

/// Integer cast and length modifier for `ty`, signed or forced unsigned.
fn int_conversion(ty: &TypeDescriptor, as_unsigned: bool) -> (&'static str, &'static str) {
    let (bits, signed) = match ty {
        TypeDescriptor::Int { bits, signed } => (*bits, *signed && !as_unsigned),
        _ => (32, !as_unsigned),
    };
    match (bits > 32, signed) {
        (false, true) => ("long", "l"),
        (false, false) => ("unsigned long", "l"),
        (true, true) => ("long long", "ll"),
        (true, false) => ("unsigned long long", "ll"),
    }
}

/// Builds one `printf` call.
#[derive(Clone, Debug, Default)]
pub(crate) struct Printf {
    format: String,
    args: Vec<String>,
    float_repr: bool,
}

impl Printf {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Whether the call needs the `mcu_float_repr` runtime helper.
    pub(crate) fn uses_float_repr(&self) -> bool {
        self.float_repr
    }

    pub(crate) fn text(&mut self, text: &str) {
        escape_c(text, &mut self.format, true);
    }

    /// Add a value of type `ty`, already lowered to the C expression `expr`.
    pub(crate) fn value(
        &mut self,
        ty: &TypeDescriptor,
        expr: &str,
        spec: Option<&str>,
        span: Span,
    ) -> CompileResult<()> {
        let spec = match spec {
            Some(spec) => FormatSpec::parse(spec).map_err(|msg| {
                CompileError::unsupported(&format!("format spec `{}`: {}", spec, msg), span)
            })?,
            None => FormatSpec::default(),
        };
        let bad_code = |code: char| {
            CompileError::mismatch(
                &format!(
                    "format code `{}` cannot be used with a `{}` value",
                    code,
                    ty.describe()
                ),
                span,
            )
        };

        match ty {
            TypeDescriptor::Str { .. } => {
                match spec.conv {
                    None | Some('s') => {}
                    Some(code) => return Err(bad_code(code)),
                }
                if spec.zero || spec.sign.is_some() {
                    return Err(CompileError::unsupported(
                        "sign and zero padding are not supported for strings",
                        span,
                    ));
                }
                self.conversion(&spec.flags(true), "", 's', String::from(expr));
            }
            TypeDescriptor::Bool if spec.conv.is_none() || spec.conv == Some('s') => {
                let text = format!("({} ? \"True\" : \"False\")", expr);
                self.conversion(&spec.flags(true), "", 's', text);
            }
            TypeDescriptor::Int { .. } | TypeDescriptor::Bool => match spec.conv {
                None | Some('d') => {
                    let (cast, length) = int_conversion(ty, false);
                    let code = if cast.starts_with("unsigned") { 'u' } else { 'd' };
                    self.conversion(&spec.flags(false), length, code, format!("({})({})", cast, expr));
                }
                Some(code @ ('x' | 'X' | 'o')) => {
                    let (cast, length) = int_conversion(ty, true);
                    self.conversion(&spec.flags(false), length, code, format!("({})({})", cast, expr));
                }
                Some(code @ ('f' | 'F' | 'e' | 'E' | 'g' | 'G')) => {
                    self.conversion(&spec.flags(false), "", code, format!("(double)({})", expr));
                }
                Some(code) => return Err(bad_code(code)),
            },
            TypeDescriptor::Float { .. } if spec.is_repr() => {
                self.float_repr = true;
                let text = format!(
                    "mcu_float_repr((char[{n}]){{0}}, {n}, (double)({e}))",
                    n = FLOAT_REPR_BUFFER,
                    e = expr
                );
                self.conversion(&spec.flags(false), "", 's', text);
            }
            TypeDescriptor::Float { .. } => {
                let code = match spec.conv {
                    None => 'g',
                    Some(code @ ('f' | 'F' | 'e' | 'E' | 'g' | 'G')) => code,
                    Some(code) => return Err(bad_code(code)),
                };
                self.conversion(&spec.flags(false), "", code, format!("(double)({})", expr));
            }
            TypeDescriptor::Array { .. } | TypeDescriptor::Unknown => {
                return Err(CompileError::unsupported(
                    &format!("cannot print a `{}` value", ty.describe()),
                    span,
                ))
            }
        }
        Ok(())
    }

    fn conversion(&mut self, flags: &str, length: &str, code: char, arg: String) {
        self.format.push('%');
        self.format.push_str(flags);
        self.format.push_str(length);
        self.format.push(code);
        self.args.push(arg);
    }

    /// The finished call statement.
    pub(crate) fn finish(self) -> String {
        let mut call = format!("printf(\"{}\"", self.format);
        for arg in &self.args {
            call.push_str(", ");
            call.push_str(arg);
        }
        call.push_str(");");
        call
    }
}
