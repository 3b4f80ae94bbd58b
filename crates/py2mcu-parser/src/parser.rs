//! Parser implementation.
//!
//! Statements are recognized per logical line (see [`crate::lines`]); blocks
//! follow indentation. Expressions are parsed with `nom` by recursive
//! descent, one function per precedence level:
//!
//! ```text
//! test        = or_test ["if" or_test "else" test] | lambda ;
//! or_test     = and_test {"or" and_test} ;
//! and_test    = not_test {"and" not_test} ;
//! not_test    = "not" not_test | comparison ;
//! comparison  = bit_or {comp_op bit_or} ;
//! bit_or      = xor {"|" xor} ;   xor = bit_and {"^" bit_and} ;
//! bit_and     = shift {"&" shift} ;   shift = arith {("<<"|">>") arith} ;
//! arith       = term {("+"|"-") term} ;
//! term        = factor {("*"|"/"|"//"|"%"|"@") factor} ;
//! factor      = ("+"|"-"|"~") factor | power ;
//! power       = ["await"] primary ["**" factor] ;
//! primary     = atom {call | subscript | "." NAME} ;
//! ```

use alloc::boxed::Box;
use alloc::format;
use alloc::string::{String, ToString};
use alloc::vec;
use alloc::vec::Vec;
use core::iter::Peekable;
use core::str::Chars;

use nom::{
    branch::alt,
    bytes::complete::{tag, take_while1},
    character::complete::char,
    combinator::{opt, value},
    error::{ErrorKind as NomErrorKind, ParseError},
    IResult, Parser,
};
use py2mcu_ast::{
    Alias, BinaryOp, BoolOp, ClassDef, CmpOp, CompileError, CompileResult, ComprehensionClause,
    ComprehensionKind, Constant, Decorator, Docstring, ExceptHandler, Expr, ExprKind,
    FStringPart, FunctionDef, Keyword, Module, Param, ParamKind, Span, Stmt, StmtKind, UnaryOp,
    WithItem,
};

use crate::lines::{split_lines, LineIndex, LogicalLine};

/// Reserved words; soft keywords such as `match` remain identifiers.
const KEYWORDS: &[&str] = &[
    "False", "None", "True", "and", "as", "assert", "async", "await", "break", "class",
    "continue", "def", "del", "elif", "else", "except", "finally", "for", "from", "global", "if",
    "import", "in", "is", "lambda", "nonlocal", "not", "or", "pass", "raise", "return", "try",
    "while", "with", "yield",
];

/// Operator spelling, characters that must not follow it, and the operator.
type OpTable = &'static [(&'static str, &'static [char], BinaryOp)];

const BIT_OR: OpTable = &[("|", &['='], BinaryOp::BitOr)];
const BIT_XOR: OpTable = &[("^", &['='], BinaryOp::BitXor)];
const BIT_AND: OpTable = &[("&", &['='], BinaryOp::BitAnd)];
const SHIFT: OpTable = &[("<<", &['='], BinaryOp::Shl), (">>", &['='], BinaryOp::Shr)];
const ARITH: OpTable = &[("+", &['='], BinaryOp::Add), ("-", &['=', '>'], BinaryOp::Sub)];
const TERM: OpTable = &[
    ("//", &['='], BinaryOp::FloorDiv),
    ("/", &['=', '/'], BinaryOp::Div),
    ("*", &['=', '*'], BinaryOp::Mul),
    ("%", &['='], BinaryOp::Mod),
    ("@", &['='], BinaryOp::MatMul),
];

/// Parse error carrying the failing input and, for hard failures, a message.
#[derive(Debug)]
struct SyntaxError<'s> {
    input: &'s str,
    message: Option<&'static str>,
}

impl<'s> ParseError<&'s str> for SyntaxError<'s> {
    fn from_error_kind(input: &'s str, _kind: NomErrorKind) -> Self {
        Self {
            input,
            message: None,
        }
    }

    fn append(_input: &'s str, _kind: NomErrorKind, other: Self) -> Self {
        other
    }
}

type PResult<'s, T> = IResult<&'s str, T, SyntaxError<'s>>;

fn error<T>(input: &str) -> PResult<'_, T> {
    Err(nom::Err::Error(SyntaxError {
        input,
        message: None,
    }))
}

fn failure<'s, T>(input: &'s str, message: &'static str) -> PResult<'s, T> {
    Err(nom::Err::Failure(SyntaxError {
        input,
        message: Some(message),
    }))
}

fn sym<'s>(s: &'static str) -> impl Parser<&'s str, Output = &'s str, Error = SyntaxError<'s>> {
    tag(s)
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Skip whitespace. Comments are already blanked, and newlines left in a
/// logical line are inside brackets.
fn skip_ws(input: &str) -> &str {
    input.trim_start_matches([' ', '\t', '\n', '\r', '\x0c'])
}

/// `kw` as a whole word.
fn keyword<'s>(input: &'s str, kw: &str) -> Option<&'s str> {
    let rest = input.strip_prefix(kw)?;
    if rest.starts_with(is_ident_char) {
        None
    } else {
        Some(rest)
    }
}

/// Punctuation `p` not followed by any of `not_followed`.
fn punct<'s>(input: &'s str, p: &str, not_followed: &[char]) -> Option<&'s str> {
    let rest = input.strip_prefix(p)?;
    if rest.starts_with(not_followed) {
        None
    } else {
        Some(rest)
    }
}

/// Length of a string prefix such as `rb` when a quote follows it.
fn string_prefix_len(input: &str) -> Option<usize> {
    let bytes = input.as_bytes();
    for n in 0..=2 {
        match bytes.get(n) {
            Some(b'"' | b'\'') => {
                let prefix = input[..n].to_ascii_lowercase();
                return matches!(
                    prefix.as_str(),
                    "" | "r" | "u" | "b" | "f" | "br" | "rb" | "fr" | "rf"
                )
                .then_some(n);
            }
            Some(c) if c.is_ascii_alphabetic() => {}
            _ => return None,
        }
    }
    None
}

fn starts_comprehension(input: &str) -> bool {
    keyword(input, "for").is_some()
        || keyword(input, "async").is_some_and(|r| keyword(skip_ws(r), "for").is_some())
}

fn take_hex(chars: &mut Peekable<Chars<'_>>, n: usize) -> Option<u32> {
    let mut v = 0u32;
    for _ in 0..n {
        v = v * 16 + chars.next()?.to_digit(16)?;
    }
    Some(v)
}

fn take_octal(first: char, chars: &mut Peekable<Chars<'_>>) -> u32 {
    let mut v = first.to_digit(8).unwrap_or(0);
    for _ in 0..2 {
        match chars.peek().and_then(|c| c.to_digit(8)) {
            Some(d) => {
                v = v * 8 + d;
                chars.next();
            }
            None => break,
        }
    }
    v
}

/// Process backslash escapes of a string literal body.
fn decode_str(text: &str, raw: bool) -> Result<String, &'static str> {
    if raw || !text.contains('\\') {
        return Ok(text.to_string());
    }
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        let Some(e) = chars.next() else {
            out.push('\\');
            break;
        };
        let decoded = match e {
            '\n' => continue,
            '\\' | '\'' | '"' => e,
            'a' => '\x07',
            'b' => '\x08',
            'f' => '\x0c',
            'n' => '\n',
            'r' => '\r',
            't' => '\t',
            'v' => '\x0b',
            '0'..='7' => char::from_u32(take_octal(e, &mut chars)).ok_or("invalid octal escape")?,
            'x' | 'u' | 'U' => {
                let n = match e {
                    'x' => 2,
                    'u' => 4,
                    _ => 8,
                };
                take_hex(&mut chars, n)
                    .and_then(char::from_u32)
                    .ok_or("truncated or invalid hexadecimal escape")?
            }
            'N' => return Err("named unicode escapes are not supported"),
            other => {
                out.push('\\');
                other
            }
        };
        out.push(decoded);
    }
    Ok(out)
}

fn decode_bytes(text: &str, raw: bool) -> Result<Vec<u8>, &'static str> {
    if !text.is_ascii() {
        return Err("bytes can only contain ASCII literal characters");
    }
    if raw {
        return Ok(text.as_bytes().to_vec());
    }
    let mut out = Vec::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c as u8);
            continue;
        }
        match chars.next() {
            None => out.push(b'\\'),
            Some('x') => out.push(take_hex(&mut chars, 2).ok_or("truncated \\xXX escape")? as u8),
            Some(d @ '0'..='7') => out.push((take_octal(d, &mut chars) & 0xff) as u8),
            Some(e) => match decode_str(&format!("\\{}", e), false) {
                Ok(s) if s.len() == 1 => out.extend_from_slice(s.as_bytes()),
                _ => {
                    out.push(b'\\');
                    out.push(e as u8);
                }
            },
        }
    }
    Ok(out)
}

/// One quoted piece of a (possibly implicitly concatenated) string literal.
struct StrAtom<'s> {
    start: &'s str,
    content: &'s str,
    raw: bool,
    bytes: bool,
    fstring: bool,
}

/// Parse a module.
pub fn parse_module(source: &str) -> CompileResult<Module> {
    let text = split_lines(source)?;
    let mut parser = SourceParser {
        src: &text.clean,
        original: source,
        index: &text.index,
        lines: &text.lines,
        pos: 0,
    };
    let mut body = parser.block(0)?;
    let docstring = parser.take_docstring(&mut body);
    Ok(Module { docstring, body })
}

/// Parse a single expression, e.g. an annotation.
pub fn parse_expression(source: &str) -> CompileResult<Expr> {
    let text = split_lines(source)?;
    let parser = SourceParser {
        src: &text.clean,
        original: source,
        index: &text.index,
        lines: &text.lines,
        pos: 0,
    };
    let input = parser.src;
    let (rest, expr) = parser.run(parser.expr_list(input))?;
    parser.expect_end(rest)?;
    Ok(expr)
}

struct SourceParser<'s> {
    /// Source with comments and continuations blanked.
    src: &'s str,
    original: &'s str,
    index: &'s LineIndex,
    lines: &'s [LogicalLine],
    pos: usize,
}

// Expressions.
impl<'s> SourceParser<'s> {
    fn offset(&self, input: &str) -> usize {
        (input.as_ptr() as usize).saturating_sub(self.src.as_ptr() as usize)
    }

    fn span(&self, input: &str) -> Span {
        self.index.span(self.original, self.offset(input))
    }

    fn mk(&self, kind: ExprKind, at: &str) -> Expr {
        Expr::new(kind, self.span(at))
    }

    fn identifier(&self, input: &'s str) -> PResult<'s, &'s str> {
        let input = skip_ws(input);
        let (rest, name) = take_while1::<_, _, SyntaxError<'s>>(is_ident_char).parse(input)?;
        if name.starts_with(|c: char| c.is_ascii_digit()) || KEYWORDS.contains(&name) {
            return error(input);
        }
        Ok((rest, name))
    }

    fn close(&self, input: &'s str, c: char) -> PResult<'s, ()> {
        let input = skip_ws(input);
        let (rest, _) = char::<_, SyntaxError<'s>>(c).parse(input)?;
        Ok((rest, ()))
    }

    /// `NAME := test`, or a plain `test`.
    fn named_test(&self, input: &'s str) -> PResult<'s, Expr> {
        let input = skip_ws(input);
        if let Ok((rest, name)) = self.identifier(input) {
            if let Some(rest) = skip_ws(rest).strip_prefix(":=") {
                let (rest, value) = self.test(rest)?;
                let kind = ExprKind::NamedExpr {
                    target: name.to_string(),
                    value: Box::new(value),
                };
                return Ok((rest, self.mk(kind, input)));
            }
        }
        self.test(input)
    }

    fn test(&self, input: &'s str) -> PResult<'s, Expr> {
        let input = skip_ws(input);
        if let Some(rest) = keyword(input, "lambda") {
            return self.lambda(input, rest);
        }
        let (rest, body) = self.or_test(input)?;
        if let Some(cond_in) = keyword(skip_ws(rest), "if") {
            if let Ok((r, test)) = self.or_test(cond_in) {
                if let Some(else_in) = keyword(skip_ws(r), "else") {
                    let (r, orelse) = self.test(else_in)?;
                    let kind = ExprKind::IfExp {
                        test: Box::new(test),
                        body: Box::new(body),
                        orelse: Box::new(orelse),
                    };
                    return Ok((r, self.mk(kind, input)));
                }
            }
        }
        Ok((rest, body))
    }

    fn lambda(&self, start: &'s str, input: &'s str) -> PResult<'s, Expr> {
        let (rest, params) = self.params(input, ':', false)?;
        let (rest, ()) = self.close(rest, ':')?;
        let (rest, body) = self.test(rest)?;
        let kind = ExprKind::Lambda {
            params,
            body: Box::new(body),
        };
        Ok((rest, self.mk(kind, start)))
    }

    fn bool_chain(
        &self,
        input: &'s str,
        kw: &str,
        op: BoolOp,
        next: fn(&Self, &'s str) -> PResult<'s, Expr>,
    ) -> PResult<'s, Expr> {
        let input = skip_ws(input);
        let (mut rest, first) = next(self, input)?;
        let mut values = Vec::new();
        while let Some(r) = keyword(skip_ws(rest), kw) {
            let (r, v) = next(self, r)?;
            values.push(v);
            rest = r;
        }
        if values.is_empty() {
            return Ok((rest, first));
        }
        values.insert(0, first);
        Ok((rest, self.mk(ExprKind::BoolOp { op, values }, input)))
    }

    fn or_test(&self, input: &'s str) -> PResult<'s, Expr> {
        self.bool_chain(input, "or", BoolOp::Or, Self::and_test)
    }

    fn and_test(&self, input: &'s str) -> PResult<'s, Expr> {
        self.bool_chain(input, "and", BoolOp::And, Self::not_test)
    }

    fn not_test(&self, input: &'s str) -> PResult<'s, Expr> {
        let input = skip_ws(input);
        if let Some(rest) = keyword(input, "not") {
            let (rest, operand) = self.not_test(rest)?;
            let kind = ExprKind::UnaryOp {
                op: UnaryOp::Not,
                operand: Box::new(operand),
            };
            return Ok((rest, self.mk(kind, input)));
        }
        self.comparison(input)
    }

    fn comp_op(&self, input: &'s str) -> Option<(&'s str, CmpOp)> {
        let symbolic: PResult<'s, CmpOp> = alt((
            value(CmpOp::Eq, sym("==")),
            value(CmpOp::NotEq, sym("!=")),
            value(CmpOp::LtE, sym("<=")),
            value(CmpOp::GtE, sym(">=")),
        ))
        .parse(input);
        if let Ok(found) = symbolic {
            return Some(found);
        }
        if let Some(r) = punct(input, "<", &['<', '=']) {
            return Some((r, CmpOp::Lt));
        }
        if let Some(r) = punct(input, ">", &['>', '=']) {
            return Some((r, CmpOp::Gt));
        }
        if let Some(r) = keyword(input, "in") {
            return Some((r, CmpOp::In));
        }
        if let Some(r) = keyword(input, "not").and_then(|r| keyword(skip_ws(r), "in")) {
            return Some((r, CmpOp::NotIn));
        }
        if let Some(r) = keyword(input, "is") {
            return match keyword(skip_ws(r), "not") {
                Some(r) => Some((r, CmpOp::IsNot)),
                None => Some((r, CmpOp::Is)),
            };
        }
        None
    }

    fn comparison(&self, input: &'s str) -> PResult<'s, Expr> {
        let input = skip_ws(input);
        let (mut rest, left) = self.bit_or(input)?;
        let mut ops = Vec::new();
        let mut comparators = Vec::new();
        while let Some((r, op)) = self.comp_op(skip_ws(rest)) {
            let (r, right) = self.bit_or(r)?;
            ops.push(op);
            comparators.push(right);
            rest = r;
        }
        if ops.is_empty() {
            return Ok((rest, left));
        }
        let kind = ExprKind::Compare {
            left: Box::new(left),
            ops,
            comparators,
        };
        Ok((rest, self.mk(kind, input)))
    }

    fn binary_chain(
        &self,
        input: &'s str,
        ops: OpTable,
        next: fn(&Self, &'s str) -> PResult<'s, Expr>,
    ) -> PResult<'s, Expr> {
        let input = skip_ws(input);
        let (mut rest, mut left) = next(self, input)?;
        loop {
            let after = skip_ws(rest);
            let Some((r, op)) = ops
                .iter()
                .find_map(|(p, nf, op)| punct(after, p, nf).map(|r| (r, *op)))
            else {
                break;
            };
            let (r, right) = next(self, r)?;
            let kind = ExprKind::BinOp {
                left: Box::new(left),
                op,
                right: Box::new(right),
            };
            left = self.mk(kind, input);
            rest = r;
        }
        Ok((rest, left))
    }

    fn bit_or(&self, input: &'s str) -> PResult<'s, Expr> {
        self.binary_chain(input, BIT_OR, Self::xor)
    }

    fn xor(&self, input: &'s str) -> PResult<'s, Expr> {
        self.binary_chain(input, BIT_XOR, Self::bit_and)
    }

    fn bit_and(&self, input: &'s str) -> PResult<'s, Expr> {
        self.binary_chain(input, BIT_AND, Self::shift)
    }

    fn shift(&self, input: &'s str) -> PResult<'s, Expr> {
        self.binary_chain(input, SHIFT, Self::arith)
    }

    fn arith(&self, input: &'s str) -> PResult<'s, Expr> {
        self.binary_chain(input, ARITH, Self::term)
    }

    fn term(&self, input: &'s str) -> PResult<'s, Expr> {
        self.binary_chain(input, TERM, Self::factor)
    }

    fn factor(&self, input: &'s str) -> PResult<'s, Expr> {
        let input = skip_ws(input);
        let op = if let Some(r) = punct(input, "-", &['=']) {
            Some((r, UnaryOp::Neg))
        } else if let Some(r) = punct(input, "+", &['=']) {
            Some((r, UnaryOp::Pos))
        } else {
            punct(input, "~", &[]).map(|r| (r, UnaryOp::Invert))
        };
        if let Some((rest, op)) = op {
            let (rest, operand) = self.factor(rest)?;
            let kind = ExprKind::UnaryOp {
                op,
                operand: Box::new(operand),
            };
            return Ok((rest, self.mk(kind, input)));
        }
        self.power(input)
    }

    fn power(&self, input: &'s str) -> PResult<'s, Expr> {
        let input = skip_ws(input);
        let (rest, base) = match keyword(input, "await") {
            Some(r) => {
                let (r, operand) = self.primary(r)?;
                (r, self.mk(ExprKind::Await(Box::new(operand)), input))
            }
            None => self.primary(input)?,
        };
        if let Some(r) = punct(skip_ws(rest), "**", &['=']) {
            let (r, exponent) = self.factor(r)?;
            let kind = ExprKind::BinOp {
                left: Box::new(base),
                op: BinaryOp::Pow,
                right: Box::new(exponent),
            };
            return Ok((r, self.mk(kind, input)));
        }
        Ok((rest, base))
    }

    fn primary(&self, input: &'s str) -> PResult<'s, Expr> {
        let input = skip_ws(input);
        let (mut rest, mut expr) = self.atom(input)?;
        loop {
            let after = skip_ws(rest);
            if let Some(r) = after.strip_prefix('(') {
                let (r, (args, keywords)) = self.call_args(r)?;
                let kind = ExprKind::Call {
                    func: Box::new(expr),
                    args,
                    keywords,
                };
                expr = self.mk(kind, input);
                rest = r;
            } else if let Some(r) = after.strip_prefix('[') {
                let (r, index) = self.subscript(r)?;
                let kind = ExprKind::Subscript {
                    value: Box::new(expr),
                    index: Box::new(index),
                };
                expr = self.mk(kind, input);
                rest = r;
            } else if let Some(r) = punct(after, ".", &['.']) {
                let (r, attr) = self.identifier(r)?;
                let kind = ExprKind::Attribute {
                    value: Box::new(expr),
                    attr: attr.to_string(),
                };
                expr = self.mk(kind, input);
                rest = r;
            } else {
                break;
            }
        }
        Ok((rest, expr))
    }

    fn atom(&self, input: &'s str) -> PResult<'s, Expr> {
        let input = skip_ws(input);
        let mut chars = input.chars();
        let first = chars.next();
        let second = chars.next();
        match first {
            None => error(input),
            Some('(') => self.paren(input),
            Some('[') => self.list_display(input),
            Some('{') => self.brace(input),
            Some('.') if input.starts_with("...") => Ok((
                &input[3..],
                self.mk(ExprKind::Constant(Constant::Ellipsis), input),
            )),
            Some('.') if second.is_some_and(|c| c.is_ascii_digit()) => self.number(input),
            Some(c) if c.is_ascii_digit() => self.number(input),
            Some(_) if string_prefix_len(input).is_some() => self.strings(input),
            Some(c) if is_ident_char(c) => {
                let constant = [
                    ("True", Constant::Bool(true)),
                    ("False", Constant::Bool(false)),
                    ("None", Constant::None),
                ]
                .into_iter()
                .find_map(|(kw, c)| keyword(input, kw).map(|r| (r, c)));
                if let Some((rest, constant)) = constant {
                    return Ok((rest, self.mk(ExprKind::Constant(constant), input)));
                }
                let (rest, name) = self.identifier(input)?;
                Ok((rest, self.mk(ExprKind::Name(name.to_string()), input)))
            }
            _ => error(input),
        }
    }

    fn number(&self, input: &'s str) -> PResult<'s, Expr> {
        let bytes = input.as_bytes();
        let radix = match (bytes.first(), bytes.get(1)) {
            (Some(b'0'), Some(b'x' | b'X')) => 16,
            (Some(b'0'), Some(b'o' | b'O')) => 8,
            (Some(b'0'), Some(b'b' | b'B')) => 2,
            _ => 10,
        };
        if radix != 10 {
            let (rest, digits) = take_while1::<_, _, SyntaxError<'s>>(|c: char| {
                c.is_ascii_alphanumeric() || c == '_'
            })
            .parse(&input[2..])?;
            let digits = digits.replace('_', "");
            let value = i128::from_str_radix(&digits, radix)
                .map_err(|_| nom::Err::Failure(SyntaxError {
                    input,
                    message: Some("invalid integer literal"),
                }))?;
            return Ok((rest, self.mk(ExprKind::Constant(Constant::Int(value)), input)));
        }

        let digits = |from: usize| {
            let mut end = from;
            while end < bytes.len() && (bytes[end].is_ascii_digit() || bytes[end] == b'_') {
                end += 1;
            }
            end
        };
        let mut end = digits(0);
        let mut is_float = false;
        if bytes.get(end) == Some(&b'.') {
            is_float = true;
            end = digits(end + 1);
        }
        if matches!(bytes.get(end), Some(b'e' | b'E')) {
            let mut exp = end + 1;
            if matches!(bytes.get(exp), Some(b'+' | b'-')) {
                exp += 1;
            }
            if bytes.get(exp).is_some_and(|b| b.is_ascii_digit()) {
                is_float = true;
                end = digits(exp);
            }
        }
        let text = input[..end].replace('_', "");
        let imaginary = matches!(bytes.get(end), Some(b'j' | b'J'));
        let rest = &input[end + usize::from(imaginary)..];
        if rest.starts_with(is_ident_char) {
            return failure(input, "invalid decimal literal");
        }
        let constant = if imaginary || is_float {
            let v: f64 = text
                .parse()
                .map_err(|_| nom::Err::Failure(SyntaxError {
                    input,
                    message: Some("invalid float literal"),
                }))?;
            if imaginary {
                Constant::Imaginary(v)
            } else {
                Constant::Float(v)
            }
        } else {
            Constant::Int(text.parse().map_err(|_| {
                nom::Err::Failure(SyntaxError {
                    input,
                    message: Some("integer literal is too large"),
                })
            })?)
        };
        Ok((rest, self.mk(ExprKind::Constant(constant), input)))
    }

    fn string_atom(&self, input: &'s str) -> PResult<'s, StrAtom<'s>> {
        let Some(n) = string_prefix_len(input) else {
            return error(input);
        };
        let prefix = input[..n].to_ascii_lowercase();
        let body = &input[n..];
        let quote = body.as_bytes()[0];
        let triple = body.len() >= 3 && body.as_bytes()[1] == quote && body.as_bytes()[2] == quote;
        let open = if triple { 3 } else { 1 };
        let bytes = body.as_bytes();
        let mut j = open;
        let close = loop {
            match bytes.get(j) {
                None => return failure(input, "unterminated string literal"),
                Some(b'\\') => j += 2,
                Some(&q) if q == quote => {
                    if !triple || (bytes.get(j + 1) == Some(&quote) && bytes.get(j + 2) == Some(&quote)) {
                        break j;
                    }
                    j += 1;
                }
                Some(_) => j += 1,
            }
        };
        let atom = StrAtom {
            start: input,
            content: &body[open..close],
            raw: prefix.contains('r'),
            bytes: prefix.contains('b'),
            fstring: prefix.contains('f'),
        };
        Ok((&body[close + open..], atom))
    }

    /// Adjacent string atoms, concatenated.
    fn string_atoms(&self, input: &'s str) -> PResult<'s, Vec<StrAtom<'s>>> {
        let (mut rest, first) = self.string_atom(input)?;
        let mut atoms = vec![first];
        loop {
            let next = skip_ws(rest);
            if string_prefix_len(next).is_none() {
                break;
            }
            let (r, atom) = self.string_atom(next)?;
            atoms.push(atom);
            rest = r;
        }
        Ok((rest, atoms))
    }

    fn strings(&self, input: &'s str) -> PResult<'s, Expr> {
        let (rest, atoms) = self.string_atoms(input)?;
        let bytes = atoms.iter().filter(|a| a.bytes).count();
        if bytes != 0 && bytes != atoms.len() {
            return failure(input, "cannot mix bytes and nonbytes literals");
        }
        let decode = |atom: &StrAtom<'s>| {
            decode_str(atom.content, atom.raw).map_err(|message| {
                nom::Err::Failure(SyntaxError {
                    input: atom.start,
                    message: Some(message),
                })
            })
        };

        let kind = if bytes != 0 {
            let mut out = Vec::new();
            for atom in &atoms {
                let decoded = decode_bytes(atom.content, atom.raw).map_err(|message| {
                    nom::Err::Failure(SyntaxError {
                        input: atom.start,
                        message: Some(message),
                    })
                })?;
                out.extend(decoded);
            }
            ExprKind::Constant(Constant::Bytes(out))
        } else if atoms.iter().any(|a| a.fstring) {
            let mut parts: Vec<FStringPart> = Vec::new();
            for atom in &atoms {
                let pieces = if atom.fstring {
                    self.fstring_parts(atom.content, atom.raw)?
                } else {
                    vec![FStringPart::Literal(decode(atom)?)]
                };
                for piece in pieces {
                    match (parts.last_mut(), piece) {
                        (Some(FStringPart::Literal(prev)), FStringPart::Literal(text)) => {
                            prev.push_str(&text)
                        }
                        (_, piece) => parts.push(piece),
                    }
                }
            }
            ExprKind::FString(parts)
        } else {
            let mut out = String::new();
            for atom in &atoms {
                out.push_str(&decode(atom)?);
            }
            ExprKind::Constant(Constant::Str(out))
        };
        Ok((rest, self.mk(kind, input)))
    }

    fn fstring_parts(
        &self,
        content: &'s str,
        raw: bool,
    ) -> Result<Vec<FStringPart>, nom::Err<SyntaxError<'s>>> {
        let mut parts = Vec::new();
        let mut literal = String::new();
        let flush = |literal: &mut String,
                     parts: &mut Vec<FStringPart>,
                     at: &'s str|
         -> Result<(), nom::Err<SyntaxError<'s>>> {
            if literal.is_empty() {
                return Ok(());
            }
            let text = decode_str(literal, raw).map_err(|message| {
                nom::Err::Failure(SyntaxError {
                    input: at,
                    message: Some(message),
                })
            })?;
            literal.clear();
            parts.push(FStringPart::Literal(text));
            Ok(())
        };

        let mut rest = content;
        while let Some(pos) = rest.find(['{', '}']) {
            literal.push_str(&rest[..pos]);
            let tail = &rest[pos..];
            if let Some(r) = tail.strip_prefix("{{") {
                literal.push('{');
                rest = r;
                continue;
            }
            if let Some(r) = tail.strip_prefix("}}") {
                literal.push('}');
                rest = r;
                continue;
            }
            if tail.starts_with('}') {
                return Err(nom::Err::Failure(SyntaxError {
                    input: tail,
                    message: Some("single '}' is not allowed in an f-string"),
                }));
            }
            flush(&mut literal, &mut parts, tail)?;

            let expr_in = &tail[1..];
            let (r, expr) = self.test(expr_in)?;
            let mut r = skip_ws(r);
            if let Some(after) = punct(r, "=", &['=']) {
                let written = &expr_in[..expr_in.len() - r.len()];
                parts.push(FStringPart::Literal(format!("{}=", written)));
                r = after;
            }
            let conversion = match r.strip_prefix('!') {
                Some(after) => {
                    let c = after.chars().next().filter(|c| matches!(c, 'r' | 's' | 'a'));
                    let Some(c) = c else {
                        return Err(nom::Err::Failure(SyntaxError {
                            input: r,
                            message: Some("f-string conversion must be 'r', 's' or 'a'"),
                        }));
                    };
                    r = &after[1..];
                    Some(c)
                }
                None => None,
            };
            let spec = match r.strip_prefix(':') {
                Some(after) => {
                    let mut depth = 0usize;
                    let mut end = after.len();
                    for (i, c) in after.char_indices() {
                        match c {
                            '{' => depth += 1,
                            '}' if depth == 0 => {
                                end = i;
                                break;
                            }
                            '}' => depth -= 1,
                            _ => {}
                        }
                    }
                    r = &after[end..];
                    Some(after[..end].to_string())
                }
                None => None,
            };
            let Some(after) = skip_ws(r).strip_prefix('}') else {
                return Err(nom::Err::Failure(SyntaxError {
                    input: r,
                    message: Some("expecting '}' in f-string"),
                }));
            };
            parts.push(FStringPart::Field {
                expr,
                conversion,
                spec,
            });
            rest = after;
        }
        literal.push_str(rest);
        flush(&mut literal, &mut parts, rest)?;
        Ok(parts)
    }

    /// `*expr` or a named test, as found in displays.
    fn star_or_named(&self, input: &'s str) -> PResult<'s, Expr> {
        let input = skip_ws(input);
        if let Some(r) = punct(input, "*", &['*', '=']) {
            let (r, value) = self.bit_or(r)?;
            return Ok((r, self.mk(ExprKind::Starred(Box::new(value)), input)));
        }
        self.named_test(input)
    }

    fn star_or_test(&self, input: &'s str) -> PResult<'s, Expr> {
        let input = skip_ws(input);
        if let Some(r) = punct(input, "*", &['*', '=']) {
            let (r, value) = self.bit_or(r)?;
            return Ok((r, self.mk(ExprKind::Starred(Box::new(value)), input)));
        }
        self.test(input)
    }

    /// Comma-separated expressions; a comma makes a tuple.
    fn expr_list(&self, input: &'s str) -> PResult<'s, Expr> {
        let input = skip_ws(input);
        let (mut rest, first) = self.star_or_test(input)?;
        let mut items = Vec::new();
        let mut tuple = false;
        while let Some(r) = skip_ws(rest).strip_prefix(',') {
            tuple = true;
            rest = r;
            match self.star_or_test(r) {
                Ok((r, item)) => {
                    items.push(item);
                    rest = r;
                }
                Err(nom::Err::Error(_)) => break,
                Err(e) => return Err(e),
            }
        }
        if !tuple {
            return Ok((rest, first));
        }
        items.insert(0, first);
        Ok((rest, self.mk(ExprKind::Tuple(items), input)))
    }

    /// Loop targets: like [`Self::expr_list`] but stopping before `in`.
    fn target_list(&self, input: &'s str) -> PResult<'s, Expr> {
        let input = skip_ws(input);
        let item = |i: &'s str| -> PResult<'s, Expr> {
            let i = skip_ws(i);
            match punct(i, "*", &[]) {
                Some(r) => {
                    let (r, v) = self.bit_or(r)?;
                    Ok((r, self.mk(ExprKind::Starred(Box::new(v)), i)))
                }
                None => self.bit_or(i),
            }
        };
        let (mut rest, first) = item(input)?;
        let mut items = Vec::new();
        let mut tuple = false;
        while let Some(r) = skip_ws(rest).strip_prefix(',') {
            tuple = true;
            rest = r;
            if keyword(skip_ws(r), "in").is_some() {
                break;
            }
            let (r, next) = item(r)?;
            items.push(next);
            rest = r;
        }
        if !tuple {
            return Ok((rest, first));
        }
        items.insert(0, first);
        Ok((rest, self.mk(ExprKind::Tuple(items), input)))
    }

    /// Remaining items of a display after the first, through `closing`.
    fn sequence(&self, mut rest: &'s str, first: Expr, closing: char) -> PResult<'s, Vec<Expr>> {
        let mut items = vec![first];
        loop {
            let after = skip_ws(rest);
            if let Some(r) = after.strip_prefix(closing) {
                return Ok((r, items));
            }
            let Some(r) = after.strip_prefix(',') else {
                return error(after);
            };
            let r = skip_ws(r);
            if let Some(r) = r.strip_prefix(closing) {
                return Ok((r, items));
            }
            let (r, item) = self.star_or_named(r)?;
            items.push(item);
            rest = r;
        }
    }

    fn comprehension(
        &self,
        start: &'s str,
        input: &'s str,
        kind: ComprehensionKind,
        element: Expr,
        value: Option<Expr>,
        closing: char,
    ) -> PResult<'s, Expr> {
        let (rest, clauses) = self.comp_clauses(input)?;
        let (rest, ()) = self.close(rest, closing)?;
        let kind = ExprKind::Comprehension {
            kind,
            element: Box::new(element),
            value: value.map(Box::new),
            clauses,
        };
        Ok((rest, self.mk(kind, start)))
    }

    fn comp_clauses(&self, input: &'s str) -> PResult<'s, Vec<ComprehensionClause>> {
        let mut clauses = Vec::new();
        let mut rest = input;
        loop {
            let at = skip_ws(rest);
            let (is_async, after) = match keyword(at, "async") {
                Some(r) => (true, skip_ws(r)),
                None => (false, at),
            };
            let Some(r) = keyword(after, "for") else {
                if is_async {
                    return error(at);
                }
                break;
            };
            let (r, target) = self.target_list(r)?;
            let Some(r) = keyword(skip_ws(r), "in") else {
                return error(skip_ws(r));
            };
            let (mut r, iter) = self.or_test(r)?;
            let mut ifs = Vec::new();
            while let Some(x) = keyword(skip_ws(r), "if") {
                let (x, cond) = self.or_test(x)?;
                ifs.push(cond);
                r = x;
            }
            clauses.push(ComprehensionClause {
                target,
                iter,
                ifs,
                is_async,
            });
            rest = r;
        }
        if clauses.is_empty() {
            return error(input);
        }
        Ok((rest, clauses))
    }

    fn paren(&self, input: &'s str) -> PResult<'s, Expr> {
        let inner = skip_ws(&input[1..]);
        if let Some(rest) = inner.strip_prefix(')') {
            return Ok((rest, self.mk(ExprKind::Tuple(Vec::new()), input)));
        }
        if keyword(inner, "yield").is_some() {
            let (rest, expr) = self.yield_expr(inner)?;
            let (rest, ()) = self.close(rest, ')')?;
            return Ok((rest, expr));
        }
        let (rest, first) = self.star_or_named(inner)?;
        let after = skip_ws(rest);
        if starts_comprehension(after) {
            return self.comprehension(input, after, ComprehensionKind::Generator, first, None, ')');
        }
        if after.starts_with(',') {
            let (rest, items) = self.sequence(after, first, ')')?;
            return Ok((rest, self.mk(ExprKind::Tuple(items), input)));
        }
        let (rest, ()) = self.close(after, ')')?;
        Ok((rest, first))
    }

    fn list_display(&self, input: &'s str) -> PResult<'s, Expr> {
        let inner = skip_ws(&input[1..]);
        if let Some(rest) = inner.strip_prefix(']') {
            return Ok((rest, self.mk(ExprKind::List(Vec::new()), input)));
        }
        let (rest, first) = self.star_or_named(inner)?;
        let after = skip_ws(rest);
        if starts_comprehension(after) {
            return self.comprehension(input, after, ComprehensionKind::List, first, None, ']');
        }
        let (rest, items) = self.sequence(after, first, ']')?;
        Ok((rest, self.mk(ExprKind::List(items), input)))
    }

    fn brace(&self, input: &'s str) -> PResult<'s, Expr> {
        let inner = skip_ws(&input[1..]);
        if let Some(rest) = inner.strip_prefix('}') {
            let kind = ExprKind::Dict {
                keys: Vec::new(),
                values: Vec::new(),
            };
            return Ok((rest, self.mk(kind, input)));
        }

        let mut keys = Vec::new();
        let mut values = Vec::new();
        let mut rest = inner;
        if let Some(r) = punct(inner, "**", &[]) {
            let (r, v) = self.bit_or(r)?;
            keys.push(None);
            values.push(v);
            rest = r;
        } else {
            let (r, first) = self.star_or_test(inner)?;
            let after = skip_ws(r);
            match after.strip_prefix(':') {
                Some(r) => {
                    let (r, v) = self.test(r)?;
                    let after = skip_ws(r);
                    if starts_comprehension(after) {
                        return self.comprehension(
                            input,
                            after,
                            ComprehensionKind::Dict,
                            first,
                            Some(v),
                            '}',
                        );
                    }
                    keys.push(Some(first));
                    values.push(v);
                    rest = r;
                }
                None => {
                    if starts_comprehension(after) {
                        return self.comprehension(input, after, ComprehensionKind::Set, first, None, '}');
                    }
                    let (rest, items) = self.sequence(after, first, '}')?;
                    return Ok((rest, self.mk(ExprKind::Set(items), input)));
                }
            }
        }

        loop {
            let after = skip_ws(rest);
            if let Some(r) = after.strip_prefix('}') {
                return Ok((r, self.mk(ExprKind::Dict { keys, values }, input)));
            }
            let Some(r) = after.strip_prefix(',') else {
                return error(after);
            };
            let r = skip_ws(r);
            if let Some(r) = r.strip_prefix('}') {
                return Ok((r, self.mk(ExprKind::Dict { keys, values }, input)));
            }
            if let Some(r) = punct(r, "**", &[]) {
                let (r, v) = self.bit_or(r)?;
                keys.push(None);
                values.push(v);
                rest = r;
                continue;
            }
            let (r, key) = self.test(r)?;
            let (r, ()) = self.close(r, ':')?;
            let (r, v) = self.test(r)?;
            keys.push(Some(key));
            values.push(v);
            rest = r;
        }
    }

    /// Arguments after the opening parenthesis of a call.
    fn call_args(&self, input: &'s str) -> PResult<'s, (Vec<Expr>, Vec<Keyword>)> {
        let mut args = Vec::new();
        let mut keywords = Vec::new();
        let mut rest = skip_ws(input);
        loop {
            if let Some(r) = rest.strip_prefix(')') {
                return Ok((r, (args, keywords)));
            }
            let r = if let Some(r) = punct(rest, "**", &[]) {
                let (r, value) = self.test(r)?;
                keywords.push(Keyword { name: None, value });
                r
            } else if let Some(r) = punct(rest, "*", &[]) {
                let (r, value) = self.test(r)?;
                args.push(self.mk(ExprKind::Starred(Box::new(value)), rest));
                r
            } else if let Some((r, name)) = self
                .identifier(rest)
                .ok()
                .and_then(|(r, name)| punct(skip_ws(r), "=", &['=']).map(|r| (r, name)))
            {
                let (r, value) = self.test(r)?;
                keywords.push(Keyword {
                    name: Some(name.to_string()),
                    value,
                });
                r
            } else {
                let (r, arg) = self.named_test(rest)?;
                let after = skip_ws(r);
                if starts_comprehension(after) {
                    let (r, clauses) = self.comp_clauses(after)?;
                    let kind = ExprKind::Comprehension {
                        kind: ComprehensionKind::Generator,
                        element: Box::new(arg),
                        value: None,
                        clauses,
                    };
                    args.push(self.mk(kind, rest));
                    r
                } else {
                    args.push(arg);
                    r
                }
            };
            rest = skip_ws(r);
            if let Some(r) = rest.strip_prefix(',') {
                rest = skip_ws(r);
                continue;
            }
            let (r, ()) = self.close(rest, ')')?;
            return Ok((r, (args, keywords)));
        }
    }

    /// Index expression after `[`, through the closing bracket.
    fn subscript(&self, input: &'s str) -> PResult<'s, Expr> {
        let start = skip_ws(input);
        let (mut rest, first) = self.slice_item(start)?;
        let mut items = vec![first];
        let mut tuple = false;
        loop {
            let after = skip_ws(rest);
            if let Some(r) = after.strip_prefix(']') {
                rest = r;
                break;
            }
            let Some(r) = after.strip_prefix(',') else {
                return error(after);
            };
            tuple = true;
            let r = skip_ws(r);
            if let Some(r) = r.strip_prefix(']') {
                rest = r;
                break;
            }
            let (r, item) = self.slice_item(r)?;
            items.push(item);
            rest = r;
        }
        if !tuple && items.len() == 1 {
            if let Some(item) = items.pop() {
                return Ok((rest, item));
            }
        }
        Ok((rest, self.mk(ExprKind::Tuple(items), start)))
    }

    fn slice_item(&self, input: &'s str) -> PResult<'s, Expr> {
        let input = skip_ws(input);
        let (rest, lower) = if input.starts_with(':') {
            (input, None)
        } else {
            let (r, e) = self.star_or_named(input)?;
            (r, Some(e))
        };
        let after = skip_ws(rest);
        let Some(r) = after.strip_prefix(':') else {
            return match lower {
                Some(e) => Ok((rest, e)),
                None => error(input),
            };
        };
        let ends = |s: &str| {
            let s = skip_ws(s);
            s.starts_with([']', ',', ':'])
        };
        let (r, upper) = if ends(r) {
            (r, None)
        } else {
            let (r, e) = self.test(r)?;
            (r, Some(e))
        };
        let (r, step) = match skip_ws(r).strip_prefix(':') {
            Some(s) if ends(s) => (s, None),
            Some(s) => {
                let (s, e) = self.test(s)?;
                (s, Some(e))
            }
            None => (r, None),
        };
        let kind = ExprKind::Slice {
            lower: lower.map(Box::new),
            upper: upper.map(Box::new),
            step: step.map(Box::new),
        };
        Ok((r, self.mk(kind, input)))
    }

    fn yield_expr(&self, input: &'s str) -> PResult<'s, Expr> {
        let input = skip_ws(input);
        let Some(rest) = keyword(input, "yield") else {
            return error(input);
        };
        if let Some(r) = keyword(skip_ws(rest), "from") {
            let (r, value) = self.test(r)?;
            let kind = ExprKind::Yield {
                value: Some(Box::new(value)),
                from: true,
            };
            return Ok((r, self.mk(kind, input)));
        }
        let (rest, value) = match self.expr_list(rest) {
            Ok((r, v)) => (r, Some(Box::new(v))),
            Err(nom::Err::Error(_)) => (rest, None),
            Err(e) => return Err(e),
        };
        Ok((rest, self.mk(ExprKind::Yield { value, from: false }, input)))
    }

    fn yield_or_list(&self, input: &'s str) -> PResult<'s, Expr> {
        let input = skip_ws(input);
        if keyword(input, "yield").is_some() {
            return self.yield_expr(input);
        }
        self.expr_list(input)
    }

    /// Parameters up to, but not including, `terminator`.
    fn params(&self, input: &'s str, terminator: char, annotated: bool) -> PResult<'s, Vec<Param>> {
        let mut params = Vec::new();
        let mut keyword_only = false;
        let mut rest = skip_ws(input);
        loop {
            if rest.starts_with(terminator) {
                return Ok((rest, params));
            }
            let at = rest;
            let (r, kind) = if let Some(r) = punct(rest, "**", &[]) {
                (r, ParamKind::VarKeywords)
            } else if let Some(r) = punct(rest, "*", &[]) {
                let next = skip_ws(r);
                if next.starts_with(',') || next.starts_with(terminator) {
                    keyword_only = true;
                    rest = next;
                    if let Some(r) = rest.strip_prefix(',') {
                        rest = skip_ws(r);
                    }
                    continue;
                }
                (r, ParamKind::VarArgs)
            } else if let Some(r) = punct(rest, "/", &[]) {
                rest = skip_ws(r);
                if let Some(r) = rest.strip_prefix(',') {
                    rest = skip_ws(r);
                }
                continue;
            } else if keyword_only {
                (rest, ParamKind::KeywordOnly)
            } else {
                (rest, ParamKind::Normal)
            };
            let (r, name) = self.identifier(r)?;
            let (r, annotation) = match skip_ws(r).strip_prefix(':') {
                Some(a) if annotated => {
                    let (a, ann) = self.test(a)?;
                    (a, Some(ann))
                }
                _ => (r, None),
            };
            let (r, default) = match punct(skip_ws(r), "=", &['=']) {
                Some(d) => {
                    let (d, e) = self.test(d)?;
                    (d, Some(e))
                }
                None => (r, None),
            };
            if kind == ParamKind::VarArgs {
                keyword_only = true;
            }
            params.push(Param {
                name: name.to_string(),
                annotation,
                default,
                kind,
                span: self.span(at),
            });
            rest = skip_ws(r);
            match rest.strip_prefix(',') {
                Some(r) => rest = skip_ws(r),
                None if rest.starts_with(terminator) => {}
                None => return error(rest),
            }
        }
    }

    fn dotted_name(&self, input: &'s str) -> PResult<'s, String> {
        let (mut rest, first) = self.identifier(input)?;
        let mut name = first.to_string();
        while let Some(r) = skip_ws(rest).strip_prefix('.') {
            let (r, part) = self.identifier(r)?;
            name.push('.');
            name.push_str(part);
            rest = r;
        }
        Ok((rest, name))
    }

    fn alias(&self, input: &'s str, dotted: bool) -> PResult<'s, Alias> {
        let (rest, name) = if dotted {
            self.dotted_name(input)?
        } else {
            let (r, n) = self.identifier(input)?;
            (r, n.to_string())
        };
        let (rest, asname) = match keyword(skip_ws(rest), "as") {
            Some(r) => {
                let (r, n) = self.identifier(r)?;
                (r, Some(n.to_string()))
            }
            None => (rest, None),
        };
        Ok((rest, Alias { name, asname }))
    }

    fn aliases(&self, input: &'s str, dotted: bool) -> PResult<'s, Vec<Alias>> {
        let (mut rest, first) = self.alias(input, dotted)?;
        let mut names = vec![first];
        while let Some(r) = skip_ws(rest).strip_prefix(',') {
            if skip_ws(r).starts_with(')') {
                rest = r;
                break;
            }
            let (r, alias) = self.alias(r, dotted)?;
            names.push(alias);
            rest = r;
        }
        Ok((rest, names))
    }

    fn names(&self, input: &'s str) -> PResult<'s, Vec<String>> {
        let (mut rest, first) = self.identifier(input)?;
        let mut names = vec![first.to_string()];
        while let Some(r) = skip_ws(rest).strip_prefix(',') {
            let (r, name) = self.identifier(r)?;
            names.push(name.to_string());
            rest = r;
        }
        Ok((rest, names))
    }

    /// One simple statement.
    fn simple_stmt(&self, input: &'s str) -> PResult<'s, Stmt> {
        let input = skip_ws(input);
        let span = self.span(input);
        let stmt = |kind| Stmt::new(kind, span);

        for (kw, kind) in [
            ("pass", StmtKind::Pass),
            ("break", StmtKind::Break),
            ("continue", StmtKind::Continue),
        ] {
            if let Some(r) = keyword(input, kw) {
                return Ok((r, stmt(kind)));
            }
        }
        if let Some(r) = keyword(input, "return") {
            let (r, value) = opt(|i| self.expr_list(i)).parse(r)?;
            return Ok((r, stmt(StmtKind::Return(value))));
        }
        if let Some(r) = keyword(input, "raise") {
            let (r, exc) = opt(|i| self.test(i)).parse(r)?;
            let (r, cause) = match (exc.is_some(), keyword(skip_ws(r), "from")) {
                (true, Some(f)) => {
                    let (f, cause) = self.test(f)?;
                    (f, Some(cause))
                }
                _ => (r, None),
            };
            return Ok((r, stmt(StmtKind::Raise { exc, cause })));
        }
        if let Some(r) = keyword(input, "global") {
            let (r, names) = self.names(r)?;
            return Ok((r, stmt(StmtKind::Global(names))));
        }
        if let Some(r) = keyword(input, "nonlocal") {
            let (r, names) = self.names(r)?;
            return Ok((r, stmt(StmtKind::Nonlocal(names))));
        }
        if let Some(r) = keyword(input, "import") {
            let (r, names) = self.aliases(r, true)?;
            return Ok((r, stmt(StmtKind::Import(names))));
        }
        if let Some(r) = keyword(input, "from") {
            return self.import_from(r, span);
        }
        if let Some(r) = keyword(input, "assert") {
            let (r, test) = self.test(r)?;
            let (r, msg) = match skip_ws(r).strip_prefix(',') {
                Some(m) => {
                    let (m, msg) = self.test(m)?;
                    (m, Some(msg))
                }
                None => (r, None),
            };
            return Ok((r, stmt(StmtKind::Assert { test, msg })));
        }
        if let Some(r) = keyword(input, "del") {
            let (r, targets) = self.expr_list(r)?;
            let targets = match targets.kind {
                ExprKind::Tuple(items) => items,
                _ => vec![targets],
            };
            return Ok((r, stmt(StmtKind::Delete(targets))));
        }

        let (rest, first) = self.yield_or_list(input)?;
        let after = skip_ws(rest);
        if let Some(r) = punct(after, ":", &['=']) {
            let (r, annotation) = self.test(r)?;
            let (r, value) = match punct(skip_ws(r), "=", &['=']) {
                Some(v) => {
                    let (v, value) = self.yield_or_list(v)?;
                    (v, Some(value))
                }
                None => (r, None),
            };
            let kind = StmtKind::AnnAssign {
                target: first,
                annotation,
                value,
                comment: None,
            };
            return Ok((r, stmt(kind)));
        }
        if let Some((op, len)) = BinaryOp::from_augmented(after) {
            let (r, value) = self.yield_or_list(&after[len..])?;
            let kind = StmtKind::AugAssign {
                target: first,
                op,
                value,
            };
            return Ok((r, stmt(kind)));
        }
        if let Some(mut r) = punct(after, "=", &['=']) {
            let mut targets = vec![first];
            loop {
                let (next, value) = self.yield_or_list(r)?;
                match punct(skip_ws(next), "=", &['=']) {
                    Some(more) => {
                        targets.push(value);
                        r = more;
                    }
                    None => {
                        let kind = StmtKind::Assign {
                            targets,
                            value,
                            comment: None,
                        };
                        return Ok((next, stmt(kind)));
                    }
                }
            }
        }
        Ok((rest, stmt(StmtKind::Expr(first))))
    }

    fn import_from(&self, input: &'s str, span: Span) -> PResult<'s, Stmt> {
        let mut rest = skip_ws(input);
        let mut level = 0;
        while let Some(r) = rest.strip_prefix('.') {
            level += 1;
            rest = r;
        }
        let (r, module) = if level > 0 && keyword(skip_ws(rest), "import").is_some() {
            (rest, None)
        } else {
            let (r, m) = self.dotted_name(rest)?;
            (r, Some(m))
        };
        let Some(r) = keyword(skip_ws(r), "import") else {
            return error(skip_ws(r));
        };
        let r = skip_ws(r);
        let (r, names) = if let Some(r) = r.strip_prefix('*') {
            (
                r,
                vec![Alias {
                    name: "*".to_string(),
                    asname: None,
                }],
            )
        } else if let Some(r) = r.strip_prefix('(') {
            let (r, names) = self.aliases(r, false)?;
            let (r, ()) = self.close(r, ')')?;
            (r, names)
        } else {
            self.aliases(r, false)?
        };
        let kind = StmtKind::ImportFrom {
            module,
            level,
            names,
        };
        Ok((r, Stmt::new(kind, span)))
    }
}

// Statements and blocks.
impl<'s> SourceParser<'s> {
    fn text(&self, line: &LogicalLine) -> &'s str {
        let src = self.src;
        src.get(line.start..line.end).unwrap_or("").trim_end()
    }

    fn end_span(&self) -> Span {
        self.span(&self.src[self.src.len()..])
    }

    fn syntax_error(&self, err: nom::Err<SyntaxError<'s>>) -> CompileError {
        match err {
            nom::Err::Error(e) | nom::Err::Failure(e) => {
                let at = skip_ws(e.input);
                let near: String = at.chars().take_while(|c| *c != '\n').take(24).collect();
                let message = match e.message {
                    Some(message) => message.to_string(),
                    None if near.trim().is_empty() => "invalid syntax at end of line".to_string(),
                    None => format!("invalid syntax near `{}`", near.trim_end()),
                };
                CompileError::parse(&message, self.span(at))
            }
            nom::Err::Incomplete(_) => CompileError::parse("unexpected end of input", self.end_span()),
        }
    }

    fn run<T>(&self, result: PResult<'s, T>) -> CompileResult<(&'s str, T)> {
        result.map_err(|e| self.syntax_error(e))
    }

    fn expect_end(&self, rest: &'s str) -> CompileResult<()> {
        let rest = skip_ws(rest);
        if rest.is_empty() {
            Ok(())
        } else {
            Err(self.syntax_error(nom::Err::Error(SyntaxError {
                input: rest,
                message: None,
            })))
        }
    }

    fn colon(&self, rest: &'s str) -> CompileResult<&'s str> {
        let rest = skip_ws(rest);
        punct(rest, ":", &['='])
            .ok_or_else(|| CompileError::parse("expected ':'", self.span(rest)))
    }

    /// Statements at exactly `indent`, until a shallower line.
    fn block(&mut self, indent: usize) -> CompileResult<Vec<Stmt>> {
        let lines = self.lines;
        let mut body = Vec::new();
        while let Some(line) = lines.get(self.pos) {
            if line.indent < indent {
                break;
            }
            if line.indent > indent {
                return Err(CompileError::parse("unexpected indent", self.span(self.text(line))));
            }
            body.extend(self.statement()?);
        }
        Ok(body)
    }

    /// The body of a compound statement whose header ends at `rest`.
    fn suite(&mut self, header: &'s LogicalLine, rest: &'s str) -> CompileResult<Vec<Stmt>> {
        if !skip_ws(rest).is_empty() {
            return self.simple_line(rest, header.comment.as_deref());
        }
        let lines = self.lines;
        match lines.get(self.pos) {
            Some(next) if next.indent > header.indent => self.block(next.indent),
            Some(next) => Err(CompileError::parse(
                "expected an indented block",
                self.span(self.text(next)),
            )),
            None => Err(CompileError::parse("expected an indented block", self.end_span())),
        }
    }

    /// A continuation clause such as `else` at `indent`.
    fn clause(&mut self, indent: usize, kw: &str) -> Option<(&'s LogicalLine, &'s str)> {
        let lines = self.lines;
        let line = lines.get(self.pos)?;
        if line.indent != indent {
            return None;
        }
        let rest = keyword(self.text(line), kw)?;
        self.pos += 1;
        Some((line, rest))
    }

    fn else_clause(&mut self, indent: usize) -> CompileResult<Vec<Stmt>> {
        match self.clause(indent, "else") {
            Some((line, rest)) => {
                let rest = self.colon(rest)?;
                self.suite(line, rest)
            }
            None => Ok(Vec::new()),
        }
    }

    /// Semicolon-separated simple statements.
    fn simple_line(&self, text: &'s str, comment: Option<&str>) -> CompileResult<Vec<Stmt>> {
        let mut stmts = Vec::new();
        let mut input = text;
        loop {
            let (rest, stmt) = self.run(self.simple_stmt(input))?;
            stmts.push(stmt);
            let rest = skip_ws(rest);
            match rest.strip_prefix(';') {
                Some(r) if skip_ws(r).is_empty() => break,
                Some(r) => input = r,
                None => {
                    self.expect_end(rest)?;
                    break;
                }
            }
        }
        if let (Some(text), Some(last)) = (comment, stmts.last_mut()) {
            match &mut last.kind {
                StmtKind::Assign { comment, .. } | StmtKind::AnnAssign { comment, .. } => {
                    *comment = Some(text.to_string());
                }
                _ => {}
            }
        }
        Ok(stmts)
    }

    fn statement(&mut self) -> CompileResult<Vec<Stmt>> {
        let lines = self.lines;
        let line = &lines[self.pos];
        let text = self.text(line);
        if text.starts_with('@') {
            return Ok(vec![self.decorated()?]);
        }
        let (is_async, head) = match keyword(text, "async") {
            Some(r) => (true, skip_ws(r)),
            None => (false, text),
        };
        if let Some(r) = keyword(head, "def") {
            self.pos += 1;
            return Ok(vec![self.function_def(line, r, is_async, Vec::new())?]);
        }
        if let Some(r) = keyword(head, "for") {
            self.pos += 1;
            return Ok(vec![self.for_stmt(line, r, is_async)?]);
        }
        if let Some(r) = keyword(head, "with") {
            self.pos += 1;
            return Ok(vec![self.with_stmt(line, r, is_async)?]);
        }
        if is_async {
            return Err(CompileError::parse(
                "expected `def`, `for` or `with` after `async`",
                self.span(head),
            ));
        }
        if let Some(r) = keyword(text, "class") {
            self.pos += 1;
            return Ok(vec![self.class_def(line, r, Vec::new())?]);
        }
        if let Some(r) = keyword(text, "if") {
            self.pos += 1;
            return Ok(vec![self.if_stmt(line, r)?]);
        }
        if let Some(r) = keyword(text, "while") {
            self.pos += 1;
            return Ok(vec![self.while_stmt(line, r)?]);
        }
        if let Some(r) = keyword(text, "try") {
            self.pos += 1;
            return Ok(vec![self.try_stmt(line, r)?]);
        }
        self.pos += 1;
        self.simple_line(text, line.comment.as_deref())
    }

    fn decorated(&mut self) -> CompileResult<Stmt> {
        let lines = self.lines;
        let indent = lines[self.pos].indent;
        let mut decorators = Vec::new();
        while let Some(line) = lines.get(self.pos) {
            let text = self.text(line);
            if line.indent != indent {
                break;
            }
            let Some(r) = text.strip_prefix('@') else {
                break;
            };
            let (r, expr) = self.run(self.named_test(r))?;
            self.expect_end(r)?;
            decorators.push(Decorator {
                expr,
                span: self.span(text),
            });
            self.pos += 1;
        }
        let Some(line) = lines.get(self.pos).filter(|l| l.indent == indent) else {
            return Err(CompileError::parse(
                "expected a definition after decorators",
                self.end_span(),
            ));
        };
        let text = self.text(line);
        self.pos += 1;
        let (is_async, head) = match keyword(text, "async") {
            Some(r) => (true, skip_ws(r)),
            None => (false, text),
        };
        if let Some(r) = keyword(head, "def") {
            return self.function_def(line, r, is_async, decorators);
        }
        match keyword(text, "class") {
            Some(r) => self.class_def(line, r, decorators),
            None => Err(CompileError::parse(
                "expected a definition after decorators",
                self.span(text),
            )),
        }
    }

    fn function_def(
        &mut self,
        line: &'s LogicalLine,
        rest: &'s str,
        is_async: bool,
        decorators: Vec<Decorator>,
    ) -> CompileResult<Stmt> {
        let span = self.span(self.text(line));
        let (r, name) = self.run(self.identifier(rest))?;
        let (r, ()) = self.run(self.close(r, '('))?;
        let (r, params) = self.run(self.params(r, ')', true))?;
        let (r, ()) = self.run(self.close(r, ')'))?;
        let (r, returns) = match skip_ws(r).strip_prefix("->") {
            Some(a) => {
                let (a, ann) = self.run(self.test(a))?;
                (a, Some(ann))
            }
            None => (r, None),
        };
        let r = self.colon(r)?;
        let mut body = self.suite(line, r)?;
        let docstring = self.take_docstring(&mut body);
        let def = FunctionDef {
            name: name.to_string(),
            params,
            returns,
            decorators,
            docstring,
            body,
            is_async,
            span,
        };
        Ok(Stmt::new(StmtKind::FunctionDef(def), span))
    }

    fn class_def(
        &mut self,
        line: &'s LogicalLine,
        rest: &'s str,
        decorators: Vec<Decorator>,
    ) -> CompileResult<Stmt> {
        let span = self.span(self.text(line));
        let (r, name) = self.run(self.identifier(rest))?;
        let (r, bases) = match skip_ws(r).strip_prefix('(') {
            Some(a) => {
                let (a, (args, _)) = self.run(self.call_args(a))?;
                (a, args)
            }
            None => (r, Vec::new()),
        };
        let r = self.colon(r)?;
        let mut body = self.suite(line, r)?;
        let docstring = self.take_docstring(&mut body);
        let class = ClassDef {
            name: name.to_string(),
            bases,
            decorators,
            docstring,
            body,
            span,
        };
        Ok(Stmt::new(StmtKind::ClassDef(class), span))
    }

    fn if_stmt(&mut self, line: &'s LogicalLine, rest: &'s str) -> CompileResult<Stmt> {
        let span = self.span(self.text(line));
        let (r, test) = self.run(self.named_test(rest))?;
        let r = self.colon(r)?;
        let body = self.suite(line, r)?;
        let orelse = match self.clause(line.indent, "elif") {
            Some((elif, r)) => vec![self.if_stmt(elif, r)?],
            None => self.else_clause(line.indent)?,
        };
        Ok(Stmt::new(StmtKind::If { test, body, orelse }, span))
    }

    fn while_stmt(&mut self, line: &'s LogicalLine, rest: &'s str) -> CompileResult<Stmt> {
        let span = self.span(self.text(line));
        let (r, test) = self.run(self.named_test(rest))?;
        let r = self.colon(r)?;
        let body = self.suite(line, r)?;
        let orelse = self.else_clause(line.indent)?;
        Ok(Stmt::new(StmtKind::While { test, body, orelse }, span))
    }

    fn for_stmt(&mut self, line: &'s LogicalLine, rest: &'s str, is_async: bool) -> CompileResult<Stmt> {
        let span = self.span(self.text(line));
        let (r, target) = self.run(self.target_list(rest))?;
        let r = skip_ws(r);
        let r = keyword(r, "in").ok_or_else(|| CompileError::parse("expected `in`", self.span(r)))?;
        let (r, iter) = self.run(self.expr_list(r))?;
        let r = self.colon(r)?;
        let body = self.suite(line, r)?;
        let orelse = self.else_clause(line.indent)?;
        let kind = StmtKind::For {
            target,
            iter,
            body,
            orelse,
            is_async,
        };
        Ok(Stmt::new(kind, span))
    }

    fn try_stmt(&mut self, line: &'s LogicalLine, rest: &'s str) -> CompileResult<Stmt> {
        let span = self.span(self.text(line));
        let r = self.colon(rest)?;
        let body = self.suite(line, r)?;
        let mut handlers = Vec::new();
        while let Some((handler, r)) = self.clause(line.indent, "except") {
            let handler_span = self.span(self.text(handler));
            let r = skip_ws(r);
            let (r, ty, name) = if r.starts_with(':') {
                (r, None, None)
            } else {
                let (r, ty) = self.run(self.test(r))?;
                match keyword(skip_ws(r), "as") {
                    Some(a) => {
                        let (a, name) = self.run(self.identifier(a))?;
                        (a, Some(ty), Some(name.to_string()))
                    }
                    None => (r, Some(ty), None),
                }
            };
            let r = self.colon(r)?;
            let body = self.suite(handler, r)?;
            handlers.push(ExceptHandler {
                ty,
                name,
                body,
                span: handler_span,
            });
        }
        let orelse = self.else_clause(line.indent)?;
        let finalbody = match self.clause(line.indent, "finally") {
            Some((fin, r)) => {
                let r = self.colon(r)?;
                self.suite(fin, r)?
            }
            None => Vec::new(),
        };
        if handlers.is_empty() && finalbody.is_empty() {
            return Err(CompileError::parse(
                "expected `except` or `finally` block",
                span,
            ));
        }
        let kind = StmtKind::Try {
            body,
            handlers,
            orelse,
            finalbody,
        };
        Ok(Stmt::new(kind, span))
    }

    fn with_stmt(&mut self, line: &'s LogicalLine, rest: &'s str, is_async: bool) -> CompileResult<Stmt> {
        let span = self.span(self.text(line));
        let mut items = Vec::new();
        let mut r = rest;
        loop {
            let (after, context) = self.run(self.test(r))?;
            let (after, target) = match keyword(skip_ws(after), "as") {
                Some(t) => {
                    let (t, target) = self.run(self.target_list(t))?;
                    (t, Some(target))
                }
                None => (after, None),
            };
            items.push(WithItem { context, target });
            match skip_ws(after).strip_prefix(',') {
                Some(next) => r = next,
                None => {
                    r = after;
                    break;
                }
            }
        }
        let r = self.colon(r)?;
        let body = self.suite(line, r)?;
        let kind = StmtKind::With {
            items,
            body,
            is_async,
        };
        Ok(Stmt::new(kind, span))
    }

    /// Remove and return a leading string-literal statement.
    fn take_docstring(&self, body: &mut Vec<Stmt>) -> Option<Docstring> {
        let first = body.first()?;
        let StmtKind::Expr(expr) = &first.kind else {
            return None;
        };
        let ExprKind::Constant(Constant::Str(value)) = &expr.kind else {
            return None;
        };
        let start = self.src.get(expr.span.offset..).unwrap_or("");
        let raw = match self.string_atoms(start) {
            Ok((_, atoms)) => atoms.iter().map(|a| a.content).collect(),
            Err(_) => value.clone(),
        };
        let docstring = Docstring {
            value: value.clone(),
            raw,
            span: expr.span,
        };
        body.remove(0);
        Some(docstring)
    }
}
