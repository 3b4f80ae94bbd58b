//! Compile-time evaluation of constant expressions.
//!
//! Folding follows the source language's semantics: `//` and `%` floor,
//! `/` always produces a float, `and`/`or` yield one of their operands.

use alloc::format;
use alloc::string::{String, ToString};

use crate::{BinaryOp, BoolOp, CmpOp, Constant, Expr, ExprKind, Span, UnaryOp};

/// A folded constant.
#[derive(Clone, Debug, PartialEq)]
pub enum ConstValue {
    Int(i128),
    Float(f64),
    Bool(bool),
    Str(String),
}

impl ConstValue {
    pub fn truthy(&self) -> bool {
        match self {
            ConstValue::Int(v) => *v != 0,
            ConstValue::Float(v) => *v != 0.0,
            ConstValue::Bool(v) => *v,
            ConstValue::Str(s) => !s.is_empty(),
        }
    }

    pub fn as_int(&self) -> Option<i128> {
        match self {
            ConstValue::Int(v) => Some(*v),
            ConstValue::Bool(v) => Some(*v as i128),
            _ => None,
        }
    }

    fn as_float(&self) -> Option<f64> {
        match self {
            ConstValue::Int(v) => Some(*v as f64),
            ConstValue::Bool(v) => Some(*v as i128 as f64),
            ConstValue::Float(v) => Some(*v),
            ConstValue::Str(_) => None,
        }
    }

    fn kind_name(&self) -> &'static str {
        match self {
            ConstValue::Int(_) => "int",
            ConstValue::Float(_) => "float",
            ConstValue::Bool(_) => "bool",
            ConstValue::Str(_) => "str",
        }
    }
}

/// Why an expression did not fold.
#[derive(Clone, Debug, PartialEq)]
pub enum FoldError {
    /// The expression refers to something not known at compile time.
    NotConstant { what: String, span: Span },
    /// The expression is constant but cannot be evaluated.
    Invalid { message: String, span: Span },
}

impl FoldError {
    pub fn message(&self) -> String {
        match self {
            FoldError::NotConstant { what, .. } => format!("{} is not a compile-time constant", what),
            FoldError::Invalid { message, .. } => message.clone(),
        }
    }

    pub fn span(&self) -> Span {
        match self {
            FoldError::NotConstant { span, .. } | FoldError::Invalid { span, .. } => *span,
        }
    }
}

fn invalid(message: &str, span: Span) -> FoldError {
    FoldError::Invalid {
        message: message.to_string(),
        span,
    }
}

/// Evaluate `expr`, resolving names through `lookup`.
pub fn fold_constant<F>(expr: &Expr, lookup: &F) -> Result<ConstValue, FoldError>
where
    F: Fn(&str) -> Option<ConstValue>,
{
    let span = expr.span;
    match &expr.kind {
        ExprKind::Constant(Constant::Int(v)) => Ok(ConstValue::Int(*v)),
        ExprKind::Constant(Constant::Float(v)) => Ok(ConstValue::Float(*v)),
        ExprKind::Constant(Constant::Bool(v)) => Ok(ConstValue::Bool(*v)),
        ExprKind::Constant(Constant::Str(s)) => Ok(ConstValue::Str(s.clone())),
        ExprKind::Name(name) => lookup(name).ok_or_else(|| FoldError::NotConstant {
            what: format!("`{}`", name),
            span,
        }),
        ExprKind::UnaryOp { op, operand } => {
            let value = fold_constant(operand, lookup)?;
            fold_unary(*op, value, span)
        }
        ExprKind::BinOp { left, op, right } => {
            let l = fold_constant(left, lookup)?;
            let r = fold_constant(right, lookup)?;
            fold_binary(*op, l, r, span)
        }
        ExprKind::BoolOp { op, values } => {
            let mut result = None;
            for value in values {
                let v = fold_constant(value, lookup)?;
                let stop = match op {
                    BoolOp::And => !v.truthy(),
                    BoolOp::Or => v.truthy(),
                };
                result = Some(v);
                if stop {
                    break;
                }
            }
            result.ok_or_else(|| invalid("empty boolean operation", span))
        }
        ExprKind::Compare {
            left,
            ops,
            comparators,
        } => {
            let mut current = fold_constant(left, lookup)?;
            for (op, next) in ops.iter().zip(comparators) {
                let next = fold_constant(next, lookup)?;
                if !fold_compare(*op, &current, &next, span)? {
                    return Ok(ConstValue::Bool(false));
                }
                current = next;
            }
            Ok(ConstValue::Bool(true))
        }
        ExprKind::IfExp { test, body, orelse } => {
            if fold_constant(test, lookup)?.truthy() {
                fold_constant(body, lookup)
            } else {
                fold_constant(orelse, lookup)
            }
        }
        other => Err(FoldError::NotConstant {
            what: format!("a {}", other.describe()),
            span,
        }),
    }
}

fn fold_unary(op: UnaryOp, value: ConstValue, span: Span) -> Result<ConstValue, FoldError> {
    if op == UnaryOp::Not {
        return Ok(ConstValue::Bool(!value.truthy()));
    }
    if let ConstValue::Float(f) = value {
        return match op {
            UnaryOp::Neg => Ok(ConstValue::Float(-f)),
            UnaryOp::Pos => Ok(ConstValue::Float(f)),
            _ => Err(invalid("bad operand type for unary `~`: float", span)),
        };
    }
    let i = value.as_int().ok_or_else(|| {
        invalid(
            &format!("bad operand type for unary operator: {}", value.kind_name()),
            span,
        )
    })?;
    let result = match op {
        UnaryOp::Neg => i.checked_neg(),
        UnaryOp::Invert => Some(!i),
        _ => Some(i),
    };
    result
        .map(ConstValue::Int)
        .ok_or_else(|| invalid("integer overflow", span))
}

fn fold_binary(
    op: BinaryOp,
    l: ConstValue,
    r: ConstValue,
    span: Span,
) -> Result<ConstValue, FoldError> {
    if let (ConstValue::Str(a), ConstValue::Str(b)) = (&l, &r) {
        return match op {
            BinaryOp::Add => Ok(ConstValue::Str(format!("{}{}", a, b))),
            _ => Err(invalid(&format!("unsupported string operator `{}`", op.symbol()), span)),
        };
    }
    if let (ConstValue::Bool(a), ConstValue::Bool(b)) = (&l, &r) {
        match op {
            BinaryOp::BitAnd => return Ok(ConstValue::Bool(*a & *b)),
            BinaryOp::BitOr => return Ok(ConstValue::Bool(*a | *b)),
            BinaryOp::BitXor => return Ok(ConstValue::Bool(*a ^ *b)),
            _ => {}
        }
    }
    let mismatch = || {
        invalid(
            &format!(
                "unsupported operand types for `{}`: {} and {}",
                op.symbol(),
                l.kind_name(),
                r.kind_name()
            ),
            span,
        )
    };
    match (l.as_int(), r.as_int()) {
        (Some(a), Some(b)) => fold_int(op, a, b, span),
        _ => {
            let (a, b) = match (l.as_float(), r.as_float()) {
                (Some(a), Some(b)) => (a, b),
                _ => return Err(mismatch()),
            };
            fold_float(op, a, b, span).ok_or_else(mismatch)?
        }
    }
}

fn fold_int(op: BinaryOp, a: i128, b: i128, span: Span) -> Result<ConstValue, FoldError> {
    let overflow = || invalid("integer overflow in constant expression", span);
    let zero = || invalid("division by zero in constant expression", span);
    let value = match op {
        BinaryOp::Add => a.checked_add(b).ok_or_else(overflow)?,
        BinaryOp::Sub => a.checked_sub(b).ok_or_else(overflow)?,
        BinaryOp::Mul => a.checked_mul(b).ok_or_else(overflow)?,
        BinaryOp::Div => {
            if b == 0 {
                return Err(zero());
            }
            return Ok(ConstValue::Float(a as f64 / b as f64));
        }
        BinaryOp::FloorDiv => {
            if b == 0 {
                return Err(zero());
            }
            let q = a.checked_div(b).ok_or_else(overflow)?;
            if a % b != 0 && ((a < 0) != (b < 0)) {
                q - 1
            } else {
                q
            }
        }
        BinaryOp::Mod => {
            if b == 0 {
                return Err(zero());
            }
            let r = a.checked_rem(b).ok_or_else(overflow)?;
            if r != 0 && ((r < 0) != (b < 0)) {
                r + b
            } else {
                r
            }
        }
        BinaryOp::Pow => {
            if b < 0 {
                return Ok(ConstValue::Float(powi(a as f64, b)));
            }
            let exp = u32::try_from(b).map_err(|_| overflow())?;
            a.checked_pow(exp).ok_or_else(overflow)?
        }
        BinaryOp::Shl | BinaryOp::Shr => {
            if b < 0 {
                return Err(invalid("negative shift count", span));
            }
            if op == BinaryOp::Shr {
                if b >= 127 {
                    if a < 0 {
                        -1
                    } else {
                        0
                    }
                } else {
                    a >> b
                }
            } else {
                if b > 126 {
                    return Err(overflow());
                }
                a.checked_mul(1i128 << b).ok_or_else(overflow)?
            }
        }
        BinaryOp::BitAnd => a & b,
        BinaryOp::BitOr => a | b,
        BinaryOp::BitXor => a ^ b,
        BinaryOp::MatMul => return Err(invalid("`@` is not defined for integers", span)),
    };
    Ok(ConstValue::Int(value))
}

fn fold_float(
    op: BinaryOp,
    a: f64,
    b: f64,
    span: Span,
) -> Option<Result<ConstValue, FoldError>> {
    let zero = || invalid("float division by zero in constant expression", span);
    let value = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => {
            if b == 0.0 {
                return Some(Err(zero()));
            }
            a / b
        }
        BinaryOp::FloorDiv => {
            if b == 0.0 {
                return Some(Err(zero()));
            }
            match floor(a / b) {
                Some(v) => v,
                None => return Some(Err(invalid("float out of range", span))),
            }
        }
        BinaryOp::Mod => {
            if b == 0.0 {
                return Some(Err(zero()));
            }
            match floor(a / b) {
                Some(q) => a - q * b,
                None => return Some(Err(invalid("float out of range", span))),
            }
        }
        _ => return None,
    };
    Some(Ok(ConstValue::Float(value)))
}

fn floor(x: f64) -> Option<f64> {
    if !x.is_finite() || !(-9.0e15..=9.0e15).contains(&x) {
        return None;
    }
    let t = x as i64 as f64;
    Some(if t > x { t - 1.0 } else { t })
}

fn powi(base: f64, exp: i128) -> f64 {
    let mut result = 1.0;
    let mut n = exp.unsigned_abs();
    while n > 0 {
        result *= base;
        n -= 1;
    }
    if exp < 0 {
        1.0 / result
    } else {
        result
    }
}

fn fold_compare(
    op: CmpOp,
    l: &ConstValue,
    r: &ConstValue,
    span: Span,
) -> Result<bool, FoldError> {
    if let (ConstValue::Str(a), ConstValue::Str(b)) = (l, r) {
        return match op {
            CmpOp::Eq => Ok(a == b),
            CmpOp::NotEq => Ok(a != b),
            CmpOp::Lt => Ok(a < b),
            CmpOp::LtE => Ok(a <= b),
            CmpOp::Gt => Ok(a > b),
            CmpOp::GtE => Ok(a >= b),
            _ => Err(invalid("unsupported string comparison", span)),
        };
    }
    let (a, b) = match (l.as_float(), r.as_float()) {
        (Some(a), Some(b)) => (a, b),
        _ => return Err(invalid("comparison between incompatible constants", span)),
    };
    match op {
        CmpOp::Eq => Ok(a == b),
        CmpOp::NotEq => Ok(a != b),
        CmpOp::Lt => Ok(a < b),
        CmpOp::LtE => Ok(a <= b),
        CmpOp::Gt => Ok(a > b),
        CmpOp::GtE => Ok(a >= b),
        _ => Err(invalid("identity and membership tests are not constant", span)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::boxed::Box;

    fn int(v: i128) -> Expr {
        Expr::new(ExprKind::Constant(Constant::Int(v)), Span::default())
    }

    fn bin(l: Expr, op: BinaryOp, r: Expr) -> Expr {
        Expr::new(
            ExprKind::BinOp {
                left: Box::new(l),
                op,
                right: Box::new(r),
            },
            Span::default(),
        )
    }

    fn no_names(_: &str) -> Option<ConstValue> {
        None
    }

    #[test]
    fn test_arithmetic() {
        let e = bin(int(1000), BinaryOp::Mul, int(60));
        assert_eq!(fold_constant(&e, &no_names), Ok(ConstValue::Int(60000)));
    }

    #[test]
    fn test_floor_semantics() {
        let e = bin(int(-7), BinaryOp::FloorDiv, int(2));
        assert_eq!(fold_constant(&e, &no_names), Ok(ConstValue::Int(-4)));
        let e = bin(int(-7), BinaryOp::Mod, int(2));
        assert_eq!(fold_constant(&e, &no_names), Ok(ConstValue::Int(1)));
        let e = bin(int(7), BinaryOp::Div, int(2));
        assert_eq!(fold_constant(&e, &no_names), Ok(ConstValue::Float(3.5)));
    }

    #[test]
    fn test_shift_and_mask() {
        let e = bin(
            bin(int(1), BinaryOp::Shl, int(4)),
            BinaryOp::BitOr,
            int(1),
        );
        assert_eq!(fold_constant(&e, &no_names), Ok(ConstValue::Int(17)));
    }

    #[test]
    fn test_names_resolve_through_lookup() {
        let e = bin(
            Expr::new(ExprKind::Name("BASE".to_string()), Span::default()),
            BinaryOp::Add,
            int(1),
        );
        let lookup = |name: &str| (name == "BASE").then_some(ConstValue::Int(41));
        assert_eq!(fold_constant(&e, &lookup), Ok(ConstValue::Int(42)));
        assert!(matches!(
            fold_constant(&e, &no_names),
            Err(FoldError::NotConstant { .. })
        ));
    }

    #[test]
    fn test_division_by_zero() {
        let e = bin(int(1), BinaryOp::FloorDiv, int(0));
        assert!(matches!(
            fold_constant(&e, &no_names),
            Err(FoldError::Invalid { .. })
        ));
    }
}
