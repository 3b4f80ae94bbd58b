//! Operators of the source language.

/// Binary operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    // Arithmetic
    Add,
    Sub,
    Mul,
    MatMul,
    Div,
    FloorDiv,
    Mod,
    Pow,
    // Bitwise
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
}

impl BinaryOp {
    /// Source spelling.
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::MatMul => "@",
            BinaryOp::Div => "/",
            BinaryOp::FloorDiv => "//",
            BinaryOp::Mod => "%",
            BinaryOp::Pow => "**",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
        }
    }

    /// The C operator for ops that map one-to-one.
    ///
    /// `/`, `//`, `**` and `@` have no direct spelling and return `None`.
    pub fn c_symbol(&self) -> Option<&'static str> {
        match self {
            BinaryOp::Add => Some("+"),
            BinaryOp::Sub => Some("-"),
            BinaryOp::Mul => Some("*"),
            BinaryOp::Mod => Some("%"),
            BinaryOp::BitAnd => Some("&"),
            BinaryOp::BitOr => Some("|"),
            BinaryOp::BitXor => Some("^"),
            BinaryOp::Shl => Some("<<"),
            BinaryOp::Shr => Some(">>"),
            BinaryOp::Div | BinaryOp::FloorDiv | BinaryOp::Pow | BinaryOp::MatMul => None,
        }
    }

    /// Bitwise and shift operators accept integers only.
    pub fn is_bitwise(&self) -> bool {
        matches!(
            self,
            BinaryOp::BitAnd | BinaryOp::BitOr | BinaryOp::BitXor | BinaryOp::Shl | BinaryOp::Shr
        )
    }

    /// Parse an augmented-assignment operator such as `+=`, returning the
    /// binary operator and the spelling length.
    pub fn from_augmented(s: &str) -> Option<(BinaryOp, usize)> {
        const TABLE: &[(&str, BinaryOp)] = &[
            ("**=", BinaryOp::Pow),
            ("//=", BinaryOp::FloorDiv),
            ("<<=", BinaryOp::Shl),
            (">>=", BinaryOp::Shr),
            ("+=", BinaryOp::Add),
            ("-=", BinaryOp::Sub),
            ("*=", BinaryOp::Mul),
            ("@=", BinaryOp::MatMul),
            ("/=", BinaryOp::Div),
            ("%=", BinaryOp::Mod),
            ("&=", BinaryOp::BitAnd),
            ("|=", BinaryOp::BitOr),
            ("^=", BinaryOp::BitXor),
        ];
        TABLE
            .iter()
            .find(|(spelling, _)| s.starts_with(spelling))
            .map(|(spelling, op)| (*op, spelling.len()))
    }
}

/// Short-circuit boolean operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BoolOp {
    And,
    Or,
}

impl BoolOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BoolOp::And => "and",
            BoolOp::Or => "or",
        }
    }

    pub fn c_symbol(&self) -> &'static str {
        match self {
            BoolOp::And => "&&",
            BoolOp::Or => "||",
        }
    }
}

/// Unary operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    /// Arithmetic negation (`-`).
    Neg,
    /// Unary plus (`+`).
    Pos,
    /// Bitwise inversion (`~`).
    Invert,
    /// Logical `not`.
    Not,
}

/// Comparison operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CmpOp {
    Eq,
    NotEq,
    Lt,
    LtE,
    Gt,
    GtE,
    Is,
    IsNot,
    In,
    NotIn,
}

impl CmpOp {
    /// The C operator for value comparisons; identity and membership have none.
    pub fn c_symbol(&self) -> Option<&'static str> {
        match self {
            CmpOp::Eq => Some("=="),
            CmpOp::NotEq => Some("!="),
            CmpOp::Lt => Some("<"),
            CmpOp::LtE => Some("<="),
            CmpOp::Gt => Some(">"),
            CmpOp::GtE => Some(">="),
            CmpOp::Is | CmpOp::IsNot | CmpOp::In | CmpOp::NotIn => None,
        }
    }
}
