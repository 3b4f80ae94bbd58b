//! Static types of the translatable subset.

use alloc::boxed::Box;
use alloc::format;
use alloc::string::{String, ToString};

use crate::{CompileError, CompileResult, ErrorKind, Expr, ExprKind};

/// Length of an array value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArrayLength {
    /// Known at compile time.
    Const(u64),
    /// Computed when the value is constructed, e.g. `[0] * count`.
    Runtime,
    /// Supplied by the producer: parameters and call results.
    Unsized,
}

impl ArrayLength {
    pub fn as_const(&self) -> Option<u64> {
        match self {
            ArrayLength::Const(n) => Some(*n),
            _ => None,
        }
    }
}

/// The closed set of value types.
#[derive(Clone, Debug, PartialEq)]
pub enum TypeDescriptor {
    Int { bits: u8, signed: bool },
    Bool,
    Float { bits: u8 },
    /// `capacity` is the literal's length when known.
    Str { capacity: Option<usize> },
    Array {
        element: Box<TypeDescriptor>,
        length: ArrayLength,
    },
    /// Not yet resolved; reaching code generation with it is an error.
    Unknown,
}

impl TypeDescriptor {
    pub const INT32: TypeDescriptor = TypeDescriptor::Int {
        bits: 32,
        signed: true,
    };
    pub const INT64: TypeDescriptor = TypeDescriptor::Int {
        bits: 64,
        signed: true,
    };
    pub const FLOAT64: TypeDescriptor = TypeDescriptor::Float { bits: 64 };
    pub const STR: TypeDescriptor = TypeDescriptor::Str { capacity: None };

    pub fn array(element: TypeDescriptor, length: ArrayLength) -> Self {
        TypeDescriptor::Array {
            element: Box::new(element),
            length,
        }
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, TypeDescriptor::Int { .. })
    }

    pub fn is_float(&self) -> bool {
        matches!(self, TypeDescriptor::Float { .. })
    }

    /// Integers, floats and bools.
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            TypeDescriptor::Int { .. } | TypeDescriptor::Float { .. } | TypeDescriptor::Bool
        )
    }

    pub fn is_array(&self) -> bool {
        matches!(self, TypeDescriptor::Array { .. })
    }

    pub fn is_str(&self) -> bool {
        matches!(self, TypeDescriptor::Str { .. })
    }

    /// Element type of an array.
    pub fn element(&self) -> Option<&TypeDescriptor> {
        match self {
            TypeDescriptor::Array { element, .. } => Some(element),
            _ => None,
        }
    }

    pub fn array_length(&self) -> Option<ArrayLength> {
        match self {
            TypeDescriptor::Array { length, .. } => Some(*length),
            _ => None,
        }
    }

    /// True when the type, or any element type, is still `Unknown`.
    pub fn contains_unknown(&self) -> bool {
        match self {
            TypeDescriptor::Unknown => true,
            TypeDescriptor::Array { element, .. } => element.contains_unknown(),
            _ => false,
        }
    }

    /// Structural equality ignoring string capacities and array lengths.
    pub fn same_shape(&self, other: &TypeDescriptor) -> bool {
        match (self, other) {
            (TypeDescriptor::Str { .. }, TypeDescriptor::Str { .. }) => true,
            (
                TypeDescriptor::Array { element: a, .. },
                TypeDescriptor::Array { element: b, .. },
            ) => a.same_shape(b),
            _ => self == other,
        }
    }

    /// Whether a value of type `value` may be stored in a binding of this type.
    ///
    /// Numbers widen and narrow freely except that floats never convert to
    /// integers implicitly; bools convert to numbers but not back.
    pub fn accepts(&self, value: &TypeDescriptor) -> bool {
        match (self, value) {
            (TypeDescriptor::Int { .. }, TypeDescriptor::Int { .. } | TypeDescriptor::Bool) => {
                true
            }
            (TypeDescriptor::Float { .. }, v) if v.is_numeric() => true,
            (TypeDescriptor::Bool, TypeDescriptor::Bool) => true,
            (TypeDescriptor::Str { .. }, TypeDescriptor::Str { .. }) => true,
            (
                TypeDescriptor::Array { element: a, .. },
                TypeDescriptor::Array { element: b, .. },
            ) => matches!(**b, TypeDescriptor::Unknown) || a.same_shape(b),
            _ => false,
        }
    }

    /// Type of an arithmetic result over two numeric operands.
    pub fn join_numeric(&self, other: &TypeDescriptor) -> Option<TypeDescriptor> {
        use TypeDescriptor::*;
        match (self, other) {
            (Float { bits: a }, Float { bits: b }) => Some(Float { bits: (*a).max(*b) }),
            (Float { .. }, r) if r.is_numeric() => Some(self.clone()),
            (l, Float { .. }) if l.is_numeric() => Some(other.clone()),
            (Bool, Bool) => Some(TypeDescriptor::INT32),
            (Int { .. }, Bool) => Some(self.clone()),
            (Bool, Int { .. }) => Some(other.clone()),
            (
                Int {
                    bits: lb,
                    signed: ls,
                },
                Int {
                    bits: rb,
                    signed: rs,
                },
            ) => {
                let signed = if lb == rb {
                    *ls && *rs
                } else if lb > rb {
                    *ls
                } else {
                    *rs
                };
                Some(Int {
                    bits: (*lb).max(*rb),
                    signed,
                })
            }
            _ => None,
        }
    }

    /// The C spelling of a scalar type, or of an array's element pointer.
    pub fn c_name(&self) -> Option<String> {
        let name = match self {
            TypeDescriptor::Int { bits, signed } => {
                format!("{}int{}_t", if *signed { "" } else { "u" }, bits)
            }
            TypeDescriptor::Bool => "bool".to_string(),
            TypeDescriptor::Float { bits: 32 } => "float".to_string(),
            TypeDescriptor::Float { .. } => "double".to_string(),
            TypeDescriptor::Str { .. } => "const char *".to_string(),
            TypeDescriptor::Array { element, .. } => {
                let element = element.c_name()?;
                if element.ends_with('*') {
                    format!("{}*", element)
                } else {
                    format!("{} *", element)
                }
            }
            TypeDescriptor::Unknown => return None,
        };
        Some(name)
    }

    /// Source-style spelling for diagnostics.
    pub fn describe(&self) -> String {
        match self {
            TypeDescriptor::Int { bits, signed } => {
                format!("{}int{}", if *signed { "" } else { "u" }, bits)
            }
            TypeDescriptor::Bool => "bool".to_string(),
            TypeDescriptor::Float { bits } => format!("float{}", bits),
            TypeDescriptor::Str { .. } => "str".to_string(),
            TypeDescriptor::Array { element, .. } => format!("list[{}]", element.describe()),
            TypeDescriptor::Unknown => "unknown".to_string(),
        }
    }
}

/// Look up a scalar type by annotation or C type name.
///
/// ```text
/// int            -> int32       float, float64, f64, double -> float64
/// int8..int64    -> intN        float32, f32                 -> float32
/// uint8..uint64  -> uintN       bool, str
/// i8..i64, u8..u64, int8_t..uint64_t
/// ```
pub fn scalar_by_name(name: &str) -> Option<TypeDescriptor> {
    let ty = match name {
        "int" => TypeDescriptor::INT32,
        "bool" => TypeDescriptor::Bool,
        "float" | "float64" | "f64" | "double" => TypeDescriptor::FLOAT64,
        "float32" | "f32" => TypeDescriptor::Float { bits: 32 },
        "str" => TypeDescriptor::STR,
        _ => return int_by_name(name),
    };
    Some(ty)
}

fn int_by_name(name: &str) -> Option<TypeDescriptor> {
    let name = name.strip_suffix("_t").unwrap_or(name);
    let (signed, bits) = if let Some(rest) = name.strip_prefix("uint") {
        (false, rest)
    } else if let Some(rest) = name.strip_prefix("int") {
        (true, rest)
    } else if let Some(rest) = name.strip_prefix('u') {
        (false, rest)
    } else if let Some(rest) = name.strip_prefix('i') {
        (true, rest)
    } else {
        return None;
    };
    match bits {
        "8" | "16" | "32" | "64" => bits.parse().ok().map(|bits| TypeDescriptor::Int { bits, signed }),
        _ => None,
    }
}

fn annotation_name(expr: &Expr) -> Option<&str> {
    match &expr.kind {
        ExprKind::Name(name) => Some(name),
        ExprKind::Attribute { attr, .. } => Some(attr),
        ExprKind::Constant(crate::Constant::Str(s)) => Some(s.trim()),
        _ => None,
    }
}

fn is_container_name(name: &str) -> bool {
    matches!(name, "list" | "List" | "array")
}

/// Resolve a value annotation to a type.
///
/// Containers resolve to arrays with `Unsized` length; the resolver fills
/// in the length from the binding's initializers. Bare `list` leaves the
/// element `Unknown`.
pub fn resolve_annotation(expr: &Expr) -> CompileResult<TypeDescriptor> {
    match &expr.kind {
        ExprKind::Subscript { value, index } => {
            let container = annotation_name(value).unwrap_or("");
            if !is_container_name(container) {
                return Err(CompileError::unsupported(
                    &format!("unsupported generic annotation `{}`", container),
                    expr.span,
                ));
            }
            let element = resolve_annotation(index)?;
            if element.is_array() {
                return Err(CompileError::unsupported(
                    "nested containers are not supported",
                    index.span,
                ));
            }
            Ok(TypeDescriptor::array(element, ArrayLength::Unsized))
        }
        ExprKind::Constant(crate::Constant::None) => Err(CompileError::mismatch(
            "`None` is only valid as a return annotation",
            expr.span,
        )),
        _ => {
            let name = annotation_name(expr).ok_or_else(|| {
                CompileError::unsupported("unsupported annotation form", expr.span)
            })?;
            if is_container_name(name) {
                return Ok(TypeDescriptor::array(
                    TypeDescriptor::Unknown,
                    ArrayLength::Unsized,
                ));
            }
            scalar_by_name(name).ok_or_else(|| {
                CompileError::unsupported(&format!("unknown type `{}`", name), expr.span)
            })
        }
    }
}

/// Resolve a return annotation; `-> None` is `Ok(None)`.
pub fn resolve_return_annotation(expr: &Expr) -> CompileResult<Option<TypeDescriptor>> {
    if expr.is_none() || annotation_name(expr) == Some("None") {
        return Ok(None);
    }
    let ty = resolve_annotation(expr)?;
    if ty.contains_unknown() {
        return Err(CompileError::new(
            ErrorKind::MissingAnnotation,
            "returned containers must name their element type",
        )
        .at(expr.span));
    }
    Ok(Some(ty))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Span;

    fn name(s: &str) -> Expr {
        Expr::new(ExprKind::Name(s.to_string()), Span::default())
    }

    #[test]
    fn test_scalar_names() {
        assert_eq!(scalar_by_name("int"), Some(TypeDescriptor::INT32));
        assert_eq!(
            scalar_by_name("uint8_t"),
            Some(TypeDescriptor::Int {
                bits: 8,
                signed: false
            })
        );
        assert_eq!(
            scalar_by_name("i16"),
            Some(TypeDescriptor::Int {
                bits: 16,
                signed: true
            })
        );
        assert_eq!(scalar_by_name("float32"), Some(TypeDescriptor::Float { bits: 32 }));
        assert_eq!(scalar_by_name("int12"), None);
        assert_eq!(scalar_by_name("Widget"), None);
    }

    #[test]
    fn test_list_annotation() {
        let ann = Expr::new(
            ExprKind::Subscript {
                value: Box::new(name("list")),
                index: Box::new(name("uint16")),
            },
            Span::default(),
        );
        let ty = resolve_annotation(&ann).unwrap();
        assert_eq!(
            ty,
            TypeDescriptor::array(
                TypeDescriptor::Int {
                    bits: 16,
                    signed: false
                },
                ArrayLength::Unsized
            )
        );
        assert!(!ty.contains_unknown());
        assert!(resolve_annotation(&name("list")).unwrap().contains_unknown());
    }

    #[test]
    fn test_accepts() {
        let int = TypeDescriptor::INT32;
        let float = TypeDescriptor::FLOAT64;
        assert!(float.accepts(&int));
        assert!(!int.accepts(&float));
        assert!(int.accepts(&TypeDescriptor::Bool));
        assert!(!TypeDescriptor::Bool.accepts(&int));
        let ints = TypeDescriptor::array(int.clone(), ArrayLength::Const(3));
        let floats = TypeDescriptor::array(float, ArrayLength::Const(3));
        assert!(ints.accepts(&TypeDescriptor::array(int, ArrayLength::Runtime)));
        assert!(!ints.accepts(&floats));
    }

    #[test]
    fn test_join_numeric() {
        let u8_ = TypeDescriptor::Int {
            bits: 8,
            signed: false,
        };
        assert_eq!(u8_.join_numeric(&TypeDescriptor::INT32), Some(TypeDescriptor::INT32));
        assert_eq!(
            TypeDescriptor::INT32.join_numeric(&TypeDescriptor::FLOAT64),
            Some(TypeDescriptor::FLOAT64)
        );
        assert_eq!(TypeDescriptor::STR.join_numeric(&TypeDescriptor::INT32), None);
    }

    #[test]
    fn test_c_names() {
        assert_eq!(TypeDescriptor::INT32.c_name().unwrap(), "int32_t");
        assert_eq!(
            TypeDescriptor::array(TypeDescriptor::STR, ArrayLength::Unsized)
                .c_name()
                .unwrap(),
            "const char **"
        );
        assert_eq!(TypeDescriptor::Unknown.c_name(), None);
    }
}
