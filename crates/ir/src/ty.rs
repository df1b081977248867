use std::fmt;

/// Types of the IR. Layout questions the analyses ask are answered by
/// [`Ty::size`] and [`Ty::contains_pointer`]; structs are laid out without
/// padding.
#[derive(Clone, PartialEq, Eq, Hash)]
pub enum Ty {
    Void,
    /// `i1`, `i8`, `i32` or `i64`.
    Int(u8),
    Ptr(Box<Ty>),
    Array(u64, Box<Ty>),
    Struct(Vec<Ty>),
}

pub const PTR_SIZE: u64 = 8;

impl Ty {
    pub fn contains_pointer(&self) -> bool {
        match self {
            Ty::Void | Ty::Int(_) => false,
            Ty::Ptr(_) => true,
            Ty::Array(_, elem) => elem.contains_pointer(),
            Ty::Struct(fields) => fields.iter().any(Ty::contains_pointer),
        }
    }

    /// Size in bytes.
    pub fn size(&self) -> u64 {
        match self {
            Ty::Void => 0,
            Ty::Int(bits) => u64::from(*bits).div_ceil(8),
            Ty::Ptr(_) => PTR_SIZE,
            Ty::Array(len, elem) => len * elem.size(),
            Ty::Struct(fields) => fields.iter().map(Ty::size).sum(),
        }
    }

    pub fn pointee(&self) -> Option<&Ty> {
        match self {
            Ty::Ptr(inner) => Some(inner),
            _ => None,
        }
    }

    pub fn is_void(&self) -> bool {
        matches!(self, Ty::Void)
    }
}

impl fmt::Debug for Ty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ty::Void => write!(f, "void"),
            Ty::Int(bits) => write!(f, "i{bits}"),
            Ty::Ptr(inner) => write!(f, "*{inner:?}"),
            Ty::Array(len, elem) => write!(f, "[{len} x {elem:?}]"),
            Ty::Struct(fields) => {
                write!(f, "{{")?;
                for (i, field) in fields.iter().enumerate() {
                    if i != 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{field:?}")?;
                }
                write!(f, "}}")
            }
        }
    }
}
