//! Convenience macros.

/// Generates `From`/`TryFrom` impls for `enum E { Foo(Foo), Bar(Bar) }` style enums.
///
/// # Example
///
/// ```rust,ignore
/// impl_from!(Local, Assignment, Block for Work);
/// ```
#[macro_export]
macro_rules! impl_from {
    ($($variant:ident),* for $enum:ident) => {
        $(
            impl From<$variant> for $enum {
                fn from(it: $variant) -> $enum {
                    $enum::$variant(it)
                }
            }
            impl TryFrom<$enum> for $variant {
                type Error = ();

                fn try_from(it: $enum) -> Result<$variant, ()> {
                    if let $enum::$variant(it) = it {
                        Ok(it)
                    } else {
                        Err(())
                    }
                }
            }
        )*
    };
}

/// Generates the `usize`/raw conversions every dense index type needs.
#[macro_export]
macro_rules! impl_idx_from {
    ($ty:ident($raw:ident)) => {
        impl From<$raw> for $ty {
            #[inline(always)]
            fn from(it: $raw) -> $ty {
                $ty(it)
            }
        }

        impl From<$ty> for $raw {
            #[inline(always)]
            fn from(it: $ty) -> $raw {
                it.0
            }
        }

        impl From<usize> for $ty {
            #[inline(always)]
            fn from(it: usize) -> $ty {
                ::std::debug_assert!(it < $raw::MAX as usize);
                $ty(it as $raw)
            }
        }

        impl From<$ty> for usize {
            #[inline(always)]
            fn from(it: $ty) -> usize {
                it.0 as usize
            }
        }
    };
}

/// Index arithmetic for dense index types that are iterated by offset.
#[macro_export]
macro_rules! impl_idx_math {
    ($ty:ident($raw:ident)) => {
        impl std::ops::Add<usize> for $ty {
            type Output = $ty;

            #[inline(always)]
            fn add(self, other: usize) -> $ty {
                let res = self.0 as usize + other;
                debug_assert!(res <= $raw::MAX as usize);
                $ty(res as $raw)
            }
        }

        impl std::ops::Sub<usize> for $ty {
            type Output = $ty;

            #[inline(always)]
            fn sub(self, other: usize) -> $ty {
                let res = self.0 as usize - other;
                $ty(res as $raw)
            }
        }

        impl std::ops::AddAssign<usize> for $ty {
            #[inline(always)]
            fn add_assign(&mut self, other: usize) {
                self.0 += other as $raw;
            }
        }
    };
}

/// Generates a `Display` implementation.
///
/// # Example
///
/// ```rust,ignore
/// impl_display! {
///     match ParseError {
///         ParseError::Expected(s) => "expected {}", s;
///         ParseError::Eof => "unexpected end of input";
///     }
/// }
/// ```
#[macro_export]
macro_rules! impl_display {
    ($($args:tt)*) => {
        $crate::impl_fmt!(Display $($args)*);
    };
}

/// Generates a `Debug` implementation.
#[macro_export]
macro_rules! impl_debug {
    ($($args:tt)*) => {
        $crate::impl_fmt!(Debug $($args)*);
    };
}

/// Generates an implementation of the specified fmt trait.
#[macro_export]
macro_rules! impl_fmt {
    ($trait:ident match $ty:ident { $($variant:pat => $fmt:literal $(, $fmt_arg:expr)*;)* }) => {
        impl std::fmt::$trait for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                match self {
                    $($variant => write!(f, $fmt $(, $fmt_arg)*)),*
                }
            }
        }
    };

    ($trait:ident $binding:ident @ $ty:ident => $fmt:literal $(, $fmt_arg:expr)*) => {
        impl std::fmt::$trait for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                let $binding = self;
                write!(f, $fmt $(, $fmt_arg)*)
            }
        }
    };
}
