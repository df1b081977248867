//! Small extensions to the standard library shared by the whole workspace.

mod macros;
pub mod packed_option;
