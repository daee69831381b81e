//! Built-in device profiles.

pub mod arista_eos;
pub mod cisco_ios;
pub mod generic;
