//! Device profiles for multi-vendor support.
//!
//! A profile bundles the prompt grammar, failure strings and identity
//! probe for one family of switches.

mod definition;
mod registry;
pub mod vendors;

pub use definition::DeviceProfile;
pub use registry::ProfileRegistry;
