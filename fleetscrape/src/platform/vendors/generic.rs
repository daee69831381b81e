//! Fallback profile: any output ending in `#` or `>` is a prompt.
//!
//! Nothing is known about the device's commands, so it is named after its
//! prompt.

use crate::platform::DeviceProfile;
use crate::runner::IdentityProbe;

/// Create the generic profile.
pub fn profile() -> DeviceProfile {
    DeviceProfile::new("generic").with_identity(IdentityProbe::Prompt)
}
