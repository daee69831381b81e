//! Registry for looking up device profiles by name.

use std::collections::HashMap;
use std::sync::Arc;

use super::definition::DeviceProfile;
use super::vendors;
use crate::channel::RegexGrammar;
use crate::error::{ChannelError, PlatformError, Result};

/// Registry of device profiles.
#[derive(Debug, Default)]
pub struct ProfileRegistry {
    profiles: HashMap<String, DeviceProfile>,
}

impl ProfileRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            profiles: HashMap::new(),
        }
    }

    /// Registry pre-populated with the built-in profiles.
    pub fn builtin() -> Result<Self> {
        let mut registry = Self::new();
        registry.register(vendors::generic::profile())?;
        registry.register(vendors::cisco_ios::profile()?)?;
        registry.register(vendors::arista_eos::profile()?)?;
        Ok(registry)
    }

    /// Register a profile.
    pub fn register(&mut self, profile: DeviceProfile) -> Result<()> {
        if profile.name.trim().is_empty() {
            return Err(PlatformError::InvalidDefinition {
                message: "profile name is empty".to_string(),
            }
            .into());
        }
        if self.profiles.contains_key(&profile.name) {
            return Err(PlatformError::AlreadyRegistered {
                name: profile.name.clone(),
            }
            .into());
        }
        self.profiles.insert(profile.name.clone(), profile);
        Ok(())
    }

    /// Get a profile by name.
    pub fn get(&self, name: &str) -> Option<&DeviceProfile> {
        self.profiles.get(name)
    }

    /// Resolve `name`, optionally replacing its grammar with a custom
    /// terminator pattern.
    pub fn resolve(&self, name: &str, prompt_pattern: Option<&str>) -> Result<DeviceProfile> {
        let profile = self
            .get(name)
            .cloned()
            .ok_or_else(|| PlatformError::UnknownPlatform {
                name: name.to_string(),
            })?;

        match prompt_pattern {
            Some(pattern) => {
                let grammar = RegexGrammar::new(pattern).map_err(ChannelError::InvalidPattern)?;
                Ok(profile.with_grammar(Arc::new(grammar)))
            }
            None => Ok(profile),
        }
    }

    /// Check if a profile is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.profiles.contains_key(name)
    }

    /// List all registered profile names.
    pub fn names(&self) -> impl Iterator<Item = &String> {
        self.profiles.keys()
    }
}
