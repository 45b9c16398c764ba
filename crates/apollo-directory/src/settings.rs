//! Filesystem locations of the configuration layers.
//!
//! Defaults match a packaged install; each prefix can be overridden from the
//! environment or by the caller.

use std::path::{Path, PathBuf};

/// Default install locations.
pub mod defaults {
    pub const ETC_PREFIX: &str = "/etc";
    pub const WORKING_DIR: &str = "/var/lib/coventry";
    pub const DEFAULTS_FILE: &str = "/usr/share/apollo/defaults.conf";
}

/// File names inside the prefixes.
pub mod files {
    pub const SITE: &str = "coventry.conf";
    pub const DYNAMIC: &str = "dynamic.conf";
    pub const CUSTOM: &str = "custom.conf";
    pub const DESCRIPTOR: &str = "ipc.json";
}

/// Environment variable names.
pub mod env_vars {
    pub const ETC_PREFIX: &str = "APOLLO_ETC_PREFIX";
    pub const WORKING_DIR: &str = "APOLLO_WORKING_DIR";
    pub const DEFAULTS_FILE: &str = "APOLLO_DEFAULTS_FILE";
}

/// Where the directory finds its layers and the registry descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryPaths {
    pub etc_prefix: PathBuf,
    pub working_dir: PathBuf,
    pub defaults_file: PathBuf,
}

impl Default for DirectoryPaths {
    fn default() -> Self {
        Self {
            etc_prefix: PathBuf::from(defaults::ETC_PREFIX),
            working_dir: PathBuf::from(defaults::WORKING_DIR),
            defaults_file: PathBuf::from(defaults::DEFAULTS_FILE),
        }
    }
}

impl DirectoryPaths {
    /// Paths rooted at the given prefixes, vendor defaults left at the
    /// packaged location.
    pub fn new(etc_prefix: impl Into<PathBuf>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            etc_prefix: etc_prefix.into(),
            working_dir: working_dir.into(),
            ..Self::default()
        }
    }

    /// Defaults overridden by any `APOLLO_*` environment variables that are set.
    pub fn from_env() -> Self {
        let mut paths = Self::default();
        if let Ok(etc) = std::env::var(env_vars::ETC_PREFIX) {
            paths.etc_prefix = PathBuf::from(etc);
        }
        if let Ok(dir) = std::env::var(env_vars::WORKING_DIR) {
            paths.working_dir = PathBuf::from(dir);
        }
        if let Ok(file) = std::env::var(env_vars::DEFAULTS_FILE) {
            paths.defaults_file = PathBuf::from(file);
        }
        paths
    }

    pub fn with_defaults_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.defaults_file = path.into();
        self
    }

    pub fn site_file(&self) -> PathBuf {
        self.etc_prefix.join(files::SITE)
    }

    pub fn dynamic_file(&self) -> PathBuf {
        self.working_dir.join(files::DYNAMIC)
    }

    pub fn custom_file(&self) -> PathBuf {
        self.working_dir.join(files::CUSTOM)
    }

    pub fn descriptor_file(&self) -> PathBuf {
        self.working_dir.join(files::DESCRIPTOR)
    }

    pub fn defaults_file(&self) -> &Path {
        &self.defaults_file
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derived_paths() {
        let paths = DirectoryPaths::new("/opt/etc", "/opt/lib/coventry");
        assert_eq!(paths.site_file(), PathBuf::from("/opt/etc/coventry.conf"));
        assert_eq!(
            paths.dynamic_file(),
            PathBuf::from("/opt/lib/coventry/dynamic.conf")
        );
        assert_eq!(
            paths.custom_file(),
            PathBuf::from("/opt/lib/coventry/custom.conf")
        );
        assert_eq!(
            paths.descriptor_file(),
            PathBuf::from("/opt/lib/coventry/ipc.json")
        );
        assert_eq!(paths.defaults_file(), Path::new(defaults::DEFAULTS_FILE));
    }
}
