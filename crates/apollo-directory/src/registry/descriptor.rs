//! The daemon's `ipc.json` size descriptor.

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::layout;
use crate::{Error, Result};

fn is_zero(n: &usize) -> bool {
    *n == 0
}

/// Record sizes and counts published by the exchange daemon at startup.
///
/// The media daemon shares the file format; its session fields are carried
/// but not checked here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpcDescriptor {
    pub ipc_path: String,

    #[serde(default, skip_serializing_if = "is_zero")]
    pub msg_size: usize,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub sys_size: usize,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub reg_size: usize,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub call_size: usize,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub reg_count: usize,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub call_count: usize,

    #[serde(default, skip_serializing_if = "is_zero")]
    pub event_size: usize,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub system_size: usize,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub session_size: usize,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub session_count: usize,
}

impl IpcDescriptor {
    /// A descriptor matching the compiled layout.
    pub fn current(ipc_path: impl Into<String>, reg_count: usize, call_count: usize) -> Self {
        Self {
            ipc_path: ipc_path.into(),
            msg_size: layout::MSG_SIZE,
            sys_size: layout::SYS_SIZE,
            reg_size: layout::REG_SIZE,
            call_size: layout::CALL_SIZE,
            reg_count,
            call_count,
            ..Self::default()
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read(path).map_err(|e| Error::Descriptor {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        serde_json::from_slice(&data).map_err(|e| Error::Descriptor {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Check every declared structure size against the compiled layout and
    /// return the byte length of the registry region.
    pub fn validate(&self) -> Result<usize> {
        let checks = [
            ("msg_size", self.msg_size, layout::MSG_SIZE),
            ("sys_size", self.sys_size, layout::SYS_SIZE),
            ("reg_size", self.reg_size, layout::REG_SIZE),
            ("call_size", self.call_size, layout::CALL_SIZE),
        ];
        for (field, declared, expected) in checks {
            if declared != expected {
                return Err(Error::SizeMismatch {
                    field,
                    declared,
                    expected,
                });
            }
        }
        Ok(self.region_size())
    }

    /// `reg_size * reg_count + sys_size`.
    pub fn region_size(&self) -> usize {
        self.reg_size
            .saturating_mul(self.reg_count)
            .saturating_add(self.sys_size)
    }

    /// Shared memory object name of the registry.
    pub fn registry_name(&self) -> String {
        format!("{}.registry", self.ipc_path)
    }
}
