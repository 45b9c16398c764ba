//! Read-only bridge onto the exchange daemon's live registry.
//!
//! The daemon publishes one registration record per extension slot in a
//! shared memory segment named `<ipc_path>.registry`, followed by a system
//! header. [`RegistryBridge`] validates the daemon's size descriptor against
//! the compiled layout, maps the segment read-only and answers per-extension
//! lookups. When the segment is absent the bridge stays usable and reports
//! every extension offline.

pub mod descriptor;
pub mod layout;
mod shm;

use std::path::Path;

use tracing::{debug, info, warn};

pub use descriptor::IpcDescriptor;
pub use layout::RegistrySlot;

use crate::line::{is_extension, FIRST_EXTENSION};
use crate::{Error, Result};
use shm::{RegionError, SharedRegion};

/// Live fields for one extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveFields {
    pub agent: String,
    pub presence: String,
    pub count: u16,
    pub host: String,
}

impl LiveFields {
    pub const AGENT_OFFLINE: &'static str = "offline";
    pub const PRESENCE_DOWN: &'static str = "down";

    pub fn offline() -> Self {
        Self {
            agent: Self::AGENT_OFFLINE.to_string(),
            presence: Self::PRESENCE_DOWN.to_string(),
            count: 0,
            host: String::new(),
        }
    }

    fn from_slot(slot: &RegistrySlot) -> Self {
        let host = slot.host();
        let agent = if slot.agent.is_empty() || slot.address.is_none() {
            Self::AGENT_OFFLINE.to_string()
        } else {
            slot.agent.clone()
        };
        Self {
            agent,
            presence: slot.presence_label().to_string(),
            count: u16::try_from(slot.count).unwrap_or(u16::MAX),
            host,
        }
    }
}

enum Region {
    Shared(SharedRegion),
    Image(Vec<u8>),
}

impl Region {
    fn read(&self, offset: usize, buf: &mut [u8]) -> bool {
        match self {
            Region::Shared(shared) => shared.read(offset, buf),
            Region::Image(image) => match image.get(offset..offset + buf.len()) {
                Some(bytes) => {
                    buf.copy_from_slice(bytes);
                    true
                }
                None => false,
            },
        }
    }
}

/// Handle onto the daemon's registry.
pub struct RegistryBridge {
    descriptor: Option<IpcDescriptor>,
    region: Option<Region>,
}

impl std::fmt::Debug for RegistryBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryBridge")
            .field("descriptor", &self.descriptor)
            .field("available", &self.is_available())
            .finish()
    }
}

impl RegistryBridge {
    /// A bridge with no descriptor and no live data.
    pub fn unavailable() -> Self {
        Self {
            descriptor: None,
            region: None,
        }
    }

    /// Read the descriptor at `path`, check it against the compiled layout and
    /// map the registry segment.
    ///
    /// A malformed descriptor, a size disagreement or a segment of the wrong
    /// length is an error. A missing segment is not: the bridge opens without
    /// live data.
    pub fn open(path: &Path) -> Result<Self> {
        let descriptor = IpcDescriptor::load(path)?;
        let expected = descriptor.validate()?;
        let name = descriptor.registry_name();

        let region = match SharedRegion::open(&name, expected) {
            Ok(region) => {
                info!(category = "registry", segment = %name, bytes = region.len(), "registry mapped");
                Some(Region::Shared(region))
            }
            Err(RegionError::Missing(e)) => {
                warn!(category = "registry", segment = %name, error = %e, "shared registry missing");
                None
            }
            Err(RegionError::Length { actual, expected }) => {
                return Err(Error::SizeMismatch {
                    field: "registry segment",
                    declared: actual,
                    expected,
                });
            }
            Err(RegionError::Map(e)) => {
                warn!(category = "registry", segment = %name, error = %e, "shared registry broken");
                None
            }
        };

        Ok(Self {
            descriptor: Some(descriptor),
            region,
        })
    }

    /// A bridge over a captured registry image, validated like a live segment.
    pub fn from_image(descriptor: IpcDescriptor, image: Vec<u8>) -> Result<Self> {
        let expected = descriptor.validate()?;
        if image.len() != expected {
            return Err(Error::SizeMismatch {
                field: "registry image",
                declared: image.len(),
                expected,
            });
        }
        Ok(Self {
            descriptor: Some(descriptor),
            region: Some(Region::Image(image)),
        })
    }

    pub fn is_available(&self) -> bool {
        self.region.is_some()
    }

    pub fn descriptor(&self) -> Option<&IpcDescriptor> {
        self.descriptor.as_ref()
    }

    /// Error explaining why no live data is present, if that is the case.
    pub fn availability(&self) -> Result<()> {
        match (&self.descriptor, &self.region) {
            (_, Some(_)) => Ok(()),
            (Some(desc), None) => Err(Error::BridgeUnavailable(desc.registry_name())),
            (None, None) => Err(Error::BridgeUnavailable("no descriptor".to_string())),
        }
    }

    /// Live fields for `id`; offline defaults when out of range or unavailable.
    pub fn lookup(&self, id: u32) -> LiveFields {
        self.slot(id)
            .map(|slot| LiveFields::from_slot(&slot))
            .unwrap_or_else(LiveFields::offline)
    }

    /// Extension id owning a bearer token, or 0 when the token is not valid.
    ///
    /// Tokens start with the two-digit extension number.
    pub fn verify_token(&self, token: &str) -> u32 {
        let bytes = token.as_bytes();
        if bytes.len() < 2 || !bytes[0].is_ascii_digit() || !bytes[1].is_ascii_digit() {
            return 0;
        }
        let uid = u32::from(bytes[0] - b'0') * 10 + u32::from(bytes[1] - b'0');
        match self.slot(uid) {
            Some(slot) if slot.token == token => uid,
            _ => 0,
        }
    }

    /// Ask the daemon to reload its configuration. Fire and forget.
    pub fn notify_reload(&self) -> Result<()> {
        let descriptor = self
            .descriptor
            .as_ref()
            .ok_or_else(|| Error::DaemonNotify("no descriptor".to_string()))?;
        shm::send_reload(&descriptor.ipc_path, &layout::reload_message())
            .map_err(|e| Error::DaemonNotify(format!("{}: {}", descriptor.ipc_path, e)))?;
        debug!(category = "registry", queue = %descriptor.ipc_path, "reload sent to daemon");
        Ok(())
    }

    /// Unmap the segment. Lookups report offline afterwards.
    pub fn close(&mut self) {
        if self.region.take().is_some() {
            debug!(category = "registry", "registry unmapped");
        }
    }

    fn slot(&self, id: u32) -> Option<RegistrySlot> {
        if !is_extension(id) {
            return None;
        }
        let region = self.region.as_ref()?;
        let descriptor = self.descriptor.as_ref()?;
        let index = (id - FIRST_EXTENSION) as usize;
        if index >= descriptor.reg_count {
            return None;
        }
        let mut record = vec![0u8; layout::REG_SIZE];
        if !region.read(index * layout::REG_SIZE, &mut record) {
            return None;
        }
        RegistrySlot::parse(&record)
    }
}
