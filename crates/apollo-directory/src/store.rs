//! Layered configuration store.
//!
//! Four INI layers are merged key by key, lowest precedence first:
//! vendor defaults, the site file, the dynamic overlay written by this
//! service, and the per-line custom file. A later layer overrides single
//! keys of a section, never the whole section.
//!
//! Only the site file is required. The other layers may be missing or
//! unreadable and then count as empty.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::digest::DigestAlgorithms;
use crate::ini::{IniDocument, Section};
use crate::settings::DirectoryPaths;
use crate::{Error, Result};

/// One configuration source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Layer {
    Defaults,
    Site,
    Dynamic,
    Custom,
}

impl Layer {
    /// Merge order, lowest precedence first.
    pub const ALL: [Layer; 4] = [Layer::Defaults, Layer::Site, Layer::Dynamic, Layer::Custom];

    pub fn name(self) -> &'static str {
        match self {
            Layer::Defaults => "defaults",
            Layer::Site => "site",
            Layer::Dynamic => "dynamic",
            Layer::Custom => "custom",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// Site-wide values derived while seeding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerIdentity {
    /// Digest realm: hostname, overridden by `server.hostname`, then `server.realm`.
    pub realm: String,
    pub algorithms: DigestAlgorithms,
    /// Shared line password from `common.password`.
    pub password: Option<String>,
}

/// Keys seeded into the site layer when the merged view lacks them.
const SEEDED: &[(&str, &str, &str)] = &[
    ("server", "sitename", "Coventry Server"),
    ("server", "location", "unspecified"),
    ("messages", "welcome", "Welcome to Coventry"),
    ("messages", "shutdown", "Shutting down..."),
    ("common", "lines", "1"),
    ("common", "presence", "here"),
    ("common", "type", "generic"),
    ("common", "room", "any"),
    ("common", "location", "unspecified"),
    ("calls", "mode", "proxy"),
    ("calls", "ring", "4"),
    ("calls", "delayed", "12"),
];

/// Seeded only when no layer has a `features` section at all.
const SEEDED_FEATURES: &[(&str, &str)] = &[("*99", "echo"), ("*98", "reload"), ("*97", "@weather")];

/// The merged configuration plus each layer as loaded.
#[derive(Debug, Clone)]
pub struct LayeredConfig {
    paths: DirectoryPaths,
    layers: [IniDocument; 4],
    merged: IniDocument,
    provenance: HashMap<String, Layer>,
    identity: ServerIdentity,
}

impl LayeredConfig {
    /// Load every layer, merge, and seed missing defaults into the site file.
    pub fn load(paths: &DirectoryPaths) -> Result<Self> {
        let site_path = paths.site_file();
        let site = match IniDocument::load(&site_path) {
            Ok(Some(doc)) => doc,
            Ok(None) => {
                return Err(Error::ConfigLoad {
                    path: site_path,
                    source: std::io::Error::new(std::io::ErrorKind::NotFound, "file not found"),
                })
            }
            Err(source) => {
                return Err(Error::ConfigLoad {
                    path: site_path,
                    source,
                })
            }
        };

        let defaults = load_optional(Layer::Defaults, paths.defaults_file());
        let dynamic = load_optional(Layer::Dynamic, &paths.dynamic_file());
        let custom = load_optional(Layer::Custom, &paths.custom_file());

        let mut config = Self::from_layers(paths.clone(), [defaults, site, dynamic, custom]);
        if let Some(seeded) = config.seed_defaults() {
            // append only the new keys
            if let Err(e) = seeded.append_to(&site_path) {
                warn!(category = "config", error = %e, "cannot persist seeded defaults");
            }
        }
        info!(
            category = "config",
            sections = config.merged.sections().count(),
            realm = %config.identity.realm,
            algorithms = %config.identity.algorithms,
            "configuration loaded"
        );
        Ok(config)
    }

    /// Merge already parsed layers without touching the filesystem.
    pub fn from_layers(paths: DirectoryPaths, layers: [IniDocument; 4]) -> Self {
        let mut config = Self {
            paths,
            layers,
            merged: IniDocument::new(),
            provenance: HashMap::new(),
            identity: ServerIdentity {
                realm: String::new(),
                algorithms: DigestAlgorithms::default(),
                password: None,
            },
        };
        config.remerge();
        config
    }

    pub fn paths(&self) -> &DirectoryPaths {
        &self.paths
    }

    pub fn merged(&self) -> &IniDocument {
        &self.merged
    }

    pub fn identity(&self) -> &ServerIdentity {
        &self.identity
    }

    pub fn layer(&self, layer: Layer) -> &IniDocument {
        &self.layers[layer.index()]
    }

    /// Merged section, if any layer defines it.
    pub fn section(&self, name: &str) -> Option<&Section> {
        self.merged.section(name)
    }

    /// Owned copy of a merged section; empty when undefined.
    pub fn section_view(&self, name: &str) -> Section {
        self.merged
            .section(name)
            .cloned()
            .unwrap_or_else(|| Section::new(name))
    }

    pub fn has_section(&self, name: &str) -> bool {
        self.merged.has_section(name)
    }

    /// Whether extension `id` has a section with at least one key.
    pub fn has_line(&self, id: u32) -> bool {
        self.merged
            .section(&id.to_string())
            .is_some_and(|s| !s.is_empty())
    }

    /// Highest precedence layer that defines `section`.
    pub fn defined_by(&self, section: &str) -> Option<Layer> {
        self.provenance.get(&section.to_lowercase()).copied()
    }

    /// Set one key in the dynamic overlay. Not persisted until saved.
    pub fn set_key(&mut self, section: &str, key: &str, value: &str) {
        self.layers[Layer::Dynamic.index()]
            .section_entry(section)
            .set(key, value);
        self.remerge();
    }

    /// Write one layer's current document to its file.
    pub fn save(&self, layer: Layer) -> Result<()> {
        write_layer(&self.layers[layer.index()], &self.layer_path(layer), layer)
    }

    /// Persist `overlay` as the new dynamic layer. On failure nothing changes.
    pub fn save_overlay(&mut self, overlay: IniDocument) -> Result<()> {
        write_layer(&overlay, &self.paths.dynamic_file(), Layer::Dynamic)?;
        self.layers[Layer::Dynamic.index()] = overlay;
        self.remerge();
        Ok(())
    }

    fn layer_path(&self, layer: Layer) -> PathBuf {
        match layer {
            Layer::Defaults => self.paths.defaults_file().to_path_buf(),
            Layer::Site => self.paths.site_file(),
            Layer::Dynamic => self.paths.dynamic_file(),
            Layer::Custom => self.paths.custom_file(),
        }
    }

    fn remerge(&mut self) {
        let mut merged = IniDocument::new();
        let mut provenance = HashMap::new();
        for layer in Layer::ALL {
            for section in self.layers[layer.index()].sections() {
                let target = merged.section_entry(section.name());
                for (key, value) in section.entries() {
                    target.set(key, value);
                }
                provenance.insert(section.name().to_string(), layer);
            }
        }
        self.merged = merged;
        self.provenance = provenance;
        self.identity = self.derive_identity();
    }

    fn derive_identity(&self) -> ServerIdentity {
        let server = self.section_view("server");
        let realm = server
            .get("realm")
            .or_else(|| server.get("hostname"))
            .map(str::to_string)
            .unwrap_or_else(local_hostname);
        let algorithms = server
            .get("algorithm")
            .map(DigestAlgorithms::normalize)
            .unwrap_or_default();
        let password = self
            .merged
            .section("common")
            .and_then(|common| common.get("password"))
            .map(str::to_string);
        ServerIdentity {
            realm,
            algorithms,
            password,
        }
    }

    /// Add required keys missing from the merged view to the site layer.
    /// Returns just the added keys, if any.
    fn seed_defaults(&mut self) -> Option<IniDocument> {
        let mut added = Vec::new();
        for (section, key, value) in SEEDED {
            let present = self
                .merged
                .section(section)
                .is_some_and(|s| s.has_key(key));
            if !present {
                added.push((*section, *key, *value));
            }
        }
        if !self.merged.has_section("features") {
            for (key, value) in SEEDED_FEATURES {
                added.push(("features", *key, *value));
            }
        }
        if added.is_empty() {
            return None;
        }

        let mut seeded = IniDocument::new();
        let site = &mut self.layers[Layer::Site.index()];
        for (section, key, value) in &added {
            site.section_entry(section).set(key, *value);
            seeded.section_entry(section).set(key, *value);
        }
        debug!(category = "config", count = added.len(), "seeded default keys");
        self.remerge();
        Some(seeded)
    }
}

fn load_optional(layer: Layer, path: &Path) -> IniDocument {
    match IniDocument::load(path) {
        Ok(Some(doc)) => doc,
        Ok(None) => {
            debug!(category = "config", layer = layer.name(), path = %path.display(), "layer absent");
            IniDocument::new()
        }
        Err(e) => {
            warn!(
                category = "config",
                layer = layer.name(),
                path = %path.display(),
                error = %e,
                "ignoring unreadable layer"
            );
            IniDocument::new()
        }
    }
}

fn write_layer(doc: &IniDocument, path: &Path, layer: Layer) -> Result<()> {
    let persist = |source| Error::Persist {
        path: path.to_path_buf(),
        source,
    };
    doc.save(path).map_err(persist)?;

    // owner-only, it holds server.webpass
    #[cfg(unix)]
    if layer == Layer::Dynamic {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).map_err(persist)?;
    }

    debug!(category = "config", layer = layer.name(), path = %path.display(), "layer saved");
    Ok(())
}

fn local_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|n| n.into_string().ok())
        .unwrap_or_else(|| "localhost".to_string())
}
