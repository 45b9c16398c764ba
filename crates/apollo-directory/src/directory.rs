//! The extension directory.
//!
//! [`Directory`] owns the merged configuration and the registry bridge behind
//! one reader/writer lock. Reads take the shared lock; mutations and reloads
//! take it exclusively. Every mutation writes only the dynamic overlay.

use std::collections::BTreeMap;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::digest::admin_digest;
use crate::groups::{self, Group};
use crate::ini::{IniDocument, Section};
use crate::line::{is_extension, parse_extension, Line, LineRecord, FIRST_EXTENSION, LAST_EXTENSION};
use crate::registry::{LiveFields, RegistryBridge};
use crate::reload::ReloadTrigger;
use crate::settings::DirectoryPaths;
use crate::store::{Layer, LayeredConfig, ServerIdentity};
use crate::{Error, Result};

/// Sections the settings flow may write.
const SETTINGS_SECTIONS: [&str; 2] = ["server", "weather"];

struct DirectoryState {
    config: LayeredConfig,
    registry: RegistryBridge,
    /// Settings recorded but not yet saved.
    pending: IniDocument,
}

impl DirectoryState {
    fn exists(&self, id: u32) -> bool {
        self.config.has_line(id)
    }

    fn is_custom(&self, id: u32) -> bool {
        self.config
            .layer(Layer::Custom)
            .section(&id.to_string())
            .is_some_and(|s| !s.is_empty())
    }

    fn merged_line(&self, id: u32) -> Line {
        let mut line = Line::default();
        if let Some(common) = self.config.section("common") {
            line.apply(&LineRecord::from_section(common));
        }
        if let Some(section) = self.config.section(&id.to_string()) {
            line.apply(&LineRecord::from_section(section));
        }
        line.apply_live(self.registry.lookup(id));
        line.editable = !self.is_custom(id);
        line
    }

    fn check_mutable(&self, id: u32) -> Result<()> {
        if !is_extension(id) {
            return Err(Error::OutOfRange(id));
        }
        if self.is_custom(id) {
            return Err(Error::NotEditable(id));
        }
        Ok(())
    }

    /// Replace the overlay section for `id` with exactly `record`. An empty
    /// record leaves no section behind.
    fn write_line(&mut self, id: u32, record: &LineRecord) -> Result<()> {
        let name = id.to_string();
        let section = record.to_section(&name);
        let mut overlay = self.config.layer(Layer::Dynamic).clone();
        overlay.remove_section(&name);
        if !section.is_empty() {
            overlay.replace_section(section);
        }
        self.config.save_overlay(overlay)?;
        self.notify_daemon();
        Ok(())
    }

    fn notify_daemon(&self) {
        if let Err(e) = self.registry.notify_reload() {
            warn!(category = "directory", error = %e, "exchange daemon not notified");
        }
    }
}

/// Extension directory over the layered configuration and live registry.
pub struct Directory {
    paths: DirectoryPaths,
    state: RwLock<DirectoryState>,
    trigger: Mutex<Option<ReloadTrigger>>,
}

impl std::fmt::Debug for Directory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Directory")
            .field("paths", &self.paths)
            .finish_non_exhaustive()
    }
}

impl Directory {
    /// Load all configuration layers and open the registry.
    ///
    /// Fails when the site file is unreadable, the registry descriptor is
    /// missing or malformed, or its sizes disagree with the compiled layout.
    pub fn open(paths: DirectoryPaths) -> Result<Self> {
        let registry = RegistryBridge::open(&paths.descriptor_file())?;
        Self::with_registry(paths, registry)
    }

    /// Load configuration layers and use an already opened registry.
    pub fn with_registry(paths: DirectoryPaths, registry: RegistryBridge) -> Result<Self> {
        let config = LayeredConfig::load(&paths)?;
        info!(
            category = "directory",
            lines = count_lines(&config),
            live = registry.is_available(),
            "directory opened"
        );
        Ok(Self {
            paths,
            state: RwLock::new(DirectoryState {
                config,
                registry,
                pending: IniDocument::new(),
            }),
            trigger: Mutex::new(None),
        })
    }

    pub fn paths(&self) -> &DirectoryPaths {
        &self.paths
    }

    /// Merged line for a provisioned extension.
    pub fn get(&self, id: u32) -> Option<Line> {
        if !is_extension(id) {
            return None;
        }
        let state = self.state.read();
        state.exists(id).then(|| state.merged_line(id))
    }

    /// Every provisioned extension, by number.
    pub fn list(&self) -> BTreeMap<u32, Line> {
        let state = self.state.read();
        state
            .config
            .merged()
            .sections()
            .filter(|section| !section.is_empty())
            .filter_map(|section| parse_extension(section.name()))
            .map(|id| (id, state.merged_line(id)))
            .collect()
    }

    pub fn count(&self) -> usize {
        count_lines(&self.state.read().config)
    }

    pub fn exists(&self, id: u32) -> bool {
        is_extension(id) && self.state.read().exists(id)
    }

    /// Lowest extension whose section holds no keys in any layer, with a
    /// template line for it. Nothing is reserved on disk.
    pub fn allocate(&self) -> Option<(u32, Line)> {
        let state = self.state.read();
        let id = (FIRST_EXTENSION..=LAST_EXTENSION).find(|&id| !state.exists(id))?;

        let mut line = Line::template();
        if let Some(common) = state.config.section("common") {
            line.apply(&LineRecord::from_section(common));
        }
        debug!(category = "directory", id, "extension allocated");
        Some((id, line))
    }

    /// Replace the overlay record of an existing or new line with `record`.
    ///
    /// The record is written as given: fields it leaves unset are dropped
    /// from the overlay even if they were saved before. Callers merge against
    /// [`Directory::saved_snapshot`] first.
    pub fn update(&self, id: u32, record: &LineRecord) -> Result<()> {
        {
            let mut state = self.state.write();
            state.check_mutable(id)?;
            state.write_line(id, record)?;
        }
        info!(category = "directory", id, "line updated");
        self.request_reload();
        Ok(())
    }

    /// Create a line under a caller-chosen number.
    pub fn provision(&self, id: u32, record: &LineRecord) -> Result<()> {
        {
            let mut state = self.state.write();
            state.check_mutable(id)?;
            if state.exists(id) {
                return Err(Error::AlreadyExists(id));
            }
            state.write_line(id, record)?;
        }
        info!(category = "directory", id, "line provisioned");
        self.request_reload();
        Ok(())
    }

    /// Drop the overlay record for `id`. Site and custom sections stay.
    pub fn remove(&self, id: u32) -> Result<()> {
        {
            let mut state = self.state.write();
            state.check_mutable(id)?;
            let mut overlay = state.config.layer(Layer::Dynamic).clone();
            overlay.remove_section(&id.to_string());
            state.config.save_overlay(overlay)?;
            state.notify_daemon();
        }
        info!(category = "directory", id, "line removed");
        self.request_reload();
        Ok(())
    }

    /// What the overlay alone stores for `id`.
    pub fn saved_snapshot(&self, id: u32) -> Option<LineRecord> {
        if !is_extension(id) {
            return None;
        }
        let state = self.state.read();
        let record = state
            .config
            .layer(Layer::Dynamic)
            .section(&id.to_string())
            .map(LineRecord::from_section)
            .unwrap_or_default();
        Some(record)
    }

    /// Store fresh digests of `password` for the enabled algorithms and drop
    /// every other credential of the line.
    pub fn change_password(&self, id: u32, password: &str) -> Result<()> {
        {
            let mut state = self.state.write();
            state.check_mutable(id)?;
            let identity = state.config.identity().clone();
            let mut record = state
                .config
                .layer(Layer::Dynamic)
                .section(&id.to_string())
                .map(LineRecord::from_section)
                .unwrap_or_default();
            record.set_credentials(identity.algorithms.credentials(
                &id.to_string(),
                &identity.realm,
                password,
            ));
            state.write_line(id, &record)?;
        }
        info!(category = "directory", id, "line password changed");
        self.request_reload();
        Ok(())
    }

    pub fn group(&self, id: &str) -> Option<Group> {
        groups::group(&self.state.read().config, id)
    }

    pub fn policy(&self, id: &str) -> Option<Group> {
        groups::policy(&self.state.read().config, id)
    }

    pub fn all_groups(&self) -> BTreeMap<String, Group> {
        groups::all_groups(&self.state.read().config)
    }

    pub fn all_policies(&self) -> BTreeMap<String, Group> {
        groups::all_policies(&self.state.read().config)
    }

    pub fn identity(&self) -> ServerIdentity {
        self.state.read().config.identity().clone()
    }

    pub fn common(&self) -> Section {
        self.section("common")
    }

    pub fn server(&self) -> Section {
        self.section("server")
    }

    pub fn weather(&self) -> Section {
        self.section("weather")
    }

    pub fn features(&self) -> Section {
        self.section("features")
    }

    /// Owned copy of any merged section.
    pub fn section(&self, name: &str) -> Section {
        self.state.read().config.section_view(name)
    }

    /// Stage a `server` or `weather` key. Nothing changes until
    /// [`Directory::save_settings`] succeeds.
    pub fn set_setting(&self, section: &str, key: &str, value: &str) -> Result<()> {
        let name = section.trim().to_lowercase();
        if !SETTINGS_SECTIONS.contains(&name.as_str()) {
            return Err(Error::ReservedSection(section.to_string()));
        }
        self.state.write().pending.section_entry(&name).set(key, value);
        debug!(category = "directory", section = %name, key, "setting staged");
        Ok(())
    }

    /// Write staged settings into the overlay. On failure they stay staged
    /// and the merged view is unchanged.
    pub fn save_settings(&self) -> Result<()> {
        {
            let mut state = self.state.write();
            let mut next = state.config.clone();
            for section in state.pending.sections() {
                for (key, value) in section.entries() {
                    next.set_key(section.name(), key, value);
                }
            }
            next.save(Layer::Dynamic)?;
            state.config = next;
            state.pending = IniDocument::new();
            state.notify_daemon();
        }
        info!(category = "directory", "settings saved");
        self.request_reload();
        Ok(())
    }

    /// Store the web administrator and persist.
    pub fn setup_admin(&self, user: &str, password: &str) -> Result<()> {
        self.set_setting("server", "webadmin", user)?;
        self.set_setting("server", "webpass", &admin_digest(user, password))?;
        self.save_settings()
    }

    pub fn is_setup(&self) -> bool {
        self.state
            .read()
            .config
            .section("server")
            .is_some_and(|s| s.has_key("webpass"))
    }

    /// Live registry fields for `id`.
    pub fn lookup(&self, id: u32) -> LiveFields {
        self.state.read().registry.lookup(id)
    }

    /// Extension owning `token`, or 0.
    pub fn verify_token(&self, token: &str) -> u32 {
        self.state.read().registry.verify_token(token)
    }

    pub fn registry_available(&self) -> bool {
        self.state.read().registry.is_available()
    }

    /// Re-read every layer and re-map the registry.
    ///
    /// A site file that fails to load leaves the previous state in place. A
    /// registry that fails to re-open leaves the new configuration with no
    /// live data.
    pub fn reload(&self) -> Result<()> {
        let mut state = self.state.write();
        let config = match LayeredConfig::load(&self.paths) {
            Ok(config) => config,
            Err(e) => {
                error!(category = "directory", error = %e, "reload failed, keeping previous configuration");
                return Err(e);
            }
        };
        state.config = config;
        state.registry.close();
        match RegistryBridge::open(&self.paths.descriptor_file()) {
            Ok(registry) => state.registry = registry,
            Err(e) => {
                state.registry = RegistryBridge::unavailable();
                error!(category = "directory", error = %e, "registry re-open failed");
                return Err(e);
            }
        }
        info!(
            category = "directory",
            lines = count_lines(&state.config),
            live = state.registry.is_available(),
            "directory reloaded"
        );
        Ok(())
    }

    /// Route mutation reloads through `trigger` from now on.
    pub fn attach_trigger(&self, trigger: ReloadTrigger) {
        *self.trigger.lock() = Some(trigger);
    }

    /// Ask the attached listener, if any, for a reload. Never blocks.
    pub fn request_reload(&self) {
        if let Some(trigger) = self.trigger.lock().as_ref() {
            if let Err(e) = trigger.request() {
                warn!(category = "directory", error = %e, "reload request dropped");
            }
        }
    }
}

fn count_lines(config: &LayeredConfig) -> usize {
    config
        .merged()
        .sections()
        .filter(|section| !section.is_empty() && parse_extension(section.name()).is_some())
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::layout::builder::{image, put, SlotBuilder};
    use crate::registry::IpcDescriptor;

    struct Fixture {
        _dir: tempfile::TempDir,
        paths: DirectoryPaths,
    }

    fn fixture(site: &str, custom: &str) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let paths = DirectoryPaths::new(dir.path(), dir.path())
            .with_defaults_file(dir.path().join("defaults.conf"));
        std::fs::write(paths.site_file(), site).unwrap();
        if !custom.is_empty() {
            std::fs::write(paths.custom_file(), custom).unwrap();
        }
        Fixture { _dir: dir, paths }
    }

    fn live_registry() -> RegistryBridge {
        let mut img = image(80);
        put(
            &mut img,
            15,
            &SlotBuilder {
                count: 1,
                lines: 2,
                presence: 1,
                agent: "deskphone",
                token: "15-token",
                address: Some("192.168.0.15".parse().unwrap()),
            },
        );
        RegistryBridge::from_image(IpcDescriptor::current("/apollo-dir-test", 80, 8), img).unwrap()
    }

    const SITE: &str = "\
[common]
lines = 2
type = phone
[15]
display = Reception
[20]
display = Office
";

    #[test]
    fn test_get_merges_common_and_live() {
        let fx = fixture(SITE, "");
        let dir = Directory::with_registry(fx.paths.clone(), live_registry()).unwrap();
        let line = dir.get(15).unwrap();
        assert_eq!(line.display, "Reception");
        assert_eq!(line.lines, 2);
        assert_eq!(line.line_type, "phone");
        assert_eq!(line.agent, "deskphone");
        assert_eq!(line.presence, "call");
        assert_eq!(line.count, 1);
        assert_eq!(line.host, "192.168.0.15");
        assert!(line.editable);

        let office = dir.get(20).unwrap();
        assert_eq!(office.agent, "offline");
        assert!(dir.get(30).is_none());
        assert!(dir.get(9).is_none());
        assert_eq!(dir.verify_token("15-token"), 15);
    }

    #[test]
    fn test_list_and_count() {
        let fx = fixture(SITE, "[42]\ndisplay = Pinned\n");
        let dir = Directory::with_registry(fx.paths.clone(), RegistryBridge::unavailable()).unwrap();
        let lines = dir.list();
        assert_eq!(lines.keys().copied().collect::<Vec<_>>(), vec![15, 20, 42]);
        assert_eq!(dir.count(), 3);
        assert!(!lines[&42].editable);
    }

    #[test]
    fn test_custom_line_is_pinned() {
        let fx = fixture(SITE, "[42]\ndisplay = Pinned\n");
        let dir = Directory::with_registry(fx.paths.clone(), RegistryBridge::unavailable()).unwrap();
        let record = LineRecord {
            display: Some("Changed".into()),
            ..Default::default()
        };
        assert!(matches!(dir.update(42, &record), Err(Error::NotEditable(42))));
        assert!(matches!(dir.remove(42), Err(Error::NotEditable(42))));
        assert!(matches!(dir.change_password(42, "x"), Err(Error::NotEditable(42))));
        assert!(!fx.paths.dynamic_file().exists());
    }

    #[test]
    fn test_update_visible_before_reload() {
        let fx = fixture(SITE, "");
        let dir = Directory::with_registry(fx.paths.clone(), RegistryBridge::unavailable()).unwrap();
        let record = LineRecord {
            display: Some("Lobby".into()),
            email: Some("lobby@example.com".into()),
            ..Default::default()
        };
        dir.update(15, &record).unwrap();
        assert_eq!(dir.get(15).unwrap().display, "Lobby");
        assert_eq!(dir.saved_snapshot(15).unwrap(), record);
        assert_eq!(dir.saved_snapshot(20).unwrap(), LineRecord::default());
        assert_eq!(dir.saved_snapshot(90), None);
    }

    #[test]
    fn test_provision_and_remove() {
        let fx = fixture(SITE, "");
        let dir = Directory::with_registry(fx.paths.clone(), RegistryBridge::unavailable()).unwrap();
        let record = LineRecord {
            display: Some("Garage".into()),
            ..Default::default()
        };
        assert!(matches!(dir.provision(15, &record), Err(Error::AlreadyExists(15))));
        assert!(matches!(dir.provision(95, &record), Err(Error::OutOfRange(95))));

        dir.provision(30, &record).unwrap();
        assert!(dir.exists(30));
        assert_eq!(dir.get(30).unwrap().display, "Garage");

        dir.remove(30).unwrap();
        assert!(!dir.exists(30));
        // site sections survive removal of their overlay
        dir.remove(15).unwrap();
        assert!(dir.exists(15));
    }

    #[test]
    fn test_allocate_applies_common() {
        let fx = fixture(SITE, "");
        let dir = Directory::with_registry(fx.paths.clone(), RegistryBridge::unavailable()).unwrap();
        let (id, line) = dir.allocate().unwrap();
        assert_eq!(id, 10);
        assert_eq!(line.lines, 2);
        assert_eq!(line.line_type, "phone");
        assert_eq!(line.location, "unspecified");
        assert!(!fx.paths.dynamic_file().exists());
    }

    #[test]
    fn test_change_password_uses_enabled_digests() {
        let fx = fixture(
            "[server]\nrealm = office\nalgorithm = md5\n[15]\nsecret = plain\n",
            "",
        );
        let dir = Directory::with_registry(fx.paths.clone(), RegistryBridge::unavailable()).unwrap();
        dir.update(
            15,
            &LineRecord {
                display: Some("Desk".into()),
                sha256: Some("stale".into()),
                ..Default::default()
            },
        )
        .unwrap();
        dir.change_password(15, "secret").unwrap();

        let saved = dir.saved_snapshot(15).unwrap();
        assert_eq!(saved.display.as_deref(), Some("Desk"));
        assert_eq!(saved.md5, Some(crate::digest::md5_secret("15", "office", "secret")));
        assert_eq!(saved.sha256, None);
        assert_eq!(saved.secret, None);
    }

    #[test]
    fn test_settings_and_setup() {
        let fx = fixture(SITE, "");
        let dir = Directory::with_registry(fx.paths.clone(), RegistryBridge::unavailable()).unwrap();
        assert!(!dir.is_setup());
        for section in ["15", "groups", "access", "features"] {
            assert!(matches!(
                dir.set_setting(section, "key", "x"),
                Err(Error::ReservedSection(_))
            ));
        }

        dir.set_setting("Weather", "city", "Leeds").unwrap();
        assert_eq!(dir.weather().get("city"), None);
        dir.setup_admin("admin", "hunter2").unwrap();
        assert!(dir.is_setup());
        assert_eq!(dir.weather().get("city"), Some("Leeds"));
        assert_eq!(
            dir.server().get("webpass"),
            Some(admin_digest("admin", "hunter2").as_str())
        );

        let saved = std::fs::read_to_string(fx.paths.dynamic_file()).unwrap();
        assert!(saved.contains("webadmin = admin"));
        assert!(saved.contains("city = Leeds"));
    }

    #[test]
    fn test_failed_settings_save_changes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let paths = DirectoryPaths::new(dir.path(), dir.path().join("missing"))
            .with_defaults_file(dir.path().join("defaults.conf"));
        std::fs::write(paths.site_file(), SITE).unwrap();
        let directory = Directory::with_registry(paths, RegistryBridge::unavailable()).unwrap();

        directory.set_setting("server", "sitename", "Changed").unwrap();
        assert!(matches!(directory.save_settings(), Err(Error::Persist { .. })));
        assert_eq!(directory.server().get("sitename"), Some("Coventry Server"));
        assert!(!directory.is_setup());
    }

    #[test]
    fn test_line_write_skips_staged_settings() {
        let fx = fixture(SITE, "");
        let dir = Directory::with_registry(fx.paths.clone(), RegistryBridge::unavailable()).unwrap();
        dir.set_setting("server", "sitename", "Staged").unwrap();
        dir.update(
            15,
            &LineRecord {
                display: Some("Lobby".into()),
                ..Default::default()
            },
        )
        .unwrap();

        let saved = std::fs::read_to_string(fx.paths.dynamic_file()).unwrap();
        assert!(!saved.contains("Staged"));
        assert_eq!(dir.server().get("sitename"), Some("Coventry Server"));

        dir.save_settings().unwrap();
        assert_eq!(dir.server().get("sitename"), Some("Staged"));
        assert_eq!(dir.get(15).unwrap().display, "Lobby");
    }

    #[test]
    fn test_empty_record_leaves_no_section() {
        let fx = fixture(SITE, "");
        let dir = Directory::with_registry(fx.paths.clone(), RegistryBridge::unavailable()).unwrap();
        dir.update(30, &LineRecord::default()).unwrap();
        assert!(!dir.exists(30));
        assert!(dir.get(30).is_none());
        assert_eq!(dir.count(), 2);
        let saved = std::fs::read_to_string(fx.paths.dynamic_file()).unwrap();
        assert!(!saved.contains("[30]"));
        dir.provision(30, &LineRecord::default()).unwrap();
    }

    #[test]
    fn test_reload_picks_up_external_edits() {
        let fx = fixture(SITE, "");
        let desc = IpcDescriptor::current(format!("/apollo-reload-{}", std::process::id()), 80, 8);
        std::fs::write(fx.paths.descriptor_file(), serde_json::to_vec(&desc).unwrap()).unwrap();

        let dir = Directory::open(fx.paths.clone()).unwrap();
        assert!(!dir.registry_available());
        std::fs::write(fx.paths.custom_file(), "[25]\ndisplay = Vault\n").unwrap();
        assert!(!dir.exists(25));
        dir.reload().unwrap();
        assert!(dir.exists(25));
        assert!(!dir.get(25).unwrap().editable);
    }

    #[test]
    fn test_reload_keeps_state_on_bad_site() {
        let fx = fixture(SITE, "");
        let dir = Directory::with_registry(fx.paths.clone(), RegistryBridge::unavailable()).unwrap();
        std::fs::write(fx.paths.site_file(), "[broken\n").unwrap();
        assert!(matches!(dir.reload(), Err(Error::ConfigLoad { .. })));
        assert!(dir.exists(15));
    }
}
