//! End-to-end tests for the extension directory.
//!
//! Tests include:
//! - Range checks on every entry point
//! - Allocation at the top of the range and when full
//! - Load idempotence and overlay round trips
//! - Custom layer editability
//! - Degraded registry
//! - Group member filtering
//! - Concurrent readers, writers and reloads

use std::path::Path;
use std::sync::Arc;

use apollo_directory::{
    spawn_reload_listener, DigestAlgorithms, Directory, DirectoryPaths, Error, IpcDescriptor,
    LineRecord,
};
use tempfile::TempDir;

struct Site {
    _tmp: TempDir,
    paths: DirectoryPaths,
}

impl Site {
    fn new(site: &str) -> Self {
        let tmp = tempfile::tempdir().expect("Failed to create temp dir");
        let etc = tmp.path().join("etc");
        let working = tmp.path().join("coventry");
        std::fs::create_dir_all(&etc).unwrap();
        std::fs::create_dir_all(&working).unwrap();
        let paths = DirectoryPaths::new(&etc, &working)
            .with_defaults_file(tmp.path().join("defaults.conf"));
        std::fs::write(paths.site_file(), site).unwrap();

        // the daemon is never running in tests, so its segment is absent
        let name = format!("/apollo-it-{}-{}", std::process::id(), unique());
        let desc = IpcDescriptor::current(name, 80, 16);
        std::fs::write(paths.descriptor_file(), serde_json::to_vec(&desc).unwrap()).unwrap();
        Self { _tmp: tmp, paths }
    }

    fn write(&self, path: &Path, text: &str) {
        std::fs::write(path, text).unwrap();
    }

    fn open(&self) -> Directory {
        Directory::open(self.paths.clone()).expect("Failed to open directory")
    }
}

fn unique() -> u64 {
    use std::sync::atomic::{AtomicU64, Ordering};
    static NEXT: AtomicU64 = AtomicU64::new(0);
    NEXT.fetch_add(1, Ordering::Relaxed)
}

fn display(name: &str) -> LineRecord {
    LineRecord {
        display: Some(name.to_string()),
        ..Default::default()
    }
}

#[test]
fn test_out_of_range_never_touches_overlay() {
    let site = Site::new("[15]\ndisplay = Front\n");
    let dir = site.open();

    for id in [0, 9, 90, 100, u32::MAX] {
        assert!(dir.get(id).is_none());
        assert!(!dir.exists(id));
        assert!(matches!(dir.update(id, &display("x")), Err(Error::OutOfRange(n)) if n == id));
        assert!(matches!(dir.remove(id), Err(Error::OutOfRange(_))));
        assert!(matches!(dir.provision(id, &display("x")), Err(Error::OutOfRange(_))));
        assert!(matches!(dir.change_password(id, "pw"), Err(Error::OutOfRange(_))));
        assert!(dir.saved_snapshot(id).is_none());
    }
    assert!(!site.paths.dynamic_file().exists());
}

#[test]
fn test_allocate_last_free() {
    let mut text = String::new();
    for id in 10..=88 {
        text.push_str(&format!("[{}]\ndisplay = Line {}\n", id, id));
    }
    let site = Site::new(&text);
    let dir = site.open();

    let (id, line) = dir.allocate().expect("89 should be free");
    assert_eq!(id, 89);
    assert_eq!(line.lines, 1);
    assert_eq!(line.line_type, "generic");
    assert!(line.editable);

    dir.provision(89, &display("Line 89")).unwrap();
    assert!(dir.allocate().is_none());
    assert_eq!(dir.count(), 80);
}

#[test]
fn test_allocate_skips_keyless_sections_only() {
    let site = Site::new("[10]\ndisplay = Ten\n[11]\n");
    let dir = site.open();
    // an empty header defines no keys
    let (id, _) = dir.allocate().unwrap();
    assert_eq!(id, 11);
    assert!(!dir.exists(11));
    assert!(!dir.list().contains_key(&11));

    dir.provision(id, &display("Eleven")).unwrap();
    assert_eq!(dir.get(11).unwrap().display, "Eleven");
    assert_eq!(dir.allocate().map(|(id, _)| id), Some(12));
}

#[test]
fn test_load_is_idempotent() {
    let site = Site::new("[15]\ndisplay = Front\n[20]\ndisplay = Back\n");
    site.write(&site.paths.dynamic_file(), "[20]\nemail = back@example.com\n");
    site.write(&site.paths.custom_file(), "[42]\ndisplay = Pinned\n");

    let first = site.open().list();
    let second = site.open().list();
    assert_eq!(first, second);
    assert_eq!(first.len(), 3);
    assert_eq!(first[&20].email, "back@example.com");
    assert_eq!(first[&20].display, "Back");
}

#[test]
fn test_update_snapshot_round_trip() {
    let site = Site::new("[15]\ndisplay = Front\nlocation = Hall\ncabling = A1\n");
    let dir = site.open();

    let edited = LineRecord {
        display: Some("Front Desk".to_string()),
        email: Some("desk@example.com".to_string()),
        lines: Some(2),
        ..Default::default()
    };
    dir.update(15, &edited).unwrap();
    assert_eq!(dir.saved_snapshot(15).unwrap(), edited);

    let merged = dir.get(15).unwrap();
    assert_eq!(merged.location, "Hall");
    assert_eq!(merged.lines, 2);

    // a later update replaces the whole overlay record
    dir.update(15, &display("Reception")).unwrap();
    assert_eq!(dir.saved_snapshot(15).unwrap(), display("Reception"));

    let text = std::fs::read_to_string(site.paths.dynamic_file()).unwrap();
    assert!(!text.contains("location"));
    assert!(!text.contains("email"));
}

#[test]
fn test_merge_then_diff_keeps_unrelated_fields() {
    let site = Site::new("[15]\ndisplay = Front\n");
    let dir = site.open();
    dir.update(15, &LineRecord {
        email: Some("front@example.com".to_string()),
        ..Default::default()
    })
    .unwrap();

    let current = dir.get(15).unwrap();
    let mut saved = dir.saved_snapshot(15).unwrap();
    saved.record_changes(&current, &LineRecord {
        display: Some("Front".to_string()),
        location: Some("Lobby".to_string()),
        ..Default::default()
    });
    dir.update(15, &saved).unwrap();

    let after = dir.saved_snapshot(15).unwrap();
    assert_eq!(after.email.as_deref(), Some("front@example.com"));
    assert_eq!(after.location.as_deref(), Some("Lobby"));
    assert_eq!(after.display, None);
}

#[test]
fn test_custom_only_line_not_editable() {
    let site = Site::new("[15]\ndisplay = Front\n");
    site.write(&site.paths.custom_file(), "[42]\ndisplay = Pinned\n");
    let dir = site.open();

    let line = dir.get(42).expect("custom lines are listed");
    assert!(!line.editable);
    assert_eq!(line.display, "Pinned");
    assert!(matches!(dir.update(42, &display("x")), Err(Error::NotEditable(42))));
    assert!(dir.get(15).unwrap().editable);
    assert!(!site.paths.dynamic_file().exists());
}

#[test]
fn test_registry_absent_degrades() {
    let site = Site::new("[15]\ndisplay = Front\n");
    let dir = site.open();
    assert!(!dir.registry_available());

    for id in [10, 15, 89] {
        let live = dir.lookup(id);
        assert_eq!(live.agent, "offline");
        assert_eq!(live.presence, "down");
        assert_eq!(live.count, 0);
        assert_eq!(live.host, "");
    }
    for token in ["", "15", "15-anything", "garbage"] {
        assert_eq!(dir.verify_token(token), 0);
    }
    let line = dir.get(15).unwrap();
    assert_eq!(line.agent, "offline");
    assert_eq!(line.presence, "down");
}

#[test]
fn test_registry_size_skew_is_fatal() {
    let site = Site::new("[15]\ndisplay = Front\n");
    let mut desc = IpcDescriptor::current("/apollo-skew", 80, 16);
    desc.reg_size = 304;
    site.write(&site.paths.descriptor_file(), &serde_json::to_string(&desc).unwrap());

    let err = Directory::open(site.paths.clone()).unwrap_err();
    assert!(matches!(err, Error::SizeMismatch { field: "reg_size", .. }));
    assert!(err.is_fatal());
}

#[test]
fn test_missing_site_file_is_fatal() {
    let site = Site::new("");
    std::fs::remove_file(site.paths.site_file()).unwrap();
    let err = Directory::open(site.paths.clone()).unwrap_err();
    assert!(matches!(err, Error::ConfigLoad { .. }));
}

#[test]
fn test_group_member_filtering() {
    let site = Site::new(
        "[15]\ndisplay = Front\n[20]\ndisplay = Back\n[groups]\nsales = 15, 999, abc, 20\n[access]\nnight = 30 15\n",
    );
    let dir = site.open();
    assert_eq!(dir.group("sales").unwrap().members, vec![15, 20]);
    assert_eq!(dir.policy("night").unwrap().members, vec![15]);

    // membership is checked on every read
    dir.provision(30, &display("Garage")).unwrap();
    assert_eq!(dir.policy("night").unwrap().members, vec![30, 15]);
    dir.remove(30).unwrap();
    assert_eq!(dir.policy("night").unwrap().members, vec![15]);
    assert!(dir.group("system").is_some());
}

#[test]
fn test_algorithm_normalization() {
    assert_eq!(DigestAlgorithms::normalize("sha256").to_string(), "SHA-256");
    assert_eq!(DigestAlgorithms::normalize("MD5").to_string(), "MD5");
    assert_eq!(DigestAlgorithms::normalize("md5+sha").to_string(), "SHA-256, MD5");
    assert_eq!(DigestAlgorithms::normalize("whatever").to_string(), "SHA-256");

    let site = Site::new("[server]\nalgorithm = md5+sha\n");
    assert_eq!(site.open().identity().algorithms, DigestAlgorithms::BOTH);
}

#[test]
fn test_seeded_site_file() {
    let site = Site::new("[15]\ndisplay = Front\n");
    let dir = site.open();
    assert_eq!(dir.server().get("sitename"), Some("Coventry Server"));
    assert_eq!(dir.features().get("*98"), Some("reload"));
    assert_eq!(dir.common().get("presence"), Some("here"));

    let text = std::fs::read_to_string(site.paths.site_file()).unwrap();
    assert!(text.starts_with("[15]\ndisplay = Front\n"));
    assert!(text.contains("welcome = Welcome to Coventry"));
}

#[test]
fn test_open_keeps_site_comments() {
    let text = "; operator note: do not remove\n[15]\ndisplay = Front\n";
    let site = Site::new(text);
    let dir = site.open();
    assert_eq!(dir.server().get("sitename"), Some("Coventry Server"));

    let after = std::fs::read_to_string(site.paths.site_file()).unwrap();
    assert!(after.starts_with(text));
    drop(dir);
    site.open();
    assert_eq!(std::fs::read_to_string(site.paths.site_file()).unwrap(), after);
}

#[test]
fn test_concurrent_readers_writers_and_reloads() {
    let site = Site::new("[15]\ndisplay = Front\n");
    let dir = site.open();
    let ids: Vec<u32> = (30..46).collect();

    std::thread::scope(|s| {
        for &id in &ids {
            let dir = &dir;
            s.spawn(move || {
                dir.update(id, &display(&format!("Line {}", id))).unwrap();
            });
        }
        for _ in 0..4 {
            s.spawn(|| {
                for _ in 0..50 {
                    let lines = dir.list();
                    assert!(lines.contains_key(&15));
                    for (id, line) in &lines {
                        if *id >= 30 {
                            assert_eq!(line.display, format!("Line {}", id));
                        }
                    }
                    assert!(dir.get(15).is_some());
                    assert_eq!(dir.lookup(15).agent, "offline");
                }
            });
        }
        s.spawn(|| {
            for _ in 0..10 {
                dir.reload().unwrap();
            }
        });
    });

    let overlay = std::fs::read_to_string(site.paths.dynamic_file()).unwrap();
    for &id in &ids {
        assert!(overlay.contains(&format!("[{}]", id)), "update of {} lost", id);
        assert_eq!(dir.get(id).unwrap().display, format!("Line {}", id));
    }
    dir.reload().unwrap();
    assert_eq!(dir.count(), ids.len() + 1);
}

#[tokio::test]
async fn test_mutation_requests_reload() {
    let site = Site::new("[15]\ndisplay = Front\n");
    let dir = Arc::new(site.open());
    let (mut trigger, _listener) = spawn_reload_listener(dir.clone());

    // an external edit becomes visible after the reload a mutation requests
    site.write(&site.paths.custom_file(), "[50]\ndisplay = Vault\n");
    dir.update(15, &display("Reception")).unwrap();
    trigger.reloaded().await.unwrap();

    assert!(dir.exists(50));
    assert_eq!(dir.get(15).unwrap().display, "Reception");
}
