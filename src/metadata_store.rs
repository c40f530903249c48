//! Metadata Store (C4) — a persisted, per-(plugin, SIM-id) property table,
//! independent of the settings cache. Backed by a sectioned INI file
//! (spec §6), where sections are paths and section entries are properties.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use ini::Ini;
use tracing::warn;

/// `path → (property → value)`.
pub type MetadataSnapshot = HashMap<String, HashMap<String, String>>;

/// One plugin's persisted metadata, namespaced by SIM id.
pub struct MetadataStore {
    file_path: PathBuf,
    current: MetadataSnapshot,
}

impl MetadataStore {
    /// `<base>/<plugin>[-<imsi>]-metadata.ini` (spec §5/§6).
    pub fn file_path(base_dir: &Path, plugin_name: &str, sim_id: &str) -> PathBuf {
        let file_name = if sim_id.is_empty() {
            format!("{plugin_name}-metadata.ini")
        } else {
            format!("{plugin_name}-{sim_id}-metadata.ini")
        };
        base_dir.join(file_name)
    }

    /// Loads the file if present. A missing file yields an empty store; a
    /// parse error is non-fatal — the store starts empty and the failure
    /// is logged (spec §4.4).
    pub fn open(base_dir: &Path, plugin_name: &str, sim_id: &str) -> Self {
        let file_path = Self::file_path(base_dir, plugin_name, sim_id);
        let current = match Ini::load_from_file(&file_path) {
            Ok(ini) => ini_to_snapshot(&ini),
            Err(e) => {
                if file_path.exists() {
                    warn!(path = %file_path.display(), error = %e, "failed to parse metadata file, starting empty");
                }
                HashMap::new()
            }
        };
        Self { file_path, current }
    }

    pub fn snapshot(&self) -> MetadataSnapshot {
        self.current.clone()
    }

    /// Computes the symmetric difference against the current on-disk
    /// representation and rewrites the whole file only if something
    /// actually changed. The write is best-effort: a failure is logged,
    /// never surfaced as a user-visible error.
    pub fn update(&mut self, new_snapshot: MetadataSnapshot) {
        if new_snapshot == self.current {
            return;
        }
        let mut ini = Ini::new();
        for (path, props) in &new_snapshot {
            for (prop, value) in props {
                ini.with_section(Some(path.as_str())).set(prop, value);
            }
        }
        if let Err(e) = ini.write_to_file(&self.file_path) {
            warn!(path = %self.file_path.display(), error = %e, "failed to write metadata file");
            return;
        }
        self.current = new_snapshot;
    }
}

fn ini_to_snapshot(ini: &Ini) -> MetadataSnapshot {
    let mut snapshot = HashMap::new();
    for (section, props) in ini.iter() {
        let Some(section) = section else { continue };
        let mut entry = HashMap::new();
        for (k, v) in props.iter() {
            entry.insert(k.to_string(), v.to_string());
        }
        snapshot.insert(section.to_string(), entry);
    }
    snapshot
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn open_missing_file_is_empty() {
        let dir = tempdir().unwrap();
        let store = MetadataStore::open(dir.path(), "telephony", "");
        assert!(store.snapshot().is_empty());
    }

    #[test]
    fn update_then_reopen_roundtrips() {
        let dir = tempdir().unwrap();
        let mut store = MetadataStore::open(dir.path(), "telephony", "12345");

        let mut snap = MetadataSnapshot::new();
        let mut props = HashMap::new();
        props.insert("locked".to_string(), "true".to_string());
        snap.insert("/telephony/contexts/acct".to_string(), props);
        store.update(snap.clone());

        let reopened = MetadataStore::open(dir.path(), "telephony", "12345");
        assert_eq!(reopened.snapshot(), snap);
    }

    #[test]
    fn file_name_includes_sim_id_only_when_present() {
        let dir = tempdir().unwrap();
        assert_eq!(
            MetadataStore::file_path(dir.path(), "telephony", ""),
            dir.path().join("telephony-metadata.ini")
        );
        assert_eq!(
            MetadataStore::file_path(dir.path(), "telephony", "12345"),
            dir.path().join("telephony-12345-metadata.ini")
        );
    }

    #[test]
    fn update_removes_stale_sections() {
        let dir = tempdir().unwrap();
        let mut store = MetadataStore::open(dir.path(), "p", "");
        let mut snap = MetadataSnapshot::new();
        snap.insert("/a".to_string(), HashMap::from([("k".to_string(), "v".to_string())]));
        store.update(snap);

        store.update(MetadataSnapshot::new());
        let reopened = MetadataStore::open(dir.path(), "p", "");
        assert!(reopened.snapshot().is_empty());
    }
}
