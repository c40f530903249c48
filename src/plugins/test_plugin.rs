//! The `test` plugin — a trivial disk-backed plugin used in integration
//! tests and as a template for real plugins. Settings are flat key=value
//! pairs stored in a single INI section, keyed by the session's SIM id
//! (falling back to a fixed default id when none is supplied).

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use ini::Ini;
use tracing::debug;

use crate::cancel::CancelSignal;
use crate::error::{ProvmanError, ProvmanResult};
use crate::registry::{Plugin, SyncInResult};
use crate::schema::Schema;

const GROUP_NAME: &str = "GROUP";
const DEFAULT_IMSI: &str = "012345678987654321";

pub struct TestPlugin {
    name: String,
    schema: Schema,
    data_dir: PathBuf,
    file_path: Mutex<Option<PathBuf>>,
}

impl TestPlugin {
    pub fn new(name: impl Into<String>, schema_xml: &str, data_dir: impl Into<PathBuf>) -> Self {
        let schema = Schema::parse(schema_xml).expect("built-in schema must parse");
        Self {
            name: name.into(),
            schema,
            data_dir: data_dir.into(),
            file_path: Mutex::new(None),
        }
    }

    fn file_path_for(&self, sim_id: &str) -> PathBuf {
        let effective = if sim_id.is_empty() { DEFAULT_IMSI } else { sim_id };
        self.data_dir.join(format!("{effective}-test-plugin-storage.ini"))
    }
}

#[async_trait]
impl Plugin for TestPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn root(&self) -> &str {
        &self.schema.root
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }

    async fn sync_in(&self, sim_id: &str, cancel: CancelSignal) -> ProvmanResult<SyncInResult> {
        if cancel.is_cancelled() {
            return Err(ProvmanError::Cancelled);
        }
        let path = self.file_path_for(sim_id);
        let mut settings = HashMap::new();
        if let Ok(ini) = Ini::load_from_file(&path) {
            if let Some(section) = ini.section(Some(GROUP_NAME)) {
                for (k, v) in section.iter() {
                    settings.insert(format!("{}{}", self.root(), k), v.to_string());
                }
            }
        }
        debug!(plugin = %self.name, path = %path.display(), count = settings.len(), "test plugin synced in");
        *self.file_path.lock().unwrap() = Some(path);
        Ok(SyncInResult { settings })
    }

    async fn sync_out(
        &self,
        settings: HashMap<String, String>,
        cancel: CancelSignal,
    ) -> ProvmanResult<()> {
        if cancel.is_cancelled() {
            return Err(ProvmanError::Cancelled);
        }
        let path = self
            .file_path
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| ProvmanError::Unexpected("sync_out before sync_in".to_string()))?;
        let mut ini = Ini::new();
        for (key, value) in &settings {
            let local = key.strip_prefix(self.root()).unwrap_or(key);
            ini.with_section(Some(GROUP_NAME)).set(local, value);
        }
        ini.write_to_file(&path).map_err(|e| ProvmanError::Io(e.to_string()))
    }

    async fn abort(&self) {
        *self.file_path.lock().unwrap() = None;
    }
}
