//! Standard schemas (C12) — the built-in `email`, `telephony` and `sync`
//! plugins describing the configuration surfaces every device exposes,
//! each backed by a flat per-SIM INI file under the configured data
//! directory.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ini::Ini;

use crate::cancel::CancelSignal;
use crate::error::{ProvmanError, ProvmanResult};
use crate::registry::{Plugin, SyncInResult};
use crate::schema::Schema;

const GROUP_NAME: &str = "GROUP";

pub const EMAIL_SCHEMA_XML: &str = r#"<schema root="/applications/email/">
    <dir delete="yes">
        <key name="address" delete="no" type="string"/>
        <key name="name" delete="no" type="string"/>
        <dir name="incoming" delete="no">
            <key name="host" delete="no" type="string"/>
            <key name="password" delete="no" type="string"/>
            <key name="port" delete="no" type="int"/>
            <key name="type" delete="no" type="enum" values="pop, imap, imapx, exchange, ews, groupwise, nntp, mbox, mh, maildir, spooldir, spool"/>
            <key name="authtype" delete="no" type="enum" values="+APOP, CRAM-MD5, DIGEST-MD5, GSSAPI, PLAIN, POPB4SMTP, NTLM"/>
            <key name="username" delete="no" type="string"/>
            <key name="usessl" delete="no" type="enum" values="always, never, when-possible"/>
        </dir>
        <dir name="outgoing" delete="no">
            <key name="host" delete="no" type="string"/>
            <key name="password" delete="no" type="string"/>
            <key name="port" delete="no" type="int"/>
            <key name="type" delete="no" type="enum" values="smtp, sendmail, ews"/>
            <key name="authtype" delete="no" type="enum" values="PLAIN, NTLM, GSSAPI, CRAM-MD5, DIGEST-MD5, POPB4SMTP, LOGIN"/>
            <key name="username" delete="no" type="string"/>
            <key name="usessl" delete="no" type="enum" values="always, never, when-possible"/>
        </dir>
    </dir>
</schema>"#;

pub const TELEPHONY_SCHEMA_XML: &str = r#"<schema root="/telephony/">
    <dir name="contexts" delete="yes">
        <dir delete="yes">
            <key name="apn" delete="no" type="string"/>
            <key name="name" delete="no" type="string"/>
            <key name="password" delete="no" type="string"/>
            <key name="username" delete="no" type="string"/>
        </dir>
    </dir>
    <dir name="mms" delete="yes">
        <key name="apn" delete="no" type="string"/>
        <key name="name" delete="no" type="string"/>
        <key name="password" delete="no" type="string"/>
        <key name="username" delete="no" type="string"/>
        <key name="mmsc" delete="no" type="string"/>
        <key name="proxy" delete="no" type="string"/>
    </dir>
    <key name="imsis" delete="no" write="no" type="string"/>
</schema>"#;

const SYNC_ITEM: &str = r#"
            <key name="format" delete="no" type="string"/>
            <key name="sync" delete="no" type="enum" values="disabled, two-way, slow, one-way-from-client, refresh-from-client, refresh-from-server, restore-from-backup"/>
            <key name="uri" delete="no" type="string"/>
"#;

pub fn sync_schema_xml() -> String {
    let items = [
        "contacts",
        "calendar",
        "todo",
        "memo",
        "eas-contacts",
        "eas-calendar",
        "eas-todo",
        "eas-memo",
    ];
    let mut dirs = String::new();
    for item in items {
        dirs.push_str(&format!("<dir name=\"{item}\" delete=\"no\">{SYNC_ITEM}</dir>"));
    }
    format!(
        r#"<schema root="/applications/sync/">
    <dir delete="yes">
        <key name="name" delete="no" type="string"/>
        <key name="password" delete="no" type="string"/>
        <key name="username" delete="no" type="string"/>
        <key name="url" delete="no" type="string"/>
        <key name="client" delete="no" type="enum" values="0, 1"/>
        {dirs}
    </dir>
</schema>"#
    )
}

/// A generic INI-backed plugin for a fixed schema, shared by all three
/// built-in plugins. Settings persist as `path => value` pairs (paths
/// relative to the plugin's root) in a single section, namespaced by
/// SIM id the same way the metadata store namespaces its own file.
pub struct KeyFilePlugin {
    name: String,
    schema: Schema,
    data_dir: PathBuf,
    file_path: Mutex<Option<PathBuf>>,
}

impl KeyFilePlugin {
    pub fn new(name: impl Into<String>, schema_xml: &str, data_dir: impl Into<PathBuf>) -> ProvmanResult<Self> {
        let schema = Schema::parse(schema_xml)?;
        Ok(Self {
            name: name.into(),
            schema,
            data_dir: data_dir.into(),
            file_path: Mutex::new(None),
        })
    }

    fn file_path_for(&self, sim_id: &str) -> PathBuf {
        let name = &self.name;
        if sim_id.is_empty() {
            self.data_dir.join(format!("{name}-settings.ini"))
        } else {
            self.data_dir.join(format!("{name}-{sim_id}-settings.ini"))
        }
    }
}

#[async_trait]
impl Plugin for KeyFilePlugin {
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
                    settings.insert(k.to_string(), v.to_string());
                }
            }
        }
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
            ini.with_section(Some(GROUP_NAME)).set(key, value);
        }
        ini.write_to_file(&path).map_err(|e| ProvmanError::Io(e.to_string()))
    }

    async fn abort(&self) {
        *self.file_path.lock().unwrap() = None;
    }
}

/// Builds the three built-in plugins, rooted under `data_dir`.
pub fn standard_plugins(data_dir: &Path) -> ProvmanResult<Vec<Arc<dyn Plugin>>> {
    Ok(vec![
        Arc::new(KeyFilePlugin::new("email", EMAIL_SCHEMA_XML, data_dir)?),
        Arc::new(KeyFilePlugin::new("telephony", TELEPHONY_SCHEMA_XML, data_dir)?),
        Arc::new(KeyFilePlugin::new("sync", &sync_schema_xml(), data_dir)?),
    ])
}
