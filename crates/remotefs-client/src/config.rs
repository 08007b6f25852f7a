//! Client configuration.
//!
//! [`ConfigStore`] is the raw string map behind `conf_set`/`conf_get`.
//! Key spelling is forgiving: spaces and dashes are treated as underscores.
//! Known keys are type-checked when set; anything else is kept verbatim so
//! adapters can read their own options.
//!
//! [`ClientConfig`] is the typed view taken at mount time.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use remotefs_types::{Credentials, FileLayout, FsError, FsResult};

/// Environment variable naming the default config file.
pub const CONF_ENV: &str = "REMOTEFS_CONF";

/// Config file looked for in the working directory.
pub const DEFAULT_CONF_FILE: &str = "remotefs.toml";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ValueKind {
    Bool,
    U32,
    Str,
}

const KNOWN_KEYS: &[(&str, ValueKind)] = &[
    ("client_mount_uid", ValueKind::U32),
    ("client_mount_gid", ValueKind::U32),
    ("client_permissions", ValueKind::Bool),
    ("client_max_symlinks", ValueKind::U32),
    ("client_readdir_batch", ValueKind::U32),
    ("client_localize_reads", ValueKind::Bool),
    ("client_xattr_filter", ValueKind::Str),
    ("client_default_stripe_unit", ValueKind::U32),
    ("client_default_stripe_count", ValueKind::U32),
    ("client_default_object_size", ValueKind::U32),
    ("client_default_pool", ValueKind::Str),
];

fn known_kind(key: &str) -> Option<ValueKind> {
    KNOWN_KEYS
        .iter()
        .find(|(name, _)| *name == key)
        .map(|(_, kind)| *kind)
}

/// Canonical spelling of a key.
pub fn normalize_key(key: &str) -> String {
    key.trim()
        .chars()
        .map(|c| if c == ' ' || c == '-' { '_' } else { c })
        .collect()
}

fn typed_value(key: &str, kind: ValueKind, raw: &str) -> FsResult<toml::Value> {
    let bad = || FsError::invalid(format!("bad value {raw:?} for {key}"));
    match kind {
        ValueKind::Bool => match raw.trim() {
            "true" | "1" | "yes" | "on" => Ok(toml::Value::Boolean(true)),
            "false" | "0" | "no" | "off" => Ok(toml::Value::Boolean(false)),
            _ => Err(bad()),
        },
        ValueKind::U32 => raw
            .trim()
            .parse::<u32>()
            .map(|v| toml::Value::Integer(i64::from(v)))
            .map_err(|_| bad()),
        ValueKind::Str => Ok(toml::Value::String(raw.to_string())),
    }
}

/// String-keyed option store.
#[derive(Debug, Clone, Default)]
pub struct ConfigStore {
    values: BTreeMap<String, String>,
}

impl ConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an option. Known options must parse as their type.
    pub fn set(&mut self, key: &str, value: &str) -> FsResult<()> {
        let key = normalize_key(key);
        if key.is_empty() {
            return Err(FsError::invalid("empty config key"));
        }
        if let Some(kind) = known_kind(&key) {
            typed_value(&key, kind, value)?;
        }
        tracing::debug!(key = %key, value = %value, "config set");
        self.values.insert(key, value.to_string());
        Ok(())
    }

    /// Look up an option; `NotFound` if it was never set.
    pub fn get(&self, key: &str) -> FsResult<String> {
        let key = normalize_key(key);
        self.values
            .get(&key)
            .cloned()
            .ok_or_else(|| FsError::not_found(format!("config key {key}")))
    }

    /// Merge options from a TOML file.
    ///
    /// Top-level scalars and the scalars of a `[client]` table are taken;
    /// other tables are ignored. With `None`, `$REMOTEFS_CONF` and then
    /// `./remotefs.toml` are tried, and finding neither is not an error.
    pub fn read_file(&mut self, path: Option<&Path>) -> FsResult<()> {
        let path = match path {
            Some(p) => {
                if !p.exists() {
                    return Err(FsError::not_found(p.display().to_string()));
                }
                p.to_path_buf()
            }
            None => match Self::default_file() {
                Some(p) => p,
                None => {
                    tracing::debug!("no config file found, using defaults");
                    return Ok(());
                }
            },
        };

        let content = std::fs::read_to_string(&path)
            .map_err(|e| FsError::io(format!("{}: {e}", path.display())))?;
        let table: toml::Table = content
            .parse()
            .map_err(|e| FsError::invalid(format!("{}: {e}", path.display())))?;

        for (key, value) in &table {
            match value {
                toml::Value::Table(section) if key == "client" => {
                    for (key, value) in section {
                        if let Some(raw) = scalar_string(value) {
                            self.set(key, &raw)?;
                        }
                    }
                }
                other => {
                    if let Some(raw) = scalar_string(other) {
                        self.set(key, &raw)?;
                    }
                }
            }
        }
        tracing::info!(path = %path.display(), "read config file");
        Ok(())
    }

    fn default_file() -> Option<PathBuf> {
        if let Ok(p) = std::env::var(CONF_ENV) {
            let p = PathBuf::from(p);
            if p.exists() {
                return Some(p);
            }
        }
        let local = PathBuf::from(DEFAULT_CONF_FILE);
        local.exists().then_some(local)
    }

    /// Typed snapshot with defaults filled in.
    pub fn client_config(&self) -> FsResult<ClientConfig> {
        let mut table = toml::Table::new();
        for (key, kind) in KNOWN_KEYS {
            if let Some(raw) = self.values.get(*key) {
                table.insert(key.to_string(), typed_value(key, *kind, raw)?);
            }
        }
        toml::Value::Table(table)
            .try_into::<ClientConfig>()
            .map_err(|e| FsError::invalid(format!("config: {e}")))
    }
}

fn scalar_string(value: &toml::Value) -> Option<String> {
    match value {
        toml::Value::String(s) => Some(s.clone()),
        toml::Value::Integer(i) => Some(i.to_string()),
        toml::Value::Float(f) => Some(f.to_string()),
        toml::Value::Boolean(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Options the client itself acts on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub client_mount_uid: u32,
    pub client_mount_gid: u32,
    /// Enforce mode bits at open and during traversal.
    pub client_permissions: bool,
    /// Symlink expansion budget per resolution.
    pub client_max_symlinks: u32,
    /// Entries fetched per namespace readdir call.
    pub client_readdir_batch: u32,
    /// Initial read-locality hint.
    pub client_localize_reads: bool,
    /// Comma-separated name prefixes listxattr exposes. Empty shows all.
    pub client_xattr_filter: String,
    pub client_default_stripe_unit: u32,
    pub client_default_stripe_count: u32,
    pub client_default_object_size: u32,
    pub client_default_pool: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        let layout = FileLayout::default();
        Self {
            client_mount_uid: 0,
            client_mount_gid: 0,
            client_permissions: true,
            client_max_symlinks: 40,
            client_readdir_batch: 256,
            client_localize_reads: false,
            client_xattr_filter: String::new(),
            client_default_stripe_unit: layout.stripe_unit,
            client_default_stripe_count: layout.stripe_count,
            client_default_object_size: layout.object_size,
            client_default_pool: layout.pool,
        }
    }
}

impl ClientConfig {
    pub fn credentials(&self) -> Credentials {
        Credentials::new(self.client_mount_uid, self.client_mount_gid)
    }

    /// Layout for files created without one.
    pub fn default_layout(&self) -> FileLayout {
        FileLayout::new(
            self.client_default_stripe_unit,
            self.client_default_stripe_count,
            self.client_default_object_size,
            self.client_default_pool.clone(),
        )
    }

    /// Listing batch size, never zero.
    pub fn readdir_batch(&self) -> usize {
        self.client_readdir_batch.max(1) as usize
    }

    /// Whether listxattr should show `name`.
    pub fn xattr_visible(&self, name: &str) -> bool {
        let filter = self.client_xattr_filter.trim();
        filter.is_empty()
            || filter
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .any(|prefix| name.starts_with(prefix))
    }
}
