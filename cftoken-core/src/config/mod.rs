//! Loading of `config.json` and the legacy `zones.json` into a [`ZoneTable`].
//!
//! Both files live in `$XDG_CONFIG_HOME/cftoken` (or `~/.config/cftoken`).
//! Missing files are treated as empty; malformed ones are errors.

mod duration;

pub use duration::{parse_duration, InvalidDuration};

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::template::{TemplateRef, TemplateVariables};
use crate::zones::{normalize_zone_name, Defaults, ZoneEntry, ZoneRecord, ZoneTable};

/// Application directory name under the config home.
pub const APP_DIR: &str = "cftoken";
pub const CONFIG_FILE: &str = "config.json";
pub const ZONES_FILE: &str = "zones.json";

/// Errors raised while locating or parsing configuration files.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Neither `XDG_CONFIG_HOME` nor a home directory is available.
    #[error("determine home directory: no XDG_CONFIG_HOME and no home directory found")]
    NoConfigDir,

    #[error("read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// An extended zone entry has no `zone_id`.
    #[error("zone {zone:?}: zone_id is required")]
    MissingZoneId { zone: String },

    #[error("zone {zone:?}: invalid ttl: {source}")]
    InvalidTtl {
        zone: String,
        #[source]
        source: InvalidDuration,
    },

    /// An extended zone entry sets both `template_file` and `template_inline`.
    #[error("zone {zone:?}: template_file and template_inline are mutually exclusive")]
    AmbiguousTemplate { zone: String },
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConfigFile {
    default_permissions: Vec<String>,
    default_allowed_cidrs: Vec<String>,
    zones: BTreeMap<String, RawZoneEntry>,
}

/// A zone entry as written in `config.json`: a bare ID or an object.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawZoneEntry {
    Simple(String),
    Extended(RawZoneRecord),
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawZoneRecord {
    zone_id: Option<String>,
    permissions: Vec<String>,
    allowed_cidrs: Vec<String>,
    ttl: Option<String>,
    template_file: Option<String>,
    template_inline: Option<String>,
    variables: TemplateVariables,
    inherit_defaults: bool,
}

/// Which file a listed zone came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ZoneSource {
    Config,
    ZonesFile,
}

impl fmt::Display for ZoneSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config => f.write_str("config"),
            Self::ZonesFile => f.write_str("zones-file"),
        }
    }
}

/// One row of `--list-zones` output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ZoneListing {
    pub name: String,
    pub zone_id: String,
    pub source: ZoneSource,
}

/// Reads configuration from a single directory.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    dir: PathBuf,
}

impl ConfigLoader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Loader for `$XDG_CONFIG_HOME/cftoken`, falling back to `~/.config/cftoken`.
    pub fn from_env() -> Result<Self, ConfigError> {
        if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
            let xdg = xdg.trim();
            if !xdg.is_empty() {
                return Ok(Self::new(Path::new(xdg).join(APP_DIR)));
            }
        }
        let home = dirs::home_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(Self::new(home.join(".config").join(APP_DIR)))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Build the zone table: `zones.json` first, then `config.json` on top.
    ///
    /// Missing files are not an error and contribute nothing. Entries from
    /// `config.json` replace legacy entries with the same normalized name, and
    /// its `default_*` lists become the table defaults.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::Read`] or [`ConfigError::Parse`] when a file exists but
    ///   cannot be read or is not valid JSON.
    /// - [`ConfigError::MissingZoneId`], [`ConfigError::InvalidTtl`] or
    ///   [`ConfigError::AmbiguousTemplate`] for an invalid extended zone entry.
    pub fn load(&self) -> Result<ZoneTable, ConfigError> {
        let mut table = ZoneTable::default();
        for (name, id) in self.load_legacy_zones()? {
            table.insert(&name, ZoneEntry::Simple(id));
        }

        let Some(config) = self.load_config_file()? else {
            return Ok(table);
        };
        table.defaults = Defaults {
            permissions: clean_list(config.default_permissions),
            allowed_cidrs: clean_list(config.default_allowed_cidrs),
        };
        for (name, raw) in config.zones {
            let entry = convert_entry(&name, raw)?;
            table.insert(&name, entry);
        }
        log::debug!(
            "loaded {} zone(s) from {}",
            table.zones.len(),
            self.dir.display()
        );
        Ok(table)
    }

    /// Every configured zone, sorted by name, tagged with its source file.
    pub fn list_zones(&self) -> Result<Vec<ZoneListing>, ConfigError> {
        let mut listings: BTreeMap<String, ZoneListing> = BTreeMap::new();
        let mut add = |name: &str, zone_id: String, source: ZoneSource| {
            let name = normalize_zone_name(name);
            if !name.is_empty() {
                listings.insert(
                    name.clone(),
                    ZoneListing {
                        name,
                        zone_id,
                        source,
                    },
                );
            }
        };

        for (name, id) in self.load_legacy_zones()? {
            add(&name, id, ZoneSource::ZonesFile);
        }
        if let Some(config) = self.load_config_file()? {
            for (name, raw) in config.zones {
                let entry = convert_entry(&name, raw)?;
                add(&name, entry.zone_id().to_string(), ZoneSource::Config);
            }
        }
        Ok(listings.into_values().collect())
    }

    fn load_config_file(&self) -> Result<Option<ConfigFile>, ConfigError> {
        let path = self.dir.join(CONFIG_FILE);
        read_json(&path)
    }

    fn load_legacy_zones(&self) -> Result<Vec<(String, String)>, ConfigError> {
        let path = self.dir.join(ZONES_FILE);
        let raw: BTreeMap<String, String> = read_json(&path)?.unwrap_or_default();
        Ok(raw
            .into_iter()
            .filter_map(|(name, id)| {
                let id = id.trim();
                (!id.is_empty()).then(|| (name, id.to_string()))
            })
            .collect())
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>, ConfigError> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            log::debug!("{} not found; skipping", path.display());
            return Ok(None);
        }
        Err(source) => {
            return Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    serde_json::from_str(&content)
        .map(Some)
        .map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
}

fn convert_entry(name: &str, raw: RawZoneEntry) -> Result<ZoneEntry, ConfigError> {
    let record = match raw {
        RawZoneEntry::Simple(id) => {
            let id = id.trim();
            if id.is_empty() {
                return Err(ConfigError::MissingZoneId {
                    zone: name.to_string(),
                });
            }
            return Ok(ZoneEntry::Simple(id.to_string()));
        }
        RawZoneEntry::Extended(record) => record,
    };

    let zone_id = record
        .zone_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ConfigError::MissingZoneId {
            zone: name.to_string(),
        })?
        .to_string();

    let ttl = record
        .ttl
        .as_deref()
        .filter(|ttl| !ttl.trim().is_empty())
        .map(parse_duration)
        .transpose()
        .map_err(|source| ConfigError::InvalidTtl {
            zone: name.to_string(),
            source,
        })?;

    let non_blank = |s: Option<String>| s.filter(|s| !s.trim().is_empty());
    let template = match (non_blank(record.template_file), non_blank(record.template_inline)) {
        (Some(_), Some(_)) => {
            return Err(ConfigError::AmbiguousTemplate {
                zone: name.to_string(),
            })
        }
        (Some(file), None) => Some(TemplateRef::File(file)),
        (None, Some(inline)) => Some(TemplateRef::Inline(inline)),
        (None, None) => None,
    };

    Ok(ZoneEntry::Extended(ZoneRecord {
        zone_id,
        permissions: clean_list(record.permissions),
        allowed_cidrs: clean_list(record.allowed_cidrs),
        ttl,
        template,
        variables: record.variables,
        inherit_defaults: record.inherit_defaults,
    }))
}

fn clean_list(values: Vec<String>) -> Vec<String> {
    values
        .into_iter()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect()
}
