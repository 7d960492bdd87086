//! Zone lookup by name against the configured zone table.

use std::collections::BTreeMap;

use chrono::Duration;

use crate::error::{Result, TokenError};
use crate::template::{TemplateRef, TemplateVariables};

/// Global defaults applied when neither an override nor a zone supplies a value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Defaults {
    pub permissions: Vec<String>,
    pub allowed_cidrs: Vec<String>,
}

/// Per-zone settings from an extended zone entry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ZoneRecord {
    pub zone_id: String,
    pub permissions: Vec<String>,
    pub allowed_cidrs: Vec<String>,
    pub ttl: Option<Duration>,
    pub template: Option<TemplateRef>,
    pub variables: TemplateVariables,
    pub inherit_defaults: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ZoneEntry {
    /// Bare zone ID.
    Simple(String),
    Extended(ZoneRecord),
}

impl ZoneEntry {
    pub fn zone_id(&self) -> &str {
        match self {
            Self::Simple(id) => id,
            Self::Extended(record) => &record.zone_id,
        }
    }
}

/// Zones keyed by normalized name, plus the global defaults.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ZoneTable {
    pub zones: BTreeMap<String, ZoneEntry>,
    pub defaults: Defaults,
}

/// A zone name resolved to its ID and, for extended entries, its record.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedZone {
    pub zone_id: String,
    /// Normalized zone name.
    pub name: String,
    pub record: Option<ZoneRecord>,
}

impl ZoneTable {
    /// Insert an entry under the normalized form of `name`, replacing any
    /// previous entry. Blank names are ignored.
    pub fn insert(&mut self, name: &str, entry: ZoneEntry) {
        let name = normalize_zone_name(name);
        if !name.is_empty() {
            self.zones.insert(name, entry);
        }
    }

    /// Look up `name`, copying defaults into records that inherit them.
    pub fn resolve(&self, name: &str) -> Result<ResolvedZone> {
        let normalized = normalize_zone_name(name);
        let not_found = || TokenError::ZoneNotFound {
            name: name.to_string(),
        };
        if normalized.is_empty() {
            return Err(not_found());
        }
        let entry = self.zones.get(&normalized).ok_or_else(not_found)?;

        let record = match entry {
            ZoneEntry::Simple(_) => None,
            ZoneEntry::Extended(record) => Some(self.apply_defaults(record.clone())),
        };
        log::debug!("zone {:?} resolved to {}", normalized, entry.zone_id());
        Ok(ResolvedZone {
            zone_id: entry.zone_id().to_string(),
            name: normalized,
            record,
        })
    }

    fn apply_defaults(&self, mut record: ZoneRecord) -> ZoneRecord {
        if record.inherit_defaults {
            if record.permissions.is_empty() {
                record.permissions.clone_from(&self.defaults.permissions);
            }
            if record.allowed_cidrs.is_empty() {
                record.allowed_cidrs.clone_from(&self.defaults.allowed_cidrs);
            }
        }
        record
    }
}

/// Trim, lowercase and drop one trailing dot.
pub fn normalize_zone_name(name: &str) -> String {
    let lowered = name.trim().to_lowercase();
    lowered.strip_suffix('.').unwrap_or(&lowered).to_string()
}

/// True for exactly 32 hexadecimal characters, in either case.
pub fn looks_like_zone_id(s: &str) -> bool {
    s.len() == 32 && s.chars().all(|c| c.is_ascii_hexdigit())
}
