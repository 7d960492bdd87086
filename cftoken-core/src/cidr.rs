//! Allow-list normalization for token IP conditions.

use std::net::IpAddr;

use crate::error::{Result, TokenError};

/// Allow-list entry that disables IP restriction entirely.
pub const DISABLE_SENTINEL: &str = "0.0.0.0/32";

/// Result of normalizing an allow-list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NormalizedCidrs {
    pub cidrs: Vec<String>,
    /// True when the sentinel was present; `cidrs` is then empty.
    pub disabled: bool,
}

impl NormalizedCidrs {
    fn disabled() -> Self {
        Self {
            cidrs: Vec::new(),
            disabled: true,
        }
    }
}

/// Trim, validate and order-preserve a list of CIDR literals.
///
/// A single sentinel anywhere in the list disables restriction, regardless
/// of whether the other entries are valid.
pub fn normalize<S: AsRef<str>>(raw: &[S]) -> Result<NormalizedCidrs> {
    let entries: Vec<&str> = raw
        .iter()
        .map(|s| s.as_ref().trim())
        .filter(|s| !s.is_empty())
        .collect();

    if entries.contains(&DISABLE_SENTINEL) {
        log::debug!("IP restriction disabled by {}", DISABLE_SENTINEL);
        return Ok(NormalizedCidrs::disabled());
    }

    let mut cidrs = Vec::with_capacity(entries.len());
    for entry in entries {
        validate(entry)?;
        cidrs.push(entry.to_string());
    }
    Ok(NormalizedCidrs {
        cidrs,
        disabled: false,
    })
}

/// Split a comma-separated flag value into its non-empty, trimmed parts.
pub fn split_list(input: &str) -> Vec<String> {
    input
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn validate(literal: &str) -> Result<()> {
    let (addr, prefix) = literal
        .split_once('/')
        .ok_or_else(|| TokenError::malformed_cidr(literal, "missing prefix length"))?;
    let addr: IpAddr = addr
        .parse()
        .map_err(|e| TokenError::malformed_cidr(literal, e))?;
    // `u8::from_str` also takes a leading `+`.
    if prefix.is_empty() || !prefix.bytes().all(|b| b.is_ascii_digit()) {
        return Err(TokenError::malformed_cidr(literal, "invalid prefix length"));
    }
    let prefix: u8 = prefix
        .parse()
        .map_err(|_| TokenError::malformed_cidr(literal, "invalid prefix length"))?;
    let max = match addr {
        IpAddr::V4(_) => 32,
        IpAddr::V6(_) => 128,
    };
    if prefix > max {
        return Err(TokenError::malformed_cidr(
            literal,
            format!("prefix length {prefix} exceeds {max}"),
        ));
    }
    Ok(())
}
