//! Sites and their subdomain bindings.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{Error, ResourceId, Result};

/// Maximum length of a single DNS label.
pub const MAX_SUBDOMAIN_LEN: usize = 63;

static SUBDOMAIN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9-]+$").expect("valid subdomain regex"));

/// How a site is built and served.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildVariant {
    /// Built into a static artifact served from artifact storage.
    Static,
    /// Built into a container image and served by a live backend.
    Server,
}

impl BuildVariant {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildVariant::Static => "static",
            BuildVariant::Server => "server",
        }
    }
}

impl std::fmt::Display for BuildVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BuildVariant {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "static" => Ok(BuildVariant::Static),
            "server" => Ok(BuildVariant::Server),
            _ => Err(format!("Unknown build variant: {}", s)),
        }
    }
}

/// A single user-supplied environment variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    pub key: String,
    #[serde(default)]
    pub value: String,
}

impl EnvVar {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Drop entries with blank keys and trim whitespace around keys.
///
/// When a key repeats, the last value wins and keeps the position of the
/// first occurrence.
pub fn normalize_env(vars: Vec<EnvVar>) -> Vec<EnvVar> {
    let mut out: Vec<EnvVar> = Vec::with_capacity(vars.len());
    for var in vars {
        let key = var.key.trim();
        if key.is_empty() {
            continue;
        }
        match out.iter_mut().find(|existing| existing.key == key) {
            Some(existing) => existing.value = var.value,
            None => out.push(EnvVar::new(key, var.value)),
        }
    }
    out
}

/// A user project connected to a repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Site {
    pub id: ResourceId,
    pub owner_id: String,
    pub name: String,
    /// Repository full name, e.g. `octo/app`.
    pub repository: String,
    /// URL the build job clones from.
    pub clone_url: String,
    pub variant: BuildVariant,
    /// Current environment variables. Deployments copy these at creation.
    pub env_vars: Vec<EnvVar>,
    pub active_deployment_id: Option<ResourceId>,
    /// Stable identifier of the live backend (server variant only).
    pub live_backend: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields needed to insert a site.
#[derive(Debug, Clone)]
pub struct NewSite {
    pub owner_id: String,
    pub name: String,
    pub repository: String,
    pub clone_url: String,
    pub variant: BuildVariant,
    pub env_vars: Vec<EnvVar>,
}

/// A subdomain bound to a site.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubdomainBinding {
    pub id: ResourceId,
    pub site_id: ResourceId,
    pub subdomain: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// Check that a subdomain is a single lowercase DNS label.
pub fn validate_subdomain(subdomain: &str) -> Result<()> {
    if subdomain.is_empty() || subdomain.len() > MAX_SUBDOMAIN_LEN {
        return Err(Error::InvalidInput(format!(
            "subdomain must be between 1 and {} characters",
            MAX_SUBDOMAIN_LEN
        )));
    }
    if !SUBDOMAIN_RE.is_match(subdomain) {
        return Err(Error::InvalidInput(format!(
            "subdomain '{}' may only contain a-z, 0-9 and '-'",
            subdomain
        )));
    }
    if subdomain.starts_with('-') || subdomain.ends_with('-') {
        return Err(Error::InvalidInput(format!(
            "subdomain '{}' must not start or end with '-'",
            subdomain
        )));
    }
    Ok(())
}

/// Derive the default subdomain for a site name, e.g. `My Site!` + 1234 →
/// `my-site-1234`.
pub fn derive_subdomain(name: &str, suffix: u16) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut last_dash = true;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }

    let suffix = format!("{:04}", suffix % 10_000);
    // Leave room for "-NNNN".
    let max_slug = MAX_SUBDOMAIN_LEN - suffix.len() - 1;
    slug.truncate(max_slug);
    let slug = slug.trim_matches('-');

    if slug.is_empty() {
        format!("site-{}", suffix)
    } else {
        format!("{}-{}", slug, suffix)
    }
}
