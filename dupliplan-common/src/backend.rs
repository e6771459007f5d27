//! Storage backends
//!
//! A backend is picked by the scheme of the storage URL. Each backend checks
//! its own credential fields and reports what it contributes to environment
//! files and tool invocations through [`BackendCapabilities`]. Adding a
//! backend means one more entry in [`BACKENDS`]; callers only ever see
//! [`Backend`].

use std::collections::BTreeMap;

use crate::config::RawTarget;
use crate::error::{CompileError, Result};
use crate::storage::DEFAULT_STORAGE;
use crate::validation::ensure_shell_safe;

/// Prefix of every environment variable the backup tool reads
pub const ENV_PREFIX: &str = "DUPLICACY";

/// What a backend contributes to the generated artifacts
pub trait BackendCapabilities {
    /// URL scheme this backend handles (e.g. "b2")
    fn scheme(&self) -> &'static str;

    fn url(&self) -> &str;

    /// Whether the tool needs credentials in its environment
    fn requires_credentials(&self) -> bool;

    /// Credential variables for a target named `storage`
    fn env_exports(&self, storage: &str) -> Vec<EnvVar>;

    /// Extra arguments for `init` and `add`
    fn cli_flags(&self) -> Vec<String> {
        Vec::new()
    }

    /// Comment line introducing the credential block of an env file
    fn export_comment(&self) -> &'static str;
}

/// One `NAME="value"` pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvVar {
    pub name: String,
    pub value: String,
}

impl EnvVar {
    pub fn new(name: String, value: impl Into<String>) -> Self {
        Self {
            name,
            value: value.into(),
        }
    }

    /// Line for a sourced environment file
    pub fn export_line(&self) -> String {
        format!("export {}", self.assignment())
    }

    /// Entry for an exec environment list
    pub fn assignment(&self) -> String {
        format!("{}=\"{}\"", self.name, self.value)
    }
}

/// Variable name the tool reads for `suffix` on the given storage
///
/// # Examples
/// ```
/// use dupliplan_common::backend::env_var_name;
/// assert_eq!(env_var_name("default", "B2_ID"), "DUPLICACY_B2_ID");
/// assert_eq!(env_var_name("other_bucket", "B2_KEY"), "DUPLICACY_OTHER_BUCKET_B2_KEY");
/// assert_eq!(env_var_name("off-site", "PASSWORD"), "DUPLICACY_OFF_SITE_PASSWORD");
/// ```
pub fn env_var_name(storage: &str, suffix: &str) -> String {
    if storage == DEFAULT_STORAGE {
        format!("{ENV_PREFIX}_{suffix}")
    } else {
        format!("{ENV_PREFIX}_{}_{suffix}", env_name_segment(storage))
    }
}

/// Storage name as it appears inside a variable name
pub fn env_name_segment(storage: &str) -> String {
    storage.to_uppercase().replace('-', "_")
}

/// Builds a backend from its URL and credential fields
pub type BackendParser = fn(&str, &str, &BTreeMap<String, String>) -> Result<Backend>;

/// Registered backends keyed by URL scheme
pub const BACKENDS: &[(&str, BackendParser)] = &[("b2", B2Backend::parse)];

/// A validated storage backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
    B2(B2Backend),
}

impl Backend {
    /// Resolve the `target` block of a storage definition
    pub fn from_raw(storage: &str, raw: Option<&RawTarget>) -> Result<Self> {
        let missing = || CompileError::MissingTarget {
            storage: storage.to_string(),
        };
        let raw = raw.ok_or_else(missing)?;
        let url = raw.url.as_deref().filter(|url| !url.is_empty()).ok_or_else(missing)?;

        let (scheme, location) = url
            .split_once("://")
            .ok_or_else(|| CompileError::UnrecognizedUrl(url.to_string()))?;

        let (_, parse) = BACKENDS
            .iter()
            .find(|(name, _)| *name == scheme)
            .ok_or_else(|| CompileError::UnrecognizedUrl(scheme.to_string()))?;

        if location.is_empty() || url.contains(char::is_whitespace) {
            return Err(CompileError::UnrecognizedUrl(url.to_string()));
        }
        ensure_shell_safe("url", storage, url)?;

        parse(storage, url, &raw.params)
    }

    pub fn capabilities(&self) -> &dyn BackendCapabilities {
        match self {
            Backend::B2(backend) => backend,
        }
    }
}

/// Backblaze B2 bucket
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct B2Backend {
    url: String,
    account_id: String,
    application_key: String,
}

impl B2Backend {
    fn parse(storage: &str, url: &str, params: &BTreeMap<String, String>) -> Result<Backend> {
        let credential = |field: &'static str| -> Result<String> {
            let value = params
                .get(field)
                .filter(|value| !value.is_empty())
                .ok_or_else(|| CompileError::MissingCredential {
                    field,
                    storage: storage.to_string(),
                })?;
            ensure_shell_safe(field, storage, value)?;
            Ok(value.clone())
        };

        Ok(Backend::B2(B2Backend {
            url: url.to_string(),
            account_id: credential("b2_id")?,
            application_key: credential("b2_app_key")?,
        }))
    }
}

impl BackendCapabilities for B2Backend {
    fn scheme(&self) -> &'static str {
        "b2"
    }

    fn url(&self) -> &str {
        &self.url
    }

    fn requires_credentials(&self) -> bool {
        true
    }

    fn env_exports(&self, storage: &str) -> Vec<EnvVar> {
        vec![
            EnvVar::new(env_var_name(storage, "B2_ID"), &self.account_id),
            EnvVar::new(env_var_name(storage, "B2_KEY"), &self.application_key),
        ]
    }

    fn export_comment(&self) -> &'static str {
        "# Export B2 Parameters"
    }
}
