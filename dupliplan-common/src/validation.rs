//! Configuration validation utilities
//!
//! Each function here normalizes one subtree of the plan file and fails fast
//! with a specific [`CompileError`]. Nothing is silently corrected; the only
//! values filled in are the documented defaults.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use std::path::{Component, Path};

use crate::backend::env_name_segment;
use crate::config::{RawCronEntry, RawEncryption, RawKeepRange, RawStorageTarget, ScalarValue};
use crate::error::{CompileError, Result};
use crate::filter::FilterRuleSet;
use crate::retention::KeepRange;
use crate::schedules::CronTrigger;
use crate::storage::{DEFAULT_STORAGE, Encryption};

static SNAPSHOT_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("snapshot id regex is valid"));

static EMAIL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9-]+(\.[A-Za-z0-9-]+)*\.[A-Za-z]{2,}$")
        .expect("email regex is valid")
});

static USER_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_.-]*$").expect("user regex is valid"));

static CRON_FIELD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9*,/-]+$").expect("cron field regex is valid"));

/// Characters that would break an unquoted or double-quoted shell context
pub const UNSAFE_SHELL_CHARS: &[char] = &['"', '$', '`', '\\', '\'', '\n', '\r', '\0'];

/// Validate a repository or storage identifier
///
/// # Examples
/// ```
/// # use dupliplan_common::validation::validate_snapshot_id;
/// assert!(validate_snapshot_id("etc_factorio01").is_ok());
/// assert!(validate_snapshot_id("my repo").is_err());
/// assert!(validate_snapshot_id("etc_factorio01.demona.co").is_err());
/// ```
pub fn validate_snapshot_id(id: &str) -> Result<()> {
    if SNAPSHOT_ID.is_match(id) {
        Ok(())
    } else {
        Err(CompileError::InvalidSnapshotId(id.to_string()))
    }
}

/// Validate an email recipient and return it unchanged
pub fn validate_email(address: &str) -> Result<String> {
    if EMAIL.is_match(address) {
        Ok(address.to_string())
    } else {
        Err(CompileError::InvalidEmail(address.to_string()))
    }
}

/// Validate an optional email recipient
pub fn validate_optional_email(address: Option<&str>) -> Result<Option<String>> {
    address.map(validate_email).transpose()
}

/// Reject values that cannot be interpolated into generated shell text
///
/// Values are never escaped; a value containing any of
/// [`UNSAFE_SHELL_CHARS`] is an error.
pub fn ensure_shell_safe(field: &'static str, owner: &str, value: &str) -> Result<()> {
    match value.chars().find(|c| UNSAFE_SHELL_CHARS.contains(c)) {
        Some(character) => Err(CompileError::UnsafeValue {
            field,
            owner: owner.to_string(),
            character,
        }),
        None => Ok(()),
    }
}

/// Validate the owning user of a repository
pub fn validate_user(user: &str) -> Result<()> {
    if USER_NAME.is_match(user) && user.len() <= 32 {
        Ok(())
    } else {
        Err(CompileError::InvalidUser(user.to_string()))
    }
}

/// Validate a repository path
///
/// The path must be absolute, free of `..` components and safe to embed in
/// generated scripts.
pub fn validate_repository_path(path: &Path) -> Result<()> {
    let display = path.to_string_lossy().to_string();
    let invalid = |reason: &str| CompileError::InvalidRepositoryPath {
        path: display.clone(),
        reason: reason.to_string(),
    };

    if !path.is_absolute() {
        return Err(invalid("path must be absolute"));
    }

    if path.components().any(|c| c == Component::ParentDir) {
        return Err(invalid("path cannot contain '..'"));
    }

    if path.to_str().is_none() {
        return Err(invalid("path must be valid UTF-8"));
    }

    if display.contains(' ') {
        return Err(invalid("path cannot contain spaces"));
    }

    ensure_shell_safe("repo_path", &display, &display)
}

/// Normalize a cron entry
///
/// At least one field must be present; unset fields become wildcards.
pub fn validate_cron_entry(raw: Option<&RawCronEntry>) -> Result<CronTrigger> {
    let raw = raw.ok_or(CompileError::MissingCronEntry)?;

    let field = |name: &'static str, value: &Option<ScalarValue>| -> Result<Option<String>> {
        match value {
            None => Ok(None),
            Some(value) => {
                let text = value.to_string();
                if CRON_FIELD.is_match(&text) {
                    Ok(Some(text))
                } else {
                    Err(CompileError::InvalidCronField { field: name, value: text })
                }
            }
        }
    };

    let trigger = CronTrigger {
        minute: field("minute", &raw.minute)?,
        hour: field("hour", &raw.hour)?,
        monthday: field("monthday", &raw.monthday)?,
        month: field("month", &raw.month)?,
        weekday: field("weekday", &raw.weekday)?,
    };

    if trigger.is_empty() {
        return Err(CompileError::MissingCronEntry);
    }

    Ok(trigger)
}

/// Normalize the keep ranges of a prune job, preserving declaration order
pub fn validate_keep_ranges(job: &str, raw: Option<&[RawKeepRange]>) -> Result<Vec<KeepRange>> {
    let raw = match raw {
        Some(ranges) if !ranges.is_empty() => ranges,
        _ => return Err(CompileError::MissingKeepRanges),
    };

    raw.iter()
        .map(|range| {
            let interval = range.interval.ok_or_else(|| CompileError::KeepRangeMissingField {
                job: job.to_string(),
                field: "interval",
            })?;
            let min_age = range.min_age.ok_or_else(|| CompileError::KeepRangeMissingField {
                job: job.to_string(),
                field: "min_age",
            })?;
            Ok(KeepRange { interval, min_age })
        })
        .collect()
}

/// Normalize an encryption block
///
/// A present block must carry a shell-safe password. Iterations may be given
/// as a number or a numeric string.
pub fn validate_encryption(storage: &str, raw: Option<&RawEncryption>) -> Result<Option<Encryption>> {
    let Some(raw) = raw else {
        return Ok(None);
    };

    let password = raw
        .password
        .clone()
        .filter(|password| !password.is_empty())
        .ok_or_else(|| CompileError::MissingPassword {
            storage: storage.to_string(),
        })?;
    ensure_shell_safe("password", storage, &password)?;

    let iterations = match &raw.iterations {
        None => None,
        Some(value) => {
            let text = value.to_string();
            let count = text
                .parse::<u32>()
                .ok()
                .filter(|count| *count > 0)
                .ok_or_else(|| CompileError::InvalidIterations {
                    storage: storage.to_string(),
                    value: text,
                })?;
            Some(count)
        }
    };

    Ok(Some(Encryption {
        password,
        iterations,
    }))
}

/// Validate an ordered list of filter rules
pub fn validate_filter_rules(rules: &[String]) -> Result<FilterRuleSet> {
    if rules.is_empty() {
        return Err(CompileError::EmptyFilterRules);
    }

    for rule in rules {
        let has_prefix = ["+", "-", "i:", "e:"]
            .iter()
            .any(|prefix| rule.len() > prefix.len() && rule.starts_with(prefix));
        if !has_prefix || rule.contains(['\n', '\r']) {
            return Err(CompileError::InvalidFilterRule(rule.clone()));
        }
    }

    Ok(FilterRuleSet::new(rules.to_vec()))
}

/// Validate the set of storage target names of one repository
///
/// The set must be non-empty and contain `default`. Non-default names end
/// up inside environment variable names, so no two of them may map to the
/// same variable segment (`Off-Site` and `off_site` would).
pub fn validate_storage_names(targets: &BTreeMap<String, RawStorageTarget>) -> Result<()> {
    if targets.is_empty() {
        return Err(CompileError::NoStorageTargets);
    }

    if !targets.contains_key(DEFAULT_STORAGE) {
        return Err(CompileError::MissingDefaultStorage);
    }

    let mut segments: BTreeMap<String, &String> = BTreeMap::new();
    for name in targets.keys() {
        validate_snapshot_id(name)?;
        if name == DEFAULT_STORAGE {
            continue;
        }
        if let Some(first) = segments.insert(env_name_segment(name), name) {
            return Err(CompileError::EnvNameCollision {
                first: first.clone(),
                second: name.clone(),
            });
        }
    }

    Ok(())
}

/// Validate a thread count, defaulting to 1
pub fn validate_threads(job: &str, threads: Option<u32>) -> Result<u32> {
    match threads {
        None => Ok(1),
        Some(0) => Err(CompileError::InvalidThreads {
            job: job.to_string(),
        }),
        Some(count) => Ok(count),
    }
}

/// Validate snapshot tags; they are passed to the tool unquoted
pub fn validate_tags(job: &str, tags: &[String]) -> Result<()> {
    for tag in tags {
        if !SNAPSHOT_ID.is_match(tag) {
            return Err(CompileError::InvalidTag {
                job: job.to_string(),
                tag: tag.clone(),
            });
        }
    }
    Ok(())
}
