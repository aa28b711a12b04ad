use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use crate::{
    config::Settings,
    identity::AccountName,
    paths::{self, ACCOUNT_FILE, AUTH_FILE},
};

/// Usage-window bookkeeping stored under `tracking` in `account.json`.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Tracking {
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient_string")]
    pub five_hour_window_start_utc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient_string")]
    pub weekly_window_start_utc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient_string")]
    pub last_launch_utc: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Contents of `account.json`. Fields this tool does not know about are
/// carried through untouched.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct AccountMeta {
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient_string")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient_string")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient_tracking")]
    pub tracking: Option<Tracking>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One row of the account listing.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AccountInfo {
    pub name: AccountName,
    pub label: Option<String>,
    pub email: Option<String>,
    pub has_auth: bool,
}

fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => Some(s),
        _ => None,
    })
}

fn lenient_tracking<'de, D>(deserializer: D) -> Result<Option<Tracking>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

pub fn meta_path(account_home: &Path) -> PathBuf {
    account_home.join(ACCOUNT_FILE)
}

/// Strict read of `account.json`: a missing file is `Ok(None)`, anything
/// unreadable or malformed is an error.
pub fn load_meta(account_home: &Path) -> Result<Option<AccountMeta>> {
    let path = meta_path(account_home);
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let meta = serde_json::from_str(&content)
        .with_context(|| format!("Invalid JSON in {}", path.display()))?;
    Ok(Some(meta))
}

/// Metadata for display and tracking; missing or corrupt files read as empty.
pub fn read_meta(account_home: &Path) -> AccountMeta {
    match load_meta(account_home) {
        Ok(meta) => meta.unwrap_or_default(),
        Err(err) => {
            tracing::warn!("ignoring account metadata: {err:#}");
            AccountMeta::default()
        }
    }
}

pub fn save_meta(account_home: &Path, meta: &AccountMeta) -> Result<()> {
    let path = meta_path(account_home);
    let mut content = serde_json::to_string_pretty(meta)?;
    content.push('\n');
    write_atomic(&path, &content)
}

/// Write through a temp file in the same directory, then rename into place.
pub fn write_atomic(path: &Path, content: &str) -> Result<()> {
    let temp_path = path.with_extension(format!("tmp.{}", std::process::id()));

    {
        let mut f = fs::File::create(&temp_path)
            .with_context(|| format!("Cannot create temp file {}", temp_path.display()))?;
        f.write_all(content.as_bytes())?;
        f.flush()?;
    }

    if let Err(err) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(err).with_context(|| format!("Cannot finalize file at {}", path.display()));
    }

    Ok(())
}

pub fn read_account_info(name: AccountName, account_home: &Path) -> AccountInfo {
    let meta = read_meta(account_home);
    AccountInfo {
        name,
        label: meta.label,
        email: meta.email,
        has_auth: account_home.join(AUTH_FILE).exists(),
    }
}

/// Every provisioned account under the accounts root, sorted by name.
pub fn list_accounts(settings: &Settings) -> Vec<AccountInfo> {
    let Some(root) = paths::accounts_root(settings) else {
        return Vec::new();
    };
    let entries = match fs::read_dir(&root) {
        Ok(entries) => entries,
        Err(err) => {
            tracing::debug!("cannot read accounts root {}: {err}", root.display());
            return Vec::new();
        }
    };

    let mut found: Vec<(AccountName, PathBuf)> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .filter_map(|entry| {
            let name = AccountName::sanitize(&entry.file_name().to_string_lossy())?;
            Some((name, entry.path()))
        })
        .collect();

    found.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
    found.dedup_by(|later, earlier| later.0 == earlier.0);

    found
        .into_iter()
        .map(|(name, home)| read_account_info(name, &home))
        .collect()
}
