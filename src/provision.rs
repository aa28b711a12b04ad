use anyhow::{Context, Result};
use serde::Serialize;
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::paths::{CONFIG_FILE, RULES_DIR};

/// Outcome of seeding an account home from the shared source home.
#[derive(Serialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub config_copied: bool,
    pub rules_copied: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

/// Create the account home if needed and make sure it has a `config.toml`.
/// Existing files are never touched.
pub fn ensure_account_home(account_home: &Path) -> Result<()> {
    fs::create_dir_all(account_home)
        .with_context(|| format!("Cannot create {}", account_home.display()))?;

    let config = account_home.join(CONFIG_FILE);
    if !config.exists() {
        fs::write(&config, "")
            .with_context(|| format!("Cannot create {}", config.display()))?;
    }
    Ok(())
}

/// Copy the shared `config.toml` and `rules/` from `source_home` into the
/// account home. Missing sources are skipped; copy failures become a warning.
pub fn sync_shared_config(source_home: Option<&Path>, account_home: &Path) -> SyncReport {
    let Some(source_home) = source_home else {
        return SyncReport::default();
    };

    let mut report = SyncReport::default();

    let source_config = source_home.join(CONFIG_FILE);
    if source_config.is_file() {
        let target = account_home.join(CONFIG_FILE);
        match fs::copy(&source_config, &target) {
            Ok(_) => report.config_copied = true,
            Err(err) => {
                report.warning = Some(format!(
                    "Cannot copy {} to {}: {err}",
                    source_config.display(),
                    target.display()
                ));
                return report;
            }
        }
    }

    match replace_dir(&source_home.join(RULES_DIR), &account_home.join(RULES_DIR)) {
        Ok(copied) => report.rules_copied = copied,
        Err(err) => report.warning = Some(format!("{err:#}")),
    }

    report
}

/// Replace `dest` with a fresh copy of `source`. Returns `false` and leaves
/// `dest` alone when `source` does not exist. The copy is staged next to
/// `dest` so a failed copy leaves the old contents in place.
fn replace_dir(source: &Path, dest: &Path) -> Result<bool> {
    if !source.is_dir() {
        return Ok(false);
    }

    let staging = staging_path(dest);
    remove_dir_if_present(&staging)?;
    if let Err(err) = copy_dir_recursive(source, &staging) {
        let _ = fs::remove_dir_all(&staging);
        return Err(err);
    }

    remove_dir_if_present(dest)?;
    fs::rename(&staging, dest).with_context(|| {
        format!("Cannot move {} to {}", staging.display(), dest.display())
    })?;
    Ok(true)
}

fn staging_path(dest: &Path) -> PathBuf {
    let mut name = dest
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(format!(".sync-{}", std::process::id()));
    dest.with_file_name(name)
}

fn remove_dir_if_present(dir: &Path) -> Result<()> {
    match fs::remove_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err).with_context(|| format!("Cannot remove {}", dir.display())),
    }
}

/// Copies `source` into `dest`, following symlinks.
fn copy_dir_recursive(source: &Path, dest: &Path) -> Result<()> {
    fs::create_dir_all(dest).with_context(|| format!("Cannot create {}", dest.display()))?;

    for entry in
        fs::read_dir(source).with_context(|| format!("Cannot read {}", source.display()))?
    {
        let entry = entry?;
        let from = entry.path();
        let to = dest.join(entry.file_name());
        let meta =
            fs::metadata(&from).with_context(|| format!("Cannot read {}", from.display()))?;
        if meta.is_dir() {
            copy_dir_recursive(&from, &to)?;
        } else {
            fs::copy(&from, &to).with_context(|| {
                format!("Cannot copy {} to {}", from.display(), to.display())
            })?;
        }
    }
    Ok(())
}
