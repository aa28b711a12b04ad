use std::path::{Component, Path, PathBuf};

use crate::{config::Settings, identity::AccountName};

pub const ACCOUNTS_ROOT_DIR: &str = ".codex-accounts";
pub const SOURCE_HOME_DIR: &str = ".codex";
pub const CONFIG_FILE: &str = "config.toml";
pub const RULES_DIR: &str = "rules";
pub const ACCOUNT_FILE: &str = "account.json";
pub const AUTH_FILE: &str = "auth.json";
pub const USER_DATA_DIR: &str = "electron-userdata";
pub const CACHE_DIR: &str = "electron-cache";

/// Lexically normalize a path: drop `.` segments, fold `..` into the
/// preceding segment and collapse repeated separators. The filesystem is
/// never consulted.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let popped = matches!(out.components().next_back(), Some(Component::Normal(_)))
                    && out.pop();
                if !popped && !out.has_root() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    if out.as_os_str().is_empty() && !path.as_os_str().is_empty() {
        out.push(".");
    }
    out
}

/// Whether `child` lies strictly inside `parent`.
///
/// Comparison is case-insensitive and happens per path component, so
/// `/a/bfoo` is never inside `/a/b`.
pub fn is_strict_subpath(parent: &Path, child: &Path) -> bool {
    let parent = normalize(parent);
    let child = normalize(child);
    let parent_parts: Vec<_> = parent.components().collect();
    let child_parts: Vec<_> = child.components().collect();

    child_parts.len() > parent_parts.len()
        && parent_parts.iter().zip(&child_parts).all(|(p, c)| {
            p.as_os_str().to_string_lossy().to_lowercase()
                == c.as_os_str().to_string_lossy().to_lowercase()
        })
}

/// Segments of `child` below `parent`, keeping the child's casing.
pub fn relative_segments(parent: &Path, child: &Path) -> Option<Vec<String>> {
    if !is_strict_subpath(parent, child) {
        return None;
    }
    let depth = normalize(parent).components().count();
    Some(
        normalize(child)
            .components()
            .skip(depth)
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect(),
    )
}

pub fn accounts_root(settings: &Settings) -> Option<PathBuf> {
    settings
        .accounts_root
        .as_deref()
        .map(normalize)
        .or_else(|| settings.home_dir.as_ref().map(|h| normalize(&h.join(ACCOUNTS_ROOT_DIR))))
}

pub fn source_home(settings: &Settings) -> Option<PathBuf> {
    settings
        .source_home
        .as_deref()
        .map(normalize)
        .or_else(|| settings.home_dir.as_ref().map(|h| normalize(&h.join(SOURCE_HOME_DIR))))
}

pub fn account_home(settings: &Settings, name: &AccountName) -> Option<PathBuf> {
    accounts_root(settings).map(|root| root.join(name.as_str()))
}

pub fn user_data_dir(account_home: &Path) -> PathBuf {
    account_home.join(USER_DATA_DIR)
}

pub fn cache_dir(account_home: &Path) -> PathBuf {
    account_home.join(CACHE_DIR)
}
