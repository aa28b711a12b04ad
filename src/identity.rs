use serde::Serialize;
use std::fmt;

use crate::{
    config::Settings,
    paths::{self, USER_DATA_DIR},
};

/// A canonical account name: lower-case, whitespace runs turned into a single
/// hyphen, everything outside `[a-z0-9_-]` removed. Never empty.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct AccountName(String);

impl AccountName {
    pub fn sanitize(raw: &str) -> Option<Self> {
        let mut out = String::with_capacity(raw.len());
        let mut in_whitespace = false;
        for ch in raw.trim().chars() {
            if ch.is_whitespace() {
                if !in_whitespace {
                    out.push('-');
                }
                in_whitespace = true;
                continue;
            }
            in_whitespace = false;
            for lower in ch.to_lowercase() {
                if lower.is_ascii_lowercase() || lower.is_ascii_digit() || lower == '_' || lower == '-' {
                    out.push(lower);
                }
            }
        }

        if out.is_empty() {
            None
        } else {
            Some(AccountName(out))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for AccountName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Work out which account the running instance belongs to.
///
/// Best effort: the user-data fallback only looks at path shape and never
/// checks that the account is actually provisioned.
pub fn resolve_current(settings: &Settings) -> Option<AccountName> {
    if let Some(name) = settings
        .current_account
        .as_deref()
        .and_then(AccountName::sanitize)
    {
        return Some(name);
    }

    let root = paths::accounts_root(settings)?;

    if let Some(name) = settings
        .codex_home
        .as_deref()
        .and_then(|home| paths::relative_segments(&root, home))
        .and_then(|parts| parts.first().and_then(|first| AccountName::sanitize(first)))
    {
        return Some(name);
    }

    let parts = paths::relative_segments(&root, settings.user_data_dir.as_deref()?)?;
    match parts.as_slice() {
        [account, marker, ..]
            if marker.eq_ignore_ascii_case(USER_DATA_DIR)
                && parts
                    .last()
                    .is_some_and(|last| last.eq_ignore_ascii_case(USER_DATA_DIR)) =>
        {
            AccountName::sanitize(account)
        }
        _ => None,
    }
}
