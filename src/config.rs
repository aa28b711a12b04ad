use std::{
    ffi::{OsStr, OsString},
    path::PathBuf,
};

use crate::launcher::{flag_value, USER_DATA_DIR_FLAG};

pub const ENV_ACCOUNTS_ROOT: &str = "CODEX_ACCOUNTS_ROOT";
pub const ENV_SOURCE_HOME: &str = "CODEX_ACCOUNTS_SOURCE_HOME";
pub const ENV_CURRENT: &str = "CODEX_ACCOUNTS_CURRENT";
/// Home directory the Codex app reads its config and credentials from.
pub const ENV_CODEX_HOME: &str = "CODEX_HOME";

/// The application instance being managed: its executable and the argument
/// vector it was started with (executable excluded).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl AppCommand {
    /// Split a full argv (`program arg...`) into an `AppCommand`.
    pub fn from_argv(argv: &[String]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        if program.trim().is_empty() {
            return None;
        }
        Some(AppCommand {
            program: PathBuf::from(program),
            args: args.to_vec(),
        })
    }

    /// The user-data directory the instance was started with, if any.
    pub fn user_data_dir(&self) -> Option<PathBuf> {
        flag_value(&self.args, USER_DATA_DIR_FLAG).map(PathBuf::from)
    }
}

/// Everything the account manager knows about its surroundings.
///
/// Built once at startup from the process environment; components only ever
/// see this struct, so tests can pin every input.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub accounts_root: Option<PathBuf>,
    pub source_home: Option<PathBuf>,
    pub current_account: Option<String>,
    pub codex_home: Option<PathBuf>,
    pub home_dir: Option<PathBuf>,
    pub user_data_dir: Option<PathBuf>,
    pub app: Option<AppCommand>,
    pub env: Vec<(OsString, OsString)>,
}

impl Settings {
    pub fn from_env() -> Self {
        Self::from_vars(std::env::vars_os(), dirs::home_dir())
    }

    pub fn from_vars<I>(vars: I, home_dir: Option<PathBuf>) -> Self
    where
        I: IntoIterator<Item = (OsString, OsString)>,
    {
        let env: Vec<(OsString, OsString)> = vars.into_iter().collect();
        let lookup = |key: &str| {
            env.iter()
                .find(|(k, _)| k == OsStr::new(key))
                .map(|(_, v)| v.clone())
                .filter(|v| !v.to_string_lossy().trim().is_empty())
        };

        Settings {
            accounts_root: lookup(ENV_ACCOUNTS_ROOT).map(PathBuf::from),
            source_home: lookup(ENV_SOURCE_HOME).map(PathBuf::from),
            current_account: lookup(ENV_CURRENT).map(|v| v.to_string_lossy().into_owned()),
            codex_home: lookup(ENV_CODEX_HOME).map(PathBuf::from),
            home_dir: home_dir.filter(|h| !h.as_os_str().is_empty()),
            user_data_dir: None,
            app: None,
            env,
        }
    }

    /// Attach the running instance's command line. Its `--user-data-dir`
    /// becomes the instance's data directory unless one was already set.
    pub fn with_app(mut self, app: Option<AppCommand>) -> Self {
        if self.user_data_dir.is_none() {
            self.user_data_dir = app.as_ref().and_then(AppCommand::user_data_dir);
        }
        self.app = app;
        self
    }

    #[cfg(test)]
    pub fn with_accounts_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.accounts_root = Some(root.into());
        self
    }

    #[cfg(test)]
    pub fn with_source_home(mut self, source: impl Into<PathBuf>) -> Self {
        self.source_home = Some(source.into());
        self
    }

    #[cfg(test)]
    pub fn with_home_dir(mut self, home: impl Into<PathBuf>) -> Self {
        self.home_dir = Some(home.into());
        self
    }

    #[cfg(test)]
    pub fn with_current_account(mut self, name: impl Into<String>) -> Self {
        self.current_account = Some(name.into());
        self
    }

    #[cfg(test)]
    pub fn with_codex_home(mut self, home: impl Into<PathBuf>) -> Self {
        self.codex_home = Some(home.into());
        self
    }

    #[cfg(test)]
    pub fn with_user_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.user_data_dir = Some(dir.into());
        self
    }
}
