use serde::{Serialize, Serializer};
use std::{
    ffi::{OsStr, OsString},
    io,
    path::{Path, PathBuf},
};
use thiserror::Error;

use crate::{
    config::{Settings, ENV_ACCOUNTS_ROOT, ENV_CODEX_HOME, ENV_CURRENT, ENV_SOURCE_HOME},
    identity::{self, AccountName},
    launcher::{
        build_launch_args, ExitScheduler, LaunchSpec, Launcher, PendingExit, ProcessExit,
        ProcessLauncher, CLOSE_GRACE,
    },
    paths,
    profile::{self, AccountInfo},
    provision::{self, SyncReport},
    tracking::{self, Clock, SystemClock},
};

/// Failures that stop a switch before a new instance is running.
#[derive(Debug, Error)]
pub enum SwitchError {
    #[error("Invalid account name.")]
    InvalidName,
    #[error("Accounts root is unavailable.")]
    RootUnavailable,
    #[error("Cannot prepare account home {}: {source:#}", path.display())]
    Provision {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },
    #[error("No application command to launch.")]
    NoAppCommand,
    #[error("Failed to launch new instance: {0}")]
    Spawn(#[source] io::Error),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SwitchOptions {
    pub close_current: bool,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ListResponse {
    pub accounts: Vec<AccountInfo>,
    pub current: Option<AccountName>,
    pub root: Option<PathBuf>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CurrentResponse {
    pub current: Option<AccountName>,
    pub root: Option<PathBuf>,
    pub source_home: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct Switched {
    pub account: AccountName,
    pub account_home: PathBuf,
    pub pid: u32,
    pub closed_current: bool,
    pub synced: SyncReport,
    /// Set when the current process is scheduled to exit.
    pub pending_exit: Option<PendingExit>,
}

/// What a switch request hands back to the caller.
#[derive(Debug)]
pub enum SwitchOutcome {
    Switched(Switched),
    Failed(SwitchError),
}

impl SwitchOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, SwitchOutcome::Switched(_))
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SwitchedWire<'a> {
    ok: bool,
    account: &'a AccountName,
    opened_new_instance: bool,
    closed_current: bool,
    synced: &'a SyncReport,
}

#[derive(Serialize)]
struct FailedWire {
    ok: bool,
    error: String,
}

impl Serialize for SwitchOutcome {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            SwitchOutcome::Switched(done) => SwitchedWire {
                ok: true,
                account: &done.account,
                opened_new_instance: true,
                closed_current: done.closed_current,
                synced: &done.synced,
            }
            .serialize(serializer),
            SwitchOutcome::Failed(err) => FailedWire {
                ok: false,
                error: err.to_string(),
            }
            .serialize(serializer),
        }
    }
}

/// Lists, identifies and switches account profiles for one running instance.
pub struct AccountManager {
    settings: Settings,
    launcher: Box<dyn Launcher>,
    exit: Box<dyn ExitScheduler>,
    clock: Box<dyn Clock>,
}

impl AccountManager {
    pub fn new(settings: Settings) -> Self {
        Self::with_effects(
            settings,
            Box::new(ProcessLauncher),
            Box::new(ProcessExit),
            Box::new(SystemClock),
        )
    }

    pub fn with_effects(
        settings: Settings,
        launcher: Box<dyn Launcher>,
        exit: Box<dyn ExitScheduler>,
        clock: Box<dyn Clock>,
    ) -> Self {
        AccountManager {
            settings,
            launcher,
            exit,
            clock,
        }
    }

    pub fn list(&self) -> ListResponse {
        ListResponse {
            accounts: profile::list_accounts(&self.settings),
            current: identity::resolve_current(&self.settings),
            root: paths::accounts_root(&self.settings),
        }
    }

    pub fn current(&self) -> CurrentResponse {
        CurrentResponse {
            current: identity::resolve_current(&self.settings),
            root: paths::accounts_root(&self.settings),
            source_home: paths::source_home(&self.settings),
        }
    }

    pub fn switch(&self, raw_name: &str, options: SwitchOptions) -> SwitchOutcome {
        match self.try_switch(raw_name, options) {
            Ok(done) => SwitchOutcome::Switched(done),
            Err(err) => {
                tracing::warn!("switch to {raw_name:?} failed: {err}");
                SwitchOutcome::Failed(err)
            }
        }
    }

    fn try_switch(&self, raw_name: &str, options: SwitchOptions) -> Result<Switched, SwitchError> {
        let account = AccountName::sanitize(raw_name).ok_or(SwitchError::InvalidName)?;
        let root = paths::accounts_root(&self.settings).ok_or(SwitchError::RootUnavailable)?;
        let app = self.settings.app.as_ref().ok_or(SwitchError::NoAppCommand)?;

        let account_home =
            paths::account_home(&self.settings, &account).ok_or(SwitchError::RootUnavailable)?;
        let user_data_dir = paths::user_data_dir(&account_home);
        let cache_dir = paths::cache_dir(&account_home);

        let provisioned = provision::ensure_account_home(&account_home).and_then(|()| {
            for dir in [&user_data_dir, &cache_dir] {
                std::fs::create_dir_all(dir).map_err(|err| {
                    anyhow::Error::new(err).context(format!("Cannot create {}", dir.display()))
                })?;
            }
            Ok(())
        });
        if let Err(source) = provisioned {
            return Err(SwitchError::Provision {
                path: account_home,
                source,
            });
        }
        tracing::debug!(account = %account, home = %account_home.display(), "account home ready");

        let source_home = paths::source_home(&self.settings);
        let synced = provision::sync_shared_config(source_home.as_deref(), &account_home);
        if let Some(warning) = &synced.warning {
            tracing::warn!(account = %account, "shared config sync degraded: {warning}");
        }

        if let Err(err) = tracking::touch_tracking(&account_home, self.clock.now()) {
            tracing::warn!(account = %account, "{err}");
        }

        let spec = LaunchSpec {
            program: app.program.clone(),
            args: build_launch_args(&app.args, &user_data_dir, &cache_dir),
            env: self.launch_env(&root, source_home.as_deref(), &account, &account_home),
        };
        let spawned = self.launcher.spawn(&spec).map_err(SwitchError::Spawn)?;
        tracing::info!(account = %account, pid = spawned.pid, "opened new instance");

        let pending_exit = options
            .close_current
            .then(|| self.exit.schedule(CLOSE_GRACE));

        Ok(Switched {
            account,
            account_home,
            pid: spawned.pid,
            closed_current: options.close_current,
            synced,
            pending_exit,
        })
    }

    /// The current environment with the account variables pointed at the target.
    fn launch_env(
        &self,
        root: &Path,
        source_home: Option<&Path>,
        account: &AccountName,
        account_home: &Path,
    ) -> Vec<(OsString, OsString)> {
        let pinned: [(&str, OsString); 4] = [
            (ENV_ACCOUNTS_ROOT, root.as_os_str().to_owned()),
            (
                ENV_SOURCE_HOME,
                source_home
                    .map(|p| p.as_os_str().to_owned())
                    .unwrap_or_default(),
            ),
            (ENV_CURRENT, OsString::from(account.as_str())),
            (ENV_CODEX_HOME, account_home.as_os_str().to_owned()),
        ];

        let mut env: Vec<(OsString, OsString)> = self
            .settings
            .env
            .iter()
            .filter(|(key, _)| !pinned.iter().any(|(name, _)| same_env_key(key, name)))
            .cloned()
            .collect();
        env.extend(
            pinned
                .into_iter()
                .map(|(name, value)| (OsString::from(name), value)),
        );
        env
    }
}

/// Environment variable names are case-insensitive on Windows.
fn same_env_key(key: &OsStr, name: &str) -> bool {
    if cfg!(windows) {
        key.to_str().is_some_and(|key| key.eq_ignore_ascii_case(name))
    } else {
        key == name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::AppCommand,
        launcher::SpawnedInstance,
        paths::{CACHE_DIR, CONFIG_FILE, USER_DATA_DIR},
        tracking::format_utc,
    };
    use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
    use pretty_assertions::assert_eq;
    use std::{cell::RefCell, fs, rc::Rc, time::Duration};
    use tempfile::{tempdir, TempDir};

    #[derive(Clone, Default)]
    struct RecordingLauncher {
        spawned: Rc<RefCell<Vec<LaunchSpec>>>,
        fail: bool,
    }

    impl Launcher for RecordingLauncher {
        fn spawn(&self, spec: &LaunchSpec) -> io::Result<SpawnedInstance> {
            if self.fail {
                return Err(io::Error::new(io::ErrorKind::NotFound, "no such program"));
            }
            self.spawned.borrow_mut().push(spec.clone());
            Ok(SpawnedInstance { pid: 4242 })
        }
    }

    #[derive(Clone, Default)]
    struct RecordingExit {
        scheduled: Rc<RefCell<Vec<Duration>>>,
    }

    impl ExitScheduler for RecordingExit {
        fn schedule(&self, delay: Duration) -> PendingExit {
            self.scheduled.borrow_mut().push(delay);
            PendingExit::default()
        }
    }

    struct FixedClock(DateTime<Utc>);

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.0
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 1, 9, 30, 0).unwrap()
    }

    struct Harness {
        dir: TempDir,
        launcher: RecordingLauncher,
        exit: RecordingExit,
        manager: AccountManager,
    }

    impl Harness {
        fn root(&self) -> PathBuf {
            self.dir.path().join("accounts")
        }

        fn source(&self) -> PathBuf {
            self.dir.path().join("source")
        }
    }

    fn harness_with(launcher: RecordingLauncher, app_args: &[&str]) -> Harness {
        let dir = tempdir().unwrap();
        let mut argv = vec!["/opt/codex/Codex".to_string()];
        argv.extend(app_args.iter().map(|s| s.to_string()));
        let settings = Settings::from_vars(
            vec![
                (OsString::from("PATH"), OsString::from("/usr/bin")),
                (OsString::from(ENV_CURRENT), OsString::from("old")),
            ],
            None,
        )
        .with_accounts_root(dir.path().join("accounts"))
        .with_source_home(dir.path().join("source"))
        .with_app(AppCommand::from_argv(&argv));

        let exit = RecordingExit::default();
        let manager = AccountManager::with_effects(
            settings,
            Box::new(launcher.clone()),
            Box::new(exit.clone()),
            Box::new(FixedClock(now())),
        );
        Harness {
            dir,
            launcher,
            exit,
            manager,
        }
    }

    fn harness() -> Harness {
        harness_with(RecordingLauncher::default(), &["--user-data-dir=/old/path"])
    }

    fn env_value<'a>(spec: &'a LaunchSpec, key: &str) -> Option<&'a OsString> {
        spec.env.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    #[test]
    fn switch_to_new_account_provisions_and_launches() {
        let h = harness();
        fs::create_dir_all(h.source()).unwrap();
        fs::write(h.source().join(CONFIG_FILE), "model = \"gpt-5\"\n").unwrap();

        let outcome = h.manager.switch("Team A", SwitchOptions::default());

        let SwitchOutcome::Switched(done) = &outcome else {
            panic!("switch failed: {outcome:?}");
        };
        let home = h.root().join("team-a");
        assert_eq!(done.account.as_str(), "team-a");
        assert_eq!(done.account_home, home);
        assert_eq!(done.pid, 4242);
        assert!(!done.closed_current);
        assert!(done.pending_exit.is_none());
        assert!(done.synced.config_copied);
        assert!(!done.synced.rules_copied);
        assert!(home.join(USER_DATA_DIR).is_dir());
        assert!(home.join(CACHE_DIR).is_dir());
        assert_eq!(
            fs::read_to_string(home.join(CONFIG_FILE)).unwrap(),
            "model = \"gpt-5\"\n"
        );

        let spawned = h.launcher.spawned.borrow();
        assert_eq!(spawned.len(), 1);
        let spec = &spawned[0];
        assert_eq!(spec.program, Path::new("/opt/codex/Codex"));
        assert_eq!(
            spec.args,
            vec![
                format!("--user-data-dir={}", home.join(USER_DATA_DIR).display()),
                format!("--disk-cache-dir={}", home.join(CACHE_DIR).display()),
            ]
        );
        assert_eq!(env_value(spec, ENV_CURRENT), Some(&OsString::from("team-a")));
        assert_eq!(
            env_value(spec, ENV_CODEX_HOME),
            Some(&home.clone().into_os_string())
        );
        assert_eq!(
            env_value(spec, ENV_ACCOUNTS_ROOT),
            Some(&h.root().into_os_string())
        );
        assert_eq!(
            env_value(spec, ENV_SOURCE_HOME),
            Some(&h.source().into_os_string())
        );
        assert_eq!(env_value(spec, "PATH"), Some(&OsString::from("/usr/bin")));
        assert_eq!(spec.env.iter().filter(|(k, _)| k == ENV_CURRENT).count(), 1);
    }

    #[test]
    fn switch_without_shared_source_still_creates_empty_config() {
        let h = harness();

        let outcome = h.manager.switch("fresh", SwitchOptions::default());

        assert!(outcome.is_ok());
        let home = h.root().join("fresh");
        assert_eq!(fs::read_to_string(home.join(CONFIG_FILE)).unwrap(), "");
    }

    #[test]
    fn blank_name_fails_without_touching_disk() {
        let h = harness();

        for raw in ["", "   ", "!!!"] {
            let outcome = h.manager.switch(raw, SwitchOptions { close_current: true });
            assert!(matches!(
                outcome,
                SwitchOutcome::Failed(SwitchError::InvalidName)
            ));
        }

        assert!(!h.root().exists());
        assert!(h.launcher.spawned.borrow().is_empty());
        assert!(h.exit.scheduled.borrow().is_empty());
    }

    #[test]
    fn missing_root_is_fatal() {
        let launcher = RecordingLauncher::default();
        let manager = AccountManager::with_effects(
            Settings::default().with_app(AppCommand::from_argv(&["/bin/app".to_string()])),
            Box::new(launcher.clone()),
            Box::new(RecordingExit::default()),
            Box::new(FixedClock(now())),
        );

        let outcome = manager.switch("work", SwitchOptions::default());

        assert!(matches!(
            outcome,
            SwitchOutcome::Failed(SwitchError::RootUnavailable)
        ));
        assert!(launcher.spawned.borrow().is_empty());
    }

    #[test]
    fn unwritable_home_is_fatal() {
        let h = harness();
        fs::create_dir_all(h.root()).unwrap();
        fs::write(h.root().join("work"), "not a directory").unwrap();

        let outcome = h.manager.switch("work", SwitchOptions::default());

        assert!(matches!(
            outcome,
            SwitchOutcome::Failed(SwitchError::Provision { .. })
        ));
        assert!(h.launcher.spawned.borrow().is_empty());
    }

    #[test]
    fn spawn_failure_is_fatal_and_skips_exit() {
        let h = harness_with(
            RecordingLauncher {
                fail: true,
                ..RecordingLauncher::default()
            },
            &[],
        );

        let outcome = h.manager.switch("work", SwitchOptions { close_current: true });

        let SwitchOutcome::Failed(SwitchError::Spawn(_)) = &outcome else {
            panic!("expected spawn failure, got {outcome:?}");
        };
        let wire = serde_json::to_value(&outcome).unwrap();
        assert_eq!(wire["ok"], false);
        assert!(wire["error"]
            .as_str()
            .unwrap()
            .starts_with("Failed to launch new instance"));
        assert!(h.exit.scheduled.borrow().is_empty());
    }

    #[test]
    fn close_current_schedules_exit_after_grace() {
        let h = harness();

        let outcome = h.manager.switch("work", SwitchOptions { close_current: true });

        let SwitchOutcome::Switched(done) = &outcome else {
            panic!("switch failed: {outcome:?}");
        };
        assert!(done.closed_current);
        assert!(done.pending_exit.is_some());
        assert_eq!(*h.exit.scheduled.borrow(), vec![CLOSE_GRACE]);
    }

    #[test]
    fn switch_resets_elapsed_usage_window() {
        let h = harness();
        let home = h.root().join("work");
        fs::create_dir_all(&home).unwrap();
        let six_hours_ago = format_utc(now() - ChronoDuration::hours(6));
        let one_hour_ago = format_utc(now() - ChronoDuration::hours(1));
        fs::write(
            home.join("account.json"),
            serde_json::json!({
                "label": "Work",
                "tracking": {
                    "five_hour_window_start_utc": six_hours_ago,
                    "weekly_window_start_utc": one_hour_ago,
                }
            })
            .to_string(),
        )
        .unwrap();

        assert!(h.manager.switch("work", SwitchOptions::default()).is_ok());

        let meta = profile::read_meta(&home);
        let tracking = meta.tracking.unwrap();
        assert_eq!(meta.label.as_deref(), Some("Work"));
        assert_eq!(tracking.five_hour_window_start_utc, Some(format_utc(now())));
        assert_eq!(tracking.weekly_window_start_utc, Some(one_hour_ago));
        assert_eq!(tracking.last_launch_utc, Some(format_utc(now())));
    }

    #[test]
    fn successful_switch_serializes_wire_shape() {
        let h = harness();

        let outcome = h.manager.switch("Work", SwitchOptions { close_current: true });

        assert_eq!(
            serde_json::to_value(&outcome).unwrap(),
            serde_json::json!({
                "ok": true,
                "account": "work",
                "openedNewInstance": true,
                "closedCurrent": true,
                "synced": { "configCopied": false, "rulesCopied": false }
            })
        );
    }

    #[test]
    fn list_and_current_report_resolved_state() {
        let h = harness();
        for name in ["old", "zeta"] {
            fs::create_dir_all(h.root().join(name)).unwrap();
        }

        let list = h.manager.list();
        assert_eq!(
            list.accounts
                .iter()
                .map(|a| a.name.as_str())
                .collect::<Vec<_>>(),
            vec!["old", "zeta"]
        );
        assert_eq!(list.current.as_ref().map(|c| c.as_str()), Some("old"));
        assert_eq!(list.root, Some(h.root()));

        let current = h.manager.current();
        assert_eq!(
            serde_json::to_value(&current).unwrap(),
            serde_json::json!({
                "current": "old",
                "root": h.root(),
                "sourceHome": h.source(),
            })
        );
    }

    #[test]
    fn pinned_env_keys_match_per_platform_case_rules() {
        assert!(same_env_key(OsStr::new(ENV_CODEX_HOME), ENV_CODEX_HOME));
        assert!(!same_env_key(OsStr::new("CODEX_HOMEX"), ENV_CODEX_HOME));
        assert_eq!(same_env_key(OsStr::new("Codex_Home"), ENV_CODEX_HOME), cfg!(windows));
    }
}
