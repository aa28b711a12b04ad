use std::{
    ffi::OsString,
    io,
    path::{Path, PathBuf},
    process::{Command, Stdio},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

pub const USER_DATA_DIR_FLAG: &str = "--user-data-dir";
pub const DISK_CACHE_DIR_FLAG: &str = "--disk-cache-dir";

/// How long the current instance lingers after spawning its replacement.
pub const CLOSE_GRACE: Duration = Duration::from_millis(120);

/// Everything needed to start a new instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: Vec<(OsString, OsString)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpawnedInstance {
    pub pid: u32,
}

pub trait Launcher {
    /// Start `spec` detached from the caller. Must not wait for the child.
    fn spawn(&self, spec: &LaunchSpec) -> io::Result<SpawnedInstance>;
}

pub trait ExitScheduler {
    /// Arrange for the current process to exit after `delay`.
    fn schedule(&self, delay: Duration) -> PendingExit;
}

/// Handle to a scheduled exit. Dropping it does not cancel the exit.
#[derive(Debug, Clone, Default)]
pub struct PendingExit {
    cancelled: Arc<AtomicBool>,
}

impl PendingExit {
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

pub struct ProcessLauncher;

impl Launcher for ProcessLauncher {
    fn spawn(&self, spec: &LaunchSpec) -> io::Result<SpawnedInstance> {
        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .env_clear()
            .envs(spec.env.iter().map(|(k, v)| (k, v)));

        apply_detach_settings(&mut command);

        let mut child = command.spawn()?;
        let pid = child.id();
        tracing::debug!(pid, program = %spec.program.display(), "spawned detached instance");

        // Reap the child if it exits while we are still alive.
        thread::spawn(move || {
            let _ = child.wait();
        });

        Ok(SpawnedInstance { pid })
    }
}

#[cfg(unix)]
fn apply_detach_settings(command: &mut Command) {
    use std::os::unix::process::CommandExt;
    command.process_group(0);
}

#[cfg(windows)]
fn apply_detach_settings(command: &mut Command) {
    use std::os::windows::process::CommandExt;
    const DETACHED_PROCESS: u32 = 0x0000_0008;
    const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
    command.creation_flags(DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP);
}

#[cfg(not(any(unix, windows)))]
fn apply_detach_settings(_command: &mut Command) {}

/// Exits this process with status 0 once the delay has passed.
pub struct ProcessExit;

impl ExitScheduler for ProcessExit {
    fn schedule(&self, delay: Duration) -> PendingExit {
        let pending = PendingExit::default();
        let handle = pending.clone();
        thread::spawn(move || {
            thread::sleep(delay);
            if !handle.is_cancelled() {
                tracing::info!("closing current instance");
                std::process::exit(0);
            }
        });
        pending
    }
}

fn flag_matches(arg: &str, flag: &str) -> bool {
    arg.len() >= flag.len()
        && arg.is_char_boundary(flag.len())
        && arg[..flag.len()].eq_ignore_ascii_case(flag)
}

/// Whether the argument after a bare `--flag` is that flag's value.
fn is_separate_value(next: Option<&String>) -> bool {
    next.is_some_and(|value| !value.starts_with('-'))
}

/// Value of `flag` in either `--flag=value` or `--flag value` form.
/// The last occurrence wins.
pub fn flag_value(args: &[String], flag: &str) -> Option<String> {
    let mut found = None;
    let mut iter = args.iter().peekable();
    while let Some(arg) = iter.next() {
        if !flag_matches(arg, flag) {
            continue;
        }
        let rest = &arg[flag.len()..];
        if let Some(value) = rest.strip_prefix('=') {
            found = Some(value.to_string());
        } else if rest.is_empty() && is_separate_value(iter.peek().copied()) {
            found = iter.next().cloned();
        }
    }
    found.filter(|v| !v.is_empty())
}

/// The current arguments with any previous data/cache directory flags
/// dropped and fresh ones for the target account appended.
pub fn build_launch_args(current: &[String], user_data_dir: &Path, cache_dir: &Path) -> Vec<String> {
    let mut args = Vec::with_capacity(current.len() + 2);
    let mut iter = current.iter().peekable();
    while let Some(arg) = iter.next() {
        let is_dir_flag = [USER_DATA_DIR_FLAG, DISK_CACHE_DIR_FLAG]
            .iter()
            .find(|flag| flag_matches(arg, flag));
        match is_dir_flag {
            Some(flag) => {
                // Bare `--flag value` form: the value goes too.
                if arg.len() == flag.len() && is_separate_value(iter.peek().copied()) {
                    iter.next();
                }
            }
            None => args.push(arg.clone()),
        }
    }

    args.push(format!("{USER_DATA_DIR_FLAG}={}", user_data_dir.display()));
    args.push(format!("{DISK_CACHE_DIR_FLAG}={}", cache_dir.display()));
    args
}
