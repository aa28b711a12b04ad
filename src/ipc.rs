use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::{BufRead, Write};

use crate::manager::{AccountManager, SwitchOptions};

pub const CHANNEL_LIST: &str = "codex_desktop:accounts:list";
pub const CHANNEL_CURRENT: &str = "codex_desktop:accounts:current";
pub const CHANNEL_SWITCH: &str = "codex_desktop:accounts:switch";

#[derive(Deserialize, Debug)]
pub struct Request {
    #[serde(default)]
    pub id: Value,
    pub channel: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

#[derive(Serialize, Debug, PartialEq)]
pub struct Response {
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    fn ok(id: Value, result: Value) -> Self {
        Response {
            id,
            result: Some(result),
            error: None,
        }
    }

    fn error(id: Value, message: impl Into<String>) -> Self {
        Response {
            id,
            result: None,
            error: Some(message.into()),
        }
    }
}

fn switch_options(arg: Option<&Value>) -> SwitchOptions {
    SwitchOptions {
        close_current: arg
            .and_then(|opts| opts.get("closeCurrent"))
            .and_then(Value::as_bool)
            .unwrap_or(false),
    }
}

/// Answer one request against the manager.
pub fn dispatch(manager: &AccountManager, request: Request) -> Response {
    let payload = match request.channel.as_str() {
        CHANNEL_LIST => serde_json::to_value(manager.list()),
        CHANNEL_CURRENT => serde_json::to_value(manager.current()),
        CHANNEL_SWITCH => {
            // Non-string names sanitize to nothing and fail as invalid.
            let name = request.args.first().and_then(Value::as_str).unwrap_or("");
            let options = switch_options(request.args.get(1));
            serde_json::to_value(manager.switch(name, options))
        }
        other => {
            return Response::error(request.id, format!("Unknown channel: {other}"));
        }
    };

    match payload {
        Ok(value) => Response::ok(request.id, value),
        Err(err) => Response::error(request.id, format!("Cannot encode response: {err}")),
    }
}

/// Serve JSON-line requests from `input` until EOF, one response line each.
pub fn serve<R: BufRead, W: Write>(manager: &AccountManager, input: R, mut output: W) -> Result<()> {
    for line in input.lines() {
        let line = line.context("Cannot read request")?;
        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<Request>(&line) {
            Ok(request) => {
                tracing::debug!(channel = %request.channel, "handling request");
                dispatch(manager, request)
            }
            Err(err) => Response::error(Value::Null, format!("Malformed request: {err}")),
        };

        serde_json::to_writer(&mut output, &response)?;
        output.write_all(b"\n")?;
        output.flush()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AppCommand, Settings};
    use crate::launcher::{ExitScheduler, LaunchSpec, Launcher, PendingExit, SpawnedInstance};
    use crate::tracking::SystemClock;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::{cell::Cell, fs, io, rc::Rc, time::Duration};
    use tempfile::tempdir;

    struct NoopLauncher;

    impl Launcher for NoopLauncher {
        fn spawn(&self, _spec: &LaunchSpec) -> io::Result<SpawnedInstance> {
            Ok(SpawnedInstance { pid: 7 })
        }
    }

    #[derive(Clone, Default)]
    struct CountingExit(Rc<Cell<usize>>);

    impl ExitScheduler for CountingExit {
        fn schedule(&self, _delay: Duration) -> PendingExit {
            self.0.set(self.0.get() + 1);
            PendingExit::default()
        }
    }

    fn manager(root: &std::path::Path, exit: CountingExit) -> AccountManager {
        let settings = Settings::default()
            .with_accounts_root(root)
            .with_source_home(root.join("missing-source"))
            .with_app(AppCommand::from_argv(&["/opt/codex/Codex".to_string()]));
        AccountManager::with_effects(
            settings,
            Box::new(NoopLauncher),
            Box::new(exit),
            Box::new(SystemClock),
        )
    }

    #[test]
    fn serves_list_current_and_switch() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("accounts");
        fs::create_dir_all(root.join("alpha")).unwrap();
        let exit = CountingExit::default();
        let manager = manager(&root, exit.clone());

        let input = [
            json!({"id": 1, "channel": CHANNEL_LIST}).to_string(),
            String::new(),
            json!({"id": 2, "channel": CHANNEL_SWITCH, "args": ["Beta", {"closeCurrent": true}]})
                .to_string(),
            json!({"id": "c", "channel": CHANNEL_CURRENT}).to_string(),
        ]
        .join("\n");
        let mut output = Vec::new();

        serve(&manager, input.as_bytes(), &mut output).unwrap();

        let lines: Vec<Value> = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(
            lines[0],
            json!({
                "id": 1,
                "result": {
                    "accounts": [
                        {"name": "alpha", "label": null, "email": null, "hasAuth": false}
                    ],
                    "current": null,
                    "root": root,
                }
            })
        );
        assert_eq!(lines[1]["id"], 2);
        assert_eq!(lines[1]["result"]["ok"], true);
        assert_eq!(lines[1]["result"]["account"], "beta");
        assert_eq!(lines[1]["result"]["closedCurrent"], true);
        assert_eq!(lines[2]["id"], "c");
        assert_eq!(lines[2]["result"]["sourceHome"], json!(root.join("missing-source")));
        assert_eq!(exit.0.get(), 1);
        assert!(root.join("beta").join("config.toml").exists());
    }

    #[test]
    fn non_string_name_is_rejected() {
        let dir = tempdir().unwrap();
        let manager = manager(dir.path(), CountingExit::default());

        let response = dispatch(
            &manager,
            Request {
                id: json!(9),
                channel: CHANNEL_SWITCH.to_string(),
                args: vec![json!(42)],
            },
        );

        assert_eq!(
            response,
            Response::ok(json!(9), json!({"ok": false, "error": "Invalid account name."}))
        );
    }

    #[test]
    fn unknown_channel_and_malformed_lines_get_errors() {
        let dir = tempdir().unwrap();
        let manager = manager(dir.path(), CountingExit::default());
        let input = "{\"channel\":\"nope\"}\nnot json\n";
        let mut output = Vec::new();

        serve(&manager, input.as_bytes(), &mut output).unwrap();

        let text = String::from_utf8(output).unwrap();
        let lines: Vec<Value> = text.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(lines[0], json!({"id": null, "error": "Unknown channel: nope"}));
        assert!(lines[1]["error"]
            .as_str()
            .unwrap()
            .starts_with("Malformed request"));
    }
}
