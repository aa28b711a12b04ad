use anyhow::{bail, Result};
use colored::Colorize;
use serde::Serialize;

use crate::{
    manager::{AccountManager, SwitchError, SwitchOptions, SwitchOutcome},
    profile::AccountInfo,
};

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// `label · email`, whichever of the two are known.
pub(crate) fn describe(info: &AccountInfo) -> String {
    [info.label.as_deref(), info.email.as_deref()]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join(" · ")
}

// ── List accounts ─────────────────────────────────────────────────────────────

pub fn list(manager: &AccountManager, json: bool) -> Result<()> {
    let listing = manager.list();
    if json {
        return print_json(&listing);
    }

    let root = listing
        .root
        .as_ref()
        .map(|r| r.display().to_string())
        .unwrap_or_else(|| "unavailable".to_string());

    if listing.accounts.is_empty() {
        println!("\n  {}\n", "No accounts yet.".dimmed());
        println!(
            "  Run {} to create one.",
            "codex-accounts switch <name> -- <app>".cyan().bold()
        );
        println!("  {} {}\n", "Root:".dimmed(), root.dimmed());
        return Ok(());
    }

    println!("\n  {}", "Codex Accounts".bold());
    println!("  {}", "─".repeat(40).dimmed());

    for info in &listing.accounts {
        let detail = describe(info);
        let auth = if info.has_auth {
            "".normal()
        } else {
            "  (no credentials)".yellow().dimmed()
        };

        if listing.current.as_ref() == Some(&info.name) {
            println!(
                "  {}  {}  {}{}",
                "▶".green().bold(),
                info.name.as_str().green().bold(),
                detail.green().dimmed(),
                auth
            );
        } else {
            println!("     {}  {}{}", info.name.as_str(), detail.dimmed(), auth);
        }
    }

    println!("  {}", "─".repeat(40).dimmed());
    println!("  {} {}\n", "Root:".dimmed(), root.dimmed());
    Ok(())
}

// ── Current account ───────────────────────────────────────────────────────────

pub fn current(manager: &AccountManager, json: bool) -> Result<()> {
    let current = manager.current();
    if json {
        return print_json(&current);
    }

    let show = |p: Option<&std::path::Path>| {
        p.map(|p| p.display().to_string())
            .unwrap_or_else(|| "unavailable".to_string())
    };

    match &current.current {
        Some(name) => println!("\n  {} {}", "▶".green().bold(), name.as_str().bold()),
        None => println!("\n  {} {}", "·".yellow(), "default (not an isolated account)".dimmed()),
    }
    println!("  {} {}", "Root:  ".dimmed(), show(current.root.as_deref()));
    println!("  {} {}\n", "Source:".dimmed(), show(current.source_home.as_deref()));
    Ok(())
}

// ── Switch ────────────────────────────────────────────────────────────────────

/// One-shot switch. The CLI process is not the app instance, so it never
/// asks for the current instance to close.
pub fn switch(manager: &AccountManager, name: &str, json: bool) -> Result<()> {
    let outcome = manager.switch(name, SwitchOptions::default());
    if json {
        print_json(&outcome)?;
        if !outcome.is_ok() {
            std::process::exit(1);
        }
        return Ok(());
    }

    match outcome {
        SwitchOutcome::Switched(done) => {
            println!(
                "\n  {} Opened {} (pid {})",
                "✓".green().bold(),
                done.account.as_str().cyan().bold(),
                done.pid
            );
            println!("  {} {}", "Home:".dimmed(), done.account_home.display());

            let copied: Vec<&str> = [
                (done.synced.config_copied, "config.toml"),
                (done.synced.rules_copied, "rules/"),
            ]
            .into_iter()
            .filter_map(|(copied, what)| copied.then_some(what))
            .collect();
            if !copied.is_empty() {
                println!("  {} {}", "Synced:".dimmed(), copied.join(", "));
            }
            if let Some(warning) = &done.synced.warning {
                println!("  {} {}", "!".yellow().bold(), warning.yellow());
            }
            println!();
            Ok(())
        }
        SwitchOutcome::Failed(SwitchError::NoAppCommand) => {
            bail!("Nothing to launch. Pass the app command after `--`, e.g. `codex-accounts switch {name} -- /path/to/Codex`")
        }
        SwitchOutcome::Failed(err) => Err(err.into()),
    }
}
