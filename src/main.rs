mod accounts;
mod config;
mod identity;
mod ipc;
mod launcher;
mod logging;
mod manager;
mod paths;
mod profile;
mod provision;
mod tracking;
mod tui;

use anyhow::Result;
use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use colored::Colorize;
use std::io;

use crate::{
    config::{AppCommand, Settings},
    manager::AccountManager,
};

#[derive(Parser)]
#[command(
    name = "codex-accounts",
    version,
    about = "Isolated account profiles for the Codex desktop app",
    long_about = "\
Run several Codex accounts side by side, each with its own config, \
credentials and cache.\n\
\n\
Accounts live in ~/.codex-accounts/<name> (override with CODEX_ACCOUNTS_ROOT). \
Switching seeds the account from ~/.codex (override with \
CODEX_ACCOUNTS_SOURCE_HOME) and opens a new app window bound to it.\n\
\n\
Pass the app's own command line after `--`. Run without a subcommand to \
open the interactive picker."
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    app: AppArgs,
}

#[derive(Args, Debug)]
struct AppArgs {
    /// Command line of the running app instance (program and arguments)
    #[arg(last = true, value_name = "APP")]
    argv: Vec<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// List provisioned accounts
    #[command(alias = "ls")]
    List {
        /// Print the raw response as JSON
        #[arg(long)]
        json: bool,

        #[command(flatten)]
        app: AppArgs,
    },

    /// Show which account the running instance belongs to
    Current {
        /// Print the raw response as JSON
        #[arg(long)]
        json: bool,

        #[command(flatten)]
        app: AppArgs,
    },

    /// Prepare an account and open a new app instance bound to it
    Switch {
        /// Account name; created on first use
        account: String,

        /// Print the raw response as JSON
        #[arg(long)]
        json: bool,

        #[command(flatten)]
        app: AppArgs,
    },

    /// Answer account requests as JSON lines on stdin/stdout
    Serve {
        #[command(flatten)]
        app: AppArgs,
    },

    /// Print shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn main() {
    if let Err(e) = run() {
        eprintln!("\n  {} {:#}\n", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn manager_for(app: &AppArgs) -> AccountManager {
    let settings = Settings::from_env().with_app(AppCommand::from_argv(&app.argv));
    AccountManager::new(settings)
}

fn run() -> Result<()> {
    logging::init();

    let cli = Cli::parse();

    match cli.command {
        None => tui::run(&manager_for(&cli.app)),
        Some(Commands::List { json, app }) => accounts::list(&manager_for(&app), json),
        Some(Commands::Current { json, app }) => accounts::current(&manager_for(&app), json),
        Some(Commands::Switch { account, json, app }) => {
            accounts::switch(&manager_for(&app), &account, json)
        }
        Some(Commands::Serve { app }) => {
            let manager = manager_for(&app);
            ipc::serve(&manager, io::stdin().lock(), io::stdout().lock())
        }
        Some(Commands::Completions { shell }) => {
            clap_complete::generate(shell, &mut Cli::command(), "codex-accounts", &mut io::stdout());
            Ok(())
        }
    }
}
