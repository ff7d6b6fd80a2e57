mod aggregate;
mod app;
mod config;
mod domain;
mod freshness;
mod github;
mod refresh;
mod scheduler;
mod storage;
#[cfg(test)]
mod test_utils;

use std::{path::PathBuf, sync::Arc};

use anyhow::Result;
use app::{APP_NAME, ConsoleBadge, ConsoleNotifier, LoginSecret, ReviewLogApp};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::{
    aggregate::DEFAULT_PULL_CONCURRENCY,
    config::SettingKey,
    github::ReqwestTransport,
    storage::{FileBackend, Store},
};

#[derive(Parser)]
#[command(name = APP_NAME)]
#[command(about = "Keeps an eye on open pull requests across your GitHub repositories")]
#[command(version)]
struct Cli {
    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// State file to use instead of ~/.reviewlog/store.json
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// Pull request listings requested at the same time
    #[arg(long, global = true, default_value_t = DEFAULT_PULL_CONCURRENCY)]
    pull_concurrency: usize,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Refresh periodically and report the badge and new pull requests
    Watch,
    /// Show open pull requests, marking the ones updated since last time
    List {
        /// Only show pull requests whose title, repository or author contain this text
        #[arg(long, default_value = "")]
        filter: String,
        /// Fetch from GitHub instead of using cached listings
        #[arg(long)]
        refresh: bool,
    },
    /// Store GitHub credentials and refresh right away
    Login {
        username: String,
        /// Personal access token
        #[arg(long, required_unless_present = "password", conflicts_with = "password")]
        token: Option<String>,
        /// Password to exchange for a token
        #[arg(long)]
        password: Option<String>,
    },
    /// Read or change settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print one setting, or all of them
    Get { key: Option<SettingKey> },
    /// Change a setting
    Set { key: SettingKey, value: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    let backend = match cli.store {
        Some(path) => FileBackend::at(path)?,
        None => FileBackend::initialize()?,
    };
    let store = Arc::new(Store::new(backend));
    let app = ReviewLogApp::new(
        store,
        Arc::new(ReqwestTransport::new()?),
        Arc::new(ConsoleBadge),
        Arc::new(ConsoleNotifier),
        cli.pull_concurrency,
    );

    match cli.command {
        Commands::Watch => app.watch().await,
        Commands::List { filter, refresh } => app.list(&filter, refresh).await?,
        Commands::Login {
            username,
            token,
            password,
        } => {
            let secret = match (token, password) {
                (Some(token), _) => LoginSecret::Token(token),
                (None, Some(password)) => LoginSecret::Password(password),
                (None, None) => anyhow::bail!("Either --token or --password is required."),
            };
            app.login(&username, secret).await?;
        }
        Commands::Config { action } => match action {
            ConfigAction::Get { key } => app.config_get(key),
            ConfigAction::Set { key, value } => app.config_set(key, &value)?,
        },
    }

    Ok(())
}

fn init_tracing(debug: bool) {
    let default_filter = if debug {
        "reviewlog=debug"
    } else {
        "reviewlog=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()),
        )
        .with_writer(std::io::stderr)
        .init();
}
