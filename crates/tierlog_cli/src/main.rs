use std::io::{self, Write};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tierlog::config::config_path;
use tierlog::logging::init_tracing;
use tierlog::{CancelToken, CompactionController, ConfigSource};
use tierlog_cli::cli::{Cli, Commands};
use tierlog_cli::commands::{self, CompactOptions, Workspace};
use tierlog_cli::summarizers::summarizer_for_config;
use tierlog_cli::watch::{run_watch, WatchOptions, WatchState};
use time::OffsetDateTime;
use tracing::Level;

fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    init_tracing(cli.json, level);

    let config_file = match cli.config.clone() {
        Some(path) => path,
        None => config_path().context("Failed to locate the configuration file")?,
    };
    let config_source = ConfigSource::open(Some(config_file.clone()))
        .with_context(|| format!("Failed to load {}", config_file.display()))?;
    let workspace = match &cli.sessions_dir {
        Some(dir) => Workspace::at(config_source.current(), dir),
        None => Workspace::new(config_source.current())?,
    };
    let now = OffsetDateTime::now_utc();

    let output = match cli.command {
        Commands::List => commands::cmd_list(&workspace)?,
        Commands::Show { session } => commands::cmd_show(&workspace, &session, now)?,
        Commands::History {
            session,
            limit,
            role,
        } => commands::cmd_history(&workspace, &session, limit, role.map(Into::into))?,
        Commands::Stats { session } => commands::cmd_stats(&workspace, &session)?,
        Commands::Backup { session } => commands::cmd_backup(&workspace, &session, now)?,
        Commands::Compact {
            session,
            mode,
            check,
            provider,
        } => {
            let summarizer = summarizer_for_config(&workspace.config.api, provider.as_deref())?;
            let options = CompactOptions {
                mode: mode.map(Into::into),
                check,
            };
            commands::cmd_compact(&workspace, &session, summarizer.as_ref(), options, now)?
        }
        Commands::Ingest { session, source } => {
            commands::cmd_ingest(&workspace, &session, source.as_deref(), now)?
        }
        Commands::DeleteLines { session, lines } => {
            commands::cmd_delete_lines(&workspace, &session, &lines, now)?
        }
        Commands::DeleteFirst { session, count } => {
            commands::cmd_delete_first(&workspace, &session, count, now)?
        }
        Commands::DeleteLast { session, count } => {
            commands::cmd_delete_last(&workspace, &session, count, now)?
        }
        Commands::Truncate { session, keep } => {
            commands::cmd_truncate(&workspace, &session, keep, now)?
        }
        Commands::Watch {
            session,
            auto,
            ingest,
            duration,
            provider,
        } => {
            let summarizer = summarizer_for_config(&workspace.config.api, provider.as_deref())?;
            let handle = workspace.open(&session)?;
            let options = WatchOptions {
                auto,
                ingest,
                duration: duration.map(Duration::from_secs),
            };
            let state = WatchState::new(
                config_source,
                handle,
                CompactionController::new(summarizer),
                &options,
                io::stdout(),
            );
            run_watch(state, &options, &CancelToken::new());
            String::new()
        }
    };

    let mut stdout = io::stdout().lock();
    stdout.write_all(output.as_bytes())?;
    stdout.flush()?;
    Ok(())
}
