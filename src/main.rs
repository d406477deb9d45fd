//! CLI entry point for repofetch.

use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use clap::Parser;
use repofetch_core::{FetchEngine, RepositoryError, RepositoryId};
use serde::Serialize;
use tracing::{debug, info, warn};

mod app_config;
mod cli;
mod progress;

use app_config::{EnvConfig, FileConfig};
use cli::{Args, Command, DownloadArgs};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    // stdout carries only JSON results
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    debug!(
        repo_id = args.command.repo_id(),
        command = ?args.command,
        "CLI arguments parsed"
    );

    let file_config = match &args.config {
        Some(path) => app_config::load_file_config(path)?,
        None => {
            let loaded = app_config::load_default_file_config()?;
            if loaded.loaded_from_file {
                debug!(path = ?loaded.path, "loaded config file");
            }
            loaded.config.unwrap_or_default()
        }
    };
    let env_config = EnvConfig::from_env();

    let engine_config = app_config::build_engine_config(
        args.token.as_deref(),
        args.endpoint.as_deref(),
        &env_config,
        &file_config,
    )?;
    let engine = match FetchEngine::new(engine_config) {
        Ok(engine) => engine,
        Err(error) => return emit_error(&error),
    };

    match &args.command {
        Command::List(list) => {
            let options = list.to_options(&file_config);
            emit(engine.list(&list.selection.repo_id, &options).await)
        }
        Command::Explore(explore) => {
            let options = explore.to_options(&file_config);
            let result = engine.explore(&explore.repo_id, &options).await;
            if let Ok(tree) = &result
                && let Some(view) = &tree.tree_view
                && !args.quiet
            {
                eprint!("{view}");
            }
            emit(result)
        }
        Command::Download(download) => {
            run_download(&engine, download, &env_config, &file_config, args.quiet).await
        }
    }
}

async fn run_download(
    engine: &FetchEngine,
    args: &DownloadArgs,
    env_config: &EnvConfig,
    file_config: &FileConfig,
    quiet: bool,
) -> Result<ExitCode> {
    let repo = match RepositoryId::parse(&args.selection.repo_id) {
        Ok(repo) => repo,
        Err(error) => return emit_error(&error),
    };
    let target_dir = app_config::resolve_target_dir(
        args.target_dir.as_deref(),
        &repo,
        env_config,
        file_config,
    );
    info!(repo = %repo, target_dir = %target_dir.display(), "starting download");

    let cancel = Arc::new(AtomicBool::new(false));
    spawn_interrupt_handler(Arc::clone(&cancel));

    let (progress_tx, progress_handle) = progress::spawn_progress_ui(!args.no_progress && !quiet);
    let mut options = args.to_options(file_config).with_cancel(cancel);
    if let Some(tx) = progress_tx {
        options = options.with_progress(tx);
    }

    let result = engine.download(repo.as_str(), &target_dir, &options).await;

    // Closes the progress channel.
    drop(options);
    if let Some(handle) = progress_handle
        && let Err(error) = handle.await
    {
        warn!(error = %error, "progress UI task failed");
    }

    if let Ok(report) = &result
        && report.is_partial()
    {
        warn!(summary = %report.summary, "download finished with failures");
    }
    emit(result)
}

/// First Ctrl-C stops admitting new transfers; running ones finish or fail.
fn spawn_interrupt_handler(cancel: Arc<AtomicBool>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, finishing in-flight downloads");
            cancel.store(true, Ordering::SeqCst);
        }
    });
}

fn emit<T: Serialize>(result: Result<T, RepositoryError>) -> Result<ExitCode> {
    match result {
        Ok(value) => {
            let json = serde_json::to_string_pretty(&value).context("Failed to encode result")?;
            println!("{json}");
            Ok(ExitCode::SUCCESS)
        }
        Err(error) => emit_error(&error),
    }
}

fn emit_error(error: &RepositoryError) -> Result<ExitCode> {
    let json = serde_json::to_string_pretty(&error.to_json()).context("Failed to encode error")?;
    println!("{json}");
    debug!(code = %error.code().as_str(), "command failed");
    Ok(ExitCode::FAILURE)
}
