//! Command implementations for the tether binary.

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use tether_core::{
  Config,
  breaker::{BreakerConfig, CircuitBreaker},
};
use tether_rpc::{ExclusiveRequest, HttpTransport, ProtocolClient};
use tether_sync::{SyncEngine, WatcherConfig, WatcherTask};

fn workspace_root(path: Option<PathBuf>) -> Result<PathBuf> {
  match path {
    Some(path) => Ok(path),
    None => std::env::current_dir().context("could not determine current directory"),
  }
}

fn connect(config: &Config) -> Result<Arc<ProtocolClient<HttpTransport>>> {
  let client = ProtocolClient::connect(config.rpc.clone()).context("failed to set up RPC client")?;
  Ok(Arc::new(client))
}

fn build_engine(config: &Config) -> Result<SyncEngine<HttpTransport>> {
  let client = connect(config)?;
  let breaker = Arc::new(CircuitBreaker::new(BreakerConfig {
    failure_threshold: config.resilience.failure_threshold,
    recovery_timeout: config.resilience.recovery_timeout(),
  }));
  Ok(SyncEngine::new(client, config.sync.clone(), breaker))
}

/// Cancel the token on ctrl-c so long-running commands shut down cleanly.
fn cancel_on_ctrl_c(cancel: CancellationToken) {
  tokio::spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      info!("Interrupt received, shutting down");
      cancel.cancel();
    }
  });
}

pub async fn cmd_scan(path: Option<PathBuf>) -> Result<()> {
  let root = workspace_root(path)?;
  let config = Config::load_for_project(&root);
  let engine = build_engine(&config)?;

  let cancel = CancellationToken::new();
  cancel_on_ctrl_c(cancel.clone());

  let summary = engine.scan(&root, &cancel).await?;

  println!(
    "Indexed {} of {} files in {:.1?} ({} skipped: {} ineligible, {} cached, {} failed)",
    summary.indexed,
    summary.seen,
    summary.elapsed,
    summary.skipped(),
    summary.ineligible,
    summary.cached,
    summary.failed,
  );
  Ok(())
}

pub async fn cmd_watch(path: Option<PathBuf>) -> Result<()> {
  let root = workspace_root(path)?;
  let config = Config::load_for_project(&root);
  let engine = build_engine(&config)?;

  let cancel = CancellationToken::new();
  cancel_on_ctrl_c(cancel.clone());

  let sweeper = engine.spawn_dedup_sweeper(config.resilience.cache_sweep_interval(), cancel.clone());

  let (events_tx, mut events_rx) = mpsc::channel(256);
  let watcher = WatcherTask::spawn(
    WatcherConfig {
      root: root.clone(),
      sync: config.sync.clone(),
    },
    events_tx,
    cancel.clone(),
  )?;

  println!("Watching {} (ctrl-c to stop)", root.display());

  // The watcher drops its sender on shutdown, which ends this loop
  while let Some(event) = events_rx.recv().await {
    engine.handle_event(event).await;
  }

  watcher.await.context("watcher task panicked")?;
  sweeper.await.context("sweeper task panicked")?;
  Ok(())
}

pub async fn cmd_status() -> Result<()> {
  let cwd = std::env::current_dir().context("could not determine current directory")?;
  let config = Config::load_for_project(&cwd);
  let client = connect(&config)?;

  let stats = client.read_resource("tether://index/stats").await?;
  println!("{}", serde_json::to_string_pretty(&stats)?);
  Ok(())
}

pub async fn cmd_ask(prompt: String) -> Result<()> {
  let cwd = std::env::current_dir().context("could not determine current directory")?;
  let config = Config::load_for_project(&cwd);
  let client = connect(&config)?;

  let guard = Arc::new(ExclusiveRequest::new());
  {
    let guard = guard.clone();
    tokio::spawn(async move {
      if tokio::signal::ctrl_c().await.is_ok() {
        guard.cancel();
      }
    });
  }

  let request = guard.run(client.call_tool("ask", serde_json::json!({ "prompt": prompt })));
  let answer = match config.rpc.max_total_timeout() {
    Some(ceiling) => tokio::time::timeout(ceiling, request)
      .await
      .context("request exceeded its total time ceiling")?,
    None => request.await,
  };

  match answer {
    Some(Ok(result)) => {
      match result.get("text").and_then(|t| t.as_str()) {
        Some(text) => println!("{text}"),
        None => println!("{}", serde_json::to_string_pretty(&result)?),
      }
      Ok(())
    }
    Some(Err(e)) => Err(e.into()),
    None => {
      println!("Request cancelled");
      Ok(())
    }
  }
}

pub fn cmd_config_init() -> Result<()> {
  let cwd = std::env::current_dir().context("could not determine current directory")?;
  let path = Config::project_config_path(&cwd);

  if path.exists() {
    anyhow::bail!("{} already exists", path.display());
  }

  std::fs::write(&path, Config::generate_template()).with_context(|| format!("failed to write {}", path.display()))?;
  println!("Wrote {}", path.display());
  Ok(())
}

pub fn cmd_config_show() -> Result<()> {
  let cwd = std::env::current_dir().context("could not determine current directory")?;
  let config = Config::load_for_project(&cwd);

  println!("{}", toml::to_string_pretty(&config)?);
  Ok(())
}
