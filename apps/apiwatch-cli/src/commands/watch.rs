use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use apiwatch_core::protocol::EventKind;
use apiwatch_core::{callback, HttpTransport, MemoryCache, StaticTokens, Watcher};
use apiwatch_events::{topics, Bus, Envelope};
use clap::Args;
use tokio::sync::broadcast::{error::RecvError, Receiver};

use super::{parse_token, TargetArgs};

#[derive(Args)]
pub struct WatchArgs {
    #[command(flatten)]
    pub target: TargetArgs,
    /// Only report responses whose content changed
    #[arg(long)]
    pub changes_only: bool,
    /// Access tokens as user=token (repeatable)
    #[arg(long = "token", value_parser = parse_token)]
    pub tokens: Vec<(String, String)>,
}

/// Poll the batch until Ctrl+C, logging every event.
pub async fn run(args: WatchArgs) -> Result<()> {
    let config = args.target.config()?;
    let transport =
        HttpTransport::new(&config.http, config.token.clone()).context("building http client")?;
    let tokens = args
        .tokens
        .iter()
        .fold(StaticTokens::new(), |acc, (user, token)| acc.with_token(user, token));
    let cache = Arc::new(
        MemoryCache::new(Arc::new(transport), Arc::new(tokens))
            .with_error_ttl(Duration::from_secs(config.http.error_expiry_secs)),
    );
    let bus = Bus::new(config.event_bus_capacity);
    let watcher = Watcher::new(args.target.document()?, cache, &config, Some(bus.clone()));

    let kind = if args.changes_only {
        EventKind::Change
    } else {
        EventKind::Update
    };
    let on_event = callback(move |current, previous| {
        tracing::info!(
            event = %kind,
            version = current.version().unwrap_or("-"),
            previous = previous.and_then(|p| p.version()).unwrap_or("-"),
            expires_at = %current.expires_at(),
            bytes = current.body().map(str::len).unwrap_or(0),
            "response"
        );
    });
    let requests = watcher
        .watch(
            args.target.method,
            &args.target.path,
            &args.target.bundle(),
            kind,
            on_event,
        )
        .await?;
    for request in &requests {
        tracing::info!(id = %request.id().short(), %request, user = %request.user(), "watching");
    }

    let failures = tokio::spawn(forward_failures(bus.subscribe(), |env| {
        tracing::warn!(kind = %env.kind, payload = %env.payload, "poll event");
    }));

    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutting down");
    watcher.shutdown().await;
    failures.abort();
    Ok(())
}

/// Hand failed and dropped polls to `report` until the bus closes.
async fn forward_failures(mut rx: Receiver<Envelope>, mut report: impl FnMut(&Envelope)) {
    loop {
        match rx.recv().await {
            Ok(env) => {
                if env.kind == topics::TOPIC_POLL_FAILED || env.kind == topics::TOPIC_POLL_DROPPED {
                    report(&env);
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "poll events lagged");
            }
            Err(RecvError::Closed) => break,
        }
    }
}
