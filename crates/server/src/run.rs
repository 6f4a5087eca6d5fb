// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Server assembly and main loop.

use std::sync::atomic::AtomicI32;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::bead::BeadClient;
use crate::bridge::{BridgeSettings, SessionBridge};
use crate::bus::EventBus;
use crate::config::Config;
use crate::gateway::ToolGateway;
use crate::lifecycle::{LifecycleManager, LifecycleSettings};
use crate::mux::{MuxAdapter, TmuxMux};
use crate::notify::{NoopNotifier, Notifier, WebhookNotifier};
use crate::registry::SessionRegistry;
use crate::store::MessageStore;
use crate::throttle::{OutputThrottle, ThrottleSettings};
use crate::transport::chat::ChatHub;
use crate::transport::state::{AppState, ServerSettings};
use crate::transport::build_router;

/// Wire every service together over the given mux adapter.
///
/// Separated from [`run`] so tests can assemble the full stack with a
/// fake multiplexer and an ephemeral state directory.
pub fn build_state(
    config: &Config,
    mux: Arc<dyn MuxAdapter>,
    shutdown: CancellationToken,
) -> anyhow::Result<Arc<AppState>> {
    std::fs::create_dir_all(&config.state_dir)
        .with_context(|| format!("creating state dir {}", config.state_dir.display()))?;

    let bus = Arc::new(EventBus::new(1024));
    let registry = Arc::new(SessionRegistry::load(config.registry_path(), Arc::clone(&bus)));
    let lifecycle = Arc::new(LifecycleManager::new(
        Arc::clone(&mux),
        Arc::clone(&registry),
        LifecycleSettings {
            max_sessions: config.max_sessions,
            agent_command: config.agent_command.clone(),
            agent_args: config.effective_agent_args(),
        },
    ));
    let throttle = Arc::new(OutputThrottle::new(ThrottleSettings {
        flush_interval: config.flush_interval(),
        max_batch: config.max_batch,
        persist_logs: config.persist_logs,
        log_dir: config.log_dir(),
    }));
    let bridge = Arc::new(SessionBridge::new(
        Arc::clone(&mux),
        Arc::clone(&registry),
        Arc::clone(&lifecycle),
        Arc::clone(&throttle),
        Arc::clone(&bus),
        BridgeSettings {
            poll_interval: config.poll_interval(),
            ..Default::default()
        },
        shutdown.clone(),
    ));
    let store = Arc::new(
        MessageStore::open(&config.db_path())
            .with_context(|| format!("opening message store {}", config.db_path().display()))?,
    );
    let notifier: Arc<dyn Notifier> = match config.push_webhook {
        Some(ref url) => Arc::new(WebhookNotifier::new(url.clone())),
        None => Arc::new(NoopNotifier),
    };
    let gateway = Arc::new(ToolGateway::new(
        Arc::clone(&store),
        Arc::clone(&bus),
        notifier,
    ));
    let bead = Arc::new(BeadClient::new(config.bead_binary.clone()).with_timeout(config.bead_timeout()));
    let chat = Arc::new(ChatHub::new());
    chat.spawn_bus_forwarder(&bus);

    Ok(Arc::new(AppState {
        settings: ServerSettings {
            api_keys: config.api_keys.clone(),
            auth_timeout: config.auth_timeout(),
        },
        bus,
        registry,
        bridge,
        store,
        bead,
        gateway,
        chat,
        sse_clients: AtomicI32::new(0),
        started_at: Instant::now(),
        shutdown,
    }))
}

/// Startup sequence shared by the binary and the in-process test harness:
/// reconcile registry liveness, discover stray mux sessions, start taps.
pub async fn start_services(state: &Arc<AppState>, discover_prefix: Option<&str>) {
    let lifecycle = state.bridge.lifecycle();
    lifecycle.recover().await;
    let discovered = lifecycle.discover_sessions(discover_prefix).await;
    if !discovered.is_empty() {
        tracing::info!(count = discovered.len(), "discovered existing mux sessions");
    }
    state.bridge.start();
}

/// Run the server until shutdown.
pub async fn run(config: Config) -> anyhow::Result<()> {
    config.validate()?;

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutdown signal received");
                shutdown.cancel();
            }
        });
    }

    let mux: Arc<dyn MuxAdapter> = match config.tmux_socket {
        Some(ref socket) => Arc::new(TmuxMux::with_socket(socket.clone())),
        None => Arc::new(TmuxMux::new()),
    };
    let state = build_state(&config, mux, shutdown.clone())?;
    start_services(&state, config.discover_prefix.as_deref()).await;

    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(addr = %addr, sessions = state.registry.len(), "attache listening");

    let router = build_router(Arc::clone(&state));
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .await?;

    state.bridge.stop();
    Ok(())
}
