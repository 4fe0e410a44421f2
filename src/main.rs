use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, warn};

use roombook::config::Config;
use roombook::console::{Command, Session, parse_line};
use roombook::engine::Engine;
use roombook::model::Notice;
use roombook::notify::NotifyHub;
use roombook::reaper;
use roombook::slots::SlotCatalog;
use roombook::snapshot::JsonFileStore;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env();
    roombook::observability::init(config.metrics_port);

    let catalog = SlotCatalog::generate(config.slot_minutes, config.day_start, config.day_end)?;

    // Ensure data directory exists
    std::fs::create_dir_all(&config.data_dir)?;

    let store = Arc::new(JsonFileStore::new(&config.data_dir));
    let notify = Arc::new(NotifyHub::new());
    let engine = Arc::new(Engine::open(store, notify.clone(), config.engine_options()).await?);

    info!("roombook ready");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  slots: {} every {} min", catalog.len(), catalog.interval());
    info!("  sweep: every {}s", config.sweep_period.as_secs());
    info!(
        "  history: {}",
        config
            .history_limit
            .map_or("unbounded".to_string(), |n| format!("{n} commands"))
    );

    if engine.users.needs_bootstrap().await {
        match (&config.admin_user, &config.admin_password) {
            (Some(user), Some(password)) => match engine.users.bootstrap_admin(user, password).await {
                Ok(admin) => info!(username = %admin.username, "admin account bootstrapped from environment"),
                Err(e) => warn!("admin bootstrap from environment failed: {e}"),
            },
            _ => warn!("no admin account exists; run 'bootstrap <user> <password> <confirm>'"),
        }
    }

    tokio::spawn(reaper::run_sweeper(engine.clone(), config.sweep_period));
    tokio::spawn(reaper::run_daily_reset(engine.clone()));
    tokio::spawn(log_displacements(notify.subscribe_all()));

    let mut session = Session::new(engine.clone(), Arc::new(catalog));
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    // Graceful shutdown on SIGTERM/ctrl-c or end of input
    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = ctrl_c => {}
                        _ = sigterm.recv() => {}
                    }
                }
                Err(e) => {
                    warn!("SIGTERM handler not registered: {e}");
                    ctrl_c.await.ok();
                }
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
        }
    };
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let quit = matches!(parse_line(&line), Ok(Command::Quit));
                let reply = match session.handle_line(&line).await {
                    Ok(Some(out)) => out,
                    Ok(None) => continue,
                    Err(e) => format!("error: {e}"),
                };
                stdout.write_all(reply.as_bytes()).await?;
                stdout.write_all(b"\n").await?;
                stdout.flush().await?;
                if quit {
                    break;
                }
            }
            _ = &mut shutdown => {
                info!("shutdown signal received");
                break;
            }
        }
    }

    info!("roombook stopped");
    Ok(())
}

/// Tell the operator whenever a booking is overridden.
async fn log_displacements(mut rx: tokio::sync::broadcast::Receiver<Notice>) {
    use tokio::sync::broadcast::error::RecvError;
    loop {
        match rx.recv().await {
            Ok(Notice::Displaced {
                room,
                purpose,
                date,
                range,
                leader,
                ..
            }) => {
                info!(%room, %date, %range, %purpose, %leader, "booking overridden by a higher-priority reservation");
            }
            Ok(_) => {}
            Err(RecvError::Lagged(n)) => warn!("notice listener lagged, {n} notices skipped"),
            Err(RecvError::Closed) => break,
        }
    }
}
