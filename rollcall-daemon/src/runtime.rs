use std::fs;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{TcpListener, UnixListener, UnixStream};
use tokio::sync::broadcast;

use rollcall_core::Config;
use rollcall_store::Context;

use crate::error::{io_err, DaemonError};
use crate::http::{self, publish_refresh};
use crate::paths::{rollcall_root, socket_path};
use crate::protocol::{DaemonRequest, DaemonResponse};
use crate::seed::SeedFile;

/// What the control socket needs to answer requests.
#[derive(Debug, Clone)]
struct ControlState {
    ctx: Context,
    bind: String,
    started_at_unix: u64,
}

/// Load config for `home`, start the daemon runtime and block the current
/// thread until it exits.
pub fn start_blocking(home: &Path) -> Result<(), DaemonError> {
    init_tracing();
    let mut config = Config::load_at(home)?;
    config.apply_env(|key| std::env::var(key).ok())?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(home.to_path_buf(), config))
}

/// Run the daemon runtime until ctrl-c or a `stop` request.
pub async fn run(home: PathBuf, config: Config) -> Result<(), DaemonError> {
    let root = rollcall_root(&home);
    if !root.exists() {
        fs::create_dir_all(&root).map_err(|e| io_err(&root, e))?;
    }

    let seed_path = config.server.seed_path.clone();
    let keepalive = Duration::from_secs(config.notify.keepalive_interval_secs.max(1));
    let sweep = Duration::from_secs(config.cache.sweep_interval_secs.max(1));
    let (ctx, backends) = Context::in_memory(config);
    if let Some(path) = seed_path {
        let created = SeedFile::load(&path)?.apply(&backends);
        tracing::info!(path = %path.display(), tables = created, "seed fixture loaded");
    }

    let addr: SocketAddr = ctx
        .config
        .server
        .bind
        .parse()
        .map_err(|_| DaemonError::Bind(ctx.config.server.bind.clone()))?;
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| io_err(ctx.config.server.bind.as_str(), e))?;
    let bound = listener
        .local_addr()
        .map_err(|e| io_err(ctx.config.server.bind.as_str(), e))?;
    tracing::info!(addr = %bound, "http listening");

    let control = ControlState {
        ctx: ctx.clone(),
        bind: bound.to_string(),
        started_at_unix: unix_seconds_now(),
    };
    let (shutdown_tx, _) = broadcast::channel::<()>(16);

    let http_handle = {
        let shutdown = shutdown_tx.clone();
        let shutdown_rx = shutdown.subscribe();
        let ctx = ctx.clone();
        tokio::spawn(async move {
            let result = http_task(listener, ctx, shutdown_rx).await;
            let _ = shutdown.send(());
            result
        })
    };

    let socket_handle = {
        let shutdown = shutdown_tx.clone();
        let shutdown_rx = shutdown.subscribe();
        let home = home.clone();
        tokio::spawn(async move {
            let result = socket_server_task(home, control, shutdown.clone(), shutdown_rx).await;
            let _ = shutdown.send(());
            result
        })
    };

    let keepalive_handle = {
        let shutdown_rx = shutdown_tx.subscribe();
        let hub = ctx.hub.clone();
        tokio::spawn(async move {
            periodic(keepalive, shutdown_rx, move || {
                let report = hub.keepalive_tick();
                if !report.evicted.is_empty() {
                    tracing::info!(
                        delivered = report.delivered,
                        evicted = report.evicted.len(),
                        "keep-alive evicted subscribers"
                    );
                }
            })
            .await
        })
    };

    let sweep_handle = {
        let shutdown_rx = shutdown_tx.subscribe();
        let cache = ctx.cache.clone();
        tokio::spawn(async move {
            periodic(sweep, shutdown_rx, move || {
                let purged = cache.purge_expired();
                if purged > 0 {
                    tracing::debug!(purged, "expired cache entries swept");
                }
            })
            .await
        })
    };

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        let mut shutdown_rx = shutdown.subscribe();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown_rx.recv() => Ok(()),
                signal = tokio::signal::ctrl_c() => {
                    match signal {
                        Ok(()) => {
                            tracing::info!("received ctrl-c, shutting down daemon");
                            let _ = shutdown.send(());
                            Ok(())
                        }
                        Err(err) => Err(DaemonError::Protocol(format!("ctrl-c handler failed: {err}"))),
                    }
                }
            }
        })
    };

    let (http_result, socket_result, keepalive_result, sweep_result, signal_result) = tokio::join!(
        http_handle,
        socket_handle,
        keepalive_handle,
        sweep_handle,
        signal_handle
    );

    handle_join("http", http_result)?;
    handle_join("socket_server", socket_result)?;
    handle_join("keepalive", keepalive_result)?;
    handle_join("cache_sweep", sweep_result)?;
    handle_join("signal_handler", signal_result)?;
    tracing::info!("daemon stopped");
    Ok(())
}

/// Serve HTTP until shutdown. Closing the hub ends every event stream so the
/// graceful shutdown does not wait on long-lived subscribers.
async fn http_task(
    listener: TcpListener,
    ctx: Context,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let hub = ctx.hub.clone();
    axum::serve(listener, http::router(ctx))
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
            let closed = hub.close_all();
            tracing::info!(closed, "event streams closed for shutdown");
        })
        .await
        .map_err(|e| io_err("http server", e))
}

/// Call `tick` every `period` until shutdown. The first tick fires one full
/// period after start.
async fn periodic<F>(
    period: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
    mut tick: F,
) -> Result<(), DaemonError>
where
    F: FnMut() + Send,
{
    let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = interval.tick() => tick(),
        }
    }
    Ok(())
}

async fn socket_server_task(
    home: PathBuf,
    state: ControlState,
    shutdown_tx: broadcast::Sender<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let root = rollcall_root(&home);
    if !root.exists() {
        fs::create_dir_all(&root).map_err(|e| io_err(&root, e))?;
    }

    let socket = socket_path(&home);
    prepare_socket_for_bind(&socket)?;

    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let state = state.clone();
                let shutdown_tx = shutdown_tx.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_socket_client(stream, state, shutdown_tx).await {
                        tracing::error!(error = %err, "socket client error");
                    }
                });
            }
        }
    }

    if socket.exists() {
        let _ = fs::remove_file(&socket);
    }
    Ok(())
}

async fn handle_socket_client(
    stream: UnixStream,
    state: ControlState,
    shutdown_tx: broadcast::Sender<()>,
) -> Result<(), DaemonError> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| io_err("daemon socket read", e))?
    {
        if line.trim().is_empty() {
            continue;
        }

        let request: DaemonRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(err) => {
                write_response(
                    &mut writer,
                    &DaemonResponse::error(format!("invalid request JSON: {err}")),
                )
                .await?;
                continue;
            }
        };

        let response = match request.cmd.as_str() {
            "status" => DaemonResponse::ok(build_status_payload(&state)),
            "publish" => match request.table.as_deref().map(str::trim) {
                Some(table) if !table.is_empty() => {
                    publish_refresh(&state.ctx, table);
                    tracing::info!(table, "refresh published from control socket");
                    DaemonResponse::ok(json!({ "table": table }))
                }
                _ => DaemonResponse::error("publish requires a table name"),
            },
            "flush" => {
                let entries = state.ctx.cache.len();
                state.ctx.flush_caches();
                tracing::info!(entries, "cache flushed from control socket");
                DaemonResponse::ok(json!({ "flushed": entries }))
            }
            "stop" => {
                let _ = shutdown_tx.send(());
                DaemonResponse::ok(json!({ "stopping": true }))
            }
            other => DaemonResponse::error(format!("unknown command '{other}'")),
        };

        write_response(&mut writer, &response).await?;
        if request.cmd == "stop" {
            break;
        }
    }

    Ok(())
}

fn build_status_payload(state: &ControlState) -> Value {
    let hub = &state.ctx.hub;
    json!({
        "running": true,
        "bind": state.bind,
        "subscribers": hub.current_subscriber_names(),
        "connections": hub.connection_count(),
        "cache_entries": state.ctx.cache.len(),
        "dev_mode": state.ctx.config.dev_mode,
        "started_at_unix": state.started_at_unix,
    })
}

fn prepare_socket_for_bind(socket: &Path) -> Result<(), DaemonError> {
    if !socket.exists() {
        return Ok(());
    }

    match StdUnixStream::connect(socket) {
        Ok(_) => {
            return Err(DaemonError::Protocol(format!(
                "daemon socket already in use: {}",
                socket.display()
            )));
        }
        Err(err) => {
            tracing::warn!(
                socket = %socket.display(),
                error = %err,
                "removing stale daemon socket before bind",
            );
        }
    }

    match fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(socket, err)),
    }
}

async fn write_response(
    writer: &mut OwnedWriteHalf,
    response: &DaemonResponse,
) -> Result<(), DaemonError> {
    let payload = serde_json::to_string(response)?;
    writer
        .write_all(payload.as_bytes())
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .write_all(b"\n")
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .flush()
        .await
        .map_err(|e| io_err("daemon socket flush", e))?;
    Ok(())
}

fn handle_join(
    task: &str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Protocol(format!(
            "{task} task join failure: {err}"
        ))),
    }
}

fn unix_seconds_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[cfg(unix)]
fn set_socket_permissions(path: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_socket_permissions(_path: &Path) -> Result<(), DaemonError> {
    Ok(())
}
