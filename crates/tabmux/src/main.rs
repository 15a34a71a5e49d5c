//! Attach the current terminal to a remote shell host over a Unix socket.
//!
//! Usage: tabmux [--config PATH] [--socket-dir DIR] [--session ID] <target>

use std::io;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::AsyncReadExt;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tabmux::transport::unix::{socket_exists, UnixConnector};
use tabmux::{Config, Geometry, LineSink, Registry, Session};

const STDIN_CHUNK: usize = 4096;

#[derive(Debug, Parser)]
#[command(name = "tabmux", version, about = "Attach to a remote terminal session")]
struct Cli {
    /// Config file (default: ~/.tabmux/config.toml)
    #[arg(long, env = "TABMUX_CONFIG")]
    config: Option<PathBuf>,

    /// Directory holding `<target>.sock` endpoints
    #[arg(long, env = "TABMUX_SOCKET_DIR")]
    socket_dir: Option<PathBuf>,

    /// Stable session id (default: `<target>-<pid>`)
    #[arg(long)]
    session: Option<String>,

    /// Remote host name
    target: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(err) = run(cli).await {
        eprintln!("tabmux: {err:#}");
        process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = Config::load_or_default(cli.config.as_deref())
        .context("failed to load configuration")?;
    if let Some(dir) = cli.socket_dir {
        config.transport.socket_dir = Some(dir);
    }
    init_logging(&config.log.filter)?;

    let socket_dir = config.socket_dir();
    if !socket_exists(&socket_dir, &cli.target) {
        warn!(
            target_host = %cli.target,
            dir = %socket_dir.display(),
            "no socket for target yet, connection will likely fail"
        );
    }

    let session_id = cli
        .session
        .unwrap_or_else(|| format!("{}-{}", cli.target, process::id()));
    let max_lines = config.scrollback.max_lines;

    let registry = Registry::new(Arc::new(UnixConnector::new(socket_dir)), config)
        .context("invalid configuration")?
        .with_listener(|id, connected| info!(session = id, connected, "connectivity changed"));
    let session = registry.acquire_or_create(&session_id, &cli.target, || {
        let sink = LineSink::new(max_lines)
            .with_mirror(tokio::io::stdout())
            .with_geometry_source(terminal_geometry);
        match terminal_geometry() {
            Some(geometry) => sink.with_geometry(geometry),
            None => sink,
        }
    });
    session.set_active(true);

    tokio::spawn(forward_stdin(session.clone()));

    let mut winch = signal(SignalKind::window_change()).context("failed to watch SIGWINCH")?;
    let mut terminate = signal(SignalKind::terminate()).context("failed to watch SIGTERM")?;

    loop {
        tokio::select! {
            _ = winch.recv() => session.request_resize(),
            _ = terminate.recv() => {
                info!("received SIGTERM");
                break;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("received interrupt");
                break;
            }
            state = session.wait_for(|s| s.is_finished()) => {
                info!(%state, "session finished");
                break;
            }
        }
    }

    registry.dispose_all();
    Ok(())
}

fn init_logging(default_filter: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .with_context(|| format!("invalid log filter {default_filter:?}"))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
    Ok(())
}

/// Stdin closing ends input forwarding but not the session.
async fn forward_stdin(session: Session) {
    let mut stdin = tokio::io::stdin();
    let mut buf = vec![0u8; STDIN_CHUNK];
    loop {
        match stdin.read(&mut buf).await {
            Ok(0) => return,
            Ok(n) => session.send_input(String::from_utf8_lossy(&buf[..n]).into_owned()),
            Err(err) => {
                warn!(error = %err, "stdin read failed");
                return;
            }
        }
    }
}

// ── Terminal size (libc) ────────────────────────────────────────────

fn terminal_geometry() -> Option<Geometry> {
    let mut ws = libc::winsize {
        ws_row: 0,
        ws_col: 0,
        ws_xpixel: 0,
        ws_ypixel: 0,
    };
    let rc = unsafe { libc::ioctl(libc::STDOUT_FILENO, libc::TIOCGWINSZ, &mut ws) };
    if rc != 0 || ws.ws_row == 0 || ws.ws_col == 0 {
        return None;
    }
    Some(Geometry::new(ws.ws_row, ws.ws_col))
}
