use std::io;
use std::net::IpAddr;
use std::sync::Arc;
use std::thread;

use clap::Parser;
use env_logger::Builder;
use log::{debug, info, warn, LevelFilter};
use signal_hook::consts::{SIGHUP, SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};

use bgpd_injector::api::{self, AppState};
use bgpd_injector::config::{self, ConfigError, Secret};
use bgpd_injector::registry::PeerRegistry;
use bgpd_injector::session::{SessionManager, TcpConnector};
use bgpd_injector::ServerConfig;

#[derive(Parser, Debug)]
#[clap(name = "bgpd-injector", rename_all = "kebab-case")]
/// BGP update injection service
struct Args {
    /// Path to config.toml
    config_path: String,
    /// Host address for the HTTP API (overrides config)
    #[clap(long)]
    bind_host: Option<IpAddr>,
    /// Host port for the HTTP API (overrides config)
    #[clap(long)]
    bind_port: Option<u16>,
    /// API Basic Auth username (overrides config)
    #[clap(long)]
    username: Option<String>,
    /// API Basic Auth password (overrides config)
    #[clap(long)]
    password: Option<String>,
    /// Show debug logs (additive for trace logs)
    #[clap(short, parse(from_occurrences))]
    verbose: u8,
}

enum Control {
    Reload,
    Shutdown,
}

fn load_config(args: &Args) -> io::Result<ServerConfig> {
    let mut config = config::from_file(&args.config_path).map_err(|err| match err {
        ConfigError::Io(err) => err,
        other => io::Error::new(io::ErrorKind::InvalidData, other.to_string()),
    })?;
    if let Some(bind_host) = args.bind_host {
        config.api.bind_host = bind_host;
    }
    if let Some(bind_port) = args.bind_port {
        config.api.bind_port = bind_port;
    }
    if let Some(username) = &args.username {
        config.api.username = username.clone();
    }
    if let Some(password) = &args.password {
        config.api.password = Secret::new(password.clone());
    }
    Ok(config)
}

/// Forward process signals into the runtime
fn control_channel() -> io::Result<mpsc::UnboundedReceiver<Control>> {
    let mut signals = Signals::new(&[SIGHUP, SIGINT, SIGTERM])?;
    let (tx, rx) = mpsc::unbounded_channel();
    thread::spawn(move || {
        for signal in signals.forever() {
            let control = match signal {
                SIGHUP => Control::Reload,
                _ => Control::Shutdown,
            };
            if tx.send(control).is_err() {
                break;
            }
        }
    });
    Ok(rx)
}

fn main() -> io::Result<()> {
    let args = Args::parse();

    let (crate_level, other_level) = match args.verbose {
        0 => (LevelFilter::Info, LevelFilter::Warn),
        1 => (LevelFilter::Debug, LevelFilter::Warn),
        2 => (LevelFilter::Trace, LevelFilter::Warn),
        _ => (LevelFilter::Trace, LevelFilter::Trace),
    };
    Builder::new()
        .filter(Some("bgpd_injector"), crate_level)
        .filter(None, other_level)
        .init();
    info!("Logging at levels {}/{}", crate_level, other_level);

    let config = load_config(&args)?;
    debug!("Found {} peers in {}", config.peers.len(), args.config_path);
    let controls = control_channel()?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run(args, config, controls))
}

async fn run(
    args: Args,
    config: ServerConfig,
    mut controls: mpsc::UnboundedReceiver<Control>,
) -> io::Result<()> {
    let config = Arc::new(config);
    let registry = PeerRegistry::new();
    let connector = Arc::new(TcpConnector::new(config.bgp.connect_timeout));
    let manager = Arc::new(SessionManager::new(
        Arc::clone(&config),
        registry.clone(),
        connector,
    ));

    if config.bgp.listen {
        let listener = TcpListener::bind(config.bgp.listen_addr()).await?;
        info!("Listening for BGP connections on {}", listener.local_addr()?);
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.listen(listener).await });
    }
    manager.start().await;

    let api_listener = TcpListener::bind(config.api.socket_addr()).await?;
    let (stop_api, api_stopped) = oneshot::channel::<()>();
    let state = AppState::new(registry, Arc::new(config.api.clone()));
    let api_server = tokio::spawn(api::serve(api_listener, state, async {
        let _ = api_stopped.await;
    }));

    while let Some(control) = controls.recv().await {
        match control {
            Control::Reload => {
                info!("Reloading config from {}", args.config_path);
                match load_config(&args) {
                    Ok(new_config) => manager.apply_config(Arc::new(new_config)).await,
                    Err(err) => warn!("Keeping current config, unable to reload: {}", err),
                }
            }
            Control::Shutdown => break,
        }
    }

    info!("Stopping bgpd-injector...");
    manager.shutdown().await;
    let _ = stop_api.send(());
    match api_server.await {
        Ok(result) => result,
        Err(err) => {
            warn!("API server task failed: {}", err);
            Ok(())
        }
    }
}
