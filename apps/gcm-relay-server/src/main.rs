mod config;
mod credentials;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use gcm_relay::scheduler::DelayScheduler;
use gcm_relay::{Relay, RelayError};
use gcm_transport::PushTransport;
use gcm_transport_xmpp::{XmppError, XmppTransport};
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::flag;
use tracing::{error, info, warn};

use crate::config::ServerConfig;
use crate::credentials::Credentials;

const EXIT_STARTUP: i32 = 1;
const EXIT_DISCONNECTED: i32 = 2;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(long, short)]
    config: Option<PathBuf>,
    /// Path to the credentials JSON file (overrides `credentials_path`)
    #[arg(long)]
    credentials: Option<PathBuf>,
}

fn main() {
    let filter = std::env::var("GCM_RELAY_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();

    let config = match ServerConfig::new(cli.config) {
        Ok(cfg) => cfg,
        Err(err) => {
            error!("failed to load config: {err}");
            std::process::exit(EXIT_STARTUP);
        }
    };

    let credentials_path = cli
        .credentials
        .unwrap_or_else(|| config.credentials_path.clone());
    let credentials = match Credentials::load(&credentials_path) {
        Ok(creds) => creds,
        Err(err) => {
            error!("{err}");
            std::process::exit(EXIT_STARTUP);
        }
    };

    // delayed replies run here; the relay loop itself stays on this thread
    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .thread_name("gcm-relay-timers")
        .enable_time()
        .build()
    {
        Ok(rt) => rt,
        Err(err) => {
            error!("failed to build timer runtime: {err}");
            std::process::exit(EXIT_STARTUP);
        }
    };

    info!(
        "connecting to {}:{} as {}",
        config.server_host, config.server_port, credentials.username
    );
    let transport = match XmppTransport::connect(config.xmpp_config(&credentials)) {
        Ok(transport) => transport,
        Err(XmppError::AuthenticationFailed) => {
            error!("authentication failed");
            std::process::exit(EXIT_STARTUP);
        }
        Err(err) => {
            error!("connection failed: {err}");
            std::process::exit(EXIT_STARTUP);
        }
    };

    let shutdown = Arc::new(AtomicBool::new(false));
    let _ = flag::register(SIGTERM, Arc::clone(&shutdown));
    let _ = flag::register(SIGINT, Arc::clone(&shutdown));

    let mut relay = Relay::new(
        transport,
        config.relay_config(),
        DelayScheduler::new(runtime.handle().clone()),
    );
    info!("relay running, quota {}", config.initial_quota);

    let mut last_health_log = Instant::now();
    let exit_code = loop {
        if shutdown.load(Ordering::Relaxed) {
            info!("shutdown requested");
            break 0;
        }
        match relay.tick() {
            Ok(_) => {}
            Err(RelayError::Disconnected) => {
                let health = relay.transport.health_snapshot();
                warn!(
                    "transport disconnected: {}",
                    health.last_error.as_deref().unwrap_or("no error recorded")
                );
                break EXIT_DISCONNECTED;
            }
        }
        if last_health_log.elapsed() >= config.health_log_interval {
            let health = relay.transport.health_snapshot();
            let pending = relay.outbox().pending();
            let quota = relay.outbox().lock().quota.remaining();
            info!(
                "health: queued={} sent_ok={} sent_err={} received={} dropped={} pending={} quota={} stats={:?}",
                health.outbound_queued,
                health.outbound_send_ok,
                health.outbound_send_err,
                health.inbound_received,
                health.inbound_dropped,
                pending,
                quota,
                relay.stats
            );
            last_health_log = Instant::now();
        }
    };

    info!("final stats: {:?}", relay.stats);
    drop(relay);
    runtime.shutdown_background();
    std::process::exit(exit_code);
}

#[cfg(test)]
mod tests {
    use super::Cli;
    use clap::Parser;
    use std::path::PathBuf;

    #[test]
    fn cli_accepts_no_arguments() {
        let cli = Cli::try_parse_from(["gcm-relay-server"]).expect("parse");
        assert!(cli.config.is_none());
        assert!(cli.credentials.is_none());
    }

    #[test]
    fn cli_parses_config_and_credentials() {
        let cli = Cli::try_parse_from([
            "gcm-relay-server",
            "-c",
            "relay.toml",
            "--credentials",
            "secrets/gcm_auth_info.json",
        ])
        .expect("parse");
        assert_eq!(cli.config, Some(PathBuf::from("relay.toml")));
        assert_eq!(
            cli.credentials,
            Some(PathBuf::from("secrets/gcm_auth_info.json"))
        );
    }

    #[test]
    fn cli_rejects_unknown_flags() {
        assert!(Cli::try_parse_from(["gcm-relay-server", "--bogus"]).is_err());
    }
}
