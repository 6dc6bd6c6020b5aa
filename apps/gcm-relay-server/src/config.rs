use config::{Config, ConfigError, Environment, File};
use gcm_relay::RelayConfig;
use gcm_transport_xmpp::XmppConfig;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::credentials::Credentials;

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub server_host: String,
    pub server_port: u16,
    pub server_domain: String,
    pub credentials_path: PathBuf,
    pub initial_quota: u32,
    pub clamp_quota: bool,
    #[serde(with = "humantime_serde")]
    pub process_timeout: Duration,
    pub max_inbound_batch: usize,
    #[serde(with = "humantime_serde")]
    pub reply_delay: Duration,
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub health_log_interval: Duration,
    pub inbound_queue_capacity: usize,
    pub outbound_queue_capacity: usize,
}

impl ServerConfig {
    pub fn new(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .set_default("server_host", "gcm.googleapis.com")?
            .set_default("server_port", 5235)?
            .set_default("server_domain", "gcm.googleapis.com")?
            .set_default("credentials_path", "gcm_auth_info.json")?
            .set_default("initial_quota", 1000)?
            .set_default("clamp_quota", true)?
            .set_default("process_timeout", "1s")?
            .set_default("max_inbound_batch", 64)?
            .set_default("reply_delay", "30s")?
            .set_default("connect_timeout", "10s")?
            .set_default("health_log_interval", "30s")?
            .set_default("inbound_queue_capacity", 4096)?
            .set_default("outbound_queue_capacity", 1024)?;

        if let Some(path) = config_path {
            if path.extension().and_then(|ext| ext.to_str()) == Some("env") {
                // .env files feed the environment source below
                match dotenvy::from_path(&path) {
                    Ok(_) => tracing::info!("loaded environment from {}", path.display()),
                    Err(err) => {
                        tracing::warn!("failed to load .env from {}: {}", path.display(), err)
                    }
                }
            } else {
                builder = builder.add_source(File::from(path));
            }
        }

        builder = builder.add_source(Environment::with_prefix("GCM_RELAY").try_parsing(true));

        builder.build()?.try_deserialize()
    }

    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            initial_quota: self.initial_quota,
            clamp_quota: self.clamp_quota,
            process_timeout: self.process_timeout,
            max_inbound_batch: self.max_inbound_batch,
            reply_delay: self.reply_delay,
        }
    }

    pub fn xmpp_config(&self, credentials: &Credentials) -> XmppConfig {
        let mut xmpp = XmppConfig::new(&credentials.username, &credentials.password);
        xmpp.host = self.server_host.clone();
        xmpp.port = self.server_port;
        xmpp.domain = self.server_domain.clone();
        xmpp.connect_timeout = self.connect_timeout;
        xmpp.inbound_queue_capacity = self.inbound_queue_capacity;
        xmpp.outbound_queue_capacity = self.outbound_queue_capacity;
        xmpp
    }
}
