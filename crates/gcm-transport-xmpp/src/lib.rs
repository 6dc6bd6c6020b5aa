//! XMPP transport for the GCM cloud connection server.
//!
//! Provides a `PushTransport` backed by one TLS-wrapped XMPP session that
//! authenticates with SASL PLAIN. The session runs on a worker thread with
//! its own tokio runtime; the relay loop talks to it through bounded queues.

pub mod stanza;
mod session;

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use gcm_transport::{PushTransport, TransportHealthSnapshot};
use thiserror::Error;
use tokio::sync::{mpsc as tokio_mpsc, oneshot};
use tracing::{error, info, warn};

use crate::session::{open_session, pump_session, WorkerIo};

pub const DEFAULT_HOST: &str = "gcm.googleapis.com";
pub const DEFAULT_PORT: u16 = 5235;

#[derive(Clone)]
pub struct XmppConfig {
    pub host: String,
    pub port: u16,
    /// Domain used in the stream header and appended to bare usernames.
    pub domain: String,
    pub username: String,
    pub password: String,
    pub connect_timeout: Duration,
    pub outbound_queue_capacity: usize,
    pub inbound_queue_capacity: usize,
}

impl XmppConfig {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            domain: DEFAULT_HOST.to_string(),
            username: username.into(),
            password: password.into(),
            connect_timeout: Duration::from_secs(10),
            outbound_queue_capacity: 1024,
            inbound_queue_capacity: 4096,
        }
    }

    /// SASL identity: the username, qualified with `domain` when bare.
    pub fn jid(&self) -> String {
        if self.username.contains('@') {
            self.username.clone()
        } else {
            format!("{}@{}", self.username, self.domain)
        }
    }
}

impl fmt::Debug for XmppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("XmppConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("domain", &self.domain)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("connect_timeout", &self.connect_timeout)
            .field("outbound_queue_capacity", &self.outbound_queue_capacity)
            .field("inbound_queue_capacity", &self.inbound_queue_capacity)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum XmppError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid server name: {0}")]
    InvalidServerName(String),
    #[error("tls error: {0}")]
    Tls(String),
    #[error("stream negotiation failed: {0}")]
    Negotiation(String),
    #[error("authentication failed")]
    AuthenticationFailed,
    #[error("stream error: {0}")]
    Stream(String),
    #[error("connection closed")]
    Closed,
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("outbound queue is full")]
    QueueFull,
    #[error("payload is not utf-8 json text")]
    InvalidPayload,
}

#[derive(Debug, Default)]
pub(crate) struct XmppMetricsInner {
    pub outbound_queued: AtomicU64,
    pub outbound_send_ok: AtomicU64,
    pub outbound_send_err: AtomicU64,
    pub inbound_received: AtomicU64,
    pub inbound_dropped: AtomicU64,
    pub last_error: Mutex<Option<String>>,
}

impl XmppMetricsInner {
    fn record_error(&self, err: &XmppError) {
        let mut last = self.last_error.lock().unwrap_or_else(|e| e.into_inner());
        *last = Some(err.to_string());
    }
}

/// Connected GCM XMPP session.
pub struct XmppTransport {
    jid: String,
    outbound_tx: tokio_mpsc::Sender<Vec<u8>>,
    inbound_rx: mpsc::Receiver<Vec<u8>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    worker: Option<JoinHandle<()>>,
    connected: Arc<AtomicBool>,
    metrics: Arc<XmppMetricsInner>,
}

impl XmppTransport {
    /// Connects, authenticates, and binds before returning.
    ///
    /// Fails with `AuthenticationFailed` when the server rejects the
    /// credentials.
    pub fn connect(config: XmppConfig) -> Result<Self, XmppError> {
        let (startup_tx, startup_rx) = mpsc::sync_channel::<Result<String, XmppError>>(1);
        let (outbound_tx, outbound_rx) =
            tokio_mpsc::channel::<Vec<u8>>(config.outbound_queue_capacity.max(1));
        let (inbound_tx, inbound_rx) =
            mpsc::sync_channel::<Vec<u8>>(config.inbound_queue_capacity.max(1));
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let connected = Arc::new(AtomicBool::new(false));
        let metrics = Arc::new(XmppMetricsInner::default());

        let io = WorkerIo {
            outbound_rx,
            inbound_tx,
            shutdown_rx,
            metrics: Arc::clone(&metrics),
        };
        let worker_connected = Arc::clone(&connected);
        let worker_config = config.clone();
        let worker = thread::spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(err) => {
                    let _ = startup_tx.send(Err(XmppError::Io(err)));
                    return;
                }
            };
            runtime.block_on(run_xmpp_worker(
                worker_config,
                worker_connected,
                io,
                startup_tx,
            ));
        });

        // the worker enforces connect_timeout itself; this only guards a hung thread
        let wait = config.connect_timeout + Duration::from_secs(2);
        let jid = match startup_rx.recv_timeout(wait) {
            Ok(Ok(jid)) => jid,
            Ok(Err(err)) => {
                let _ = worker.join();
                return Err(err);
            }
            Err(_) => {
                drop(shutdown_tx);
                return Err(XmppError::Timeout(config.connect_timeout));
            }
        };
        info!("xmpp: session bound as {jid}");

        Ok(Self {
            jid,
            outbound_tx,
            inbound_rx,
            shutdown_tx: Some(shutdown_tx),
            worker: Some(worker),
            connected,
            metrics,
        })
    }

    /// JID assigned by the server at bind time.
    pub fn jid(&self) -> &str {
        &self.jid
    }
}

async fn run_xmpp_worker(
    config: XmppConfig,
    connected: Arc<AtomicBool>,
    mut io: WorkerIo,
    startup_tx: mpsc::SyncSender<Result<String, XmppError>>,
) {
    let opened = tokio::time::timeout(config.connect_timeout, open_session(&config)).await;
    let (stream, buffer, jid) = match opened {
        Ok(Ok(session)) => session,
        Ok(Err(err)) => {
            let _ = startup_tx.send(Err(err));
            return;
        }
        Err(_) => {
            let _ = startup_tx.send(Err(XmppError::Timeout(config.connect_timeout)));
            return;
        }
    };
    connected.store(true, Ordering::Relaxed);
    if startup_tx.send(Ok(jid)).is_err() {
        connected.store(false, Ordering::Relaxed);
        return;
    }

    let metrics = Arc::clone(&io.metrics);
    match pump_session(stream, buffer, &mut io).await {
        Ok(()) => info!("xmpp: session closed"),
        Err(err) => {
            error!("xmpp: session ended: {err}");
            metrics.record_error(&err);
        }
    }
    connected.store(false, Ordering::Relaxed);
}

impl Drop for XmppTransport {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl PushTransport for XmppTransport {
    type Error = XmppError;

    fn send(&mut self, payload: &[u8]) -> Result<(), Self::Error> {
        if std::str::from_utf8(payload).is_err() {
            return Err(XmppError::InvalidPayload);
        }
        self.outbound_tx
            .try_send(payload.to_vec())
            .map_err(|err| match err {
                tokio_mpsc::error::TrySendError::Full(_) => {
                    warn!("xmpp: outbound queue full");
                    XmppError::QueueFull
                }
                tokio_mpsc::error::TrySendError::Closed(_) => XmppError::Closed,
            })
            .map(|_| {
                self.metrics.outbound_queued.fetch_add(1, Ordering::Relaxed);
            })
    }

    fn recv(&mut self) -> Option<Vec<u8>> {
        self.inbound_rx.try_recv().ok()
    }

    fn recv_timeout(&mut self, timeout: Duration) -> Option<Vec<u8>> {
        self.inbound_rx.recv_timeout(timeout).ok()
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    fn health_snapshot(&self) -> TransportHealthSnapshot {
        let last_error = self
            .metrics
            .last_error
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        TransportHealthSnapshot {
            outbound_queued: self.metrics.outbound_queued.load(Ordering::Relaxed),
            outbound_send_ok: self.metrics.outbound_send_ok.load(Ordering::Relaxed),
            outbound_send_err: self.metrics.outbound_send_err.load(Ordering::Relaxed),
            inbound_received: self.metrics.inbound_received.load(Ordering::Relaxed),
            inbound_dropped: self.metrics.inbound_dropped.load(Ordering::Relaxed),
            last_error,
        }
    }
}
