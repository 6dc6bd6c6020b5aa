use std::sync::atomic::Ordering;
use std::sync::{mpsc, Arc};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rustls::pki_types::ServerName;
use rustls::RootCertStore;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc as tokio_mpsc, oneshot};
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, info, warn};

use crate::stanza::{element_text, encode_gcm_message, extract_gcm_payload, StanzaBuffer};
use crate::{XmppConfig, XmppError, XmppMetricsInner};

const SASL_NS: &str = "urn:ietf:params:xml:ns:xmpp-sasl";
const BIND_NS: &str = "urn:ietf:params:xml:ns:xmpp-bind";
const READ_CHUNK: usize = 8 * 1024;

fn stream_header(domain: &str) -> String {
    format!(
        "<stream:stream to='{domain}' version='1.0' xmlns='jabber:client' xmlns:stream='http://etherx.jabber.org/streams'>"
    )
}

fn auth_plain(jid: &str, password: &str) -> String {
    let mut creds = Vec::with_capacity(jid.len() + password.len() + 2);
    creds.push(0);
    creds.extend_from_slice(jid.as_bytes());
    creds.push(0);
    creds.extend_from_slice(password.as_bytes());
    format!(
        "<auth mechanism='PLAIN' xmlns='{SASL_NS}'>{}</auth>",
        STANDARD.encode(creds)
    )
}

fn bind_request() -> String {
    format!("<iq type='set' id='bind-1'><bind xmlns='{BIND_NS}'/></iq>")
}

async fn write_raw<W: AsyncWrite + Unpin>(stream: &mut W, text: &str) -> Result<(), XmppError> {
    stream.write_all(text.as_bytes()).await?;
    stream.flush().await?;
    Ok(())
}

/// Reads until one of `names` is complete in `buffer`.
async fn read_element<R: AsyncRead + Unpin>(
    stream: &mut R,
    buffer: &mut StanzaBuffer,
    names: &[&str],
) -> Result<(usize, String), XmppError> {
    let mut chunk = vec![0_u8; READ_CHUNK];
    loop {
        if let Some(found) = buffer.next_element(names) {
            return Ok(found);
        }
        if let Some((_, err)) = buffer.next_element(&["stream:error"]) {
            return Err(XmppError::Stream(err));
        }
        if buffer.contains(crate::stanza::STREAM_CLOSE) {
            return Err(XmppError::Closed);
        }
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(XmppError::Closed);
        }
        buffer.extend(&chunk[..n]);
    }
}

/// Opens the XMPP stream, authenticates with SASL PLAIN, and binds a
/// resource. Returns the bound JID.
///
/// Bytes the server sends past the bind result stay in `buffer`.
pub(crate) async fn negotiate<S>(
    stream: &mut S,
    buffer: &mut StanzaBuffer,
    domain: &str,
    jid: &str,
    password: &str,
) -> Result<String, XmppError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    write_raw(stream, &stream_header(domain)).await?;
    let (_, features) = read_element(stream, buffer, &["stream:features"]).await?;
    if !features.contains("<mechanism>PLAIN</mechanism>") {
        return Err(XmppError::Negotiation(
            "server does not offer SASL PLAIN".to_string(),
        ));
    }

    write_raw(stream, &auth_plain(jid, password)).await?;
    let (outcome, _) = read_element(stream, buffer, &["success", "failure"]).await?;
    if outcome == 1 {
        return Err(XmppError::AuthenticationFailed);
    }
    debug!("xmpp: authenticated as {jid}");

    write_raw(stream, &stream_header(domain)).await?;
    let (_, features) = read_element(stream, buffer, &["stream:features"]).await?;
    if !features.contains(BIND_NS) {
        return Err(XmppError::Negotiation(
            "server does not offer resource binding".to_string(),
        ));
    }

    write_raw(stream, &bind_request()).await?;
    let (_, iq) = read_element(stream, buffer, &["iq"]).await?;
    if iq.contains("type='error'") || iq.contains("type=\"error\"") {
        return Err(XmppError::Negotiation("resource bind rejected".to_string()));
    }
    Ok(element_text(&iq, "jid").unwrap_or_else(|| jid.to_string()))
}

fn tls_connector() -> Result<TlsConnector, XmppError> {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let tls = rustls::ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .map_err(|err| XmppError::Tls(err.to_string()))?
    .with_root_certificates(roots)
    .with_no_client_auth();
    Ok(TlsConnector::from(Arc::new(tls)))
}

/// TCP connect, TLS handshake, and XMPP negotiation.
pub(crate) async fn open_session(
    config: &XmppConfig,
) -> Result<(TlsStream<TcpStream>, StanzaBuffer, String), XmppError> {
    let connector = tls_connector()?;
    let server_name = ServerName::try_from(config.host.clone())
        .map_err(|_| XmppError::InvalidServerName(config.host.clone()))?;
    let tcp = TcpStream::connect((config.host.as_str(), config.port)).await?;
    let mut stream = connector.connect(server_name, tcp).await?;
    info!("xmpp: tls established with {}:{}", config.host, config.port);

    let mut buffer = StanzaBuffer::default();
    let jid = negotiate(
        &mut stream,
        &mut buffer,
        &config.domain,
        &config.jid(),
        &config.password,
    )
    .await?;
    Ok((stream, buffer, jid))
}

/// Channel ends and counters the session pump works against.
pub(crate) struct WorkerIo {
    pub outbound_rx: tokio_mpsc::Receiver<Vec<u8>>,
    pub inbound_tx: mpsc::SyncSender<Vec<u8>>,
    pub shutdown_rx: oneshot::Receiver<()>,
    pub metrics: Arc<XmppMetricsInner>,
}

fn deliver_buffered(buffer: &mut StanzaBuffer, io: &WorkerIo) {
    while let Some((kind, stanza)) = buffer.next_element(&["message", "iq", "presence"]) {
        if kind != 0 {
            debug!("xmpp: skipping stanza {stanza}");
            continue;
        }
        let Some(payload) = extract_gcm_payload(&stanza) else {
            debug!("xmpp: message without gcm payload");
            continue;
        };
        match io.inbound_tx.try_send(payload.into_bytes()) {
            Ok(()) => {
                io.metrics.inbound_received.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                warn!("xmpp: inbound queue full, dropping message");
                io.metrics.inbound_dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// Moves stanzas between the negotiated stream and the worker channels.
///
/// Returns `Ok` on requested shutdown and an error when the server closes
/// the stream or the socket fails.
pub(crate) async fn pump_session<S>(
    stream: S,
    mut buffer: StanzaBuffer,
    io: &mut WorkerIo,
) -> Result<(), XmppError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (mut reader, mut writer) = tokio::io::split(stream);
    let mut chunk = vec![0_u8; READ_CHUNK];
    deliver_buffered(&mut buffer, io);

    loop {
        tokio::select! {
            _ = &mut io.shutdown_rx => {
                let _ = write_raw(&mut writer, crate::stanza::STREAM_CLOSE).await;
                return Ok(());
            }
            maybe_out = io.outbound_rx.recv() => {
                let Some(payload) = maybe_out else {
                    return Ok(());
                };
                let Ok(json) = std::str::from_utf8(&payload) else {
                    warn!("xmpp: dropping non utf-8 payload");
                    io.metrics.outbound_send_err.fetch_add(1, Ordering::Relaxed);
                    continue;
                };
                if let Err(err) = write_raw(&mut writer, &encode_gcm_message(json)).await {
                    io.metrics.outbound_send_err.fetch_add(1, Ordering::Relaxed);
                    return Err(err);
                }
                io.metrics.outbound_send_ok.fetch_add(1, Ordering::Relaxed);
            }
            read = reader.read(&mut chunk) => {
                let n = read?;
                if n == 0 {
                    return Err(XmppError::Closed);
                }
                buffer.extend(&chunk[..n]);
                deliver_buffered(&mut buffer, io);
                if let Some((_, err)) = buffer.next_element(&["stream:error"]) {
                    return Err(XmppError::Stream(err));
                }
                if buffer.contains(crate::stanza::STREAM_CLOSE) {
                    return Err(XmppError::Closed);
                }
            }
        }
    }
}
