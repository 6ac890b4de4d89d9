//! Client connection and request API.
//!
//! `connect()` establishes plain TCP or TLS per call and resolves only
//! once the server's welcome frame has been read. Requests are one JSON
//! document per line, correlated back through the [`Correlator`] with a
//! fixed 10-second timeout and no retry; a timeout is local and says
//! nothing about whether the server processed the request.

use crate::client::correlator::Correlator;
use crate::crypto::keystore::KeyStore;
use crate::error::{MtpError, Result};
use crate::protocol::engine::{BuildOptions, BuildResult, BuildWarning, ProtocolEngine};
use crate::protocol::packet::{MessagePacket, TagSet};
use crate::protocol::tags::TagTaxonomy;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader as StdBufReader;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_rustls::TlsConnector;
use tracing::{debug, warn};
use uuid::Uuid;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Transport selection, per call to [`MtpClient::connect`].
#[derive(Debug, Clone)]
pub enum Transport {
    Plain,
    Tls {
        /// PEM file holding the server certificate (or its CA) to trust.
        ca_cert_path: String,
        /// Name presented by the server certificate.
        server_name: String,
    },
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ServerFeatures {
    pub tls: bool,
    pub pgp: bool,
}

#[derive(Debug, Clone)]
pub struct SendReceipt {
    pub message_id: Uuid,
    pub encrypted: bool,
    pub signed: bool,
    /// Build-time crypto degradations; the message was still delivered.
    pub warnings: Vec<BuildWarning>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MailboxSummary {
    pub count: usize,
    pub total_count: usize,
    pub tag_counts: BTreeMap<String, BTreeMap<String, usize>>,
}

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

pub struct MtpClient {
    writer: Mutex<BoxedWriter>,
    correlator: Arc<Correlator>,
    engine: ProtocolEngine,
    keystore: Arc<KeyStore>,
    taxonomy: TagTaxonomy,
    features: ServerFeatures,
}

impl MtpClient {
    /// Connect and wait for the welcome frame.
    pub async fn connect(
        addr: &str,
        transport: Transport,
        keystore: Arc<KeyStore>,
        hashcash_difficulty: u32,
    ) -> Result<Self> {
        let (read_half, write_half): (Box<dyn AsyncRead + Send + Unpin>, BoxedWriter) =
            match &transport {
                Transport::Plain => {
                    let stream = TcpStream::connect(addr).await?;
                    let (r, w) = tokio::io::split(stream);
                    (Box::new(r), Box::new(w))
                }
                Transport::Tls {
                    ca_cert_path,
                    server_name,
                } => {
                    let stream = connect_tls(addr, ca_cert_path, server_name).await?;
                    let (r, w) = tokio::io::split(stream);
                    (Box::new(r), Box::new(w))
                }
            };

        let mut reader = BufReader::new(read_half);
        let welcome = tokio::time::timeout(REQUEST_TIMEOUT, read_welcome(&mut reader))
            .await
            .map_err(|_| MtpError::Timeout("welcome".to_string()))??;
        debug!(pgp = welcome.pgp, tls = welcome.tls, "Connected");

        let correlator = Arc::new(Correlator::new());
        spawn_reader(reader, correlator.clone());

        let engine = ProtocolEngine::new(keystore.clone(), hashcash_difficulty, welcome.pgp);
        Ok(Self {
            writer: Mutex::new(write_half),
            correlator,
            engine,
            keystore,
            taxonomy: TagTaxonomy::new(),
            features: welcome,
        })
    }

    pub fn features(&self) -> ServerFeatures {
        self.features
    }

    /// Compose and send a message.
    pub async fn send_mail(
        &self,
        from: &str,
        to: &str,
        subject: &str,
        body: &str,
        opts: BuildOptions,
    ) -> Result<SendReceipt> {
        let build = self.engine.build_packet(from, to, subject, body, opts).await?;
        self.send_packet(build).await
    }

    /// Compose and send a reply to a previously received packet.
    pub async fn reply_to_mail(
        &self,
        original: &MessagePacket,
        from: &str,
        body: &str,
        opts: BuildOptions,
    ) -> Result<SendReceipt> {
        let build = self.engine.build_reply(original, from, body, opts).await?;
        self.send_packet(build).await
    }

    async fn send_packet(&self, build: BuildResult) -> Result<SendReceipt> {
        for warning in &build.warnings {
            warn!(?warning, "Message degraded at build time");
        }
        let response = self
            .request("SEND", json!({ "packet": build.packet }))
            .await?;
        let message_id = serde_json::from_value(response["messageId"].clone())
            .map_err(|e| MtpError::Protocol(format!("bad SEND response: {e}")))?;
        Ok(SendReceipt {
            message_id,
            encrypted: response["encrypted"].as_bool().unwrap_or(false),
            signed: response["signed"].as_bool().unwrap_or(false),
            warnings: build.warnings,
        })
    }

    /// Drain the mailbox for `email`.
    pub async fn receive_mail(&self, email: &str) -> Result<Vec<MessagePacket>> {
        let response = self.request("RECEIVE", json!({ "email": email })).await?;
        parse_messages(&response)
    }

    /// Retrieve only messages matching the tag filters; the rest stay
    /// queued on the server.
    pub async fn receive_mail_by_tags(
        &self,
        email: &str,
        tag_filters: TagSet,
    ) -> Result<Vec<MessagePacket>> {
        let response = self
            .request(
                "RECEIVE_FILTERED",
                json!({ "email": email, "tagFilters": tag_filters }),
            )
            .await?;
        parse_messages(&response)
    }

    /// Read-only mailbox summary.
    pub async fn check_mail(
        &self,
        email: &str,
        tag_filters: Option<TagSet>,
    ) -> Result<MailboxSummary> {
        let mut data = json!({ "email": email });
        if let Some(filters) = tag_filters {
            data["tagFilters"] = json!(filters);
        }
        let response = self.request("CHECK", data).await?;
        serde_json::from_value(response)
            .map_err(|e| MtpError::Protocol(format!("bad CHECK response: {e}")))
    }

    /// Push our own public key for `email` to the server.
    pub async fn register_public_key(&self, email: &str) -> Result<String> {
        let public_key = self.keystore.get_public_key(email).await?;
        let response = self
            .request(
                "REGISTER_KEY",
                json!({ "email": email, "publicKey": public_key }),
            )
            .await?;
        Ok(response["message"].as_str().unwrap_or_default().to_string())
    }

    /// Fetch a peer's public key and cache it locally so later encrypted
    /// sends can use it.
    pub async fn request_public_key(&self, email: &str) -> Result<String> {
        let response = self
            .request("REQUEST_PUBLIC_KEY", json!({ "email": email }))
            .await?;
        let public_key = response["publicKey"]
            .as_str()
            .ok_or_else(|| MtpError::Protocol("bad REQUEST_PUBLIC_KEY response".to_string()))?
            .to_string();
        self.keystore.import_public_key(email, &public_key).await?;
        Ok(public_key)
    }

    /// Generate and persist a local key pair for `address`.
    pub async fn generate_keys(&self, address: &str, name: &str) -> Result<String> {
        self.keystore.generate_key_pair(address, name).await
    }

    /// The server's tag taxonomy, including registered custom tags.
    pub async fn get_tag_categories(&self) -> Result<BTreeMap<String, Vec<String>>> {
        let response = self.request("GET_TAG_CATEGORIES", json!({})).await?;
        serde_json::from_value(response["tagCategories"].clone())
            .map_err(|e| MtpError::Protocol(format!("bad GET_TAG_CATEGORIES response: {e}")))
    }

    /// Register a custom tag for local composition.
    pub fn add_custom_tag(&self, tag: &str) {
        self.taxonomy.add_custom_tag(tag);
    }

    /// Shut down the write side so the server observes the close and frees
    /// the connection slot.
    pub async fn close(&self) -> Result<()> {
        let mut writer = self.writer.lock().await;
        writer.shutdown().await?;
        Ok(())
    }

    async fn request(&self, action: &str, data: Value) -> Result<Value> {
        let request_id = Uuid::new_v4().to_string();
        let receiver = self.correlator.register(&request_id).await;

        let frame = json!({
            "action": action,
            "data": data,
            "requestId": request_id,
        });
        {
            let mut writer = self.writer.lock().await;
            let mut bytes = serde_json::to_vec(&frame)?;
            bytes.push(b'\n');
            writer.write_all(&bytes).await?;
            writer.flush().await?;
        }

        match tokio::time::timeout(REQUEST_TIMEOUT, receiver).await {
            Err(_) => {
                self.correlator.forget(&request_id).await;
                Err(MtpError::Timeout(action.to_string()))
            }
            Ok(Err(_)) => Err(MtpError::Protocol("connection closed".to_string())),
            Ok(Ok(response)) => {
                if response["status"] == "ERROR" {
                    let message = response["message"].as_str().unwrap_or("unknown error");
                    Err(classify_server_error(message))
                } else {
                    Ok(response)
                }
            }
        }
    }
}

fn parse_messages(response: &Value) -> Result<Vec<MessagePacket>> {
    serde_json::from_value(response["messages"].clone())
        .map_err(|e| MtpError::Protocol(format!("bad message list: {e}")))
}

/// Map the server's tagged error message back onto the local taxonomy.
fn classify_server_error(message: &str) -> MtpError {
    let text = message.to_string();
    match message.split(':').next() {
        Some("FormatError") => MtpError::Format(text),
        Some("IntegrityError") => MtpError::Integrity(text),
        Some("AntiSpamError") => MtpError::AntiSpam(text),
        Some("CryptoError") => MtpError::Crypto(text),
        Some("CapacityError") => MtpError::Capacity(text),
        _ => MtpError::Protocol(text),
    }
}

async fn read_welcome<R: AsyncRead + Unpin>(reader: &mut BufReader<R>) -> Result<ServerFeatures> {
    let mut line = String::new();
    let n = reader.read_line(&mut line).await?;
    if n == 0 {
        return Err(MtpError::Protocol(
            "connection closed before welcome".to_string(),
        ));
    }
    let frame: Value = serde_json::from_str(line.trim())?;
    if frame["status"] != "OK" {
        let message = frame["message"].as_str().unwrap_or("connection refused");
        return Err(classify_server_error(message));
    }
    serde_json::from_value(frame["features"].clone())
        .map_err(|e| MtpError::Protocol(format!("bad welcome frame: {e}")))
}

fn spawn_reader<R>(mut reader: BufReader<R>, correlator: Arc<Correlator>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut line = String::new();
        loop {
            line.clear();
            match reader.read_line(&mut line).await {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    let raw = line.trim();
                    if raw.is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<Value>(raw) {
                        Ok(frame) => {
                            let request_id = frame
                                .get("requestId")
                                .and_then(|v| v.as_str())
                                .map(str::to_string);
                            match request_id {
                                Some(id) => correlator.complete(&id, frame).await,
                                None => warn!("Dropping response without requestId"),
                            }
                        }
                        Err(e) => warn!("Dropping unparseable frame: {}", e),
                    }
                }
            }
        }
        correlator.abort_all().await;
    });
}

async fn connect_tls(
    addr: &str,
    ca_cert_path: &str,
    server_name: &str,
) -> Result<tokio_rustls::client::TlsStream<TcpStream>> {
    let mut roots = rustls::RootCertStore::empty();
    let ca_file = File::open(ca_cert_path)
        .map_err(|e| MtpError::Tls(format!("Failed to open CA file: {e}")))?;
    let certs = rustls_pemfile::certs(&mut StdBufReader::new(ca_file))
        .map_err(|e| MtpError::Tls(format!("Failed to read CA certificates: {e}")))?;
    if certs.is_empty() {
        return Err(MtpError::Tls("No certificates in CA file".to_string()));
    }
    for cert in certs {
        roots
            .add(&rustls::Certificate(cert))
            .map_err(|e| MtpError::Tls(format!("Invalid CA certificate: {e}")))?;
    }

    let config = rustls::ClientConfig::builder()
        .with_safe_defaults()
        .with_root_certificates(roots)
        .with_no_client_auth();
    let connector = TlsConnector::from(Arc::new(config));

    let name = rustls::ServerName::try_from(server_name)
        .map_err(|_| MtpError::Tls(format!("Invalid server name: {server_name}")))?;
    let tcp = TcpStream::connect(addr).await?;
    Ok(connector.connect(name, tcp).await?)
}
