//! Per-connection session: framing, dispatch, responses.
//!
//! Frames are newline-delimited JSON, one document per line in both
//! directions. Each connection walks Connecting → Ready → {Handling, Idle}
//! → Closed; frames on one connection are handled strictly in arrival
//! order while other connections proceed concurrently. Malformed JSON and
//! unknown actions answer with a generic error frame and leave the
//! connection open.

use crate::error::{MtpError, Result};
use crate::protocol::packet::{MessagePacket, TagSet};
use crate::protocol::ProcessOptions;
use crate::server::server::ServerContext;
use serde::Deserialize;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Connecting,
    Ready,
    Handling,
    Idle,
    Closed,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Request {
    action: String,
    #[serde(default)]
    data: Value,
    #[serde(default)]
    request_id: Option<String>,
}

#[derive(Deserialize)]
struct SendData {
    packet: MessagePacket,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReceiveData {
    email: String,
    #[serde(default)]
    tag_filters: TagSet,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CheckData {
    email: String,
    #[serde(default)]
    tag_filters: Option<TagSet>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterKeyData {
    email: String,
    public_key: String,
}

#[derive(Deserialize)]
struct KeyLookupData {
    email: String,
}

/// Write one JSON frame followed by a newline.
pub(crate) async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, frame: &Value) -> Result<()> {
    let mut data = serde_json::to_vec(frame)?;
    data.push(b'\n');
    writer.write_all(&data).await?;
    writer.flush().await?;
    Ok(())
}

pub struct Session {
    state: SessionState,
    peer: SocketAddr,
    ctx: Arc<ServerContext>,
}

impl Session {
    pub fn new(ctx: Arc<ServerContext>, peer: SocketAddr) -> Self {
        Self {
            state: SessionState::Connecting,
            peer,
            ctx,
        }
    }

    pub async fn run<S>(mut self, stream: S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (reader, mut writer) = tokio::io::split(stream);
        let mut reader = BufReader::new(reader);

        let welcome = json!({
            "status": "OK",
            "message": "MMTP server ready",
            "features": {
                "tls": self.ctx.config.tls.enabled,
                "pgp": self.ctx.config.crypto.enabled,
            },
        });
        write_frame(&mut writer, &welcome).await?;
        self.state = SessionState::Ready;
        debug!(peer = %self.peer, state = ?self.state, "Connection ready");

        let mut line = String::new();
        loop {
            line.clear();
            let n = reader.read_line(&mut line).await?;
            if n == 0 {
                break;
            }
            let raw = line.trim();
            if raw.is_empty() {
                continue;
            }

            self.state = SessionState::Handling;
            let response = self.dispatch(raw).await;
            write_frame(&mut writer, &response).await?;
            self.state = SessionState::Idle;
        }

        let final_state = std::mem::replace(&mut self.state, SessionState::Closed);
        debug!(peer = %self.peer, ?final_state, "Connection closed");
        Ok(())
    }

    async fn dispatch(&self, raw: &str) -> Value {
        let request: Request = match serde_json::from_str(raw) {
            Ok(request) => request,
            Err(e) => {
                warn!(peer = %self.peer, "Malformed request: {}", e);
                return error_frame(None, &MtpError::Protocol("malformed request".to_string()));
            }
        };

        let request_id = request.request_id.clone();
        match self.handle_action(&request).await {
            Ok(mut response) => {
                if let (Some(id), Some(map)) = (request_id, response.as_object_mut()) {
                    map.insert("requestId".to_string(), Value::String(id));
                }
                response
            }
            Err(e) => {
                warn!(peer = %self.peer, action = %request.action, "Request failed: {}", e);
                error_frame(request_id, &e)
            }
        }
    }

    async fn handle_action(&self, request: &Request) -> Result<Value> {
        match request.action.as_str() {
            "SEND" => self.handle_send(&request.data).await,
            "RECEIVE" => self.handle_receive(&request.data).await,
            "RECEIVE_FILTERED" => self.handle_receive_filtered(&request.data).await,
            "CHECK" => self.handle_check(&request.data).await,
            "REGISTER_KEY" => self.handle_register_key(&request.data).await,
            "REQUEST_PUBLIC_KEY" => self.handle_request_public_key(&request.data).await,
            "GET_TAG_CATEGORIES" => self.handle_get_tag_categories().await,
            other => Err(MtpError::Protocol(format!("unknown action: {other}"))),
        }
    }

    async fn handle_send(&self, data: &Value) -> Result<Value> {
        let SendData { packet } = parse_data(data, "SEND")?;
        let packet = self
            .ctx
            .engine
            .process_packet(packet, ProcessOptions::default())
            .await?;

        let message_id = packet.meta.message_id;
        let encrypted = packet.meta.encrypted;
        let signed = packet.meta.signed;
        info!(
            %message_id,
            sender = %packet.sender,
            recipient = %packet.recipient,
            "Accepted message"
        );
        self.ctx.mailboxes.deliver(packet).await;

        Ok(json!({
            "status": "OK",
            "messageId": message_id,
            "encrypted": encrypted,
            "signed": signed,
        }))
    }

    async fn handle_receive(&self, data: &Value) -> Result<Value> {
        let ReceiveData { email, .. } = parse_data(data, "RECEIVE")?;
        let messages = self.ctx.mailboxes.drain(&email, &self.ctx.engine).await;
        info!(address = %email, count = messages.len(), "Delivered mailbox");
        Ok(json!({
            "status": "OK",
            "messages": messages,
            "count": messages.len(),
        }))
    }

    async fn handle_receive_filtered(&self, data: &Value) -> Result<Value> {
        let ReceiveData { email, tag_filters } = parse_data(data, "RECEIVE_FILTERED")?;
        let messages = self
            .ctx
            .mailboxes
            .take_filtered(&email, &tag_filters, &self.ctx.engine)
            .await;
        info!(address = %email, count = messages.len(), "Delivered filtered mailbox");
        Ok(json!({
            "status": "OK",
            "messages": messages,
            "count": messages.len(),
            "tagFilters": tag_filters,
        }))
    }

    async fn handle_check(&self, data: &Value) -> Result<Value> {
        let CheckData { email, tag_filters } = parse_data(data, "CHECK")?;
        let stats = self
            .ctx
            .mailboxes
            .stats(&email, tag_filters.as_ref())
            .await;
        Ok(json!({
            "status": "OK",
            "count": stats.filtered.unwrap_or(stats.total),
            "totalCount": stats.total,
            "tagCounts": stats.tag_counts,
        }))
    }

    async fn handle_register_key(&self, data: &Value) -> Result<Value> {
        self.require_crypto()?;
        let RegisterKeyData { email, public_key } = parse_data(data, "REGISTER_KEY")?;
        self.ctx.keystore.import_public_key(&email, &public_key).await?;
        Ok(json!({
            "status": "OK",
            "message": format!("Public key registered for {email}"),
        }))
    }

    async fn handle_request_public_key(&self, data: &Value) -> Result<Value> {
        self.require_crypto()?;
        let KeyLookupData { email } = parse_data(data, "REQUEST_PUBLIC_KEY")?;
        let public_key = self.ctx.keystore.get_public_key(&email).await?;
        Ok(json!({
            "status": "OK",
            "email": email,
            "publicKey": public_key,
        }))
    }

    async fn handle_get_tag_categories(&self) -> Result<Value> {
        Ok(json!({
            "status": "OK",
            "tagCategories": self.ctx.taxonomy.categories(),
        }))
    }

    fn require_crypto(&self) -> Result<()> {
        if self.ctx.config.crypto.enabled {
            Ok(())
        } else {
            Err(MtpError::Crypto("PGP support is disabled".to_string()))
        }
    }
}

fn parse_data<T: serde::de::DeserializeOwned>(data: &Value, action: &str) -> Result<T> {
    serde_json::from_value(data.clone())
        .map_err(|e| MtpError::Protocol(format!("invalid {action} data: {e}")))
}

fn error_frame(request_id: Option<String>, error: &MtpError) -> Value {
    let mut frame = json!({
        "status": "ERROR",
        "message": error.to_string(),
    });
    if let (Some(id), Some(map)) = (request_id, frame.as_object_mut()) {
        map.insert("requestId".to_string(), Value::String(id));
    }
    frame
}
