//! Shared helpers for the end-to-end tests.
//!
//! Each test spawns a real server on an ephemeral port with a scratch key
//! directory and talks to it over plain TCP. Clients share the server's key
//! directory, matching the deployment where the server hosts key material
//! for retrieval-time decryption.

use mmtp_rs::client::{MtpClient, Transport};
use mmtp_rs::config::Config;
use mmtp_rs::crypto::KeyStore;
use mmtp_rs::server::MtpServer;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::net::TcpListener;

/// Low difficulty keeps proof-of-work fast in tests while still exercising
/// the search.
pub const DIFFICULTY: u32 = 2;

pub const TEST_BITS: usize = 2048;

pub struct TestServer {
    pub addr: String,
    key_dir: TempDir,
}

impl TestServer {
    pub fn key_dir(&self) -> &std::path::Path {
        self.key_dir.path()
    }
}

pub async fn spawn_server() -> TestServer {
    let key_dir = TempDir::new().expect("temp key dir");
    let mut config = Config::default();
    config.server.hashcash_difficulty = DIFFICULTY;
    config.crypto.key_dir = key_dir.path().to_string_lossy().into_owned();
    config.crypto.rsa_bits = TEST_BITS;

    let keystore = Arc::new(KeyStore::new(key_dir.path(), TEST_BITS));
    let server = MtpServer::new(config, keystore);

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr").to_string();
    tokio::spawn(async move {
        let _ = server.serve(listener).await;
    });

    TestServer { addr, key_dir }
}

pub async fn connect(server: &TestServer) -> MtpClient {
    MtpClient::connect(
        &server.addr,
        Transport::Plain,
        Arc::new(KeyStore::new(server.key_dir(), TEST_BITS)),
        DIFFICULTY,
    )
    .await
    .expect("connect")
}
