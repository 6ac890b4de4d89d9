//! Per-source-IP connection cap.
//!
//! The server's only admission control: a hard limit on concurrent
//! connections per source address. Counters are incremented on accept and
//! decremented on close; zeroed entries are dropped to keep the map small.

use std::collections::HashMap;
use std::net::IpAddr;
use tokio::sync::Mutex;
use tracing::warn;

pub struct ConnectionLimiter {
    max_per_ip: usize,
    counts: Mutex<HashMap<IpAddr, usize>>,
}

impl ConnectionLimiter {
    pub fn new(max_per_ip: usize) -> Self {
        Self {
            max_per_ip,
            counts: Mutex::new(HashMap::new()),
        }
    }

    /// Register a connection. Returns false when the source is over the
    /// cap; the counter is incremented either way and must be released on
    /// close.
    pub async fn acquire(&self, ip: IpAddr) -> bool {
        let mut counts = self.counts.lock().await;
        let count = counts.entry(ip).or_insert(0);
        *count += 1;
        if *count > self.max_per_ip {
            warn!(%ip, count, "Connection cap exceeded");
            false
        } else {
            true
        }
    }

    pub async fn release(&self, ip: IpAddr) {
        let mut counts = self.counts.lock().await;
        if let Some(count) = counts.get_mut(&ip) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                counts.remove(&ip);
            }
        }
    }
}
