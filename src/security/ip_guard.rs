//! IP abuse tracking and connection-level blocking.
//!
//! Exact addresses sit in a lock-free map checked on every accept; CIDR
//! ranges live behind a read-write lock and are scanned linearly (block
//! lists stay small). Blocks are persisted so a restart does not unban
//! anyone, and suspicious events are recorded best-effort: storage trouble
//! must never take down the accept loop.

use crate::db::Database;
use crate::db::DbError;
use dashmap::DashMap;
use ipnet::IpNet;
use parking_lot::RwLock;
use std::net::IpAddr;
use tracing::warn;

#[derive(Debug, Clone)]
struct BlockEntry {
    reason: String,
}

/// In-memory view of the IP block list, backed by the `ip_blocks` table.
pub struct IpAbuseTracker {
    db: Database,
    exact: DashMap<IpAddr, BlockEntry>,
    ranges: RwLock<Vec<(IpNet, BlockEntry)>>,
}

impl IpAbuseTracker {
    /// Create an empty tracker over the given database.
    pub fn new(db: Database) -> Self {
        Self {
            db,
            exact: DashMap::new(),
            ranges: RwLock::new(Vec::new()),
        }
    }

    /// Rebuild the in-memory set from persisted rows. Call once at startup.
    pub async fn load(&self) -> Result<(), DbError> {
        let rows = self.db.moderation().load_ip_blocks().await?;
        for row in rows {
            self.insert_memory(&row.ip, row.reason);
        }
        Ok(())
    }

    fn insert_memory(&self, spec: &str, reason: String) {
        let entry = BlockEntry { reason };
        if let Ok(addr) = spec.parse::<IpAddr>() {
            self.exact.insert(addr, entry);
        } else if let Ok(net) = spec.parse::<IpNet>() {
            let mut ranges = self.ranges.write();
            if !ranges.iter().any(|(existing, _)| *existing == net) {
                ranges.push((net, entry));
            }
        } else {
            warn!(spec = %spec, "Ignoring unparseable IP block entry");
        }
    }

    /// Returns the block reason if this address is denied.
    pub fn is_blocked(&self, addr: IpAddr) -> Option<String> {
        if let Some(entry) = self.exact.get(&addr) {
            return Some(entry.reason.clone());
        }
        let ranges = self.ranges.read();
        ranges
            .iter()
            .find(|(net, _)| net.contains(&addr))
            .map(|(_, entry)| entry.reason.clone())
    }

    /// Block an address or CIDR range. Idempotent; persists alongside the
    /// in-memory insert.
    pub async fn block(
        &self,
        spec: &str,
        reason: &str,
        created_by: Option<i64>,
    ) -> Result<bool, DbError> {
        let inserted = self
            .db
            .moderation()
            .insert_ip_block(spec, reason, created_by)
            .await?;
        self.insert_memory(spec, reason.to_owned());
        Ok(inserted)
    }

    /// Lift a block. Idempotent.
    pub async fn unblock(&self, spec: &str) -> Result<bool, DbError> {
        let removed = self.db.moderation().delete_ip_block(spec).await?;
        if let Ok(addr) = spec.parse::<IpAddr>() {
            self.exact.remove(&addr);
        } else if let Ok(net) = spec.parse::<IpNet>() {
            self.ranges.write().retain(|(existing, _)| *existing != net);
        }
        Ok(removed)
    }

    /// Record a suspicious event from an address. Best-effort: failures are
    /// logged and swallowed.
    pub async fn record_event(&self, addr: IpAddr, kind: &str) {
        if let Err(e) = self
            .db
            .moderation()
            .insert_ip_event(&addr.to_string(), kind)
            .await
        {
            warn!(ip = %addr, kind = %kind, error = %e, "Failed to record IP event");
        }
    }
}
