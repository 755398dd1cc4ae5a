//! Local append-only ledger backed by SQLite.
//!
//! Stands in for the on-chain contracts during development and in tests. It
//! enforces the same contract: participants only, one record per confirmed
//! transaction, dense per-key positions, no updates or deletes.
//!
//! Submissions that are never confirmed, because the caller timed out or
//! went away, are discarded after [`PENDING_APPEND_EXPIRY_SECS`].
//!
//! A handle carries the identity it appends as. [`SqliteLedger::with_signer`]
//! hands out further handles over the same connection, one per participant.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use directories::ProjectDirs;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};
use uuid::Uuid;

use anchorline_shared::constants::PENDING_APPEND_EXPIRY_SECS;
use anchorline_shared::{
    Address, AnchorError, AnchorRecord, Cid, CommitHash, ConversationKey, Result,
};

use crate::error::StoreError;
use crate::ledger::{AppendRequest, Ledger, PageRequest, PendingAppend};
use crate::migrations;

#[derive(Clone)]
pub struct SqliteLedger {
    conn: Arc<Mutex<Connection>>,
    signer: Option<Address>,
}

impl std::fmt::Debug for SqliteLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteLedger")
            .field("signer", &self.signer)
            .finish_non_exhaustive()
    }
}

impl SqliteLedger {
    /// Platform data directory location of the ledger file:
    /// - Linux:   `~/.local/share/anchorline/ledger.db`
    /// - macOS:   `~/Library/Application Support/dev.anchorline.anchorline/ledger.db`
    /// - Windows: `{FOLDERID_RoamingAppData}\anchorline\anchorline\data\ledger.db`
    pub fn default_path() -> std::result::Result<PathBuf, StoreError> {
        let dirs = ProjectDirs::from("dev", "anchorline", "anchorline")
            .ok_or(StoreError::NoDataDir)?;
        Ok(dirs.data_dir().join("ledger.db"))
    }

    pub fn open_at(path: &Path, signer: Option<Address>) -> std::result::Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        info!(path = %path.display(), "opening ledger database");

        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::from_connection(conn, signer)
    }

    pub fn open_in_memory(signer: Option<Address>) -> std::result::Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?, signer)
    }

    fn from_connection(
        mut conn: Connection,
        signer: Option<Address>,
    ) -> std::result::Result<Self, StoreError> {
        migrations::run_migrations(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            signer,
        })
    }

    /// Another handle over the same ledger, appending as `signer`.
    pub fn with_signer(&self, signer: Address) -> Self {
        Self {
            conn: Arc::clone(&self.conn),
            signer: Some(signer),
        }
    }

    /// Register `address` as a member of `server_id`. Membership management
    /// proper lives outside this crate; this only seeds the local ledger.
    pub fn add_member(&self, server_id: u64, address: &Address) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR IGNORE INTO server_members (server_id, address, added_at)
             VALUES (?1, ?2, ?3)",
            params![server_id as i64, address.as_str(), Utc::now().to_rfc3339()],
        )
        .map_err(db)?;
        info!(server_id, member = %address, "Added server member");
        Ok(())
    }

    pub fn is_member(&self, server_id: u64, address: &Address) -> Result<bool> {
        let conn = self.lock()?;
        is_member(&conn, server_id, address)
    }

    /// Drop unconfirmed submissions made before `cutoff`. Returns how many
    /// were removed; confirming one of them afterwards is `Rejected`.
    pub fn prune_pending(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let conn = self.lock()?;
        prune_pending(&conn, cutoff)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| AnchorError::from(StoreError::LockPoisoned))
    }
}

#[async_trait]
impl Ledger for SqliteLedger {
    fn signer(&self) -> Option<&Address> {
        self.signer.as_ref()
    }

    async fn submit(&self, request: AppendRequest) -> Result<PendingAppend> {
        let signer = self
            .signer
            .clone()
            .ok_or_else(|| AnchorError::Unauthorized("read-only ledger handle".into()))?;

        if request.cid.as_str().trim().is_empty() {
            return Err(AnchorError::Rejected("empty cid".into()));
        }

        let conn = self.lock()?;

        let authorized = match &request.key {
            ConversationKey::Direct { .. } => request.key.is_party(&signer),
            ConversationKey::Channel { server_id, .. } => is_member(&conn, *server_id, &signer)?,
        };
        if !authorized {
            return Err(AnchorError::Unauthorized(format!(
                "{signer} is not a participant of {}",
                request.key
            )));
        }

        prune_pending(&conn, Utc::now() - Duration::seconds(PENDING_APPEND_EXPIRY_SECS))?;

        let tx_id = Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO pending_appends
                (tx_id, conversation_key, cid, commit_hash, previous_cid, submitter, submitted_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                tx_id,
                request.key.ledger_key(),
                request.cid.as_str(),
                request.commit_hash.to_hex(),
                request.previous_cid.as_ref().map(Cid::as_str),
                signer.as_str(),
                Utc::now().to_rfc3339(),
            ],
        )
        .map_err(db)?;

        debug!(tx_id = %tx_id, key = %request.key, cid = %request.cid, "Append submitted");

        Ok(PendingAppend {
            tx_id,
            key: request.key,
            cid: request.cid,
        })
    }

    async fn confirm(&self, pending: &PendingAppend) -> Result<AnchorRecord> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(db)?;

        let row = tx
            .query_row(
                "SELECT conversation_key, cid, commit_hash, previous_cid, submitter
                 FROM pending_appends WHERE tx_id = ?1",
                params![pending.tx_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()
            .map_err(db)?;

        let Some((key_str, cid, hash_hex, previous_cid, submitter)) = row else {
            return Err(AnchorError::Rejected(format!(
                "unknown or already finalized transaction {}",
                pending.tx_id
            )));
        };

        if key_str != pending.key.ledger_key() {
            return Err(AnchorError::Rejected(format!(
                "transaction {} does not belong to {}",
                pending.tx_id, pending.key
            )));
        }

        let position: i64 = tx
            .query_row(
                "SELECT COUNT(*) FROM anchors WHERE conversation_key = ?1",
                params![key_str],
                |row| row.get(0),
            )
            .map_err(db)?;

        let record = AnchorRecord {
            key: pending.key.clone(),
            position: position as u64,
            cid: Cid(cid),
            commit_hash: CommitHash::from_hex(&hash_hex)
                .map_err(|e| AnchorError::Unavailable(format!("corrupt pending row: {e}")))?,
            previous_cid: previous_cid.map(Cid),
            submitter: Address::parse(&submitter)?,
        };

        tx.execute(
            "INSERT INTO anchors
                (conversation_key, position, cid, commit_hash, previous_cid,
                 submitter, tx_id, anchored_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                key_str,
                position,
                record.cid.as_str(),
                hash_hex,
                record.previous_cid.as_ref().map(Cid::as_str),
                record.submitter.as_str(),
                pending.tx_id,
                Utc::now().to_rfc3339(),
            ],
        )
        .map_err(db)?;
        tx.execute(
            "DELETE FROM pending_appends WHERE tx_id = ?1",
            params![pending.tx_id],
        )
        .map_err(db)?;
        tx.commit().map_err(db)?;

        info!(
            tx_id = %pending.tx_id,
            key = %record.key,
            position = record.position,
            cid = %record.cid,
            "Append confirmed"
        );
        Ok(record)
    }

    async fn list_page(
        &self,
        key: &ConversationKey,
        page: PageRequest,
    ) -> Result<Vec<AnchorRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT conversation_key, position, cid, commit_hash, previous_cid, submitter
                 FROM anchors
                 WHERE conversation_key = ?1 AND position >= ?2
                 ORDER BY position ASC
                 LIMIT ?3",
            )
            .map_err(db)?;

        let rows = stmt
            .query_map(
                params![key.ledger_key(), page.offset as i64, page.limit],
                row_to_record,
            )
            .map_err(db)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row.map_err(db)?);
        }
        Ok(records)
    }
}

fn db(e: rusqlite::Error) -> AnchorError {
    StoreError::from(e).into()
}

fn prune_pending(conn: &Connection, cutoff: DateTime<Utc>) -> Result<usize> {
    let removed = conn
        .execute(
            "DELETE FROM pending_appends WHERE submitted_at < ?1",
            params![cutoff.to_rfc3339()],
        )
        .map_err(db)?;
    if removed > 0 {
        debug!(removed, "Discarded stale pending appends");
    }
    Ok(removed)
}

fn is_member(conn: &Connection, server_id: u64, address: &Address) -> Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM server_members WHERE server_id = ?1 AND address = ?2)",
        params![server_id as i64, address.as_str()],
        |row| row.get(0),
    )
    .map_err(db)
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<AnchorRecord> {
    let key_str: String = row.get(0)?;
    let position: i64 = row.get(1)?;
    let cid: String = row.get(2)?;
    let hash_hex: String = row.get(3)?;
    let previous_cid: Option<String> = row.get(4)?;
    let submitter: String = row.get(5)?;

    let key = ConversationKey::from_ledger_key(&key_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let commit_hash = CommitHash::from_hex(&hash_hex).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let submitter = Address::parse(&submitter).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(AnchorRecord {
        key,
        position: position as u64,
        cid: Cid(cid),
        commit_hash,
        previous_cid: previous_cid.map(Cid),
        submitter,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> Address {
        Address::parse(s).unwrap()
    }

    fn request(key: &ConversationKey, cid: &str, previous: Option<&str>) -> AppendRequest {
        AppendRequest {
            key: key.clone(),
            cid: Cid::new(cid),
            commit_hash: CommitHash([7u8; 32]),
            previous_cid: previous.map(Cid::new),
        }
    }

    async fn append(ledger: &SqliteLedger, req: AppendRequest) -> Result<AnchorRecord> {
        let pending = ledger.submit(req).await?;
        ledger.confirm(&pending).await
    }

    #[tokio::test]
    async fn test_dm_append_and_list() {
        let ledger = SqliteLedger::open_in_memory(Some(addr("0xA"))).unwrap();
        let key = ConversationKey::direct(addr("0xA"), addr("0xB")).unwrap();

        let first = append(&ledger, request(&key, "cid1", None)).await.unwrap();
        let second = append(&ledger, request(&key, "cid2", Some("cid1"))).await.unwrap();
        assert_eq!(first.position, 0);
        assert_eq!(second.position, 1);
        assert_eq!(second.previous_cid, Some(Cid::new("cid1")));
        assert_eq!(second.submitter, addr("0xa"));

        let all = ledger
            .list_page(&key, PageRequest { offset: 0, limit: 10 })
            .await
            .unwrap();
        assert_eq!(all, vec![first, second.clone()]);

        let tail = ledger
            .list_page(&key, PageRequest { offset: 1, limit: 10 })
            .await
            .unwrap();
        assert_eq!(tail, vec![second]);
    }

    #[tokio::test]
    async fn test_counterpart_can_append_to_same_key() {
        let ledger = SqliteLedger::open_in_memory(Some(addr("0xA"))).unwrap();
        let bob = ledger.with_signer(addr("0xB"));
        let key = ConversationKey::direct(addr("0xB"), addr("0xA")).unwrap();

        append(&ledger, request(&key, "from-a", None)).await.unwrap();
        let rec = append(&bob, request(&key, "from-b", None)).await.unwrap();
        assert_eq!(rec.position, 1);
        assert_eq!(rec.submitter, addr("0xb"));
    }

    #[tokio::test]
    async fn test_outsider_unauthorized() {
        let ledger = SqliteLedger::open_in_memory(Some(addr("0xC"))).unwrap();
        let key = ConversationKey::direct(addr("0xA"), addr("0xB")).unwrap();
        let err = ledger.submit(request(&key, "cid", None)).await.unwrap_err();
        assert!(matches!(err, AnchorError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn test_read_only_handle_unauthorized() {
        let ledger = SqliteLedger::open_in_memory(None).unwrap();
        let key = ConversationKey::channel(1, 1);
        let err = ledger.submit(request(&key, "cid", None)).await.unwrap_err();
        assert!(matches!(err, AnchorError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn test_channel_requires_membership() {
        let ledger = SqliteLedger::open_in_memory(Some(addr("0xA"))).unwrap();
        let key = ConversationKey::channel(5, 1);

        let err = ledger.submit(request(&key, "cid", None)).await.unwrap_err();
        assert!(matches!(err, AnchorError::Unauthorized(_)));

        ledger.add_member(5, &addr("0xA")).unwrap();
        assert!(ledger.is_member(5, &addr("0xa")).unwrap());
        assert!(!ledger.is_member(6, &addr("0xa")).unwrap());
        append(&ledger, request(&key, "cid", None)).await.unwrap();
    }

    #[tokio::test]
    async fn test_empty_cid_rejected() {
        let ledger = SqliteLedger::open_in_memory(Some(addr("0xA"))).unwrap();
        let key = ConversationKey::direct(addr("0xA"), addr("0xB")).unwrap();
        let err = ledger.submit(request(&key, "  ", None)).await.unwrap_err();
        assert!(matches!(err, AnchorError::Rejected(_)));
    }

    #[tokio::test]
    async fn test_confirm_twice_rejected() {
        let ledger = SqliteLedger::open_in_memory(Some(addr("0xA"))).unwrap();
        let key = ConversationKey::direct(addr("0xA"), addr("0xB")).unwrap();
        let pending = ledger.submit(request(&key, "cid", None)).await.unwrap();
        ledger.confirm(&pending).await.unwrap();

        let err = ledger.confirm(&pending).await.unwrap_err();
        assert!(matches!(err, AnchorError::Rejected(_)));

        let all = ledger
            .list_page(&key, PageRequest { offset: 0, limit: 10 })
            .await
            .unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn test_unconfirmed_append_not_listed() {
        let ledger = SqliteLedger::open_in_memory(Some(addr("0xA"))).unwrap();
        let key = ConversationKey::direct(addr("0xA"), addr("0xB")).unwrap();
        ledger.submit(request(&key, "cid", None)).await.unwrap();

        let all = ledger
            .list_page(&key, PageRequest { offset: 0, limit: 10 })
            .await
            .unwrap();
        assert!(all.is_empty());
    }

    #[tokio::test]
    async fn test_stale_pending_appends_are_pruned() {
        let ledger = SqliteLedger::open_in_memory(Some(addr("0xA"))).unwrap();
        let key = ConversationKey::direct(addr("0xA"), addr("0xB")).unwrap();
        let abandoned = ledger.submit(request(&key, "abandoned", None)).await.unwrap();

        assert_eq!(ledger.prune_pending(Utc::now() - Duration::hours(1)).unwrap(), 0);
        assert_eq!(ledger.prune_pending(Utc::now() + Duration::seconds(1)).unwrap(), 1);

        let err = ledger.confirm(&abandoned).await.unwrap_err();
        assert!(matches!(err, AnchorError::Rejected(_)));

        let kept = append(&ledger, request(&key, "fresh", None)).await.unwrap();
        assert_eq!(kept.position, 0);
    }

    #[tokio::test]
    async fn test_records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("ledger.db");
        let key = ConversationKey::direct(addr("0xA"), addr("0xB")).unwrap();

        {
            let ledger = SqliteLedger::open_at(&path, Some(addr("0xA"))).unwrap();
            append(&ledger, request(&key, "persisted", None)).await.unwrap();
        }

        let reopened = SqliteLedger::open_at(&path, None).unwrap();
        let all = reopened
            .list_page(&key, PageRequest { offset: 0, limit: 10 })
            .await
            .unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].cid, Cid::new("persisted"));
        assert_eq!(all[0].commit_hash, CommitHash([7u8; 32]));
    }
}
