//! Repositories for encryption key material and encryption contexts.
//!
//! Keys are partitioned by coordinator URL and key type; freshness queries
//! order by descending expiry and never cross coordinator boundaries.
//! Contexts expire by creation instant with a strict `<` cutoff.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use adselect_core::error::{AdSelectError, Result};
use adselect_core::types::{EncryptionContext, EncryptionKey, EncryptionKeyType};

use crate::codec::{from_unix, to_unix};
use crate::db::{map_sqlite_err, Database, OptionalExt};

/// Repository for per-coordinator, per-type encryption keys.
pub struct EncryptionKeyRepository {
    db: Arc<Database>,
}

impl EncryptionKeyRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert keys, replacing on natural-key collision (coordinator, type,
    /// identifier). Last write wins.
    pub fn insert_keys(&self, keys: &[EncryptionKey]) -> Result<()> {
        self.db.with_tx(|tx| {
            for key in keys {
                tx.execute(
                    "INSERT OR REPLACE INTO encryption_keys
                         (coordinator_url, key_identifier, key_type, public_key,
                          creation_instant, expiry_ttl_seconds, expiry_instant)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    rusqlite::params![
                        key.coordinator_url,
                        key.key_identifier,
                        key.key_type.code(),
                        key.public_key,
                        to_unix(key.creation_instant),
                        key.expiry_ttl_seconds,
                        to_unix(key.expiry_instant()),
                    ],
                )
                .map_err(map_sqlite_err)?;
            }
            Ok(())
        })
    }

    /// Up to `n` keys of the given type and coordinator, freshest (largest
    /// expiry) first. Keys under other coordinators are never returned.
    pub fn latest_expiry_n_keys(
        &self,
        key_type: EncryptionKeyType,
        coordinator_url: &str,
        n: u32,
    ) -> Result<Vec<EncryptionKey>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "{} WHERE key_type = ?1 AND coordinator_url = ?2
                     ORDER BY expiry_instant DESC LIMIT ?3",
                    KEY_SELECT
                ))
                .map_err(|e| AdSelectError::Storage(e.to_string()))?;
            collect_keys(stmt.query_map(
                rusqlite::params![key_type.code(), coordinator_url, n],
                row_to_key,
            ))
        })
    }

    /// As [`latest_expiry_n_keys`](Self::latest_expiry_n_keys), restricted
    /// to keys that are still active at `as_of`.
    pub fn latest_expiry_n_active_keys(
        &self,
        key_type: EncryptionKeyType,
        coordinator_url: &str,
        as_of: DateTime<Utc>,
        n: u32,
    ) -> Result<Vec<EncryptionKey>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "{} WHERE key_type = ?1 AND coordinator_url = ?2 AND expiry_instant > ?3
                     ORDER BY expiry_instant DESC LIMIT ?4",
                    KEY_SELECT
                ))
                .map_err(|e| AdSelectError::Storage(e.to_string()))?;
            collect_keys(stmt.query_map(
                rusqlite::params![key_type.code(), coordinator_url, to_unix(as_of), n],
                row_to_key,
            ))
        })
    }

    /// Keys of the given type and coordinator that have expired at `as_of`.
    pub fn expired_keys(
        &self,
        key_type: EncryptionKeyType,
        coordinator_url: &str,
        as_of: DateTime<Utc>,
    ) -> Result<Vec<EncryptionKey>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "{} WHERE key_type = ?1 AND coordinator_url = ?2 AND expiry_instant <= ?3",
                    KEY_SELECT
                ))
                .map_err(|e| AdSelectError::Storage(e.to_string()))?;
            collect_keys(stmt.query_map(
                rusqlite::params![key_type.code(), coordinator_url, to_unix(as_of)],
                row_to_key,
            ))
        })
    }

    /// Expired keys across all types and coordinators.
    pub fn all_expired_keys(&self, as_of: DateTime<Utc>) -> Result<Vec<EncryptionKey>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(&format!("{} WHERE expiry_instant <= ?1", KEY_SELECT))
                .map_err(|e| AdSelectError::Storage(e.to_string()))?;
            collect_keys(stmt.query_map(rusqlite::params![to_unix(as_of)], row_to_key))
        })
    }

    /// Delete expired keys scoped by type and coordinator. Returns the
    /// number of keys removed.
    pub fn delete_expired(
        &self,
        key_type: EncryptionKeyType,
        coordinator_url: &str,
        as_of: DateTime<Utc>,
    ) -> Result<usize> {
        self.db.with_conn(|conn| {
            let removed = conn
                .execute(
                    "DELETE FROM encryption_keys
                     WHERE key_type = ?1 AND coordinator_url = ?2 AND expiry_instant <= ?3",
                    rusqlite::params![key_type.code(), coordinator_url, to_unix(as_of)],
                )
                .map_err(|e| AdSelectError::Storage(e.to_string()))?;
            Ok(removed)
        })
    }

    pub fn delete_all(&self) -> Result<usize> {
        self.db.with_conn(|conn| {
            let removed = conn
                .execute("DELETE FROM encryption_keys", [])
                .map_err(|e| AdSelectError::Storage(e.to_string()))?;
            Ok(removed)
        })
    }
}

const KEY_SELECT: &str = "SELECT coordinator_url, key_identifier, key_type, public_key,
        creation_instant, expiry_ttl_seconds
 FROM encryption_keys";

fn row_to_key(row: &rusqlite::Row<'_>) -> rusqlite::Result<EncryptionKey> {
    let key_type_code: i64 = row.get(2)?;
    let key_type = EncryptionKeyType::from_code(key_type_code).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Integer,
            format!("unknown key type code {}", key_type_code).into(),
        )
    })?;
    Ok(EncryptionKey {
        coordinator_url: row.get(0)?,
        key_identifier: row.get(1)?,
        key_type,
        public_key: row.get(3)?,
        creation_instant: from_unix(row.get(4)?),
        expiry_ttl_seconds: row.get(5)?,
    })
}

fn collect_keys<F>(
    rows: rusqlite::Result<rusqlite::MappedRows<'_, F>>,
) -> Result<Vec<EncryptionKey>>
where
    F: FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<EncryptionKey>,
{
    let rows = rows.map_err(|e| AdSelectError::Storage(e.to_string()))?;
    let mut keys = Vec::new();
    for row in rows {
        keys.push(row.map_err(|e| AdSelectError::Storage(e.to_string()))?);
    }
    Ok(keys)
}

/// Repository for encryption contexts keyed by (context_id, key_type).
pub struct EncryptionContextRepository {
    db: Arc<Database>,
}

impl EncryptionContextRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert a context, replacing on key collision.
    pub fn insert(&self, context: &EncryptionContext) -> Result<()> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO encryption_context
                     (context_id, key_type, key_config, shared_secret,
                      creation_instant, has_media_type_changed)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    context.context_id,
                    context.key_type.code(),
                    context.key_config,
                    context.shared_secret,
                    to_unix(context.creation_instant),
                    context.has_media_type_changed as i64,
                ],
            )
            .map_err(map_sqlite_err)?;
            Ok(())
        })
    }

    pub fn get(
        &self,
        context_id: i64,
        key_type: EncryptionKeyType,
    ) -> Result<Option<EncryptionContext>> {
        self.db.with_conn(|conn| {
            let result = conn
                .query_row(
                    "SELECT context_id, key_type, key_config, shared_secret,
                            creation_instant, has_media_type_changed
                     FROM encryption_context WHERE context_id = ?1 AND key_type = ?2",
                    rusqlite::params![context_id, key_type.code()],
                    |row| {
                        Ok(EncryptionContext {
                            context_id: row.get(0)?,
                            key_type,
                            key_config: row.get(2)?,
                            shared_secret: row.get(3)?,
                            creation_instant: from_unix(row.get(4)?),
                            has_media_type_changed: row.get::<_, i64>(5)? != 0,
                        })
                    },
                )
                .optional()
                .map_err(|e| AdSelectError::Storage(e.to_string()))?;
            Ok(result)
        })
    }

    /// Delete contexts created strictly before the cutoff. A context created
    /// exactly at the cutoff is retained.
    pub fn remove_expired(&self, before: DateTime<Utc>) -> Result<usize> {
        self.db.with_conn(|conn| {
            let removed = conn
                .execute(
                    "DELETE FROM encryption_context WHERE creation_instant < ?1",
                    rusqlite::params![to_unix(before)],
                )
                .map_err(|e| AdSelectError::Storage(e.to_string()))?;
            Ok(removed)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COORDINATOR: &str = "https://coordinator.example.com";
    const COORDINATOR_2: &str = "https://coordinator2.example.com";
    const TWO_WEEKS_SECS: i64 = 1_209_600;

    fn make_db() -> Arc<Database> {
        Arc::new(Database::in_memory().unwrap())
    }

    fn key(
        coordinator: &str,
        identifier: &str,
        key_type: EncryptionKeyType,
        creation_secs: i64,
        ttl_secs: i64,
    ) -> EncryptionKey {
        EncryptionKey {
            coordinator_url: coordinator.to_string(),
            key_identifier: identifier.to_string(),
            public_key: format!("public_{}", identifier),
            key_type,
            creation_instant: from_unix(creation_secs),
            expiry_ttl_seconds: ttl_secs,
        }
    }

    #[test]
    fn test_latest_expiry_returns_empty_when_absent() {
        let repo = EncryptionKeyRepository::new(make_db());
        for key_type in [
            EncryptionKeyType::Auction,
            EncryptionKeyType::Join,
            EncryptionKeyType::Query,
        ] {
            assert!(repo
                .latest_expiry_n_keys(key_type, COORDINATOR, 1)
                .unwrap()
                .is_empty());
        }
    }

    #[test]
    fn test_latest_expiry_orders_freshest_first() {
        let repo = EncryptionKeyRepository::new(make_db());
        repo.insert_keys(&[
            key(COORDINATOR, "key_1", EncryptionKeyType::Auction, 1_700_000_000, TWO_WEEKS_SECS),
            key(COORDINATOR, "key_4", EncryptionKeyType::Auction, 1_700_000_000, 5),
            key(COORDINATOR, "key_2", EncryptionKeyType::Join, 1_700_000_000, TWO_WEEKS_SECS),
        ])
        .unwrap();

        let auction_keys = repo
            .latest_expiry_n_keys(EncryptionKeyType::Auction, COORDINATOR, 2)
            .unwrap();
        assert_eq!(auction_keys.len(), 2);
        assert_eq!(auction_keys[0].key_identifier, "key_1");
        assert_eq!(auction_keys[1].key_identifier, "key_4");

        let join_keys = repo
            .latest_expiry_n_keys(EncryptionKeyType::Join, COORDINATOR, 2)
            .unwrap();
        assert_eq!(join_keys.len(), 1);
        assert_eq!(join_keys[0].key_identifier, "key_2");
    }

    #[test]
    fn test_coordinators_partition_results() {
        let repo = EncryptionKeyRepository::new(make_db());
        repo.insert_keys(&[
            key(COORDINATOR, "key_1", EncryptionKeyType::Auction, 1_700_000_000, 5),
            // A fresher key of the same type under a different coordinator
            // must never leak into the first coordinator's results.
            key(COORDINATOR_2, "key_9", EncryptionKeyType::Auction, 1_700_000_000, TWO_WEEKS_SECS),
        ])
        .unwrap();

        let keys = repo
            .latest_expiry_n_keys(EncryptionKeyType::Auction, COORDINATOR, 2)
            .unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].key_identifier, "key_1");
        assert_eq!(keys[0].coordinator_url, COORDINATOR);

        let keys = repo
            .latest_expiry_n_keys(EncryptionKeyType::Auction, COORDINATOR_2, 2)
            .unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].key_identifier, "key_9");
    }

    #[test]
    fn test_insert_replaces_on_natural_key_collision() {
        let repo = EncryptionKeyRepository::new(make_db());
        repo.insert_keys(&[key(
            COORDINATOR, "key_1", EncryptionKeyType::Auction, 1_700_000_000, 5,
        )])
        .unwrap();
        repo.insert_keys(&[key(
            COORDINATOR, "key_1", EncryptionKeyType::Auction, 1_700_000_100, TWO_WEEKS_SECS,
        )])
        .unwrap();

        let keys = repo
            .latest_expiry_n_keys(EncryptionKeyType::Auction, COORDINATOR, 10)
            .unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].expiry_ttl_seconds, TWO_WEEKS_SECS);
    }

    #[test]
    fn test_active_and_expired_partition_on_as_of() {
        let repo = EncryptionKeyRepository::new(make_db());
        repo.insert_keys(&[
            key(COORDINATOR, "short", EncryptionKeyType::Auction, 1_700_000_000, 5),
            key(COORDINATOR, "long", EncryptionKeyType::Auction, 1_700_000_000, TWO_WEEKS_SECS),
        ])
        .unwrap();

        let as_of = from_unix(1_700_000_100);
        let active = repo
            .latest_expiry_n_active_keys(EncryptionKeyType::Auction, COORDINATOR, as_of, 10)
            .unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].key_identifier, "long");

        let expired = repo
            .expired_keys(EncryptionKeyType::Auction, COORDINATOR, as_of)
            .unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].key_identifier, "short");
    }

    #[test]
    fn test_all_expired_keys_spans_types_and_coordinators() {
        let repo = EncryptionKeyRepository::new(make_db());
        repo.insert_keys(&[
            key(COORDINATOR, "a", EncryptionKeyType::Auction, 1_700_000_000, 5),
            key(COORDINATOR_2, "b", EncryptionKeyType::Join, 1_700_000_000, 5),
            key(COORDINATOR, "c", EncryptionKeyType::Query, 1_700_000_000, TWO_WEEKS_SECS),
        ])
        .unwrap();

        let expired = repo.all_expired_keys(from_unix(1_700_000_100)).unwrap();
        assert_eq!(expired.len(), 2);
    }

    #[test]
    fn test_delete_expired_counts_and_scopes() {
        let repo = EncryptionKeyRepository::new(make_db());
        repo.insert_keys(&[
            key(COORDINATOR, "a", EncryptionKeyType::Auction, 1_700_000_000, 5),
            key(COORDINATOR, "b", EncryptionKeyType::Auction, 1_700_000_000, TWO_WEEKS_SECS),
            key(COORDINATOR_2, "c", EncryptionKeyType::Auction, 1_700_000_000, 5),
        ])
        .unwrap();

        let removed = repo
            .delete_expired(EncryptionKeyType::Auction, COORDINATOR, from_unix(1_700_000_100))
            .unwrap();
        assert_eq!(removed, 1);

        // The other coordinator's expired key is untouched.
        let remaining = repo
            .latest_expiry_n_keys(EncryptionKeyType::Auction, COORDINATOR_2, 10)
            .unwrap();
        assert_eq!(remaining.len(), 1);
    }

    #[test]
    fn test_delete_all() {
        let repo = EncryptionKeyRepository::new(make_db());
        repo.insert_keys(&[
            key(COORDINATOR, "a", EncryptionKeyType::Auction, 1_700_000_000, 5),
            key(COORDINATOR_2, "b", EncryptionKeyType::Join, 1_700_000_000, 5),
        ])
        .unwrap();
        assert_eq!(repo.delete_all().unwrap(), 2);
        assert!(repo
            .latest_expiry_n_keys(EncryptionKeyType::Auction, COORDINATOR, 10)
            .unwrap()
            .is_empty());
    }

    fn context(context_id: i64, creation_secs: i64) -> EncryptionContext {
        EncryptionContext {
            context_id,
            key_type: EncryptionKeyType::Auction,
            key_config: "{\"kem\":1}".to_string(),
            shared_secret: vec![1, 2, 3, 4],
            creation_instant: from_unix(creation_secs),
            has_media_type_changed: false,
        }
    }

    #[test]
    fn test_context_insert_and_get() {
        let repo = EncryptionContextRepository::new(make_db());
        repo.insert(&context(7, 1_700_000_000)).unwrap();

        let read = repo.get(7, EncryptionKeyType::Auction).unwrap().unwrap();
        assert_eq!(read.shared_secret, vec![1, 2, 3, 4]);
        assert!(repo.get(7, EncryptionKeyType::Join).unwrap().is_none());
        assert!(repo.get(8, EncryptionKeyType::Auction).unwrap().is_none());
    }

    #[test]
    fn test_context_remove_expired_is_strictly_before_cutoff() {
        let repo = EncryptionContextRepository::new(make_db());
        repo.insert(&context(1, 1_700_000_000)).unwrap();
        repo.insert(&context(2, 1_700_000_100)).unwrap();

        // Cutoff equal to a context's creation instant retains it.
        let removed = repo.remove_expired(from_unix(1_700_000_100)).unwrap();
        assert_eq!(removed, 1);
        assert!(repo.get(1, EncryptionKeyType::Auction).unwrap().is_none());
        assert!(repo.get(2, EncryptionKeyType::Auction).unwrap().is_some());
    }
}
