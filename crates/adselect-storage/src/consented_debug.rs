//! Repository for the consented debug configuration.
//!
//! At most one configuration is meant to be active at a time: persisting a
//! new one deletes whatever is already stored, inside one transaction.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use adselect_core::error::{AdSelectError, Result};
use adselect_core::types::ConsentedDebugConfiguration;

use crate::codec::{from_unix, to_unix};
use crate::db::{map_sqlite_err, Database};

pub struct ConsentedDebugRepository {
    db: Arc<Database>,
}

impl ConsentedDebugRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Replace the stored configuration with the given one.
    pub fn persist(&self, config: &ConsentedDebugConfiguration) -> Result<()> {
        self.db.with_tx(|tx| {
            tx.execute("DELETE FROM consented_debug_configuration", [])
                .map_err(|e| AdSelectError::Storage(e.to_string()))?;
            tx.execute(
                "INSERT INTO consented_debug_configuration
                     (debug_token, is_consent_provided, creation_timestamp, expiry_timestamp)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![
                    config.debug_token,
                    config.is_consent_provided as i64,
                    to_unix(config.creation_timestamp),
                    to_unix(config.expiry_timestamp),
                ],
            )
            .map_err(map_sqlite_err)?;
            Ok(())
        })
    }

    /// Configurations with consent granted and expiry after `now`, newest
    /// creation first, up to `limit` rows.
    pub fn get_active(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<ConsentedDebugConfiguration>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT debug_token, is_consent_provided, creation_timestamp, expiry_timestamp
                     FROM consented_debug_configuration
                     WHERE is_consent_provided = 1 AND expiry_timestamp > ?1
                     ORDER BY creation_timestamp DESC
                     LIMIT ?2",
                )
                .map_err(|e| AdSelectError::Storage(e.to_string()))?;
            let rows = stmt
                .query_map(rusqlite::params![to_unix(now), limit], |row| {
                    Ok(ConsentedDebugConfiguration {
                        debug_token: row.get(0)?,
                        is_consent_provided: row.get::<_, i64>(1)? != 0,
                        creation_timestamp: from_unix(row.get(2)?),
                        expiry_timestamp: from_unix(row.get(3)?),
                    })
                })
                .map_err(|e| AdSelectError::Storage(e.to_string()))?;

            let mut configs = Vec::new();
            for row in rows {
                configs.push(row.map_err(|e| AdSelectError::Storage(e.to_string()))?);
            }
            Ok(configs)
        })
    }

    pub fn delete_all(&self) -> Result<usize> {
        self.db.with_conn(|conn| {
            let removed = conn
                .execute("DELETE FROM consented_debug_configuration", [])
                .map_err(|e| AdSelectError::Storage(e.to_string()))?;
            Ok(removed)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_db() -> Arc<Database> {
        Arc::new(Database::in_memory().unwrap())
    }

    fn config(token: &str, creation_secs: i64, expiry_secs: i64) -> ConsentedDebugConfiguration {
        ConsentedDebugConfiguration {
            debug_token: token.to_string(),
            is_consent_provided: true,
            creation_timestamp: from_unix(creation_secs),
            expiry_timestamp: from_unix(expiry_secs),
        }
    }

    #[test]
    fn test_persist_replaces_existing_row() {
        let repo = ConsentedDebugRepository::new(make_db());
        repo.persist(&config("token-1", 1_700_000_000, 1_700_100_000)).unwrap();
        repo.persist(&config("token-2", 1_700_000_100, 1_700_100_000)).unwrap();

        let active = repo.get_active(from_unix(1_700_000_200), 10).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].debug_token, "token-2");
    }

    #[test]
    fn test_get_active_filters_expired() {
        let repo = ConsentedDebugRepository::new(make_db());
        repo.persist(&config("token-1", 1_700_000_000, 1_700_000_100)).unwrap();

        assert!(repo.get_active(from_unix(1_700_000_100), 10).unwrap().is_empty());
        assert_eq!(repo.get_active(from_unix(1_700_000_050), 10).unwrap().len(), 1);
    }

    #[test]
    fn test_get_active_filters_withheld_consent() {
        let repo = ConsentedDebugRepository::new(make_db());
        let mut without_consent = config("token-1", 1_700_000_000, 1_700_100_000);
        without_consent.is_consent_provided = false;
        repo.persist(&without_consent).unwrap();

        assert!(repo.get_active(from_unix(1_700_000_050), 10).unwrap().is_empty());
    }

    #[test]
    fn test_delete_all() {
        let repo = ConsentedDebugRepository::new(make_db());
        repo.persist(&config("token-1", 1_700_000_000, 1_700_100_000)).unwrap();
        assert_eq!(repo.delete_all().unwrap(), 1);
        assert!(repo.get_active(from_unix(1_700_000_050), 10).unwrap().is_empty());
    }
}
