//! Repository for registered ad interactions.
//!
//! Interaction callback URIs are composite-keyed by (ad_selection_id,
//! interaction_key, destination). The registry is capacity-limited: inserts
//! through `register_safely` honor a total-table ceiling and a
//! per-(id, destination) ceiling, silently dropping whatever does not fit.

use std::sync::Arc;

use tracing::debug;

use adselect_core::error::{AdSelectError, Result};
use adselect_core::types::{RegisteredAdInteraction, ReportingDestination};

use crate::db::{map_sqlite_err, Database, OptionalExt};

pub struct InteractionRepository {
    db: Arc<Database>,
}

impl InteractionRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Bulk upsert with no capacity check; last write wins on key collision.
    ///
    /// Not meant for registration paths that must respect the table caps;
    /// use [`register_safely`](Self::register_safely) there.
    pub fn register(
        &self,
        ad_selection_id: i64,
        destination: ReportingDestination,
        interactions: &[RegisteredAdInteraction],
    ) -> Result<()> {
        self.db.with_tx(|tx| {
            for interaction in interactions {
                tx.execute(
                    "INSERT OR REPLACE INTO registered_ad_interactions
                         (ad_selection_id, interaction_key, destination,
                          interaction_reporting_uri)
                     VALUES (?1, ?2, ?3, ?4)",
                    rusqlite::params![
                        ad_selection_id,
                        interaction.interaction_key,
                        destination.code(),
                        interaction.interaction_reporting_uri,
                    ],
                )
                .map_err(map_sqlite_err)?;
            }
            Ok(())
        })
    }

    /// Insert interactions while honoring both capacity ceilings.
    ///
    /// Interactions are considered in input order; once either the total
    /// table size or the per-(id, destination) count would exceed its cap,
    /// that interaction and all following ones are dropped. Earlier accepted
    /// rows stay committed. Callers learn what was persisted only by
    /// querying afterwards.
    ///
    /// The count checks and the inserts run in one transaction, so a
    /// concurrent writer cannot slip rows in between check and insert.
    pub fn register_safely(
        &self,
        ad_selection_id: i64,
        destination: ReportingDestination,
        interactions: &[RegisteredAdInteraction],
        max_total_interactions: i64,
        max_per_destination: i64,
    ) -> Result<()> {
        self.db.with_tx(|tx| {
            let current_total: i64 = tx
                .query_row("SELECT COUNT(*) FROM registered_ad_interactions", [], |row| {
                    row.get(0)
                })
                .map_err(|e| AdSelectError::Storage(e.to_string()))?;

            if current_total >= max_total_interactions {
                debug!("Interaction registry max table size reached, skipping entire list");
                return Ok(());
            }

            let current_per_destination: i64 = tx
                .query_row(
                    "SELECT COUNT(*) FROM registered_ad_interactions
                     WHERE ad_selection_id = ?1 AND destination = ?2",
                    rusqlite::params![ad_selection_id, destination.code()],
                    |row| row.get(0),
                )
                .map_err(|e| AdSelectError::Storage(e.to_string()))?;

            if current_per_destination >= max_per_destination {
                debug!(
                    ad_selection_id,
                    "Interaction registry per-destination cap reached, skipping entire list"
                );
                return Ok(());
            }

            let available_total = (max_total_interactions - current_total).max(0);
            let available_per_destination = (max_per_destination - current_per_destination).max(0);
            let num_to_commit = (interactions.len() as i64)
                .min(available_total)
                .min(available_per_destination) as usize;

            if num_to_commit < interactions.len() {
                debug!(
                    dropped = interactions.len() - num_to_commit,
                    "Interaction registry truncating batch to fit caps"
                );
            }

            for interaction in &interactions[..num_to_commit] {
                tx.execute(
                    "INSERT OR REPLACE INTO registered_ad_interactions
                         (ad_selection_id, interaction_key, destination,
                          interaction_reporting_uri)
                     VALUES (?1, ?2, ?3, ?4)",
                    rusqlite::params![
                        ad_selection_id,
                        interaction.interaction_key,
                        destination.code(),
                        interaction.interaction_reporting_uri,
                    ],
                )
                .map_err(map_sqlite_err)?;
            }
            Ok(())
        })
    }

    /// Reporting URI for one composite key, or `None` when unregistered.
    pub fn get_uri(
        &self,
        ad_selection_id: i64,
        interaction_key: &str,
        destination: ReportingDestination,
    ) -> Result<Option<String>> {
        self.db.with_conn(|conn| {
            let uri = conn
                .query_row(
                    "SELECT interaction_reporting_uri FROM registered_ad_interactions
                     WHERE ad_selection_id = ?1 AND interaction_key = ?2 AND destination = ?3",
                    rusqlite::params![ad_selection_id, interaction_key, destination.code()],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|e| AdSelectError::Storage(e.to_string()))?;
            Ok(uri)
        })
    }

    pub fn exists(
        &self,
        ad_selection_id: i64,
        interaction_key: &str,
        destination: ReportingDestination,
    ) -> Result<bool> {
        Ok(self
            .get_uri(ad_selection_id, interaction_key, destination)?
            .is_some())
    }

    /// All interactions registered for an auction and destination; empty
    /// when nothing is registered.
    pub fn list(
        &self,
        ad_selection_id: i64,
        destination: ReportingDestination,
    ) -> Result<Vec<RegisteredAdInteraction>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT interaction_key, interaction_reporting_uri
                     FROM registered_ad_interactions
                     WHERE ad_selection_id = ?1 AND destination = ?2",
                )
                .map_err(|e| AdSelectError::Storage(e.to_string()))?;

            let rows = stmt
                .query_map(
                    rusqlite::params![ad_selection_id, destination.code()],
                    |row| {
                        Ok(RegisteredAdInteraction {
                            interaction_key: row.get(0)?,
                            interaction_reporting_uri: row.get(1)?,
                        })
                    },
                )
                .map_err(|e| AdSelectError::Storage(e.to_string()))?;

            let mut interactions = Vec::new();
            for row in rows {
                interactions.push(row.map_err(|e| AdSelectError::Storage(e.to_string()))?);
            }
            Ok(interactions)
        })
    }

    /// Total rows in the registry, the cheap capacity probe.
    pub fn count_total(&self) -> Result<i64> {
        self.db.with_conn(|conn| {
            let count: i64 = conn
                .query_row("SELECT COUNT(*) FROM registered_ad_interactions", [], |row| {
                    row.get(0)
                })
                .map_err(|e| AdSelectError::Storage(e.to_string()))?;
            Ok(count)
        })
    }

    pub fn count_for_destination(
        &self,
        ad_selection_id: i64,
        destination: ReportingDestination,
    ) -> Result<i64> {
        self.db.with_conn(|conn| {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM registered_ad_interactions
                     WHERE ad_selection_id = ?1 AND destination = ?2",
                    rusqlite::params![ad_selection_id, destination.code()],
                    |row| row.get(0),
                )
                .map_err(|e| AdSelectError::Storage(e.to_string()))?;
            Ok(count)
        })
    }

    /// Delete interactions whose ad selection no longer exists in the legacy
    /// table. The interaction lifecycle follows its auction, not its own
    /// timestamp.
    pub fn remove_expired(&self) -> Result<usize> {
        self.db.with_conn(|conn| {
            let removed = conn
                .execute(
                    "DELETE FROM registered_ad_interactions WHERE ad_selection_id NOT IN
                         (SELECT DISTINCT ad_selection_id FROM ad_selection)",
                    [],
                )
                .map_err(|e| AdSelectError::Storage(e.to_string()))?;
            Ok(removed)
        })
    }

    /// As [`remove_expired`](Self::remove_expired), but driven by the
    /// unified initialization table.
    pub fn remove_expired_unified(&self) -> Result<usize> {
        self.db.with_conn(|conn| {
            let removed = conn
                .execute(
                    "DELETE FROM registered_ad_interactions WHERE ad_selection_id NOT IN
                         (SELECT DISTINCT ad_selection_id FROM ad_selection_initialization)",
                    [],
                )
                .map_err(|e| AdSelectError::Storage(e.to_string()))?;
            Ok(removed)
        })
    }
}
