//! Repository for developer overrides.
//!
//! Overrides substitute decision logic and trusted scoring signals during
//! development. Every read and delete is scoped by the caller package that
//! created the override; one package's overrides are invisible to another.

use std::sync::Arc;

use adselect_core::error::{AdSelectError, Result};
use adselect_core::types::{BuyerDecisionOverride, DecisionLogicOverride};

use crate::db::{map_sqlite_err, Database, OptionalExt};

pub struct OverrideRepository {
    db: Arc<Database>,
}

impl OverrideRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Persist an override, replacing any existing override for the same
    /// (config_id, caller_package_name).
    pub fn persist_decision_logic_override(&self, o: &DecisionLogicOverride) -> Result<()> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO ad_selection_overrides
                     (ad_selection_config_id, app_package_name, decision_logic,
                      trusted_scoring_signals)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![
                    o.config_id,
                    o.caller_package_name,
                    o.decision_logic_js,
                    o.trusted_scoring_signals,
                ],
            )
            .map_err(map_sqlite_err)?;
            Ok(())
        })
    }

    /// Persist a batch of per-buyer overrides, replacing on key collision.
    pub fn persist_buyer_decision_overrides(
        &self,
        overrides: &[BuyerDecisionOverride],
    ) -> Result<()> {
        self.db.with_tx(|tx| {
            for o in overrides {
                tx.execute(
                    "INSERT OR REPLACE INTO buyer_decision_overrides
                         (ad_selection_config_id, app_package_name, buyer, decision_logic)
                     VALUES (?1, ?2, ?3, ?4)",
                    rusqlite::params![
                        o.config_id,
                        o.caller_package_name,
                        o.buyer,
                        o.decision_logic_js,
                    ],
                )
                .map_err(map_sqlite_err)?;
            }
            Ok(())
        })
    }

    pub fn decision_logic_override_exists(
        &self,
        config_id: &str,
        caller_package_name: &str,
    ) -> Result<bool> {
        self.db.with_conn(|conn| {
            let exists: bool = conn
                .query_row(
                    "SELECT EXISTS(SELECT 1 FROM ad_selection_overrides
                     WHERE ad_selection_config_id = ?1 AND app_package_name = ?2 LIMIT 1)",
                    rusqlite::params![config_id, caller_package_name],
                    |row| row.get(0),
                )
                .map_err(|e| AdSelectError::Storage(e.to_string()))?;
            Ok(exists)
        })
    }

    pub fn get_decision_logic(
        &self,
        config_id: &str,
        caller_package_name: &str,
    ) -> Result<Option<String>> {
        self.db.with_conn(|conn| {
            let logic = conn
                .query_row(
                    "SELECT decision_logic FROM ad_selection_overrides
                     WHERE ad_selection_config_id = ?1 AND app_package_name = ?2",
                    rusqlite::params![config_id, caller_package_name],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|e| AdSelectError::Storage(e.to_string()))?;
            Ok(logic)
        })
    }

    pub fn get_trusted_scoring_signals(
        &self,
        config_id: &str,
        caller_package_name: &str,
    ) -> Result<Option<String>> {
        self.db.with_conn(|conn| {
            let signals = conn
                .query_row(
                    "SELECT trusted_scoring_signals FROM ad_selection_overrides
                     WHERE ad_selection_config_id = ?1 AND app_package_name = ?2",
                    rusqlite::params![config_id, caller_package_name],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|e| AdSelectError::Storage(e.to_string()))?;
            Ok(signals)
        })
    }

    pub fn get_buyer_decision_overrides(
        &self,
        config_id: &str,
        caller_package_name: &str,
    ) -> Result<Vec<BuyerDecisionOverride>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT ad_selection_config_id, app_package_name, buyer, decision_logic
                     FROM buyer_decision_overrides
                     WHERE ad_selection_config_id = ?1 AND app_package_name = ?2",
                )
                .map_err(|e| AdSelectError::Storage(e.to_string()))?;
            let rows = stmt
                .query_map(rusqlite::params![config_id, caller_package_name], |row| {
                    Ok(BuyerDecisionOverride {
                        config_id: row.get(0)?,
                        caller_package_name: row.get(1)?,
                        buyer: row.get(2)?,
                        decision_logic_js: row.get(3)?,
                    })
                })
                .map_err(|e| AdSelectError::Storage(e.to_string()))?;

            let mut overrides = Vec::new();
            for row in rows {
                overrides.push(row.map_err(|e| AdSelectError::Storage(e.to_string()))?);
            }
            Ok(overrides)
        })
    }

    pub fn remove_decision_logic_override(
        &self,
        config_id: &str,
        caller_package_name: &str,
    ) -> Result<()> {
        self.db.with_conn(|conn| {
            conn.execute(
                "DELETE FROM ad_selection_overrides
                 WHERE ad_selection_config_id = ?1 AND app_package_name = ?2",
                rusqlite::params![config_id, caller_package_name],
            )
            .map_err(|e| AdSelectError::Storage(e.to_string()))?;
            Ok(())
        })
    }

    pub fn remove_buyer_decision_overrides(
        &self,
        config_id: &str,
        caller_package_name: &str,
    ) -> Result<()> {
        self.db.with_conn(|conn| {
            conn.execute(
                "DELETE FROM buyer_decision_overrides
                 WHERE ad_selection_config_id = ?1 AND app_package_name = ?2",
                rusqlite::params![config_id, caller_package_name],
            )
            .map_err(|e| AdSelectError::Storage(e.to_string()))?;
            Ok(())
        })
    }

    /// Remove every override a caller package has created, in both tables.
    pub fn remove_all_for_package(&self, caller_package_name: &str) -> Result<()> {
        self.db.with_tx(|tx| {
            tx.execute(
                "DELETE FROM ad_selection_overrides WHERE app_package_name = ?1",
                rusqlite::params![caller_package_name],
            )
            .map_err(|e| AdSelectError::Storage(e.to_string()))?;
            tx.execute(
                "DELETE FROM buyer_decision_overrides WHERE app_package_name = ?1",
                rusqlite::params![caller_package_name],
            )
            .map_err(|e| AdSelectError::Storage(e.to_string()))?;
            Ok(())
        })
    }
}
