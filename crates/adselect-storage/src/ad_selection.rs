//! Repository for the legacy ad-selection tables.
//!
//! Covers the single-table ad_selection schema and its buyer_decision_logic
//! side table: strict-insert persistence, the joined entry view, expiry
//! garbage collection, and orphaned decision-logic cleanup.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::types::Value;

use adselect_core::error::{AdSelectError, Result};
use adselect_core::types::{
    AdSelectionEntry, AdSelectionRecord, BidAndUri, BuyerDecisionLogic, CustomAudienceSignals,
    HistogramInfo,
};

use crate::codec::{from_unix, keys_from_json, keys_to_json, opt_from_unix, repeat_vars, to_unix};
use crate::db::{map_sqlite_err, Database, OptionalExt};

/// Repository for completed ad selections in the legacy schema.
pub struct AdSelectionRepository {
    db: Arc<Database>,
}

impl AdSelectionRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Persist a new ad-selection record.
    ///
    /// The id is caller-supplied; persisting an id that already exists is a
    /// `Constraint` error, not an overwrite.
    pub fn persist(&self, record: &AdSelectionRecord) -> Result<()> {
        let signals = record.custom_audience_signals.as_ref();
        let ad_counter_keys = keys_to_json(record.ad_counter_int_keys.as_ref())?;
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO ad_selection (ad_selection_id,
                     custom_audience_signals_owner, custom_audience_signals_buyer,
                     custom_audience_signals_name, custom_audience_signals_activation_time,
                     custom_audience_signals_expiration_time,
                     custom_audience_signals_user_bidding_signals,
                     buyer_contextual_signals, seller_contextual_signals,
                     bidding_logic_uri, winning_ad_render_uri, winning_ad_bid,
                     creation_timestamp, caller_package_name, ad_counter_int_keys)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
                rusqlite::params![
                    record.ad_selection_id,
                    signals.map(|s| s.owner.clone()),
                    signals.map(|s| s.buyer.clone()),
                    signals.map(|s| s.name.clone()),
                    signals.map(|s| to_unix(s.activation_time)),
                    signals.map(|s| to_unix(s.expiration_time)),
                    signals.map(|s| s.user_bidding_signals.clone()),
                    record.buyer_contextual_signals,
                    record.seller_contextual_signals,
                    record.bidding_logic_uri,
                    record.winning_ad_render_uri,
                    record.winning_ad_bid,
                    to_unix(record.creation_timestamp),
                    record.caller_package_name,
                    ad_counter_keys,
                ],
            )
            .map_err(map_sqlite_err)?;
            Ok(())
        })
    }

    /// Write a buyer decision logic entry. Last write wins on URI collision.
    pub fn persist_buyer_decision_logic(&self, logic: &BuyerDecisionLogic) -> Result<()> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO buyer_decision_logic
                     (bidding_logic_uri, buyer_decision_logic_js)
                 VALUES (?1, ?2)",
                rusqlite::params![logic.bidding_logic_uri, logic.buyer_decision_logic_js],
            )
            .map_err(map_sqlite_err)?;
            Ok(())
        })
    }

    pub fn buyer_decision_logic_exists(&self, bidding_logic_uri: &str) -> Result<bool> {
        self.db.with_conn(|conn| {
            let exists: bool = conn
                .query_row(
                    "SELECT EXISTS(SELECT 1 FROM buyer_decision_logic
                     WHERE bidding_logic_uri = ?1 LIMIT 1)",
                    rusqlite::params![bidding_logic_uri],
                    |row| row.get(0),
                )
                .map_err(|e| AdSelectError::Storage(e.to_string()))?;
            Ok(exists)
        })
    }

    pub fn exists(&self, ad_selection_id: i64) -> Result<bool> {
        self.db.with_conn(|conn| {
            let exists: bool = conn
                .query_row(
                    "SELECT EXISTS(SELECT 1 FROM ad_selection
                     WHERE ad_selection_id = ?1 LIMIT 1)",
                    rusqlite::params![ad_selection_id],
                    |row| row.get(0),
                )
                .map_err(|e| AdSelectError::Storage(e.to_string()))?;
            Ok(exists)
        })
    }

    pub fn exists_for_caller(&self, ad_selection_id: i64, caller_package_name: &str) -> Result<bool> {
        self.db.with_conn(|conn| {
            let exists: bool = conn
                .query_row(
                    "SELECT EXISTS(SELECT 1 FROM ad_selection
                     WHERE ad_selection_id = ?1 AND caller_package_name = ?2 LIMIT 1)",
                    rusqlite::params![ad_selection_id, caller_package_name],
                    |row| row.get(0),
                )
                .map_err(|e| AdSelectError::Storage(e.to_string()))?;
            Ok(exists)
        })
    }

    /// Get the joined entry view for an id, or `None` when the id is unknown.
    ///
    /// The decision-logic JS is joined by the record's current bidding logic
    /// URI; contextual records never surface joined JS.
    pub fn get_entry_by_id(&self, ad_selection_id: i64) -> Result<Option<AdSelectionEntry>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(&format!("{} WHERE s.ad_selection_id = ?1", ENTRY_SELECT))
                .map_err(|e| AdSelectError::Storage(e.to_string()))?;

            let result = stmt
                .query_row(rusqlite::params![ad_selection_id], |row| {
                    Ok(row_to_entry(row))
                })
                .optional()
                .map_err(|e| AdSelectError::Storage(e.to_string()))?;

            match result {
                Some(entry) => Ok(Some(entry?)),
                None => Ok(None),
            }
        })
    }

    /// Batch entry lookup; unknown ids are simply absent from the result.
    pub fn get_entries_by_ids(&self, ad_selection_ids: &[i64]) -> Result<Vec<AdSelectionEntry>> {
        if ad_selection_ids.is_empty() {
            return Ok(Vec::new());
        }
        self.db.with_conn(|conn| {
            let sql = format!(
                "{} WHERE s.ad_selection_id IN ({})",
                ENTRY_SELECT,
                repeat_vars(ad_selection_ids.len())
            );
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| AdSelectError::Storage(e.to_string()))?;

            let rows = stmt
                .query_map(
                    rusqlite::params_from_iter(ad_selection_ids.iter()),
                    |row| Ok(row_to_entry(row)),
                )
                .map_err(|e| AdSelectError::Storage(e.to_string()))?;

            let mut entries = Vec::new();
            for row in rows {
                let entry = row.map_err(|e| AdSelectError::Storage(e.to_string()))??;
                entries.push(entry);
            }
            Ok(entries)
        })
    }

    /// Of the given ids, those persisted by the given caller package.
    pub fn get_ids_for_caller(
        &self,
        ad_selection_ids: &[i64],
        caller_package_name: &str,
    ) -> Result<Vec<i64>> {
        if ad_selection_ids.is_empty() {
            return Ok(Vec::new());
        }
        self.db.with_conn(|conn| {
            let sql = format!(
                "SELECT ad_selection_id FROM ad_selection
                 WHERE ad_selection_id IN ({}) AND caller_package_name = ?{}",
                repeat_vars(ad_selection_ids.len()),
                ad_selection_ids.len() + 1
            );
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| AdSelectError::Storage(e.to_string()))?;

            let mut params: Vec<Value> = ad_selection_ids
                .iter()
                .map(|id| Value::Integer(*id))
                .collect();
            params.push(Value::Text(caller_package_name.to_string()));

            let rows = stmt
                .query_map(rusqlite::params_from_iter(params), |row| row.get(0))
                .map_err(|e| AdSelectError::Storage(e.to_string()))?;

            let mut ids = Vec::new();
            for row in rows {
                ids.push(row.map_err(|e| AdSelectError::Storage(e.to_string()))?);
            }
            Ok(ids)
        })
    }

    /// Histogram info scoped to the legacy table; `None` when the id is
    /// unknown or belongs to a different caller.
    pub fn get_histogram_info(
        &self,
        ad_selection_id: i64,
        caller_package_name: &str,
    ) -> Result<Option<HistogramInfo>> {
        self.db.with_conn(|conn| {
            let result = conn
                .query_row(
                    "SELECT custom_audience_signals_buyer, ad_counter_int_keys
                     FROM ad_selection
                     WHERE ad_selection_id = ?1 AND caller_package_name = ?2",
                    rusqlite::params![ad_selection_id, caller_package_name],
                    |row| {
                        Ok((
                            row.get::<_, Option<String>>(0)?,
                            row.get::<_, Option<String>>(1)?,
                        ))
                    },
                )
                .optional()
                .map_err(|e| AdSelectError::Storage(e.to_string()))?;

            match result {
                Some((buyer, keys_json)) => Ok(Some(HistogramInfo {
                    buyer,
                    ad_counter_int_keys: keys_from_json(keys_json)?,
                })),
                None => Ok(None),
            }
        })
    }

    /// Winning bid and render URI for a batch of ids, legacy table only.
    pub fn get_bids_and_uris(&self, ad_selection_ids: &[i64]) -> Result<Vec<BidAndUri>> {
        if ad_selection_ids.is_empty() {
            return Ok(Vec::new());
        }
        self.db.with_conn(|conn| {
            let sql = format!(
                "SELECT ad_selection_id, winning_ad_bid, winning_ad_render_uri
                 FROM ad_selection WHERE ad_selection_id IN ({})",
                repeat_vars(ad_selection_ids.len())
            );
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| AdSelectError::Storage(e.to_string()))?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(ad_selection_ids.iter()), |row| {
                    Ok(BidAndUri {
                        ad_selection_id: row.get(0)?,
                        winning_ad_bid: row.get(1)?,
                        winning_ad_render_uri: row.get(2)?,
                    })
                })
                .map_err(|e| AdSelectError::Storage(e.to_string()))?;

            let mut results = Vec::new();
            for row in rows {
                results.push(row.map_err(|e| AdSelectError::Storage(e.to_string()))?);
            }
            Ok(results)
        })
    }

    /// Delete records created strictly before the cutoff. Returns the number
    /// of records removed.
    pub fn remove_expired(&self, before: DateTime<Utc>) -> Result<usize> {
        self.db.with_conn(|conn| {
            let removed = conn
                .execute(
                    "DELETE FROM ad_selection WHERE creation_timestamp < ?1",
                    rusqlite::params![to_unix(before)],
                )
                .map_err(|e| AdSelectError::Storage(e.to_string()))?;
            Ok(removed)
        })
    }

    /// Delete records in batch by id. Unknown ids are a no-op, not an error.
    pub fn remove_by_ids(&self, ad_selection_ids: &[i64]) -> Result<()> {
        if ad_selection_ids.is_empty() {
            return Ok(());
        }
        self.db.with_conn(|conn| {
            let sql = format!(
                "DELETE FROM ad_selection WHERE ad_selection_id IN ({})",
                repeat_vars(ad_selection_ids.len())
            );
            conn.execute(&sql, rusqlite::params_from_iter(ad_selection_ids.iter()))
                .map_err(|e| AdSelectError::Storage(e.to_string()))?;
            Ok(())
        })
    }

    /// Delete buyer decision logic rows whose URI is referenced by no live
    /// ad-selection record. Returns the number of rows removed.
    pub fn remove_orphaned_buyer_decision_logic(&self) -> Result<usize> {
        self.db.with_conn(|conn| {
            let removed = conn
                .execute(
                    "DELETE FROM buyer_decision_logic WHERE bidding_logic_uri NOT IN
                         (SELECT DISTINCT bidding_logic_uri
                          FROM ad_selection
                          WHERE bidding_logic_uri IS NOT NULL)",
                    [],
                )
                .map_err(|e| AdSelectError::Storage(e.to_string()))?;
            Ok(removed)
        })
    }

    /// Count total ad-selection records.
    pub fn count(&self) -> Result<u64> {
        self.db.with_conn(|conn| {
            let count: i64 = conn
                .query_row("SELECT COUNT(*) FROM ad_selection", [], |row| row.get(0))
                .map_err(|e| AdSelectError::Storage(e.to_string()))?;
            Ok(count as u64)
        })
    }
}

// The CASE keeps the contextual invariant out of the row mapper: a
// contextual record never carries joined decision-logic JS, even when a
// logic row exists for the same URI.
const ENTRY_SELECT: &str = "SELECT s.ad_selection_id,
       s.custom_audience_signals_owner, s.custom_audience_signals_buyer,
       s.custom_audience_signals_name, s.custom_audience_signals_activation_time,
       s.custom_audience_signals_expiration_time,
       s.custom_audience_signals_user_bidding_signals,
       s.buyer_contextual_signals, s.seller_contextual_signals,
       s.winning_ad_render_uri, s.winning_ad_bid, s.creation_timestamp,
       CASE WHEN s.custom_audience_signals_owner IS NULL THEN NULL
            ELSE b.buyer_decision_logic_js END AS buyer_decision_logic_js,
       s.bidding_logic_uri
 FROM ad_selection s
 LEFT JOIN buyer_decision_logic b ON s.bidding_logic_uri = b.bidding_logic_uri";

fn row_to_entry(row: &rusqlite::Row<'_>) -> Result<AdSelectionEntry> {
    let storage_err = |e: rusqlite::Error| AdSelectError::Storage(e.to_string());

    let ad_selection_id: i64 = row.get(0).map_err(storage_err)?;
    let signals_owner: Option<String> = row.get(1).map_err(storage_err)?;

    let custom_audience_signals = match signals_owner {
        Some(owner) => {
            let buyer: Option<String> = row.get(2).map_err(storage_err)?;
            let name: Option<String> = row.get(3).map_err(storage_err)?;
            let activation: Option<i64> = row.get(4).map_err(storage_err)?;
            let expiration: Option<i64> = row.get(5).map_err(storage_err)?;
            let user_bidding_signals: Option<String> = row.get(6).map_err(storage_err)?;
            Some(CustomAudienceSignals {
                owner,
                buyer: buyer.unwrap_or_default(),
                name: name.unwrap_or_default(),
                activation_time: opt_from_unix(activation).unwrap_or_default(),
                expiration_time: opt_from_unix(expiration).unwrap_or_default(),
                user_bidding_signals: user_bidding_signals.unwrap_or_default(),
            })
        }
        None => None,
    };

    let buyer_contextual_signals: Option<String> = row.get(7).map_err(storage_err)?;
    let seller_contextual_signals: Option<String> = row.get(8).map_err(storage_err)?;
    let winning_ad_render_uri: String = row.get(9).map_err(storage_err)?;
    let winning_ad_bid: f64 = row.get(10).map_err(storage_err)?;
    let creation_timestamp: i64 = row.get(11).map_err(storage_err)?;
    let buyer_decision_logic_js: Option<String> = row.get(12).map_err(storage_err)?;
    let bidding_logic_uri: String = row.get(13).map_err(storage_err)?;

    AdSelectionEntry::new(
        ad_selection_id,
        custom_audience_signals,
        buyer_contextual_signals,
        seller_contextual_signals,
        winning_ad_render_uri,
        winning_ad_bid,
        from_unix(creation_timestamp),
        buyer_decision_logic_js,
        bidding_logic_uri,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    const CALLER: &str = "com.example.caller";
    const BIDDING_URI: &str = "https://buyer.example.com/bidding";

    fn make_db() -> Arc<Database> {
        Arc::new(Database::in_memory().unwrap())
    }

    fn sample_signals() -> CustomAudienceSignals {
        CustomAudienceSignals {
            owner: "com.example.app".to_string(),
            buyer: "buyer.example.com".to_string(),
            name: "shoes".to_string(),
            activation_time: from_unix(1_700_000_000),
            expiration_time: from_unix(1_700_086_400),
            user_bidding_signals: "{\"signals\":1}".to_string(),
        }
    }

    fn remarketing_record(id: i64) -> AdSelectionRecord {
        AdSelectionRecord::builder()
            .ad_selection_id(id)
            .custom_audience_signals(sample_signals())
            .bidding_logic_uri(BIDDING_URI)
            .winning_ad_render_uri("https://buyer.example.com/render")
            .winning_ad_bid(5.0)
            .creation_timestamp(from_unix(1_700_000_000))
            .caller_package_name(CALLER)
            .build()
            .unwrap()
    }

    fn contextual_record(id: i64) -> AdSelectionRecord {
        AdSelectionRecord::builder()
            .ad_selection_id(id)
            .bidding_logic_uri(BIDDING_URI)
            .winning_ad_render_uri("https://seller.example.com/render")
            .winning_ad_bid(2.0)
            .creation_timestamp(from_unix(1_700_000_000))
            .caller_package_name(CALLER)
            .build()
            .unwrap()
    }

    fn decision_logic() -> BuyerDecisionLogic {
        BuyerDecisionLogic {
            bidding_logic_uri: BIDDING_URI.to_string(),
            buyer_decision_logic_js: "function generateBid() {}".to_string(),
        }
    }

    #[test]
    fn test_persist_and_get_entry() {
        let repo = AdSelectionRepository::new(make_db());
        repo.persist(&remarketing_record(1)).unwrap();
        repo.persist_buyer_decision_logic(&decision_logic()).unwrap();

        let entry = repo.get_entry_by_id(1).unwrap().unwrap();
        assert_eq!(entry.ad_selection_id, 1);
        assert_eq!(
            entry.buyer_decision_logic_js.as_deref(),
            Some("function generateBid() {}")
        );
        assert_eq!(entry.bidding_logic_uri, BIDDING_URI);
        assert_eq!(
            entry.custom_audience_signals.as_ref().unwrap().buyer,
            "buyer.example.com"
        );
    }

    #[test]
    fn test_get_entry_unknown_id_is_absent() {
        let repo = AdSelectionRepository::new(make_db());
        assert!(repo.get_entry_by_id(404).unwrap().is_none());
    }

    #[test]
    fn test_persist_duplicate_id_is_constraint_violation() {
        let repo = AdSelectionRepository::new(make_db());
        repo.persist(&remarketing_record(1)).unwrap();
        let result = repo.persist(&remarketing_record(1));
        assert!(matches!(result, Err(AdSelectError::Constraint(_))));
    }

    #[test]
    fn test_contextual_entry_has_no_decision_logic() {
        let repo = AdSelectionRepository::new(make_db());
        repo.persist(&contextual_record(1)).unwrap();
        // A decision-logic row exists for the same URI, but a contextual
        // entry must not surface it.
        repo.persist_buyer_decision_logic(&decision_logic()).unwrap();

        let entry = repo.get_entry_by_id(1).unwrap().unwrap();
        assert!(entry.is_contextual());
        assert!(entry.buyer_decision_logic_js.is_none());
        assert!(entry.custom_audience_signals.is_none());
    }

    #[test]
    fn test_buyer_decision_logic_last_write_wins() {
        let repo = AdSelectionRepository::new(make_db());
        repo.persist(&remarketing_record(1)).unwrap();
        repo.persist_buyer_decision_logic(&decision_logic()).unwrap();
        repo.persist_buyer_decision_logic(&BuyerDecisionLogic {
            bidding_logic_uri: BIDDING_URI.to_string(),
            buyer_decision_logic_js: "function generateBidV2() {}".to_string(),
        })
        .unwrap();

        let entry = repo.get_entry_by_id(1).unwrap().unwrap();
        assert_eq!(
            entry.buyer_decision_logic_js.as_deref(),
            Some("function generateBidV2() {}")
        );
    }

    #[test]
    fn test_exists_and_exists_for_caller() {
        let repo = AdSelectionRepository::new(make_db());
        repo.persist(&remarketing_record(1)).unwrap();

        assert!(repo.exists(1).unwrap());
        assert!(!repo.exists(2).unwrap());
        assert!(repo.exists_for_caller(1, CALLER).unwrap());
        assert!(!repo.exists_for_caller(1, "com.other.app").unwrap());
    }

    #[test]
    fn test_remove_expired_keeps_newer_records() {
        let repo = AdSelectionRepository::new(make_db());
        repo.persist(&remarketing_record(1)).unwrap();

        let mut newer = remarketing_record(2);
        newer.creation_timestamp = from_unix(1_700_500_000);
        repo.persist(&newer).unwrap();

        let removed = repo.remove_expired(from_unix(1_700_250_000)).unwrap();
        assert_eq!(removed, 1);
        assert!(!repo.exists(1).unwrap());
        assert!(repo.exists(2).unwrap());
    }

    #[test]
    fn test_remove_by_ids_ignores_unknown() {
        let repo = AdSelectionRepository::new(make_db());
        repo.persist(&remarketing_record(1)).unwrap();
        repo.remove_by_ids(&[1, 42, 99]).unwrap();
        assert_eq!(repo.count().unwrap(), 0);
    }

    #[test]
    fn test_remove_orphaned_buyer_decision_logic() {
        let repo = AdSelectionRepository::new(make_db());
        repo.persist(&remarketing_record(1)).unwrap();
        repo.persist_buyer_decision_logic(&decision_logic()).unwrap();
        repo.persist_buyer_decision_logic(&BuyerDecisionLogic {
            bidding_logic_uri: "https://other.example.com/bidding".to_string(),
            buyer_decision_logic_js: "function() {}".to_string(),
        })
        .unwrap();

        let removed = repo.remove_orphaned_buyer_decision_logic().unwrap();
        assert_eq!(removed, 1);
        assert!(repo.buyer_decision_logic_exists(BIDDING_URI).unwrap());
        assert!(!repo
            .buyer_decision_logic_exists("https://other.example.com/bidding")
            .unwrap());

        // Once the referencing record goes away, the logic row is orphaned.
        repo.remove_by_ids(&[1]).unwrap();
        let removed = repo.remove_orphaned_buyer_decision_logic().unwrap();
        assert_eq!(removed, 1);
    }

    #[test]
    fn test_histogram_info_scoped_by_caller() {
        let repo = AdSelectionRepository::new(make_db());
        let mut record = remarketing_record(1);
        record.ad_counter_int_keys = Some(BTreeSet::from([1, 2]));
        repo.persist(&record).unwrap();

        let info = repo.get_histogram_info(1, CALLER).unwrap().unwrap();
        assert_eq!(info.buyer.as_deref(), Some("buyer.example.com"));
        assert_eq!(info.ad_counter_int_keys, Some(BTreeSet::from([1, 2])));

        assert!(repo.get_histogram_info(1, "com.other.app").unwrap().is_none());
        assert!(repo.get_histogram_info(2, CALLER).unwrap().is_none());
    }

    #[test]
    fn test_histogram_info_contextual_has_no_buyer() {
        let repo = AdSelectionRepository::new(make_db());
        repo.persist(&contextual_record(1)).unwrap();

        let info = repo.get_histogram_info(1, CALLER).unwrap().unwrap();
        assert!(info.buyer.is_none());
        assert!(info.ad_counter_int_keys.is_none());
    }

    #[test]
    fn test_get_entries_by_ids() {
        let repo = AdSelectionRepository::new(make_db());
        repo.persist(&remarketing_record(1)).unwrap();
        repo.persist(&remarketing_record(2)).unwrap();

        let entries = repo.get_entries_by_ids(&[1, 2, 3]).unwrap();
        assert_eq!(entries.len(), 2);
    }

    #[test]
    fn test_get_ids_for_caller() {
        let repo = AdSelectionRepository::new(make_db());
        repo.persist(&remarketing_record(1)).unwrap();
        let mut other = remarketing_record(2);
        other.caller_package_name = "com.other.app".to_string();
        repo.persist(&other).unwrap();

        let ids = repo.get_ids_for_caller(&[1, 2], CALLER).unwrap();
        assert_eq!(ids, vec![1]);
    }

    #[test]
    fn test_get_bids_and_uris() {
        let repo = AdSelectionRepository::new(make_db());
        repo.persist(&remarketing_record(1)).unwrap();

        let results = repo.get_bids_and_uris(&[1]).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].winning_ad_bid, 5.0);
        assert_eq!(
            results[0].winning_ad_render_uri,
            "https://buyer.example.com/render"
        );
    }
}
