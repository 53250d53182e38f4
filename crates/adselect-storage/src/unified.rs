//! Repository for the unified ad-selection schema.
//!
//! The unified schema splits one auction across an initialization parent row
//! and optional result / reporting-data / reporting-computation-info rows,
//! foreign-keyed to the parent with cascade deletes. Dependent rows can only
//! be written after the initialization row exists.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::types::Value;

use adselect_core::error::{AdSelectError, Result};
use adselect_core::types::{
    AdSelectionInitialization, AdSelectionResultRecord, BidAndUri, CustomAudienceSignals,
    HistogramInfo, ReportingComputationData, ReportingUris, WinningCustomAudience,
};

use crate::codec::{from_unix, keys_from_json, keys_to_json, opt_from_unix, repeat_vars, to_unix};
use crate::db::{map_sqlite_err, Database, OptionalExt};

/// Repository for auctions recorded in the unified tables.
pub struct UnifiedSelectionRepository {
    db: Arc<Database>,
}

impl UnifiedSelectionRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Create the initialization row for an ad selection id.
    ///
    /// Returns `Ok(false)` without writing when the id is already taken in
    /// either the unified or the legacy schema, so callers can probe for a
    /// free id by retrying. Never errors on collision.
    pub fn persist_initialization(
        &self,
        ad_selection_id: i64,
        init: &AdSelectionInitialization,
    ) -> Result<bool> {
        self.db.with_tx(|tx| {
            let in_unified: bool = tx
                .query_row(
                    "SELECT EXISTS(SELECT 1 FROM ad_selection_initialization
                     WHERE ad_selection_id = ?1)",
                    rusqlite::params![ad_selection_id],
                    |row| row.get(0),
                )
                .map_err(|e| AdSelectError::Storage(e.to_string()))?;
            let in_legacy: bool = tx
                .query_row(
                    "SELECT EXISTS(SELECT 1 FROM ad_selection
                     WHERE ad_selection_id = ?1)",
                    rusqlite::params![ad_selection_id],
                    |row| row.get(0),
                )
                .map_err(|e| AdSelectError::Storage(e.to_string()))?;

            if in_unified || in_legacy {
                return Ok(false);
            }

            tx.execute(
                "INSERT INTO ad_selection_initialization
                     (ad_selection_id, seller, caller_package_name, creation_instant)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![
                    ad_selection_id,
                    init.seller,
                    init.caller_package_name,
                    to_unix(init.creation_instant),
                ],
            )
            .map_err(map_sqlite_err)?;
            Ok(true)
        })
    }

    pub fn exists(&self, ad_selection_id: i64) -> Result<bool> {
        self.db.with_conn(|conn| {
            let exists: bool = conn
                .query_row(
                    "SELECT EXISTS(SELECT 1 FROM ad_selection_initialization
                     WHERE ad_selection_id = ?1)",
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
                    "SELECT EXISTS(SELECT 1 FROM ad_selection_initialization
                     WHERE ad_selection_id = ?1 AND caller_package_name = ?2 LIMIT 1)",
                    rusqlite::params![ad_selection_id, caller_package_name],
                    |row| row.get(0),
                )
                .map_err(|e| AdSelectError::Storage(e.to_string()))?;
            Ok(exists)
        })
    }

    pub fn get_initialization(
        &self,
        ad_selection_id: i64,
    ) -> Result<Option<AdSelectionInitialization>> {
        self.db.with_conn(|conn| {
            let result = conn
                .query_row(
                    "SELECT seller, caller_package_name, creation_instant
                     FROM ad_selection_initialization WHERE ad_selection_id = ?1",
                    rusqlite::params![ad_selection_id],
                    |row| {
                        Ok(AdSelectionInitialization {
                            seller: row.get(0)?,
                            caller_package_name: row.get(1)?,
                            creation_instant: from_unix(row.get(2)?),
                        })
                    },
                )
                .optional()
                .map_err(|e| AdSelectError::Storage(e.to_string()))?;
            Ok(result)
        })
    }

    /// Insert the result row for an auction.
    ///
    /// Fails with `Constraint` when the initialization row does not exist or
    /// a result was already recorded for the id.
    pub fn persist_result(
        &self,
        ad_selection_id: i64,
        result: &AdSelectionResultRecord,
    ) -> Result<()> {
        let ca = result.winning_custom_audience.as_ref();
        let ca_keys = match ca {
            Some(ca) => keys_to_json(ca.ad_counter_int_keys.as_ref())?,
            None => None,
        };
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO ad_selection_result
                     (ad_selection_id, winning_ad_bid, winning_ad_render_uri, winning_buyer,
                      winning_custom_audience_name, winning_custom_audience_owner,
                      winning_custom_audience_ad_counter_int_keys)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    ad_selection_id,
                    result.winning_ad_bid,
                    result.winning_ad_render_uri,
                    result.winning_buyer,
                    ca.map(|c| c.name.clone()),
                    ca.map(|c| c.owner.clone()),
                    ca_keys,
                ],
            )
            .map_err(map_sqlite_err)?;
            Ok(())
        })
    }

    pub fn get_result(&self, ad_selection_id: i64) -> Result<Option<AdSelectionResultRecord>> {
        self.db.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT winning_ad_bid, winning_ad_render_uri, winning_buyer,
                            winning_custom_audience_name, winning_custom_audience_owner,
                            winning_custom_audience_ad_counter_int_keys
                     FROM ad_selection_result WHERE ad_selection_id = ?1",
                    rusqlite::params![ad_selection_id],
                    |row| {
                        Ok((
                            row.get::<_, f64>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, Option<String>>(3)?,
                            row.get::<_, Option<String>>(4)?,
                            row.get::<_, Option<String>>(5)?,
                        ))
                    },
                )
                .optional()
                .map_err(|e| AdSelectError::Storage(e.to_string()))?;

            match row {
                Some((bid, uri, buyer, ca_name, ca_owner, ca_keys)) => {
                    let winning_custom_audience = match (ca_name, ca_owner) {
                        (Some(name), Some(owner)) => Some(WinningCustomAudience {
                            name,
                            owner,
                            ad_counter_int_keys: keys_from_json(ca_keys)?,
                        }),
                        _ => None,
                    };
                    Ok(Some(AdSelectionResultRecord {
                        winning_ad_bid: bid,
                        winning_ad_render_uri: uri,
                        winning_buyer: buyer,
                        winning_custom_audience,
                    }))
                }
                None => Ok(None),
            }
        })
    }

    pub fn get_winning_buyer(&self, ad_selection_id: i64) -> Result<Option<String>> {
        self.db.with_conn(|conn| {
            let buyer = conn
                .query_row(
                    "SELECT winning_buyer FROM ad_selection_result WHERE ad_selection_id = ?1",
                    rusqlite::params![ad_selection_id],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|e| AdSelectError::Storage(e.to_string()))?;
            Ok(buyer)
        })
    }

    pub fn get_bid_and_uri(&self, ad_selection_id: i64) -> Result<Option<BidAndUri>> {
        self.db.with_conn(|conn| {
            let result = conn
                .query_row(
                    "SELECT ad_selection_id, winning_ad_bid, winning_ad_render_uri
                     FROM ad_selection_result WHERE ad_selection_id = ?1",
                    rusqlite::params![ad_selection_id],
                    |row| {
                        Ok(BidAndUri {
                            ad_selection_id: row.get(0)?,
                            winning_ad_bid: row.get(1)?,
                            winning_ad_render_uri: row.get(2)?,
                        })
                    },
                )
                .optional()
                .map_err(|e| AdSelectError::Storage(e.to_string()))?;
            Ok(result)
        })
    }

    /// Winning bid and render URI for a batch of ids, unified tables only.
    pub fn get_bids_and_uris(&self, ad_selection_ids: &[i64]) -> Result<Vec<BidAndUri>> {
        if ad_selection_ids.is_empty() {
            return Ok(Vec::new());
        }
        self.db.with_conn(|conn| {
            let sql = format!(
                "SELECT ad_selection_id, winning_ad_bid, winning_ad_render_uri
                 FROM ad_selection_result WHERE ad_selection_id IN ({})",
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

    /// Insert the reporting URIs row. `Constraint` when no initialization
    /// row exists or a reporting row was already written.
    pub fn persist_reporting_uris(&self, ad_selection_id: i64, uris: &ReportingUris) -> Result<()> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO reporting_data
                     (ad_selection_id, buyer_reporting_uri, seller_reporting_uri,
                      component_seller_reporting_uri)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![
                    ad_selection_id,
                    uris.buyer_win_reporting_uri,
                    uris.seller_win_reporting_uri,
                    uris.component_seller_win_reporting_uri,
                ],
            )
            .map_err(map_sqlite_err)?;
            Ok(())
        })
    }

    pub fn get_reporting_uris(&self, ad_selection_id: i64) -> Result<Option<ReportingUris>> {
        self.db.with_conn(|conn| {
            let result = conn
                .query_row(
                    "SELECT buyer_reporting_uri, seller_reporting_uri,
                            component_seller_reporting_uri
                     FROM reporting_data WHERE ad_selection_id = ?1",
                    rusqlite::params![ad_selection_id],
                    |row| {
                        Ok(ReportingUris {
                            buyer_win_reporting_uri: row.get(0)?,
                            seller_win_reporting_uri: row.get(1)?,
                            component_seller_win_reporting_uri: row.get(2)?,
                        })
                    },
                )
                .optional()
                .map_err(|e| AdSelectError::Storage(e.to_string()))?;
            Ok(result)
        })
    }

    /// Insert the raw reporting-computation material for an auction whose
    /// reporting URIs are computed later.
    pub fn persist_reporting_computation_info(
        &self,
        ad_selection_id: i64,
        data: &ReportingComputationData,
    ) -> Result<()> {
        let signals = data.winning_custom_audience_signals.as_ref();
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO reporting_computation_info
                     (ad_selection_id, bidding_logic_uri, buyer_decision_logic_js,
                      seller_contextual_signals, buyer_contextual_signals,
                      custom_audience_signals_owner, custom_audience_signals_buyer,
                      custom_audience_signals_name, custom_audience_signals_activation_time,
                      custom_audience_signals_expiration_time,
                      custom_audience_signals_user_bidding_signals,
                      winning_ad_bid, winning_ad_render_uri)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                rusqlite::params![
                    ad_selection_id,
                    data.buyer_decision_logic_uri,
                    data.buyer_decision_logic_js,
                    data.seller_contextual_signals,
                    data.buyer_contextual_signals,
                    signals.map(|s| s.owner.clone()),
                    signals.map(|s| s.buyer.clone()),
                    signals.map(|s| s.name.clone()),
                    signals.map(|s| to_unix(s.activation_time)),
                    signals.map(|s| to_unix(s.expiration_time)),
                    signals.map(|s| s.user_bidding_signals.clone()),
                    data.winning_bid,
                    data.winning_render_uri,
                ],
            )
            .map_err(map_sqlite_err)?;
            Ok(())
        })
    }

    pub fn reporting_computation_info_exists(&self, ad_selection_id: i64) -> Result<bool> {
        self.db.with_conn(|conn| {
            let exists: bool = conn
                .query_row(
                    "SELECT EXISTS(SELECT 1 FROM reporting_computation_info
                     WHERE ad_selection_id = ?1 LIMIT 1)",
                    rusqlite::params![ad_selection_id],
                    |row| row.get(0),
                )
                .map_err(|e| AdSelectError::Storage(e.to_string()))?;
            Ok(exists)
        })
    }

    pub fn get_reporting_computation_info(
        &self,
        ad_selection_id: i64,
    ) -> Result<Option<ReportingComputationData>> {
        self.db.with_conn(|conn| {
            let result = conn
                .query_row(
                    "SELECT bidding_logic_uri, buyer_decision_logic_js,
                            seller_contextual_signals, buyer_contextual_signals,
                            custom_audience_signals_owner, custom_audience_signals_buyer,
                            custom_audience_signals_name,
                            custom_audience_signals_activation_time,
                            custom_audience_signals_expiration_time,
                            custom_audience_signals_user_bidding_signals,
                            winning_ad_bid, winning_ad_render_uri
                     FROM reporting_computation_info WHERE ad_selection_id = ?1",
                    rusqlite::params![ad_selection_id],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, Option<String>>(2)?,
                            row.get::<_, Option<String>>(3)?,
                            row.get::<_, Option<String>>(4)?,
                            row.get::<_, Option<String>>(5)?,
                            row.get::<_, Option<String>>(6)?,
                            row.get::<_, Option<i64>>(7)?,
                            row.get::<_, Option<i64>>(8)?,
                            row.get::<_, Option<String>>(9)?,
                            row.get::<_, f64>(10)?,
                            row.get::<_, String>(11)?,
                        ))
                    },
                )
                .optional()
                .map_err(|e| AdSelectError::Storage(e.to_string()))?;

            match result {
                Some((
                    uri,
                    js,
                    seller_signals,
                    buyer_signals,
                    ca_owner,
                    ca_buyer,
                    ca_name,
                    ca_activation,
                    ca_expiration,
                    ca_bidding_signals,
                    bid,
                    render_uri,
                )) => {
                    let winning_custom_audience_signals =
                        ca_owner.map(|owner| CustomAudienceSignals {
                            owner,
                            buyer: ca_buyer.unwrap_or_default(),
                            name: ca_name.unwrap_or_default(),
                            activation_time: opt_from_unix(ca_activation).unwrap_or_default(),
                            expiration_time: opt_from_unix(ca_expiration).unwrap_or_default(),
                            user_bidding_signals: ca_bidding_signals.unwrap_or_default(),
                        });
                    Ok(Some(ReportingComputationData {
                        buyer_decision_logic_js: js,
                        buyer_decision_logic_uri: uri,
                        seller_contextual_signals: seller_signals,
                        buyer_contextual_signals: buyer_signals,
                        winning_custom_audience_signals,
                        winning_render_uri: render_uri,
                        winning_bid: bid,
                    }))
                }
                None => Ok(None),
            }
        })
    }

    /// Histogram info served exclusively from the unified tables; an id that
    /// lives only in the legacy schema reads as absent here.
    pub fn get_histogram_info(
        &self,
        ad_selection_id: i64,
        caller_package_name: &str,
    ) -> Result<Option<HistogramInfo>> {
        self.db.with_conn(|conn| {
            let result = conn
                .query_row(
                    "SELECT results.winning_buyer,
                            results.winning_custom_audience_ad_counter_int_keys
                     FROM ad_selection_result results
                     JOIN ad_selection_initialization init
                       ON results.ad_selection_id = init.ad_selection_id
                     WHERE init.ad_selection_id = ?1 AND init.caller_package_name = ?2",
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

    /// Of the given ids, those initialized by the given caller package.
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
                "SELECT ad_selection_id FROM ad_selection_initialization
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

    /// Delete initialization rows created strictly before the cutoff.
    /// Dependent result/reporting rows go with them via cascade.
    pub fn remove_expired_initializations(&self, before: DateTime<Utc>) -> Result<usize> {
        self.db.with_conn(|conn| {
            let removed = conn
                .execute(
                    "DELETE FROM ad_selection_initialization WHERE creation_instant < ?1",
                    rusqlite::params![to_unix(before)],
                )
                .map_err(|e| AdSelectError::Storage(e.to_string()))?;
            Ok(removed)
        })
    }
}
