//! Schema-selection strategy over the legacy and unified repositories.
//!
//! During the migration window both schemas are live. `SelectionStore` owns
//! one repository per schema plus the selection flag, and every flag-aware
//! read goes through here so call sites never branch on the flag themselves.
//! A unified-tables caller is never served legacy rows and vice versa; the
//! union reads the migration period needs are explicit methods.

use std::sync::Arc;

use adselect_core::error::Result;
use adselect_core::types::{BidAndUri, HistogramInfo, ReportingComputationData, ReportingData};

use crate::ad_selection::AdSelectionRepository;
use crate::db::Database;
use crate::unified::UnifiedSelectionRepository;

pub struct SelectionStore {
    legacy: AdSelectionRepository,
    unified: UnifiedSelectionRepository,
    use_unified_tables: bool,
}

impl SelectionStore {
    pub fn new(db: Arc<Database>, use_unified_tables: bool) -> Self {
        Self {
            legacy: AdSelectionRepository::new(db.clone()),
            unified: UnifiedSelectionRepository::new(db),
            use_unified_tables,
        }
    }

    /// The legacy-schema repository, for writes that are inherently legacy.
    pub fn legacy(&self) -> &AdSelectionRepository {
        &self.legacy
    }

    /// The unified-schema repository, for writes that are inherently unified.
    pub fn unified(&self) -> &UnifiedSelectionRepository {
        &self.unified
    }

    pub fn use_unified_tables(&self) -> bool {
        self.use_unified_tables
    }

    /// Does the id exist in the active schema? A record in the other schema
    /// is invisible to this query.
    pub fn exists(&self, ad_selection_id: i64) -> Result<bool> {
        if self.use_unified_tables {
            self.unified.exists(ad_selection_id)
        } else {
            self.legacy.exists(ad_selection_id)
        }
    }

    /// Does the id exist for the caller in either schema? Used by surfaces
    /// that accept ids from both generations during migration.
    pub fn exists_for_caller_in_either(
        &self,
        ad_selection_id: i64,
        caller_package_name: &str,
    ) -> Result<bool> {
        Ok(self
            .legacy
            .exists_for_caller(ad_selection_id, caller_package_name)?
            || self
                .unified
                .exists_for_caller(ad_selection_id, caller_package_name)?)
    }

    /// Histogram info for the active schema. With unified tables enabled the
    /// legacy table is never consulted; with them disabled the lookup spans
    /// both generations, serving whichever schema holds the id.
    pub fn histogram_info(
        &self,
        ad_selection_id: i64,
        caller_package_name: &str,
    ) -> Result<Option<HistogramInfo>> {
        if self.use_unified_tables {
            return self
                .unified
                .get_histogram_info(ad_selection_id, caller_package_name);
        }
        if let Some(info) = self
            .legacy
            .get_histogram_info(ad_selection_id, caller_package_name)?
        {
            return Ok(Some(info));
        }
        self.unified
            .get_histogram_info(ad_selection_id, caller_package_name)
    }

    /// Reporting state for an auction, or `None` when nothing is recorded.
    ///
    /// Resolved URIs win when present. Otherwise the computation data comes
    /// from the unified info table (flag on) or the legacy entry join (flag
    /// off); the two sources are never mixed for one id.
    pub fn reporting_data_for_id(&self, ad_selection_id: i64) -> Result<Option<ReportingData>> {
        if self.unified.exists(ad_selection_id)? {
            if let Some(uris) = self.unified.get_reporting_uris(ad_selection_id)? {
                return Ok(Some(ReportingData::Uris(uris)));
            }
            if self.use_unified_tables {
                return Ok(self
                    .unified
                    .get_reporting_computation_info(ad_selection_id)?
                    .map(ReportingData::Computation));
            }
            return Ok(None);
        }

        if !self.use_unified_tables {
            if let Some(entry) = self.legacy.get_entry_by_id(ad_selection_id)? {
                return Ok(Some(ReportingData::Computation(ReportingComputationData {
                    buyer_decision_logic_js: entry.buyer_decision_logic_js.unwrap_or_default(),
                    buyer_decision_logic_uri: entry.bidding_logic_uri,
                    seller_contextual_signals: entry.seller_contextual_signals,
                    buyer_contextual_signals: entry.buyer_contextual_signals,
                    winning_custom_audience_signals: entry.custom_audience_signals,
                    winning_render_uri: entry.winning_ad_render_uri,
                    winning_bid: entry.winning_ad_bid,
                })));
            }
        }

        Ok(None)
    }

    /// Of the given ids, those owned by the caller in the active schema; a
    /// flag-off caller sees both generations.
    pub fn ids_for_caller(
        &self,
        ad_selection_ids: &[i64],
        caller_package_name: &str,
    ) -> Result<Vec<i64>> {
        if self.use_unified_tables {
            return self
                .unified
                .get_ids_for_caller(ad_selection_ids, caller_package_name);
        }
        let mut ids = self
            .legacy
            .get_ids_for_caller(ad_selection_ids, caller_package_name)?;
        for id in self
            .unified
            .get_ids_for_caller(ad_selection_ids, caller_package_name)?
        {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        Ok(ids)
    }

    /// Winning bid and URI for a batch of ids from the active schema; a
    /// flag-off caller sees both generations.
    pub fn bids_and_uris_for_ids(&self, ad_selection_ids: &[i64]) -> Result<Vec<BidAndUri>> {
        if self.use_unified_tables {
            return self.unified.get_bids_and_uris(ad_selection_ids);
        }
        let mut results = self.legacy.get_bids_and_uris(ad_selection_ids)?;
        let seen: Vec<i64> = results.iter().map(|r| r.ad_selection_id).collect();
        for result in self.unified.get_bids_and_uris(ad_selection_ids)? {
            if !seen.contains(&result.ad_selection_id) {
                results.push(result);
            }
        }
        Ok(results)
    }
}
