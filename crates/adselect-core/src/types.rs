use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AdSelectError, Result};

// =============================================================================
// Enums
// =============================================================================

/// Destination a registered ad interaction reports to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportingDestination {
    Seller,
    Buyer,
    ComponentSeller,
}

impl ReportingDestination {
    /// Stable integer code used in the composite primary key.
    pub fn code(&self) -> i64 {
        match self {
            ReportingDestination::Seller => 1,
            ReportingDestination::Buyer => 2,
            ReportingDestination::ComponentSeller => 3,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(ReportingDestination::Seller),
            2 => Some(ReportingDestination::Buyer),
            3 => Some(ReportingDestination::ComponentSeller),
            _ => None,
        }
    }
}

/// The role an encryption key plays, partitioning key storage per coordinator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncryptionKeyType {
    Auction,
    Join,
    Query,
}

impl EncryptionKeyType {
    pub fn code(&self) -> i64 {
        match self {
            EncryptionKeyType::Auction => 1,
            EncryptionKeyType::Join => 2,
            EncryptionKeyType::Query => 3,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(EncryptionKeyType::Auction),
            2 => Some(EncryptionKeyType::Join),
            3 => Some(EncryptionKeyType::Query),
            _ => None,
        }
    }
}

// =============================================================================
// Legacy ad-selection records
// =============================================================================

/// Signals describing the custom audience a remarketing ad was served from.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CustomAudienceSignals {
    pub owner: String,
    pub buyer: String,
    pub name: String,
    pub activation_time: DateTime<Utc>,
    pub expiration_time: DateTime<Utc>,
    pub user_bidding_signals: String,
}

/// A completed on-device ad-selection outcome.
///
/// Either a remarketing record (custom-audience signals present) or a
/// contextual record (signals absent). Both carry a bidding logic URI; the
/// decision-logic JS itself lives in a separate [`BuyerDecisionLogic`] row
/// keyed by that URI.
///
/// Construct through [`AdSelectionRecord::builder`], which enforces the field
/// invariants before the record can reach storage.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AdSelectionRecord {
    pub ad_selection_id: i64,
    pub custom_audience_signals: Option<CustomAudienceSignals>,
    pub buyer_contextual_signals: Option<String>,
    pub seller_contextual_signals: Option<String>,
    pub bidding_logic_uri: String,
    pub winning_ad_render_uri: String,
    pub winning_ad_bid: f64,
    pub creation_timestamp: DateTime<Utc>,
    pub caller_package_name: String,
    pub ad_counter_int_keys: Option<BTreeSet<i32>>,
}

impl AdSelectionRecord {
    pub fn builder() -> AdSelectionRecordBuilder {
        AdSelectionRecordBuilder::default()
    }

    /// A contextual record has no custom-audience signals.
    pub fn is_contextual(&self) -> bool {
        self.custom_audience_signals.is_none()
    }
}

/// Builder for [`AdSelectionRecord`]; `build` rejects malformed records with
/// a `Validation` error before they reach storage.
#[derive(Default)]
pub struct AdSelectionRecordBuilder {
    ad_selection_id: Option<i64>,
    custom_audience_signals: Option<CustomAudienceSignals>,
    buyer_contextual_signals: Option<String>,
    seller_contextual_signals: Option<String>,
    bidding_logic_uri: Option<String>,
    winning_ad_render_uri: Option<String>,
    winning_ad_bid: Option<f64>,
    creation_timestamp: Option<DateTime<Utc>>,
    caller_package_name: Option<String>,
    ad_counter_int_keys: Option<BTreeSet<i32>>,
}

impl AdSelectionRecordBuilder {
    pub fn ad_selection_id(mut self, id: i64) -> Self {
        self.ad_selection_id = Some(id);
        self
    }

    pub fn custom_audience_signals(mut self, signals: CustomAudienceSignals) -> Self {
        self.custom_audience_signals = Some(signals);
        self
    }

    pub fn buyer_contextual_signals(mut self, signals: impl Into<String>) -> Self {
        self.buyer_contextual_signals = Some(signals.into());
        self
    }

    pub fn seller_contextual_signals(mut self, signals: impl Into<String>) -> Self {
        self.seller_contextual_signals = Some(signals.into());
        self
    }

    pub fn bidding_logic_uri(mut self, uri: impl Into<String>) -> Self {
        self.bidding_logic_uri = Some(uri.into());
        self
    }

    pub fn winning_ad_render_uri(mut self, uri: impl Into<String>) -> Self {
        self.winning_ad_render_uri = Some(uri.into());
        self
    }

    pub fn winning_ad_bid(mut self, bid: f64) -> Self {
        self.winning_ad_bid = Some(bid);
        self
    }

    pub fn creation_timestamp(mut self, ts: DateTime<Utc>) -> Self {
        self.creation_timestamp = Some(ts);
        self
    }

    pub fn caller_package_name(mut self, name: impl Into<String>) -> Self {
        self.caller_package_name = Some(name.into());
        self
    }

    pub fn ad_counter_int_keys(mut self, keys: BTreeSet<i32>) -> Self {
        self.ad_counter_int_keys = Some(keys);
        self
    }

    pub fn build(self) -> Result<AdSelectionRecord> {
        let ad_selection_id = self
            .ad_selection_id
            .ok_or_else(|| AdSelectError::Validation("ad selection id is required".into()))?;
        if ad_selection_id == 0 {
            return Err(AdSelectError::Validation(
                "ad selection id must be nonzero".into(),
            ));
        }

        let caller_package_name = match self.caller_package_name {
            Some(name) if !name.is_empty() => name,
            _ => {
                return Err(AdSelectError::Validation(
                    "caller package name is required".into(),
                ))
            }
        };

        // Required for both remarketing and contextual records.
        let bidding_logic_uri = match self.bidding_logic_uri {
            Some(uri) if !uri.is_empty() => uri,
            _ => {
                return Err(AdSelectError::Validation(
                    "bidding logic uri is required".into(),
                ))
            }
        };

        let winning_ad_render_uri = match self.winning_ad_render_uri {
            Some(uri) if !uri.is_empty() => uri,
            _ => {
                return Err(AdSelectError::Validation(
                    "winning ad render uri is required".into(),
                ))
            }
        };

        // Empty set normalized to absent.
        let ad_counter_int_keys = self.ad_counter_int_keys.filter(|keys| !keys.is_empty());

        Ok(AdSelectionRecord {
            ad_selection_id,
            custom_audience_signals: self.custom_audience_signals,
            buyer_contextual_signals: self.buyer_contextual_signals,
            seller_contextual_signals: self.seller_contextual_signals,
            bidding_logic_uri,
            winning_ad_render_uri,
            winning_ad_bid: self.winning_ad_bid.unwrap_or(0.0),
            creation_timestamp: self.creation_timestamp.unwrap_or_else(Utc::now),
            caller_package_name,
            ad_counter_int_keys,
        })
    }
}

/// Decision-logic JS fetched from a buyer, keyed by its bidding logic URI.
/// Last write wins on URI collision.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BuyerDecisionLogic {
    pub bidding_logic_uri: String,
    pub buyer_decision_logic_js: String,
}

/// Read-only join of an [`AdSelectionRecord`] with its [`BuyerDecisionLogic`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AdSelectionEntry {
    pub ad_selection_id: i64,
    pub custom_audience_signals: Option<CustomAudienceSignals>,
    pub buyer_contextual_signals: Option<String>,
    pub seller_contextual_signals: Option<String>,
    pub winning_ad_render_uri: String,
    pub winning_ad_bid: f64,
    pub creation_timestamp: DateTime<Utc>,
    pub buyer_decision_logic_js: Option<String>,
    pub bidding_logic_uri: String,
}

impl AdSelectionEntry {
    /// Validates the remarketing/contextual split: a contextual entry must
    /// not carry buyer decision-logic JS or custom-audience signals.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ad_selection_id: i64,
        custom_audience_signals: Option<CustomAudienceSignals>,
        buyer_contextual_signals: Option<String>,
        seller_contextual_signals: Option<String>,
        winning_ad_render_uri: String,
        winning_ad_bid: f64,
        creation_timestamp: DateTime<Utc>,
        buyer_decision_logic_js: Option<String>,
        bidding_logic_uri: String,
    ) -> Result<Self> {
        if custom_audience_signals.is_none() && buyer_decision_logic_js.is_some() {
            return Err(AdSelectError::Validation(
                "a contextual ad selection entry cannot carry buyer decision logic".into(),
            ));
        }

        Ok(AdSelectionEntry {
            ad_selection_id,
            custom_audience_signals,
            buyer_contextual_signals,
            seller_contextual_signals,
            winning_ad_render_uri,
            winning_ad_bid,
            creation_timestamp,
            buyer_decision_logic_js,
            bidding_logic_uri,
        })
    }

    pub fn is_contextual(&self) -> bool {
        self.custom_audience_signals.is_none()
    }
}

/// Histogram bookkeeping for a single ad selection: the winning buyer and the
/// ad counter keys the winning ad carried. Contextual selections have no
/// winning custom-audience buyer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HistogramInfo {
    pub buyer: Option<String>,
    pub ad_counter_int_keys: Option<BTreeSet<i32>>,
}

// =============================================================================
// Registered ad interactions
// =============================================================================

/// A post-auction interaction callback URI, composite-keyed by
/// (ad_selection_id, interaction_key, destination).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RegisteredAdInteraction {
    pub interaction_key: String,
    pub interaction_reporting_uri: String,
}

// =============================================================================
// Unified-schema records
// =============================================================================

/// Parent row of the unified schema: one per ad selection id.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AdSelectionInitialization {
    pub seller: String,
    pub caller_package_name: String,
    pub creation_instant: DateTime<Utc>,
}

/// Winning custom-audience payload stored with a unified result row.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WinningCustomAudience {
    pub name: String,
    pub owner: String,
    pub ad_counter_int_keys: Option<BTreeSet<i32>>,
}

/// Winning bid and render URI of an ad selection run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BidAndUri {
    pub ad_selection_id: i64,
    pub winning_ad_bid: f64,
    pub winning_ad_render_uri: String,
}

/// Full result row of the unified schema: winning bid, buyer, and the
/// winning custom-audience payload (absent for contextual wins).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AdSelectionResultRecord {
    pub winning_ad_bid: f64,
    pub winning_ad_render_uri: String,
    pub winning_buyer: String,
    pub winning_custom_audience: Option<WinningCustomAudience>,
}

/// Reporting URIs for a completed auction. Any of the three may be absent;
/// an omitted URI reads back as `None`, never an empty-string placeholder.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportingUris {
    pub buyer_win_reporting_uri: Option<String>,
    pub seller_win_reporting_uri: Option<String>,
    pub component_seller_win_reporting_uri: Option<String>,
}

/// Raw material needed to compute reporting URIs after the fact, when the
/// auction finished without resolved URIs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReportingComputationData {
    pub buyer_decision_logic_js: String,
    pub buyer_decision_logic_uri: String,
    pub seller_contextual_signals: Option<String>,
    pub buyer_contextual_signals: Option<String>,
    pub winning_custom_audience_signals: Option<CustomAudienceSignals>,
    pub winning_render_uri: String,
    pub winning_bid: f64,
}

/// Reporting state of an ad selection: either resolved URIs or the data to
/// compute them later. The two variants are mutually exclusive by
/// construction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ReportingData {
    Uris(ReportingUris),
    Computation(ReportingComputationData),
}

// =============================================================================
// Encryption keys and contexts
// =============================================================================

/// Per-coordinator, per-type encryption key material with TTL-based expiry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EncryptionKey {
    pub coordinator_url: String,
    pub key_identifier: String,
    pub public_key: String,
    pub key_type: EncryptionKeyType,
    pub creation_instant: DateTime<Utc>,
    pub expiry_ttl_seconds: i64,
}

impl EncryptionKey {
    /// The instant this key expires: `creation_instant + expiry_ttl_seconds`.
    pub fn expiry_instant(&self) -> DateTime<Utc> {
        self.creation_instant + chrono::Duration::seconds(self.expiry_ttl_seconds)
    }
}

/// Encryption context keyed by (context_id, key_type), expired by
/// creation instant.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EncryptionContext {
    pub context_id: i64,
    pub key_type: EncryptionKeyType,
    pub key_config: String,
    pub shared_secret: Vec<u8>,
    pub creation_instant: DateTime<Utc>,
    pub has_media_type_changed: bool,
}

// =============================================================================
// Developer overrides and debug configuration
// =============================================================================

/// Developer override for seller decision logic and trusted scoring signals,
/// scoped by (config_id, caller_package_name).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DecisionLogicOverride {
    pub config_id: String,
    pub caller_package_name: String,
    pub decision_logic_js: String,
    pub trusted_scoring_signals: String,
}

/// Developer override for one buyer's decision logic, scoped by
/// (config_id, buyer, caller_package_name).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BuyerDecisionOverride {
    pub config_id: String,
    pub caller_package_name: String,
    pub buyer: String,
    pub decision_logic_js: String,
}

/// Consent grant for debug reporting, at most one active at a time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConsentedDebugConfiguration {
    pub debug_token: String,
    pub is_consent_provided: bool,
    pub creation_timestamp: DateTime<Utc>,
    pub expiry_timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_signals() -> CustomAudienceSignals {
        CustomAudienceSignals {
            owner: "com.example.app".to_string(),
            buyer: "buyer.example.com".to_string(),
            name: "shoes".to_string(),
            activation_time: Utc::now(),
            expiration_time: Utc::now() + chrono::Duration::days(1),
            user_bidding_signals: "{}".to_string(),
        }
    }

    fn base_builder() -> AdSelectionRecordBuilder {
        AdSelectionRecord::builder()
            .ad_selection_id(1)
            .bidding_logic_uri("https://buyer.example.com/bidding")
            .winning_ad_render_uri("https://buyer.example.com/render")
            .winning_ad_bid(5.0)
            .caller_package_name("com.example.caller")
    }

    #[test]
    fn test_build_remarketing_record() {
        let record = base_builder()
            .custom_audience_signals(sample_signals())
            .build()
            .unwrap();
        assert!(!record.is_contextual());
        assert_eq!(record.ad_selection_id, 1);
    }

    #[test]
    fn test_build_contextual_record() {
        let record = base_builder().build().unwrap();
        assert!(record.is_contextual());
    }

    #[test]
    fn test_build_rejects_zero_id() {
        let result = AdSelectionRecord::builder()
            .ad_selection_id(0)
            .bidding_logic_uri("https://buyer.example.com/bidding")
            .winning_ad_render_uri("https://buyer.example.com/render")
            .caller_package_name("com.example.caller")
            .build();
        assert!(matches!(result, Err(AdSelectError::Validation(_))));
    }

    #[test]
    fn test_build_rejects_missing_caller_package() {
        let result = AdSelectionRecord::builder()
            .ad_selection_id(1)
            .bidding_logic_uri("https://buyer.example.com/bidding")
            .winning_ad_render_uri("https://buyer.example.com/render")
            .build();
        assert!(matches!(result, Err(AdSelectError::Validation(_))));
    }

    #[test]
    fn test_build_rejects_missing_bidding_logic_uri() {
        // Required for contextual records too.
        let result = AdSelectionRecord::builder()
            .ad_selection_id(1)
            .winning_ad_render_uri("https://buyer.example.com/render")
            .caller_package_name("com.example.caller")
            .build();
        assert!(matches!(result, Err(AdSelectError::Validation(_))));

        let result = AdSelectionRecord::builder()
            .ad_selection_id(1)
            .custom_audience_signals(sample_signals())
            .winning_ad_render_uri("https://buyer.example.com/render")
            .caller_package_name("com.example.caller")
            .build();
        assert!(matches!(result, Err(AdSelectError::Validation(_))));
    }

    #[test]
    fn test_empty_ad_counter_keys_normalized_to_none() {
        let record = base_builder()
            .ad_counter_int_keys(BTreeSet::new())
            .build()
            .unwrap();
        assert!(record.ad_counter_int_keys.is_none());

        let record = base_builder()
            .ad_counter_int_keys(BTreeSet::from([1, 2, 3]))
            .build()
            .unwrap();
        assert_eq!(record.ad_counter_int_keys, Some(BTreeSet::from([1, 2, 3])));
    }

    #[test]
    fn test_contextual_entry_rejects_decision_logic() {
        let result = AdSelectionEntry::new(
            1,
            None,
            None,
            None,
            "https://seller.example.com/render".to_string(),
            2.0,
            Utc::now(),
            Some("function reportWin() {}".to_string()),
            "https://buyer.example.com/bidding".to_string(),
        );
        assert!(matches!(result, Err(AdSelectError::Validation(_))));
    }

    #[test]
    fn test_remarketing_entry_accepts_decision_logic() {
        let entry = AdSelectionEntry::new(
            1,
            Some(sample_signals()),
            None,
            None,
            "https://buyer.example.com/render".to_string(),
            2.0,
            Utc::now(),
            Some("function reportWin() {}".to_string()),
            "https://buyer.example.com/bidding".to_string(),
        )
        .unwrap();
        assert!(!entry.is_contextual());
    }

    #[test]
    fn test_destination_code_round_trip() {
        for dest in [
            ReportingDestination::Seller,
            ReportingDestination::Buyer,
            ReportingDestination::ComponentSeller,
        ] {
            assert_eq!(ReportingDestination::from_code(dest.code()), Some(dest));
        }
        assert_eq!(ReportingDestination::from_code(99), None);
    }

    #[test]
    fn test_key_type_code_round_trip() {
        for key_type in [
            EncryptionKeyType::Auction,
            EncryptionKeyType::Join,
            EncryptionKeyType::Query,
        ] {
            assert_eq!(EncryptionKeyType::from_code(key_type.code()), Some(key_type));
        }
        assert_eq!(EncryptionKeyType::from_code(0), None);
    }

    #[test]
    fn test_encryption_key_expiry_instant() {
        let creation = Utc::now();
        let key = EncryptionKey {
            coordinator_url: "https://coordinator.example.com".to_string(),
            key_identifier: "key_id_1".to_string(),
            public_key: "public_key_1".to_string(),
            key_type: EncryptionKeyType::Auction,
            creation_instant: creation,
            expiry_ttl_seconds: 1209600,
        };
        assert_eq!(
            key.expiry_instant(),
            creation + chrono::Duration::seconds(1209600)
        );
    }
}
