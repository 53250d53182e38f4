//! Database schema migrations.
//!
//! Applies the initial schema: the legacy ad_selection/buyer_decision_logic
//! tables, the unified initialization/result/reporting chain, the interaction
//! registry, encryption key storage, developer overrides, and the
//! schema_migrations tracking table.

use rusqlite::Connection;
use tracing::info;

use adselect_core::error::AdSelectError;

/// Run all pending database migrations.
///
/// Currently implements the initial schema (version 1). Future migrations
/// can be added by checking the current version and applying incremental changes.
pub fn run_migrations(conn: &Connection) -> Result<(), AdSelectError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )
    .map_err(|e| AdSelectError::Storage(format!("Failed to create migrations table: {}", e)))?;

    let current_version: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(|e| AdSelectError::Storage(format!("Failed to query migration version: {}", e)))?;

    if current_version < 1 {
        apply_v1(conn)?;
        info!("Applied migration v1: initial_schema");
    }

    Ok(())
}

/// Version 1: Initial schema.
fn apply_v1(conn: &Connection) -> Result<(), AdSelectError> {
    conn.execute_batch(
        "
        -- Legacy single-table schema: one row per completed ad selection.
        CREATE TABLE IF NOT EXISTS ad_selection (
            ad_selection_id                                 INTEGER PRIMARY KEY NOT NULL,
            custom_audience_signals_owner                   TEXT,
            custom_audience_signals_buyer                   TEXT,
            custom_audience_signals_name                    TEXT,
            custom_audience_signals_activation_time         INTEGER,
            custom_audience_signals_expiration_time         INTEGER,
            custom_audience_signals_user_bidding_signals    TEXT,
            buyer_contextual_signals                        TEXT,
            seller_contextual_signals                       TEXT,
            bidding_logic_uri                               TEXT NOT NULL,
            winning_ad_render_uri                           TEXT NOT NULL,
            winning_ad_bid                                  REAL NOT NULL,
            creation_timestamp                              INTEGER NOT NULL,
            caller_package_name                             TEXT NOT NULL,
            ad_counter_int_keys                             TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_ad_selection_caller
            ON ad_selection (caller_package_name);

        CREATE INDEX IF NOT EXISTS idx_ad_selection_creation
            ON ad_selection (creation_timestamp ASC);

        CREATE INDEX IF NOT EXISTS idx_ad_selection_bidding_uri
            ON ad_selection (bidding_logic_uri);

        -- Buyer decision logic, joined into entries by URI.
        CREATE TABLE IF NOT EXISTS buyer_decision_logic (
            bidding_logic_uri       TEXT PRIMARY KEY NOT NULL,
            buyer_decision_logic_js TEXT NOT NULL
        );

        -- Unified schema: parent row, unique per ad selection id.
        CREATE TABLE IF NOT EXISTS ad_selection_initialization (
            ad_selection_id     INTEGER PRIMARY KEY NOT NULL,
            seller              TEXT NOT NULL,
            caller_package_name TEXT NOT NULL,
            creation_instant    INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_initialization_caller
            ON ad_selection_initialization (caller_package_name);

        CREATE INDEX IF NOT EXISTS idx_initialization_creation
            ON ad_selection_initialization (creation_instant ASC);

        CREATE TABLE IF NOT EXISTS ad_selection_result (
            ad_selection_id                             INTEGER PRIMARY KEY NOT NULL,
            winning_ad_bid                              REAL NOT NULL,
            winning_ad_render_uri                       TEXT NOT NULL,
            winning_buyer                               TEXT NOT NULL,
            winning_custom_audience_name                TEXT,
            winning_custom_audience_owner               TEXT,
            winning_custom_audience_ad_counter_int_keys TEXT,
            FOREIGN KEY (ad_selection_id)
                REFERENCES ad_selection_initialization(ad_selection_id)
                ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS reporting_data (
            ad_selection_id                 INTEGER PRIMARY KEY NOT NULL,
            buyer_reporting_uri             TEXT,
            seller_reporting_uri            TEXT,
            component_seller_reporting_uri  TEXT,
            FOREIGN KEY (ad_selection_id)
                REFERENCES ad_selection_initialization(ad_selection_id)
                ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS reporting_computation_info (
            ad_selection_id                              INTEGER PRIMARY KEY NOT NULL,
            bidding_logic_uri                            TEXT NOT NULL,
            buyer_decision_logic_js                      TEXT NOT NULL,
            seller_contextual_signals                    TEXT,
            buyer_contextual_signals                     TEXT,
            custom_audience_signals_owner                TEXT,
            custom_audience_signals_buyer                TEXT,
            custom_audience_signals_name                 TEXT,
            custom_audience_signals_activation_time      INTEGER,
            custom_audience_signals_expiration_time      INTEGER,
            custom_audience_signals_user_bidding_signals TEXT,
            winning_ad_bid                               REAL NOT NULL,
            winning_ad_render_uri                        TEXT NOT NULL,
            FOREIGN KEY (ad_selection_id)
                REFERENCES ad_selection_initialization(ad_selection_id)
                ON DELETE CASCADE
        );

        -- Interaction registry, composite-keyed; capacity caps are enforced
        -- at insert time by the repository, not the schema.
        CREATE TABLE IF NOT EXISTS registered_ad_interactions (
            ad_selection_id           INTEGER NOT NULL,
            interaction_key           TEXT NOT NULL,
            destination               INTEGER NOT NULL
                                      CHECK (destination IN (1, 2, 3)),
            interaction_reporting_uri TEXT NOT NULL,
            PRIMARY KEY (ad_selection_id, interaction_key, destination)
        );

        CREATE INDEX IF NOT EXISTS idx_interactions_id_destination
            ON registered_ad_interactions (ad_selection_id, destination);

        -- Per-coordinator, per-type encryption key material.
        CREATE TABLE IF NOT EXISTS encryption_keys (
            coordinator_url     TEXT NOT NULL,
            key_identifier      TEXT NOT NULL,
            key_type            INTEGER NOT NULL
                                CHECK (key_type IN (1, 2, 3)),
            public_key          TEXT NOT NULL,
            creation_instant    INTEGER NOT NULL,
            expiry_ttl_seconds  INTEGER NOT NULL,
            expiry_instant      INTEGER NOT NULL,
            PRIMARY KEY (coordinator_url, key_type, key_identifier)
        );

        CREATE INDEX IF NOT EXISTS idx_encryption_keys_expiry
            ON encryption_keys (key_type, coordinator_url, expiry_instant DESC);

        CREATE TABLE IF NOT EXISTS encryption_context (
            context_id              INTEGER NOT NULL,
            key_type                INTEGER NOT NULL
                                    CHECK (key_type IN (1, 2, 3)),
            key_config              TEXT NOT NULL,
            shared_secret           BLOB NOT NULL,
            creation_instant        INTEGER NOT NULL,
            has_media_type_changed  INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (context_id, key_type)
        );

        CREATE INDEX IF NOT EXISTS idx_encryption_context_creation
            ON encryption_context (creation_instant ASC);

        -- Developer overrides, scoped by caller package.
        CREATE TABLE IF NOT EXISTS ad_selection_overrides (
            ad_selection_config_id  TEXT NOT NULL,
            app_package_name        TEXT NOT NULL,
            decision_logic          TEXT NOT NULL,
            trusted_scoring_signals TEXT NOT NULL,
            PRIMARY KEY (ad_selection_config_id, app_package_name)
        );

        CREATE TABLE IF NOT EXISTS buyer_decision_overrides (
            ad_selection_config_id  TEXT NOT NULL,
            app_package_name        TEXT NOT NULL,
            buyer                   TEXT NOT NULL,
            decision_logic          TEXT NOT NULL,
            PRIMARY KEY (ad_selection_config_id, app_package_name, buyer)
        );

        CREATE TABLE IF NOT EXISTS consented_debug_configuration (
            id                  INTEGER PRIMARY KEY AUTOINCREMENT,
            debug_token         TEXT NOT NULL,
            is_consent_provided INTEGER NOT NULL,
            creation_timestamp  INTEGER NOT NULL,
            expiry_timestamp    INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_consented_debug_creation
            ON consented_debug_configuration (creation_timestamp DESC);

        CREATE TABLE IF NOT EXISTS app_install_permissions (
            package_name TEXT NOT NULL,
            buyer        TEXT NOT NULL,
            PRIMARY KEY (package_name, buyer)
        );

        -- Record migration.
        INSERT OR IGNORE INTO schema_migrations (version, name) VALUES (1, 'initial_schema');
        ",
    )
    .map_err(|e| AdSelectError::Storage(format!("Failed to apply migration v1: {}", e)))?;

    Ok(())
}
