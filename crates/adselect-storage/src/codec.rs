//! Column codecs shared by the repositories.
//!
//! Timestamps are stored as unix seconds; ad-counter key sets as JSON text.

use std::collections::BTreeSet;

use chrono::{DateTime, TimeZone, Utc};

use adselect_core::error::{AdSelectError, Result};

pub(crate) fn to_unix(ts: DateTime<Utc>) -> i64 {
    ts.timestamp()
}

pub(crate) fn from_unix(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_default()
}

pub(crate) fn opt_from_unix(secs: Option<i64>) -> Option<DateTime<Utc>> {
    secs.map(from_unix)
}

/// Serialize an ad-counter key set for a TEXT column. Absent stays NULL.
pub(crate) fn keys_to_json(keys: Option<&BTreeSet<i32>>) -> Result<Option<String>> {
    match keys {
        Some(keys) => Ok(Some(serde_json::to_string(keys)?)),
        None => Ok(None),
    }
}

/// Parse an ad-counter key set column. NULL reads back as absent.
pub(crate) fn keys_from_json(json: Option<String>) -> Result<Option<BTreeSet<i32>>> {
    match json {
        Some(json) => {
            let keys: BTreeSet<i32> = serde_json::from_str(&json)
                .map_err(|e| AdSelectError::Storage(format!("Corrupt ad counter keys: {}", e)))?;
            Ok(Some(keys))
        }
        None => Ok(None),
    }
}

/// Placeholder list for an `IN (...)` clause: "?1, ?2, ..., ?n".
pub(crate) fn repeat_vars(count: usize) -> String {
    let mut vars = String::new();
    for i in 1..=count {
        if i > 1 {
            vars.push_str(", ");
        }
        vars.push('?');
        vars.push_str(&i.to_string());
    }
    vars
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unix_round_trip() {
        let ts = from_unix(1_700_000_000);
        assert_eq!(to_unix(ts), 1_700_000_000);
    }

    #[test]
    fn test_keys_round_trip() {
        let keys = BTreeSet::from([3, 1, 2]);
        let json = keys_to_json(Some(&keys)).unwrap().unwrap();
        assert_eq!(keys_from_json(Some(json)).unwrap(), Some(keys));
        assert_eq!(keys_from_json(None).unwrap(), None);
        assert_eq!(keys_to_json(None).unwrap(), None);
    }

    #[test]
    fn test_repeat_vars() {
        assert_eq!(repeat_vars(1), "?1");
        assert_eq!(repeat_vars(3), "?1, ?2, ?3");
    }
}
