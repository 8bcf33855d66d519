//! Observed transaction records

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// One transaction as shown by an explorer. `hash` is the natural key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Transaction hash
    pub hash: String,
    /// Timestamp as displayed
    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    /// Sender
    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    /// Recipient
    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    /// Value with unit, as displayed
    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// Transaction type or method label
    #[serde(
        rename = "type",
        default,
        deserialize_with = "lenient_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub kind: Option<String>,
    /// Status (success, failed, pending)
    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Free-form detail fields from enrichment
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub details: BTreeMap<String, Value>,
}

impl Transaction {
    /// Bare transaction with only a hash
    pub fn new(hash: impl Into<String>) -> Self {
        Self {
            hash: hash.into(),
            timestamp: None,
            from: None,
            to: None,
            value: None,
            kind: None,
            status: None,
            details: BTreeMap::new(),
        }
    }

    /// Merge a second observation of the same transaction.
    ///
    /// Only fills what is missing here; a populated field is never replaced.
    pub fn absorb(&mut self, other: Self) {
        debug_assert_eq!(self.hash, other.hash, "absorbing a different transaction");
        fill(&mut self.timestamp, other.timestamp);
        fill(&mut self.from, other.from);
        fill(&mut self.to, other.to);
        fill(&mut self.value, other.value);
        fill(&mut self.kind, other.kind);
        fill(&mut self.status, other.status);
        for (key, value) in other.details {
            if value.is_null() {
                continue;
            }
            self.details.entry(key).or_insert(value);
        }
    }

    /// Add enrichment fields, never overwriting populated ones
    pub fn apply_details(&mut self, details: TransactionDetails) {
        for (key, value) in details.into_fields() {
            self.details.entry(key.to_string()).or_insert(Value::String(value));
        }
    }

    /// Parse the displayed timestamp.
    ///
    /// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS` (read as UTC) and unix seconds.
    #[must_use]
    pub fn observed_at(&self) -> Option<DateTime<Utc>> {
        let raw = self.timestamp.as_deref()?.trim();
        if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
            return Some(ts.with_timezone(&Utc));
        }
        for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%b-%d-%Y %I:%M:%S %p"] {
            if let Ok(naive) = NaiveDateTime::parse_from_str(raw.trim_end_matches(" UTC"), format) {
                return Some(naive.and_utc());
            }
        }
        raw.parse::<i64>()
            .ok()
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
    }

    /// Every address this transaction mentions
    pub fn parties(&self) -> impl Iterator<Item = &str> {
        self.from.as_deref().into_iter().chain(self.to.as_deref())
    }
}

fn fill(slot: &mut Option<String>, incoming: Option<String>) {
    if slot.is_none() {
        *slot = incoming;
    }
}

/// Detail panel of one transaction
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionDetails {
    /// Gas used
    #[serde(default, deserialize_with = "lenient_string")]
    pub gas: Option<String>,
    /// Sender nonce
    #[serde(default, deserialize_with = "lenient_string")]
    pub nonce: Option<String>,
    /// Including block
    #[serde(default, deserialize_with = "lenient_string")]
    pub block_number: Option<String>,
    /// Called method
    #[serde(default, deserialize_with = "lenient_string")]
    pub method: Option<String>,
}

impl TransactionDetails {
    /// Whether nothing was observed
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.gas.is_none()
            && self.nonce.is_none()
            && self.block_number.is_none()
            && self.method.is_none()
    }

    fn into_fields(self) -> impl Iterator<Item = (&'static str, String)> {
        [
            ("gas", self.gas),
            ("nonce", self.nonce),
            ("block_number", self.block_number),
            ("method", self.method),
        ]
        .into_iter()
        .filter_map(|(key, value)| value.map(|v| (key, v)))
    }
}

/// Accept strings, numbers and booleans; blank strings count as absent
fn lenient_string<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(Value::Bool(b)) => Some(b.to_string()),
        _ => None,
    })
}

/// Parse one extracted page. Rows without a hash are skipped.
pub(crate) fn parse_page(data: &Value) -> Option<Vec<Transaction>> {
    let rows = data.get("transactions")?.as_array()?;
    Some(
        rows.iter()
            .filter_map(|row| serde_json::from_value::<Transaction>(row.clone()).ok())
            .filter(|tx| !tx.hash.trim().is_empty())
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_absorb_fills_missing_only() {
        let mut seen: Transaction =
            serde_json::from_value(json!({ "hash": "0x1", "from": "0xaaa", "value": "1 ETH" }))
                .unwrap();
        let again: Transaction = serde_json::from_value(
            json!({ "hash": "0x1", "from": "0xbbb", "to": "0xccc", "status": "success" }),
        )
        .unwrap();

        seen.absorb(again);
        assert_eq!(seen.from.as_deref(), Some("0xaaa"));
        assert_eq!(seen.to.as_deref(), Some("0xccc"));
        assert_eq!(seen.value.as_deref(), Some("1 ETH"));
        assert_eq!(seen.status.as_deref(), Some("success"));
    }

    #[test]
    fn test_absent_never_overwrites_populated() {
        let mut seen = Transaction::new("0x1");
        seen.details.insert("gas".into(), json!("21000"));
        let mut again = Transaction::new("0x1");
        again.details.insert("gas".into(), Value::Null);
        again.details.insert("nonce".into(), json!("7"));

        seen.absorb(again);
        assert_eq!(seen.details["gas"], json!("21000"));
        assert_eq!(seen.details["nonce"], json!("7"));
    }

    #[test]
    fn test_lenient_fields() {
        let tx: Transaction = serde_json::from_value(
            json!({ "hash": "0x1", "value": 1.5, "status": "  ", "type": "transfer" }),
        )
        .unwrap();
        assert_eq!(tx.value.as_deref(), Some("1.5"));
        assert_eq!(tx.status, None);
        assert_eq!(tx.kind.as_deref(), Some("transfer"));
    }

    #[test]
    fn test_parse_page_skips_rows_without_hash() {
        let page =
            json!({ "transactions": [{ "hash": "0x1" }, { "from": "0xaaa" }, { "hash": "" }] });
        let txs = parse_page(&page).unwrap();
        assert_eq!(txs.len(), 1);

        assert!(parse_page(&json!({ "transactions": "<table unavailable>" })).is_none());
        assert!(parse_page(&json!([])).is_none());
    }

    #[test]
    fn test_observed_at_formats() {
        let mut tx = Transaction::new("0x1");
        tx.timestamp = Some("2024-03-01T12:00:00Z".into());
        let rfc = tx.observed_at().unwrap();

        tx.timestamp = Some("2024-03-01 12:00:00".into());
        assert_eq!(tx.observed_at(), Some(rfc));

        tx.timestamp = Some(rfc.timestamp().to_string());
        assert_eq!(tx.observed_at(), Some(rfc));

        tx.timestamp = Some("3 days ago".into());
        assert_eq!(tx.observed_at(), None);
    }

    #[test]
    fn test_apply_details() {
        let mut tx = Transaction::new("0x1");
        tx.details.insert("method".into(), json!("transfer"));
        tx.apply_details(TransactionDetails {
            gas: Some("21000".into()),
            method: Some("swap".into()),
            ..TransactionDetails::default()
        });
        assert_eq!(tx.details["gas"], json!("21000"));
        assert_eq!(tx.details["method"], json!("transfer"));
    }
}
