use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Symbol the backend uses for the quote side of a launch pair.
pub const WETH_SYMBOL: &str = "WETH";

/// One side of a pair. The backend fills these from on-chain metadata, so any
/// field may be missing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRef {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
}

impl TokenRef {
    /// Address with empty strings treated as absent.
    pub fn address(&self) -> Option<&str> {
        self.address.as_deref().filter(|a| !a.trim().is_empty())
    }

    pub fn is_weth(&self) -> bool {
        self.symbol
            .as_deref()
            .is_some_and(|s| s.eq_ignore_ascii_case(WETH_SYMBOL))
    }
}

/// A token-launch event as served by `/api/token_events` and `/api/historical_data`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Epoch milliseconds.
    #[serde(default, deserialize_with = "de_i64_lenient")]
    pub timestamp: i64,
    #[serde(default)]
    pub address: String,
    #[serde(default, deserialize_with = "de_token_ref")]
    pub token0: TokenRef,
    #[serde(default, deserialize_with = "de_token_ref")]
    pub token1: TokenRef,
    #[serde(default, deserialize_with = "de_f64_lenient")]
    pub liquidity_eth: f64,
    #[serde(default)]
    pub honeypot: bool,
    #[serde(default)]
    pub ownership_renounced: bool,
}

impl EventRecord {
    pub fn observed_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.timestamp)
    }

    /// The launched token of the pair: the side that is not WETH.
    pub fn primary_token(&self) -> &TokenRef {
        if self.token0.is_weth() {
            &self.token1
        } else {
            &self.token0
        }
    }

    /// Key used to look up token detail: the record's own address, else the
    /// first token's, else the second token's.
    pub fn selection_key(&self) -> Option<&str> {
        Some(self.address.as_str())
            .filter(|a| !a.trim().is_empty())
            .or_else(|| self.token0.address())
            .or_else(|| self.token1.address())
    }
}

/// Response of `/api/token/{address}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetailRecord {
    #[serde(flatten)]
    pub event: EventRecord,
    #[serde(default)]
    pub pair_address: String,
    /// Untyped on-chain payload, shown as-is.
    #[serde(default)]
    pub raw: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub status: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Credentials<'a> {
    pub username: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProfileResponse {
    #[serde(default)]
    pub username: Option<String>,
}

/// `null` or a non-object becomes an empty [`TokenRef`].
fn de_token_ref<'de, D>(deserializer: D) -> Result<TokenRef, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    match value {
        Value::Object(_) => serde_json::from_value(value).map_err(serde::de::Error::custom),
        _ => Ok(TokenRef::default()),
    }
}

/// Accepts a number, a numeric string, or null (as 0.0).
fn de_f64_lenient<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de;

    struct F64Lenient;

    impl de::Visitor<'_> for F64Lenient {
        type Value = f64;

        fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
            write!(f, "a number or numeric string")
        }

        fn visit_f64<E: de::Error>(self, v: f64) -> Result<Self::Value, E> {
            Ok(v)
        }

        #[allow(clippy::cast_precision_loss)]
        fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
            Ok(v as f64)
        }

        #[allow(clippy::cast_precision_loss)]
        fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
            Ok(v as f64)
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
            Ok(v.trim().parse().unwrap_or(0.0))
        }

        fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(0.0)
        }

        fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(0.0)
        }
    }

    deserializer.deserialize_any(F64Lenient)
}

/// Accepts an integer, a float (truncated), a numeric string, or null (as 0).
fn de_i64_lenient<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de;

    struct I64Lenient;

    impl de::Visitor<'_> for I64Lenient {
        type Value = i64;

        fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
            write!(f, "an integer, float, or numeric string")
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
            Ok(v)
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
            Ok(i64::try_from(v).unwrap_or(i64::MAX))
        }

        #[allow(clippy::cast_possible_truncation)]
        fn visit_f64<E: de::Error>(self, v: f64) -> Result<Self::Value, E> {
            Ok(if v.is_finite() { v as i64 } else { 0 })
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
            Ok(v.trim().parse().unwrap_or(0))
        }

        fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(0)
        }

        fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(0)
        }
    }

    deserializer.deserialize_any(I64Lenient)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn weth() -> TokenRef {
        TokenRef {
            name: Some("Wrapped Ether".to_string()),
            symbol: Some("WETH".to_string()),
            address: Some("0xc02a".to_string()),
        }
    }

    fn pepe() -> TokenRef {
        TokenRef {
            name: Some("Pepe".to_string()),
            symbol: Some("PEPE".to_string()),
            address: Some("0x6982".to_string()),
        }
    }

    #[test]
    fn test_deserialize_event_record() {
        let json = r#"{
            "timestamp": 1700000000000,
            "address": "0xpair",
            "liquidity_eth": 4.25,
            "honeypot": false,
            "ownership_renounced": true,
            "token0": {"name": "Pepe", "symbol": "PEPE", "address": "0x6982"},
            "token1": {"name": "Wrapped Ether", "symbol": "WETH", "address": "0xc02a"}
        }"#;
        let record: EventRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.timestamp, 1_700_000_000_000);
        assert_eq!(record.address, "0xpair");
        assert!(record.ownership_renounced);
        assert_eq!(record.token0.symbol.as_deref(), Some("PEPE"));
        assert!((record.liquidity_eth - 4.25).abs() < f64::EPSILON);
    }

    #[test]
    fn test_deserialize_event_record_tolerates_missing_and_odd_fields() {
        let json = r#"{"liquidity_eth": "1.5", "token0": null, "timestamp": 1700000000000.0}"#;
        let record: EventRecord = serde_json::from_str(json).unwrap();
        assert!((record.liquidity_eth - 1.5).abs() < f64::EPSILON);
        assert_eq!(record.token0, TokenRef::default());
        assert_eq!(record.timestamp, 1_700_000_000_000);
        assert!(record.address.is_empty());
        assert!(!record.honeypot);
    }

    #[test]
    fn test_selection_key_prefers_own_address() {
        let record = EventRecord {
            address: "0xpair".to_string(),
            token0: pepe(),
            ..Default::default()
        };
        assert_eq!(record.selection_key(), Some("0xpair"));
    }

    #[test]
    fn test_selection_key_falls_back_to_tokens() {
        let record = EventRecord {
            token0: TokenRef::default(),
            token1: weth(),
            ..Default::default()
        };
        assert_eq!(record.selection_key(), Some("0xc02a"));

        let record = EventRecord {
            token0: pepe(),
            token1: weth(),
            ..Default::default()
        };
        assert_eq!(record.selection_key(), Some("0x6982"));
    }

    #[test]
    fn test_selection_key_none_when_nothing_resolves() {
        let record = EventRecord {
            address: "  ".to_string(),
            token0: TokenRef {
                address: Some(String::new()),
                ..Default::default()
            },
            ..Default::default()
        };
        assert_eq!(record.selection_key(), None);
    }

    #[test]
    fn test_primary_token_skips_weth() {
        let record = EventRecord {
            token0: weth(),
            token1: pepe(),
            ..Default::default()
        };
        assert_eq!(record.primary_token().symbol.as_deref(), Some("PEPE"));

        let record = EventRecord {
            token0: pepe(),
            token1: weth(),
            ..Default::default()
        };
        assert_eq!(record.primary_token().symbol.as_deref(), Some("PEPE"));
    }

    #[test]
    fn test_observed_at_converts_millis() {
        let record = EventRecord {
            timestamp: 1_700_000_000_123,
            ..Default::default()
        };
        let at = record.observed_at().unwrap();
        assert_eq!(at.timestamp_millis(), 1_700_000_000_123);
    }

    #[test]
    fn test_deserialize_detail_record_flattens_event() {
        let json = r#"{
            "address": "0x6982",
            "pair_address": "0xpair",
            "liquidity_eth": 2,
            "honeypot": true,
            "token0": {"symbol": "PEPE"},
            "token1": {"symbol": "WETH"},
            "raw": {"block": 123}
        }"#;
        let detail: DetailRecord = serde_json::from_str(json).unwrap();
        assert_eq!(detail.pair_address, "0xpair");
        assert_eq!(detail.event.address, "0x6982");
        assert!(detail.event.honeypot);
        assert_eq!(detail.raw["block"], 123);
    }
}
