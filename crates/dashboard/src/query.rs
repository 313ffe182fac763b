//! Filter state for one view and its compilation into request parameters.

use chrono::{DateTime, Local, TimeDelta, TimeZone, Utc};
use serde::{Deserialize, Serialize};

pub const KEY_TEXT: &str = "q";
pub const KEY_MIN_LIQUIDITY: &str = "min_liquidity";
pub const KEY_OWNERSHIP: &str = "ownership";
pub const KEY_HONEYPOT: &str = "honeypot";
pub const KEY_START_MS: &str = "start_ms";
pub const KEY_END_MS: &str = "end_ms";

/// Every key a compiled query can contain, in emission order.
pub const QUERY_KEYS: [&str; 6] = [
    KEY_TEXT,
    KEY_MIN_LIQUIDITY,
    KEY_OWNERSHIP,
    KEY_HONEYPOT,
    KEY_START_MS,
    KEY_END_MS,
];

/// Current query criteria for one view. `None` means "no constraint".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterState {
    pub text: Option<String>,
    pub min_liquidity: Option<f64>,
    pub ownership_renounced: Option<bool>,
    pub honeypot: Option<bool>,
    pub start_ms: Option<i64>,
    pub end_ms: Option<i64>,
}

impl FilterState {
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_min_liquidity(mut self, eth: f64) -> Self {
        self.min_liquidity = Some(eth);
        self
    }

    /// Sets the minimum liquidity from user-typed text. Anything that does not
    /// parse to a finite number clears the constraint.
    pub fn with_min_liquidity_input(mut self, input: &str) -> Self {
        self.min_liquidity = input.trim().parse::<f64>().ok().filter(|v| v.is_finite());
        self
    }

    pub fn with_ownership_renounced(mut self, renounced: Option<bool>) -> Self {
        self.ownership_renounced = renounced;
        self
    }

    pub fn with_honeypot(mut self, honeypot: Option<bool>) -> Self {
        self.honeypot = honeypot;
        self
    }

    pub fn with_range(mut self, start_ms: Option<i64>, end_ms: Option<i64>) -> Self {
        self.start_ms = start_ms;
        self.end_ms = end_ms;
        self
    }

    /// Range covering the `window` that ends at `now`. A window reaching
    /// past the representable calendar drops the range.
    pub fn within_last(self, now: DateTime<Utc>, window: TimeDelta) -> Self {
        match now.checked_sub_signed(window) {
            Some(start) => {
                self.with_range(Some(start.timestamp_millis()), Some(now.timestamp_millis()))
            }
            None => self.with_range(None, None),
        }
    }

    /// Open-ended range starting at local midnight of `now`'s day.
    pub fn since_start_of_day(self, now: DateTime<Utc>) -> Self {
        let local = now.with_timezone(&Local).date_naive();
        let start = local
            .and_hms_opt(0, 0, 0)
            .and_then(|midnight| Local.from_local_datetime(&midnight).earliest())
            .map(|dt| dt.timestamp_millis());
        self.with_range(start, None)
    }

    pub fn is_unconstrained(&self) -> bool {
        compile(self).is_empty()
    }
}

/// Ordered request parameters derived from a [`FilterState`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct CanonicalQuery {
    pairs: Vec<(&'static str, String)>,
}

impl CanonicalQuery {
    pub fn pairs(&self) -> &[(&'static str, String)] {
        &self.pairs
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn to_owned_pairs(&self) -> Vec<(String, String)> {
        self.pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }
}

fn bool_literal(b: bool) -> String {
    if b { "true" } else { "false" }.to_string()
}

/// Maps filter criteria to request parameters.
///
/// Empty or unusable criteria are omitted, never reported: blank text,
/// non-finite liquidity, and a time range whose start is after its end (both
/// bounds are dropped).
pub fn compile(filter: &FilterState) -> CanonicalQuery {
    let mut pairs = Vec::with_capacity(QUERY_KEYS.len());

    // Text goes out as typed; only a blank value is left out.
    if let Some(text) = filter.text.as_deref().filter(|t| !t.trim().is_empty()) {
        pairs.push((KEY_TEXT, text.to_string()));
    }
    if let Some(min) = filter.min_liquidity.filter(|v| v.is_finite()) {
        // `Display` for f64 is the shortest exact decimal form.
        pairs.push((KEY_MIN_LIQUIDITY, min.to_string()));
    }
    if let Some(renounced) = filter.ownership_renounced {
        pairs.push((KEY_OWNERSHIP, bool_literal(renounced)));
    }
    if let Some(honeypot) = filter.honeypot {
        pairs.push((KEY_HONEYPOT, bool_literal(honeypot)));
    }

    let inverted = matches!((filter.start_ms, filter.end_ms), (Some(s), Some(e)) if s > e);
    if !inverted {
        if let Some(start) = filter.start_ms {
            pairs.push((KEY_START_MS, start.to_string()));
        }
        if let Some(end) = filter.end_ms {
            pairs.push((KEY_END_MS, end.to_string()));
        }
    }

    CanonicalQuery { pairs }
}
