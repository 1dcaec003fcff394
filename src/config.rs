/// Columns that must appear in the input header.
pub const REQUIRED_COLUMNS: [&str; 5] = ["session_id", "session_type", "ts", "bar", "event_type"];

/// Payload columns read when present. A missing payload column reads as empty.
pub const PAYLOAD_COLUMNS: [&str; 13] = [
    "zone_id",
    "zone_type",
    "entry_price",
    "exit_price",
    "bars",
    "outcome",
    "escape_vel",
    "vol_ratio",
    "aggression",
    "facilitation",
    "market_state",
    "phase",
    "message",
];

pub const DEFAULT_STALE_BARS: i64 = 50;

/// Prefix a MODE_LOCK message uses to carry the raw market state.
pub const RAW_STATE_PREFIX: &str = "raw:";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Engagement-to-context bar distance beyond which a context is stale.
    pub stale_bars: i64,
    /// `zone_id` value meaning "no zone".
    pub no_zone_id: String,
    /// `zone_type` value meaning "no zone".
    pub no_zone_type: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            stale_bars: DEFAULT_STALE_BARS,
            no_zone_id: "-1".to_string(),
            no_zone_type: "NONE".to_string(),
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            stale_bars: std::env::var("STALE_BARS")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|v: &i64| *v >= 0)
                .unwrap_or(defaults.stale_bars),
            no_zone_id: std::env::var("NO_ZONE_ID").unwrap_or(defaults.no_zone_id),
            no_zone_type: std::env::var("NO_ZONE_TYPE").unwrap_or(defaults.no_zone_type),
        }
    }

    pub fn is_no_zone_id(&self, zone_id: &str) -> bool {
        zone_id.is_empty() || zone_id == self.no_zone_id
    }

    pub fn is_no_zone_type(&self, zone_type: &str) -> bool {
        zone_type.is_empty() || zone_type == self.no_zone_type
    }
}
