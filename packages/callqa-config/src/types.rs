use serde::Deserialize;
use serde_json::{Map, Value};

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
	pub service: Service,
	pub storage: Storage,
	pub upstream: Upstream,
	pub sync: Ingestion,
	pub auth: Auth,
	pub audio: Audio,
	#[serde(default)]
	pub recovery: Recovery,
	#[serde(default)]
	pub bulk: Bulk,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Service {
	pub http_bind: String,
	pub log_level: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Storage {
	pub postgres: Postgres,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Postgres {
	pub dsn: String,
	pub pool_max_conns: u32,
}

/// Call-log provider endpoint. Per-organization account ids and tokens live in the database.
#[derive(Clone, Debug, Deserialize)]
pub struct Upstream {
	pub api_base: String,
	#[serde(default = "default_upstream_timeout_ms")]
	pub timeout_ms: u64,
	#[serde(default = "default_page_size")]
	pub page_size: u32,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Ingestion {
	/// Width of the trailing window used when a sync is triggered without bounds.
	#[serde(default = "default_lookback_minutes")]
	pub lookback_minutes: i64,
	#[serde(default = "default_interval_seconds")]
	pub interval_seconds: u64,
	#[serde(default = "default_backfill_chunk_hours")]
	pub backfill_chunk_hours: i64,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Auth {
	pub token_secret: String,
	pub issuer: Option<String>,
	#[serde(default = "default_leeway_seconds")]
	pub leeway_seconds: i64,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Audio {
	/// Base URL that serves stored audio objects; signed query parameters are appended to it.
	pub public_base_url: String,
	pub signing_secret: String,
	#[serde(default = "default_signed_url_ttl_seconds")]
	pub signed_url_ttl_seconds: i64,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Recovery {
	pub max_retries: i32,
	pub stale_claim_minutes: i64,
}
impl Default for Recovery {
	fn default() -> Self {
		Self { max_retries: 3, stale_claim_minutes: 30 }
	}
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Bulk {
	pub max_ids: usize,
}
impl Default for Bulk {
	fn default() -> Self {
		Self { max_ids: 500 }
	}
}

fn default_upstream_timeout_ms() -> u64 {
	10_000
}

fn default_page_size() -> u32 {
	1_000
}

fn default_lookback_minutes() -> i64 {
	15
}

fn default_interval_seconds() -> u64 {
	60
}

fn default_backfill_chunk_hours() -> i64 {
	24
}

fn default_leeway_seconds() -> i64 {
	60
}

fn default_signed_url_ttl_seconds() -> i64 {
	3_600
}
