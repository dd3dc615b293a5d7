mod error;
mod types;

pub use error::{Error, Result};
pub use types::{Audio, Auth, Bulk, Config, Ingestion, Postgres, Recovery, Service, Storage, Upstream};

use std::{fs, path::Path};

use url::Url;

const MAX_PAGE_SIZE: u32 = 5_000;
const MAX_LOOKBACK_MINUTES: i64 = 60 * 24 * 31;
const MAX_INTERVAL_SECONDS: u64 = 60 * 60 * 24;
const MAX_BACKFILL_CHUNK_HOURS: i64 = 24 * 366;
const MAX_LEEWAY_SECONDS: i64 = 60 * 60;
const MAX_SIGNED_URL_TTL_SECONDS: i64 = 60 * 60 * 24 * 7;
const MAX_STALE_CLAIM_MINUTES: i64 = 60 * 24 * 7;

pub fn load(path: &Path) -> Result<Config> {
	let raw = fs::read_to_string(path)
		.map_err(|err| Error::ReadConfig { path: path.to_path_buf(), source: err })?;
	let mut cfg: Config = toml::from_str(&raw)
		.map_err(|err| Error::ParseConfig { path: path.to_path_buf(), source: err })?;

	normalize(&mut cfg);

	validate(&cfg)?;

	Ok(cfg)
}

pub fn validate(cfg: &Config) -> Result<()> {
	if cfg.service.http_bind.trim().is_empty() {
		return Err(Error::Validation {
			message: "service.http_bind must be non-empty.".to_string(),
		});
	}
	if cfg.storage.postgres.dsn.trim().is_empty() {
		return Err(Error::Validation {
			message: "storage.postgres.dsn must be non-empty.".to_string(),
		});
	}
	if cfg.storage.postgres.pool_max_conns == 0 {
		return Err(Error::Validation {
			message: "storage.postgres.pool_max_conns must be greater than zero.".to_string(),
		});
	}
	if !cfg.upstream.api_base.starts_with("http://") && !cfg.upstream.api_base.starts_with("https://")
	{
		return Err(Error::Validation {
			message: "upstream.api_base must be an http or https URL.".to_string(),
		});
	}
	if cfg.upstream.timeout_ms == 0 {
		return Err(Error::Validation {
			message: "upstream.timeout_ms must be greater than zero.".to_string(),
		});
	}
	if cfg.upstream.page_size == 0 || cfg.upstream.page_size > MAX_PAGE_SIZE {
		return Err(Error::Validation {
			message: format!("upstream.page_size must be in the range 1-{MAX_PAGE_SIZE}."),
		});
	}
	if cfg.upstream.default_headers.values().any(|value| !value.is_string()) {
		return Err(Error::Validation {
			message: "upstream.default_headers values must be strings.".to_string(),
		});
	}
	if !(1..=MAX_LOOKBACK_MINUTES).contains(&cfg.sync.lookback_minutes) {
		return Err(Error::Validation {
			message: format!(
				"sync.lookback_minutes must be in the range 1-{MAX_LOOKBACK_MINUTES}."
			),
		});
	}
	if !(1..=MAX_INTERVAL_SECONDS).contains(&cfg.sync.interval_seconds) {
		return Err(Error::Validation {
			message: format!(
				"sync.interval_seconds must be in the range 1-{MAX_INTERVAL_SECONDS}."
			),
		});
	}
	if !(1..=MAX_BACKFILL_CHUNK_HOURS).contains(&cfg.sync.backfill_chunk_hours) {
		return Err(Error::Validation {
			message: format!(
				"sync.backfill_chunk_hours must be in the range 1-{MAX_BACKFILL_CHUNK_HOURS}."
			),
		});
	}

	for (label, secret) in
		[("auth.token_secret", &cfg.auth.token_secret), ("audio.signing_secret", &cfg.audio.signing_secret)]
	{
		if secret.trim().is_empty() {
			return Err(Error::Validation { message: format!("{label} must be non-empty.") });
		}
	}

	if !(0..=MAX_LEEWAY_SECONDS).contains(&cfg.auth.leeway_seconds) {
		return Err(Error::Validation {
			message: format!("auth.leeway_seconds must be in the range 0-{MAX_LEEWAY_SECONDS}."),
		});
	}

	match Url::parse(&cfg.audio.public_base_url) {
		Ok(url) if matches!(url.scheme(), "http" | "https") && !url.cannot_be_a_base() => {},
		_ => {
			return Err(Error::Validation {
				message: "audio.public_base_url must be an absolute http or https URL.".to_string(),
			});
		},
	}

	if !(1..=MAX_SIGNED_URL_TTL_SECONDS).contains(&cfg.audio.signed_url_ttl_seconds) {
		return Err(Error::Validation {
			message: format!(
				"audio.signed_url_ttl_seconds must be in the range 1-{MAX_SIGNED_URL_TTL_SECONDS}."
			),
		});
	}
	if cfg.recovery.max_retries < 0 {
		return Err(Error::Validation {
			message: "recovery.max_retries must be zero or greater.".to_string(),
		});
	}
	if !(1..=MAX_STALE_CLAIM_MINUTES).contains(&cfg.recovery.stale_claim_minutes) {
		return Err(Error::Validation {
			message: format!(
				"recovery.stale_claim_minutes must be in the range 1-{MAX_STALE_CLAIM_MINUTES}."
			),
		});
	}
	if cfg.bulk.max_ids == 0 {
		return Err(Error::Validation {
			message: "bulk.max_ids must be greater than zero.".to_string(),
		});
	}

	Ok(())
}

fn normalize(cfg: &mut Config) {
	if cfg.auth.issuer.as_deref().map(|issuer| issuer.trim().is_empty()).unwrap_or(false) {
		cfg.auth.issuer = None;
	}

	let trimmed = cfg.upstream.api_base.trim().trim_end_matches('/').to_string();

	cfg.upstream.api_base = trimmed;

	let trimmed = cfg.audio.public_base_url.trim().trim_end_matches('/').to_string();

	cfg.audio.public_base_url = trimmed;
}
