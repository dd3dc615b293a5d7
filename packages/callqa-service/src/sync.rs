use std::{
	collections::{BTreeMap, HashMap},
	future::Future,
};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::{CallQaService, Error, Result};
use callqa_providers::call_logs::{self, Account, CallLogPage, CallRecord, TimeWindow};
use callqa_storage::{
	calls::{self, CallUpsert},
	campaigns,
	models::SyncTarget,
	organizations,
};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SyncRequest {
	pub org_id: Uuid,
	#[serde(default, with = "time::serde::rfc3339::option")]
	pub start: Option<OffsetDateTime>,
	#[serde(default, with = "time::serde::rfc3339::option")]
	pub end: Option<OffsetDateTime>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SyncResponse {
	pub org_id: Uuid,
	pub fetched: u64,
	pub pages: u32,
	#[serde(with = "time::serde::rfc3339")]
	pub window_start: OffsetDateTime,
	#[serde(with = "time::serde::rfc3339")]
	pub window_end: OffsetDateTime,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OrgSyncOutcome {
	pub org_id: Uuid,
	pub fetched: Option<u64>,
	pub error: Option<String>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackfillOrder {
	/// Newest chunk first.
	#[default]
	Lifo,
	Fifo,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BackfillRequest {
	pub org_id: Uuid,
	#[serde(with = "time::serde::rfc3339")]
	pub start: OffsetDateTime,
	#[serde(with = "time::serde::rfc3339")]
	pub end: OffsetDateTime,
	pub chunk_hours: Option<i64>,
	#[serde(default)]
	pub order: BackfillOrder,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BackfillReport {
	pub chunks: usize,
	pub fetched: u64,
	pub failed_chunks: usize,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct PageOutcome {
	pub(crate) fetched: u64,
	pub(crate) pages: u32,
}

impl CallQaService {
	/// Pulls the organization's call log for the window (default: the trailing lookback) and
	/// upserts every page. A failed page aborts the run; earlier pages stay committed.
	pub async fn sync(&self, req: SyncRequest) -> Result<SyncResponse> {
		let now = OffsetDateTime::now_utc();
		let window =
			resolve_window(req.start, req.end, now, Duration::minutes(self.cfg.sync.lookback_minutes))?;
		let target = self.sync_target(req.org_id).await?;

		self.sync_window(&target, window).await
	}

	/// Syncs every active organization with credentials. Failures are reported per organization.
	pub async fn sync_all(
		&self,
		start: Option<OffsetDateTime>,
		end: Option<OffsetDateTime>,
	) -> Result<Vec<OrgSyncOutcome>> {
		let now = OffsetDateTime::now_utc();
		let window =
			resolve_window(start, end, now, Duration::minutes(self.cfg.sync.lookback_minutes))?;
		let targets = organizations::sync_targets(&self.db.pool).await?;
		let mut outcomes = Vec::with_capacity(targets.len());

		for target in targets {
			let outcome = match self.sync_window(&target, window).await {
				Ok(response) =>
					OrgSyncOutcome { org_id: target.org_id, fetched: Some(response.fetched), error: None },
				Err(err) => {
					tracing::error!(org_id = %target.org_id, error = %err, "Organization sync failed.");

					OrgSyncOutcome { org_id: target.org_id, fetched: None, error: Some(err.to_string()) }
				},
			};

			outcomes.push(outcome);
		}

		Ok(outcomes)
	}

	/// Syncs a historical range in fixed-size chunks. A failed chunk is logged and skipped.
	pub async fn backfill(&self, req: BackfillRequest) -> Result<BackfillReport> {
		if req.start >= req.end {
			return Err(Error::InvalidRequest {
				message: "start must be earlier than end.".to_string(),
			});
		}

		let chunk_hours = req.chunk_hours.unwrap_or(self.cfg.sync.backfill_chunk_hours);

		if chunk_hours <= 0 {
			return Err(Error::InvalidRequest {
				message: "chunk_hours must be greater than zero.".to_string(),
			});
		}

		let target = self.sync_target(req.org_id).await?;
		let chunk = chunk_span(req.start, req.end, chunk_hours);
		let windows = chunk_windows(req.start, req.end, chunk, req.order);
		let mut report = BackfillReport { chunks: windows.len(), ..BackfillReport::default() };

		for (index, window) in windows.into_iter().enumerate() {
			match self.sync_window(&target, window).await {
				Ok(response) => report.fetched += response.fetched,
				Err(err) => {
					report.failed_chunks += 1;

					tracing::error!(
						org_id = %req.org_id,
						chunk = index,
						error = %err,
						"Backfill chunk failed."
					);
				},
			}
		}

		tracing::info!(
			org_id = %req.org_id,
			chunks = report.chunks,
			fetched = report.fetched,
			failed_chunks = report.failed_chunks,
			"Backfill finished."
		);

		Ok(report)
	}

	async fn sync_target(&self, org_id: Uuid) -> Result<SyncTarget> {
		organizations::sync_target_for_org(&self.db.pool, org_id).await?.ok_or_else(|| {
			Error::InvalidRequest {
				message: "Organization has no active upstream credentials.".to_string(),
			}
		})
	}

	async fn sync_window(&self, target: &SyncTarget, window: TimeWindow) -> Result<SyncResponse> {
		let account =
			Account { account_id: target.account_id.clone(), api_token: target.api_token.clone() };
		let org_id = target.org_id;
		let service = self;
		let account = &account;
		let outcome = drive_pages(
			self.cfg.upstream.page_size,
			move |offset| service.fetch_page(account, window, offset),
			move |offset, records| service.commit_page(org_id, offset, records),
		)
		.await?;

		tracing::info!(
			org_id = %org_id,
			fetched = outcome.fetched,
			pages = outcome.pages,
			"Call-log sync finished."
		);

		Ok(SyncResponse {
			org_id,
			fetched: outcome.fetched,
			pages: outcome.pages,
			window_start: window.start,
			window_end: window.end,
		})
	}

	pub(crate) async fn fetch_page(
		&self,
		account: &Account,
		window: TimeWindow,
		offset: u32,
	) -> Result<CallLogPage> {
		let fetch = self.source.fetch_page(
			&self.cfg.upstream,
			account,
			window,
			offset,
			self.cfg.upstream.page_size,
		);

		match tokio::time::timeout(self.upstream_timeout(), fetch).await {
			Ok(Ok(page)) => Ok(page),
			Ok(Err(err)) => {
				tracing::warn!(offset, error = %err, "Call-log page fetch failed.");

				Err(err.into())
			},
			Err(_) => {
				tracing::warn!(offset, "Call-log page fetch timed out.");

				Err(Error::UpstreamUnavailable { message: "Upstream request timed out.".to_string() })
			},
		}
	}

	async fn commit_page(&self, org_id: Uuid, offset: u32, records: Vec<Value>) -> Result<()> {
		let fetched_at = OffsetDateTime::now_utc();
		let received = records.len();
		let mapped: Vec<CallRecord> = records
			.into_iter()
			.filter_map(|raw| call_logs::map_record(raw, fetched_at))
			.collect();
		let skipped = received - mapped.len();
		let mut records = dedupe_records(mapped);

		// Stable lock order across overlapping syncs of the same organization.
		records.sort_by(|a, b| a.external_call_id.cmp(&b.external_call_id));

		let mut tx = self.db.pool.begin().await?;
		let mut campaign_ids = HashMap::new();
		let distinct_campaigns: BTreeMap<&str, Option<&str>> = records
			.iter()
			.filter_map(|record| record.campaign.as_ref())
			.map(|campaign| (campaign.provider_campaign_id.as_str(), campaign.name.as_deref()))
			.collect();

		for (provider_campaign_id, name) in distinct_campaigns {
			let id =
				campaigns::ensure_campaign(&mut *tx, org_id, provider_campaign_id, name).await?;

			campaign_ids.insert(provider_campaign_id.to_string(), id);
		}

		let rows: Vec<CallUpsert> = records
			.into_iter()
			.map(|record| CallUpsert {
				org_id,
				campaign_id: record
					.campaign
					.as_ref()
					.and_then(|campaign| campaign_ids.get(&campaign.provider_campaign_id).copied()),
				external_call_id: record.external_call_id,
				start_time: record.start_time,
				audio_ref: record.audio_ref,
				revenue: record.revenue,
				payout: record.payout,
				duration_seconds: record.duration_seconds,
				caller_number: record.caller_number,
				raw_payload: record.raw_payload,
			})
			.collect();
		let upserted = calls::upsert_calls(&mut *tx, &rows, fetched_at).await?;

		tx.commit().await?;

		tracing::info!(
			org_id = %org_id,
			offset,
			received,
			skipped,
			upserted,
			"Committed call-log page."
		);

		Ok(())
	}
}

/// Walks pages from offset zero until a short, empty, or partial page. Every non-empty page is
/// committed before the next one is requested.
pub(crate) async fn drive_pages<F, FFut, C, CFut>(
	page_size: u32,
	mut fetch: F,
	mut commit: C,
) -> Result<PageOutcome>
where
	F: FnMut(u32) -> FFut,
	FFut: Future<Output = Result<CallLogPage>>,
	C: FnMut(u32, Vec<Value>) -> CFut,
	CFut: Future<Output = Result<()>>,
{
	let mut offset = 0_u32;
	let mut outcome = PageOutcome::default();

	loop {
		let page = fetch(offset).await?;
		let count = page.records.len();

		if count == 0 {
			break;
		}

		outcome.fetched += count as u64;
		outcome.pages += 1;

		commit(offset, page.records).await?;

		if page.partial || count < page_size as usize {
			break;
		}

		offset = offset.checked_add(page_size).ok_or_else(|| Error::UpstreamUnavailable {
			message: "Call log offset exceeded the supported range.".to_string(),
		})?;
	}

	Ok(outcome)
}

pub(crate) fn resolve_window(
	start: Option<OffsetDateTime>,
	end: Option<OffsetDateTime>,
	now: OffsetDateTime,
	lookback: Duration,
) -> Result<TimeWindow> {
	match (start, end) {
		(None, None) => Ok(TimeWindow { start: now - lookback, end: now }),
		(Some(start), Some(end)) if start < end => Ok(TimeWindow { start, end }),
		(Some(_), Some(_)) => Err(Error::InvalidRequest {
			message: "start must be earlier than end.".to_string(),
		}),
		_ => Err(Error::InvalidRequest {
			message: "start and end must be provided together.".to_string(),
		}),
	}
}

/// Chunk length for a backfill. Chunks longer than the range collapse to the range itself.
pub(crate) fn chunk_span(
	start: OffsetDateTime,
	end: OffsetDateTime,
	chunk_hours: i64,
) -> Duration {
	let range = end - start;

	if chunk_hours > range.whole_hours() { range } else { Duration::hours(chunk_hours) }
}

pub(crate) fn chunk_windows(
	start: OffsetDateTime,
	end: OffsetDateTime,
	chunk: Duration,
	order: BackfillOrder,
) -> Vec<TimeWindow> {
	let mut windows = Vec::new();
	let mut cursor = start;

	while cursor < end {
		let next = cursor.checked_add(chunk).map_or(end, |next| next.min(end));

		windows.push(TimeWindow { start: cursor, end: next });

		cursor = next;
	}

	if order == BackfillOrder::Lifo {
		windows.reverse();
	}

	windows
}

/// Collapses records sharing an external id to the last occurrence.
fn dedupe_records(records: Vec<CallRecord>) -> Vec<CallRecord> {
	let mut positions: HashMap<String, usize> = HashMap::with_capacity(records.len());
	let mut out: Vec<CallRecord> = Vec::with_capacity(records.len());

	for record in records {
		match positions.get(&record.external_call_id) {
			Some(&index) => out[index] = record,
			None => {
				positions.insert(record.external_call_id.clone(), out.len());
				out.push(record);
			},
		}
	}

	out
}
