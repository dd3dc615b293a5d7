use serde_json::Value;
use sqlx::{PgConnection, PgExecutor, Postgres, QueryBuilder};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{Error, Result, models::Call};

// Keeps a single INSERT well under the Postgres bind-parameter limit.
const UPSERT_BATCH_ROWS: usize = 1_000;

/// Provider-owned columns of a call, as written by ingestion.
#[derive(Clone, Debug)]
pub struct CallUpsert {
	pub org_id: Uuid,
	pub external_call_id: String,
	pub campaign_id: Option<Uuid>,
	pub start_time: OffsetDateTime,
	pub audio_ref: Option<String>,
	pub revenue: f64,
	pub payout: Option<f64>,
	pub duration_seconds: Option<i32>,
	pub caller_number: Option<String>,
	pub raw_payload: Value,
}

/// A status change already validated against the transition table.
#[derive(Clone, Debug)]
pub struct StatusWrite {
	pub call_id: Uuid,
	pub org_id: Uuid,
	pub from: String,
	pub to: String,
	pub audio_ref: Option<String>,
	pub transcript: Option<String>,
	pub qa_result: Option<Value>,
	pub judge_model: Option<String>,
	pub qa_version: Option<String>,
	pub retry_increment: i32,
	pub processing_error: Option<String>,
	pub updated_at: OffsetDateTime,
}

#[derive(Clone, Debug, Default)]
pub struct ListFilter {
	pub status: Option<String>,
	/// Keyset cursor: rows strictly after `(start_time, id)` in newest-first order.
	pub before: Option<OffsetDateTime>,
	pub before_id: Option<Uuid>,
	pub limit: i64,
}

/// Inserts new calls as `pending` and refreshes provider columns of existing ones. Status and
/// collaborator columns of existing rows are never touched, and rows whose provider columns are
/// unchanged keep their `updated_at`. Returns the number of rows inserted or changed.
pub async fn upsert_calls(
	conn: &mut PgConnection,
	rows: &[CallUpsert],
	now: OffsetDateTime,
) -> Result<u64> {
	let mut affected = 0;

	for batch in rows.chunks(UPSERT_BATCH_ROWS) {
		let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
			"\
INSERT INTO calls (
	id,
	org_id,
	external_call_id,
	campaign_id,
	start_time,
	status,
	audio_ref,
	revenue,
	payout,
	duration_seconds,
	caller_number,
	raw_payload,
	created_at,
	updated_at
) ",
		);

		builder.push_values(batch, |mut row, call| {
			row.push_bind(Uuid::new_v4())
				.push_bind(call.org_id)
				.push_bind(call.external_call_id.as_str())
				.push_bind(call.campaign_id)
				.push_bind(call.start_time)
				.push_bind("pending")
				.push_bind(call.audio_ref.as_deref())
				.push_bind(call.revenue)
				.push_bind(call.payout)
				.push_bind(call.duration_seconds)
				.push_bind(call.caller_number.as_deref())
				.push_bind(&call.raw_payload)
				.push_bind(now)
				.push_bind(now);
		});
		builder.push(
			"
ON CONFLICT (org_id, external_call_id) DO UPDATE
SET
	campaign_id = COALESCE(EXCLUDED.campaign_id, calls.campaign_id),
	start_time = EXCLUDED.start_time,
	audio_ref = COALESCE(calls.audio_ref, EXCLUDED.audio_ref),
	revenue = EXCLUDED.revenue,
	payout = EXCLUDED.payout,
	duration_seconds = EXCLUDED.duration_seconds,
	caller_number = EXCLUDED.caller_number,
	raw_payload = EXCLUDED.raw_payload,
	updated_at = EXCLUDED.updated_at
WHERE (
	calls.campaign_id,
	calls.start_time,
	calls.audio_ref,
	calls.revenue,
	calls.payout,
	calls.duration_seconds,
	calls.caller_number,
	calls.raw_payload
) IS DISTINCT FROM (
	COALESCE(EXCLUDED.campaign_id, calls.campaign_id),
	EXCLUDED.start_time,
	COALESCE(calls.audio_ref, EXCLUDED.audio_ref),
	EXCLUDED.revenue,
	EXCLUDED.payout,
	EXCLUDED.duration_seconds,
	EXCLUDED.caller_number,
	EXCLUDED.raw_payload
)",
		);

		affected += builder.build().execute(&mut *conn).await?.rows_affected();
	}

	Ok(affected)
}

pub async fn get_call<'e, E>(executor: E, org_id: Uuid, call_id: Uuid) -> Result<Option<Call>>
where
	E: PgExecutor<'e>,
{
	let call = sqlx::query_as::<_, Call>("SELECT * FROM calls WHERE id = $1 AND org_id = $2")
		.bind(call_id)
		.bind(org_id)
		.fetch_optional(executor)
		.await?;

	Ok(call)
}

/// Loads a call and holds its row lock until the surrounding transaction ends.
pub async fn lock_call<'e, E>(executor: E, org_id: Uuid, call_id: Uuid) -> Result<Option<Call>>
where
	E: PgExecutor<'e>,
{
	let call = sqlx::query_as::<_, Call>(
		"SELECT * FROM calls WHERE id = $1 AND org_id = $2 FOR UPDATE",
	)
	.bind(call_id)
	.bind(org_id)
	.fetch_optional(executor)
	.await?;

	Ok(call)
}

pub async fn list_calls<'e, E>(executor: E, org_id: Uuid, filter: &ListFilter) -> Result<Vec<Call>>
where
	E: PgExecutor<'e>,
{
	if filter.limit <= 0 {
		return Err(Error::InvalidArgument("List limit must be positive.".to_string()));
	}

	let calls = sqlx::query_as::<_, Call>(
		"\
SELECT *
FROM calls
WHERE org_id = $1
	AND ($2::text IS NULL OR status = $2)
	AND (
		$3::timestamptz IS NULL
		OR (start_time, id) < ($3, COALESCE($4::uuid, '00000000-0000-0000-0000-000000000000'::uuid))
	)
ORDER BY start_time DESC, id DESC
LIMIT $5",
	)
	.bind(org_id)
	.bind(filter.status.as_deref())
	.bind(filter.before)
	.bind(filter.before_id)
	.bind(filter.limit)
	.fetch_all(executor)
	.await?;

	Ok(calls)
}

/// The subset of `ids` owned by `org_id`.
pub async fn owned_call_ids<'e, E>(executor: E, org_id: Uuid, ids: &[Uuid]) -> Result<Vec<Uuid>>
where
	E: PgExecutor<'e>,
{
	let owned: Vec<Uuid> =
		sqlx::query_scalar("SELECT id FROM calls WHERE org_id = $1 AND id = ANY($2)")
			.bind(org_id)
			.bind(ids)
			.fetch_all(executor)
			.await?;

	Ok(owned)
}

/// Applies a status change if the row still holds `write.from`.
pub async fn write_status<'e, E>(executor: E, write: &StatusWrite) -> Result<Option<Call>>
where
	E: PgExecutor<'e>,
{
	let call = sqlx::query_as::<_, Call>(
		"\
UPDATE calls
SET
	status = $4,
	audio_ref = COALESCE($5, audio_ref),
	transcript = COALESCE($6, transcript),
	qa_result = COALESCE($7, qa_result),
	judge_model = COALESCE($8, judge_model),
	qa_version = COALESCE($9, qa_version),
	retry_count = retry_count + $10,
	processing_error = $11,
	updated_at = $12
WHERE id = $1 AND org_id = $2 AND status = $3
RETURNING *",
	)
	.bind(write.call_id)
	.bind(write.org_id)
	.bind(write.from.as_str())
	.bind(write.to.as_str())
	.bind(write.audio_ref.as_deref())
	.bind(write.transcript.as_deref())
	.bind(write.qa_result.as_ref())
	.bind(write.judge_model.as_deref())
	.bind(write.qa_version.as_deref())
	.bind(write.retry_increment)
	.bind(write.processing_error.as_deref())
	.bind(write.updated_at)
	.fetch_optional(executor)
	.await?;

	Ok(call)
}

/// Replaces the QA verdict payload without touching status.
pub async fn set_qa_result<'e, E>(
	executor: E,
	org_id: Uuid,
	call_id: Uuid,
	qa_result: &Value,
	now: OffsetDateTime,
) -> Result<Call>
where
	E: PgExecutor<'e>,
{
	let call = sqlx::query_as::<_, Call>(
		"\
UPDATE calls
SET qa_result = $3, updated_at = $4
WHERE id = $1 AND org_id = $2
RETURNING *",
	)
	.bind(call_id)
	.bind(org_id)
	.bind(qa_result)
	.bind(now)
	.fetch_one(executor)
	.await?;

	Ok(call)
}

/// Compare-and-swap on `status` for one call. Moves that need audio only succeed when the row
/// already has an audio reference.
pub async fn claim_call<'e, E>(
	executor: E,
	org_id: Uuid,
	call_id: Uuid,
	from: &str,
	to: &str,
	now: OffsetDateTime,
) -> Result<Option<Call>>
where
	E: PgExecutor<'e>,
{
	let call = sqlx::query_as::<_, Call>(
		"\
UPDATE calls
SET status = $4, processing_error = NULL, updated_at = $5
WHERE id = $1
	AND org_id = $2
	AND status = $3
	AND ($4 NOT IN ('downloaded', 'processing') OR audio_ref IS NOT NULL)
RETURNING *",
	)
	.bind(call_id)
	.bind(org_id)
	.bind(from)
	.bind(to)
	.bind(now)
	.fetch_optional(executor)
	.await?;

	Ok(call)
}

/// Claims the newest call in `from`, skipping rows another claimer holds.
pub async fn claim_next_call<'e, E>(
	executor: E,
	from: &str,
	to: &str,
	now: OffsetDateTime,
) -> Result<Option<Call>>
where
	E: PgExecutor<'e>,
{
	let call = sqlx::query_as::<_, Call>(
		"\
WITH candidate AS (
	SELECT id
	FROM calls
	WHERE status = $1
		AND ($2 NOT IN ('downloaded', 'processing') OR audio_ref IS NOT NULL)
	ORDER BY start_time DESC
	LIMIT 1
	FOR UPDATE SKIP LOCKED
)
UPDATE calls
SET status = $2, processing_error = NULL, updated_at = $3
FROM candidate
WHERE calls.id = candidate.id
RETURNING calls.*",
	)
	.bind(from)
	.bind(to)
	.bind(now)
	.fetch_optional(executor)
	.await?;

	Ok(call)
}

/// Set-based compare-and-swap for calls of one organization. Returns the ids that moved.
pub async fn transition_calls<'e, E>(
	executor: E,
	org_id: Uuid,
	ids: &[Uuid],
	from: &str,
	to: &str,
	now: OffsetDateTime,
) -> Result<Vec<Uuid>>
where
	E: PgExecutor<'e>,
{
	let moved: Vec<Uuid> = sqlx::query_scalar(
		"\
UPDATE calls
SET
	status = $4,
	processing_error = CASE WHEN $3 = $4 THEN processing_error ELSE NULL END,
	updated_at = $5
WHERE org_id = $1
	AND id = ANY($2)
	AND status = $3
	AND ($4 NOT IN ('downloaded', 'processing') OR audio_ref IS NOT NULL)
RETURNING id",
	)
	.bind(org_id)
	.bind(ids)
	.bind(from)
	.bind(to)
	.bind(now)
	.fetch_all(executor)
	.await?;

	Ok(moved)
}

/// `(org_id, id)` of calls stuck in `processing` since before `cutoff`, oldest first.
pub async fn stale_processing_calls<'e, E>(
	executor: E,
	cutoff: OffsetDateTime,
	limit: i64,
) -> Result<Vec<(Uuid, Uuid)>>
where
	E: PgExecutor<'e>,
{
	let rows: Vec<(Uuid, Uuid)> = sqlx::query_as(
		"\
SELECT org_id, id
FROM calls
WHERE status = 'processing' AND updated_at < $1
ORDER BY updated_at ASC
LIMIT $2",
	)
	.bind(cutoff)
	.bind(limit)
	.fetch_all(executor)
	.await?;

	Ok(rows)
}

/// Failed calls that still have retry budget, oldest failure first.
///
/// `after` is the `(updated_at, id)` of the last row of the previous batch.
pub async fn failed_calls_under_retry_limit<'e, E>(
	executor: E,
	max_retries: i32,
	after: Option<(OffsetDateTime, Uuid)>,
	limit: i64,
) -> Result<Vec<Call>>
where
	E: PgExecutor<'e>,
{
	let (after_updated_at, after_id) = after.unzip();
	let calls = sqlx::query_as::<_, Call>(
		"\
SELECT *
FROM calls
WHERE status = 'failed'
	AND retry_count < $1
	AND ($2::timestamptz IS NULL OR (updated_at, id) > ($2, $3))
ORDER BY updated_at ASC, id ASC
LIMIT $4",
	)
	.bind(max_retries)
	.bind(after_updated_at)
	.bind(after_id)
	.bind(limit)
	.fetch_all(executor)
	.await?;

	Ok(calls)
}
