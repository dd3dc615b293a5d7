use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::{CallQaService, Result, transition};
use callqa_domain::{CallStatus, recovery};
use callqa_storage::calls;

pub const RECOVERY_BATCH: i64 = 500;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReapReport {
	pub candidates: usize,
	pub reaped: usize,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryReport {
	pub candidates: usize,
	pub retried: usize,
	pub permanent: usize,
}

impl CallQaService {
	/// Fails calls whose `processing` claim outlived the stale-claim timeout.
	pub async fn reap_stale_claims(&self) -> Result<ReapReport> {
		let minutes = self.cfg.recovery.stale_claim_minutes;
		let cutoff = OffsetDateTime::now_utc() - Duration::minutes(minutes);
		let stale = calls::stale_processing_calls(&self.db.pool, cutoff, RECOVERY_BATCH).await?;
		let mut report = ReapReport { candidates: stale.len(), ..ReapReport::default() };

		for (org_id, call_id) in stale {
			match self.reap_one(org_id, call_id, cutoff, minutes).await {
				Ok(true) => report.reaped += 1,
				Ok(false) => {},
				Err(err) => {
					tracing::error!(call_id = %call_id, error = %err, "Failed to reap stale claim.");
				},
			}
		}

		if report.reaped > 0 {
			tracing::warn!(reaped = report.reaped, minutes, "Reset stale processing claims.");
		}

		Ok(report)
	}

	/// Moves failed calls with recoverable errors and remaining retry budget back to `pending`.
	///
	/// Walks every candidate in batches so permanent failures never hide recoverable ones.
	pub async fn retry_failed(&self) -> Result<RetryReport> {
		let max_retries = self.cfg.recovery.max_retries;
		let mut report = RetryReport::default();
		let mut after = None;

		loop {
			let batch = calls::failed_calls_under_retry_limit(
				&self.db.pool,
				max_retries,
				after,
				RECOVERY_BATCH,
			)
			.await?;
			let Some(last) = batch.last() else {
				break;
			};

			after = Some((last.updated_at, last.id));

			let exhausted = (batch.len() as i64) < RECOVERY_BATCH;

			report.candidates += batch.len();

			for call in batch {
				let error = call.processing_error.as_deref().unwrap_or_default();

				if !recovery::is_recoverable(error) {
					report.permanent += 1;

					continue;
				}

				match self.retry_one(call.org_id, call.id, max_retries).await {
					Ok(true) => report.retried += 1,
					Ok(false) => {},
					Err(err) => {
						tracing::error!(call_id = %call.id, error = %err, "Failed to retry call.");
					},
				}
			}

			if exhausted {
				break;
			}
		}

		if report.retried > 0 {
			tracing::info!(
				retried = report.retried,
				permanent = report.permanent,
				"Requeued failed calls."
			);
		}

		Ok(report)
	}

	async fn reap_one(
		&self,
		org_id: Uuid,
		call_id: Uuid,
		cutoff: OffsetDateTime,
		minutes: i64,
	) -> Result<bool> {
		let now = OffsetDateTime::now_utc();
		let mut tx = self.db.pool.begin().await?;
		let Some(call) = calls::lock_call(&mut *tx, org_id, call_id).await? else {
			return Ok(false);
		};

		// The worker may have finished between the scan and the lock.
		if call.status != CallStatus::Processing.as_str() || call.updated_at >= cutoff {
			return Ok(false);
		}

		let fields = transition::TransitionFields {
			processing_error: Some(recovery::stale_claim_message(minutes)),
			..Default::default()
		};

		transition::apply_transition(&mut tx, call, CallStatus::Failed, fields, now).await?;

		tx.commit().await?;

		Ok(true)
	}

	async fn retry_one(&self, org_id: Uuid, call_id: Uuid, max_retries: i32) -> Result<bool> {
		let now = OffsetDateTime::now_utc();
		let mut tx = self.db.pool.begin().await?;
		let Some(call) = calls::lock_call(&mut *tx, org_id, call_id).await? else {
			return Ok(false);
		};

		if call.status != CallStatus::Failed.as_str() || call.retry_count >= max_retries {
			return Ok(false);
		}

		transition::apply_transition(
			&mut tx,
			call,
			CallStatus::Pending,
			transition::TransitionFields::default(),
			now,
		)
		.await?;

		tx.commit().await?;

		Ok(true)
	}
}
