use std::sync::{Arc, Mutex, atomic::Ordering};

use serde_json::json;
use time::{Duration, OffsetDateTime};

use callqa_domain::CallStatus;
use callqa_providers::call_logs::{Account, CallLogPage, TimeWindow};
use callqa_service::{
	BackfillOrder, BackfillRequest, BoxFuture, CallLogSource, Error, SyncRequest,
	TransitionFields, TransitionRequest,
};
use callqa_storage::campaigns;

use super::{StallingSource, StubSource};

#[tokio::test]
#[ignore = "Requires external Postgres. Set CALLQA_PG_DSN to run."]
async fn repeated_sync_is_idempotent_and_keeps_status() {
	let Some(test_db) = super::test_db().await else {
		eprintln!(
			"Skipping repeated_sync_is_idempotent_and_keeps_status; set CALLQA_PG_DSN to run this test."
		);

		return;
	};
	let records = vec![
		super::provider_record("INB-1", 10.0, Some("CA-1")),
		super::provider_record("INB-2", 20.0, Some("CA-1")),
		super::provider_record("INB-3", 30.0, None),
	];
	let source = Arc::new(StubSource::new(records));
	let cfg = super::test_config(test_db.dsn().to_string());
	let service =
		super::build_service(cfg, source.clone()).await.expect("Failed to build service.");
	let org_id = super::seed_org(&service, "acme", true).await;
	let first = service
		.sync(SyncRequest { org_id, start: None, end: None })
		.await
		.expect("First sync failed.");

	assert_eq!(first.fetched, 3);
	assert_eq!(first.pages, 2);
	assert_eq!(source.calls.load(Ordering::SeqCst), 2);

	let call_id: uuid::Uuid =
		sqlx::query_scalar("SELECT id FROM calls WHERE org_id = $1 AND external_call_id = 'INB-1'")
			.bind(org_id)
			.fetch_one(&service.db.pool)
			.await
			.expect("Failed to load call.");

	service
		.transition(TransitionRequest {
			org_id,
			call_id,
			to: CallStatus::Downloaded,
			fields: TransitionFields::default(),
		})
		.await
		.expect("Transition to downloaded failed.");

	let second = service
		.sync(SyncRequest { org_id, start: None, end: None })
		.await
		.expect("Second sync failed.");

	assert_eq!(second.fetched, 3);

	let total: i64 = sqlx::query_scalar("SELECT count(*) FROM calls WHERE org_id = $1")
		.bind(org_id)
		.fetch_one(&service.db.pool)
		.await
		.expect("Failed to count calls.");

	assert_eq!(total, 3);

	let status: String = sqlx::query_scalar("SELECT status FROM calls WHERE id = $1")
		.bind(call_id)
		.fetch_one(&service.db.pool)
		.await
		.expect("Failed to load status.");

	assert_eq!(status, "downloaded");

	let campaigns =
		campaigns::list_campaigns(&service.db.pool, org_id).await.expect("Failed to list campaigns.");

	assert_eq!(campaigns.len(), 1);
	assert_eq!(campaigns[0].provider_campaign_id, "CA-1");
	assert_eq!(campaigns[0].name.as_deref(), Some("Campaign CA-1"));

	test_db.cleanup().await.expect("Failed to cleanup test database.");
}

#[tokio::test]
#[ignore = "Requires external Postgres. Set CALLQA_PG_DSN to run."]
async fn sync_without_credentials_is_rejected() {
	let Some(test_db) = super::test_db().await else {
		eprintln!("Skipping sync_without_credentials_is_rejected; set CALLQA_PG_DSN to run this test.");

		return;
	};
	let cfg = super::test_config(test_db.dsn().to_string());
	let service =
		super::build_service(cfg, super::empty_source()).await.expect("Failed to build service.");
	let org_id = super::seed_org(&service, "no-creds", false).await;
	let err = service
		.sync(SyncRequest { org_id, start: None, end: None })
		.await
		.expect_err("Sync without credentials must fail.");

	assert!(matches!(err, Error::InvalidRequest { .. }), "Unexpected error: {err:?}");

	test_db.cleanup().await.expect("Failed to cleanup test database.");
}

#[tokio::test]
#[ignore = "Requires external Postgres. Set CALLQA_PG_DSN to run."]
async fn stalled_upstream_fails_within_timeout() {
	let Some(test_db) = super::test_db().await else {
		eprintln!("Skipping stalled_upstream_fails_within_timeout; set CALLQA_PG_DSN to run this test.");

		return;
	};
	let mut cfg = super::test_config(test_db.dsn().to_string());

	cfg.upstream.timeout_ms = 100;

	let service = super::build_service(cfg, Arc::new(StallingSource))
		.await
		.expect("Failed to build service.");
	let org_id = super::seed_org(&service, "stalled", true).await;
	let started = std::time::Instant::now();
	let err = service
		.sync(SyncRequest { org_id, start: None, end: None })
		.await
		.expect_err("Stalled upstream must fail.");

	assert!(matches!(err, Error::UpstreamUnavailable { .. }), "Unexpected error: {err:?}");
	assert!(started.elapsed() < std::time::Duration::from_secs(5));

	let total: i64 = sqlx::query_scalar("SELECT count(*) FROM calls")
		.fetch_one(&service.db.pool)
		.await
		.expect("Failed to count calls.");

	assert_eq!(total, 0);

	test_db.cleanup().await.expect("Failed to cleanup test database.");
}

#[tokio::test]
#[ignore = "Requires external Postgres. Set CALLQA_PG_DSN to run."]
async fn sync_all_reports_each_organization() {
	let Some(test_db) = super::test_db().await else {
		eprintln!("Skipping sync_all_reports_each_organization; set CALLQA_PG_DSN to run this test.");

		return;
	};
	let source = Arc::new(StubSource::new(vec![super::provider_record("INB-9", 5.0, None)]));
	let cfg = super::test_config(test_db.dsn().to_string());
	let service = super::build_service(cfg, source).await.expect("Failed to build service.");
	let with_creds = super::seed_org(&service, "alpha", true).await;
	let other = super::seed_org(&service, "beta", true).await;

	super::seed_org(&service, "gamma", false).await;

	let mut outcomes = service.sync_all(None, None).await.expect("sync_all failed.");

	outcomes.sort_by_key(|outcome| outcome.org_id);

	let mut expected = vec![with_creds, other];

	expected.sort();

	assert_eq!(outcomes.iter().map(|outcome| outcome.org_id).collect::<Vec<_>>(), expected);
	assert!(outcomes.iter().all(|outcome| outcome.fetched == Some(1) && outcome.error.is_none()));

	test_db.cleanup().await.expect("Failed to cleanup test database.");
}

/// Answers one record per window, named after the window start, and fails one window.
struct WindowedSource {
	seen: Mutex<Vec<TimeWindow>>,
	failing_start: OffsetDateTime,
}
impl CallLogSource for WindowedSource {
	fn fetch_page<'a>(
		&'a self,
		_cfg: &'a callqa_config::Upstream,
		_account: &'a Account,
		window: TimeWindow,
		offset: u32,
		_size: u32,
	) -> BoxFuture<'a, callqa_providers::Result<CallLogPage>> {
		self.seen.lock().expect("Window log poisoned.").push(window);

		let result = if window.start == self.failing_start {
			Err(callqa_providers::Error::InvalidResponse {
				message: "Upstream returned garbage.".to_string(),
			})
		} else if offset > 0 {
			Ok(CallLogPage::default())
		} else {
			let id = format!("BF-{}", window.start.unix_timestamp());
			let record = json!({
				"inboundCallId": id,
				"callDt": window.start.unix_timestamp() * 1_000,
				"conversionAmount": 5.0,
			});

			Ok(CallLogPage { records: vec![record], partial: false })
		};

		Box::pin(async move { result })
	}
}

#[tokio::test]
#[ignore = "Requires external Postgres. Set CALLQA_PG_DSN to run."]
async fn backfill_walks_chunks_in_order_and_skips_failed_ones() {
	let Some(test_db) = super::test_db().await else {
		eprintln!(
			"Skipping backfill_walks_chunks_in_order_and_skips_failed_ones; set CALLQA_PG_DSN to run this test."
		);

		return;
	};
	let end = OffsetDateTime::from_unix_timestamp(1_700_006_400).expect("Valid timestamp.");
	let start = end - Duration::hours(3);
	let middle = start + Duration::hours(1);
	let source = Arc::new(WindowedSource { seen: Mutex::new(Vec::new()), failing_start: middle });
	let cfg = super::test_config(test_db.dsn().to_string());
	let service =
		super::build_service(cfg, source.clone()).await.expect("Failed to build service.");
	let org_id = super::seed_org(&service, "history", true).await;
	let report = service
		.backfill(BackfillRequest {
			org_id,
			start,
			end,
			chunk_hours: Some(1),
			order: BackfillOrder::Fifo,
		})
		.await
		.expect("Backfill failed.");

	assert_eq!(report.chunks, 3);
	assert_eq!(report.fetched, 2);
	assert_eq!(report.failed_chunks, 1);

	let starts: Vec<OffsetDateTime> =
		source.seen.lock().expect("Window log poisoned.").iter().map(|w| w.start).collect();

	assert_eq!(starts, vec![start, middle, middle + Duration::hours(1)]);

	let stored: i64 = sqlx::query_scalar("SELECT count(*) FROM calls WHERE org_id = $1")
		.bind(org_id)
		.fetch_one(&service.db.pool)
		.await
		.expect("Failed to count calls.");

	assert_eq!(stored, 2);

	source.seen.lock().expect("Window log poisoned.").clear();

	let report = service
		.backfill(BackfillRequest {
			org_id,
			start,
			end,
			chunk_hours: Some(i64::MAX / 2),
			order: BackfillOrder::Lifo,
		})
		.await
		.expect("Oversized chunk backfill failed.");

	assert_eq!(report.chunks, 1);
	assert_eq!(source.seen.lock().expect("Window log poisoned.")[0], TimeWindow { start, end });

	let err = service
		.backfill(BackfillRequest {
			org_id,
			start,
			end,
			chunk_hours: Some(0),
			order: BackfillOrder::Lifo,
		})
		.await
		.expect_err("Zero-hour chunks must be rejected.");

	assert!(matches!(err, Error::InvalidRequest { .. }));

	test_db.cleanup().await.expect("Failed to cleanup test database.");
}
