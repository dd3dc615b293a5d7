use std::sync::Arc;

use callqa_domain::{CallStatus, Role};
use callqa_service::{
	AudioLink, ClaimRequest, Error, ListCallsRequest, PatchCallRequest, TransitionFields,
	TransitionRequest,
};

#[tokio::test]
#[ignore = "Requires external Postgres. Set CALLQA_PG_DSN to run."]
async fn illegal_transitions_are_rejected() {
	let Some(test_db) = super::test_db().await else {
		eprintln!("Skipping illegal_transitions_are_rejected; set CALLQA_PG_DSN to run this test.");

		return;
	};
	let cfg = super::test_config(test_db.dsn().to_string());
	let service =
		super::build_service(cfg, super::empty_source()).await.expect("Failed to build service.");
	let org_id = super::seed_org(&service, "gate", false).await;
	let ctx = super::seed_member(&service, org_id, Role::Reviewer).await;
	let safe_call = super::seed_call(&service, org_id, "SAFE-1", Some("recordings/a.wav")).await;

	super::force_status(&service, safe_call, "safe").await;

	let err = service
		.patch_call(
			&ctx,
			safe_call,
			PatchCallRequest { status: Some("processing".to_string()), ..Default::default() },
		)
		.await
		.expect_err("safe -> processing must be rejected.");

	assert!(matches!(err, Error::InvalidTransition { .. }), "Unexpected error: {err:?}");

	let silent = super::seed_call(&service, org_id, "NO-AUDIO", None).await;
	let err = service
		.transition(TransitionRequest {
			org_id,
			call_id: silent,
			to: CallStatus::Downloaded,
			fields: TransitionFields::default(),
		})
		.await
		.expect_err("Downloading without audio must be rejected.");

	assert!(matches!(err, Error::InvalidTransition { .. }), "Unexpected error: {err:?}");

	let err = service
		.patch_call(
			&ctx,
			safe_call,
			PatchCallRequest { status: Some("archived".to_string()), ..Default::default() },
		)
		.await
		.expect_err("Unknown status must be rejected.");

	assert!(matches!(err, Error::InvalidRequest { .. }), "Unexpected error: {err:?}");

	test_db.cleanup().await.expect("Failed to cleanup test database.");
}

#[tokio::test]
#[ignore = "Requires external Postgres. Set CALLQA_PG_DSN to run."]
async fn reviewer_clears_flagged_call_and_failure_is_recorded() {
	let Some(test_db) = super::test_db().await else {
		eprintln!(
			"Skipping reviewer_clears_flagged_call_and_failure_is_recorded; set CALLQA_PG_DSN to run this test."
		);

		return;
	};
	let cfg = super::test_config(test_db.dsn().to_string());
	let service =
		super::build_service(cfg, super::empty_source()).await.expect("Failed to build service.");
	let org_id = super::seed_org(&service, "review", false).await;
	let ctx = super::seed_member(&service, org_id, Role::Reviewer).await;
	let flagged = super::seed_call(&service, org_id, "FLAG-1", Some("recordings/b.wav")).await;

	super::force_status(&service, flagged, "flagged").await;

	let view = service
		.patch_call(
			&ctx,
			flagged,
			PatchCallRequest {
				status: Some("safe".to_string()),
				qa_result: Some(serde_json::json!({ "reviewer_note": "false positive" })),
				processing_error: None,
			},
		)
		.await
		.expect("flagged -> safe must be allowed.");

	assert_eq!(view.status, CallStatus::Safe);
	assert_eq!(view.qa_result, Some(serde_json::json!({ "reviewer_note": "false positive" })));

	let working = super::seed_call(&service, org_id, "WORK-1", Some("recordings/c.wav")).await;
	let failed = service
		.transition(TransitionRequest {
			org_id,
			call_id: working,
			to: CallStatus::Failed,
			fields: TransitionFields {
				processing_error: Some("  ".to_string()),
				..Default::default()
			},
		})
		.await
		.expect("pending -> failed must be allowed.");

	assert_eq!(failed.status, CallStatus::Failed);
	assert_eq!(failed.retry_count, 1);
	assert_eq!(failed.processing_error.as_deref(), Some("Unknown error"));

	test_db.cleanup().await.expect("Failed to cleanup test database.");
}

#[tokio::test]
#[ignore = "Requires external Postgres. Set CALLQA_PG_DSN to run."]
async fn concurrent_claims_have_one_winner() {
	let Some(test_db) = super::test_db().await else {
		eprintln!("Skipping concurrent_claims_have_one_winner; set CALLQA_PG_DSN to run this test.");

		return;
	};
	let cfg = super::test_config(test_db.dsn().to_string());
	let service = Arc::new(
		super::build_service(cfg, super::empty_source()).await.expect("Failed to build service."),
	);
	let org_id = super::seed_org(&service, "claims", false).await;
	let call_id = super::seed_call(&service, org_id, "CLAIM-1", Some("recordings/d.wav")).await;

	super::force_status(&service, call_id, "downloaded").await;

	let request =
		ClaimRequest { org_id, call_id, from: CallStatus::Downloaded, to: CallStatus::Processing };
	let mut handles = Vec::new();

	for _ in 0..4 {
		let service = service.clone();
		let request = request.clone();

		handles.push(tokio::spawn(async move { service.claim(request).await }));
	}

	let mut winners = 0;

	for handle in handles {
		if handle.await.expect("Claim task panicked.").expect("Claim failed.").is_some() {
			winners += 1;
		}
	}

	assert_eq!(winners, 1);

	let next = service
		.claim_next(CallStatus::Downloaded, CallStatus::Processing)
		.await
		.expect("claim_next failed.");

	assert!(next.is_none());

	test_db.cleanup().await.expect("Failed to cleanup test database.");
}

#[tokio::test]
#[ignore = "Requires external Postgres. Set CALLQA_PG_DSN to run."]
async fn reads_are_tenant_scoped() {
	let Some(test_db) = super::test_db().await else {
		eprintln!("Skipping reads_are_tenant_scoped; set CALLQA_PG_DSN to run this test.");

		return;
	};
	let cfg = super::test_config(test_db.dsn().to_string());
	let service =
		super::build_service(cfg, super::empty_source()).await.expect("Failed to build service.");
	let org_a = super::seed_org(&service, "tenant-a", false).await;
	let org_b = super::seed_org(&service, "tenant-b", false).await;
	let ctx_a = super::seed_member(&service, org_a, Role::Admin).await;
	let stored = super::seed_call(&service, org_a, "A-1", Some("recordings/e.wav")).await;
	let foreign = super::seed_call(&service, org_b, "B-1", None).await;
	let listed = service
		.list_calls(&ctx_a, ListCallsRequest::default())
		.await
		.expect("list_calls failed.");

	assert_eq!(listed.calls.len(), 1);
	assert_eq!(listed.calls[0].id, stored);
	assert!(listed.next_before.is_none());

	let err = service.get_call(&ctx_a, foreign).await.expect_err("Foreign call must be hidden.");

	assert!(matches!(err, Error::NotFound { .. }), "Unexpected error: {err:?}");

	let link = service.audio_link(&ctx_a, stored).await.expect("audio_link failed.");

	match link {
		AudioLink::Signed { url, .. } => {
			assert!(url.starts_with("https://media.example.com/recordings/recordings/e.wav?expires="));
		},
		other => panic!("Expected a signed link, got {other:?}."),
	}

	let err = service
		.list_calls(&ctx_a, ListCallsRequest { limit: Some(0), ..Default::default() })
		.await
		.expect_err("Zero limit must be rejected.");

	assert!(matches!(err, Error::InvalidRequest { .. }), "Unexpected error: {err:?}");

	test_db.cleanup().await.expect("Failed to cleanup test database.");
}

#[tokio::test]
#[ignore = "Requires external Postgres. Set CALLQA_PG_DSN to run."]
async fn list_cursor_pages_through_equal_start_times() {
	let Some(test_db) = super::test_db().await else {
		eprintln!(
			"Skipping list_cursor_pages_through_equal_start_times; set CALLQA_PG_DSN to run this test."
		);

		return;
	};
	let cfg = super::test_config(test_db.dsn().to_string());
	let service =
		super::build_service(cfg, super::empty_source()).await.expect("Failed to build service.");
	let org_id = super::seed_org(&service, "ties", false).await;
	let ctx = super::seed_member(&service, org_id, Role::Reviewer).await;
	let mut seeded = Vec::new();

	for external_call_id in ["T-1", "T-2", "T-3"] {
		seeded.push(super::seed_call(&service, org_id, external_call_id, None).await);
	}

	sqlx::query("UPDATE calls SET start_time = '2026-03-01T12:00:00Z' WHERE org_id = $1")
		.bind(org_id)
		.execute(&service.db.pool)
		.await
		.expect("Failed to align start times.");

	let mut seen = Vec::new();
	let mut request = ListCallsRequest { limit: Some(2), ..Default::default() };

	loop {
		let page = service.list_calls(&ctx, request.clone()).await.expect("list_calls failed.");

		seen.extend(page.calls.iter().map(|call| call.id));

		if page.next_before.is_none() {
			assert!(page.next_before_id.is_none());

			break;
		}

		request.before = page.next_before;
		request.before_id = page.next_before_id;
	}

	seeded.sort();
	seen.sort();

	assert_eq!(seen, seeded);

	test_db.cleanup().await.expect("Failed to cleanup test database.");
}
