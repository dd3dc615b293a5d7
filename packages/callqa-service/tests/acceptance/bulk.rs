use callqa_domain::{BulkAction, Role};
use callqa_service::{BulkRequest, Error};

#[tokio::test]
#[ignore = "Requires external Postgres. Set CALLQA_PG_DSN to run."]
async fn bulk_action_only_touches_own_flagged_calls() {
	let Some(test_db) = super::test_db().await else {
		eprintln!(
			"Skipping bulk_action_only_touches_own_flagged_calls; set CALLQA_PG_DSN to run this test."
		);

		return;
	};
	let cfg = super::test_config(test_db.dsn().to_string());
	let service =
		super::build_service(cfg, super::empty_source()).await.expect("Failed to build service.");
	let org_a = super::seed_org(&service, "bulk-a", false).await;
	let org_b = super::seed_org(&service, "bulk-b", false).await;
	let ctx = super::seed_member(&service, org_a, Role::Reviewer).await;
	let mut own = Vec::new();

	for external_id in ["1", "2", "3"] {
		let id = super::seed_call(&service, org_a, external_id, None).await;

		super::force_status(&service, id, "flagged").await;

		own.push(id);
	}

	let foreign = super::seed_call(&service, org_b, "99", None).await;

	super::force_status(&service, foreign, "flagged").await;

	let mut ids: Vec<String> = own.iter().map(ToString::to_string).collect();

	ids.push(foreign.to_string());

	let response = service
		.bulk_apply(&ctx, BulkRequest { ids, action: BulkAction::MarkSafe })
		.await
		.expect("bulk_apply failed.");

	assert_eq!(response.requested, 4);
	assert_eq!(response.updated, 3);

	let mut updated = response.ids_updated.clone();

	updated.sort();
	own.sort();

	assert_eq!(updated, own);

	let foreign_status: String = sqlx::query_scalar("SELECT status FROM calls WHERE id = $1")
		.bind(foreign)
		.fetch_one(&service.db.pool)
		.await
		.expect("Failed to load foreign call.");

	assert_eq!(foreign_status, "flagged");

	// Already safe now; a second pass has nothing left to move.
	let again = service
		.bulk_apply(
			&ctx,
			BulkRequest {
				ids: own.iter().map(ToString::to_string).collect(),
				action: BulkAction::MarkSafe,
			},
		)
		.await
		.expect("Second bulk_apply failed.");

	assert_eq!(again.updated, 0);

	test_db.cleanup().await.expect("Failed to cleanup test database.");
}

#[tokio::test]
#[ignore = "Requires external Postgres. Set CALLQA_PG_DSN to run."]
async fn bulk_request_size_is_bounded() {
	let Some(test_db) = super::test_db().await else {
		eprintln!("Skipping bulk_request_size_is_bounded; set CALLQA_PG_DSN to run this test.");

		return;
	};
	let cfg = super::test_config(test_db.dsn().to_string());
	let service =
		super::build_service(cfg, super::empty_source()).await.expect("Failed to build service.");
	let org_id = super::seed_org(&service, "bulk-limit", false).await;
	let ctx = super::seed_member(&service, org_id, Role::Reviewer).await;

	for ids in [Vec::new(), vec![uuid::Uuid::new_v4().to_string(); 11]] {
		let err = service
			.bulk_apply(&ctx, BulkRequest { ids, action: BulkAction::ConfirmBad })
			.await
			.expect_err("Out-of-range id lists must be rejected.");

		assert!(matches!(err, Error::InvalidRequest { .. }), "Unexpected error: {err:?}");
	}

	test_db.cleanup().await.expect("Failed to cleanup test database.");
}
