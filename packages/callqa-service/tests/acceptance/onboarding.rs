use std::sync::Arc;

use callqa_domain::{Identity, Role};
use callqa_service::{CreateOrganizationRequest, Error};
use callqa_storage::organizations;

#[tokio::test]
#[ignore = "Requires external Postgres. Set CALLQA_PG_DSN to run."]
async fn onboarding_is_single_use() {
	let Some(test_db) = super::test_db().await else {
		eprintln!("Skipping onboarding_is_single_use; set CALLQA_PG_DSN to run this test.");

		return;
	};
	let cfg = super::test_config(test_db.dsn().to_string());
	let service =
		super::build_service(cfg, super::empty_source()).await.expect("Failed to build service.");
	let identity = Identity { user_id: uuid::Uuid::new_v4(), org: None };
	let created = service
		.create_organization(
			&identity,
			CreateOrganizationRequest { name: "Acme Calls".to_string(), plan: None },
		)
		.await
		.expect("create_organization failed.");

	assert_eq!(created.slug, "acme-calls");
	assert_eq!(created.plan, "free");
	assert_eq!(created.role, Role::Owner);

	let member = organizations::membership_for_user(&service.db.pool, identity.user_id)
		.await
		.expect("Failed to load membership.")
		.expect("Owner membership must exist.");

	assert_eq!(member.org_id, created.org_id);
	assert_eq!(member.role, "owner");
	assert!(member.accepted_at.is_some());

	let err = service
		.create_organization(
			&identity,
			CreateOrganizationRequest { name: "Second".to_string(), plan: None },
		)
		.await
		.expect_err("Second onboarding must be rejected.");

	assert!(matches!(err, Error::InvalidRequest { .. }), "Unexpected error: {err:?}");

	let other = Identity { user_id: uuid::Uuid::new_v4(), org: None };
	let collided = service
		.create_organization(
			&other,
			CreateOrganizationRequest { name: "Acme Calls".to_string(), plan: Some("Pro".to_string()) },
		)
		.await
		.expect("Same-name organization must get a distinct slug.");

	assert_ne!(collided.slug, created.slug);
	assert!(collided.slug.starts_with("acme-calls-"));
	assert_eq!(collided.plan, "pro");

	test_db.cleanup().await.expect("Failed to cleanup test database.");
}

#[tokio::test]
#[ignore = "Requires external Postgres. Set CALLQA_PG_DSN to run."]
async fn concurrent_onboarding_creates_one_organization() {
	let Some(test_db) = super::test_db().await else {
		eprintln!(
			"Skipping concurrent_onboarding_creates_one_organization; set CALLQA_PG_DSN to run this test."
		);

		return;
	};
	let cfg = super::test_config(test_db.dsn().to_string());
	let service = Arc::new(
		super::build_service(cfg, super::empty_source()).await.expect("Failed to build service."),
	);
	let identity = Identity { user_id: uuid::Uuid::new_v4(), org: None };
	let mut handles = Vec::new();

	for index in 0..3 {
		let service = service.clone();
		let identity = identity.clone();

		handles.push(tokio::spawn(async move {
			service
				.create_organization(
					&identity,
					CreateOrganizationRequest { name: format!("Race {index}"), plan: None },
				)
				.await
		}));
	}

	let mut created = 0;

	for handle in handles {
		if handle.await.expect("Onboarding task panicked.").is_ok() {
			created += 1;
		}
	}

	assert_eq!(created, 1);

	let orgs: i64 = sqlx::query_scalar("SELECT count(*) FROM organizations")
		.fetch_one(&service.db.pool)
		.await
		.expect("Failed to count organizations.");

	assert_eq!(orgs, 1);

	test_db.cleanup().await.expect("Failed to cleanup test database.");
}

#[tokio::test]
#[ignore = "Requires external Postgres. Set CALLQA_PG_DSN to run."]
async fn failed_owner_membership_leaves_no_organization() {
	let Some(test_db) = super::test_db().await else {
		eprintln!(
			"Skipping failed_owner_membership_leaves_no_organization; set CALLQA_PG_DSN to run this test."
		);

		return;
	};
	let cfg = super::test_config(test_db.dsn().to_string());
	let service =
		super::build_service(cfg, super::empty_source()).await.expect("Failed to build service.");
	let identity = Identity { user_id: uuid::Uuid::new_v4(), org: None };

	sqlx::raw_sql(&format!(
		"\
CREATE FUNCTION reject_member() RETURNS trigger AS $$
BEGIN
	RAISE EXCEPTION 'membership insert rejected';
END;
$$ LANGUAGE plpgsql;
CREATE TRIGGER reject_member BEFORE INSERT ON organization_members
FOR EACH ROW WHEN (NEW.user_id = '{}'::uuid) EXECUTE FUNCTION reject_member();",
		identity.user_id
	))
	.execute(&service.db.pool)
	.await
	.expect("Failed to install membership trigger.");

	let err = service
		.create_organization(
			&identity,
			CreateOrganizationRequest { name: "Doomed Org".to_string(), plan: None },
		)
		.await
		.expect_err("Onboarding must fail when the membership insert fails.");

	assert!(matches!(err, Error::Storage { .. }), "Unexpected error: {err:?}");

	let organizations: i64 =
		sqlx::query_scalar("SELECT count(*) FROM organizations WHERE slug LIKE 'doomed-org%'")
			.fetch_one(&service.db.pool)
			.await
			.expect("Failed to count organizations.");

	assert_eq!(organizations, 0);
	assert!(
		organizations::membership_for_user(&service.db.pool, identity.user_id)
			.await
			.expect("Failed to load membership.")
			.is_none()
	);

	test_db.cleanup().await.expect("Failed to cleanup test database.");
}
