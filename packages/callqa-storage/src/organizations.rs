use sqlx::PgExecutor;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
	Result,
	models::{Organization, OrganizationMember, SyncTarget},
};

pub async fn insert_organization<'e, E>(executor: E, org: &Organization) -> Result<()>
where
	E: PgExecutor<'e>,
{
	sqlx::query(
		"\
INSERT INTO organizations (id, name, slug, plan, is_active, created_at)
VALUES ($1, $2, $3, $4, $5, $6)",
	)
	.bind(org.id)
	.bind(org.name.as_str())
	.bind(org.slug.as_str())
	.bind(org.plan.as_str())
	.bind(org.is_active)
	.bind(org.created_at)
	.execute(executor)
	.await?;

	Ok(())
}

pub async fn insert_member<'e, E>(executor: E, member: &OrganizationMember) -> Result<()>
where
	E: PgExecutor<'e>,
{
	sqlx::query(
		"\
INSERT INTO organization_members (org_id, user_id, role, accepted_at, created_at)
VALUES ($1, $2, $3, $4, $5)",
	)
	.bind(member.org_id)
	.bind(member.user_id)
	.bind(member.role.as_str())
	.bind(member.accepted_at)
	.bind(member.created_at)
	.execute(executor)
	.await?;

	Ok(())
}

/// Any membership of the user, accepted or pending.
pub async fn membership_for_user<'e, E>(
	executor: E,
	user_id: Uuid,
) -> Result<Option<OrganizationMember>>
where
	E: PgExecutor<'e>,
{
	let member = sqlx::query_as::<_, OrganizationMember>(
		"\
SELECT *
FROM organization_members
WHERE user_id = $1
ORDER BY accepted_at IS NULL, created_at
LIMIT 1",
	)
	.bind(user_id)
	.fetch_optional(executor)
	.await?;

	Ok(member)
}

pub async fn slug_taken<'e, E>(executor: E, slug: &str) -> Result<bool>
where
	E: PgExecutor<'e>,
{
	let taken: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM organizations WHERE slug = $1)")
		.bind(slug)
		.fetch_one(executor)
		.await?;

	Ok(taken)
}

/// Serializes onboarding attempts of one user until the transaction ends.
pub async fn lock_user_onboarding<'e, E>(executor: E, user_id: Uuid) -> Result<()>
where
	E: PgExecutor<'e>,
{
	sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
		.bind(user_id.to_string())
		.execute(executor)
		.await?;

	Ok(())
}

/// Active organizations with active upstream credentials.
pub async fn sync_targets<'e, E>(executor: E) -> Result<Vec<SyncTarget>>
where
	E: PgExecutor<'e>,
{
	let targets = sqlx::query_as::<_, SyncTarget>(
		"\
SELECT o.id AS org_id, c.account_id, c.api_token
FROM organizations o
JOIN organization_credentials c ON c.org_id = o.id
WHERE o.is_active AND c.is_active
ORDER BY o.created_at, o.id",
	)
	.fetch_all(executor)
	.await?;

	Ok(targets)
}

pub async fn sync_target_for_org<'e, E>(executor: E, org_id: Uuid) -> Result<Option<SyncTarget>>
where
	E: PgExecutor<'e>,
{
	let target = sqlx::query_as::<_, SyncTarget>(
		"\
SELECT o.id AS org_id, c.account_id, c.api_token
FROM organizations o
JOIN organization_credentials c ON c.org_id = o.id
WHERE o.id = $1 AND o.is_active AND c.is_active",
	)
	.bind(org_id)
	.fetch_optional(executor)
	.await?;

	Ok(target)
}

/// Stores the upstream account for an organization, replacing any previous one.
pub async fn upsert_credential<'e, E>(
	executor: E,
	org_id: Uuid,
	account_id: &str,
	api_token: &str,
	now: OffsetDateTime,
) -> Result<()>
where
	E: PgExecutor<'e>,
{
	sqlx::query(
		"\
INSERT INTO organization_credentials (org_id, account_id, api_token, is_active, updated_at)
VALUES ($1, $2, $3, true, $4)
ON CONFLICT (org_id) DO UPDATE
SET
	account_id = EXCLUDED.account_id,
	api_token = EXCLUDED.api_token,
	is_active = true,
	updated_at = EXCLUDED.updated_at",
	)
	.bind(org_id)
	.bind(account_id)
	.bind(api_token)
	.bind(now)
	.execute(executor)
	.await?;

	Ok(())
}
