use sqlx::PgExecutor;
use uuid::Uuid;

use crate::{Result, models::Campaign};

/// Returns the campaign id for a provider campaign, creating the row on first sight. Safe
/// under concurrent ingestion of the same campaign.
pub async fn ensure_campaign<'e, E>(
	executor: E,
	org_id: Uuid,
	provider_campaign_id: &str,
	name: Option<&str>,
) -> Result<Uuid>
where
	E: PgExecutor<'e>,
{
	let id: Uuid = sqlx::query_scalar(
		"\
INSERT INTO campaigns (id, org_id, provider_campaign_id, name)
VALUES ($1, $2, $3, $4)
ON CONFLICT (org_id, provider_campaign_id) DO UPDATE
SET name = COALESCE(EXCLUDED.name, campaigns.name)
RETURNING id",
	)
	.bind(Uuid::new_v4())
	.bind(org_id)
	.bind(provider_campaign_id)
	.bind(name)
	.fetch_one(executor)
	.await?;

	Ok(id)
}

pub async fn list_campaigns<'e, E>(executor: E, org_id: Uuid) -> Result<Vec<Campaign>>
where
	E: PgExecutor<'e>,
{
	let campaigns = sqlx::query_as::<_, Campaign>(
		"SELECT * FROM campaigns WHERE org_id = $1 ORDER BY provider_campaign_id",
	)
	.bind(org_id)
	.fetch_all(executor)
	.await?;

	Ok(campaigns)
}
