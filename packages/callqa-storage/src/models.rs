use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct Call {
	pub id: Uuid,
	pub org_id: Uuid,
	pub external_call_id: String,
	pub campaign_id: Option<Uuid>,
	pub start_time: OffsetDateTime,
	pub status: String,
	pub audio_ref: Option<String>,
	pub transcript: Option<String>,
	pub qa_result: Option<Value>,
	pub judge_model: Option<String>,
	pub qa_version: Option<String>,
	pub revenue: f64,
	pub payout: Option<f64>,
	pub duration_seconds: Option<i32>,
	pub caller_number: Option<String>,
	pub raw_payload: Value,
	pub retry_count: i32,
	pub processing_error: Option<String>,
	pub created_at: OffsetDateTime,
	pub updated_at: OffsetDateTime,
}

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct Organization {
	pub id: Uuid,
	pub name: String,
	pub slug: String,
	pub plan: String,
	pub is_active: bool,
	pub created_at: OffsetDateTime,
}

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct OrganizationMember {
	pub org_id: Uuid,
	pub user_id: Uuid,
	pub role: String,
	pub accepted_at: Option<OffsetDateTime>,
	pub created_at: OffsetDateTime,
}

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct Campaign {
	pub id: Uuid,
	pub org_id: Uuid,
	pub provider_campaign_id: String,
	pub name: Option<String>,
	pub created_at: OffsetDateTime,
}

/// Upstream account of an active organization.
#[derive(Clone, Debug, sqlx::FromRow)]
pub struct SyncTarget {
	pub org_id: Uuid,
	pub account_id: String,
	pub api_token: String,
}
