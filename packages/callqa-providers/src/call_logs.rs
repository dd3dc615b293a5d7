//! Paginated call-log reports from the upstream call-tracking provider.

use reqwest::{Client, StatusCode};
use serde::Serialize;
use serde_json::Value;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

use crate::{Error, Result};

const VALUE_COLUMNS: [&str; 15] = [
	"inboundCallId",
	"callDt",
	"callLengthInSeconds",
	"inboundPhoneNumber",
	"recordingUrl",
	"campaignId",
	"campaignName",
	"publisherId",
	"publisherSubId",
	"publisherName",
	"buyer",
	"targetId",
	"targetName",
	"conversionAmount",
	"payoutAmount",
];

/// Upstream account an organization syncs from.
#[derive(Clone, Debug)]
pub struct Account {
	pub account_id: String,
	pub api_token: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimeWindow {
	pub start: OffsetDateTime,
	pub end: OffsetDateTime,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct CallLogPage {
	pub records: Vec<Value>,
	/// The provider truncated the report; no further pages should be requested.
	pub partial: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProviderCampaign {
	pub provider_campaign_id: String,
	pub name: Option<String>,
}

/// A provider record mapped onto the canonical call columns.
#[derive(Clone, Debug, PartialEq)]
pub struct CallRecord {
	pub external_call_id: String,
	pub start_time: OffsetDateTime,
	pub audio_ref: Option<String>,
	pub revenue: f64,
	pub payout: Option<f64>,
	pub duration_seconds: Option<i32>,
	pub caller_number: Option<String>,
	pub campaign: Option<ProviderCampaign>,
	pub raw_payload: Value,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ReportRequest<'a> {
	report_start: String,
	report_end: String,
	size: u32,
	offset: u32,
	value_columns: Vec<ValueColumn<'a>>,
}

#[derive(Serialize)]
struct ValueColumn<'a> {
	column: &'a str,
}

pub async fn fetch_page(
	client: &Client,
	cfg: &callqa_config::Upstream,
	account: &Account,
	window: TimeWindow,
	offset: u32,
	size: u32,
) -> Result<CallLogPage> {
	let url = format!("{}/{}/calllogs", cfg.api_base, account.account_id);
	let body = ReportRequest {
		report_start: format_time(window.start)?,
		report_end: format_time(window.end)?,
		size,
		offset,
		value_columns: VALUE_COLUMNS.into_iter().map(|column| ValueColumn { column }).collect(),
	};
	let res = client
		.post(url)
		.headers(crate::auth_headers(&account.api_token, &cfg.default_headers)?)
		.json(&body)
		.send()
		.await
		.map_err(map_transport_error)?;

	if matches!(res.status(), StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
		return Err(Error::Unauthorized { status: res.status().as_u16() });
	}

	let json: Value = res
		.error_for_status()
		.map_err(map_transport_error)?
		.json()
		.await
		.map_err(map_transport_error)?;

	parse_page(json)
}

pub fn parse_page(json: Value) -> Result<CallLogPage> {
	let report = json.get("report").ok_or_else(|| Error::InvalidResponse {
		message: "Call log response is missing the report object.".to_string(),
	})?;
	let records = match report.get("records") {
		None | Some(Value::Null) => Vec::new(),
		Some(Value::Array(records)) => records.clone(),
		Some(_) => {
			return Err(Error::InvalidResponse {
				message: "Call log report records must be an array.".to_string(),
			});
		},
	};
	let partial = report.get("partialResult").and_then(Value::as_bool).unwrap_or(false);

	Ok(CallLogPage { records, partial })
}

/// Maps one provider record. Returns `None` when the record has no call id.
pub fn map_record(raw: Value, fetched_at: OffsetDateTime) -> Option<CallRecord> {
	let external_call_id = text_field(&raw, "inboundCallId")?;
	let start_time = raw.get("callDt").and_then(parse_call_time).unwrap_or(fetched_at);
	let campaign = text_field(&raw, "campaignId").map(|provider_campaign_id| ProviderCampaign {
		provider_campaign_id,
		name: text_field(&raw, "campaignName"),
	});

	Some(CallRecord {
		external_call_id,
		start_time,
		audio_ref: text_field(&raw, "recordingUrl"),
		revenue: number_field(&raw, "conversionAmount").unwrap_or(0.0),
		payout: number_field(&raw, "payoutAmount"),
		duration_seconds: number_field(&raw, "callLengthInSeconds")
			.filter(|seconds| *seconds >= 0.0 && *seconds <= i32::MAX as f64)
			.map(|seconds| seconds.round() as i32),
		caller_number: text_field(&raw, "inboundPhoneNumber"),
		campaign,
		raw_payload: raw,
	})
}

/// Accepts RFC 3339 text or epoch milliseconds, as a number or a numeric string.
fn parse_call_time(value: &Value) -> Option<OffsetDateTime> {
	let millis = match value {
		Value::Number(number) => number.as_f64()?,
		Value::String(text) => {
			let text = text.trim();

			if let Ok(parsed) = OffsetDateTime::parse(text, &Rfc3339) {
				return Some(parsed);
			}

			text.parse::<f64>().ok()?
		},
		_ => return None,
	};
	let nanos = (millis as i128).checked_mul(1_000_000)?;

	OffsetDateTime::from_unix_timestamp_nanos(nanos).ok()
}

fn text_field(raw: &Value, key: &str) -> Option<String> {
	let text = match raw.get(key)? {
		Value::String(text) => text.trim().to_string(),
		Value::Number(number) => number.to_string(),
		_ => return None,
	};

	if text.is_empty() { None } else { Some(text) }
}

fn number_field(raw: &Value, key: &str) -> Option<f64> {
	let value = match raw.get(key)? {
		Value::Number(number) => number.as_f64(),
		Value::String(text) => text.trim().parse::<f64>().ok(),
		_ => None,
	};

	value.filter(|value| value.is_finite())
}

fn format_time(value: OffsetDateTime) -> Result<String> {
	value.format(&Rfc3339).map_err(|err| Error::InvalidConfig {
		message: format!("Report window cannot be formatted: {err}."),
	})
}

fn map_transport_error(err: reqwest::Error) -> Error {
	if err.is_timeout() { Error::Timeout } else { Error::Reqwest(err) }
}
