use axum::{
	Json, Router,
	extract::{
		FromRequestParts, Path, Query, State,
		rejection::{JsonRejection, QueryRejection},
	},
	http::{StatusCode, header, request::Parts},
	response::{IntoResponse, Response},
	routing::{get, post},
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::state::AppState;
use callqa_domain::{AuthContext, Identity};
use callqa_service::{
	AudioLink, BulkRequest, BulkResponse, CallView, CreateOrganizationRequest,
	CreateOrganizationResponse, Error as ServiceError, ListCallsRequest, ListCallsResponse,
	PatchCallRequest, SyncRequest, SyncResponse,
};

pub fn router(state: AppState) -> Router {
	Router::new()
		.route("/health", get(health))
		.route("/sync", get(sync).post(sync))
		.route("/calls", get(list_calls))
		.route("/calls/bulk", post(bulk_apply))
		.route("/calls/{id}", get(get_call).patch(patch_call))
		.route("/calls/{id}/audio", get(audio_link))
		.route("/organizations", post(create_organization))
		.with_state(state)
}

/// Bearer token of the request, verified but not yet bound to an organization.
pub struct Caller(pub Identity);
impl FromRequestParts<AppState> for Caller {
	type Rejection = ApiError;

	async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, ApiError> {
		let identity = state.service.authenticate(bearer_token(parts))?;

		Ok(Self(identity))
	}
}

/// Tenant and role of the request, resolved once from the bearer token.
pub struct Auth(pub AuthContext);
impl FromRequestParts<AppState> for Auth {
	type Rejection = ApiError;

	async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, ApiError> {
		let ctx = state.service.authorize(bearer_token(parts))?;

		Ok(Self(ctx))
	}
}

#[derive(Debug, Default, Deserialize)]
pub struct SyncWindowQuery {
	#[serde(default, with = "time::serde::rfc3339::option")]
	pub start: Option<OffsetDateTime>,
	#[serde(default, with = "time::serde::rfc3339::option")]
	pub end: Option<OffsetDateTime>,
}

#[derive(Debug, Serialize)]
struct SyncBody {
	status: &'static str,
	#[serde(flatten)]
	sync: SyncResponse,
}

async fn health() -> StatusCode {
	StatusCode::OK
}

async fn sync(
	State(state): State<AppState>,
	Auth(ctx): Auth,
	query: Result<Query<SyncWindowQuery>, QueryRejection>,
) -> Result<Json<SyncBody>, ApiError> {
	callqa_service::require_admin(&ctx)?;

	let Query(window) = query.map_err(query_rejection)?;
	let response = state
		.service
		.sync(SyncRequest { org_id: ctx.org_id, start: window.start, end: window.end })
		.await?;

	Ok(Json(SyncBody { status: "ok", sync: response }))
}

async fn list_calls(
	State(state): State<AppState>,
	Auth(ctx): Auth,
	query: Result<Query<ListCallsRequest>, QueryRejection>,
) -> Result<Json<ListCallsResponse>, ApiError> {
	let Query(request) = query.map_err(query_rejection)?;
	let response = state.service.list_calls(&ctx, request).await?;

	Ok(Json(response))
}

async fn get_call(
	State(state): State<AppState>,
	Auth(ctx): Auth,
	Path(id): Path<String>,
) -> Result<Json<CallView>, ApiError> {
	let response = state.service.get_call(&ctx, parse_call_id(&id)?).await?;

	Ok(Json(response))
}

async fn patch_call(
	State(state): State<AppState>,
	Auth(ctx): Auth,
	Path(id): Path<String>,
	payload: Result<Json<PatchCallRequest>, JsonRejection>,
) -> Result<Json<CallView>, ApiError> {
	let call_id = parse_call_id(&id)?;
	let Json(request) = payload.map_err(json_rejection)?;
	let response = state.service.patch_call(&ctx, call_id, request).await?;

	Ok(Json(response))
}

async fn bulk_apply(
	State(state): State<AppState>,
	Auth(ctx): Auth,
	payload: Result<Json<BulkRequest>, JsonRejection>,
) -> Result<Json<BulkResponse>, ApiError> {
	let Json(request) = payload.map_err(json_rejection)?;
	let response = state.service.bulk_apply(&ctx, request).await?;

	Ok(Json(response))
}

async fn audio_link(
	State(state): State<AppState>,
	Auth(ctx): Auth,
	Path(id): Path<String>,
) -> Result<Json<AudioLink>, ApiError> {
	let response = state.service.audio_link(&ctx, parse_call_id(&id)?).await?;

	Ok(Json(response))
}

async fn create_organization(
	State(state): State<AppState>,
	Caller(identity): Caller,
	payload: Result<Json<CreateOrganizationRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<CreateOrganizationResponse>), ApiError> {
	let Json(request) = payload.map_err(json_rejection)?;
	let response = state.service.create_organization(&identity, request).await?;

	Ok((StatusCode::CREATED, Json(response)))
}

fn bearer_token(parts: &Parts) -> Option<&str> {
	let raw = parts.headers.get(header::AUTHORIZATION)?.to_str().ok()?.trim();
	let (scheme, token) = raw.split_once(' ')?;

	if scheme.eq_ignore_ascii_case("bearer") { Some(token.trim()) } else { None }
}

// Malformed ids look the same as ids owned by another organization.
fn parse_call_id(raw: &str) -> Result<Uuid, ApiError> {
	Uuid::parse_str(raw.trim())
		.map_err(|_| json_error(StatusCode::NOT_FOUND, "NOT_FOUND", "Call not found."))
}

fn json_rejection(err: JsonRejection) -> ApiError {
	json_error(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", err.body_text())
}

fn query_rejection(err: QueryRejection) -> ApiError {
	json_error(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", err.body_text())
}

#[derive(Debug, Serialize)]
struct ErrorBody {
	error_code: String,
	message: String,
}

#[derive(Debug)]
pub struct ApiError {
	status: StatusCode,
	error_code: String,
	message: String,
}
impl ApiError {
	fn new(status: StatusCode, error_code: impl Into<String>, message: impl Into<String>) -> Self {
		Self { status, error_code: error_code.into(), message: message.into() }
	}
}

pub fn json_error(status: StatusCode, code: &str, message: impl Into<String>) -> ApiError {
	ApiError::new(status, code, message)
}

impl From<ServiceError> for ApiError {
	fn from(err: ServiceError) -> Self {
		match err {
			ServiceError::InvalidRequest { message } =>
				json_error(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", message),
			ServiceError::InvalidTransition { message } =>
				json_error(StatusCode::BAD_REQUEST, "INVALID_TRANSITION", message),
			ServiceError::AuthenticationRequired => json_error(
				StatusCode::UNAUTHORIZED,
				"AUTHENTICATION_REQUIRED",
				"A valid bearer token is required.",
			),
			ServiceError::OrganizationRequired => json_error(
				StatusCode::FORBIDDEN,
				"ORGANIZATION_REQUIRED",
				"Create or join an organization first.",
			),
			ServiceError::Forbidden { message } =>
				json_error(StatusCode::FORBIDDEN, "FORBIDDEN", message),
			ServiceError::NotFound { message } =>
				json_error(StatusCode::NOT_FOUND, "NOT_FOUND", message),
			ServiceError::Conflict { message } => {
				tracing::warn!(error = %message, "Request conflicted with a concurrent write.");

				json_error(StatusCode::CONFLICT, "CONFLICT", "Request conflicted; retry it.")
			},
			ServiceError::UpstreamUnavailable { message } =>
				json_error(StatusCode::BAD_GATEWAY, "UPSTREAM_UNAVAILABLE", message),
			ServiceError::Storage { message } => {
				tracing::error!(error = %message, "Storage failure while handling request.");

				json_error(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", "Internal error.")
			},
		}
	}
}

impl IntoResponse for ApiError {
	fn into_response(self) -> Response {
		let body = ErrorBody { error_code: self.error_code, message: self.message };

		(self.status, Json(body)).into_response()
	}
}
