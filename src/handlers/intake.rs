//! Contact messages and sample requests.
//!
//! The two public endpoints are anonymous and rate limited; everything under `/admin` needs the
//! `submissions:manage` permission.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};

use super::common::{created_response, parse_uuid, success_response, ApiQuery, ValidatedJson};
use crate::{
    auth::AuthUser,
    entities::submission_history::SubmissionKind,
    errors::ServiceError,
    middleware_helpers::ClientIp,
    services::intake::{
        AssignRequest, ContactDetails, ContactSubmission, ContactView, NoteRequest, NoteView,
        ResponseRequest, SampleDetails, SampleSubmission, SampleView, SubmissionListQuery,
        SubmissionReceipt, SubmissionTransitionRequest,
    },
    ApiResponse, AppState, PaginatedResponse,
};

type Created<T> = (StatusCode, Json<ApiResponse<T>>);

// ---------------------------------------------------------------------------
// Storefront

/// Send a message to the boutique
#[utoipa::path(
    post,
    path = "/api/v1/contact",
    tag = "Intake",
    request_body = ContactSubmission,
    responses(
        (status = 201, description = "Message received", body = ApiResponse<SubmissionReceipt>),
        (status = 400, description = "Invalid submission", body = crate::errors::ErrorResponse),
        (status = 429, description = "Rate limit exceeded", body = crate::errors::ErrorResponse),
    )
)]
pub async fn submit_contact(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    ValidatedJson(submission): ValidatedJson<ContactSubmission>,
) -> Result<Created<SubmissionReceipt>, ServiceError> {
    let receipt = state.services.intake.submit_contact(submission, ip).await?;
    Ok(created_response(receipt))
}

/// Request up to three fragrance samples
#[utoipa::path(
    post,
    path = "/api/v1/samples/request",
    tag = "Intake",
    request_body = SampleSubmission,
    responses(
        (status = 201, description = "Request received", body = ApiResponse<SubmissionReceipt>),
        (status = 400, description = "Invalid submission or unknown product", body = crate::errors::ErrorResponse),
        (status = 429, description = "Rate limit exceeded", body = crate::errors::ErrorResponse),
    )
)]
pub async fn submit_sample(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    ValidatedJson(submission): ValidatedJson<SampleSubmission>,
) -> Result<Created<SubmissionReceipt>, ServiceError> {
    let receipt = state.services.intake.submit_sample(submission, ip).await?;
    Ok(created_response(receipt))
}

// ---------------------------------------------------------------------------
// Contact messages (admin)

#[utoipa::path(
    get,
    path = "/api/v1/admin/contact-messages",
    tag = "Intake",
    params(SubmissionListQuery),
    responses(
        (status = 200, description = "Newest first", body = ApiResponse<PaginatedResponse<ContactView>>),
        (status = 403, description = "Missing permission", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn list_contact_messages(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<SubmissionListQuery>,
) -> Result<Json<ApiResponse<PaginatedResponse<ContactView>>>, ServiceError> {
    let page = state.services.intake.list_contacts(query).await?;
    Ok(success_response(PaginatedResponse::new(
        page.items, page.total, page.page, page.limit,
    )))
}

#[utoipa::path(
    get,
    path = "/api/v1/admin/contact-messages/{id}",
    tag = "Intake",
    params(("id" = String, Path, description = "Contact message id")),
    responses(
        (status = 200, description = "Message with history and notes", body = ApiResponse<ContactDetails>),
        (status = 404, description = "Unknown message", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn get_contact_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<ContactDetails>>, ServiceError> {
    let id = parse_uuid(&id, "contact message")?;
    Ok(success_response(state.services.intake.get_contact(id).await?))
}

#[utoipa::path(
    put,
    path = "/api/v1/admin/contact-messages/{id}/status",
    tag = "Intake",
    params(("id" = String, Path, description = "Contact message id")),
    request_body = SubmissionTransitionRequest,
    responses(
        (status = 200, description = "Updated message", body = ApiResponse<ContactDetails>),
        (status = 400, description = "Illegal transition", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn transition_contact_message(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    ValidatedJson(request): ValidatedJson<SubmissionTransitionRequest>,
) -> Result<Json<ApiResponse<ContactDetails>>, ServiceError> {
    let id = parse_uuid(&id, "contact message")?;
    let details = state
        .services
        .intake
        .transition_contact(id, request, &user.actor())
        .await?;
    Ok(success_response(details))
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/contact-messages/{id}/notes",
    tag = "Intake",
    params(("id" = String, Path, description = "Contact message id")),
    request_body = NoteRequest,
    responses((status = 201, description = "Note added", body = ApiResponse<NoteView>)),
    security(("Bearer" = []))
)]
pub async fn add_contact_note(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    ValidatedJson(request): ValidatedJson<NoteRequest>,
) -> Result<Created<NoteView>, ServiceError> {
    let id = parse_uuid(&id, "contact message")?;
    let note = state
        .services
        .intake
        .add_note(SubmissionKind::Contact, id, request, &user.actor())
        .await?;
    Ok(created_response(note))
}

#[utoipa::path(
    put,
    path = "/api/v1/admin/contact-messages/{id}/assign",
    tag = "Intake",
    params(("id" = String, Path, description = "Contact message id")),
    request_body = AssignRequest,
    responses((status = 200, description = "Assigned", body = ApiResponse<ContactDetails>)),
    security(("Bearer" = []))
)]
pub async fn assign_contact_message(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    ValidatedJson(request): ValidatedJson<AssignRequest>,
) -> Result<Json<ApiResponse<ContactDetails>>, ServiceError> {
    let id = parse_uuid(&id, "contact message")?;
    let intake = &state.services.intake;
    intake
        .assign(SubmissionKind::Contact, id, request, &user.actor())
        .await?;
    Ok(success_response(intake.get_contact(id).await?))
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/contact-messages/{id}/response",
    tag = "Intake",
    params(("id" = String, Path, description = "Contact message id")),
    request_body = ResponseRequest,
    responses(
        (status = 200, description = "Response recorded; message is now responded", body = ApiResponse<ContactDetails>),
        (status = 400, description = "Message is closed", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn respond_to_contact_message(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    ValidatedJson(request): ValidatedJson<ResponseRequest>,
) -> Result<Json<ApiResponse<ContactDetails>>, ServiceError> {
    let id = parse_uuid(&id, "contact message")?;
    let intake = &state.services.intake;
    intake
        .record_response(SubmissionKind::Contact, id, request, &user.actor())
        .await?;
    Ok(success_response(intake.get_contact(id).await?))
}

// ---------------------------------------------------------------------------
// Sample requests (admin)

#[utoipa::path(
    get,
    path = "/api/v1/admin/sample-requests",
    tag = "Intake",
    params(SubmissionListQuery),
    responses((status = 200, description = "Newest first", body = ApiResponse<PaginatedResponse<SampleView>>)),
    security(("Bearer" = []))
)]
pub async fn list_sample_requests(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<SubmissionListQuery>,
) -> Result<Json<ApiResponse<PaginatedResponse<SampleView>>>, ServiceError> {
    let page = state.services.intake.list_samples(query).await?;
    Ok(success_response(PaginatedResponse::new(
        page.items, page.total, page.page, page.limit,
    )))
}

#[utoipa::path(
    get,
    path = "/api/v1/admin/sample-requests/{id}",
    tag = "Intake",
    params(("id" = String, Path, description = "Sample request id")),
    responses(
        (status = 200, description = "Request with history and notes", body = ApiResponse<SampleDetails>),
        (status = 404, description = "Unknown request", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn get_sample_request(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<SampleDetails>>, ServiceError> {
    let id = parse_uuid(&id, "sample request")?;
    Ok(success_response(state.services.intake.get_sample(id).await?))
}

#[utoipa::path(
    put,
    path = "/api/v1/admin/sample-requests/{id}/status",
    tag = "Intake",
    params(("id" = String, Path, description = "Sample request id")),
    request_body = SubmissionTransitionRequest,
    responses(
        (status = 200, description = "Updated request", body = ApiResponse<SampleDetails>),
        (status = 400, description = "Illegal transition", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn transition_sample_request(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    ValidatedJson(request): ValidatedJson<SubmissionTransitionRequest>,
) -> Result<Json<ApiResponse<SampleDetails>>, ServiceError> {
    let id = parse_uuid(&id, "sample request")?;
    let details = state
        .services
        .intake
        .transition_sample(id, request, &user.actor())
        .await?;
    Ok(success_response(details))
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/sample-requests/{id}/notes",
    tag = "Intake",
    params(("id" = String, Path, description = "Sample request id")),
    request_body = NoteRequest,
    responses((status = 201, description = "Note added", body = ApiResponse<NoteView>)),
    security(("Bearer" = []))
)]
pub async fn add_sample_note(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    ValidatedJson(request): ValidatedJson<NoteRequest>,
) -> Result<Created<NoteView>, ServiceError> {
    let id = parse_uuid(&id, "sample request")?;
    let note = state
        .services
        .intake
        .add_note(SubmissionKind::Sample, id, request, &user.actor())
        .await?;
    Ok(created_response(note))
}

#[utoipa::path(
    put,
    path = "/api/v1/admin/sample-requests/{id}/assign",
    tag = "Intake",
    params(("id" = String, Path, description = "Sample request id")),
    request_body = AssignRequest,
    responses((status = 200, description = "Assigned", body = ApiResponse<SampleDetails>)),
    security(("Bearer" = []))
)]
pub async fn assign_sample_request(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    ValidatedJson(request): ValidatedJson<AssignRequest>,
) -> Result<Json<ApiResponse<SampleDetails>>, ServiceError> {
    let id = parse_uuid(&id, "sample request")?;
    let intake = &state.services.intake;
    intake
        .assign(SubmissionKind::Sample, id, request, &user.actor())
        .await?;
    Ok(success_response(intake.get_sample(id).await?))
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/sample-requests/{id}/response",
    tag = "Intake",
    params(("id" = String, Path, description = "Sample request id")),
    request_body = ResponseRequest,
    responses((status = 200, description = "Response recorded", body = ApiResponse<SampleDetails>)),
    security(("Bearer" = []))
)]
pub async fn respond_to_sample_request(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    ValidatedJson(request): ValidatedJson<ResponseRequest>,
) -> Result<Json<ApiResponse<SampleDetails>>, ServiceError> {
    let id = parse_uuid(&id, "sample request")?;
    let intake = &state.services.intake;
    intake
        .record_response(SubmissionKind::Sample, id, request, &user.actor())
        .await?;
    Ok(success_response(intake.get_sample(id).await?))
}
