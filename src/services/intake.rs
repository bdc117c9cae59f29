use crate::{
    config::IntakeConfig,
    db::DbPool,
    entities::{
        contact_message::{self, ContactStatus, Entity as ContactEntity},
        product::{self, Entity as ProductEntity},
        sample_request::{self, Entity as SampleEntity, SampleStatus},
        submission_history::{
            self, Entity as SubmissionHistoryEntity, SubmissionAction, SubmissionKind,
            SubmissionStatus,
        },
        submission_note::{self, Entity as NoteEntity},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    metrics,
    services::{
        orders::{parse_enum, validate_phone},
        spam::{self, SpamAssessment, SpamRules, SpamSignals},
    },
};
use chrono::{DateTime, Duration, Utc};
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

// ---------------------------------------------------------------------------
// Public submissions

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ContactSubmission {
    #[validate(length(min = 2, max = 255))]
    pub name: String,
    #[validate(email(message = "Email address is invalid"))]
    pub email: String,
    #[validate(custom = "validate_phone")]
    pub phone: Option<String>,
    #[validate(length(max = 255))]
    pub subject: Option<String>,
    #[validate(length(min = 10, max = 5000, message = "Message must be between 10 and 5000 characters"))]
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SampleSubmission {
    #[validate(length(min = 2, max = 255))]
    pub name: String,
    #[validate(email(message = "Email address is invalid"))]
    pub email: String,
    #[validate(custom = "validate_phone")]
    pub phone: Option<String>,
    #[validate(length(min = 3, max = 512))]
    pub address: String,
    #[validate(length(min = 1, max = 128))]
    pub city: String,
    #[serde(default = "default_country")]
    #[validate(length(min = 2, max = 64))]
    pub country: String,
    /// Product ids; at most three samples per request
    #[validate(length(min = 1, max = 3, message = "Request between 1 and 3 samples"))]
    pub products: Vec<Uuid>,
    #[validate(length(max = 1000))]
    pub message: Option<String>,
}

fn default_country() -> String {
    "MA".to_string()
}

impl ContactSubmission {
    /// Trims every field and lowercases the email so validation sees what gets stored.
    pub fn normalized(mut self) -> Self {
        self.name = self.name.trim().to_string();
        self.email = self.email.trim().to_lowercase();
        self.phone = trimmed(self.phone);
        self.subject = trimmed(self.subject);
        self.message = self.message.trim().to_string();
        self
    }
}

impl SampleSubmission {
    pub fn normalized(mut self) -> Self {
        self.name = self.name.trim().to_string();
        self.email = self.email.trim().to_lowercase();
        self.phone = trimmed(self.phone);
        self.address = self.address.trim().to_string();
        self.city = self.city.trim().to_string();
        self.country = self.country.trim().to_string();
        self.message = trimmed(self.message);
        self
    }
}

/// What the storefront gets back after a submission.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionReceipt {
    pub id: Uuid,
    pub status: String,
    pub is_duplicate: bool,
}

// ---------------------------------------------------------------------------
// Admin requests

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionTransitionRequest {
    #[validate(length(min = 1))]
    pub status: String,
    #[validate(length(max = 1000))]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct NoteRequest {
    #[validate(length(min = 1, max = 5000))]
    pub body: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct AssignRequest {
    #[validate(length(min = 1, max = 255))]
    pub assignee: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct ResponseRequest {
    #[validate(length(min = 1, max = 5000))]
    pub response: String,
}

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct SubmissionListQuery {
    pub page: Option<u64>,
    pub limit: Option<u64>,
    pub status: Option<String>,
}

// ---------------------------------------------------------------------------
// Views

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ContactView {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub subject: Option<String>,
    pub message: String,
    pub status: ContactStatus,
    pub is_duplicate: bool,
    pub duplicate_of: Option<Uuid>,
    pub spam_score: i32,
    pub spam_reasons: Vec<String>,
    pub assigned_to: Option<String>,
    pub response: Option<String>,
    pub responded_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<contact_message::Model> for ContactView {
    fn from(model: contact_message::Model) -> Self {
        let spam_reasons = model.spam_reason_list();
        Self {
            id: model.id,
            name: model.name,
            email: model.email,
            phone: model.phone,
            subject: model.subject,
            message: model.message,
            status: model.status,
            is_duplicate: model.is_duplicate,
            duplicate_of: model.duplicate_of,
            spam_score: model.spam_score,
            spam_reasons,
            assigned_to: model.assigned_to,
            response: model.response,
            responded_at: model.responded_at,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SampleView {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub address: String,
    pub city: String,
    pub country: String,
    pub requested_products: Vec<Uuid>,
    pub message: Option<String>,
    pub status: SampleStatus,
    pub is_duplicate: bool,
    pub duplicate_of: Option<Uuid>,
    pub assigned_to: Option<String>,
    pub response: Option<String>,
    pub responded_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<sample_request::Model> for SampleView {
    fn from(model: sample_request::Model) -> Self {
        let requested_products = model.requested_product_ids();
        Self {
            id: model.id,
            name: model.name,
            email: model.email,
            phone: model.phone,
            address: model.address_line,
            city: model.city,
            country: model.country,
            requested_products,
            message: model.message,
            status: model.status,
            is_duplicate: model.is_duplicate,
            duplicate_of: model.duplicate_of,
            assigned_to: model.assigned_to,
            response: model.response,
            responded_at: model.responded_at,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntryView {
    pub action: SubmissionAction,
    pub from_status: Option<String>,
    pub to_status: Option<String>,
    pub actor: String,
    pub detail: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<submission_history::Model> for HistoryEntryView {
    fn from(model: submission_history::Model) -> Self {
        Self {
            action: model.action,
            from_status: model.from_status,
            to_status: model.to_status,
            actor: model.actor,
            detail: model.detail,
            created_at: model.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NoteView {
    pub id: Uuid,
    pub author: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

impl From<submission_note::Model> for NoteView {
    fn from(model: submission_note::Model) -> Self {
        Self {
            id: model.id,
            author: model.author,
            body: model.body,
            created_at: model.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ContactDetails {
    #[serde(flatten)]
    pub message: ContactView,
    pub history: Vec<HistoryEntryView>,
    pub notes: Vec<NoteView>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SampleDetails {
    #[serde(flatten)]
    pub request: SampleView,
    pub history: Vec<HistoryEntryView>,
    pub notes: Vec<NoteView>,
}

#[derive(Debug, Clone)]
pub struct SubmissionPage<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u64,
    pub limit: u64,
}

// ---------------------------------------------------------------------------
// Helpers

#[allow(clippy::too_many_arguments)]
fn history_row(
    kind: SubmissionKind,
    submission_id: Uuid,
    action: SubmissionAction,
    from: Option<String>,
    to: Option<String>,
    actor: &str,
    detail: Option<String>,
    at: DateTime<Utc>,
) -> submission_history::ActiveModel {
    submission_history::ActiveModel {
        id: Set(Uuid::new_v4()),
        submission_kind: Set(kind),
        submission_id: Set(submission_id),
        action: Set(action),
        from_status: Set(from),
        to_status: Set(to),
        actor: Set(actor.to_string()),
        detail: Set(detail),
        created_at: Set(at),
    }
}

fn page_bounds(query: &SubmissionListQuery) -> Result<(u64, u64), ServiceError> {
    let page = query.page.unwrap_or(1);
    if page == 0 {
        return Err(ServiceError::ValidationError("page must be at least 1".into()));
    }
    let limit = query.limit.unwrap_or(20);
    if !(1..=100).contains(&limit) {
        return Err(ServiceError::ValidationError(
            "limit must be between 1 and 100".into(),
        ));
    }
    Ok((page, limit))
}

/// Parses the requested status and checks it against the workflow.
fn next_status<S: SubmissionStatus>(current: S, raw: &str) -> Result<S, ServiceError> {
    let next: S = parse_enum(raw, "status")?;
    if !current.can_transition_to(next) {
        return Err(ServiceError::InvalidTransition(format!(
            "Cannot move from {} to {}",
            current, next
        )));
    }
    Ok(next)
}

fn trimmed(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn disposition(assessment: Option<&SpamAssessment>, is_duplicate: bool) -> &'static str {
    match (assessment.map(|a| a.rejected).unwrap_or(false), is_duplicate) {
        (true, _) => "auto_closed",
        (false, true) => "duplicate",
        (false, false) => "accepted",
    }
}

// ---------------------------------------------------------------------------
// Service

/// Contact messages and sample requests: public intake plus the admin workflow.
#[derive(Clone)]
pub struct IntakeService {
    db_pool: Arc<DbPool>,
    event_sender: Option<Arc<EventSender>>,
    config: IntakeConfig,
    rules: SpamRules,
}

impl IntakeService {
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: Option<Arc<EventSender>>,
        config: IntakeConfig,
    ) -> Self {
        let rules = SpamRules::from(&config);
        Self {
            db_pool,
            event_sender,
            config,
            rules,
        }
    }

    async fn publish(&self, events: Vec<Event>) {
        if let Some(sender) = &self.event_sender {
            for event in events {
                sender.publish(event).await;
            }
        }
    }

    fn window_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - Duration::days(self.config.duplicate_window_days)
    }

    #[instrument(skip(self, submission), fields(ip = ?ip))]
    pub async fn submit_contact(
        &self,
        submission: ContactSubmission,
        ip: Option<String>,
    ) -> Result<SubmissionReceipt, ServiceError> {
        let submission = submission.normalized();
        submission.validate()?;
        let db = &*self.db_pool;
        let now = Utc::now();
        let email = submission.email.clone();
        let hash = spam::contact_hash(&email, &submission.message);

        let original = ContactEntity::find()
            .filter(contact_message::Column::ContentHash.eq(hash.as_str()))
            .filter(contact_message::Column::CreatedAt.gte(self.window_start(now)))
            .order_by_asc(contact_message::Column::CreatedAt)
            .one(db)
            .await?;

        let (hourly, daily) = match ip.as_deref() {
            Some(ip) => {
                let from_ip = ContactEntity::find()
                    .filter(contact_message::Column::IpAddress.eq(ip));
                let hourly = from_ip
                    .clone()
                    .filter(contact_message::Column::CreatedAt.gte(now - Duration::hours(1)))
                    .count(db)
                    .await?;
                let daily = from_ip
                    .filter(contact_message::Column::CreatedAt.gte(now - Duration::days(1)))
                    .count(db)
                    .await?;
                (hourly, daily)
            }
            None => (0, 0),
        };

        let assessment = spam::score(
            &SpamSignals {
                email: &email,
                body: &submission.message,
                hourly_submissions: hourly,
                daily_submissions: daily,
            },
            &self.rules,
        );
        let is_duplicate = original.is_some();
        let status = if assessment.rejected {
            ContactStatus::Closed
        } else {
            ContactStatus::New
        };

        let id = Uuid::new_v4();
        let txn = self.db_pool.begin().await?;
        contact_message::ActiveModel {
            id: Set(id),
            name: Set(submission.name),
            email: Set(email),
            phone: Set(submission.phone),
            subject: Set(submission.subject),
            message: Set(submission.message),
            ip_address: Set(ip),
            content_hash: Set(hash),
            is_duplicate: Set(is_duplicate),
            duplicate_of: Set(original.map(|o| o.id)),
            spam_score: Set(assessment.score as i32),
            spam_reasons: Set(serde_json::to_string(&assessment.reasons)
                .map_err(|e| ServiceError::InternalError(e.to_string()))?),
            status: Set(status),
            assigned_to: Set(None),
            response: Set(None),
            responded_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;

        history_row(
            SubmissionKind::Contact,
            id,
            SubmissionAction::Created,
            None,
            Some(ContactStatus::New.to_string()),
            "public",
            None,
            now,
        )
        .insert(&txn)
        .await?;
        if assessment.rejected {
            history_row(
                SubmissionKind::Contact,
                id,
                SubmissionAction::AutoClosed,
                Some(ContactStatus::New.to_string()),
                Some(ContactStatus::Closed.to_string()),
                "system",
                Some(assessment.reasons.join("; ")),
                now,
            )
            .insert(&txn)
            .await?;
        }
        txn.commit().await?;

        metrics::SUBMISSIONS
            .with_label_values(&["contact", disposition(Some(&assessment), is_duplicate)])
            .inc();
        let mut events = vec![Event::ContactMessageReceived {
            id,
            spam_score: assessment.score,
            is_duplicate,
        }];
        if assessment.rejected {
            warn!(contact_id = %id, score = assessment.score, "contact message auto-closed");
            events.push(Event::SubmissionAutoClosed {
                kind: SubmissionKind::Contact,
                id,
                reasons: assessment.reasons.clone(),
            });
        }
        self.publish(events).await;

        Ok(SubmissionReceipt {
            id,
            status: status.to_string(),
            is_duplicate,
        })
    }

    #[instrument(skip(self, submission), fields(ip = ?ip))]
    pub async fn submit_sample(
        &self,
        submission: SampleSubmission,
        ip: Option<String>,
    ) -> Result<SubmissionReceipt, ServiceError> {
        let submission = submission.normalized();
        submission.validate()?;
        let db = &*self.db_pool;
        let now = Utc::now();
        let email = submission.email.clone();

        let requested: BTreeSet<Uuid> = submission.products.iter().copied().collect();
        let known: BTreeSet<Uuid> = ProductEntity::find()
            .filter(product::Column::Id.is_in(requested.iter().copied()))
            .all(db)
            .await?
            .into_iter()
            .map(|p| p.id)
            .collect();
        if let Some(missing) = requested.difference(&known).next() {
            return Err(ServiceError::ValidationError(format!(
                "Unknown product {}",
                missing
            )));
        }

        let products: Vec<Uuid> = requested.into_iter().collect();
        let hash = spam::sample_hash(&email, &products);
        let original = SampleEntity::find()
            .filter(sample_request::Column::ContentHash.eq(hash.as_str()))
            .filter(sample_request::Column::CreatedAt.gte(self.window_start(now)))
            .order_by_asc(sample_request::Column::CreatedAt)
            .one(db)
            .await?;
        let is_duplicate = original.is_some();

        let id = Uuid::new_v4();
        let txn = self.db_pool.begin().await?;
        sample_request::ActiveModel {
            id: Set(id),
            name: Set(submission.name),
            email: Set(email),
            phone: Set(submission.phone),
            address_line: Set(submission.address),
            city: Set(submission.city),
            country: Set(submission.country),
            requested_products: Set(serde_json::to_string(&products)
                .map_err(|e| ServiceError::InternalError(e.to_string()))?),
            message: Set(submission.message),
            ip_address: Set(ip),
            content_hash: Set(hash),
            is_duplicate: Set(is_duplicate),
            duplicate_of: Set(original.map(|o| o.id)),
            status: Set(SampleStatus::Pending),
            assigned_to: Set(None),
            response: Set(None),
            responded_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;
        history_row(
            SubmissionKind::Sample,
            id,
            SubmissionAction::Created,
            None,
            Some(SampleStatus::Pending.to_string()),
            "public",
            None,
            now,
        )
        .insert(&txn)
        .await?;
        txn.commit().await?;

        metrics::SUBMISSIONS
            .with_label_values(&["sample", disposition(None, is_duplicate)])
            .inc();
        self.publish(vec![Event::SampleRequestReceived { id, is_duplicate }])
            .await;
        info!(sample_id = %id, is_duplicate, "sample request stored");

        Ok(SubmissionReceipt {
            id,
            status: SampleStatus::Pending.to_string(),
            is_duplicate,
        })
    }

    // -----------------------------------------------------------------------
    // Admin reads

    pub async fn list_contacts(
        &self,
        query: SubmissionListQuery,
    ) -> Result<SubmissionPage<ContactView>, ServiceError> {
        let (page, limit) = page_bounds(&query)?;
        let mut select = ContactEntity::find();
        if let Some(raw) = query.status.as_deref() {
            let status: ContactStatus = parse_enum(raw, "status")?;
            select = select.filter(contact_message::Column::Status.eq(status));
        }
        let paginator = select
            .order_by_desc(contact_message::Column::CreatedAt)
            .paginate(&*self.db_pool, limit);
        let total = paginator.num_items().await?;
        let items = paginator.fetch_page(page - 1).await?;
        Ok(SubmissionPage {
            items: items.into_iter().map(Into::into).collect(),
            total,
            page,
            limit,
        })
    }

    pub async fn list_samples(
        &self,
        query: SubmissionListQuery,
    ) -> Result<SubmissionPage<SampleView>, ServiceError> {
        let (page, limit) = page_bounds(&query)?;
        let mut select = SampleEntity::find();
        if let Some(raw) = query.status.as_deref() {
            let status: SampleStatus = parse_enum(raw, "status")?;
            select = select.filter(sample_request::Column::Status.eq(status));
        }
        let paginator = select
            .order_by_desc(sample_request::Column::CreatedAt)
            .paginate(&*self.db_pool, limit);
        let total = paginator.num_items().await?;
        let items = paginator.fetch_page(page - 1).await?;
        Ok(SubmissionPage {
            items: items.into_iter().map(Into::into).collect(),
            total,
            page,
            limit,
        })
    }

    async fn trail<C: ConnectionTrait>(
        conn: &C,
        kind: SubmissionKind,
        id: Uuid,
    ) -> Result<(Vec<HistoryEntryView>, Vec<NoteView>), ServiceError> {
        let history = SubmissionHistoryEntity::find()
            .filter(submission_history::Column::SubmissionKind.eq(kind))
            .filter(submission_history::Column::SubmissionId.eq(id))
            .order_by_asc(submission_history::Column::CreatedAt)
            .all(conn)
            .await?;
        let notes = NoteEntity::find()
            .filter(submission_note::Column::SubmissionKind.eq(kind))
            .filter(submission_note::Column::SubmissionId.eq(id))
            .order_by_asc(submission_note::Column::CreatedAt)
            .all(conn)
            .await?;
        Ok((
            history.into_iter().map(Into::into).collect(),
            notes.into_iter().map(Into::into).collect(),
        ))
    }

    pub async fn get_contact(&self, id: Uuid) -> Result<ContactDetails, ServiceError> {
        let db = &*self.db_pool;
        let message = find_contact(db, id).await?;
        let (history, notes) = Self::trail(db, SubmissionKind::Contact, id).await?;
        Ok(ContactDetails {
            message: message.into(),
            history,
            notes,
        })
    }

    pub async fn get_sample(&self, id: Uuid) -> Result<SampleDetails, ServiceError> {
        let db = &*self.db_pool;
        let request = find_sample(db, id).await?;
        let (history, notes) = Self::trail(db, SubmissionKind::Sample, id).await?;
        Ok(SampleDetails {
            request: request.into(),
            history,
            notes,
        })
    }

    // -----------------------------------------------------------------------
    // Admin workflow

    #[instrument(skip(self, request))]
    pub async fn transition_contact(
        &self,
        id: Uuid,
        request: SubmissionTransitionRequest,
        actor: &str,
    ) -> Result<ContactDetails, ServiceError> {
        request.validate()?;
        let txn = self.db_pool.begin().await?;
        let current = find_contact(&txn, id).await?;
        let next = next_status(current.status, &request.status)?;
        let now = Utc::now();

        let updated = ContactEntity::update_many()
            .col_expr(contact_message::Column::Status, Expr::value(next))
            .col_expr(contact_message::Column::UpdatedAt, Expr::value(now))
            .filter(contact_message::Column::Id.eq(id))
            .filter(contact_message::Column::Status.eq(current.status))
            .exec(&txn)
            .await?;
        if updated.rows_affected == 0 {
            return Err(ServiceError::InvalidTransition(
                "Contact message was modified concurrently".into(),
            ));
        }
        history_row(
            SubmissionKind::Contact,
            id,
            SubmissionAction::StatusChanged,
            Some(current.status.to_string()),
            Some(next.to_string()),
            actor,
            trimmed(request.reason),
            now,
        )
        .insert(&txn)
        .await?;
        txn.commit().await?;

        info!(contact_id = %id, from = %current.status, to = %next, actor, "contact status changed");
        self.get_contact(id).await
    }

    #[instrument(skip(self, request))]
    pub async fn transition_sample(
        &self,
        id: Uuid,
        request: SubmissionTransitionRequest,
        actor: &str,
    ) -> Result<SampleDetails, ServiceError> {
        request.validate()?;
        let txn = self.db_pool.begin().await?;
        let current = find_sample(&txn, id).await?;
        let next = next_status(current.status, &request.status)?;
        let now = Utc::now();

        let updated = SampleEntity::update_many()
            .col_expr(sample_request::Column::Status, Expr::value(next))
            .col_expr(sample_request::Column::UpdatedAt, Expr::value(now))
            .filter(sample_request::Column::Id.eq(id))
            .filter(sample_request::Column::Status.eq(current.status))
            .exec(&txn)
            .await?;
        if updated.rows_affected == 0 {
            return Err(ServiceError::InvalidTransition(
                "Sample request was modified concurrently".into(),
            ));
        }
        history_row(
            SubmissionKind::Sample,
            id,
            SubmissionAction::StatusChanged,
            Some(current.status.to_string()),
            Some(next.to_string()),
            actor,
            trimmed(request.reason),
            now,
        )
        .insert(&txn)
        .await?;
        txn.commit().await?;

        info!(sample_id = %id, from = %current.status, to = %next, actor, "sample status changed");
        self.get_sample(id).await
    }

    /// Appends a note. Notes are never edited or removed.
    pub async fn add_note(
        &self,
        kind: SubmissionKind,
        id: Uuid,
        request: NoteRequest,
        author: &str,
    ) -> Result<NoteView, ServiceError> {
        request.validate()?;
        let db = &*self.db_pool;
        match kind {
            SubmissionKind::Contact => find_contact(db, id).await.map(|_| ())?,
            SubmissionKind::Sample => find_sample(db, id).await.map(|_| ())?,
        }
        let note = submission_note::ActiveModel {
            id: Set(Uuid::new_v4()),
            submission_kind: Set(kind),
            submission_id: Set(id),
            author: Set(author.to_string()),
            body: Set(request.body.trim().to_string()),
            created_at: Set(Utc::now()),
        }
        .insert(db)
        .await?;
        Ok(note.into())
    }

    pub async fn assign(
        &self,
        kind: SubmissionKind,
        id: Uuid,
        request: AssignRequest,
        actor: &str,
    ) -> Result<(), ServiceError> {
        request.validate()?;
        let assignee = request.assignee.trim().to_string();
        let now = Utc::now();
        let txn = self.db_pool.begin().await?;

        let previous = match kind {
            SubmissionKind::Contact => {
                let current = find_contact(&txn, id).await?;
                let mut active: contact_message::ActiveModel = current.clone().into();
                active.assigned_to = Set(Some(assignee.clone()));
                active.updated_at = Set(now);
                active.update(&txn).await?;
                current.assigned_to
            }
            SubmissionKind::Sample => {
                let current = find_sample(&txn, id).await?;
                let mut active: sample_request::ActiveModel = current.clone().into();
                active.assigned_to = Set(Some(assignee.clone()));
                active.updated_at = Set(now);
                active.update(&txn).await?;
                current.assigned_to
            }
        };

        let detail = match previous {
            Some(previous) => format!("{} (was {})", assignee, previous),
            None => assignee,
        };
        history_row(
            kind,
            id,
            SubmissionAction::Assigned,
            None,
            None,
            actor,
            Some(detail),
            now,
        )
        .insert(&txn)
        .await?;
        txn.commit().await?;
        Ok(())
    }

    /// Stores the reply sent to the customer. A contact message moves to `responded`;
    /// a sample request keeps its status.
    pub async fn record_response(
        &self,
        kind: SubmissionKind,
        id: Uuid,
        request: ResponseRequest,
        actor: &str,
    ) -> Result<(), ServiceError> {
        request.validate()?;
        let response = request.response.trim().to_string();
        let now = Utc::now();
        let txn = self.db_pool.begin().await?;

        let (from, to) = match kind {
            SubmissionKind::Contact => {
                let current = find_contact(&txn, id).await?;
                let next = ContactStatus::Responded;
                if current.status != next && !current.status.can_transition_to(next) {
                    return Err(ServiceError::InvalidTransition(format!(
                        "Cannot respond to a {} message; reopen it first",
                        current.status
                    )));
                }
                let mut active: contact_message::ActiveModel = current.clone().into();
                active.status = Set(next);
                active.response = Set(Some(response.clone()));
                active.responded_at = Set(Some(now));
                active.updated_at = Set(now);
                active.update(&txn).await?;
                (current.status.to_string(), next.to_string())
            }
            SubmissionKind::Sample => {
                let current = find_sample(&txn, id).await?;
                let mut active: sample_request::ActiveModel = current.clone().into();
                active.response = Set(Some(response.clone()));
                active.responded_at = Set(Some(now));
                active.updated_at = Set(now);
                active.update(&txn).await?;
                (current.status.to_string(), current.status.to_string())
            }
        };

        history_row(
            kind,
            id,
            SubmissionAction::Responded,
            Some(from),
            Some(to),
            actor,
            Some(response),
            now,
        )
        .insert(&txn)
        .await?;
        txn.commit().await?;
        Ok(())
    }
}

async fn find_contact<C: ConnectionTrait>(
    conn: &C,
    id: Uuid,
) -> Result<contact_message::Model, ServiceError> {
    ContactEntity::find_by_id(id)
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Contact message {} not found", id)))
}

async fn find_sample<C: ConnectionTrait>(
    conn: &C,
    id: Uuid,
) -> Result<sample_request::Model, ServiceError> {
    SampleEntity::find_by_id(id)
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Sample request {} not found", id)))
}
