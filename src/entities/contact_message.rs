use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::submission_history::SubmissionStatus;

#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    ToSchema,
    strum::Display,
    strum::EnumString,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ContactStatus {
    #[sea_orm(string_value = "new")]
    New,
    #[sea_orm(string_value = "in_progress")]
    InProgress,
    #[sea_orm(string_value = "responded")]
    Responded,
    #[sea_orm(string_value = "closed")]
    Closed,
}

impl SubmissionStatus for ContactStatus {
    fn can_transition_to(self, next: Self) -> bool {
        use ContactStatus::*;
        matches!(
            (self, next),
            (New, InProgress)
                | (New, Responded)
                | (New, Closed)
                | (InProgress, Responded)
                | (InProgress, Closed)
                | (Responded, InProgress)
                | (Responded, Closed)
                | (Closed, InProgress)
        )
    }
}

/// The `contact_messages` table.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "contact_messages")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub subject: Option<String>,
    #[sea_orm(column_type = "Text")]
    pub message: String,
    pub ip_address: Option<String>,
    pub content_hash: String,
    pub is_duplicate: bool,
    pub duplicate_of: Option<Uuid>,
    pub spam_score: i32,
    /// JSON array of the reasons behind `spam_score`.
    #[sea_orm(column_type = "Text")]
    pub spam_reasons: String,
    pub status: ContactStatus,
    pub assigned_to: Option<String>,
    pub response: Option<String>,
    pub responded_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn spam_reason_list(&self) -> Vec<String> {
        serde_json::from_str(&self.spam_reasons).unwrap_or_default()
    }
}
