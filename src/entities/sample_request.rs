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
pub enum SampleStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "approved")]
    Approved,
    #[sea_orm(string_value = "shipped")]
    Shipped,
    #[sea_orm(string_value = "rejected")]
    Rejected,
    #[sea_orm(string_value = "closed")]
    Closed,
}

impl SubmissionStatus for SampleStatus {
    fn can_transition_to(self, next: Self) -> bool {
        use SampleStatus::*;
        matches!(
            (self, next),
            (Pending, Approved)
                | (Pending, Rejected)
                | (Pending, Closed)
                | (Approved, Shipped)
                | (Approved, Rejected)
                | (Approved, Closed)
                | (Shipped, Closed)
                | (Rejected, Pending)
                | (Rejected, Closed)
                | (Closed, Pending)
        )
    }
}

/// The `sample_requests` table.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "sample_requests")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub address_line: String,
    pub city: String,
    pub country: String,
    /// JSON array of product ids.
    #[sea_orm(column_type = "Text")]
    pub requested_products: String,
    pub message: Option<String>,
    pub ip_address: Option<String>,
    pub content_hash: String,
    pub is_duplicate: bool,
    pub duplicate_of: Option<Uuid>,
    pub status: SampleStatus,
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
    pub fn requested_product_ids(&self) -> Vec<Uuid> {
        serde_json::from_str(&self.requested_products).unwrap_or_default()
    }
}
