use crate::{
    db::DbPool,
    entities::product::{self, Entity as ProductEntity, ProductCategory},
    errors::ServiceError,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::{Validate, ValidationError};

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProductView {
    pub id: Uuid,
    pub sku: String,
    pub name_en: String,
    pub name_fr: String,
    pub description_en: Option<String>,
    pub description_fr: Option<String>,
    pub category: ProductCategory,
    pub price: Decimal,
    pub stock: i32,
    pub in_stock: bool,
    pub created_at: DateTime<Utc>,
}

impl From<product::Model> for ProductView {
    fn from(p: product::Model) -> Self {
        Self {
            id: p.id,
            sku: p.sku,
            name_en: p.name_en,
            name_fr: p.name_fr,
            description_en: p.description_en,
            description_fr: p.description_fr,
            category: p.category,
            price: p.price,
            stock: p.stock,
            in_stock: p.in_stock,
            created_at: p.created_at,
        }
    }
}

/// Product definition accepted by the seeding path.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct NewProduct {
    #[validate(length(min = 1, max = 64))]
    pub sku: String,
    #[validate(length(min = 1, max = 255))]
    pub name_en: String,
    #[validate(length(min = 1, max = 255))]
    pub name_fr: String,
    pub description_en: Option<String>,
    pub description_fr: Option<String>,
    pub category: ProductCategory,
    #[validate(custom = "validate_price")]
    pub price: Decimal,
    #[validate(range(min = 0))]
    pub stock: i32,
}

fn validate_price(price: &Decimal) -> Result<(), ValidationError> {
    if price.is_sign_negative() || price.is_zero() {
        return Err(ValidationError::new("price_must_be_positive"));
    }
    Ok(())
}

#[derive(Clone)]
pub struct CatalogService {
    db_pool: Arc<DbPool>,
}

impl CatalogService {
    pub fn new(db_pool: Arc<DbPool>) -> Self {
        Self { db_pool }
    }

    #[instrument(skip(self))]
    pub async fn list_products(
        &self,
        category: Option<ProductCategory>,
    ) -> Result<Vec<ProductView>, ServiceError> {
        let mut query = ProductEntity::find().order_by_asc(product::Column::NameFr);
        if let Some(category) = category {
            query = query.filter(product::Column::Category.eq(category));
        }
        let products = query.all(&*self.db_pool).await?;
        Ok(products.into_iter().map(Into::into).collect())
    }

    #[instrument(skip(self))]
    pub async fn get_product(&self, id: Uuid) -> Result<ProductView, ServiceError> {
        ProductEntity::find_by_id(id)
            .one(&*self.db_pool)
            .await?
            .map(Into::into)
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", id)))
    }

    #[instrument(skip(self, input), fields(sku = %input.sku))]
    pub async fn create_product(&self, input: NewProduct) -> Result<ProductView, ServiceError> {
        input.validate()?;

        let now = Utc::now();
        let model = product::ActiveModel {
            id: Set(Uuid::new_v4()),
            sku: Set(input.sku),
            name_en: Set(input.name_en),
            name_fr: Set(input.name_fr),
            description_en: Set(input.description_en),
            description_fr: Set(input.description_fr),
            category: Set(input.category),
            price: Set(input.price),
            stock: Set(input.stock),
            in_stock: Set(input.stock > 0),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db_pool)
        .await
        .map_err(|e| {
            if crate::db::is_unique_violation(&e) {
                ServiceError::ValidationError("A product with this SKU already exists".into())
            } else {
                ServiceError::DatabaseError(e)
            }
        })?;

        info!(product_id = %model.id, "product created");
        Ok(model.into())
    }
}
