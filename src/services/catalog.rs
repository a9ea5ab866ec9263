use crate::db::DbPool;
use crate::entities::product;
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::sea_query::{Expr, Func, LikeExpr};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CreateProductInput {
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    #[validate(length(min = 1, max = 100))]
    pub team: String,
    #[validate(length(min = 1, max = 20))]
    pub season: String,
    /// home | away | third | special | retro
    #[serde(rename = "type")]
    #[validate(length(min = 1, max = 20))]
    pub kind: String,
    pub price_sale: Decimal,
    pub image_url: Option<String>,
    #[serde(default)]
    pub stock_br: i32,
}

#[derive(Clone)]
pub struct ProductCatalogService {
    db: Arc<DbPool>,
    event_sender: EventSender,
}

impl ProductCatalogService {
    pub fn new(db: Arc<DbPool>, event_sender: EventSender) -> Self {
        Self { db, event_sender }
    }

    /// Resolves a free-text jersey name to a catalog product.
    ///
    /// Case-insensitive substring match over active products. Returns the
    /// product only when exactly one matches; zero or several matches yield
    /// `None`, never an error, so an unresolvable name does not block a
    /// checkout in flight.
    #[instrument(skip(self))]
    pub async fn resolve_by_name(&self, hint: &str) -> Result<Option<product::Model>, ServiceError> {
        let needle = hint.trim().to_lowercase();
        if needle.is_empty() {
            return Ok(None);
        }

        let pattern = format!("%{}%", escape_like(&needle));
        // Two rows are enough to tell "exactly one" from "ambiguous".
        let matches = product::Entity::find()
            .filter(product::Column::IsActive.eq(true))
            .filter(
                Expr::expr(Func::lower(Expr::col((
                    product::Entity,
                    product::Column::Name,
                ))))
                .like(LikeExpr::new(pattern).escape('\\')),
            )
            .limit(2)
            .all(&*self.db)
            .await?;

        match matches.len() {
            1 => Ok(matches.into_iter().next()),
            n => {
                debug!(hint, matches = n, "Product name did not resolve uniquely");
                Ok(None)
            }
        }
    }

    pub async fn get_product(&self, id: Uuid) -> Result<product::Model, ServiceError> {
        product::Entity::find_by_id(id)
            .filter(product::Column::IsActive.eq(true))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", id)))
    }

    pub async fn list_products(
        &self,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<product::Model>, u64), ServiceError> {
        let paginator = product::Entity::find()
            .filter(product::Column::IsActive.eq(true))
            .order_by_asc(product::Column::Name)
            .paginate(&*self.db, per_page.clamp(1, 100));
        let total = paginator.num_items().await?;
        let products = paginator.fetch_page(page.saturating_sub(1)).await?;
        Ok((products, total))
    }

    #[instrument(skip(self, input), fields(name = %input.name))]
    pub async fn create_product(
        &self,
        input: CreateProductInput,
    ) -> Result<product::Model, ServiceError> {
        input.validate()?;
        if input.price_sale <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "price_sale must be positive".to_string(),
            ));
        }

        let id = Uuid::new_v4();
        let saved = product::ActiveModel {
            id: Set(id),
            name: Set(input.name),
            team: Set(input.team),
            season: Set(input.season),
            kind: Set(input.kind),
            price_sale: Set(input.price_sale),
            image_url: Set(input.image_url),
            stock_br: Set(input.stock_br),
            is_active: Set(true),
            created_at: Set(Utc::now()),
            updated_at: Set(None),
        }
        .insert(&*self.db)
        .await?;

        info!(product_id = %id, "Product created");
        self.event_sender
            .send(Event::ProductCreated { product_id: id })
            .await;
        Ok(saved)
    }
}

/// Escapes LIKE metacharacters so a hint containing `%` or `_` matches
/// literally.
fn escape_like(input: &str) -> String {
    input.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}
