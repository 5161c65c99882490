use crate::{
    auth::AuthUser,
    db::DbPool,
    entities::order::{self, payment_status, Entity as OrderEntity, OrderStatus},
    entities::order_item::{self, Entity as OrderItemEntity},
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter, QueryOrder,
    Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OrderItemResponse {
    pub product_id: Uuid,
    pub name: String,
    pub size: Option<String>,
    pub image: Option<String>,
    pub quantity: i32,
    #[schema(value_type = f64)]
    pub unit_price: Decimal,
    #[schema(value_type = f64)]
    pub line_total: Decimal,
}

impl From<order_item::Model> for OrderItemResponse {
    fn from(item: order_item::Model) -> Self {
        Self {
            product_id: item.product_id,
            name: item.name,
            size: item.size,
            image: item.image,
            quantity: item.quantity,
            unit_price: item.unit_price,
            line_total: item.line_total,
        }
    }
}

/// An order with its line items, as returned by the API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    pub id: Uuid,
    pub user_id: Uuid,
    pub payment_intent_id: String,
    pub payment_status: String,
    pub status: OrderStatus,
    #[schema(value_type = Object)]
    pub shipping_address: serde_json::Value,
    #[schema(value_type = f64)]
    pub items_subtotal: Decimal,
    #[schema(value_type = f64)]
    pub tax_amount: Decimal,
    #[schema(value_type = f64)]
    pub shipping_amount: Decimal,
    #[schema(value_type = f64)]
    pub total_amount: Decimal,
    pub currency: String,
    pub paid_at: Option<DateTime<Utc>>,
    pub refunded_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub items: Vec<OrderItemResponse>,
}

impl OrderResponse {
    pub fn from_parts(order: order::Model, items: Vec<order_item::Model>) -> Self {
        Self {
            id: order.id,
            user_id: order.user_id,
            payment_intent_id: order.payment_intent_id,
            payment_status: order.payment_status,
            status: order.status,
            shipping_address: order.shipping_address,
            items_subtotal: order.items_subtotal,
            tax_amount: order.tax_amount,
            shipping_amount: order.shipping_amount,
            total_amount: order.total_amount,
            currency: order.currency,
            paid_at: order.paid_at,
            refunded_at: order.refunded_at,
            created_at: order.created_at,
            updated_at: order.updated_at,
            items: items.into_iter().map(Into::into).collect(),
        }
    }
}

/// Loads an order's items and assembles the response shape.
pub async fn load_order_response<C>(db: &C, order: order::Model) -> Result<OrderResponse, DbErr>
where
    C: ConnectionTrait,
{
    let items = OrderItemEntity::find()
        .filter(order_item::Column::OrderId.eq(order.id))
        .order_by_asc(order_item::Column::Position)
        .all(db)
        .await?;

    Ok(OrderResponse::from_parts(order, items))
}

/// Looks up the order recorded for a payment intent.
pub async fn find_by_payment_intent<C>(
    db: &C,
    payment_intent_id: &str,
) -> Result<Option<order::Model>, DbErr>
where
    C: ConnectionTrait,
{
    OrderEntity::find()
        .filter(order::Column::PaymentIntentId.eq(payment_intent_id))
        .one(db)
        .await
}

/// Order read paths and the refund transition.
#[derive(Clone)]
pub struct OrderService {
    db_pool: Arc<DbPool>,
    event_sender: Arc<EventSender>,
}

impl OrderService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: Arc<EventSender>) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    /// The caller's orders, newest first.
    #[instrument(skip(self))]
    pub async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<OrderResponse>, ServiceError> {
        let db = &*self.db_pool;

        let orders = OrderEntity::find()
            .filter(order::Column::UserId.eq(user_id))
            .order_by_desc(order::Column::CreatedAt)
            .all(db)
            .await
            .map_err(|e| {
                error!(error = %e, user_id = %user_id, "Failed to list orders");
                ServiceError::DatabaseError(e)
            })?;

        if orders.is_empty() {
            return Ok(Vec::new());
        }

        let order_ids: Vec<Uuid> = orders.iter().map(|o| o.id).collect();
        let mut items_by_order: HashMap<Uuid, Vec<order_item::Model>> = HashMap::new();
        for item in OrderItemEntity::find()
            .filter(order_item::Column::OrderId.is_in(order_ids))
            .order_by_asc(order_item::Column::Position)
            .all(db)
            .await?
        {
            items_by_order.entry(item.order_id).or_default().push(item);
        }

        Ok(orders
            .into_iter()
            .map(|order| {
                let items = items_by_order.remove(&order.id).unwrap_or_default();
                OrderResponse::from_parts(order, items)
            })
            .collect())
    }

    /// Fetches one order for its owner or an admin.
    #[instrument(skip(self, caller), fields(user_id = %caller.user_id))]
    pub async fn get_for_caller(
        &self,
        order_id: Uuid,
        caller: &AuthUser,
    ) -> Result<OrderResponse, ServiceError> {
        let db = &*self.db_pool;

        let order = OrderEntity::find_by_id(order_id)
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {}", order_id)))?;

        if order.user_id != caller.user_id && !caller.is_admin() {
            return Err(ServiceError::Forbidden(
                "order belongs to another customer".to_string(),
            ));
        }

        Ok(load_order_response(db, order).await?)
    }

    /// Cancels the order paid by `payment_intent_id` after a provider refund.
    ///
    /// Returns `None` when no order exists for the intent. Repeat refunds
    /// leave the original `refunded_at` untouched.
    #[instrument(skip(self))]
    pub async fn mark_refunded(
        &self,
        payment_intent_id: &str,
    ) -> Result<Option<order::Model>, ServiceError> {
        let txn = self.db_pool.begin().await?;

        let Some(existing) = find_by_payment_intent(&txn, payment_intent_id).await? else {
            txn.commit().await?;
            return Ok(None);
        };

        if existing.payment_status == payment_status::REFUNDED {
            txn.commit().await?;
            return Ok(Some(existing));
        }

        let now = Utc::now();
        let mut active: order::ActiveModel = existing.into();
        active.status = Set(OrderStatus::Cancelled);
        active.payment_status = Set(payment_status::REFUNDED.to_string());
        active.refunded_at = Set(Some(now));
        let updated = active.update(&txn).await?;

        txn.commit().await?;

        info!(order_id = %updated.id, payment_intent_id, "order refunded");
        self.event_sender
            .send_or_log(Event::OrderRefunded {
                order_id: updated.id,
                payment_intent_id: payment_intent_id.to_string(),
                refunded_at: now,
            })
            .await;

        Ok(Some(updated))
    }
}
