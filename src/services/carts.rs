use sea_orm::{
    ColumnTrait, ConnectionTrait, DbErr, EntityTrait, ModelTrait, QueryFilter, QueryOrder,
};
use uuid::Uuid;

use crate::entities::{cart, cart_item};

/// A cart together with its ordered line items.
#[derive(Debug, Clone)]
pub struct CartWithItems {
    pub cart: cart::Model,
    pub items: Vec<cart_item::Model>,
}

impl CartWithItems {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Loads the identity's cart and its items, ordered by position.
pub async fn find_cart_with_items<C>(db: &C, user_id: Uuid) -> Result<Option<CartWithItems>, DbErr>
where
    C: ConnectionTrait,
{
    let Some(cart) = cart::Entity::find()
        .filter(cart::Column::CustomerId.eq(user_id))
        .one(db)
        .await?
    else {
        return Ok(None);
    };

    let items = cart
        .find_related(cart_item::Entity)
        .order_by_asc(cart_item::Column::Position)
        .all(db)
        .await?;

    Ok(Some(CartWithItems { cart, items }))
}

/// Deletes a cart and all of its items.
pub async fn delete_cart<C>(db: &C, cart_id: Uuid) -> Result<(), DbErr>
where
    C: ConnectionTrait,
{
    cart_item::Entity::delete_many()
        .filter(cart_item::Column::CartId.eq(cart_id))
        .exec(db)
        .await?;
    cart::Entity::delete_by_id(cart_id).exec(db).await?;
    Ok(())
}
