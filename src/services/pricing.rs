use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Flat sales tax applied to every order.
pub const TAX_RATE: Decimal = dec!(0.07);

/// Shipping is currently free.
pub const SHIPPING_FLAT: Decimal = dec!(0.00);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PriceBreakdown {
    #[schema(value_type = f64)]
    pub subtotal: Decimal,
    #[schema(value_type = f64)]
    pub tax: Decimal,
    #[schema(value_type = f64)]
    pub shipping: Decimal,
    #[schema(value_type = f64)]
    pub total: Decimal,
}

fn to_cents(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Prices a cart subtotal. Pure: the same subtotal always yields the same
/// breakdown, so intent creation and order creation agree.
pub fn price(subtotal: Decimal) -> PriceBreakdown {
    let subtotal = to_cents(subtotal);
    let tax = to_cents(subtotal * TAX_RATE);
    let shipping = SHIPPING_FLAT;

    PriceBreakdown {
        subtotal,
        tax,
        shipping,
        total: subtotal + tax + shipping,
    }
}

/// Converts a currency amount to integer minor units (cents).
pub fn to_minor_units(amount: Decimal) -> i64 {
    use rust_decimal::prelude::ToPrimitive;
    (to_cents(amount) * dec!(100)).to_i64().unwrap_or(i64::MAX)
}
