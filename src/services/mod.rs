// Pure building blocks
pub mod pricing;
pub mod shipping;

// Persistence-backed services
pub mod carts;
pub mod orders;

// Payment flow
pub mod checkout;
pub mod reconciler;
