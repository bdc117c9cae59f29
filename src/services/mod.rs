// Storefront
pub mod catalog;
pub mod payment_methods;

// Orders and payment
pub mod checkout;
pub mod orders;
pub mod paypal;

// Contact and sample intake
pub mod intake;
pub mod spam;
