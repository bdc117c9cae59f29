pub mod contact_message;
pub mod order;
pub mod order_item;
pub mod order_status_history;
pub mod payment_method;
pub mod paypal_checkout;
pub mod product;
pub mod sample_request;
pub mod submission_history;
pub mod submission_note;
