pub mod stripe;
pub mod subscriptions;
pub mod webhook;
