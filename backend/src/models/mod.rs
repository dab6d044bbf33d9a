pub mod payment_transaction;
pub mod subscription;
pub mod user;
