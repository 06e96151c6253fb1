pub mod auction;
pub mod database;
pub mod error;
pub mod escrow;
pub mod gateway;
pub mod handlers;
pub mod query;
pub mod scheduler;
