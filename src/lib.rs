pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod gateway;
pub mod middleware;
pub mod models;
pub mod refund_policy;
pub mod reminders;
pub mod routes;
pub mod services;
pub mod store;
