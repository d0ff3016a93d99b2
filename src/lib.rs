#![allow(clippy::result_large_err)]

#[macro_use]
extern crate rocket;

pub mod client_ip;
pub mod config;
pub mod cors;
pub mod db;
pub mod errors;
pub mod helpers;
pub mod jsend;
pub mod json;
pub mod metrics;
pub mod models;
pub mod rate_limit;
pub mod requests;
pub mod routes;
pub mod telemetry;
pub mod validator;
pub mod vcs;
pub mod webapp;

pub use errors::{ApiError, ApiResult};
pub use rate_limit::{ClientLimiter, RateLimit};
pub use webapp::WebApp;
