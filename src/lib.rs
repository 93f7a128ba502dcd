//! Keyhold - license key issuing and validation service
//!
//! This library provides key generation with product/group setting
//! inheritance, the license check pipeline, offline token signing,
//! per-client rate limiting, audit logging and the HTTP handlers that
//! expose them.

pub mod audit;
pub mod check;
pub mod config;
pub mod db;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod id;
pub mod issue;
pub mod jwt;
pub mod keygen;
pub mod middleware;
pub mod models;
pub mod pagination;
pub mod rate_limit;
pub mod settings;
pub mod util;
