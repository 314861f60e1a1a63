//! subscription-cloud: tenant subscription billing
//!
//! - Subscription state machine with per-tenant serialization
//! - Stripe checkout, portal and webhook reconciliation
//! - Plan catalog with seat limits and feature flags

pub mod api;
pub mod auth;
pub mod billing;
pub mod catalog;
pub mod config;
pub mod db;
pub mod error;
pub mod state;
pub mod stripe;
