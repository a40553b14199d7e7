//! Pot Automator — rule-driven automation for bank transaction webhooks.

pub mod accounts;
pub mod config;
pub mod error;
pub mod filters;
pub mod gateway;
pub mod ledger;
pub mod macros;
pub mod rules;
pub mod setup;
pub mod store;
pub mod transactions;
pub mod webhook;
