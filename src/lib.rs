//! Site defect analyzer library.
//!
//! Validates construction-site photos against the selected AI model's limits, places them
//! where a warehouse stage can see them, and runs the hosted completion that assesses
//! structural defects.

pub mod api;
pub mod config;
pub mod error;
pub mod middleware;
pub mod models;
pub mod services;
