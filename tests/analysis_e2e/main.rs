//! Analysis E2E test suite.
//!
//! Drives the HTTP API end-to-end against a mock warehouse that speaks the session
//! REST protocol, backed by a mock S3 endpoint. Internal stage uploads and blob
//! placement both land in that endpoint.
//!
//! Run with: cargo test --test analysis_e2e

mod mock_warehouse;
mod test_helpers;

mod test_session_protocol;
mod test_staged_images;
