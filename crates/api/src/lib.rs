//! HTTP API for the courier delivery backend.
//!
//! Exposes enqueue endpoints for email and WhatsApp messages, message
//! history, and queue maintenance operations. Delivery itself runs in the
//! `courier-worker` binary; the scan and release-stale endpoints reuse the
//! same dispatch components for on-demand runs.

pub mod routes;
pub mod state;
