//! PDF key/value extraction
//!
//! Detects the fields of a digital PDF with an LLM, extracts their values in
//! one batch call, recovers missing fields with a deterministic parser, and
//! scores the result against the source text. Jobs run in the background and
//! report progress through a per-job log.

pub mod app_state;
pub mod config;
pub mod models;
pub mod routes;
pub mod services;
