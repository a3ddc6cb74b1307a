//! HTTP API: job submission and polling over JSON.

pub mod app;
