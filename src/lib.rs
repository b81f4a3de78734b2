//! Traffic video vehicle counting
//!
//! Uploaded CCTV videos are stored in S3-compatible object storage and queued
//! on a Redis stream. Workers in a consumer group decode each video, detect and
//! track vehicles frame by frame, count line crossings per size category and
//! persist the totals with a traffic severity verdict in PostgreSQL.

pub mod app_state;
pub mod config;
pub mod db;
pub mod models;
pub mod routes;
pub mod services;
pub mod vision;
