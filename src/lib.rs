//! # mailq
//!
//! Durable email job queue and dispatch worker for SafeSpace.
//!
//! Producers enqueue typed email jobs and return immediately; a worker pool
//! claims jobs under mutual exclusion, renders them, and sends them over an
//! injected SMTP transport, with retry/backoff and a visibility timeout for
//! crashed claimants. Delivery is at-least-once.

pub mod config;
pub mod db;
pub mod error;
pub mod mail;
pub mod model;
pub mod telemetry;
pub mod worker;
