//! Infrastructure layer modules
//!
//! This module contains shared infrastructure components:
//! - `auth`: JWT authentication and validation
//! - `backoff`: Exponential backoff for retried dependency calls
//! - `config`: Application configuration and settings
//! - `error`: HTTP-facing error type
//! - `metrics`: Prometheus metrics helpers
//! - `postgres`: PostgreSQL connection pool
//! - `redis`: Redis connection pool

pub mod auth;
pub mod backoff;
pub mod config;
pub mod error;
pub mod metrics;
pub mod postgres;
pub mod redis;
