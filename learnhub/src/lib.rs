//! LearnHub library
//!
//! This library exposes the core functionality of LearnHub for testing
//! and for the binary entry point.

pub mod access;
pub mod app;
pub mod auth;
pub mod config;
pub mod database;
pub mod error;
pub mod query;
pub mod services;
pub mod session;
pub mod storage;
