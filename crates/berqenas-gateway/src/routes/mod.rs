//! HTTP route handlers.

pub mod databases;
pub mod health;
pub mod history;
pub mod migrations;
