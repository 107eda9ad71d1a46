//! Classroom roll-call: a weighted random draw over a student roster, with
//! attendance records kept in a local SQLite database.

pub mod config;
pub mod db;
pub mod error;
pub mod export;
pub mod models;
pub mod notify;
pub mod roster;
pub mod selector;
pub mod session;
