//! Database-backed domain models shared by tunebridge crates

pub mod models;
