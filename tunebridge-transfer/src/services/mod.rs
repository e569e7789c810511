//! Transfer engine services

pub mod credentials;
pub mod http_client;
pub mod rate_limiter;
pub mod track_matcher;
pub mod transfer_orchestrator;
