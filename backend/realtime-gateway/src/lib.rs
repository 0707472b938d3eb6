pub mod bridge;
pub mod config;
pub mod error;
pub mod heartbeat;
pub mod logging;
pub mod metrics;
pub mod registry;
pub mod routes;
pub mod sse;
pub mod state;
