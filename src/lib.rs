pub mod certificates;
pub mod client;
pub mod config;
pub mod errors;
pub mod message;
pub mod protection;
pub mod queue;
pub mod registry;
pub mod telemetry;
