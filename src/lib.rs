pub mod broadcast;
pub mod config;
pub mod engine;
pub mod game;
pub mod lifecycle;
pub mod market_data;
pub mod persist;
pub mod telemetry;
