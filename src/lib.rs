pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod model;
pub mod payout;
pub mod repo;
pub mod rng;
pub mod runner;
pub mod scenario;
pub mod scheduler;
pub mod storage;
