pub mod action;
pub mod config;
pub mod invariants;
pub mod logging;
pub mod network;
pub mod participant;
pub mod pool;
pub mod runner;
pub mod scenario;
pub mod snapshot;
pub mod storage;
