// src/lib.rs
pub mod backend;
pub mod cluster;
pub mod config;
pub mod health;
pub mod load_balancer;
pub mod metrics;
pub mod proxy;
pub mod retry;
pub mod server;
