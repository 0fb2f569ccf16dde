// src/lib.rs
pub mod board;
pub mod config;
pub mod discord;
pub mod models;
pub mod poll;
pub mod query;
pub mod scheduler;
pub mod storage;
pub mod utils;
