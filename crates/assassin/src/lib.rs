pub mod app;
pub mod config;
pub mod database;
pub mod dedup_cache;
pub mod drain;
pub mod entities;
pub mod errors;
pub mod execution_lock;
pub mod job_scheduling;
pub mod models;
pub mod notifier;
pub mod services;
pub mod task_handlers;
pub mod trigger;
pub mod utils;
pub mod web;
