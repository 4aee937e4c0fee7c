pub mod agent;
pub mod backend;
pub mod commands;
pub mod config;
pub mod engine;
pub mod error;
pub mod forum_heartbeat;
pub mod http_client;
pub mod journal;
pub mod mode;
pub mod runtime;
pub mod schedule;
pub mod server;
pub mod shell;
pub mod skills;
pub mod tasks;
pub mod telegram;
