pub mod commands;
pub mod config;
pub mod k8s;
pub mod manifest;
pub mod source;
pub mod telemetry;
pub mod yaml;
