pub mod cli;
pub mod config;
pub mod provisioner;
pub mod repository;
pub mod schema;
