pub mod aggregate;
pub mod cache;
pub mod classify;
pub mod cli;
pub mod config;
pub mod db;
pub mod decoder;
pub mod error;
pub mod ingest;
pub mod model;
pub mod report;
pub mod target;
pub mod term;
pub mod tree;
