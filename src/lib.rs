pub mod browse;
pub mod config;
pub mod db;
pub mod error;
pub mod export;
pub mod links;
pub mod sql;
