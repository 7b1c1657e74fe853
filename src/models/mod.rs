pub mod account;
pub mod config;
pub mod folder;
pub mod message;
