pub mod config;
pub mod library;
pub mod models;
pub mod platform;
pub mod player;
pub mod protocol;
pub mod queue;
pub mod youtube;
