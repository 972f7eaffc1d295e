pub mod app;
pub mod config;
pub mod credentials;
pub mod domain;
pub mod download;
pub mod error;
pub mod file_ops;
pub mod interactive;
pub mod lms;
pub mod locate;
pub mod output;
pub mod reconcile;
pub mod roster;
pub mod table;
pub mod tui;
pub mod upload;
