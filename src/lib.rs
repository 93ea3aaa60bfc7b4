pub mod config;
pub mod errors;
pub mod gallery;
pub mod hash;
pub mod photo;
pub mod repository;
pub mod storage;
pub mod tui;
pub mod watcher;
