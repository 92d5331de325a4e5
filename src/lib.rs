pub mod batch;
pub mod config;
pub mod error;
pub mod format;
pub mod inspect;
pub mod logging;
pub mod models;
pub mod planner;
pub mod preview;
pub mod process;
pub mod scanner;
pub mod tools;
pub mod trim;
pub mod tui;
pub mod verify;
