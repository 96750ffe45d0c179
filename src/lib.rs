pub mod api;
pub mod audit;
pub mod cli;
pub mod directory;
pub mod engine;
pub mod error;
pub mod nodes;
pub mod notify;
pub mod reminder;
pub mod storage;
pub mod template;
