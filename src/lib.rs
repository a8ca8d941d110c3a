pub mod chain;
pub mod clock;
pub mod config;
pub mod debank;
pub mod duration;
pub mod error;
pub mod format;
pub mod models;
pub mod nav;
pub mod pipeline;
pub mod pricing;
pub mod retry;
pub mod storage;
