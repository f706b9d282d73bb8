#![forbid(unsafe_code)]

pub mod analyze;
pub mod cli;
pub mod commands;
pub mod debounce;
pub mod error;
pub mod formats;
pub mod html;
pub mod logging;
pub mod pipeline;
pub mod prompt;
pub mod provider;
pub mod publish;
pub mod runner;
pub mod settings;
pub mod sitemap;
pub mod state;
pub mod wordpress;
