#[cfg(test)]
#[macro_use]
mod test_macros;

pub mod clients;
pub mod config;
pub mod epg;
pub mod error;
pub mod events;
pub mod jobs;
pub mod manager;
pub mod models;
pub mod recordings;
pub mod timeline;
pub mod timers;
pub mod tracing_ext;
