pub mod config;
pub mod console;
pub mod engine;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod persist;
pub mod reaper;
pub mod slots;
pub mod snapshot;
pub mod users;
