pub mod config;
pub mod features;
pub mod overlap;
pub mod pipeline;
pub mod table;

#[path = "../verify/mod.rs"]
pub mod verify;

#[path = "../classify/mod.rs"]
pub mod classify;

#[path = "../merge/mod.rs"]
pub mod merge;
