pub mod ask;
pub mod chat;
pub mod config_cmd;
pub mod render;
pub mod runtime;
pub mod tools;
