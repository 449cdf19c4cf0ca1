pub mod app;
pub mod clipboard;
pub mod commands;
