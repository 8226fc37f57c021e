// ABOUTME: Library half of the noko binary: startup wiring, transports, HTTP surface and built-in plugins
// ABOUTME: The engine itself lives in noko-core

pub mod app;
pub mod console;
pub mod logging;
pub mod plugins;
pub mod server;
