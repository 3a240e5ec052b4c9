pub mod configuration;
pub mod loader;
pub mod logger;
pub mod main;
