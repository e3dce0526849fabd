pub mod hooks;
pub mod registry;
pub mod transcript;
