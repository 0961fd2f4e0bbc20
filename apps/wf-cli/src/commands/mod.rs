pub mod config;
pub mod goal;
pub mod store;
