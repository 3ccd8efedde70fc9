pub mod models;
pub mod permissions;
pub mod registry;
pub mod settings;
