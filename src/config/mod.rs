pub mod env;
pub mod keys;
pub mod settings;
