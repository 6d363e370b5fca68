pub mod analyzer;
pub mod backup;
pub mod classes;
pub mod core;
pub mod projection;
pub mod sandbox;
pub mod settings;
