pub mod addresses;
pub mod debug;
pub mod logger;
