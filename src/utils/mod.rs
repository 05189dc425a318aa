pub mod helper;
pub mod types;
