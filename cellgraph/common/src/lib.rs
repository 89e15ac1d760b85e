pub mod constants;
pub mod error;
pub mod identifier;
pub mod types;
pub mod value;
