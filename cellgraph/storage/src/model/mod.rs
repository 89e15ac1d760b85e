pub mod element;
pub mod extended_data;
pub mod fetch_hints;
pub mod metadata;
pub mod property;
pub mod record;
