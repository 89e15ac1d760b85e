/// Separates the parts of a storage key (element id, property name, key, visibility).
pub const VALUE_SEPARATOR: char = '\u{1f}';

/// Separates the parts of an extended data row key.
pub const ROW_SEPARATOR: char = '\u{1e}';

pub const RESERVED_CHARACTERS: [char; 2] = [VALUE_SEPARATOR, ROW_SEPARATOR];

/// Key used when a property is written without an explicit key.
pub const DEFAULT_PROPERTY_KEY: &str = "";
