/// Error code registry for the formula controller
///
/// Error codes are organized by category:
/// - 1000-1999: Configuration errors
/// - 3000-3999: Store errors
/// - 4000-4999: Invocation errors
/// - 5000-5999: Scheduling errors
#[allow(dead_code)]
pub struct ErrorCode;

impl ErrorCode {
    // Configuration errors (1000-1999)
    pub const CONFIG_GENERIC: u16 = 1000;
    pub const CONFIG_NOT_FOUND: u16 = 1001;
    pub const CONFIG_INVALID_YAML: u16 = 1002;
    pub const CONFIG_INVALID_VALUE: u16 = 1005;

    // Store errors (3000-3999)
    pub const STORE_GENERIC: u16 = 3000;
    pub const STORE_NOT_FOUND: u16 = 3004;
    pub const STORE_CONFLICT: u16 = 3005;
    pub const STORE_UNAVAILABLE: u16 = 3010;
    pub const STORE_SERIALIZATION_ERROR: u16 = 3011;

    // Invocation errors (4000-4999)
    pub const INVOCATION_CANCELLED: u16 = 4006;
    pub const INVOCATION_CONFLICT_RETRIES_EXHAUSTED: u16 = 4012;

    // Scheduling errors (5000-5999)
    pub const SCHEDULE_INVALID_INTERVAL: u16 = 5002;
}

/// Get a human-readable description for an error code
pub fn describe_error_code(code: u16) -> &'static str {
    match code {
        ErrorCode::CONFIG_GENERIC => "General configuration error",
        ErrorCode::CONFIG_NOT_FOUND => "Configuration file not found",
        ErrorCode::CONFIG_INVALID_YAML => "Configuration file is not valid YAML",
        ErrorCode::CONFIG_INVALID_VALUE => "Configuration value is out of range",
        ErrorCode::STORE_GENERIC => "General store error",
        ErrorCode::STORE_NOT_FOUND => "Object not found in store",
        ErrorCode::STORE_CONFLICT => "Write conflicted with a concurrent update",
        ErrorCode::STORE_UNAVAILABLE => "Store backend unavailable",
        ErrorCode::STORE_SERIALIZATION_ERROR => "Stored object could not be (de)serialized",
        ErrorCode::INVOCATION_CANCELLED => "Invocation was cancelled",
        ErrorCode::INVOCATION_CONFLICT_RETRIES_EXHAUSTED => {
            "Status publish kept conflicting with concurrent updates"
        }
        ErrorCode::SCHEDULE_INVALID_INTERVAL => "Recalculation interval could not be parsed",
        _ => "Unknown error code",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_codes_have_descriptions() {
        for code in [
            ErrorCode::CONFIG_GENERIC,
            ErrorCode::STORE_CONFLICT,
            ErrorCode::INVOCATION_CANCELLED,
            ErrorCode::SCHEDULE_INVALID_INTERVAL,
        ] {
            assert_ne!(describe_error_code(code), "Unknown error code");
        }
        assert_eq!(describe_error_code(9999), "Unknown error code");
    }
}
