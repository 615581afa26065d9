//! Small environment helpers shared by the binaries.

/// Reads a boolean flag from the environment.
///
/// `1`, `true`, `yes` and `on` (any case) count as set; anything else is
/// false. A missing variable yields `default`.
pub fn env_bool(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(value) => parse_bool(&value),
        Err(_) => default,
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
