use thiserror::Error;

// Malformed or incomplete response payload.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("marker {marker:?} not found in response")]
    MarkerNotFound { marker: &'static str },
    #[error("{field} field is not terminated")]
    UnterminatedField { field: &'static str },
    #[error("{field} field is empty")]
    EmptyField { field: &'static str },
    #[error("{field} field contains unexpected byte 0x{byte:02X}")]
    InvalidCharacter { field: &'static str, byte: u8 },
    #[error("boundary {sentinel:?} not found before the byte budget ran out")]
    MissingSentinel { sentinel: &'static str },
}

pub(crate) fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

pub(crate) fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    find(haystack, needle).is_some()
}
