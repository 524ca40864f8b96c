use std::fmt::{Display, Formatter};

/// Transport-layer error. Store surfaces report `String` errors; this type
/// carries the structured cause until it is flattened at that boundary.
#[derive(Debug)]
pub enum AppError {
    Http(reqwest::Error),
    /// Non-2xx response from the completion endpoint, with whatever body it
    /// sent along.
    Status { code: u16, message: String },
    Other(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            AppError::Http(e) => write!(f, "{}", e),
            AppError::Status { code, message } => {
                if message.is_empty() {
                    write!(f, "completion endpoint returned status {}", code)
                } else {
                    write!(f, "{} (status {})", message, code)
                }
            }
            AppError::Other(s) => write!(f, "{}", s),
        }
    }
}

impl std::error::Error for AppError {}

impl From<reqwest::Error> for AppError {
    fn from(value: reqwest::Error) -> Self {
        AppError::Http(value)
    }
}
