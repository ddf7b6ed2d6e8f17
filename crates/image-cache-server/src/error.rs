//! Error types for the image cache server

use std::fmt;

#[derive(Debug)]
pub enum ServerError {
    Retrieval(image_retrieval::ImageError),
    Io(Box<std::io::Error>),
    Config(String),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerError::Retrieval(err) => write!(f, "Retrieval error: {}", err),
            ServerError::Io(err) => write!(f, "IO error: {}", err),
            ServerError::Config(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for ServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ServerError::Retrieval(err) => Some(err),
            ServerError::Io(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<image_retrieval::ImageError> for ServerError {
    fn from(err: image_retrieval::ImageError) -> Self {
        ServerError::Retrieval(err)
    }
}

impl From<image_disk_cache::DiskCacheError> for ServerError {
    fn from(err: image_disk_cache::DiskCacheError) -> Self {
        ServerError::Config(err.to_string())
    }
}

impl From<std::io::Error> for ServerError {
    fn from(err: std::io::Error) -> Self {
        ServerError::Io(Box::new(err))
    }
}

impl From<tracing_subscriber::filter::ParseError> for ServerError {
    fn from(err: tracing_subscriber::filter::ParseError) -> Self {
        ServerError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ServerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let err = ServerError::Config("bad CACHE_NAME".to_string());
        assert_eq!(format!("{}", err), "Configuration error: bad CACHE_NAME");
    }

    #[test]
    fn test_retrieval_error_display() {
        let err = ServerError::from(image_retrieval::ImageError::NotModified);
        assert_eq!(format!("{}", err), "Retrieval error: Not modified");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_invalid_cache_name_is_config_error() {
        let err = ServerError::from(image_disk_cache::DiskCacheError::InvalidName(
            "empty".to_string(),
        ));
        assert!(matches!(err, ServerError::Config(_)));
    }
}
