//! Error types for the disk cache

use std::fmt;

#[derive(Debug)]
pub enum DiskCacheError {
    Io(Box<std::io::Error>),
    InvalidName(String),
    QueueClosed,
}

impl fmt::Display for DiskCacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiskCacheError::Io(err) => write!(f, "IO error: {}", err),
            DiskCacheError::InvalidName(msg) => write!(f, "Invalid cache name: {}", msg),
            DiskCacheError::QueueClosed => write!(f, "Disk I/O queue closed"),
        }
    }
}

impl std::error::Error for DiskCacheError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DiskCacheError::Io(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<std::io::Error> for DiskCacheError {
    fn from(err: std::io::Error) -> Self {
        DiskCacheError::Io(Box::new(err))
    }
}

pub type Result<T> = std::result::Result<T, DiskCacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_display() {
        let err = DiskCacheError::from(std::io::Error::new(
            std::io::ErrorKind::Other,
            "disk full",
        ));
        assert_eq!(format!("{}", err), "IO error: disk full");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_invalid_name_display() {
        let err = DiskCacheError::InvalidName("name must not be empty".to_string());
        assert_eq!(
            format!("{}", err),
            "Invalid cache name: name must not be empty"
        );
    }

    #[test]
    fn test_queue_closed_display() {
        let err = DiskCacheError::QueueClosed;
        assert_eq!(format!("{}", err), "Disk I/O queue closed");
        assert!(format!("{:?}", err).contains("QueueClosed"));
    }
}
