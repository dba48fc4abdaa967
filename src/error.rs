use miette::Diagnostic;
use std::path::PathBuf;
use thiserror::Error;

/**
 * Crate-wide error type
 *
 * Every archive, volume and facade operation reports failures through this enum.
 * Handlers and the splitter let errors bubble up unchanged; the facade only adds
 * the audit record.
 */
#[derive(Error, Debug, Diagnostic)]
pub enum AppError {
    #[error("IO error: {0}")]
    #[diagnostic(code(archiver::io_error))]
    Io(#[from] std::io::Error),

    #[error("Archive format '{extension}' is not supported. Supported formats: .zip, .tar, .tar.gz")]
    #[diagnostic(
        code(archiver::unsupported_format),
        help("Rename the file with one of the supported extensions")
    )]
    UnsupportedFormat { extension: String },

    #[error("Archive not found: {}", .0.display())]
    #[diagnostic(code(archiver::archive_not_found))]
    ArchiveNotFound(PathBuf),

    #[error("Invalid argument: {0}")]
    #[diagnostic(code(archiver::invalid_argument))]
    InvalidArgument(String),

    #[error("Corrupt or unreadable archive: {message}")]
    #[diagnostic(
        code(archiver::corrupt_archive),
        help("Ensure the archive file is not corrupted and matches its extension")
    )]
    CorruptOrUnreadable {
        message: String,
        path: Option<PathBuf>,
    },

    #[error("Operation cancelled")]
    #[diagnostic(code(archiver::cancelled))]
    Cancelled,

    #[error("Metadata collaborator failed during {operation}: {message}")]
    #[diagnostic(
        code(archiver::collaborator_failure),
        help("The archive itself was updated; recorded metadata may be stale")
    )]
    Collaborator { operation: String, message: String },
}

impl AppError {
    /**
     * Creates a format-level read/write failure
     */
    pub fn corrupt(message: impl Into<String>, path: Option<PathBuf>) -> Self {
        AppError::CorruptOrUnreadable {
            message: message.into(),
            path,
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        AppError::InvalidArgument(message.into())
    }

    pub fn unsupported_format(extension: impl Into<String>) -> Self {
        AppError::UnsupportedFormat {
            extension: extension.into(),
        }
    }

    pub fn collaborator(operation: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::Collaborator {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, AppError::Cancelled)
    }

    /**
     * Attaches the archive path to a format error that was raised without one
     */
    pub fn with_path(self, archive: &std::path::Path) -> Self {
        match self {
            AppError::CorruptOrUnreadable {
                message,
                path: None,
            } => AppError::CorruptOrUnreadable {
                message,
                path: Some(archive.to_path_buf()),
            },
            other => other,
        }
    }
}

impl From<zip::result::ZipError> for AppError {
    fn from(err: zip::result::ZipError) -> Self {
        match err {
            zip::result::ZipError::Io(e) => AppError::Io(e),
            other => AppError::corrupt(other.to_string(), None),
        }
    }
}

impl From<tokio::task::JoinError> for AppError {
    fn from(err: tokio::task::JoinError) -> Self {
        AppError::Io(std::io::Error::new(std::io::ErrorKind::Other, err))
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
