//! Error taxonomy for provisioning runs.
//!
//! Every variant is fatal to a run. The first six mirror the stages of a
//! provisioning pipeline (trust, package resolution, fetch, extraction,
//! install scripts, identity); the rest cover configuration and plumbing.

use thiserror::Error;

pub type ArtboxResult<T> = Result<T, ArtboxError>;

#[derive(Error, Debug)]
pub enum ArtboxError {
    /// Trust anchor could not be fetched, parsed or registered.
    #[error("trust error: {0}")]
    Trust(String),

    /// Package manager could not satisfy the requested set.
    #[error("package resolution error: {0}")]
    Resolution(String),

    /// Transport failure or bad response while retrieving a resource.
    #[error("fetch error: {0}")]
    Fetch(String),

    /// Archive member missing or archive unreadable.
    #[error("extraction error: {0}")]
    Extraction(String),

    /// An external install or build routine exited unsuccessfully.
    ///
    /// `stderr` is carried verbatim from the child process.
    #[error("{program} exited with {}: {stderr}", exit_label(.code))]
    InstallScript {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    /// Runtime identity could not be created.
    #[error("identity error: {0}")]
    Identity(String),

    #[error("configuration error: {0}")]
    Config(String),

    /// Step list violates an ordering or privilege invariant.
    #[error("invalid pipeline: {0}")]
    Validation(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("run cancelled before step {0}")]
    Cancelled(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl ArtboxError {
    /// Short, stable label for logs and exit reporting.
    pub fn class(&self) -> &'static str {
        match self {
            ArtboxError::Trust(_) => "trust",
            ArtboxError::Resolution(_) => "resolution",
            ArtboxError::Fetch(_) => "fetch",
            ArtboxError::Extraction(_) => "extraction",
            ArtboxError::InstallScript { .. } => "install_script",
            ArtboxError::Identity(_) => "identity",
            ArtboxError::Config(_) => "config",
            ArtboxError::Validation(_) => "validation",
            ArtboxError::Storage(_) | ArtboxError::Io(_) => "storage",
            ArtboxError::Cancelled(_) => "cancelled",
            ArtboxError::Internal(_) | ArtboxError::Json(_) => "internal",
        }
    }
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {}", code),
        None => "no status (killed by signal)".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_script_keeps_stderr_verbatim() {
        let err = ArtboxError::InstallScript {
            program: "./install.sh".into(),
            code: Some(2),
            stderr: "pip: no matching distribution\n".into(),
        };
        assert_eq!(
            err.to_string(),
            "./install.sh exited with status 2: pip: no matching distribution\n"
        );
        assert_eq!(err.class(), "install_script");
    }

    #[test]
    fn test_signal_exit_label() {
        let err = ArtboxError::InstallScript {
            program: "make".into(),
            code: None,
            stderr: String::new(),
        };
        assert!(err.to_string().contains("killed by signal"));
    }

    #[test]
    fn test_io_errors_convert() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: ArtboxError = io.into();
        assert_eq!(err.class(), "storage");
    }
}
