use std::path::PathBuf;

/// Fatal installer errors; any of these aborts the run and triggers rollback
#[derive(Debug, thiserror::Error)]
pub enum InstallError {
    #[error("Source not found: {}", .0.display())]
    MissingSource(PathBuf),

    #[error(
        "Failed to parse {}: {message}\n\nPlease fix the JSON manually, or add this to your config:\n\n{suggested_patch}",
        path.display()
    )]
    ConfigParse {
        path: PathBuf,
        message: String,
        suggested_patch: String,
    },

    #[error("Unexpected shape in {}: `{key}` must be {expected}", path.display())]
    ConfigShape {
        path: PathBuf,
        key: String,
        expected: &'static str,
    },
}
