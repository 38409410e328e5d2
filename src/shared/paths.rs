use std::path::{Path, PathBuf};

/// Directory recordings land in when the host does not pick one.
/// Returns the XDG videos directory, or `~/Videos` when it is not configured.
pub fn default_output_dir() -> PathBuf {
    if let Some(dir) = dirs::video_dir() {
        return dir;
    }

    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("Videos")
}

/// Timestamped base name (no extension) inside [`default_output_dir`].
pub fn default_output_name() -> PathBuf {
    let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    default_output_dir().join(format!("capture_{}", stamp))
}

/// Paths used by one capture session, all derived from the output base name.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionPaths {
    pub base: PathBuf,
    pub video: PathBuf,
    pub audio: PathBuf,
}

impl SessionPaths {
    pub fn new(base: &Path) -> Self {
        Self {
            base: base.to_path_buf(),
            video: with_suffix(base, "video"),
            audio: with_suffix(base, "audio"),
        }
    }

    /// Final container path for the given extension.
    pub fn container(&self, extension: &str) -> PathBuf {
        with_suffix(&self.base, extension)
    }
}

fn with_suffix(base: &Path, suffix: &str) -> PathBuf {
    let mut name = base.as_os_str().to_owned();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

/// Ensure a directory exists, creating it if necessary.
pub fn ensure_dir(path: &Path) -> std::io::Result<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }
    Ok(())
}
