//! Persisting finished reports as Markdown files.

use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Local};
use tracing::{info, warn};

use crate::ReportError;

const SLUG_MAX_CHARS: usize = 50;
const MAX_NAME_ATTEMPTS: usize = 100;

/// A finished report ready to be written once.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportArtifact {
    pub topic: String,
    pub body: String,
    pub created_at: DateTime<Local>,
}

impl ReportArtifact {
    /// Artifact whose body is exactly `body`.
    pub fn new(topic: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            body: body.into(),
            created_at: Local::now(),
        }
    }

    /// Artifact with a front-matter header (topic, generation time, elapsed
    /// seconds) followed by the untouched synthesis text.
    pub fn framed(topic: impl Into<String>, synthesis: &str, elapsed: Duration) -> Self {
        let topic = topic.into();
        let created_at = Local::now();
        let body = format!(
            "---\ntopic: \"{}\"\ngenerated_at: {}\nelapsed_seconds: {:.1}\n---\n\n{}",
            topic.replace('\\', "\\\\").replace('"', "\\\""),
            created_at.format("%Y-%m-%d %H:%M:%S"),
            elapsed.as_secs_f64(),
            synthesis
        );
        Self {
            topic,
            body,
            created_at,
        }
    }

    /// File name stem without collision suffix or extension.
    pub fn file_stem(&self) -> String {
        format!(
            "research_report_{}_{}",
            slugify(&self.topic),
            self.created_at.format("%Y%m%d_%H%M%S")
        )
    }
}

/// Reduce a topic to a file-name-safe slug.
///
/// Alphanumeric characters (any script) are kept, runs of spaces, `-` and `_`
/// become one `-`, everything else is dropped. ASCII letters are lowercased.
pub fn slugify(topic: &str) -> String {
    let mut slug = String::new();
    let mut pending_separator = false;
    for ch in topic.chars() {
        if ch.is_alphanumeric() {
            if pending_separator && !slug.is_empty() {
                slug.push('-');
            }
            pending_separator = false;
            slug.push(ch.to_ascii_lowercase());
        } else if ch.is_whitespace() || ch == '-' || ch == '_' {
            pending_separator = true;
        }
    }

    let slug: String = slug.chars().take(SLUG_MAX_CHARS).collect();
    let slug = slug.trim_end_matches('-');
    if slug.is_empty() {
        "untitled".to_string()
    } else {
        slug.to_string()
    }
}

/// Writes report artifacts into a flat directory.
#[derive(Debug, Clone)]
pub struct ReportWriter {
    dir: PathBuf,
}

impl ReportWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `artifact` to a new file and return its path.
    ///
    /// Existing files are never overwritten; a `-2`, `-3`, ... suffix is
    /// appended until a free name is found.
    pub fn write(&self, artifact: &ReportArtifact) -> Result<PathBuf, ReportError> {
        fs::create_dir_all(&self.dir).map_err(|err| ReportError::create_dir(self.dir.clone(), err))?;

        let stem = artifact.file_stem();
        for attempt in 1..=MAX_NAME_ATTEMPTS {
            let name = if attempt == 1 {
                format!("{stem}.md")
            } else {
                format!("{stem}-{attempt}.md")
            };
            let path = self.dir.join(name);

            let written = write_new_file(&path, |file| {
                file.write_all(artifact.body.as_bytes())?;
                file.flush()
            })?;
            if !written {
                continue;
            }

            info!(path = %path.display(), bytes = artifact.body.len(), "report written");
            return Ok(path);
        }

        Err(ReportError::Exhausted {
            stem,
            attempts: MAX_NAME_ATTEMPTS,
        })
    }
}

/// Create `path` exclusively and fill it with `fill`.
///
/// Returns `Ok(false)` when the name is taken. A failed fill removes the
/// file again so no partial report is left behind.
fn write_new_file<F>(path: &Path, fill: F) -> Result<bool, ReportError>
where
    F: FnOnce(&mut File) -> io::Result<()>,
{
    let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == ErrorKind::AlreadyExists => return Ok(false),
        Err(err) => return Err(ReportError::write(path.to_path_buf(), err)),
    };

    if let Err(err) = fill(&mut file) {
        drop(file);
        if let Err(cleanup) = fs::remove_file(path) {
            warn!(path = %path.display(), error = %cleanup, "failed to remove partial report");
        }
        return Err(ReportError::write(path.to_path_buf(), err));
    }
    Ok(true)
}
