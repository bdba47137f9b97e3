use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

pub const COURSE_SEPARATOR: &str = "\n\nCourse-specific instructions:\n";

#[derive(Debug, Error)]
pub enum ContentError {
    #[error("prompt file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("could not read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Single instruction document used by the scoring game.
pub fn load_prompt_file(path: &Path) -> Result<String, ContentError> {
    read_required(path)
}

/// Base instructions plus the per-course document, joined with a fixed separator.
pub fn load_course_prompt(courses_dir: &Path, course: &str) -> Result<String, ContentError> {
    let base_path = courses_dir.join("base_system_prompt.txt");
    let course_path = courses_dir.join(course).join("system_prompt.txt");

    let base = read_required(&base_path)?;
    let course = read_required(&course_path)?;

    Ok(format!("{}{}{}", base.trim(), COURSE_SEPARATOR, course.trim()))
}

fn read_required(path: &Path) -> Result<String, ContentError> {
    if !path.exists() {
        return Err(ContentError::NotFound(path.to_path_buf()));
    }
    fs::read_to_string(path).map_err(|source| ContentError::Read {
        path: path.to_path_buf(),
        source,
    })
}
