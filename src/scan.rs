use std::path::Path;

use crate::batch::ClipJob;
use crate::error::{Result, TrimError};

const VIDEO_EXTENSIONS: &[&str] = &["mp4", "avi", "mov"];

fn is_video(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| VIDEO_EXTENSIONS.iter().any(|v| v.eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}

/// Lists the clips in `input_dir`, sorted by file name, each paired with
/// `output_dir/<prefix><file name>`. Hidden files are ignored.
pub fn discover_clips(input_dir: &Path, output_dir: &Path, prefix: &str) -> Result<Vec<ClipJob>> {
    let in_place = same_dir(input_dir, output_dir);
    if prefix.is_empty() && in_place {
        return Err(TrimError::Config(format!(
            "output directory {} is the input directory; set an output prefix",
            output_dir.display()
        )));
    }

    let mut jobs = Vec::new();
    for entry in std::fs::read_dir(input_dir)? {
        let path = entry?.path();
        if !path.is_file() || !is_video(&path) {
            continue;
        }
        let name = match path.file_name() {
            Some(name) => name.to_string_lossy().into_owned(),
            None => continue,
        };
        // Hidden files include partial outputs of an interrupted run.
        if name.starts_with('.') || (in_place && name.starts_with(prefix)) {
            continue;
        }
        jobs.push(ClipJob {
            output: output_dir.join(format!("{}{}", prefix, name)),
            input: path,
        });
    }
    jobs.sort_by(|a, b| a.input.file_name().cmp(&b.input.file_name()));
    Ok(jobs)
}

fn same_dir(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}
