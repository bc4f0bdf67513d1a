use std::fs;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::constants::output::{ANNOTATION_EXTENSION, PREVIOUS_DIR, STAGING_DIR};
use crate::errors::CurationError;
use crate::validator::AnnotationRow;

/// Filesystem source of annotation streams (files or directories of `*.jsonl`).
pub struct AnnotationStream {
    inputs: Vec<PathBuf>,
}

impl AnnotationStream {
    /// Stream over the given files and directories, read in the order given.
    pub fn new<P: Into<PathBuf>>(inputs: impl IntoIterator<Item = P>) -> Self {
        Self {
            inputs: inputs.into_iter().map(Into::into).collect(),
        }
    }

    /// Resolve inputs to files. Directories are walked for annotation files,
    /// sorted by path so runs are reproducible. Any entry that cannot be
    /// read aborts discovery.
    pub fn discover(&self) -> Result<Vec<PathBuf>, CurationError> {
        let mut files = Vec::new();
        for input in &self.inputs {
            if input.is_file() {
                files.push(input.clone());
                continue;
            }
            if !input.is_dir() {
                return Err(CurationError::Configuration(format!(
                    "input path {} does not exist",
                    input.display()
                )));
            }
            let mut found = Vec::new();
            for entry in WalkDir::new(input) {
                let entry = entry.map_err(|source| CurationError::InputWalk {
                    path: source.path().unwrap_or(input.as_path()).to_path_buf(),
                    source,
                })?;
                if entry.file_type().is_file() && is_annotation_file(entry.path()) {
                    found.push(entry.into_path());
                }
            }
            found.sort();
            if found.is_empty() {
                warn!(
                    "[safety_corpus:input] no .{} files under {}",
                    ANNOTATION_EXTENSION,
                    input.display()
                );
            }
            files.extend(found);
        }
        Ok(files)
    }

    /// Read every row of every discovered file, in file then line order.
    pub fn read_rows(&self) -> Result<Vec<AnnotationRow>, CurationError> {
        let mut rows = Vec::new();
        for path in self.discover()? {
            let before = rows.len();
            rows.extend(read_jsonl(&path)?);
            debug!(
                "[safety_corpus:input] read {} rows from {}",
                rows.len() - before,
                path.display()
            );
        }
        Ok(rows)
    }
}

/// True if the path has the annotation extension (case-insensitive).
pub fn is_annotation_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case(ANNOTATION_EXTENSION))
        .unwrap_or(false)
}

/// Parse one JSONL file. Blank lines are skipped; a line that is not a JSON
/// object aborts the whole read.
pub fn read_jsonl(path: &Path) -> Result<Vec<AnnotationRow>, CurationError> {
    let reader = BufReader::new(fs::File::open(path)?);
    let mut rows = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let line_no = idx + 1;
        if line.trim().is_empty() {
            continue;
        }
        let value: Value =
            serde_json::from_str(&line).map_err(|err| CurationError::MalformedInput {
                path: path.to_path_buf(),
                line: line_no,
                reason: err.to_string(),
            })?;
        if !value.is_object() {
            return Err(CurationError::MalformedInput {
                path: path.to_path_buf(),
                line: line_no,
                reason: "expected a JSON object".to_string(),
            });
        }
        rows.push(AnnotationRow {
            source: path.to_path_buf(),
            line: line_no,
            value,
        });
    }
    Ok(rows)
}

/// Writes output files into a staging directory and moves them into the
/// output directory only on [`OutputWriter::commit`].
///
/// Dropping an uncommitted writer removes the staging directory, so an
/// aborted run never leaves a partial corpus behind.
pub struct OutputWriter {
    root: PathBuf,
    staging: PathBuf,
    written: Vec<String>,
    committed: bool,
}

impl OutputWriter {
    /// Create `root` if needed and a fresh staging directory inside it.
    pub fn create(root: impl Into<PathBuf>) -> Result<Self, CurationError> {
        let root = root.into();
        let staging = root.join(STAGING_DIR);
        fs::create_dir_all(&root)?;
        if staging.exists() {
            fs::remove_dir_all(&staging)?;
        }
        fs::create_dir_all(&staging)?;
        Ok(Self {
            root,
            staging,
            written: Vec::new(),
            committed: false,
        })
    }

    /// Stage one JSON document per row.
    pub fn write_jsonl<'a, T: Serialize + 'a>(
        &mut self,
        name: &str,
        rows: impl IntoIterator<Item = &'a T>,
    ) -> Result<(), CurationError> {
        let mut out = BufWriter::new(fs::File::create(self.staging.join(name))?);
        for row in rows {
            serde_json::to_writer(&mut out, row)?;
            out.write_all(b"\n")?;
        }
        out.flush()?;
        self.written.push(name.to_string());
        Ok(())
    }

    /// Stage a pretty-printed JSON document.
    pub fn write_json<T: Serialize>(&mut self, name: &str, value: &T) -> Result<(), CurationError> {
        let mut out = BufWriter::new(fs::File::create(self.staging.join(name))?);
        serde_json::to_writer_pretty(&mut out, value)?;
        out.write_all(b"\n")?;
        out.flush()?;
        self.written.push(name.to_string());
        Ok(())
    }

    /// Stage a plain-text file.
    pub fn write_text(&mut self, name: &str, text: &str) -> Result<(), CurationError> {
        fs::write(self.staging.join(name), text)?;
        self.written.push(name.to_string());
        Ok(())
    }

    /// Move every staged file into place; returns the final paths.
    ///
    /// Outputs being replaced are parked under the staging directory first.
    /// If any move fails, files already moved go back to staging and the
    /// parked outputs are restored, so the output directory holds either the
    /// complete new set or what it held before.
    pub fn commit(mut self) -> Result<Vec<PathBuf>, CurationError> {
        let previous = self.staging.join(PREVIOUS_DIR);
        fs::create_dir_all(&previous)?;
        let mut placed: Vec<&str> = Vec::with_capacity(self.written.len());
        for name in &self.written {
            if let Err(err) = self.swap_in(name, &previous) {
                warn!(
                    "[safety_corpus:output] moving {} into {} failed, rolling back: {}",
                    name,
                    self.root.display(),
                    err
                );
                self.restore(name, &previous, false);
                for moved in placed.iter().rev() {
                    self.restore(moved, &previous, true);
                }
                return Err(err.into());
            }
            placed.push(name);
        }
        let paths = self.written.iter().map(|name| self.root.join(name)).collect();
        fs::remove_dir_all(&self.staging)?;
        self.committed = true;
        Ok(paths)
    }

    fn swap_in(&self, name: &str, previous: &Path) -> io::Result<()> {
        let target = self.root.join(name);
        if target.exists() {
            fs::rename(&target, previous.join(name))?;
        }
        fs::rename(self.staging.join(name), &target)
    }

    /// Best-effort undo of [`Self::swap_in`] for one file.
    fn restore(&self, name: &str, previous: &Path, placed: bool) {
        let target = self.root.join(name);
        if placed {
            let _ = fs::rename(&target, self.staging.join(name));
        }
        let parked = previous.join(name);
        if parked.exists() {
            let _ = fs::rename(&parked, &target);
        }
    }
}

impl Drop for OutputWriter {
    fn drop(&mut self) {
        if !self.committed && self.staging.exists() {
            let _ = fs::remove_dir_all(&self.staging);
        }
    }
}
