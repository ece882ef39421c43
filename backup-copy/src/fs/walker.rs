//! Source tree traversal and age-filtered file selection.
//!
//! Every call to [`FileSelector::files`] walks the tree afresh; nothing is
//! cached between jobs or runs. Symlinked and mounted sub-trees are followed.
//! Entries that fail mid-scan are logged and skipped so one unreadable file
//! cannot fail the whole job.

use chrono::{DateTime, Duration, Local};
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use walkdir::{DirEntry, WalkDir};

/// Options for directory walking
#[derive(Debug, Clone)]
pub struct WalkOptions {
    /// Follow symbolic links
    pub follow_links: bool,

    /// Only files modified within this many days qualify (0 = unbounded)
    pub max_age_days: u32,

    /// Exclude patterns (file-name substrings)
    pub exclude_patterns: Vec<String>,
}

impl Default for WalkOptions {
    fn default() -> Self {
        Self {
            follow_links: true,
            max_age_days: 0,
            exclude_patterns: Vec::new(),
        }
    }
}

/// A regular file discovered during walking
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    /// Full path to the file
    pub path: PathBuf,

    /// Relative path from the root
    pub relative_path: PathBuf,

    /// File size in bytes
    pub size: u64,

    /// Last modification time
    pub modified: DateTime<Local>,
}

impl FileInfo {
    /// Build from a DirEntry. Returns None for anything that is not a regular
    /// file once links are resolved.
    fn from_entry(entry: &DirEntry, root: &Path) -> io::Result<Option<Self>> {
        // With follow_links the entry metadata already describes the target.
        let metadata = entry.metadata().map_err(io::Error::from)?;
        if !metadata.is_file() {
            return Ok(None);
        }

        let path = entry.path().to_path_buf();
        let relative_path = path.strip_prefix(root).unwrap_or(&path).to_path_buf();
        let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);

        Ok(Some(Self {
            path,
            relative_path,
            size: metadata.len(),
            modified: DateTime::<Local>::from(modified),
        }))
    }
}

/// The file set chosen for one job in one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileSelection {
    /// Selected files, sorted by relative path
    pub files: Vec<FileInfo>,

    /// Sum of the selected file sizes
    pub total_bytes: u64,

    /// Newest modification time among the selected files
    pub latest_modified: Option<DateTime<Local>>,

    /// Files left out for being older than the age cutoff
    pub excluded_by_age: usize,

    /// Entries that could not be read and were left out
    pub unreadable: usize,
}

impl FileSelection {
    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Relative paths, in selection order
    pub fn relative_paths(&self) -> impl Iterator<Item = &Path> {
        self.files.iter().map(|f| f.relative_path.as_path())
    }
}

/// Selects the files of one source tree under an age cutoff.
#[derive(Debug, Clone)]
pub struct FileSelector {
    root: PathBuf,
    options: WalkOptions,
    cutoff: Option<DateTime<Local>>,
}

impl FileSelector {
    /// `now` is the run timestamp; the age cutoff is derived from it.
    pub fn new(root: impl Into<PathBuf>, options: WalkOptions, now: DateTime<Local>) -> Self {
        let cutoff = (options.max_age_days > 0)
            .then(|| now - Duration::days(i64::from(options.max_age_days)));
        Self {
            root: root.into(),
            options,
            cutoff,
        }
    }

    /// Lazily enumerate qualifying files.
    ///
    /// Errors are yielded rather than swallowed; callers decide whether an
    /// error is fatal (the root itself) or skippable (anything below it).
    pub fn files(&self) -> impl Iterator<Item = Result<FileInfo, WalkError>> + '_ {
        self.entries().filter_map(|entry| match entry {
            Walked::File(info) => Some(Ok(info)),
            Walked::TooOld => None,
            Walked::Failed(err) => Some(Err(err)),
        })
    }

    fn entries(&self) -> impl Iterator<Item = Walked> + '_ {
        WalkDir::new(&self.root)
            .follow_links(self.options.follow_links)
            .into_iter()
            .filter_entry(|entry| entry.depth() == 0 || !should_exclude(entry, &self.options.exclude_patterns))
            .filter_map(move |entry| {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(err) => {
                        let at_root = err.depth() == 0;
                        return Some(Walked::Failed(WalkError {
                            path: err.path().map(Path::to_path_buf),
                            at_root,
                            source: io::Error::from(err),
                        }));
                    }
                };

                if entry.file_type().is_dir() {
                    return None;
                }

                match FileInfo::from_entry(&entry, &self.root) {
                    Ok(Some(info)) if self.qualifies(&info) => Some(Walked::File(info)),
                    Ok(Some(_)) => Some(Walked::TooOld),
                    Ok(None) => None,
                    Err(source) => Some(Walked::Failed(WalkError {
                        path: Some(entry.path().to_path_buf()),
                        at_root: false,
                        source,
                    })),
                }
            })
    }

    /// Collect the full selection, skipping unreadable entries below the root.
    pub fn select(&self) -> io::Result<FileSelection> {
        let mut selection = FileSelection::default();

        for entry in self.entries() {
            match entry {
                Walked::File(info) => {
                    selection.total_bytes += info.size;
                    selection.latest_modified = selection.latest_modified.max(Some(info.modified));
                    selection.files.push(info);
                }
                Walked::TooOld => selection.excluded_by_age += 1,
                Walked::Failed(err) if err.at_root => return Err(err.source),
                Walked::Failed(err) => {
                    tracing::warn!(
                        root = %self.root.display(),
                        path = ?err.path,
                        error = %err.source,
                        "Skipping unreadable entry"
                    );
                    selection.unreadable += 1;
                }
            }
        }

        selection.files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        Ok(selection)
    }

    fn qualifies(&self, info: &FileInfo) -> bool {
        self.cutoff.map_or(true, |cutoff| info.modified >= cutoff)
    }
}

enum Walked {
    File(FileInfo),
    TooOld,
    Failed(WalkError),
}

/// An entry the walk could not read.
#[derive(Debug)]
pub struct WalkError {
    pub path: Option<PathBuf>,
    pub at_root: bool,
    pub source: io::Error,
}

/// Check if a directory entry should be excluded based on patterns
fn should_exclude(entry: &DirEntry, patterns: &[String]) -> bool {
    let file_name = entry.file_name().to_string_lossy();
    patterns.iter().any(|pattern| file_name.contains(pattern.as_str()))
}
