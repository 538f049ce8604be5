//! Filesystem Scanner (spec §4.4, component C4).
//!
//! Walks the configured root depth-first with symlink loop detection,
//! pairing each recognized media file with a sibling subtitle file, and
//! streams `(media_path, Option<subtitle_path>)` pairs over a bounded
//! channel so enumeration runs concurrently with ingestion.
//!
//! Grounded on `services/scanner.rs`'s `WalkDir::new(..).follow_links(true)`
//! usage; `walkdir` itself does not dedupe symlinked cycles, so this adds a
//! visited-inode set on top of it.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

/// One `(media_path, subtitle_path)` tuple produced by the scanner
/// (glossary "Pair"); `subtitle_path` is `None` when no sibling was found.
#[derive(Debug, Clone)]
pub struct ScanPair {
    pub media_path: PathBuf,
    pub subtitle_path: Option<PathBuf>,
}

pub struct FilesystemScanner {
    root: PathBuf,
    media_extensions: HashSet<String>,
    subtitle_extensions: HashSet<String>,
}

impl FilesystemScanner {
    pub fn new(
        root: PathBuf,
        media_extensions: HashSet<String>,
        subtitle_extensions: HashSet<String>,
    ) -> Self {
        Self {
            root,
            media_extensions,
            subtitle_extensions,
        }
    }

    /// Walk the root and stream pairs over `tx`. Honors `cancel` at every
    /// directory boundary (spec §4.4 step 3). Returns the number of pairs
    /// emitted.
    pub async fn run(
        &self,
        tx: mpsc::Sender<ScanPair>,
        cancel: CancellationToken,
    ) -> usize {
        let mut emitted = 0usize;
        let mut visited_inodes: HashSet<(u64, u64)> = HashSet::new();

        for entry in WalkDir::new(&self.root)
            .follow_links(true)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if cancel.is_cancelled() {
                break;
            }

            let path = entry.path();
            if !path.is_file() {
                continue;
            }

            if let Ok(meta) = entry.metadata() {
                if !dedupe_inode(&mut visited_inodes, &meta) {
                    continue;
                }
            }

            let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
                continue;
            };
            if !self.media_extensions.contains(&ext.to_ascii_lowercase()) {
                continue;
            }

            let subtitle_path = self.find_sibling_subtitle(path);
            let pair = ScanPair {
                media_path: path.to_path_buf(),
                subtitle_path,
            };

            if tx.send(pair).await.is_err() {
                // Receiver dropped — controller shut down; stop walking.
                break;
            }
            emitted += 1;
        }

        emitted
    }

    /// Locate a sibling subtitle: same stem with a supported extension in
    /// the same directory, else a same-stem file in a sibling `subs/` or
    /// `subtitles/` folder (spec §4.4 step 1).
    fn find_sibling_subtitle(&self, media_path: &Path) -> Option<PathBuf> {
        let stem = media_path.file_stem()?.to_str()?;
        let parent = media_path.parent()?;

        for ext in &self.subtitle_extensions {
            let candidate = parent.join(format!("{stem}.{ext}"));
            if candidate.is_file() {
                return Some(candidate);
            }
        }

        for subdir_name in ["subs", "subtitles"] {
            let subdir = parent.join(subdir_name);
            if !subdir.is_dir() {
                continue;
            }
            for ext in &self.subtitle_extensions {
                let candidate = subdir.join(format!("{stem}.{ext}"));
                if candidate.is_file() {
                    return Some(candidate);
                }
            }
        }

        None
    }
}

/// Returns `false` if this (dev, ino) pair was already visited — i.e. this
/// entry is part of a symlink cycle and should be skipped.
#[cfg(unix)]
fn dedupe_inode(visited: &mut HashSet<(u64, u64)>, meta: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::MetadataExt;
    visited.insert((meta.dev(), meta.ino()))
}

#[cfg(not(unix))]
fn dedupe_inode(_visited: &mut HashSet<(u64, u64)>, _meta: &std::fs::Metadata) -> bool {
    true
}
