//! Media discovery.
//!
//! Walks a directory tree and collects files the decoder can open.

use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::decode::CodecKind;

/// Recursively collect playable files under `root`, sorted by path.
///
/// Symlinked directories are followed only while they stay inside `root`.
pub fn scan_media(root: &Path) -> Result<Vec<PathBuf>> {
    let root = root
        .canonicalize()
        .with_context(|| format!("canonicalize root {:?}", root))?;
    if !root.is_dir() {
        return Err(anyhow::anyhow!("root is not a directory: {:?}", root));
    }

    tracing::info!(root = %root.display(), "scanning media");
    let mut tracks = Vec::new();
    scan_dir(&root, &root, &mut tracks)?;
    tracks.sort();
    tracing::info!(root = %root.display(), tracks = tracks.len(), "media scan complete");
    Ok(tracks)
}

fn scan_dir(root: &Path, dir: &Path, tracks: &mut Vec<PathBuf>) -> Result<()> {
    for entry in fs::read_dir(dir).with_context(|| format!("read_dir {:?}", dir))? {
        let entry = entry.context("read_dir entry")?;
        let path = entry.path();
        if path.is_dir() {
            let canon = path
                .canonicalize()
                .with_context(|| format!("canonicalize {:?}", path))?;
            if canon.starts_with(root) && canon != dir {
                scan_dir(root, &canon, tracks)?;
            }
            continue;
        }
        if path.is_file() && is_supported(&path) {
            tracks.push(path);
        }
    }
    Ok(())
}

/// Whether `path` has an extension the decoder accepts (case-insensitive).
pub fn is_supported(path: &Path) -> bool {
    path.extension()
        .and_then(OsStr::to_str)
        .map(|ext| CodecKind::from_extension(&ext.to_ascii_lowercase()).is_some())
        .unwrap_or(false)
}
