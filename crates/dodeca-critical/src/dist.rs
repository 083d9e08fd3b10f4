//! Build output directories on disk.
//!
//! A dist directory is every file under it, plus an optional `chunks.json`
//! manifest at its root:
//!
//! ```json
//! [{ "id": 0, "name": "main", "files": ["main.css", "main.js"] }]
//! ```
//!
//! Without a manifest, one chunk named `main` owns every file.

use std::hash::Hasher;

use camino::{Utf8Path, Utf8PathBuf};
use ignore::WalkBuilder;
use rapidhash::fast::RapidHasher;

use crate::build::{BuildOutput, Chunk, ChunkId};
use crate::error::DistError;
use crate::filename::encode_dodeca;
use crate::rewrite::Renamed;

pub const CHUNK_MANIFEST: &str = "chunks.json";

/// Read every file under `dir`. `hash` defaults to a digest of the whole
/// output.
pub fn load_dist(dir: &Utf8Path, hash: Option<String>) -> Result<BuildOutput, DistError> {
    let mut paths = Vec::new();
    let walker = WalkBuilder::new(dir)
        .hidden(false)
        .git_ignore(false)
        .git_global(false)
        .git_exclude(false)
        .ignore(false)
        .parents(false)
        .build();

    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_some_and(|ft| ft.is_file()) {
            continue;
        }
        let path = Utf8PathBuf::try_from(entry.into_path())
            .map_err(|e| DistError::NonUtf8Path(e.into_path_buf()))?;
        let relative = path
            .strip_prefix(dir)
            .map_err(|_| DistError::OutsideDist {
                path: path.clone(),
                dir: dir.to_owned(),
            })?
            .as_str()
            .replace('\\', "/");
        if relative != CHUNK_MANIFEST {
            paths.push(relative);
        }
    }

    // `index.html` first so it is picked as the index document.
    paths.sort_by(|a, b| (a != "index.html", a).cmp(&(b != "index.html", b)));

    let mut build = BuildOutput::default();
    let mut hasher = RapidHasher::default();
    for path in paths {
        let content = fs_err::read(dir.join(&path))?;
        hasher.write(path.as_bytes());
        hasher.write(&content);
        build.insert(path, content);
    }
    build.hash = hash.unwrap_or_else(|| encode_dodeca(hasher.finish()));

    let manifest = dir.join(CHUNK_MANIFEST);
    build.chunks = if manifest.exists() {
        let json = fs_err::read_to_string(&manifest)?;
        serde_json::from_str(&json).map_err(|source| DistError::Manifest {
            path: manifest.clone(),
            source,
        })?
    } else {
        vec![Chunk::new(
            ChunkId::Number(0),
            "main",
            build.assets.keys().cloned().collect(),
        )]
    };

    tracing::debug!(
        %dir,
        assets = build.assets.len(),
        chunks = build.chunks.len(),
        hash = %build.hash,
        "loaded dist"
    );
    Ok(build)
}

/// Write changed assets back to `dir`, remove renamed originals and
/// rewrite the chunk manifest.
pub fn write_dist(
    dir: &Utf8Path,
    build: &BuildOutput,
    renamed: &[Renamed],
) -> Result<(), DistError> {
    let mut written = 0usize;
    for (path, content) in &build.assets {
        let target = dir.join(path);
        if fs_err::read(&target).is_ok_and(|existing| existing == *content) {
            continue;
        }
        if let Some(parent) = target.parent() {
            fs_err::create_dir_all(parent)?;
        }
        fs_err::write(&target, content)?;
        written += 1;
    }

    for Renamed { old, .. } in renamed {
        if !build.assets.contains_key(old) {
            let target = dir.join(old);
            if target.exists() {
                fs_err::remove_file(&target)?;
            }
        }
    }

    let manifest = dir.join(CHUNK_MANIFEST);
    let json = serde_json::to_string_pretty(&build.chunks).map_err(|source| DistError::Manifest {
        path: manifest.clone(),
        source,
    })?;
    fs_err::write(&manifest, json)?;

    tracing::debug!(%dir, written, removed = renamed.len(), "wrote dist");
    Ok(())
}
