//! The build output a critical CSS run works on.

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Chunk identifier, numeric or named depending on the bundler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChunkId {
    Number(u64),
    Name(String),
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChunkId::Number(n) => write!(f, "{n}"),
            ChunkId::Name(name) => f.write_str(name),
        }
    }
}

/// A group of output files emitted together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: ChunkId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub files: Vec<String>,
}

impl Chunk {
    pub fn new(id: ChunkId, name: impl Into<String>, files: Vec<String>) -> Self {
        Self {
            id,
            name: Some(name.into()),
            files,
        }
    }

    /// Name used for `[name]`, falling back to the id.
    pub fn display_name(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => self.id.to_string(),
        }
    }
}

/// Every artifact of one build, keyed by output path, plus the chunk graph.
#[derive(Debug, Clone, Default)]
pub struct BuildOutput {
    pub assets: IndexMap<String, Vec<u8>>,
    pub chunks: Vec<Chunk>,
    /// Build-wide hash, used for `[hash]`.
    pub hash: String,
}

impl BuildOutput {
    pub fn new(hash: impl Into<String>) -> Self {
        Self {
            assets: IndexMap::new(),
            chunks: Vec::new(),
            hash: hash.into(),
        }
    }

    pub fn insert(&mut self, path: impl Into<String>, content: impl Into<Vec<u8>>) {
        self.assets.insert(path.into(), content.into());
    }

    /// The chunk whose file list contains `path`.
    pub fn owning_chunk(&self, path: &str) -> Option<&Chunk> {
        self.chunks
            .iter()
            .find(|chunk| chunk.files.iter().any(|f| f == path))
    }

    /// Files of the chunks named in `names`.
    pub fn chunk_files(&self, names: &[String]) -> Vec<String> {
        self.chunks
            .iter()
            .filter(|chunk| chunk.name.as_ref().is_some_and(|n| names.contains(n)))
            .flat_map(|chunk| chunk.files.iter().cloned())
            .collect()
    }

    /// Asset text, for HTML and CSS.
    pub fn text(&self, path: &str) -> Option<&str> {
        self.assets
            .get(path)
            .and_then(|bytes| std::str::from_utf8(bytes).ok())
    }
}

/// What the pipeline does with an asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetKind {
    Html,
    Css,
    Other,
}

impl AssetKind {
    pub fn of(path: &str) -> Self {
        let ext = path
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase());
        match ext.as_deref() {
            Some("html" | "htm") => AssetKind::Html,
            Some("css") => AssetKind::Css,
            _ => AssetKind::Other,
        }
    }
}

/// Asset paths split by kind, in build output order.
#[derive(Debug, Default)]
pub struct Classified {
    pub html: Vec<String>,
    pub css: Vec<String>,
    pub other: Vec<String>,
}

impl Classified {
    pub fn new<'a>(paths: impl IntoIterator<Item = &'a String>, excluded: &[String]) -> Self {
        let mut classified = Classified::default();
        for path in paths.into_iter().filter(|p| !excluded.contains(p)) {
            match AssetKind::of(path) {
                AssetKind::Html => classified.html.push(path.clone()),
                AssetKind::Css => classified.css.push(path.clone()),
                AssetKind::Other => classified.other.push(path.clone()),
            }
        }
        classified
    }
}
