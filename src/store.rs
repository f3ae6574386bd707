use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::Result;
use crate::types::artifact_name;

pub trait ArtifactStore: Send + Sync {
    /// Removes every artifact and preview stored for `material`.
    fn remove_material(&self, material: &str) -> Result<()>;

    fn write_artifact(&self, material: &str, sheet: usize, document: &str) -> Result<()>;

    fn read_artifact(&self, material: &str, sheet: usize) -> Result<Option<String>>;

    /// Sheet ids with a stored artifact for `material`, ascending.
    fn artifact_sheets(&self, material: &str) -> Result<Vec<usize>>;

    fn write_preview(&self, material: &str, sheet: usize, png: &[u8]) -> Result<()>;
}

/// Splits a stored name back into material and sheet id. The sheet id is
/// the part after the last underscore, so material names may contain
/// underscores.
fn parse_name(name: &str) -> Option<(&str, usize)> {
    let (material, sheet) = name.rsplit_once('_')?;
    Some((material, sheet.parse().ok()?))
}

/// Artifacts as `.svg` files in one directory, previews as `.png` in another.
pub struct FsStore {
    output_dir: PathBuf,
    preview_dir: PathBuf,
}

impl FsStore {
    pub fn new(output_dir: impl Into<PathBuf>, preview_dir: impl Into<PathBuf>) -> Result<Self> {
        let store = Self {
            output_dir: output_dir.into(),
            preview_dir: preview_dir.into(),
        };
        std::fs::create_dir_all(&store.output_dir)?;
        std::fs::create_dir_all(&store.preview_dir)?;
        Ok(store)
    }

    pub fn artifact_path(&self, material: &str, sheet: usize) -> PathBuf {
        self.output_dir
            .join(format!("{}.svg", artifact_name(material, sheet)))
    }

    pub fn preview_path(&self, material: &str, sheet: usize) -> PathBuf {
        self.preview_dir
            .join(format!("{}.png", artifact_name(material, sheet)))
    }

    fn sheets_in(dir: &Path, material: &str, extension: &str) -> Result<Vec<usize>> {
        let mut sheets = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(extension) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if let Some((m, sheet)) = parse_name(stem)
                && m == material
            {
                sheets.push(sheet);
            }
        }
        sheets.sort_unstable();
        Ok(sheets)
    }
}

impl ArtifactStore for FsStore {
    fn remove_material(&self, material: &str) -> Result<()> {
        for sheet in Self::sheets_in(&self.output_dir, material, "svg")? {
            std::fs::remove_file(self.artifact_path(material, sheet))?;
        }
        for sheet in Self::sheets_in(&self.preview_dir, material, "png")? {
            std::fs::remove_file(self.preview_path(material, sheet))?;
        }
        Ok(())
    }

    fn write_artifact(&self, material: &str, sheet: usize, document: &str) -> Result<()> {
        std::fs::write(self.artifact_path(material, sheet), document)?;
        Ok(())
    }

    fn read_artifact(&self, material: &str, sheet: usize) -> Result<Option<String>> {
        match std::fs::read_to_string(self.artifact_path(material, sheet)) {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn artifact_sheets(&self, material: &str) -> Result<Vec<usize>> {
        Self::sheets_in(&self.output_dir, material, "svg")
    }

    fn write_preview(&self, material: &str, sheet: usize, png: &[u8]) -> Result<()> {
        std::fs::write(self.preview_path(material, sheet), png)?;
        Ok(())
    }
}

#[derive(Default)]
struct MemoryContents {
    artifacts: BTreeMap<String, String>,
    previews: BTreeMap<String, Vec<u8>>,
}

/// Store kept in memory, for embedding and tests.
#[derive(Default)]
pub struct MemoryStore {
    contents: Mutex<MemoryContents>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryContents> {
        self.contents.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Stored names of all artifacts, sorted.
    pub fn artifact_names(&self) -> Vec<String> {
        self.lock().artifacts.keys().cloned().collect()
    }

    pub fn preview(&self, material: &str, sheet: usize) -> Option<Vec<u8>> {
        self.lock()
            .previews
            .get(&artifact_name(material, sheet))
            .cloned()
    }
}

impl ArtifactStore for MemoryStore {
    fn remove_material(&self, material: &str) -> Result<()> {
        let mut contents = self.lock();
        let matches = |name: &String| parse_name(name).is_some_and(|(m, _)| m == material);
        contents.artifacts.retain(|name, _| !matches(name));
        contents.previews.retain(|name, _| !matches(name));
        Ok(())
    }

    fn write_artifact(&self, material: &str, sheet: usize, document: &str) -> Result<()> {
        self.lock()
            .artifacts
            .insert(artifact_name(material, sheet), document.to_string());
        Ok(())
    }

    fn read_artifact(&self, material: &str, sheet: usize) -> Result<Option<String>> {
        Ok(self
            .lock()
            .artifacts
            .get(&artifact_name(material, sheet))
            .cloned())
    }

    fn artifact_sheets(&self, material: &str) -> Result<Vec<usize>> {
        let mut sheets: Vec<usize> = self
            .lock()
            .artifacts
            .keys()
            .filter_map(|name| parse_name(name))
            .filter(|(m, _)| *m == material)
            .map(|(_, sheet)| sheet)
            .collect();
        sheets.sort_unstable();
        Ok(sheets)
    }

    fn write_preview(&self, material: &str, sheet: usize, png: &[u8]) -> Result<()> {
        self.lock()
            .previews
            .insert(artifact_name(material, sheet), png.to_vec());
        Ok(())
    }
}
