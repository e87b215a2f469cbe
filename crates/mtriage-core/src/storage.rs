//! Local filesystem storage for element indexes, elements, and logs
//!
//! Layout under the base directory:
//!
//! ```text
//! {base}/logs/{module}.txt
//! {base}/{selector}/element_map.csv
//! {base}/{selector}/data/{element_id}/...
//! {base}/{selector}/derived/{analyser}/{element_id}/...
//! {base}/.scratch/{module}/{element_id}/...
//! ```

use crate::element::LocalElement;
use crate::error::StorageError;
use crate::index::{ElementIndex, IndexRows};
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

pub const LOGS_DIR: &str = "logs";
pub const DATA_DIR: &str = "data";
pub const DERIVED_DIR: &str = "derived";
pub const SCRATCH_DIR: &str = ".scratch";
pub const INDEX_FILE: &str = "element_map.csv";

/// Where an element lives relative to the storage base
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Location {
    /// Retrieved by a selector
    Data { selector: String },

    /// Produced by an analyser from one of a selector's elements
    Derived { selector: String, analyser: String },
}

impl Location {
    pub fn data(selector: impl Into<String>) -> Self {
        Self::Data {
            selector: selector.into(),
        }
    }

    pub fn derived(selector: impl Into<String>, analyser: impl Into<String>) -> Self {
        Self::Derived {
            selector: selector.into(),
            analyser: analyser.into(),
        }
    }

    pub fn selector(&self) -> &str {
        match self {
            Self::Data { selector } | Self::Derived { selector, .. } => selector,
        }
    }
}

/// How a source file is placed into storage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    Move,
    Copy,
}

impl WriteMode {
    pub fn from_delete_local(delete_local_on_write: bool) -> Self {
        if delete_local_on_write {
            Self::Move
        } else {
            Self::Copy
        }
    }
}

/// Element folders belonging to one selector
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectorMedia {
    /// element id -> folder
    pub data: BTreeMap<String, PathBuf>,

    /// analyser -> element id -> folder
    pub derived: BTreeMap<String, BTreeMap<String, PathBuf>>,
}

/// selector -> its element folders
pub type MediaTree = BTreeMap<String, SelectorMedia>;

#[derive(Debug, Clone)]
pub struct LocalStorage {
    base: PathBuf,
}

impl LocalStorage {
    /// Open storage rooted at `base`, creating the base and logs folders
    pub fn new(base: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let base = base.into();
        fs::create_dir_all(base.join(LOGS_DIR))?;
        Ok(Self { base })
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.base.join(LOGS_DIR)
    }

    pub fn selector_dir(&self, selector: &str) -> PathBuf {
        self.base.join(selector)
    }

    pub fn location_dir(&self, location: &Location) -> PathBuf {
        match location {
            Location::Data { selector } => self.selector_dir(selector).join(DATA_DIR),
            Location::Derived { selector, analyser } => self
                .selector_dir(selector)
                .join(DERIVED_DIR)
                .join(analyser),
        }
    }

    pub fn element_dir(&self, location: &Location, id: &str) -> PathBuf {
        self.location_dir(location).join(id)
    }

    pub fn index_path(&self, selector: &str) -> PathBuf {
        self.selector_dir(selector).join(INDEX_FILE)
    }

    /// Per-element working folder for a module; not created until asked for
    pub fn scratch_dir(&self, module: &str, id: &str) -> Result<PathBuf, StorageError> {
        validate_id(id)?;
        Ok(self.base.join(SCRATCH_DIR).join(module).join(id))
    }

    pub fn has_elements_index(&self, selector: &str) -> bool {
        self.index_path(selector).is_file()
    }

    pub fn write_elements_index(
        &self,
        selector: &str,
        index: &ElementIndex,
    ) -> Result<PathBuf, StorageError> {
        fs::create_dir_all(self.selector_dir(selector))?;
        let path = self.index_path(selector);
        index.write_csv(&path)?;
        debug!("Wrote {} index rows to {}", index.len(), path.display());
        Ok(path)
    }

    /// Stream the rows of a selector's element index
    pub fn read_elements_index(&self, selector: &str) -> Result<IndexRows, StorageError> {
        IndexRows::open(&self.index_path(selector))
    }

    /// Write an element's files into `{location}/{id}/`
    ///
    /// Files are staged in a sibling folder and renamed into place, so a
    /// failed write leaves no partial element behind. A single path keeps its
    /// file name; several paths are renamed `{i}.{ext}` in order.
    pub fn write_element(
        &self,
        location: &Location,
        element: &LocalElement,
        mode: WriteMode,
    ) -> Result<PathBuf, StorageError> {
        validate_id(&element.id)?;
        let dest = self.element_dir(location, &element.id);
        place_element(&dest, element, mode)?;
        debug!("Wrote element {} to {}", element.id, dest.display());
        Ok(dest)
    }

    /// Remove an element folder; returns whether anything was removed
    ///
    /// An id that could never have been written names no element folder, so
    /// nothing is removed for it.
    pub fn remove_element(&self, location: &Location, id: &str) -> Result<bool, StorageError> {
        if validate_id(id).is_err() {
            debug!("Not removing element with invalid id '{}'", id);
            return Ok(false);
        }
        let dest = self.element_dir(location, id);
        remove_dir_if_exists(&dest)
    }

    /// Map every selector to its data and derived element folders
    ///
    /// The logs folder and dot-prefixed entries are not selectors.
    pub fn read_all_media(&self) -> Result<MediaTree, StorageError> {
        let mut tree = MediaTree::new();
        for (selector, selector_dir) in list_dirs(&self.base)? {
            if selector == LOGS_DIR {
                continue;
            }
            let data = list_dirs(&selector_dir.join(DATA_DIR))?.into_iter().collect();
            let mut derived = BTreeMap::new();
            for (analyser, analyser_dir) in list_dirs(&selector_dir.join(DERIVED_DIR))? {
                derived.insert(analyser, list_dirs(&analyser_dir)?.into_iter().collect());
            }
            tree.insert(selector, SelectorMedia { data, derived });
        }
        Ok(tree)
    }

    /// Append lines to a module's log file
    pub fn write_logs(&self, module: &str, lines: &[String]) -> Result<(), StorageError> {
        if lines.is_empty() {
            return Ok(());
        }
        fs::create_dir_all(self.logs_dir())?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.logs_dir().join(format!("{module}.txt")))?;
        for line in lines {
            writeln!(file, "{line}")?;
        }
        file.flush()?;
        Ok(())
    }
}

/// Stage `element`'s files and rename the staging folder to `dest`
pub fn place_element(
    dest: &Path,
    element: &LocalElement,
    mode: WriteMode,
) -> Result<Vec<PathBuf>, StorageError> {
    if element.paths.is_empty() {
        return Err(StorageError::EmptyElement(element.id.clone()));
    }
    let parent = dest
        .parent()
        .ok_or_else(|| StorageError::InvalidId(element.id.clone()))?;
    fs::create_dir_all(parent)?;

    let staging = parent.join(format!(".{}.partial", element.id));
    remove_dir_if_exists(&staging)?;
    fs::create_dir_all(&staging)?;

    let numbered = element.paths.len() > 1;
    let mut names = Vec::with_capacity(element.paths.len());
    for (i, src) in element.paths.iter().enumerate() {
        let name = if numbered {
            match src.extension() {
                Some(ext) => format!("{i}.{}", ext.to_string_lossy()),
                None => i.to_string(),
            }
        } else {
            src.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| i.to_string())
        };

        let placed = match mode {
            WriteMode::Move => move_file(src, &staging.join(&name)),
            WriteMode::Copy => fs::copy(src, staging.join(&name)).map(|_| ()),
        };
        if let Err(err) = placed {
            let _ = fs::remove_dir_all(&staging);
            return Err(err.into());
        }
        names.push(name);
    }

    remove_dir_if_exists(dest)?;
    fs::rename(&staging, dest)?;
    Ok(names.into_iter().map(|n| dest.join(n)).collect())
}

/// Every file under an element folder, sorted by path
pub fn element_files(dir: &Path) -> Result<Vec<PathBuf>, StorageError> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| StorageError::Io(e.into()))?;
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

fn move_file(src: &Path, dst: &Path) -> std::io::Result<()> {
    if fs::rename(src, dst).is_ok() {
        return Ok(());
    }
    fs::copy(src, dst)?;
    fs::remove_file(src)
}

fn remove_dir_if_exists(dir: &Path) -> Result<bool, StorageError> {
    if !dir.exists() {
        return Ok(false);
    }
    fs::remove_dir_all(dir)?;
    Ok(true)
}

/// Sorted (name, path) pairs of the non-hidden subfolders of `dir`
fn list_dirs(dir: &Path) -> Result<Vec<(String, PathBuf)>, StorageError> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut dirs = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') || !entry.file_type()?.is_dir() {
            continue;
        }
        dirs.push((name, entry.path()));
    }
    dirs.sort();
    Ok(dirs)
}

/// Element ids name a single folder: not empty, no separators, no leading dot
pub fn validate_id(id: &str) -> Result<(), StorageError> {
    let invalid = id.is_empty()
        || id.starts_with('.')
        || id.contains('/')
        || id.contains('\\')
        || id.contains('\0');
    if invalid {
        return Err(StorageError::InvalidId(id.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::etype::Etype;
    use tempfile::TempDir;

    fn setup() -> (TempDir, LocalStorage) {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(dir.path().join("media")).unwrap();
        (dir, storage)
    }

    fn scratch_file(dir: &TempDir, name: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, name.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_new_creates_logs_dir() {
        let (_dir, storage) = setup();
        assert!(storage.logs_dir().is_dir());
    }

    #[test]
    fn test_write_single_path_keeps_name() {
        let (dir, storage) = setup();
        let src = scratch_file(&dir, "photo.png");
        let el = LocalElement::new("e1", vec![src.clone()], Etype::Image);
        let dest = storage
            .write_element(&Location::data("sel"), &el, WriteMode::Move)
            .unwrap();
        assert!(dest.join("photo.png").is_file());
        assert!(!src.exists());
    }

    #[test]
    fn test_write_many_paths_numbers_them() {
        let (dir, storage) = setup();
        let a = scratch_file(&dir, "a.jpg");
        let b = scratch_file(&dir, "b.json");
        let el = LocalElement::new("e1", vec![a.clone(), b.clone()], Etype::Any);
        let dest = storage
            .write_element(&Location::derived("sel", "an"), &el, WriteMode::Copy)
            .unwrap();
        assert!(dest.join("0.jpg").is_file());
        assert!(dest.join("1.json").is_file());
        assert!(a.exists() && b.exists());
        assert!(dest.ends_with("sel/derived/an/e1"));
    }

    #[test]
    fn test_failed_write_leaves_nothing() {
        let (dir, storage) = setup();
        let missing = dir.path().join("missing.png");
        let el = LocalElement::new("e1", vec![missing], Etype::Image);
        let location = Location::data("sel");
        assert!(storage.write_element(&location, &el, WriteMode::Copy).is_err());
        assert!(!storage.element_dir(&location, "e1").exists());
        let leftovers: Vec<_> = fs::read_dir(storage.location_dir(&location))
            .unwrap()
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_rejects_path_like_ids() {
        let (dir, storage) = setup();
        let src = scratch_file(&dir, "x.png");
        let el = LocalElement::new("../escape", vec![src], Etype::Image);
        assert!(matches!(
            storage.write_element(&Location::data("sel"), &el, WriteMode::Copy),
            Err(StorageError::InvalidId(_))
        ));
    }

    #[test]
    fn test_remove_element() {
        let (dir, storage) = setup();
        let src = scratch_file(&dir, "x.png");
        let location = Location::data("sel");
        let el = LocalElement::new("e1", vec![src], Etype::Image);
        storage.write_element(&location, &el, WriteMode::Move).unwrap();
        assert!(storage.remove_element(&location, "e1").unwrap());
        assert!(!storage.remove_element(&location, "e1").unwrap());
    }

    #[test]
    fn test_remove_invalid_id_keeps_siblings() {
        let (dir, storage) = setup();
        let location = Location::data("sel");
        let src = scratch_file(&dir, "x.png");
        let el = LocalElement::new("kept", vec![src], Etype::Image);
        storage.write_element(&location, &el, WriteMode::Move).unwrap();

        for id in ["", ".", "..", "a/b"] {
            assert!(!storage.remove_element(&location, id).unwrap());
        }
        assert!(storage.location_dir(&location).is_dir());
        assert!(storage.element_dir(&location, "kept").is_dir());
        assert!(storage.selector_dir("sel").is_dir());
    }

    #[test]
    fn test_scratch_dir_rejects_invalid_ids() {
        let (_dir, storage) = setup();
        assert!(storage.scratch_dir("Mod", "e1").unwrap().ends_with(".scratch/Mod/e1"));
        assert!(matches!(
            storage.scratch_dir("Mod", ""),
            Err(StorageError::InvalidId(_))
        ));
        assert!(storage.scratch_dir("Mod", "..").is_err());
    }

    #[test]
    fn test_read_all_media() {
        let (dir, storage) = setup();
        for id in ["e1", "e2"] {
            let src = scratch_file(&dir, &format!("{id}.png"));
            let el = LocalElement::new(id, vec![src], Etype::Image);
            storage
                .write_element(&Location::data("sel1"), &el, WriteMode::Move)
                .unwrap();
        }
        let src = scratch_file(&dir, "out.json");
        let el = LocalElement::new("e1", vec![src], Etype::Json);
        storage
            .write_element(&Location::derived("sel1", "an1"), &el, WriteMode::Move)
            .unwrap();
        fs::create_dir_all(storage.base().join(".scratch/x")).unwrap();

        let tree = storage.read_all_media().unwrap();
        assert_eq!(tree.keys().collect::<Vec<_>>(), vec!["sel1"]);
        let media = &tree["sel1"];
        assert_eq!(media.data.len(), 2);
        assert_eq!(media.derived["an1"].len(), 1);
        assert!(media.derived["an1"]["e1"].ends_with("sel1/derived/an1/e1"));
    }

    #[test]
    fn test_element_files_sorted() {
        let (_dir, storage) = setup();
        let folder = storage.element_dir(&Location::data("s"), "e");
        fs::create_dir_all(folder.join("nested")).unwrap();
        fs::write(folder.join("b.txt"), b"b").unwrap();
        fs::write(folder.join("a.txt"), b"a").unwrap();
        fs::write(folder.join("nested/c.txt"), b"c").unwrap();
        let files = element_files(&folder).unwrap();
        assert_eq!(files.len(), 3);
        assert!(files[0].ends_with("a.txt"));
    }

    #[test]
    fn test_write_logs_appends() {
        let (_dir, storage) = setup();
        storage.write_logs("mod", &["one".to_string()]).unwrap();
        storage.write_logs("mod", &["two".to_string()]).unwrap();
        let text = fs::read_to_string(storage.logs_dir().join("mod.txt")).unwrap();
        assert_eq!(text, "one\ntwo\n");
    }

    #[test]
    fn test_index_round_trip() {
        let (_dir, storage) = setup();
        let mut index = ElementIndex::new(["id", "path"]).unwrap();
        index.push(["a", "/x/a.png"]).unwrap();
        storage.write_elements_index("sel", &index).unwrap();
        assert!(storage.has_elements_index("sel"));
        let rows: Vec<_> = storage
            .read_elements_index("sel")
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(rows[0].get("path"), Some("/x/a.png"));
        assert!(storage.read_elements_index("other").is_err());
    }
}
