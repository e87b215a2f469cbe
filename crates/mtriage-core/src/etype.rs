//! Element types (etypes)
//!
//! An etype is a predicate over a set of file paths. Casting a path set to an
//! etype filters the paths down to the ones the etype accepts and checks the
//! arity rule: non-array base types need exactly one match, arrays and `Any`
//! need at least one, and a union needs every member to succeed.

use crate::element::LocalElement;
use crate::error::EtypeCastError;
use std::cmp::Ordering;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const IMAGE_EXTENSIONS: &[&str] = &["bmp", "gif", "jpeg", "jpg", "png", "tif", "tiff", "webp"];
pub const VIDEO_EXTENSIONS: &[&str] = &["avi", "m4v", "mkv", "mov", "mp4", "mpeg", "mpg", "webm"];
pub const AUDIO_EXTENSIONS: &[&str] = &["aac", "flac", "m4a", "mp3", "ogg", "wav"];
pub const JSON_EXTENSIONS: &[&str] = &["json"];

/// Filter signature for user-defined etypes
pub type FilterFn = dyn Fn(&[PathBuf]) -> Vec<PathBuf> + Send + Sync;

/// A named etype with a caller-supplied filter
///
/// Two custom etypes are equal when their names are equal.
#[derive(Clone)]
pub struct CustomEtype {
    name: Arc<str>,
    filter: Arc<FilterFn>,
}

impl CustomEtype {
    pub fn new<F>(name: &str, filter: F) -> Self
    where
        F: Fn(&[PathBuf]) -> Vec<PathBuf> + Send + Sync + 'static,
    {
        Self {
            name: Arc::from(name),
            filter: Arc::new(filter),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Keep the paths this etype accepts, skipping ones that no longer exist
    pub fn filter(&self, paths: &[PathBuf]) -> Vec<PathBuf> {
        (self.filter)(paths)
            .into_iter()
            .filter(|p| p.is_file())
            .collect()
    }
}

impl PartialEq for CustomEtype {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for CustomEtype {}

impl fmt::Debug for CustomEtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CustomEtype").field(&self.name).finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Etype {
    /// Every existing file
    Any,
    Image,
    Video,
    Audio,
    Json,
    /// One or more of the inner type
    Array(Box<Etype>),
    /// Every member must cast; paths are the concatenation of member matches
    Union(Vec<Etype>),
    Custom(CustomEtype),
}

impl Etype {
    /// The built-in base types that implicit casting considers, in canonical order
    pub const MEDIA: [Etype; 4] = [Etype::Image, Etype::Video, Etype::Audio, Etype::Json];

    pub fn array(inner: Etype) -> Self {
        match inner {
            Etype::Array(_) => inner,
            other => Etype::Array(Box::new(other)),
        }
    }

    /// Build a union, flattening nested unions and sorting members canonically
    ///
    /// A union of a single member is that member.
    pub fn union(members: impl IntoIterator<Item = Etype>) -> Self {
        let mut flat = Vec::new();
        for member in members {
            match member {
                Etype::Union(inner) => flat.extend(inner),
                other => flat.push(other),
            }
        }
        flat.sort_by(Etype::canonical_cmp);
        flat.dedup();

        if flat.len() == 1 {
            flat.remove(0)
        } else {
            Etype::Union(flat)
        }
    }

    pub fn custom<F>(name: &str, filter: F) -> Self
    where
        F: Fn(&[PathBuf]) -> Vec<PathBuf> + Send + Sync + 'static,
    {
        Etype::Custom(CustomEtype::new(name, filter))
    }

    /// Look up a built-in etype by name, accepting `Array(T)` wrappers
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim();
        if let Some(inner) = name
            .strip_prefix("Array(")
            .and_then(|rest| rest.strip_suffix(')'))
        {
            return Etype::from_name(inner).map(Etype::array);
        }
        match name.to_ascii_lowercase().as_str() {
            "any" => Some(Etype::Any),
            "image" => Some(Etype::Image),
            "video" => Some(Etype::Video),
            "audio" => Some(Etype::Audio),
            "json" => Some(Etype::Json),
            _ => None,
        }
    }

    fn extensions(&self) -> Option<&'static [&'static str]> {
        match self {
            Etype::Image => Some(IMAGE_EXTENSIONS),
            Etype::Video => Some(VIDEO_EXTENSIONS),
            Etype::Audio => Some(AUDIO_EXTENSIONS),
            Etype::Json => Some(JSON_EXTENSIONS),
            _ => None,
        }
    }

    /// Keep the paths this etype accepts, in input order, without arity checks
    pub fn filter(&self, paths: &[PathBuf]) -> Vec<PathBuf> {
        match self {
            Etype::Any => paths.iter().filter(|p| p.is_file()).cloned().collect(),
            Etype::Image | Etype::Video | Etype::Audio | Etype::Json => {
                let exts = self.extensions().unwrap_or_default();
                paths
                    .iter()
                    .filter(|p| has_extension(p, exts) && p.is_file())
                    .cloned()
                    .collect()
            }
            Etype::Array(inner) => inner.filter(paths),
            Etype::Union(members) => members.iter().flat_map(|m| m.filter(paths)).collect(),
            Etype::Custom(custom) => custom.filter(paths),
        }
    }

    /// Apply the filter and this etype's arity rule
    pub fn select(&self, paths: &[PathBuf]) -> Result<Vec<PathBuf>, String> {
        match self {
            Etype::Image | Etype::Video | Etype::Audio | Etype::Json => {
                let matched = self.filter(paths);
                match matched.len() {
                    0 => Err(format!("no {self} found in element")),
                    1 => Ok(matched),
                    n => Err(format!("expected exactly one {self}, found {n}")),
                }
            }
            Etype::Union(members) => {
                let mut selected = Vec::new();
                for member in members {
                    selected.extend(member.select(paths)?);
                }
                Ok(selected)
            }
            Etype::Any | Etype::Array(_) | Etype::Custom(_) => {
                let matched = self.filter(paths);
                if matched.is_empty() {
                    Err(format!("no {self} found in element"))
                } else {
                    Ok(matched)
                }
            }
        }
    }

    /// Cast a path set to this etype, producing an element
    pub fn cast(&self, id: &str, paths: &[PathBuf]) -> Result<LocalElement, EtypeCastError> {
        let selected = self
            .select(paths)
            .map_err(|reason| EtypeCastError::new(id, self, reason))?;
        Ok(LocalElement::new(id, selected, self.clone()))
    }

    /// Re-cast an element's paths to this etype, keeping its id and query
    pub fn recast(&self, element: LocalElement) -> Result<LocalElement, EtypeCastError> {
        let cast = self.cast(&element.id, &element.paths)?;
        Ok(LocalElement {
            query: element.query,
            ..cast
        })
    }

    fn canonical_key(&self) -> (u8, u8) {
        match self {
            Etype::Any => (0, 0),
            Etype::Image => (1, 0),
            Etype::Video => (2, 0),
            Etype::Audio => (3, 0),
            Etype::Json => (4, 0),
            Etype::Custom(_) => (5, 0),
            Etype::Array(inner) => (inner.canonical_key().0, 1),
            Etype::Union(_) => (6, 0),
        }
    }

    fn canonical_cmp(a: &Etype, b: &Etype) -> Ordering {
        a.canonical_key()
            .cmp(&b.canonical_key())
            .then_with(|| a.to_string().cmp(&b.to_string()))
    }
}

impl fmt::Display for Etype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Etype::Any => write!(f, "Any"),
            Etype::Image => write!(f, "Image"),
            Etype::Video => write!(f, "Video"),
            Etype::Audio => write!(f, "Audio"),
            Etype::Json => write!(f, "Json"),
            Etype::Array(inner) => write!(f, "Array({inner})"),
            Etype::Union(members) => {
                write!(f, "Union(")?;
                for (i, member) in members.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{member}")?;
                }
                write!(f, ")")
            }
            Etype::Custom(custom) => write!(f, "{}", custom.name()),
        }
    }
}

fn has_extension(path: &Path, exts: &[&str]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| exts.iter().any(|x| x.eq_ignore_ascii_case(e)))
        .unwrap_or(false)
}

/// Infer the most specific etype for a path set
///
/// Each built-in media type matching one path contributes `T`, several paths
/// contribute `Array(T)`. If any existing path matches no media type the
/// result is `Any`.
pub fn infer(id: &str, paths: &[PathBuf]) -> Result<Etype, EtypeCastError> {
    let existing = Etype::Any.filter(paths);
    if existing.is_empty() {
        return Err(EtypeCastError::new(id, Etype::Any, "no files found in element"));
    }

    let mut members = Vec::new();
    let mut covered = 0;
    for base in Etype::MEDIA {
        let matched = base.filter(&existing).len();
        if matched == 0 {
            continue;
        }
        covered += matched;
        members.push(if matched == 1 { base } else { Etype::array(base) });
    }

    if members.is_empty() || covered < existing.len() {
        return Ok(Etype::Any);
    }
    Ok(Etype::union(members))
}

/// Cast to `to` when given, otherwise to the inferred etype
pub fn cast(id: &str, paths: &[PathBuf], to: Option<&Etype>) -> Result<LocalElement, EtypeCastError> {
    match to {
        Some(etype) => etype.cast(id, paths),
        None => infer(id, paths)?.cast(id, paths),
    }
}
