//! On-disk cache of face embeddings for a directory of reference images.
//!
//! The cache lives inside the database directory as one JSON file per
//! (model, detector, alignment, normalization) combination. Each image is
//! tracked by the SHA-256 of its bytes so edits are picked up on the next sync.

use crate::engine::{EngineOptions, FaceEngine};
use crate::error::{Error, Result};
use crate::models::{DetectorBackend, Normalization, RecognitionModel};
use crate::types::{Embedding, FacialArea};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// One face of one database image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRepresentation {
    /// Image path relative to the database directory, `/`-separated.
    pub identity: String,
    /// SHA-256 of the image file, lowercase hex.
    pub hash: String,
    /// `None` when no face could be detected in the image.
    pub embedding: Option<Embedding>,
    pub target: Option<FacialArea>,
}

/// Settings a cache file was built with. Embeddings from different settings
/// are not comparable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct StoreKey {
    model: RecognitionModel,
    detector: DetectorBackend,
    aligned: bool,
    normalization: Normalization,
}

impl From<&EngineOptions> for StoreKey {
    fn from(options: &EngineOptions) -> Self {
        Self {
            model: options.model,
            detector: options.detector,
            aligned: options.align,
            normalization: options.normalization,
        }
    }
}

#[derive(Serialize)]
struct RepresentationFileOut<'a> {
    #[serde(flatten)]
    key: StoreKey,
    built_at: DateTime<Utc>,
    entries: &'a [StoredRepresentation],
}

#[derive(Deserialize)]
struct RepresentationFileIn {
    #[serde(flatten)]
    key: StoreKey,
    built_at: DateTime<Utc>,
    entries: Vec<StoredRepresentation>,
}

/// What a [`RepresentationStore::sync`] changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Image files found in the database directory.
    pub images: usize,
    pub added: usize,
    pub removed: usize,
    pub replaced: usize,
    pub unchanged: usize,
    /// Images stored without an embedding because no face was found.
    pub without_face: usize,
    /// Images skipped because they could not be read or decoded.
    pub failed: usize,
    /// Whether the cache file was (re)written.
    pub written: bool,
}

pub struct RepresentationStore {
    db_path: PathBuf,
    file_path: PathBuf,
    key: StoreKey,
    built_at: Option<DateTime<Utc>>,
    entries: Vec<StoredRepresentation>,
    /// Files never treated as database images, resolved to absolute paths.
    excluded: Vec<PathBuf>,
}

impl RepresentationStore {
    /// Cache file name for the given settings.
    pub fn file_name(options: &EngineOptions) -> String {
        let alignment = if options.align { "aligned" } else { "unaligned" };
        format!(
            "representations_{}_{}_{}_{}.json",
            options.model.name().to_lowercase().replace('-', ""),
            options.detector,
            alignment,
            options.normalization.name().to_lowercase(),
        )
    }

    /// Open the cache for `db_path`, loading it if present.
    ///
    /// An unreadable cache or one built with other settings is discarded and
    /// rebuilt on the next sync.
    pub fn open(db_path: &Path, options: &EngineOptions) -> Result<Self> {
        if !db_path.is_dir() {
            return Err(Error::DatabaseNotFound(db_path.display().to_string()));
        }

        let key = StoreKey::from(options);
        let file_path = db_path.join(Self::file_name(options));
        let mut store = Self {
            db_path: db_path.to_path_buf(),
            file_path,
            key,
            built_at: None,
            entries: Vec::new(),
            excluded: Vec::new(),
        };

        if store.file_path.exists() {
            let loaded = fs::read(&store.file_path)
                .map_err(Error::from)
                .and_then(|bytes| Ok(serde_json::from_slice::<RepresentationFileIn>(&bytes)?));
            match loaded {
                Ok(file) if file.key == key => {
                    tracing::info!(
                        path = %store.file_path.display(),
                        entries = file.entries.len(),
                        built_at = %file.built_at,
                        "loaded representation cache"
                    );
                    store.built_at = Some(file.built_at);
                    store.entries = file.entries;
                }
                Ok(file) => tracing::warn!(
                    path = %store.file_path.display(),
                    found = ?file.key,
                    expected = ?key,
                    "representation cache was built with other settings; rebuilding"
                ),
                Err(e) => tracing::warn!(
                    path = %store.file_path.display(),
                    error = %e,
                    "representation cache unreadable; rebuilding"
                ),
            }
        }

        Ok(store)
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    pub fn built_at(&self) -> Option<DateTime<Utc>> {
        self.built_at
    }

    pub fn entries(&self) -> &[StoredRepresentation] {
        &self.entries
    }

    /// Full path of the image an entry was computed from.
    pub fn identity_path(&self, entry: &StoredRepresentation) -> PathBuf {
        self.db_path.join(&entry.identity)
    }

    /// Keep `path` out of the database even if it lies inside the directory,
    /// e.g. an output file written next to the images.
    pub fn exclude(&mut self, path: &Path) {
        let resolved = resolve(path);
        if resolved.starts_with(resolve(&self.db_path)) {
            tracing::warn!(
                path = %path.display(),
                "output lies inside the database directory; it will not be indexed"
            );
        }
        self.excluded.push(resolved);
    }

    /// Bring the cache in line with the images currently in the directory.
    ///
    /// New images are embedded, deleted ones dropped, and images whose hash
    /// changed are embedded again. The file is only written when something
    /// changed or it does not exist yet.
    pub fn sync(&mut self, engine: &mut FaceEngine) -> Result<SyncReport> {
        let images = list_images(&self.db_path, &self.excluded)?;
        if images.is_empty() {
            return Err(Error::EmptyDatabase(self.db_path.display().to_string()));
        }
        self.sync_images(engine, &images)
    }

    fn sync_images(&mut self, engine: &mut FaceEngine, images: &[PathBuf]) -> Result<SyncReport> {

        let known: HashMap<String, String> = self
            .entries
            .iter()
            .map(|e| (e.identity.clone(), e.hash.clone()))
            .collect();
        let present: HashSet<String> = images
            .iter()
            .map(|p| relative_identity(&self.db_path, p))
            .collect();

        let mut report = SyncReport {
            images: images.len(),
            removed: known.keys().filter(|id| !present.contains(*id)).count(),
            ..SyncReport::default()
        };
        let mut dirty = report.removed > 0;
        self.entries.retain(|e| present.contains(&e.identity));

        for path in images {
            let identity = relative_identity(&self.db_path, path);
            let hash = match file_hash(path) {
                Ok(hash) => hash,
                Err(e) => {
                    tracing::warn!(image = %identity, error = %e, "skipping unreadable file");
                    report.failed += 1;
                    continue;
                }
            };

            let replacing = match known.get(&identity) {
                Some(old) if *old == hash => {
                    report.unchanged += 1;
                    continue;
                }
                Some(_) => {
                    self.entries.retain(|e| e.identity != identity);
                    dirty = true;
                    true
                }
                None => false,
            };

            tracing::debug!(image = %identity, replacing, "embedding database image");
            match engine.represent_path(path) {
                Ok(reps) => {
                    self.entries.extend(reps.into_iter().map(|rep| StoredRepresentation {
                        identity: identity.clone(),
                        hash: hash.clone(),
                        embedding: Some(rep.embedding),
                        target: Some(rep.facial_area),
                    }));
                }
                Err(Error::NoFaceDetected(_)) => {
                    tracing::warn!(image = %identity, "no face detected; stored without embedding");
                    report.without_face += 1;
                    self.entries.push(StoredRepresentation {
                        identity: identity.clone(),
                        hash,
                        embedding: None,
                        target: None,
                    });
                }
                Err(Error::Image { path, source }) => {
                    tracing::warn!(image = %path, error = %source, "skipping unreadable image");
                    report.failed += 1;
                    continue;
                }
                Err(e) => return Err(e),
            }

            dirty = true;
            if replacing {
                report.replaced += 1;
            } else {
                report.added += 1;
            }
        }

        if dirty || !self.file_path.exists() {
            self.entries.sort_by(|a, b| a.identity.cmp(&b.identity));
            self.save()?;
            report.written = true;
        }

        tracing::info!(
            images = report.images,
            added = report.added,
            removed = report.removed,
            replaced = report.replaced,
            unchanged = report.unchanged,
            written = report.written,
            "representation cache synced"
        );
        Ok(report)
    }

    fn save(&mut self) -> Result<()> {
        let built_at = Utc::now();
        let file = RepresentationFileOut {
            key: self.key,
            built_at,
            entries: &self.entries,
        };
        let tmp = self.file_path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec(&file)?)?;
        fs::rename(&tmp, &self.file_path)?;
        self.built_at = Some(built_at);
        tracing::debug!(path = %self.file_path.display(), "representation cache written");
        Ok(())
    }
}

/// Image files under `db_path`, recursively, in a stable order.
fn list_images(db_path: &Path, excluded: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut images = Vec::new();
    for entry in WalkDir::new(db_path).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let is_image = entry
            .path()
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| IMAGE_EXTENSIONS.iter().any(|ext| e.eq_ignore_ascii_case(ext)));
        if !is_image {
            continue;
        }
        if !excluded.is_empty() && excluded.contains(&resolve(entry.path())) {
            tracing::debug!(path = %entry.path().display(), "skipping excluded file");
            continue;
        }
        images.push(entry.into_path());
    }
    Ok(images)
}

/// Absolute form of `path` with symlinks resolved, also for files that do
/// not exist yet.
fn resolve(path: &Path) -> PathBuf {
    if let Ok(resolved) = fs::canonicalize(path) {
        return resolved;
    }
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    match (fs::canonicalize(parent), path.file_name()) {
        (Ok(dir), Some(name)) => dir.join(name),
        _ => path.to_path_buf(),
    }
}

fn relative_identity(db_path: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(db_path).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn file_hash(path: &Path) -> Result<String> {
    let bytes = fs::read(path)?;
    Ok(format!("{:x}", Sha256::digest(&bytes)))
}
