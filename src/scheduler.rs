//! Batch scheduling of per-file compaction
//!
//! The file list is cut into contiguous batches of `⌈N/P⌉` files. Each batch
//! runs on its own [`CompactorChain`] instance inside a `rayon` pool of size
//! `P`; batches share nothing but the read-only chain factory. Results are
//! joined in batch-submission order, so the entry sequence never depends on
//! which worker finished first.

use crate::archive::format::{Compression, FileEntry, PERMISSION_MASK};
use crate::compactor::{ChainConfig, CompactionWarning, CompactorChain};
use crate::error::{PharError, Result};
use crate::symbols::SymbolsRegistry;
use rayon::prelude::*;
use std::any::Any;
use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Where a source file's bytes come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceData {
    Bytes(Vec<u8>),
    /// Read by the worker that compacts the file
    Disk(PathBuf),
}

/// One input file of a build
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    /// Path inside the archive
    pub path: String,
    pub data: SourceData,
    /// Explicit timestamp; defaults to the disk mtime or the build clock
    pub modified: Option<u32>,
    /// Explicit permission bits; defaults to the disk mode or 0644
    pub permissions: Option<u32>,
}

impl SourceFile {
    pub fn from_bytes(path: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            data: SourceData::Bytes(bytes.into()),
            modified: None,
            permissions: None,
        }
    }

    pub fn from_disk(path: impl Into<String>, source: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            data: SourceData::Disk(source.into()),
            modified: None,
            permissions: None,
        }
    }

    pub fn with_modified(mut self, timestamp: u32) -> Self {
        self.modified = Some(timestamp);
        self
    }

    pub fn with_permissions(mut self, permissions: u32) -> Self {
        self.permissions = Some(permissions & PERMISSION_MASK);
        self
    }

    fn load(&self) -> Result<LoadedSource> {
        match &self.data {
            SourceData::Bytes(bytes) => Ok(LoadedSource {
                bytes: bytes.clone(),
                modified: None,
                permissions: None,
            }),
            SourceData::Disk(path) => {
                let read_error = |source| PharError::SourceRead {
                    path: path.clone(),
                    source,
                };
                let metadata = std::fs::metadata(path).map_err(read_error)?;
                let bytes = std::fs::read(path).map_err(read_error)?;
                Ok(LoadedSource {
                    bytes,
                    modified: metadata
                        .modified()
                        .ok()
                        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                        .map(|d| d.as_secs().min(u64::from(u32::MAX)) as u32),
                    permissions: disk_permissions(&metadata),
                })
            }
        }
    }
}

struct LoadedSource {
    bytes: Vec<u8>,
    modified: Option<u32>,
    permissions: Option<u32>,
}

#[cfg(unix)]
fn disk_permissions(metadata: &std::fs::Metadata) -> Option<u32> {
    use std::os::unix::fs::PermissionsExt;
    Some(metadata.permissions().mode() & PERMISSION_MASK)
}

#[cfg(not(unix))]
fn disk_permissions(_metadata: &std::fs::Metadata) -> Option<u32> {
    None
}

/// Normalize an archive path: forward slashes, no leading `/` or `./`,
/// no empty or `.` components. `..` is rejected.
pub fn normalize_archive_path(path: &str) -> Result<String> {
    let unified = path.replace('\\', "/");
    let mut parts = Vec::new();
    for part in unified.split('/') {
        match part {
            "" | "." => continue,
            ".." => {
                return Err(PharError::PathError(format!(
                    "parent directory reference in {}",
                    path
                )))
            }
            other => parts.push(other),
        }
    }
    if parts.is_empty() {
        return Err(PharError::PathError(format!("empty archive path: {:?}", path)));
    }
    Ok(parts.join("/"))
}

/// A contiguous slice of the file list assigned to one worker
#[derive(Debug, Clone, Copy)]
pub struct Batch<'a> {
    pub index: usize,
    pub files: &'a [SourceFile],
}

/// What one worker hands back
#[derive(Debug, Default)]
pub struct BatchResult {
    pub index: usize,
    pub entries: Vec<FileEntry>,
    pub symbols: SymbolsRegistry,
    pub warnings: Vec<CompactionWarning>,
    /// Set when the batch stopped early because another batch failed
    pub abandoned: bool,
}

impl BatchResult {
    fn abandoned(index: usize) -> Self {
        Self {
            index,
            abandoned: true,
            ..Default::default()
        }
    }
}

/// Aggregated output of a successful run
#[derive(Debug, Default)]
pub struct ScheduleOutcome {
    /// Entries in input order
    pub entries: Vec<FileEntry>,
    pub symbols: SymbolsRegistry,
    pub warnings: Vec<CompactionWarning>,
}

type ChainFactory = Arc<dyn Fn() -> CompactorChain + Send + Sync>;

/// Splits the file list into batches and compacts them on a worker pool
#[derive(Clone)]
pub struct CompactionScheduler {
    factory: ChainFactory,
    parallelism: usize,
    compression: Compression,
    build_time: u32,
}

impl CompactionScheduler {
    /// Scheduler building one chain per batch from `chain`
    pub fn new(chain: ChainConfig, parallelism: usize) -> Self {
        Self::from_factory(move || chain.build(), parallelism)
    }

    /// Scheduler with a custom chain factory
    pub fn from_factory<F>(factory: F, parallelism: usize) -> Self
    where
        F: Fn() -> CompactorChain + Send + Sync + 'static,
    {
        let build_time = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs().min(u64::from(u32::MAX)) as u32)
            .unwrap_or(0);
        Self {
            factory: Arc::new(factory),
            parallelism: parallelism.max(1),
            compression: Compression::None,
            build_time,
        }
    }

    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    /// Timestamp for files that carry none of their own
    pub fn with_build_time(mut self, timestamp: u32) -> Self {
        self.build_time = timestamp;
        self
    }

    pub fn parallelism(&self) -> usize {
        self.parallelism
    }

    /// Partition `files` into at most `P` batches of `⌈N/P⌉` files
    pub fn batches<'a>(&self, files: &'a [SourceFile]) -> Vec<Batch<'a>> {
        if files.is_empty() {
            return Vec::new();
        }
        let size = files.len().div_ceil(self.parallelism);
        files
            .chunks(size)
            .enumerate()
            .map(|(index, files)| Batch { index, files })
            .collect()
    }

    /// Compact every file; the first fatal error discards all results
    pub fn run(&self, mut files: Vec<SourceFile>) -> Result<ScheduleOutcome> {
        let mut seen = HashSet::with_capacity(files.len());
        for file in &mut files {
            file.path = normalize_archive_path(&file.path)?;
            if !seen.insert(file.path.clone()) {
                return Err(PharError::DuplicatePath(file.path.clone()));
            }
        }

        let batches = self.batches(&files);
        tracing::debug!(
            files = files.len(),
            batches = batches.len(),
            parallelism = self.parallelism,
            "scheduling compaction"
        );

        let cancelled = AtomicBool::new(false);
        let results: Vec<Result<BatchResult>> = if self.parallelism <= 1 || batches.len() <= 1 {
            batches
                .into_iter()
                .map(|batch| self.run_guarded(batch, &cancelled))
                .collect()
        } else {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(self.parallelism)
                .thread_name(|i| format!("pharkit-compact-{}", i))
                .build()
                .map_err(|e| PharError::Internal(format!("cannot start worker pool: {}", e)))?;
            pool.install(|| {
                batches
                    .into_par_iter()
                    .map(|batch| self.run_guarded(batch, &cancelled))
                    .collect()
            })
        };

        let results = results.into_iter().collect::<Result<Vec<_>>>()?;
        aggregate(results)
    }

    fn run_guarded(&self, batch: Batch<'_>, cancelled: &AtomicBool) -> Result<BatchResult> {
        let index = batch.index;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.run_batch(batch, cancelled)));
        let result = match outcome {
            Ok(result) => result,
            Err(payload) => Err(PharError::WorkerPanicked {
                batch: index,
                message: panic_message(payload.as_ref()),
            }),
        };
        if let Err(err) = &result {
            cancelled.store(true, Ordering::SeqCst);
            tracing::warn!(batch = index, "batch failed: {}", err);
        }
        result
    }

    fn run_batch(&self, batch: Batch<'_>, cancelled: &AtomicBool) -> Result<BatchResult> {
        let mut chain = (self.factory)();
        let mut entries = Vec::with_capacity(batch.files.len());

        for file in batch.files {
            if cancelled.load(Ordering::SeqCst) {
                tracing::debug!(batch = batch.index, "batch abandoned");
                return Ok(BatchResult::abandoned(batch.index));
            }
            entries.push(self.compact_file(&mut chain, file)?);
        }

        let (symbols, warnings) = chain.into_parts();
        Ok(BatchResult {
            index: batch.index,
            entries,
            symbols,
            warnings,
            abandoned: false,
        })
    }

    fn compact_file(&self, chain: &mut CompactorChain, file: &SourceFile) -> Result<FileEntry> {
        let loaded = file.load()?;
        let compacted = chain.compact(&file.path, &loaded.bytes)?;
        let timestamp = file
            .modified
            .or(loaded.modified)
            .unwrap_or(self.build_time);

        let mut entry = FileEntry::new(
            file.path.clone(),
            loaded.bytes,
            compacted,
            self.compression,
            timestamp,
        )?;
        if let Some(permissions) = file.permissions.or(loaded.permissions) {
            entry = entry.with_permissions(permissions);
        }
        Ok(entry)
    }
}

impl std::fmt::Debug for CompactionScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompactionScheduler")
            .field("parallelism", &self.parallelism)
            .field("compression", &self.compression)
            .field("build_time", &self.build_time)
            .finish()
    }
}

/// Concatenate batch results in batch order and merge their registries
fn aggregate(mut results: Vec<BatchResult>) -> Result<ScheduleOutcome> {
    results.sort_by_key(|r| r.index);

    let mut outcome = ScheduleOutcome::default();
    for result in results {
        if result.abandoned {
            return Err(PharError::Internal(format!(
                "batch {} abandoned without a failing batch",
                result.index
            )));
        }
        outcome.symbols.merge_from(&result.symbols)?;
        outcome.entries.extend(result.entries);
        outcome.warnings.extend(result.warnings);
    }

    tracing::debug!(
        entries = outcome.entries.len(),
        symbols = outcome.symbols.len(),
        warnings = outcome.warnings.len(),
        "aggregated batches"
    );
    Ok(outcome)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Source file list for every regular file under `root`, sorted by path
pub fn collect_directory(root: &Path, prefix: &str) -> Result<Vec<SourceFile>> {
    let mut found = Vec::new();
    walk(root, root, &mut found)?;
    found.sort();

    found
        .into_iter()
        .map(|(relative, absolute)| {
            let path = if prefix.is_empty() {
                relative
            } else {
                format!("{}/{}", prefix.trim_end_matches('/'), relative)
            };
            Ok(SourceFile::from_disk(normalize_archive_path(&path)?, absolute))
        })
        .collect()
}

fn walk(root: &Path, dir: &Path, found: &mut Vec<(String, PathBuf)>) -> Result<()> {
    let read_error = |source| PharError::SourceRead {
        path: dir.to_path_buf(),
        source,
    };
    for entry in std::fs::read_dir(dir).map_err(read_error)? {
        let entry = entry.map_err(read_error)?;
        let path = entry.path();
        let file_type = entry.file_type().map_err(read_error)?;
        if file_type.is_dir() {
            walk(root, &path, found)?;
        } else if file_type.is_file() {
            let relative = path
                .strip_prefix(root)
                .map_err(|e| PharError::PathError(e.to_string()))?;
            found.push((relative.to_string_lossy().replace('\\', "/"), path));
        }
    }
    Ok(())
}
