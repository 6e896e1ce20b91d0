use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::SystemTime;

use filetime::FileTime;
use tempfile::NamedTempFile;

use super::{CacheContents, CacheError, Freshness};

/// Name of the subdirectory holding in-flight temporary files.
///
/// New cache files are written here and atomically persisted into the cache
/// directory proper. The subdirectory is cleared on construction so that a
/// hard crash cannot leak temp files into the accounting.
const TMP_DIR: &str = "tmp";

/// The warm tier: encoded payloads persisted as one regular file per entry.
///
/// File names are the sanitized printable key plus the codec's extension.
/// Byte accounting mirrors the filesystem: the in-memory counter is
/// authoritative within a run, the enumerated size sum at construction.
/// Purging orders by mtime ascending, which hits bump, giving LRU; the
/// freshness predicate uses the file's birth time where the platform
/// reports one.
///
/// Operations return their I/O failures for the caller to report; they
/// never leave the accounting out of step with the steps that did succeed.
#[derive(Debug)]
pub(crate) struct DiskTier {
    cache_dir: PathBuf,
    tmp_dir: PathBuf,
    limit: u64,
    total_cost: u64,
}

struct ScannedFile {
    path: PathBuf,
    size: u64,
    modified: SystemTime,
}

impl DiskTier {
    pub fn new(cache_dir: PathBuf, limit: u64) -> io::Result<Self> {
        fs::create_dir_all(&cache_dir)?;

        let tmp_dir = cache_dir.join(TMP_DIR);
        if tmp_dir.exists() {
            fs::remove_dir_all(&tmp_dir)?;
        }
        fs::create_dir_all(&tmp_dir)?;

        let mut tier = DiskTier {
            cache_dir,
            tmp_dir,
            limit,
            total_cost: 0,
        };
        tier.total_cost = tier.scan_files()?.iter().map(|f| f.size).sum();
        Ok(tier)
    }

    fn entry_path(&self, stem: &str, extension: &str) -> PathBuf {
        self.cache_dir.join(format!("{stem}.{extension}"))
    }

    /// Looks up an entry, returning its bytes and original insertion time.
    ///
    /// A hit bumps the file's mtime so that purging treats it as recently
    /// used.
    pub fn get(
        &mut self,
        stem: &str,
        extension: &str,
        freshness: &Freshness,
    ) -> CacheContents<Option<(Vec<u8>, SystemTime)>> {
        let path = self.entry_path(stem, extension);
        let metadata = match path.metadata() {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let modified = metadata.modified()?;
        // Birth times do not exist pre-Linux 4.11 and on some filesystems;
        // fall back to mtime and accept cached_at == accessed_at there.
        let cached_at = metadata.created().unwrap_or(modified);
        if !freshness.passes(cached_at) {
            return Ok(None);
        }

        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if let Err(e) = filetime::set_file_mtime(&path, FileTime::now()) {
            tracing::debug!(
                error = &e as &dyn std::error::Error,
                path = %path.display(),
                "failed to bump mtime on cache hit",
            );
        }
        Ok(Some((bytes, cached_at)))
    }

    /// Writes an entry atomically, re-accounting any file it replaces.
    ///
    /// A failure leaves the tier unmodified up to the failing step.
    pub fn put(&mut self, stem: &str, extension: &str, bytes: &[u8]) -> CacheContents<()> {
        let path = self.entry_path(stem, extension);
        match path.metadata() {
            Ok(metadata) => {
                fs::remove_file(&path)?;
                self.total_cost = self.total_cost.saturating_sub(metadata.len());
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        // The tmp dir may have been swept away externally; recreate before
        // every write like the rest of the directory lifecycle.
        fs::create_dir_all(&self.tmp_dir)?;
        let mut temp_file = NamedTempFile::new_in(&self.tmp_dir)?;
        temp_file.write_all(bytes)?;
        temp_file
            .persist(&path)
            .map_err(|e| CacheError::from(e.error))?;

        self.total_cost += bytes.len() as u64;
        if self.total_cost > self.limit {
            self.purge_to(self.limit * 3 / 4);
        }
        Ok(())
    }

    /// Deletes an entry; missing files are ignored.
    pub fn remove(&mut self, stem: &str, extension: &str) -> CacheContents<()> {
        let path = self.entry_path(stem, extension);
        let size = match path.metadata() {
            Ok(metadata) => metadata.len(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        self.total_cost = self.total_cost.saturating_sub(size);
        Ok(())
    }

    /// Deletes the cache directory tree and recreates it empty.
    pub fn clear(&mut self) -> CacheContents<()> {
        match fs::remove_dir_all(&self.cache_dir) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        fs::create_dir_all(&self.tmp_dir)?;
        self.total_cost = 0;
        Ok(())
    }

    /// Deletes files in ascending mtime order until `total_cost <= target`.
    ///
    /// Individual failures are logged and skipped; the purge keeps going so
    /// a single stuck file cannot pin the tier over its limit.
    pub fn purge_to(&mut self, target: u64) {
        if self.total_cost <= target {
            return;
        }
        let mut files = match self.scan_files() {
            Ok(files) => files,
            Err(e) => {
                tracing::error!(
                    error = &e as &dyn std::error::Error,
                    path = %self.cache_dir.display(),
                    "failed to enumerate cache directory for purge",
                );
                return;
            }
        };
        files.sort_by_key(|file| file.modified);

        for file in files {
            if self.total_cost <= target {
                break;
            }
            match fs::remove_file(&file.path) {
                Ok(()) => self.total_cost = self.total_cost.saturating_sub(file.size),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    self.total_cost = self.total_cost.saturating_sub(file.size);
                }
                Err(e) => tracing::error!(
                    error = &e as &dyn std::error::Error,
                    path = %file.path.display(),
                    "failed to purge cache file",
                ),
            }
        }
    }

    /// Enumerates regular files at the top level of the cache directory.
    ///
    /// The tmp subdirectory (and anything else that is not a file) is
    /// excluded from accounting.
    fn scan_files(&self) -> io::Result<Vec<ScannedFile>> {
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.cache_dir)? {
            let entry = entry?;
            let metadata = entry.metadata()?;
            if !metadata.is_file() {
                continue;
            }
            files.push(ScannedFile {
                path: entry.path(),
                size: metadata.len(),
                modified: metadata.modified()?,
            });
        }
        Ok(files)
    }

    pub fn total_cost(&self) -> u64 {
        self.total_cost
    }
}
