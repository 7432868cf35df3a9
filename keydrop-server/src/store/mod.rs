//! Object store on the local filesystem
//!
//! Objects live as flat files directly under the store root. The physical
//! location handed back by [`ObjectStore::put`] is the file name relative to
//! that root. Bytes are streamed in both directions; nothing is buffered
//! beyond one chunk plus a short head kept for content sniffing.
//!
//! Writes go to a `.part` file first and are hard-linked into place only
//! after `sync_all`, so a location either holds a complete object or
//! nothing. Linking fails if the location already exists, so a committed
//! object is never replaced.

mod error;

use std::io;
use std::path::{Component, Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use keydrop_common::CHUNK_SIZE;
use sha2::{Digest, Sha256};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, ReadBuf};
use tokio::time::timeout;

use crate::constants::{DATA_DIR_NAME, OBJECTS_DIR_NAME, PART_SUFFIX};

pub use error::StoreError;

/// How many leading bytes of each object are kept for MIME sniffing
pub const SNIFF_LENGTH: usize = 8192;

/// Result of a successful [`ObjectStore::put`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    /// Physical location handle for `get`/`delete`
    pub location: String,
    pub size: u64,
    /// Lowercase hex SHA-256 of the content
    pub sha256: String,
    /// First `SNIFF_LENGTH` bytes (or fewer, for short objects)
    pub head: Vec<u8>,
}

/// Readable stream over one stored object
#[derive(Debug)]
pub struct ObjectReader {
    file: File,
    len: u64,
}

impl ObjectReader {
    /// Size of the object on disk
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl AsyncRead for ObjectReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.file).poll_read(cx, buf)
    }
}

/// Byte storage keyed by opaque location handles
#[derive(Debug, Clone)]
pub struct ObjectStore {
    root: PathBuf,
}

/// Get the default object store root for the platform
///
/// - **Linux**: `~/.local/share/keydropd/objects/`
/// - **macOS**: `~/Library/Application Support/keydropd/objects/`
/// - **Windows**: `%APPDATA%\keydropd\objects\`
pub fn default_storage_root() -> Option<PathBuf> {
    dirs::data_dir().map(|dir| dir.join(DATA_DIR_NAME).join(OBJECTS_DIR_NAME))
}

impl ObjectStore {
    /// Open a store rooted at `root`, creating the directory if needed
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root)
            .await
            .map_err(|source| StoreError::Init {
                path: root.clone(),
                source,
            })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Stream `source` into a new object named `storage_name`
    ///
    /// Reads until EOF. More than `limit` bytes fails with
    /// [`StoreError::TooLarge`] and an empty stream with [`StoreError::Empty`].
    /// A source that yields nothing for `progress_timeout` fails with
    /// [`StoreError::Source`]. `on_chunk` is called with the running byte
    /// total after every chunk written. On any failure the partial file is
    /// removed.
    pub async fn put<R, F>(
        &self,
        source: &mut R,
        storage_name: &str,
        limit: u64,
        progress_timeout: Duration,
        mut on_chunk: F,
    ) -> Result<StoredObject, StoreError>
    where
        R: AsyncRead + Unpin,
        F: FnMut(u64),
    {
        let target = self.resolve(storage_name)?;
        let part = self.root.join(format!("{storage_name}{PART_SUFFIX}"));

        // create_new: two writers can never share a partial file
        let mut file = OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&part)
            .await
            .map_err(|source| {
                if source.kind() == io::ErrorKind::AlreadyExists {
                    StoreError::LocationTaken(storage_name.to_string())
                } else {
                    StoreError::Write {
                        location: storage_name.to_string(),
                        source,
                    }
                }
            })?;

        let result = write_stream(
            &mut file,
            source,
            storage_name,
            limit,
            progress_timeout,
            &mut on_chunk,
        )
        .await;
        drop(file);

        let (size, sha256, head) = match result {
            Ok(written) => written,
            Err(e) => {
                remove_quietly(&part).await;
                return Err(e);
            }
        };

        let linked = fs::hard_link(&part, &target).await;
        remove_quietly(&part).await;
        if let Err(source) = linked {
            return Err(if source.kind() == io::ErrorKind::AlreadyExists {
                StoreError::LocationTaken(storage_name.to_string())
            } else {
                StoreError::Write {
                    location: storage_name.to_string(),
                    source,
                }
            });
        }

        Ok(StoredObject {
            location: storage_name.to_string(),
            size,
            sha256,
            head,
        })
    }

    /// Open a stored object for reading
    pub async fn get(&self, location: &str) -> Result<ObjectReader, StoreError> {
        let path = self.resolve(location)?;
        let file = File::open(&path)
            .await
            .map_err(|source| read_error(location, source))?;
        let len = file
            .metadata()
            .await
            .map_err(|source| read_error(location, source))?
            .len();
        Ok(ObjectReader { file, len })
    }

    /// Whether bytes exist at `location`
    pub async fn exists(&self, location: &str) -> Result<bool, StoreError> {
        let path = self.resolve(location)?;
        fs::try_exists(&path)
            .await
            .map_err(|source| read_error(location, source))
    }

    /// Remove a stored object
    ///
    /// Missing bytes are reported as [`StoreError::ObjectNotFound`] so the
    /// caller can surface the drift.
    pub async fn delete(&self, location: &str) -> Result<(), StoreError> {
        let path = self.resolve(location)?;
        fs::remove_file(&path).await.map_err(|source| {
            if source.kind() == io::ErrorKind::NotFound {
                StoreError::ObjectNotFound(location.to_string())
            } else {
                StoreError::Delete {
                    location: location.to_string(),
                    source,
                }
            }
        })
    }

    /// Remove `.part` files left behind by a crash
    ///
    /// Returns how many were removed.
    pub async fn sweep_partials(&self) -> Result<usize, StoreError> {
        let mut removed = 0;
        let mut entries = fs::read_dir(&self.root)
            .await
            .map_err(|source| StoreError::Init {
                path: self.root.clone(),
                source,
            })?;

        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(source) => {
                    return Err(StoreError::Init {
                        path: self.root.clone(),
                        source,
                    });
                }
            };
            if !entry.file_name().to_string_lossy().ends_with(PART_SUFFIX) {
                continue;
            }
            match fs::remove_file(entry.path()).await {
                Ok(()) => removed += 1,
                Err(e) => {
                    tracing::warn!(path = %entry.path().display(), error = %e, "failed to remove partial object");
                }
            }
        }
        Ok(removed)
    }

    /// Map a location handle to a path directly under the root
    fn resolve(&self, location: &str) -> Result<PathBuf, StoreError> {
        if !is_valid_location(location) {
            return Err(StoreError::InvalidLocation(location.to_string()));
        }
        Ok(self.root.join(location))
    }
}

/// A location is exactly one normal path component that is not a partial
fn is_valid_location(location: &str) -> bool {
    if location.is_empty() || location.ends_with(PART_SUFFIX) || location.contains(['/', '\\']) {
        return false;
    }
    let mut components = Path::new(location).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

async fn write_stream<R, F>(
    file: &mut File,
    source: &mut R,
    location: &str,
    limit: u64,
    progress_timeout: Duration,
    on_chunk: &mut F,
) -> Result<(u64, String, Vec<u8>), StoreError>
where
    R: AsyncRead + Unpin,
    F: FnMut(u64),
{
    let mut hasher = Sha256::new();
    let mut head = Vec::new();
    let mut buffer = vec![0u8; CHUNK_SIZE];
    let mut total: u64 = 0;

    loop {
        let n = match timeout(progress_timeout, source.read(&mut buffer)).await {
            Ok(Ok(n)) => n,
            Ok(Err(source)) => return Err(StoreError::Source { bytes: total, source }),
            Err(_) => {
                return Err(StoreError::Source {
                    bytes: total,
                    source: io::Error::new(io::ErrorKind::TimedOut, "read timeout"),
                });
            }
        };
        if n == 0 {
            break;
        }

        total += n as u64;
        if total > limit {
            return Err(StoreError::TooLarge { limit });
        }

        let chunk = &buffer[..n];
        file.write_all(chunk)
            .await
            .map_err(|source| StoreError::Write {
                location: location.to_string(),
                source,
            })?;
        hasher.update(chunk);
        if head.len() < SNIFF_LENGTH {
            let take = (SNIFF_LENGTH - head.len()).min(n);
            head.extend_from_slice(&chunk[..take]);
        }

        on_chunk(total);
    }

    if total == 0 {
        return Err(StoreError::Empty);
    }

    file.sync_all().await.map_err(|source| StoreError::Write {
        location: location.to_string(),
        source,
    })?;

    Ok((total, hex::encode(hasher.finalize()), head))
}

fn read_error(location: &str, source: io::Error) -> StoreError {
    if source.kind() == io::ErrorKind::NotFound {
        StoreError::ObjectNotFound(location.to_string())
    } else {
        StoreError::Read {
            location: location.to_string(),
            source,
        }
    }
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = fs::remove_file(path).await {
        tracing::warn!(path = %path.display(), error = %e, "failed to remove partial object");
    }
}
