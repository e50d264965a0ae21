use crate::objectstore::{ObjectStore, ObjectStoreError, ObjectStoreResult};
use sha2::{Digest, Sha256};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

/// Object store keeping one file per object in a directory
pub struct FilesystemObjectStore {
    dir: PathBuf,
}

impl FilesystemObjectStore {
    /// Opens the store, creating `dir` if needed
    pub fn new(dir: &Path) -> ObjectStoreResult<Self> {
        fs::create_dir_all(dir).map_err(|source| ObjectStoreError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn object_path(&self, id: &str) -> ObjectStoreResult<PathBuf> {
        if id.is_empty() {
            return Err(ObjectStoreError::EmptyKey);
        }

        if id == "." || id == ".." || id.contains(['/', '\\']) {
            return Err(ObjectStoreError::InvalidKey(id.to_string()));
        }

        Ok(self.dir.join(id))
    }
}

/// Forwards writes to a file while hashing them
struct HashingWriter<'a> {
    file: &'a mut File,
    hasher: Sha256,
}

impl Write for HashingWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.file.write(buf)?;
        self.hasher.update(&buf[..written]);
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl ObjectStore for FilesystemObjectStore {
    fn put(&self, id: &str, source: &mut dyn Read) -> ObjectStoreResult<String> {
        let path = self.object_path(id)?;

        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(ObjectStoreError::AlreadyExists(id.to_string()))
            }
            Err(source) => return Err(ObjectStoreError::Io { path, source }),
        };

        let mut writer = HashingWriter {
            file: &mut file,
            hasher: Sha256::new(),
        };

        let copied = io::copy(source, &mut writer).and_then(|_| writer.flush());
        if let Err(source) = copied {
            let _ = fs::remove_file(&path);
            return Err(ObjectStoreError::Io { path, source });
        }

        Ok(hex::encode(writer.hasher.finalize()))
    }

    fn get(&self, id: &str) -> ObjectStoreResult<File> {
        let path = self.object_path(id)?;

        File::open(&path).map_err(|source| match source.kind() {
            io::ErrorKind::NotFound => ObjectStoreError::NotFound(id.to_string()),
            _ => ObjectStoreError::Io { path, source },
        })
    }

    fn delete(&self, id: &str) -> ObjectStoreResult<()> {
        let path = self.object_path(id)?;

        fs::remove_file(&path).map_err(|source| match source.kind() {
            io::ErrorKind::NotFound => ObjectStoreError::NotFound(id.to_string()),
            _ => ObjectStoreError::Io { path, source },
        })
    }
}
