//! Flat-file index persistence under the registry root path.
//!
//! Each index is stored as a single `.midx` file at
//! `<root>/<database>/<table>/<id>.midx`: a fixed header (magic bytes and
//! format version), the fingerprint table, then length-prefixed
//! `(key, locations)` records. Files are written through a temp file and
//! an atomic rename so a crashed save never leaves a partial index visible
//! to [`load`](crate::IndexDriver::load).

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::driver::{CancellationToken, IndexDriver};
use crate::error::{Error, Result};
use crate::fingerprint::{Fingerprint, FINGERPRINT_LEN};
use crate::index::{Index, KeyValueIter};
use crate::memory::{encode_key, MemoryIndex};
use crate::types::DriverConfig;

/// Index file magic ("MIDX").
const MIDX_MAGIC: [u8; 4] = *b"MIDX";
/// Index file format version.
const MIDX_VERSION: u16 = 1;
/// Index file extension.
const MIDX_EXTENSION: &str = "midx";

/// A driver that persists indexes as flat files under a root path.
pub struct DiskDriver {
    root: PathBuf,
}

impl DiskDriver {
    /// The id this driver registers under.
    pub const ID: &'static str = "disk";

    /// Creates a driver rooted at the given path. The path is created
    /// lazily on the first save.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn index_path(&self, db: &str, table: &str, id: &str) -> PathBuf {
        self.root
            .join(db)
            .join(table)
            .join(format!("{id}.{MIDX_EXTENSION}"))
    }

    fn write_index(&self, index: &MemoryIndex) -> Result<()> {
        let path = self.index_path(index.database(), index.table(), index.id());
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let temp_path = path.with_extension("midx.tmp");
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)?;

        // A failed write must not leave the temp file behind.
        if let Err(err) = write_payload(BufWriter::new(file), index) {
            let _ = fs::remove_file(&temp_path);
            return Err(err);
        }
        if let Err(err) = fs::rename(&temp_path, &path) {
            let _ = fs::remove_file(&temp_path);
            return Err(err.into());
        }

        debug!(path = %path.display(), "index saved");
        Ok(())
    }

    fn read_index(&self, db: &str, table: &str, id: &str, path: &Path) -> Result<MemoryIndex> {
        let mut reader = BufReader::new(File::open(path)?);

        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if magic != MIDX_MAGIC {
            return Err(Error::Corrupted(format!(
                "bad magic in {}",
                path.display()
            )));
        }
        let version = read_u16(&mut reader)?;
        if version != MIDX_VERSION {
            return Err(Error::Corrupted(format!(
                "unsupported index file version {version} in {}",
                path.display()
            )));
        }

        let fingerprint_count = read_u32(&mut reader)? as usize;
        let mut fingerprints = Vec::with_capacity(fingerprint_count);
        for _ in 0..fingerprint_count {
            let mut digest = [0u8; FINGERPRINT_LEN];
            reader.read_exact(&mut digest)?;
            fingerprints.push(Fingerprint::from_bytes(digest));
        }

        let index = MemoryIndex::new(db, table, id, fingerprints);
        let entry_count = read_u32(&mut reader)? as usize;
        for _ in 0..entry_count {
            let key = read_bytes(&mut reader)?;
            let location_count = read_u32(&mut reader)? as usize;
            for _ in 0..location_count {
                index.insert(key.clone(), read_bytes(&mut reader)?);
            }
        }

        Ok(index)
    }
}

impl IndexDriver for DiskDriver {
    fn id(&self) -> &str {
        Self::ID
    }

    fn create(
        &self,
        db: &str,
        table: &str,
        id: &str,
        fingerprints: Vec<Fingerprint>,
        _config: DriverConfig,
    ) -> Result<Box<dyn Index>> {
        // No options recognized yet; the map is accepted for interface
        // compatibility.
        Ok(Box::new(MemoryIndex::new(db, table, id, fingerprints)))
    }

    fn load(&self, db: &str, table: &str) -> Result<Vec<Box<dyn Index>>> {
        let dir = self.root.join(db).join(table);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut indexes: Vec<Box<dyn Index>> = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(MIDX_EXTENSION) {
                continue;
            }
            let id = match path.file_stem().and_then(|s| s.to_str()) {
                Some(stem) => stem.to_string(),
                None => continue,
            };
            indexes.push(Box::new(self.read_index(db, table, &id, &path)?));
        }

        debug!(db, table, count = indexes.len(), "indexes loaded from disk");
        Ok(indexes)
    }

    fn save(
        &self,
        token: &CancellationToken,
        index: &dyn Index,
        iter: &mut dyn KeyValueIter,
    ) -> Result<()> {
        let snapshot = MemoryIndex::new(
            index.database(),
            index.table(),
            index.id(),
            index.fingerprints().to_vec(),
        );

        loop {
            if token.is_canceled() {
                iter.close()?;
                return Err(Error::Canceled);
            }
            match iter.next()? {
                Some((columns, location)) => snapshot.insert(encode_key(&columns), location),
                None => break,
            }
        }
        iter.close()?;

        self.write_index(&snapshot)
    }

    fn delete(&self, index: &dyn Index) -> Result<()> {
        let path = self.index_path(index.database(), index.table(), index.id());
        match fs::remove_file(&path) {
            Ok(()) => {
                // Prune now-empty table and database directories; a
                // remove_dir on an occupied or missing directory fails and
                // is ignored.
                let _ = fs::remove_dir(self.root.join(index.database()).join(index.table()));
                let _ = fs::remove_dir(self.root.join(index.database()));
                debug!(path = %path.display(), "index file removed");
                Ok(())
            }
            // Deleting an index that was never saved is not an error.
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

fn write_payload(mut writer: BufWriter<File>, index: &MemoryIndex) -> Result<()> {
    writer.write_all(&MIDX_MAGIC)?;
    writer.write_all(&MIDX_VERSION.to_be_bytes())?;

    let fingerprints = index.fingerprints();
    writer.write_all(&(fingerprints.len() as u32).to_be_bytes())?;
    for fingerprint in fingerprints {
        writer.write_all(fingerprint.as_bytes())?;
    }

    let entries = index.snapshot();
    writer.write_all(&(entries.len() as u32).to_be_bytes())?;
    for (key, locations) in entries {
        writer.write_all(&(key.len() as u32).to_be_bytes())?;
        writer.write_all(&key)?;
        writer.write_all(&(locations.len() as u32).to_be_bytes())?;
        for location in locations {
            writer.write_all(&(location.len() as u32).to_be_bytes())?;
            writer.write_all(&location)?;
        }
    }

    writer.flush()?;
    writer.get_ref().sync_all()?;
    Ok(())
}

fn read_u16(reader: &mut impl Read) -> Result<u16> {
    let mut buf = [0u8; 2];
    reader.read_exact(&mut buf)?;
    Ok(u16::from_be_bytes(buf))
}

fn read_u32(reader: &mut impl Read) -> Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_be_bytes(buf))
}

fn read_bytes(reader: &mut impl Read) -> Result<Vec<u8>> {
    let len = read_u32(reader)? as usize;
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}
