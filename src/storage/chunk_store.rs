//! Memory-mapped chunk files, one per document.
//!
//! # Storage Format
//!
//! `documents/<doc_id>.chunks` is a headerless array of fixed-size
//! little-endian records:
//!
//! ```text
//! start_offset: u32 | end_offset: u32 | embedding: f32 x D
//! ```
//!
//! Record size is `8 + 4D` and the record count is `file size / record size`.
//! Files are written once when the document is ingested and never modified.

use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use memmap2::{Mmap, MmapOptions};

use crate::error::{ErrorContext, IndexError, IndexResult, Missing};
use crate::storage::atomic;
use crate::storage::codec::{BYTES_PER_F32, BYTES_PER_U32, f32_values, read_u32};
use crate::vector::{ChunkIndex, ChunkRecord, DocId, VectorDimension};

/// File extension of chunk files.
pub const CHUNK_EXTENSION: &str = "chunks";

/// Bytes occupied by the two offsets preceding each embedding.
const OFFSETS_SIZE: usize = 2 * BYTES_PER_U32;

/// Size in bytes of one chunk record for `dimension`.
pub fn record_size(dimension: VectorDimension) -> usize {
    OFFSETS_SIZE + dimension.get() * BYTES_PER_F32
}

/// Creates and opens the chunk files of one index.
#[derive(Debug, Clone)]
pub struct ChunkStore {
    dir: PathBuf,
    dimension: VectorDimension,
}

impl ChunkStore {
    /// Creates a store rooted at `dir` (usually `<index>/documents`).
    pub fn new(dir: impl Into<PathBuf>, dimension: VectorDimension) -> Self {
        Self {
            dir: dir.into(),
            dimension,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn dimension(&self) -> VectorDimension {
        self.dimension
    }

    pub fn path_for(&self, doc_id: DocId) -> PathBuf {
        self.dir.join(format!("{doc_id}.{CHUNK_EXTENSION}"))
    }

    pub fn exists(&self, doc_id: DocId) -> bool {
        self.path_for(doc_id).is_file()
    }

    /// Writes all chunk records of a document and syncs them to disk.
    ///
    /// Every embedding is validated before anything touches the filesystem,
    /// so a `DimensionMismatch` leaves no file behind.
    ///
    /// # Errors
    /// - `DimensionMismatch` if any embedding is not D long
    /// - `ChunkFileExists` if the document already has a chunk file
    /// - `FileWrite` on IO failure
    pub fn create(&self, doc_id: DocId, chunks: &[ChunkRecord]) -> IndexResult<usize> {
        for chunk in chunks {
            self.dimension.validate_vector(&chunk.embedding)?;
        }

        let path = self.path_for(doc_id);
        if path.exists() {
            return Err(IndexError::ChunkFileExists { doc_id, path });
        }

        let temp = atomic::temp_file_beside(&path)?;
        {
            let mut writer = BufWriter::new(temp.as_file());
            for chunk in chunks {
                writer
                    .write_all(&chunk.start_offset.to_le_bytes())
                    .write_context(&path)?;
                writer
                    .write_all(&chunk.end_offset.to_le_bytes())
                    .write_context(&path)?;
                for value in &chunk.embedding {
                    writer.write_all(&value.to_le_bytes()).write_context(&path)?;
                }
            }
            writer.flush().write_context(&path)?;
        }

        atomic::commit_new(temp, &path).map_err(|e| match e {
            IndexError::FileWrite { source, .. }
                if source.kind() == std::io::ErrorKind::AlreadyExists =>
            {
                IndexError::ChunkFileExists {
                    doc_id,
                    path: path.clone(),
                }
            }
            other => other,
        })?;

        tracing::debug!(
            "wrote {} chunk records for document {doc_id} to {}",
            chunks.len(),
            path.display()
        );
        Ok(chunks.len())
    }

    /// Memory-maps a document's chunk file read-only.
    ///
    /// # Errors
    /// - `NotFound` if the file does not exist
    /// - `CorruptFormat` if the size is not a multiple of the record size
    pub fn open(&self, doc_id: DocId) -> IndexResult<ChunkFile> {
        let path = self.path_for(doc_id);
        let file = match std::fs::File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(IndexError::not_found(Missing::ChunkFile { doc_id, path }));
            }
            Err(e) => return Err(e).read_context(&path),
        };

        let len = file.metadata().read_context(&path)?.len() as usize;
        let record_size = record_size(self.dimension);
        if len % record_size != 0 {
            return Err(IndexError::corrupt(
                &path,
                format!(
                    "size {len} is not a multiple of the {record_size}-byte record size (dimension {})",
                    self.dimension.get()
                ),
            ));
        }

        // Zero-length files cannot be mapped on every platform
        let mmap = if len == 0 {
            None
        } else {
            Some(unsafe { MmapOptions::new().map(&file) }.read_context(&path)?)
        };

        Ok(ChunkFile {
            doc_id,
            path,
            mmap,
            dimension: self.dimension,
            record_count: len / record_size,
        })
    }
}

/// A read-only mapping of one document's chunk records.
#[derive(Debug)]
pub struct ChunkFile {
    doc_id: DocId,
    path: PathBuf,
    mmap: Option<Mmap>,
    dimension: VectorDimension,
    record_count: usize,
}

impl ChunkFile {
    pub fn doc_id(&self) -> DocId {
        self.doc_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.record_count
    }

    pub fn is_empty(&self) -> bool {
        self.record_count == 0
    }

    /// Borrowed view of one record.
    ///
    /// # Errors
    /// `NotFound` if `chunk_index` is past the last record.
    pub fn get(&self, chunk_index: ChunkIndex) -> IndexResult<ChunkView<'_>> {
        let index = chunk_index.as_usize();
        if index >= self.record_count {
            return Err(IndexError::not_found(Missing::Chunk {
                doc_id: self.doc_id,
                chunk_index,
                record_count: self.record_count,
            }));
        }
        Ok(self.view_at(index))
    }

    /// Iterates over every record in file order.
    pub fn iter(&self) -> impl ExactSizeIterator<Item = ChunkView<'_>> + '_ {
        (0..self.record_count).map(move |i| self.view_at(i))
    }

    fn view_at(&self, index: usize) -> ChunkView<'_> {
        let record_size = record_size(self.dimension);
        let start = index * record_size;
        let bytes = match &self.mmap {
            Some(mmap) => &mmap[start..start + record_size],
            None => &[],
        };
        ChunkView {
            chunk_index: ChunkIndex::new(index as u32),
            bytes,
        }
    }
}

/// Zero-copy view of a chunk record inside a mapping.
#[derive(Debug, Clone, Copy)]
pub struct ChunkView<'a> {
    chunk_index: ChunkIndex,
    bytes: &'a [u8],
}

impl<'a> ChunkView<'a> {
    pub fn chunk_index(&self) -> ChunkIndex {
        self.chunk_index
    }

    pub fn start_offset(&self) -> u32 {
        read_u32(self.bytes, 0)
    }

    pub fn end_offset(&self) -> u32 {
        read_u32(self.bytes, BYTES_PER_U32)
    }

    /// Embedding values, decoded lazily from the mapping.
    pub fn embedding(&self) -> impl ExactSizeIterator<Item = f32> + 'a {
        f32_values(&self.bytes[OFFSETS_SIZE..])
    }

    /// Dot product with `query`, without materializing the embedding.
    pub fn dot(&self, query: &[f32]) -> f32 {
        debug_assert_eq!(query.len(), self.embedding().len());
        self.embedding().zip(query).map(|(a, b)| a * b).sum()
    }

    /// Copies the record out of the mapping.
    pub fn to_record(&self) -> ChunkRecord {
        ChunkRecord::new(
            self.start_offset(),
            self.end_offset(),
            self.embedding().collect(),
        )
    }
}
