//! Fixed-capacity cluster files and centroid maintenance.
//!
//! # Storage Format
//!
//! `clusters/cluster_<n>.cluster` holds a single little-endian record:
//!
//! ```text
//! id: i32 | slots: (doc_id: i32, chunk_index: i32) x capacity | centroid: f32 x D | children: f32 x 10
//! ```
//!
//! A slot with `doc_id == 0` is empty. The `children` block is reserved and
//! always written as zeros.
//!
//! Reads map the file; every mutation rewrites the whole record through a
//! temporary file and a rename.

use std::path::{Path, PathBuf};

use memmap2::{Mmap, MmapOptions};

use crate::error::{ErrorContext, IndexError, IndexResult, Missing};
use crate::storage::atomic;
use crate::storage::codec::{BYTES_PER_F32, f32_values, read_i32, write_f32_values, write_i32};
use crate::storage::handle_cache::ChunkCache;
use crate::vector::{
    CHILD_SLOTS, ChunkIndex, ClusterId, DocId, MeanAccumulator, Slot, VectorDimension,
    nearest_centroid,
};

const CLUSTER_PREFIX: &str = "cluster_";
const CLUSTER_EXTENSION: &str = "cluster";

const ID_SIZE: usize = 4;
const SLOT_SIZE: usize = 8;

/// Byte layout of a cluster record for a given capacity and dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClusterLayout {
    capacity: usize,
    dimension: VectorDimension,
}

impl ClusterLayout {
    /// # Errors
    /// `ConfigError` if `capacity` is zero or does not fit an `i32` slot index.
    pub fn new(capacity: usize, dimension: VectorDimension) -> IndexResult<Self> {
        if capacity == 0 || capacity > i32::MAX as usize {
            return Err(IndexError::ConfigError {
                reason: format!("cluster capacity {capacity} is out of range"),
            });
        }
        Ok(Self {
            capacity,
            dimension,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn dimension(&self) -> VectorDimension {
        self.dimension
    }

    /// Total record size: `4 + 8 * capacity + 4 * D + 40`.
    pub fn file_size(&self) -> usize {
        self.children_offset() + CHILD_SLOTS * BYTES_PER_F32
    }

    fn slot_offset(&self, position: usize) -> usize {
        ID_SIZE + position * SLOT_SIZE
    }

    fn centroid_offset(&self) -> usize {
        ID_SIZE + self.capacity * SLOT_SIZE
    }

    fn children_offset(&self) -> usize {
        self.centroid_offset() + self.dimension.get() * BYTES_PER_F32
    }
}

/// Result of placing one reference into a cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotOutcome {
    /// Written at this slot position
    Assigned(usize),
    /// No empty slot was left
    Full,
}

/// One cluster record over any byte buffer.
///
/// `ClusterFile<Mmap>` is the read-only view used by queries;
/// `ClusterFile<Vec<u8>>` is the owned copy mutations are applied to before
/// it is written back.
#[derive(Debug)]
pub struct ClusterFile<B = Mmap> {
    id: ClusterId,
    path: PathBuf,
    layout: ClusterLayout,
    bytes: B,
}

impl<B: AsRef<[u8]>> ClusterFile<B> {
    /// Validates the buffer against `layout`.
    ///
    /// # Errors
    /// `CorruptFormat` on a size mismatch, a non-positive id, or negative slot
    /// values.
    fn from_bytes(path: PathBuf, layout: ClusterLayout, bytes: B) -> IndexResult<Self> {
        let data = bytes.as_ref();
        if data.len() != layout.file_size() {
            return Err(IndexError::corrupt(
                &path,
                format!(
                    "size {} does not match the {}-byte layout (capacity {}, dimension {})",
                    data.len(),
                    layout.file_size(),
                    layout.capacity,
                    layout.dimension.get()
                ),
            ));
        }

        let raw_id = read_i32(data, 0);
        let id = u32::try_from(raw_id)
            .ok()
            .and_then(ClusterId::new)
            .ok_or_else(|| IndexError::corrupt(&path, format!("invalid cluster id {raw_id}")))?;

        for position in 0..layout.capacity {
            let at = layout.slot_offset(position);
            let (doc, chunk) = (read_i32(data, at), read_i32(data, at + 4));
            if doc < 0 || chunk < 0 {
                return Err(IndexError::corrupt(
                    &path,
                    format!("slot {position} holds negative values ({doc}, {chunk})"),
                ));
            }
        }

        Ok(Self {
            id,
            path,
            layout,
            bytes,
        })
    }

    pub fn id(&self) -> ClusterId {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn capacity(&self) -> usize {
        self.layout.capacity
    }

    /// The reference at `position`, or `None` for an empty slot.
    pub fn slot(&self, position: usize) -> Option<Slot> {
        let at = self.layout.slot_offset(position);
        let data = self.bytes.as_ref();
        let doc_id = DocId::new(read_i32(data, at) as u32)?;
        let chunk_index = ChunkIndex::new(read_i32(data, at + 4) as u32);
        Some(Slot::new(doc_id, chunk_index))
    }

    /// Non-empty slots in slot order.
    pub fn members(&self) -> impl Iterator<Item = Slot> + '_ {
        (0..self.layout.capacity).filter_map(move |position| self.slot(position))
    }

    pub fn member_count(&self) -> usize {
        self.members().count()
    }

    pub fn free_slots(&self) -> usize {
        self.layout.capacity - self.member_count()
    }

    /// Centroid values, decoded lazily from the buffer.
    pub fn centroid(&self) -> impl ExactSizeIterator<Item = f32> + '_ {
        let start = self.layout.centroid_offset();
        f32_values(&self.bytes.as_ref()[start..self.layout.children_offset()])
    }

    fn first_empty_slot(&self) -> Option<usize> {
        (0..self.layout.capacity).find(|&position| self.slot(position).is_none())
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> ClusterFile<B> {
    /// Writes `slot` into the first empty position.
    pub fn assign(&mut self, slot: Slot) -> SlotOutcome {
        let Some(position) = self.first_empty_slot() else {
            return SlotOutcome::Full;
        };
        let at = self.layout.slot_offset(position);
        let data = self.bytes.as_mut();
        write_i32(data, at, slot.doc_id.get() as i32);
        write_i32(data, at + 4, slot.chunk_index.get() as i32);
        SlotOutcome::Assigned(position)
    }

    /// Overwrites the centroid.
    pub fn set_centroid(&mut self, centroid: &[f32]) -> IndexResult<()> {
        self.layout.dimension.validate_vector(centroid)?;
        let start = self.layout.centroid_offset();
        let end = self.layout.children_offset();
        write_f32_values(&mut self.bytes.as_mut()[start..end], centroid);
        Ok(())
    }
}

/// Creates, reads and mutates the cluster files of one index.
#[derive(Debug, Clone)]
pub struct ClusterStore {
    dir: PathBuf,
    layout: ClusterLayout,
}

impl ClusterStore {
    /// Creates a store rooted at `dir` (usually `<index>/clusters`).
    pub fn new(dir: impl Into<PathBuf>, layout: ClusterLayout) -> Self {
        Self {
            dir: dir.into(),
            layout,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn layout(&self) -> ClusterLayout {
        self.layout
    }

    pub fn path_for(&self, id: ClusterId) -> PathBuf {
        self.dir.join(format!("{CLUSTER_PREFIX}{id}.{CLUSTER_EXTENSION}"))
    }

    /// Ids of every cluster file, ascending (storage order).
    pub fn cluster_ids(&self) -> IndexResult<Vec<ClusterId>> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e).read_context(&self.dir),
        };

        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry.read_context(&self.dir)?;
            if let Some(id) = parse_cluster_file_name(&entry.file_name().to_string_lossy()) {
                ids.push(id);
            }
        }
        ids.sort_unstable();
        Ok(ids)
    }

    /// Creates cluster 1 with a zero centroid unless any cluster exists.
    ///
    /// Returns `true` if a file was created.
    pub fn create_initial_cluster(&self) -> IndexResult<bool> {
        if !self.cluster_ids()?.is_empty() {
            return Ok(false);
        }
        let zero = vec![0.0; self.layout.dimension.get()];
        self.create_cluster(ClusterId::INITIAL, &zero)?;
        tracing::info!(
            "created initial cluster (capacity {}, dimension {})",
            self.layout.capacity,
            self.layout.dimension.get()
        );
        Ok(true)
    }

    /// Creates an empty cluster seeded with `centroid`.
    ///
    /// # Errors
    /// `DimensionMismatch` for a wrong-length centroid and `FileWrite` if the
    /// cluster already exists.
    pub fn create_cluster(&self, id: ClusterId, centroid: &[f32]) -> IndexResult<()> {
        let path = self.path_for(id);
        let mut record = ClusterFile {
            id,
            path: path.clone(),
            layout: self.layout,
            bytes: vec![0u8; self.layout.file_size()],
        };
        write_i32(&mut record.bytes, 0, id.get() as i32);
        record.set_centroid(centroid)?;

        let mut temp = atomic::temp_file_beside(&path)?;
        std::io::Write::write_all(&mut temp, &record.bytes).write_context(&path)?;
        atomic::commit_new(temp, &path)
    }

    /// Maps a cluster file read-only.
    ///
    /// # Errors
    /// `NotFound` if the cluster does not exist, `CorruptFormat` if it does not
    /// match the store's layout.
    pub fn open(&self, id: ClusterId) -> IndexResult<ClusterFile<Mmap>> {
        let path = self.path_for(id);
        let file = match std::fs::File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(IndexError::not_found(Missing::Cluster(id)));
            }
            Err(e) => return Err(e).read_context(&path),
        };
        let mmap = unsafe { MmapOptions::new().map(&file) }.read_context(&path)?;
        let cluster = ClusterFile::from_bytes(path, self.layout, mmap)?;
        self.check_id(&cluster, id)?;
        Ok(cluster)
    }

    /// Applies `mutate` to an owned copy of the cluster and writes it back
    /// atomically. Nothing is written if `mutate` fails.
    pub fn update<T>(
        &self,
        id: ClusterId,
        mutate: impl FnOnce(&mut ClusterFile<Vec<u8>>) -> IndexResult<T>,
    ) -> IndexResult<T> {
        let path = self.path_for(id);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(IndexError::not_found(Missing::Cluster(id)));
            }
            Err(e) => return Err(e).read_context(&path),
        };
        let mut cluster = ClusterFile::from_bytes(path.clone(), self.layout, bytes)?;
        self.check_id(&cluster, id)?;

        let result = mutate(&mut cluster)?;
        atomic::write_atomic(&path, &cluster.bytes)?;
        Ok(result)
    }

    /// Every centroid in storage order.
    pub fn centroids(&self) -> IndexResult<Vec<(ClusterId, Vec<f32>)>> {
        self.cluster_ids()?
            .into_iter()
            .map(|id| {
                let cluster = self.open(id)?;
                Ok((id, cluster.centroid().collect()))
            })
            .collect()
    }

    /// The cluster whose centroid is nearest to `embedding` (Euclidean).
    ///
    /// Ties go to the lowest cluster id. This is a linear scan over all
    /// cluster files.
    ///
    /// # Errors
    /// `DimensionMismatch` for a wrong-length embedding and
    /// `NotFound(AnyCluster)` when the index has no clusters.
    pub fn nearest_cluster(&self, embedding: &[f32]) -> IndexResult<ClusterId> {
        self.layout.dimension.validate_vector(embedding)?;
        let centroids = self.centroids()?;
        nearest_in(&centroids, embedding)
    }

    /// Places one reference into the first empty slot of `id`.
    ///
    /// # Errors
    /// `ClusterFull` when no slot is empty; occupied slots are never touched.
    pub fn assign_slot(
        &self,
        id: ClusterId,
        doc_id: DocId,
        chunk_index: ChunkIndex,
    ) -> IndexResult<usize> {
        let capacity = self.layout.capacity;
        self.update(id, |cluster| match cluster.assign(Slot::new(doc_id, chunk_index)) {
            SlotOutcome::Assigned(position) => Ok(position),
            SlotOutcome::Full => Err(IndexError::ClusterFull {
                cluster: id,
                capacity,
            }),
        })
    }

    /// Places several references into `id` with a single rewrite.
    ///
    /// References that do not fit come back as `SlotOutcome::Full`; the file
    /// is rewritten only if at least one was placed.
    pub fn assign_slots(&self, id: ClusterId, slots: &[Slot]) -> IndexResult<Vec<SlotOutcome>> {
        let cluster = self.open(id)?;
        let free = cluster.free_slots();
        drop(cluster);

        if free == 0 {
            return Ok(vec![SlotOutcome::Full; slots.len()]);
        }

        self.update(id, |cluster| {
            Ok(slots.iter().map(|slot| cluster.assign(*slot)).collect())
        })
    }

    /// Overwrites the centroid of `id` with the mean of its members'
    /// embeddings, read through `chunks`.
    ///
    /// Returns the member count.
    ///
    /// # Errors
    /// `EmptyCluster` when no slot is filled; `NotFound` when a member
    /// references a missing chunk.
    pub fn recompute_centroid(&self, id: ClusterId, chunks: &ChunkCache) -> IndexResult<usize> {
        let dimension = self.layout.dimension.get();

        self.update(id, |cluster| {
            let mut mean = MeanAccumulator::new(dimension);
            for slot in cluster.members() {
                let file = chunks.handle(slot.doc_id)?;
                let view = file.get(slot.chunk_index)?;
                mean.add(view.embedding());
            }

            let centroid = mean
                .mean()
                .ok_or(IndexError::EmptyCluster { cluster: id })?;
            cluster.set_centroid(&centroid)?;

            tracing::debug!("recomputed centroid of cluster {id} from {} members", mean.count());
            Ok(mean.count())
        })
    }

    fn check_id<B: AsRef<[u8]>>(&self, cluster: &ClusterFile<B>, expected: ClusterId) -> IndexResult<()> {
        if cluster.id != expected {
            return Err(IndexError::corrupt(
                &cluster.path,
                format!("stored id {} does not match file name id {expected}", cluster.id),
            ));
        }
        Ok(())
    }
}

/// Arg-min over already loaded centroids, first wins ties.
pub(crate) fn nearest_in(
    centroids: &[(ClusterId, Vec<f32>)],
    embedding: &[f32],
) -> IndexResult<ClusterId> {
    nearest_centroid(embedding, centroids.iter().map(|(_, c)| c.as_slice()))
        .map(|position| centroids[position].0)
        .ok_or_else(|| IndexError::not_found(Missing::AnyCluster))
}

fn parse_cluster_file_name(name: &str) -> Option<ClusterId> {
    let number = name
        .strip_prefix(CLUSTER_PREFIX)?
        .strip_suffix(CLUSTER_EXTENSION)?
        .strip_suffix('.')?;
    ClusterId::new(number.parse().ok()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::ChunkStore;
    use crate::vector::ChunkRecord;
    use tempfile::TempDir;

    fn dim(n: usize) -> VectorDimension {
        VectorDimension::new(n).unwrap()
    }

    fn cluster_store(temp_dir: &TempDir, capacity: usize, d: usize) -> ClusterStore {
        ClusterStore::new(
            temp_dir.path().join("clusters"),
            ClusterLayout::new(capacity, dim(d)).unwrap(),
        )
    }

    fn chunk_cache(temp_dir: &TempDir, d: usize) -> ChunkCache {
        ChunkCache::new(ChunkStore::new(temp_dir.path().join("documents"), dim(d)))
    }

    fn doc(id: u32) -> DocId {
        DocId::new(id).unwrap()
    }

    fn cluster(id: u32) -> ClusterId {
        ClusterId::new(id).unwrap()
    }

    #[test]
    fn test_layout_size() {
        let layout = ClusterLayout::new(1000, dim(1024)).unwrap();
        assert_eq!(layout.file_size(), 4 + 8 * 1000 + 4 * 1024 + 40);
        assert!(ClusterLayout::new(0, dim(4)).is_err());
    }

    #[test]
    fn test_parse_cluster_file_name() {
        assert_eq!(parse_cluster_file_name("cluster_1.cluster"), Some(cluster(1)));
        assert_eq!(parse_cluster_file_name("cluster_12.cluster"), Some(cluster(12)));
        assert_eq!(parse_cluster_file_name("cluster_0.cluster"), None);
        assert_eq!(parse_cluster_file_name("pending.json"), None);
        assert_eq!(parse_cluster_file_name("cluster_1.cluster.tmp"), None);
    }

    #[test]
    fn test_create_initial_cluster_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let store = cluster_store(&temp_dir, 4, 3);

        assert!(store.create_initial_cluster().unwrap());
        assert!(!store.create_initial_cluster().unwrap());
        assert_eq!(store.cluster_ids().unwrap(), vec![ClusterId::INITIAL]);

        let file = store.open(ClusterId::INITIAL).unwrap();
        assert_eq!(file.id(), ClusterId::INITIAL);
        assert_eq!(file.member_count(), 0);
        assert_eq!(file.centroid().collect::<Vec<_>>(), vec![0.0; 3]);
        let size = std::fs::metadata(file.path()).unwrap().len() as usize;
        assert_eq!(size, 4 + 8 * 4 + 4 * 3 + 40);
    }

    #[test]
    fn test_nearest_cluster_single_cluster() {
        let temp_dir = TempDir::new().unwrap();
        let store = cluster_store(&temp_dir, 4, 2);
        store.create_initial_cluster().unwrap();

        for embedding in [[1.0, 0.0], [-5.0, 3.0], [0.0, 0.0]] {
            assert_eq!(store.nearest_cluster(&embedding).unwrap(), ClusterId::INITIAL);
        }
    }

    #[test]
    fn test_nearest_cluster_ties_and_errors() {
        let temp_dir = TempDir::new().unwrap();
        let store = cluster_store(&temp_dir, 4, 2);

        assert!(matches!(
            store.nearest_cluster(&[0.0, 0.0]),
            Err(IndexError::NotFound(Missing::AnyCluster))
        ));

        store.create_cluster(cluster(2), &[1.0, 0.0]).unwrap();
        store.create_cluster(cluster(1), &[-1.0, 0.0]).unwrap();
        store.create_cluster(cluster(3), &[0.0, 10.0]).unwrap();

        // Equidistant from clusters 1 and 2: lowest id wins
        assert_eq!(store.nearest_cluster(&[0.0, 1.0]).unwrap(), cluster(1));
        assert_eq!(store.nearest_cluster(&[0.9, 0.0]).unwrap(), cluster(2));
        assert_eq!(store.nearest_cluster(&[0.0, 8.0]).unwrap(), cluster(3));

        assert!(matches!(
            store.nearest_cluster(&[0.0]),
            Err(IndexError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_assign_slot_until_full() {
        let temp_dir = TempDir::new().unwrap();
        let store = cluster_store(&temp_dir, 2, 2);
        store.create_initial_cluster().unwrap();

        let first = store
            .assign_slot(ClusterId::INITIAL, doc(1), ChunkIndex::new(0))
            .unwrap();
        let second = store
            .assign_slot(ClusterId::INITIAL, doc(1), ChunkIndex::new(1))
            .unwrap();
        assert_eq!((first, second), (0, 1));

        match store.assign_slot(ClusterId::INITIAL, doc(2), ChunkIndex::new(0)) {
            Err(IndexError::ClusterFull { cluster, capacity }) => {
                assert_eq!(cluster, ClusterId::INITIAL);
                assert_eq!(capacity, 2);
            }
            other => panic!("expected ClusterFull, got {other:?}"),
        }

        // Existing references are untouched
        let file = store.open(ClusterId::INITIAL).unwrap();
        let members: Vec<Slot> = file.members().collect();
        assert_eq!(
            members,
            vec![
                Slot::new(doc(1), ChunkIndex::new(0)),
                Slot::new(doc(1), ChunkIndex::new(1)),
            ]
        );
    }

    #[test]
    fn test_assign_slots_reports_overflow() {
        let temp_dir = TempDir::new().unwrap();
        let store = cluster_store(&temp_dir, 2, 2);
        store.create_initial_cluster().unwrap();

        let slots: Vec<Slot> = (0..3)
            .map(|i| Slot::new(doc(7), ChunkIndex::new(i)))
            .collect();
        let outcomes = store.assign_slots(ClusterId::INITIAL, &slots).unwrap();
        assert_eq!(
            outcomes,
            vec![
                SlotOutcome::Assigned(0),
                SlotOutcome::Assigned(1),
                SlotOutcome::Full
            ]
        );

        let again = store.assign_slots(ClusterId::INITIAL, &slots[..1]).unwrap();
        assert_eq!(again, vec![SlotOutcome::Full]);
    }

    #[test]
    fn test_recompute_centroid_is_member_mean() {
        let temp_dir = TempDir::new().unwrap();
        let store = cluster_store(&temp_dir, 4, 2);
        let chunks = chunk_cache(&temp_dir, 2);
        store.create_initial_cluster().unwrap();

        chunks
            .store()
            .create(
                doc(1),
                &[
                    ChunkRecord::new(0, 1, vec![1.0, 2.0]),
                    ChunkRecord::new(1, 2, vec![3.0, 6.0]),
                ],
            )
            .unwrap();

        assert!(matches!(
            store.recompute_centroid(ClusterId::INITIAL, &chunks),
            Err(IndexError::EmptyCluster { .. })
        ));

        store
            .assign_slot(ClusterId::INITIAL, doc(1), ChunkIndex::new(0))
            .unwrap();
        assert_eq!(store.recompute_centroid(ClusterId::INITIAL, &chunks).unwrap(), 1);
        let centroid: Vec<f32> = store.open(ClusterId::INITIAL).unwrap().centroid().collect();
        assert_eq!(centroid, vec![1.0, 2.0]);

        store
            .assign_slot(ClusterId::INITIAL, doc(1), ChunkIndex::new(1))
            .unwrap();
        assert_eq!(store.recompute_centroid(ClusterId::INITIAL, &chunks).unwrap(), 2);
        let centroid: Vec<f32> = store.open(ClusterId::INITIAL).unwrap().centroid().collect();
        assert_eq!(centroid, vec![2.0, 4.0]);
    }

    #[test]
    fn test_recompute_with_missing_chunk_leaves_file_unchanged() {
        let temp_dir = TempDir::new().unwrap();
        let store = cluster_store(&temp_dir, 4, 2);
        let chunks = chunk_cache(&temp_dir, 2);
        store.create_initial_cluster().unwrap();
        store
            .assign_slot(ClusterId::INITIAL, doc(3), ChunkIndex::new(0))
            .unwrap();

        assert!(matches!(
            store.recompute_centroid(ClusterId::INITIAL, &chunks),
            Err(IndexError::NotFound(Missing::ChunkFile { .. }))
        ));
        let centroid: Vec<f32> = store.open(ClusterId::INITIAL).unwrap().centroid().collect();
        assert_eq!(centroid, vec![0.0, 0.0]);
    }

    #[test]
    fn test_open_rejects_wrong_layout() {
        let temp_dir = TempDir::new().unwrap();
        let store = cluster_store(&temp_dir, 4, 2);
        store.create_initial_cluster().unwrap();

        let other = ClusterStore::new(
            store.dir().to_path_buf(),
            ClusterLayout::new(5, dim(2)).unwrap(),
        );
        assert!(matches!(
            other.open(ClusterId::INITIAL),
            Err(IndexError::CorruptFormat { .. })
        ));
        assert!(matches!(
            store.open(cluster(9)),
            Err(IndexError::NotFound(Missing::Cluster(_)))
        ));
    }
}
