//! Chunked columns — typed columns that spill into the store.
//!
//! A column buffers appended elements in a local tail; the moment the
//! tail reaches the chunk size it is encoded as one blob and put into
//! the store under a generated key whose home node is chosen at random.
//! Every chunk except the tail is exactly `chunk_size` elements and,
//! once flushed, immutable in the store — `set` on a flushed chunk is a
//! whole-chunk read-modify-write.
//!
//! Columns have exactly one writer. Concurrent writers would race the
//! read-modify-write in `set` and the tail flush in `push`; nothing
//! here detects that.

use strata_core::error::Result;
use strata_core::key::Key;
use strata_core::wire::{self, WireValue};

use crate::kvstore::KvStore;

/// A growable typed column whose flushed chunks live in the store.
pub struct ChunkedColumn<T: WireValue> {
    store: KvStore,
    base: String,
    column_index: u32,
    chunk_size: usize,
    /// Total logical element count, tail included.
    size: usize,
    /// Keys of flushed chunks, in chunk order.
    chunk_keys: Vec<Key>,
    /// The mutable, not-yet-flushed remainder.
    tail: Vec<T>,
    /// Most recently fetched chunk, kept so repeated reads of nearby
    /// indexes don't refetch. One entry only — parity with the source
    /// system, not a real cache.
    last_fetched: Option<(usize, Vec<T>)>,
}

impl<T: WireValue> ChunkedColumn<T> {
    /// Create an empty column bound to a store and a base name.
    /// Chunk size comes from the store's settings.
    pub fn new(store: KvStore, base: impl Into<String>, column_index: u32) -> Self {
        let chunk_size = store.chunk_size();
        Self {
            store,
            base: base.into(),
            column_index,
            chunk_size,
            size: 0,
            chunk_keys: Vec::new(),
            tail: Vec::new(),
            last_fetched: None,
        }
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Number of chunks flushed to the store so far.
    pub fn flushed_chunks(&self) -> usize {
        self.chunk_keys.len()
    }

    /// Append one element; flushes the tail when it fills a chunk.
    pub async fn push(&mut self, value: T) -> Result<()> {
        self.tail.push(value);
        self.size += 1;
        if self.tail.len() == self.chunk_size {
            self.flush_tail().await?;
        }
        Ok(())
    }

    /// Read the element at logical index `i`.
    ///
    /// # Panics
    ///
    /// Panics if `i >= self.len()`. In-range indexing is the caller's
    /// contract here, the same as slice indexing; store and network
    /// failures stay typed errors.
    pub async fn get(&mut self, i: usize) -> Result<T> {
        assert!(i < self.size, "column index {i} out of bounds ({})", self.size);

        let tail_start = self.chunk_keys.len() * self.chunk_size;
        if i >= tail_start {
            return Ok(self.tail[i - tail_start].clone());
        }

        let chunk = i / self.chunk_size;
        let elements = self.fetch_chunk(chunk).await?;
        Ok(elements[i % self.chunk_size].clone())
    }

    /// Overwrite the element at logical index `i`.
    ///
    /// Tail writes are in place; a write into a flushed chunk fetches
    /// the chunk, mutates it, and re-puts the whole blob. Expensive and
    /// not atomic against other writers — columns are single-writer.
    ///
    /// # Panics
    ///
    /// Panics if `i >= self.len()`, like [`ChunkedColumn::get`].
    pub async fn set(&mut self, i: usize, value: T) -> Result<()> {
        assert!(i < self.size, "column index {i} out of bounds ({})", self.size);

        let tail_start = self.chunk_keys.len() * self.chunk_size;
        if i >= tail_start {
            self.tail[i - tail_start] = value;
            return Ok(());
        }

        let chunk = i / self.chunk_size;
        let mut elements = self.fetch_chunk(chunk).await?;
        elements[i % self.chunk_size] = value;

        let key = self.chunk_keys[chunk].clone();
        let blob = wire::encode_seq(&elements);
        self.store.put(&key, blob).await?;
        self.last_fetched = Some((chunk, elements));
        Ok(())
    }

    /// Push the full tail into the store as one immutable chunk.
    async fn flush_tail(&mut self) -> Result<()> {
        let chunk_index = self.chunk_keys.len() as u32;
        let home = self.store.get_random_node_index();
        let key = Key::for_chunk(&self.base, self.column_index, chunk_index, home);

        let blob = wire::encode_seq(&self.tail);
        tracing::debug!(key = %key, elements = self.tail.len(), "flushing chunk");
        self.store.put(&key, blob).await?;

        self.chunk_keys.push(key);
        self.tail.clear();
        Ok(())
    }

    async fn fetch_chunk(&mut self, chunk: usize) -> Result<Vec<T>> {
        if let Some((cached, elements)) = &self.last_fetched {
            if *cached == chunk {
                return Ok(elements.clone());
            }
        }

        // wait_and_get, so a reader on another node can ask for a chunk
        // slightly before its writer's put lands.
        let blob = self.store.wait_and_get(&self.chunk_keys[chunk]).await?;
        let elements: Vec<T> = wire::decode_seq(&blob)?;
        self.last_fetched = Some((chunk, elements.clone()));
        Ok(elements)
    }

    /// Keys of the flushed chunks, for a reader on another node that
    /// reconstructs the column's layout.
    pub fn chunk_keys(&self) -> &[Key] {
        &self.chunk_keys
    }

    /// Encode the column's layout — chunk keys plus the current tail —
    /// as one blob. A writer puts this under a well-known key so readers
    /// on other nodes can open the column.
    pub fn encode_layout(&self) -> bytes::Bytes {
        use bytes::BufMut;
        let mut buf = bytes::BytesMut::new();
        wire::put_str(&mut buf, &self.base);
        buf.put_u32_le(self.column_index);
        buf.put_u64_le(self.chunk_size as u64);
        buf.put_u64_le(self.size as u64);
        buf.put_u32_le(self.chunk_keys.len() as u32);
        for key in &self.chunk_keys {
            wire::put_str(&mut buf, &key.name);
            buf.put_u32_le(key.home);
        }
        buf.put_u32_le(self.tail.len() as u32);
        for v in &self.tail {
            v.encode_into(&mut buf);
        }
        buf.freeze()
    }

    /// Open a column from a layout blob, bound to a (possibly different
    /// node's) store. The result reads the writer's chunks and tail
    /// snapshot; it is a reader view, not a second writer.
    pub fn decode_layout(store: KvStore, blob: &[u8]) -> Result<Self> {
        use strata_core::wire::WireError;
        let mut buf = blob;
        let base = wire::get_str(&mut buf)?;
        let column_index = wire::get_u32(&mut buf)?;
        let chunk_size = wire::get_u64(&mut buf)? as usize;
        let size = wire::get_u64(&mut buf)? as usize;

        let key_count = wire::get_u32(&mut buf)? as usize;
        let mut chunk_keys = Vec::with_capacity(key_count.min(1 << 20));
        for _ in 0..key_count {
            let name = wire::get_str(&mut buf)?;
            let home = wire::get_u32(&mut buf)?;
            chunk_keys.push(Key::new(name, home));
        }

        let tail_count = wire::get_u32(&mut buf)? as usize;
        let mut tail = Vec::with_capacity(tail_count.min(1 << 20));
        for _ in 0..tail_count {
            tail.push(T::decode_from(&mut buf)?);
        }
        if !buf.is_empty() {
            return Err(WireError::TrailingBytes(buf.len()).into());
        }

        Ok(Self {
            store,
            base,
            column_index,
            chunk_size,
            size,
            chunk_keys,
            tail,
            last_fetched: None,
        })
    }
}
