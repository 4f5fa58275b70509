//! # block_list
//!
//! why: store an ordered list of opaque byte blocks in one contiguous buffer
//! relations: backs InMemoryJournal in lib.rs, usable as a batch format for replication transfer
//! what: BlockList (ziplist-style layout), BlockEntry, forward/backward iteration, tail truncation
//!
//! layout, all integers 32-bit little endian and offsets absolute:
//!
//! ```text
//! [total_bytes][tail_offset][count]
//!   { [prev_offset][entry_len][entry_bytes] } *
//! [0xFF]
//! ```
//!
//! not safe for concurrent mutation; callers serialise access.

use thiserror::Error;

const HEADER_VAR_SIZE: usize = 4;
const LIST_HEADER_SIZE: usize = HEADER_VAR_SIZE * 3;
const ENTRY_HEADER_SIZE: usize = HEADER_VAR_SIZE * 2;

const END_MARKER: u8 = 0xFF;
const END_MARKER_SIZE: usize = 1;

/// Largest single growth step of the backing buffer.
const MAX_INCREMENT: usize = u16::MAX as usize;

const BYTES_OFFSET: usize = 0;
const TAIL_OFFSET: usize = HEADER_VAR_SIZE;
const COUNT_OFFSET: usize = HEADER_VAR_SIZE * 2;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BlockListError {
    /// The blob does not describe a valid list.
    #[error("block list is corrupted: {0}")]
    Corrupted(String),

    #[error("cannot remove {requested} entries from a list of {len}")]
    InvalidTruncate { requested: usize, len: usize },

    #[error("offset {0} does not fall within the entry range")]
    OffsetOutOfRange(usize),

    /// An entry handle no longer matches the bytes at its offset.
    #[error("entry at offset {0} does not match the list contents")]
    InvalidEntry(usize),

    #[error("block list would exceed the 32-bit size limit")]
    TooLarge,
}

/// A view of one entry inside a [`BlockList`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockEntry<'a> {
    /// Offset of the preceding entry, 0 for the first entry.
    pub prev_offset: usize,
    /// Offset of this entry. Held in memory only.
    pub offset: usize,
    pub data: &'a [u8],
}

impl BlockEntry<'_> {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Compact, offset-linked list of byte blocks.
#[derive(Debug, Clone)]
pub struct BlockList {
    bytes: usize,
    tail: usize,
    count: usize,
    blob: Vec<u8>,
}

impl Default for BlockList {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockList {
    /// An empty list.
    pub fn new() -> Self {
        let mut list = Self {
            bytes: LIST_HEADER_SIZE + END_MARKER_SIZE,
            tail: 0,
            count: 0,
            blob: Vec::new(),
        };
        extend_if_required(&mut list.blob, list.bytes, 0);
        list.write_header();
        list.blob[LIST_HEADER_SIZE] = END_MARKER;
        list
    }

    /// Take ownership of an encoded list, validating its header and end marker.
    pub fn from_bytes(blob: Vec<u8>) -> Result<Self, BlockListError> {
        if blob.len() < LIST_HEADER_SIZE + END_MARKER_SIZE {
            return Err(BlockListError::Corrupted(format!(
                "{} bytes is shorter than an empty list",
                blob.len()
            )));
        }
        let bytes = read_header_var(&blob, BYTES_OFFSET)?;
        let tail = read_header_var(&blob, TAIL_OFFSET)?;
        let count = read_header_var(&blob, COUNT_OFFSET)?;

        if bytes < LIST_HEADER_SIZE + END_MARKER_SIZE || bytes > blob.len() {
            return Err(BlockListError::Corrupted(format!(
                "declared length {bytes} does not fit a blob of {}",
                blob.len()
            )));
        }
        if blob[bytes - 1] != END_MARKER {
            return Err(BlockListError::Corrupted(
                "missing end marker at declared length".to_string(),
            ));
        }
        if (count == 0) != (tail == 0) || tail >= bytes {
            return Err(BlockListError::Corrupted(format!(
                "tail offset {tail} inconsistent with {count} entries"
            )));
        }

        Ok(Self {
            bytes,
            tail,
            count,
            blob,
        })
    }

    /// Copying variant of [`BlockList::from_bytes`].
    pub fn from_slice(blob: &[u8]) -> Result<Self, BlockListError> {
        Self::from_bytes(blob.to_vec())
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Size of the encoded list in bytes.
    pub fn size_of_list(&self) -> usize {
        self.bytes
    }

    /// Size of the backing buffer, including unused growth space.
    pub fn size_in_memory(&self) -> usize {
        self.blob.len()
    }

    /// Release the growth space so the buffer matches the list exactly.
    pub fn shrink_to_fit(&mut self) {
        self.blob.truncate(self.bytes);
        self.blob.shrink_to_fit();
    }

    /// The encoded list, without trailing growth space.
    pub fn as_bytes(&self) -> &[u8] {
        &self.blob[..self.bytes]
    }

    pub fn into_bytes(mut self) -> Vec<u8> {
        self.blob.truncate(self.bytes);
        self.blob
    }

    /// Append one entry.
    pub fn push(&mut self, data: &[u8]) -> Result<(), BlockListError> {
        self.push_all(&[data])
    }

    /// Append several entries, preserving their order.
    pub fn push_all<B: AsRef<[u8]>>(&mut self, blocks: &[B]) -> Result<(), BlockListError> {
        if blocks.is_empty() {
            return Ok(());
        }
        let added: usize = blocks
            .iter()
            .map(|block| ENTRY_HEADER_SIZE + block.as_ref().len())
            .sum();
        if self.bytes + added > i32::MAX as usize {
            return Err(BlockListError::TooLarge);
        }
        extend_if_required(&mut self.blob, added, self.bytes);

        for block in blocks {
            let data = block.as_ref();
            let prev = self.tail;
            self.tail = self.bytes - END_MARKER_SIZE;
            self.bytes += ENTRY_HEADER_SIZE + data.len();
            self.count += 1;

            write_var(&mut self.blob, self.tail, prev);
            write_var(&mut self.blob, self.tail + HEADER_VAR_SIZE, data.len());
            let start = self.tail + ENTRY_HEADER_SIZE;
            self.blob[start..start + data.len()].copy_from_slice(data);
        }

        self.write_header();
        self.blob[self.bytes - END_MARKER_SIZE] = END_MARKER;
        Ok(())
    }

    /// Append every entry of `other`, order preserved.
    pub fn merge(&mut self, other: &BlockList) -> Result<(), BlockListError> {
        let blocks: Vec<&[u8]> = other.iter().map(|entry| entry.data).collect();
        self.push_all(&blocks)
    }

    /// Remove every entry. The buffer keeps its size.
    pub fn clear(&mut self) {
        let old_bytes = self.bytes;
        self.count = 0;
        self.tail = 0;
        self.bytes = LIST_HEADER_SIZE + END_MARKER_SIZE;
        self.write_header();
        self.blob[LIST_HEADER_SIZE] = END_MARKER;
        self.blob[self.bytes..old_bytes].fill(0);
    }

    /// Remove the last `n` entries and return them in list order.
    ///
    /// The back links are checked before anything is written, so a corrupted
    /// chain leaves the list untouched.
    pub fn truncate(&mut self, n: usize) -> Result<Vec<Vec<u8>>, BlockListError> {
        if n < 1 || n > self.count {
            return Err(BlockListError::InvalidTruncate {
                requested: n,
                len: self.count,
            });
        }

        let old_bytes = self.bytes;
        let mut removed = Vec::with_capacity(n);
        let mut next_start = self.tail;
        // where the entry being visited has to end
        let mut end_offset = old_bytes - END_MARKER_SIZE;
        while removed.len() < n {
            if next_start == 0 {
                return Err(BlockListError::Corrupted(format!(
                    "back links end after {} of {} entries",
                    removed.len(),
                    self.count
                )));
            }
            let entry = self.get(next_start)?;
            if entry.offset + ENTRY_HEADER_SIZE + entry.len() != end_offset {
                return Err(BlockListError::Corrupted(format!(
                    "entry at {} does not end at {end_offset}",
                    entry.offset
                )));
            }
            removed.push(entry.data.to_vec());
            end_offset = entry.offset;
            next_start = entry.prev_offset;
        }

        let linked = if next_start == 0 {
            end_offset == LIST_HEADER_SIZE
        } else {
            self.get(next_start)
                .map(|prev| prev.offset + ENTRY_HEADER_SIZE + prev.len() == end_offset)
                .unwrap_or(false)
        };
        if !linked {
            return Err(BlockListError::Corrupted(format!(
                "entry at {end_offset} links back to {next_start}"
            )));
        }

        self.count -= removed.len();
        self.bytes = end_offset + END_MARKER_SIZE;
        self.tail = next_start;

        self.write_header();
        self.blob[end_offset] = END_MARKER;
        self.blob[self.bytes..old_bytes].fill(0);

        removed.reverse();
        Ok(removed)
    }

    /// First entry, if any.
    pub fn head(&self) -> Option<BlockEntry<'_>> {
        if self.is_empty() {
            return None;
        }
        self.get(LIST_HEADER_SIZE).ok()
    }

    /// Last entry, if any.
    pub fn tail(&self) -> Option<BlockEntry<'_>> {
        if self.is_empty() {
            return None;
        }
        self.get(self.tail).ok()
    }

    /// The entry following `entry`, `None` when `entry` is the last.
    pub fn next(&self, entry: &BlockEntry<'_>) -> Result<Option<BlockEntry<'_>>, BlockListError> {
        if self.bytes - END_MARKER_SIZE <= entry.offset || entry.offset < LIST_HEADER_SIZE {
            return Err(BlockListError::OffsetOutOfRange(entry.offset));
        }
        if read_header_var(&self.blob, entry.offset)? != entry.prev_offset {
            return Err(BlockListError::InvalidEntry(entry.offset));
        }
        let next_offset = entry.offset + ENTRY_HEADER_SIZE + entry.len();
        if next_offset == self.bytes - END_MARKER_SIZE {
            return Ok(None);
        }
        self.get(next_offset).map(Some)
    }

    /// The entry preceding `entry`, `None` when `entry` is the first.
    pub fn prev(&self, entry: &BlockEntry<'_>) -> Result<Option<BlockEntry<'_>>, BlockListError> {
        if entry.prev_offset == 0 {
            return Ok(None);
        }
        let prev = self.get(entry.prev_offset)?;
        // the header right after `prev` must point back at it
        let linked = read_header_var(&self.blob, prev.offset + ENTRY_HEADER_SIZE + prev.len())?;
        if linked != entry.prev_offset {
            return Err(BlockListError::InvalidEntry(entry.offset));
        }
        Ok(Some(prev))
    }

    /// Front to back. Stops early at a malformed entry.
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            list: self,
            current: None,
            remaining: self.count,
            reverse: false,
        }
    }

    /// Back to front. Stops early at a malformed entry.
    pub fn iter_rev(&self) -> Iter<'_> {
        Iter {
            list: self,
            current: None,
            remaining: self.count,
            reverse: true,
        }
    }

    fn get(&self, offset: usize) -> Result<BlockEntry<'_>, BlockListError> {
        if self.bytes - END_MARKER_SIZE <= offset || offset < LIST_HEADER_SIZE {
            return Err(BlockListError::OffsetOutOfRange(offset));
        }
        let prev_offset = read_header_var(&self.blob, offset)?;
        let len = read_header_var(&self.blob, offset + HEADER_VAR_SIZE)?;
        let start = offset + ENTRY_HEADER_SIZE;
        if start + len > self.bytes - END_MARKER_SIZE {
            return Err(BlockListError::Corrupted(format!(
                "entry at {offset} overruns the list"
            )));
        }
        Ok(BlockEntry {
            prev_offset,
            offset,
            data: &self.blob[start..start + len],
        })
    }

    fn write_header(&mut self) {
        write_var(&mut self.blob, BYTES_OFFSET, self.bytes);
        write_var(&mut self.blob, TAIL_OFFSET, self.tail);
        write_var(&mut self.blob, COUNT_OFFSET, self.count);
    }
}

/// Iterator over a [`BlockList`] in either direction.
pub struct Iter<'a> {
    list: &'a BlockList,
    current: Option<BlockEntry<'a>>,
    remaining: usize,
    reverse: bool,
}

impl<'a> Iterator for Iter<'a> {
    type Item = BlockEntry<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let next = match (&self.current, self.reverse) {
            (None, false) => self.list.head(),
            (None, true) => self.list.tail(),
            (Some(current), false) => self.list.next(current).ok().flatten(),
            (Some(current), true) => self.list.prev(current).ok().flatten(),
        };
        match next {
            Some(entry) => {
                self.remaining -= 1;
                self.current = Some(entry);
                Some(entry)
            }
            None => {
                self.remaining = 0;
                None
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.remaining))
    }
}

/// Grow `blob` so `added` bytes fit after `from`.
///
/// Doubles the buffer, capped at [`MAX_INCREMENT`]; falls back to the exact
/// shortfall when doubling is not enough.
fn extend_if_required(blob: &mut Vec<u8>, added: usize, from: usize) {
    let required = from + added;
    if required <= blob.len() {
        return;
    }
    let shortfall = required - blob.len();
    let doubling = blob.len().min(MAX_INCREMENT);
    blob.resize(blob.len() + doubling.max(shortfall), 0);
}

fn write_var(blob: &mut [u8], offset: usize, value: usize) {
    // callers keep every value below i32::MAX
    let value = value as i32;
    blob[offset..offset + HEADER_VAR_SIZE].copy_from_slice(&value.to_le_bytes());
}

fn read_header_var(blob: &[u8], offset: usize) -> Result<usize, BlockListError> {
    let raw = blob
        .get(offset..offset + HEADER_VAR_SIZE)
        .ok_or(BlockListError::OffsetOutOfRange(offset))?;
    let mut word = [0u8; HEADER_VAR_SIZE];
    word.copy_from_slice(raw);
    usize::try_from(i32::from_le_bytes(word))
        .map_err(|_| BlockListError::Corrupted(format!("negative header value at {offset}")))
}
