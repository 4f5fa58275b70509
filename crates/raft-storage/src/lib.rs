//! # raft-storage
//!
//! why: provide durable persistence for the replicated log using standard rust fs apis
//! relations: written by raft-server's pipeline and follower writer, replayed at startup into raft-core's RaftNode
//! what: Journal trait, FileJournal, InMemoryJournal (block-list backed), replay

pub mod block_list;

use raft_core::{codec, LogEntry, NodeId};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::PathBuf;
use tracing::{debug, warn};

pub use block_list::{BlockEntry, BlockList, BlockListError};

/// trait for durable storage of the raft log and hard state
///
/// the log is an append-only sequence of blocks, each one `codec::encode`d
/// log entry. there is no index file: readers replay every block in order.
pub trait Journal: Send {
    /// durably append one encoded entry
    fn write_block(&mut self, block: &[u8]) -> io::Result<()>;

    /// every block in the order it was written
    fn read_blocks(&self) -> io::Result<Vec<Vec<u8>>>;

    /// drop every block whose entry index is at or after `from_index`
    fn truncate_from(&mut self, from_index: u64) -> io::Result<()>;

    /// persist the current term and voted_for
    fn save_term_and_vote(&mut self, term: u64, voted_for: Option<NodeId>) -> io::Result<()>;

    /// load the persisted term and voted_for
    fn load_term_and_vote(&self) -> io::Result<(u64, Option<NodeId>)>;
}

/// decode every journaled block, in file order
pub fn replay(journal: &dyn Journal) -> io::Result<Vec<LogEntry>> {
    let entries = journal
        .read_blocks()?
        .iter()
        .map(|block| codec::decode(block).map_err(invalid_data))
        .collect::<io::Result<Vec<_>>>()?;
    debug!(entries = entries.len(), "replayed journal");
    Ok(entries)
}

fn invalid_data<E>(e: E) -> io::Error
where
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    io::Error::new(io::ErrorKind::InvalidData, e)
}

// -- file journal implementation --

/// file-based journal using std::fs
///
/// stores state in a directory with:
/// - journal.log: concatenated length-prefixed entry blocks
/// - meta.json: term and voted_for
pub struct FileJournal {
    /// directory path for storing state files
    dir: PathBuf,
    /// append handle on journal.log
    log: File,
}

impl FileJournal {
    /// open (or create) a journal in the given directory
    pub fn new(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join("journal.log"))?;
        Ok(Self { dir, log })
    }

    fn meta_path(&self) -> PathBuf {
        self.dir.join("meta.json")
    }

    fn log_path(&self) -> PathBuf {
        self.dir.join("journal.log")
    }

    fn read_log(&self) -> io::Result<Vec<u8>> {
        let mut contents = Vec::new();
        File::open(self.log_path())?.read_to_end(&mut contents)?;
        Ok(contents)
    }
}

/// metadata structure for term and vote
#[derive(serde::Serialize, serde::Deserialize, Default)]
struct MetaData {
    term: u64,
    voted_for: Option<NodeId>,
}

/// walk concatenated blocks, yielding (start offset, block length, entry index)
fn scan_blocks(contents: &[u8]) -> io::Result<Vec<(usize, usize, u64)>> {
    let mut blocks = Vec::new();
    let mut offset = 0;
    while offset < contents.len() {
        let (entry, used) = codec::decode_from(&contents[offset..]).map_err(|e| {
            warn!(offset, error = %e, "journal block is malformed");
            invalid_data(e)
        })?;
        blocks.push((offset, used, entry.index));
        offset += used;
    }
    Ok(blocks)
}

/// the parts of an append-mode log file a block write touches
trait LogFile: Write {
    fn file_len(&self) -> io::Result<u64>;
    fn cut_to(&self, len: u64) -> io::Result<()>;
    fn sync(&self) -> io::Result<()>;
}

impl LogFile for File {
    fn file_len(&self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn cut_to(&self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }

    fn sync(&self) -> io::Result<()> {
        self.sync_data()
    }
}

/// append one block; a failed write is cut back off so the log never ends
/// in a torn block
fn append_block<F: LogFile>(log: &mut F, block: &[u8]) -> io::Result<()> {
    let before = log.file_len()?;
    let written = log.write_all(block).and_then(|()| log.sync());
    if let Err(err) = written {
        warn!(bytes = before, error = %err, "journal write failed, rolling back");
        log.cut_to(before)?;
        return Err(err);
    }
    Ok(())
}

impl Journal for FileJournal {
    fn write_block(&mut self, block: &[u8]) -> io::Result<()> {
        append_block(&mut self.log, block)
    }

    fn read_blocks(&self) -> io::Result<Vec<Vec<u8>>> {
        let contents = self.read_log()?;
        Ok(scan_blocks(&contents)?
            .into_iter()
            .map(|(start, len, _)| contents[start..start + len].to_vec())
            .collect())
    }

    fn truncate_from(&mut self, from_index: u64) -> io::Result<()> {
        let contents = self.read_log()?;
        let cut = scan_blocks(&contents)?
            .into_iter()
            .find(|(_, _, index)| *index >= from_index)
            .map(|(start, _, _)| start);

        if let Some(cut) = cut {
            self.log.set_len(cut as u64)?;
            self.log.sync_all()?;
            debug!(from_index, bytes = cut, "truncated journal");
        }
        Ok(())
    }

    fn save_term_and_vote(&mut self, term: u64, voted_for: Option<NodeId>) -> io::Result<()> {
        let meta = MetaData { term, voted_for };
        let json = serde_json::to_string_pretty(&meta).map_err(invalid_data)?;

        // atomic write: write to temp file then rename
        let temp_path = self.dir.join("meta.tmp");
        let mut file = File::create(&temp_path)?;
        file.write_all(json.as_bytes())?;
        file.sync_all()?;
        fs::rename(&temp_path, self.meta_path())?;

        Ok(())
    }

    fn load_term_and_vote(&self) -> io::Result<(u64, Option<NodeId>)> {
        let path = self.meta_path();
        if !path.exists() {
            return Ok((0, None)); // default for new nodes
        }

        let mut contents = String::new();
        File::open(&path)?.read_to_string(&mut contents)?;
        let meta: MetaData = serde_json::from_str(&contents).map_err(invalid_data)?;

        Ok((meta.term, meta.voted_for))
    }
}

// -- in-memory journal implementation --

/// in-memory journal for testing and single-process use
///
/// blocks live in a block list, so the whole journal can be exported as one
/// blob and reloaded with corruption checking.
#[derive(Default)]
pub struct InMemoryJournal {
    blocks: BlockList,
    term: u64,
    voted_for: Option<NodeId>,
}

impl InMemoryJournal {
    /// create an empty in-memory journal
    pub fn new() -> Self {
        Self::default()
    }

    /// rebuild a journal from a blob produced by [`InMemoryJournal::to_bytes`]
    pub fn from_bytes(blob: Vec<u8>) -> Result<Self, BlockListError> {
        Ok(Self {
            blocks: BlockList::from_bytes(blob)?,
            ..Self::default()
        })
    }

    /// the journaled blocks as a single block-list blob
    pub fn to_bytes(&self) -> Vec<u8> {
        self.blocks.as_bytes().to_vec()
    }

    /// number of journaled blocks
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

impl Journal for InMemoryJournal {
    fn write_block(&mut self, block: &[u8]) -> io::Result<()> {
        self.blocks.push(block).map_err(invalid_data)
    }

    fn read_blocks(&self) -> io::Result<Vec<Vec<u8>>> {
        Ok(self.blocks.iter().map(|entry| entry.data.to_vec()).collect())
    }

    fn truncate_from(&mut self, from_index: u64) -> io::Result<()> {
        let mut doomed = 0;
        for entry in self.blocks.iter_rev() {
            let decoded = codec::decode(entry.data).map_err(invalid_data)?;
            if decoded.index < from_index {
                break;
            }
            doomed += 1;
        }
        if doomed > 0 {
            self.blocks.truncate(doomed).map_err(invalid_data)?;
        }
        Ok(())
    }

    fn save_term_and_vote(&mut self, term: u64, voted_for: Option<NodeId>) -> io::Result<()> {
        self.term = term;
        self.voted_for = voted_for;
        Ok(())
    }

    fn load_term_and_vote(&self) -> io::Result<(u64, Option<NodeId>)> {
        Ok((self.term, self.voted_for))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn block(term: u64, index: u64) -> Vec<u8> {
        codec::encode(&LogEntry::new(term, index, "test", vec![index as u8])).to_vec()
    }

    #[test]
    fn in_memory_journal_persists_term_and_vote() {
        let mut journal = InMemoryJournal::new();

        journal.save_term_and_vote(5, Some(2)).unwrap();
        let (term, voted_for) = journal.load_term_and_vote().unwrap();

        assert_eq!(term, 5);
        assert_eq!(voted_for, Some(2));
    }

    #[test]
    fn in_memory_journal_appends_and_replays() {
        let mut journal = InMemoryJournal::new();
        journal.write_block(&block(1, 1)).unwrap();
        journal.write_block(&block(1, 2)).unwrap();

        let log = replay(&journal).unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].index, 1);
        assert_eq!(log[1].index, 2);
    }

    #[test]
    fn in_memory_journal_truncates_suffix() {
        let mut journal = InMemoryJournal::new();
        for index in 1..=3 {
            journal.write_block(&block(1, index)).unwrap();
        }

        journal.truncate_from(2).unwrap();

        let log = replay(&journal).unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].index, 1);
    }

    #[test]
    fn file_journal_appends_and_replays() {
        let dir = tempdir().unwrap();
        let mut journal = FileJournal::new(dir.path()).unwrap();

        journal.write_block(&block(1, 1)).unwrap();
        journal.write_block(&block(2, 2)).unwrap();

        let log = replay(&journal).unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[1].term, 2);
    }

    #[test]
    fn file_journal_survives_restart() {
        let dir = tempdir().unwrap();

        // first "session"
        {
            let mut journal = FileJournal::new(dir.path()).unwrap();
            journal.save_term_and_vote(10, Some(1)).unwrap();
            journal.write_block(&block(10, 1)).unwrap();
        }

        // "restart" - new journal instance
        {
            let journal = FileJournal::new(dir.path()).unwrap();
            let (term, voted_for) = journal.load_term_and_vote().unwrap();
            let log = replay(&journal).unwrap();

            assert_eq!(term, 10);
            assert_eq!(voted_for, Some(1));
            assert_eq!(log.len(), 1);
        }
    }

    /// lets `limit` bytes through, then reports a full disk
    struct ShortWrite {
        file: File,
        limit: usize,
    }

    impl Write for ShortWrite {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.limit == 0 {
                return Err(io::Error::new(io::ErrorKind::Other, "no space left on device"));
            }
            let n = buf.len().min(self.limit);
            self.limit -= n;
            self.file.write(&buf[..n])
        }

        fn flush(&mut self) -> io::Result<()> {
            self.file.flush()
        }
    }

    impl LogFile for ShortWrite {
        fn file_len(&self) -> io::Result<u64> {
            self.file.file_len()
        }

        fn cut_to(&self, len: u64) -> io::Result<()> {
            self.file.cut_to(len)
        }

        fn sync(&self) -> io::Result<()> {
            self.file.sync()
        }
    }

    #[test]
    fn failed_write_leaves_no_torn_block() {
        let dir = tempdir().unwrap();
        let mut journal = FileJournal::new(dir.path()).unwrap();
        journal.write_block(&block(1, 1)).unwrap();

        let mut failing = ShortWrite {
            file: OpenOptions::new()
                .append(true)
                .open(dir.path().join("journal.log"))
                .unwrap(),
            limit: 3,
        };
        assert!(append_block(&mut failing, &block(1, 2)).is_err());

        journal.write_block(&block(1, 2)).unwrap();
        let log = replay(&journal).unwrap();
        let indices: Vec<u64> = log.iter().map(|entry| entry.index).collect();
        assert_eq!(indices, vec![1, 2]);

        let reopened = FileJournal::new(dir.path()).unwrap();
        assert_eq!(replay(&reopened).unwrap().len(), 2);
    }

    #[test]
    fn file_journal_truncates_and_keeps_appending() {
        let dir = tempdir().unwrap();
        let mut journal = FileJournal::new(dir.path()).unwrap();
        for index in 1..=3 {
            journal.write_block(&block(1, index)).unwrap();
        }

        journal.truncate_from(2).unwrap();
        journal.write_block(&block(2, 2)).unwrap();

        let log = replay(&journal).unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[1].term, 2);
    }
}
