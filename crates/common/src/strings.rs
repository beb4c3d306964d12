use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Handle to a string interned in a [`StringTable`].
///
/// While a graph is live the handle is an index into the table. While a graph
/// is saved the same field holds a byte offset into the string block.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct StringHandle(pub u32);

impl StringHandle {
    pub const EMPTY: Self = Self(0);

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

/// Interning table for paths, class names and other graph strings.
#[derive(Debug, Clone)]
pub struct StringTable {
    strings: Vec<Arc<str>>,
    lookup: HashMap<Arc<str>, StringHandle>,
}

impl StringTable {
    pub fn new() -> Self {
        let empty: Arc<str> = Arc::from("");
        let mut lookup = HashMap::new();
        lookup.insert(Arc::clone(&empty), StringHandle::EMPTY);
        Self {
            strings: vec![empty],
            lookup,
        }
    }

    /// Intern `text`, returning the existing handle if already present.
    pub fn intern(&mut self, text: &str) -> StringHandle {
        if let Some(handle) = self.lookup.get(text) {
            return *handle;
        }
        let handle = StringHandle(self.strings.len() as u32);
        let stored: Arc<str> = Arc::from(text);
        self.strings.push(Arc::clone(&stored));
        self.lookup.insert(stored, handle);
        handle
    }

    /// Resolve a handle. Unknown handles resolve to the empty string.
    pub fn get(&self, handle: StringHandle) -> &str {
        self.strings
            .get(handle.0 as usize)
            .map(|s| &**s)
            .unwrap_or("")
    }

    /// Shared copy of the string, for handing to worker threads.
    pub fn get_shared(&self, handle: StringHandle) -> Arc<str> {
        self.strings
            .get(handle.0 as usize)
            .cloned()
            .unwrap_or_else(|| Arc::clone(&self.strings[0]))
    }

    pub fn find(&self, text: &str) -> Option<StringHandle> {
        self.lookup.get(text).copied()
    }

    pub fn contains(&self, handle: StringHandle) -> bool {
        (handle.0 as usize) < self.strings.len()
    }

    /// Number of interned strings, including the empty string.
    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.len() == 1
    }
}

impl Default for StringTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds the contiguous, NUL-separated string block of a saved graph.
///
/// Offset 0 is the empty string so that `StringHandle::EMPTY` keeps its
/// meaning while saved.
#[derive(Debug)]
pub struct StringBlockWriter {
    bytes: Vec<u8>,
    offsets: HashMap<StringHandle, u32>,
}

impl StringBlockWriter {
    pub fn new() -> Self {
        let mut offsets = HashMap::new();
        offsets.insert(StringHandle::EMPTY, 0);
        Self {
            bytes: vec![0],
            offsets,
        }
    }

    /// Write the string behind `handle` once and return its block offset.
    pub fn write(&mut self, table: &StringTable, handle: StringHandle) -> u32 {
        if let Some(offset) = self.offsets.get(&handle) {
            return *offset;
        }
        let offset = self.bytes.len() as u32;
        self.bytes.extend_from_slice(table.get(handle).as_bytes());
        self.bytes.push(0);
        self.offsets.insert(handle, offset);
        offset
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.len() == 1
    }

    pub fn finish(self) -> Vec<u8> {
        self.bytes
    }
}

impl Default for StringBlockWriter {
    fn default() -> Self {
        Self::new()
    }
}

/// Errors from reading a string block.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StringBlockError {
    #[error("string offset {0} outside block")]
    OutOfRange(u32),
    #[error("string at offset {0} is not NUL terminated")]
    Unterminated(u32),
    #[error("string at offset {0} is not valid UTF-8")]
    InvalidUtf8(u32),
}

/// Reads strings out of a saved string block.
#[derive(Debug, Clone, Copy)]
pub struct StringBlockReader<'a> {
    bytes: &'a [u8],
}

impl<'a> StringBlockReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    pub fn read(&self, offset: u32) -> Result<&'a str, StringBlockError> {
        let start = offset as usize;
        let tail = self
            .bytes
            .get(start..)
            .filter(|t| !t.is_empty())
            .ok_or(StringBlockError::OutOfRange(offset))?;
        let end = tail
            .iter()
            .position(|&b| b == 0)
            .ok_or(StringBlockError::Unterminated(offset))?;
        std::str::from_utf8(&tail[..end]).map_err(|_| StringBlockError::InvalidUtf8(offset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_handle_resolves_to_empty_string() {
        let table = StringTable::new();
        assert_eq!(table.get(StringHandle::EMPTY), "");
        assert!(table.is_empty());
    }

    #[test]
    fn interning_is_idempotent() {
        let mut table = StringTable::new();
        let a = table.intern("maps/wood.png");
        let b = table.intern("maps/wood.png");
        let c = table.intern("maps/stone.png");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(table.len(), 3);
        assert_eq!(table.intern(""), StringHandle::EMPTY);
    }

    #[test]
    fn block_roundtrip_through_offsets() {
        let mut table = StringTable::new();
        let wood = table.intern("wood");
        let stone = table.intern("stone");

        let mut writer = StringBlockWriter::new();
        let wood_off = writer.write(&table, wood);
        let stone_off = writer.write(&table, stone);
        assert_eq!(writer.write(&table, wood), wood_off);
        let block = writer.finish();

        let reader = StringBlockReader::new(&block);
        assert_eq!(reader.read(0).unwrap(), "");
        assert_eq!(reader.read(wood_off).unwrap(), "wood");
        assert_eq!(reader.read(stone_off).unwrap(), "stone");
    }

    #[test]
    fn block_reader_rejects_bad_offsets() {
        let block = b"\0abc".to_vec();
        let reader = StringBlockReader::new(&block);
        assert_eq!(reader.read(40), Err(StringBlockError::OutOfRange(40)));
        assert_eq!(reader.read(1), Err(StringBlockError::Unterminated(1)));
    }
}
