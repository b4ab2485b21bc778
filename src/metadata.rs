//! Named/typed metadata blobs and their directory (spec §3, §4.9).
//!
//! Grounded on the teacher's `meta::attributes::Attribute` (name + typed
//! payload) and `Header`'s sorted attribute lookup, re-expressed here with
//! an explicit on-disk directory of references rather than an in-memory
//! list re-parsed on every access.

use crate::error::{GvrsError, Result};
use crate::filespace::{FileSpaceManager, Store};
use crate::io::{read_string, round_up, write_string, Data};
use crate::record::RecordType;
use std::io::{Read, Seek, SeekFrom, Write};

/// Wildcard record ID matching every record for a given name (spec §4.9).
pub const WILDCARD_RECORD_ID: i32 = i32::MIN;
pub const WILDCARD_NAME: &str = "*";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MetadataType {
    Byte = 0,
    Short = 1,
    UShort = 2,
    Int = 3,
    UInt = 4,
    Float = 5,
    Double = 6,
    String = 7,
    Ascii = 8,
}

impl MetadataType {
    fn from_u8(value: u8) -> Result<Self> {
        Ok(match value {
            0 => MetadataType::Byte,
            1 => MetadataType::Short,
            2 => MetadataType::UShort,
            3 => MetadataType::Int,
            4 => MetadataType::UInt,
            5 => MetadataType::Float,
            6 => MetadataType::Double,
            7 => MetadataType::String,
            8 => MetadataType::Ascii,
            other => return Err(GvrsError::invalid(format!("unknown metadata type tag {other}"))),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetadataRecord {
    pub name: String,
    pub record_id: i32,
    pub kind: MetadataType,
    pub payload: Vec<u8>,
    pub description: Option<String>,
}

impl MetadataRecord {
    fn serialized_len(&self) -> usize {
        // string(name) + 4(record_id) + 1(type) + 3(reserved) + 4(dataSize) +
        // payload + string(description) (spec §4.9)
        2 + self.name.len() + 4 + 1 + 3 + 4 + self.payload.len()
            + 2 + self.description.as_deref().unwrap_or("").len()
    }

    fn write_content(&self, write: &mut impl std::io::Write) -> Result<()> {
        write_string(write, &self.name)?;
        self.record_id.write(write)?;
        (self.kind as u8).write(write)?;
        u8::write_slice(write, &[0, 0, 0])?;
        (self.payload.len() as u32).write(write)?;
        u8::write_slice(write, &self.payload)?;
        write_string(write, self.description.as_deref().unwrap_or(""))
    }

    fn read_content(read: &mut impl std::io::Read) -> Result<Self> {
        let name = read_string(read)?;
        let record_id = i32::read(read)?;
        let kind = MetadataType::from_u8(u8::read(read)?)?;
        let mut reserved = [0_u8; 3];
        u8::read_slice(read, &mut reserved)?;
        let data_size = u32::read(read)? as usize;
        let mut payload = vec![0_u8; data_size];
        u8::read_slice(read, &mut payload)?;
        let description = read_string(read)?;
        let description = if description.is_empty() { None } else { Some(description) };

        Ok(MetadataRecord { name, record_id, kind, payload, description })
    }
}

/// One reference kept by the directory: enough to locate and identify a
/// record without reading its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Reference {
    name: String,
    record_id: i32,
    record_offset: u64,
}

/// Directory of metadata references, sorted by `(name, recordID)` (spec
/// §3, §4.9).
#[derive(Debug, Clone, Default)]
pub struct MetadataDirectory {
    references: Vec<Reference>,
    pub write_pending: bool,
}

impl MetadataDirectory {
    pub fn new() -> Self {
        MetadataDirectory::default()
    }

    pub fn len(&self) -> usize {
        self.references.len()
    }

    pub fn is_empty(&self) -> bool {
        self.references.is_empty()
    }

    fn sort_key(name: &str, record_id: i32) -> (&str, i32) {
        (name, record_id)
    }

    fn find(&self, name: &str, record_id: i32) -> Option<usize> {
        self.references.iter().position(|r| r.name == name && r.record_id == record_id)
    }

    fn insertion_point(&self, name: &str, record_id: i32) -> usize {
        self.references.partition_point(|r| Self::sort_key(&r.name, r.record_id) < Self::sort_key(name, record_id))
    }

    /// Writes (or overwrites, if a matching name/recordID already exists)
    /// one metadata record (spec §4.9 `write`).
    pub fn write(&mut self, store: &mut impl Store, file_space: &mut FileSpaceManager, record: MetadataRecord) -> Result<()> {
        if let Some(index) = self.find(&record.name, record.record_id) {
            let old_offset = self.references[index].record_offset;
            file_space.deallocate(store, old_offset)?;
            self.references.remove(index);
        }

        let content_size = record.serialized_len();
        let content_pos = file_space.allocate(store, content_size as u64, RecordType::Metadata)?;
        store.seek(SeekFrom::Start(content_pos))?;
        record.write_content(store)?;
        file_space.finish(store, content_pos, round_up(content_size + 12, 8) as u64)?;

        let at = self.insertion_point(&record.name, record.record_id);
        self.references.insert(at, Reference { name: record.name, record_id: record.record_id, record_offset: content_pos });
        self.write_pending = true;
        Ok(())
    }

    /// Deletes one record by exact `(name, recordID)` (spec §4.9 `delete`).
    pub fn delete(&mut self, store: &mut impl Store, file_space: &mut FileSpaceManager, name: &str, record_id: i32) -> Result<bool> {
        match self.find(name, record_id) {
            Some(index) => {
                let reference = self.references.remove(index);
                file_space.deallocate(store, reference.record_offset)?;
                self.write_pending = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Reads every record matching `name` (or all, for the `"*"` wildcard)
    /// and `record_id` (or all, for [`WILDCARD_RECORD_ID`]) (spec §4.9
    /// `readByNameAndID`).
    pub fn read_by_name_and_id(&self, store: &mut impl Store, name: &str, record_id: i32) -> Result<Vec<MetadataRecord>> {
        let mut out = Vec::new();
        for reference in &self.references {
            let name_matches = name == WILDCARD_NAME || reference.name == name;
            let id_matches = record_id == WILDCARD_RECORD_ID || reference.record_id == record_id;
            if name_matches && id_matches {
                store.seek(SeekFrom::Start(reference.record_offset))?;
                out.push(MetadataRecord::read_content(store)?);
            }
        }
        Ok(out)
    }

    /// Deletes every record matching `name` (supports the `"*"` wildcard)
    /// and `record_id` (supports [`WILDCARD_RECORD_ID`]).
    pub fn delete_by_name_and_id(&mut self, store: &mut impl Store, file_space: &mut FileSpaceManager, name: &str, record_id: i32) -> Result<usize> {
        let matches: Vec<(String, i32)> = self.references.iter()
            .filter(|r| (name == WILDCARD_NAME || r.name == name) && (record_id == WILDCARD_RECORD_ID || r.record_id == record_id))
            .map(|r| (r.name.clone(), r.record_id))
            .collect();

        let mut count = 0;
        for (name, record_id) in matches {
            if self.delete(store, file_space, &name, record_id)? {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Serializes the directory's references (not the payloads themselves)
    /// into a `MetadataDir` record.
    pub fn write_directory(&mut self, store: &mut impl Store, file_space: &mut FileSpaceManager) -> Result<u64> {
        let mut content = Vec::new();
        content.extend_from_slice(&(self.references.len() as u32).to_le_bytes());
        for reference in &self.references {
            write_string(&mut content, &reference.name)?;
            content.extend_from_slice(&reference.record_id.to_le_bytes());
            content.extend_from_slice(&reference.record_offset.to_le_bytes());
        }

        let content_pos = file_space.allocate(store, content.len() as u64, RecordType::MetadataDir)?;
        store.seek(SeekFrom::Start(content_pos))?;
        store.write_all(&content)?;
        file_space.finish(store, content_pos, round_up(content.len() + 12, 8) as u64)?;
        self.write_pending = false;
        Ok(content_pos)
    }

    pub fn read_directory(store: &mut impl Store, content_pos: u64) -> Result<Self> {
        store.seek(SeekFrom::Start(content_pos))?;
        let count = u32::read(store)? as usize;

        let mut references = Vec::with_capacity(count);
        for _ in 0..count {
            let name = read_string(store)?;
            let record_id = i32::read(store)?;
            let mut offset_bytes = [0_u8; 8];
            std::io::Read::read_exact(store, &mut offset_bytes)?;
            references.push(Reference { name, record_id, record_offset: u64::from_le_bytes(offset_bytes) });
        }

        Ok(MetadataDirectory { references, write_pending: false })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Cursor;

    fn sample(name: &str, id: i32, payload: &[u8]) -> MetadataRecord {
        MetadataRecord { name: name.into(), record_id: id, kind: MetadataType::String, payload: payload.to_vec(), description: Some("d".into()) }
    }

    #[test]
    fn write_then_read_round_trips() {
        let mut store = Cursor::new(Vec::new());
        let mut fsm = FileSpaceManager::new(0);
        let mut dir = MetadataDirectory::new();

        dir.write(&mut store, &mut fsm, sample("author", 0, b"jane")).unwrap();
        let found = dir.read_by_name_and_id(&mut store, "author", 0).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].payload, b"jane");
    }

    #[test]
    fn overwrite_replaces_and_frees_old_record() {
        let mut store = Cursor::new(Vec::new());
        let mut fsm = FileSpaceManager::new(0);
        let mut dir = MetadataDirectory::new();

        dir.write(&mut store, &mut fsm, sample("author", 0, b"jane")).unwrap();
        dir.write(&mut store, &mut fsm, sample("author", 0, b"janet")).unwrap();

        assert_eq!(dir.len(), 1);
        let found = dir.read_by_name_and_id(&mut store, "author", 0).unwrap();
        assert_eq!(found[0].payload, b"janet");
        assert_eq!(fsm.free_block_count(), 1);
    }

    #[test]
    fn wildcard_name_and_id_match_everything() {
        let mut store = Cursor::new(Vec::new());
        let mut fsm = FileSpaceManager::new(0);
        let mut dir = MetadataDirectory::new();

        dir.write(&mut store, &mut fsm, sample("author", 0, b"a")).unwrap();
        dir.write(&mut store, &mut fsm, sample("author", 1, b"b")).unwrap();
        dir.write(&mut store, &mut fsm, sample("license", 0, b"c")).unwrap();

        let all = dir.read_by_name_and_id(&mut store, WILDCARD_NAME, WILDCARD_RECORD_ID).unwrap();
        assert_eq!(all.len(), 3);

        let all_authors = dir.read_by_name_and_id(&mut store, "author", WILDCARD_RECORD_ID).unwrap();
        assert_eq!(all_authors.len(), 2);
    }

    #[test]
    fn delete_all_frees_every_record() {
        let mut store = Cursor::new(Vec::new());
        let mut fsm = FileSpaceManager::new(0);
        let mut dir = MetadataDirectory::new();

        dir.write(&mut store, &mut fsm, sample("a", 0, b"1")).unwrap();
        dir.write(&mut store, &mut fsm, sample("b", 0, b"2")).unwrap();

        let deleted = dir.delete_by_name_and_id(&mut store, &mut fsm, WILDCARD_NAME, WILDCARD_RECORD_ID).unwrap();
        assert_eq!(deleted, 2);
        assert!(dir.is_empty());
        assert!(fsm.total_free_bytes() > 0);
    }

    #[test]
    fn directory_stays_sorted_by_name_then_id() {
        let mut store = Cursor::new(Vec::new());
        let mut fsm = FileSpaceManager::new(0);
        let mut dir = MetadataDirectory::new();

        dir.write(&mut store, &mut fsm, sample("b", 0, b"")).unwrap();
        dir.write(&mut store, &mut fsm, sample("a", 1, b"")).unwrap();
        dir.write(&mut store, &mut fsm, sample("a", 0, b"")).unwrap();

        let names: Vec<(String, i32)> = dir.references.iter().map(|r| (r.name.clone(), r.record_id)).collect();
        assert_eq!(names, vec![("a".into(), 0), ("a".into(), 1), ("b".into(), 0)]);
    }

    #[test]
    fn directory_of_references_round_trips() {
        let mut store = Cursor::new(Vec::new());
        let mut fsm = FileSpaceManager::new(0);
        let mut dir = MetadataDirectory::new();
        dir.write(&mut store, &mut fsm, sample("a", 0, b"x")).unwrap();
        dir.write(&mut store, &mut fsm, sample("b", 1, b"yy")).unwrap();

        let pos = dir.write_directory(&mut store, &mut fsm).unwrap();
        let reread = MetadataDirectory::read_directory(&mut store, pos).unwrap();
        assert_eq!(reread.len(), dir.len());
        let found = reread.read_by_name_and_id(&mut store, "b", 1).unwrap();
        assert_eq!(found[0].payload, b"yy");
    }
}
