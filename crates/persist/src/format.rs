//! Flat saved-graph format.
//!
//! ```text
//! magic    4 bytes  "PRSG"
//! version  u32 LE
//! body     u32 LE length, then CBOR of the object table
//! strings  u32 LE length, then the NUL-separated string block
//! ```
//!
//! While saved, links are dense indices into the object table and string
//! handles are byte offsets into the string block. Transient state is never
//! written.

use prism_common::{StringBlockError, StringBlockReader, StringBlockWriter, StringHandle, StringTable};
use prism_graph::{
    ClassKind, ClassRegistry, GraphObject, ObjectData, ObjectId, RemapVisitor, RenderGraph,
    Transient,
};
use crate::validate::check_topology;
use serde::{Deserialize, Serialize};

pub const MAGIC: [u8; 4] = *b"PRSG";
pub const FORMAT_VERSION: u32 = 1;

/// Errors from saving or loading a graph.
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("not a saved graph (bad magic)")]
    BadMagic,
    #[error("unsupported format version {found}, expected {expected}")]
    UnsupportedVersion { found: u32, expected: u32 },
    #[error("saved graph truncated")]
    Truncated,
    #[error("CBOR serialization error: {0}")]
    CborEncode(String),
    #[error("CBOR deserialization error: {0}")]
    CborDecode(String),
    #[error("string block: {0}")]
    StringBlock(#[from] StringBlockError),
    #[error("link to object {index} outside table of {count}")]
    DanglingLink { index: u32, count: usize },
    #[error("unknown dynamic class {0:?}")]
    UnknownClass(String),
    #[error("corrupt saved graph at object {index}")]
    CorruptGraph { index: u32 },
}

#[derive(Debug, Serialize, Deserialize)]
struct SavedGraph {
    scene: Option<ObjectId>,
    objects: Vec<GraphObject>,
}

/// Serialize `graph` into a flat buffer.
pub fn save(graph: &RenderGraph) -> Result<Vec<u8>, PersistError> {
    let mut dense = vec![None; graph.slot_count()];
    for (next, (id, _)) in graph.iter().enumerate() {
        dense[id.index()] = Some(next as u32);
    }

    let mut remap = SaveRemap {
        dense: &dense,
        strings: graph.strings(),
        block: StringBlockWriter::new(),
        dangling: None,
    };
    let mut objects = Vec::with_capacity(graph.len());
    for (_, object) in graph.iter() {
        let mut saved = object.clone();
        saved.remap(&mut remap);
        objects.push(saved);
    }
    let mut scene = graph.scene();
    remap.remap_weak(&mut scene);
    if let Some(index) = remap.dangling {
        return Err(PersistError::DanglingLink {
            index,
            count: graph.slot_count(),
        });
    }

    let mut body = Vec::new();
    ciborium::into_writer(&SavedGraph { scene, objects }, &mut body)
        .map_err(|e| PersistError::CborEncode(e.to_string()))?;
    let strings = remap.block.finish();

    let mut out = Vec::with_capacity(16 + body.len() + strings.len());
    out.extend_from_slice(&MAGIC);
    out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    out.extend_from_slice(&(body.len() as u32).to_le_bytes());
    out.extend_from_slice(&body);
    out.extend_from_slice(&(strings.len() as u32).to_le_bytes());
    out.extend_from_slice(&strings);
    tracing::debug!(
        objects = graph.len(),
        body = body.len(),
        strings = strings.len(),
        "saved render graph"
    );
    Ok(out)
}

/// Rebuild a graph from a buffer produced by [`save`].
///
/// `strings` is the live path manager the saved strings are interned into;
/// `classes` must already hold every effect and custom-material class the
/// graph instantiates.
pub fn load(
    bytes: &[u8],
    mut strings: StringTable,
    classes: ClassRegistry,
) -> Result<RenderGraph, PersistError> {
    let mut cursor = bytes;
    if take(&mut cursor, 4)? != MAGIC {
        return Err(PersistError::BadMagic);
    }
    let version = take_u32(&mut cursor)?;
    if version != FORMAT_VERSION {
        return Err(PersistError::UnsupportedVersion {
            found: version,
            expected: FORMAT_VERSION,
        });
    }
    let body_len = take_u32(&mut cursor)? as usize;
    let body = take(&mut cursor, body_len)?;
    let strings_len = take_u32(&mut cursor)? as usize;
    let block = take(&mut cursor, strings_len)?;

    let saved: SavedGraph =
        ciborium::from_reader(body).map_err(|e| PersistError::CborDecode(e.to_string()))?;
    let count = saved.objects.len();

    let mut remap = LoadRemap {
        count,
        block: StringBlockReader::new(block),
        strings: &mut strings,
        error: None,
    };
    let mut objects = Vec::with_capacity(count);
    for mut object in saved.objects {
        object.remap(&mut remap);
        object.dirty = true;
        if let Some(node) = object.data.node_mut() {
            node.transform_dirty = true;
        }
        if let ObjectData::Text(text) = &mut object.data {
            text.text_dirty = true;
        }
        objects.push(Some(object));
    }
    let mut scene = saved.scene;
    remap.remap_weak(&mut scene);
    if let Some(error) = remap.error {
        return Err(error);
    }
    check_topology(&objects, scene)?;

    for object in objects.iter().flatten() {
        let (class_name, kind) = match &object.data {
            ObjectData::Effect(e) => (e.class_name, ClassKind::Effect),
            ObjectData::CustomMaterial(m) => (m.class_name, ClassKind::CustomMaterial),
            _ => continue,
        };
        let name = strings.get(class_name);
        if !classes.contains(name, kind) {
            return Err(PersistError::UnknownClass(name.to_string()));
        }
    }

    tracing::debug!(objects = count, "loaded render graph");
    Ok(RenderGraph::restore(objects, scene, strings, classes))
}

fn take<'a>(cursor: &mut &'a [u8], len: usize) -> Result<&'a [u8], PersistError> {
    if cursor.len() < len {
        return Err(PersistError::Truncated);
    }
    let (head, tail) = cursor.split_at(len);
    *cursor = tail;
    Ok(head)
}

fn take_u32(cursor: &mut &[u8]) -> Result<u32, PersistError> {
    let bytes = take(cursor, 4)?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Live ids to dense indices, string handles to block offsets.
struct SaveRemap<'a> {
    dense: &'a [Option<u32>],
    strings: &'a StringTable,
    block: StringBlockWriter,
    dangling: Option<u32>,
}

impl SaveRemap<'_> {
    fn link(&mut self, link: &mut Option<ObjectId>) {
        let Some(id) = *link else { return };
        match self.dense.get(id.index()).copied().flatten() {
            Some(index) => *link = Some(ObjectId(index)),
            None => {
                self.dangling.get_or_insert(id.0);
                *link = None;
            }
        }
    }
}

impl RemapVisitor for SaveRemap<'_> {
    fn remap_owned(&mut self, link: &mut Option<ObjectId>) {
        self.link(link);
    }

    fn remap_weak(&mut self, link: &mut Option<ObjectId>) {
        self.link(link);
    }

    fn remap_string(&mut self, text: &mut StringHandle) {
        *text = StringHandle(self.block.write(self.strings, *text));
    }

    fn reset_transient(&mut self, field: &mut dyn Transient) {
        field.reset();
    }
}

/// Validates dense indices and interns block strings into the live table.
struct LoadRemap<'a> {
    count: usize,
    block: StringBlockReader<'a>,
    strings: &'a mut StringTable,
    error: Option<PersistError>,
}

impl LoadRemap<'_> {
    fn link(&mut self, link: &mut Option<ObjectId>) {
        let Some(id) = *link else { return };
        if id.index() >= self.count {
            *link = None;
            self.error.get_or_insert(PersistError::DanglingLink {
                index: id.0,
                count: self.count,
            });
        }
    }
}

impl RemapVisitor for LoadRemap<'_> {
    fn remap_owned(&mut self, link: &mut Option<ObjectId>) {
        self.link(link);
    }

    fn remap_weak(&mut self, link: &mut Option<ObjectId>) {
        self.link(link);
    }

    fn remap_string(&mut self, text: &mut StringHandle) {
        match self.block.read(text.0) {
            Ok(value) => *text = self.strings.intern(value),
            Err(e) => {
                *text = StringHandle::EMPTY;
                self.error.get_or_insert(e.into());
            }
        }
    }

    fn reset_transient(&mut self, field: &mut dyn Transient) {
        field.reset();
    }
}
