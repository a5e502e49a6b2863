// (c) Copyright 2025 Mikołaj Kuranowski
// SPDX-License-Identifier: MIT

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use flate2::bufread::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::graph::GraphSnapshot;
use crate::{Edge, Graph, Node, RestrictionKind, TurnRestriction};

/// Snapshot file magic, "NAVG".
const MAGIC: u32 = 0x4E41_5647;

/// Current snapshot format version.
const FORMAT_VERSION: u32 = 1;

/// Max permitted length for a serialized string - 64 KiB.
/// Tag keys and values are short; anything bigger indicates a corrupt file.
const MAX_STRING_LEN: i32 = 64 * 1024;

/// Max permitted number of tags on a single edge.
const MAX_TAG_COUNT: i32 = 4096;

/// Error which can occur when saving or loading a graph snapshot.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("io: {0}")]
    Io(#[from] io::Error),

    /// The data does not follow the snapshot format.
    #[error("invalid format: {0}")]
    InvalidFormat(String),

    /// The snapshot was written by an incompatible format version.
    #[error("unsupported version: {0}")]
    UnsupportedVersion(u32),
}

/// Reads and writes [Graph] snapshots at a fixed path.
///
/// The snapshot is a little-endian binary stream - header (magic +
/// version), node records, forward edges, reverse edges, turn restrictions -
/// compressed as a whole with gzip. Record order within each section is
/// unspecified; loading does not depend on it.
#[derive(Debug, Clone)]
pub struct Storage {
    path: PathBuf,
}

impl Storage {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Serialises the graph to the storage path.
    pub fn save(&self, g: &Graph) -> Result<(), StorageError> {
        let file = File::create(&self.path)?;
        let mut writer = GzEncoder::new(BufWriter::new(file), Compression::default());
        write_snapshot(&mut writer, &g.export())?;
        writer.finish()?;
        Ok(())
    }

    /// Loads a graph from the storage path. Files whose magic or version
    /// mismatch are rejected; corruption beyond that surfaces as
    /// [StorageError::InvalidFormat] or an I/O error from the decompressor.
    pub fn load(&self) -> Result<Graph, StorageError> {
        let file = File::open(&self.path)?;
        let mut reader = BufReader::new(MultiGzDecoder::new(BufReader::new(file)));
        let snapshot = read_snapshot(&mut reader)?;
        Ok(Graph::from_snapshot(snapshot))
    }
}

fn write_snapshot<W: Write>(w: &mut W, snapshot: &GraphSnapshot) -> Result<(), StorageError> {
    w.write_u32::<LittleEndian>(MAGIC)?;
    w.write_u32::<LittleEndian>(FORMAT_VERSION)?;

    w.write_i32::<LittleEndian>(section_len(snapshot.nodes.len(), "node")?)?;
    for node in &snapshot.nodes {
        w.write_i64::<LittleEndian>(node.id)?;
        w.write_f64::<LittleEndian>(node.lat)?;
        w.write_f64::<LittleEndian>(node.lon)?;
    }

    w.write_i32::<LittleEndian>(section_len(snapshot.edges.len(), "edge")?)?;
    for edge in &snapshot.edges {
        write_edge(w, edge)?;
    }

    w.write_i32::<LittleEndian>(section_len(snapshot.reverse_edges.len(), "reverse edge")?)?;
    for edge in &snapshot.reverse_edges {
        write_edge(w, edge)?;
    }

    w.write_i32::<LittleEndian>(section_len(snapshot.restrictions.len(), "restriction")?)?;
    for restriction in &snapshot.restrictions {
        w.write_i64::<LittleEndian>(restriction.from_way)?;
        w.write_i64::<LittleEndian>(restriction.via_node)?;
        w.write_i64::<LittleEndian>(restriction.to_way)?;
        write_string(w, restriction.kind.as_str())?;
    }

    Ok(())
}

fn write_edge<W: Write>(w: &mut W, edge: &Edge) -> Result<(), StorageError> {
    w.write_i64::<LittleEndian>(edge.from)?;
    w.write_i64::<LittleEndian>(edge.to)?;
    w.write_f64::<LittleEndian>(edge.weight)?;
    w.write_i64::<LittleEndian>(edge.way_id)?;
    w.write_f64::<LittleEndian>(edge.max_speed)?;

    w.write_i32::<LittleEndian>(section_len(edge.tags.len(), "tag")?)?;
    for (key, value) in &edge.tags {
        write_string(w, key)?;
        write_string(w, value)?;
    }
    Ok(())
}

fn write_string<W: Write>(w: &mut W, s: &str) -> Result<(), StorageError> {
    let len = i32::try_from(s.len())
        .ok()
        .filter(|&l| l <= MAX_STRING_LEN)
        .ok_or_else(|| StorageError::InvalidFormat(format!("string too long: {} bytes", s.len())))?;
    w.write_i32::<LittleEndian>(len)?;
    w.write_all(s.as_bytes())?;
    Ok(())
}

fn section_len(len: usize, what: &str) -> Result<i32, StorageError> {
    i32::try_from(len)
        .map_err(|_| StorageError::InvalidFormat(format!("{} count exceeds format limit", what)))
}

fn read_snapshot<R: Read>(r: &mut R) -> Result<GraphSnapshot, StorageError> {
    let magic = r.read_u32::<LittleEndian>()?;
    if magic != MAGIC {
        return Err(StorageError::InvalidFormat(format!("bad magic: {magic:#010x}")));
    }
    let version = r.read_u32::<LittleEndian>()?;
    if version != FORMAT_VERSION {
        return Err(StorageError::UnsupportedVersion(version));
    }

    let mut snapshot = GraphSnapshot::default();

    let node_count = read_count(r, "node")?;
    snapshot.nodes.reserve(node_count);
    for _ in 0..node_count {
        snapshot.nodes.push(Node {
            id: r.read_i64::<LittleEndian>()?,
            lat: r.read_f64::<LittleEndian>()?,
            lon: r.read_f64::<LittleEndian>()?,
        });
    }

    let edge_count = read_count(r, "edge")?;
    snapshot.edges.reserve(edge_count);
    for _ in 0..edge_count {
        snapshot.edges.push(read_edge(r)?);
    }

    let reverse_edge_count = read_count(r, "reverse edge")?;
    snapshot.reverse_edges.reserve(reverse_edge_count);
    for _ in 0..reverse_edge_count {
        snapshot.reverse_edges.push(read_edge(r)?);
    }

    let restriction_count = read_count(r, "restriction")?;
    snapshot.restrictions.reserve(restriction_count);
    for _ in 0..restriction_count {
        let from_way = r.read_i64::<LittleEndian>()?;
        let via_node = r.read_i64::<LittleEndian>()?;
        let to_way = r.read_i64::<LittleEndian>()?;
        let kind_tag = read_string(r)?;
        let kind = RestrictionKind::from_tag(&kind_tag).ok_or_else(|| {
            StorageError::InvalidFormat(format!("unknown restriction kind '{kind_tag}'"))
        })?;
        snapshot.restrictions.push(TurnRestriction {
            from_way,
            via_node,
            to_way,
            kind,
        });
    }

    Ok(snapshot)
}

fn read_edge<R: Read>(r: &mut R) -> Result<Edge, StorageError> {
    let from = r.read_i64::<LittleEndian>()?;
    let to = r.read_i64::<LittleEndian>()?;
    let weight = r.read_f64::<LittleEndian>()?;
    let way_id = r.read_i64::<LittleEndian>()?;
    let max_speed = r.read_f64::<LittleEndian>()?;

    let tag_count = r.read_i32::<LittleEndian>()?;
    if !(0..=MAX_TAG_COUNT).contains(&tag_count) {
        return Err(StorageError::InvalidFormat(format!(
            "bad tag count: {tag_count}"
        )));
    }

    let mut tags = HashMap::with_capacity(tag_count as usize);
    for _ in 0..tag_count {
        let key = read_string(r)?;
        let value = read_string(r)?;
        tags.insert(key, value);
    }

    Ok(Edge {
        from,
        to,
        weight,
        way_id,
        max_speed,
        tags,
    })
}

fn read_string<R: Read>(r: &mut R) -> Result<String, StorageError> {
    let len = r.read_i32::<LittleEndian>()?;
    if !(0..=MAX_STRING_LEN).contains(&len) {
        return Err(StorageError::InvalidFormat(format!(
            "bad string length: {len}"
        )));
    }

    let mut buf = vec![0u8; len as usize];
    r.read_exact(&mut buf)?;
    String::from_utf8(buf)
        .map_err(|e| StorageError::InvalidFormat(format!("string is not utf-8: {e}")))
}

fn read_count<R: Read>(r: &mut R, what: &str) -> Result<usize, StorageError> {
    let count = r.read_i32::<LittleEndian>()?;
    if count < 0 {
        return Err(StorageError::InvalidFormat(format!(
            "negative {} count: {}",
            what, count
        )));
    }
    Ok(count as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    macro_rules! tags {
        {} => { HashMap::default() };
        {$( $k:literal : $v:literal ),+} => {
            HashMap::from_iter([ $( ($k.to_string(), $v.to_string()) ),+ ])
        };
    }

    fn test_graph() -> Graph {
        let mut g = Graph::new();
        g.add_node(Node { id: 1, lat: 52.1, lon: 21.0 });
        g.add_node(Node { id: 2, lat: 52.2, lon: 21.1 });
        g.add_node(Node { id: 3, lat: 52.3, lon: 21.2 });
        g.add_edge(Edge {
            from: 1,
            to: 2,
            weight: 1234.5,
            way_id: 100,
            max_speed: 13.89,
            tags: tags! {"highway": "primary", "name": "Świętokrzyska"},
        });
        g.add_edge(Edge {
            from: 2,
            to: 1,
            weight: 1234.5,
            way_id: 100,
            max_speed: 13.89,
            tags: tags! {"highway": "primary"},
        });
        g.add_edge(Edge {
            from: 2,
            to: 3,
            weight: 987.0,
            way_id: 200,
            max_speed: 0.0,
            tags: tags! {},
        });
        g.add_restriction(TurnRestriction {
            from_way: 100,
            via_node: 2,
            to_way: 200,
            kind: RestrictionKind::NoLeftTurn,
        });
        g
    }

    fn temp_storage() -> (tempfile::TempDir, Storage) {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(dir.path().join("graph.bin.gz"));
        (dir, storage)
    }

    #[test]
    fn save_and_load() {
        let g = test_graph();
        let (_dir, storage) = temp_storage();

        storage.save(&g).unwrap();
        let loaded = storage.load().unwrap();

        assert_eq!(loaded.node_count(), g.node_count());
        assert_eq!(loaded.edge_count(), g.edge_count());
        assert_eq!(loaded.get_node(2), g.get_node(2));
        assert_eq!(loaded.restrictions_at(2), g.restrictions_at(2));

        let original_tags = &g.outgoing_edges(1)[0].tags;
        let loaded_tags = &loaded.outgoing_edges(1)[0].tags;
        assert_eq!(original_tags, loaded_tags);

        assert_eq!(loaded.incoming_edges(3).len(), 1);
        assert_eq!(loaded.incoming_edges(3)[0], g.incoming_edges(3)[0]);
    }

    #[test]
    fn save_and_load_empty_graph() {
        let (_dir, storage) = temp_storage();
        storage.save(&Graph::new()).unwrap();

        let loaded = storage.load().unwrap();
        assert_eq!(loaded.node_count(), 0);
        assert_eq!(loaded.edge_count(), 0);
    }

    #[test]
    fn loading_twice_yields_identical_graphs() {
        let (_dir, storage) = temp_storage();
        storage.save(&test_graph()).unwrap();

        let a = storage.load().unwrap();
        let b = storage.load().unwrap();
        assert_eq!(a.node_count(), b.node_count());
        assert_eq!(a.edge_count(), b.edge_count());
        assert_eq!(a.outgoing_edges(2), b.outgoing_edges(2));
        assert_eq!(a.incoming_edges(2), b.incoming_edges(2));
        assert_eq!(a.restrictions_at(2), b.restrictions_at(2));
    }

    #[test]
    fn rejects_bad_magic() {
        let (_dir, storage) = temp_storage();
        {
            let file = File::create(storage.path()).unwrap();
            let mut w = GzEncoder::new(file, Compression::default());
            w.write_u32::<LittleEndian>(0xDEAD_BEEF).unwrap();
            w.write_u32::<LittleEndian>(FORMAT_VERSION).unwrap();
            w.finish().unwrap();
        }

        assert!(matches!(
            storage.load(),
            Err(StorageError::InvalidFormat(_))
        ));
    }

    #[test]
    fn rejects_unknown_version() {
        let (_dir, storage) = temp_storage();
        {
            let file = File::create(storage.path()).unwrap();
            let mut w = GzEncoder::new(file, Compression::default());
            w.write_u32::<LittleEndian>(MAGIC).unwrap();
            w.write_u32::<LittleEndian>(99).unwrap();
            w.finish().unwrap();
        }

        assert!(matches!(
            storage.load(),
            Err(StorageError::UnsupportedVersion(99))
        ));
    }

    #[test]
    fn rejects_negative_counts() {
        let (_dir, storage) = temp_storage();
        {
            let file = File::create(storage.path()).unwrap();
            let mut w = GzEncoder::new(file, Compression::default());
            w.write_u32::<LittleEndian>(MAGIC).unwrap();
            w.write_u32::<LittleEndian>(FORMAT_VERSION).unwrap();
            w.write_i32::<LittleEndian>(-5).unwrap();
            w.finish().unwrap();
        }

        assert!(matches!(
            storage.load(),
            Err(StorageError::InvalidFormat(_))
        ));
    }

    #[test]
    fn rejects_truncated_files() {
        let g = test_graph();
        let (_dir, storage) = temp_storage();
        storage.save(&g).unwrap();

        let data = std::fs::read(storage.path()).unwrap();
        std::fs::write(storage.path(), &data[..data.len() / 2]).unwrap();

        assert!(storage.load().is_err());
    }
}
