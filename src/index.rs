//! Font index: face name to file path, with a persisted binary cache.
//!
//! Build with [`FontIndex::add`] per scanned file, finalize with
//! [`FontIndex::build_index`], then query with [`FontIndex::lookup`]. The
//! cache is a single little-endian blob; [`FontIndex::load`] validates every
//! offset and index before constructing anything, so a damaged cache yields
//! an error rather than a partial index.

use std::fs;
use std::path::{Path, PathBuf};

use crate::{font, Error, Result};

const MAGIC: [u8; 4] = *b"FCSB";
const VERSION: u16 = 1;
const HEADER_LEN: usize = 20;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexStats {
    pub num_files: u32,
    pub num_faces: u32,
}

#[derive(Debug)]
struct FaceRecord {
    name: String,
    /// Case-folded lookup key.
    key: String,
    /// Index into `files`.
    file: u32,
}

#[derive(Debug, Default)]
pub struct FontIndex {
    files: Vec<PathBuf>,
    faces: Vec<FaceRecord>,
}

impl FontIndex {
    pub fn new() -> FontIndex {
        FontIndex::default()
    }

    /// Parses `data` and records every face it advertises under `path`.
    /// Returns how many faces the file contributed; the path is stored only
    /// when that count is nonzero.
    pub fn add(&mut self, path: &Path, data: &[u8]) -> Result<usize> {
        let file = self.files.len() as u32;
        let before = self.faces.len();
        let faces = &mut self.faces;
        font::read_face_names(data, |name| {
            faces.push(FaceRecord {
                name: name.to_owned(),
                key: fold(name),
                file,
            });
        })?;
        let added = self.faces.len() - before;
        if added > 0 {
            self.files.push(path.to_path_buf());
        }
        Ok(added)
    }

    /// Finalizes lookup order. On duplicate face names the earliest
    /// insertion wins, so for a fixed scan order lookups are stable across
    /// runs. Must run before [`FontIndex::lookup`] or [`FontIndex::dump`].
    pub fn build_index(&mut self) {
        self.faces.sort_by(|a, b| a.key.cmp(&b.key));
        self.faces.dedup_by(|next, kept| next.key == kept.key);

        // Dedup can strip a file of its last face; drop and renumber so the
        // statistics describe the final face-to-file mapping.
        let mut remap = vec![u32::MAX; self.files.len()];
        let mut files = Vec::with_capacity(self.files.len());
        for face in &mut self.faces {
            let at = face.file as usize;
            if remap[at] == u32::MAX {
                remap[at] = files.len() as u32;
                files.push(std::mem::take(&mut self.files[at]));
            }
            face.file = remap[at];
        }
        self.files = files;
    }

    /// Case-insensitive face lookup. Vertical-writing `@` prefixes are the
    /// caller's to strip.
    pub fn lookup(&self, face: &str) -> Option<&Path> {
        let key = fold(face);
        let i = self
            .faces
            .binary_search_by(|record| record.key.as_str().cmp(key.as_str()))
            .ok()?;
        self.files.get(self.faces[i].file as usize).map(PathBuf::as_path)
    }

    pub fn stat(&self) -> IndexStats {
        IndexStats {
            num_files: self.files.len() as u32,
            num_faces: self.faces.len() as u32,
        }
    }

    /// Writes the index as a self-contained binary cache at `path`.
    pub fn dump(&self, path: &Path) -> Result<()> {
        let mut pool: Vec<u8> = Vec::new();
        let mut file_offsets = Vec::with_capacity(self.files.len());
        for file in &self.files {
            file_offsets.push(pool.len() as u32);
            push_utf16(&mut pool, &file.to_string_lossy());
        }
        let mut face_entries = Vec::with_capacity(self.faces.len());
        for face in &self.faces {
            face_entries.push((pool.len() as u32, face.file));
            push_utf16(&mut pool, &face.name);
        }

        let mut out =
            Vec::with_capacity(HEADER_LEN + pool.len() + face_entries.len() * 8 + file_offsets.len() * 4);
        out.extend_from_slice(&MAGIC);
        out.extend_from_slice(&VERSION.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes()); // flags, reserved
        out.extend_from_slice(&(self.files.len() as u32).to_le_bytes());
        out.extend_from_slice(&(self.faces.len() as u32).to_le_bytes());
        out.extend_from_slice(&(pool.len() as u32).to_le_bytes());
        out.extend_from_slice(&pool);
        for (offset, file) in &face_entries {
            out.extend_from_slice(&offset.to_le_bytes());
            out.extend_from_slice(&file.to_le_bytes());
        }
        for offset in &file_offsets {
            out.extend_from_slice(&offset.to_le_bytes());
        }
        fs::write(path, &out)?;
        Ok(())
    }

    /// Reads a cache written by [`FontIndex::dump`]. Any structural
    /// violation, including an empty or truncated file, is
    /// [`Error::Corrupt`] and yields no index.
    pub fn load(path: &Path) -> Result<FontIndex> {
        let data = fs::read(path)?;
        FontIndex::parse(&data)
    }

    fn parse(data: &[u8]) -> Result<FontIndex> {
        let header = data.get(..HEADER_LEN).ok_or(Error::Corrupt("cache header"))?;
        if header[..4] != MAGIC {
            return Err(Error::Corrupt("cache magic"));
        }
        if read_u16(header, 4) != VERSION {
            return Err(Error::Corrupt("cache version"));
        }
        let num_files = read_u32(header, 8) as usize;
        let num_faces = read_u32(header, 12) as usize;
        let pool_len = read_u32(header, 16) as usize;

        let faces_len = num_faces.checked_mul(8).ok_or(Error::Corrupt("cache sizes"))?;
        let files_len = num_files.checked_mul(4).ok_or(Error::Corrupt("cache sizes"))?;
        let expected = [pool_len, faces_len, files_len]
            .iter()
            .try_fold(HEADER_LEN, |total, &part| total.checked_add(part))
            .ok_or(Error::Corrupt("cache sizes"))?;
        if data.len() != expected {
            return Err(Error::Corrupt("cache length"));
        }

        let pool = &data[HEADER_LEN..HEADER_LEN + pool_len];
        let face_table = &data[HEADER_LEN + pool_len..HEADER_LEN + pool_len + faces_len];
        let file_table = &data[expected - files_len..];

        let mut files = Vec::with_capacity(num_files);
        for i in 0..num_files {
            files.push(PathBuf::from(pool_str(pool, read_u32(file_table, i * 4))?));
        }
        let mut faces = Vec::with_capacity(num_faces);
        for i in 0..num_faces {
            let file = read_u32(face_table, i * 8 + 4);
            if file as usize >= num_files {
                return Err(Error::Corrupt("cache file index"));
            }
            let name = pool_str(pool, read_u32(face_table, i * 8))?;
            faces.push(FaceRecord {
                key: fold(&name),
                name,
                file,
            });
        }

        let mut index = FontIndex { files, faces };
        index.build_index();
        Ok(index)
    }

    #[cfg(test)]
    fn insert_face(&mut self, name: &str, file: &Path) {
        let at = match self.files.iter().position(|f| f == file) {
            Some(at) => at as u32,
            None => {
                self.files.push(file.to_path_buf());
                (self.files.len() - 1) as u32
            }
        };
        self.faces.push(FaceRecord {
            name: name.to_owned(),
            key: fold(name),
            file: at,
        });
    }
}

fn fold(s: &str) -> String {
    s.to_lowercase()
}

fn push_utf16(pool: &mut Vec<u8>, s: &str) {
    for unit in s.encode_utf16() {
        pool.extend_from_slice(&unit.to_le_bytes());
    }
    pool.extend_from_slice(&0u16.to_le_bytes());
}

// NUL-terminated UTF-16LE string at `offset` in the pool.
fn pool_str(pool: &[u8], offset: u32) -> Result<String> {
    let offset = offset as usize;
    if offset % 2 != 0 {
        return Err(Error::Corrupt("cache string offset"));
    }
    let mut units = Vec::new();
    let mut at = offset;
    loop {
        let unit = pool
            .get(at..at + 2)
            .ok_or(Error::Corrupt("cache string terminator"))?;
        let unit = u16::from_le_bytes([unit[0], unit[1]]);
        if unit == 0 {
            break;
        }
        units.push(unit);
        at += 2;
    }
    Ok(String::from_utf16_lossy(&units))
}

fn read_u16(data: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([data[at], data[at + 1]])
}

fn read_u32(data: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::font::fixtures;

    fn sample() -> FontIndex {
        let mut index = FontIndex::new();
        index.insert_face("Arial", Path::new("a.ttf"));
        index.insert_face("Meiryo", Path::new("m.ttc"));
        index.insert_face("MeiryoBold", Path::new("m.ttc"));
        index.build_index();
        index
    }

    #[test]
    fn add_records_faces_and_files() {
        let mut index = FontIndex::new();
        let added = index
            .add(Path::new("arial.ttf"), &fixtures::simple_font("Arial"))
            .unwrap();
        assert_eq!(added, 1);
        index.build_index();
        assert_eq!(index.stat(), IndexStats { num_files: 1, num_faces: 1 });
        assert_eq!(index.lookup("arial"), Some(Path::new("arial.ttf")));
    }

    #[test]
    fn add_skips_non_fonts_without_recording() {
        let mut index = FontIndex::new();
        assert!(index.add(Path::new("x.bin"), b"GIF89a").is_err());
        assert_eq!(index.stat(), IndexStats::default());
    }

    #[test]
    fn lookup_is_case_insensitive_and_stable() {
        let index = sample();
        assert_eq!(index.lookup("ARIAL"), Some(Path::new("a.ttf")));
        assert_eq!(index.lookup("meiryobold"), Some(Path::new("m.ttc")));
        assert_eq!(index.lookup("Nope"), None);
        assert_eq!(index.lookup("ARIAL"), index.lookup("arial"));
    }

    #[test]
    fn first_insertion_wins_on_collision() {
        let mut index = FontIndex::new();
        index.insert_face("Arial", Path::new("first.ttf"));
        index.insert_face("ARIAL", Path::new("second.ttf"));
        index.build_index();
        assert_eq!(index.lookup("arial"), Some(Path::new("first.ttf")));
        // The losing file keeps no face, so it leaves the statistics too.
        assert_eq!(index.stat(), IndexStats { num_files: 1, num_faces: 1 });
    }

    #[test]
    fn colliding_scanned_files_drop_out_of_stats() {
        let mut index = FontIndex::new();
        index
            .add(Path::new("first.ttf"), &fixtures::simple_font("Arial"))
            .unwrap();
        index
            .add(Path::new("second.ttf"), &fixtures::simple_font("ARIAL"))
            .unwrap();
        index.build_index();
        assert_eq!(index.stat(), IndexStats { num_files: 1, num_faces: 1 });
        assert_eq!(index.lookup("Arial"), Some(Path::new("first.ttf")));

        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("fc-subs.db");
        index.dump(&cache).unwrap();
        let loaded = FontIndex::load(&cache).unwrap();
        assert_eq!(loaded.stat(), IndexStats { num_files: 1, num_faces: 1 });
        assert_eq!(loaded.lookup("arial"), Some(Path::new("first.ttf")));
    }

    #[test]
    fn dump_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("fc-subs.db");
        let index = sample();
        index.dump(&cache).unwrap();

        let loaded = FontIndex::load(&cache).unwrap();
        assert_eq!(loaded.stat(), IndexStats { num_files: 2, num_faces: 3 });
        assert_eq!(loaded.lookup("Arial"), Some(Path::new("a.ttf")));
        assert_eq!(loaded.lookup("Meiryo"), Some(Path::new("m.ttc")));
        assert_eq!(loaded.lookup("meiryobold"), Some(Path::new("m.ttc")));
        assert_eq!(loaded.lookup("Nope"), None);
    }

    #[test]
    fn roundtrip_preserves_non_ascii_names() {
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("fc-subs.db");
        let mut index = FontIndex::new();
        index.insert_face("メイリオ", Path::new("meiryo.ttc"));
        index.build_index();
        index.dump(&cache).unwrap();
        let loaded = FontIndex::load(&cache).unwrap();
        assert_eq!(loaded.lookup("メイリオ"), Some(Path::new("meiryo.ttc")));
    }

    #[test]
    fn empty_cache_file_is_corrupt() {
        assert!(matches!(FontIndex::parse(b""), Err(Error::Corrupt(_))));
    }

    #[test]
    fn bad_magic_is_corrupt() {
        let mut data = vec![0u8; HEADER_LEN];
        data[..4].copy_from_slice(b"NOPE");
        assert!(matches!(FontIndex::parse(&data), Err(Error::Corrupt(_))));
    }

    #[test]
    fn bad_version_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("fc-subs.db");
        sample().dump(&cache).unwrap();
        let mut data = fs::read(&cache).unwrap();
        data[4] = 0xff;
        assert!(matches!(FontIndex::parse(&data), Err(Error::Corrupt(_))));
    }

    #[test]
    fn truncation_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("fc-subs.db");
        sample().dump(&cache).unwrap();
        let data = fs::read(&cache).unwrap();
        for cut in [1, 7, HEADER_LEN, data.len() - 1] {
            assert!(
                matches!(FontIndex::parse(&data[..cut]), Err(Error::Corrupt(_))),
                "cut at {cut}"
            );
        }
    }

    #[test]
    fn out_of_range_offset_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("fc-subs.db");
        sample().dump(&cache).unwrap();
        let mut data = fs::read(&cache).unwrap();
        // First face-table entry: point its offset past the pool.
        let pool_len = read_u32(&data, 16) as usize;
        let face_table = HEADER_LEN + pool_len;
        data[face_table..face_table + 4].copy_from_slice(&u32::MAX.to_le_bytes());
        assert!(matches!(FontIndex::parse(&data), Err(Error::Corrupt(_))));
    }

    #[test]
    fn out_of_range_file_index_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("fc-subs.db");
        sample().dump(&cache).unwrap();
        let mut data = fs::read(&cache).unwrap();
        let pool_len = read_u32(&data, 16) as usize;
        let face_table = HEADER_LEN + pool_len;
        data[face_table + 4..face_table + 8].copy_from_slice(&99u32.to_le_bytes());
        assert!(matches!(FontIndex::parse(&data), Err(Error::Corrupt(_))));
    }
}
