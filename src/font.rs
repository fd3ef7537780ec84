//! Face-name extraction from font files.
//!
//! A candidate file is either a single sfnt (TrueType/OpenType scaler tags)
//! or a `ttcf` collection wrapping several table directories. For every face
//! the naming table is walked record by record; family-category records are
//! decoded per their platform/encoding and reported case-preserved. Offsets
//! come from the file and are never trusted: each read is range-checked, a
//! bad record or face is skipped, and the reader reports whatever names it
//! could recover.

use std::collections::BTreeMap;

use allsorts::binary::read::ReadScope;
use allsorts::font_data::FontData;
use allsorts::tables::{FontTableProvider, NameTable};
use allsorts::tag;

use crate::{Error, Result};

// sfnt scaler types, big-endian at offset 0.
const SFNT_TRUETYPE: u32 = 0x0001_0000;
const SFNT_TRUE: u32 = u32::from_be_bytes(*b"true");
const SFNT_TYP1: u32 = u32::from_be_bytes(*b"typ1");
const SFNT_OTTO: u32 = u32::from_be_bytes(*b"OTTO");
const TTCF: u32 = u32::from_be_bytes(*b"ttcf");

// Naming-table ids that carry a face name.
const NAME_FAMILY: u16 = 1;
const NAME_SUBFAMILY: u16 = 2;
const NAME_FULL: u16 = 4;
const NAME_TYPO_FAMILY: u16 = 16;
const NAME_TYPO_SUBFAMILY: u16 = 17;

const PLATFORM_UNICODE: u16 = 0;
const PLATFORM_MACINTOSH: u16 = 1;
const PLATFORM_MICROSOFT: u16 = 3;

/// True if `data` starts with a recognized container signature.
pub fn is_candidate(data: &[u8]) -> bool {
    signature(data).is_some()
}

fn signature(data: &[u8]) -> Option<u32> {
    let sig = u32::from_be_bytes(data.get(..4)?.try_into().ok()?);
    match sig {
        SFNT_TRUETYPE | SFNT_TRUE | SFNT_TYP1 | SFNT_OTTO | TTCF => Some(sig),
        _ => None,
    }
}

/// Number of faces advertised by the container header.
fn face_count(data: &[u8], sig: u32) -> usize {
    if sig != TTCF {
        return 1;
    }
    data.get(8..12)
        .and_then(|b| b.try_into().ok())
        .map(u32::from_be_bytes)
        .unwrap_or(0) as usize
}

/// Extracts every face name in `data`, invoking `emit` once per name.
///
/// An unrecognized signature is [`Error::Unsupported`]; a container whose
/// header cannot be parsed is [`Error::Corrupt`]. Individual faces and
/// records that fail to parse or decode are skipped.
pub fn read_face_names(data: &[u8], mut emit: impl FnMut(&str)) -> Result<()> {
    let sig = signature(data).ok_or(Error::Unsupported)?;
    let scope = ReadScope::new(data);
    let font_file = scope
        .read::<FontData<'_>>()
        .map_err(|_| Error::Corrupt("font container header"))?;

    for face in 0..face_count(data, sig) {
        let provider = match font_file.table_provider(face) {
            Ok(provider) => provider,
            Err(_) => continue,
        };
        let name_data = match provider.table_data(tag::NAME) {
            Ok(Some(data)) => data,
            _ => continue,
        };
        let name_table = match ReadScope::new(&name_data).read::<NameTable<'_>>() {
            Ok(table) => table,
            Err(_) => continue,
        };
        face_names(&name_table, &mut emit);
    }
    Ok(())
}

// Family and subfamily records belonging to one (platform, encoding,
// language) group; subfamilies only make a face name together with their
// family half.
#[derive(Default)]
struct NameGroup {
    family: Option<String>,
    subfamily: Option<String>,
    typo_family: Option<String>,
    typo_subfamily: Option<String>,
}

fn face_names(table: &NameTable<'_>, emit: &mut impl FnMut(&str)) {
    let mut groups: BTreeMap<(u16, u16, u16), NameGroup> = BTreeMap::new();

    for record in table.name_records.iter() {
        let id = record.name_id;
        if !matches!(
            id,
            NAME_FAMILY | NAME_SUBFAMILY | NAME_FULL | NAME_TYPO_FAMILY | NAME_TYPO_SUBFAMILY
        ) {
            continue;
        }
        let decoded = decode_record(
            table,
            record.platform_id,
            record.encoding_id,
            usize::from(record.offset),
            usize::from(record.length),
        );
        let text = match decoded {
            Some(text) if !text.is_empty() => text,
            _ => continue,
        };
        let key = (record.platform_id, record.encoding_id, record.language_id);
        let group = groups.entry(key).or_default();
        match id {
            NAME_FULL => emit(&text),
            NAME_FAMILY => {
                emit(&text);
                group.family.get_or_insert(text);
            }
            NAME_TYPO_FAMILY => {
                emit(&text);
                group.typo_family.get_or_insert(text);
            }
            NAME_SUBFAMILY => {
                group.subfamily.get_or_insert(text);
            }
            NAME_TYPO_SUBFAMILY => {
                group.typo_subfamily.get_or_insert(text);
            }
            _ => {}
        }
    }

    for group in groups.values() {
        combined(group.family.as_deref(), group.subfamily.as_deref(), emit);
        combined(group.typo_family.as_deref(), group.typo_subfamily.as_deref(), emit);
    }
}

// "Regular" adds nothing over the bare family name.
fn combined(family: Option<&str>, subfamily: Option<&str>, emit: &mut impl FnMut(&str)) {
    if let (Some(family), Some(subfamily)) = (family, subfamily) {
        if !subfamily.is_empty() && !subfamily.eq_ignore_ascii_case("regular") {
            emit(&format!("{family} {subfamily}"));
        }
    }
}

fn decode_record(
    table: &NameTable<'_>,
    platform_id: u16,
    encoding_id: u16,
    offset: usize,
    length: usize,
) -> Option<String> {
    let bytes = table.string_storage.offset_length(offset, length).ok()?.data();
    match (platform_id, encoding_id) {
        (PLATFORM_UNICODE, _) => Some(decode_utf16_be(bytes)),
        (PLATFORM_MICROSOFT, 0 | 1 | 10) => Some(decode_utf16_be(bytes)),
        (PLATFORM_MACINTOSH, 0) => Some(decode_mac_roman(bytes)),
        // Other platform/encoding pairs are soft-unsupported.
        _ => None,
    }
}

fn decode_utf16_be(bytes: &[u8]) -> String {
    let units = bytes.chunks_exact(2).map(|c| u16::from_be_bytes([c[0], c[1]]));
    char::decode_utf16(units)
        .map(|r| r.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect()
}

fn decode_mac_roman(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|&b| {
            if b < 0x80 {
                b as char
            } else {
                MAC_ROMAN_HIGH[usize::from(b - 0x80)]
            }
        })
        .collect()
}

// Mac OS Roman, upper half (0x80..=0xFF).
#[rustfmt::skip]
const MAC_ROMAN_HIGH: [char; 128] = [
    'Ä', 'Å', 'Ç', 'É', 'Ñ', 'Ö', 'Ü', 'á', 'à', 'â', 'ä', 'ã', 'å', 'ç', 'é', 'è',
    'ê', 'ë', 'í', 'ì', 'î', 'ï', 'ñ', 'ó', 'ò', 'ô', 'ö', 'õ', 'ú', 'ù', 'û', 'ü',
    '†', '°', '¢', '£', '§', '•', '¶', 'ß', '®', '©', '™', '´', '¨', '≠', 'Æ', 'Ø',
    '∞', '±', '≤', '≥', '¥', 'µ', '∂', '∑', '∏', 'π', '∫', 'ª', 'º', 'Ω', 'æ', 'ø',
    '¿', '¡', '¬', '√', 'ƒ', '≈', '∆', '«', '»', '…', '\u{a0}', 'À', 'Ã', 'Õ', 'Œ', 'œ',
    '–', '—', '“', '”', '‘', '’', '÷', '◊', 'ÿ', 'Ÿ', '⁄', '€', '‹', '›', 'ﬁ', 'ﬂ',
    '‡', '·', '‚', '„', '‰', 'Â', 'Ê', 'Á', 'Ë', 'È', 'Í', 'Î', 'Ï', 'Ì', 'Ó', 'Ô',
    '\u{f8ff}', 'Ò', 'Ú', 'Û', 'Ù', 'ı', 'ˆ', '˜', '¯', '˘', '˙', '˚', '¸', '˝', '˛', 'ˇ',
];

#[cfg(test)]
pub(crate) mod fixtures {
    //! Hand-assembled sfnt containers for tests: a table directory holding a
    //! single `name` table, optionally wrapped in a `ttcf` header.

    pub fn utf16be(s: &str) -> Vec<u8> {
        s.encode_utf16().flat_map(|u| u.to_be_bytes()).collect()
    }

    /// `(platform, encoding, language, name_id, string)` records.
    pub fn name_table(entries: &[(u16, u16, u16, u16, &[u8])]) -> Vec<u8> {
        let mut strings: Vec<u8> = Vec::new();
        let mut records: Vec<[u16; 6]> = Vec::new();
        for &(platform, encoding, language, name_id, data) in entries {
            records.push([
                platform,
                encoding,
                language,
                name_id,
                data.len() as u16,
                strings.len() as u16,
            ]);
            strings.extend_from_slice(data);
        }
        name_table_raw(&records, &strings)
    }

    /// Like [`name_table`] but with raw records, for out-of-range offsets.
    pub fn name_table_raw(records: &[[u16; 6]], strings: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend(0u16.to_be_bytes()); // format
        out.extend((records.len() as u16).to_be_bytes());
        out.extend((6 + 12 * records.len() as u16).to_be_bytes()); // stringOffset
        for record in records {
            for field in record {
                out.extend(field.to_be_bytes());
            }
        }
        out.extend_from_slice(strings);
        out
    }

    /// A one-table sfnt whose directory offsets assume the block starts at
    /// file offset `base`.
    pub fn sfnt_at(name_table: &[u8], base: u32) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend(0x0001_0000u32.to_be_bytes());
        out.extend(1u16.to_be_bytes()); // numTables
        out.extend(16u16.to_be_bytes()); // searchRange
        out.extend(0u16.to_be_bytes()); // entrySelector
        out.extend(0u16.to_be_bytes()); // rangeShift
        out.extend(*b"name");
        out.extend(0u32.to_be_bytes()); // checksum, unchecked on read
        out.extend((base + 28).to_be_bytes());
        out.extend((name_table.len() as u32).to_be_bytes());
        out.extend_from_slice(name_table);
        out
    }

    pub fn single(name_table: &[u8]) -> Vec<u8> {
        sfnt_at(name_table, 0)
    }

    /// A `ttcf` collection with one sfnt block per face.
    pub fn collection(name_tables: &[&[u8]]) -> Vec<u8> {
        let n = name_tables.len() as u32;
        let mut offsets = Vec::new();
        let mut at = 12 + 4 * n;
        for table in name_tables {
            offsets.push(at);
            at += 28 + table.len() as u32;
        }
        let mut out = Vec::new();
        out.extend(*b"ttcf");
        out.extend(0x0001_0000u32.to_be_bytes());
        out.extend(n.to_be_bytes());
        for off in &offsets {
            out.extend(off.to_be_bytes());
        }
        for (table, off) in name_tables.iter().zip(&offsets) {
            out.extend(sfnt_at(table, *off));
        }
        out
    }

    /// A minimal single-face font advertising `family` on the Microsoft
    /// platform, US English.
    pub fn simple_font(family: &str) -> Vec<u8> {
        single(&name_table(&[(3, 1, 0x409, 1, &utf16be(family))]))
    }
}
