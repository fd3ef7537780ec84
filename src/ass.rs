//! ASS/SSA face-name extraction.
//!
//! A single streaming pass over a UTF-16 script. Face names come from two
//! places: the second field of `Style:` lines and `\fn` overrides inside
//! `{...}` blocks on `Dialogue:` lines. Everything else, including unknown
//! sections and malformed lines, is skipped without error.

const NL: u16 = b'\n' as u16;
const COMMA: u16 = b',' as u16;
const OPEN: u16 = b'{' as u16;
const CLOSE: u16 = b'}' as u16;
const BACKSLASH: u16 = b'\\' as u16;
const AT: u16 = b'@' as u16;

/// Decodes raw subtitle bytes to UTF-16. A leading byte-order mark selects
/// UTF-8, UTF-16LE or UTF-16BE; without one the input is assumed UTF-8.
/// Invalid sequences are replaced, never fatal.
pub fn decode(bytes: &[u8]) -> Vec<u16> {
    if let Some(rest) = strip2(bytes, [0xff, 0xfe]) {
        return utf16_units(rest, u16::from_le_bytes);
    }
    if let Some(rest) = strip2(bytes, [0xfe, 0xff]) {
        return utf16_units(rest, u16::from_be_bytes);
    }
    let text = bytes.strip_prefix(&[0xef, 0xbb, 0xbf][..]).unwrap_or(bytes);
    String::from_utf8_lossy(text).encode_utf16().collect()
}

fn strip2(bytes: &[u8], bom: [u8; 2]) -> Option<&[u8]> {
    bytes.strip_prefix(&bom[..])
}

// A trailing odd byte is dropped.
fn utf16_units(bytes: &[u8], read: fn([u8; 2]) -> u16) -> Vec<u16> {
    bytes.chunks_exact(2).map(|c| read([c[0], c[1]])).collect()
}

/// Invokes `emit` once per face name found, in order of appearance. Names
/// are trimmed and stripped of the vertical-writing `@` marker; empty names
/// are dropped. Deduplication is the caller's job.
pub fn parse_fonts(text: &[u16], mut emit: impl FnMut(&[u16])) {
    for line in text.split(|&u| u == NL) {
        let line = trim(line);
        if let Some(rest) = strip_prefix_ignore_case(line, "style:") {
            style_font(rest, &mut emit);
        } else if let Some(rest) = strip_prefix_ignore_case(line, "dialogue:") {
            dialogue_fonts(rest, &mut emit);
        }
    }
}

// Style: Name,Fontname,Fontsize,...
fn style_font(fields: &[u16], emit: &mut impl FnMut(&[u16])) {
    let mut it = fields.split(|&u| u == COMMA);
    let _style_name = it.next();
    if let Some(font) = it.next() {
        emit_name(font, emit);
    }
}

// An `\fn` name runs to the next `\`, `}`, or end of line.
fn dialogue_fonts(fields: &[u16], emit: &mut impl FnMut(&[u16])) {
    let mut i = 0;
    let mut in_block = false;
    while i < fields.len() {
        let u = fields[i];
        if !in_block {
            if u == OPEN {
                in_block = true;
            }
            i += 1;
            continue;
        }
        if u == CLOSE {
            in_block = false;
            i += 1;
            continue;
        }
        if u == BACKSLASH
            && fields.get(i + 1) == Some(&(b'f' as u16))
            && fields.get(i + 2) == Some(&(b'n' as u16))
        {
            let start = i + 3;
            let mut end = start;
            while end < fields.len() && fields[end] != BACKSLASH && fields[end] != CLOSE {
                end += 1;
            }
            emit_name(&fields[start..end], emit);
            i = end;
            continue;
        }
        i += 1;
    }
}

fn emit_name(raw: &[u16], emit: &mut impl FnMut(&[u16])) {
    // Stray NULs would corrupt downstream storage; cut there.
    let raw = &raw[..raw.iter().position(|&u| u == 0).unwrap_or(raw.len())];
    let mut name = trim(raw);
    if name.first() == Some(&AT) {
        name = trim(&name[1..]);
    }
    if !name.is_empty() {
        emit(name);
    }
}

fn is_space(u: u16) -> bool {
    matches!(u, 0x09 | 0x0a | 0x0b | 0x0c | 0x0d | 0x20)
}

fn trim(mut s: &[u16]) -> &[u16] {
    while let [first, rest @ ..] = s {
        if is_space(*first) {
            s = rest;
        } else {
            break;
        }
    }
    while let [rest @ .., last] = s {
        if is_space(*last) {
            s = rest;
        } else {
            break;
        }
    }
    s
}

fn strip_prefix_ignore_case<'a>(line: &'a [u16], prefix: &str) -> Option<&'a [u16]> {
    let prefix = prefix.as_bytes();
    if line.len() < prefix.len() {
        return None;
    }
    let matches = line.iter().zip(prefix).all(|(&u, &b)| {
        u < 0x80 && (u as u8).eq_ignore_ascii_case(&b)
    });
    if matches {
        Some(&line[prefix.len()..])
    } else {
        None
    }
}
