//! Append-only store for the deduplicated subtitle face set.
//!
//! Strings live as NUL-terminated UTF-16 sequences in one growable buffer; a
//! [`Handle`] is the byte offset of a stored string and stays valid for the
//! arena's lifetime. Duplicate detection is a linear scan over a handle
//! range, which is fine for the tens of faces a subtitle set typically holds.
//! The insert-if-new pattern is: push the candidate, test it against the
//! prior range with [`StrArena::is_duplicate`], and [`StrArena::rewind`] if
//! it was already present.

use crate::{Error, Result};

/// Byte offset of a stored string. Always even.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handle(u32);

impl Handle {
    /// Offset of the first stored string.
    pub const START: Handle = Handle(0);

    fn index(self) -> usize {
        self.0 as usize / 2
    }
}

#[derive(Debug, Default)]
pub struct StrArena {
    buf: Vec<u16>,
}

impl StrArena {
    pub fn new() -> StrArena {
        StrArena { buf: Vec::new() }
    }

    /// Offset one past the last stored string; the handle the next push
    /// will return.
    pub fn tell(&self) -> Handle {
        Handle((self.buf.len() * 2) as u32)
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Appends `s` plus a terminator and returns its handle.
    pub fn push(&mut self, s: &[u16]) -> Result<Handle> {
        let at = self.tell();
        self.buf.try_reserve(s.len() + 1).map_err(|_| Error::Oom)?;
        self.buf.extend_from_slice(s);
        self.buf.push(0);
        Ok(at)
    }

    /// The string stored at `h`, without its terminator.
    pub fn get(&self, h: Handle) -> &[u16] {
        let rest = &self.buf[h.index()..];
        let end = rest.iter().position(|&u| u == 0).unwrap_or(rest.len());
        &rest[..end]
    }

    /// Handle of the string following the one at `h`.
    pub fn next(&self, h: Handle) -> Handle {
        Handle(h.0 + (self.get(h).len() as u32 + 1) * 2)
    }

    /// True if any string in `[from, candidate)` equals the string at
    /// `candidate` under case-insensitive comparison.
    pub fn is_duplicate(&self, from: Handle, candidate: Handle) -> bool {
        let wanted = self.get(candidate);
        let mut at = from;
        while at != candidate {
            if eq_ignore_case(self.get(at), wanted) {
                return true;
            }
            at = self.next(at);
        }
        false
    }

    /// Truncates the buffer back to `h`, dropping everything pushed since.
    pub fn rewind(&mut self, h: Handle) {
        self.buf.truncate(h.index());
    }

    /// Stored strings in insertion order.
    pub fn iter(&self) -> Strings<'_> {
        Strings {
            arena: self,
            at: Handle::START,
        }
    }
}

pub struct Strings<'a> {
    arena: &'a StrArena,
    at: Handle,
}

impl<'a> Iterator for Strings<'a> {
    type Item = &'a [u16];

    fn next(&mut self) -> Option<&'a [u16]> {
        if self.at.0 >= self.arena.tell().0 {
            return None;
        }
        let s = self.arena.get(self.at);
        self.at = self.arena.next(self.at);
        Some(s)
    }
}

/// Case-insensitive equality of two UTF-16 strings, by full lowercase
/// mapping of the decoded characters.
pub(crate) fn eq_ignore_case(a: &[u16], b: &[u16]) -> bool {
    let mut a = decode_lower(a);
    let mut b = decode_lower(b);
    loop {
        match (a.next(), b.next()) {
            (None, None) => return true,
            (x, y) if x == y => {}
            _ => return false,
        }
    }
}

fn decode_lower(units: &[u16]) -> impl Iterator<Item = char> + '_ {
    char::decode_utf16(units.iter().copied())
        .map(|r| r.unwrap_or(char::REPLACEMENT_CHARACTER))
        .flat_map(char::to_lowercase)
}
