//! Session state machine.
//!
//! One worker drives the whole session: parse subtitles, load or rebuild the
//! font index, register every referenced face with the host, then wait for
//! the user to dismiss or retry. The UI half shares only word-sized atomic
//! flags with the worker and receives progress through the host's status
//! hook; it never touches the arena or the index.

use std::env;
use std::fs::{self, File, Metadata};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::Arc;

use log::{debug, info, warn};
use mmapio::MmapOptions;

use crate::arena::{Handle, StrArena};
use crate::ass;
use crate::font;
use crate::index::{FontIndex, IndexStats};
use crate::walk::{self, Visitor};
use crate::{Error, Result};

/// Largest subtitle file considered; anything bigger is skipped.
pub const MAX_SUBTITLE_LEN: u64 = 64 * 1024 * 1024;

/// Default cache location, relative to the anchor directory.
pub const DEFAULT_CACHE: &str = "fc-subs.db";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum State {
    Idle,
    ParseSubtitles,
    LoadCache,
    ScanFonts,
    Register,
    Done,
    Unregister,
}

impl State {
    /// Short label shown as the UI headline.
    pub fn label(self) -> &'static str {
        match self {
            State::ParseSubtitles => "Subtitle",
            State::LoadCache => "Cache",
            State::ScanFonts => "Font",
            State::Register => "Load",
            State::Unregister => "Unload",
            State::Done => "Done",
            State::Idle => "?",
        }
    }
}

/// Flags the UI writes and the worker reads.
#[derive(Debug, Default)]
pub struct Flags {
    cancel: AtomicBool,
    req_exit: AtomicBool,
}

impl Flags {
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Release);
    }

    pub fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }

    pub fn request_exit(&self) {
        self.req_exit.store(true, Ordering::Release);
    }

    pub fn exit_requested(&self) -> bool {
        self.req_exit.load(Ordering::Acquire)
    }
}

/// Hooks provided by the embedding environment.
pub trait Host {
    /// Makes `file` available to the system font renderer for the session.
    /// Registrations are refcounted by the host: a file registered once per
    /// face must be unregistered equally often.
    fn register(&mut self, file: &Path) -> bool;

    fn unregister(&mut self, file: &Path);

    /// Progress channel: a short state label plus the current status text.
    fn show_status(&mut self, label: &str, content: &str);
}

/// User commands consumed while in [`State::Done`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Retry,
    Close,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Subtitle files or directories to scan.
    pub sub_paths: Vec<PathBuf>,
    /// Directory scanned recursively for font files.
    pub font_dir: PathBuf,
    /// Cache file location.
    pub cache_path: PathBuf,
    /// Directory to change into once subtitles are parsed, so relative font
    /// and cache paths anchor at the executable rather than the invocation
    /// directory.
    pub anchor: Option<PathBuf>,
}

impl Default for SessionConfig {
    fn default() -> SessionConfig {
        SessionConfig {
            sub_paths: Vec::new(),
            font_dir: PathBuf::from("."),
            cache_path: PathBuf::from(DEFAULT_CACHE),
            anchor: None,
        }
    }
}

/// Registration outcome counters, reset on every Register pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters {
    pub loaded: u32,
    pub failed: u32,
    pub unmatched: u32,
}

pub struct Controller {
    config: SessionConfig,
    flags: Arc<Flags>,
    state: State,
    arena: StrArena,
    num_faces: u32,
    index: Option<FontIndex>,
    counters: Counters,
    /// Files successfully registered, in face order; drained on unregister.
    registered: Vec<PathBuf>,
}

impl Controller {
    pub fn new(config: SessionConfig, flags: Arc<Flags>) -> Controller {
        Controller {
            config,
            flags,
            state: State::Idle,
            arena: StrArena::new(),
            num_faces: 0,
            index: None,
            counters: Counters::default(),
            registered: Vec::new(),
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn counters(&self) -> Counters {
        self.counters
    }

    /// Number of deduplicated subtitle faces collected so far.
    pub fn num_faces(&self) -> u32 {
        self.num_faces
    }

    pub fn stats(&self) -> IndexStats {
        self.index.as_ref().map(FontIndex::stat).unwrap_or_default()
    }

    /// Status text in the shape the task dialog renders.
    pub fn status_content(&self) -> String {
        render_status(self.counters, self.stats())
    }

    /// Drives the state machine until the session ends.
    ///
    /// `commands` is read while in [`State::Done`]; a disconnected sender
    /// counts as close. On cancellation the error is [`Error::Cancelled`]
    /// and fonts already registered stay registered — follow up with
    /// [`Controller::unregister_all`] to roll back.
    pub fn run<H: Host>(&mut self, host: &mut H, commands: &Receiver<Command>) -> Result<()> {
        self.state = State::ParseSubtitles;
        loop {
            self.check_cancel()?;
            self.show(host);
            match self.state {
                State::Idle => self.state = State::ParseSubtitles,
                State::ParseSubtitles => {
                    self.parse_subtitles(host)?;
                    if let Some(dir) = self.config.anchor.take() {
                        env::set_current_dir(&dir)?;
                        debug!("anchored at {}", dir.display());
                    }
                    self.state = State::LoadCache;
                }
                State::LoadCache => {
                    self.state = if self.load_cache() {
                        State::Register
                    } else {
                        State::ScanFonts
                    };
                }
                State::ScanFonts => {
                    self.scan_fonts(host)?;
                    self.state = State::Register;
                }
                State::Register => {
                    self.register_faces(host)?;
                    self.state = State::Done;
                }
                State::Done => match commands.recv() {
                    Ok(Command::Retry) => self.state = State::Unregister,
                    Ok(Command::Close) | Err(_) => {
                        self.flags.request_exit();
                        self.state = State::Unregister;
                    }
                },
                State::Unregister => {
                    self.unregister_all(host);
                    if self.flags.exit_requested() {
                        return Ok(());
                    }
                    self.state = State::ScanFonts;
                }
            }
        }
    }

    /// Unregisters every font registered so far, in registration order, and
    /// resets the counters and the index. Safe to call repeatedly.
    pub fn unregister_all<H: Host>(&mut self, host: &mut H) {
        for file in self.registered.drain(..) {
            host.unregister(&file);
        }
        self.counters = Counters::default();
        self.index = None;
    }

    fn show<H: Host>(&self, host: &mut H) {
        host.show_status(self.state.label(), &self.status_content());
    }

    fn check_cancel(&self) -> Result<()> {
        if self.flags.cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    fn parse_subtitles<H: Host>(&mut self, host: &mut H) -> Result<()> {
        let content = self.status_content();
        for root in self.config.sub_paths.clone() {
            // An unreadable explicit input is an environment error, unlike
            // the per-file skips below.
            fs::metadata(&root)?;
            let mut visitor = SubVisitor {
                arena: &mut self.arena,
                num_faces: &mut self.num_faces,
                flags: &self.flags,
                host: &mut *host,
                content: &content,
            };
            walk::walk(&root, &mut visitor)?;
        }
        info!("{} subtitle face(s)", self.num_faces);
        Ok(())
    }

    fn load_cache(&mut self) -> bool {
        self.index = None;
        match FontIndex::load(&self.config.cache_path) {
            Ok(index) => {
                let stat = index.stat();
                if stat.num_faces > 0 {
                    info!("cache: {} face(s) in {} file(s)", stat.num_faces, stat.num_files);
                    self.index = Some(index);
                    true
                } else {
                    debug!("cache holds no faces, rescanning");
                    false
                }
            }
            Err(err) => {
                debug!("cache unavailable ({err}), rescanning");
                false
            }
        }
    }

    fn scan_fonts<H: Host>(&mut self, host: &mut H) -> Result<()> {
        self.index = None;
        let mut index = FontIndex::new();
        let counters = self.counters;
        {
            let mut visitor = FontVisitor {
                index: &mut index,
                flags: &self.flags,
                host: &mut *host,
                counters,
            };
            walk::walk(&self.config.font_dir, &mut visitor)?;
        }
        index.build_index();
        if let Err(err) = index.dump(&self.config.cache_path) {
            warn!("cache not written to {}: {err}", self.config.cache_path.display());
        }
        let stat = index.stat();
        info!("indexed {} face(s) from {} file(s)", stat.num_faces, stat.num_files);
        self.index = Some(index);
        Ok(())
    }

    fn register_faces<H: Host>(&mut self, host: &mut H) -> Result<()> {
        self.counters = Counters::default();
        let index = match self.index.as_ref() {
            Some(index) => index,
            None => return Ok(()),
        };
        for face in self.arena.iter() {
            if self.flags.cancelled() {
                return Err(Error::Cancelled);
            }
            let name = String::from_utf16_lossy(face);
            match index.lookup(&name) {
                Some(file) => {
                    if host.register(file) {
                        self.counters.loaded += 1;
                        self.registered.push(file.to_path_buf());
                    } else {
                        self.counters.failed += 1;
                        warn!("host refused {}", file.display());
                    }
                }
                None => {
                    self.counters.unmatched += 1;
                    debug!("no font for {name:?}");
                }
            }
            host.show_status(State::Register.label(), &render_status(self.counters, index.stat()));
        }
        Ok(())
    }
}

fn render_status(c: Counters, s: IndexStats) -> String {
    format!(
        "{} loaded. {} failed. {} unmatch.\n{} file{}. {} font{}.",
        c.loaded,
        c.failed,
        c.unmatched,
        s.num_files,
        plural(s.num_files),
        s.num_faces,
        plural(s.num_faces),
    )
}

fn plural(n: u32) -> &'static str {
    if n == 1 {
        ""
    } else {
        "s"
    }
}

fn is_subtitle(path: &Path) -> bool {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => ext.eq_ignore_ascii_case("ass") || ext.eq_ignore_ascii_case("ssa"),
        None => false,
    }
}

struct SubVisitor<'a, H: Host> {
    arena: &'a mut StrArena,
    num_faces: &'a mut u32,
    flags: &'a Flags,
    host: &'a mut H,
    content: &'a str,
}

impl<H: Host> Visitor for SubVisitor<'_, H> {
    fn on_file(&mut self, path: &Path, metadata: &Metadata) -> Result<()> {
        if self.flags.cancelled() {
            return Err(Error::Cancelled);
        }
        if !is_subtitle(path) {
            return Ok(());
        }
        if metadata.len() > MAX_SUBTITLE_LEN {
            warn!("{}: over {} MiB, skipped", path.display(), MAX_SUBTITLE_LEN >> 20);
            return Ok(());
        }
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!("{}: {err}", path.display());
                return Ok(());
            }
        };
        let text = ass::decode(&bytes);
        drop(bytes);

        let arena = &mut *self.arena;
        let num_faces = &mut *self.num_faces;
        let mut status = Ok(());
        ass::parse_fonts(&text, |face| {
            if status.is_err() {
                return;
            }
            match arena.push(face) {
                Ok(handle) => {
                    if arena.is_duplicate(Handle::START, handle) {
                        arena.rewind(handle);
                    } else {
                        *num_faces += 1;
                    }
                }
                Err(err) => status = Err(err),
            }
        });
        status?;
        debug!("{}: parsed", path.display());
        self.host.show_status(State::ParseSubtitles.label(), self.content);
        Ok(())
    }
}

struct FontVisitor<'a, H: Host> {
    index: &'a mut FontIndex,
    flags: &'a Flags,
    host: &'a mut H,
    counters: Counters,
}

impl<H: Host> Visitor for FontVisitor<'_, H> {
    fn on_file(&mut self, path: &Path, _metadata: &Metadata) -> Result<()> {
        if self.flags.cancelled() {
            return Err(Error::Cancelled);
        }
        let file = match File::open(path) {
            Ok(file) => file,
            Err(_) => return Ok(()),
        };
        let map = match unsafe { MmapOptions::new().map(&file) } {
            Ok(map) => map,
            Err(_) => return Ok(()),
        };
        if !font::is_candidate(&map) {
            return Ok(());
        }
        match self.index.add(path, &map) {
            Ok(n) if n > 0 => debug!("{}: {n} face(s)", path.display()),
            Ok(_) => {}
            Err(err) => debug!("{}: skipped ({err})", path.display()),
        }
        self.host
            .show_status(State::ScanFonts.label(), &render_status(self.counters, self.index.stat()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_match_ui_contract() {
        assert_eq!(State::ParseSubtitles.label(), "Subtitle");
        assert_eq!(State::LoadCache.label(), "Cache");
        assert_eq!(State::ScanFonts.label(), "Font");
        assert_eq!(State::Register.label(), "Load");
        assert_eq!(State::Unregister.label(), "Unload");
        assert_eq!(State::Done.label(), "Done");
    }

    #[test]
    fn status_text_agrees_in_number() {
        let one = render_status(
            Counters { loaded: 1, failed: 0, unmatched: 2 },
            IndexStats { num_files: 1, num_faces: 1 },
        );
        assert_eq!(one, "1 loaded. 0 failed. 2 unmatch.\n1 file. 1 font.");
        let many = render_status(Counters::default(), IndexStats { num_files: 2, num_faces: 0 });
        assert_eq!(many, "0 loaded. 0 failed. 0 unmatch.\n2 files. 0 fonts.");
    }

    #[test]
    fn subtitle_extensions() {
        assert!(is_subtitle(Path::new("a.ass")));
        assert!(is_subtitle(Path::new("b.SSA")));
        assert!(!is_subtitle(Path::new("c.srt")));
        assert!(!is_subtitle(Path::new("noext")));
    }
}
