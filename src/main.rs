//! Console host for the subtitle font-loading session.
//!
//! The worker thread runs the session controller; this thread owns the
//! terminal, redraws on every progress snapshot, and forwards the user's
//! retry/close decision. Fonts are "registered" by copying them into a
//! per-session directory under the user's font directory so that downstream
//! renderers pick them up; the copies are removed on unregistration.

use std::collections::HashMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};
use std::{env, fs, process, thread};

use clap_lex::RawArgs;
use log::{debug, error, warn};

use subfont::session::{Command, Controller, Flags, Host, SessionConfig, State, DEFAULT_CACHE};
use subfont::Error;

fn main() {
    env_logger::init();
    let args = parse_args();
    process::exit(run(args));
}

#[derive(Debug, Default)]
struct Arguments {
    sub_paths: Vec<PathBuf>,
    font_dir: Option<PathBuf>,
    cache: Option<PathBuf>,
}

fn parse_args() -> Arguments {
    let raw_args = RawArgs::from_args();
    let mut cursor = raw_args.cursor();
    let mut arguments = Arguments::default();

    raw_args.next(&mut cursor); // skip argv[0]
    while let Some(arg) = raw_args.next(&mut cursor) {
        if let Some(mut shorts) = arg.to_short() {
            while let Some(short) = shorts.next_flag() {
                match short {
                    Ok('h') => print_help(),
                    Ok('V') => print_version(),
                    Ok(c) => warn!("unexpected flag: -{c}"),
                    Err(os_str) => warn!("unexpected flag: -{}", os_str.to_string_lossy()),
                }
            }
        } else if let Some((long, opt_value)) = arg.to_long() {
            match long {
                Ok("help") => print_help(),
                Ok("version") => print_version(),
                Ok("font-dir") => {
                    if let Some(value) = opt_value.or_else(|| raw_args.next_os(&mut cursor)) {
                        arguments.font_dir = Some(PathBuf::from(value));
                    } else {
                        warn!("font-dir requires a value");
                    }
                }
                Ok("cache") => {
                    if let Some(value) = opt_value.or_else(|| raw_args.next_os(&mut cursor)) {
                        arguments.cache = Some(PathBuf::from(value));
                    } else {
                        warn!("cache requires a value");
                    }
                }
                _ => warn!("unexpected flag: {}", arg.display()),
            }
        } else {
            arguments.sub_paths.push(PathBuf::from(arg.to_value_os()));
        }
    }

    arguments
}

fn print_help() -> ! {
    println!(
        "{} {}\n\
         Loads the fonts referenced by ASS/SSA subtitles for the duration of a session.\n\
         \n\
         Usage: subfont [OPTIONS] [PATHS]...\n\
         \n\
         Arguments:\n\
         \x20 [PATHS]...      Subtitle files or directories to scan for .ass/.ssa scripts\n\
         \n\
         Options:\n\
         \x20     --font-dir DIR  Directory scanned for font files\n\
         \x20                     (default: the executable's directory)\n\
         \x20     --cache FILE    Font index cache (default: {} next to the fonts)\n\
         \x20 -h, --help          Print help\n\
         \x20 -V, --version       Print version",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        DEFAULT_CACHE,
    );
    process::exit(0);
}

fn print_version() -> ! {
    println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
    process::exit(0);
}

fn build_config(args: Arguments) -> Result<SessionConfig, String> {
    let Arguments { sub_paths, font_dir, cache } = args;
    match font_dir {
        Some(dir) => Ok(SessionConfig {
            sub_paths,
            cache_path: cache.unwrap_or_else(|| dir.join(DEFAULT_CACHE)),
            font_dir: dir,
            anchor: None,
        }),
        None => {
            // Fonts ship next to the binary; anchor there once subtitle
            // arguments (possibly relative) have been read.
            let exe_dir = env::current_exe()
                .ok()
                .and_then(|exe| exe.parent().map(Path::to_path_buf))
                .ok_or_else(|| String::from("cannot locate the executable's directory"))?;
            Ok(SessionConfig {
                sub_paths,
                font_dir: PathBuf::from("."),
                cache_path: cache.unwrap_or_else(|| PathBuf::from(DEFAULT_CACHE)),
                anchor: Some(exe_dir),
            })
        }
    }
}

fn run(args: Arguments) -> i32 {
    let config = match build_config(args) {
        Ok(config) => config,
        Err(err) => {
            error!("{err}");
            return 1;
        }
    };

    let (status_tx, status_rx) = mpsc::channel();
    let (command_tx, command_rx) = mpsc::channel();
    let mut host = InstallHost::new(status_tx);
    let mut controller = Controller::new(config, Arc::new(Flags::default()));

    let worker = thread::Builder::new().name("session".into()).spawn(move || {
        let result = controller.run(&mut host, &command_rx);
        if result.is_err() {
            // Roll back whatever a cancelled or failed run registered.
            controller.unregister_all(&mut host);
        }
        result
    });
    let worker = match worker {
        Ok(worker) => worker,
        Err(err) => {
            error!("cannot spawn worker: {err}");
            return 1;
        }
    };

    let mut last_label = String::new();
    loop {
        let (label, content) = match status_rx.recv() {
            Ok(snapshot) => snapshot,
            Err(_) => break, // worker gone
        };
        if label != last_label {
            println!("[{label}]");
            last_label = label.clone();
        }
        if label == State::Done.label() {
            println!("{content}");
            match prompt() {
                Command::Retry => {
                    let _ = command_tx.send(Command::Retry);
                }
                Command::Close => {
                    let _ = command_tx.send(Command::Close);
                    if !drain(&status_rx, Duration::from_secs(15)) {
                        warn!("worker did not finish in time");
                        process::exit(0);
                    }
                    break;
                }
            }
        }
    }

    match worker.join() {
        Ok(Ok(())) | Ok(Err(Error::Cancelled)) => 0,
        Ok(Err(Error::Oom)) => {
            error!("out of memory");
            2
        }
        Ok(Err(err)) => {
            error!("{err}");
            1
        }
        Err(_) => {
            error!("worker panicked");
            1
        }
    }
}

fn prompt() -> Command {
    print!("retry / close> ");
    let _ = io::stdout().flush();
    let mut line = String::new();
    match io::stdin().read_line(&mut line) {
        Ok(0) | Err(_) => Command::Close,
        Ok(_) => {
            let line = line.trim();
            if line.eq_ignore_ascii_case("r") || line.eq_ignore_ascii_case("retry") {
                Command::Retry
            } else {
                Command::Close
            }
        }
    }
}

/// Consumes remaining snapshots until the worker hangs up; false on timeout.
fn drain(status_rx: &mpsc::Receiver<(String, String)>, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        match status_rx.recv_timeout(deadline - now) {
            Ok(_) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => return true,
            Err(mpsc::RecvTimeoutError::Timeout) => return false,
        }
    }
}

/// The user's font directory, `$XDG_DATA_HOME/fonts` or the
/// `~/.local/share` fallback.
fn user_font_dir() -> PathBuf {
    if let Ok(dir) = env::var("XDG_DATA_HOME") {
        if !dir.is_empty() {
            return PathBuf::from(dir).join("fonts");
        }
    }
    if let Ok(home) = env::var("HOME") {
        return PathBuf::from(home).join(".local/share/fonts");
    }
    env::temp_dir().join("subfont-fonts")
}

struct Installed {
    copy: PathBuf,
    count: u32,
}

/// Registers fonts by copying them into a per-session directory under the
/// user's font directory, refcounted per source file so a file shared by
/// several faces survives until its last unregistration.
struct InstallHost {
    session_dir: PathBuf,
    installed: HashMap<PathBuf, Installed>,
    seq: u32,
    status: mpsc::Sender<(String, String)>,
}

impl InstallHost {
    fn new(status: mpsc::Sender<(String, String)>) -> InstallHost {
        InstallHost {
            session_dir: user_font_dir().join(format!(".subfont-{}", process::id())),
            installed: HashMap::new(),
            seq: 0,
            status,
        }
    }
}

impl Host for InstallHost {
    fn register(&mut self, file: &Path) -> bool {
        if let Some(entry) = self.installed.get_mut(file) {
            entry.count += 1;
            return true;
        }
        if let Err(err) = fs::create_dir_all(&self.session_dir) {
            warn!("cannot create {}: {err}", self.session_dir.display());
            return false;
        }
        let name = match file.file_name() {
            Some(name) => name.to_string_lossy().into_owned(),
            None => return false,
        };
        // Sequence prefix keeps same-named files from distinct directories apart.
        let copy = self.session_dir.join(format!("{:03}-{name}", self.seq));
        match fs::copy(file, &copy) {
            Ok(_) => {
                debug!("installed {}", copy.display());
                self.seq += 1;
                self.installed.insert(file.to_path_buf(), Installed { copy, count: 1 });
                true
            }
            Err(err) => {
                warn!("cannot install {}: {err}", file.display());
                false
            }
        }
    }

    fn unregister(&mut self, file: &Path) {
        let last = match self.installed.get_mut(file) {
            Some(entry) => {
                entry.count -= 1;
                entry.count == 0
            }
            None => false,
        };
        if last {
            if let Some(entry) = self.installed.remove(file) {
                if let Err(err) = fs::remove_file(&entry.copy) {
                    warn!("cannot remove {}: {err}", entry.copy.display());
                }
            }
            // Succeeds once the last copy is gone.
            let _ = fs::remove_dir(&self.session_dir);
        }
    }

    fn show_status(&mut self, label: &str, content: &str) {
        let _ = self.status.send((label.to_owned(), content.to_owned()));
    }
}
