//! Where image bytes come from and where they go.
//!
//! A [`Locator`] is a filesystem path, the standard streams (`-`), or the
//! system clipboard. Resolution turns the raw command line shape (up to two
//! positionals plus the clipboard flags) into a source and a destination,
//! falling back to standard input/output when an argument is omitted and the
//! corresponding stream is redirected:
//!
//! ```text
//! transmute in.png out.gif         Path -> Path
//! transmute < in.png > out.gif     Stdio -> Stdio
//! transmute in.png > out.gif       Path -> Stdio   (stdout redirected)
//! transmute out.gif < in.png       Stdio -> Path   (stdin piped, stdout a terminal)
//! transmute -C in.png              Path -> Clipboard
//! transmute -c out.png             Clipboard -> Path
//! ```
//!
//! With `-i` (interactive) there is no fallback: both ends must be named.
//! Terminal state is passed in as a [`StreamState`] so every rule above can
//! be tested without a terminal.
//!
//! The resolver never decodes. Files and stdin yield [`Payload::Encoded`]
//! bytes; the clipboard holds pixels, so it yields [`Payload::Raster`].
//! Writes to paths go through a sibling temporary file that is renamed into
//! place only once every byte landed, so a failed conversion never leaves a
//! partial destination behind.

use crate::imaging::{Background, CanonicalImage, PixelLayout};
use log::debug;
use std::borrow::Cow;
use std::fmt;
use std::io::{self, BufRead, IsTerminal, Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LocatorError {
    #[error("no source given and standard input is a terminal")]
    MissingSource,
    #[error("no destination given and standard output is a terminal")]
    MissingDestination,
    #[error("expected at most {expected} file arguments, got {actual}")]
    TooManyArguments { expected: usize, actual: usize },
    #[error("cannot read from and write to the clipboard in one conversion")]
    ClipboardConflict,
    #[error("clipboard: {0}")]
    Clipboard(String),
    #[error("cannot read {}: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },
    #[error("cannot write {}: {source}", path.display())]
    Write { path: PathBuf, source: io::Error },
    #[error("standard input: {0}")]
    Stdin(io::Error),
    #[error("standard output: {0}")]
    Stdout(io::Error),
    #[error("{0} is empty")]
    Empty(Locator),
}

/// A source or destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    Path(PathBuf),
    /// Standard input as a source, standard output as a destination.
    Stdio,
    Clipboard,
}

impl Locator {
    /// Interpret a command line argument: `-` is the standard stream.
    pub fn from_arg(arg: &str) -> Self {
        if arg == "-" {
            Locator::Stdio
        } else {
            Locator::Path(PathBuf::from(arg))
        }
    }

    pub fn path(&self) -> Option<&Path> {
        match self {
            Locator::Path(p) => Some(p),
            _ => None,
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Path(p) => write!(f, "{}", p.display()),
            Locator::Stdio => f.write_str("standard stream"),
            Locator::Clipboard => f.write_str("clipboard"),
        }
    }
}

/// Whether each standard stream is attached to a terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamState {
    pub stdin_is_terminal: bool,
    pub stdout_is_terminal: bool,
}

impl StreamState {
    pub fn detect() -> Self {
        Self {
            stdin_is_terminal: io::stdin().is_terminal(),
            stdout_is_terminal: io::stdout().is_terminal(),
        }
    }

    /// Both streams redirected, the way a pipeline or a test harness runs us.
    pub fn redirected() -> Self {
        Self {
            stdin_is_terminal: false,
            stdout_is_terminal: false,
        }
    }
}

/// The locator-related part of a command line, before resolution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocatorArgs {
    pub positionals: Vec<String>,
    /// `-c`: the source is the clipboard.
    pub paste: bool,
    /// `-C`: the destination is the clipboard.
    pub copy: bool,
    /// `-i`: never fall back to the standard streams.
    pub interactive: bool,
}

/// Resolve the command line into `(source, destination)`.
pub fn resolve(args: &LocatorArgs, streams: StreamState) -> Result<(Locator, Locator), LocatorError> {
    if args.paste && args.copy {
        return Err(LocatorError::ClipboardConflict);
    }
    let fallback_source = || {
        if !args.interactive && !streams.stdin_is_terminal {
            Ok(Locator::Stdio)
        } else {
            Err(LocatorError::MissingSource)
        }
    };
    let fallback_destination = || {
        if !args.interactive && !streams.stdout_is_terminal {
            Ok(Locator::Stdio)
        } else {
            Err(LocatorError::MissingDestination)
        }
    };
    let expected = if args.paste || args.copy { 1 } else { 2 };
    if args.positionals.len() > expected {
        return Err(LocatorError::TooManyArguments {
            expected,
            actual: args.positionals.len(),
        });
    }
    let first = args.positionals.first().map(|a| Locator::from_arg(a));

    let resolved = if args.paste {
        (Locator::Clipboard, first.map_or_else(fallback_destination, Ok)?)
    } else if args.copy {
        (first.map_or_else(fallback_source, Ok)?, Locator::Clipboard)
    } else {
        match (first, args.positionals.get(1)) {
            (Some(source), Some(dest)) => (source, Locator::from_arg(dest)),
            (Some(only), None) => {
                let piped_in = !args.interactive && !streams.stdin_is_terminal;
                if piped_in && streams.stdout_is_terminal {
                    (Locator::Stdio, only)
                } else {
                    (only, fallback_destination()?)
                }
            }
            (None, _) => (fallback_source()?, fallback_destination()?),
        }
    };
    debug!("resolved locators: {} -> {}", resolved.0, resolved.1);
    Ok(resolved)
}

// =============================================================================
// Payloads and the clipboard
// =============================================================================

/// What a source yields and a destination accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Bytes in some image format.
    Encoded(Vec<u8>),
    /// Pixels with no file format attached (the clipboard).
    Raster(CanonicalImage),
}

/// Access to a clipboard holding one image.
pub trait ClipboardBackend {
    fn read_image(&mut self) -> Result<CanonicalImage, LocatorError>;
    fn write_image(&mut self, img: &CanonicalImage) -> Result<(), LocatorError>;

    /// Block while this process is what keeps the last written image on the
    /// clipboard. Hosts that store clipboard contents themselves return at
    /// once.
    fn hold(&mut self) -> Result<(), LocatorError> {
        Ok(())
    }
}

/// The host clipboard through `arboard`.
///
/// On Linux the X11 and Wayland selections live only as long as the process
/// that set them, so [`write_image`](ClipboardBackend::write_image) hands the
/// image to a detached `transmute serve-clipboard` process (see
/// [`serve_clipboard`]) and returns once that process owns the selection.
#[derive(Debug, Default)]
pub struct SystemClipboard;

fn clipboard_error(err: arboard::Error) -> LocatorError {
    LocatorError::Clipboard(err.to_string())
}

fn image_data(img: &CanonicalImage) -> arboard::ImageData<'static> {
    let rgba = img.to_rgba();
    arboard::ImageData {
        width: rgba.width() as usize,
        height: rgba.height() as usize,
        bytes: Cow::Owned(rgba.into_pixels()),
    }
}

impl ClipboardBackend for SystemClipboard {
    fn read_image(&mut self) -> Result<CanonicalImage, LocatorError> {
        let mut clipboard = arboard::Clipboard::new().map_err(clipboard_error)?;
        let data = clipboard.get_image().map_err(|e| match e {
            arboard::Error::ContentNotAvailable => LocatorError::Empty(Locator::Clipboard),
            other => clipboard_error(other),
        })?;
        let (width, height) = (data.width as u32, data.height as u32);
        let img = CanonicalImage::new(width, height, PixelLayout::Rgba, data.bytes.into_owned())
            .map_err(|e| LocatorError::Clipboard(e.to_string()))?;
        Ok(drop_opaque_alpha(img))
    }

    #[cfg(target_os = "linux")]
    fn write_image(&mut self, img: &CanonicalImage) -> Result<(), LocatorError> {
        hand_off(img)
    }

    #[cfg(not(target_os = "linux"))]
    fn write_image(&mut self, img: &CanonicalImage) -> Result<(), LocatorError> {
        let mut clipboard = arboard::Clipboard::new().map_err(clipboard_error)?;
        clipboard.set_image(image_data(img)).map_err(clipboard_error)
    }
}

/// Subcommand that runs [`serve_clipboard`] on the standard streams.
pub const SERVE_COMMAND: &str = "serve-clipboard";

/// First status line of a server that took the selection.
const READY: &str = "ready";

/// Start a detached copy of this executable and give it `img` to serve.
#[cfg(target_os = "linux")]
fn hand_off(img: &CanonicalImage) -> Result<(), LocatorError> {
    use std::os::unix::process::CommandExt;
    use std::process::{Command, Stdio};

    let spawn_error = |e: io::Error| LocatorError::Clipboard(format!("cannot start clipboard server: {e}"));
    let exe = std::env::current_exe().map_err(spawn_error)?;
    let mut child = Command::new(exe)
        .arg(SERVE_COMMAND)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        // out of our process group, so ^C in the terminal leaves it alone
        .process_group(0)
        .spawn()
        .map_err(spawn_error)?;
    let (Some(mut to_server), Some(from_server)) = (child.stdin.take(), child.stdout.take()) else {
        return Err(LocatorError::Clipboard("clipboard server has no pipes".into()));
    };
    write_frame(&mut to_server, img).map_err(spawn_error)?;
    drop(to_server);
    if let Err(e) = await_ready(&mut io::BufReader::new(from_server)) {
        child.wait().map_err(spawn_error)?;
        return Err(e);
    }
    // the server outlives us and is never waited for
    debug!("clipboard server {} owns the selection", child.id());
    Ok(())
}

/// Send `img` as a `"<width> <height>\n"` line followed by RGBA samples.
pub fn write_frame(out: &mut dyn Write, img: &CanonicalImage) -> io::Result<()> {
    let rgba = img.to_rgba();
    writeln!(out, "{} {}", rgba.width(), rgba.height())?;
    out.write_all(rgba.pixels())?;
    out.flush()
}

/// Inverse of [`write_frame`].
pub fn read_frame(input: &mut dyn BufRead) -> Result<CanonicalImage, LocatorError> {
    let bad = |what: String| LocatorError::Clipboard(format!("bad image frame: {what}"));
    let mut header = String::new();
    input.read_line(&mut header).map_err(LocatorError::Stdin)?;
    let mut dims = header.split_whitespace().map(str::parse::<u32>);
    let (Some(Ok(width)), Some(Ok(height)), None) = (dims.next(), dims.next(), dims.next()) else {
        return Err(bad(format!("header {:?}", header.trim_end())));
    };
    let expected = (width as u64)
        .checked_mul(height as u64)
        .and_then(|n| n.checked_mul(4))
        .ok_or_else(|| bad(format!("{width}x{height} is too large")))?;
    let mut pixels = Vec::new();
    input
        .take(expected)
        .read_to_end(&mut pixels)
        .map_err(LocatorError::Stdin)?;
    if pixels.len() as u64 != expected {
        return Err(bad(format!("{width}x{height} needs {expected} bytes, got {}", pixels.len())));
    }
    CanonicalImage::new(width, height, PixelLayout::Rgba, pixels).map_err(|e| bad(e.to_string()))
}

/// Wait for a clipboard server's first status line.
pub fn await_ready(status: &mut dyn BufRead) -> Result<(), LocatorError> {
    let mut line = String::new();
    status.read_line(&mut line).map_err(LocatorError::Stdin)?;
    match line.trim_end() {
        READY => Ok(()),
        "" => Err(LocatorError::Clipboard(
            "clipboard server exited before taking the image".into(),
        )),
        message => Err(LocatorError::Clipboard(message.to_string())),
    }
}

/// Read one frame from `input`, put it on `clipboard`, report the outcome as
/// one line on `status`, then keep the image available until another program
/// replaces it.
pub fn serve_clipboard(
    input: &mut dyn BufRead,
    status: &mut dyn Write,
    clipboard: &mut dyn ClipboardBackend,
) -> Result<(), LocatorError> {
    let outcome = read_frame(input).and_then(|img| clipboard.write_image(&img));
    let reported = match &outcome {
        Ok(()) => writeln!(status, "{READY}"),
        Err(e) => writeln!(status, "{e}"),
    };
    reported.and_then(|()| status.flush()).map_err(LocatorError::Stdout)?;
    outcome?;
    clipboard.hold()
}

/// The serving end on Linux: sets the selection directly and blocks in
/// [`hold`](ClipboardBackend::hold) until it is taken over.
#[cfg(target_os = "linux")]
#[derive(Default)]
pub struct ServingClipboard {
    owned: Option<(arboard::Clipboard, arboard::ImageData<'static>)>,
}

#[cfg(target_os = "linux")]
impl ClipboardBackend for ServingClipboard {
    fn read_image(&mut self) -> Result<CanonicalImage, LocatorError> {
        SystemClipboard.read_image()
    }

    fn write_image(&mut self, img: &CanonicalImage) -> Result<(), LocatorError> {
        let data = image_data(img);
        let mut clipboard = arboard::Clipboard::new().map_err(clipboard_error)?;
        clipboard.set_image(data.clone()).map_err(clipboard_error)?;
        self.owned = Some((clipboard, data));
        Ok(())
    }

    fn hold(&mut self) -> Result<(), LocatorError> {
        use arboard::SetExtLinux;

        let Some((mut clipboard, data)) = self.owned.take() else {
            return Ok(());
        };
        clipboard.set().wait().image(data).map_err(clipboard_error)
    }
}

/// Clipboards only carry RGBA. An image whose alpha is 255 everywhere was
/// an RGB image when it went in.
fn drop_opaque_alpha(img: CanonicalImage) -> CanonicalImage {
    if img.has_translucency() {
        img
    } else {
        img.flatten(Background::default())
    }
}

/// In-memory clipboard for tests and embedding.
#[derive(Debug, Default)]
pub struct MockClipboard {
    pub image: Option<CanonicalImage>,
    /// Fail every write with this message, like a session without a display.
    pub refuse_writes: Option<String>,
    /// Number of times [`hold`](ClipboardBackend::hold) ran.
    pub holds: usize,
}

impl ClipboardBackend for MockClipboard {
    fn read_image(&mut self) -> Result<CanonicalImage, LocatorError> {
        let img = self.image.clone().ok_or(LocatorError::Empty(Locator::Clipboard))?;
        Ok(drop_opaque_alpha(img))
    }

    fn write_image(&mut self, img: &CanonicalImage) -> Result<(), LocatorError> {
        if let Some(message) = &self.refuse_writes {
            return Err(LocatorError::Clipboard(message.clone()));
        }
        self.image = Some(img.to_rgba());
        Ok(())
    }

    fn hold(&mut self) -> Result<(), LocatorError> {
        self.holds += 1;
        Ok(())
    }
}

// =============================================================================
// Reading and writing
// =============================================================================

/// The process's standard streams and clipboard, swappable in tests.
pub struct Endpoints<'a> {
    pub stdin: &'a mut dyn Read,
    pub stdout: &'a mut dyn Write,
    pub clipboard: &'a mut dyn ClipboardBackend,
}

pub fn read_source(locator: &Locator, endpoints: &mut Endpoints<'_>) -> Result<Payload, LocatorError> {
    let payload = match locator {
        Locator::Path(path) => {
            let bytes = std::fs::read(path).map_err(|source| LocatorError::Read {
                path: path.clone(),
                source,
            })?;
            Payload::Encoded(bytes)
        }
        Locator::Stdio => {
            let mut bytes = Vec::new();
            // read_to_end retries interrupted reads until EOF
            endpoints
                .stdin
                .read_to_end(&mut bytes)
                .map_err(LocatorError::Stdin)?;
            Payload::Encoded(bytes)
        }
        Locator::Clipboard => Payload::Raster(endpoints.clipboard.read_image()?),
    };
    if matches!(&payload, Payload::Encoded(b) if b.is_empty()) {
        return Err(LocatorError::Empty(locator.clone()));
    }
    Ok(payload)
}

/// Deliver `payload`. Paths and streams take encoded bytes, the clipboard
/// takes a raster.
pub fn write_destination(
    locator: &Locator,
    payload: &Payload,
    endpoints: &mut Endpoints<'_>,
) -> Result<(), LocatorError> {
    match (locator, payload) {
        (Locator::Path(path), Payload::Encoded(bytes)) => write_atomic(path, bytes),
        (Locator::Stdio, Payload::Encoded(bytes)) => {
            endpoints.stdout.write_all(bytes).map_err(LocatorError::Stdout)?;
            endpoints.stdout.flush().map_err(LocatorError::Stdout)
        }
        (Locator::Clipboard, Payload::Raster(img)) => endpoints.clipboard.write_image(img),
        (Locator::Clipboard, Payload::Encoded(_)) => Err(LocatorError::Clipboard(
            "the clipboard takes pixels, not encoded bytes".into(),
        )),
        (_, Payload::Raster(_)) => Err(LocatorError::Write {
            path: locator.path().map_or_else(|| PathBuf::from("-"), Path::to_path_buf),
            source: io::Error::new(io::ErrorKind::InvalidInput, "no file format chosen"),
        }),
    }
}

/// Write `bytes` to a temporary file beside `path`, then rename it over
/// `path`. Either the whole file appears or nothing changes.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), LocatorError> {
    let write_error = |source: io::Error| LocatorError::Write {
        path: path.to_path_buf(),
        source,
    };
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir).map_err(write_error)?;
    tmp.write_all(bytes).map_err(write_error)?;
    tmp.as_file().sync_all().map_err(write_error)?;
    tmp.persist(path).map_err(|e| write_error(e.error))?;
    debug!("wrote {} bytes to {}", bytes.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::test_images;
    use tempfile::TempDir;

    const TERMINAL: StreamState = StreamState {
        stdin_is_terminal: true,
        stdout_is_terminal: true,
    };

    fn args(positionals: &[&str]) -> LocatorArgs {
        LocatorArgs {
            positionals: positionals.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    fn path(p: &str) -> Locator {
        Locator::Path(PathBuf::from(p))
    }

    #[test]
    fn two_positionals_are_source_and_destination() {
        let got = resolve(&args(&["in.png", "out.gif"]), TERMINAL).unwrap();
        assert_eq!(got, (path("in.png"), path("out.gif")));
    }

    #[test]
    fn dash_is_the_standard_stream() {
        let got = resolve(&args(&["-", "-"]), TERMINAL).unwrap();
        assert_eq!(got, (Locator::Stdio, Locator::Stdio));
    }

    #[test]
    fn pipes_stand_in_for_missing_arguments() {
        let got = resolve(&args(&[]), StreamState::redirected()).unwrap();
        assert_eq!(got, (Locator::Stdio, Locator::Stdio));
    }

    #[test]
    fn single_positional_with_stdout_redirected_is_the_source() {
        let streams = StreamState {
            stdin_is_terminal: true,
            stdout_is_terminal: false,
        };
        let got = resolve(&args(&["in.png"]), streams).unwrap();
        assert_eq!(got, (path("in.png"), Locator::Stdio));
    }

    #[test]
    fn single_positional_with_stdin_piped_is_the_destination() {
        let streams = StreamState {
            stdin_is_terminal: false,
            stdout_is_terminal: true,
        };
        let got = resolve(&args(&["out.png"]), streams).unwrap();
        assert_eq!(got, (Locator::Stdio, path("out.png")));
    }

    #[test]
    fn interactive_mode_disables_fallback() {
        let mut a = args(&["in.png"]);
        a.interactive = true;
        assert!(matches!(
            resolve(&a, StreamState::redirected()),
            Err(LocatorError::MissingDestination)
        ));
        a.positionals.clear();
        assert!(matches!(
            resolve(&a, StreamState::redirected()),
            Err(LocatorError::MissingSource)
        ));
    }

    #[test]
    fn terminals_never_carry_images() {
        assert!(matches!(
            resolve(&args(&["in.png"]), TERMINAL),
            Err(LocatorError::MissingDestination)
        ));
    }

    #[test]
    fn clipboard_flags_take_one_positional() {
        let mut a = args(&["source.png"]);
        a.copy = true;
        a.interactive = true;
        assert_eq!(resolve(&a, TERMINAL).unwrap(), (path("source.png"), Locator::Clipboard));

        let mut a = args(&["target.png"]);
        a.paste = true;
        a.interactive = true;
        assert_eq!(resolve(&a, TERMINAL).unwrap(), (Locator::Clipboard, path("target.png")));

        let mut a = args(&["a.png", "b.png"]);
        a.paste = true;
        assert!(matches!(
            resolve(&a, TERMINAL),
            Err(LocatorError::TooManyArguments { expected: 1, actual: 2 })
        ));
    }

    #[test]
    fn clipboard_read_and_write_are_exclusive() {
        let mut a = args(&[]);
        a.paste = true;
        a.copy = true;
        assert!(matches!(resolve(&a, TERMINAL), Err(LocatorError::ClipboardConflict)));
    }

    #[test]
    fn paste_falls_back_to_stdout() {
        let mut a = args(&[]);
        a.paste = true;
        assert_eq!(
            resolve(&a, StreamState::redirected()).unwrap(),
            (Locator::Clipboard, Locator::Stdio)
        );
    }

    #[test]
    fn mock_clipboard_restores_opaque_images_as_rgb() {
        let mut clip = MockClipboard::default();
        assert!(matches!(clip.read_image(), Err(LocatorError::Empty(_))));
        let img = test_images::rgb(4, 4);
        clip.write_image(&img).unwrap();
        assert_eq!(clip.image.as_ref().unwrap().layout(), PixelLayout::Rgba);
        assert_eq!(clip.read_image().unwrap(), img);

        let img = test_images::rgba(4, 4);
        clip.write_image(&img).unwrap();
        assert_eq!(clip.read_image().unwrap(), img);
    }

    #[test]
    fn served_image_reaches_the_clipboard_and_is_held() {
        let img = test_images::rgba(5, 3);
        let mut frame = Vec::new();
        write_frame(&mut frame, &img).unwrap();
        assert!(frame.starts_with(b"5 3\n"));

        let mut status = Vec::new();
        let mut clip = MockClipboard::default();
        serve_clipboard(&mut frame.as_slice(), &mut status, &mut clip).unwrap();
        assert_eq!(clip.read_image().unwrap(), img);
        assert_eq!(clip.holds, 1);
        assert!(await_ready(&mut status.as_slice()).is_ok());
    }

    #[test]
    fn refused_clipboard_write_reaches_the_copying_side() {
        let mut frame = Vec::new();
        write_frame(&mut frame, &test_images::rgb(2, 2)).unwrap();
        let mut status = Vec::new();
        let mut clip = MockClipboard {
            refuse_writes: Some("no display".into()),
            ..Default::default()
        };
        assert!(serve_clipboard(&mut frame.as_slice(), &mut status, &mut clip).is_err());
        assert_eq!(clip.holds, 0);
        let err = await_ready(&mut status.as_slice()).unwrap_err();
        assert!(err.to_string().contains("no display"), "{err}");
    }

    #[test]
    fn server_that_dies_silently_is_a_clipboard_error() {
        let err = await_ready(&mut &b""[..]).unwrap_err();
        assert!(matches!(&err, LocatorError::Clipboard(m) if m.contains("exited")), "{err}");
    }

    #[test]
    fn truncated_frames_are_rejected() {
        let mut frame = Vec::new();
        write_frame(&mut frame, &test_images::rgb(4, 4)).unwrap();
        frame.truncate(frame.len() - 1);
        assert!(read_frame(&mut frame.as_slice()).is_err());
        assert!(read_frame(&mut &b"4294967295 4294967295\n"[..]).is_err());
        assert!(read_frame(&mut &b"garbage\n"[..]).is_err());
    }

    #[test]
    fn refused_write_fails_the_destination() {
        let mut stdin: &[u8] = b"";
        let mut stdout = Vec::new();
        let mut clipboard = MockClipboard {
            refuse_writes: Some("selection lost".into()),
            ..Default::default()
        };
        let mut endpoints = Endpoints {
            stdin: &mut stdin,
            stdout: &mut stdout,
            clipboard: &mut clipboard,
        };
        let img = test_images::rgb(2, 2);
        assert!(matches!(
            write_destination(&Locator::Clipboard, &Payload::Raster(img), &mut endpoints),
            Err(LocatorError::Clipboard(_))
        ));
    }

    #[test]
    fn reads_files_and_stdin() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("in.bin");
        std::fs::write(&file, b"abc").unwrap();

        let mut stdin: &[u8] = b"xyz";
        let mut stdout = Vec::new();
        let mut clipboard = MockClipboard::default();
        let mut endpoints = Endpoints {
            stdin: &mut stdin,
            stdout: &mut stdout,
            clipboard: &mut clipboard,
        };
        assert_eq!(
            read_source(&Locator::Path(file), &mut endpoints).unwrap(),
            Payload::Encoded(b"abc".to_vec())
        );
        assert_eq!(
            read_source(&Locator::Stdio, &mut endpoints).unwrap(),
            Payload::Encoded(b"xyz".to_vec())
        );
        // stdin is now exhausted
        assert!(matches!(
            read_source(&Locator::Stdio, &mut endpoints),
            Err(LocatorError::Empty(Locator::Stdio))
        ));
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let mut stdin: &[u8] = b"";
        let mut stdout = Vec::new();
        let mut clipboard = MockClipboard::default();
        let mut endpoints = Endpoints {
            stdin: &mut stdin,
            stdout: &mut stdout,
            clipboard: &mut clipboard,
        };
        let err = read_source(&path("/nonexistent/in.png"), &mut endpoints).unwrap_err();
        assert!(matches!(err, LocatorError::Read { .. }));
    }

    #[test]
    fn atomic_write_replaces_whole_file() {
        let tmp = TempDir::new().unwrap();
        let target = tmp.path().join("out.bin");
        std::fs::write(&target, b"old contents").unwrap();
        write_atomic(&target, b"new").unwrap();
        assert_eq!(std::fs::read(&target).unwrap(), b"new");
        // no temporary files are left behind
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 1);
    }

    #[test]
    fn atomic_write_into_missing_directory_fails_cleanly() {
        let tmp = TempDir::new().unwrap();
        let target = tmp.path().join("missing").join("out.bin");
        assert!(matches!(
            write_atomic(&target, b"data"),
            Err(LocatorError::Write { .. })
        ));
        assert!(!target.exists());
    }

    #[test]
    fn clipboard_destination_takes_rasters() {
        let mut stdin: &[u8] = b"";
        let mut stdout = Vec::new();
        let mut clipboard = MockClipboard::default();
        let mut endpoints = Endpoints {
            stdin: &mut stdin,
            stdout: &mut stdout,
            clipboard: &mut clipboard,
        };
        let img = test_images::rgb(2, 2);
        write_destination(&Locator::Clipboard, &Payload::Raster(img.clone()), &mut endpoints).unwrap();
        write_destination(&Locator::Stdio, &Payload::Encoded(vec![1, 2]), &mut endpoints).unwrap();
        assert_eq!(stdout, vec![1, 2]);
        assert_eq!(clipboard.read_image().unwrap(), img);
    }
}
