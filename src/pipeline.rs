//! One conversion, start to finish.
//!
//! ```text
//! Idle → Resolving → Decoding → Resizing → Encoding → Writing → Done
//!            └──────────┴──────────┴──────────┴──────────┴──→ Failed
//! ```
//!
//! Each stage runs exactly once (resizing only when asked for) and the first
//! error moves the pipeline to `Failed`, keeping that error. Nothing reaches
//! the destination before encoding finished, and path destinations are
//! replaced atomically, so a failed conversion leaves no output behind.
//!
//! Format selection happens while resolving, before any bytes are read, so
//! an unknown destination extension fails without touching the source:
//!
//! - source path: its extension; a path without one is sniffed like a stream
//! - source stream: the leading bytes ([`Registry::detect`])
//! - destination path: the `-f` override, else its extension
//! - destination stream: the `-f` override, else the source's format
//! - clipboard: no format, pixels pass straight through

use crate::formats::{EncodeOptions, FormatDescriptor, FormatError, Registry, registry};
use crate::imaging::{self, CanonicalImage, PixelLayout, ResizeError, ResizeSpec};
use crate::locator::{self, Endpoints, Locator, LocatorArgs, LocatorError, Payload, StreamState};
use log::{debug, info};
use std::fmt;
use thiserror::Error;

/// Exit status for every classified failure. Shells report it as 255, some
/// harnesses as -1.
pub const FAILURE_EXIT_CODE: u8 = 255;

#[derive(Error, Debug)]
pub enum ConvertError {
    #[error("unknown format: {0}")]
    UnknownFormat(String),
    #[error("cannot decode {0}")]
    Decode(String),
    #[error("cannot encode {0}")]
    Encode(String),
    #[error("invalid dimension: {0}")]
    InvalidDimension(String),
    #[error("{0}")]
    Io(String),
}

impl ConvertError {
    pub fn exit_code(&self) -> u8 {
        FAILURE_EXIT_CODE
    }
}

impl From<FormatError> for ConvertError {
    fn from(err: FormatError) -> Self {
        Self::UnknownFormat(err.to_string())
    }
}

impl From<LocatorError> for ConvertError {
    fn from(err: LocatorError) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<ResizeError> for ConvertError {
    fn from(err: ResizeError) -> Self {
        Self::InvalidDimension(err.to_string())
    }
}

/// Everything one conversion needs, built from the command line and config.
#[derive(Debug, Clone, Default)]
pub struct ConversionRequest {
    pub locators: LocatorArgs,
    /// `-f`: output format regardless of the destination's extension.
    pub format: Option<String>,
    pub resize: Option<ResizeSpec>,
    pub options: EncodeOptions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Idle,
    Resolving,
    Decoding,
    Resizing,
    Encoding,
    Writing,
    Done,
    Failed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Idle => "idle",
            Stage::Resolving => "resolving",
            Stage::Decoding => "decoding",
            Stage::Resizing => "resizing",
            Stage::Encoding => "encoding",
            Stage::Writing => "writing",
            Stage::Done => "done",
            Stage::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// What a finished conversion did, for `--verbose`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionReport {
    pub source: Locator,
    pub destination: Locator,
    /// `None` for the clipboard.
    pub source_format: Option<&'static str>,
    pub destination_format: Option<&'static str>,
    pub input_size: (u32, u32),
    pub output_size: (u32, u32),
    pub layout: PixelLayout,
    /// Encoded size; zero when the destination is the clipboard.
    pub bytes_written: usize,
}

/// Source and destination with their formats settled.
struct Plan {
    source: Locator,
    destination: Locator,
    /// Known up front for paths; streams are sniffed after reading.
    source_format: Option<&'static FormatDescriptor>,
    destination_format: Option<&'static FormatDescriptor>,
}

/// Tracks the current stage and logs every transition.
struct Tracker {
    stage: Stage,
}

impl Tracker {
    fn enter(&mut self, next: Stage) {
        debug!("pipeline: {} -> {next}", self.stage);
        self.stage = next;
    }

    /// Record a stage failure and hand the error back.
    fn fail(&mut self, err: ConvertError) -> ConvertError {
        debug!("pipeline: {} -> {} ({err})", self.stage, Stage::Failed);
        self.stage = Stage::Failed;
        err
    }
}

/// Run one conversion against the process's streams and clipboard.
pub fn convert(
    request: &ConversionRequest,
    streams: StreamState,
    endpoints: &mut Endpoints<'_>,
) -> Result<ConversionReport, ConvertError> {
    let mut tracker = Tracker { stage: Stage::Idle };
    run(request, streams, endpoints, &mut tracker).map_err(|e| tracker.fail(e))
}

fn run(
    request: &ConversionRequest,
    streams: StreamState,
    endpoints: &mut Endpoints<'_>,
    tracker: &mut Tracker,
) -> Result<ConversionReport, ConvertError> {
    let reg = registry();

    tracker.enter(Stage::Resolving);
    let plan = plan(reg, request, streams)?;
    // a bad rectangle fails before the source is even read
    if let Some(spec) = request.resize {
        imaging::operations::validate(spec)?;
    }
    let payload = locator::read_source(&plan.source, endpoints)?;

    tracker.enter(Stage::Decoding);
    let (image, source_format) = decode(reg, &plan, payload)?;
    let input_size = image.dimensions();

    let image = match request.resize {
        Some(spec) => {
            tracker.enter(Stage::Resizing);
            imaging::resize(image, Some(spec))?
        }
        None => image,
    };

    tracker.enter(Stage::Encoding);
    let destination_format = match (&plan.destination, plan.destination_format) {
        (Locator::Clipboard, _) => None,
        (_, Some(desc)) => Some(desc),
        // stdout without -f mirrors the source; clipboard pixels default to PNG
        (_, None) => Some(source_format.unwrap_or(&reg.descriptors()[0])),
    };
    let output_size = image.dimensions();
    let layout = image.layout();
    let payload = match destination_format {
        Some(desc) => {
            info!("encoding {} as {}", plan.destination, desc.id);
            let bytes = desc
                .encode(&image, &request.options)
                .map_err(|e| ConvertError::Encode(format!("{}: {e}", desc.id)))?;
            Payload::Encoded(bytes)
        }
        None => Payload::Raster(image),
    };

    tracker.enter(Stage::Writing);
    locator::write_destination(&plan.destination, &payload, endpoints)?;

    tracker.enter(Stage::Done);
    Ok(ConversionReport {
        source: plan.source,
        destination: plan.destination,
        source_format: source_format.map(|d| d.id),
        destination_format: destination_format.map(|d| d.id),
        input_size,
        output_size,
        layout,
        bytes_written: match &payload {
            Payload::Encoded(bytes) => bytes.len(),
            Payload::Raster(_) => 0,
        },
    })
}

fn plan(
    reg: &'static Registry,
    request: &ConversionRequest,
    streams: StreamState,
) -> Result<Plan, ConvertError> {
    let (source, destination) = locator::resolve(&request.locators, streams)?;

    let source_format = match source.path() {
        Some(path) => match reg.by_path(path) {
            Ok(desc) => Some(desc),
            Err(FormatError::NoExtension(_)) => None,
            Err(e) => return Err(e.into()),
        },
        None => None,
    };

    let destination_format = match &destination {
        Locator::Clipboard => {
            if let Some(name) = &request.format {
                log::warn!("ignoring -f {name}: the clipboard holds pixels, not files");
            }
            None
        }
        Locator::Path(path) => Some(reg.resolve(Some(path), request.format.as_deref())?),
        Locator::Stdio => match &request.format {
            Some(name) => Some(reg.resolve(None, Some(name))?),
            None => None,
        },
    };

    Ok(Plan {
        source,
        destination,
        source_format,
        destination_format,
    })
}

fn decode(
    reg: &'static Registry,
    plan: &Plan,
    payload: Payload,
) -> Result<(CanonicalImage, Option<&'static FormatDescriptor>), ConvertError> {
    match payload {
        Payload::Raster(img) => Ok((img, None)),
        Payload::Encoded(bytes) => {
            let desc = match plan.source_format {
                Some(desc) => desc,
                None => reg.detect(&bytes)?,
            };
            info!("decoding {} as {}", plan.source, desc.id);
            let img = desc
                .decode(&bytes)
                .map_err(|e| ConvertError::Decode(format!("{} as {}: {e}", plan.source, desc.id)))?;
            Ok((img, Some(desc)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::test_images;
    use crate::locator::MockClipboard;
    use std::path::Path;
    use tempfile::TempDir;

    struct Harness {
        stdin: Vec<u8>,
        stdout: Vec<u8>,
        clipboard: MockClipboard,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                stdin: Vec::new(),
                stdout: Vec::new(),
                clipboard: MockClipboard::default(),
            }
        }

        fn run(&mut self, request: &ConversionRequest, streams: StreamState) -> Result<ConversionReport, ConvertError> {
            let mut stdin: &[u8] = &self.stdin;
            let mut endpoints = Endpoints {
                stdin: &mut stdin,
                stdout: &mut self.stdout,
                clipboard: &mut self.clipboard,
            };
            convert(request, streams, &mut endpoints)
        }
    }

    fn request(positionals: &[&Path]) -> ConversionRequest {
        ConversionRequest {
            locators: LocatorArgs {
                positionals: positionals.iter().map(|p| p.display().to_string()).collect(),
                interactive: true,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn write_png(path: &Path, img: &CanonicalImage) {
        let bytes = registry()
            .by_name("png")
            .unwrap()
            .encode(img, &EncodeOptions::default())
            .unwrap();
        std::fs::write(path, bytes).unwrap();
    }

    fn read_as(path: &Path, format: &str) -> CanonicalImage {
        let bytes = std::fs::read(path).unwrap();
        registry().by_name(format).unwrap().decode(&bytes).unwrap()
    }

    #[test]
    fn converts_between_files() {
        let tmp = TempDir::new().unwrap();
        let (src, dst) = (tmp.path().join("source.png"), tmp.path().join("target.bmp"));
        let img = test_images::rgb(20, 12);
        write_png(&src, &img);

        let report = Harness::new()
            .run(&request(&[&src, &dst]), StreamState::redirected())
            .unwrap();
        assert_eq!(report.source_format, Some("png"));
        assert_eq!(report.destination_format, Some("bmp"));
        assert_eq!(report.output_size, (20, 12));
        assert_eq!(read_as(&dst, "bmp"), img);
    }

    #[test]
    fn format_override_beats_extension() {
        let tmp = TempDir::new().unwrap();
        let (src, dst) = (tmp.path().join("source.png"), tmp.path().join("target.png"));
        write_png(&src, &test_images::flat(16, 16));

        let mut req = request(&[&src, &dst]);
        req.format = Some("gif".into());
        Harness::new().run(&req, StreamState::redirected()).unwrap();
        assert!(std::fs::read(&dst).unwrap().starts_with(b"GIF87a"));
    }

    #[test]
    fn resize_keeps_aspect_ratio() {
        let tmp = TempDir::new().unwrap();
        let (src, dst) = (tmp.path().join("source.png"), tmp.path().join("target.png"));
        write_png(&src, &test_images::rgba(128, 148));

        let mut req = request(&[&src, &dst]);
        req.resize = Some(ResizeSpec::Width(110));
        let report = Harness::new().run(&req, StreamState::redirected()).unwrap();
        assert_eq!(report.input_size, (128, 148));
        assert_eq!(report.output_size, (110, 127));
        assert_eq!(read_as(&dst, "png").layout(), PixelLayout::Rgba);
    }

    #[test]
    fn failures_leave_no_output() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("source.png");
        write_png(&src, &test_images::rgb(8, 8));

        let dst = tmp.path().join("target.xxx");
        let err = Harness::new()
            .run(&request(&[&src, &dst]), StreamState::redirected())
            .unwrap_err();
        assert!(matches!(err, ConvertError::UnknownFormat(_)));
        assert!(!dst.exists());

        let dst = tmp.path().join("target.png");
        for spec in [ResizeSpec::Width(-100), ResizeSpec::Height(0)] {
            let mut req = request(&[&src, &dst]);
            req.resize = Some(spec);
            let err = Harness::new().run(&req, StreamState::redirected()).unwrap_err();
            assert!(matches!(err, ConvertError::InvalidDimension(_)), "{err}");
            assert!(!dst.exists());
        }
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 1);
    }

    #[test]
    fn unknown_source_extension_is_an_unknown_format() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("source.xxx");
        let dst = tmp.path().join("target.png");
        let err = Harness::new()
            .run(&request(&[&src, &dst]), StreamState::redirected())
            .unwrap_err();
        assert!(matches!(err, ConvertError::UnknownFormat(_)));
        assert_eq!(err.exit_code(), 255);
    }

    #[test]
    fn corrupt_source_is_a_decode_error() {
        let tmp = TempDir::new().unwrap();
        let (src, dst) = (tmp.path().join("source.png"), tmp.path().join("target.gif"));
        std::fs::write(&src, b"\x89PNG\r\n\x1a\nthis is not a png").unwrap();
        let err = Harness::new()
            .run(&request(&[&src, &dst]), StreamState::redirected())
            .unwrap_err();
        assert!(matches!(err, ConvertError::Decode(_)));
        assert!(!dst.exists());
    }

    #[test]
    fn missing_source_is_an_io_error() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("absent.png");
        let dst = tmp.path().join("target.png");
        let err = Harness::new()
            .run(&request(&[&src, &dst]), StreamState::redirected())
            .unwrap_err();
        assert!(matches!(err, ConvertError::Io(_)));
    }

    #[test]
    fn pipe_keeps_the_source_format() {
        let img = test_images::rgb(9, 9);
        let mut harness = Harness::new();
        harness.stdin = registry()
            .by_name("png")
            .unwrap()
            .encode(&img, &EncodeOptions::default())
            .unwrap();
        let report = harness
            .run(&ConversionRequest::default(), StreamState::redirected())
            .unwrap();
        assert_eq!(report.source_format, Some("png"));
        assert_eq!(report.destination_format, Some("png"));
        assert!(harness.stdout.starts_with(b"\x89PNG"));
    }

    #[test]
    fn pipe_honours_format_override() {
        let mut harness = Harness::new();
        harness.stdin = registry()
            .by_name("png")
            .unwrap()
            .encode(&test_images::flat(8, 8), &EncodeOptions::default())
            .unwrap();
        let req = ConversionRequest {
            format: Some("gif".into()),
            ..Default::default()
        };
        harness.run(&req, StreamState::redirected()).unwrap();
        assert!(harness.stdout.starts_with(b"GIF87a"));
    }

    #[test]
    fn unidentifiable_stream_is_an_unknown_format() {
        let mut harness = Harness::new();
        harness.stdin = b"plain text, not an image".to_vec();
        let err = harness
            .run(&ConversionRequest::default(), StreamState::redirected())
            .unwrap_err();
        assert!(matches!(err, ConvertError::UnknownFormat(_)));
        assert!(harness.stdout.is_empty());
    }

    #[test]
    fn clipboard_round_trip() {
        let tmp = TempDir::new().unwrap();
        let (src, dst) = (tmp.path().join("source.png"), tmp.path().join("target.png"));
        let img = test_images::rgb(16, 10);
        write_png(&src, &img);

        let mut harness = Harness::new();
        let mut copy = request(&[&src]);
        copy.locators.copy = true;
        let report = harness.run(&copy, StreamState::redirected()).unwrap();
        assert_eq!(report.destination, Locator::Clipboard);
        assert_eq!(report.destination_format, None);

        let mut paste = request(&[&dst]);
        paste.locators.paste = true;
        let report = harness.run(&paste, StreamState::redirected()).unwrap();
        assert_eq!(report.source_format, None);
        let out = read_as(&dst, "png");
        assert_eq!(out.layout(), PixelLayout::Rgb);
        assert_eq!(out, img);
    }

    #[test]
    fn empty_clipboard_is_an_io_error() {
        let tmp = TempDir::new().unwrap();
        let mut paste = request(&[&tmp.path().join("target.png")]);
        paste.locators.paste = true;
        let err = Harness::new().run(&paste, StreamState::redirected()).unwrap_err();
        assert!(matches!(err, ConvertError::Io(_)));
    }

    #[test]
    fn unavailable_clipboard_fails_the_copy() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("source.png");
        write_png(&src, &test_images::rgb(4, 4));

        let mut harness = Harness::new();
        harness.clipboard.refuse_writes = Some("cannot open display".into());
        let mut copy = request(&[&src]);
        copy.locators.copy = true;
        let err = harness.run(&copy, StreamState::redirected()).unwrap_err();
        assert!(matches!(&err, ConvertError::Io(m) if m.contains("cannot open display")), "{err}");
    }

    #[test]
    fn alpha_is_composited_for_opaque_targets() {
        let tmp = TempDir::new().unwrap();
        let (src, dst) = (tmp.path().join("source.png"), tmp.path().join("target.bmp"));
        let img = CanonicalImage::new(1, 1, PixelLayout::Rgba, vec![0, 0, 0, 0]).unwrap();
        write_png(&src, &img);

        let mut req = request(&[&src, &dst]);
        req.options.background = imaging::Background([10, 20, 30]);
        Harness::new().run(&req, StreamState::redirected()).unwrap();
        assert_eq!(read_as(&dst, "bmp").pixels(), &[10, 20, 30]);
    }
}
