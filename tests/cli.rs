//! End-to-end tests driving the compiled binary.
//!
//! Conversions run with `-i` so the outcome does not depend on whether the
//! test harness's stdin/stdout look like terminals; the pipe tests redirect
//! both streams explicitly. Fixtures are generated into a temporary
//! directory per test.
//!
//! Run with: cargo test --test cli

use image::{Rgb, RgbImage, Rgba, RgbaImage};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use tempfile::TempDir;
use transmute::formats::{EncodeOptions, registry};
use transmute::imaging::{CanonicalImage, PixelLayout};

const BIN: &str = env!("CARGO_BIN_EXE_transmute");

fn transmute(dir: &Path, args: &[&str]) -> Output {
    Command::new(BIN)
        .current_dir(dir)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .expect("binary runs")
}

fn succeeds(dir: &Path, args: &[&str]) {
    let out = transmute(dir, args);
    assert!(
        out.status.success(),
        "transmute {args:?} failed: {}",
        String::from_utf8_lossy(&out.stderr)
    );
}

fn fails(dir: &Path, args: &[&str]) {
    let out = transmute(dir, args);
    assert_eq!(out.status.code(), Some(255), "transmute {args:?} should fail");
    assert!(!out.stderr.is_empty(), "a failure explains itself on stderr");
}

/// 128x128 RGB source.png, like the behavioural suite's fixture.
fn rgb_fixture(dir: &Path) -> PathBuf {
    let img = RgbImage::from_fn(128, 128, |x, y| Rgb([(x * 2) as u8, (y * 2) as u8, ((x ^ y) & 0xFF) as u8]));
    let path = dir.join("source.png");
    img.save(&path).unwrap();
    path
}

/// 150x129 RGBA raster written in `format` by the library itself.
fn rgba_fixture(dir: &Path, format: &str, name: &str) -> PathBuf {
    let img = RgbaImage::from_fn(150, 129, |x, y| {
        Rgba([x as u8, y as u8, 90, if (x / 10 + y / 10) % 2 == 0 { 255 } else { 40 }])
    });
    let img = CanonicalImage::new(150, 129, PixelLayout::Rgba, img.into_raw()).unwrap();
    let bytes = registry()
        .by_name(format)
        .unwrap()
        .encode(&img, &EncodeOptions::default())
        .unwrap();
    let path = dir.join(name);
    std::fs::write(&path, bytes).unwrap();
    path
}

fn read(dir: &Path, name: &str) -> Vec<u8> {
    std::fs::read(dir.join(name)).unwrap()
}

/// (width, height, colour type, interlace) from a PNG's IHDR.
fn png_header(bytes: &[u8]) -> (u32, u32, u8, u8) {
    assert!(bytes.starts_with(b"\x89PNG\r\n\x1a\n"), "not a PNG");
    let width = u32::from_be_bytes(bytes[16..20].try_into().unwrap());
    let height = u32::from_be_bytes(bytes[20..24].try_into().unwrap());
    assert_eq!(bytes[24], 8, "8 bits per sample");
    (width, height, bytes[25], bytes[28])
}

const PNG_RGB: u8 = 2;
const PNG_RGBA: u8 = 6;

// =============================================================================
// PNG to every format
// =============================================================================

#[test]
fn png_to_bmp() {
    let tmp = TempDir::new().unwrap();
    rgb_fixture(tmp.path());
    succeeds(tmp.path(), &["-i", "source.png", "target.bmp"]);
    let bytes = read(tmp.path(), "target.bmp");
    assert_eq!(&bytes[..2], b"BM");
    assert_eq!(u32::from_le_bytes(bytes[14..18].try_into().unwrap()), 40);
    assert_eq!(i32::from_le_bytes(bytes[18..22].try_into().unwrap()), 128);
    assert_eq!(i32::from_le_bytes(bytes[22..26].try_into().unwrap()), -128);
    assert_eq!(u16::from_le_bytes([bytes[28], bytes[29]]), 24);
}

#[test]
fn png_to_gif() {
    let tmp = TempDir::new().unwrap();
    rgb_fixture(tmp.path());
    succeeds(tmp.path(), &["-i", "source.png", "target.gif"]);
    let bytes = read(tmp.path(), "target.gif");
    assert_eq!(&bytes[..6], b"GIF87a");
    assert_eq!(&bytes[6..10], &[128, 0, 128, 0]);
}

#[test]
fn format_flag_overrides_extension() {
    let tmp = TempDir::new().unwrap();
    rgb_fixture(tmp.path());
    succeeds(tmp.path(), &["-i", "-f", "gif", "source.png", "target.png"]);
    assert!(read(tmp.path(), "target.png").starts_with(b"GIF87a"));
}

#[test]
fn png_to_ico() {
    let tmp = TempDir::new().unwrap();
    rgb_fixture(tmp.path());
    succeeds(tmp.path(), &["-i", "source.png", "target.ico"]);
    // reserved, type 1 (icon), one entry
    assert_eq!(&read(tmp.path(), "target.ico")[..6], &[0, 0, 1, 0, 1, 0]);
}

#[test]
fn png_to_jpg() {
    let tmp = TempDir::new().unwrap();
    rgb_fixture(tmp.path());
    succeeds(tmp.path(), &["-i", "source.png", "target.jpg"]);
    let bytes = read(tmp.path(), "target.jpg");
    assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
    assert_eq!(&bytes[6..13], b"JFIF\0\x01\x01");
}

#[test]
fn png_to_jpf() {
    let tmp = TempDir::new().unwrap();
    rgb_fixture(tmp.path());
    succeeds(tmp.path(), &["-i", "source.png", "target.jpf"]);
    let bytes = read(tmp.path(), "target.jpf");
    assert_eq!(&bytes[..12], &[0, 0, 0, 0x0C, b'j', b'P', b' ', b' ', 0x0D, 0x0A, 0x87, 0x0A]);
}

#[test]
fn png_to_png() {
    let tmp = TempDir::new().unwrap();
    rgb_fixture(tmp.path());
    succeeds(tmp.path(), &["-i", "source.png", "target.png"]);
    assert_eq!(png_header(&read(tmp.path(), "target.png")), (128, 128, PNG_RGB, 0));
}

#[test]
fn png_to_psd() {
    let tmp = TempDir::new().unwrap();
    rgb_fixture(tmp.path());
    succeeds(tmp.path(), &["-i", "source.png", "target.psd"]);
    let bytes = read(tmp.path(), "target.psd");
    assert_eq!(&bytes[..6], b"8BPS\0\x01");
    // channels, height, width, depth, mode
    assert_eq!(&bytes[12..26], &[0, 3, 0, 0, 0, 128, 0, 0, 0, 128, 0, 8, 0, 3]);
}

#[test]
fn png_to_tga() {
    let tmp = TempDir::new().unwrap();
    rgb_fixture(tmp.path());
    succeeds(tmp.path(), &["-i", "source.png", "target.tga"]);
    let bytes = read(tmp.path(), "target.tga");
    // run-length encoded truecolour
    assert_eq!(bytes[2], 10);
    assert_eq!(&bytes[12..16], &[128, 0, 128, 0]);
}

#[test]
fn png_to_tiff() {
    let tmp = TempDir::new().unwrap();
    rgb_fixture(tmp.path());
    succeeds(tmp.path(), &["-i", "source.png", "target.tiff"]);
    assert_eq!(&read(tmp.path(), "target.tiff")[..4], b"MM\0*");
}

#[test]
fn png_to_pdf() {
    let tmp = TempDir::new().unwrap();
    rgb_fixture(tmp.path());
    succeeds(tmp.path(), &["-i", "source.png", "target.pdf"]);
    assert!(read(tmp.path(), "target.pdf").starts_with(b"%PDF-1.3"));
}

// =============================================================================
// Every format back to PNG
// =============================================================================

#[test]
fn lossless_formats_round_trip_to_png() {
    let tmp = TempDir::new().unwrap();
    rgb_fixture(tmp.path());
    let original = image::open(tmp.path().join("source.png")).unwrap().to_rgb8();
    for ext in ["bmp", "tga", "tiff", "psd", "jpf", "j2k", "pict", "pdf", "eps", "webp"] {
        let middle = format!("middle.{ext}");
        succeeds(tmp.path(), &["-i", "source.png", &middle]);
        succeeds(tmp.path(), &["-i", &middle, "target.png"]);
        let bytes = read(tmp.path(), "target.png");
        let (width, height, colour, interlace) = png_header(&bytes);
        assert_eq!((width, height, interlace), (128, 128, 0), "via {ext}");
        // the WebP decoder may report an opaque alpha channel
        if ext != "webp" {
            assert_eq!(colour, PNG_RGB, "via {ext}");
        }
        let back = image::load_from_memory(&bytes).unwrap().to_rgb8();
        assert_eq!(back, original, "pixels changed via {ext}");
    }
}

#[test]
fn lossy_and_icon_formats_keep_dimensions() {
    let tmp = TempDir::new().unwrap();
    rgb_fixture(tmp.path());
    for (ext, colour) in [("jpg", PNG_RGB), ("gif", PNG_RGB), ("ico", PNG_RGBA)] {
        let middle = format!("middle.{ext}");
        succeeds(tmp.path(), &["-i", "source.png", &middle]);
        succeeds(tmp.path(), &["-i", &middle, "target.png"]);
        assert_eq!(png_header(&read(tmp.path(), "target.png")), (128, 128, colour, 0), "via {ext}");
    }
}

#[test]
fn document_formats_resize_with_aspect_ratio() {
    let tmp = TempDir::new().unwrap();
    for (format, name, colour) in [
        ("pict", "source.pct", PNG_RGBA),
        ("pdf", "source.pdf", PNG_RGBA),
        ("eps", "source.eps", PNG_RGBA),
    ] {
        rgba_fixture(tmp.path(), format, name);
        succeeds(tmp.path(), &["-i", "-W", "128", name, "target.png"]);
        // 129 * 128 / 150 = 110.08
        assert_eq!(png_header(&read(tmp.path(), "target.png")), (128, 110, colour, 0), "{format}");
    }
}

#[test]
fn height_resize() {
    let tmp = TempDir::new().unwrap();
    rgb_fixture(tmp.path());
    succeeds(tmp.path(), &["-i", "-H", "50", "source.png", "target.png"]);
    assert_eq!(png_header(&read(tmp.path(), "target.png")).0, 50);
}

// =============================================================================
// Streams
// =============================================================================

fn pipe(dir: &Path, args: &[&str], input: &[u8]) -> Output {
    let mut child = Command::new(BIN)
        .current_dir(dir)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();
    child.stdin.take().unwrap().write_all(input).unwrap();
    child.wait_with_output().unwrap()
}

#[test]
fn pipe_keeps_format() {
    let tmp = TempDir::new().unwrap();
    let source = std::fs::read(rgb_fixture(tmp.path())).unwrap();
    let out = pipe(tmp.path(), &[], &source);
    assert!(out.status.success());
    assert_eq!(png_header(&out.stdout), (128, 128, PNG_RGB, 0));
}

#[test]
fn pipe_with_format() {
    let tmp = TempDir::new().unwrap();
    let source = std::fs::read(rgb_fixture(tmp.path())).unwrap();
    let out = pipe(tmp.path(), &["-f", "gif"], &source);
    assert!(out.status.success());
    assert!(out.stdout.starts_with(b"GIF87a"));
}

#[test]
fn dash_names_the_standard_streams() {
    let tmp = TempDir::new().unwrap();
    let source = std::fs::read(rgb_fixture(tmp.path())).unwrap();
    let out = pipe(tmp.path(), &["-i", "-", "target.bmp"], &source);
    assert!(out.status.success());
    assert!(read(tmp.path(), "target.bmp").starts_with(b"BM"));
}

// =============================================================================
// Failures
// =============================================================================

#[test]
fn bad_filename() {
    let tmp = TempDir::new().unwrap();
    fails(tmp.path(), &["-i", "source.xxx", "target.png"]);
    assert!(!tmp.path().join("target.png").exists());
}

#[test]
fn bad_format() {
    let tmp = TempDir::new().unwrap();
    rgb_fixture(tmp.path());
    fails(tmp.path(), &["-i", "source.png", "target.xxx"]);
    assert!(!tmp.path().join("target.xxx").exists());
}

#[test]
fn bad_rect() {
    let tmp = TempDir::new().unwrap();
    rgb_fixture(tmp.path());
    fails(tmp.path(), &["-i", "-W", "-100", "source.png", "target.png"]);
    fails(tmp.path(), &["-i", "-H", "-100", "source.png", "target.png"]);
    fails(tmp.path(), &["-i", "-W", "0", "source.png", "target.png"]);
    assert!(!tmp.path().join("target.png").exists());
}

#[test]
fn width_and_height_together_are_rejected() {
    let tmp = TempDir::new().unwrap();
    rgb_fixture(tmp.path());
    fails(tmp.path(), &["-i", "-W", "10", "-H", "10", "source.png", "target.png"]);
}

#[test]
fn corrupt_source_leaves_destination_untouched() {
    let tmp = TempDir::new().unwrap();
    std::fs::write(tmp.path().join("source.png"), b"\x89PNG\r\n\x1a\ngarbage").unwrap();
    std::fs::write(tmp.path().join("target.gif"), b"previous").unwrap();
    fails(tmp.path(), &["-i", "source.png", "target.gif"]);
    assert_eq!(read(tmp.path(), "target.gif"), b"previous");
}

#[test]
fn interactive_mode_requires_both_files() {
    let tmp = TempDir::new().unwrap();
    rgb_fixture(tmp.path());
    fails(tmp.path(), &["-i", "source.png"]);
}

// =============================================================================
// Subcommands and config
// =============================================================================

#[test]
fn formats_lists_every_format() {
    let tmp = TempDir::new().unwrap();
    let out = transmute(tmp.path(), &["formats"]);
    assert!(out.status.success());
    let listing = String::from_utf8(out.stderr).unwrap();
    for id in ["png", "gif", "bmp", "ico", "jpeg", "jp2", "psd", "tga", "tiff", "eps", "pdf", "pict"] {
        assert!(listing.lines().any(|l| l.starts_with(id)), "{id} missing");
    }
}

#[test]
fn gen_config_is_loadable() {
    let tmp = TempDir::new().unwrap();
    let out = transmute(tmp.path(), &["gen-config"]);
    assert!(out.status.success());
    std::fs::write(tmp.path().join("config.toml"), &out.stdout).unwrap();
    rgb_fixture(tmp.path());
    succeeds(tmp.path(), &["--config", "config.toml", "-i", "source.png", "target.jpg"]);
}

#[test]
fn config_controls_encoders() {
    let tmp = TempDir::new().unwrap();
    rgb_fixture(tmp.path());
    std::fs::write(tmp.path().join("config.toml"), "[tga]\nrle = false\n").unwrap();
    succeeds(tmp.path(), &["--config", "config.toml", "-i", "source.png", "target.tga"]);
    // uncompressed truecolour
    assert_eq!(read(tmp.path(), "target.tga")[2], 2);
}

#[test]
fn invalid_config_fails() {
    let tmp = TempDir::new().unwrap();
    rgb_fixture(tmp.path());
    std::fs::write(tmp.path().join("config.toml"), "[jpeg]\nqualty = 5\n").unwrap();
    fails(tmp.path(), &["--config", "config.toml", "-i", "source.png", "target.jpg"]);
    assert!(!tmp.path().join("target.jpg").exists());
}

#[test]
fn verbose_reports_on_stderr() {
    let tmp = TempDir::new().unwrap();
    rgb_fixture(tmp.path());
    let out = transmute(tmp.path(), &["-i", "-v", "-W", "64", "source.png", "target.gif"]);
    assert!(out.status.success());
    let report = String::from_utf8(out.stderr).unwrap();
    assert!(report.contains("Size: 128x128 -> 64x64"), "{report}");
    assert!(out.stdout.is_empty());
}

#[test]
#[ignore = "needs a display server with a clipboard"]
fn clipboard_round_trip() {
    let tmp = TempDir::new().unwrap();
    rgb_fixture(tmp.path());
    succeeds(tmp.path(), &["-i", "-C", "source.png"]);
    succeeds(tmp.path(), &["-i", "-c", "target.png"]);
    assert_eq!(png_header(&read(tmp.path(), "target.png")), (128, 128, PNG_RGB, 0));
}

#[test]
fn clipboard_server_reports_bad_frames_on_stdout() {
    let tmp = TempDir::new().unwrap();
    let out = transmute(tmp.path(), &["serve-clipboard"]);
    assert_eq!(out.status.code(), Some(255));
    let status = String::from_utf8(out.stdout).unwrap();
    assert!(status.starts_with("clipboard: bad image frame"), "{status}");
}

#[test]
fn resize_overflowing_the_other_axis_fails() {
    let tmp = TempDir::new().unwrap();
    RgbImage::new(1, 1000).save(tmp.path().join("tall.png")).unwrap();
    fails(tmp.path(), &["-i", "-W", "100", "tall.png", "wide.png"]);
    assert!(!tmp.path().join("wide.png").exists());
}
