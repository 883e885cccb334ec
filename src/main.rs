use clap::error::ErrorKind;
use clap::{Parser, Subcommand};
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use transmute::imaging::ResizeSpec;
use transmute::locator::{Endpoints, LocatorArgs, StreamState, SystemClipboard};
use transmute::pipeline::{ConversionRequest, FAILURE_EXIT_CODE};
use transmute::{config, formats, locator, output, pipeline};

fn version_string() -> &'static str {
    let describe = env!("TRANSMUTE_GIT_DESCRIBE");
    if describe.is_empty() || describe.trim_start_matches('v') == env!("CARGO_PKG_VERSION") {
        env!("CARGO_PKG_VERSION")
    } else {
        // Leaked once at startup, called exactly once
        Box::leak(format!("{} ({describe})", env!("CARGO_PKG_VERSION")).into_boxed_str())
    }
}

#[derive(Parser)]
#[command(name = "transmute")]
#[command(about = "Convert images between formats")]
#[command(long_about = "\
Convert images between formats

The output format follows the destination's extension unless -f is given.
Omitted files fall back to standard input and output when those are
redirected, so transmute works in pipes:

  transmute photo.png photo.gif          file to file
  transmute -W 640 scan.tif thumb.jpg    resize, keeping the aspect ratio
  transmute -f gif < in.png > out.gif    pipe, forced output format
  transmute -C diagram.pdf               copy to the clipboard
  transmute -c pasted.png                paste from the clipboard

Formats: png gif bmp ico jpeg jp2 j2k psd tga tiff eps pdf pict webp
(run 'transmute formats' for extensions and capabilities).

Any failure exits with status 255 and leaves no output file behind.
Run 'transmute gen-config' to generate a documented config.toml.")]
#[command(version = version_string())]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    /// Never treat standard input/output as image streams
    #[arg(short, long)]
    interactive: bool,

    /// Output format, overriding the destination's extension
    #[arg(short, long, value_name = "FORMAT")]
    format: Option<String>,

    /// Resize to this width, keeping the aspect ratio
    #[arg(short = 'W', long, value_name = "PIXELS", allow_negative_numbers = true)]
    width: Option<i64>,

    /// Resize to this height, keeping the aspect ratio
    #[arg(
        short = 'H',
        long,
        value_name = "PIXELS",
        allow_negative_numbers = true,
        conflicts_with = "width"
    )]
    height: Option<i64>,

    /// Read the source image from the clipboard
    #[arg(short = 'c', long)]
    paste: bool,

    /// Write the result to the clipboard
    #[arg(short = 'C', long, conflicts_with = "paste")]
    copy: bool,

    /// Describe the conversion on stderr
    #[arg(short, long)]
    verbose: bool,

    /// Config file (default: $TRANSMUTE_CONFIG)
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,

    /// SOURCE and DESTINATION; '-' is standard input/output
    #[arg(value_name = "FILE", num_args = 0..=2)]
    files: Vec<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// List supported formats with their extensions and capabilities
    Formats,
    /// Print a stock config.toml with all options documented
    GenConfig,
    /// Keep a copied image on the clipboard until another program replaces it
    #[command(name = "serve-clipboard", hide = true)]
    ServeClipboard,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::SUCCESS,
                _ => ExitCode::from(FAILURE_EXIT_CODE),
            };
        }
    };

    match cli.command {
        Some(Command::Formats) => {
            output::print_formats_listing(formats::registry().descriptors());
            ExitCode::SUCCESS
        }
        Some(Command::GenConfig) => {
            print!("{}", config::stock_config_toml());
            ExitCode::SUCCESS
        }
        Some(Command::ServeClipboard) => serve_clipboard(),
        None => run_conversion(cli),
    }
}

/// The far end of a `-C` on hosts where the clipboard dies with its owner.
fn serve_clipboard() -> ExitCode {
    #[cfg(target_os = "linux")]
    let mut clipboard = locator::ServingClipboard::default();
    #[cfg(not(target_os = "linux"))]
    let mut clipboard = SystemClipboard;

    let stdin = io::stdin();
    let mut input = stdin.lock();
    let mut status = io::stdout();
    match locator::serve_clipboard(&mut input, &mut status, &mut clipboard) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::warn!("{e}");
            ExitCode::from(FAILURE_EXIT_CODE)
        }
    }
}

fn run_conversion(cli: Cli) -> ExitCode {
    let config_path = config::config_path(cli.config.as_deref());
    let config = match config::load_config(config_path.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            output::print_error(&e);
            return ExitCode::from(FAILURE_EXIT_CODE);
        }
    };

    let request = ConversionRequest {
        locators: LocatorArgs {
            positionals: cli.files,
            paste: cli.paste,
            copy: cli.copy,
            interactive: cli.interactive,
        },
        format: cli.format,
        resize: ResizeSpec::from_axes(cli.width, cli.height),
        options: config.encode_options(),
    };

    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut stdin = stdin.lock();
    let mut stdout = stdout.lock();
    let mut clipboard = SystemClipboard;
    let mut endpoints = Endpoints {
        stdin: &mut stdin,
        stdout: &mut stdout,
        clipboard: &mut clipboard,
    };

    match pipeline::convert(&request, StreamState::detect(), &mut endpoints) {
        Ok(report) => {
            if cli.verbose {
                output::print_report(&report);
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            output::print_error(&e);
            ExitCode::from(e.exit_code())
        }
    }
}
