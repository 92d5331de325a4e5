use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};

use bulknorm::batch::{BatchOrchestrator, StartRequest};
use bulknorm::config::{self, BitDepth, NormMode, Settings};
use bulknorm::format;
use bulknorm::inspect::{get_format_info, stream_info, MediaInspector, SampleFormat};
use bulknorm::logging;
use bulknorm::models::{BatchEvent, RunOutcome, ScanEntry};
use bulknorm::planner::Planner;
use bulknorm::preview::{PreviewOrchestrator, PreviewRequest, DEFAULT_SAMPLE_SIZE};
use bulknorm::process::ProcessSupervisor;
use bulknorm::scanner;
use bulknorm::tools::{Tool, ToolLocator, ToolPaths};

const EVENT_POLL: Duration = Duration::from_millis(200);

#[derive(Parser)]
#[command(
    name = "bulknorm",
    version,
    about = "Batch peak/loudness normalizer for WAV folders"
)]
struct Cli {
    /// Debug-level logging (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Normalize every WAV file under INPUT into OUTPUT, mirroring folders
    Normalize(NormalizeArgs),
    /// Render a random sample into a temporary folder
    Preview(PreviewArgs),
    /// List WAV files with duration and format
    Scan {
        input: PathBuf,

        /// Output as JSON instead of table
        #[arg(long)]
        json: bool,
    },
    /// Show which ffmpeg/ffprobe binaries would be used
    Tools,
}

#[derive(Args)]
struct NormalizeArgs {
    input: PathBuf,
    output: PathBuf,

    #[command(flatten)]
    settings: SettingsArgs,

    /// Print one JSON event per line on stdout
    #[arg(long, conflicts_with = "tui")]
    json: bool,

    /// Launch interactive TUI
    #[arg(long)]
    tui: bool,

    /// Write into a non-empty output folder, replacing same-named files
    #[arg(long, conflicts_with = "clear_output")]
    overwrite: bool,

    /// Delete the output folder's contents (except dot-files) first
    #[arg(long)]
    clear_output: bool,
}

#[derive(Args)]
struct PreviewArgs {
    input: PathBuf,

    /// Number of files to sample (1-50)
    #[arg(long, default_value_t = DEFAULT_SAMPLE_SIZE)]
    sample: usize,

    /// Seed for a reproducible sample
    #[arg(long)]
    seed: Option<u64>,

    #[command(flatten)]
    settings: SettingsArgs,

    /// Print one JSON event per line on stdout
    #[arg(long)]
    json: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    Peak,
    Lufs,
}

impl From<ModeArg> for NormMode {
    fn from(value: ModeArg) -> Self {
        match value {
            ModeArg::Peak => NormMode::Peak,
            ModeArg::Lufs => NormMode::Lufs,
        }
    }
}

/// Flags overlaid on top of `--settings` (or the defaults).
#[derive(Args)]
struct SettingsArgs {
    /// JSON settings file
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Normalization mode
    #[arg(long, value_enum)]
    mode: Option<ModeArg>,

    /// Integrated loudness target in LUFS
    #[arg(long, allow_hyphen_values = true)]
    lufs: Option<f64>,

    /// True-peak ceiling in dBTP
    #[arg(long, allow_hyphen_values = true)]
    true_peak: Option<f64>,

    /// Limiter ceiling (linear, 0.0625-1)
    #[arg(long)]
    limiter: Option<f64>,

    /// Peak target in dB
    #[arg(long, allow_hyphen_values = true)]
    peak_target: Option<f64>,

    /// Output bit depth: 16, 24 or original
    #[arg(long)]
    bit_depth: Option<BitDepth>,

    /// Trim leading and trailing silence
    #[arg(long)]
    trim: bool,

    /// Silence threshold in dB
    #[arg(long, allow_hyphen_values = true)]
    trim_threshold: Option<f64>,

    /// Minimum silence length in ms
    #[arg(long)]
    trim_min_silence_ms: Option<u32>,

    /// Padding kept around detected audio in ms
    #[arg(long)]
    trim_pad_ms: Option<u32>,

    /// Files shorter than this (ms) are never trimmed
    #[arg(long)]
    trim_min_file_ms: Option<u32>,

    /// Conservative trimming (threshold <= -60 dB, silence >= 0.3 s)
    #[arg(long)]
    conservative: bool,

    /// 80 Hz high-pass before silence detection
    #[arg(long)]
    hpf: bool,

    /// ffmpeg thread hint (0 = auto)
    #[arg(short = 'j', long)]
    threads: Option<u32>,

    /// Single-pass loudness normalization
    #[arg(long)]
    fast: bool,

    /// Let peak mode turn loud files down as well as up
    #[arg(long)]
    allow_attenuation: bool,

    /// Forward ffmpeg's own log lines
    #[arg(long)]
    ffmpeg_logs: bool,
}

impl SettingsArgs {
    fn resolve(&self) -> Result<Settings> {
        let mut settings = match &self.settings {
            Some(path) => config::load_settings(path)?,
            None => Settings::default(),
        };
        if let Some(mode) = self.mode {
            settings.norm_mode = mode.into();
        }
        if let Some(v) = self.lufs {
            settings.lufs_target = v;
        }
        if let Some(v) = self.true_peak {
            settings.tp_margin = v;
        }
        if let Some(v) = self.limiter {
            settings.limiter_limit = v;
        }
        if let Some(v) = self.peak_target {
            settings.peak_target_db = v;
        }
        if let Some(v) = self.bit_depth {
            settings.target_bit_depth = v;
        }
        if let Some(v) = self.trim_threshold {
            settings.trim_threshold_db = v;
        }
        if let Some(v) = self.trim_min_silence_ms {
            settings.trim_min_duration_ms = v;
        }
        if let Some(v) = self.trim_pad_ms {
            settings.trim_pad_ms = v;
        }
        if let Some(v) = self.trim_min_file_ms {
            settings.trim_min_file_ms = v;
        }
        if let Some(v) = self.threads {
            settings.ffmpeg_threads = v;
        }
        settings.auto_trim |= self.trim;
        settings.trim_conservative |= self.conservative;
        settings.trim_hpf |= self.hpf;
        settings.fast_normalize |= self.fast;
        settings.verbose_logs |= self.ffmpeg_logs;
        if self.allow_attenuation {
            settings.peak_only_boost = false;
        }
        settings.validate()?;
        Ok(settings)
    }
}

#[cfg(unix)]
mod interrupt {
    use std::sync::atomic::{AtomicBool, Ordering};

    static INTERRUPTED: AtomicBool = AtomicBool::new(false);

    extern "C" fn on_sigint(_: libc::c_int) {
        INTERRUPTED.store(true, Ordering::SeqCst);
    }

    /// Turn Ctrl-C into a flag so running ffmpeg trees get killed.
    pub fn install() {
        unsafe {
            libc::signal(
                libc::SIGINT,
                on_sigint as extern "C" fn(libc::c_int) as libc::sighandler_t,
            );
        }
    }

    pub fn take() -> bool {
        INTERRUPTED.swap(false, Ordering::SeqCst)
    }
}

#[cfg(not(unix))]
mod interrupt {
    pub fn install() {}

    pub fn take() -> bool {
        false
    }
}

fn prepare_output_dir(output: &Path, overwrite: bool, clear: bool) -> Result<()> {
    std::fs::create_dir_all(output)
        .with_context(|| format!("Failed to create output folder: {}", output.display()))?;
    if scanner::output_is_empty(output)? {
        return Ok(());
    }
    if clear {
        let removed = scanner::clear_output_dir(output)?;
        eprintln!("Cleared {} entries from {}", removed, output.display());
        return Ok(());
    }
    if !overwrite {
        anyhow::bail!(
            "Output folder '{}' is not empty (use --overwrite or --clear-output)",
            output.display()
        );
    }
    Ok(())
}

fn run_normalize(args: NormalizeArgs) -> Result<()> {
    let settings = args.settings.resolve()?;
    if !args.input.is_dir() {
        anyhow::bail!("Input '{}' is not a directory", args.input.display());
    }
    prepare_output_dir(&args.output, args.overwrite, args.clear_output)?;
    let tools = ToolPaths::resolve()?;

    let supervisor = Arc::new(ProcessSupervisor::new());
    let planner = Arc::new(Planner::new(tools, Arc::clone(&supervisor)));
    let batch = BatchOrchestrator::new(supervisor, planner);
    let request = StartRequest {
        input: args.input,
        output: args.output,
        settings,
        resume: false,
    };

    let outcome = if args.tui {
        bulknorm::tui::run(&batch, request)?
    } else {
        let (tx, rx) = mpsc::channel::<BatchEvent>();
        batch.start(request, tx)?;
        interrupt::install();

        let mut total = 0;
        loop {
            if interrupt::take() {
                eprintln!("Interrupted, canceling...");
                batch.cancel();
            }
            let event = match rx.recv_timeout(EVENT_POLL) {
                Ok(event) => event,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            };
            if let BatchEvent::Started { total: n, .. } = &event {
                total = *n;
            }
            if args.json {
                println!("{}", format::format_json_line(&event));
            } else if let Some(line) = format::format_batch_event(&event, total) {
                eprintln!("{}", line);
            }
        }
        batch.join()
    };

    match outcome {
        Some(RunOutcome::Verified { .. }) => Ok(()),
        Some(outcome) => match outcome.verification_error() {
            Some(err) => Err(err.into()),
            None => anyhow::bail!(format::format_outcome(&outcome)),
        },
        None => anyhow::bail!("Batch ended without a result"),
    }
}

fn run_preview(args: PreviewArgs) -> Result<()> {
    let settings = args.settings.resolve()?;
    let tools = ToolPaths::resolve()?;
    let supervisor = Arc::new(ProcessSupervisor::new());
    let planner = Arc::new(Planner::new(tools, Arc::clone(&supervisor)));
    let preview = PreviewOrchestrator::new(supervisor, planner);

    let (tx, rx) = mpsc::channel();
    let temp_root = preview.start(
        PreviewRequest {
            input: args.input,
            settings,
            sample_size: args.sample,
            seed: args.seed,
        },
        tx,
    )?;
    eprintln!("Rendering preview into {}", temp_root.display());
    interrupt::install();

    loop {
        if interrupt::take() {
            eprintln!("Interrupted, canceling...");
            preview.cancel();
        }
        let event = match rx.recv_timeout(EVENT_POLL) {
            Ok(event) => event,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };
        if args.json {
            println!("{}", format::format_json_line(&event));
        } else {
            println!("{}", format::format_preview_event(&event));
        }
    }
    preview.join();
    Ok(())
}

fn run_scan(input: &Path, json: bool) -> Result<()> {
    if !input.is_dir() {
        anyhow::bail!("Input '{}' is not a directory", input.display());
    }
    let report = scanner::scan_wav_files(input);
    if report.files.is_empty() {
        anyhow::bail!("No WAV files found in {}", input.display());
    }

    let ffprobe = ToolLocator::default().resolve(Tool::Ffprobe).ok();
    let inspector = MediaInspector::new(ffprobe, Arc::new(ProcessSupervisor::new()));
    let entries: Vec<ScanEntry> = report
        .files
        .iter()
        .enumerate()
        .map(|(i, path)| {
            let info = stream_info(path);
            let wav_format = get_format_info(path);
            ScanEntry {
                path: path.strip_prefix(input).unwrap_or(path).to_path_buf(),
                duration_secs: info
                    .map(|i| i.duration_secs)
                    .unwrap_or_else(|| inspector.get_duration(path, &format!("scan_{i}"))),
                sample_rate: info.map(|i| i.sample_rate),
                bits_per_sample: wav_format.map(|f| f.bits_per_sample),
                float: wav_format.is_some_and(|f| f.sample_format == SampleFormat::Float),
            }
        })
        .collect();

    if json {
        println!("{}", format::format_json(&entries));
    } else {
        println!("{}", format::format_scan_table(&entries));
    }
    if report.skipped_dirs > 0 {
        eprintln!("({} unreadable entries skipped)", report.skipped_dirs);
    }
    Ok(())
}

fn run_tools() -> Result<()> {
    let tools = ToolPaths::resolve()?;
    println!("ffmpeg:  {}", tools.ffmpeg.display());
    println!("ffprobe: {}", tools.ffprobe.display());
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let tui = matches!(&cli.command, Command::Normalize(args) if args.tui);
    let log_init = if tui {
        logging::init_with("off")
    } else {
        logging::init(cli.verbose)
    };
    if let Err(e) = log_init {
        eprintln!("Warning: {}", e);
    }

    match cli.command {
        Command::Normalize(args) => run_normalize(args),
        Command::Preview(args) => run_preview(args),
        Command::Scan { input, json } => run_scan(&input, json),
        Command::Tools => run_tools(),
    }
}
