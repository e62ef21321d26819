use anyhow::{Context, Result};
use std::fs::File;

use tonestream::channel::RecordingBackend;
use tonestream::config::EngineConfig;
use tonestream::delay::{BusyWaitDelay, Delay, VirtualClock, VirtualDelay};
use tonestream::loader::{load_song_bytes, sniff_format, SongFormat};
use tonestream::source::MemorySource;
use tonestream::{PlaybackSummary, Player};

#[cfg(feature = "export")]
use tonestream::export::{export_timeline_csv, export_timeline_wav, ExportConfig};

mod logger {
    use log::{LevelFilter, Log, Metadata, Record};

    struct StderrLogger;

    static LOGGER: StderrLogger = StderrLogger;

    impl Log for StderrLogger {
        fn enabled(&self, _metadata: &Metadata) -> bool {
            true
        }

        fn log(&self, record: &Record) {
            if self.enabled(record.metadata()) {
                eprintln!("[{:<5}] {}", record.level(), record.args());
            }
        }

        fn flush(&self) {}
    }

    /// Route `log` output to stderr at the given level
    pub fn init(level: LevelFilter) {
        if log::set_logger(&LOGGER).is_ok() {
            log::set_max_level(level);
        }
    }
}

mod args {
    use std::env;

    /// Parsed command-line arguments.
    #[derive(Debug, Default)]
    pub struct CliArgs {
        /// Song file (binary or compiler C output)
        pub song_path: Option<String>,
        /// JSON engine configuration
        pub config_path: Option<String>,
        /// Use virtual time instead of busy-waiting
        pub fast: bool,
        /// Loop cap override
        pub max_loops: Option<u32>,
        /// WAV preview output
        pub wav_path: Option<String>,
        /// CSV timeline output
        pub csv_path: Option<String>,
        /// Read the song through a streamed file handle
        pub stream: bool,
        /// Skip the settle pause before the first byte
        pub no_settle: bool,
        /// Per-byte decode traces
        pub verbose: bool,
        /// Whether help was requested
        pub show_help: bool,
    }

    impl CliArgs {
        /// Parse arguments from command line.
        pub fn parse() -> Self {
            Self::parse_from(env::args().skip(1))
        }

        /// Parse arguments, excluding the program name
        pub fn parse_from<I: IntoIterator<Item = String>>(items: I) -> Self {
            let mut args = Self::default();
            let mut iter = items.into_iter();

            while let Some(arg) = iter.next() {
                match arg.as_str() {
                    "--help" | "-h" => args.show_help = true,
                    "--fast" => args.fast = true,
                    "--stream" => args.stream = true,
                    "--no-settle" => args.no_settle = true,
                    "--verbose" | "-v" => args.verbose = true,
                    "--config" => {
                        args.config_path = Self::value(&mut iter, "--config", &mut args.show_help)
                    }
                    "--wav" => {
                        args.wav_path = Self::value(&mut iter, "--wav", &mut args.show_help)
                    }
                    "--csv" => {
                        args.csv_path = Self::value(&mut iter, "--csv", &mut args.show_help)
                    }
                    "--loops" => {
                        let value = Self::value(&mut iter, "--loops", &mut args.show_help);
                        match value.as_deref().map(str::parse::<u32>) {
                            Some(Ok(n)) => args.max_loops = Some(n),
                            Some(Err(_)) => {
                                eprintln!("--loops expects a number");
                                args.show_help = true;
                            }
                            None => {}
                        }
                    }
                    _ if arg.starts_with('-') => {
                        eprintln!("Unknown flag: {}", arg);
                        args.show_help = true;
                    }
                    _ => args.song_path = Some(arg),
                }
            }

            args
        }

        /// Whether a timeline file was requested
        pub fn exports(&self) -> bool {
            self.wav_path.is_some() || self.csv_path.is_some()
        }

        /// Loop cap to play with.
        ///
        /// `--loops` wins. Otherwise a run that must finish (virtual time or
        /// an export) plays a looping song once, and a plain real-time run
        /// keeps the configured cap.
        pub fn loop_cap(&self, configured: Option<u32>) -> Option<u32> {
            match self.max_loops {
                Some(n) => Some(n),
                None if configured.is_none() && (self.fast || self.exports()) => Some(0),
                None => configured,
            }
        }

        fn value(
            iter: &mut impl Iterator<Item = String>,
            flag: &str,
            show_help: &mut bool,
        ) -> Option<String> {
            let value = iter.next();
            if value.is_none() {
                eprintln!("{} requires an argument", flag);
                *show_help = true;
            }
            value
        }

        /// Print help text to stderr.
        pub fn print_help() {
            eprintln!(
                "Usage:\n  tonestream [options] <song>\n\n\
                 Options:\n\
                 \x20 --config <file>   JSON engine configuration (default: 7-voice wiring)\n\
                 \x20 --fast            Use virtual time instead of real-time delays\n\
                 \x20 --loops <n>       Stop after n loop-backs\n\
                 \x20 --wav <file>      Render a square-wave preview of the song\n\
                 \x20 --csv <file>      Dump every output write as CSV\n\
                 \x20 --stream          Read the song from the file handle instead of memory\n\
                 \x20 --no-settle       Skip the pause before the first note\n\
                 \x20 -v, --verbose     Trace every decoded byte\n\
                 \x20 -h, --help        Show this help\n\n\
                 Songs are compiled byte streams, or the C array source emitted by the\n\
                 MIDI-to-tones compiler.\n"
            );
        }
    }
}

fn main() {
    if let Err(e) = run() {
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args = args::CliArgs::parse();
    if args.show_help || args.song_path.is_none() {
        args::CliArgs::print_help();
        return Ok(());
    }
    let Some(song_path) = args.song_path.as_deref() else {
        return Ok(());
    };

    logger::init(if args.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    });

    let mut config = match &args.config_path {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("loading configuration '{}'", path))?,
        None => EngineConfig::default(),
    };
    config.debug |= args.verbose;
    config.max_loops = args.loop_cap(config.max_loops);
    if args.no_settle {
        config.settle_ms = 0;
    }

    let (backend, delay): (RecordingBackend, Box<dyn Delay>) = if args.fast {
        let clock = VirtualClock::new();
        (
            RecordingBackend::with_clock(clock.clone()),
            Box::new(VirtualDelay::with_clock(clock)),
        )
    } else {
        (RecordingBackend::new(), Box::new(BusyWaitDelay::new()))
    };
    let backend = if args.exports() {
        backend
    } else {
        backend.without_history()
    };
    let recording = backend.clone();

    let mut player = Player::new(config, backend, delay).context("building player")?;
    println!(
        "Voices: {}  (slice-shared: {})",
        player.channels().voice_count(),
        player
            .channels()
            .descriptors()
            .iter()
            .filter(|d| !d.slice_partners.is_empty())
            .count()
    );

    let summary = if args.stream {
        let mut file =
            File::open(song_path).with_context(|| format!("opening '{}'", song_path))?;
        if sniff_format(&mut file)? == SongFormat::CArray {
            anyhow::bail!(
                "'{}' is C source; --stream only plays compiled bytes (drop --stream)",
                song_path
            );
        }
        player.play_reader(file)?
    } else {
        let (bytes, format) = load_song_bytes(song_path)?;
        println!("Loaded {} ({}, {} bytes)", song_path, format, bytes.len());
        player.play_song(&mut MemorySource::new(bytes))?
    };
    print_summary(&summary);

    #[cfg(feature = "export")]
    {
        let events = recording.events();
        if let Some(path) = &args.wav_path {
            let outputs = player.channels().voice_outputs();
            export_timeline_wav(&events, &outputs, path, &ExportConfig::default())
                .with_context(|| format!("writing '{}'", path))?;
            println!("Wrote {}", path);
        }
        if let Some(path) = &args.csv_path {
            export_timeline_csv(&events, path)
                .with_context(|| format!("writing '{}'", path))?;
            println!("Wrote {}", path);
        }
    }
    #[cfg(not(feature = "export"))]
    if args.wav_path.is_some() || args.csv_path.is_some() {
        let _ = &recording;
        anyhow::bail!("this build has no export support (enable the \"export\" feature)");
    }

    Ok(())
}

fn print_summary(summary: &PlaybackSummary) {
    println!(
        "Stopped: {:?} at byte {}",
        summary.stop_reason, summary.final_position
    );
    println!(
        "  notes on: {}  notes off: {}  delays: {} ({} ms)  loops: {}  skipped: {}",
        summary.notes_played,
        summary.notes_stopped,
        summary.delays,
        summary.delay_ms,
        summary.loops,
        summary.skipped_bytes
    );
}
