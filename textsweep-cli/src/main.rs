use clap::{Parser, Subcommand};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::json;
use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use textsweep::{
    config::{EncodingMode, SearchConfig},
    content::{ContentClassifier, ScratchPool, ViewOptions},
    metrics::ScanMetrics,
    search_with, CancellationToken, DiskFile, FileRef, MatchAccess, MatchSink, ProgressSink,
    SearchError, SearchOutput, SearchStatus,
};

type Result<T> = std::result::Result<T, SearchError>;

/// Chars of surrounding line shown on each side of a match
const PREVIEW_CHARS: usize = 80;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Parser)]
struct CliSearchConfig {
    /// Pattern to search for (regex unless --fixed-strings)
    pattern: String,

    /// Root directory to search in
    #[arg(short = 'd', long, default_value = ".")]
    root: PathBuf,

    /// File extensions to include (e.g. rs,go,js)
    #[arg(short = 'e', long)]
    extensions: Option<String>,

    /// Patterns to ignore (glob format)
    #[arg(short, long)]
    ignore: Vec<String>,

    /// Number of threads to use
    #[arg(short = 'j', long)]
    threads: Option<NonZeroUsize>,

    /// Treat the pattern as literal text
    #[arg(short = 'F', long)]
    fixed_strings: bool,

    /// Case-insensitive matching
    #[arg(long)]
    ignore_case: bool,

    /// Match whole words only
    #[arg(short = 'w', long)]
    word: bool,

    /// Search files that look binary too
    #[arg(long)]
    include_binary: bool,

    /// How to handle undecodable bytes (failfast|lossy)
    #[arg(long, default_value = "failfast")]
    encoding: String,

    /// Charset used to decode files (e.g. utf-8, windows-1252)
    #[arg(long, default_value = "utf-8")]
    charset: String,

    /// Stop after this many matches per file
    #[arg(short = 'm', long)]
    max_count: Option<usize>,

    /// Print matches as JSON lines
    #[arg(long)]
    json: bool,

    /// Show only statistics, not matches
    #[arg(short, long)]
    stats: bool,

    /// Configuration file to load before applying flags
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Search for a pattern in files
    Search(Box<CliSearchConfig>),

    /// Report whether files look binary or text
    Classify {
        /// Files to classify
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Files up to this many bytes are read in full
        #[arg(long, default_value = "1000000")]
        threshold: u64,
    },

    /// Write a configuration file with the default settings
    InitConfig {
        /// Where to write the file
        #[arg(default_value = ".textsweep.yaml")]
        path: PathBuf,
    },
}

/// One match together with the line it sits on
struct PrintedMatch {
    offset: usize,
    length: usize,
    text: String,
    before: String,
    after: String,
}

/// Collects matches with a line preview for printing once the search ends
#[derive(Default)]
struct PreviewSink {
    files: Mutex<BTreeMap<String, Vec<PrintedMatch>>>,
}

impl PreviewSink {
    fn preview(access: &mut MatchAccess<'_>) -> textsweep::SearchResult<PrintedMatch> {
        let offset = access.offset();
        let length = access.length();
        let start = offset.saturating_sub(PREVIEW_CHARS);
        let before = access.file_content(start, offset - start)?;
        let after = access.file_content(offset + length, PREVIEW_CHARS)?;
        Ok(PrintedMatch {
            offset,
            length,
            text: access.matched_text()?,
            before: before.rsplit('\n').next().unwrap_or_default().to_string(),
            after: after.split('\n').next().unwrap_or_default().to_string(),
        })
    }
}

impl MatchSink for PreviewSink {
    fn accept_match(&self, access: &mut MatchAccess<'_>) -> bool {
        let file = access.file().label();
        match Self::preview(access) {
            Ok(printed) => {
                let mut files = self.files.lock().unwrap_or_else(|e| e.into_inner());
                files.entry(file).or_default().push(printed);
                true
            }
            Err(e) => {
                tracing::debug!("Failed to read match context in {}: {}", file, e);
                false
            }
        }
    }
}

/// Draws search progress on stderr
struct BarProgress(ProgressBar);

impl BarProgress {
    fn new() -> Self {
        let bar = ProgressBar::new(0);
        if let Ok(style) = ProgressStyle::with_template("{bar:40.cyan/blue} {pos}/{len} {msg}") {
            bar.set_style(style);
        }
        Self(bar)
    }
}

impl ProgressSink for BarProgress {
    fn report(&self, scanned: usize, total: usize, current: Option<&str>) {
        self.0.set_length(total as u64);
        self.0.set_position(scanned as u64);
        if let Some(current) = current {
            self.0.set_message(current.to_string());
        }
    }
}

fn main() -> Result<()> {
    run()
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Search(args) => {
            let file_config = SearchConfig::load_from(args.config.as_deref())
                .map_err(|e| SearchError::config_error(e.to_string()))?;

            let cli_config = SearchConfig {
                pattern: args.pattern.clone(),
                fixed_strings: args.fixed_strings,
                case_sensitive: !args.ignore_case,
                whole_word: args.word,
                root_path: args.root.clone(),
                file_extensions: args.extensions.as_ref().map(|e| {
                    e.split(',')
                        .map(|s| s.trim().to_string())
                        .collect::<Vec<_>>()
                }),
                ignore_patterns: args.ignore.clone(),
                charset: args.charset.clone(),
                encoding_mode: EncodingMode::parse(&args.encoding)?,
                exclude_binary: !args.include_binary,
                stats_only: args.stats,
                thread_count: args.threads.unwrap_or(file_config.thread_count),
                max_matches_per_file: args.max_count,
                ..SearchConfig::default()
            };
            let config = file_config.merge_with_cli(cli_config);
            config.init_logging();

            let interrupted = Arc::new(AtomicBool::new(false));
            signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&interrupted))?;
            let cancel = CancellationToken::from_flag(interrupted);

            let sink = Arc::new(PreviewSink::default());
            let progress = BarProgress::new();
            let outcome = search_with(&config, sink.clone(), &progress, &cancel)?;
            progress.0.finish_and_clear();

            let files = sink
                .files
                .lock()
                .map(|mut files| std::mem::take(&mut *files))
                .unwrap_or_default();
            if args.json {
                print_json(&files, &outcome)?;
            } else {
                print_search_results(&files, &outcome, config.stats_only);
            }
            Ok(())
        }
        Commands::Classify { paths, threshold } => {
            let classifier = ContentClassifier::new(
                ViewOptions::default(),
                threshold,
                Arc::new(ScratchPool::new(1, 64 * 1024)),
                ScanMetrics::new(),
            );
            for path in paths {
                let file: FileRef = Arc::new(DiskFile::utf8(&path));
                match classifier.is_binary(&file) {
                    Ok(true) => println!("{}: {}", path.display(), "binary".yellow()),
                    Ok(false) => println!("{}: {}", path.display(), "text".green()),
                    Err(e) => eprintln!("{}: {}", path.display(), e.to_string().red()),
                }
            }
            Ok(())
        }
        Commands::InitConfig { path } => {
            if path.exists() {
                return Err(SearchError::config_error(format!(
                    "{} already exists",
                    path.display()
                )));
            }
            SearchConfig::default().save_to(&path)?;
            println!("Wrote default configuration to {}", path.display());
            Ok(())
        }
    }
}

fn print_search_results(
    files: &BTreeMap<String, Vec<PrintedMatch>>,
    outcome: &SearchOutput,
    stats_only: bool,
) {
    if !stats_only {
        for (file, matches) in files {
            println!("\n{}", file.blue());
            for m in matches {
                println!(
                    "{}: {}{}{}",
                    m.offset.to_string().green(),
                    m.before,
                    m.text.red().bold(),
                    m.after
                );
            }
        }
        println!();
    }

    println!(
        "Found {} matches in {} files ({} scanned, {} skipped)",
        outcome.total_matches, outcome.files_with_matches, outcome.files_scanned, outcome.files_skipped
    );
    print_outcome(outcome);
}

fn print_json(files: &BTreeMap<String, Vec<PrintedMatch>>, outcome: &SearchOutput) -> Result<()> {
    for (file, matches) in files {
        for m in matches {
            let line = json!({
                "file": file,
                "offset": m.offset,
                "length": m.length,
                "text": m.text,
                "line": format!("{}{}{}", m.before, m.text, m.after),
            });
            println!("{}", line);
        }
    }
    let summary = serde_json::to_string(&json!({ "summary": outcome })).map_err(std::io::Error::from)?;
    println!("{}", summary);
    Ok(())
}

fn print_outcome(outcome: &SearchOutput) {
    if let Some(fatal) = &outcome.fatal {
        eprintln!("{} {}", "Search stopped:".red().bold(), fatal);
    }
    for failure in outcome.failures.iter().filter(|f| Some(*f) != outcome.fatal.as_ref()) {
        eprintln!("{} {}", "warning:".yellow(), failure);
    }
    if outcome.status == SearchStatus::Cancelled {
        eprintln!("{}", "Search cancelled".yellow());
    }
}
