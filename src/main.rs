use anyhow::{Context, Error, Result};
use camino::Utf8PathBuf;
use clap::Parser;
use ripline::{
    line_buffer::{LineBufferBuilder, LineBufferReader},
    lines::LineIter,
};
use serde_json::{Map, Value};
use std::io::{self, Write};
use std::process::ExitCode;
use tracing::{debug, info};

use geoipfilter::config::{self, OPT_DB_PATH, OPT_LANGUAGE, OPT_SRC, OPT_TARGET};
use geoipfilter::input::FileOrStdin;
use geoipfilter::logging::{init_logging, LogLevel};
use geoipfilter::{Filter, GeoIpConfig, GeoIpFilter, Stage};

/// Check if the error chain contains a broken pipe error.
#[inline(always)]
fn is_broken_pipe(err: &Error) -> bool {
    for cause in err.chain() {
        if let Some(io_err) = cause.downcast_ref::<io::Error>() {
            if io_err.kind() == io::ErrorKind::BrokenPipe {
                return true;
            }
        }
    }
    false
}

/// Enrich newline-delimited JSON events with geolocation data from a MaxMind database.
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Field holding the IP address, e.g. "client.ip" or "[client][ip]"
    #[clap(short, long, value_name = "PATH")]
    src: Option<String>,

    /// MaxMind database file (City, Enterprise or ISP)
    #[clap(
        short,
        long,
        value_name = "FILE",
        value_hint = clap::ValueHint::FilePath,
        env = "GEOIP_MMDB_PATH"
    )]
    db: Option<Utf8PathBuf>,

    /// Language of city, region and country names [default: en]
    #[clap(short, long, value_name = "LANG")]
    language: Option<String>,

    /// Field that receives the geolocation data [default: geoip]
    #[clap(short, long, value_name = "FIELD")]
    target: Option<String>,

    /// JSON file with filter options (src, dbPath, language, target).
    /// Command-line flags take precedence over its values
    #[clap(short, long, value_name = "FILE", value_hint = clap::ValueHint::FilePath)]
    config: Option<Utf8PathBuf>,

    /// Append TAG to the "tags" field of events that could not be enriched
    #[clap(long, value_name = "TAG")]
    fail_tag: Option<String>,

    /// Do not output events that could not be enriched
    #[clap(long)]
    drop_failed: bool,

    /// Number of worker threads [default: number of CPUs]
    #[clap(short = 'j', long, value_name = "N")]
    threads: Option<usize>,

    /// Log verbosity; GEOIPFILTER_LOG overrides it with an EnvFilter directive
    #[clap(long, value_enum, value_name = "LEVEL", default_value_t = LogLevel::Warn)]
    log_level: LogLevel,

    /// Input file(s) to process. Leave empty or use "-" to read from stdin
    #[clap(value_name = "FILE", value_hint = clap::ValueHint::FilePath)]
    input: Vec<Utf8PathBuf>,
}

impl Args {
    /// Layer the command-line options over the config file, if any.
    fn filter_config(&self) -> Result<GeoIpConfig> {
        let mut options = match &self.config {
            Some(path) => config::read_options(path)?,
            None => Map::new(),
        };

        let overrides = [
            (OPT_SRC, self.src.clone()),
            (OPT_DB_PATH, self.db.as_ref().map(|path| path.to_string())),
            (OPT_LANGUAGE, self.language.clone()),
            (OPT_TARGET, self.target.clone()),
        ];
        for (name, value) in overrides {
            if let Some(value) = value {
                options.insert(name.to_string(), Value::String(value));
            }
        }

        Ok(GeoIpConfig::from_map(&options)?)
    }
}

fn main() -> ExitCode {
    let err = match run_main() {
        Ok(code) => return code,
        Err(err) => err,
    };

    // downstream closed the pipe, e.g. `geoipfilter ... | head`
    if is_broken_pipe(&err) {
        return ExitCode::SUCCESS;
    }

    let mut stderr = io::stderr();
    let _ = if std::env::var("RUST_BACKTRACE").is_ok_and(|v| v == "1")
        && std::env::var("RUST_LIB_BACKTRACE").map_or(true, |v| v == "1")
    {
        writeln!(stderr, "{:?}", err)
    } else {
        writeln!(stderr, "{:#}", err)
    };

    ExitCode::FAILURE
}

fn run_main() -> Result<ExitCode> {
    let mut args = Args::parse();
    init_logging(args.log_level)?;

    // if no files specified, add stdin
    if args.input.is_empty() {
        args.input.push(Utf8PathBuf::from("-"));
    }

    let config = args.filter_config()?;
    let filter = GeoIpFilter::from_config(config).context("failed to create geoip filter")?;
    debug!(
        database = %filter.lookup().path(),
        database_type = filter.lookup().database_type(),
        "geoip filter ready"
    );

    let mut stage = Stage::new(filter).drop_failed(args.drop_failed);
    if let Some(tag) = &args.fail_tag {
        stage = stage.with_fail_tag(tag.as_str());
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(args.threads.unwrap_or(0))
        .build()
        .context("failed to start worker threads")?;
    pool.install(|| run(&args.input, &stage))?;

    let stats = stage.stats();
    info!(
        processed = stats.processed,
        enriched = stats.enriched,
        failed = stats.failed,
        invalid = stats.invalid,
        "done"
    );

    Ok(ExitCode::SUCCESS)
}

fn run<F: Filter>(inputs: &[Utf8PathBuf], stage: &Stage<F>) -> Result<()> {
    let mut out = io::BufWriter::with_capacity(65536, io::stdout().lock());
    let mut line_buffer = LineBufferBuilder::new().capacity(65536).build();
    let mut batch = Vec::with_capacity(65536);

    for path in inputs {
        let file = FileOrStdin::from_path(path.clone());
        let reader = file.reader()?;
        let mut lb_reader = LineBufferReader::new(reader, &mut line_buffer);

        while lb_reader
            .fill()
            .with_context(|| format!("failed to read {}", file))?
        {
            let lines: Vec<&[u8]> = LineIter::new(b'\n', lb_reader.buffer()).collect();
            batch.clear();
            stage.process_batch(&lines, &mut batch)?;
            out.write_all(&batch)?;
            lb_reader.consume_all();
        }
        out.flush()?;
    }

    Ok(())
}
