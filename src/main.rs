#![forbid(unsafe_code)]
//! `denis` command-line front end.

use std::fs;
use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use denis::{
    ContentTag, DecodeOptions, EncodeOptions, ErrorKind, Key, Observer, Pipeline,
    DEFAULT_QUEUE_CAPACITY, DenisError, inspect_file, write_all_atomic,
};
use secrecy::{ExposeSecret, SecretString};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use zeroize::Zeroize;

#[derive(Parser, Debug)]
#[command(
    name = "denis",
    version,
    about = "Scramble files through a reversible cellular automaton"
)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug). RUST_LOG overrides.
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Encode a file into a DENIS container
    Encode(EncodeArgs),
    /// Decode a DENIS container back into the original file
    Decode(DecodeArgs),
    /// Generate a random key
    Keygen(KeygenArgs),
    /// Validate a container and print its header
    Inspect(InspectArgs),
}

impl Command {
    fn progress(&self) -> bool {
        match self {
            Command::Encode(a) => a.progress,
            Command::Decode(a) => a.progress,
            Command::Keygen(_) | Command::Inspect(_) => false,
        }
    }
}

#[derive(Args, Debug)]
struct KeyArgs {
    /// Key text: <32 hex>:<4 hex>
    #[arg(short = 'k', long = "key", conflicts_with = "key_file")]
    key: Option<String>,

    /// Read the key from a file (trailing newline is trimmed)
    #[arg(long = "key-file")]
    key_file: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct EncodeArgs {
    /// Input file
    #[arg(short = 'i', long = "in")]
    input: PathBuf,

    /// Output container. If omitted, ".denis" is appended.
    #[arg(short = 'o', long = "out")]
    output: Option<PathBuf>,

    #[command(flatten)]
    key: KeyArgs,

    /// Content tag stored in the header
    #[arg(short = 't', long = "tag", value_enum, default_value_t = TagChoice::Any)]
    tag: TagChoice,

    /// Overwrite output if it exists
    #[arg(short = 'f', long = "force")]
    force: bool,

    /// Log progress from a background observer
    #[arg(long)]
    progress: bool,
}

#[derive(Args, Debug)]
struct DecodeArgs {
    /// Input container
    #[arg(short = 'i', long = "in")]
    input: PathBuf,

    /// Output file. If omitted, ".denis" is stripped or ".dec" is appended.
    #[arg(short = 'o', long = "out")]
    output: Option<PathBuf>,

    #[command(flatten)]
    key: KeyArgs,

    /// Overwrite output if it exists
    #[arg(short = 'f', long = "force")]
    force: bool,

    /// Log progress from a background observer
    #[arg(long)]
    progress: bool,
}

#[derive(Args, Debug)]
struct KeygenArgs {
    /// Fixed iteration count instead of a random one
    #[arg(long)]
    iterations: Option<u16>,

    /// Write the key to a file instead of stdout
    #[arg(short = 'o', long = "out")]
    output: Option<PathBuf>,

    /// Overwrite output if it exists
    #[arg(short = 'f', long = "force")]
    force: bool,
}

#[derive(Args, Debug)]
struct InspectArgs {
    /// Container to inspect
    file: PathBuf,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum TagChoice {
    Any,
    Txt,
    Img,
}

impl From<TagChoice> for ContentTag {
    fn from(v: TagChoice) -> Self {
        match v {
            TagChoice::Any => ContentTag::Any,
            TagChoice::Txt => ContentTag::Text,
            TagChoice::Img => ContentTag::Image,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.cmd.progress());

    let res = match cli.cmd {
        Command::Encode(a) => cmd_encode(a),
        Command::Decode(a) => cmd_decode(a),
        Command::Keygen(a) => cmd_keygen(a),
        Command::Inspect(a) => cmd_inspect(a),
    };

    match res {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(exit_code(&e))
        }
    }
}

/// 2 when the kernels could not be built, 1 for any other failure.
fn exit_code(e: &anyhow::Error) -> u8 {
    match e.downcast_ref::<DenisError>().map(DenisError::kind) {
        Some(ErrorKind::Platform) => 2,
        _ => 1,
    }
}

fn init_tracing(verbose: u8, progress: bool) {
    let mut directives = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    }
    .to_string();
    // --progress reports through info! events, so make sure they get through.
    if progress && verbose == 0 {
        directives.push_str(",denis=info");
    }
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directives));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn read_key(args: &KeyArgs) -> Result<Key> {
    let secret = if let Some(text) = &args.key {
        SecretString::new(text.clone().into_boxed_str())
    } else if let Some(path) = &args.key_file {
        let mut s = String::new();
        fs::File::open(path)
            .with_context(|| format!("cannot open key file {}", path.display()))?
            .read_to_string(&mut s)?;
        let secret = SecretString::new(
            s.trim_end_matches(&['\r', '\n'][..])
                .to_owned()
                .into_boxed_str(),
        );
        s.zeroize();
        secret
    } else {
        let text = rpassword::prompt_password("Key: ")?;
        SecretString::new(text.into_boxed_str())
    };
    secret
        .expose_secret()
        .parse::<Key>()
        .context("key must look like <32 hex>:<4 hex>")
}

fn observer_for(enabled: bool) -> Option<(Observer, std::thread::JoinHandle<()>)> {
    if !enabled {
        return None;
    }
    // Only end-of-chunk snapshots are logged; skip the per-step grid copies.
    let observer = Observer::new(DEFAULT_QUEUE_CAPACITY).with_stride(u16::MAX);
    let handle = observer.spawn(|snap| {
        if snap.iteration == snap.total_iterations {
            let live = snap.current.iter().filter(|&&c| c != 0).count();
            info!(
                direction = ?snap.direction,
                chunk = snap.chunk_index + 1,
                of = snap.total_chunks,
                live_cells = live,
                "chunk done"
            );
        }
        true
    });
    Some((observer, handle))
}

fn pipeline_with(observer: &Option<(Observer, std::thread::JoinHandle<()>)>) -> Result<Pipeline> {
    let pipeline = Pipeline::new()?;
    Ok(match observer {
        Some((obs, _)) => pipeline.with_observer(obs.clone()),
        None => pipeline,
    })
}

fn finish_observer(observer: Option<(Observer, std::thread::JoinHandle<()>)>) {
    if let Some((obs, handle)) = observer {
        obs.close();
        if handle.join().is_err() {
            warn!("progress consumer panicked; progress output may be incomplete");
        }
    }
}

fn cmd_encode(a: EncodeArgs) -> Result<()> {
    let key = read_key(&a.key)?;
    let opts = EncodeOptions {
        content_tag: a.tag.into(),
        force: a.force,
    };

    let observer = observer_for(a.progress);
    let res = pipeline_with(&observer).and_then(|mut p| {
        p.encode_file(&a.input, a.output.as_deref(), &key, &opts)
            .map_err(anyhow::Error::from)
    });
    finish_observer(observer);
    let report = res.with_context(|| "encoding failed")?;

    eprintln!(
        "Wrote {} ({} chunk(s), {} padding byte(s))",
        report.output.display(),
        report.chunks,
        report.header.padding
    );
    Ok(())
}

fn cmd_decode(a: DecodeArgs) -> Result<()> {
    let key = read_key(&a.key)?;
    let opts = DecodeOptions { force: a.force };

    let observer = observer_for(a.progress);
    let res = pipeline_with(&observer).and_then(|mut p| {
        p.decode_file(&a.input, a.output.as_deref(), &key, &opts)
            .map_err(anyhow::Error::from)
    });
    finish_observer(observer);
    let out = res.with_context(|| "decoding failed")?;

    eprintln!("Wrote {}", out.display());
    Ok(())
}

fn cmd_keygen(a: KeygenArgs) -> Result<()> {
    let key = match a.iterations {
        Some(n) => Key::generate_with_iterations(n)?,
        None => Key::generate()?,
    };
    let mut text = key.to_string();
    match &a.output {
        Some(path) => {
            write_all_atomic(path, format!("{text}\n").as_bytes(), a.force)?;
            eprintln!("Wrote {}", path.display());
        }
        None => println!("{text}"),
    }
    text.zeroize();
    Ok(())
}

fn cmd_inspect(a: InspectArgs) -> Result<()> {
    let header = inspect_file(&a.file)
        .with_context(|| format!("{} is not a valid container", a.file.display()))?;
    println!("version: {}", header.version);
    println!("content: {}", header.content_tag);
    println!("padding: {}", header.padding);
    println!("payload: {} bytes", header.payload_len);
    println!("chunks:  {}", header.payload_len / denis::PAIR_SIZE as u64);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use denis::DeviceError;

    #[test]
    fn kernel_build_failures_exit_with_2() {
        let compile = anyhow::Error::from(DenisError::from(DeviceError::Compile {
            label: "life_forward",
            log: "syntax error".into(),
        }))
        .context("encoding failed");
        assert_eq!(exit_code(&compile), 2);

        let link = anyhow::Error::from(DenisError::from(DeviceError::Link {
            label: "life_backward",
            log: "unresolved".into(),
        }));
        assert_eq!(exit_code(&link), 2);
    }

    #[test]
    fn other_failures_exit_with_1() {
        let barrier = anyhow::Error::from(DenisError::from(DeviceError::MissingBarrier))
            .context("decoding failed");
        assert_eq!(exit_code(&barrier), 1);
        assert_eq!(exit_code(&anyhow::Error::from(DenisError::Cancelled)), 1);
        assert_eq!(exit_code(&anyhow::anyhow!("plain failure")), 1);
    }

    #[test]
    fn progress_observer_only_samples_chunk_ends() {
        let (obs, handle) = observer_for(true).unwrap();
        assert_eq!(obs.stride(), u16::MAX);
        assert!(!obs.wants(1, 4));
        assert!(obs.wants(4, 4));
        assert!(obs.wants(0, 0));
        finish_observer(Some((obs, handle)));
        assert!(observer_for(false).is_none());
    }

    #[test]
    fn panicking_consumer_is_joined_quietly() {
        let obs = Observer::new(2);
        let handle = obs.spawn(|_| panic!("consumer bug"));
        obs.publish(denis::Snapshot {
            direction: denis::Direction::Forward,
            chunk_index: 0,
            total_chunks: 1,
            iteration: 1,
            total_iterations: 1,
            current: Vec::new(),
        });
        finish_observer(Some((obs, handle)));
    }

    #[test]
    fn progress_flag_is_read_from_the_subcommand() {
        let cli = Cli::parse_from(["denis", "encode", "-i", "x", "-k", "k", "--progress"]);
        assert!(cli.cmd.progress());
        let cli = Cli::parse_from(["denis", "inspect", "x"]);
        assert!(!cli.cmd.progress());
    }
}
