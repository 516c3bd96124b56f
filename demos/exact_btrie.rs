use clap::{Parser, Subcommand};
use exact_btrie::{
    display_key, map_snapshot, tokenize, BTrieHeader, ExactCompiler, ExactMatcher,
    LocalSnapshotStore, MatcherConfig, Result, VALUE_SEPARATOR,
};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Compile(args) => run_compile(args),
        Command::Info(args) => run_info(args),
        Command::Dump(args) => run_dump(args),
        Command::Lookup(args) => run_lookup(args).await,
    }
}

#[derive(Parser)]
#[command(
    author,
    version,
    about = "exact-btrie utility for compiling and inspecting exact match snapshots",
    subcommand_required = true,
    arg_required_else_help = true
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Compile TSV example datasets into a btrie snapshot
    Compile(CompileArgs),
    /// Inspect a btrie file and print basic information
    Info(InfoArgs),
    /// Print every key and value stored in a btrie file
    Dump(DumpArgs),
    /// Load a snapshot through the matcher and look up an utterance
    Lookup(LookupArgs),
}

#[derive(clap::Args)]
struct CompileArgs {
    /// Input datasets in TSV format; use - for standard input
    #[arg(value_name = "FILE", required = true)]
    inputs: Vec<String>,

    /// Path to the btrie file to produce
    #[arg(short, long, value_name = "FILE")]
    output: PathBuf,
}

#[derive(clap::Args)]
struct InfoArgs {
    /// Path to the btrie file
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// Optional utterance to look up, tokens separated by spaces
    #[arg(short, long)]
    key: Option<String>,
}

#[derive(clap::Args)]
struct DumpArgs {
    /// Path to the btrie file
    #[arg(value_name = "FILE")]
    input: PathBuf,
}

#[derive(clap::Args)]
struct LookupArgs {
    /// Directory holding published snapshots
    #[arg(short, long, value_name = "DIR")]
    root: PathBuf,

    /// Optional JSON matcher configuration
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Language override
    #[arg(short, long)]
    language: Option<String>,

    /// Preprocessed utterance to look up
    #[arg(value_name = "UTTERANCE", required = true)]
    utterance: Vec<String>,
}

fn run_compile(args: CompileArgs) -> Result<()> {
    let mut compiler = ExactCompiler::default();
    for input in &args.inputs {
        let reader: Box<dyn BufRead> = if input == "-" {
            Box::new(std::io::stdin().lock())
        } else {
            Box::new(BufReader::new(File::open(input)?))
        };
        compiler.add_dataset(reader)?;
    }

    let stats = compiler.stats();
    let writer = File::create(&args.output)?;
    let info = compiler.build_into(&writer)?;

    let json = serde_json::json!({ "stats": stats, "info": info });
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}

fn run_info(args: InfoArgs) -> Result<()> {
    let trie = map_snapshot(&args.input)?;
    let header = BTrieHeader::deserialize(trie.as_bytes())?;

    let mut keys = 0u64;
    let mut values = 0u64;
    for entry in trie.iter() {
        let (_, value) = entry?;
        keys += 1;
        values += value.split(VALUE_SEPARATOR).count() as u64;
    }

    let json = serde_json::json!({
        "version": header.version,
        "file_length": trie.byte_len(),
        "key_count": keys,
        "value_count": values,
    });
    println!("{}", serde_json::to_string_pretty(&json)?);

    if let Some(key) = args.key {
        let found = trie.search(&tokenize(&key))?;
        let codes: Option<Vec<&str>> = found.map(|v| v.split(VALUE_SEPARATOR).collect());
        println!("{}: {:?}", key, codes);
    }
    Ok(())
}

fn run_dump(args: DumpArgs) -> Result<()> {
    let trie = map_snapshot(&args.input)?;
    for entry in trie.iter() {
        let (key, value) = entry?;
        let key = display_key(&key);
        for code in value.split(VALUE_SEPARATOR) {
            println!("{key}\t{code}");
        }
    }
    Ok(())
}

async fn run_lookup(args: LookupArgs) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => MatcherConfig::from_json_file(path)?,
        None => MatcherConfig::default(),
    };
    if let Some(language) = args.language {
        config = config.with_language(language);
    }
    config.validate()?;

    let store = LocalSnapshotStore::new(&args.root);
    let mut matcher = ExactMatcher::new(config);
    matcher.load(&store).await?;

    let utterance = args.utterance.join(" ");
    match matcher.get(&utterance)? {
        Some(candidates) => {
            for code in candidates {
                println!("{}", code.join(" "));
            }
        }
        None => tracing::warn!(%utterance, "no exact match"),
    }
    Ok(())
}
