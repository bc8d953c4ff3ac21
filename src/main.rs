use anyhow::{anyhow, Context, Result};
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use bankfin_ingest::{
    config::DEFAULT_CONFIG_PATH, db, registry, BatchWriter, EntityRegistry, FixedInterval, IngestConfig,
    IngestionDriver, SqliteRegistry, StaticRegistry, TushareClient,
};

enum Command {
    Run,
    Init,
}

struct Args {
    command: Command,
    config: PathBuf,
}

fn main() -> ExitCode {
    init_logging();

    let args = match parse_args(env::args().skip(1).collect()) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("❌ {}", e);
            eprintln!("   Usage: bankfin-ingest [run|init] [--config <path>]");
            return ExitCode::from(2);
        }
    };

    let result = match args.command {
        Command::Run => run_ingest(&args),
        Command::Init => run_init(&args),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("\n❌ Initialization failed: {:#}", e);
            ExitCode::from(1)
        }
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("bankfin_ingest=info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn parse_args(raw: Vec<String>) -> Result<Args> {
    let mut command = Command::Run;
    let mut config = PathBuf::from(DEFAULT_CONFIG_PATH);

    let mut iter = raw.into_iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "run" => command = Command::Run,
            "init" => command = Command::Init,
            "--config" | "-c" => {
                let path = iter.next().ok_or_else(|| anyhow!("--config needs a path"))?;
                config = PathBuf::from(path);
            }
            other => return Err(anyhow!("unknown argument '{}'", other)),
        }
    }

    Ok(Args { command, config })
}

fn run_init(args: &Args) -> Result<()> {
    println!("🗄️  Initializing bank registry and statement tables");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let config = IngestConfig::load(&args.config)?;

    println!("\n🔧 Setting up database {}...", config.database.path.display());
    let mut conn = db::open(&config.database)?;
    db::setup_database(&conn)?;
    println!("✓ Schema ready (WAL mode)");

    println!("\n📂 Loading bank list {}...", config.ingest.banks_csv.display());
    let banks = registry::load_banks_csv(&config.ingest.banks_csv)?;
    println!("✓ Loaded {} banks", banks.len());

    let written = db::upsert_banks(&mut conn, &banks).context("Failed to seed banks table")?;
    println!("✓ Registry seeded ({} rows inserted or refreshed)", written);

    Ok(())
}

fn run_ingest(args: &Args) -> Result<()> {
    println!("🏦 Bank financial statement ingestion");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    // 1. Configuration, storage, provider
    let config = IngestConfig::load(&args.config)?;
    let catalog = config.ingest.catalog()?;

    let conn = db::open(&config.database)?;
    db::setup_database(&conn)?;
    // Banks are read before the connection moves into the writer
    let bank_registry = StaticRegistry::new(SqliteRegistry::new(&conn).entities()?);
    let fetcher = TushareClient::new(&config.tushare)?;
    println!("✓ Database connected: {}", config.database.path.display());

    // 2. Walk every bank × record type
    let mut driver = IngestionDriver::new(
        catalog,
        fetcher,
        BatchWriter::new(conn, config.ingest.chunk_size),
        FixedInterval::new(config.ingest.pause()),
    );
    let summary = driver.run(&bank_registry)?;

    // 3. Report
    println!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("✅ Run {} complete", summary.run_id);
    println!("✓ Done:    {}", summary.done());
    println!("✓ Skipped: {} (no data)", summary.skipped());
    println!("✓ Failed:  {}", summary.failed());
    println!("✓ Rows written: {}", summary.rows_written());
    println!("⏱  Elapsed: {:.2}s", summary.elapsed.as_secs_f64());

    let failures = summary.failures();
    if !failures.is_empty() {
        println!("\n⚠️  Failed cells (re-run is safe):");
        for failure in failures {
            println!("   {}", failure);
        }
    }

    Ok(())
}
