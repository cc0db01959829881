//! bzz-hello
//!
//! Builds a small SQLite database, stores it in a chunk store, and reads it
//! back through the bzz VFS by content identifier.

use anyhow::Context;
use bzz_vfs::core::diag;
use bzz_vfs::{register_vfs_with, BlobDatabase, BzzVfsError, ChunkStore, Settings};
use clap::Parser;
use rand::RngCore;
use rusqlite::{params, Connection, OpenFlags};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{debug, info, warn};

const DEFAULT_DATACOUNT: u64 = 100;
const DEFAULT_DATASIZE: usize = 1024;
const CHUNKDIR_NAME: &str = "chunks";
const DB_NAME: &str = "hello.db";

#[derive(Parser, Debug)]
#[command(name = "bzz-hello")]
#[command(about = "Query a SQLite database straight out of a content-addressed store")]
struct Args {
    /// Directory to create the data directory in
    #[arg(short = 'd', long, default_value_os_t = std::env::temp_dir())]
    datadir: PathBuf,

    /// Existing database file to store instead of generating one (implies -k)
    #[arg(short = 'f', long)]
    file: Option<PathBuf>,

    /// Blob size per row
    #[arg(short = 's', long, default_value_t = DEFAULT_DATASIZE)]
    size: usize,

    /// Number of rows to generate
    #[arg(short = 'c', long, default_value_t = DEFAULT_DATACOUNT)]
    count: u64,

    /// Keep the data directory after running
    #[arg(short = 'k', long)]
    keep: bool,

    /// Verbose output, including one line per VFS operation
    #[arg(short = 'v', long)]
    verbose: bool,

    /// TOML settings file with [vfs] and [store] tables
    #[arg(long)]
    config: Option<PathBuf>,
}

/// Removes the data directory on drop unless told to keep it
struct DataDir {
    path: PathBuf,
    keep: bool,
}

impl Drop for DataDir {
    fn drop(&mut self) {
        if self.keep {
            info!("Keeping data directory {:?}", self.path);
        } else if let Err(e) = std::fs::remove_dir_all(&self.path) {
            warn!("Failed to remove {:?}: {}", self.path, e);
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    let default_filter = if args.verbose {
        "info,bzz_vfs=debug"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("bzz-hello: {:#}", err);
            ExitCode::from(exit_status(&err))
        }
    }
}

/// 1 for registration or lookup failures, the engine's status otherwise
fn exit_status(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<BzzVfsError>() {
        Some(BzzVfsError::Engine { code, .. }) => match (*code & 0xff) as u8 {
            0 => 1,
            status => status,
        },
        _ => 1,
    }
}

fn run(args: &Args) -> anyhow::Result<()> {
    let mut settings = match &args.config {
        Some(path) => Settings::load(path)
            .with_context(|| format!("cannot load settings from {:?}", path))?,
        None => Settings::default(),
    };

    std::fs::create_dir_all(&args.datadir)?;
    let data_dir = DataDir {
        path: args
            .datadir
            .join(format!("bzzvfs-{}x{}-{:08x}", args.count, args.size, rand::random::<u32>())),
        keep: args.keep || args.file.is_some(),
    };
    std::fs::create_dir_all(&data_dir.path)?;
    if args.file.is_some() && !args.keep {
        warn!("Existing database specified, implying -k");
    }

    let (db_path, rows) = match &args.file {
        Some(path) => (path.clone(), count_rows(path)?),
        None => {
            let path = data_dir.path.join(DB_NAME);
            create_hello_db(&path, args.count, args.size)?;
            (path, args.count)
        }
    };
    debug!("Database {:?} holds {} rows", db_path, rows);

    settings.store.root = data_dir.path.join(CHUNKDIR_NAME);
    let store = Arc::new(ChunkStore::open(settings.store.clone())?);
    let file = std::fs::File::open(&db_path)
        .with_context(|| format!("cannot open database {:?}", db_path))?;
    let id = store.store(file)?;
    println!("stored {:?} as {}", db_path, id);

    let vfs_name = settings.vfs.name.clone();
    register_vfs_with(settings.vfs, store).context("VFS registration failed")?;
    diag::set_verbose(args.verbose);

    let db = BlobDatabase::open_with_vfs(&id.to_hex(), &vfs_name)?;
    let last = rows.saturating_sub(1);
    let sql = format!("SELECT * FROM hello WHERE id = 1 OR id = {}", last);
    let mut stdout = std::io::stdout().lock();
    let found = db.exec(&sql, &mut stdout)?;
    info!("Query returned {} rows", found);

    diag::set_verbose(false);
    Ok(())
}

fn create_hello_db(path: &Path, count: u64, size: usize) -> anyhow::Result<()> {
    if path.exists() {
        anyhow::bail!("database {:?} already exists", path);
    }

    let mut conn = Connection::open(path)?;
    conn.execute_batch(
        "CREATE TABLE hello (
            id INT UNSIGNED NOT NULL,
            val BLOB NOT NULL
        );
        CREATE INDEX hello_idx ON hello(id);",
    )?;

    let tx = conn.transaction()?;
    {
        let mut insert = tx.prepare("INSERT INTO hello (id, val) VALUES (?1, ?2)")?;
        let mut rng = rand::thread_rng();
        let mut data = vec![0u8; size];
        for id in 0..count {
            rng.fill_bytes(&mut data);
            insert.execute(params![id as i64, data])?;
        }
    }
    tx.commit()?;

    info!("Created {:?} with {} rows of {} bytes", path, count, size);
    Ok(())
}

fn count_rows(path: &Path) -> anyhow::Result<u64> {
    let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
    let rows: i64 = conn.query_row("SELECT count(*) FROM hello", [], |r| r.get(0))?;
    Ok(rows.max(0) as u64)
}
