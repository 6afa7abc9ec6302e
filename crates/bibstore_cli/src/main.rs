//! Command-line front end for a local bibstore database.
//!
//! # Responsibility
//! - Map arguments and `BIBSTORE_*` variables onto core configuration.
//! - Run one core operation per invocation and print JSON to stdout.

use anyhow::{bail, Context, Result};
use bibstore_core::model::library::{Actor, LibraryRole, LibraryType};
use bibstore_core::service::UploadEntry;
use bibstore_core::{
    default_log_level, init_logging, open_db, CoreConfig, CoreServices, FsBlobStore,
    FulltextCleanupObserver, FulltextService, LibraryRepo, LoggingConfig, ObjectKey,
    SqliteFulltextIndex, SyncService, UploadProcessor,
};
use clap::{Parser, Subcommand};
use log::info;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

const INDEX_FILE_NAME: &str = "fulltext_index.sqlite3";

/// Versioned bibliographic store tool.
#[derive(Parser)]
#[command(name = "bibstore", version, about = "Versioned bibliographic store")]
struct Cli {
    /// SQLite database file.
    #[arg(long, env = "BIBSTORE_DB")]
    db: PathBuf,

    /// Absolute directory for rolling log files. Logging is off when unset.
    #[arg(long, env = "BIBSTORE_LOG_DIR")]
    log_dir: Option<PathBuf>,

    #[arg(long, env = "BIBSTORE_LOG_LEVEL")]
    log_level: Option<String>,

    /// Base of object URIs used in relations.
    #[arg(long, env = "BIBSTORE_URI_BASE")]
    uri_base: Option<String>,

    /// Root directory for full-text blobs and the search index.
    #[arg(long, env = "BIBSTORE_BLOB_DIR")]
    blob_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a user or group library.
    CreateLibrary {
        /// `user` or `group`.
        #[arg(long = "type", value_parser = parse_library_type)]
        library_type: LibraryType,

        /// User id or group id.
        #[arg(long)]
        external_id: i64,
    },

    /// Grant or change a membership.
    AddMember {
        #[arg(long)]
        library: i64,

        #[arg(long)]
        user: i64,

        /// owner, admin, member or reader.
        #[arg(long, value_parser = parse_role)]
        role: LibraryRole,
    },

    /// Apply a JSON array of upload entries and print the report.
    Upload {
        file: PathBuf,

        /// Acting user.
        #[arg(long = "as-user")]
        user: i64,
    },

    /// List changes after a library version.
    Changes {
        #[arg(long)]
        library: i64,

        #[arg(long, default_value_t = 0)]
        since: i64,

        #[arg(long = "as-user")]
        user: i64,
    },

    /// Print the current library version, or fail if it is newer than
    /// `--if-unmodified-since`.
    Version {
        #[arg(long)]
        library: i64,

        #[arg(long)]
        if_unmodified_since: Option<i64>,
    },

    /// Store the full text of an item from a UTF-8 file.
    SetFulltext {
        #[arg(long)]
        library: i64,

        #[arg(long)]
        key: String,

        file: PathBuf,

        #[arg(long = "as-user")]
        user: i64,
    },

    /// Phrase-prefix search over stored full text.
    Search {
        #[arg(long)]
        library: i64,

        query: String,

        #[arg(long, default_value_t = 20)]
        limit: u32,

        #[arg(long = "as-user")]
        user: i64,
    },
}

fn main() -> ExitCode {
    match run(Cli::parse()) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    if let Some(dir) = &cli.log_dir {
        let level = cli.log_level.as_deref().unwrap_or(default_log_level());
        init_logging(&LoggingConfig::new(level, dir)).context("initializing logging")?;
    }

    let mut config = CoreConfig::default();
    if let Some(base) = &cli.uri_base {
        config = config.with_uri_base(base.as_str());
    }
    config.validate().context("invalid configuration")?;

    let services = CoreServices::new(config);
    let mut conn = open_db(&cli.db)
        .with_context(|| format!("opening database `{}`", cli.db.display()))?;

    match cli.command {
        Command::CreateLibrary {
            library_type,
            external_id,
        } => {
            let library = LibraryRepo::new(&conn).create_library(library_type, external_id)?;
            print_json(&library)?;
        }
        Command::AddMember {
            library,
            user,
            role,
        } => {
            LibraryRepo::new(&conn).set_member(library, user, role)?;
            print_json(&json!({"libraryID": library, "userID": user, "role": role}))?;
        }
        Command::Upload { file, user } => {
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("reading `{}`", file.display()))?;
            let entries: Vec<UploadEntry> =
                serde_json::from_str(&text).context("parsing upload entries")?;

            if let Some(blob_dir) = &cli.blob_dir {
                let (blobs, index) = open_fulltext_stores(blob_dir)?;
                FulltextCleanupObserver::register(&services.registry, blobs, index);
            }

            let mut session = services.session(&mut conn);
            let report = UploadProcessor::process(&mut session, Actor::new(user), &entries);
            print_json(&report)?;
            if !report.failed.is_empty() {
                return Ok(ExitCode::from(2));
            }
        }
        Command::Changes {
            library,
            since,
            user,
        } => {
            let session = services.session(&mut conn);
            let changes = SyncService::changes_since(&session, Actor::new(user), library, since)?;
            print_json(&changes)?;
        }
        Command::Version {
            library,
            if_unmodified_since,
        } => {
            let version = match if_unmodified_since {
                Some(since) => {
                    let session = services.session(&mut conn);
                    SyncService::check_library_version(&session, library, since)?
                }
                None => LibraryRepo::new(&conn).require_library(library)?.version,
            };
            print_json(&json!({"libraryID": library, "version": version}))?;
        }
        Command::SetFulltext {
            library,
            key,
            file,
            user,
        } => {
            let key = ObjectKey::parse(&key)?;
            let content = std::fs::read_to_string(&file)
                .with_context(|| format!("reading `{}`", file.display()))?;
            let service = fulltext_service(cli.blob_dir.as_deref())?;
            let mut session = services.session(&mut conn);
            let version = service.set_item_fulltext(
                &mut session,
                Actor::new(user),
                library,
                &key,
                &content,
                None,
            )?;
            print_json(&json!({"libraryID": library, "key": key, "version": version}))?;
        }
        Command::Search {
            library,
            query,
            limit,
            user,
        } => {
            let service = fulltext_service(cli.blob_dir.as_deref())?;
            let session = services.session(&mut conn);
            let hits = service.search(&session, Actor::new(user), library, &query, limit)?;
            let hits = hits
                .into_iter()
                .map(|hit| json!({"key": hit.item_key, "snippet": hit.snippet}))
                .collect::<Vec<_>>();
            print_json(&hits)?;
        }
    }

    info!("event=cli_command module=cli status=ok");
    Ok(ExitCode::SUCCESS)
}

fn fulltext_service(blob_dir: Option<&Path>) -> Result<FulltextService> {
    let Some(blob_dir) = blob_dir else {
        bail!("--blob-dir (or BIBSTORE_BLOB_DIR) is required for full-text commands");
    };
    let (blobs, index) = open_fulltext_stores(blob_dir)?;
    Ok(FulltextService::new(blobs, index))
}

fn open_fulltext_stores(
    blob_dir: &Path,
) -> Result<(Arc<FsBlobStore>, Arc<SqliteFulltextIndex>)> {
    std::fs::create_dir_all(blob_dir)
        .with_context(|| format!("creating blob directory `{}`", blob_dir.display()))?;
    let index = SqliteFulltextIndex::open(blob_dir.join(INDEX_FILE_NAME))
        .context("opening full-text index")?;
    Ok((Arc::new(FsBlobStore::new(blob_dir)), Arc::new(index)))
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn parse_library_type(value: &str) -> Result<LibraryType, String> {
    LibraryType::parse(value).ok_or_else(|| format!("unknown library type `{value}`"))
}

fn parse_role(value: &str) -> Result<LibraryRole, String> {
    LibraryRole::parse(value).ok_or_else(|| format!("unknown role `{value}`"))
}
