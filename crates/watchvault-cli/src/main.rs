use clap::{ArgAction, Parser, Subcommand};
use commands::{daemon, maintain, playlist, records};
use watchvault_config::PathManager;

mod commands;
mod logging;
mod output;

#[derive(Parser)]
#[command(name = "watchvault")]
#[command(about = "WatchVault - Your watch history, deduplicated and curated")]
#[command(version)]
struct Cli {
    /// Enable verbose output (use multiple times for more verbosity: -v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Output format
    #[arg(long, global = true, default_value = "human", value_enum)]
    output: output::OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit watch detections into the store
    #[command(long_about = "Submit one detection by flags, or a JSON array of detections with --from-file. Detections that cannot be resolved to a stable identity are dropped silently; a rewatch of a known video refreshes the existing record instead of creating a new one.")]
    Submit {
        /// Page URL of the watched video
        #[arg(long)]
        url: Option<String>,

        /// Title as scraped from the page
        #[arg(long)]
        title: Option<String>,

        /// Thumbnail URL
        #[arg(long)]
        thumbnail: Option<String>,

        /// Platform hint (youtube, vimeo, ...); inferred from the URL when omitted
        #[arg(long)]
        platform: Option<String>,

        /// JSON file containing an array of detections
        #[arg(long, value_name = "FILE", conflicts_with_all = ["url", "title", "thumbnail", "platform"])]
        from_file: Option<String>,
    },
    /// Inspect or prune the watch history
    History {
        #[command(subcommand)]
        cmd: HistoryCommands,
    },
    /// Inspect the library of playlist-saved records
    Library {
        #[command(subcommand)]
        cmd: LibraryCommands,
    },
    /// Manage playlists
    Playlist {
        #[command(subcommand)]
        cmd: PlaylistCommands,
    },
    /// Rate a record from 1 to 5 (0 clears the rating)
    Rate {
        /// Record id
        id: String,
        /// Rating value (0-5, 0 = unrated)
        rating: u8,
    },
    /// Replace a record's title
    Retitle {
        /// Record id
        id: String,
        /// New title
        title: String,
    },
    /// Show or change the history retention policy
    Retention {
        /// Retain history for this many days (0 disables retention)
        #[arg(long)]
        days: Option<u32>,

        /// Disable retention; history is kept indefinitely
        #[arg(long, action = ArgAction::SetTrue, conflicts_with = "days")]
        off: bool,
    },
    /// Run one age-based cleanup cycle now
    Cleanup {
        /// Also run a quota pressure check
        #[arg(long, action = ArgAction::SetTrue)]
        quota: bool,
    },
    /// Collapse duplicate records and repair cross references
    Sweep {
        /// Sweep only this partition ('history' or 'library')
        #[arg(long)]
        partition: Option<String>,
    },
    /// Upgrade a legacy single-partition store to the history/library layout
    Migrate,
    /// Export the full store as a JSON snapshot
    Export {
        /// Write the snapshot to a file instead of stdout
        #[arg(long, value_name = "FILE")]
        file: Option<String>,
    },
    /// Merge a JSON snapshot into the store
    Import {
        /// Snapshot file to import
        file: String,

        /// Which side wins on id collisions
        #[arg(long, default_value = "existing", value_parser = ["existing", "incoming"])]
        prefer: String,
    },
    /// Run the lifecycle daemon
    Daemon {
        #[command(subcommand)]
        cmd: DaemonCommands,
    },
}

#[derive(Subcommand)]
enum HistoryCommands {
    /// List history records
    List {
        /// Substring filter on title or URL
        #[arg(long)]
        filter: Option<String>,

        /// Only records from this platform
        #[arg(long)]
        platform: Option<String>,

        /// Sort order: recent, oldest, title, or rating
        #[arg(long)]
        sort: Option<String>,

        /// Limit the number of rows
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Delete a record from history (its library copy is untouched)
    Delete {
        /// Record id
        id: String,
    },
}

#[derive(Subcommand)]
enum LibraryCommands {
    /// List library records, optionally scoped to one playlist
    List {
        /// Show only this playlist, in its member order
        #[arg(long)]
        playlist: Option<String>,
    },
}

#[derive(Subcommand)]
enum PlaylistCommands {
    /// Create an empty playlist
    Create { name: String },
    /// Rename a playlist, keeping its members
    Rename { old: String, new: String },
    /// Delete a playlist (its records stay only if other playlists hold them)
    Delete { name: String },
    /// Add a record to a playlist, copying it into the library
    Add { id: String, playlist: String },
    /// Remove a record from a playlist
    Remove { id: String, playlist: String },
    /// List playlists and their sizes
    List,
}

#[derive(Subcommand)]
enum DaemonCommands {
    /// Start the daemon (background by default)
    Start {
        /// Run in foreground (don't daemonize)
        #[arg(long, action = ArgAction::SetTrue)]
        foreground: bool,
    },
    /// Stop a running daemon
    Stop,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    let output = output::Output::new(cli.output, cli.quiet);

    // The daemon sets up its own logging after forking; everything else
    // logs to stderr from here.
    if let Commands::Daemon { cmd } = &cli.command {
        return match cmd {
            DaemonCommands::Start { foreground } => daemon::run_start(*foreground, &output).await,
            DaemonCommands::Stop => daemon::run_stop(&output).await,
        };
    }

    logging::init_logging(cli.verbose, cli.quiet).map_err(|e| color_eyre::eyre::eyre!("{}", e))?;

    let paths = PathManager::default();
    paths
        .ensure_directories()
        .map_err(|e| color_eyre::eyre::eyre!("Failed to create directories: {}", e))?;
    let config = commands::load_config(&paths)?;
    let store = commands::open_store(&config, &paths)?;

    match cli.command {
        Commands::Submit {
            url,
            title,
            thumbnail,
            platform,
            from_file,
        } => {
            records::run_submit(&store, url, title, thumbnail, platform, from_file, &output).await
        }
        Commands::History { cmd } => match cmd {
            HistoryCommands::List {
                filter,
                platform,
                sort,
                limit,
            } => records::run_history_list(&store, filter, platform, sort, limit, &output).await,
            HistoryCommands::Delete { id } => {
                records::run_history_delete(&store, &id, &output).await
            }
        },
        Commands::Library { cmd } => match cmd {
            LibraryCommands::List { playlist } => {
                records::run_library_list(&store, playlist, &output).await
            }
        },
        Commands::Playlist { cmd } => match cmd {
            PlaylistCommands::Create { name } => playlist::run_create(&store, &name, &output).await,
            PlaylistCommands::Rename { old, new } => {
                playlist::run_rename(&store, &old, &new, &output).await
            }
            PlaylistCommands::Delete { name } => playlist::run_delete(&store, &name, &output).await,
            PlaylistCommands::Add { id, playlist: name } => {
                playlist::run_add(&store, &id, &name, &output).await
            }
            PlaylistCommands::Remove { id, playlist: name } => {
                playlist::run_remove(&store, &id, &name, &output).await
            }
            PlaylistCommands::List => playlist::run_list(&store, &output).await,
        },
        Commands::Rate { id, rating } => records::run_rate(&store, &id, rating, &output).await,
        Commands::Retitle { id, title } => records::run_retitle(&store, &id, &title, &output).await,
        Commands::Retention { days, off } => {
            maintain::run_retention(&store, days, off, &output).await
        }
        Commands::Cleanup { quota } => maintain::run_cleanup(&store, &config, quota, &output).await,
        Commands::Sweep { partition } => maintain::run_sweep(&store, partition, &output).await,
        Commands::Migrate => maintain::run_migrate(&store, &output).await,
        Commands::Export { file } => maintain::run_export(&store, file, &output).await,
        Commands::Import { file, prefer } => {
            maintain::run_import(&store, &file, &prefer, &output).await
        }
        Commands::Daemon { .. } => unreachable!(),
    }
}
