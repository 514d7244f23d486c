//! hashmark CLI - hash large files into markers and resolve them at any version

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use hashmark::ops::{self, AddOptions, ConflictResolution, PullOptions};
use hashmark::{CommitId, Config, Error, Repository, ResolveOptions, Version, CONFIG_FILE};

#[derive(Parser)]
#[command(name = "hashmark")]
#[command(about = "versioned content-addressed path resolution for large files")]
#[command(version)]
struct Cli {
    /// repository path (default: discovered from the current directory)
    #[arg(short, long, global = true)]
    repo: Option<PathBuf>,

    /// more logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// initialize a new repository
    Init {
        /// path to create repository at
        #[arg(default_value = ".")]
        path: PathBuf,

        /// storage directory, relative to the repository
        #[arg(short, long)]
        storage: PathBuf,
    },

    /// hash a file or folder into a marker
    Add {
        source: PathBuf,

        /// marker destination (default: <source>.hash)
        destination: Option<PathBuf>,

        /// keep the source after hashing
        #[arg(short, long)]
        keep: bool,

        /// conflict resolution: error, replace, override, update
        #[arg(long, default_value = "error")]
        on_conflict: String,

        /// fetch objects referenced by markers inside the source
        #[arg(long)]
        fetch: bool,
    },

    /// fetch every object referenced by the given markers
    Fetch {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// restore hashed content from markers
    Pull {
        #[arg(required = true)]
        sources: Vec<PathBuf>,

        /// destination (a folder when pulling several sources)
        #[arg(short, long)]
        destination: Option<PathBuf>,

        /// hash: one marker per file, copy: real files
        #[arg(long, default_value = "hash")]
        mode: String,

        /// keep the source markers
        #[arg(short, long)]
        keep: bool,

        #[arg(long)]
        fetch: bool,
    },

    /// print a readable location of a path's content
    Resolve {
        path: PathBuf,

        /// commit to read (default: working copy)
        #[arg(long)]
        rev: Option<String>,

        #[arg(long)]
        fetch: bool,

        /// verify the content digest
        #[arg(long)]
        check: bool,
    },

    /// print the content key of a path
    Key {
        path: PathBuf,

        #[arg(long)]
        rev: Option<String>,

        #[arg(long)]
        fetch: bool,
    },

    /// list logical paths matching a pattern
    Glob {
        pattern: String,

        #[arg(long)]
        rev: Option<String>,

        #[arg(long)]
        fetch: bool,
    },

    /// list the entries of a hashed folder
    LsTree {
        path: PathBuf,

        #[arg(long)]
        rev: Option<String>,

        #[arg(long)]
        fetch: bool,
    },

    /// show the commit that introduced the current key of a tree entry
    Blame {
        /// tree marker (or the folder it stands for)
        path: PathBuf,

        /// entry inside the tree
        relative: String,
    },

    /// show the most recent commit touching a path
    Latest {
        path: PathBuf,

        /// skip this many newer commits
        #[arg(long, default_value_t = 0)]
        skip: usize,
    },

    /// manage storage mirrors
    Remote {
        #[command(subcommand)]
        command: RemoteCommands,
    },
}

#[derive(Subcommand)]
enum RemoteCommands {
    /// add a read-only storage mirror
    Add { name: String, path: PathBuf },
    /// remove a mirror
    Remove { name: String },
    /// list mirrors
    List,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run(cli) {
        eprintln!("error: {}", e);
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: Cli) -> hashmark::Result<()> {
    match cli.command {
        Commands::Init { path, storage } => {
            Repository::init(&path, &storage)?;
            println!("initialized hashmark repository at {}", path.display());
        }

        Commands::Add {
            source,
            destination,
            keep,
            on_conflict,
            fetch,
        } => {
            let repo = open(cli.repo.as_deref())?;
            let opts = AddOptions {
                keep,
                on_conflict: on_conflict.parse::<ConflictResolution>()?,
                fetch,
            };
            let (key, marker) =
                ops::add(repo.storage().as_ref(), &source, destination.as_deref(), opts)?;
            println!("{}\t{}", key, marker.display());
        }

        Commands::Fetch { paths } => {
            let repo = open(cli.repo.as_deref())?;
            let count = ops::fetch(repo.storage().as_ref(), &paths)?;
            println!("{} object(s) available", count);
        }

        Commands::Pull {
            sources,
            destination,
            mode,
            keep,
            fetch,
        } => {
            let repo = open(cli.repo.as_deref())?;
            let opts = PullOptions {
                mode: mode.parse()?,
                keep,
                fetch,
            };
            let written = ops::pull(repo.storage().as_ref(), &sources, destination.as_deref(), opts)?;
            for path in written {
                println!("{}", path.display());
            }
        }

        Commands::Resolve {
            path,
            rev,
            fetch,
            check,
        } => {
            let repo = open(cli.repo.as_deref())?;
            let options = resolve_options(rev, fetch).with_check(check);
            println!("{}", repo.resolve_path(&path, options)?.display());
        }

        Commands::Key { path, rev, fetch } => {
            let repo = open(cli.repo.as_deref())?;
            println!("{}", repo.resolve_key(&path, resolve_options(rev, fetch))?);
        }

        Commands::Glob {
            pattern,
            rev,
            fetch,
        } => {
            let repo = open(cli.repo.as_deref())?;
            for path in repo.glob(&pattern, resolve_options(rev, fetch))? {
                println!("{}", path.display());
            }
        }

        Commands::LsTree { path, rev, fetch } => {
            let repo = open(cli.repo.as_deref())?;
            let tree = repo.load_tree(&path, resolve_options(rev, fetch))?;
            for (entry, key) in tree.iter() {
                println!("{}\t{}", key, entry);
            }
        }

        Commands::Blame { path, relative } => {
            let repo = open(cli.repo.as_deref())?;
            match ops::blame(&repo, &path, &relative)? {
                Some(commit) => println!("{}", commit),
                None => return Err(Error::NoHistory(path)),
            }
        }

        Commands::Latest { path, skip } => {
            let repo = open(cli.repo.as_deref())?;
            match repo.latest_version(&path, skip)? {
                Some(commit) => println!("{}", commit),
                None => return Err(Error::NoHistory(path)),
            }
        }

        Commands::Remote { command } => {
            let repo = open(cli.repo.as_deref())?;
            let config_path = repo.root().join(CONFIG_FILE);
            let mut config = Config::load(&config_path)?;
            match command {
                RemoteCommands::Add { name, path } => {
                    config.add_remote(name, path)?;
                    config.save(&config_path)?;
                }
                RemoteCommands::Remove { name } => {
                    config.remove_remote(&name)?;
                    config.save(&config_path)?;
                }
                RemoteCommands::List => {
                    for remote in &config.remotes {
                        println!("{}\t{}", remote.name, remote.path.display());
                    }
                }
            }
        }
    }

    Ok(())
}

/// open the repository and scope it to the current directory, so paths given
/// on the command line are read relative to where the user stands
fn open(repo: Option<&Path>) -> hashmark::Result<Repository> {
    let cwd = std::env::current_dir().map_err(|source| Error::Io {
        path: PathBuf::from("."),
        source,
    })?;
    let repo = match repo {
        Some(path) => Repository::open(path)?,
        None => Repository::discover(&cwd)?,
    };

    let root = repo.root().canonicalize().map_err(|source| Error::Io {
        path: repo.root().to_path_buf(),
        source,
    })?;
    match cwd.strip_prefix(&root) {
        Ok(prefix) => repo.join(prefix),
        Err(_) => Ok(repo),
    }
}

fn resolve_options(rev: Option<String>, fetch: bool) -> ResolveOptions {
    let version = match rev {
        Some(rev) => Version::Committed(CommitId::new(rev)),
        None => Version::Local,
    };
    ResolveOptions::version(version).with_fetch(fetch)
}
