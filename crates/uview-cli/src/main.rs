//! # uview CLI
//!
//! Run filesystem operations as an impersonated identity, or pre-check
//! whether that identity could run them. Meant for provisioning tooling:
//! a root process points it at a target user and works on files as if the
//! user had done it, with kernel-faithful permission behaviour.

use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;
use uview::{FileKind, Identity, Os, WalkFlow};

mod config;

use config::Config;

/// Exit codes in the sysexits tradition, so scripts can tell a denial from
/// a missing path without parsing messages.
const EXIT_NOINPUT: u8 = 66;
const EXIT_NOPERM: u8 = 77;

/// A user view of the filesystem: run operations as another identity.
#[derive(Parser)]
#[command(name = "uview")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Uid to impersonate (defaults to the configured or effective uid)
    #[arg(long, global = true)]
    uid: Option<u32>,

    /// Primary gid to impersonate
    #[arg(long, global = true)]
    gid: Option<u32>,

    /// Supplementary group (repeatable)
    #[arg(long = "group", global = true)]
    groups: Vec<u32>,

    /// tracing filter, e.g. `uview=debug`
    #[arg(long, global = true)]
    log: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a config template to .uview/config.toml
    Init,

    /// Pre-flight: would the identity be allowed to touch a path?
    Check {
        path: PathBuf,

        /// Check write access instead of read
        #[arg(long)]
        write: bool,

        /// Check the object itself instead of the directory entry
        #[arg(long)]
        object: bool,
    },

    /// Print mode, ownership and type of a path
    Stat {
        path: PathBuf,

        /// Do not follow a trailing symlink
        #[arg(long)]
        no_follow: bool,
    },

    /// Copy a file's contents to stdout
    Read { path: PathBuf },

    /// Write stdin (or --data) to a file
    Write {
        path: PathBuf,

        /// Literal content instead of stdin
        #[arg(long)]
        data: Option<String>,

        /// Permission bits for a newly created file, octal
        #[arg(long, default_value = "644")]
        mode: String,
    },

    /// Create a directory
    Mkdir {
        path: PathBuf,

        /// Create missing parents too
        #[arg(short, long)]
        parents: bool,

        #[arg(long, default_value = "755")]
        mode: String,
    },

    /// List a directory, one name per line
    Ls { path: PathBuf },

    /// Remove a file or directory
    Rm {
        path: PathBuf,

        /// Recurse into directories
        #[arg(short, long)]
        recursive: bool,
    },

    /// Rename a file or directory
    Mv { old: PathBuf, new: PathBuf },

    /// Create a symlink at LINK pointing to TARGET
    Ln { target: PathBuf, link: PathBuf },

    /// Change permission bits
    Chmod { mode: String, path: PathBuf },

    /// Change ownership ("uid:gid"); follows symlinks unless --no-follow
    Chown {
        spec: String,
        path: PathBuf,

        #[arg(long)]
        no_follow: bool,
    },

    /// Resolve every symlink and print the final path
    Resolve { path: PathBuf },

    /// Recursively list a tree, depth-first
    Walk { path: PathBuf },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("uview: {err:#}");
            match err.downcast_ref::<uview::Error>() {
                Some(e) if e.is_denied() => ExitCode::from(EXIT_NOPERM),
                Some(e) if e.is_not_found() => ExitCode::from(EXIT_NOINPUT),
                _ => ExitCode::FAILURE,
            }
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = Config::load().context("load configuration")?;

    let filter = cli.log.clone().unwrap_or_else(|| config.log.filter.clone());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&filter).unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let identity = resolve_identity(&cli, &config);
    debug!(
        uid = identity.uid(),
        gid = identity.gid(),
        groups = ?identity.groups(),
        "impersonating"
    );
    let view = identity.view();

    match cli.command {
        Commands::Init => {
            std::fs::create_dir_all(".uview").context("create .uview directory")?;
            let path = PathBuf::from(".uview/config.toml");
            if path.exists() {
                anyhow::bail!("{} already exists", path.display());
            }
            std::fs::write(&path, Config::init_toml()).context("write config template")?;
            println!("wrote {}", path.display());
        }

        Commands::Check {
            path,
            write,
            object,
        } => {
            let verdict = match (object, write) {
                (false, false) => identity.can_read_entry(&path),
                (false, true) => identity.can_write_entry(&path),
                (true, false) => identity.can_read_object(&path),
                (true, true) => identity.can_write_object(&path),
            };
            verdict?;
            println!("ok");
        }

        Commands::Stat { path, no_follow } => {
            let stat = if no_follow {
                view.lstat(&path)?
            } else {
                view.stat(&path)?
            };
            println!(
                "{} {:04o} {}:{}",
                kind_char(stat.kind),
                stat.mode,
                stat.uid,
                stat.gid
            );
        }

        Commands::Read { path } => {
            let data = view.read_file(&path)?;
            std::io::stdout()
                .write_all(&data)
                .context("write to stdout")?;
        }

        Commands::Write { path, data, mode } => {
            let mode = parse_mode(&mode)?;
            let data = match data {
                Some(s) => s.into_bytes(),
                None => {
                    let mut buf = Vec::new();
                    std::io::stdin()
                        .read_to_end(&mut buf)
                        .context("read stdin")?;
                    buf
                }
            };
            view.write_file(&path, &data, mode)?;
        }

        Commands::Mkdir {
            path,
            parents,
            mode,
        } => {
            let mode = parse_mode(&mode)?;
            if parents {
                view.mkdir_all(&path, mode)?;
            } else {
                view.mkdir(&path, mode)?;
            }
        }

        Commands::Ls { path } => {
            for name in view.read_dir(&path)? {
                println!("{}", name.to_string_lossy());
            }
        }

        Commands::Rm { path, recursive } => {
            if recursive {
                view.remove_all(&path)?;
            } else {
                view.remove(&path)?;
            }
        }

        Commands::Mv { old, new } => view.rename(&old, &new)?,

        Commands::Ln { target, link } => view.symlink(&target, &link)?,

        Commands::Chmod { mode, path } => {
            let mode = parse_mode(&mode)?;
            view.chmod(&path, mode)?;
        }

        Commands::Chown {
            spec,
            path,
            no_follow,
        } => {
            let (uid, gid) = parse_owner(&spec)?;
            if no_follow {
                view.lchown(&path, uid, gid)?;
            } else {
                view.chown(&path, uid, gid)?;
            }
        }

        Commands::Resolve { path } => {
            let resolved = view.eval_symlinks(&path)?;
            println!("{}", resolved.display());
        }

        Commands::Walk { path } => {
            walk_tree(&view, &path)?;
        }
    }

    Ok(())
}

fn resolve_identity(cli: &Cli, config: &Config) -> Identity {
    // Flags beat environment beats config files; the config already folded
    // the first two together.
    let base = config.identity();
    let mut builder = Identity::builder()
        .uid(cli.uid.unwrap_or_else(|| base.uid()))
        .gid(cli.gid.unwrap_or_else(|| base.gid()));
    if !cli.groups.is_empty() {
        builder = builder.groups(cli.groups.iter().copied());
    } else if !base.groups().is_empty() {
        builder = builder.groups(base.groups().iter().copied());
    }
    builder.build()
}

fn walk_tree(view: &Os, root: &std::path::Path) -> Result<()> {
    view.walk(root, |path, stat, err| {
        match (stat, err) {
            (Some(stat), _) => println!("{} {}", kind_char(stat.kind), path.display()),
            (None, Some(e)) => return Err(e),
            (None, None) => {}
        }
        Ok(WalkFlow::Continue)
    })?;
    Ok(())
}

fn kind_char(kind: FileKind) -> char {
    match kind {
        FileKind::Dir => 'd',
        FileKind::Symlink => 'l',
        FileKind::File => '-',
        FileKind::Other => '?',
    }
}

fn parse_mode(s: &str) -> Result<u32> {
    let trimmed = s.trim_start_matches("0o").trim_start_matches('0');
    let digits = if trimmed.is_empty() { "0" } else { trimmed };
    u32::from_str_radix(digits, 8).with_context(|| format!("invalid mode {s:?}"))
}

fn parse_owner(spec: &str) -> Result<(u32, u32)> {
    let (uid, gid) = spec
        .split_once(':')
        .with_context(|| format!("invalid owner spec {spec:?}, expected uid:gid"))?;
    Ok((
        uid.parse().with_context(|| format!("invalid uid {uid:?}"))?,
        gid.parse().with_context(|| format!("invalid gid {gid:?}"))?,
    ))
}
