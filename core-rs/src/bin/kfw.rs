//! KFW - Knopflerfish framework CLI
//!
//! Operates on a bundle storage directory; every invocation restores the
//! persisted bundles, applies one command and leaves the storage updated.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use kf_framework::{Bundle, BundleState, Framework, FrameworkConfig};
use std::path::{Path, PathBuf};
use std::str::FromStr;

#[derive(Parser)]
#[command(name = "kfw")]
#[command(version = kf_framework::VERSION)]
#[command(about = "Knopflerfish framework runtime", long_about = None)]
struct Cli {
    /// Bundle storage directory
    #[arg(long, short = 's', global = true, default_value = "kf-storage")]
    storage: PathBuf,

    /// Framework config file (YAML); overrides --storage
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Install a bundle archive
    Install {
        /// Path to a .tar.gz bundle
        path: PathBuf,
    },
    /// List installed bundles
    List,
    /// Resolve all installed bundles and report the outcome
    Resolve,
    /// Show the manifest headers of a bundle
    Headers {
        id: u64,
    },
    /// Resolve a bundle and show its wires
    Wiring {
        id: u64,
    },
    /// Update a bundle from its location or from another archive
    Update {
        id: u64,
        path: Option<PathBuf>,
    },
    /// Uninstall a bundle
    Uninstall {
        id: u64,
    },
    /// Refresh bundles with pending removals
    Refresh,
    /// Write a default framework config file
    InitConfig {
        path: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => FrameworkConfig::load(path).with_context(|| format!("Failed to load {}", path.display()))?,
        None => FrameworkConfig::default_for(&cli.storage),
    };
    init_logging(cli.verbose, config.log_level.as_deref());

    if let Commands::InitConfig { path } = &cli.command {
        return init_config(path, &cli.storage);
    }

    let framework = Framework::new(config).context("Failed to create framework")?;
    framework.init().context("Failed to initialize framework")?;

    match cli.command {
        Commands::Install { path } => {
            let location = location_for(&path)?;
            let bundle = framework
                .install_bundle_from_location(&location)
                .with_context(|| format!("Failed to install {}", path.display()))?;
            println!("{} Installed bundle {}", "✓".green(), bundle.id());
            println!("  Name:     {}", bundle.symbolic_name().unwrap_or_default());
            println!("  Version:  {}", bundle.version());
            println!("  Location: {}", bundle.location());
        }

        Commands::List => list(&framework),

        Commands::Resolve => {
            let all = framework.resolve_bundles(None);
            list(&framework);
            if !all {
                println!("{}", "Some bundles could not be resolved".yellow());
            }
        }

        Commands::Headers { id } => {
            let bundle = find(&framework, id)?;
            println!("{}", bundle.to_string().bold());
            for (name, value) in bundle.headers().iter() {
                println!("  {}: {}", name.cyan(), value);
            }
        }

        Commands::Wiring { id } => {
            let bundle = find(&framework, id)?;
            framework.resolve_bundles(Some(std::slice::from_ref(&bundle)));
            let wiring = match bundle.wiring() {
                Some(w) => w,
                None => bail!("Bundle {} could not be resolved", id),
            };
            println!("{}", bundle.to_string().bold());
            if wiring.required.is_empty() {
                println!("  (no wires)");
            }
            for wire in &wiring.required {
                println!("  {}", wire);
            }
            if !wiring.package_space.is_empty() {
                println!("\n  Package space:");
                for (package, provider) in &wiring.package_space {
                    println!("    {:<40} <- {}", package, provider);
                }
            }
            if !wiring.fragments.is_empty() {
                let fragments: Vec<String> = wiring.fragments.iter().map(|f| f.to_string()).collect();
                println!("\n  Fragments: {}", fragments.join(", "));
            }
        }

        Commands::Update { id, path } => {
            let bundle = find(&framework, id)?;
            match path {
                Some(path) => bundle.update_from_location(&location_for(&path)?),
                None => bundle.update(),
            }
            .with_context(|| format!("Failed to update bundle {}", id))?;
            println!("{} Updated {}", "✓".green(), bundle);
        }

        Commands::Uninstall { id } => {
            let bundle = find(&framework, id)?;
            bundle
                .uninstall()
                .with_context(|| format!("Failed to uninstall bundle {}", id))?;
            println!("{} Uninstalled bundle {}", "✓".green(), id);
        }

        Commands::Refresh => {
            framework.refresh_bundles(None).context("Refresh failed")?;
            println!("{} Packages refreshed", "✓".green());
        }

        Commands::InitConfig { .. } => {}
    }

    framework.stop().context("Failed to stop framework")?;
    Ok(())
}

fn init_logging(verbose: bool, configured: Option<&str>) {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        configured
            .and_then(|l| tracing::Level::from_str(l).ok())
            .unwrap_or(tracing::Level::WARN)
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();
}

fn init_config(path: &Path, storage: &Path) -> Result<()> {
    if path.exists() {
        bail!("{} already exists", path.display());
    }
    FrameworkConfig::default_for(storage)
        .save(path)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    println!("{} Wrote {}", "✓".green(), path.display());
    Ok(())
}

fn location_for(path: &Path) -> Result<String> {
    let absolute = path
        .canonicalize()
        .with_context(|| format!("Cannot access {}", path.display()))?;
    Ok(format!("file:{}", absolute.display()))
}

fn find(framework: &Framework, id: u64) -> Result<Bundle> {
    match framework.bundle(id) {
        Some(b) => Ok(b),
        None => bail!("No bundle with id {}", id),
    }
}

fn list(framework: &Framework) {
    println!("\n{:<6} {:<12} {:<40} {:<16} {}", "ID", "STATE", "NAME", "VERSION", "LOCATION");
    println!("{}", "-".repeat(110));
    for bundle in framework.bundles() {
        let state = format!("{:<12}", bundle.state().to_string());
        let state = match bundle.state() {
            BundleState::Active => state.green(),
            BundleState::Resolved => state.cyan(),
            BundleState::Installed => state.yellow(),
            _ => state.normal(),
        };
        println!(
            "{:<6} {} {:<40} {:<16} {}",
            bundle.id(),
            state,
            bundle.symbolic_name().unwrap_or_default(),
            bundle.version().to_string(),
            bundle.location()
        );
    }
    println!();
}
