use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use ersatz::model::{MirrorConfig, NameMap, SourceRepo};
use ersatz::pipeline::CancelFlag;
use ersatz::store::RepoLayout;

use crate::Commands;

const DEFAULT_CONFIG: &str = "ersatz.yml";

#[derive(Parser)]
#[command(name = "ersatz")]
#[command(about = "Mirror apps from upstream F-Droid repositories into a local repo", long_about = None)]
pub(crate) struct Cli {
    /// Repository root (defaults to the current directory)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Mirror config, relative to the root unless absolute
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    pub(crate) verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Everything a command needs, loaded once from the root and config.
pub(crate) struct MirrorContext {
    pub(crate) config: MirrorConfig,
    pub(crate) layout: RepoLayout,
    pub(crate) sources: Vec<SourceRepo>,
    pub(crate) names: NameMap,
}

impl MirrorContext {
    fn load(root: &Path, config_path: &Path) -> Result<Self> {
        let bytes = std::fs::read(config_path)
            .with_context(|| format!("read config {}", config_path.display()))?;
        let config = MirrorConfig::from_yaml(&bytes)
            .with_context(|| format!("load config {}", config_path.display()))?;
        let sources = config.source_repos()?;
        let layout = RepoLayout::from_config(root, &config);
        let names = layout.read_name_map()?;
        Ok(Self {
            config,
            layout,
            sources,
            names,
        })
    }
}

pub(crate) fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(fmt::layer().compact().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

pub(crate) fn run(cli: Cli) -> Result<()> {
    let root = match cli.root {
        Some(root) => root,
        None => std::env::current_dir().context("get current dir")?,
    };
    let config_path = root.join(cli.config.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG)));
    let ctx = MirrorContext::load(&root, &config_path)?;

    crate::cli_exec::handle_command(&ctx, cli.command, install_interrupt_handler())
}

/// Cancel the run between apps on Ctrl-C.
fn install_interrupt_handler() -> CancelFlag {
    let flag = CancelFlag::default();
    let handle = flag.clone();
    std::thread::spawn(move || {
        let Ok(rt) = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        else {
            return;
        };
        if rt.block_on(tokio::signal::ctrl_c()).is_ok() {
            tracing::warn!("interrupted; stopping after in-flight apps");
            handle.cancel();
            if rt.block_on(tokio::signal::ctrl_c()).is_ok() {
                std::process::exit(130);
            }
        }
    });
    flag
}
