use clap::{Parser, Subcommand};
use kiln::{config, output, project::Project};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "kiln")]
#[command(about = "Static site build engine")]
#[command(long_about = "\
Static site build engine

Turns a tree of markdown pages, templates, and assets into an output
directory, touching only the files whose bytes changed.

Input structure:

  site/
  ├── site.toml                    # Site config (optional)
  ├── _layout.tpl                  # Wraps every page below this directory
  ├── _nav.tpl                     # Partial, pulled in with {% include \"_nav.tpl\" %}
  ├── index.md                     # Page → index.html
  ├── tags.tpl                     # Template; `enumerate` front matter fans out
  ├── old.html.alias               # `source: /index.html` → old.html
  ├── posts/
  │   ├── _layout{drafts%2F**}.tpl # Layout for posts/drafts/** only
  │   └── hello.md
  └── img/logo.png                 # Asset, copied as is

Output goes to .out/ below the input root. Files no item claims are
deleted; unchanged files are left alone.

Run 'kiln gen-config' to generate a documented site.toml.")]
#[command(version)]
struct Cli {
    /// Input root
    #[arg(long, default_value = ".", global = true)]
    source: PathBuf,

    /// More logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Expand the site and reconcile the output directory
    Build {
        /// Also list unchanged files and directories
        #[arg(long)]
        all: bool,
    },
    /// Load and expand without writing; fail on output conflicts
    Check,
    /// Print a stock site.toml with all options documented
    GenConfig,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let command = cli.command.unwrap_or(Command::Build { all: false });
    if let Command::GenConfig = command {
        print!("{}", config::stock_config_toml());
        return Ok(());
    }

    let threads = configured_threads(&cli.source);
    init_thread_pool(threads);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(threads)
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let project = Project::load(&cli.source).await?;
        match command {
            Command::Build { all } => {
                let report = project.generate_output().await?;
                output::print_report(&report, all);
            }
            Command::Check => {
                let outputs = project.check_outputs()?;
                output::print_check(&project.expansion(), outputs);
            }
            Command::GenConfig => {}
        }
        Ok::<(), Box<dyn std::error::Error>>(())
    })
}

/// WARN by default; each `-v` raises the level. `RUST_LOG` wins when set.
fn init_tracing(verbose: u8) {
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

/// Worker count from `processing.max_threads`. A broken config is reported
/// by the load itself, so fall back to the defaults here.
fn configured_threads(source: &Path) -> usize {
    let processing = config::load_config(source)
        .map(|config| config.processing)
        .unwrap_or_default();
    config::effective_threads(&processing)
}

/// Initialize the rayon thread pool for template precompilation.
///
/// Caps at the number of available CPU cores: user can constrain down, not up.
fn init_thread_pool(threads: usize) {
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()
        .ok();
}
