use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;
use wr_core::{Format, Layout};

#[derive(Parser)]
#[command(name = "wrangle")]
#[command(version, about = "Network interface layout validation", long_about = None)]
struct Cli {
    /// Log at debug level (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check a layout and report every problem found
    Validate {
        #[arg(short, long, default_value = "layout.yaml")]
        file: PathBuf,
    },
    /// Print a validated layout, including derived roots and ownership
    Show {
        #[arg(short, long, default_value = "layout.yaml")]
        file: PathBuf,
        #[arg(long, value_enum, default_value_t = OutputFormat::Yaml)]
        format: OutputFormat,
        /// Destination file, `-` for stdout
        #[arg(short, long, default_value = "-")]
        output: PathBuf,
    },
    /// Print the order in which interfaces should be brought up
    Order {
        #[arg(short, long, default_value = "layout.yaml")]
        file: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Yaml,
    Json,
}

impl From<OutputFormat> for Format {
    fn from(format: OutputFormat) -> Self {
        match format {
            OutputFormat::Yaml => Format::Yaml,
            OutputFormat::Json => Format::Json,
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Validate { file } => handle_validate(&file)?,
        Commands::Show {
            file,
            format,
            output,
        } => handle_show(&file, format.into(), &output)?,
        Commands::Order { file } => handle_order(&file)?,
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load(file: &Path) -> anyhow::Result<Layout> {
    tracing::info!(file = %file.display(), "loading layout");
    Layout::load(file).with_context(|| format!("Layout {} is not usable", file.display()))
}

fn handle_validate(file: &Path) -> anyhow::Result<()> {
    let layout = load(file)?;

    println!("✅ {} interfaces validated", layout.interfaces.len());
    println!("   Roots: {}", layout.roots.join(", "));
    for (child, owners) in &layout.child2parent {
        println!("   {} <- {}", child, owners.join(", "));
    }
    Ok(())
}

fn handle_show(file: &Path, format: Format, output: &Path) -> anyhow::Result<()> {
    let layout = load(file)?;
    layout
        .write(output, format)
        .with_context(|| format!("Failed to write layout to {}", output.display()))
}

fn handle_order(file: &Path) -> anyhow::Result<()> {
    let layout = load(file)?;
    let order = layout.activation_order();

    println!("Bring-up order ({} interfaces):", order.len());
    for (i, name) in order.iter().enumerate() {
        let Some(iface) = layout.interface(name) else {
            continue;
        };
        let optional = if layout.is_effectively_optional(name) {
            " [optional]"
        } else {
            ""
        };
        println!("  {}. {} ({}){}", i + 1, name, iface.kind, optional);
    }
    Ok(())
}
