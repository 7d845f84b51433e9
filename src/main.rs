use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use viewport_images::config;
use viewport_images::geometry::Size;
use viewport_images::output;
use viewport_images::resolver::{DevicePixelRatio, SizeResolver};
use viewport_images::scenario::Scenario;
use viewport_images::urls::{StyleTemplate, UrlBuilder};

#[derive(Parser)]
#[command(name = "viewport-images")]
#[command(about = "Viewport-aware responsive image resolution")]
#[command(long_about = "\
Viewport-aware responsive image resolution

Resolves image slots to ratio buckets and quantized sizes, and simulates how a
page of slots behaves as it is scrolled, resized and loaded.

Configuration is read from config.toml in --config-dir and merged over the
stock defaults. Run 'viewport-images gen-config' for a documented file.

Scenario files describe a page layout and a timed list of steps:

  [page]
  width = 1000
  height = 800

  [[slots]]
  name = \"hero\"
  source = \"public://hero.jpg\"
  rect = [0, 0, 1000, 560]

  [[steps]]
  action = \"document_ready\"

Set RUST_LOG to control log output (default: warn).")]
#[command(version)]
struct Cli {
    /// Directory containing config.toml
    #[arg(long, default_value = ".", global = true)]
    config_dir: PathBuf,

    /// Log state transitions at debug level
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Resolve one container size to a bucket, size and URL
    Resolve {
        /// Container width in CSS pixels
        #[arg(long)]
        width: f64,
        /// Container height in CSS pixels
        #[arg(long)]
        height: f64,
        /// Device pixel ratio as reported by the device
        #[arg(long, default_value_t = 1.0)]
        dpr: f64,
        /// Source reference to build a URL for
        #[arg(long)]
        source: Option<String>,
    },
    /// Run a scenario file and print what every step caused
    Simulate {
        scenario: PathBuf,
        /// Print the report as JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Validate config.toml and print the bucket table
    Check,
    /// Print a stock config.toml with all options documented
    GenConfig,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Command::Resolve {
            width,
            height,
            dpr,
            source,
        } => {
            let site = config::load_config(&cli.config_dir)?;
            let resolver = SizeResolver::from_config(&site)?;
            let dpr = if site.resolver.snap_device_pixel_ratio {
                DevicePixelRatio::snapped(dpr)
            } else {
                DevicePixelRatio::exact(dpr)
            };
            let container = Size::new(width, height);
            let Some(variant) = resolver.resolve(container, dpr) else {
                return Err(format!("container {width}x{height} is not measurable").into());
            };
            let bucket = resolver.select_bucket(container);
            let url = source.map(|s| StyleTemplate::from_config(&site.urls).build(&s, &variant));
            output::print_resolution(container, dpr, bucket, &variant, url.as_deref());
        }
        Command::Simulate { scenario, json } => {
            let site = config::load_config(&cli.config_dir)?;
            let report = Scenario::load(&scenario)?.run(&site)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                output::print_scenario_report(&report, cli.verbose);
            }
        }
        Command::Check => {
            println!("==> Checking {}", cli.config_dir.join("config.toml").display());
            let site = config::load_config(&cli.config_dir)?;
            let resolver = SizeResolver::from_config(&site)?;
            output::print_bucket_table(resolver.table(), &site.resolver);
            println!("==> Config is valid");
        }
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
        }
    }

    Ok(())
}

/// Logs go to stderr so command output stays pipeable.
fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
