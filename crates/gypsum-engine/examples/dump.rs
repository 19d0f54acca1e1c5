use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use gypsum_engine::{EngineConfig, FsSource, LoadRequest, SystemCommandRunner, load};
use gypsum_syntax::{Mapping, Value};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
struct Opts {
    /// Set a variable, as `name=value`
    #[arg(short = 'D', value_name = "NAME=VALUE")]
    defines: Vec<String>,

    /// Include a unit ahead of every target unit's own includes
    #[arg(short = 'I', long = "include")]
    includes: Vec<String>,

    /// Directory DEPTH is computed against
    #[arg(long)]
    depth: Option<String>,

    /// Order dependencies of linkable targets from dependents to dependencies
    #[arg(long)]
    sort_dependencies: bool,

    units: Vec<PathBuf>,
}

fn parse_define(define: &str) -> (String, Value) {
    match define.split_once('=') {
        Some((name, value)) => (name.to_string(), Value::from(value)),
        None => (define.to_string(), Value::from("1")),
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let opts = Opts::parse();

    let variables: Mapping = opts.defines.iter().map(|d| parse_define(d)).collect();
    let request = LoadRequest {
        units: opts
            .units
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect(),
        variables,
        includes: opts.includes,
        depth: opts.depth,
    };

    let config = EngineConfig {
        sort_dependencies: opts.sort_dependencies,
        ..EngineConfig::default()
    };

    let output = load(&request, &config, &FsSource, &SystemCommandRunner)
        .context("failed to load build description")?;

    println!("# flat list");
    for name in &output.flat_list {
        println!("{name}");
    }

    for (name, target) in &output.targets {
        println!("\n# {name}");
        println!("{}", Value::Mapping(target.clone()));
    }

    Ok(())
}
