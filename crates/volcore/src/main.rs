//! volcore: stack layers described by a JSON configuration and report them.
//!
//! ```text
//! volcore <config.json> [--scan <hex needle>] [--layer <name>]
//! ```
//!
//! The configuration holds a `symbols` tree (`<table>.location`) and a
//! `layers` tree (`<name>.class` plus the keys that class reads).

use anyhow::{bail, Context as _};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use volcore::config::ConfigMap;
use volcore::memory::scanners::BytesScanner;
use volcore::symbols::{ExtensionRegistry, IsfTable};
use volcore::Context;

struct Options {
    config: String,
    needle: Option<Vec<u8>>,
    layer: Option<String>,
}

fn parse_hex(text: &str) -> anyhow::Result<Vec<u8>> {
    let text = text.trim_start_matches("0x");
    if text.is_empty() || text.len() % 2 != 0 || !text.bytes().all(|b| b.is_ascii_hexdigit()) {
        bail!("needle must be an even number of hex digits");
    }
    (0..text.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&text[i..i + 2], 16).with_context(|| format!("bad hex byte at {}", i)))
        .collect()
}

fn parse_args() -> anyhow::Result<Options> {
    let mut args = std::env::args().skip(1);
    let mut config = None;
    let mut needle = None;
    let mut layer = None;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--scan" => needle = Some(parse_hex(&args.next().context("--scan needs a value")?)?),
            "--layer" => layer = Some(args.next().context("--layer needs a value")?),
            _ if config.is_none() => config = Some(arg),
            other => bail!("unexpected argument: {}", other),
        }
    }
    Ok(Options {
        config: config.context("usage: volcore <config.json> [--scan <hex>] [--layer <name>]")?,
        needle,
        layer,
    })
}

fn load_symbols(context: &mut Context) -> anyhow::Result<()> {
    let extensions = ExtensionRegistry::windows().merge(&ExtensionRegistry::linux());
    for table in context.config().children("symbols") {
        let key = ConfigMap::path_join(["symbols", table.as_str(), "location"]);
        let location = context.config().get_str(&key)?.to_owned();
        let loaded = IsfTable::from_file(table.as_str(), &location, &extensions)
            .with_context(|| format!("loading symbol table {} from {}", table, location))?;
        context.symbol_space_mut().append(Arc::new(loaded));
        tracing::info!(table = %table, "loaded symbols");
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let options = parse_args()?;
    let text = std::fs::read_to_string(&options.config)
        .with_context(|| format!("reading {}", options.config))?;
    let mut context = Context::with_config(ConfigMap::from_json(&text)?);

    load_symbols(&mut context)?;
    let built = context.build_layers("layers")?;
    tracing::info!(count = built.len(), "layers built");

    for name in &built {
        let layer = context.layers().get(name)?;
        println!(
            "{:<24} {:#018x}-{:#018x} deps={:?}",
            name,
            layer.minimum_address(),
            layer.maximum_address(),
            layer.dependencies()
        );
    }

    if let Some(needle) = options.needle {
        let name = match options.layer.or_else(|| built.last().cloned()) {
            Some(name) => name,
            None => bail!("no layer to scan"),
        };
        let layer = context.layers().get(&name)?;
        let mut hits = 0usize;
        for offset in layer.scan(BytesScanner::new(&needle), None) {
            println!("{}: {:#x}", name, offset);
            hits += 1;
        }
        tracing::info!(layer = %name, hits, "scan finished");
    }
    Ok(())
}
