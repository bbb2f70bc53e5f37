use std::io::Write;
use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::Parser;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use retype::graph::Graph;
use retype::lattice::{Conversion, ConversionMap};
use retype::pass::StageId;

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum Emit {
    /// Rewritten graph as pretty JSON
    Json,
    /// Graphviz DOT
    Dot,
    /// Human-readable node listing
    Summary,
    /// SHA-256 of the canonical graph
    Fingerprint,
}

#[derive(Parser, Debug)]
#[command(
    name = "retype",
    version,
    about = "Rewrite element types of a tensor graph (e.g. i64 -> i32, f16 -> f32)"
)]
struct Cli {
    /// Input graph (JSON)
    graph: PathBuf,

    /// Conversion rule FROM:TO (repeatable; first rule per source wins)
    #[arg(short, long = "convert", value_name = "FROM:TO")]
    convert: Vec<Conversion>,

    /// Output format
    #[arg(long, value_enum, default_value_t = Emit::Json)]
    emit: Emit,

    /// Last stage to run (rewrite, materialize, eliminate-converts, verify)
    #[arg(long, default_value_t = StageId::Verify)]
    stop_after: StageId,

    /// Output file (stdout when omitted)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Debug-level logging of stages and rewrites
    #[arg(long)]
    verbose: bool,
}

fn setup_logging(verbose: bool) {
    let default = if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(default.into())
                .from_env_lossy(),
        )
        .init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    if cli.convert.is_empty() {
        bail!("no conversion rules given (use --convert FROM:TO)");
    }
    let map = ConversionMap::new(cli.convert.iter().copied());

    let text = std::fs::read_to_string(&cli.graph)
        .with_context(|| format!("reading {}", cli.graph.display()))?;
    let mut graph =
        Graph::from_json(&text).with_context(|| format!("loading {}", cli.graph.display()))?;

    let report = retype::pipeline::run_pipeline(&mut graph, &map, cli.stop_after)
        .with_context(|| format!("converting {}", cli.graph.display()))?;

    for diag in &report.diagnostics {
        eprintln!("{diag}");
    }
    eprintln!("retype: {report}");

    let rendered = match cli.emit {
        Emit::Json => graph.to_json()?,
        Emit::Dot => retype::dot::emit_dot(&graph),
        Emit::Summary => graph.to_string(),
        Emit::Fingerprint => format!("{}\n", retype::pipeline::fingerprint(&graph)?),
    };

    match &cli.output {
        Some(path) => std::fs::write(path, rendered)
            .with_context(|| format!("writing {}", path.display()))?,
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(rendered.as_bytes())?;
            if !rendered.ends_with('\n') {
                writeln!(stdout)?;
            }
        }
    }
    Ok(())
}
