use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use miette::{Context, IntoDiagnostic};

use nn2c_ir::GraphDesc;

/// nn2c — neural-network graph to C compiler
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Input graph descriptor (JSON)
    input: PathBuf,

    /// Output path (default: stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Resolve the graph without emitting C
    #[arg(long)]
    dry_run: bool,
}

fn main() -> ExitCode {
    env_logger::init();
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> miette::Result<()> {
    let cli = Cli::parse();

    // 1. Read the descriptor file.
    let source = std::fs::read_to_string(&cli.input)
        .into_diagnostic()
        .wrap_err_with(|| format!("failed to read {}", cli.input.display()))?;

    // 2. Deserialize.
    let desc: GraphDesc = serde_json::from_str(&source)
        .into_diagnostic()
        .wrap_err_with(|| format!("failed to parse {}", cli.input.display()))?;
    log::info!(
        "graph: {} input(s), {} initializer(s), {} node(s)",
        desc.inputs.len(),
        desc.initializers.len(),
        desc.nodes.len()
    );

    // 3. Dry-run: resolve only, to surface shape and attribute errors.
    if cli.dry_run {
        let graph = nn2c_resolve::resolve_graph(&desc)
            .map_err(|e| miette::miette!("{e}"))
            .wrap_err("graph resolution failed")?;
        log::info!("resolved {} tensor(s)", graph.tensors().len());
        return Ok(());
    }

    // 4. Compile to C source text.
    let generated = nn2c_backend_c::compile(&desc)
        .map_err(|e| miette::miette!("{e}"))
        .wrap_err("compilation failed")?;

    // 5. Write output.
    match &cli.output {
        Some(path) => {
            std::fs::write(path, generated)
                .into_diagnostic()
                .wrap_err_with(|| format!("failed to write {}", path.display()))?;
        }
        None => print!("{generated}"),
    }

    Ok(())
}
