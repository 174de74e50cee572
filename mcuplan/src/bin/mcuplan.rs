use mcuplan::*;

/// Static memory planner for microcontroller-sized neural networks
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the graph description (line-oriented CSV)
    #[arg(short, long, value_parser = clap::value_parser!(PathBuf))]
    input:  PathBuf,

    /// Peak-memory slack granted to the optimizer (e.g., 1.05 allows <= 5% growth)
    #[arg(short, long, default_value_t = 1.0)]
    #[arg(value_parser = clap::value_parser!(f64))]
    slack:  f64,

    /// Render the planned footprint to this SVG file
    #[arg(short, long, value_parser = clap::value_parser!(PathBuf))]
    plot:   Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    let cli = Args::parse();
    assert!(cli.input.exists() && cli.input.is_file(), "Invalid input path");
    assert!(cli.slack >= 1.0, "Slack must be at least 1.0");

    let start = Instant::now();
    let model = GraphCSVParser::new(cli.input)
        .read_model()
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    let (model, peak) = mcuplan::algo::plan(model, cli.slack)?;
    println!(
        "Planned {} operators / {} tensors in {:?}. Peak arena: {} B",
        model.operators.len(),
        model.tensors.len(),
        start.elapsed(),
        peak
    );
    for tensor in model.tensors.values() {
        if let Some(addr) = tensor.addr {
            println!(
                "  t{}\t@ {addr}\t({} B, {:?})",
                tensor.id,
                tensor.byte_size(),
                tensor.layout
            );
        }
    }
    for (idx, op) in model.operators.iter().enumerate() {
        if op.buffer_size != 0 {
            println!(
                "  op{idx} buffer\t@ {}\t({} B{})",
                op.buffer_addr,
                op.buffer_size,
                if op.io_overlap { ", in place" } else { "" }
            );
        }
    }

    if let Some(plot) = cli.plot {
        render_footprint(&model, peak, plot.as_path())?;
        println!("Footprint rendered to {}", plot.display());
    }

    Ok(())
}
