use clap::Parser;
use std::io::Write;
use std::path::PathBuf;

use tkc::config::Config;
use tkc::diag::{has_errors, Diagnostic};
use tkc::dot::emit_dot;
use tkc::lower::{ListingLowering, LowContext};
use tkc::pass::PassId;
use tkc::pipeline::{compute_provenance, run_pipeline, CompilationState};
use tkc::target::Target;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum EmitStage {
    /// Rewritten IR after copy insertion
    Ir,
    /// Alignment facts (JSON)
    Align,
    /// Layout groups after copy insertion (JSON)
    Layouts,
    /// Def-use graph clustered by layout group
    Dot,
    /// Shared-memory buffers (JSON)
    Alloc,
    /// Lowered listing
    Low,
    /// Provenance (JSON)
    BuildInfo,
}

impl EmitStage {
    fn terminal(self) -> Option<PassId> {
        match self {
            EmitStage::Align => Some(PassId::Align),
            EmitStage::Ir | EmitStage::Layouts | EmitStage::Dot => Some(PassId::CopyInsert),
            EmitStage::Alloc => Some(PassId::Allocate),
            EmitStage::Low => Some(PassId::Lower),
            EmitStage::BuildInfo => None,
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "tkc",
    version,
    about = "Tile Kernel Compiler — places tile values in shared memory or registers and inserts the copies between them"
)]
struct Cli {
    /// Input .tk source file
    source: PathBuf,

    /// Output file path (stdout when omitted)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output stage
    #[arg(long, value_enum, default_value_t = EmitStage::Low)]
    emit: EmitStage,

    /// Compute capability (e.g. 80 for sm_80)
    #[arg(long)]
    arch: Option<u32>,

    /// Warps per thread block
    #[arg(long)]
    num_warps: Option<u32>,

    /// Software pipelining depth for loop-carried buffers
    #[arg(long)]
    num_stages: Option<u32>,

    /// Override the device's shared-memory capacity in bytes
    #[arg(long)]
    max_shared: Option<u64>,

    /// JSON config with `target` and `options` sections
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print compiler phases and timing
    #[arg(long)]
    verbose: bool,
}

fn print_diags(diags: &[Diagnostic]) {
    for d in diags {
        eprintln!("tkc: {}", d);
    }
}

fn main() {
    let cli = Cli::parse();
    tkc::logging::init(cli.verbose);

    if cli.verbose {
        eprintln!("tkc: source = {}", cli.source.display());
        eprintln!("tkc: emit   = {:?}", cli.emit);
    }

    // ── Configuration ──
    let mut config = match &cli.config {
        Some(path) => match Config::load(path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("tkc: error: {}", e);
                std::process::exit(2);
            }
        },
        None => Config::default(),
    };
    if let Some(arch) = cli.arch {
        config.options.arch = arch;
        if cli.config.is_none() {
            config.target = Target::cuda(arch);
        }
    }
    if let Some(n) = cli.num_warps {
        config.options.num_warps = n;
    }
    if let Some(n) = cli.num_stages {
        config.options.num_stages = n;
    }
    if let Some(bytes) = cli.max_shared {
        config.target.max_shared_bytes = bytes;
    }
    let invalid = config.options.validate();
    if !invalid.is_empty() {
        print_diags(&invalid);
        std::process::exit(2);
    }

    // ── Read and parse source ──
    let source = match std::fs::read_to_string(&cli.source) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("tkc: error: {}: {}", cli.source.display(), e);
            std::process::exit(2);
        }
    };

    let mut out = String::new();
    match cli.emit.terminal() {
        None => {
            let provenance = compute_provenance(&source, &config.target, &config.options);
            out.push_str(&provenance.to_json());
        }
        Some(terminal) => {
            let modules = match tkc::resolve::parse_modules(&source) {
                Ok(m) => m,
                Err(diags) => {
                    print_diags(&diags);
                    std::process::exit(1);
                }
            };
            if cli.verbose {
                eprintln!("tkc: parsed {} kernels", modules.len());
            }

            let mut ctx = LowContext::new();
            let mut failed = false;
            for module in modules {
                let mut state = CompilationState::new(module);
                let result = run_pipeline(
                    &mut state,
                    terminal,
                    &config.target,
                    &config.options,
                    &ListingLowering,
                    &mut ctx,
                    cli.verbose,
                    |_, diags| print_diags(diags),
                );
                if result.is_err() || has_errors(&state.diagnostics) {
                    failed = true;
                    continue;
                }
                render(cli.emit, &state, &mut out);
            }
            if failed {
                std::process::exit(1);
            }
        }
    }

    // ── Write output ──
    let written = match &cli.output {
        Some(path) => std::fs::write(path, &out),
        None => std::io::stdout().write_all(out.as_bytes()),
    };
    if let Err(e) = written {
        eprintln!("tkc: error: cannot write output: {}", e);
        std::process::exit(2);
    }
}

fn render(emit: EmitStage, state: &CompilationState, out: &mut String) {
    let module = &state.module;
    let json = |value: serde_json::Value, out: &mut String| {
        out.push_str(&format!("{value:#}\n"));
    };
    match emit {
        EmitStage::Ir => out.push_str(&module.to_string()),
        EmitStage::Align => {
            if let Some(align) = &state.align {
                json(align.report(module), out);
            }
        }
        EmitStage::Layouts => {
            if let Some(layouts) = &state.layouts {
                json(layouts.report(module), out);
            }
        }
        EmitStage::Dot => {
            if let Some(layouts) = &state.layouts {
                out.push_str(&emit_dot(module, layouts));
            }
        }
        EmitStage::Alloc => {
            if let Some(alloc) = &state.alloc {
                json(
                    serde_json::json!({ "kernel": module.name, "allocation": alloc }),
                    out,
                );
            }
        }
        EmitStage::Low => {
            if let Some(low) = &state.low {
                out.push_str(&low.text);
            }
        }
        EmitStage::BuildInfo => {}
    }
}
