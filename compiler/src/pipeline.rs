// pipeline.rs — Compilation state and pass orchestration
//
// Holds the module and every pass artifact, and runs the minimal set of
// passes for a given terminal PassId. `compile_kernel` is the library
// entrypoint: it runs every pass and hands back the low-level module.
//
// Preconditions: the module was built by the resolver (or passes V1-V5).
// Postconditions: all artifacts for required passes are populated, or has_error is set.
// Failure modes: any pass emitting error-level diagnostics; certificate failures.
// Side effects: rewrites the module in place (copy insertion); calls
//               on_pass_complete after each pass for immediate display.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::align::AlignmentAnalysis;
use crate::alloc::SharedAllocation;
use crate::copy_insert::{verify_placement, CopyInsertion, CopyStats};
use crate::diag::codes;
use crate::diag::{has_errors, Diagnostic};
use crate::ir::Module;
use crate::layout::{LayoutAnalysis, LayoutOptions};
use crate::lower::{KernelLowering, ListingLowering, LowContext, LowModule, LowerInput};
use crate::pass::{descriptor, required_passes, PassId, StageCert};
use crate::target::Target;
use crate::verify::verify_module;

// ── Options ────────────────────────────────────────────────────────────────

/// Per-kernel compilation options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelOptions {
    /// Compute capability, e.g. 80 for sm_80.
    pub arch: u32,
    pub num_warps: u32,
    pub num_stages: u32,
}

impl Default for KernelOptions {
    fn default() -> Self {
        KernelOptions {
            arch: 80,
            num_warps: 4,
            num_stages: 2,
        }
    }
}

impl KernelOptions {
    /// One `E0001` diagnostic per out-of-range option.
    pub fn validate(&self) -> Vec<Diagnostic> {
        let mut diags = Vec::new();
        if self.arch == 0 {
            diags.push(
                Diagnostic::error("`arch` must be positive")
                    .with_code(codes::E0001)
                    .with_hint("use the compute capability, e.g. 80 for sm_80"),
            );
        }
        if !(1..=64).contains(&self.num_warps) || !self.num_warps.is_power_of_two() {
            diags.push(
                Diagnostic::error(format!(
                    "`num_warps` must be a power of two between 1 and 64, got {}",
                    self.num_warps
                ))
                .with_code(codes::E0001),
            );
        }
        if self.num_stages == 0 {
            diags.push(Diagnostic::error("`num_stages` must be at least 1").with_code(codes::E0001));
        }
        diags
    }

    pub fn layout_options(&self, target: &Target) -> LayoutOptions {
        LayoutOptions {
            num_warps: self.num_warps,
            num_stages: self.num_stages,
            arch: self.arch,
            warp_size: target.warp_size,
        }
    }

    /// Async copies are used from sm_80 on.
    pub fn use_async_copies(&self) -> bool {
        self.arch >= 80
    }
}

/// Which analyses `compile_kernel` hands back to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepAnalyses {
    pub layouts: bool,
    pub align: bool,
}

impl KeepAnalyses {
    pub fn none() -> Self {
        KeepAnalyses {
            layouts: false,
            align: false,
        }
    }

    pub fn all() -> Self {
        KeepAnalyses {
            layouts: true,
            align: true,
        }
    }
}

impl Default for KeepAnalyses {
    fn default() -> Self {
        Self::all()
    }
}

// ── Provenance ─────────────────────────────────────────────────────────────

/// Provenance metadata for hermetic builds and cache-key use.
///
/// `source_hash`: SHA-256 of the raw `.tk` source text.
/// `config_fingerprint`: SHA-256 of the compact JSON of target and options.
/// `compiler_version`: crate version from `Cargo.toml`.
#[derive(Debug, Clone)]
pub struct Provenance {
    pub source_hash: [u8; 32],
    pub config_fingerprint: [u8; 32],
    pub compiler_version: &'static str,
}

impl Provenance {
    /// Hex string of the source hash (64 characters).
    pub fn source_hash_hex(&self) -> String {
        bytes_to_hex(&self.source_hash)
    }

    /// Hex string of the config fingerprint (64 characters).
    pub fn config_fingerprint_hex(&self) -> String {
        bytes_to_hex(&self.config_fingerprint)
    }

    /// Serialize provenance as a JSON string for `--emit build-info`.
    pub fn to_json(&self) -> String {
        let value = serde_json::json!({
            "source_hash": self.source_hash_hex(),
            "config_fingerprint": self.config_fingerprint_hex(),
            "compiler_version": self.compiler_version,
        });
        format!("{value:#}\n")
    }
}

fn bytes_to_hex(bytes: &[u8; 32]) -> String {
    let mut s = String::with_capacity(64);
    for b in bytes {
        use std::fmt::Write;
        let _ = write!(s, "{:02x}", b);
    }
    s
}

fn sha256(bytes: &[u8]) -> [u8; 32] {
    use sha2::{Digest, Sha256};

    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let result = hasher.finalize();
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&result);
    hash
}

/// Compute provenance from source text and the effective configuration.
pub fn compute_provenance(source: &str, target: &Target, options: &KernelOptions) -> Provenance {
    let canonical = serde_json::json!({ "target": target, "options": options }).to_string();
    Provenance {
        source_hash: sha256(source.as_bytes()),
        config_fingerprint: sha256(canonical.as_bytes()),
        compiler_version: env!("CARGO_PKG_VERSION"),
    }
}

// ── Compilation state ──────────────────────────────────────────────────────

/// Holds the module, all compilation artifacts, and accumulated diagnostics.
pub struct CompilationState {
    pub module: Module,
    pub align: Option<AlignmentAnalysis>,
    pub layouts: Option<LayoutAnalysis>,
    pub copy_stats: Option<CopyStats>,
    pub alloc: Option<SharedAllocation>,
    pub low: Option<LowModule>,
    pub diagnostics: Vec<Diagnostic>,
    pub has_error: bool,
    pub provenance: Option<Provenance>,
}

impl CompilationState {
    pub fn new(module: Module) -> Self {
        Self {
            module,
            align: None,
            layouts: None,
            copy_stats: None,
            alloc: None,
            low: None,
            diagnostics: Vec::new(),
            has_error: false,
            provenance: None,
        }
    }
}

// ── Error types ────────────────────────────────────────────────────────────

/// Pipeline execution failed due to error-level diagnostics in a pass.
/// The specific diagnostics are available in `CompilationState.diagnostics`.
#[derive(Debug, Error)]
#[error("pass `{failing_pass}` failed")]
pub struct PipelineError {
    /// The pass that produced the error.
    pub failing_pass: PassId,
}

/// Why `compile_kernel` produced no module.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("invalid kernel options")]
    InvalidOptions { diagnostics: Vec<Diagnostic> },
    #[error("pass `{failing_pass}` failed")]
    Pass {
        failing_pass: PassId,
        diagnostics: Vec<Diagnostic>,
    },
}

impl CompileError {
    pub fn diagnostics(&self) -> &[Diagnostic] {
        match self {
            CompileError::InvalidOptions { diagnostics }
            | CompileError::Pass { diagnostics, .. } => diagnostics,
        }
    }

    pub fn failing_pass(&self) -> Option<PassId> {
        match self {
            CompileError::InvalidOptions { .. } => None,
            CompileError::Pass { failing_pass, .. } => Some(*failing_pass),
        }
    }
}

// ── Per-pass bookkeeping ───────────────────────────────────────────────────

/// Per-pass post-processing: callback, accumulate, verbose, error check.
fn finish_pass(
    state: &mut CompilationState,
    pass_id: PassId,
    diags: Vec<Diagnostic>,
    elapsed: std::time::Duration,
    verbose: bool,
    on_pass_complete: &mut impl FnMut(PassId, &[Diagnostic]),
) -> Result<(), PipelineError> {
    on_pass_complete(pass_id, &diags);
    let is_err = has_errors(&diags);
    state.diagnostics.extend(diags);
    report_timing(pass_id, elapsed, verbose);
    if is_err {
        state.has_error = true;
        return Err(PipelineError {
            failing_pass: pass_id,
        });
    }
    Ok(())
}

/// Per-pass post-processing for passes that produce no diagnostics.
fn finish_pass_no_diags(
    pass_id: PassId,
    elapsed: std::time::Duration,
    verbose: bool,
    on_pass_complete: &mut impl FnMut(PassId, &[Diagnostic]),
) {
    on_pass_complete(pass_id, &[]);
    report_timing(pass_id, elapsed, verbose);
}

fn report_timing(pass_id: PassId, elapsed: std::time::Duration, verbose: bool) {
    let ms = elapsed.as_secs_f64() * 1000.0;
    info!(pass = descriptor(pass_id).name, ms, "pass complete");
    if verbose {
        eprintln!("tkc: {} complete, {:.1}ms", descriptor(pass_id).name, ms);
    }
}

/// Error diagnostic naming every failed obligation of `cert`, or `None`.
fn cert_failure(cert: &impl StageCert, what: &str, code: crate::diag::DiagCode) -> Option<Diagnostic> {
    if cert.all_pass() {
        return None;
    }
    Some(
        Diagnostic::error(format!("{what} verification failed: {}", cert.failed().join(", ")))
            .with_code(code),
    )
}

// ── Pipeline runner ────────────────────────────────────────────────────────

/// Run the minimal set of passes to produce `terminal`.
///
/// Per-pass sequence: execute → on_pass_complete(callback) → verbose → error check.
///
/// Preconditions: `options` passed `validate()`.
/// Postconditions: artifacts for all passes in `required_passes(terminal)` are populated,
///   or `state.has_error` is true.
/// Failure modes: any pass producing error-level diagnostics.
/// Side effects: copy insertion rewrites `state.module`; calls `on_pass_complete`
///   after each pass.
#[allow(clippy::too_many_arguments)]
pub fn run_pipeline(
    state: &mut CompilationState,
    terminal: PassId,
    target: &Target,
    options: &KernelOptions,
    lowering: &dyn KernelLowering,
    ctx: &mut LowContext,
    verbose: bool,
    mut on_pass_complete: impl FnMut(PassId, &[Diagnostic]),
) -> Result<(), PipelineError> {
    let layout_options = options.layout_options(target);

    for pass_id in required_passes(terminal) {
        match pass_id {
            PassId::Align => {
                let t = Instant::now();
                state.align = Some(AlignmentAnalysis::run(&state.module));
                finish_pass_no_diags(PassId::Align, t.elapsed(), verbose, &mut on_pass_complete);
            }
            PassId::Layout => {
                let t = Instant::now();
                let align = state.align.as_ref().expect("align pass precedes layout");
                let layouts = LayoutAnalysis::run(&state.module, align, &layout_options);
                let diags = conflict_warnings(&state.module, &layouts);
                state.layouts = Some(layouts);
                finish_pass(
                    state,
                    PassId::Layout,
                    diags,
                    t.elapsed(),
                    verbose,
                    &mut on_pass_complete,
                )?;
            }
            PassId::CopyInsert => {
                let t = Instant::now();
                let diags = run_copy_insert(state, options, &layout_options);
                finish_pass(
                    state,
                    PassId::CopyInsert,
                    diags,
                    t.elapsed(),
                    verbose,
                    &mut on_pass_complete,
                )?;
            }
            PassId::Allocate => {
                let t = Instant::now();
                let layouts = state.layouts.as_ref().expect("layout pass precedes allocate");
                let alloc = SharedAllocation::run(&state.module, layouts);
                let mut diags = Vec::new();
                if alloc.allocated_size() > target.max_shared_bytes {
                    diags.push(
                        Diagnostic::error(format!(
                            "kernel `{}` needs {} bytes of shared memory, {} provides {}",
                            state.module.name,
                            alloc.allocated_size(),
                            target.name,
                            target.max_shared_bytes
                        ))
                        .with_code(codes::E0300)
                        .with_hint("reduce --num-stages or the tile shapes"),
                    );
                }
                state.alloc = Some(alloc);
                finish_pass(
                    state,
                    PassId::Allocate,
                    diags,
                    t.elapsed(),
                    verbose,
                    &mut on_pass_complete,
                )?;
            }
            PassId::Lower => {
                let t = Instant::now();
                let input = LowerInput {
                    layouts: state.layouts.as_ref().expect("layout pass precedes lower"),
                    alloc: state.alloc.as_ref().expect("allocate pass precedes lower"),
                    target,
                    arch: options.arch,
                    num_warps: options.num_warps,
                };
                let mut diags = Vec::new();
                match lowering.lower(&state.module, &input, ctx) {
                    Ok(low) => state.low = Some(low),
                    Err(e) => diags.push(Diagnostic::error(e.to_string()).with_code(codes::E0400)),
                }
                finish_pass(
                    state,
                    PassId::Lower,
                    diags,
                    t.elapsed(),
                    verbose,
                    &mut on_pass_complete,
                )?;
            }
        }
    }

    Ok(())
}

fn conflict_warnings(module: &Module, layouts: &LayoutAnalysis) -> Vec<Diagnostic> {
    layouts
        .conflicts()
        .map(|group| {
            let names: Vec<String> = group.members.iter().map(|&v| module.display_name(v)).collect();
            Diagnostic::warning(format!(
                "conflicting layout demands on {{{}}} resolved to shared memory",
                names.join(", ")
            ))
            .with_code(codes::W0300)
        })
        .collect()
}

/// Verify, rewrite, refresh the analyses, verify again.
fn run_copy_insert(
    state: &mut CompilationState,
    options: &KernelOptions,
    layout_options: &LayoutOptions,
) -> Vec<Diagnostic> {
    if let Some(d) = cert_failure(&verify_module(&state.module), "IR", codes::E0200) {
        return vec![d.with_cause("before copy insertion", None)];
    }

    let layouts = state.layouts.as_ref().expect("layout pass precedes copy insertion");
    let stats = CopyInsertion::new(options.use_async_copies()).run(&mut state.module, layouts);
    state.copy_stats = Some(stats);

    let align = AlignmentAnalysis::run(&state.module);
    let layouts = LayoutAnalysis::run(&state.module, &align, layout_options);

    let mut diags = Vec::new();
    if let Some(d) = cert_failure(&verify_module(&state.module), "IR", codes::E0200) {
        diags.push(d.with_cause("after copy insertion", None));
    }
    if let Some(d) = cert_failure(&verify_placement(&state.module, &layouts), "placement", codes::E0201) {
        diags.push(d);
    }
    if layouts.conflicts().next().is_some() {
        warn!(module = %state.module.name, "layout conflicts remain after copy insertion");
    }
    state.align = Some(align);
    state.layouts = Some(layouts);
    diags
}

// ── Library entrypoint ─────────────────────────────────────────────────────

/// A successfully compiled kernel.
#[derive(Debug, Clone)]
pub struct CompiledKernel {
    pub module: LowModule,
    /// Static shared-memory footprint in bytes.
    pub shared_static: u64,
    pub layouts: Option<LayoutAnalysis>,
    pub align: Option<AlignmentAnalysis>,
}

/// Compile `module` with the built-in listing lowering.
pub fn compile_kernel(
    module: &mut Module,
    ctx: &mut LowContext,
    target: &Target,
    options: &KernelOptions,
    keep: KeepAnalyses,
) -> Result<CompiledKernel, CompileError> {
    compile_kernel_with(&ListingLowering, module, ctx, target, options, keep)
}

/// Compile `module` through every pass, lowering with `lowering`.
///
/// On success `module` holds the copy-inserted IR. On failure `module` is
/// left as it was and no low-level module or footprint is produced.
pub fn compile_kernel_with(
    lowering: &dyn KernelLowering,
    module: &mut Module,
    ctx: &mut LowContext,
    target: &Target,
    options: &KernelOptions,
    keep: KeepAnalyses,
) -> Result<CompiledKernel, CompileError> {
    let invalid = options.validate();
    if !invalid.is_empty() {
        return Err(CompileError::InvalidOptions {
            diagnostics: invalid,
        });
    }

    let mut state = CompilationState::new(module.clone());
    let result = run_pipeline(
        &mut state,
        PassId::Lower,
        target,
        options,
        lowering,
        ctx,
        false,
        |_, _| {},
    );

    if let Err(e) = result {
        return Err(CompileError::Pass {
            failing_pass: e.failing_pass,
            diagnostics: state.diagnostics,
        });
    }
    let (Some(low), Some(alloc)) = (state.low, state.alloc) else {
        unreachable!("lower pass completed without a module");
    };
    *module = state.module;
    Ok(CompiledKernel {
        module: low,
        shared_static: alloc.allocated_size(),
        layouts: state.layouts.filter(|_| keep.layouts),
        align: state.align.filter(|_| keep.align),
    })
}

// ── Tests ──────────────────────────────────────────────────────────────────
