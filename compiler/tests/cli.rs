// Integration tests for the `tkc` binary.
//
// These tests verify:
// - each --emit target runs and produces the expected artifact
// - option overrides and config files reach the pipeline
// - failures exit non-zero with coded diagnostics on stderr
// - identical inputs give byte-identical outputs

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

fn tkc_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_tkc"))
}

fn project_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .unwrap()
        .to_path_buf()
}

fn demo(name: &str) -> String {
    project_root()
        .join("demos")
        .join(name)
        .to_str()
        .unwrap()
        .to_string()
}

fn run(args: &[&str]) -> Output {
    Command::new(tkc_binary())
        .args(args)
        .output()
        .expect("failed to run tkc")
}

fn run_ok(args: &[&str]) -> String {
    let output = run(args);
    assert!(
        output.status.success(),
        "tkc failed with args {:?}\nstderr: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8(output.stdout).expect("non-UTF8 output")
}

fn temp_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("tkc-{}-{}", std::process::id(), name))
}

#[test]
fn emit_ir_shows_inserted_copies() {
    let ir = run_ok(&["--emit", "ir", &demo("matmul_loop.tk")]);
    assert!(ir.starts_with("kernel matmul_loop("));
    // Entry and loop edges into the phi, plus the register read for `mul`.
    assert_eq!(ir.matches("async_copy_to_shared").count(), 2);
    assert_eq!(ir.matches("copy_from_shared").count(), 1);
}

#[test]
fn pre_ampere_arch_emits_sync_copies() {
    let ir = run_ok(&["--emit", "ir", "--arch", "75", &demo("matmul_loop.tk")]);
    assert!(!ir.contains("async_copy_to_shared"));
    assert_eq!(ir.matches(" = copy_to_shared").count(), 3);
}

#[test]
fn emit_alloc_reports_footprint() {
    let out = run_ok(&["--emit", "alloc", &demo("matmul_loop.tk")]);
    let json: serde_json::Value = serde_json::from_str(&out).unwrap();
    assert_eq!(json["kernel"], "matmul_loop");
    // %bs: 4096 bytes; loop-carried A tile: 2 x 4096 bytes.
    assert_eq!(json["allocation"]["total"], 12288);

    let staged = run_ok(&[
        "--emit",
        "alloc",
        "--num-stages",
        "3",
        &demo("matmul_loop.tk"),
    ]);
    let json: serde_json::Value = serde_json::from_str(&staged).unwrap();
    assert_eq!(json["allocation"]["total"], 16384);
}

#[test]
fn emit_layouts_is_json() {
    let out = run_ok(&["--emit", "layouts", &demo("matmul_loop.tk")]);
    let json: serde_json::Value = serde_json::from_str(&out).unwrap();
    let groups = json["groups"].as_array().unwrap();
    assert!(groups
        .iter()
        .any(|g| g["layout"]["kind"] == "shared" && g["loop_carried"] == true));
    assert!(groups.iter().any(|g| g["layout"]["kind"] == "mma_operand"));
}

#[test]
fn emit_align_reports_pointer_facts() {
    let out = run_ok(&["--emit", "align", &demo("matmul_loop.tk")]);
    let json: serde_json::Value = serde_json::from_str(&out).unwrap();
    let values = json["values"].as_array().unwrap();
    let pa = values.iter().find(|v| v["value"] == "%pa").unwrap();
    assert_eq!(pa["alignment"], 16);
}

#[test]
fn emit_dot_is_a_digraph() {
    let out = run_ok(&["--emit", "dot", &demo("matmul_loop.tk")]);
    assert!(out.starts_with("digraph matmul_loop {"));
    assert!(out.contains("style=bold"));
}

#[test]
fn emit_low_handles_every_kernel() {
    let out = run_ok(&[&demo("two_kernels.tk")]);
    assert!(out.contains(".kernel softmax_row"));
    assert!(out.contains(".kernel transpose"));
    assert!(out.contains(".shared 0"));
    // The copy into `trans` and its result, 2048 bytes each.
    assert!(out.contains(".shared 4096"));
}

#[test]
fn output_file_is_written() {
    let path = temp_path("out.txt");
    run_ok(&[
        "--emit",
        "low",
        "-o",
        path.to_str().unwrap(),
        &demo("matmul_loop.tk"),
    ]);
    let text = std::fs::read_to_string(&path).unwrap();
    std::fs::remove_file(&path).ok();
    assert!(text.starts_with(".kernel matmul_loop\n.target sm_80\n"));
    assert!(text.contains("  async_wait"));
}

#[test]
fn config_file_sets_target_and_options() {
    let path = temp_path("config.json");
    std::fs::write(
        &path,
        r#"{ "target": { "name": "sm_90", "warp_size": 32, "max_shared_bytes": 232448 },
             "options": { "arch": 90, "num_stages": 4 } }"#,
    )
    .unwrap();
    let out = run_ok(&[
        "--emit",
        "low",
        "--config",
        path.to_str().unwrap(),
        &demo("matmul_loop.tk"),
    ]);
    std::fs::remove_file(&path).ok();
    assert!(out.contains(".target sm_90"));
    // 4 stages for the loop-carried tile plus %bs.
    assert!(out.contains(".shared 20480"));
}

#[test]
fn exceeding_shared_memory_fails() {
    let output = run(&["--max-shared", "10000", &demo("matmul_loop.tk")]);
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("E0300"), "stderr: {stderr}");
    assert!(output.stdout.is_empty());
}

#[test]
fn invalid_options_fail_before_compiling() {
    let output = run(&["--num-warps", "3", &demo("matmul_loop.tk")]);
    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("E0001"));
}

#[test]
fn resolve_errors_are_reported_with_codes() {
    let path = temp_path("bad.tk");
    std::fs::write(&path, "kernel k() {\nentry:\n  %x = exp %nope : f32[4]\n  ret\n}\n").unwrap();
    let output = run(&[path.to_str().unwrap()]);
    std::fs::remove_file(&path).ok();
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("E0101"));
}

#[test]
fn build_info_is_reproducible() {
    let first = run_ok(&["--emit", "build-info", &demo("matmul_loop.tk")]);
    let second = run_ok(&["--emit", "build-info", &demo("matmul_loop.tk")]);
    assert_eq!(first, second);
    let json: serde_json::Value = serde_json::from_str(&first).unwrap();
    assert_eq!(json["source_hash"].as_str().unwrap().len(), 64);

    let other = run_ok(&[
        "--emit",
        "build-info",
        "--num-stages",
        "3",
        &demo("matmul_loop.tk"),
    ]);
    let other: serde_json::Value = serde_json::from_str(&other).unwrap();
    assert_eq!(json["source_hash"], other["source_hash"]);
    assert_ne!(json["config_fingerprint"], other["config_fingerprint"]);
}

#[test]
fn same_source_identical_listing() {
    let first = run_ok(&["--emit", "low", &demo("matmul_loop.tk")]);
    let second = run_ok(&["--emit", "low", &demo("matmul_loop.tk")]);
    assert_eq!(first, second);
}

#[test]
fn verbose_reports_pass_timing() {
    let output = run(&["--verbose", "--emit", "alloc", &demo("matmul_loop.tk")]);
    assert!(output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("tkc: align complete"));
    assert!(stderr.contains("tkc: allocate complete"));
    assert!(!stderr.contains("tkc: lower complete"));
}
