use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use tkc::align::AlignmentAnalysis;
use tkc::alloc::SharedAllocation;
use tkc::copy_insert::CopyInsertion;
use tkc::layout::{LayoutAnalysis, LayoutOptions};
use tkc::lower::LowContext;
use tkc::pipeline::{compile_kernel, KeepAnalyses, KernelOptions};
use tkc::resolve::parse_module;
use tkc::target::Target;

// Benchmark scenarios. Every kernel resolves and fits the default target.

const STRAIGHT_KERNEL: &str = r#"
kernel straight(%a: f16[32, 32], %b: f16[32, 32]) {
  %z = const 0.0 : f32[32, 32]
entry:
  %t = trans %a : f16[32, 32]
  %e = exp %b : f16[32, 32]
  %d = dot %t, %e, %z : f32[32, 32]
  %n = neg %d : f32[32, 32]
  ret
}
"#;

const MATMUL_LOOP_KERNEL: &str = r#"
kernel matmul_loop(%pa: ptr<f16>[64, 32] align(16), %pb: ptr<f16>[32, 64] align(16), %more: i1) {
  %acc0 = const 0.0 : f32[64, 64]
  %scale = const 0.5 : f16[64, 32]
entry:
  %a0 = load %pa : f16[64, 32]
  %b = load %pb : f16[32, 64]
  %bs = copy_to_shared %b : f16[32, 64]
  br loop
loop:
  %a = phi [%a0, entry], [%an, loop] : f16[64, 32]
  %acc = phi [%acc0, entry], [%d, loop] : f32[64, 64]
  %d = dot %a, %bs, %acc : f32[64, 64]
  %an = mul %a, %scale : f16[64, 32]
  cbr %more, loop, exit
exit:
  ret
}
"#;

const DIAMOND_KERNEL: &str = r#"
kernel diamond(%a: f16[16, 16], %b: f16[16, 16], %c: i1) {
  %z = const 0.0 : f16[16, 16]
entry:
  %e = exp %a : f16[16, 16]
  cbr %c, left, right
left:
  %l = dot %e, %b, %z : f16[16, 16]
  br join
right:
  %r = trans %e : f16[16, 16]
  br join
join:
  %m = phi [%l, left], [%r, right] : f16[16, 16]
  %d = dot %m, %e, %z : f16[16, 16]
  ret
}
"#;

fn scenarios() -> [(&'static str, &'static str); 3] {
    [
        ("straight", STRAIGHT_KERNEL),
        ("matmul_loop", MATMUL_LOOP_KERNEL),
        ("diamond", DIAMOND_KERNEL),
    ]
}

/// A loop body with `n_dots` chained dots, each reading a fresh register
/// tile at a shared slot.
fn generate_scaling_kernel(n_dots: usize) -> String {
    let mut k = String::new();
    k.push_str(
        "kernel scaled(%pa: ptr<f16>[64, 32] align(16), %pb: ptr<f16>[32, 64] align(16), %more: i1) {\n",
    );
    k.push_str("  %acc0 = const 0.0 : f32[64, 64]\n");
    k.push_str("entry:\n");
    k.push_str("  %a0 = load %pa : f16[64, 32]\n");
    k.push_str("  %b0 = load %pb : f16[32, 64]\n");
    k.push_str("  br loop\n");
    k.push_str("loop:\n");
    k.push_str("  %a = phi [%a0, entry], [%an, loop] : f16[64, 32]\n");
    k.push_str(&format!(
        "  %acc = phi [%acc0, entry], [%d{}, loop] : f32[64, 64]\n",
        n_dots - 1
    ));
    for i in 0..n_dots {
        let prev = if i == 0 {
            "%acc".to_string()
        } else {
            format!("%d{}", i - 1)
        };
        k.push_str(&format!("  %b{} = exp %b0 : f16[32, 64]\n", i + 1));
        k.push_str(&format!(
            "  %d{i} = dot %a, %b{}, {prev} : f32[64, 64]\n",
            i + 1
        ));
    }
    k.push_str("  %an = neg %a : f16[64, 32]\n");
    k.push_str("  cbr %more, loop, exit\n");
    k.push_str("exit:\n  ret\n}\n");
    k
}

// Parser and resolver latency.
fn bench_parse_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("kpi/parse_latency");

    for (name, source) in scenarios() {
        group.bench_with_input(BenchmarkId::from_parameter(name), source, |b, source| {
            b.iter(|| {
                let m = parse_module(black_box(source)).expect("benchmark scenario must resolve");
                black_box(m);
            });
        });
    }

    group.finish();
}

// Full compile latency (align -> layout -> copy_insert -> allocate -> lower).
fn bench_full_compile_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("kpi/full_compile_latency");
    let target = Target::default();
    let options = KernelOptions::default();

    for (name, source) in scenarios() {
        let module = parse_module(source).expect("benchmark scenario must resolve");
        group.bench_with_input(BenchmarkId::from_parameter(name), &module, |b, module| {
            b.iter_batched(
                || module.clone(),
                |mut m| {
                    let mut ctx = LowContext::new();
                    let compiled =
                        compile_kernel(&mut m, &mut ctx, &target, &options, KeepAnalyses::none())
                            .expect("benchmark scenario must compile");
                    black_box(compiled);
                },
                BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

// Per-pass latency on the loop kernel.
fn bench_phase_latency(c: &mut Criterion) {
    let module = parse_module(MATMUL_LOOP_KERNEL).expect("benchmark scenario must resolve");
    let options = LayoutOptions::default();
    let align = AlignmentAnalysis::run(&module);
    let layouts = LayoutAnalysis::run(&module, &align, &options);

    let mut group = c.benchmark_group("kpi/phase_latency");

    group.bench_function("align", |b| {
        b.iter(|| black_box(AlignmentAnalysis::run(black_box(&module))));
    });

    group.bench_function("layout", |b| {
        b.iter(|| black_box(LayoutAnalysis::run(black_box(&module), &align, &options)));
    });

    group.bench_function("copy_insert", |b| {
        b.iter_batched(
            || module.clone(),
            |mut m| black_box(CopyInsertion::new(true).run(&mut m, &layouts)),
            BatchSize::SmallInput,
        );
    });

    let mut rewritten = module.clone();
    CopyInsertion::new(true).run(&mut rewritten, &layouts);
    let align = AlignmentAnalysis::run(&rewritten);
    let layouts = LayoutAnalysis::run(&rewritten, &align, &options);
    group.bench_function("allocate", |b| {
        b.iter(|| black_box(SharedAllocation::run(black_box(&rewritten), &layouts)));
    });

    group.finish();
}

// Analysis and rewrite scaling vs number of dots in the loop body.
fn bench_placement_scaling(c: &mut Criterion) {
    let mut group = c.benchmark_group("kpi/placement_scaling");
    let options = LayoutOptions::default();

    for n_dots in [1_usize, 4, 16, 64] {
        let module =
            parse_module(&generate_scaling_kernel(n_dots)).expect("scaling kernel must resolve");
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{}dots", n_dots)),
            &module,
            |b, module| {
                b.iter_batched(
                    || module.clone(),
                    |mut m| {
                        let align = AlignmentAnalysis::run(&m);
                        let layouts = LayoutAnalysis::run(&m, &align, &options);
                        black_box(CopyInsertion::new(true).run(&mut m, &layouts));
                    },
                    BatchSize::SmallInput,
                );
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_parse_latency,
    bench_full_compile_latency,
    bench_phase_latency,
    bench_placement_scaling,
);
criterion_main!(benches);
