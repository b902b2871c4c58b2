//! Benchmarks for collection and resolution performance.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use tyflow_analysis::IndirectCallResolver;
use tyflow_ir::{DataLayout, GepIndex, Program, ValueId};

/// Builds a program with `modules` modules, each defining `structs` dispatch
///-table struct types with `fields` handler slots apiece, a global instance
/// per struct, and one indirect call per struct.
fn synthetic_program(modules: usize, structs: usize, fields: usize) -> (Program, Vec<ValueId>) {
    let mut p = Program::new();
    let mut calls = Vec::new();

    for mi in 0..modules {
        let m = p.add_module(format!("mod{mi}"), DataLayout::lp64());
        let i32t = p.types_mut().int(32);
        let fnty = p.types_mut().function(i32t, vec![i32t], false);
        let fp = p.types_mut().pointer_to(fnty);

        for si in 0..structs {
            let s = p
                .types_mut()
                .struct_named(format!("ops_{mi}_{si}"), vec![fp; fields]);
            let handlers: Vec<ValueId> = (0..fields)
                .map(|fi| {
                    let f = p.define_function(m, format!("h_{mi}_{si}_{fi}"), fnty);
                    p.func_value(f)
                })
                .collect();
            let init = p.const_aggregate(s, handlers).unwrap();
            let g = p.add_global(m, format!("table_{mi}_{si}"), s, Some(init));

            let void = p.types_mut().void();
            let hostty = p.types_mut().function(void, vec![], false);
            let host = p.define_function(m, format!("call_{mi}_{si}"), hostty);
            let gv = p.global(g).value;
            let slot = p
                .inst_gep(
                    host,
                    gv,
                    s,
                    vec![GepIndex::Const(0), GepIndex::Const((si % fields) as i64)],
                )
                .unwrap();
            let loaded = p.inst_load(host, slot).unwrap();
            let one = p.const_int(i32t, 1);
            let call = p.inst_call_indirect(host, loaded, vec![one]).unwrap();
            calls.push(call);
        }
    }

    p.finalize();
    (p, calls)
}

fn bench_collection(c: &mut Criterion) {
    let mut group = c.benchmark_group("collection");

    for (modules, structs) in [(1, 10), (4, 25), (8, 50)] {
        let (program, _calls) = synthetic_program(modules, structs, 4);
        group.bench_with_input(
            BenchmarkId::new("collect", format!("{modules}x{structs}")),
            &program,
            |b, program| {
                b.iter(|| {
                    let mut resolver = IndirectCallResolver::new();
                    resolver.collect(black_box(program));
                    resolver
                })
            },
        );
    }

    group.finish();
}

fn bench_resolution(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolution");

    let (program, calls) = synthetic_program(4, 25, 4);
    let mut warm = IndirectCallResolver::new();
    warm.collect(&program);

    group.bench_function("resolve_all_warm", |b| {
        b.iter(|| {
            let mut total = 0usize;
            for &call in &calls {
                total += warm.resolve(black_box(&program), call).len();
            }
            total
        })
    });

    group.bench_function("resolve_one_cold_cache", |b| {
        b.iter(|| {
            let mut resolver = IndirectCallResolver::new();
            resolver.collect(black_box(&program));
            resolver.resolve(black_box(&program), calls[0]).len()
        })
    });

    group.finish();
}

criterion_group!(benches, bench_collection, bench_resolution);
criterion_main!(benches);
