use criterion::{Criterion, criterion_group, criterion_main};
use openrosa_xpath::evaluator::evaluate_str;
use openrosa_xpath::parser::parse_expression;
use openrosa_xpath::runtime::EvalContextBuilder;
use openrosa_xpath::tree::{TreeNode, doc, elem, text};
use std::hint::black_box;

// The returned document keeps the tree's weak parent links alive for the
// duration of the benchmark.
fn sample_context() -> (TreeNode, openrosa_xpath::runtime::EvalContext<TreeNode>) {
    let mut data = elem("data");
    for i in 0..50 {
        data = data.child(elem("item").child(text(&format!("value-{i}"))));
    }
    let document = doc().child(data).build();
    let root = document.children()[0].clone();
    let ctx = EvalContextBuilder::new().with_context_node(root).build();
    (document, ctx)
}

fn bench_parse(c: &mut Criterion) {
    c.bench_function("parse_simple_path", |b| {
        b.iter(|| parse_expression(black_box("/data/item[3]")));
    });
    c.bench_function("parse_nested_calls", |b| {
        b.iter(|| {
            parse_expression(black_box(
                "if(string-length(/data/a) != 0, jr:choice-name(concat('a', 'b'), '/data/a'), 'x')",
            ))
        });
    });
}

fn bench_evaluate(c: &mut Criterion) {
    let (_document, ctx) = sample_context();
    c.bench_function("evaluate_predicate_scan", |b| {
        b.iter(|| evaluate_str(black_box("count(/data/item[position() > 25])"), &ctx));
    });
    c.bench_function("evaluate_string_functions", |b| {
        b.iter(|| evaluate_str(black_box("concat(/data/item[1], '-', /data/item[50])"), &ctx));
    });
}

criterion_group!(benches, bench_parse, bench_evaluate);
criterion_main!(benches);
