//! Evaluate a few expressions against a small form instance.
//!
//! Run with: `cargo run --example openrosa_xpath_simple`

use openrosa_xpath::DataNode;
use openrosa_xpath::evaluator::evaluate_str;
use openrosa_xpath::runtime::{EvalContextBuilder, EvalMode};
use openrosa_xpath::tree::{doc, elem, text};

fn main() {
    let document = doc()
        .child(
            elem("data")
                .child(elem("a").child(text("yes no")))
                .child(elem("b").child(text("7"))),
        )
        .build();
    let data = document.children()[0].clone();

    let choices = elem("root")
        .child(elem("item").child(text("first")))
        .child(elem("item").child(text("second")))
        .build();

    let ctx = EvalContextBuilder::new()
        .with_context_node(data)
        .with_instance("choices", choices)
        .with_mode(EvalMode::OpenClinica)
        .build();

    for expr in [
        "selected(/data/a, 'yes')",
        "floor(/data/b div 2)",
        "instance('choices')/item[2]",
        "jr:choice-name(/data/a, '/data/a')",
        "comment-status(/data/a)",
    ] {
        match evaluate_str(expr, &ctx) {
            Ok(value) => println!("{expr} => {}", value.string_value()),
            Err(e) => println!("{expr} => error: {e}"),
        }
    }
}
