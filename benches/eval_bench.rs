use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use lispy::{Interpreter, Node, Span, parse_program, tokenize};

// Representative source text for the reader benchmarks
const BENCH_INPUT: &str = r#"
(define fib
  ; Naive Fibonacci, recursion through the root frame
  (fn [n]
    (if (< n 2)
        n
        (+ (fib (- n 1)) (fib (- n 2))))))

(define sum-to
  (fn [n]
    (loop [i 0 acc 0]
      (if (> i n) acc (recur (+ i 1) (+ acc i))))))

(->> (range 10)
     (map (fn [x] (* x x)))
     (filter (fn [x] (> x 10)))
     (reduce +))

{:name "lispy" :tags [:lisp :interpreter] :escaped "tab\there\nnewline \"quoted\""}
'(a b c 1 2.5 -10 true false nil)
"#;

fn bench_reader(c: &mut Criterion) {
    let input = BENCH_INPUT.repeat(20);
    let mut group = c.benchmark_group("Reader");
    group.bench_with_input(BenchmarkId::new("tokenize", "program"), &input, |b, input| {
        b.iter(|| tokenize(black_box(input)))
    });
    group.bench_with_input(
        BenchmarkId::new("parse_program", "program"),
        &input,
        |b, input| b.iter(|| parse_program(black_box(input))),
    );
    group.finish();
}

fn bench_evaluation(c: &mut Criterion) {
    let interpreter = Interpreter::default();
    if let Err(e) = interpreter.eval_str(BENCH_INPUT) {
        panic!("benchmark setup failed: {}", e);
    }

    let mut group = c.benchmark_group("Evaluation");
    group.bench_function(BenchmarkId::new("loop_recur", 10_000), |b| {
        b.iter(|| {
            interpreter.eval_str(black_box(
                "(loop [i 0] (if (< i 10000) (recur (+ i 1)) i))",
            ))
        })
    });
    group.bench_function(BenchmarkId::new("fn_recur", 10_000), |b| {
        b.iter(|| interpreter.eval_str(black_box("(sum-to 10000)")))
    });
    group.bench_function(BenchmarkId::new("closure_calls", "fib 15"), |b| {
        b.iter(|| interpreter.eval_str(black_box("(fib 15)")))
    });

    let square = match interpreter.eval_str("(fn [x] (* x x))") {
        Ok(procedure) => procedure,
        Err(e) => panic!("benchmark setup failed: {}", e),
    };
    group.bench_function(BenchmarkId::new("host_apply", "square"), |b| {
        b.iter(|| {
            interpreter.apply(
                black_box(&square),
                vec![Node::new_number(12.0, Span::default())],
            )
        })
    });
    group.finish();
}

criterion_group!(benches, bench_reader, bench_evaluation);
criterion_main!(benches);
