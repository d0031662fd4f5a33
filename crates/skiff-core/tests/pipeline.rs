//! End-to-end requests through compile and execute

use std::thread;
use std::time::{Duration, Instant};

use skiff_core::{BackendSelector, Capability, PermissionSet, RequestState, ResultRecord, RunConfig, SourceUnit};

fn question(body: &str) -> Vec<SourceUnit> {
    vec![SourceUnit::new(
        "Question.java",
        format!("public class Question {{\n    public static void main(String[] args) {{\n{body}\n    }}\n}}\n"),
    )]
}

fn generous() -> RunConfig {
    RunConfig::builder().timeout(Duration::from_secs(5)).build()
}

fn run(units: &[SourceUnit], config: &RunConfig) -> ResultRecord {
    skiff_core::run(units, config, &PermissionSet::minimal())
}

#[test]
fn writes_and_returns() {
    let record = run(&question("System.out.print(\"hello\");"), &generous());
    assert!(record.compiled);
    assert!(record.executed);
    assert!(!record.crashed && !record.timed_out);
    assert_eq!(record.output.as_deref(), Some("hello"));
    assert_eq!(record.state(), RequestState::Succeeded);
    assert!(record.returned.is_some());
}

#[test]
fn endless_loop_times_out_and_drops_output() {
    let config = RunConfig::builder().timeout_ms(100).build();
    let started = Instant::now();
    let record = run(&question("while (true) { System.out.println(\"spin\"); }"), &config);
    assert!(started.elapsed() >= Duration::from_millis(100));
    assert!(record.timed_out);
    assert!(!record.executed && !record.crashed);
    assert!(record.output.is_none());
    assert!(record.execution_error_message.is_none());
    assert_eq!(record.timeout_length, Some(100));
}

#[test]
fn division_by_zero_crashes() {
    let record = run(&question("int zero = 0;\nSystem.out.println(10 / zero);"), &generous());
    assert!(record.crashed);
    assert!(!record.executed);
    assert_eq!(record.execution_error_message.as_deref(), Some("ArithmeticException: / by zero"));
    let trace = record.execution_error_stack_trace.unwrap();
    assert!(trace.contains("at Question.main(Question.java:4)"), "{trace}");
    assert!(!trace.contains("InvocationTargetException"), "{trace}");
    assert!(record.output.is_none());
}

#[test]
fn syntax_error_never_reaches_execute() {
    let config = generous();
    let (record, artifact) = skiff_core::compile(&question("System.out.println(\"x\")"), &config);
    assert!(!record.compiled);
    assert!(artifact.is_none());
    assert!(!record.compilation_error_message.as_deref().unwrap_or_default().is_empty());

    let before = serde_json::to_value(&record).unwrap();
    let after = skiff_core::execute(record, None, &PermissionSet::minimal(), &config);
    assert_eq!(serde_json::to_value(&after).unwrap(), before);
    assert!(!after.executed);
    assert!(after.output.is_none());
}

#[test]
fn concurrent_requests_do_not_mix_output() {
    let handles: Vec<_> = ["A", "B"]
        .into_iter()
        .map(|letter| {
            thread::spawn(move || {
                let body = format!("for (int i = 0; i < 200; i++) {{ System.out.print(\"{letter}\"); }}");
                (letter, run(&question(&body), &generous()))
            })
        })
        .collect();
    for handle in handles {
        let (letter, record) = handle.join().unwrap();
        assert!(record.executed);
        assert_eq!(record.output.unwrap(), letter.repeat(200));
    }
}

#[test]
fn record_survives_json() {
    let mut record = run(&question("System.out.println(\"json\");"), &generous());
    let json = record.completed().unwrap();
    assert!(json.contains("\"executionStarted\""));
    let parsed = ResultRecord::from_json(&json).unwrap();
    assert_eq!(parsed.compiled, record.compiled);
    assert_eq!(parsed.executed, record.executed);
    assert_eq!(parsed.crashed, record.crashed);
    assert_eq!(parsed.timed_out, record.timed_out);
    assert_eq!(parsed.received, record.received);
    assert_eq!(parsed.execution_finished, record.execution_finished);
    assert_eq!(parsed.returned, record.returned);
    assert_eq!(parsed.output, record.output);
}

#[test]
fn dynamic_defers_what_native_rejects() {
    let units = question("if (args.length > 5) { System.out.println(missing); }\nSystem.out.println(\"ran\");");

    let dynamic = RunConfig::builder()
        .timeout(Duration::from_secs(5))
        .backend(BackendSelector::Dynamic)
        .build();
    let record = run(&units, &dynamic);
    assert_eq!(record.compiler.as_deref(), Some("dynamic"));
    assert_eq!(record.output.as_deref(), Some("ran\n"));

    let native = RunConfig::builder()
        .timeout(Duration::from_secs(5))
        .backend(BackendSelector::Native)
        .build();
    let record = run(&units, &native);
    assert!(!record.compiled);
    assert!(record.compilation_error_message.unwrap().contains("missing"));
}

#[test]
fn huge_operator_chain_is_a_compile_error() {
    let units = question(&format!("int x = 1{};", "+1".repeat(300_000)));
    for backend in [BackendSelector::Dynamic, BackendSelector::Native, BackendSelector::Auto] {
        let config = RunConfig::builder().backend(backend).build();
        let (record, artifact) = skiff_core::compile(&units, &config);
        assert!(!record.compiled, "{backend:?}");
        assert!(artifact.is_none());
        assert!(record.compilation_error_message.unwrap().contains("nested too deeply"));
    }
}

#[test]
fn auto_runs_full_dialect_through_native() {
    let record = run(
        &question("var total = 0;\nfor (int x : new int[] {1, 2, 3}) { total += x; }\nSystem.out.println(total);"),
        &generous(),
    );
    assert_eq!(record.compiler.as_deref(), Some("native"));
    assert_eq!(record.output.as_deref(), Some("6\n"));
}

#[test]
fn instance_entry_point_is_rejected() {
    let units = vec![SourceUnit::new(
        "Question.java",
        "public class Question { public void main(String[] args) { } }",
    )];
    let record = run(&units, &generous());
    assert!(!record.compiled);
    assert!(record.compilation_error_message.unwrap().contains("not static"));
    assert!(record.execution_started.is_none());
}

#[test]
fn invoker_without_its_grant_crashes() {
    let units = vec![SourceUnit::new(
        "Question.java",
        "public class Question { static void main(String[] args) { System.out.println(\"never\"); } }",
    )];
    let record = skiff_core::run(&units, &generous(), &PermissionSet::none());
    assert!(record.compiled);
    assert!(record.crashed);
    assert!(record.execution_error_message.unwrap().starts_with("SecurityException"));
    assert!(record.output.is_none());
}

#[test]
fn exit_needs_process_control() {
    let units = question("System.out.println(\"bye\");\nSystem.exit(0);\nSystem.out.println(\"unreachable\");");

    let denied = run(&units, &generous());
    assert!(denied.crashed);
    assert!(denied.execution_error_message.unwrap().contains("process-control"));

    let granted = PermissionSet::builder().grant(Capability::ProcessControl).build();
    let record = skiff_core::run(&units, &generous(), &granted);
    assert!(record.executed);
    assert_eq!(record.output.as_deref(), Some("bye\n"));
}

#[test]
fn caught_exceptions_do_not_crash() {
    let record = run(
        &question(
            "try { Object o = null; o.toString(); }\ncatch (NullPointerException e) { System.out.println(\"caught\"); }",
        ),
        &generous(),
    );
    assert!(record.executed);
    assert_eq!(record.output.as_deref(), Some("caught\n"));
}

#[test]
fn unbounded_recursion_overflows() {
    let units = vec![SourceUnit::new(
        "Question.java",
        "public class Question {\n    static int deeper(int n) { return deeper(n + 1) + 1; }\n    public static void main(String[] args) { deeper(0); }\n}\n",
    )];
    let record = run(&units, &generous());
    assert!(record.crashed);
    assert_eq!(record.execution_error_message.as_deref(), Some("StackOverflowError"));
}

#[test]
fn sleeping_past_the_deadline_is_cut_short() {
    let config = RunConfig::builder().timeout_ms(100).build();
    let started = Instant::now();
    let record = run(&question("System.out.println(\"nap\");\nThread.sleep(30000);"), &config);
    assert!(record.timed_out);
    assert!(record.output.is_none());
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[test]
fn finally_cannot_outlive_the_deadline() {
    let config = RunConfig::builder().timeout_ms(100).build();
    let record = run(
        &question("try { while (true) { } } finally { System.out.println(\"escaped\"); }"),
        &config,
    );
    assert!(record.timed_out);
    assert!(record.output.is_none());

    // The console is back in its normal state for the next request
    let next = run(&question("System.out.print(\"clean\");"), &generous());
    assert_eq!(next.output.as_deref(), Some("clean"));
}
