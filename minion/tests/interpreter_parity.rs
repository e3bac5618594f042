//! Integration test: sandbox guarantees and sync/async evaluator parity.

mod init_logging;

use minion::{AsyncInterpreter, Interpreter, InterpreterConfig};

fn sync_run(code: &str, config: &InterpreterConfig) -> minion::ExecResult {
    Interpreter::new(config).run(code)
}

async fn async_run(code: &str, config: &InterpreterConfig) -> minion::ExecResult {
    AsyncInterpreter::new(config).run(code).await
}

/// **Invariant 2**: for side-effect-free code terminating via
/// `final_answer(v)`, both evaluators return `(v, logs, true)` with
/// identical logs.
#[tokio::test]
async fn sync_and_async_agree_on_pure_code() {
    let programs = [
        "final_answer(sum(i * i for i in range(20)))",
        "xs = [3, 1, 2]\nxs.sort()\nprint(xs)\nfinal_answer(xs[-1])",
        "def f(a, b=10):\n    return a * b\nprint(f(2))\nfinal_answer(f(3, b=4))",
        "d = {'a': 1, 'b': 2}\nfinal_answer({k: v * 2 for k, v in d.items()})",
        "s = 'Hello World'\nfinal_answer(s.lower().replace(' ', '-'))",
        "total = 0\nfor i in range(10):\n    if i % 2:\n        continue\n    total += i\nfinal_answer(total)",
        "try:\n    raise ValueError('x')\nexcept ValueError as e:\n    final_answer(str(e))",
        "import math\nfinal_answer(f'{math.pi:.3f}')",
    ];
    let config = InterpreterConfig::default();
    for program in programs {
        let sync_result = sync_run(program, &config);
        let async_result = async_run(program, &config).await;
        assert!(sync_result.ok(), "sync failed on {program}: {:?}", sync_result.error);
        assert!(sync_result.is_final_answer, "not final on {program}");
        assert!(async_result.is_final_answer);
        assert_eq!(
            sync_result.value_text(),
            async_result.value_text(),
            "value mismatch on {program}"
        );
        assert_eq!(sync_result.logs, async_result.logs, "log mismatch on {program}");
    }
}

/// **Invariant 3**: a disallowed import fails with the exact message in both
/// evaluators, and assignments before the import are the only state changes.
#[tokio::test]
async fn disallowed_import_has_exact_message_in_both() {
    let config = InterpreterConfig::default();
    for module in ["os", "sys", "subprocess", "socket"] {
        let code = format!("import {module}\n");
        let sync_result = sync_run(&code, &config);
        let async_result = async_run(&code, &config).await;
        for result in [&sync_result, &async_result] {
            let error = result.error.as_ref().expect("must fail");
            assert!(
                error.contains(&format!("import not allowed: {module}")),
                "got: {error}"
            );
            assert!(!result.is_final_answer);
        }
    }
}

/// Caller-supplied additions extend the allowlist.
#[tokio::test]
async fn allowlist_additions_are_honored() {
    let config = InterpreterConfig {
        allowed_imports: vec!["mylib".to_string()],
        ..Default::default()
    };
    let result = sync_run("import mylib\nfinal_answer('ok')\n", &config);
    assert!(result.ok(), "error: {:?}", result.error);
}

/// **Invariant 4**: code exceeding the operation cap fails with
/// `operation limit exceeded` and `is_final_answer == false`.
#[tokio::test]
async fn operation_cap_fails_without_final_answer() {
    let config = InterpreterConfig {
        op_cap: 500,
        ..Default::default()
    };
    let code = "n = 0\nwhile True:\n    n += 1\nfinal_answer(n)\n";
    let sync_result = sync_run(code, &config);
    assert!(!sync_result.is_final_answer);
    assert!(sync_result
        .error
        .unwrap()
        .contains("operation limit exceeded"));

    let async_result = async_run(code, &config).await;
    assert!(!async_result.is_final_answer);
    assert!(async_result
        .error
        .unwrap()
        .contains("operation limit exceeded"));
}

/// Print overflow truncates with an explicit notice, and the cap holds.
#[tokio::test]
async fn print_output_is_capped_with_notice() {
    let config = InterpreterConfig {
        max_print_outputs_length: 200,
        ..Default::default()
    };
    let result = sync_run(
        "for i in range(100):\n    print('line', i)\nfinal_answer('done')\n",
        &config,
    );
    assert!(result.logs.contains("[print output truncated"));
    assert!(result.logs.len() < 400);
    assert!(result.is_final_answer);
}

/// `_` tracks the last expression value across runs of one interpreter.
#[tokio::test]
async fn underscore_is_a_repl_inspect() {
    let config = InterpreterConfig::default();
    let mut interp = Interpreter::new(&config);
    let first = interp.run("6 * 7\n");
    assert!(first.logs.contains("42"));
    let second = interp.run("final_answer(_)\n");
    assert_eq!(second.value_text(), "42");
}
