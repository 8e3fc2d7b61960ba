//! A small, restricted JavaScript interpreter used for local execution.
//!
//! Scripts see a fixed set of globals and exactly one capability: the
//! [`ConsoleSink`] that receives `console.*` output. There is no I/O, no
//! timers and no access to the host. Runaway scripts are stopped by a step
//! budget and a call-depth limit. This is best-effort isolation and not a
//! security boundary.

mod ast;
mod builtins;
mod interp;
mod lexer;
mod parser;
mod value;

use std::fmt;

use interp::{Abrupt, Interpreter};
use value::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SyntaxError {
    pub(crate) message: String,
    pub(crate) line: usize,
}

impl SyntaxError {
    pub(crate) fn new(message: &str, line: usize) -> Self {
        Self {
            message: message.to_string(),
            line,
        }
    }
}

impl fmt::Display for SyntaxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (line {})", self.message, self.line)
    }
}

/// Receives one formatted line per `console.*` call.
pub(crate) trait ConsoleSink {
    fn write_line(&mut self, line: String);
}

#[cfg(test)]
impl ConsoleSink for Vec<String> {
    fn write_line(&mut self, line: String) {
        self.push(line);
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Limits {
    /// Evaluation steps (statements, expressions and calls) before the script is halted.
    pub(crate) max_steps: u64,
    pub(crate) max_call_depth: usize,
    /// Longest string (in bytes) or array (in elements) a script may build.
    pub(crate) max_length: usize,
    /// Deepest syntactic nesting the parser accepts. Brackets, blocks and operator chains all count.
    pub(crate) max_nesting: usize,
    /// Nested evaluation frames (statements, expressions and native calls) across all active calls.
    pub(crate) max_eval_depth: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_steps: 1_000_000,
            max_call_depth: 1_000,
            max_length: 1 << 24,
            max_nesting: 1_000,
            max_eval_depth: 10_000,
        }
    }
}

/// How a script failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ScriptFault {
    Syntax(SyntaxError),
    /// An `Error` instance was thrown and not caught; carries its message.
    Thrown(String),
    /// Something other than an `Error` was thrown.
    NonError,
    /// The step budget ran out.
    Exhausted(String),
}

impl fmt::Display for ScriptFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScriptFault::Syntax(err) => write!(f, "Error: {}", err),
            ScriptFault::Thrown(message) => write!(f, "Error: {}", message),
            ScriptFault::NonError => write!(f, "Unknown error occurred"),
            ScriptFault::Exhausted(message) => write!(f, "Error: {}", message),
        }
    }
}

/// Parses and runs `source`, sending console output to `sink`.
///
/// On success returns the string form of the completion value: the value of a
/// top-level `return`, otherwise of the last expression statement. An
/// `undefined` completion is the empty string.
pub(crate) fn run_script(
    source: &str,
    sink: &mut dyn ConsoleSink,
    limits: Limits,
) -> Result<String, ScriptFault> {
    let program = parser::parse_program(source, limits.max_nesting).map_err(ScriptFault::Syntax)?;
    let mut interp = Interpreter::new(sink, limits);
    let outcome = interp
        .run(&program)
        .and_then(|value| match value {
            Value::Undefined => Ok(String::new()),
            other => interp.to_string(&other).map(|text| text.to_string()),
        });
    match outcome {
        Ok(text) => Ok(text),
        Err(Abrupt::Halt(message)) => Err(ScriptFault::Exhausted(message)),
        Err(Abrupt::Throw(thrown)) => match builtins::error_message(&mut interp, &thrown) {
            Some(message) => Err(ScriptFault::Thrown(message)),
            None => Err(ScriptFault::NonError),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Runs on a thread with a large stack, the way the executor does.
    fn run_with(source: &str, limits: Limits) -> (Result<String, ScriptFault>, Vec<String>) {
        let source = source.to_string();
        std::thread::Builder::new()
            .stack_size(256 * 1024 * 1024)
            .spawn(move || {
                let mut lines = Vec::new();
                let result = run_script(&source, &mut lines, limits);
                (result, lines)
            })
            .unwrap()
            .join()
            .unwrap()
    }

    fn run(source: &str) -> (Result<String, ScriptFault>, Vec<String>) {
        run_with(source, Limits::default())
    }

    fn logs(source: &str) -> Vec<String> {
        let (result, lines) = run(source);
        assert!(result.is_ok(), "script failed: {:?}", result);
        lines
    }

    fn value(source: &str) -> String {
        run(source).0.unwrap()
    }

    #[test]
    fn console_calls_become_lines() {
        assert_eq!(logs("console.log('a'); console.log('b');"), vec!["a", "b"]);
        assert_eq!(logs("console.log('x', 1, true, null)"), vec!["x 1 true null"]);
        assert_eq!(logs("console.warn(undefined)"), vec!["undefined"]);
    }

    #[test]
    fn completion_value_is_last_expression() {
        assert_eq!(value("1/0"), "Infinity");
        assert_eq!(value("let x = 2; x * 21"), "42");
        assert_eq!(value("var a = 1;"), "");
        assert_eq!(value("null"), "null");
        assert_eq!(value("return 'early'; 5"), "early");
        assert_eq!(value("[1, 2, 3]"), "1,2,3");
    }

    #[test]
    fn thrown_errors_report_their_message() {
        assert_eq!(run("throw new Error('x')").0, Err(ScriptFault::Thrown("x".to_string())));
        assert_eq!(run("throw 'plain'").0, Err(ScriptFault::NonError));
        let (result, _) = run("undefinedThing + 1");
        assert_eq!(
            result.unwrap_err().to_string(),
            "Error: undefinedThing is not defined"
        );
    }

    #[test]
    fn syntax_errors_carry_a_line() {
        let (result, _) = run("let a = 1;\nlet b = ;");
        match result {
            Err(ScriptFault::Syntax(err)) => assert_eq!(err.line, 2),
            other => panic!("expected a syntax error, got {:?}", other),
        }
    }

    #[test]
    fn output_before_a_throw_is_kept() {
        let (result, lines) = run("console.log('before'); throw new TypeError('bad')");
        assert_eq!(lines, vec!["before"]);
        assert_eq!(result.unwrap_err().to_string(), "Error: bad");
    }

    #[test]
    fn objects_log_as_json() {
        assert_eq!(
            logs("console.log({a: 1, b: [1, 'two', null]})"),
            vec![r#"{"a":1,"b":[1,"two",null]}"#]
        );
        assert_eq!(logs("console.log(new RangeError('r'))"), vec!["RangeError: r"]);
        assert_eq!(logs("function greet() {} console.log(greet)"), vec!["[Function: greet]"]);
    }

    #[test]
    fn closures_and_classes() {
        let source = r#"
            function counter() {
                let n = 0;
                return () => ++n;
            }
            const next = counter();
            next(); next();
            class Animal {
                constructor(name) { this.name = name; }
                speak() { return `${this.name} makes a sound`; }
            }
            class Dog extends Animal {
                speak() { return super.speak() + ' (woof)'; }
            }
            console.log(next(), new Dog('Rex').speak());
        "#;
        assert_eq!(logs(source), vec!["3 Rex makes a sound (woof)"]);
    }

    #[test]
    fn array_and_string_methods() {
        let source = r#"
            const xs = [5, 3, 8, 1];
            console.log(xs.map(x => x * 2).filter(x => x > 5).join('-'));
            console.log([...xs].sort((a, b) => a - b));
            console.log(xs.reduce((acc, x) => acc + x, 0));
            console.log('Hello'.padEnd(7, '.') + '|', 'a,b,c'.split(',').length);
            const { a, ...rest } = { a: 1, b: 2, c: 3 };
            console.log(a, Object.keys(rest));
        "#;
        assert_eq!(
            logs(source),
            vec!["10-6-16", "[1,3,5,8]", "17", "Hello..| 3", r#"1 ["b","c"]"#]
        );
    }

    #[test]
    fn try_catch_finally() {
        let source = r#"
            let trace = [];
            try {
                null.prop;
            } catch (e) {
                trace.push(e instanceof TypeError);
            } finally {
                trace.push('done');
            }
            console.log(trace);
        "#;
        assert_eq!(logs(source), vec![r#"[true,"done"]"#]);
    }

    #[test]
    fn json_round_trips_through_scripts() {
        let source = r#"
            const parsed = JSON.parse('{"n": 1.5, "list": [true, null]}');
            console.log(parsed.n, parsed.list.length);
            console.log(JSON.stringify({ x: 1 }, null, 2));
        "#;
        assert_eq!(logs(source), vec!["1.5 2", "{\n  \"x\": 1\n}"]);
    }

    #[test]
    fn infinite_loops_hit_the_step_budget() {
        let limits = Limits {
            max_steps: 10_000,
            ..Limits::default()
        };
        let (result, _) = run_with("while (true) {}", limits);
        assert_eq!(
            result.unwrap_err().to_string(),
            "Error: Execution stopped after 10000 steps"
        );
        // the budget cannot be caught by the script
        let (result, _) = run_with("try { for (;;) {} } catch (e) {} 'escaped'", limits);
        assert!(matches!(result, Err(ScriptFault::Exhausted(_))));
    }

    #[test]
    fn deep_recursion_is_a_range_error() {
        let (result, _) = run("function f(n) { return f(n + 1); } f(0)");
        assert_eq!(
            result.unwrap_err().to_string(),
            "Error: Maximum call stack size exceeded"
        );
        let caught = value(
            "function f() { f(); } try { f(); 'no' } catch (e) { e instanceof RangeError }",
        );
        assert_eq!(caught, "true");
    }

    fn failure(source: &str, limits: Limits) -> String {
        run_with(source, limits).0.unwrap_err().to_string()
    }

    #[test]
    fn oversized_strings_are_range_errors() {
        for source in [
            "'a'.repeat(2 ** 50).length",
            "'a'.padEnd(2 ** 40)",
            "'x'.padStart(1e12, 'ab')",
            "let s = 'ab'; while (true) s += s;",
            "let s = 'abcd'.repeat(1 << 20); `${s}${s}${s}${s}${s}`",
            "'a'.concat('b'.repeat(1 << 24))",
            "'a'.repeat(1 << 20).replaceAll('a', 'b'.repeat(32))",
            "Array(1 << 20).fill('x'.repeat(64)).join('')",
            "JSON.stringify(Array(1 << 20).fill('x'.repeat(64)))",
        ] {
            assert_eq!(
                failure(source, Limits::default()),
                "Error: Invalid string length",
                "{}",
                source
            );
        }
        let caught = value("try { 'a'.repeat(2 ** 50) } catch (e) { e instanceof RangeError }");
        assert_eq!(caught, "true");
    }

    #[test]
    fn oversized_arrays_are_range_errors() {
        for source in [
            "Array(2 ** 30)",
            "Array(4e9)",
            "const a = []; a.length = 2 ** 30;",
            "const a = []; a[4e9] = 1;",
            "Array.from({ length: 2 ** 40 })",
        ] {
            assert_eq!(
                failure(source, Limits::default()),
                "Error: Invalid array length",
                "{}",
                source
            );
        }

        let small = Limits {
            max_length: 1_000,
            ..Limits::default()
        };
        for source in [
            "let a = [1]; while (true) a.push(...a);",
            "let a = [1]; while (true) a = a.concat(a);",
            "let a = [1]; while (true) a = [...a, ...a];",
            "let a = [1]; while (true) a.unshift(...a);",
            "Array(600).fill(Array(600).fill(0)).flat()",
            "const a = Array(1000); a.push(1);",
        ] {
            assert_eq!(failure(source, small), "Error: Invalid array length", "{}", source);
        }
        assert_eq!(value("const a = Array(999); a.push(1); a.length"), "1000");
    }

    #[test]
    fn console_output_is_bounded() {
        let small = Limits {
            max_length: 1_000,
            ..Limits::default()
        };
        let (result, lines) = run_with("while (true) console.log('x'.repeat(100))", small);
        assert_eq!(
            result.unwrap_err().to_string(),
            "Error: Console output limit exceeded"
        );
        assert_eq!(lines.len(), 9);
    }

    #[test]
    fn deeply_nested_source_is_a_syntax_error() {
        for source in [
            format!("{}1{}", "(".repeat(40_000), ")".repeat(40_000)),
            format!("{}{}", "[".repeat(40_000), "]".repeat(40_000)),
            format!("{}{}", "{".repeat(40_000), "}".repeat(40_000)),
            format!("{}x", "!".repeat(40_000)),
            vec!["1"; 5_000].join(" + "),
            format!("a{}", ".b".repeat(5_000)),
            format!("let {}a{} = 1;", "[".repeat(5_000), "]".repeat(5_000)),
        ] {
            match run(&source).0 {
                Err(ScriptFault::Syntax(err)) => {
                    assert_eq!(err.message, "Expression too deeply nested")
                }
                other => panic!("expected a syntax error, got {:?}", other),
            }
        }
        assert_eq!(value(&format!("{}1{}", "(".repeat(100), ")".repeat(100))), "1");
        assert_eq!(value(&vec!["1"; 200].join(" + ")), "200");
    }

    #[test]
    fn deep_runtime_structures_are_range_errors() {
        for source in [
            "let a = []; for (let i = 0; i < 50000; i++) a = [a]; '' + a",
            "let o = {}; for (let i = 0; i < 50000; i++) o = { o }; JSON.stringify(o)",
        ] {
            assert_eq!(
                failure(source, Limits::default()),
                "Error: Maximum call stack size exceeded",
                "{}",
                source
            );
        }
    }

    #[test]
    fn scripts_cannot_reach_the_host() {
        let (result, _) = run("require('fs')");
        assert_eq!(result.unwrap_err().to_string(), "Error: require is not defined");
        assert_eq!(value("typeof process"), "undefined");
    }
}
