use crate::ast::Statement;
use crate::callable::{default_natives, NativeFunction};
use crate::error::LoxError;
use crate::interpreter::{Interpreter, RuntimeError};
use crate::loader::{base_dir, FsLoader, SourceLoader};
use crate::parser;
use crate::resolver::{self, ResolutionTable};
use crate::scanner;
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::Path;
use std::str;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Stops a run between top-level statements. Clones share the flag, so a
/// host thread can cancel a run in progress on another.
#[derive(Debug, Clone, Default)]
pub struct Cancellation {
    cancelled: Arc<AtomicBool>,
}

impl Cancellation {
    pub fn new() -> Cancellation {
        Cancellation::default()
    }
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Scan, parse and resolve `source` without running it.
pub fn compile(source: &[u8]) -> Result<(Vec<Statement>, ResolutionTable), LoxError> {
    let source = str::from_utf8(source)?;
    let tokens = scanner::scan_tokens(source)?;
    debug!(tokens = tokens.len(), "scanned");
    let statements = parser::parse(&tokens)?;
    debug!(statements = statements.len(), "parsed");
    let table = resolver::resolve(&statements)?;
    debug!(locals = table.len(), "resolved");
    Ok((statements, table))
}

/// The embedding entry point: interpreter state that persists across runs
/// plus the natives the host registered.
pub struct Lox {
    interpreter: Interpreter,
    natives: BTreeMap<String, NativeFunction>,
    host_loader: bool,
}

impl Lox {
    /// Writes to stdout and starts with `clock`, `sleep` and `randN`.
    pub fn new() -> Lox {
        Lox::empty().with_natives(default_natives())
    }
    /// No natives at all.
    pub fn empty() -> Lox {
        Lox {
            interpreter: Interpreter::new(Box::new(io::stdout())),
            natives: BTreeMap::new(),
            host_loader: false,
        }
    }
    pub fn with_output(mut self, output: Box<dyn Write>) -> Lox {
        self.set_output(output);
        self
    }
    /// Adds host natives; they are defined in the global scope before every
    /// run, replacing any global of the same name.
    pub fn with_natives(mut self, natives: BTreeMap<String, NativeFunction>) -> Lox {
        self.natives.extend(natives);
        self
    }
    /// Replaces the file system loader. `run_file` keeps this loader
    /// instead of switching to the script's directory.
    pub fn with_loader(mut self, loader: Box<dyn SourceLoader>) -> Lox {
        self.interpreter.set_loader(loader);
        self.host_loader = true;
        self
    }
    /// Redirects `print`. Returns the previous sink.
    pub fn set_output(&mut self, output: Box<dyn Write>) -> Box<dyn Write> {
        self.interpreter.set_output(output)
    }
    pub fn interpreter(&self) -> &Interpreter {
        &self.interpreter
    }
    pub fn run(&mut self, cancel: &Cancellation, source: &[u8]) -> Result<(), LoxError> {
        let (statements, table) = compile(source)?;
        self.interpreter.resolve(table);
        for native in self.natives.values() {
            self.interpreter.define_native(native);
        }
        let result = self.interpreter.interpret(cancel, &statements);
        self.interpreter.flush().map_err(RuntimeError::Output)?;
        result
    }
    /// Runs a script file. Unless the host installed its own loader, its
    /// `require` paths resolve against the script's directory.
    pub fn run_file<P: AsRef<Path>>(&mut self, path: P) -> Result<(), LoxError> {
        let path = path.as_ref();
        let source = fs::read(path).map_err(|source| LoxError::Io {
            path: path.display().to_string(),
            source,
        })?;
        if !self.host_loader {
            self.interpreter
                .set_loader(Box::new(FsLoader::new(base_dir(path))));
        }
        self.run(&Cancellation::new(), &source)
    }
    /// Reads `input` line by line until EOF or an empty line, running each
    /// line against the same state. Errors are reported on `console` and do
    /// not end the loop.
    pub fn run_prompt<R: BufRead, W: Write>(&mut self, input: R, mut console: W) -> io::Result<()> {
        let cancel = Cancellation::new();
        write!(console, "> ")?;
        console.flush()?;
        for line in input.lines() {
            let line = line?;
            if line.is_empty() {
                break;
            }
            if let Err(err) = self.run(&cancel, line.as_bytes()) {
                writeln!(console, "{}", err)?;
            }
            write!(console, "> ")?;
            console.flush()?;
        }
        Ok(())
    }
}

impl Default for Lox {
    fn default() -> Self {
        Lox::new()
    }
}

#[cfg(test)]
mod lox_tests {
    use super::{Cancellation, Lox};
    use crate::callable::{Callable, NativeFunction};
    use crate::error::LoxError;
    use crate::interpreter::RuntimeError;
    use crate::loader::MemoryLoader;
    use crate::output::CaptureOutput;
    use crate::value::Value;
    use pretty_assertions::assert_eq;
    use std::cell::Cell;
    use std::collections::BTreeMap;
    use std::env;
    use std::fs;
    use std::path::PathBuf;
    use std::process;
    use std::rc::Rc;

    fn lox() -> (Lox, CaptureOutput) {
        let output = CaptureOutput::new();
        (Lox::new().with_output(Box::new(output.clone())), output)
    }

    fn run(source: &str) -> String {
        let (mut lox, output) = lox();
        lox.run(&Cancellation::new(), source.as_bytes())
            .unwrap_or_else(|e| panic!("{}", e));
        output.contents()
    }

    fn run_err(source: &str) -> (LoxError, String) {
        let (mut lox, output) = lox();
        let err = lox
            .run(&Cancellation::new(), source.as_bytes())
            .unwrap_err();
        (err, output.contents())
    }

    #[test]
    fn arithmetic_and_strings() {
        assert_eq!(
            run("print 1 + 2 * 3; print (1 + 2) * 3; print 10 / 4; print \"a\" + \"b\"; print -3;"),
            "7\n9\n2.5\nab\n-3\n"
        );
    }

    #[test]
    fn truthiness_and_logic() {
        assert_eq!(
            run("if (0) print \"zero\"; if (\"\") print \"empty\"; if (nil) print \"nil\"; else print \"no\";
                 print nil or \"default\"; print false and 1; print !nil;"),
            "zero\nempty\nno\ndefault\nfalse\ntrue\n"
        );
    }

    #[test]
    fn equality() {
        assert_eq!(
            run("print nil == nil; print 1 == \"1\"; print \"a\" != \"a\"; fun f() {} print f == f;"),
            "true\nfalse\nfalse\ntrue\n"
        );
    }

    #[test]
    fn scope_shadowing() {
        assert_eq!(
            run("var a = \"outer\"; { var a = \"inner\"; print a; } print a;"),
            "inner\nouter\n"
        );
    }

    #[test]
    fn closures_capture_by_reference() {
        assert_eq!(
            run("fun makeCounter() {
                   var i = 0;
                   fun count() { i = i + 1; return i; }
                   return count;
                 }
                 var counter = makeCounter();
                 print counter(); print counter(); print counter();"),
            "1\n2\n3\n"
        );
    }

    #[test]
    fn closure_sees_outer_mutation() {
        assert_eq!(
            run("fun outer() {
                   var x = 1;
                   fun get() { return x; }
                   x = 2;
                   print get();
                   x = 3;
                   return get;
                 }
                 print outer()();"),
            "2\n3\n"
        );
    }

    #[test]
    fn resolution_is_static() {
        // The closure keeps seeing the global it resolved against even
        // after a same-named local is declared later in the block.
        assert_eq!(
            run("var a = \"global\";
                 {
                   fun show() { print a; }
                   show();
                   var a = \"block\";
                   show();
                 }"),
            "global\nglobal\n"
        );
    }

    #[test]
    fn return_unwinds_loops_and_blocks() {
        assert_eq!(
            run("fun find() {
                   var i = 0;
                   while (true) {
                     { if (i == 3) return i; }
                     i = i + 1;
                   }
                 }
                 print find();
                 fun nothing() { return; }
                 print nothing();
                 fun implicit() {}
                 print implicit();"),
            "3\nnil\nnil\n"
        );
    }

    #[test]
    fn for_loop() {
        assert_eq!(
            run("for (var i = 0; i < 3; i = i + 1) print i;"),
            "0\n1\n2\n"
        );
    }

    #[test]
    fn recursion() {
        assert_eq!(
            run("fun fib(n) { if (n < 2) return n; return fib(n - 1) + fib(n - 2); } print fib(15);"),
            "610\n"
        );
    }

    #[test]
    fn initializer_result_invariant() {
        assert_eq!(
            run("class A { init(x) { this.x = x; return 999; } }
                 var a = A(5);
                 print a.x;
                 print a;
                 print a.init(7);"),
            "5\nA instance\nA instance\n"
        );
    }

    #[test]
    fn late_binding_of_this() {
        assert_eq!(
            run("class Person {
                   init(name) { this.name = name; }
                   greet() { print \"hi \" + this.name; }
                 }
                 var alice = Person(\"alice\");
                 var bob = Person(\"bob\");
                 var greet = alice.greet;
                 bob.greet = greet;
                 bob.greet();
                 greet();"),
            "hi alice\nhi alice\n"
        );
    }

    #[test]
    fn methods_rebind_on_every_access() {
        assert_eq!(
            run("class A { m() {} } var a = A(); print a.m == a.m; var m = a.m; print m == m;"),
            "false\ntrue\n"
        );
    }

    #[test]
    fn fields_shadow_methods() {
        assert_eq!(
            run("class A { m() { return \"method\"; } }
                 var a = A();
                 print a.m();
                 a.m = \"field\";
                 print a.m;
                 print A().m();"),
            "method\nfield\nmethod\n"
        );
    }

    #[test]
    fn inheritance_and_super() {
        assert_eq!(
            run("class A {
                   init(n) { this.n = n; }
                   describe() { return \"A\" + this.n; }
                   base() { return \"base\"; }
                 }
                 class B < A {
                   init(n) { super.init(n + \"!\"); }
                   describe() { return \"B/\" + super.describe(); }
                 }
                 var b = B(\"x\");
                 print b.describe();
                 print b.base();
                 print B;"),
            "B/Ax!\nbase\nB\n"
        );
    }

    #[test]
    fn super_binds_to_current_instance() {
        assert_eq!(
            run("class A { who() { return this.name; } }
                 class B < A { who() { return \"B:\" + super.who(); } }
                 class C < B {}
                 var c = C();
                 c.name = \"c\";
                 print c.who();"),
            "B:c\n"
        );
    }

    #[test]
    fn undefined_identifier_diagnostics() {
        let (err, _) = run_err("print missing;");
        assert_eq!(err.to_string(), "[line 1] Undefined variable 'missing'.");

        let (err, _) = run_err("missing = 1;");
        assert!(matches!(
            err,
            LoxError::Runtime(RuntimeError::UndefinedVariable { .. })
        ));

        let (err, _) = run_err("class A {}\nvar a = A();\nprint a.nope;");
        assert_eq!(err.to_string(), "[line 3] Undefined property 'nope'.");

        let (err, _) = run_err("class A {}\nclass B < A { m() { return super.x(); } }\nB().m();");
        assert!(matches!(
            err,
            LoxError::Runtime(RuntimeError::UndefinedProperty { .. })
        ));

        let (err, _) = run_err("var x = 1;\n\nx.field = 2;");
        assert_eq!(
            err.to_string(),
            "[line 3] Only instances have properties, tried 'field' on number."
        );
    }

    #[test]
    fn operand_errors_name_operator_and_line() {
        let (err, output) = run_err("print 1;\nprint 1 + \"a\";\nprint 2;");
        assert_eq!(
            err.to_string(),
            "operation \"Plus\" at line 2: Operands must be two numbers or two strings."
        );
        // Effects before the failure are kept.
        assert_eq!(output, "1\n");

        let (err, _) = run_err("print -\"a\";");
        assert_eq!(
            err.to_string(),
            "operation \"Minus\" at line 1: Operand must be a number."
        );
        let (err, _) = run_err("print \"a\" < \"b\";");
        assert!(matches!(err, LoxError::Runtime(RuntimeError::Operand { .. })));
    }

    #[test]
    fn call_errors() {
        let (err, _) = run_err("fun f(a, b) {}\nf(1);");
        assert_eq!(err.to_string(), "[line 2] Expected 2 arguments but got 1.");
        let (err, _) = run_err("class A { init(x) {} } A();");
        assert!(matches!(err, LoxError::Runtime(RuntimeError::Arity { .. })));
        let (err, _) = run_err("\"text\"();");
        assert_eq!(
            err.to_string(),
            "[line 1] Can only call functions and classes, not string."
        );
        let (err, _) = run_err("var NotAClass = 1; class B < NotAClass {}");
        assert!(matches!(
            err,
            LoxError::Runtime(RuntimeError::SuperclassNotClass { .. })
        ));
    }

    #[test]
    fn static_errors_prevent_execution() {
        let (err, output) = run_err("print 1; return 2;");
        assert!(matches!(err, LoxError::Resolve(_)));
        assert!(err.is_static());
        assert_eq!(output, "");

        let (err, output) = run_err("print 1; print (;");
        assert!(matches!(err, LoxError::Parse(_)));
        assert_eq!(output, "");

        let (err, _) = run_err("print \"open;");
        assert!(matches!(err, LoxError::Scan(_)));

        let (mut lox, _) = lox();
        let err = lox.run(&Cancellation::new(), &[0xff, 0xfe]).unwrap_err();
        assert!(matches!(err, LoxError::Encoding(_)));
    }

    #[test]
    fn state_persists_between_runs() {
        let (mut lox, output) = lox();
        let cancel = Cancellation::new();
        lox.run(&cancel, b"var a = 1; fun add(x) { return a + x; }").unwrap();
        lox.run(&cancel, b"a = 10;").unwrap();
        lox.run(&cancel, b"print add(5);").unwrap();
        assert_eq!(output.contents(), "15\n");
    }

    #[test]
    fn output_is_redirectable_between_runs() {
        let (mut lox, first) = lox();
        let second = CaptureOutput::new();
        let cancel = Cancellation::new();
        lox.run(&cancel, b"print \"one\";").unwrap();
        lox.set_output(Box::new(second.clone()));
        lox.run(&cancel, b"print \"two\";").unwrap();
        assert_eq!(first.contents(), "one\n");
        assert_eq!(second.contents(), "two\n");
    }

    #[test]
    fn cancellation_stops_before_next_statement() {
        let output = CaptureOutput::new();
        let cancel = Cancellation::new();
        let trigger = cancel.clone();
        let mut natives = BTreeMap::new();
        natives.insert(
            "stop".to_string(),
            NativeFunction::new("stop", 0, move |_| {
                trigger.cancel();
                Ok(Value::Nil)
            }),
        );
        let mut lox = Lox::new()
            .with_output(Box::new(output.clone()))
            .with_natives(natives);
        let err = lox
            .run(&cancel, b"print 1; { stop(); print 2; } print 3;")
            .unwrap_err();
        assert!(matches!(err, LoxError::Cancelled));
        assert_eq!(output.contents(), "1\n2\n");
    }

    #[test]
    fn host_natives_are_merged_before_each_run() {
        let calls = Rc::new(Cell::new(0));
        let counter = Rc::clone(&calls);
        let mut natives = BTreeMap::new();
        natives.insert(
            "double".to_string(),
            NativeFunction::new("double", 1, move |args| {
                counter.set(counter.get() + 1);
                match &args[0] {
                    Value::Number(n) => Ok(Value::Number(n * 2.0)),
                    _ => Err("double() needs a number".to_string()),
                }
            }),
        );
        let output = CaptureOutput::new();
        let mut lox = Lox::empty()
            .with_output(Box::new(output.clone()))
            .with_natives(natives);
        let cancel = Cancellation::new();
        lox.run(&cancel, b"print double(21); print double;").unwrap();
        // A script may shadow a native; the next run restores it.
        lox.run(&cancel, b"var double = 1;").unwrap();
        lox.run(&cancel, b"print double(2);").unwrap();
        assert_eq!(output.contents(), "42\n<native fn>\n4\n");
        assert_eq!(calls.get(), 2);

        let err = lox.run(&cancel, b"double(\"x\");").unwrap_err();
        assert_eq!(
            err.to_string(),
            "native function 'double': double() needs a number"
        );
        let err = lox.run(&cancel, b"clock();").unwrap_err();
        assert!(matches!(
            err,
            LoxError::Runtime(RuntimeError::UndefinedVariable { .. })
        ));
    }

    #[test]
    fn default_natives_are_registered() {
        assert_eq!(
            run("print clock() > 0; var r = randN(10); print r >= 0 and r < 10; print sleep(1); print randN;"),
            "true\ntrue\nnil\n<native fn>\n"
        );
        let (err, _) = run_err("randN(0);");
        assert!(matches!(err, LoxError::Runtime(RuntimeError::Native { .. })));
    }

    #[test]
    fn deterministic_without_natives_that_vary() {
        let source = "class P { init(n) { this.n = n; } } var total = 0;
                      for (var i = 0; i < 20; i = i + 1) total = total + P(i).n;
                      print total;";
        assert_eq!(run(source), run(source));
    }

    #[test]
    fn host_can_inspect_globals() {
        let (mut lox, output) = lox();
        lox.run(
            &Cancellation::new(),
            b"class A { init() {} } class B < A {} var b = B(); fun f() {}",
        )
        .unwrap();
        let globals = lox.interpreter().globals();
        assert!(globals.is_global());
        match globals.get("b") {
            Some(Value::Instance(instance)) => {
                let class = instance.class();
                assert_eq!(class.name(), "B");
                assert_eq!(class.superclass().map(|c| c.name()), Some("A"));
                assert_eq!(class.arity(), 0);
                let init = class.find_method("init").unwrap();
                assert!(init.is_initializer());
                assert!(init.closure().same(globals));
            }
            other => panic!("unexpected {:?}", other),
        }
        match globals.get("f") {
            Some(Value::Callable(Callable::Function(function))) => {
                assert!(!function.is_initializer());
                assert!(function.closure().same(globals));
            }
            other => panic!("unexpected {:?}", other),
        }
        output.clear();
        lox.run(&Cancellation::new(), b"print b;").unwrap();
        assert_eq!(output.to_string(), "B instance\n");
    }

    fn with_library(files: &[(&str, &str)]) -> (Lox, CaptureOutput) {
        let loader = files
            .iter()
            .fold(MemoryLoader::new(), |loader, (path, source)| {
                loader.with(path, source)
            });
        let output = CaptureOutput::new();
        let lox = Lox::new()
            .with_output(Box::new(output.clone()))
            .with_loader(Box::new(loader));
        (lox, output)
    }

    #[test]
    fn require_shares_global_scope() {
        let (mut lox, output) = with_library(&[(
            "lib",
            "var greeting = \"hello\"; fun helper(name) { return greeting + \" \" + name; }",
        )]);
        lox.run(
            &Cancellation::new(),
            b"require \"lib\"; print helper(\"world\"); greeting = \"bye\"; print helper(\"now\");",
        )
        .unwrap();
        assert_eq!(output.contents(), "hello world\nbye now\n");
    }

    #[test]
    fn require_inside_a_block_defines_globals() {
        let (mut lox, output) = with_library(&[("lib", "var fromLib = 1;")]);
        lox.run(
            &Cancellation::new(),
            b"{ var fromLib = \"local\"; require \"lib\"; print fromLib; } print fromLib;",
        )
        .unwrap();
        assert_eq!(output.contents(), "local\n1\n");
    }

    #[test]
    fn require_errors() {
        let (mut lox, _) = with_library(&[
            ("a", "require \"b\";"),
            ("b", "require \"a\";"),
            ("broken", "var = ;"),
        ]);
        let cancel = Cancellation::new();
        let err = lox.run(&cancel, b"require \"a\";").unwrap_err();
        assert!(err.to_string().contains("cyclic require"), "{}", err);

        let err = lox.run(&cancel, b"\nrequire \"broken\";").unwrap_err();
        match err {
            LoxError::Runtime(RuntimeError::Require { path, line, source }) => {
                assert_eq!(path, "broken");
                assert_eq!(line, 2);
                assert!(matches!(*source, LoxError::Parse(_)));
            }
            other => panic!("unexpected {:?}", other),
        }

        let err = lox.run(&cancel, b"require \"missing\";").unwrap_err();
        assert!(err.to_string().starts_with("[line 1] require \"missing\": reading missing:"));
    }

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = env::temp_dir().join(format!("embedlox-{}-{}", name, process::id()));
        fs::create_dir_all(dir.join("lib")).unwrap();
        dir
    }

    #[test]
    fn run_file_keeps_host_loader() {
        let dir = scratch_dir("host-loader");
        let script = dir.join("main.lox");
        fs::write(&script, "require \"lib\"; print fromLib;").unwrap();
        let output = CaptureOutput::new();
        let mut lox = Lox::new()
            .with_output(Box::new(output.clone()))
            .with_loader(Box::new(MemoryLoader::new().with("lib", "var fromLib = 1;")));
        let result = lox.run_file(&script);
        fs::remove_dir_all(&dir).unwrap();
        result.unwrap();
        assert_eq!(output.contents(), "1\n");
    }

    #[test]
    fn run_file_requires_relative_to_script() {
        let dir = scratch_dir("relative");
        fs::write(dir.join("main.lox"), "require \"lib/outer\"; print outer + inner;").unwrap();
        // Nested requires resolve against the top-level script's directory.
        fs::write(dir.join("lib/outer.lox"), "require \"lib/inner\"; var outer = \"o\";").unwrap();
        fs::write(dir.join("lib/inner.lox"), "var inner = \"i\";").unwrap();
        let output = CaptureOutput::new();
        let mut lox = Lox::new().with_output(Box::new(output.clone()));
        let result = lox.run_file(dir.join("main.lox"));
        fs::remove_dir_all(&dir).unwrap();
        result.unwrap();
        assert_eq!(output.contents(), "oi\n");
    }

    #[test]
    fn prompt_reports_errors_and_continues() {
        let (mut lox, output) = lox();
        let mut console = Vec::new();
        let input = "var a = 1;\nprint b;\nprint a + 1;\n\nprint \"never\";\n";
        lox.run_prompt(input.as_bytes(), &mut console).unwrap();
        assert_eq!(output.contents(), "2\n");
        assert_eq!(
            String::from_utf8(console).unwrap(),
            "> > [line 1] Undefined variable 'b'.\n> > "
        );
    }
}
