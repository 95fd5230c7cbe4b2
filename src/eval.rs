//! Evaluation: the per-file [`Context`] namespace, the pluggable
//! [`Evaluator`] seam, and [`ScriptEvaluator`], a tree-walking interpreter
//! for the embedded language with explicit dynamic scoping. Identifier
//! resolution walks the block-scope chain innermost-out and falls back to
//! the context map; `let` binds locally to the render, while plain
//! assignment to an unbound name writes the context, making the key visible
//! to later code regions in the same file and to derived contexts of
//! subsequent renders.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::compile::Program;
use crate::script::{self, BinOp, Expr, Stmt, Target, UnOp};
use crate::value::Value;

/// The context key holding the source file path.
pub const INPUT_PATH: &str = "input_path";

/// The context key holding the destination file path. Transformers may
/// rewrite it; the synchronizer writes to the post-pipeline value.
pub const OUTPUT_PATH: &str = "output_path";

/// The context key holding the raw source text.
pub const CONTENT: &str = "content";

/// The dynamic, mutable namespace exposed to one file's render: build
/// metadata, extender-registered functions, and whatever embedded code puts
/// there.
#[derive(Clone, Debug, Default)]
pub struct Context {
    vars: BTreeMap<String, Value>,
}

impl Context {
    /// Constructs the context for a top-level file render.
    pub fn new(input_path: &Path, output_path: &Path, content: String) -> Context {
        let mut ctx = Context::default();
        ctx.set(INPUT_PATH, Value::from(input_path.to_string_lossy().into_owned()));
        ctx.set(OUTPUT_PATH, Value::from(output_path.to_string_lossy().into_owned()));
        ctx.set(CONTENT, Value::from(content));
        ctx
    }

    /// Derives the context for a nested render: a shallow copy of this
    /// context's keys with the path and content keys overwritten. List and
    /// object values stay shared with the caller; top-level additions are
    /// never written back.
    pub fn derive(&self, input_path: &Path, output_path: &Path, content: String) -> Context {
        let mut derived = self.clone();
        derived.set(INPUT_PATH, Value::from(input_path.to_string_lossy().into_owned()));
        derived.set(OUTPUT_PATH, Value::from(output_path.to_string_lossy().into_owned()));
        derived.set(CONTENT, Value::from(content));
        derived
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.vars.get(name).cloned()
    }

    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.vars.insert(name.into(), value);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    /// Merges `entries` into the context, overriding existing keys.
    pub fn merge(&mut self, entries: BTreeMap<String, Value>) {
        self.vars.extend(entries);
    }

    fn path_key(&self, key: &'static str) -> Result<PathBuf> {
        match self.vars.get(key) {
            Some(Value::String(s)) => Ok(PathBuf::from(s)),
            _ => Err(Error::MissingKey(key)),
        }
    }

    /// The source path of the file being rendered.
    pub fn input_path(&self) -> Result<PathBuf> {
        self.path_key(INPUT_PATH)
    }

    /// The destination path of the file being rendered.
    pub fn output_path(&self) -> Result<PathBuf> {
        self.path_key(OUTPUT_PATH)
    }

    /// Rewrites the destination path. Transformers may change the file name
    /// or extension, never the directory.
    pub fn set_output_path(&mut self, path: &Path) {
        self.set(OUTPUT_PATH, Value::from(path.to_string_lossy().into_owned()));
    }

    /// The raw source text of the file being rendered.
    pub fn content(&self) -> Result<String> {
        match self.vars.get(CONTENT) {
            Some(Value::String(s)) => Ok(s.clone()),
            _ => Err(Error::MissingKey(CONTENT)),
        }
    }
}

/// The pluggable evaluation seam: runs a compiled program against a context
/// and produces the file's evaluated output. The default implementation is
/// [`ScriptEvaluator`]; embedded code runs with full host privileges, so a
/// sandboxed implementation can be substituted here.
pub trait Evaluator {
    fn run(&self, program: &Program, ctx: &mut Context) -> Result<String>;
}

/// The default [`Evaluator`]: parses the program text and interprets it.
pub struct ScriptEvaluator;

impl Evaluator for ScriptEvaluator {
    fn run(&self, program: &Program, ctx: &mut Context) -> Result<String> {
        interpret(program, ctx)
    }
}

/// Parses and interprets `program` against `ctx`, returning the output
/// buffer. Any failure raised while the program runs propagates.
pub fn interpret(program: &Program, ctx: &mut Context) -> Result<String> {
    let statements = script::parse(&program.source)?;
    let mut interp = Interp {
        ctx,
        scopes: vec![BTreeMap::new()],
        out: String::new(),
    };
    match interp.exec_all(&statements)? {
        Flow::Normal => Ok(interp.out),
        Flow::Break => Err(Error::OutsideLoop("break")),
        Flow::Continue => Err(Error::OutsideLoop("continue")),
    }
}

/// Non-error control flow escaping a statement.
enum Flow {
    Normal,
    Break,
    Continue,
}

struct Interp<'a> {
    ctx: &'a mut Context,
    /// Block scopes for `let` bindings, innermost last. The base scope lives
    /// for the whole render.
    scopes: Vec<BTreeMap<String, Value>>,
    out: String,
}

impl Interp<'_> {
    fn exec_all(&mut self, statements: &[Stmt]) -> Result<Flow> {
        for statement in statements {
            match self.exec(statement)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_scoped(&mut self, statements: &[Stmt]) -> Result<Flow> {
        self.scopes.push(BTreeMap::new());
        let flow = self.exec_all(statements);
        self.scopes.pop();
        flow
    }

    fn exec(&mut self, statement: &Stmt) -> Result<Flow> {
        match statement {
            Stmt::Let(name, expr) => {
                let value = self.eval(expr)?;
                self.bind(name, value);
            }
            Stmt::Assign(target, expr) => {
                let value = self.eval(expr)?;
                self.assign(target, value)?;
            }
            Stmt::Emit(expr) => {
                let value = self.eval(expr)?;
                self.out.push_str(&value.to_string());
            }
            Stmt::If(condition, then, otherwise) => {
                let branch = if self.eval(condition)?.truthy() {
                    then
                } else {
                    otherwise
                };
                return self.exec_scoped(branch);
            }
            Stmt::For(var, iter, body) => {
                let items = self.iterable(iter)?;
                for item in items {
                    self.scopes.push(BTreeMap::new());
                    self.bind(var, item);
                    let flow = self.exec_all(body);
                    self.scopes.pop();
                    match flow? {
                        Flow::Normal | Flow::Continue => {}
                        Flow::Break => break,
                    }
                }
            }
            Stmt::While(condition, body) => {
                while self.eval(condition)?.truthy() {
                    match self.exec_scoped(body)? {
                        Flow::Normal | Flow::Continue => {}
                        Flow::Break => break,
                    }
                }
            }
            Stmt::Break => return Ok(Flow::Break),
            Stmt::Continue => return Ok(Flow::Continue),
            Stmt::Expr(expr) => {
                self.eval(expr)?;
            }
        }
        Ok(Flow::Normal)
    }

    /// Binds a name in the innermost block scope. The base scope always
    /// exists, so this cannot miss.
    fn bind(&mut self, name: &str, value: Value) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_owned(), value);
        }
    }

    fn iterable(&mut self, iter: &Expr) -> Result<Vec<Value>> {
        match self.eval(iter)? {
            Value::List(items) => Ok(items.borrow().clone()),
            // Objects iterate over their keys, in key order.
            Value::Object(map) => Ok(map
                .borrow()
                .keys()
                .map(|key| Value::from(key.clone()))
                .collect()),
            Value::String(s) => Ok(s.chars().map(|c| Value::from(c.to_string())).collect()),
            other => Err(Error::Kind {
                wanted: "list, object, or string",
                found: other.kind(),
            }),
        }
    }

    fn lookup(&self, name: &str) -> Result<Value> {
        for scope in self.scopes.iter().rev() {
            if let Some(value) = scope.get(name) {
                return Ok(value.clone());
            }
        }
        self.ctx
            .get(name)
            .ok_or_else(|| Error::Undefined(name.to_owned()))
    }

    fn assign(&mut self, target: &Target, value: Value) -> Result<()> {
        match target {
            Target::Name(name) => {
                for scope in self.scopes.iter_mut().rev() {
                    if let Some(slot) = scope.get_mut(name) {
                        *slot = value;
                        return Ok(());
                    }
                }
                // No local binding: the assignment writes the context.
                self.ctx.set(name.clone(), value);
                Ok(())
            }
            Target::Member(base, name) => match self.eval(base)? {
                Value::Object(map) => {
                    map.borrow_mut().insert(name.clone(), value);
                    Ok(())
                }
                other => Err(Error::Kind {
                    wanted: "object",
                    found: other.kind(),
                }),
            },
            Target::Index(base, index) => {
                let index = self.eval(index)?;
                match self.eval(base)? {
                    Value::List(items) => {
                        let i = self.index_of(&index, items.borrow().len())?;
                        items.borrow_mut()[i] = value;
                        Ok(())
                    }
                    Value::Object(map) => match index {
                        Value::String(key) => {
                            map.borrow_mut().insert(key, value);
                            Ok(())
                        }
                        other => Err(Error::Kind {
                            wanted: "string",
                            found: other.kind(),
                        }),
                    },
                    other => Err(Error::Kind {
                        wanted: "list or object",
                        found: other.kind(),
                    }),
                }
            }
        }
    }

    fn index_of(&self, index: &Value, len: usize) -> Result<usize> {
        match index {
            Value::Number(n) => {
                let i = *n as i64;
                if i < 0 || i as usize >= len {
                    Err(Error::Index { index: i, len })
                } else {
                    Ok(i as usize)
                }
            }
            other => Err(Error::Kind {
                wanted: "number",
                found: other.kind(),
            }),
        }
    }

    fn eval(&mut self, expr: &Expr) -> Result<Value> {
        match expr {
            Expr::Null => Ok(Value::Null),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Number(n) => Ok(Value::Number(*n)),
            Expr::Str(s) => Ok(Value::from(s.clone())),
            Expr::Name(name) => self.lookup(name),
            Expr::List(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.eval(item)?);
                }
                Ok(Value::list(values))
            }
            Expr::Object(entries) => {
                let mut map = BTreeMap::new();
                for (key, value) in entries {
                    map.insert(key.clone(), self.eval(value)?);
                }
                Ok(Value::object(map))
            }
            Expr::Unary(op, operand) => {
                let value = self.eval(operand)?;
                match op {
                    UnOp::Not => Ok(Value::Bool(!value.truthy())),
                    UnOp::Neg => match value {
                        Value::Number(n) => Ok(Value::Number(-n)),
                        other => Err(Error::Kind {
                            wanted: "number",
                            found: other.kind(),
                        }),
                    },
                }
            }
            Expr::Binary(BinOp::And, left, right) => {
                let left = self.eval(left)?;
                if left.truthy() {
                    self.eval(right)
                } else {
                    Ok(left)
                }
            }
            Expr::Binary(BinOp::Or, left, right) => {
                let left = self.eval(left)?;
                if left.truthy() {
                    Ok(left)
                } else {
                    self.eval(right)
                }
            }
            Expr::Binary(op, left, right) => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                self.binary(*op, left, right)
            }
            Expr::Member(base, name) => match self.eval(base)? {
                Value::Object(map) => {
                    Ok(map.borrow().get(name).cloned().unwrap_or(Value::Null))
                }
                other => Err(Error::Kind {
                    wanted: "object",
                    found: other.kind(),
                }),
            },
            Expr::Index(base, index) => {
                let index = self.eval(index)?;
                match self.eval(base)? {
                    Value::List(items) => {
                        let items = items.borrow();
                        let i = self.index_of(&index, items.len())?;
                        Ok(items[i].clone())
                    }
                    Value::Object(map) => match index {
                        Value::String(key) => {
                            Ok(map.borrow().get(&key).cloned().unwrap_or(Value::Null))
                        }
                        other => Err(Error::Kind {
                            wanted: "string",
                            found: other.kind(),
                        }),
                    },
                    other => Err(Error::Kind {
                        wanted: "list or object",
                        found: other.kind(),
                    }),
                }
            }
            Expr::Call(callee, args) => {
                let callee = self.eval(callee)?;
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.eval(arg)?);
                }
                match callee {
                    Value::Function(_, f) => f(self.ctx, &values),
                    other => Err(Error::NotCallable(other.kind())),
                }
            }
        }
    }

    fn binary(&self, op: BinOp, left: Value, right: Value) -> Result<Value> {
        match op {
            BinOp::Add => match (&left, &right) {
                (Value::Number(a), Value::Number(b)) => Ok(Value::Number(a + b)),
                (Value::String(_), _) | (_, Value::String(_)) => {
                    Ok(Value::from(format!("{}{}", left, right)))
                }
                (Value::Number(_), other) | (other, _) => Err(Error::Kind {
                    wanted: "number or string",
                    found: other.kind(),
                }),
            },
            BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Rem => match (&left, &right) {
                (Value::Number(a), Value::Number(b)) => Ok(Value::Number(match op {
                    BinOp::Sub => a - b,
                    BinOp::Mul => a * b,
                    BinOp::Div => a / b,
                    _ => a % b,
                })),
                (Value::Number(_), other) | (other, _) => Err(Error::Kind {
                    wanted: "number",
                    found: other.kind(),
                }),
            },
            BinOp::Eq => Ok(Value::Bool(left == right)),
            BinOp::Ne => Ok(Value::Bool(left != right)),
            BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
                let ordering = match (&left, &right) {
                    (Value::Number(a), Value::Number(b)) => a.partial_cmp(b),
                    (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
                    _ => {
                        return Err(Error::Kind {
                            wanted: "two numbers or two strings",
                            found: right.kind(),
                        })
                    }
                };
                let holds = match ordering {
                    None => false,
                    Some(ordering) => match op {
                        BinOp::Lt => ordering.is_lt(),
                        BinOp::Le => ordering.is_le(),
                        BinOp::Gt => ordering.is_gt(),
                        _ => ordering.is_ge(),
                    },
                };
                Ok(Value::Bool(holds))
            }
            // Short-circuit operators are handled before operand evaluation.
            BinOp::And | BinOp::Or => unreachable!(),
        }
    }
}

/// Represents the result of an evaluation operation.
pub type Result<T> = std::result::Result<T, Error>;

/// Represents an error raised while a program runs.
#[derive(Debug)]
pub enum Error {
    /// Returned when the program text fails to parse. Compilation never
    /// detects malformed code regions; they surface here.
    Parse(script::Error),

    /// Returned when an identifier resolves in no scope and not in the
    /// context.
    Undefined(String),

    /// Returned when an operation receives a value of the wrong kind.
    Kind {
        wanted: &'static str,
        found: &'static str,
    },

    /// Returned when a non-function value is called.
    NotCallable(&'static str),

    /// Returned when a builtin receives the wrong arguments.
    Arity {
        name: &'static str,
        wanted: &'static str,
    },

    /// Returned when a list index is out of range.
    Index { index: i64, len: usize },

    /// Returned when a required context key is missing or has the wrong
    /// shape.
    MissingKey(&'static str),

    /// Returned when `break` or `continue` executes outside a loop.
    OutsideLoop(&'static str),

    /// Returned when a builtin fails: a missing include target, malformed
    /// metadata, an I/O problem, or a failure inside a nested render.
    Helper {
        name: &'static str,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl Error {
    /// Wraps a failure inside the named builtin. This is the conversion
    /// boundary between builtin implementations and the interpreter.
    pub fn helper(name: &'static str, source: impl std::error::Error + Send + Sync + 'static) -> Error {
        Error::Helper {
            name,
            source: Box::new(source),
        }
    }
}

impl fmt::Display for Error {
    /// Displays an [`Error`] as human-readable text.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Parse(err) => write!(f, "parsing program: {}", err),
            Error::Undefined(name) => write!(f, "undefined identifier `{}`", name),
            Error::Kind { wanted, found } => {
                write!(f, "wanted {}, found {}", wanted, found)
            }
            Error::NotCallable(kind) => write!(f, "cannot call a {}", kind),
            Error::Arity { name, wanted } => {
                write!(f, "`{}` takes {}", name, wanted)
            }
            Error::Index { index, len } => {
                write!(f, "index {} out of range for list of length {}", index, len)
            }
            Error::MissingKey(key) => write!(f, "context key `{}` is missing", key),
            Error::OutsideLoop(keyword) => {
                write!(f, "`{}` outside of a loop", keyword)
            }
            Error::Helper { name, source } => write!(f, "in `{}`: {}", name, source),
        }
    }
}

impl std::error::Error for Error {
    /// Implements the [`std::error::Error`] trait for [`Error`].
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Parse(err) => Some(err),
            Error::Helper { source, .. } => Some(&**source),
            _ => None,
        }
    }
}

impl From<script::Error> for Error {
    /// Converts a [`script::Error`] into an [`Error`]. This allows us to use
    /// the `?` operator when parsing program text.
    fn from(err: script::Error) -> Error {
        Error::Parse(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::compile;
    use crate::token::tokenize;
    use std::path::Path;

    fn context() -> Context {
        Context::new(Path::new("src/page.html"), Path::new("out/page.html"), String::new())
    }

    fn render(input: &str, ctx: &mut Context) -> Result<String> {
        let program = compile(&tokenize(input, "<%", "%>"));
        interpret(&program, ctx)
    }

    #[test]
    fn test_no_delimiters_renders_verbatim() {
        let input = "no code here, just text.\n";
        assert_eq!(render(input, &mut context()).unwrap(), input);
    }

    #[test]
    fn test_expressions_append_in_order() {
        assert_eq!(
            render("<%= \"a\" %><%= \"b\" %>", &mut context()).unwrap(),
            "ab"
        );
    }

    #[test]
    fn test_loop_repeats_literal() {
        let mut ctx = context();
        assert_eq!(
            render("<% i = 0 %><% while i < 3 { %>x<% i = i + 1 %><% } %>", &mut ctx).unwrap(),
            "xxx"
        );
    }

    #[test]
    fn test_literal_with_quotes_backslashes_and_newlines() {
        let input = "a \"quoted\" \\ backslash\nnext line";
        assert_eq!(render(input, &mut context()).unwrap(), input);
    }

    #[test]
    fn test_statement_key_visible_to_later_expression() {
        let mut ctx = context();
        assert_eq!(
            render("<% title = \"home\" %><%= title %>", &mut ctx).unwrap(),
            "home"
        );
        // The mutation also lands in the context for subsequent renders.
        assert_eq!(ctx.get("title"), Some(Value::from("home")));
    }

    #[test]
    fn test_let_binding_stays_local_to_the_render() {
        let mut ctx = context();
        assert_eq!(render("<% let x = 1 %><%= x %>", &mut ctx).unwrap(), "1");
        assert_eq!(ctx.get("x"), None);
    }

    #[test]
    fn test_context_keys_resolve_as_identifiers() {
        let mut ctx = context();
        ctx.set("name", Value::from("reader"));
        assert_eq!(
            render("hello <%= name %>", &mut ctx).unwrap(),
            "hello reader"
        );
    }

    #[test]
    fn test_if_else() {
        let input = "<% if flag { %>yes<% } else { %>no<% } %>";
        let mut ctx = context();
        ctx.set("flag", Value::from(true));
        assert_eq!(render(input, &mut ctx).unwrap(), "yes");
        ctx.set("flag", Value::from(false));
        assert_eq!(render(input, &mut ctx).unwrap(), "no");
    }

    #[test]
    fn test_for_over_list() {
        let mut ctx = context();
        ctx.set(
            "posts",
            Value::list(vec![Value::from("a"), Value::from("b")]),
        );
        assert_eq!(
            render("<% for p in posts { %><%= p %>;<% } %>", &mut ctx).unwrap(),
            "a;b;"
        );
    }

    #[test]
    fn test_member_access_and_mutation() {
        let mut ctx = context();
        ctx.set(
            "page",
            Value::object([("title".to_owned(), Value::from("old"))].into_iter().collect()),
        );
        assert_eq!(
            render("<% page.title = \"new\" %><%= page.title %>", &mut ctx).unwrap(),
            "new"
        );
    }

    #[test]
    fn test_missing_member_is_null() {
        let mut ctx = context();
        ctx.set("page", Value::object(BTreeMap::new()));
        assert_eq!(render("[<%= page.title %>]", &mut ctx).unwrap(), "[]");
    }

    #[test]
    fn test_undefined_identifier_is_an_error() {
        match render("<%= nonsense %>", &mut context()) {
            Err(Error::Undefined(name)) => assert_eq!(name, "nonsense"),
            other => panic!("wanted undefined-identifier error, found {:?}", other),
        }
    }

    #[test]
    fn test_malformed_region_surfaces_as_parse_error() {
        match render("<% for { %>", &mut context()) {
            Err(Error::Parse(_)) => {}
            other => panic!("wanted parse error, found {:?}", other),
        }
    }

    #[test]
    fn test_arithmetic_and_concatenation() {
        assert_eq!(render("<%= 2 * 3 + 1 %>", &mut context()).unwrap(), "7");
        assert_eq!(
            render("<%= \"n=\" + 4 %>", &mut context()).unwrap(),
            "n=4"
        );
    }

    #[test]
    fn test_builtin_call() {
        let mut ctx = context();
        ctx.set(
            "shout",
            Value::function("shout", |_, args| match args {
                [Value::String(s)] => Ok(Value::from(s.to_uppercase())),
                _ => Err(Error::Arity {
                    name: "shout",
                    wanted: "one string",
                }),
            }),
        );
        assert_eq!(render("<%= shout(\"hi\") %>", &mut ctx).unwrap(), "HI");
    }

    #[test]
    fn test_break_and_continue() {
        let mut ctx = context();
        let input = "<% for c in \"abcd\" { if c == \"b\" { continue } if c == \"d\" { break } %><%= c %><% } %>";
        assert_eq!(render(input, &mut ctx).unwrap(), "ac");
    }
}
