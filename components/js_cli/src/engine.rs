//! Arithmetic reference engine
//!
//! Programs are `;`-separated expressions over numbers and strings with
//! `+ - * / %`, unary signs, parentheses and `//` line comments. The value of a
//! program is the value of its last expression. Host functions reach server
//! state through the bound [`CapabilityHandle`]:
//!
//! | call | effect |
//! |---|---|
//! | `print(a, b, ...)` | writes the values space-separated on one line |
//! | `exit(code)` | sets the process exit code |
//! | `argv(i)` | the i-th user argument, or `undefined` |
//! | `throw(message)` | throws an `Error` |

use async_runtime::LoopScope;
use core_types::{ErrorKind, JsError, Value};
use server::{CapabilityHandle, Principal, ScriptEngine, ScriptSource};
use std::io::{self, Write};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    Punct(char),
    End,
}

fn syntax_error(message: impl Into<String>) -> JsError {
    JsError::new(ErrorKind::SyntaxError, message)
}

fn unexpected(token: &Token) -> JsError {
    match token {
        Token::End => syntax_error("Unexpected end of input"),
        Token::Number(n) => syntax_error(format!("Unexpected number {}", n)),
        Token::Str(_) => syntax_error("Unexpected string"),
        Token::Ident(name) => syntax_error(format!("Unexpected identifier '{}'", name)),
        Token::Punct(c) => syntax_error(format!("Unexpected token '{}'", c)),
    }
}

fn tokenize(source: &str) -> Result<Vec<Token>, JsError> {
    let mut tokens = Vec::new();
    let mut chars = source.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '0'..='9' | '.' => {
                let mut text = String::new();
                while let Some(&d) = chars.peek() {
                    if !(d.is_ascii_digit() || d == '.') {
                        break;
                    }
                    text.push(d);
                    chars.next();
                }
                let n = text
                    .parse::<f64>()
                    .map_err(|_| syntax_error(format!("Invalid number '{}'", text)))?;
                tokens.push(Token::Number(n));
            }
            '"' | '\'' => {
                chars.next();
                let mut value = String::new();
                loop {
                    match chars.next() {
                        Some(ch) if ch == c => break,
                        Some('\\') => match chars.next() {
                            Some('n') => value.push('\n'),
                            Some('t') => value.push('\t'),
                            Some(escaped) => value.push(escaped),
                            None => return Err(syntax_error("Invalid or unexpected token")),
                        },
                        Some(ch) => value.push(ch),
                        None => return Err(syntax_error("Invalid or unexpected token")),
                    }
                }
                tokens.push(Token::Str(value));
            }
            c if c.is_alphabetic() || c == '_' || c == '$' => {
                let mut name = String::new();
                while let Some(&d) = chars.peek() {
                    if !(d.is_alphanumeric() || d == '_' || d == '$') {
                        break;
                    }
                    name.push(d);
                    chars.next();
                }
                tokens.push(Token::Ident(name));
            }
            '/' => {
                chars.next();
                if chars.peek() == Some(&'/') {
                    while chars.next_if(|&d| d != '\n').is_some() {}
                } else {
                    tokens.push(Token::Punct('/'));
                }
            }
            '+' | '-' | '*' | '%' | '(' | ')' | ',' | ';' => {
                chars.next();
                tokens.push(Token::Punct(c));
            }
            other => return Err(syntax_error(format!("Invalid or unexpected token '{}'", other))),
        }
    }

    tokens.push(Token::End);
    Ok(tokens)
}

fn to_number(value: &Value) -> f64 {
    match value {
        Value::Undefined => f64::NAN,
        Value::Null => 0.0,
        Value::Boolean(b) => f64::from(u8::from(*b)),
        Value::Smi(n) => f64::from(*n),
        Value::Double(n) => *n,
        Value::String(s) if s.trim().is_empty() => 0.0,
        Value::String(s) => s.trim().parse().unwrap_or(f64::NAN),
    }
}

fn add(left: &Value, right: &Value) -> Value {
    match (left, right) {
        (Value::String(_), _) | (_, Value::String(_)) => Value::String(format!("{}{}", left, right)),
        _ => Value::number(to_number(left) + to_number(right)),
    }
}

/// Recursive-descent evaluator over one token stream.
struct Evaluator<'a> {
    tokens: Vec<Token>,
    pos: usize,
    engine: &'a mut ArithmeticEngine,
}

impl Evaluator<'_> {
    // The stream always ends with `Token::End`.
    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if token != Token::End {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, punct: char) -> bool {
        if *self.peek() == Token::Punct(punct) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, punct: char) -> Result<(), JsError> {
        if self.eat(punct) {
            Ok(())
        } else {
            Err(unexpected(self.peek()))
        }
    }

    fn program(&mut self) -> Result<Value, JsError> {
        let mut last = Value::Undefined;
        loop {
            while self.eat(';') {}
            if *self.peek() == Token::End {
                return Ok(last);
            }
            last = self.additive()?;
            match self.peek() {
                Token::Punct(';') | Token::End => {}
                other => return Err(unexpected(other)),
            }
        }
    }

    fn additive(&mut self) -> Result<Value, JsError> {
        let mut left = self.multiplicative()?;
        loop {
            if self.eat('+') {
                let right = self.multiplicative()?;
                left = add(&left, &right);
            } else if self.eat('-') {
                let right = self.multiplicative()?;
                left = Value::number(to_number(&left) - to_number(&right));
            } else {
                return Ok(left);
            }
        }
    }

    fn multiplicative(&mut self) -> Result<Value, JsError> {
        let mut left = self.unary()?;
        loop {
            let op = match self.peek() {
                Token::Punct(c @ ('*' | '/' | '%')) => *c,
                _ => return Ok(left),
            };
            self.pos += 1;
            let (a, b) = (to_number(&left), to_number(&self.unary()?));
            left = Value::number(match op {
                '*' => a * b,
                '/' => a / b,
                _ => a % b,
            });
        }
    }

    fn unary(&mut self) -> Result<Value, JsError> {
        if self.eat('-') {
            Ok(Value::number(-to_number(&self.unary()?)))
        } else if self.eat('+') {
            Ok(Value::number(to_number(&self.unary()?)))
        } else {
            self.primary()
        }
    }

    fn primary(&mut self) -> Result<Value, JsError> {
        match self.advance() {
            Token::Number(n) => Ok(Value::number(n)),
            Token::Str(s) => Ok(Value::String(s)),
            Token::Punct('(') => {
                let value = self.additive()?;
                self.expect(')')?;
                Ok(value)
            }
            Token::Ident(name) => match name.as_str() {
                "true" => Ok(Value::Boolean(true)),
                "false" => Ok(Value::Boolean(false)),
                "null" => Ok(Value::Null),
                "undefined" => Ok(Value::Undefined),
                "NaN" => Ok(Value::Double(f64::NAN)),
                "Infinity" => Ok(Value::Double(f64::INFINITY)),
                _ if self.eat('(') => {
                    let args = self.arguments()?;
                    self.engine.call(&name, &args)
                }
                _ => Err(JsError::new(
                    ErrorKind::ReferenceError,
                    format!("{} is not defined", name),
                )),
            },
            other => Err(unexpected(&other)),
        }
    }

    fn arguments(&mut self) -> Result<Vec<Value>, JsError> {
        let mut args = Vec::new();
        if self.eat(')') {
            return Ok(args);
        }
        loop {
            args.push(self.additive()?);
            if !self.eat(',') {
                self.expect(')')?;
                return Ok(args);
            }
        }
    }
}

/// A minimal engine that makes the binary runnable end to end.
///
/// # Example
/// ```
/// use core_types::Value;
/// use js_cli::ArithmeticEngine;
///
/// let mut engine = ArithmeticEngine::new();
/// assert_eq!(engine.eval_str("(1 + 2) * 4").unwrap(), Value::Smi(12));
/// ```
pub struct ArithmeticEngine {
    bound: Option<(Arc<CapabilityHandle>, Principal)>,
    output: Box<dyn Write>,
}

impl ArithmeticEngine {
    /// Creates an unbound engine printing to stdout.
    pub fn new() -> Self {
        Self {
            bound: None,
            output: Box::new(io::stdout()),
        }
    }

    /// Destination of `print`.
    pub fn with_output(mut self, output: Box<dyn Write>) -> Self {
        self.output = output;
        self
    }

    /// Evaluates a program.
    pub fn eval_str(&mut self, code: &str) -> Result<Value, JsError> {
        let tokens = tokenize(code)?;
        Evaluator {
            tokens,
            pos: 0,
            engine: self,
        }
        .program()
    }

    fn holder(&self) -> Result<(&CapabilityHandle, &Principal), JsError> {
        self.bound
            .as_ref()
            .map(|(holder, principal)| (&**holder, principal))
            .ok_or_else(|| JsError::internal("no capability handle bound"))
    }

    fn call(&mut self, name: &str, args: &[Value]) -> Result<Value, JsError> {
        match name {
            "print" => {
                let line = args.iter().map(ToString::to_string).collect::<Vec<_>>().join(" ");
                writeln!(self.output, "{}", line)
                    .and_then(|()| self.output.flush())
                    .map_err(|e| JsError::internal(format!("print failed: {}", e)))?;
                Ok(Value::Undefined)
            }
            "exit" => {
                let code = args.first().map(to_number).unwrap_or(0.0);
                let (holder, principal) = self.holder()?;
                holder.set_exit_code(principal, code as i32)?;
                Ok(Value::Undefined)
            }
            "argv" => {
                let index = args.first().map(to_number).unwrap_or(f64::NAN);
                if index.is_nan() || index < 0.0 {
                    return Ok(Value::Undefined);
                }
                let (holder, principal) = self.holder()?;
                let user_args = holder.user_args(principal)?;
                Ok(user_args
                    .get(index as usize)
                    .cloned()
                    .map(Value::String)
                    .unwrap_or_default())
            }
            "throw" => Err(JsError::error(
                args.first().map(ToString::to_string).unwrap_or_default(),
            )),
            _ => Err(JsError::new(
                ErrorKind::TypeError,
                format!("{} is not a function", name),
            )),
        }
    }
}

impl Default for ArithmeticEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptEngine for ArithmeticEngine {
    fn bind(&mut self, name: &str, holder: Arc<CapabilityHandle>, principal: Principal) {
        tracing::trace!(binding = name, %principal, "capability handle bound");
        self.bound = Some((holder, principal));
    }

    fn evaluate(&mut self, source: &ScriptSource, _scope: &mut LoopScope<'_>) -> Result<Value, JsError> {
        tracing::trace!(source = %source.name, "evaluating");
        self.eval_str(&source.code)
    }
}
