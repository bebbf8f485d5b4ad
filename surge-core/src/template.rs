//! `{{ expr }}` interpolation over a VU's variables.
//!
//! Supported expressions: a variable name with an optional dotted path (`user.name`,
//! `rows.0`), `$env.NAME`, `$uuid`, `$randomNumber(min, max)` and `$randomString(len)`.
//! A template that is exactly one expression keeps the value's type; otherwise every
//! expression is stringified in place. Unknown names render as nothing.

use std::sync::Arc;

use rand::Rng;
use rand::distr::Alphanumeric;
use surge_value::{ObjectMap, Value};

pub type EnvVars = Arc<[(Arc<str>, Arc<str>)]>;

pub fn process_env_snapshot() -> EnvVars {
    let vars: Vec<(Arc<str>, Arc<str>)> = std::env::vars()
        .map(|(k, v)| (Arc::<str>::from(k), Arc::<str>::from(v)))
        .collect();
    Arc::from(vars.into_boxed_slice())
}

pub fn env_lookup<'a>(env: &'a EnvVars, name: &str) -> Option<&'a str> {
    env.iter()
        .find(|(k, _)| k.as_ref() == name)
        .map(|(_, v)| v.as_ref())
}

/// Evaluation scope: the VU's variables plus the environment snapshot.
#[derive(Debug, Clone, Copy)]
pub struct Scope<'a> {
    pub vars: &'a ObjectMap,
    pub env: &'a EnvVars,
}

impl<'a> Scope<'a> {
    pub fn new(vars: &'a ObjectMap, env: &'a EnvVars) -> Self {
        Self { vars, env }
    }

    pub fn eval(&self, expr: &str) -> Value {
        let expr = expr.trim();

        if let Some(name) = expr.strip_prefix("$env.") {
            return env_lookup(self.env, name)
                .map(Value::from)
                .unwrap_or_default();
        }
        if let Some(args) = call_args(expr, "$randomNumber") {
            return random_number(&args);
        }
        if let Some(args) = call_args(expr, "$randomString") {
            let len = args
                .first()
                .and_then(|a| a.parse::<usize>().ok())
                .unwrap_or(10);
            return Value::from(random_string(len));
        }
        if expr == "$uuid" && !self.vars.contains_key("$uuid") {
            return Value::from(uuid::Uuid::new_v4().to_string());
        }

        let (head, rest) = match expr.split_once('.') {
            Some((head, rest)) => (head, Some(rest)),
            None => (expr, None),
        };
        let Some(root) = self.vars.get(head) else {
            return Value::Null;
        };
        match rest {
            None => root.clone(),
            Some(path) => root.get_path(path).cloned().unwrap_or_default(),
        }
    }

    pub fn render(&self, template: &str) -> Value {
        let segments = parse(template);
        if let [Segment::Expr(expr)] = segments.as_slice() {
            return self.eval(expr);
        }

        let mut out = String::with_capacity(template.len());
        for seg in segments {
            match seg {
                Segment::Text(t) => out.push_str(t),
                Segment::Expr(e) => out.push_str(&self.eval(e).to_string()),
            }
        }
        Value::from(out)
    }

    pub fn render_string(&self, template: &str) -> String {
        self.render(template).to_string()
    }

    /// Renders every string inside a JSON document.
    pub fn render_json(&self, value: &serde_json::Value) -> Value {
        match value {
            serde_json::Value::String(s) => self.render(s),
            serde_json::Value::Array(items) => {
                Value::Array(items.iter().map(|v| self.render_json(v)).collect())
            }
            serde_json::Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (Arc::from(self.render_string(k).as_str()), self.render_json(v)))
                    .collect(),
            ),
            other => Value::from(other),
        }
    }
}

#[derive(Debug, PartialEq)]
enum Segment<'a> {
    Text(&'a str),
    Expr(&'a str),
}

fn parse(template: &str) -> Vec<Segment<'_>> {
    let mut out = Vec::new();
    let mut rest = template;
    while let Some(open) = rest.find("{{") {
        let Some(close) = rest[open + 2..].find("}}") else {
            break;
        };
        if open > 0 {
            out.push(Segment::Text(&rest[..open]));
        }
        out.push(Segment::Expr(&rest[open + 2..open + 2 + close]));
        rest = &rest[open + 2 + close + 2..];
    }
    if !rest.is_empty() {
        out.push(Segment::Text(rest));
    }
    out
}

fn call_args<'a>(expr: &'a str, name: &str) -> Option<Vec<&'a str>> {
    let inner = expr.strip_prefix(name)?.trim_start();
    let inner = inner.strip_prefix('(')?.strip_suffix(')')?;
    Some(
        inner
            .split(',')
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .collect(),
    )
}

fn random_number(args: &[&str]) -> Value {
    let parse = |i: usize, default: i64| {
        args.get(i)
            .and_then(|a| a.parse::<i64>().ok())
            .unwrap_or(default)
    };
    let min = parse(0, 0);
    let max = parse(1, 10_000_000).max(min);
    Value::I64(rand::rng().random_range(min..=max))
}

pub fn random_string(len: usize) -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}
