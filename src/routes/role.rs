//! Route permissions: plain roles, `any`, and conditional roles `role:predicate`.
//!
//! Predicates use a small closed language evaluated against the merged request parameters
//! and the acting user:
//!
//! ```text
//! expr    := and ("||" and)*
//! and     := unary ("&&" unary)*
//! unary   := "!" unary | compare
//! compare := operand (("==" | "===" | "!=" | "!==") operand)?
//! operand := path | literal | "(" expr ")"
//! path    := ("params" | "user") ("." ident)+
//! literal := number | 'text' | "text" | true | false | null
//! ```
//!
//! Equality is loose: `"7" == 7` holds. A bare operand is tested for truthiness.

use crate::auth::AuthUser;
use crate::dto::Row;
use crate::error::{AppError, ConfigError};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

pub const ANY_ROLE: &str = "any";

/// Custom permission check supplied in code instead of as an expression.
pub type RoleFn = Arc<dyn Fn(&Row, Option<&AuthUser>) -> bool + Send + Sync>;

#[derive(Clone)]
pub enum Role {
    /// Skips the permission check for the route.
    Any,
    /// Granted when the user holds the role (case-insensitive).
    Named(String),
    /// Granted when the check passes, whatever roles the user holds.
    Conditional { role: String, check: Check },
}

#[derive(Clone)]
pub enum Check {
    Predicate { source: String, expr: Arc<Expr> },
    Custom(RoleFn),
}

impl Role {
    /// `any`, `name`, or `name:predicate`.
    pub fn parse(text: &str) -> Result<Role, ConfigError> {
        let text = text.trim();
        match text.split_once(':') {
            Some((role, source)) if !role.trim().is_empty() => {
                let expr = Expr::parse(source).map_err(|reason| ConfigError::InvalidRole {
                    expression: text.to_string(),
                    reason,
                })?;
                Ok(Role::Conditional {
                    role: role.trim().to_lowercase(),
                    check: Check::Predicate {
                        source: source.trim().to_string(),
                        expr: Arc::new(expr),
                    },
                })
            }
            _ if text.eq_ignore_ascii_case(ANY_ROLE) => Ok(Role::Any),
            _ if text.is_empty() => Err(ConfigError::InvalidRole {
                expression: text.to_string(),
                reason: "empty role".into(),
            }),
            _ => Ok(Role::Named(text.to_lowercase())),
        }
    }

    pub fn custom<F>(role: impl Into<String>, check: F) -> Role
    where
        F: Fn(&Row, Option<&AuthUser>) -> bool + Send + Sync + 'static,
    {
        Role::Conditional {
            role: role.into().to_lowercase(),
            check: Check::Custom(Arc::new(check)),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Role::Any => ANY_ROLE,
            Role::Named(name) | Role::Conditional { role: name, .. } => name.as_str(),
        }
    }

    /// The role as declared; reported back to clients that fail authorization.
    pub fn declaration(&self) -> String {
        match self {
            Role::Conditional {
                role,
                check: Check::Predicate { source, .. },
            } => format!("{}:{}", role, source),
            other => other.name().to_string(),
        }
    }

    fn grants(&self, params: &Row, user: Option<&AuthUser>) -> bool {
        match self {
            Role::Any => true,
            Role::Named(name) => user.is_some_and(|u| u.has_role(name)),
            Role::Conditional { check, .. } => match check {
                Check::Predicate { expr, .. } => truthy(&expr.eval(params, user)),
                Check::Custom(f) => f(params, user),
            },
        }
    }
}

impl fmt::Debug for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Role({})", self.declaration())
    }
}

/// The permission set of one route.
#[derive(Clone, Debug, Default)]
pub struct Policy {
    roles: Vec<Role>,
}

impl Policy {
    pub fn new(roles: Vec<Role>) -> Self {
        Policy { roles }
    }

    pub fn roles(&self) -> &[Role] {
        &self.roles
    }

    pub fn is_open(&self) -> bool {
        self.roles.is_empty() || self.roles.iter().any(|r| matches!(r, Role::Any))
    }

    /// Role names for documentation, conditional roles by their role part.
    pub fn names(&self) -> Vec<String> {
        self.roles.iter().map(|r| r.name().to_string()).collect()
    }

    pub fn authorize(&self, params: &Row, user: Option<&AuthUser>) -> Result<(), AppError> {
        if self.is_open() || self.roles.iter().any(|r| r.grants(params, user)) {
            return Ok(());
        }
        Err(AppError::Unauthorized {
            required: self.roles.iter().map(Role::declaration).collect(),
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Literal(Value),
    Params(Vec<String>),
    User(Vec<String>),
    Not(Box<Expr>),
    Eq(Box<Expr>, Box<Expr>),
    Ne(Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
}

impl Expr {
    pub fn parse(source: &str) -> Result<Expr, String> {
        let tokens = tokenize(source)?;
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.or()?;
        match parser.peek() {
            None => Ok(expr),
            Some(t) => Err(format!("unexpected {:?}", t)),
        }
    }

    pub fn eval(&self, params: &Row, user: Option<&AuthUser>) -> Value {
        match self {
            Expr::Literal(v) => v.clone(),
            Expr::Params(path) => lookup(params.get(&path[0]).cloned(), &path[1..]),
            Expr::User(path) => lookup(user.and_then(|u| u.attribute(&path[0])), &path[1..]),
            Expr::Not(e) => Value::Bool(!truthy(&e.eval(params, user))),
            Expr::Eq(a, b) => Value::Bool(loose_eq(&a.eval(params, user), &b.eval(params, user))),
            Expr::Ne(a, b) => Value::Bool(!loose_eq(&a.eval(params, user), &b.eval(params, user))),
            Expr::And(a, b) => Value::Bool(truthy(&a.eval(params, user)) && truthy(&b.eval(params, user))),
            Expr::Or(a, b) => Value::Bool(truthy(&a.eval(params, user)) || truthy(&b.eval(params, user))),
        }
    }
}

fn lookup(root: Option<Value>, rest: &[String]) -> Value {
    let mut current = root.unwrap_or(Value::Null);
    for key in rest {
        current = match current {
            Value::Object(mut map) => map.remove(key).unwrap_or(Value::Null),
            _ => Value::Null,
        };
    }
    current
}

fn truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|x| x != 0.0 && !x.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn loose_eq(a: &Value, b: &Value) -> bool {
    fn number(v: &Value) -> Option<f64> {
        match v {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Null, _) | (_, Value::Null) => false,
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Number(_) | Value::String(_) | Value::Bool(_), Value::Number(_) | Value::String(_) | Value::Bool(_)) => {
            number(a).zip(number(b)).is_some_and(|(x, y)| x == y)
        }
        _ => a == b,
    }
}

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Num(f64),
    Dot,
    Eq,
    Ne,
    And,
    Or,
    Not,
    Open,
    Close,
}

fn tokenize(source: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        match c {
            ' ' | '\t' | '\n' | '\r' => i += 1,
            '.' => {
                tokens.push(Token::Dot);
                i += 1;
            }
            '(' => {
                tokens.push(Token::Open);
                i += 1;
            }
            ')' => {
                tokens.push(Token::Close);
                i += 1;
            }
            '=' if next == Some('=') => {
                i += if chars.get(i + 2) == Some(&'=') { 3 } else { 2 };
                tokens.push(Token::Eq);
            }
            '!' if next == Some('=') => {
                i += if chars.get(i + 2) == Some(&'=') { 3 } else { 2 };
                tokens.push(Token::Ne);
            }
            '!' => {
                tokens.push(Token::Not);
                i += 1;
            }
            '&' if next == Some('&') => {
                tokens.push(Token::And);
                i += 2;
            }
            '|' if next == Some('|') => {
                tokens.push(Token::Or);
                i += 2;
            }
            '\'' | '"' => {
                let end = chars[i + 1..]
                    .iter()
                    .position(|&ch| ch == c)
                    .ok_or_else(|| "unterminated string".to_string())?;
                tokens.push(Token::Str(chars[i + 1..i + 1 + end].iter().collect()));
                i += end + 2;
            }
            c if c.is_ascii_digit() || (c == '-' && next.is_some_and(|n| n.is_ascii_digit())) => {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                tokens.push(Token::Num(text.parse().map_err(|_| format!("bad number '{}'", text))?));
            }
            c if c.is_alphabetic() || c == '_' || c == '$' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '$') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            other => return Err(format!("unexpected character '{}'", other)),
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        t
    }

    fn or(&mut self) -> Result<Expr, String> {
        let mut left = self.and()?;
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            left = Expr::Or(Box::new(left), Box::new(self.and()?));
        }
        Ok(left)
    }

    fn and(&mut self) -> Result<Expr, String> {
        let mut left = self.unary()?;
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            left = Expr::And(Box::new(left), Box::new(self.unary()?));
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expr, String> {
        if self.peek() == Some(&Token::Not) {
            self.pos += 1;
            return Ok(Expr::Not(Box::new(self.unary()?)));
        }
        let left = self.operand()?;
        match self.peek() {
            Some(Token::Eq) => {
                self.pos += 1;
                Ok(Expr::Eq(Box::new(left), Box::new(self.operand()?)))
            }
            Some(Token::Ne) => {
                self.pos += 1;
                Ok(Expr::Ne(Box::new(left), Box::new(self.operand()?)))
            }
            _ => Ok(left),
        }
    }

    fn operand(&mut self) -> Result<Expr, String> {
        match self.next() {
            Some(Token::Open) => {
                let inner = self.or()?;
                match self.next() {
                    Some(Token::Close) => Ok(inner),
                    _ => Err("missing ')'".into()),
                }
            }
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::String(s))),
            Some(Token::Num(n)) => Ok(Expr::Literal(
                serde_json::Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null),
            )),
            Some(Token::Ident(word)) => match word.as_str() {
                "true" => Ok(Expr::Literal(Value::Bool(true))),
                "false" => Ok(Expr::Literal(Value::Bool(false))),
                "null" | "undefined" => Ok(Expr::Literal(Value::Null)),
                "params" => Ok(Expr::Params(self.path()?)),
                "user" => Ok(Expr::User(self.path()?)),
                other => Err(format!("unknown name '{}'; expected params or user", other)),
            },
            Some(t) => Err(format!("unexpected {:?}", t)),
            None => Err("unexpected end of expression".into()),
        }
    }

    fn path(&mut self) -> Result<Vec<String>, String> {
        let mut keys = Vec::new();
        while self.peek() == Some(&Token::Dot) {
            self.pos += 1;
            match self.next() {
                Some(Token::Ident(key)) => keys.push(key),
                _ => return Err("expected a field name after '.'".into()),
            }
        }
        if keys.is_empty() {
            return Err("expected '.field' after params or user".into());
        }
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(v: Value) -> Row {
        v.as_object().cloned().unwrap_or_default()
    }

    fn policy(roles: &[&str]) -> Policy {
        Policy::new(roles.iter().map(|r| Role::parse(r).unwrap()).collect())
    }

    #[test]
    fn named_roles_are_case_insensitive() {
        let p = policy(&["Admin"]);
        let admin = AuthUser::new(1, ["ADMIN"]);
        let viewer = AuthUser::new(2, ["viewer"]);
        assert!(p.authorize(&Row::new(), Some(&admin)).is_ok());
        match p.authorize(&Row::new(), Some(&viewer)) {
            Err(AppError::Unauthorized { required }) => assert_eq!(required, ["admin"]),
            other => panic!("expected unauthorized, got {:?}", other),
        }
        assert!(p.authorize(&Row::new(), None).is_err());
    }

    #[test]
    fn any_and_empty_lists_admit_everyone() {
        assert!(policy(&["any", "admin"]).authorize(&Row::new(), None).is_ok());
        assert!(policy(&[]).authorize(&Row::new(), None).is_ok());
    }

    #[test]
    fn conditional_role_grants_on_predicate() {
        let p = policy(&["admin", "owner:params.user_id == user.id"]);
        let user = AuthUser::new(7, Vec::<String>::new());
        assert!(p.authorize(&params(json!({"user_id": "7"})), Some(&user)).is_ok());
        let err = p.authorize(&params(json!({"user_id": "8"})), Some(&user)).unwrap_err();
        match err {
            AppError::Unauthorized { required } => {
                assert_eq!(required, ["admin", "owner:params.user_id == user.id"])
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(p.names(), ["admin", "owner"]);
    }

    #[test]
    fn predicate_language() {
        let user = AuthUser::new(1, ["staff"]);
        let eval = |src: &str, p: Value| truthy(&Expr::parse(src).unwrap().eval(&params(p), Some(&user)));
        assert!(eval("params.a == 'x' && params.b != 2", json!({"a": "x", "b": "3"})));
        assert!(eval("!(params.a === null) || false", json!({"a": 1})));
        assert!(!eval("params.missing", json!({})));
        assert!(eval("params.nested.k == true", json!({"nested": {"k": true}})));
        assert!(eval("user.id == 1", json!({})));
    }

    #[test]
    fn rejects_code_outside_the_language() {
        for bad in ["owner:process.exit()", "owner:params.", "owner:params.a ==", "owner:'open"] {
            assert!(matches!(Role::parse(bad), Err(ConfigError::InvalidRole { .. })), "{}", bad);
        }
    }

    #[test]
    fn custom_checks() {
        let p = Policy::new(vec![Role::custom("editor", |params, _| params.contains_key("draft"))]);
        assert!(p.authorize(&params(json!({"draft": 1})), None).is_ok());
        assert!(p.authorize(&Row::new(), None).is_err());
    }
}
