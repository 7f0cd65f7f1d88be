use crate::macros::{MacroTable, MacroValue, UNDEFINED_SUFFIX, parse_integer};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExprError {
    #[error("unexpected end of expression")]
    UnexpectedEnd,
    #[error("unexpected token '{0}'")]
    UnexpectedToken(String),
    #[error("invalid character '{0}' in expression")]
    InvalidCharacter(char),
    #[error("unterminated string literal")]
    UnterminatedString,
    #[error("undefined macro $({0})")]
    UndefinedMacro(String),
    #[error("operator '{op}' cannot be applied to {operands}")]
    TypeMismatch { op: &'static str, operands: String },
    #[error("division by zero")]
    DivisionByZero,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    And,
    Or,
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl BinaryOp {
    fn symbol(self) -> &'static str {
        match self {
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Gt => ">",
            BinaryOp::Le => "<=",
            BinaryOp::Ge => ">=",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Integer(i64),
    Boolean(bool),
    Text(String),
}

impl Value {
    /// Truth value of a condition result. Text is only true when it spells TRUE.
    pub fn is_true(&self) -> bool {
        match self {
            Value::Integer(value) => *value != 0,
            Value::Boolean(value) => *value,
            Value::Text(text) => text.eq_ignore_ascii_case("TRUE"),
        }
    }

    fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(value) => Some(*value),
            Value::Boolean(value) => Some(i64::from(*value)),
            Value::Text(text) => parse_integer(text),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Value::Integer(_) => "integer",
            Value::Boolean(_) => "boolean",
            Value::Text(_) => "string",
        }
    }
}

impl From<&MacroValue> for Value {
    fn from(value: &MacroValue) -> Self {
        match value {
            MacroValue::Integer(value) => Value::Integer(*value),
            MacroValue::Boolean(value) => Value::Boolean(*value),
            MacroValue::Text(text) => Value::Text(text.clone()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Integer(value) => write!(f, "{value}"),
            Value::Boolean(true) => write!(f, "TRUE"),
            Value::Boolean(false) => write!(f, "FALSE"),
            Value::Text(text) => write!(f, "\"{text}\""),
        }
    }
}

/// Condition expression of an `!if` / `!elseif` directive
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Literal(Value),
    /// a bare word: the macro of that name if one is defined, otherwise the word itself
    MacroRef(String),
    /// a macro reference that was undefined at expansion time
    Undefined(String),
    Not(Box<Expr>),
    Neg(Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Sizeof(Box<Expr>),
    Defined(String),
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal(value) => write!(f, "{value}"),
            Expr::MacroRef(name) => write!(f, "{name}"),
            Expr::Undefined(name) => write!(f, "$({name})"),
            Expr::Not(inner) => write!(f, "!{inner}"),
            Expr::Neg(inner) => write!(f, "-{inner}"),
            Expr::Binary(op, left, right) => write!(f, "({left} {} {right})", op.symbol()),
            Expr::Sizeof(inner) => write!(f, "sizeof({inner})"),
            Expr::Defined(name) => write!(f, "defined({name})"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(i64),
    Str(String),
    Word(String),
    Op(&'static str),
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Number(value) => write!(f, "{value}"),
            Token::Str(text) => write!(f, "\"{text}\""),
            Token::Word(word) => write!(f, "{word}"),
            Token::Op(op) => write!(f, "{op}"),
        }
    }
}

const TWO_CHAR_OPS: [&str; 11] = ["&&", "||", "==", "!=", "<>", "<=", ">=", "=>", "=<", "++", "--"];
const ONE_CHAR_OPS: [&str; 10] = ["!", "<", ">", "+", "-", "*", "/", "%", "(", ")"];

fn tokenize(text: &str) -> Result<Vec<Token>, ExprError> {
    let bytes = text.as_bytes();
    let mut tokens = Vec::new();
    let mut pos = 0;

    'outer: while pos < bytes.len() {
        let c = bytes[pos];
        if c.is_ascii_whitespace() {
            pos += 1;
            continue;
        }

        // string literals, optionally wide (L"...")
        let quote_start = if c == b'L' && bytes.get(pos + 1) == Some(&b'"') { pos + 1 } else { pos };
        if bytes[quote_start] == b'"' || bytes[quote_start] == b'\'' {
            let quote = bytes[quote_start];
            let Some(len) = bytes[quote_start + 1..].iter().position(|&b| b == quote) else {
                return Err(ExprError::UnterminatedString);
            };
            let content = &text[quote_start + 1..quote_start + 1 + len];
            pos = quote_start + len + 2;
            // quoted booleans are booleans
            if content.eq_ignore_ascii_case("TRUE") {
                tokens.push(Token::Word("TRUE".to_string()));
            } else if content.eq_ignore_ascii_case("FALSE") {
                tokens.push(Token::Word("FALSE".to_string()));
            } else {
                tokens.push(Token::Str(content.to_string()));
            }
            continue;
        }

        for op in TWO_CHAR_OPS {
            if text[pos..].starts_with(op) {
                tokens.push(Token::Op(op));
                pos += 2;
                continue 'outer;
            }
        }
        for op in ONE_CHAR_OPS {
            if text[pos..].starts_with(op) {
                tokens.push(Token::Op(op));
                pos += 1;
                continue 'outer;
            }
        }

        if c.is_ascii_alphanumeric() || c == b'_' {
            let start = pos;
            while pos < bytes.len() && (bytes[pos].is_ascii_alphanumeric() || matches!(bytes[pos], b'_' | b'.')) {
                pos += 1;
            }
            let word = &text[start..pos];
            match parse_integer(word) {
                Some(value) if c.is_ascii_digit() => tokens.push(Token::Number(value)),
                _ => tokens.push(Token::Word(word.to_string())),
            }
            continue;
        }

        let invalid = text[pos..].chars().next().unwrap_or('?');
        return Err(ExprError::InvalidCharacter(invalid));
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    position: usize,
}

/// Parse the (macro expanded) text of a condition
pub fn parse_expression(text: &str) -> Result<Expr, ExprError> {
    let mut parser = Parser {
        tokens: tokenize(text)?,
        position: 0,
    };
    let expr = parser.parse_or()?;
    if let Some(token) = parser.peek_token() {
        return Err(ExprError::UnexpectedToken(token.to_string()));
    }
    Ok(expr)
}

impl Parser {
    fn get_token(&mut self) -> Result<Token, ExprError> {
        if self.position < self.tokens.len() {
            let token = self.tokens[self.position].clone();
            self.position += 1;
            Ok(token)
        } else {
            Err(ExprError::UnexpectedEnd)
        }
    }

    fn peek_token(&self) -> Option<&Token> {
        self.tokens.get(self.position)
    }

    fn require_op(&mut self, target: &'static str) -> Result<(), ExprError> {
        match self.get_token()? {
            Token::Op(op) if op == target => Ok(()),
            other => Err(ExprError::UnexpectedToken(other.to_string())),
        }
    }

    /// Consume the next token if it is one of the given binary operators
    fn next_binary_op(&mut self, accepted: &[BinaryOp]) -> Option<BinaryOp> {
        let op = match self.peek_token()? {
            Token::Op(op) => match *op {
                "&&" => BinaryOp::And,
                "||" => BinaryOp::Or,
                "==" => BinaryOp::Eq,
                "!=" | "<>" => BinaryOp::Ne,
                "<" => BinaryOp::Lt,
                ">" => BinaryOp::Gt,
                "<=" | "=<" => BinaryOp::Le,
                ">=" | "=>" => BinaryOp::Ge,
                "+" => BinaryOp::Add,
                "-" => BinaryOp::Sub,
                "*" => BinaryOp::Mul,
                "/" => BinaryOp::Div,
                "%" => BinaryOp::Mod,
                _ => return None,
            },
            Token::Word(word) => match word.as_str() {
                "and" | "AND" => BinaryOp::And,
                "or" | "OR" => BinaryOp::Or,
                "EQ" => BinaryOp::Eq,
                "NE" => BinaryOp::Ne,
                "LT" => BinaryOp::Lt,
                "GT" => BinaryOp::Gt,
                "LE" => BinaryOp::Le,
                "GE" => BinaryOp::Ge,
                _ => return None,
            },
            _ => return None,
        };
        if accepted.contains(&op) {
            self.position += 1;
            Some(op)
        } else {
            None
        }
    }

    fn parse_binary_level(
        &mut self,
        accepted: &[BinaryOp],
        next: fn(&mut Self) -> Result<Expr, ExprError>,
    ) -> Result<Expr, ExprError> {
        let mut left = next(self)?;
        while let Some(op) = self.next_binary_op(accepted) {
            let right = next(self)?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_or(&mut self) -> Result<Expr, ExprError> {
        self.parse_binary_level(&[BinaryOp::Or], Self::parse_and)
    }

    fn parse_and(&mut self) -> Result<Expr, ExprError> {
        self.parse_binary_level(&[BinaryOp::And], Self::parse_equality)
    }

    fn parse_equality(&mut self) -> Result<Expr, ExprError> {
        self.parse_binary_level(&[BinaryOp::Eq, BinaryOp::Ne], Self::parse_relational)
    }

    fn parse_relational(&mut self) -> Result<Expr, ExprError> {
        self.parse_binary_level(
            &[BinaryOp::Lt, BinaryOp::Gt, BinaryOp::Le, BinaryOp::Ge],
            Self::parse_additive,
        )
    }

    fn parse_additive(&mut self) -> Result<Expr, ExprError> {
        self.parse_binary_level(&[BinaryOp::Add, BinaryOp::Sub], Self::parse_term)
    }

    fn parse_term(&mut self) -> Result<Expr, ExprError> {
        self.parse_binary_level(&[BinaryOp::Mul, BinaryOp::Div, BinaryOp::Mod], Self::parse_unary)
    }

    fn parse_unary(&mut self) -> Result<Expr, ExprError> {
        match self.peek_token() {
            Some(Token::Op("!")) => {
                self.position += 1;
                Ok(Expr::Not(Box::new(self.parse_unary()?)))
            }
            Some(Token::Word(word)) if word == "not" || word == "NOT" => {
                self.position += 1;
                Ok(Expr::Not(Box::new(self.parse_unary()?)))
            }
            Some(Token::Op("-")) => {
                self.position += 1;
                Ok(Expr::Neg(Box::new(self.parse_unary()?)))
            }
            _ => self.parse_postfix(),
        }
    }

    /// `X++` and `X--` evaluate to X + 1 and X - 1
    fn parse_postfix(&mut self) -> Result<Expr, ExprError> {
        let mut expr = self.parse_primary()?;
        loop {
            let op = match self.peek_token() {
                Some(Token::Op("++")) => BinaryOp::Add,
                Some(Token::Op("--")) => BinaryOp::Sub,
                _ => break,
            };
            self.position += 1;
            expr = Expr::Binary(op, Box::new(expr), Box::new(Expr::Literal(Value::Integer(1))));
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr, ExprError> {
        match self.get_token()? {
            Token::Number(value) => Ok(Expr::Literal(Value::Integer(value))),
            Token::Str(text) => Ok(Expr::Literal(Value::Text(text))),
            Token::Op("(") => {
                let expr = self.parse_or()?;
                self.require_op(")")?;
                Ok(expr)
            }
            Token::Word(word) => {
                if word.eq_ignore_ascii_case("TRUE") {
                    Ok(Expr::Literal(Value::Boolean(true)))
                } else if word.eq_ignore_ascii_case("FALSE") {
                    Ok(Expr::Literal(Value::Boolean(false)))
                } else if word == "sizeof" {
                    self.require_op("(")?;
                    let inner = self.parse_or()?;
                    self.require_op(")")?;
                    Ok(Expr::Sizeof(Box::new(inner)))
                } else if word == "defined" {
                    self.parse_defined()
                } else if let Some(name) = undefined_name(&word) {
                    Ok(Expr::Undefined(name.to_string()))
                } else {
                    Ok(Expr::MacroRef(word))
                }
            }
            other => Err(ExprError::UnexpectedToken(other.to_string())),
        }
    }

    /// `defined(NAME)`; by the time a condition is parsed `defined($(NAME))` has
    /// already been expanded, so any other operand means the macro existed.
    fn parse_defined(&mut self) -> Result<Expr, ExprError> {
        self.require_op("(")?;
        let expr = match self.get_token()? {
            Token::Word(word) => match undefined_name(&word) {
                Some(_) => Expr::Literal(Value::Boolean(false)),
                None => Expr::Defined(word),
            },
            Token::Number(_) | Token::Str(_) => Expr::Literal(Value::Boolean(true)),
            other => return Err(ExprError::UnexpectedToken(other.to_string())),
        };
        self.require_op(")")?;
        Ok(expr)
    }
}

fn undefined_name(word: &str) -> Option<&str> {
    word.strip_prefix("__")?.strip_suffix(UNDEFINED_SUFFIX)
}

fn mismatch(op: BinaryOp, left: &Value, right: &Value) -> ExprError {
    ExprError::TypeMismatch {
        op: op.symbol(),
        operands: format!("{} and {}", left.kind(), right.kind()),
    }
}

fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Text(l), Value::Text(r)) => l == r,
        (Value::Text(text), other) | (other, Value::Text(text)) => match other {
            Value::Boolean(value) => {
                (text.eq_ignore_ascii_case("TRUE") && *value) || (text.eq_ignore_ascii_case("FALSE") && !*value)
            }
            _ => parse_integer(text) == other.as_integer(),
        },
        _ => left.as_integer() == right.as_integer(),
    }
}

/// Evaluate an expression against the current macro table
pub fn evaluate(expr: &Expr, macros: &MacroTable) -> Result<Value, ExprError> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::MacroRef(name) => Ok(macros
            .get(name)
            .map(|mac| Value::from(&mac.value))
            .unwrap_or_else(|| Value::Text(name.clone()))),
        Expr::Undefined(name) => Err(ExprError::UndefinedMacro(name.clone())),
        Expr::Defined(name) => Ok(Value::Boolean(macros.contains(name))),
        Expr::Not(inner) => Ok(Value::Boolean(!evaluate(inner, macros)?.is_true())),
        Expr::Neg(inner) => {
            let value = evaluate(inner, macros)?;
            match value.as_integer() {
                Some(number) => Ok(Value::Integer(number.wrapping_neg())),
                None => Err(ExprError::TypeMismatch {
                    op: "-",
                    operands: value.kind().to_string(),
                }),
            }
        }
        Expr::Sizeof(inner) => match evaluate(inner, macros)? {
            Value::Text(text) => Ok(Value::Integer(text.len() as i64)),
            other => Err(ExprError::TypeMismatch {
                op: "sizeof",
                operands: other.kind().to_string(),
            }),
        },
        Expr::Binary(BinaryOp::And, left, right) => {
            if !evaluate(left, macros)?.is_true() {
                return Ok(Value::Boolean(false));
            }
            Ok(Value::Boolean(evaluate(right, macros)?.is_true()))
        }
        Expr::Binary(BinaryOp::Or, left, right) => {
            if evaluate(left, macros)?.is_true() {
                return Ok(Value::Boolean(true));
            }
            Ok(Value::Boolean(evaluate(right, macros)?.is_true()))
        }
        Expr::Binary(op, left, right) => {
            let left = evaluate(left, macros)?;
            let right = evaluate(right, macros)?;
            binary(*op, &left, &right)
        }
    }
}

fn binary(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, ExprError> {
    match op {
        BinaryOp::Eq => return Ok(Value::Boolean(values_equal(left, right))),
        BinaryOp::Ne => return Ok(Value::Boolean(!values_equal(left, right))),
        _ => {}
    }

    // non-numeric strings compare lexically and concatenate
    if let (Value::Text(l), Value::Text(r)) = (left, right)
        && parse_integer(l).is_none()
    {
        return match op {
            BinaryOp::Lt => Ok(Value::Boolean(l < r)),
            BinaryOp::Gt => Ok(Value::Boolean(l > r)),
            BinaryOp::Le => Ok(Value::Boolean(l <= r)),
            BinaryOp::Ge => Ok(Value::Boolean(l >= r)),
            BinaryOp::Add => Ok(Value::Text(format!("{l}{r}"))),
            _ => Err(mismatch(op, left, right)),
        };
    }

    let (Some(l), Some(r)) = (left.as_integer(), right.as_integer()) else {
        return Err(mismatch(op, left, right));
    };
    let result = match op {
        BinaryOp::Lt => Value::Boolean(l < r),
        BinaryOp::Gt => Value::Boolean(l > r),
        BinaryOp::Le => Value::Boolean(l <= r),
        BinaryOp::Ge => Value::Boolean(l >= r),
        BinaryOp::Add => Value::Integer(l.wrapping_add(r)),
        BinaryOp::Sub => Value::Integer(l.wrapping_sub(r)),
        BinaryOp::Mul => Value::Integer(l.wrapping_mul(r)),
        BinaryOp::Div | BinaryOp::Mod if r == 0 => return Err(ExprError::DivisionByZero),
        BinaryOp::Div => Value::Integer(l.wrapping_div(r)),
        BinaryOp::Mod => Value::Integer(l.wrapping_rem(r)),
        BinaryOp::Eq => Value::Boolean(l == r),
        BinaryOp::Ne => Value::Boolean(l != r),
        BinaryOp::And => Value::Boolean(l != 0 && r != 0),
        BinaryOp::Or => Value::Boolean(l != 0 || r != 0),
    };
    Ok(result)
}

/// Evaluate the condition of `!if` / `!elseif`
pub fn eval_condition(text: &str, macros: &MacroTable) -> Result<bool, ExprError> {
    let expr = parse_expression(text)?;
    log::trace!("converted condition: {expr}");
    Ok(evaluate(&expr, macros)?.is_true())
}
