//! Calculator tool - evaluate arithmetic expressions
//!
//! Supports `+ - * / %`, exponentiation (`^` or `**`), parentheses, unary
//! signs, the constants `pi` and `e`, and a handful of functions
//! (`sqrt abs sin cos tan ln log exp floor ceil round`). Full-width digits and
//! operators, `×` and `÷` are accepted.

use async_trait::async_trait;
use serde_json::{json, Value};
use crate::Result;
use crate::error::Error;
use super::Tool;

/// Deepest allowed nesting of parentheses, function calls, signs and powers.
const MAX_DEPTH: usize = 64;

/// Arithmetic calculator
pub struct CalculatorTool;

#[async_trait]
impl Tool for CalculatorTool {
    fn name(&self) -> &str { "calculator" }
    fn description(&self) -> &str {
        "Evaluate an arithmetic expression, e.g. \"2+2\", \"(3.5*4)^2\" or \"sqrt(16)\""
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "expression": {
                    "type": "string",
                    "description": "The arithmetic expression to evaluate"
                }
            },
            "required": ["expression"]
        })
    }

    async fn execute(&self, params: Value) -> Result<String> {
        let expression = params.get("expression")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::Tool("Missing 'expression' parameter".to_string()))?;

        let value = evaluate(expression)?;
        Ok(format_number(value))
    }
}

/// Evaluate an expression to a finite number.
pub fn evaluate(expression: &str) -> Result<f64> {
    let chars: Vec<char> = expression.chars().map(normalize).collect();
    let mut parser = Parser { chars, pos: 0, depth: 0 };

    let value = parser.expr()?;
    parser.skip_ws();
    if let Some(c) = parser.peek() {
        return Err(Error::Tool(format!("Unexpected '{}' at position {}", c, parser.pos)));
    }
    if !value.is_finite() {
        return Err(Error::Tool(format!("Result is not a finite number: {}", expression)));
    }
    Ok(value)
}

/// Render integers without a fractional part, others trimmed.
fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        let rendered = format!("{:.10}", value);
        rendered.trim_end_matches('0').trim_end_matches('.').to_string()
    }
}

fn normalize(c: char) -> char {
    match c {
        '\u{FF01}'..='\u{FF5E}' => char::from_u32(c as u32 - 0xFEE0).unwrap_or(c),
        '\u{3000}' => ' ',
        '×' => '*',
        '÷' => '/',
        '−' => '-',
        _ => c,
    }
}

/// `1,234,567.89` style: commas only between groups of three integer digits.
fn has_thousands_grouping(raw: &str) -> bool {
    let integer = raw.split(['.', 'e', 'E']).next().unwrap_or_default();
    if raw[integer.len()..].contains(',') {
        return false;
    }
    let mut groups = integer.split(',');
    let leading_ok = groups
        .next()
        .is_some_and(|g| (1..=3).contains(&g.len()));
    leading_ok && groups.all(|g| g.len() == 3)
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn eat(&mut self, expected: char) -> bool {
        self.skip_ws();
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expr(&mut self) -> Result<f64> {
        let mut value = self.term()?;
        loop {
            if self.eat('+') {
                value += self.term()?;
            } else if self.eat('-') {
                value -= self.term()?;
            } else {
                return Ok(value);
            }
        }
    }

    fn term(&mut self) -> Result<f64> {
        let mut value = self.unary()?;
        loop {
            self.skip_ws();
            match self.peek() {
                Some('*') if self.chars.get(self.pos + 1) != Some(&'*') => {
                    self.pos += 1;
                    value *= self.unary()?;
                }
                Some('/') => {
                    self.pos += 1;
                    let rhs = self.unary()?;
                    if rhs == 0.0 {
                        return Err(Error::Tool("Division by zero".to_string()));
                    }
                    value /= rhs;
                }
                Some('%') => {
                    self.pos += 1;
                    let rhs = self.unary()?;
                    if rhs == 0.0 {
                        return Err(Error::Tool("Modulo by zero".to_string()));
                    }
                    value %= rhs;
                }
                _ => return Ok(value),
            }
        }
    }

    // Every recursive path (parens, calls, signs, exponents) passes through here.
    fn unary(&mut self) -> Result<f64> {
        if self.depth >= MAX_DEPTH {
            return Err(Error::Tool("Expression nested too deeply".to_string()));
        }
        self.depth += 1;
        let value = if self.eat('-') {
            self.unary().map(|v| -v)
        } else if self.eat('+') {
            self.unary()
        } else {
            self.power()
        };
        self.depth -= 1;
        value
    }

    fn power(&mut self) -> Result<f64> {
        let base = self.primary()?;
        self.skip_ws();
        let is_pow = match self.peek() {
            Some('^') => {
                self.pos += 1;
                true
            }
            Some('*') if self.chars.get(self.pos + 1) == Some(&'*') => {
                self.pos += 2;
                true
            }
            _ => false,
        };
        if is_pow {
            let exponent = self.unary()?;
            Ok(base.powf(exponent))
        } else {
            Ok(base)
        }
    }

    fn primary(&mut self) -> Result<f64> {
        self.skip_ws();
        match self.peek() {
            Some('(') => {
                self.pos += 1;
                let value = self.expr()?;
                if !self.eat(')') {
                    return Err(Error::Tool("Missing closing parenthesis".to_string()));
                }
                Ok(value)
            }
            Some(c) if c.is_ascii_digit() || c == '.' => self.number(),
            Some(c) if c.is_ascii_alphabetic() => self.identifier(),
            Some(c) => Err(Error::Tool(format!("Unexpected '{}' at position {}", c, self.pos))),
            None => Err(Error::Tool("Unexpected end of expression".to_string())),
        }
    }

    fn number(&mut self) -> Result<f64> {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_digit() || c == '.' || c == ',') {
            self.pos += 1;
        }
        if matches!(self.peek(), Some('e' | 'E'))
            && self.chars.get(self.pos + 1).is_some_and(|c| c.is_ascii_digit() || *c == '-' || *c == '+')
        {
            self.pos += 2;
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.pos += 1;
            }
        }

        let raw: String = self.chars[start..self.pos].iter().collect();
        let invalid = || Error::Tool(format!("Invalid number '{}'", raw));
        if raw.contains(',') && !has_thousands_grouping(&raw) {
            return Err(invalid());
        }
        raw.replace(',', "").parse::<f64>().map_err(|_| invalid())
    }

    fn identifier(&mut self) -> Result<f64> {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_alphanumeric()) {
            self.pos += 1;
        }
        let name: String = self.chars[start..self.pos].iter().collect::<String>().to_lowercase();

        match name.as_str() {
            "pi" => return Ok(std::f64::consts::PI),
            "e" => return Ok(std::f64::consts::E),
            _ => {}
        }

        if !self.eat('(') {
            return Err(Error::Tool(format!("Unknown identifier '{}'", name)));
        }
        let arg = self.expr()?;
        if !self.eat(')') {
            return Err(Error::Tool("Missing closing parenthesis".to_string()));
        }

        let value = match name.as_str() {
            "sqrt" => {
                if arg < 0.0 {
                    return Err(Error::Tool("sqrt of a negative number".to_string()));
                }
                arg.sqrt()
            }
            "abs" => arg.abs(),
            "sin" => arg.sin(),
            "cos" => arg.cos(),
            "tan" => arg.tan(),
            "ln" => arg.ln(),
            "log" => arg.log10(),
            "exp" => arg.exp(),
            "floor" => arg.floor(),
            "ceil" => arg.ceil(),
            "round" => arg.round(),
            other => return Err(Error::Tool(format!("Unknown function '{}'", other))),
        };
        Ok(value)
    }
}
