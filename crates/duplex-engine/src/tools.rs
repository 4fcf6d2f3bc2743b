//! Tool registry and execution (spec §4.5, §6.5).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

#[derive(Debug, Clone)]
pub struct ToolParameter {
    pub name: String,
    pub type_tag: String,
    pub description: String,
    pub required: bool,
    pub default: Option<Value>,
}

impl ToolParameter {
    pub fn required(name: impl Into<String>, type_tag: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_tag: type_tag.into(),
            description: description.into(),
            required: true,
            default: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    pub parameters: Vec<ToolParameter>,
}

/// Polymorphic over {describe, execute} (§4.5).
#[async_trait]
pub trait Tool: Send + Sync {
    fn info(&self) -> ToolInfo;

    /// `arguments` is the parsed JSON argument object the LLM produced.
    /// Implementations return a structured value; on internal failure they
    /// should return `Err` so the registry can wrap it per the tool-failure
    /// contract rather than panicking.
    async fn execute(&self, arguments: &Value) -> Result<Value, String>;
}

/// Looks up tools by name and produces the JSON-schema manifest the LLM
/// provider consumes (§6.5).
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.info().name.clone();
        self.tools.insert(name, tool);
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// `{type: "function", function: {name, description, parameters}}` per tool.
    pub fn manifest(&self) -> Vec<Value> {
        let mut entries: Vec<(String, Value)> = self
            .tools
            .values()
            .map(|tool| {
                let info = tool.info();
                let mut properties = serde_json::Map::new();
                let mut required = Vec::new();
                for param in &info.parameters {
                    properties.insert(
                        param.name.clone(),
                        json!({ "type": param.type_tag, "description": param.description }),
                    );
                    if param.required {
                        required.push(param.name.clone());
                    }
                }
                let entry = json!({
                    "type": "function",
                    "function": {
                        "name": info.name,
                        "description": info.description,
                        "parameters": {
                            "type": "object",
                            "properties": properties,
                            "required": required,
                        }
                    }
                });
                (info.name, entry)
            })
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries.into_iter().map(|(_, entry)| entry).collect()
    }

    /// Execution contract (§4.5): unknown name / argument parse failure /
    /// tool exception all come back as a structured value, never a panic.
    pub async fn call(&self, name: &str, raw_arguments: &str) -> Value {
        let Some(tool) = self.tools.get(name) else {
            return json!({
                "error": "unknown_tool",
                "tool_name": name,
                "available": self.names(),
            });
        };

        let arguments: Value = match serde_json::from_str(raw_arguments) {
            Ok(v) => v,
            Err(err) => {
                return json!({
                    "error": "argument_parse_error",
                    "tool_name": name,
                    "parameters": raw_arguments,
                    "message": err.to_string(),
                });
            }
        };

        match tool.execute(&arguments).await {
            Ok(result) => result,
            Err(message) => json!({
                "error": "tool_exception",
                "tool_name": name,
                "parameters": arguments,
                "message": message,
            }),
        }
    }
}

/// Truncates a tool result to an implementation-defined display length
/// (§4.4 TOOL_RESULT delta); the full structured value is still what goes
/// back into conversation history.
pub fn truncate_tool_result(text: &str, max_len: usize) -> String {
    if text.chars().count() <= max_len {
        text.to_string()
    } else {
        let truncated: String = text.chars().take(max_len).collect();
        format!("{truncated}…")
    }
}

// ─── Calculator example tool ────────────────────────────────────────────

/// A basic four-function calculator. Arithmetic expressions are evaluated
/// by a small recursive-descent parser rather than any runtime `eval`.
pub struct CalculatorTool;

#[async_trait]
impl Tool for CalculatorTool {
    fn info(&self) -> ToolInfo {
        ToolInfo {
            name: "calculate".to_string(),
            description: "Perform basic mathematical calculations".to_string(),
            parameters: vec![ToolParameter::required(
                "expression",
                "string",
                "Mathematical expression to evaluate (e.g., '2 + 2', '10 * 5')",
            )],
        }
    }

    async fn execute(&self, arguments: &Value) -> Result<Value, String> {
        let expression = arguments
            .get("expression")
            .and_then(Value::as_str)
            .ok_or_else(|| "missing required argument 'expression'".to_string())?;

        match eval_expression(expression) {
            Ok(result) => Ok(json!({
                "expression": expression,
                "result": result,
                "message": format!("{expression} = {result}"),
            })),
            Err(err) => Ok(json!({
                "expression": expression,
                "error": err,
                "message": format!("Error calculating {expression}: {err}"),
            })),
        }
    }
}

fn eval_expression(expr: &str) -> Result<f64, String> {
    let tokens = tokenize(expr)?;
    let mut parser = ExprParser {
        tokens,
        pos: 0,
    };
    let value = parser.parse_expr()?;
    if parser.pos != parser.tokens.len() {
        return Err("unexpected trailing input".to_string());
    }
    Ok(value)
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    LParen,
    RParen,
}

fn tokenize(expr: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = expr.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' => i += 1,
            '+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '*' => {
                tokens.push(Token::Star);
                i += 1;
            }
            '/' => {
                tokens.push(Token::Slash);
                i += 1;
            }
            '^' => {
                tokens.push(Token::Caret);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            c if c.is_ascii_digit() || c == '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let value = text
                    .parse::<f64>()
                    .map_err(|_| format!("invalid number literal '{text}'"))?;
                tokens.push(Token::Number(value));
            }
            other => return Err(format!("unexpected character '{other}'")),
        }
    }
    Ok(tokens)
}

struct ExprParser {
    tokens: Vec<Token>,
    pos: usize,
}

impl ExprParser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        t
    }

    // expr := term (('+' | '-') term)*
    fn parse_expr(&mut self) -> Result<f64, String> {
        let mut value = self.parse_term()?;
        loop {
            match self.peek() {
                Some(Token::Plus) => {
                    self.advance();
                    value += self.parse_term()?;
                }
                Some(Token::Minus) => {
                    self.advance();
                    value -= self.parse_term()?;
                }
                _ => break,
            }
        }
        Ok(value)
    }

    // term := power (('*' | '/') power)*
    fn parse_term(&mut self) -> Result<f64, String> {
        let mut value = self.parse_power()?;
        loop {
            match self.peek() {
                Some(Token::Star) => {
                    self.advance();
                    value *= self.parse_power()?;
                }
                Some(Token::Slash) => {
                    self.advance();
                    let divisor = self.parse_power()?;
                    if divisor == 0.0 {
                        return Err("division by zero".to_string());
                    }
                    value /= divisor;
                }
                _ => break,
            }
        }
        Ok(value)
    }

    // power := unary ('^' power)?       (right-associative)
    fn parse_power(&mut self) -> Result<f64, String> {
        let base = self.parse_unary()?;
        if matches!(self.peek(), Some(Token::Caret)) {
            self.advance();
            let exponent = self.parse_power()?;
            Ok(base.powf(exponent))
        } else {
            Ok(base)
        }
    }

    // unary := '-' unary | atom
    fn parse_unary(&mut self) -> Result<f64, String> {
        if matches!(self.peek(), Some(Token::Minus)) {
            self.advance();
            Ok(-self.parse_unary()?)
        } else {
            self.parse_atom()
        }
    }

    // atom := number | '(' expr ')'
    fn parse_atom(&mut self) -> Result<f64, String> {
        match self.advance() {
            Some(Token::Number(n)) => Ok(n),
            Some(Token::LParen) => {
                let value = self.parse_expr()?;
                match self.advance() {
                    Some(Token::RParen) => Ok(value),
                    _ => Err("expected closing parenthesis".to_string()),
                }
            }
            other => Err(format!("unexpected token {other:?}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evaluates_basic_arithmetic() {
        assert_eq!(eval_expression("2 + 2").unwrap(), 4.0);
        assert_eq!(eval_expression("10 * 5").unwrap(), 50.0);
    }

    #[test]
    fn respects_operator_precedence() {
        assert_eq!(eval_expression("2 + 3 * 4").unwrap(), 14.0);
    }

    #[test]
    fn respects_parentheses() {
        assert_eq!(eval_expression("(2 + 3) * 4").unwrap(), 20.0);
    }

    #[test]
    fn handles_unary_minus() {
        assert_eq!(eval_expression("-5 + 2").unwrap(), -3.0);
    }

    #[test]
    fn power_is_right_associative() {
        assert_eq!(eval_expression("2 ^ 3").unwrap(), 8.0);
    }

    #[test]
    fn division_by_zero_is_an_error() {
        assert!(eval_expression("1 / 0").is_err());
    }

    #[tokio::test]
    async fn calculator_tool_end_to_end() {
        let tool = CalculatorTool;
        let result = tool.execute(&json!({"expression": "2 + 2"})).await.unwrap();
        assert_eq!(result["result"], 4.0);
    }

    #[tokio::test]
    async fn registry_reports_unknown_tool_with_available_names() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(CalculatorTool));
        let result = registry.call("frobnicate", "{}").await;
        assert_eq!(result["error"], "unknown_tool");
        assert_eq!(result["available"], json!(["calculate"]));
    }

    #[tokio::test]
    async fn registry_reports_argument_parse_failure() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(CalculatorTool));
        let result = registry.call("calculate", "not json").await;
        assert_eq!(result["error"], "argument_parse_error");
    }

    #[tokio::test]
    async fn manifest_matches_json_schema_shape() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(CalculatorTool));
        let manifest = registry.manifest();
        assert_eq!(manifest.len(), 1);
        assert_eq!(manifest[0]["type"], "function");
        assert_eq!(manifest[0]["function"]["name"], "calculate");
        assert_eq!(manifest[0]["function"]["parameters"]["required"], json!(["expression"]));
    }

    #[test]
    fn truncates_long_tool_results() {
        let long = "x".repeat(250);
        let truncated = truncate_tool_result(&long, 200);
        assert_eq!(truncated.chars().count(), 201); // 200 + the ellipsis char
    }

    #[test]
    fn leaves_short_tool_results_untouched() {
        assert_eq!(truncate_tool_result("4", 200), "4");
    }
}
