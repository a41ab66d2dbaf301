//! Recursive descent parser for `py:` expressions

use super::ast::*;
use crate::pipeline::rules::MAX_DEPTH;

/// Deepest nesting of groups, unary operators and operator chains a `py:`
/// expression may have
pub const MAX_NESTING: usize = MAX_DEPTH * 8;

/// Parse error with position information
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub message: String,
    pub position: usize,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "at position {}: {}", self.position, self.message)
    }
}

impl std::error::Error for ParseError {}

/// Parse a complete expression
pub fn parse_expr(input: &str) -> Result<PyExpr, ParseError> {
    let mut parser = Parser::new(input)?;
    let expr = parser.parse_expression()?;
    if parser.current != Token::Eof {
        return Err(parser.error(format!("unexpected token after expression: {:?}", parser.current)));
    }
    Ok(expr)
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Int(i64),
    Float(f64),
    Str(String),

    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Dot,
    Comma,
    Colon,
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,

    Eof,
}

struct Lexer<'a> {
    input: &'a str,
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
}

impl<'a> Lexer<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input,
            chars: input.char_indices().peekable(),
        }
    }

    fn current_pos(&mut self) -> usize {
        self.chars.peek().map(|(i, _)| *i).unwrap_or(self.input.len())
    }

    fn error(&self, position: usize, message: impl Into<String>) -> ParseError {
        ParseError {
            message: message.into(),
            position,
        }
    }

    fn next_token(&mut self) -> Result<Token, ParseError> {
        while let Some(&(_, ch)) = self.chars.peek() {
            if ch.is_whitespace() {
                self.chars.next();
            } else {
                break;
            }
        }

        let Some(&(pos, ch)) = self.chars.peek() else {
            return Ok(Token::Eof);
        };

        let single = match ch {
            '+' => Some(Token::Plus),
            '-' => Some(Token::Minus),
            '*' => Some(Token::Star),
            '/' => Some(Token::Slash),
            '%' => Some(Token::Percent),
            '.' => Some(Token::Dot),
            ',' => Some(Token::Comma),
            ':' => Some(Token::Colon),
            '(' => Some(Token::LParen),
            ')' => Some(Token::RParen),
            '[' => Some(Token::LBracket),
            ']' => Some(Token::RBracket),
            '{' => Some(Token::LBrace),
            '}' => Some(Token::RBrace),
            _ => None,
        };
        if let Some(tok) = single {
            // a leading '.' followed by a digit is a float like `.5`
            let dot_number = ch == '.'
                && self.input[pos + 1..]
                    .chars()
                    .next()
                    .is_some_and(|c| c.is_ascii_digit());
            if !dot_number {
                self.chars.next();
                return Ok(tok);
            }
        }

        if matches!(ch, '=' | '!' | '<' | '>') {
            self.chars.next();
            let followed_by_eq = matches!(self.chars.peek(), Some(&(_, '=')));
            if followed_by_eq {
                self.chars.next();
            }
            return match (ch, followed_by_eq) {
                ('=', true) => Ok(Token::Eq),
                ('!', true) => Ok(Token::Ne),
                ('<', true) => Ok(Token::Le),
                ('>', true) => Ok(Token::Ge),
                ('<', false) => Ok(Token::Lt),
                ('>', false) => Ok(Token::Gt),
                _ => Err(self.error(pos, format!("unexpected character: '{}'", ch))),
            };
        }

        if ch == '\'' || ch == '"' {
            return self.lex_string(pos, ch);
        }

        if ch.is_ascii_digit() || ch == '.' {
            return self.lex_number(pos);
        }

        if ch.is_alphabetic() || ch == '_' {
            let start = pos;
            while let Some(&(_, c)) = self.chars.peek() {
                if c.is_alphanumeric() || c == '_' {
                    self.chars.next();
                } else {
                    break;
                }
            }
            let end = self.current_pos();
            return Ok(Token::Ident(self.input[start..end].to_string()));
        }

        Err(self.error(pos, format!("unexpected character: '{}'", ch)))
    }

    fn lex_string(&mut self, pos: usize, quote: char) -> Result<Token, ParseError> {
        self.chars.next();
        let mut s = String::new();
        loop {
            match self.chars.next() {
                Some((_, c)) if c == quote => break,
                Some((_, '\\')) => match self.chars.next() {
                    Some((_, 'n')) => s.push('\n'),
                    Some((_, 't')) => s.push('\t'),
                    Some((_, c)) => s.push(c),
                    None => return Err(self.error(pos, "unclosed string literal")),
                },
                Some((_, c)) => s.push(c),
                None => return Err(self.error(pos, "unclosed string literal")),
            }
        }
        Ok(Token::Str(s))
    }

    fn lex_number(&mut self, start: usize) -> Result<Token, ParseError> {
        let mut has_dot = false;
        while let Some(&(i, c)) = self.chars.peek() {
            if c.is_ascii_digit() {
                self.chars.next();
            } else if c == '.' && !has_dot {
                // a dot followed by a name is attribute access
                let next = self.input[i + 1..].chars().next();
                if next.is_some_and(|n| n.is_alphabetic() || n == '_') {
                    break;
                }
                has_dot = true;
                self.chars.next();
            } else {
                break;
            }
        }

        let end = self.current_pos();
        let text = &self.input[start..end];
        if has_dot {
            text.parse::<f64>()
                .map(Token::Float)
                .map_err(|_| self.error(start, format!("invalid float: {}", text)))
        } else {
            text.parse::<i64>()
                .map(Token::Int)
                .map_err(|_| self.error(start, format!("invalid integer: {}", text)))
        }
    }

    fn peek_token(&mut self) -> Result<Token, ParseError> {
        let saved = self.chars.clone();
        let tok = self.next_token()?;
        self.chars = saved;
        Ok(tok)
    }
}

struct Parser<'a> {
    lexer: Lexer<'a>,
    current: Token,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Result<Self, ParseError> {
        let mut lexer = Lexer::new(input);
        let current = lexer.next_token()?;
        Ok(Self {
            lexer,
            current,
            depth: 0,
        })
    }

    fn error(&mut self, message: impl Into<String>) -> ParseError {
        ParseError {
            message: message.into(),
            position: self.lexer.current_pos(),
        }
    }

    fn advance(&mut self) -> Result<(), ParseError> {
        self.current = self.lexer.next_token()?;
        Ok(())
    }

    fn expect(&mut self, expected: Token) -> Result<(), ParseError> {
        if self.current == expected {
            self.advance()
        } else {
            Err(self.error(format!("expected {:?}, found {:?}", expected, self.current)))
        }
    }

    /// One level deeper; fails past `MAX_NESTING`
    fn enter(&mut self) -> Result<(), ParseError> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(self.error(format!("expression nested deeper than {} levels", MAX_NESTING)));
        }
        Ok(())
    }

    fn leave(&mut self, levels: usize) {
        self.depth = self.depth.saturating_sub(levels);
    }

    fn at_keyword(&self, kw: &str) -> bool {
        matches!(&self.current, Token::Ident(s) if s == kw)
    }

    fn parse_expression(&mut self) -> Result<PyExpr, ParseError> {
        self.enter()?;
        let expr = self.parse_conditional();
        self.leave(1);
        expr
    }

    /// expression = or_test ("if" or_test "else" expression)?
    fn parse_conditional(&mut self) -> Result<PyExpr, ParseError> {
        let body = self.parse_or()?;
        if self.at_keyword("if") {
            self.advance()?;
            let test = self.parse_or()?;
            if !self.at_keyword("else") {
                return Err(self.error("expected 'else' in conditional expression"));
            }
            self.advance()?;
            let orelse = self.parse_expression()?;
            return Ok(PyExpr::Conditional {
                body: Box::new(body),
                test: Box::new(test),
                orelse: Box::new(orelse),
            });
        }
        Ok(body)
    }

    /// or_test = and_test ("or" and_test)*
    fn parse_or(&mut self) -> Result<PyExpr, ParseError> {
        let mut left = self.parse_and()?;
        let mut links = 0;
        while self.at_keyword("or") {
            self.enter()?;
            links += 1;
            self.advance()?;
            let right = self.parse_and()?;
            left = PyExpr::Bool {
                left: Box::new(left),
                op: BoolOp::Or,
                right: Box::new(right),
            };
        }
        self.leave(links);
        Ok(left)
    }

    /// and_test = not_test ("and" not_test)*
    fn parse_and(&mut self) -> Result<PyExpr, ParseError> {
        let mut left = self.parse_not()?;
        let mut links = 0;
        while self.at_keyword("and") {
            self.enter()?;
            links += 1;
            self.advance()?;
            let right = self.parse_not()?;
            left = PyExpr::Bool {
                left: Box::new(left),
                op: BoolOp::And,
                right: Box::new(right),
            };
        }
        self.leave(links);
        Ok(left)
    }

    /// not_test = "not" not_test | comparison
    fn parse_not(&mut self) -> Result<PyExpr, ParseError> {
        if self.at_keyword("not") {
            self.advance()?;
            self.enter()?;
            let operand = self.parse_not();
            self.leave(1);
            return Ok(PyExpr::Not(Box::new(operand?)));
        }
        self.parse_comparison()
    }

    /// comparison = arith (cmp_op arith)?
    fn parse_comparison(&mut self) -> Result<PyExpr, ParseError> {
        let left = self.parse_arith()?;

        let op = if self.at_keyword("not") {
            if self.lexer.peek_token()? == Token::Ident("in".to_string()) {
                self.advance()?;
                Some(CmpOp::NotIn)
            } else {
                None
            }
        } else {
            match &self.current {
                Token::Eq => Some(CmpOp::Eq),
                Token::Ne => Some(CmpOp::Ne),
                Token::Lt => Some(CmpOp::Lt),
                Token::Le => Some(CmpOp::Le),
                Token::Gt => Some(CmpOp::Gt),
                Token::Ge => Some(CmpOp::Ge),
                Token::Ident(s) if s == "in" => Some(CmpOp::In),
                _ => None,
            }
        };

        if let Some(op) = op {
            self.advance()?;
            let right = self.parse_arith()?;
            return Ok(PyExpr::Compare {
                left: Box::new(left),
                op,
                right: Box::new(right),
            });
        }
        Ok(left)
    }

    /// arith = term (("+"|"-") term)*
    fn parse_arith(&mut self) -> Result<PyExpr, ParseError> {
        let mut left = self.parse_term()?;
        let mut links = 0;
        loop {
            let op = match &self.current {
                Token::Plus => BinOp::Add,
                Token::Minus => BinOp::Sub,
                _ => break,
            };
            self.enter()?;
            links += 1;
            self.advance()?;
            let right = self.parse_term()?;
            left = PyExpr::Binary {
                left: Box::new(left),
                op,
                right: Box::new(right),
            };
        }
        self.leave(links);
        Ok(left)
    }

    /// term = factor (("*"|"/"|"%") factor)*
    fn parse_term(&mut self) -> Result<PyExpr, ParseError> {
        let mut left = self.parse_factor()?;
        let mut links = 0;
        loop {
            let op = match &self.current {
                Token::Star => BinOp::Mul,
                Token::Slash => BinOp::Div,
                Token::Percent => BinOp::Mod,
                _ => break,
            };
            self.enter()?;
            links += 1;
            self.advance()?;
            let right = self.parse_factor()?;
            left = PyExpr::Binary {
                left: Box::new(left),
                op,
                right: Box::new(right),
            };
        }
        self.leave(links);
        Ok(left)
    }

    /// factor = ("-"|"+") factor | postfix
    fn parse_factor(&mut self) -> Result<PyExpr, ParseError> {
        let negate = match self.current {
            Token::Minus => true,
            Token::Plus => false,
            _ => return self.parse_postfix(),
        };
        self.advance()?;
        self.enter()?;
        let operand = self.parse_factor();
        self.leave(1);
        let operand = operand?;
        Ok(if negate {
            PyExpr::Negate(Box::new(operand))
        } else {
            operand
        })
    }

    /// postfix = primary ("." ident call_args? | "[" subscript "]")*
    fn parse_postfix(&mut self) -> Result<PyExpr, ParseError> {
        let mut expr = self.parse_primary()?;
        let mut links = 0;
        loop {
            if matches!(self.current, Token::Dot | Token::LBracket) {
                self.enter()?;
                links += 1;
            }
            match self.current {
                Token::Dot => {
                    self.advance()?;
                    let Token::Ident(name) = self.current.clone() else {
                        return Err(self.error("expected attribute name after '.'"));
                    };
                    self.advance()?;
                    if self.current == Token::LParen {
                        let args = self.parse_call_args()?;
                        expr = PyExpr::Method {
                            object: Box::new(expr),
                            method: name,
                            args,
                        };
                    } else {
                        expr = PyExpr::Attribute {
                            object: Box::new(expr),
                            name,
                        };
                    }
                }
                Token::LBracket => {
                    self.advance()?;
                    expr = self.parse_subscript(expr)?;
                    self.expect(Token::RBracket)?;
                }
                _ => break,
            }
        }
        self.leave(links);
        Ok(expr)
    }

    fn parse_subscript(&mut self, object: PyExpr) -> Result<PyExpr, ParseError> {
        let start = if self.current == Token::Colon {
            None
        } else {
            Some(Box::new(self.parse_expression()?))
        };

        if self.current != Token::Colon {
            let Some(index) = start else {
                return Err(self.error("empty subscript"));
            };
            return Ok(PyExpr::Index {
                object: Box::new(object),
                index,
            });
        }

        self.advance()?;
        let stop = if self.current == Token::RBracket {
            None
        } else {
            Some(Box::new(self.parse_expression()?))
        };
        Ok(PyExpr::Slice {
            object: Box::new(object),
            start,
            stop,
        })
    }

    fn parse_call_args(&mut self) -> Result<Vec<PyExpr>, ParseError> {
        self.expect(Token::LParen)?;
        let mut args = Vec::new();
        while self.current != Token::RParen {
            args.push(self.parse_expression()?);
            if self.current == Token::Comma {
                self.advance()?;
            } else {
                break;
            }
        }
        self.expect(Token::RParen)?;
        Ok(args)
    }

    /// primary = literal | name call_args? | "(" expression ")" | list | dict
    fn parse_primary(&mut self) -> Result<PyExpr, ParseError> {
        match self.current.clone() {
            Token::Int(n) => {
                self.advance()?;
                Ok(PyExpr::Constant(PyValue::Int(n)))
            }
            Token::Float(n) => {
                self.advance()?;
                Ok(PyExpr::Constant(PyValue::Float(n)))
            }
            Token::Str(s) => {
                self.advance()?;
                // adjacent literals concatenate
                let mut s = s;
                while let Token::Str(next) = &self.current {
                    s.push_str(next);
                    self.advance()?;
                }
                Ok(PyExpr::Constant(PyValue::Str(s)))
            }
            Token::Ident(name) => {
                self.advance()?;
                match name.as_str() {
                    "True" => return Ok(PyExpr::Constant(PyValue::Bool(true))),
                    "False" => return Ok(PyExpr::Constant(PyValue::Bool(false))),
                    "None" => return Ok(PyExpr::Constant(PyValue::None)),
                    _ => {}
                }
                if self.current == Token::LParen {
                    let args = self.parse_call_args()?;
                    return Ok(PyExpr::Call { func: name, args });
                }
                Ok(PyExpr::Name(name))
            }
            Token::LParen => {
                self.advance()?;
                let expr = self.parse_expression()?;
                self.expect(Token::RParen)?;
                Ok(expr)
            }
            Token::LBracket => {
                self.advance()?;
                let mut items = Vec::new();
                while self.current != Token::RBracket {
                    items.push(self.parse_expression()?);
                    if self.current == Token::Comma {
                        self.advance()?;
                    } else {
                        break;
                    }
                }
                self.expect(Token::RBracket)?;
                Ok(PyExpr::List(items))
            }
            Token::LBrace => {
                self.advance()?;
                let mut entries = Vec::new();
                while self.current != Token::RBrace {
                    let key = self.parse_expression()?;
                    self.expect(Token::Colon)?;
                    let value = self.parse_expression()?;
                    entries.push((key, value));
                    if self.current == Token::Comma {
                        self.advance()?;
                    } else {
                        break;
                    }
                }
                self.expect(Token::RBrace)?;
                Ok(PyExpr::Dict(entries))
            }
            other => Err(self.error(format!("unexpected token: {:?}", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(n: &str) -> Box<PyExpr> {
        Box::new(PyExpr::Name(n.to_string()))
    }

    #[test]
    fn test_precedence() {
        let expr = parse_expr("a + b * 2").unwrap();
        assert_eq!(
            expr,
            PyExpr::Binary {
                left: name("a"),
                op: BinOp::Add,
                right: Box::new(PyExpr::Binary {
                    left: name("b"),
                    op: BinOp::Mul,
                    right: Box::new(PyExpr::Constant(PyValue::Int(2))),
                }),
            }
        );
    }

    #[test]
    fn test_code_table_shape() {
        let expr = parse_expr("{'1':'x','2':'y'}.get(code,'?')").unwrap();
        let PyExpr::Method { object, method, args } = expr else {
            panic!("expected method call");
        };
        assert_eq!(method, "get");
        assert!(matches!(*object, PyExpr::Dict(ref entries) if entries.len() == 2));
        assert_eq!(args.len(), 2);
    }

    #[test]
    fn test_conditional_and_not_in() {
        let expr = parse_expr("'a' if x not in ['1', '2'] else 'b'").unwrap();
        let PyExpr::Conditional { test, .. } = expr else {
            panic!("expected conditional");
        };
        assert!(matches!(*test, PyExpr::Compare { op: CmpOp::NotIn, .. }));
    }

    #[test]
    fn test_record_attribute_and_slice() {
        let expr = parse_expr("record.code[0:2]").unwrap();
        assert!(matches!(expr, PyExpr::Slice { start: Some(_), stop: Some(_), .. }));
        assert!(matches!(parse_expr("x[:3]").unwrap(), PyExpr::Slice { start: None, .. }));
    }

    #[test]
    fn test_numbers() {
        assert_eq!(parse_expr("1.5").unwrap(), PyExpr::Constant(PyValue::Float(1.5)));
        assert_eq!(parse_expr(".5").unwrap(), PyExpr::Constant(PyValue::Float(0.5)));
        assert_eq!(parse_expr("42").unwrap(), PyExpr::Constant(PyValue::Int(42)));
    }

    #[test]
    fn test_errors() {
        assert!(parse_expr("'open").is_err());
        assert!(parse_expr("a +").is_err());
        assert!(parse_expr("a b").is_err());
        assert!(parse_expr("x = 1").is_err());
        assert!(parse_expr("a if b").is_err());
    }

    #[test]
    fn test_nesting_limit() {
        let nested = |n: usize| format!("{}1{}", "(".repeat(n), ")".repeat(n));
        assert!(parse_expr(&nested(MAX_NESTING - 1)).is_ok());

        let err = parse_expr(&nested(150)).unwrap_err();
        assert!(err.message.contains("nested deeper"));
        assert!(parse_expr(&nested(50_000)).is_err());

        assert!(parse_expr(&"-".repeat(10_000)).is_err());
        assert!(parse_expr(&"not ".repeat(10_000)).is_err());
        let chain = vec!["a"; 10_000].join(" + ");
        assert!(parse_expr(&chain).is_err());
        let postfix = format!("x{}", ".y".repeat(10_000));
        assert!(parse_expr(&postfix).is_err());

        // a parse that fails deep inside leaves the parser usable for siblings
        assert!(parse_expr("[(1), ((2)), -(-3)]").is_ok());
    }
}
