use crate::error::EvaluationError;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum TokenKind {
    Number(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    StarStar,
    Slash,
    LParen,
    RParen,
    /// Any character outside the arithmetic alphabet, rejected by the parser
    Symbol(char),
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Token {
    pub kind: TokenKind,
    /// 1-based character column of the first character
    pub column: usize,
}

#[derive(Debug)]
pub(crate) struct Lexer<'a> {
    input: &'a str,
    /// Byte offset into `input`
    pos: usize,
    col: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            input,
            pos: 0,
            col: 1,
        }
    }

    /// Tokenize the whole input; the last token is always `Eof`.
    pub fn tokenize(mut self) -> Result<Vec<Token>, EvaluationError> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token()?;
            let done = token.kind == TokenKind::Eof;
            tokens.push(token);
            if done {
                return Ok(tokens);
            }
        }
    }

    fn error(&self, column: usize, msg: impl Into<String>) -> EvaluationError {
        EvaluationError::Syntax {
            column,
            message: msg.into(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn peek_second(&self) -> Option<char> {
        self.input[self.pos..].chars().nth(1)
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        self.col += 1;
        Some(c)
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.advance();
        }
    }

    fn next_token(&mut self) -> Result<Token, EvaluationError> {
        self.skip_whitespace();
        let column = self.col;

        let Some(c) = self.peek() else {
            return Ok(Token {
                kind: TokenKind::Eof,
                column,
            });
        };

        let kind = match c {
            '0'..='9' => self.read_number(column)?,
            '.' if self.peek_second().is_some_and(|d| d.is_ascii_digit()) => {
                self.read_number(column)?
            }
            'a'..='z' | 'A'..='Z' | '_' => self.read_ident(),
            _ => {
                self.advance();
                match c {
                    '+' => TokenKind::Plus,
                    '-' => TokenKind::Minus,
                    '*' if self.peek() == Some('*') => {
                        self.advance();
                        TokenKind::StarStar
                    }
                    '*' => TokenKind::Star,
                    '/' => TokenKind::Slash,
                    '(' => TokenKind::LParen,
                    ')' => TokenKind::RParen,
                    other => TokenKind::Symbol(other),
                }
            }
        };

        Ok(Token { kind, column })
    }

    fn read_number(&mut self, column: usize) -> Result<TokenKind, EvaluationError> {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.advance();
        }
        if self.peek() == Some('.') {
            self.advance();
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.advance();
            }
        }
        // Exponent only when digits follow, so `2e` stays a syntax error below
        if matches!(self.peek(), Some('e' | 'E')) {
            let rest = &self.input[self.pos + 1..];
            let digits = rest.strip_prefix(['+', '-']).unwrap_or(rest);
            if digits.starts_with(|c: char| c.is_ascii_digit()) {
                self.advance();
                if matches!(self.peek(), Some('+' | '-')) {
                    self.advance();
                }
                while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                    self.advance();
                }
            }
        }

        let text = &self.input[start..self.pos];
        if self.peek().is_some_and(|c| c.is_alphanumeric() || c == '_' || c == '.') {
            return Err(self.error(column, format!("malformed number starting with '{text}'")));
        }
        let value = text
            .parse::<f64>()
            .map_err(|e| self.error(column, format!("invalid number '{text}': {e}")))?;
        if !value.is_finite() {
            return Err(self.error(column, format!("number '{text}' is out of range")));
        }
        Ok(TokenKind::Number(value))
    }

    fn read_ident(&mut self) -> TokenKind {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_alphanumeric() || c == '_') {
            self.advance();
        }
        TokenKind::Ident(self.input[start..self.pos].to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<TokenKind> {
        Lexer::new(input)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn test_default_formula_tokens() {
        assert_eq!(
            kinds("(B4 - B3) / (B4 + B3)"),
            vec![
                TokenKind::LParen,
                TokenKind::Ident("B4".into()),
                TokenKind::Minus,
                TokenKind::Ident("B3".into()),
                TokenKind::RParen,
                TokenKind::Slash,
                TokenKind::LParen,
                TokenKind::Ident("B4".into()),
                TokenKind::Plus,
                TokenKind::Ident("B3".into()),
                TokenKind::RParen,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_number_forms() {
        assert_eq!(
            kinds("12 0.5 .5 1e-3 2E+2 3."),
            vec![
                TokenKind::Number(12.0),
                TokenKind::Number(0.5),
                TokenKind::Number(0.5),
                TokenKind::Number(0.001),
                TokenKind::Number(200.0),
                TokenKind::Number(3.0),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_power_operator() {
        assert_eq!(
            kinds("B1**2*B2"),
            vec![
                TokenKind::Ident("B1".into()),
                TokenKind::StarStar,
                TokenKind::Number(2.0),
                TokenKind::Star,
                TokenKind::Ident("B2".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_foreign_characters_become_symbols() {
        let tokens = Lexer::new("os.system('ls')").tokenize().unwrap();
        assert_eq!(tokens[1].kind, TokenKind::Symbol('.'));
        assert_eq!(tokens[1].column, 3);
        assert!(tokens.iter().any(|t| t.kind == TokenKind::Symbol('\'')));
    }

    #[test]
    fn test_columns_count_characters() {
        let tokens = Lexer::new("é + B1").tokenize().unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Symbol('é'));
        assert_eq!(tokens[2].column, 5);
    }

    #[test]
    fn test_malformed_numbers() {
        assert!(matches!(
            Lexer::new("1.2.3").tokenize(),
            Err(EvaluationError::Syntax { column: 1, .. })
        ));
        assert!(Lexer::new("2B").tokenize().is_err());
        assert!(Lexer::new("2e").tokenize().is_err());
    }

    #[test]
    fn test_overflowing_literal_rejected() {
        match Lexer::new("B1 * 1e999").tokenize() {
            Err(EvaluationError::Syntax { column, message }) => {
                assert_eq!(column, 6);
                assert!(message.contains("out of range"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(kinds("1e308")[0], TokenKind::Number(1e308));
    }
}
