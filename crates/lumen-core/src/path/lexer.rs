use crate::error::{CoreError, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Ident(String),
    Variable(String),
    Str(String),
    Number(f64),
    Dot,
    Comma,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    And,
    Or,
    True,
    False,
}

/// Tokenize a path expression. Identifiers are ASCII alphanumeric plus `_`;
/// string literals use single quotes with `\'` and `\\` escapes.
pub fn tokenize(input: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = input.chars().collect();
    let mut pos = 0;

    while pos < chars.len() {
        let c = chars[pos];
        match c {
            ' ' | '\t' | '\r' | '\n' => pos += 1,
            '.' => {
                tokens.push(Token::Dot);
                pos += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                pos += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                pos += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                pos += 1;
            }
            '[' => {
                tokens.push(Token::LBracket);
                pos += 1;
            }
            ']' => {
                tokens.push(Token::RBracket);
                pos += 1;
            }
            '=' => {
                tokens.push(Token::Eq);
                pos += 1;
            }
            '!' => {
                if chars.get(pos + 1) == Some(&'=') {
                    tokens.push(Token::Ne);
                    pos += 2;
                } else {
                    return Err(CoreError::path_expression(format!(
                        "unexpected '!' at offset {pos}"
                    )));
                }
            }
            '>' => {
                if chars.get(pos + 1) == Some(&'=') {
                    tokens.push(Token::Ge);
                    pos += 2;
                } else {
                    tokens.push(Token::Gt);
                    pos += 1;
                }
            }
            '<' => {
                if chars.get(pos + 1) == Some(&'=') {
                    tokens.push(Token::Le);
                    pos += 2;
                } else {
                    tokens.push(Token::Lt);
                    pos += 1;
                }
            }
            '\'' => {
                pos += 1;
                let mut value = String::new();
                loop {
                    match chars.get(pos) {
                        Some('\'') => {
                            pos += 1;
                            break;
                        }
                        Some('\\') => {
                            match chars.get(pos + 1) {
                                Some('\'') => value.push('\''),
                                Some('\\') => value.push('\\'),
                                other => {
                                    return Err(CoreError::path_expression(format!(
                                        "invalid escape {other:?} in string literal"
                                    )));
                                }
                            }
                            pos += 2;
                        }
                        Some(&ch) => {
                            value.push(ch);
                            pos += 1;
                        }
                        None => {
                            return Err(CoreError::path_expression(
                                "unterminated string literal",
                            ));
                        }
                    }
                }
                tokens.push(Token::Str(value));
            }
            '%' => {
                pos += 1;
                let start = pos;
                while pos < chars.len() && (chars[pos].is_ascii_alphanumeric() || chars[pos] == '_')
                {
                    pos += 1;
                }
                if start == pos {
                    return Err(CoreError::path_expression("empty variable name after '%'"));
                }
                tokens.push(Token::Variable(chars[start..pos].iter().collect()));
            }
            c if c.is_ascii_digit() => {
                let start = pos;
                while pos < chars.len() && (chars[pos].is_ascii_digit() || chars[pos] == '.') {
                    // A dot is part of the number only when followed by a digit,
                    // otherwise it terminates the literal (member access).
                    if chars[pos] == '.'
                        && !chars
                            .get(pos + 1)
                            .map(|n| n.is_ascii_digit())
                            .unwrap_or(false)
                    {
                        break;
                    }
                    pos += 1;
                }
                let text: String = chars[start..pos].iter().collect();
                let number = text.parse::<f64>().map_err(|_| {
                    CoreError::path_expression(format!("invalid number literal '{text}'"))
                })?;
                tokens.push(Token::Number(number));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = pos;
                while pos < chars.len() && (chars[pos].is_ascii_alphanumeric() || chars[pos] == '_')
                {
                    pos += 1;
                }
                let word: String = chars[start..pos].iter().collect();
                tokens.push(match word.as_str() {
                    "and" => Token::And,
                    "or" => Token::Or,
                    "true" => Token::True,
                    "false" => Token::False,
                    _ => Token::Ident(word),
                });
            }
            other => {
                return Err(CoreError::path_expression(format!(
                    "unexpected character '{other}' at offset {pos}"
                )));
            }
        }
    }

    Ok(tokens)
}
