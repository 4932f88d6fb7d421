//! Tokenizer for the sandbox grammar.
//!
//! Python-style keyword operators (`and`, `or`, `not`) and literal aliases
//! (`None`, `True`, `False`) are accepted alongside the C-style forms, since
//! agents write both.

use super::ExprError;

#[derive(Debug, Clone, PartialEq)]
pub(super) enum Token {
    Num(f64),
    Str(String),
    Ident(String),
    True,
    False,
    Null,
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Colon,
    Dot,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Not,
}

pub(super) fn tokenize(src: &str) -> Result<Vec<Token>, ExprError> {
    let chars: Vec<char> = src.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\r' | '\n' => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '[' => {
                tokens.push(Token::LBracket);
                i += 1;
            }
            ']' => {
                tokens.push(Token::RBracket);
                i += 1;
            }
            '{' => {
                tokens.push(Token::LBrace);
                i += 1;
            }
            '}' => {
                tokens.push(Token::RBrace);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            ':' => {
                tokens.push(Token::Colon);
                i += 1;
            }
            '.' => {
                tokens.push(Token::Dot);
                i += 1;
            }
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
            '%' => {
                tokens.push(Token::Percent);
                i += 1;
            }
            '=' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::EqEq);
                    i += 2;
                } else {
                    return Err(ExprError::Parse("assignment is not supported".into()));
                }
            }
            '!' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::NotEq);
                    i += 2;
                } else {
                    tokens.push(Token::Not);
                    i += 1;
                }
            }
            '<' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Le);
                    i += 2;
                } else {
                    tokens.push(Token::Lt);
                    i += 1;
                }
            }
            '>' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Ge);
                    i += 2;
                } else {
                    tokens.push(Token::Gt);
                    i += 1;
                }
            }
            '&' => {
                if chars.get(i + 1) == Some(&'&') {
                    tokens.push(Token::And);
                    i += 2;
                } else {
                    return Err(ExprError::Parse("unexpected '&'".into()));
                }
            }
            '|' => {
                if chars.get(i + 1) == Some(&'|') {
                    tokens.push(Token::Or);
                    i += 2;
                } else {
                    return Err(ExprError::Parse("unexpected '|'".into()));
                }
            }
            '\'' | '"' => {
                let quote = c;
                let mut value = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err(ExprError::Parse("unterminated string".into())),
                        Some(&ch) if ch == quote => {
                            i += 1;
                            break;
                        }
                        Some(&'\\') => {
                            match chars.get(i + 1) {
                                Some(&'n') => value.push('\n'),
                                Some(&'t') => value.push('\t'),
                                Some(&escaped) => value.push(escaped),
                                None => {
                                    return Err(ExprError::Parse("unterminated string".into()))
                                }
                            }
                            i += 2;
                        }
                        Some(&ch) => {
                            value.push(ch);
                            i += 1;
                        }
                    }
                }
                tokens.push(Token::Str(value));
            }
            '0'..='9' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    // A dot followed by a non-digit is member access, not a
                    // decimal point.
                    if chars[i] == '.' && !chars.get(i + 1).is_some_and(char::is_ascii_digit) {
                        break;
                    }
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let num = text
                    .parse::<f64>()
                    .map_err(|_| ExprError::Parse(format!("bad number '{text}'")))?;
                tokens.push(Token::Num(num));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                tokens.push(match word.as_str() {
                    "and" => Token::And,
                    "or" => Token::Or,
                    "not" => Token::Not,
                    "true" | "True" => Token::True,
                    "false" | "False" => Token::False,
                    "null" | "None" => Token::Null,
                    _ => Token::Ident(word),
                });
            }
            other => return Err(ExprError::Parse(format!("unexpected character '{other}'"))),
        }
    }

    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizes_guard_expression() {
        let tokens = tokenize("getData('counter') == None").unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Ident("getData".into()),
                Token::LParen,
                Token::Str("counter".into()),
                Token::RParen,
                Token::EqEq,
                Token::Null,
            ]
        );
    }

    #[test]
    fn keyword_and_symbol_operators_agree() {
        assert_eq!(tokenize("a and b").unwrap(), tokenize("a && b").unwrap());
        assert_eq!(tokenize("a or b").unwrap(), tokenize("a || b").unwrap());
        assert_eq!(tokenize("not a").unwrap(), tokenize("!a").unwrap());
    }

    #[test]
    fn decimal_point_vs_member_access() {
        assert_eq!(tokenize("1.5").unwrap(), vec![Token::Num(1.5)]);
        assert_eq!(
            tokenize("time.hour").unwrap(),
            vec![
                Token::Ident("time".into()),
                Token::Dot,
                Token::Ident("hour".into())
            ],
        );
    }

    #[test]
    fn string_literals_keep_unicode_and_escapes() {
        assert_eq!(
            tokenize("'café'").unwrap(),
            vec![Token::Str("café".into())]
        );
        assert_eq!(
            tokenize(r#""a\nb""#).unwrap(),
            vec![Token::Str("a\nb".into())]
        );
    }

    #[test]
    fn rejects_assignment() {
        assert!(tokenize("x = 1").is_err());
    }

    #[test]
    fn rejects_unterminated_string() {
        assert!(tokenize("'oops").is_err());
    }
}
