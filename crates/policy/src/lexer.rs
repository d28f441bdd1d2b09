//! Minimal PostgreSQL-flavoured tokenizer used by the validator.
//!
//! It only needs to know where literals, identifiers and statement
//! separators are. Comments are discarded and accepted statements are
//! re-rendered from tokens, so what executes is exactly what was checked.

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Token {
    /// Unquoted identifier or keyword, as written.
    Word(String),
    /// Double-quoted identifier; holds the unescaped name.
    QuotedIdent(String),
    /// Single-quoted string literal including its quotes.
    Str(String),
    Number(String),
    Punct(char),
    Op(String),
}

impl Token {
    pub(crate) fn is_word(&self, keyword: &str) -> bool {
        matches!(self, Token::Word(w) if w.eq_ignore_ascii_case(keyword))
    }

    pub(crate) fn is_punct(&self, c: char) -> bool {
        matches!(self, Token::Punct(p) if *p == c)
    }

    /// Name of an identifier token, quoted or not.
    pub(crate) fn ident(&self) -> Option<&str> {
        match self {
            Token::Word(w) | Token::QuotedIdent(w) => Some(w.as_str()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum LexError {
    UnterminatedString,
    UnterminatedIdentifier,
    UnterminatedComment,
    DollarQuoted,
    PrefixedString(String),
    Placeholder,
    UnexpectedChar(char),
}

impl std::fmt::Display for LexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LexError::UnterminatedString => write!(f, "unterminated string literal"),
            LexError::UnterminatedIdentifier => write!(f, "unterminated quoted identifier"),
            LexError::UnterminatedComment => write!(f, "unterminated block comment"),
            LexError::DollarQuoted => write!(f, "dollar-quoted literals are not allowed"),
            LexError::PrefixedString(prefix) => {
                write!(f, "prefixed string literal `{}'...'` is not allowed", prefix)
            }
            LexError::Placeholder => write!(f, "bind placeholders are not allowed"),
            LexError::UnexpectedChar(c) => write!(f, "unexpected character `{}`", c),
        }
    }
}

const OPERATOR_CHARS: &[char] = &[
    '+', '-', '*', '/', '<', '>', '=', '~', '!', '@', '#', '%', '^', '&', '|', ':',
];

pub(crate) fn tokenize(sql: &str) -> Result<Vec<Token>, LexError> {
    let chars = sql.chars().collect::<Vec<_>>();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        if c == '-' && next == Some('-') {
            while i < chars.len() && chars[i] != '\n' {
                i += 1;
            }
            continue;
        }

        if c == '/' && next == Some('*') {
            i = skip_block_comment(&chars, i)?;
            continue;
        }

        match c {
            '\'' => {
                let end = scan_quoted(&chars, i, '\'').ok_or(LexError::UnterminatedString)?;
                tokens.push(Token::Str(chars[i..end].iter().collect()));
                i = end;
            }
            '"' => {
                let end = scan_quoted(&chars, i, '"').ok_or(LexError::UnterminatedIdentifier)?;
                let raw = chars[i + 1..end - 1].iter().collect::<String>();
                tokens.push(Token::QuotedIdent(raw.replace("\"\"", "\"")));
                i = end;
            }
            '$' => {
                return Err(match next {
                    Some(d) if d.is_ascii_digit() => LexError::Placeholder,
                    _ => LexError::DollarQuoted,
                });
            }
            '?' => return Err(LexError::Placeholder),
            '(' | ')' | ',' | ';' | '[' | ']' => {
                tokens.push(Token::Punct(c));
                i += 1;
            }
            '.' if !next.is_some_and(|n| n.is_ascii_digit()) => {
                tokens.push(Token::Punct('.'));
                i += 1;
            }
            c if c.is_ascii_digit() || c == '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                if i < chars.len() && matches!(chars[i], 'e' | 'E') {
                    let mut j = i + 1;
                    if j < chars.len() && matches!(chars[j], '+' | '-') {
                        j += 1;
                    }
                    if j < chars.len() && chars[j].is_ascii_digit() {
                        while j < chars.len() && chars[j].is_ascii_digit() {
                            j += 1;
                        }
                        i = j;
                    }
                }
                tokens.push(Token::Number(chars[start..i].iter().collect()));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '$')
                {
                    i += 1;
                }
                let word = chars[start..i].iter().collect::<String>();
                if chars.get(i) == Some(&'\'') {
                    return Err(LexError::PrefixedString(word));
                }
                tokens.push(Token::Word(word));
            }
            c if OPERATOR_CHARS.contains(&c) => {
                let start = i;
                while i < chars.len() && OPERATOR_CHARS.contains(&chars[i]) {
                    let starts_comment = (chars[i] == '-' && chars.get(i + 1) == Some(&'-'))
                        || (chars[i] == '/' && chars.get(i + 1) == Some(&'*'));
                    if starts_comment && i > start {
                        break;
                    }
                    i += 1;
                }
                tokens.push(Token::Op(chars[start..i].iter().collect()));
            }
            other => return Err(LexError::UnexpectedChar(other)),
        }
    }

    Ok(tokens)
}

// Returns the index just past the closing quote. A doubled quote is an escape.
fn scan_quoted(chars: &[char], start: usize, quote: char) -> Option<usize> {
    let mut i = start + 1;
    while i < chars.len() {
        if chars[i] == quote {
            if chars.get(i + 1) == Some(&quote) {
                i += 2;
                continue;
            }
            return Some(i + 1);
        }
        i += 1;
    }
    None
}

// Block comments nest in PostgreSQL.
fn skip_block_comment(chars: &[char], start: usize) -> Result<usize, LexError> {
    let mut depth = 0usize;
    let mut i = start;
    while i < chars.len() {
        if chars[i] == '/' && chars.get(i + 1) == Some(&'*') {
            depth += 1;
            i += 2;
        } else if chars[i] == '*' && chars.get(i + 1) == Some(&'/') {
            depth -= 1;
            i += 2;
            if depth == 0 {
                return Ok(i);
            }
        } else {
            i += 1;
        }
    }
    Err(LexError::UnterminatedComment)
}

/// Renders tokens back to SQL text with single spaces between them.
pub(crate) fn render(tokens: &[Token]) -> String {
    let mut out = String::new();
    let mut prev: Option<&Token> = None;

    for token in tokens {
        let glue = matches!(token, Token::Punct(',' | ')' | ']' | '.'))
            || matches!(prev, Some(Token::Punct('(' | '[' | '.')))
            || (token.is_punct('(') && matches!(prev, Some(Token::Word(_) | Token::QuotedIdent(_))));
        if prev.is_some() && !glue {
            out.push(' ');
        }

        match token {
            Token::Word(w) | Token::Number(w) | Token::Op(w) | Token::Str(w) => out.push_str(w),
            Token::QuotedIdent(name) => {
                out.push('"');
                out.push_str(&name.replace('"', "\"\""));
                out.push('"');
            }
            Token::Punct(c) => out.push(*c),
        }
        prev = Some(token);
    }

    out
}
