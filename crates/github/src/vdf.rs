//! Minimal text KeyValues (VDF) reader for `key.vdf` and `appinfo.vdf`.
//!
//! Supports quoted and bare tokens, nested objects, `//` comments and
//! the usual backslash escapes. Conditional tags (`[$WIN32]`) are
//! accepted and ignored.

/// Deepest object nesting accepted. Real `key.vdf` and `appinfo.vdf`
/// files stay well under a dozen levels.
pub const MAX_DEPTH: usize = 64;

/// A parsed VDF value.
#[derive(Debug, Clone, PartialEq)]
pub enum VdfValue {
    Str(String),
    Map(Vec<(String, VdfValue)>),
}

impl VdfValue {
    /// Looks up a child by key. VDF keys are case-insensitive.
    pub fn get(&self, key: &str) -> Option<&VdfValue> {
        match self {
            Self::Map(pairs) => pairs
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(key))
                .map(|(_, v)| v),
            Self::Str(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            Self::Map(_) => None,
        }
    }

    pub fn entries(&self) -> &[(String, VdfValue)] {
        match self {
            Self::Map(pairs) => pairs,
            Self::Str(_) => &[],
        }
    }
}

/// Errors from VDF parsing.
#[derive(Debug, thiserror::Error)]
pub enum VdfError {
    #[error("unterminated string starting at byte {0}")]
    UnterminatedString(usize),

    #[error("unexpected '{0}' at byte {1}")]
    Unexpected(char, usize),

    #[error("unexpected end of input")]
    UnexpectedEof,

    #[error("objects nested deeper than {MAX_DEPTH} levels at byte {0}")]
    TooDeep(usize),
}

#[derive(Debug, PartialEq)]
enum Token {
    Str(String),
    Open,
    Close,
}

/// Parses VDF text into a root map.
pub fn parse(input: &str) -> Result<VdfValue, VdfError> {
    let tokens = tokenize(input)?;
    let mut pos = 0;
    let pairs = parse_pairs(&tokens, &mut pos, 0)?;
    Ok(VdfValue::Map(pairs))
}

fn parse_pairs(
    tokens: &[(Token, usize)],
    pos: &mut usize,
    depth: usize,
) -> Result<Vec<(String, VdfValue)>, VdfError> {
    let nested = depth > 0;
    let mut pairs = Vec::new();

    loop {
        let Some((token, offset)) = tokens.get(*pos) else {
            return if nested {
                Err(VdfError::UnexpectedEof)
            } else {
                Ok(pairs)
            };
        };
        *pos += 1;

        let key = match token {
            Token::Str(s) => s.clone(),
            Token::Close if nested => return Ok(pairs),
            Token::Close => return Err(VdfError::Unexpected('}', *offset)),
            Token::Open => return Err(VdfError::Unexpected('{', *offset)),
        };

        let (value_token, value_offset) = tokens.get(*pos).ok_or(VdfError::UnexpectedEof)?;
        *pos += 1;

        let value = match value_token {
            Token::Str(s) => VdfValue::Str(s.clone()),
            Token::Open if depth >= MAX_DEPTH => return Err(VdfError::TooDeep(*value_offset)),
            Token::Open => VdfValue::Map(parse_pairs(tokens, pos, depth + 1)?),
            Token::Close => return Err(VdfError::Unexpected('}', *value_offset)),
        };
        pairs.push((key, value));
    }
}

fn tokenize(input: &str) -> Result<Vec<(Token, usize)>, VdfError> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some(&(i, c)) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '/' if input[i..].starts_with("//") => {
                while let Some(&(_, c)) = chars.peek() {
                    if c == '\n' {
                        break;
                    }
                    chars.next();
                }
            }
            '{' => {
                chars.next();
                tokens.push((Token::Open, i));
            }
            '}' => {
                chars.next();
                tokens.push((Token::Close, i));
            }
            '[' => {
                // Conditional tag; skip to the closing bracket.
                for (_, c) in chars.by_ref() {
                    if c == ']' {
                        break;
                    }
                }
            }
            '"' => {
                chars.next();
                let mut s = String::new();
                let mut closed = false;
                while let Some((_, c)) = chars.next() {
                    match c {
                        '"' => {
                            closed = true;
                            break;
                        }
                        '\\' => match chars.next() {
                            Some((_, 'n')) => s.push('\n'),
                            Some((_, 't')) => s.push('\t'),
                            Some((_, other)) => s.push(other),
                            None => break,
                        },
                        other => s.push(other),
                    }
                }
                if !closed {
                    return Err(VdfError::UnterminatedString(i));
                }
                tokens.push((Token::Str(s), i));
            }
            _ => {
                let mut s = String::new();
                while let Some(&(_, c)) = chars.peek() {
                    if c.is_whitespace() || matches!(c, '{' | '}' | '"') {
                        break;
                    }
                    s.push(c);
                    chars.next();
                }
                tokens.push((Token::Str(s), i));
            }
        }
    }

    Ok(tokens)
}
