use super::SyntaxError;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum TemplateChunk {
    Text(String),
    Code(String),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    Number(f64),
    Str(String),
    Template(Vec<TemplateChunk>),
    Ident(String),
    Punct(&'static str),
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Spanned {
    pub(crate) token: Token,
    pub(crate) line: usize,
    pub(crate) newline_before: bool,
}

// Longest first so that greedy matching picks `===` over `==`.
const PUNCTUATORS: &[&str] = &[
    ">>>=", "...", "===", "!==", "**=", "<<=", ">>=", ">>>", "&&=", "||=", "??=", "=>", "==",
    "!=", "<=", ">=", "&&", "||", "??", "?.", "++", "--", "+=", "-=", "*=", "/=", "%=", "&=",
    "|=", "^=", "**", "<<", ">>", "{", "}", "(", ")", "[", "]", ";", ",", "<", ">", "+", "-",
    "*", "/", "%", "!", "=", ".", ":", "?", "&", "|", "^", "~",
];

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

fn is_ident_part(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

pub(crate) fn tokenize(source: &str) -> Result<Vec<Spanned>, SyntaxError> {
    let chars: Vec<char> = source.chars().collect();
    let mut out = Vec::new();
    let mut i = 0usize;
    let mut line = 1usize;
    let mut newline_before = false;

    while i < chars.len() {
        let c = chars[i];
        if c == '\n' {
            line += 1;
            newline_before = true;
            i += 1;
            continue;
        }
        if c.is_whitespace() {
            i += 1;
            continue;
        }

        if c == '/' && chars.get(i + 1) == Some(&'/') {
            while i < chars.len() && chars[i] != '\n' {
                i += 1;
            }
            continue;
        }
        if c == '/' && chars.get(i + 1) == Some(&'*') {
            i += 2;
            loop {
                if i + 1 >= chars.len() {
                    return Err(SyntaxError::new("Unterminated comment", line));
                }
                if chars[i] == '*' && chars[i + 1] == '/' {
                    i += 2;
                    break;
                }
                if chars[i] == '\n' {
                    line += 1;
                    newline_before = true;
                }
                i += 1;
            }
            continue;
        }

        let start_line = line;
        let token = if c.is_ascii_digit() || (c == '.' && next_is_digit(&chars, i + 1)) {
            let (value, next) = read_number(&chars, i, line)?;
            i = next;
            Token::Number(value)
        } else if c == '"' || c == '\'' {
            let (text, next) = read_string(&chars, i, &mut line)?;
            i = next;
            Token::Str(text)
        } else if c == '`' {
            let (chunks, next) = read_template(&chars, i, &mut line)?;
            i = next;
            Token::Template(chunks)
        } else if is_ident_start(c) {
            let start = i;
            while i < chars.len() && is_ident_part(chars[i]) {
                i += 1;
            }
            Token::Ident(chars[start..i].iter().collect())
        } else {
            let punct = PUNCTUATORS.iter().find(|p| matches_at(&chars, i, p)).copied();
            match punct {
                // `a ?.5 : b` is a conditional, not optional chaining
                Some("?.") if next_is_digit(&chars, i + 2) => {
                    i += 1;
                    Token::Punct("?")
                }
                Some(p) => {
                    i += p.chars().count();
                    Token::Punct(p)
                }
                None => {
                    return Err(SyntaxError::new(
                        &format!("Invalid or unexpected token '{}'", c),
                        line,
                    ))
                }
            }
        };

        out.push(Spanned {
            token,
            line: start_line,
            newline_before,
        });
        newline_before = false;
    }

    out.push(Spanned {
        token: Token::Eof,
        line,
        newline_before: true,
    });
    Ok(out)
}

fn next_is_digit(chars: &[char], at: usize) -> bool {
    chars.get(at).map(|c| c.is_ascii_digit()).unwrap_or(false)
}

fn matches_at(chars: &[char], at: usize, pattern: &str) -> bool {
    let mut offset = at;
    for expected in pattern.chars() {
        if chars.get(offset) != Some(&expected) {
            return false;
        }
        offset += 1;
    }
    true
}

fn read_number(chars: &[char], start: usize, line: usize) -> Result<(f64, usize), SyntaxError> {
    let mut i = start;
    if chars[i] == '0' {
        let radix = match chars.get(i + 1) {
            Some('x') | Some('X') => Some(16),
            Some('b') | Some('B') => Some(2),
            Some('o') | Some('O') => Some(8),
            _ => None,
        };
        if let Some(radix) = radix {
            i += 2;
            let digits_start = i;
            while i < chars.len() && (chars[i].is_digit(radix) || chars[i] == '_') {
                i += 1;
            }
            let digits: String = chars[digits_start..i].iter().filter(|c| **c != '_').collect();
            let value = u64::from_str_radix(&digits, radix)
                .map_err(|_| SyntaxError::new("Invalid or unexpected token", line))?;
            return Ok((value as f64, i));
        }
    }

    while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '_') {
        i += 1;
    }
    if i < chars.len() && chars[i] == '.' {
        i += 1;
        while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '_') {
            i += 1;
        }
    }
    if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
        let mut j = i + 1;
        if j < chars.len() && (chars[j] == '+' || chars[j] == '-') {
            j += 1;
        }
        if next_is_digit(chars, j) {
            i = j;
            while i < chars.len() && chars[i].is_ascii_digit() {
                i += 1;
            }
        }
    }
    if i < chars.len() && is_ident_start(chars[i]) {
        return Err(SyntaxError::new("Invalid or unexpected token", line));
    }
    let text: String = chars[start..i].iter().filter(|c| **c != '_').collect();
    let value = text
        .parse::<f64>()
        .map_err(|_| SyntaxError::new("Invalid or unexpected token", line))?;
    Ok((value, i))
}

fn read_escape(chars: &[char], i: &mut usize, line: &mut usize) -> Result<Option<char>, SyntaxError> {
    let c = chars
        .get(*i)
        .copied()
        .ok_or_else(|| SyntaxError::new("Invalid or unexpected token", *line))?;
    *i += 1;
    let escaped = match c {
        'n' => '\n',
        't' => '\t',
        'r' => '\r',
        'b' => '\u{8}',
        'f' => '\u{c}',
        'v' => '\u{b}',
        '0' => '\0',
        '\n' => {
            // line continuation
            *line += 1;
            return Ok(None);
        }
        'x' => read_hex_escape(chars, i, 2, *line)?,
        'u' => {
            if chars.get(*i) == Some(&'{') {
                *i += 1;
                let start = *i;
                while *i < chars.len() && chars[*i] != '}' {
                    *i += 1;
                }
                let digits: String = chars[start..*i].iter().collect();
                *i += 1;
                u32::from_str_radix(&digits, 16)
                    .ok()
                    .and_then(char::from_u32)
                    .ok_or_else(|| SyntaxError::new("Invalid Unicode escape sequence", *line))?
            } else {
                read_hex_escape(chars, i, 4, *line)?
            }
        }
        other => other,
    };
    Ok(Some(escaped))
}

fn read_hex_escape(chars: &[char], i: &mut usize, len: usize, line: usize) -> Result<char, SyntaxError> {
    if *i + len > chars.len() {
        return Err(SyntaxError::new("Invalid hexadecimal escape sequence", line));
    }
    let digits: String = chars[*i..*i + len].iter().collect();
    *i += len;
    u32::from_str_radix(&digits, 16)
        .ok()
        .and_then(char::from_u32)
        .ok_or_else(|| SyntaxError::new("Invalid hexadecimal escape sequence", line))
}

fn read_string(chars: &[char], start: usize, line: &mut usize) -> Result<(String, usize), SyntaxError> {
    let quote = chars[start];
    let mut i = start + 1;
    let mut text = String::new();
    loop {
        let c = match chars.get(i) {
            None | Some('\n') => return Err(SyntaxError::new("Invalid or unexpected token", *line)),
            Some(c) => *c,
        };
        i += 1;
        if c == quote {
            return Ok((text, i));
        }
        if c == '\\' {
            if let Some(escaped) = read_escape(chars, &mut i, line)? {
                text.push(escaped);
            }
        } else {
            text.push(c);
        }
    }
}

fn read_template(
    chars: &[char],
    start: usize,
    line: &mut usize,
) -> Result<(Vec<TemplateChunk>, usize), SyntaxError> {
    let mut i = start + 1;
    let mut chunks = Vec::new();
    let mut text = String::new();
    loop {
        let c = chars
            .get(i)
            .copied()
            .ok_or_else(|| SyntaxError::new("Unterminated template literal", *line))?;
        i += 1;
        match c {
            '`' => {
                chunks.push(TemplateChunk::Text(text));
                return Ok((chunks, i));
            }
            '\\' => {
                if let Some(escaped) = read_escape(chars, &mut i, line)? {
                    text.push(escaped);
                }
            }
            '$' if chars.get(i) == Some(&'{') => {
                i += 1;
                chunks.push(TemplateChunk::Text(std::mem::take(&mut text)));
                let code_start = i;
                let mut depth = 0usize;
                let mut quote: Option<char> = None;
                loop {
                    let c = chars
                        .get(i)
                        .copied()
                        .ok_or_else(|| SyntaxError::new("Unterminated template literal", *line))?;
                    match (quote, c) {
                        (Some(q), c) if c == q => quote = None,
                        (Some(_), '\\') => i += 1,
                        (Some(_), _) => {}
                        (None, '"') | (None, '\'') | (None, '`') => quote = Some(c),
                        (None, '{') => depth += 1,
                        (None, '}') if depth == 0 => break,
                        (None, '}') => depth -= 1,
                        _ => {}
                    }
                    if c == '\n' {
                        *line += 1;
                    }
                    i += 1;
                }
                chunks.push(TemplateChunk::Code(chars[code_start..i].iter().collect()));
                i += 1;
            }
            '\n' => {
                *line += 1;
                text.push('\n');
            }
            other => text.push(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(source: &str) -> Vec<Token> {
        tokenize(source).unwrap().into_iter().map(|s| s.token).collect()
    }

    #[test]
    fn punctuators_are_greedy() {
        assert_eq!(
            tokens("a === b ?? c"),
            vec![
                Token::Ident("a".into()),
                Token::Punct("==="),
                Token::Ident("b".into()),
                Token::Punct("??"),
                Token::Ident("c".into()),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn numbers_and_strings() {
        assert_eq!(
            tokens("0x1F 1_000 .5 2e3 'a\\n' \"\\u0041\""),
            vec![
                Token::Number(31.0),
                Token::Number(1000.0),
                Token::Number(0.5),
                Token::Number(2000.0),
                Token::Str("a\n".into()),
                Token::Str("A".into()),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn comments_and_newlines() {
        let spanned = tokenize("a // note\n/* block\n */ b").unwrap();
        assert_eq!(spanned[1].token, Token::Ident("b".into()));
        assert!(spanned[1].newline_before);
        assert_eq!(spanned[1].line, 3);
    }

    #[test]
    fn template_chunks_keep_nested_braces() {
        assert_eq!(
            tokens("`x=${ {a: 1}.a } !`"),
            vec![
                Token::Template(vec![
                    TemplateChunk::Text("x=".into()),
                    TemplateChunk::Code(" {a: 1}.a ".into()),
                    TemplateChunk::Text(" !".into()),
                ]),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn conditional_before_decimal_is_not_optional_chain() {
        assert_eq!(
            tokens("a?.5:1"),
            vec![
                Token::Ident("a".into()),
                Token::Punct("?"),
                Token::Number(0.5),
                Token::Punct(":"),
                Token::Number(1.0),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn unterminated_string_is_a_syntax_error() {
        let err = tokenize("let s = 'oops\n").unwrap_err();
        assert_eq!(err.line, 1);
        assert!(tokenize("#").is_err());
    }
}
