//! Lexical scanning of GLSL source.
//!
//! Comments and preprocessor lines are skipped; everything else is split into
//! identifiers, numbers and single punctuation bytes with their byte offsets.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TokenKind {
    Ident,
    Number,
    Punct(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Token<'a> {
    pub kind: TokenKind,
    pub text: &'a str,
    pub offset: usize,
}

impl Token<'_> {
    pub fn is_ident(&self, name: &str) -> bool {
        self.kind == TokenKind::Ident && self.text == name
    }

    pub fn is_punct(&self, byte: u8) -> bool {
        self.kind == TokenKind::Punct(byte)
    }
}

pub(crate) fn is_ident_start(byte: u8) -> bool {
    byte.is_ascii_alphabetic() || byte == b'_'
}

pub(crate) fn is_ident_char(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'_'
}

pub(crate) fn tokenize(source: &str) -> Vec<Token<'_>> {
    let bytes = source.as_bytes();
    let mut tokens = Vec::new();
    let mut line_start = true;
    let mut i = 0;

    while i < bytes.len() {
        let byte = bytes[i];
        if byte == b'\n' {
            line_start = true;
            i += 1;
            continue;
        }
        if byte.is_ascii_whitespace() {
            i += 1;
            continue;
        }
        if byte == b'/' && bytes.get(i + 1) == Some(&b'/') {
            i = end_of_line(bytes, i);
            continue;
        }
        if byte == b'/' && bytes.get(i + 1) == Some(&b'*') {
            i = match source[i + 2..].find("*/") {
                Some(end) => i + 2 + end + 2,
                None => bytes.len(),
            };
            continue;
        }
        if byte == b'#' && line_start {
            // Preprocessor directives, honouring backslash continuations.
            loop {
                i = end_of_line(bytes, i);
                if i > 0 && bytes[i - 1] == b'\\' && i < bytes.len() {
                    i += 1;
                    continue;
                }
                break;
            }
            continue;
        }

        line_start = false;
        let start = i;
        let kind = if is_ident_start(byte) {
            while i < bytes.len() && is_ident_char(bytes[i]) {
                i += 1;
            }
            TokenKind::Ident
        } else if byte.is_ascii_digit()
            || (byte == b'.' && bytes.get(i + 1).is_some_and(u8::is_ascii_digit))
        {
            i += 1;
            while i < bytes.len() {
                let current = bytes[i];
                let exponent_sign = (current == b'+' || current == b'-')
                    && matches!(bytes[i - 1], b'e' | b'E');
                if current.is_ascii_alphanumeric() || current == b'.' || exponent_sign {
                    i += 1;
                } else {
                    break;
                }
            }
            TokenKind::Number
        } else {
            i += 1;
            while i < bytes.len() && !source.is_char_boundary(i) {
                i += 1;
            }
            TokenKind::Punct(byte)
        };
        tokens.push(Token {
            kind,
            text: &source[start..i],
            offset: start,
        });
    }
    tokens
}

fn end_of_line(bytes: &[u8], from: usize) -> usize {
    bytes[from..]
        .iter()
        .position(|&b| b == b'\n')
        .map_or(bytes.len(), |pos| from + pos)
}

/// Byte offsets of every whole-identifier occurrence of `name`, comments included.
pub(crate) fn identifier_occurrences(source: &str, name: &str) -> Vec<usize> {
    if name.is_empty() {
        return Vec::new();
    }
    let bytes = source.as_bytes();
    source
        .match_indices(name)
        .map(|(offset, _)| offset)
        .filter(|&offset| {
            let before = offset.checked_sub(1).map(|i| bytes[i]);
            let after = bytes.get(offset + name.len()).copied();
            !before.is_some_and(is_ident_char) && !after.is_some_and(is_ident_char)
        })
        .collect()
}

/// True when the code (outside comments) uses an identifier starting with `prefix`.
pub(crate) fn references_prefix(source: &str, prefix: &str) -> bool {
    tokenize(source)
        .iter()
        .any(|token| token.kind == TokenKind::Ident && token.text.starts_with(prefix))
}

/// 1-based line number of a byte offset.
pub(crate) fn line_of(source: &str, offset: usize) -> u32 {
    let end = offset.min(source.len());
    source.as_bytes()[..end].iter().filter(|&&b| b == b'\n').count() as u32 + 1
}

const PRECISION_QUALIFIERS: [&str; 3] = ["lowp", "mediump", "highp"];

/// One name from a `uniform <type> <name>[, <name>];` statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Declaration {
    pub glsl_type: String,
    pub name: String,
    pub name_offset: usize,
    /// Text after the terminating `;` up to the end of that line.
    pub trailing: String,
}

/// Finds simple uniform declarations in source order. Array declarators and
/// layout-qualified or otherwise unusual statements are skipped.
pub(crate) fn uniform_declarations(source: &str) -> Vec<Declaration> {
    let tokens = tokenize(source);
    let mut declarations = Vec::new();
    let mut index = 0;

    while index < tokens.len() {
        if !tokens[index].is_ident("uniform") {
            index += 1;
            continue;
        }
        let mut cursor = index + 1;
        if tokens
            .get(cursor)
            .is_some_and(|t| t.kind == TokenKind::Ident && PRECISION_QUALIFIERS.contains(&t.text))
        {
            cursor += 1;
        }
        let Some(type_token) = tokens.get(cursor).filter(|t| t.kind == TokenKind::Ident) else {
            index += 1;
            continue;
        };
        cursor += 1;

        let mut names = Vec::new();
        let mut terminator = None;
        while let Some(name) = tokens.get(cursor).filter(|t| t.kind == TokenKind::Ident) {
            names.push(*name);
            cursor += 1;
            match tokens.get(cursor) {
                Some(t) if t.is_punct(b',') => cursor += 1,
                Some(t) if t.is_punct(b';') => {
                    terminator = Some(t.offset);
                    break;
                }
                _ => break,
            }
        }

        if let Some(semicolon) = terminator {
            let line_end = end_of_line(source.as_bytes(), semicolon);
            let trailing = source[semicolon + 1..line_end].trim().to_string();
            for name in names {
                declarations.push(Declaration {
                    glsl_type: type_token.text.to_string(),
                    name: name.text.to_string(),
                    name_offset: name.offset,
                    trailing: trailing.clone(),
                });
            }
        }
        index = cursor.max(index + 1);
    }
    declarations
}

/// Names of functions defined (with a body) at the top level of the source.
pub(crate) fn top_level_functions(source: &str) -> Vec<String> {
    let tokens = tokenize(source);
    let mut names: Vec<String> = Vec::new();
    let mut depth = 0usize;
    let mut index = 0;

    while index < tokens.len() {
        let token = tokens[index];
        match token.kind {
            TokenKind::Punct(b'{') => depth += 1,
            TokenKind::Punct(b'}') => depth = depth.saturating_sub(1),
            TokenKind::Ident if depth == 0 => {
                let preceded_by_type = index > 0 && tokens[index - 1].kind == TokenKind::Ident;
                let opens_call = tokens.get(index + 1).is_some_and(|t| t.is_punct(b'('));
                if preceded_by_type && opens_call {
                    if let Some(close) = matching_paren(&tokens, index + 1) {
                        if tokens.get(close + 1).is_some_and(|t| t.is_punct(b'{'))
                            && !names.iter().any(|existing| existing == token.text)
                        {
                            names.push(token.text.to_string());
                        }
                        index = close + 1;
                        continue;
                    }
                }
            }
            _ => {}
        }
        index += 1;
    }
    names
}

/// Index of the `)` matching the `(` at `open`.
pub(crate) fn matching_paren(tokens: &[Token<'_>], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (index, token) in tokens.iter().enumerate().skip(open) {
        match token.kind {
            TokenKind::Punct(b'(') => depth += 1,
            TokenKind::Punct(b')') => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(index);
                }
            }
            _ => {}
        }
    }
    None
}
