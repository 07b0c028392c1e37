use serde_json::{Map, Value as Json};

use crate::compile::{CompileError, Severity};
use crate::uniforms::coerce;
use crate::uniforms::scan::{self, TokenKind};

/// How many operands an SDF layer's `map` takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Fixed(usize),
    Variadic,
}

/// Optional `/* {...} */` block in front of `map`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SdfAttributes {
    pub half_extents: Option<[f64; 3]>,
    pub raw: Map<String, Json>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SdfSignature {
    pub arity: Arity,
    pub context_name: String,
    pub parameters: Vec<String>,
    pub attributes: SdfAttributes,
}

fn signature_error(source: &str, offset: Option<usize>, text: impl Into<String>) -> CompileError {
    CompileError {
        line: offset.map_or(0, |offset| scan::line_of(source, offset)),
        text: text.into(),
        severity: Severity::Error,
    }
}

/// Parses `gSdfResult map(inout gSdfContext context, ...)`.
pub fn parse_signature(source: &str) -> Result<SdfSignature, CompileError> {
    let tokens = scan::tokenize(source);
    let candidates: Vec<(usize, usize)> = tokens
        .windows(3)
        .enumerate()
        .filter(|(_, window)| {
            window[0].is_ident("gSdfResult") && window[1].is_ident("map") && window[2].is_punct(b'(')
        })
        .filter_map(|(index, _)| Some((index, scan::matching_paren(&tokens, index + 2)?)))
        .collect();

    // Prefer the definition over a forward declaration.
    let Some(&(start, close)) = candidates
        .iter()
        .find(|(_, close)| tokens.get(close + 1).is_some_and(|t| t.is_punct(b'{')))
        .or_else(|| candidates.first())
    else {
        return Err(signature_error(
            source,
            None,
            "SDF layers must define `gSdfResult map(inout gSdfContext context, ...)`",
        ));
    };
    let result_offset = tokens[start].offset;

    let mut parameters: Vec<Vec<&str>> = vec![Vec::new()];
    let mut depth = 0usize;
    for token in &tokens[start + 3..close] {
        match token.kind {
            TokenKind::Punct(b'(') | TokenKind::Punct(b'[') => depth += 1,
            TokenKind::Punct(b')') | TokenKind::Punct(b']') => depth = depth.saturating_sub(1),
            TokenKind::Punct(b',') if depth == 0 => {
                parameters.push(Vec::new());
                continue;
            }
            _ => {}
        }
        if let Some(current) = parameters.last_mut() {
            current.push(token.text);
        }
    }

    let mut parameters = parameters.into_iter();
    let context_name = match parameters.next().as_deref() {
        Some(["inout", "gSdfContext", name]) => name.to_string(),
        _ => {
            return Err(signature_error(
                source,
                Some(result_offset),
                "the first parameter of map() must be `inout gSdfContext context`",
            ))
        }
    };

    let mut fixed = Vec::new();
    let mut variadic = Vec::new();
    for parameter in parameters {
        let words: Vec<&str> = parameter
            .into_iter()
            .filter(|word| !matches!(*word, "in" | "const"))
            .collect();
        match words.as_slice() {
            ["gSdf", name] => fixed.push(name.to_string()),
            ["gSdfVariadic", name] => variadic.push(name.to_string()),
            [] => {
                return Err(signature_error(
                    source,
                    Some(result_offset),
                    "empty parameter in map()",
                ))
            }
            other => {
                return Err(signature_error(
                    source,
                    Some(result_offset),
                    format!(
                        "unsupported map() parameter `{}`; expected `gSdf name` or `gSdfVariadic name`",
                        other.join(" ")
                    ),
                ))
            }
        }
    }

    let (arity, parameters) = match (fixed.is_empty(), variadic.len()) {
        (_, 0) => (Arity::Fixed(fixed.len()), fixed),
        (true, 1) => (Arity::Variadic, variadic),
        (true, _) => {
            return Err(signature_error(
                source,
                Some(result_offset),
                "map() accepts at most one gSdfVariadic parameter",
            ))
        }
        (false, _) => {
            return Err(signature_error(
                source,
                Some(result_offset),
                "map() cannot mix gSdf and gSdfVariadic parameters",
            ))
        }
    };

    Ok(SdfSignature {
        arity,
        context_name,
        parameters,
        attributes: attributes_before(source, result_offset),
    })
}

fn attributes_before(source: &str, offset: usize) -> SdfAttributes {
    let preceding = source[..offset].trim_end();
    let Some(body) = preceding.strip_suffix("*/") else {
        return SdfAttributes::default();
    };
    let Some(open) = body.rfind("/*") else {
        return SdfAttributes::default();
    };
    let inner = body[open + 2..].trim();
    if !inner.starts_with('{') {
        return SdfAttributes::default();
    }
    let Some(raw) = crate::uniforms::parse_comment_object(inner) else {
        return SdfAttributes::default();
    };

    let half_extents = raw.get("halfExtents").and_then(|value| match value {
        Json::Array(items) if items.len() == 3 => {
            let extents: [f64; 3] = std::array::from_fn(|i| coerce::number_or_zero(&items[i]));
            Some(extents)
        }
        Json::Number(_) => Some([coerce::number_or_zero(value); 3]),
        _ => None,
    });
    SdfAttributes { half_extents, raw }
}
