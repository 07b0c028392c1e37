//! GLSL emission for the SDF scene.
use std::fmt::Write;

use super::signature::Arity;
use super::tree::{SdfGraph, SdfNode, MAX_CHILDREN};
use crate::uniforms::scan;

/// Types and helpers shared by every SDF layer.
pub const PRELUDE: &str = "\
#define gSdfMaxChildren 16
struct gSdfContext {
    vec3 position;
};
struct gSdfResult {
    float distance;
    vec4 color;
};
struct gSdf {
    int id;
};
struct gSdfVariadic {
    int count;
    int ids[gSdfMaxChildren];
};
gSdfResult gSdfEmpty() {
    return gSdfResult(1e20, vec4(0.0));
}
gSdfResult gSdfUnion(gSdfResult a, gSdfResult b) {
    return a.distance <= b.distance ? a : b;
}
gSdf gSdfChild(gSdfVariadic children, int index) {
    return gSdf(children.ids[index]);
}
";

/// Dispatcher used when a layer is compiled on its own.
pub const STANDALONE_DISPATCH: &str = "\
gSdfResult gSdfMap(inout gSdfContext context, gSdf node) {
    return gSdfEmpty();
}
";

/// Hidden layer instantiated for every synthesised union: nearest distance wins.
pub const UNION_SOURCE: &str = "\
gSdfResult map(inout gSdfContext context, gSdfVariadic children) {
    gSdfResult result = gSdfEmpty();
    for (int i = 0; i < gSdfMaxChildren; i++) {
        if (i >= children.count) {
            break;
        }
        result = gSdfUnion(result, gSdfMap(context, gSdfChild(children, i)));
    }
    return result;
}
";

const MANGLE_ID_LIMIT: usize = 16;

/// `s<node id><alphanumeric layer id>`; never contains `__`.
pub fn mangle_id(node_id: usize, layer_id: &str) -> String {
    let tail: String = layer_id
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .take(MANGLE_ID_LIMIT)
        .collect();
    format!("s{node_id}{tail}")
}

/// The name `identifier` takes after [`mangle`] with `suffix`.
pub fn mangled_identifier(identifier: &str, suffix: &str) -> String {
    if identifier.ends_with('_') {
        format!("{identifier}{suffix}")
    } else {
        format!("{identifier}_{suffix}")
    }
}

/// Appends `_<suffix>` after each identifier, or only `<suffix>` when the
/// identifier already ends in `_`. `spans` are `(offset, len)`
/// pairs; duplicates are ignored. Insertions are applied in ascending order
/// into a fresh buffer, which yields the same text as inserting in place from
/// the highest offset down.
pub fn mangle(source: &str, spans: &[(usize, usize)], suffix: &str) -> String {
    let mut ends: Vec<usize> = spans
        .iter()
        .map(|(offset, len)| offset + len)
        .filter(|&end| end <= source.len())
        .collect();
    ends.sort_unstable();
    ends.dedup();

    let mut output = String::with_capacity(source.len() + ends.len() * (suffix.len() + 1));
    let mut cursor = 0;
    for end in ends {
        output.push_str(&source[cursor..end]);
        if !source[..end].ends_with('_') {
            output.push('_');
        }
        output.push_str(suffix);
        cursor = end;
    }
    output.push_str(&source[cursor..]);
    output
}

/// Every identifier in `code` that must be made unique per layer: the given
/// uniform occurrences, `map`, `gSdfMap` and top-level helper functions.
pub fn layer_spans<'a>(code: &str, uniforms: impl IntoIterator<Item = (&'a str, &'a [usize])>) -> Vec<(usize, usize)> {
    let mut spans: Vec<(usize, usize)> = uniforms
        .into_iter()
        .flat_map(|(name, offsets)| offsets.iter().map(move |&offset| (offset, name.len())))
        .collect();
    let mut functions = scan::top_level_functions(code);
    for fixed in ["map", "gSdfMap"] {
        if !functions.iter().any(|name| name == fixed) {
            functions.push(fixed.to_string());
        }
    }
    for name in functions {
        spans.extend(
            scan::identifier_occurrences(code, &name)
                .into_iter()
                .map(|offset| (offset, name.len())),
        );
    }
    spans
}

/// One node's emitted layer: its mangled id, mangled source and arity.
#[derive(Debug, Clone)]
pub struct EmittedLayer {
    pub mangle_id: String,
    pub code: String,
    pub arity: Arity,
}

/// Call expression for `node` with the context variable `context`.
pub fn call_expression(node: &SdfNode, layer: &EmittedLayer, context: &str) -> String {
    match layer.arity {
        Arity::Variadic => {
            let mut ids: Vec<String> = node.children.iter().map(usize::to_string).collect();
            ids.resize(MAX_CHILDREN, "0".to_string());
            format!(
                "map_{}({context}, gSdfVariadic({}, int[gSdfMaxChildren]({})))",
                layer.mangle_id,
                node.children.len(),
                ids.join(", ")
            )
        }
        Arity::Fixed(_) => {
            let mut call = format!("map_{}({context}", layer.mangle_id);
            for child in &node.children {
                let _ = write!(call, ", gSdf({child})");
            }
            call.push(')');
            call
        }
    }
}

/// Emits the full scene. `layers[i]` is the emitted layer for node `i`.
pub fn emit_scene(graph: &SdfGraph, layers: &[EmittedLayer]) -> String {
    let mut out = String::from(PRELUDE);
    let Some(root) = graph.root else {
        out.push_str(
            "gSdfResult gSdfScene(inout gSdfContext context) {\n    return gSdfEmpty();\n}\n",
        );
        push_distance(&mut out);
        return out;
    };

    for node in &graph.nodes {
        let layer = &layers[node.id];
        let _ = writeln!(
            out,
            "gSdfResult gSdfMap_{}(inout gSdfContext context, gSdf node) {{",
            layer.mangle_id
        );
        let _ = writeln!(out, "    switch (node.id) {{");
        for &child in &node.children {
            let call = call_expression(graph.node(child), &layers[child], "context");
            let _ = writeln!(out, "        case {child}: return {call};");
        }
        let _ = writeln!(out, "        default: return gSdfEmpty();");
        out.push_str("    }\n}\n");
        out.push_str(&layer.code);
        if !layer.code.ends_with('\n') {
            out.push('\n');
        }
    }

    let _ = writeln!(
        out,
        "gSdfResult gSdfScene(inout gSdfContext context) {{\n    return {};\n}}",
        call_expression(graph.node(root), &layers[root], "context")
    );
    push_distance(&mut out);
    out
}

fn push_distance(out: &mut String) {
    out.push_str(
        "float gSdfDistance(vec3 position) {\n    gSdfContext context = gSdfContext(position);\n    return gSdfScene(context).distance;\n}\n",
    );
}
