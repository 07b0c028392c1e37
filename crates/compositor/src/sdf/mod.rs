//! SDF layers compiled into a single GLSL scene.
//!
//! Each SDF layer declares `gSdfResult map(inout gSdfContext context, ...)`
//! and calls `gSdfMap(context, operand)` to evaluate its operands. The scene
//! builder resolves the authored tree into a node graph, emits every node's
//! layer source once with per-node mangled identifiers, and wires operands
//! through generated `switch` dispatchers. Shader layers then call
//! `gSdfScene(context)` or `gSdfDistance(position)`.
pub mod codegen;
mod signature;
mod tree;

pub use signature::{parse_signature, Arity, SdfAttributes, SdfSignature};
pub use tree::{build_graph, NodeOwner, SdfGraph, SdfNode, SdfSource, MAX_CHILDREN};

use codegen::EmittedLayer;

use crate::uniforms::Uniform;

/// A compiled SDF layer as seen by the scene builder.
#[derive(Debug, Clone)]
pub struct SceneLayer<'a> {
    pub id: &'a str,
    pub code: &'a str,
    /// `None` when the layer has errors and must be left out.
    pub signature: Option<&'a SdfSignature>,
    pub uniforms: &'a [Uniform],
    /// Indices of authored SDF children within the same slice.
    pub children: Vec<usize>,
}

/// A layer uniform as named inside the scene.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SceneBinding {
    /// Index of the owning layer in the slice handed to [`build_scene`].
    pub layer: usize,
    /// Index of the uniform within that layer.
    pub uniform: usize,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct SdfScene {
    pub code: String,
    pub graph: SdfGraph,
    pub bindings: Vec<SceneBinding>,
}

impl SdfScene {
    pub fn line_count(&self) -> usize {
        self.code.lines().count()
    }
}

/// Builds the scene for the SDF forest whose top-level layers are `roots`.
pub fn build_scene(layers: &[SceneLayer<'_>], roots: &[usize]) -> SdfScene {
    let sources: Vec<SdfSource> = layers
        .iter()
        .map(|layer| SdfSource {
            arity: layer.signature.map(|signature| signature.arity),
            children: layer.children.clone(),
        })
        .collect();
    let graph = build_graph(&sources, roots);

    let mut emitted = Vec::with_capacity(graph.nodes.len());
    let mut bindings = Vec::new();
    for node in &graph.nodes {
        let layer = match node.owner {
            NodeOwner::Layer(index) => {
                let layer = &layers[index];
                let mangle_id = codegen::mangle_id(node.id, layer.id);
                let spans = codegen::layer_spans(
                    layer.code,
                    layer
                        .uniforms
                        .iter()
                        .map(|uniform| (uniform.name.as_str(), uniform.occurrences.as_slice())),
                );
                bindings.extend(layer.uniforms.iter().enumerate().map(|(uniform, declared)| {
                    SceneBinding {
                        layer: index,
                        uniform,
                        name: codegen::mangled_identifier(&declared.name, &mangle_id),
                    }
                }));
                EmittedLayer {
                    code: codegen::mangle(layer.code, &spans, &mangle_id),
                    arity: layer.signature.map_or(Arity::Fixed(0), |s| s.arity),
                    mangle_id,
                }
            }
            NodeOwner::Union(union) => {
                let mangle_id = codegen::mangle_id(node.id, &format!("union{union}"));
                let spans = codegen::layer_spans(codegen::UNION_SOURCE, std::iter::empty());
                EmittedLayer {
                    code: codegen::mangle(codegen::UNION_SOURCE, &spans, &mangle_id),
                    arity: Arity::Variadic,
                    mangle_id,
                }
            }
        };
        emitted.push(layer);
    }

    tracing::debug!(
        nodes = graph.nodes.len(),
        unions = graph.unions,
        "built SDF scene"
    );
    SdfScene {
        code: codegen::emit_scene(&graph, &emitted),
        graph,
        bindings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uniforms::extract_uniforms;

    const SPHERE: &str = "uniform float radius; // default: 1\n\
        float shape(vec3 p) { return length(p) - radius; }\n\
        gSdfResult map(inout gSdfContext context) {\n    return gSdfResult(shape(context.position), vec4(1.0));\n}\n";
    const SMOOTH: &str = "gSdfResult map(inout gSdfContext context, gSdf a, gSdf b) {\n\
        gSdfResult x = gSdfMap(context, a);\n    gSdfResult y = gSdfMap(context, b);\n    return gSdfUnion(x, y);\n}\n";

    struct Fixture {
        code: &'static str,
        signature: SdfSignature,
        uniforms: Vec<Uniform>,
        children: Vec<usize>,
    }

    fn fixture(code: &'static str, children: Vec<usize>) -> Fixture {
        Fixture {
            code,
            signature: parse_signature(code).unwrap(),
            uniforms: extract_uniforms(code, &[], &mut |_| None),
            children,
        }
    }

    fn scene(fixtures: &[Fixture], roots: &[usize]) -> SdfScene {
        let ids = ["smooth", "ball", "ball-2", "extra"];
        let layers: Vec<SceneLayer<'_>> = fixtures
            .iter()
            .enumerate()
            .map(|(index, f)| SceneLayer {
                id: ids[index],
                code: f.code,
                signature: Some(&f.signature),
                uniforms: &f.uniforms,
                children: f.children.clone(),
            })
            .collect();
        build_scene(&layers, roots)
    }

    #[test]
    fn every_layer_is_emitted_once_with_mangled_names() {
        let fixtures = [fixture(SMOOTH, vec![1, 2]), fixture(SPHERE, vec![]), fixture(SPHERE, vec![])];
        let scene = scene(&fixtures, &[0]);

        assert_eq!(scene.graph.nodes.len(), 3);
        assert!(scene.code.contains("uniform float radius_s0ball;"));
        assert!(scene.code.contains("uniform float radius_s1ball2;"));
        assert!(scene.code.contains("float shape_s1ball2(vec3 p)"));
        assert!(scene.code.contains("gSdfMap_s2smooth(context, a)"));
        assert!(scene.code.contains("return map_s2smooth(context, gSdf(0), gSdf(1));"));
        assert!(!scene.code.contains("__"));

        let names: Vec<&str> = scene.bindings.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, ["radius_s0ball", "radius_s1ball2"]);
        assert_eq!(scene.bindings[1].layer, 2);
    }

    #[test]
    fn functions_are_defined_before_they_are_called() {
        let fixtures = [
            fixture(SMOOTH, vec![1, 2, 3]),
            fixture(SPHERE, vec![]),
            fixture(SPHERE, vec![]),
            fixture(SPHERE, vec![]),
        ];
        let scene = scene(&fixtures, &[0]);
        assert_eq!(scene.graph.unions, 1);
        for node in &scene.graph.nodes {
            let owner_id = match node.owner {
                NodeOwner::Layer(index) => ["smooth", "ball", "ball2", "extra"][index].to_string(),
                NodeOwner::Union(union) => format!("union{union}"),
            };
            let mangled = codegen::mangle_id(node.id, &owner_id);
            let definition = scene
                .code
                .find(&format!("gSdfResult map_{mangled}("))
                .expect("definition");
            if let Some(call) = scene.code.find(&format!("return map_{mangled}(")) {
                assert!(definition < call, "{mangled} used before definition");
            }
        }
    }

    #[test]
    fn multiple_roots_share_one_union() {
        let fixtures = [fixture(SPHERE, vec![]), fixture(SPHERE, vec![])];
        let scene = scene(&fixtures, &[0, 1]);
        let root = scene.graph.node(scene.graph.root.unwrap());
        assert_eq!(root.owner, NodeOwner::Union(0));
        assert!(scene.code.contains("gSdfVariadic(2, int[gSdfMaxChildren](0, 1,"));
        assert!(scene.code.contains("float gSdfDistance(vec3 position)"));
    }

    #[test]
    fn empty_forest_still_defines_the_entry_points() {
        let scene = build_scene(&[], &[]);
        assert!(scene.graph.is_empty());
        assert!(scene.code.contains("gSdfResult gSdfScene(inout gSdfContext context)"));
        assert!(scene.bindings.is_empty());
    }
}
