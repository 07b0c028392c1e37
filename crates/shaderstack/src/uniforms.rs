use std::fs;

use anyhow::{Context, Result};
use compositor::uniforms::{extract_uniforms, Uniform};
use compositor::ShaderValue;
use serde::Serialize;

use crate::cli::UniformsArgs;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UniformReport<'a> {
    name: &'a str,
    glsl_type: &'a str,
    occurrences: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    hint: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max: Option<f64>,
    shader_value: &'a ShaderValue,
}

impl<'a> From<&'a Uniform> for UniformReport<'a> {
    fn from(uniform: &'a Uniform) -> Self {
        Self {
            name: &uniform.name,
            glsl_type: &uniform.glsl_type,
            occurrences: uniform.occurrences.len(),
            hint: uniform.metadata.type_hint.as_deref(),
            min: uniform.metadata.min,
            max: uniform.metadata.max,
            shader_value: &uniform.shader_value,
        }
    }
}

pub fn run(args: &UniformsArgs) -> Result<()> {
    let source =
        fs::read_to_string(&args.shader).with_context(|| format!("failed to read {}", args.shader.display()))?;
    let uniforms = extract_uniforms(&source, &[], &mut |_| None);
    let report: Vec<UniformReport<'_>> = uniforms.iter().map(UniformReport::from).collect();
    let json = serde_json::to_string_pretty(&report).context("failed to serialise uniforms")?;
    println!("{json}");
    tracing::debug!(count = uniforms.len(), "listed uniforms");
    Ok(())
}
