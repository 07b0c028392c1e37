use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use compositor::compiled::CompiledKind;
use compositor::{compile_document, sync_values, CompileOptions, CompiledRoot, Document};
use stackconfig::Settings;

use crate::bindings;
use crate::cli::CompileArgs;

pub fn read_document(path: &Path) -> Result<Document> {
    let text = fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    Document::from_json_str(&text).with_context(|| format!("failed to parse layer document {}", path.display()))
}

pub fn compile_options(settings: &Settings) -> CompileOptions {
    CompileOptions {
        glsl_version: bindings::renderer_options(settings).glsl_version,
    }
}

/// Prints one line per diagnostic: `layer:line: severity: message`.
pub fn report_diagnostics(root: &CompiledRoot) {
    for (layer_id, error) in root.errors() {
        println!("{layer_id}:{}: {}: {}", error.line, error.severity, error.text);
    }
}

pub fn run(settings: &Settings, args: &CompileArgs) -> Result<()> {
    let mut document = read_document(&args.document)?;
    let mut gpu = bindings::headless_gpu(settings);
    let root = compile_document(&mut gpu, &document, None, &compile_options(settings))
        .context("failed to compile layer document")?;

    report_diagnostics(&root);
    tracing::info!(
        layers = root.len(),
        errors = root.errors().count(),
        uses_audio = root.uses_audio_input(),
        "compiled {}",
        args.document.display()
    );

    let outcome = write_outputs(&mut document, &root, args);
    let failed = root.layers().filter(|(_, layer)| layer.has_errors()).count();
    root.destroy(&mut gpu);
    outcome?;

    if failed > 0 {
        bail!("{failed} layer(s) failed to compile");
    }
    Ok(())
}

fn write_outputs(document: &mut Document, root: &CompiledRoot, args: &CompileArgs) -> Result<()> {
    if let Some(dir) = &args.emit {
        let written = emit_programs(root, dir)?;
        tracing::info!(dir = %dir.display(), programs = written, "wrote generated programs");
    }
    if args.write_values {
        sync_values(document, root);
        let text = document
            .to_json_string_pretty()
            .context("failed to serialise layer document")?;
        fs::write(&args.document, text + "\n")
            .with_context(|| format!("failed to write {}", args.document.display()))?;
        tracing::info!(path = %args.document.display(), "wrote uniform values back");
    }
    Ok(())
}

fn emit_programs(root: &CompiledRoot, dir: &Path) -> Result<usize> {
    fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    let mut written = 0;
    for (_, layer) in root.layers() {
        let CompiledKind::Shader(shader) = &layer.kind else {
            continue;
        };
        let path = program_path(dir, &layer.id);
        fs::write(&path, &shader.source).with_context(|| format!("failed to write {}", path.display()))?;
        written += 1;
    }
    Ok(written)
}

/// A layer id reduced to filename-safe characters.
pub fn file_stem(layer_id: &str) -> String {
    let stem: String = layer_id
        .chars()
        .map(|ch| if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' { ch } else { '_' })
        .collect();
    if stem.is_empty() {
        "layer".to_string()
    } else {
        stem
    }
}

fn program_path(dir: &Path, layer_id: &str) -> PathBuf {
    dir.join(format!("{}.frag", file_stem(layer_id)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn program_paths_are_filename_safe() {
        let dir = Path::new("/tmp/out");
        assert_eq!(program_path(dir, "tint"), dir.join("tint.frag"));
        assert_eq!(program_path(dir, "a/b c"), dir.join("a_b_c.frag"));
        assert_eq!(program_path(dir, ""), dir.join("layer.frag"));
    }
}
