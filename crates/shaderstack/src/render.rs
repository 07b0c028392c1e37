use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use compositor::compiled::CompiledKind;
use compositor::gpu::HeadlessGpu;
use compositor::{compile_document, CompiledRoot, FrameInput, ImageFileLoader, Renderer};
use stackconfig::Settings;

use crate::bindings;
use crate::cli::RenderArgs;
use crate::compile::{compile_options, file_stem, read_document, report_diagnostics};

pub fn run(settings: &Settings, args: &RenderArgs) -> Result<()> {
    let document = read_document(&args.document)?;

    let mut options = bindings::renderer_options(settings);
    if let Some((width, height)) = args.size {
        options.width = width;
        options.height = height;
    }
    if let Some(anti_alias) = args.anti_alias {
        options.anti_alias = anti_alias;
    }
    let gpu = bindings::headless_gpu(settings);
    let mut renderer = Renderer::new(gpu, options).context("failed to initialise renderer")?;
    let texture_root = args.document.parent().map(Path::to_path_buf);
    renderer.set_texture_loader(Box::new(ImageFileLoader::new(texture_root)));

    let root = compile_document(renderer.gpu_mut(), &document, None, &compile_options(settings))
        .context("failed to compile layer document")?;
    report_diagnostics(&root);

    let outcome = render_frames(&mut renderer, &root, args);
    root.destroy(renderer.gpu_mut());
    let gpu = renderer.destroy().context("failed to release renderer resources")?;
    let stats = gpu.stats();
    tracing::debug!(
        draws = stats.draws,
        programs_linked = stats.programs_linked,
        texture_uploads = stats.texture_uploads,
        "headless backend totals"
    );
    outcome
}

fn render_frames(renderer: &mut Renderer<HeadlessGpu>, root: &CompiledRoot, args: &RenderArgs) -> Result<()> {
    let fps = if args.fps > 0.0 { args.fps } else { 60.0 };
    for index in 0..args.frames {
        let stats = renderer
            .render(root, FrameInput::at(f64::from(index) / fps))
            .with_context(|| format!("failed to render frame {index}"))?;
        tracing::info!(
            frame = stats.frame,
            time = stats.time,
            layers = stats.layers_drawn,
            failed = stats.failed_layers,
            "rendered frame"
        );
    }

    if let Some(path) = &args.output {
        let image = renderer.read_output()?;
        image
            .save(path)
            .with_context(|| format!("failed to write {}", path.display()))?;
        tracing::info!(path = %path.display(), "exported output");
    }

    if let Some(dir) = &args.previews {
        fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
        let ids: Vec<&str> = root
            .layers()
            .filter(|(_, layer)| matches!(layer.kind, CompiledKind::Shader(_)))
            .map(|(_, layer)| layer.id.as_str())
            .collect();
        let (width, height) = renderer.targets().output_size();
        let previews = renderer.render_layer_previews(root, &ids, (width / 4).max(1), (height / 4).max(1))?;
        for (layer_id, image) in previews {
            let path = dir.join(format!("{}.png", file_stem(&layer_id)));
            image
                .save(&path)
                .with_context(|| format!("failed to write {}", path.display()))?;
        }
        tracing::info!(dir = %dir.display(), layers = ids.len(), "exported previews");
    }
    Ok(())
}
