use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "shaderstack",
    author,
    version,
    about = "Compile, inspect and render layered shader documents"
)]
pub struct Cli {
    /// Settings file; defaults to `settings.toml` in the config directory.
    #[arg(long, global = true, value_name = "PATH", env = "SHADERSTACK_CONFIG")]
    pub config: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Compile a layer document and report diagnostics per layer.
    Compile(CompileArgs),
    /// Print the uniforms a shader declares, with their values, as JSON.
    Uniforms(UniformsArgs),
    /// Render frames of a layer document with the headless backend.
    Render(RenderArgs),
}

#[derive(Args, Debug)]
pub struct CompileArgs {
    /// Layer document (JSON).
    #[arg(value_name = "DOCUMENT")]
    pub document: PathBuf,

    /// Write every generated fragment program into this directory.
    #[arg(long, value_name = "DIR")]
    pub emit: Option<PathBuf>,

    /// Write the compiled uniform values back into the document.
    #[arg(long)]
    pub write_values: bool,
}

#[derive(Args, Debug)]
pub struct UniformsArgs {
    /// GLSL source of a single layer.
    #[arg(value_name = "SHADER")]
    pub shader: PathBuf,
}

#[derive(Args, Debug)]
pub struct RenderArgs {
    /// Layer document (JSON).
    #[arg(value_name = "DOCUMENT")]
    pub document: PathBuf,

    /// Number of frames to render.
    #[arg(long, value_name = "N", default_value_t = 1)]
    pub frames: u32,

    /// Override the output resolution (e.g. `1280x720`).
    #[arg(long, value_name = "WIDTHxHEIGHT", value_parser = parse_size)]
    pub size: Option<(u32, u32)>,

    /// Frame rate used to advance the clock between frames.
    #[arg(long, value_name = "FPS", default_value_t = 60.0)]
    pub fps: f64,

    /// Supersampling factor: `off` or 2/4/8/16. Overrides the settings file.
    #[arg(long, value_name = "MODE", value_parser = parse_antialias)]
    pub anti_alias: Option<u32>,

    /// Export the final output as PNG.
    #[arg(long, value_name = "PNG")]
    pub output: Option<PathBuf>,

    /// Write a PNG preview of every shader layer into this directory.
    #[arg(long, value_name = "DIR")]
    pub previews: Option<PathBuf>,
}

pub fn parse() -> Cli {
    Cli::parse()
}

pub fn parse_size(value: &str) -> Result<(u32, u32), String> {
    let trimmed = value.trim();
    let (width, height) = trimmed
        .split_once(['x', 'X', '×'])
        .ok_or_else(|| "expected WxH format, e.g. 1920x1080".to_string())?;
    let width: u32 = width
        .trim()
        .parse()
        .map_err(|_| format!("invalid width '{}'", width.trim()))?;
    let height: u32 = height
        .trim()
        .parse()
        .map_err(|_| format!("invalid height '{}'", height.trim()))?;
    if width == 0 || height == 0 {
        return Err("dimensions must be greater than zero".to_string());
    }
    Ok((width, height))
}

pub fn parse_antialias(value: &str) -> Result<u32, String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err("anti-alias mode must not be empty".to_string());
    }

    let normalized = trimmed.to_ascii_lowercase();
    match normalized.as_str() {
        "off" | "none" | "disable" | "disabled" => Ok(1),
        _ => {
            let samples: u32 = normalized
                .parse()
                .map_err(|_| format!("invalid anti-alias factor '{trimmed}'; use off or 2/4/8/16"))?;
            match samples {
                0 | 1 => Ok(1),
                2 | 4 | 8 | 16 => Ok(samples),
                _ => Err(format!(
                    "unsupported factor {samples}; supported values are 2, 4, 8, or 16"
                )),
            }
        }
    }
}
