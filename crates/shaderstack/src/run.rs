use anyhow::Result;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Command};
use crate::paths;

pub fn run(args: Cli) -> Result<()> {
    initialise_tracing();

    let settings = paths::load_settings(args.config.as_deref())?;
    match args.command {
        Command::Compile(compile) => crate::compile::run(&settings, &compile),
        Command::Uniforms(uniforms) => crate::uniforms::run(&uniforms),
        Command::Render(render) => crate::render::run(&settings, &render),
    }
}

fn initialise_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
