mod bindings;
mod cli;
mod compile;
mod paths;
mod render;
mod run;
mod uniforms;

use anyhow::Result;

fn main() -> Result<()> {
    let args = cli::parse();
    run::run(args)
}
