use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use tempfile::TempDir;

const TINT: &str = "uniform float blue; // default: 0.5, min: 0, max: 1\\nvec4 render(vec2 uv) { return vec4(uv, blue, 1.0); }\\n";
const BROKEN: &str = "vec4 render(vec2 uv) { return vec4(1.0); }\\n#error missing semicolon\\n";

fn write_document(root: &Path, layers: &[(&str, &str)]) -> std::path::PathBuf {
    let layers: Vec<String> = layers
        .iter()
        .map(|(id, code)| format!(r#"{{ "type": "shader", "id": "{id}", "code": "{code}" }}"#))
        .collect();
    let path = root.join("document.json");
    fs::write(
        &path,
        format!(r#"{{ "type": "group", "id": "root", "layers": [{}] }}"#, layers.join(", ")),
    )
    .unwrap();
    path
}

fn shaderstack(config_dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_shaderstack"))
        .env("SHADERSTACK_CONFIG_DIR", config_dir)
        .env_remove("SHADERSTACK_CONFIG")
        .env("RUST_LOG", "warn")
        .args(args)
        .output()
        .expect("failed to run shaderstack")
}

#[test]
fn compile_emits_programs_and_writes_values() {
    let root = TempDir::new().unwrap();
    let document = write_document(root.path(), &[("tint", TINT)]);
    let emit = root.path().join("programs");

    let output = shaderstack(
        root.path(),
        &[
            "compile",
            document.to_str().unwrap(),
            "--emit",
            emit.to_str().unwrap(),
            "--write-values",
        ],
    );
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let program = fs::read_to_string(emit.join("tint.frag")).unwrap();
    assert!(program.starts_with("#version 300 es"));
    assert!(program.contains("uniform float blue;"));

    let written: serde_json::Value = serde_json::from_str(&fs::read_to_string(&document).unwrap()).unwrap();
    let value = &written["layers"][0]["values"][0];
    assert_eq!(value["name"], "blue");
    assert_eq!(value["value"], 0.5);
}

#[test]
fn compile_reports_errors_and_fails() {
    let root = TempDir::new().unwrap();
    let document = write_document(root.path(), &[("tint", TINT), ("broken", BROKEN)]);

    let output = shaderstack(root.path(), &["compile", document.to_str().unwrap()]);
    assert!(!output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("broken:2: error:"), "unexpected output: {stdout}");
    assert!(!stdout.contains("tint:"));
}

#[test]
fn uniforms_are_printed_as_json() {
    let root = TempDir::new().unwrap();
    let shader = root.path().join("layer.glsl");
    fs::write(
        &shader,
        "uniform vec3 tint; // type: 'color', default: [1, 0.5, 0]\nuniform mat4 ignored;\nvec4 render(vec2 uv) { return vec4(tint, 1.0); }\n",
    )
    .unwrap();

    let output = shaderstack(root.path(), &["uniforms", shader.to_str().unwrap()]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let uniforms = report.as_array().unwrap();
    assert_eq!(uniforms.len(), 1);
    assert_eq!(uniforms[0]["name"], "tint");
    assert_eq!(uniforms[0]["glslType"], "vec3");
    assert_eq!(uniforms[0]["hint"], "color");
    assert_eq!(uniforms[0]["shaderValue"]["value"], serde_json::json!([1.0, 0.5, 0.0]));
}

#[test]
fn render_exports_output_and_previews() {
    let root = TempDir::new().unwrap();
    let document = write_document(root.path(), &[("tint", TINT), ("broken", BROKEN)]);
    let output_png = root.path().join("frame.png");
    let previews = root.path().join("previews");

    let output = shaderstack(
        root.path(),
        &[
            "render",
            document.to_str().unwrap(),
            "--frames",
            "3",
            "--size",
            "64x32",
            "--anti-alias",
            "2",
            "--output",
            output_png.to_str().unwrap(),
            "--previews",
            previews.to_str().unwrap(),
        ],
    );
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert!(output_png.exists());
    assert!(previews.join("tint.png").exists());
    assert!(previews.join("broken.png").exists());
}

#[test]
fn invalid_settings_are_rejected() {
    let root = TempDir::new().unwrap();
    fs::write(root.path().join("settings.toml"), "version = 7\n").unwrap();
    let document = write_document(root.path(), &[("tint", TINT)]);

    let output = shaderstack(root.path(), &["compile", document.to_str().unwrap()]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("unsupported settings version 7"), "unexpected stderr: {stderr}");
}

#[test]
fn explicit_settings_apply_to_render() {
    let root = TempDir::new().unwrap();
    let settings = root.path().join("custom.toml");
    fs::write(&settings, "version = 1\n[render]\nwidth = 48\nheight = 24\n").unwrap();
    let document = write_document(root.path(), &[("tint", TINT)]);
    let output_png = root.path().join("frame.png");

    let output = shaderstack(
        root.path(),
        &[
            "--config",
            settings.to_str().unwrap(),
            "render",
            document.to_str().unwrap(),
            "--output",
            output_png.to_str().unwrap(),
        ],
    );
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let image = image::open(&output_png).unwrap();
    assert_eq!((image.width(), image.height()), (48, 24));
}
