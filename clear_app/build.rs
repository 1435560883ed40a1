// build.rs
// Compiles the demo's GLSL shaders to SPIR-V when the Vulkan SDK is available.
// The demo runs without them (clear only), so a missing compiler is not fatal.

use std::env;
use std::path::{Path, PathBuf};
use std::process::Command;

const STAGE_EXTENSIONS: [&str; 3] = ["vert", "frag", "comp"];

fn glslc_path() -> Option<PathBuf> {
    let sdk = env::var("VULKAN_SDK").ok()?;
    let glslc = if cfg!(target_os = "windows") {
        Path::new(&sdk).join("Bin").join("glslc.exe")
    } else {
        Path::new(&sdk).join("bin").join("glslc")
    };
    glslc.exists().then_some(glslc)
}

fn is_stale(source: &Path, output: &Path) -> bool {
    match (std::fs::metadata(source), std::fs::metadata(output)) {
        (Ok(src), Ok(dst)) => match (src.modified(), dst.modified()) {
            (Ok(src), Ok(dst)) => src > dst,
            _ => true,
        },
        _ => true,
    }
}

fn compile(glslc: &Path, source: &Path, output: &Path) -> bool {
    match Command::new(glslc).arg(source).arg("-o").arg(output).status() {
        Ok(status) if status.success() => true,
        Ok(status) => {
            println!(
                "cargo:warning=glslc failed for {} (exit code {})",
                source.display(),
                status.code().unwrap_or(-1)
            );
            false
        }
        Err(e) => {
            println!("cargo:warning=failed to run glslc: {e}");
            false
        }
    }
}

fn main() {
    println!("cargo:rerun-if-changed=shaders");
    println!("cargo:rerun-if-env-changed=VULKAN_SDK");
    println!("cargo:rerun-if-env-changed=SKIP_SHADERS");

    if env::var_os("SKIP_SHADERS").is_some() {
        return;
    }
    let Some(glslc) = glslc_path() else {
        println!("cargo:warning=VULKAN_SDK/glslc not found, demo will clear without a triangle");
        return;
    };

    let manifest_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap_or_default());
    let shader_dir = manifest_dir.join("shaders");
    let target_dir = manifest_dir.join("..").join("target").join("shaders");
    if let Err(e) = std::fs::create_dir_all(&target_dir) {
        println!("cargo:warning=cannot create {}: {e}", target_dir.display());
        return;
    }

    let Ok(entries) = std::fs::read_dir(&shader_dir) else {
        return;
    };
    let mut compiled = 0;
    for path in entries.filter_map(Result::ok).map(|entry| entry.path()) {
        let is_stage = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| STAGE_EXTENSIONS.contains(&ext));
        let Some(name) = path.file_name().filter(|_| is_stage) else {
            continue;
        };

        // triangle.vert -> triangle.vert.spv
        let mut output_name = name.to_os_string();
        output_name.push(".spv");
        let output = target_dir.join(output_name);
        if is_stale(&path, &output) && compile(&glslc, &path, &output) {
            compiled += 1;
        }
    }
    if compiled > 0 {
        println!("cargo:warning=compiled {compiled} shader(s) into {}", target_dir.display());
    }
}
