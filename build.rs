// Build script to compile the bundled GLSL shaders to SPIR-V
//
// The renderer loads shaders/vert.spv and shaders/frag.spv at runtime.
// When glslc is not installed, existing .spv files are used as-is; if there
// are none, the build warns and the renderer fails at startup.

use std::path::Path;
use std::process::Command;

fn main() {
    println!("cargo:rerun-if-changed=shaders/shader.vert");
    println!("cargo:rerun-if-changed=shaders/shader.frag");

    compile_shader("shaders/shader.vert", "shaders/vert.spv");
    compile_shader("shaders/shader.frag", "shaders/frag.spv");

    for output in ["shaders/vert.spv", "shaders/frag.spv"] {
        if !Path::new(output).exists() {
            println!(
                "cargo:warning={} is missing; install glslc (Vulkan SDK or shaderc) and rebuild",
                output
            );
        }
    }
}

fn compile_shader(input: &str, output: &str) {
    let input_path = Path::new(input);
    let output_path = Path::new(output);

    if !input_path.exists() {
        return;
    }

    let result = Command::new("glslc")
        .arg(input_path)
        .arg("-o")
        .arg(output_path)
        .status();

    match result {
        Ok(status) if status.success() => {}
        Ok(status) => {
            println!(
                "cargo:warning=glslc failed on {} (exit code {:?})",
                input,
                status.code()
            );
        }
        Err(e) => {
            println!("cargo:warning=glslc not found ({}), skipping {}", e, input);
        }
    }
}
