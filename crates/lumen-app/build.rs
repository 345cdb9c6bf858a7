use std::{env, fs, path::PathBuf};

fn compile(
    comp: &shaderc::Compiler,
    opts: &shaderc::CompileOptions,
    src: &str,
    kind: shaderc::ShaderKind,
    out: &PathBuf,
) {
    let path = PathBuf::from("shaders").join(src);
    println!("cargo:rerun-if-changed={}", path.display());
    let glsl = fs::read_to_string(&path).unwrap();
    let spv = comp
        .compile_into_spirv(&glsl, kind, src, "main", Some(opts))
        .unwrap();
    fs::write(out.join(format!("{src}.spv")), spv.as_binary_u8()).unwrap();
}

fn main() {
    let out = PathBuf::from(env::var("OUT_DIR").unwrap());

    let comp = shaderc::Compiler::new().unwrap();
    let mut opts = shaderc::CompileOptions::new().unwrap();
    // The instance asks for 1.1; the shaders need nothing newer than 1.0.
    opts.set_target_env(
        shaderc::TargetEnv::Vulkan,
        shaderc::EnvVersion::Vulkan1_0 as u32,
    );
    opts.set_optimization_level(shaderc::OptimizationLevel::Performance);

    compile(&comp, &opts, "mesh.vert", shaderc::ShaderKind::Vertex, &out);
    compile(&comp, &opts, "mesh.frag", shaderc::ShaderKind::Fragment, &out);

    println!("cargo:rerun-if-changed=build.rs");
}
