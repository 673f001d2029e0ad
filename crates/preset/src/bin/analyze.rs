//! Preset analysis tool
//!
//! This binary loads a shader preset, reflects every pass program and prints
//! the resolved binding plan: which source each sampler and texture
//! coordinate reads and how much history every slot keeps.

use shaderchain_preset::{ChainPlan, InputSource, Preset, reflect_wgsl};
use std::env;
use std::fs;
use std::path::Path;
use std::process;

fn main() {
    let args: Vec<String> = env::args().collect();

    let (preset_path, json) = match args.as_slice() {
        [_, path] => (path, false),
        [_, flag, path] if flag == "--json" => (path, true),
        _ => {
            eprintln!("Usage: {} [--json] <preset.yaml|preset.glslp>", args[0]);
            eprintln!("Resolves the bindings of a shader preset and dumps them to stdout");
            process::exit(1);
        }
    };

    if let Err(e) = run(Path::new(preset_path), json) {
        eprintln!("Error analyzing preset '{preset_path}': {e}");
        process::exit(1);
    }
}

fn run(preset_path: &Path, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let preset = Preset::from_file(preset_path)?;
    let preset_dir = preset_path.parent().unwrap_or(Path::new("."));

    // Shader paths are relative to the preset file
    let interfaces = preset
        .passes
        .iter()
        .map(|pass| -> Result<_, Box<dyn std::error::Error>> {
            let source = fs::read_to_string(preset_dir.join(&pass.shader))?;
            Ok(reflect_wgsl(&source)?)
        })
        .collect::<Result<Vec<_>, _>>()?;

    let plan = ChainPlan::build(&preset, &interfaces)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
        return Ok(());
    }

    for (pass, descriptor) in plan.passes.iter().zip(&preset.passes) {
        let terminal = pass.index + 1 == plan.passes.len();
        println!("Pass {} ({}){}", pass.index, descriptor.shader.display(), if terminal { " -> output" } else { "" });
        for sampler in &pass.samplers {
            println!("  texture @{:<2} {:<20} <- {}", sampler.unit, sampler.name, describe(&preset, sampler.source));
        }
        for coord in &pass.tex_coords {
            println!("  texcoord @{:<2} {:<19} <- {}", coord.location, coord.name, describe(&preset, coord.source));
        }
        if pass.has_frame_count {
            match pass.frame_count_mod {
                Some(cycle) => println!("  frame count mod {cycle}"),
                None => println!("  frame count"),
            }
        }
        for name in &pass.skipped {
            println!("  (unbound) {name}");
        }
    }

    println!("History: original {} frame(s), passes {:?}", plan.history.original, plan.history.passes);
    Ok(())
}

fn describe(preset: &Preset, source: InputSource) -> String {
    match source {
        InputSource::Texture(index) => format!("lookup `{}`", preset.textures[index].id),
        other => other.to_string(),
    }
}
