//! Pipeline manifest checker
//!
//! This binary loads a YAML pipeline manifest, registers its programs into a
//! context, builds the pipeline and prints a report. Shader files ending in
//! `.wgsl` are compiled to SPIR-V first; anything else is read as a binary.
//!
//! Exits with status 1 if any step fails.

use serde::Serialize;
use std::env;
use std::fs;
use std::path::Path;
use std::process;
use vkrt::{Context, ContextOptions, SoftwareDevice, shader::compile_wgsl};
use vkrt_manifest::PipelineManifest;

/// Machine-readable summary printed with `--json`
#[derive(Serialize)]
struct CheckSummary<'a> {
    manifest: &'a str,
    pipeline: String,
    devices: Vec<String>,
    programs: Vec<ProgramSummary<'a>>,
    shader_binding_table_size: usize,
    warnings: Vec<String>,
}

#[derive(Serialize)]
struct ProgramSummary<'a> {
    id: &'a str,
    kind: vkrt::ProgramKind,
    offset: usize,
    size: usize,
}

fn usage(program: &str) -> ! {
    eprintln!("Usage: {program} <manifest.yaml> [--software] [--json] [-v]");
    eprintln!("Registers a manifest's programs, builds the pipeline and reports the result");
    process::exit(1);
}

fn main() {
    let args: Vec<String> = env::args().collect();

    let mut manifest_path = None;
    let mut software = false;
    let mut json = false;
    let mut verbose = false;
    for arg in &args[1..] {
        match arg.as_str() {
            "--software" => software = true,
            "--json" => json = true,
            "-v" | "--verbose" => verbose = true,
            path if manifest_path.is_none() && !path.starts_with('-') => manifest_path = Some(path.to_string()),
            _ => usage(&args[0]),
        }
    }
    let Some(manifest_path) = manifest_path else {
        usage(&args[0]);
    };

    let level = if verbose { tracing::Level::DEBUG } else { tracing::Level::WARN };
    let subscriber = tracing_subscriber::fmt().with_max_level(level).with_writer(std::io::stderr).finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Error installing logger: {e}");
    }

    if !Path::new(&manifest_path).exists() {
        eprintln!("Error: Manifest file '{manifest_path}' does not exist");
        process::exit(1);
    }

    let manifest = match PipelineManifest::from_file(&manifest_path) {
        Ok(manifest) => manifest,
        Err(e) => {
            eprintln!("Error loading manifest '{manifest_path}': {e}");
            process::exit(1);
        }
    };

    let context = if software {
        Context::with_devices(vec![Box::new(SoftwareDevice::new())])
    } else {
        Context::with_options(&ContextOptions {
            label: Some(manifest.id.clone()),
            ..manifest.context.clone()
        })
    };
    let mut context = match context {
        Ok(context) => context,
        Err(e) => {
            eprintln!("Error creating context: {e}");
            process::exit(1);
        }
    };

    // Shader files are resolved relative to the manifest directory first
    let manifest_dir = Path::new(&manifest_path).parent().unwrap_or(Path::new(".")).to_path_buf();
    let load_binary = |file_path: &str| -> Result<Vec<u8>, std::io::Error> {
        let shader_path = manifest_dir.join(file_path);
        let shader_path = if shader_path.exists() { shader_path } else { Path::new(file_path).to_path_buf() };

        if shader_path.extension().is_some_and(|extension| extension == "wgsl") {
            let source = fs::read_to_string(&shader_path)?;
            compile_wgsl(&source).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))
        } else {
            fs::read(shader_path)
        }
    };

    let registered = match manifest.register(&mut context, load_binary) {
        Ok(registered) => registered,
        Err(e) => {
            eprintln!("Error registering manifest '{manifest_path}': {e}");
            process::exit(1);
        }
    };

    let report = match context.build_pipeline() {
        Ok(report) => report,
        Err(e) => {
            eprintln!("Error building pipeline for '{manifest_path}': {e}");
            process::exit(1);
        }
    };

    let summary = match (context.pipeline(report.pipeline), context.devices()) {
        (Ok(pipeline), Ok(devices)) => {
            let sbt = pipeline.shader_binding_table();
            CheckSummary {
                manifest: &manifest.id,
                pipeline: report.pipeline.to_string(),
                devices: devices.iter().map(|device| format!("{} ({})", device.info().name, device.info().backend)).collect(),
                programs: registered
                    .iter()
                    .filter_map(|program| {
                        let record = sbt.records().iter().find(|record| record.program == program.handle)?;
                        Some(ProgramSummary {
                            id: &program.id,
                            kind: record.kind,
                            offset: record.offset,
                            size: record.size,
                        })
                    })
                    .collect(),
                shader_binding_table_size: sbt.as_bytes().len(),
                warnings: report.warnings.iter().map(ToString::to_string).collect(),
            }
        }
        (Err(e), _) | (_, Err(e)) => {
            eprintln!("Error inspecting pipeline: {e}");
            process::exit(1);
        }
    };

    if json {
        match serde_json::to_string_pretty(&summary) {
            Ok(json) => println!("{json}"),
            Err(e) => {
                eprintln!("Error serializing report: {e}");
                process::exit(1);
            }
        }
    } else {
        println!("{} ({})", manifest.name, summary.pipeline);
        println!("devices: {}", summary.devices.join(", "));
        for program in &summary.programs {
            println!("  {:<24} {:<10} record at {:>6}, {:>4} bytes", program.id, program.kind.name(), program.offset, program.size);
        }
        println!("shader binding table: {} bytes", summary.shader_binding_table_size);
        for warning in &summary.warnings {
            println!("warning: {warning}");
        }
    }

    if let Err(e) = context.destroy() {
        eprintln!("Error destroying context: {e}");
        process::exit(1);
    }
}
