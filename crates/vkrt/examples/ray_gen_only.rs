//! Ray-generation-only pipeline
//!
//! Creates a context, registers a single ray generation program with four
//! declared parameters, builds the pipeline and tears everything down again.
//! No geometry or miss programs are registered.
//!
//! # Usage
//! ```bash
//! cargo run --example ray_gen_only -- --width 800 --height 600
//! cargo run --example ray_gen_only -- --software -v
//! ```

use bytemuck::{Pod, Zeroable};
use clap::Parser;
use std::mem::offset_of;
use vkrt::{Context, DeviceAddress, SoftwareDevice, VariableDecl, VariableType, shader::compile_wgsl};

/// Device-visible parameters of the ray generation program
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct RayGenData {
    fb_ptr: u64,
    fb_size: [i32; 2],
    color0: [f32; 3],
    color1: [f32; 3],
}

/// Checkerboard ray generation program; compute entry points stand in for ray stages
const SIMPLE_RAY_GEN: &str = r#"
struct RayGenData {
    fb_ptr: vec2<u32>,
    fb_size: vec2<i32>,
    color0: array<f32, 3>,
    color1: array<f32, 3>,
}

// Storage layout keeps the colors at 4-byte alignment, matching the host struct (40 bytes)
@group(0) @binding(0) var<storage, read> params: RayGenData;
@group(0) @binding(1) var<storage, read_write> frame_buffer: array<u32>;

fn rgb(color: array<f32, 3>) -> vec3<f32> {
    return vec3<f32>(color[0], color[1], color[2]);
}

fn pack(color: vec3<f32>) -> u32 {
    let c = vec3<u32>(clamp(color, vec3<f32>(0.0), vec3<f32>(1.0)) * 255.0);
    return 0xff000000u | (c.b << 16u) | (c.g << 8u) | c.r;
}

@compute @workgroup_size(8, 8)
fn main(@builtin(global_invocation_id) id: vec3<u32>) {
    let pixel = vec2<i32>(id.xy);
    if (pixel.x >= params.fb_size.x || pixel.y >= params.fb_size.y) {
        return;
    }
    let pattern = (pixel.x / 8 + pixel.y / 8) % 2;
    let color = select(rgb(params.color1), rgb(params.color0), pattern == 0);
    frame_buffer[pixel.y * params.fb_size.x + pixel.x] = pack(color);
}
"#;

/// Command-line arguments
#[derive(Parser)]
#[command(version, about = "Builds a pipeline holding a single ray generation program")]
struct Args {
    /// Frame buffer width
    #[arg(long, default_value_t = 800)]
    width: i32,

    /// Frame buffer height
    #[arg(long, default_value_t = 600)]
    height: i32,

    /// Validate on the host instead of opening a GPU
    #[arg(long)]
    software: bool,

    /// Enable debug logging
    #[arg(long, short)]
    verbose: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let level = if args.verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };
    let subscriber = tracing_subscriber::fmt().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    tracing::info!("ray_gen_only starting up");

    let mut context = if args.software {
        Context::with_devices(vec![Box::new(SoftwareDevice::new())])?
    } else {
        Context::create(1)?
    };

    let binary = compile_wgsl(SIMPLE_RAY_GEN)?;
    let ray_gen_vars = [
        VariableDecl::new("fbPtr", VariableType::BufferPointer, offset_of!(RayGenData, fb_ptr)),
        VariableDecl::new("fbSize", VariableType::Int2, offset_of!(RayGenData, fb_size)),
        VariableDecl::new("color0", VariableType::Float3, offset_of!(RayGenData, color0)),
        VariableDecl::new("color1", VariableType::Float3, offset_of!(RayGenData, color1)),
    ];
    let ray_gen = context.create_ray_gen(&binary, size_of::<RayGenData>(), &ray_gen_vars)?;

    context.set_variable(ray_gen, "fbPtr", DeviceAddress(0))?;
    context.set_variable(ray_gen, "fbSize", [args.width, args.height])?;
    context.set_variable(ray_gen, "color0", [0.8f32, 0.0, 0.0])?;
    context.set_variable(ray_gen, "color1", [0.8f32, 0.8, 0.8])?;

    // No miss or hit group programs are registered; only ray generation is linked
    let report = context.build_pipeline()?;
    let pipeline = context.pipeline(report.pipeline)?;
    tracing::info!(
        "built {} with {} program(s), {} warning(s)",
        report.pipeline,
        pipeline.programs().len(),
        report.warnings.len()
    );

    tracing::info!("cleaning up");
    context.release_program(ray_gen)?;
    context.destroy()?;

    tracing::info!("all went OK");
    Ok(())
}
