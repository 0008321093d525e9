//! texcache - inspect and sample tiled textures from the command line.

use clap::Parser;
use std::process::ExitCode;
use tracing::error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use texcache::{
    config::{Cli, Command, InfoConfig, SampleConfig},
    texture::parse_wrap_hint,
    Derivatives, FileRangeReader, FsTextureSource, SampleParams, TextureContext, TextureOptions,
    TiffTextureReader, TileReader,
};

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Command::Info(config) => run_info(config),
        Command::Sample(config) => run_sample(config),
    }
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "texcache=debug"
    } else {
        "texcache=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

// =============================================================================
// Info Command
// =============================================================================

fn run_info(config: InfoConfig) -> ExitCode {
    let reader = match FileRangeReader::open(&config.file)
        .map_err(texcache::TextureError::from)
        .and_then(TiffTextureReader::new)
    {
        Ok(reader) => reader,
        Err(e) => {
            error!(path = %config.file.display(), error = %e, "Failed to open texture");
            return ExitCode::FAILURE;
        }
    };

    let header = reader.header();
    let pyramid = reader.pyramid();
    let (wrap_s, wrap_t) = parse_wrap_hint(header.wrap_hint.as_deref());

    let mut levels = Vec::new();
    for ly in 0..header.levels_y {
        for lx in 0..header.levels_x {
            let (rx, ry) = header.resolve_level(lx, ly);
            if (rx, ry) != (lx, ly) {
                continue;
            }
            if let Some(level) = pyramid.level(lx, ly) {
                levels.push((lx, ly, level));
            }
        }
    }

    if config.json {
        let json = serde_json::json!({
            "path": config.file.display().to_string(),
            "header": header,
            "compression": format!("{:?}", pyramid.pixel.compression),
            "samples_per_pixel": pyramid.pixel.samples_per_pixel,
            "sample_kind": format!("{:?}", pyramid.pixel.sample_kind),
            "wrap": [wrap_s, wrap_t],
            "levels": levels
                .iter()
                .map(|(lx, ly, level)| serde_json::json!({
                    "level_x": lx,
                    "level_y": ly,
                    "width": level.width,
                    "height": level.height,
                    "tiles_x": level.tiles_x,
                    "tiles_y": level.tiles_y,
                }))
                .collect::<Vec<_>>(),
        });
        match serde_json::to_string_pretty(&json) {
            Ok(text) => println!("{}", text),
            Err(e) => {
                error!(error = %e, "Failed to serialise texture info");
                return ExitCode::FAILURE;
            }
        }
        return ExitCode::SUCCESS;
    }

    println!("{}", config.file.display());
    println!("═════════════════════════════════");
    println!("  Size:        {} x {}", header.width, header.height);
    println!("  Tiles:       {} x {}", header.tile_width, header.tile_height);
    println!(
        "  Levels:      {} x {} ({:?})",
        header.levels_x, header.levels_y, header.level_mode
    );
    println!(
        "  Pixels:      {} x {:?}, {:?}, alpha: {}",
        pyramid.pixel.samples_per_pixel,
        pyramid.pixel.sample_kind,
        pyramid.pixel.compression,
        header.has_alpha
    );
    println!("  Wrap:        {:?}, {:?}", wrap_s, wrap_t);
    println!();
    println!("  Level      Size            Tiles");
    println!("  ─────────────────────────────────");
    for (lx, ly, level) in &levels {
        println!(
            "  ({:>2},{:>2})   {:>6} x {:<6}  {} x {}",
            lx, ly, level.width, level.height, level.tiles_x, level.tiles_y
        );
    }

    ExitCode::SUCCESS
}

// =============================================================================
// Sample Command
// =============================================================================

fn run_sample(config: SampleConfig) -> ExitCode {
    if let Err(e) = config.cache.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let context = TextureContext::init(config.cache.clone(), FsTextureSource);
    let handle = match context.try_open(&config.file, TextureOptions::default()) {
        Ok(handle) => handle,
        Err(e) => {
            error!(path = %config.file.display(), error = %e, "Failed to open texture");
            return ExitCode::FAILURE;
        }
    };

    let derivatives = Derivatives::screen(config.ds_dx, config.ds_dy, config.dt_dx, config.dt_dy);
    let params = SampleParams {
        filter_width: config.filter_width,
        ..SampleParams::default()
    };
    let sample = context.sample(
        handle,
        (config.u, config.v),
        &derivatives,
        config.style.into(),
        &params,
    );
    let stats = context.stats();

    if config.json {
        let json = serde_json::json!({
            "sample": sample,
            "stats": stats,
        });
        match serde_json::to_string_pretty(&json) {
            Ok(text) => println!("{}", text),
            Err(e) => {
                error!(error = %e, "Failed to serialise sample");
                return ExitCode::FAILURE;
            }
        }
    } else {
        println!(
            "color: [{:.6}, {:.6}, {:.6}]",
            sample.color[0], sample.color[1], sample.color[2]
        );
        println!("alpha: {:.6}", sample.alpha);
        println!("transparency: {:.6}", sample.transparency);
        println!(
            "tiles loaded: {} ({} bytes), texel accesses: {}",
            stats.tile_loads, stats.bytes_loaded, stats.texel_accesses
        );
    }

    context.close(handle);
    context.shutdown();
    ExitCode::SUCCESS
}
