use seqrender::cli::{Args, Command, RenderArgs, ThumbArgs};
use seqrender::config::{RenderSettings, SETTINGS_FILE};
use seqrender::entities::{FrameCache, Project, RenderContext, RenderSize};
use seqrender::paths::PathConfig;
use seqrender::render::{Backends, RenderEngine, Sequencer, ViewArea, guaranteed_frame_step, thumbnail_first_frame, thumbnail_next_frame};

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use log::{info, warn};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Instant;

fn init_logging(args: &Args, path_config: &PathConfig) -> Result<()> {
    // 0 (default) = warn, 1 (-v) = info, 2 (-vv) = debug, 3+ (-vvv) = trace
    let log_level = match args.verbosity {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    if let Some(log_path_opt) = &args.log_file {
        let log_path = log_path_opt
            .as_ref()
            .cloned()
            .unwrap_or_else(|| path_config.config_file("seqrender.log"));
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let file = std::fs::File::create(&log_path)
            .with_context(|| format!("Failed to create log file: {}", log_path.display()))?;

        env_logger::Builder::new()
            .filter_level(log_level)
            .format_timestamp_millis()
            .target(env_logger::Target::Pipe(Box::new(file)))
            .init();
        info!("Logging to file: {} (level: {:?})", log_path.display(), log_level);
    } else {
        // Console logging, respects RUST_LOG if set
        let default_level = match args.verbosity {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        };
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
            .format_timestamp_millis()
            .init();
    }
    Ok(())
}

/// Load a project, returning the context of its active scene.
fn load_context(path: &Path) -> Result<RenderContext> {
    let project = Project::from_json(path)?;
    let (registry, scene) = project.into_registry()?;
    Ok(RenderContext::new(scene, Arc::new(registry)))
}

fn render(args: RenderArgs, mut settings: RenderSettings) -> Result<()> {
    if let Some(prefetch) = args.prefetch {
        settings.prefetch_frames = prefetch;
    }
    let mut ctx = load_context(&args.project)?;

    let size: RenderSize = args.proxy.into();
    if size != RenderSize::Scene {
        let (w, h) = ctx.scene.render_size();
        let scale = size.scale_factor();
        ctx = ctx.with_size(
            ((w as f32 * scale) as usize).max(1),
            ((h as f32 * scale) as usize).max(1),
        );
        ctx.preview_render_size = size;
        ctx.use_proxies = true;
    }
    ctx.for_render = args.final_render;
    ctx.env.is_rendering = args.final_render;

    let sequencer = Sequencer::from_settings(&settings, Backends::files()).context("Failed to start prefetch workers")?;
    std::fs::create_dir_all(&args.out_dir)
        .with_context(|| format!("Failed to create output directory: {}", args.out_dir.display()))?;

    let (start, end) = args.frame_range(ctx.scene.sfra, ctx.scene.efra);
    if end < start {
        return Err(anyhow!("Empty frame range {}..{}", start, end));
    }
    info!(
        "Rendering '{}' frames {}-{} at {}x{}",
        ctx.scene.name, start, end, ctx.rectx, ctx.recty
    );

    let started = Instant::now();
    for frame in start..=end {
        let image = match sequencer.give_frame(&ctx, frame as f32, args.chanshown) {
            Some(image) => image,
            None => {
                warn!("Frame {}: nothing visible", frame);
                RenderEngine::blank(&ctx)
            }
        };
        let path = args.out_dir.join(format!("{}_{:06}.png", ctx.scene.name, frame));
        image
            .save_png(&path)
            .with_context(|| format!("Failed to write {}", path.display()))?;
    }

    let elapsed = started.elapsed().as_secs_f64();
    let count = (end - start + 1) as f64;
    let stats = sequencer.engine().cache.stats_snapshot();
    info!(
        "Rendered {} frames in {:.2}s ({:.1} fps), cache hit rate {:.1}%",
        count,
        elapsed,
        count / elapsed.max(1e-6),
        stats.hit_rate() * 100.0
    );
    Ok(())
}

fn thumbs(args: ThumbArgs, settings: RenderSettings) -> Result<()> {
    let ctx = load_context(&args.project)?;
    let timeline = &ctx.scene.editing.timeline;
    let strip = timeline
        .strips
        .iter()
        .find(|s| s.name == args.strip)
        .ok_or_else(|| anyhow!("Strip '{}' not found in scene '{}'", args.strip, ctx.scene.name))?;

    let sequencer = Sequencer::from_settings(&settings, Backends::files()).context("Failed to start prefetch workers")?;
    std::fs::create_dir_all(&args.out_dir)
        .with_context(|| format!("Failed to create output directory: {}", args.out_dir.display()))?;

    let step = args.step.unwrap_or_else(|| guaranteed_frame_step(strip) as f32);
    if step <= 0.0 {
        return Err(anyhow!("Strip '{}' has no content", strip.name));
    }
    let view = ViewArea { xmin: strip.left_handle() as f32, xmax: strip.right_handle() as f32 };
    let first = thumbnail_first_frame(strip, step, &view);
    let stop = AtomicBool::new(false);
    sequencer.render_thumbnails(&ctx, timeline, strip, first, step, &view, &stop);
    if strip.skip_thumbnails.get() {
        return Err(anyhow!("Strip '{}': source cannot be read", strip.name));
    }

    let mut written = 0;
    let mut frame = first;
    while frame < view.xmax {
        if let Some(thumb) = sequencer.get_thumbnail(&ctx, strip, frame, None) {
            let path = args.out_dir.join(format!("{}_{:06}.png", strip.name, frame.round() as i32));
            thumb
                .save_png(&path)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            written += 1;
        }
        frame = thumbnail_next_frame(strip, frame, step);
    }
    info!("Wrote {} thumbnails of '{}'", written, strip.name);
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    let path_config = PathConfig::from_env_and_cli(args.config_dir.clone());
    init_logging(&args, &path_config)?;

    let settings_path = path_config.config_file(SETTINGS_FILE);
    let settings = RenderSettings::load_or_default(&settings_path)?;
    info!("Settings: {}", settings_path.display());

    match args.command {
        Command::Render(render_args) => render(render_args, settings),
        Command::Thumbs(thumb_args) => thumbs(thumb_args, settings),
    }
}
