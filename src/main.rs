use clap::{Parser, Subcommand};
use log::{info, warn};
use std::path::{Path, PathBuf};

use tilelook::catalog::RuleBook;
use tilelook::model::ResolvedRange;
use tilelook::pipeline::DEFAULT_MAX_WORKERS;
use tilelook::stats::CohortStats;
use tilelook::{
    abv, reverse, CoordinateRange, Palette, PngSink, RenderConfig, RenderMode, Renderer, TileError,
};

#[derive(Parser)]
#[command(name = "tilelook")]
#[command(about = "Render ABV tile calls of a cohort as PNG grids.", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    // Logging
    /// Verbosity level (0 = error, 1 = info, 2 = debug).
    #[arg(short = 'v', long = "verbose", value_name = "N", default_value_t = 1, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Render PNG images for every tile or every individual.
    Render(RenderArgs),
    /// Print call counts and extents of a cohort.
    Stat(StatArgs),
    /// Convert a per-sample PNG back into an ABV file.
    Reverse(ReverseArgs),
}

/// Window selection; unset ends use the largest observed index.
#[derive(clap::Args, Clone, Copy)]
struct WindowArgs {
    /// First band index to include.
    #[arg(long = "start-band", value_name = "N", default_value_t = 0)]
    start_band: u32,

    /// Last band index to include.
    #[arg(long = "end-band", value_name = "N")]
    end_band: Option<u32>,

    /// First position index to include.
    #[arg(long = "start-pos", value_name = "N", default_value_t = 0)]
    start_pos: u32,

    /// Last position index to include.
    #[arg(long = "end-pos", value_name = "N")]
    end_pos: Option<u32>,
}

impl WindowArgs {
    fn range(&self) -> CoordinateRange {
        CoordinateRange {
            start_band: self.start_band,
            end_band: self.end_band,
            start_pos: self.start_pos,
            end_pos: self.end_pos,
        }
    }
}

#[derive(clap::Args)]
struct RenderArgs {
    // MANDATORY OPTIONS
    /// Read every .abv file in this DIR.
    #[arg(short = 'i', long = "abv-dir", value_name = "DIR")]
    abv_dir: PathBuf,

    /// Write the images below this DIR.
    #[arg(short = 'o', long = "img-dir", value_name = "DIR")]
    img_dir: PathBuf,

    // Visualization Options
    /// One image per tile (cohort) or one image per individual (sample).
    #[arg(short = 'm', long = "mode", value_enum, default_value_t = RenderMode::Cohort)]
    mode: RenderMode,

    /// Edge length in pixels of one cell.
    #[arg(short = 's', long = "slot-pixel", value_name = "N", default_value_t = 8)]
    slot_pixel: u32,

    /// Draw separators between cells (needs --slot-pixel >= 2).
    #[arg(short = 'g', long = "grid-lines")]
    grid_lines: bool,

    /// Cells per row in cohort images.
    #[arg(short = 'b', long = "box-num", value_name = "N", default_value_t = 10)]
    box_num: u32,

    /// Read variant colors ("R, G, B" per line) from FILE.
    #[arg(short = 'c', long = "color-spec", value_name = "FILE")]
    color_spec: Option<PathBuf>,

    // Tile rules
    /// Attach catalog factors from this tile rule FILE to every call.
    #[arg(short = 'r', long = "rules", value_name = "FILE")]
    rules: Option<PathBuf>,

    /// Color cells by catalog factor instead of variant.
    #[arg(short = 'f', long = "color-by-factor", requires = "rules")]
    color_by_factor: bool,

    #[command(flatten)]
    window: WindowArgs,

    // Threading
    /// Maximum number of images written at the same time.
    #[arg(
        short = 't',
        long = "max-workers",
        value_name = "N",
        default_value_t = DEFAULT_MAX_WORKERS
    )]
    max_workers: usize,
}

#[derive(clap::Args)]
struct StatArgs {
    /// Read every .abv file in this DIR.
    #[arg(short = 'i', long = "abv-dir", value_name = "DIR")]
    abv_dir: PathBuf,

    #[command(flatten)]
    window: WindowArgs,
}

#[derive(clap::Args)]
struct ReverseArgs {
    /// Per-sample PNG produced by `render --mode sample`.
    #[arg(short = 'i', long = "img", value_name = "FILE")]
    img: PathBuf,

    /// Write the recovered ABV stream to this FILE.
    #[arg(short = 'o', long = "out", value_name = "FILE")]
    out: PathBuf,

    /// Cell size the image was rendered with.
    #[arg(short = 's', long = "slot-pixel", value_name = "N", default_value_t = 8)]
    slot_pixel: u32,

    /// The image was rendered with grid lines.
    #[arg(short = 'g', long = "grid-lines")]
    grid_lines: bool,

    /// Variant colors the image was rendered with.
    #[arg(short = 'c', long = "color-spec", value_name = "FILE")]
    color_spec: Option<PathBuf>,

    // Window the image was rendered with; both ends are required.
    #[command(flatten)]
    window: WindowArgs,
}

/// List the .abv files of `dir` in name order; that order is the cohort order.
fn scan_abv_files(dir: &Path) -> tilelook::Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir).map_err(|source| TileError::InputNotFound {
        path: dir.to_path_buf(),
        source,
    })?;
    let mut paths = Vec::new();
    for entry in entries {
        let path = entry
            .map_err(|source| TileError::ReadFailed {
                path: dir.to_path_buf(),
                source,
            })?
            .path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == abv::FILE_EXTENSION) {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

fn run_render(args: RenderArgs) -> tilelook::Result<()> {
    let config = RenderConfig {
        mode: args.mode,
        range: args.window.range(),
        cell_size: args.slot_pixel,
        grid_lines: args.grid_lines,
        cohort_width: args.box_num,
        max_workers: args.max_workers,
        output_dir: args.img_dir,
        palette_path: args.color_spec,
        color_by_factor: args.color_by_factor,
    };
    config.validate()?;

    let palette = Palette::load(config.palette_path.as_deref())?;
    let rules = match &args.rules {
        Some(path) => Some(RuleBook::load(path, &config.range)?),
        None => None,
    };

    let paths = scan_abv_files(&args.abv_dir)?;
    if paths.is_empty() {
        warn!("No .abv files found in {:?}", args.abv_dir);
        return Ok(());
    }
    let renderer = Renderer::new(&config, &palette, PngSink)?;
    let cohort = renderer.install(|| abv::decode_cohort(&paths, &config.range, rules.as_ref()))?;
    drop(rules);

    renderer.render(&cohort)?;
    Ok(())
}

fn run_stat(args: StatArgs) -> tilelook::Result<()> {
    let paths = scan_abv_files(&args.abv_dir)?;
    let cohort = abv::decode_cohort(&paths, &args.window.range(), None)?;
    print!("{}", CohortStats::collect(&cohort));
    Ok(())
}

fn run_reverse(args: ReverseArgs) -> tilelook::Result<()> {
    let w = args.window;
    let (Some(end_band), Some(end_pos)) = (w.end_band, w.end_pos) else {
        return Err(TileError::InvalidConfig(
            "reverse needs --end-band and --end-pos".into(),
        ));
    };
    if end_band < w.start_band || end_pos < w.start_pos {
        return Err(TileError::InvalidConfig("window ends before it starts".into()));
    }
    if args.slot_pixel == 0 || (args.grid_lines && args.slot_pixel < 2) {
        return Err(TileError::InvalidConfig("invalid --slot-pixel for this layout".into()));
    }
    let range = ResolvedRange {
        start_band: w.start_band,
        end_band,
        start_pos: w.start_pos,
        end_pos,
    };

    let palette = Palette::load(args.color_spec.as_deref())?;
    let human =
        reverse::sample_from_image(&args.img, args.slot_pixel, args.grid_lines, &range, &palette)?;

    info!("Saving to {:?}...", args.out);
    abv::write_file(&human, &human.name, &args.out)
}

fn main() {
    let cli = Cli::parse();

    // Initialize logger based on verbosity
    env_logger::Builder::new()
        .filter_level(match cli.verbose {
            0 => log::LevelFilter::Error,
            1 => log::LevelFilter::Info,
            _ => log::LevelFilter::Debug,
        })
        .init();

    let result = match cli.command {
        Command::Render(args) => run_render(args),
        Command::Stat(args) => run_stat(args),
        Command::Reverse(args) => run_reverse(args),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    info!("Done.");
}
