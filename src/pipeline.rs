//! Bounded fan-out of PNG writes over a cohort.
//!
//! The producer runs on the calling thread and hands each image to a rayon
//! pool. An [`AdmissionGate`] caps how many images are in flight, so the
//! producer stalls once the cap is reached. In cohort mode each band is a
//! join barrier: every position of band N is written before band N+1
//! starts, which keeps at most one band of canvases alive.

use crossbeam_channel::{bounded, Receiver, Sender};
use image::{ImageFormat, Rgb, RgbImage};
use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use crate::canvas;
use crate::error::{Result, TileError};
use crate::model::{cohort_extent, Block, CoordinateRange, Individual, ResolvedRange};
use crate::palette::Palette;

pub const DEFAULT_MAX_WORKERS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum RenderMode {
    /// One image per (band, position), one cell per individual.
    Cohort,
    /// One image per individual, one cell per (band, position).
    Sample,
}

#[derive(Debug, Clone)]
pub struct RenderConfig {
    pub mode: RenderMode,
    pub range: CoordinateRange,
    pub cell_size: u32,
    pub grid_lines: bool,
    /// Cells per row in cohort images.
    pub cohort_width: u32,
    pub max_workers: usize,
    pub output_dir: PathBuf,
    pub palette_path: Option<PathBuf>,
    /// Color cells by the catalog factor instead of the variant.
    pub color_by_factor: bool,
}

impl Default for RenderConfig {
    fn default() -> Self {
        RenderConfig {
            mode: RenderMode::Cohort,
            range: CoordinateRange::unbounded(),
            cell_size: 8,
            grid_lines: false,
            cohort_width: 10,
            max_workers: DEFAULT_MAX_WORKERS,
            output_dir: PathBuf::from("pngs"),
            palette_path: None,
            color_by_factor: false,
        }
    }
}

impl RenderConfig {
    pub fn validate(&self) -> Result<()> {
        if self.cell_size == 0 {
            return Err(TileError::InvalidConfig("cell size must be at least 1".into()));
        }
        if self.grid_lines && self.cell_size < 2 {
            return Err(TileError::InvalidConfig(
                "grid lines need a cell size of at least 2".into(),
            ));
        }
        if self.cohort_width == 0 {
            return Err(TileError::InvalidConfig("cohort width must be at least 1".into()));
        }
        if self.max_workers == 0 {
            return Err(TileError::InvalidConfig("worker limit must be at least 1".into()));
        }
        if let (Some(end), start) = (self.range.end_band, self.range.start_band) {
            if end < start {
                return Err(TileError::InvalidConfig(format!(
                    "end band {end} is before start band {start}"
                )));
            }
        }
        if let (Some(end), start) = (self.range.end_pos, self.range.start_pos) {
            if end < start {
                return Err(TileError::InvalidConfig(format!(
                    "end position {end} is before start position {start}"
                )));
            }
        }
        Ok(())
    }
}

/// Destination of rendered canvases.
pub trait TileSink: Sync {
    fn write(&self, path: &Path, canvas: &RgbImage) -> Result<()>;
}

/// Encodes canvases as PNG files.
pub struct PngSink;

impl TileSink for PngSink {
    fn write(&self, path: &Path, canvas: &RgbImage) -> Result<()> {
        canvas
            .save_with_format(path, ImageFormat::Png)
            .map_err(|source| TileError::RenderIo {
                path: path.to_path_buf(),
                source,
            })
    }
}

/// Counting semaphore over a bounded channel: a slot is taken by sending a
/// token and given back by receiving one.
pub struct AdmissionGate {
    slots: Sender<()>,
    tokens: Receiver<()>,
}

/// Held for the lifetime of one unit of work.
pub struct Permit<'a> {
    gate: &'a AdmissionGate,
}

impl AdmissionGate {
    pub fn new(limit: usize) -> Self {
        let (slots, tokens) = bounded(limit.max(1));
        AdmissionGate { slots, tokens }
    }

    /// Blocks while every slot is taken.
    pub fn acquire(&self) -> Permit<'_> {
        // Both ends live in `self`, so the channel cannot disconnect.
        let _ = self.slots.send(());
        Permit { gate: self }
    }

    pub fn in_flight(&self) -> usize {
        self.slots.len()
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        let _ = self.gate.tokens.recv();
    }
}

fn create_output_dir(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path).map_err(|source| TileError::OutputDir {
        path: path.to_path_buf(),
        source,
    })
}

/// First error raised by any task; later ones are dropped.
#[derive(Default)]
struct Failure {
    failed: AtomicBool,
    error: Mutex<Option<TileError>>,
}

impl Failure {
    fn record(&self, err: TileError) {
        let mut slot = self.error.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            *slot = Some(err);
        }
        self.failed.store(true, Ordering::Release);
    }

    fn is_set(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }

    fn take(&self) -> Option<TileError> {
        self.error.lock().unwrap_or_else(PoisonError::into_inner).take()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderSummary {
    pub images: usize,
    pub window: Option<ResolvedRange>,
}

pub struct Renderer<'a, S: TileSink> {
    config: &'a RenderConfig,
    palette: &'a Palette,
    sink: S,
    pool: rayon::ThreadPool,
}

impl<'a, S: TileSink> Renderer<'a, S> {
    pub fn new(config: &'a RenderConfig, palette: &'a Palette, sink: S) -> Result<Self> {
        Self::with_pool_size(config, palette, sink, config.max_workers)
    }

    /// The admission gate stays at `config.max_workers` whatever the pool size.
    fn with_pool_size(
        config: &'a RenderConfig,
        palette: &'a Palette,
        sink: S,
        threads: usize,
    ) -> Result<Self> {
        config.validate()?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("tilelook-render-{i}"))
            .build()
            .map_err(|e| {
                TileError::InvalidConfig(format!("failed to build render thread pool: {e}"))
            })?;
        Ok(Renderer {
            config,
            palette,
            sink,
            pool,
        })
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Run `op` on the render pool, e.g. to decode the cohort with `par_iter`.
    pub fn install<R, OP>(&self, op: OP) -> R
    where
        OP: FnOnce() -> R + Send,
        R: Send,
    {
        self.pool.install(op)
    }

    pub fn render(&self, individuals: &[Individual]) -> Result<RenderSummary> {
        let (max_band, max_pos) = cohort_extent(individuals);
        let Some(window) = self.config.range.resolve(max_band, max_pos) else {
            warn!("Nothing to render: the selected window holds no tiles");
            return Ok(RenderSummary::default());
        };
        create_output_dir(&self.config.output_dir)?;
        info!(
            "Rendering bands {}-{}, positions {}-{} for {} individuals",
            window.start_band,
            window.end_band,
            window.start_pos,
            window.end_pos,
            individuals.len()
        );

        let images = match self.config.mode {
            RenderMode::Cohort => self.render_cohort(individuals, &window)?,
            RenderMode::Sample => self.render_samples(individuals, &window)?,
        };
        info!("Wrote {} images to {:?}", images, self.config.output_dir);
        Ok(RenderSummary {
            images,
            window: Some(window),
        })
    }

    fn cell_color(&self, block: &Block) -> Rgb<u8> {
        let index = match block.factor {
            Some(factor) if self.config.color_by_factor => factor,
            _ => block.variant as u32,
        };
        self.palette.color_for(index)
    }

    fn render_cohort(&self, individuals: &[Individual], window: &ResolvedRange) -> Result<usize> {
        let gate = AdmissionGate::new(self.config.max_workers);
        let failure = Failure::default();
        let written = AtomicUsize::new(0);
        let width = self.config.cohort_width;

        for band in window.start_band..=window.end_band {
            let band_dir = self.config.output_dir.join(band.to_string());
            create_output_dir(&band_dir)?;

            let sink = &self.sink;
            let (failure, written) = (&failure, &written);
            self.pool.in_place_scope(|s| {
                for pos in window.start_pos..=window.end_pos {
                    if failure.is_set() {
                        break;
                    }
                    let permit = gate.acquire();
                    let canvas = canvas::render_tile_grid(
                        self.config.cell_size,
                        width,
                        individuals.len(),
                        self.config.grid_lines,
                        |row, col| {
                            let k = (row * width + col) as usize;
                            individuals.get(k)?.get(band, pos).map(|b| self.cell_color(b))
                        },
                    );
                    let path = band_dir.join(format!("{pos}.png"));
                    if pos % 1000 == 0 {
                        debug!("band {band}, position {pos}");
                    }
                    s.spawn(move |_| {
                        let _permit = permit;
                        match sink.write(&path, &canvas) {
                            Ok(()) => {
                                written.fetch_add(1, Ordering::Relaxed);
                            }
                            Err(e) => failure.record(e),
                        }
                    });
                }
            });

            if let Some(err) = failure.take() {
                return Err(err);
            }
            // Every canvas of this band has been written and dropped here.
            debug!("band {band} done, {} images so far", written.load(Ordering::Relaxed));
        }
        Ok(written.into_inner())
    }

    fn render_samples(&self, individuals: &[Individual], window: &ResolvedRange) -> Result<usize> {
        let gate = AdmissionGate::new(self.config.max_workers);
        let failure = Failure::default();
        let written = AtomicUsize::new(0);

        let sink = &self.sink;
        let (failure_ref, written_ref) = (&failure, &written);
        self.pool.in_place_scope(|s| {
            for human in individuals {
                if failure_ref.is_set() {
                    break;
                }
                let permit = gate.acquire();
                let path = self.config.output_dir.join(format!("{}.png", human.name));
                s.spawn(move |_| {
                    let _permit = permit;
                    let canvas = canvas::render_sample_grid(
                        self.config.cell_size,
                        window,
                        self.config.grid_lines,
                        |row, col| {
                            human
                                .get(window.start_band + row, window.start_pos + col)
                                .map(|b| self.cell_color(b))
                        },
                    );
                    match sink.write(&path, &canvas) {
                        Ok(()) => {
                            debug!("wrote {:?}", path);
                            written_ref.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(e) => failure_ref.record(e),
                    }
                });
            }
        });

        match failure.take() {
            Some(err) => Err(err),
            None => Ok(written.into_inner()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn block(band: u32, pos: u32, variant: u8) -> Block {
        Block { band, pos, variant, factor: None }
    }

    /// Records paths and the peak number of concurrent writes.
    #[derive(Default)]
    struct CountingSink {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        paths: Mutex<Vec<PathBuf>>,
        fail_on: Option<PathBuf>,
    }

    impl TileSink for CountingSink {
        fn write(&self, path: &Path, _canvas: &RgbImage) -> Result<()> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(2));
            self.paths.lock().unwrap().push(path.to_path_buf());
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            if self.fail_on.as_deref() == Some(path) {
                return Err(TileError::InvalidConfig("disk full".into()));
            }
            Ok(())
        }
    }

    /// Holds every write until the test drops the release sender.
    struct BlockingSink {
        entered: AtomicUsize,
        release: Receiver<()>,
    }

    impl TileSink for BlockingSink {
        fn write(&self, _path: &Path, _canvas: &RgbImage) -> Result<()> {
            self.entered.fetch_add(1, Ordering::SeqCst);
            let _ = self.release.recv();
            Ok(())
        }
    }

    fn wait_for(count: &AtomicUsize, target: usize) {
        let start = Instant::now();
        while count.load(Ordering::SeqCst) < target {
            assert!(start.elapsed() < Duration::from_secs(10), "stuck below {target}");
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    fn cohort(n: usize) -> Vec<Individual> {
        (0..n)
            .map(|i| {
                let mut h = Individual::new(format!("hu{i:02}"));
                for band in 0..3 {
                    for pos in 0..8 {
                        h.insert(block(band, pos, (i % 4) as u8));
                    }
                }
                h
            })
            .collect()
    }

    fn config(dir: &Path, workers: usize) -> RenderConfig {
        RenderConfig {
            output_dir: dir.to_path_buf(),
            max_workers: workers,
            cell_size: 2,
            cohort_width: 3,
            ..RenderConfig::default()
        }
    }

    #[test]
    fn never_exceeds_worker_limit() {
        let dir = tempfile::tempdir().unwrap();
        let people = cohort(5);
        for workers in [1, 2, 4] {
            let cfg = config(dir.path(), workers);
            let palette = Palette::default();
            // More threads than slots, so only the gate bounds the writes.
            let renderer =
                Renderer::with_pool_size(&cfg, &palette, CountingSink::default(), 8).unwrap();
            let summary = renderer.render(&people).unwrap();
            assert_eq!(summary.images, 3 * 8);
            let peak = renderer.sink().peak.load(Ordering::SeqCst);
            assert!(peak >= 1 && peak <= workers, "peak {peak} with limit {workers}");
        }
    }

    #[test]
    fn producer_stalls_while_every_slot_is_taken() {
        let dir = tempfile::tempdir().unwrap();
        let people = cohort(5);
        let palette = Palette::default();
        for mode in [RenderMode::Cohort, RenderMode::Sample] {
            let cfg = RenderConfig { mode, ..config(dir.path(), 2) };
            let (release, held) = bounded::<()>(0);
            let sink = BlockingSink { entered: AtomicUsize::new(0), release: held };
            let renderer = Renderer::with_pool_size(&cfg, &palette, sink, 8).unwrap();

            std::thread::scope(|s| {
                let job = s.spawn(|| renderer.render(&people));
                wait_for(&renderer.sink().entered, 2);
                std::thread::sleep(Duration::from_millis(50));
                assert_eq!(renderer.sink().entered.load(Ordering::SeqCst), 2, "{mode:?}");

                drop(release);
                let summary = job.join().unwrap().unwrap();
                let expected = if mode == RenderMode::Cohort { 3 * 8 } else { 5 };
                assert_eq!(summary.images, expected);
            });
        }
    }

    #[test]
    fn decoding_can_share_the_render_pool() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path(), 3);
        let palette = Palette::default();
        let renderer = Renderer::new(&cfg, &palette, CountingSink::default()).unwrap();
        let names: Vec<Option<String>> = renderer.install(|| {
            use rayon::prelude::*;
            (0..6)
                .into_par_iter()
                .map(|_| std::thread::current().name().map(str::to_owned))
                .collect()
        });
        assert!(names
            .iter()
            .all(|n| n.as_deref().is_some_and(|n| n.starts_with("tilelook-render-"))));
    }

    #[test]
    fn blocked_band_directory_is_named_in_the_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("0"), "").unwrap();
        let cfg = config(dir.path(), 2);
        let palette = Palette::default();
        let renderer = Renderer::new(&cfg, &palette, CountingSink::default()).unwrap();
        let err = renderer.render(&cohort(2)).unwrap_err();
        match &err {
            TileError::OutputDir { path, .. } => assert_eq!(path, &dir.path().join("0")),
            other => panic!("expected OutputDir, got {other:?}"),
        }
        assert!(renderer.sink().paths.lock().unwrap().is_empty());
    }

    #[test]
    fn cohort_paths_follow_band_then_position() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path(), 3);
        cfg.range =
            CoordinateRange { start_band: 1, end_band: Some(2), start_pos: 6, end_pos: None };
        let palette = Palette::default();
        let renderer = Renderer::new(&cfg, &palette, CountingSink::default()).unwrap();
        let summary = renderer.render(&cohort(2)).unwrap();
        assert_eq!(summary.images, 4);
        assert_eq!(
            summary.window,
            Some(ResolvedRange { start_band: 1, end_band: 2, start_pos: 6, end_pos: 7 })
        );

        let mut paths = renderer.sink().paths.lock().unwrap().clone();
        paths.sort();
        let expected: Vec<PathBuf> = ["1/6.png", "1/7.png", "2/6.png", "2/7.png"]
            .iter()
            .map(|p| dir.path().join(p))
            .collect();
        assert_eq!(paths, expected);
        assert!(dir.path().join("2").is_dir());
    }

    #[test]
    fn sample_mode_writes_one_image_per_individual() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path(), 2);
        cfg.mode = RenderMode::Sample;
        let palette = Palette::default();
        let renderer = Renderer::new(&cfg, &palette, CountingSink::default()).unwrap();
        assert_eq!(renderer.render(&cohort(3)).unwrap().images, 3);
        assert!(renderer
            .sink()
            .paths
            .lock()
            .unwrap()
            .contains(&dir.path().join("hu01.png")));
    }

    #[test]
    fn failed_write_stops_at_band_barrier() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path(), 2);
        let palette = Palette::default();
        let sink = CountingSink {
            fail_on: Some(dir.path().join("0").join("3.png")),
            ..CountingSink::default()
        };
        let renderer = Renderer::new(&cfg, &palette, sink).unwrap();
        assert!(renderer.render(&cohort(2)).is_err());
        let paths = renderer.sink().paths.lock().unwrap();
        assert!(paths.iter().all(|p| p.starts_with(dir.path().join("0"))));
        assert!(!dir.path().join("1").exists());
    }

    #[test]
    fn empty_cohort_renders_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path(), 2);
        let palette = Palette::default();
        let renderer = Renderer::new(&cfg, &palette, CountingSink::default()).unwrap();
        let summary = renderer.render(&[Individual::new("empty")]).unwrap();
        assert_eq!(summary, RenderSummary::default());
    }

    #[test]
    fn gate_releases_on_drop() {
        let gate = AdmissionGate::new(2);
        let a = gate.acquire();
        let _b = gate.acquire();
        assert_eq!(gate.in_flight(), 2);
        drop(a);
        assert_eq!(gate.in_flight(), 1);
    }

    #[test]
    fn validate_rejects_bad_combinations() {
        let base = RenderConfig::default();
        assert!(base.validate().is_ok());
        for cfg in [
            RenderConfig { grid_lines: true, cell_size: 1, ..base.clone() },
            RenderConfig { cell_size: 0, ..base.clone() },
            RenderConfig { max_workers: 0, ..base.clone() },
            RenderConfig { cohort_width: 0, ..base.clone() },
            RenderConfig {
                range: CoordinateRange {
                    start_band: 5,
                    end_band: Some(4),
                    ..CoordinateRange::unbounded()
                },
                ..base.clone()
            },
        ] {
            assert!(matches!(cfg.validate(), Err(TileError::InvalidConfig(_))));
        }
    }

    #[test]
    fn factor_coloring_uses_catalog_weight() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path(), 1);
        cfg.color_by_factor = true;
        let palette = Palette::default();
        let renderer = Renderer::new(&cfg, &palette, PngSink).unwrap();
        let b = Block { band: 0, pos: 0, variant: 1, factor: Some(5) };
        assert_eq!(renderer.cell_color(&b), palette.color_for(5));
        let unweighted = Block { factor: None, ..b };
        assert_eq!(renderer.cell_color(&unweighted), palette.color_for(1));
    }
}
