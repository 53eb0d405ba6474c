use std::{
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
};

use anyhow::Context as _;
use clap::{Parser, Subcommand, ValueEnum};
use sortlast::Communicator as _;

#[derive(Parser, Debug)]
#[command(name = "sortlast", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Composite a synthetic scene across threaded ranks and write each
    /// displayed tile as a PNG.
    Simulate(SimulateArgs),
    /// Validate a tile layout and print its global viewport.
    Layout(LayoutArgs),
}

#[derive(Parser, Debug)]
struct SimulateArgs {
    /// Number of ranks.
    #[arg(long, default_value_t = 4)]
    ranks: usize,

    /// Multi-tile strategy.
    #[arg(long, value_enum, default_value_t = StrategyChoice::Reduce)]
    strategy: StrategyChoice,

    /// Single-image strategy.
    #[arg(long = "single-image", value_enum, default_value_t = SingleImageChoice::Automatic)]
    single_image: SingleImageChoice,

    /// Composite mode.
    #[arg(long, value_enum, default_value_t = ModeChoice::Z)]
    mode: ModeChoice,

    /// Tile layout JSON. Defaults to one tile displayed by rank 0.
    #[arg(long)]
    tiles: Option<PathBuf>,

    /// Frame configuration JSON; missing fields keep their defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Width of the default single tile.
    #[arg(long, default_value_t = 256)]
    width: i32,

    /// Height of the default single tile.
    #[arg(long, default_value_t = 256)]
    height: i32,

    /// Output PNG path. With several tiles the tile index is appended to
    /// the file stem.
    #[arg(long)]
    out: PathBuf,
}

#[derive(Parser, Debug)]
struct LayoutArgs {
    /// Tile layout JSON.
    #[arg(long)]
    tiles: PathBuf,

    /// Number of ranks. Defaults to one more than the largest display rank.
    #[arg(long)]
    ranks: Option<usize>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum StrategyChoice {
    Direct,
    Sequential,
    Split,
    Reduce,
    Vtree,
}

impl From<StrategyChoice> for sortlast::Strategy {
    fn from(choice: StrategyChoice) -> Self {
        match choice {
            StrategyChoice::Direct => sortlast::Strategy::Direct,
            StrategyChoice::Sequential => sortlast::Strategy::Sequential,
            StrategyChoice::Split => sortlast::Strategy::Split,
            StrategyChoice::Reduce => sortlast::Strategy::Reduce,
            StrategyChoice::Vtree => sortlast::Strategy::Vtree,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum SingleImageChoice {
    Automatic,
    Direct,
    Bswap,
    BswapFolding,
    Tree,
    Radixk,
    Radixkr,
}

impl From<SingleImageChoice> for sortlast::SingleImageStrategy {
    fn from(choice: SingleImageChoice) -> Self {
        match choice {
            SingleImageChoice::Automatic => sortlast::SingleImageStrategy::Automatic,
            SingleImageChoice::Direct => sortlast::SingleImageStrategy::Direct,
            SingleImageChoice::Bswap => sortlast::SingleImageStrategy::Bswap,
            SingleImageChoice::BswapFolding => sortlast::SingleImageStrategy::BswapFolding,
            SingleImageChoice::Tree => sortlast::SingleImageStrategy::Tree,
            SingleImageChoice::Radixk => sortlast::SingleImageStrategy::Radixk,
            SingleImageChoice::Radixkr => sortlast::SingleImageStrategy::Radixkr,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ModeChoice {
    /// Nearest fragment wins.
    Z,
    /// Alpha blending in rank order.
    Blend,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.cmd {
        Command::Simulate(args) => cmd_simulate(args),
        Command::Layout(args) => cmd_layout(args),
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path, what: &str) -> anyhow::Result<T> {
    let f = File::open(path).with_context(|| format!("open {what} '{}'", path.display()))?;
    let r = BufReader::new(f);
    serde_json::from_reader(r).with_context(|| format!("parse {what} JSON '{}'", path.display()))
}

fn default_ranks(desc: &sortlast::TileLayoutDesc) -> usize {
    desc.tiles.iter().map(|t| t.display_rank + 1).max().unwrap_or(1)
}

/// Rank `rank` of `ranks` draws one rectangle: a band that overlaps its
/// neighbours, nearer for lower ranks.
fn scene(rank: usize, ranks: usize, mode: ModeChoice) -> sortlast::RectRenderer {
    const PALETTE: [[f32; 3]; 6] = [
        [0.90, 0.30, 0.25],
        [0.25, 0.65, 0.35],
        [0.25, 0.45, 0.90],
        [0.95, 0.80, 0.20],
        [0.60, 0.35, 0.80],
        [0.20, 0.80, 0.85],
    ];
    let step = 2.0 / (ranks as f64 + 1.0);
    let lo = -1.0 + rank as f64 * step;
    let [r, g, b] = PALETTE[rank % PALETTE.len()];
    let alpha = match mode {
        ModeChoice::Z => 1.0,
        ModeChoice::Blend => 0.6,
    };
    sortlast::RectRenderer::new(vec![sortlast::Rect {
        min: [lo, lo * 0.5 - 0.4],
        max: [lo + 2.0 * step, lo * 0.5 + 0.6],
        depth: -0.5 + rank as f64 / ranks as f64,
        color: sortlast::Rgba::new(r * alpha, g * alpha, b * alpha, alpha),
    }])
}

fn tile_path(out: &Path, tile: usize, num_tiles: usize) -> PathBuf {
    if num_tiles <= 1 {
        return out.to_path_buf();
    }
    let stem = out.file_stem().and_then(|s| s.to_str()).unwrap_or("tile");
    let ext = out.extension().and_then(|s| s.to_str()).unwrap_or("png");
    out.with_file_name(format!("{stem}-{tile}.{ext}"))
}

fn cmd_simulate(args: SimulateArgs) -> anyhow::Result<()> {
    anyhow::ensure!(args.ranks >= 1, "need at least one rank");
    let desc = match &args.tiles {
        Some(path) => read_json::<sortlast::TileLayoutDesc>(path, "tile layout")?,
        None => sortlast::TileLayout::single(args.ranks, args.width, args.height)?.to_desc(),
    };
    let layout = sortlast::TileLayout::from_desc(&desc, args.ranks)?;

    let mut config = match &args.config {
        Some(path) => read_json::<sortlast::FrameConfig>(path, "frame config")?,
        None => sortlast::FrameConfig::default(),
    };
    config.strategy = args.strategy.into();
    config.single_image_strategy = args.single_image.into();
    if let ModeChoice::Blend = args.mode {
        config.composite_mode = sortlast::CompositeMode::Blend;
        config.ordered_composite = config.strategy.supports_ordering();
    }
    config
        .validate(args.ranks)
        .context("invalid frame configuration")?;

    let background = sortlast::Rgba::new(0.07, 0.08, 0.11, 1.0);
    let identity = sortlast::matrix_identity();
    let results = sortlast::LocalFabric::run(args.ranks, |comm| {
        let rank = comm.rank();
        let mut ctx = sortlast::Context::new(comm, layout.clone())?;
        ctx.set_config(config.clone())?;
        let mut renderer = scene(rank, args.ranks, args.mode);
        ctx.set_bounding_vertices(renderer.bounding_vertices());
        let out = ctx.draw_frame(&mut renderer, &identity, &identity, background)?;
        let displayed = ctx.layout().tile_displayed(rank);
        Ok((rank, displayed, out))
    })
    .context("composite frame")?;

    if let Some(parent) = args.out.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create output dir '{}'", parent.display()))?;
    }
    for (rank, displayed, out) in &results {
        eprintln!(
            "rank {rank}: {} bytes in {} messages, {} renders",
            out.stats.bytes_sent, out.stats.messages_sent, out.stats.renders
        );
        let (Some(tile), Some(image)) = (displayed, &out.image) else {
            continue;
        };
        let path = tile_path(&args.out, *tile, layout.num_tiles());
        let data = image
            .to_rgba8()
            .with_context(|| format!("tile {tile} has no color"))?;
        image::save_buffer_with_format(
            &path,
            &data,
            u32::try_from(image.width())?,
            u32::try_from(image.height())?,
            image::ColorType::Rgba8,
            image::ImageFormat::Png,
        )
        .with_context(|| format!("write png '{}'", path.display()))?;
        eprintln!("wrote {}", path.display());
    }
    Ok(())
}

fn cmd_layout(args: LayoutArgs) -> anyhow::Result<()> {
    let desc: sortlast::TileLayoutDesc = read_json(&args.tiles, "tile layout")?;
    let ranks = args.ranks.unwrap_or_else(|| default_ranks(&desc));
    let layout = sortlast::TileLayout::from_desc(&desc, ranks).context("invalid tile layout")?;
    let summary = serde_json::json!({
        "global_viewport": layout.global_viewport(),
        "num_tiles": layout.num_tiles(),
        "max_tile_size": [layout.max_width(), layout.max_height()],
        "physical_render_size": layout.physical_render_size(),
        "display_nodes": layout.display_nodes(),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
