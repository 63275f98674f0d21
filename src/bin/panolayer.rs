use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Context as _;
use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(name = "panolayer", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Render a single frame as a PNG.
    Render(RenderArgs),
    /// Render the foreground alpha matte as a grayscale PNG.
    Matte(MatteArgs),
}

#[derive(Parser, Debug)]
struct RenderArgs {
    /// Input scene JSON. Image keys are paths relative to its directory.
    #[arg(long)]
    scene: PathBuf,

    /// Time in seconds.
    #[arg(long, default_value_t = 0.0)]
    time: f64,

    /// Output PNG path.
    #[arg(long)]
    out: PathBuf,

    /// Backend to use.
    #[arg(long, value_enum, default_value_t = BackendChoice::Auto)]
    backend: BackendChoice,

    /// Draw selection, path and mask guides for the selected layer on top of the frame.
    #[arg(long)]
    overlays: bool,

    /// Layer to select for overlays (defaults to the first foreground layer).
    #[arg(long)]
    select: Option<String>,
}

#[derive(Parser, Debug)]
struct MatteArgs {
    /// Input scene JSON. Image keys are paths relative to its directory.
    #[arg(long)]
    scene: PathBuf,

    /// Time in seconds.
    #[arg(long, default_value_t = 0.0)]
    time: f64,

    /// Output PNG path.
    #[arg(long)]
    out: PathBuf,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum BackendChoice {
    Cpu,
    Gpu,
    Auto,
}

impl From<BackendChoice> for panolayer::BackendPreference {
    fn from(c: BackendChoice) -> Self {
        match c {
            BackendChoice::Cpu => Self::Cpu,
            BackendChoice::Gpu => Self::Gpu,
            BackendChoice::Auto => Self::Auto,
        }
    }
}

const DECODE_TIMEOUT: Duration = Duration::from_secs(60);

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let cli = Cli::parse();
    match cli.cmd {
        Command::Render(args) => cmd_render(args),
        Command::Matte(args) => cmd_matte(args),
    }
}

fn load_scene(path: &Path) -> anyhow::Result<panolayer::Scene> {
    let doc = panolayer::SceneDocument::from_json_path(path)
        .with_context(|| format!("load scene '{}'", path.display()))?;
    Ok(panolayer::Scene::new(doc))
}

/// Queue every image and mask the scene references, then wait for the decodes.
fn load_images(
    scene: &panolayer::Scene,
    scene_path: &Path,
    orchestrator: &mut panolayer::FrameOrchestrator,
) -> anyhow::Result<()> {
    let root = scene_path.parent().unwrap_or_else(|| Path::new("."));
    let images = orchestrator.images_mut();
    for layer in scene.layers() {
        for key in layer.image().into_iter().chain(layer.mask()) {
            if images.state(key).is_none() {
                images.request_path(key, root.join(key));
            }
        }
    }
    images.wait_idle(DECODE_TIMEOUT)?;
    Ok(())
}

fn ensure_parent(out: &Path) -> anyhow::Result<()> {
    if let Some(parent) = out.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create output dir '{}'", parent.display()))?;
    }
    Ok(())
}

fn cmd_render(args: RenderArgs) -> anyhow::Result<()> {
    let mut scene = load_scene(&args.scene)?;
    let config = panolayer::RendererConfig {
        backend: args.backend.into(),
        ..panolayer::RendererConfig::from_env()
    };
    let mut orchestrator = panolayer::FrameOrchestrator::new(config);
    let backend = orchestrator.initialize()?;
    if matches!(args.backend, BackendChoice::Gpu) && backend != panolayer::BackendKind::Gpu {
        anyhow::bail!("gpu backend requested but unavailable");
    }
    load_images(&scene, &args.scene, &mut orchestrator)?;

    if args.overlays {
        let selected = match &args.select {
            Some(id) => Some(id.clone()),
            None => scene
                .layers()
                .iter()
                .find(|l| !l.is_background())
                .map(|l| l.id().to_owned()),
        };
        if let Some(id) = &selected
            && !scene.select_layer(Some(id.as_str()))
        {
            anyhow::bail!("no layer '{id}' to select");
        }
        scene.set_modes(panolayer::EditorModes {
            path: true,
            mask: true,
            extract: false,
        });
    }

    let time = scene.project().clamp_time(args.time);
    let report = orchestrator.render_frame(&scene, time);
    let frame = if args.overlays {
        orchestrator.composited_frame()?
    } else {
        orchestrator.read_frame()?
    };

    ensure_parent(&args.out)?;
    frame
        .to_rgba_image()?
        .save_with_format(&args.out, image::ImageFormat::Png)
        .with_context(|| format!("write png '{}'", args.out.display()))?;

    eprintln!(
        "wrote {} ({} backend, {} drawn, {} skipped, {} culled, {} failed)",
        args.out.display(),
        report.backend.map_or_else(|| "no".to_owned(), |b| b.to_string()),
        report.drawn,
        report.skipped,
        report.culled,
        report.failed
    );
    Ok(())
}

fn cmd_matte(args: MatteArgs) -> anyhow::Result<()> {
    let scene = load_scene(&args.scene)?;
    let config = panolayer::RendererConfig {
        backend: panolayer::BackendPreference::Cpu,
        ..panolayer::RendererConfig::from_env()
    };
    let mut orchestrator = panolayer::FrameOrchestrator::new(config);
    orchestrator.initialize()?;
    load_images(&scene, &args.scene, &mut orchestrator)?;

    let time = scene.project().clamp_time(args.time);
    let matte = orchestrator.render_matte(&scene, time)?;

    ensure_parent(&args.out)?;
    matte
        .save_with_format(&args.out, image::ImageFormat::Png)
        .with_context(|| format!("write png '{}'", args.out.display()))?;

    eprintln!("wrote {}", args.out.display());
    Ok(())
}
