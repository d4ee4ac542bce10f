//! Headless driver: load an image, subscribe a typical set of views and run
//! every computation to completion.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use specula::constants::EXIT_LOAD_FAILURE;
use specula::{AppConfig, Controller, FalseColoring, Notification, Representation};

const USAGE: &str = "usage: specula <image> [--bands N]";

fn init_logging(config: &AppConfig) {
    // RUST_LOG takes precedence over the configured level
    env_logger::Builder::new()
        .filter_level(config.preferences.log_level.to_level_filter())
        .parse_default_env()
        .init();
}

fn parse_args() -> Option<(PathBuf, Option<usize>)> {
    let mut args = std::env::args().skip(1);
    let path = PathBuf::from(args.next()?);
    let mut bands = None;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--bands" => bands = Some(args.next()?.parse().ok()?),
            _ => return None,
        }
    }
    Some((path, bands))
}

fn main() -> ExitCode {
    let config = AppConfig::load_or_default();
    init_logging(&config);

    let Some((path, bands)) = parse_args() else {
        eprintln!("{}", USAGE);
        return ExitCode::from(2);
    };

    let start = web_time::Instant::now();
    let mut controller = match Controller::new(&config, &path) {
        Ok(controller) => controller,
        Err(e) => {
            log::error!("{}: {}", path.display(), e);
            return ExitCode::from(EXIT_LOAD_FAILURE as u8);
        }
    };

    if let Some(bands) = bands {
        controller.rescale_spectrum(bands);
    }

    let view = controller.register_subscriber();
    controller.subscribe_representation(view, Representation::Grad);
    controller.subscribe_image_band(view, Representation::Img, 0);
    controller.subscribe_false_coloring(view, FalseColoring::Cmf);
    controller.subscribe_false_coloring(view, FalseColoring::Pca);
    controller.debug_subscriptions();

    let mut events = controller.run_until_idle(Duration::from_millis(100));
    if let Some(tools) = controller.tools().cloned() {
        tools.clustering.run();
        events.extend(controller.run_until_idle(Duration::from_millis(100)));
    }

    let mut images = 0;
    let mut colorings = 0;
    for event in &events {
        match event {
            Notification::ImageUpdated(repr) => {
                images += 1;
                log::debug!("{} ready", repr);
            }
            Notification::ColoringReady { variant, image } => {
                colorings += 1;
                log::info!("{} rendered ({}x{})", variant, image.width(), image.height());
            }
            Notification::BandReady { id, image } => {
                log::info!("{} band {} ({}x{})", id.repr, id.band, image.width(), image.height());
            }
            Notification::ClusteringDone { clusters } => {
                log::info!("k-means found {} cluster(s)", clusters);
            }
            _ => {}
        }
    }

    log::info!(
        "ROI {} of {}: {} image update(s), {} false coloring(s) in {:.2?}",
        controller.roi(),
        controller.extent(),
        images,
        colorings,
        start.elapsed()
    );
    ExitCode::SUCCESS
}
