//! Runs the motion sensor and publishes on/off events as `<topic> <json>` lines
//! on stdout. `enable`/`disable` (or `turn_on`/`turn_off`) on stdin switch
//! emission on and off.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Arg, Command, crate_version};
use log::{info, warn};
use tokio::io::BufReader;
use tokio::sync::mpsc;

use motion_sensor::core_modules::pixel::Pixel;
use motion_sensor::core_modules::utils::image_helper::save_mask;
use motion_sensor::notifier::{JsonLinePublisher, read_commands};
use motion_sensor::sources::{ImageSequence, SyntheticScene};
use motion_sensor::{
    Camera, ControlHandle, MotionPipeline, Notifier, NotifierConfig, PipelineConfig, SensorError,
    Tracker, TrackerConfig, TrackingEvent,
};

struct Options {
    notifier: NotifierConfig,
    tracker: TrackerConfig,
    pipeline: PipelineConfig,
    input: Option<PathBuf>,
    looping: bool,
    start_disabled: bool,
    dump_mask: Option<PathBuf>,
}

fn parse_options() -> Result<Options> {
    let matches = Command::new("sensor_runner")
        .version(crate_version!())
        .about("Background-subtraction motion sensor")
        .arg(Arg::new("uuid").takes_value(true).required(true))
        .arg(Arg::new("topic").takes_value(true).required(true))
        .arg(
            Arg::new("input")
                .long("input")
                .short('i')
                .takes_value(true)
                .help("Directory of still images to replay; a synthetic scene is used otherwise"),
        )
        .arg(Arg::new("loop").long("loop").short('l'))
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .takes_value(true)
                .help("JSON file with tracker parameters"),
        )
        .arg(
            Arg::new("max-frames")
                .long("max-frames")
                .short('n')
                .takes_value(true),
        )
        .arg(Arg::new("disabled").long("disabled"))
        .arg(
            Arg::new("dump-mask")
                .long("dump-mask")
                .takes_value(true)
                .help("Write the final foreground mask to this PNG"),
        )
        .get_matches();

    let tracker = match matches.value_of("config") {
        Some(path) => TrackerConfig::from_json_file(path).map_err(SensorError::from)?,
        None => TrackerConfig::default(),
    };
    let max_frames = matches
        .value_of("max-frames")
        .map(str::parse::<u64>)
        .transpose()
        .context("--max-frames expects a frame count")?;

    Ok(Options {
        notifier: NotifierConfig::new(
            matches.value_of("uuid").unwrap_or_default(),
            matches.value_of("topic").unwrap_or_default(),
        ),
        tracker,
        pipeline: PipelineConfig {
            max_frames,
            ..Default::default()
        },
        input: matches.value_of("input").map(PathBuf::from),
        looping: matches.is_present("loop"),
        start_disabled: matches.is_present("disabled"),
        dump_mask: matches.value_of("dump-mask").map(PathBuf::from),
    })
}

struct Sensor {
    camera: Box<dyn Camera + Send>,
    tracker: Tracker<mpsc::UnboundedSender<TrackingEvent>>,
    events: mpsc::UnboundedReceiver<TrackingEvent>,
}

fn open_sensor(options: &Options) -> Result<Sensor, SensorError> {
    let camera: Box<dyn Camera + Send> = match &options.input {
        Some(dir) => Box::new(ImageSequence::open(dir, options.looping)?),
        None => {
            info!("no input given, running the synthetic scene");
            Box::new(
                SyntheticScene::new(64, 48, Pixel::gray(60)).with_moving_square(12, Pixel::gray(220), 2),
            )
        }
    };
    let (events_tx, events) = mpsc::unbounded_channel();
    let tracker = Tracker::new(options.tracker.clone(), events_tx)?;
    Ok(Sensor {
        camera,
        tracker,
        events,
    })
}

async fn run(options: Options) -> Result<()> {
    let Sensor {
        camera,
        tracker,
        events: events_rx,
    } = open_sensor(&options).context("setting up the sensor")?;

    let (control, enabled) = ControlHandle::new(!options.start_disabled);
    let pipeline = MotionPipeline::new(options.pipeline.clone());

    let notifier = Notifier::new(
        &options.notifier,
        JsonLinePublisher::new(std::io::stdout()),
        enabled,
        events_rx,
    );
    let shutdown = pipeline.shutdown_handle();
    let notifier_task = tokio::spawn(async move {
        let report = notifier.run().await;
        if let Err(e) = &report {
            warn!("publishing failed, stopping: {e}");
            shutdown.request();
        }
        report
    });

    let commands_task = tokio::spawn(read_commands(BufReader::new(tokio::io::stdin()), control));

    let shutdown = pipeline.shutdown_handle();
    let signal_task = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupted");
            shutdown.request();
        }
    });

    let (stats, tracker) = tokio::task::spawn_blocking(move || {
        let mut tracker = tracker;
        let stats = pipeline.run(camera, &mut tracker);
        (stats, tracker)
    })
    .await?;

    if let Some(path) = &options.dump_mask {
        save_mask(path, tracker.foreground_mask())
            .with_context(|| format!("writing mask to {}", path.display()))?;
        info!("foreground mask written to {}", path.display());
    }
    // Dropping the tracker closes the event channel and lets the notifier finish.
    drop(tracker);

    signal_task.abort();
    commands_task.abort();
    let report = notifier_task.await?.map_err(SensorError::from)?;
    info!(
        "{} events published, {} suppressed while disabled",
        report.sent, report.suppressed
    );

    let stats = stats.map_err(SensorError::from)?;
    info!(
        "{} frames captured, {} analyzed",
        stats.frames_captured, stats.frames_analyzed
    );
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let options = parse_options()?;
    let runtime = tokio::runtime::Runtime::new()?;
    let result = runtime.block_on(run(options));
    // The stdin reader sits on a blocking thread that never returns by itself.
    runtime.shutdown_timeout(Duration::from_millis(100));
    result
}
