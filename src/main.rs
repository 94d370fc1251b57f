use clap::{Args, Parser, Subcommand};
use log::{error, info};
use sensor_gateway::commands::MqttCommandListener;
use sensor_gateway::config::{self, Config};
use sensor_gateway::evidence::{CommandCapture, EvidenceRecorder, FfmpegRemuxer, ScratchArea};
use sensor_gateway::gateway::{Gateway, GatewaySettings};
use sensor_gateway::model::{DoorState, Identity, PersistedState, Reading};
use sensor_gateway::notify::FcmDispatcher;
use sensor_gateway::orchestrator::{Collaborators, Orchestrator, OrchestratorSettings};
use sensor_gateway::sensors::simulation::run_door_simulation;
use sensor_gateway::sensors::{CommandSensor, SensorSource, SimulatedSensor};
use sensor_gateway::store::{FileStore, StateStore};
use sensor_gateway::telemetry::MqttTelemetry;
use sensor_gateway::upload::BucketUploader;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// How often the simulated door flips in `run --simulate`.
const SIMULATED_DOOR_PERIOD: Duration = Duration::from_secs(60);

#[derive(Parser)]
#[command(name = "sensor-gateway", version, about = "Door and climate sensor gateway")]
struct Cli {
    /// Identity to act for.
    #[arg(long, global = true, env = "GATEWAY_USER_ID")]
    user: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Poll the sensors and notify on door changes until Ctrl+C.
    Run {
        /// Use a simulated sensor instead of the hardware.
        #[arg(long)]
        simulate: bool,
    },
    /// Record one door observation and notify if it is a change.
    Notify {
        #[arg(long)]
        state: String,
        #[arg(long, requires = "humidity")]
        temp: Option<f64>,
        #[arg(long, requires = "temp")]
        humidity: Option<f64>,
        /// Notify even when the state is unchanged.
        #[arg(long)]
        force: bool,
    },
    /// Replace the stored reading, keeping the door state.
    UpdateReading(ReadingArgs),
    /// Publish a reading to the telemetry topic.
    PublishReading(ReadingArgs),
    /// Enroll an identity with an initial state and push token.
    Seed {
        #[arg(long)]
        state: DoorState,
        #[arg(long)]
        token: String,
    },
}

#[derive(Args)]
struct ReadingArgs {
    #[arg(long)]
    temp: f64,
    #[arg(long)]
    humidity: f64,
}

fn init_logger() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();
}

fn main() -> ExitCode {
    // Environment writes are only sound before the runtime spawns its workers.
    config::load_dotenv();
    init_logger();

    let cli = Cli::parse();
    let config = Config::from_env();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to start async runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(execute(cli, config)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn execute(cli: Cli, config: Config) -> Result<(), BoxError> {
    let user = cli
        .user
        .or_else(|| config.gateway.user_id.clone())
        .ok_or("no identity given; pass --user or set GATEWAY_USER_ID")?;
    let store = Arc::new(FileStore::new(&config.gateway.data_dir));

    match cli.command {
        Command::Seed { state, token } => {
            let identity: Identity = user.parse()?;
            store.connect().await?;
            store
                .put(&PersistedState::new(identity.clone(), state, None))
                .await?;
            store.put_token(&identity, &token).await?;
            info!("Seeded {} with state {}", identity, state);
        }
        Command::Notify {
            state,
            temp,
            humidity,
            force,
        } => {
            let reading = temp.zip(humidity).map(|(t, h)| Reading::new(t, h));
            let orchestrator = build_orchestrator(&config, store)?;
            orchestrator
                .update_state_and_notify(&user, &state, reading, force)
                .await?;
        }
        Command::UpdateReading(args) => {
            let orchestrator = build_orchestrator(&config, store)?;
            orchestrator
                .update_reading(&user, args.temp, args.humidity)
                .await?;
        }
        Command::PublishReading(args) => {
            let orchestrator = build_orchestrator(&config, store)?;
            let message_id = orchestrator
                .publish_reading(&user, args.temp, args.humidity)
                .await?;
            println!("{}", message_id);
        }
        Command::Run { simulate } => {
            let orchestrator = build_orchestrator(&config, store)?;
            run_gateway(&config, user, orchestrator, simulate).await;
        }
    }
    Ok(())
}

fn build_orchestrator(
    config: &Config,
    store: Arc<FileStore>,
) -> Result<Arc<Orchestrator>, BoxError> {
    let dispatcher = FcmDispatcher::new(&config.push)?;

    let recorder = EvidenceRecorder::new(
        ScratchArea::new(&config.capture.scratch_dir),
        Arc::new(CommandCapture::new(&config.capture.program)),
        Arc::new(FfmpegRemuxer::new(&config.capture.ffmpeg)),
        config.capture.duration(),
        config.capture.timeout(),
    );

    let deps = Collaborators {
        store: store.clone(),
        tokens: store,
        dispatcher: Arc::new(dispatcher),
        recorder: Arc::new(recorder),
        uploader: Arc::new(BucketUploader::new(config.bucket_dir())),
        bus: Arc::new(MqttTelemetry::connect(&config.mqtt)),
    };
    let settings = OrchestratorSettings {
        telemetry_topic: config.mqtt.telemetry_topic.clone(),
    };
    Ok(Arc::new(Orchestrator::new(deps, settings)))
}

async fn run_gateway(
    config: &Config,
    user: String,
    orchestrator: Arc<Orchestrator>,
    simulate: bool,
) {
    info!("Starting sensor gateway");
    info!("  Data dir: {}", config.gateway.data_dir.display());
    info!("  Bucket: {}", config.storage.bucket);
    info!(
        "  MQTT: {}:{} topic {}",
        config.mqtt.broker_host, config.mqtt.broker_port, config.mqtt.telemetry_topic
    );
    info!("  Commands: {}", config.mqtt.command_topic);

    let mut simulation = None;
    let source: Arc<dyn SensorSource> = if simulate {
        info!("  Sensor: simulated");
        let sensor = Arc::new(SimulatedSensor::default());
        simulation = Some(run_door_simulation(sensor.clone(), SIMULATED_DOOR_PERIOD));
        sensor
    } else {
        info!("  Sensor: {}", config.sensor.program);
        Arc::new(CommandSensor::new(&config.sensor))
    };

    let (command_tx, command_rx) = mpsc::channel(16);
    let listener = tokio::spawn(MqttCommandListener::new(&config.mqtt).run(command_tx));

    let shutdown = CancellationToken::new();
    let gateway = Gateway::new(
        user,
        source,
        orchestrator,
        GatewaySettings::from(&config.sensor),
    )
    .with_commands(command_rx);
    let gateway_task = tokio::spawn(gateway.run(shutdown.clone()));

    info!("Sensor gateway is running");
    info!("  - Press Ctrl+C to exit");

    match signal::ctrl_c().await {
        Ok(()) => info!("Received shutdown signal"),
        Err(e) => error!("Failed to listen for shutdown signal: {}", e),
    }

    shutdown.cancel();
    listener.abort();
    if let Some(simulation) = simulation {
        simulation.abort();
    }
    if let Err(e) = gateway_task.await {
        error!("Gateway task failed: {}", e);
    }

    info!("Sensor gateway stopped");
}
