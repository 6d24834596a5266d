use std::io::Write;

use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};
use tokio::signal;
use tokio::signal::unix::SignalKind;
use tokio_util::sync::CancellationToken;

use hassdash::app::Dashboard;
use hassdash::command::{ClimateUpdate, LightAction, LightOptions};
use hassdash::config;
use hassdash::error::ApiResult;
use hassdash::sync::CommandTicket;
use hassdash_api::remote::RemoteConfigUpdate;

#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: Utf8PathBuf,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Mirror entity states live until interrupted
    Watch,

    /// Show Home Assistant connection status
    Status,

    /// Toggle a light or switch, or cycle a climate entity's mode
    Toggle { entity_id: String },

    /// Switch a light on or off
    Light {
        entity_id: String,
        #[arg(value_parser = ["on", "off"])]
        state: String,
        #[arg(long)]
        brightness: Option<u8>,
    },

    /// Change climate settings. Without options, cycles the HVAC mode.
    Climate {
        entity_id: String,
        #[arg(long)]
        mode: Option<String>,
        #[arg(long)]
        temperature: Option<f64>,
        #[arg(long)]
        fan_mode: Option<String>,
    },

    /// Twelve hour temperature and humidity averages
    Averages {
        /// Use locally recorded readings instead of Home Assistant history
        #[arg(long)]
        local: bool,
    },

    /// List configured devices, or point one at a new entity
    Devices {
        #[arg(long, requires = "entity")]
        set: Option<String>,
        #[arg(long)]
        entity: Option<String>,
    },

    /// Persist connection settings
    SetRemote {
        #[arg(long)]
        url: Option<String>,
        #[arg(long)]
        token: Option<String>,
        #[arg(long)]
        websocket_url: Option<String>,
        #[arg(long)]
        use_proxy: Option<bool>,
        /// Forget stored settings
        #[arg(long, conflicts_with_all = ["url", "token", "websocket_url", "use_proxy"])]
        reset: bool,
    },
}

/*
 * Formatter function to output in syslog format. This makes sense when running
 * as a service (where output might go to a log file, or the system journal)
 */
#[allow(clippy::match_same_arms)]
fn syslog_format(
    buf: &mut pretty_env_logger::env_logger::fmt::Formatter,
    record: &log::Record,
) -> std::io::Result<()> {
    writeln!(
        buf,
        "<{}>{}: {}",
        match record.level() {
            log::Level::Error => 3,
            log::Level::Warn => 4,
            log::Level::Info => 6,
            log::Level::Debug => 7,
            log::Level::Trace => 7,
        },
        record.target(),
        record.args()
    )
}

fn init_logging() -> ApiResult<()> {
    /* Try to provide reasonable default filters, when RUST_LOG is not specified */
    const DEFAULT_LOG_FILTERS: &[&str] = &[
        "debug",
        "hyper_util=info",
        "reqwest=info",
        "tungstenite=info",
        "tokio_tungstenite=info",
    ];

    let log_filters = std::env::var("RUST_LOG").unwrap_or_else(|_| DEFAULT_LOG_FILTERS.join(","));

    /* Detect if we need syslog or human-readable formatting */
    if std::env::var("SYSTEMD_EXEC_PID").is_ok_and(|pid| pid == std::process::id().to_string()) {
        Ok(pretty_env_logger::env_logger::builder()
            .format(syslog_format)
            .parse_filters(&log_filters)
            .try_init()?)
    } else {
        Ok(pretty_env_logger::formatted_timed_builder()
            .parse_filters(&log_filters)
            .try_init()?)
    }
}

fn install_signal_handlers(token: &CancellationToken) -> ApiResult<()> {
    fn shutdown(msg: &str, token: &CancellationToken) {
        log::warn!("{msg}");
        let _ = std::io::stderr().flush();
        token.cancel();
    }

    let ctrlc = token.clone();
    tokio::spawn(async move {
        if matches!(signal::ctrl_c().await, Ok(())) {
            shutdown("Ctrl-C pressed, exiting..", &ctrlc);
        }
    });

    let term = token.clone();
    let mut signal = signal::unix::signal(SignalKind::terminate())?;
    tokio::spawn(async move {
        if matches!(signal.recv().await, Some(())) {
            shutdown("SIGTERM received, exiting..", &term);
        }
    });

    Ok(())
}

fn print_json(value: &impl serde::Serialize) -> ApiResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn finish(dash: &Dashboard, entity_id: &str, ticket: CommandTicket) -> ApiResult<()> {
    let outcome = ticket.outcome().await?;
    if let Some(state) = dash.sync().get_current_data().get(entity_id) {
        log::info!("{entity_id} is now {}", state.new_state);
    }
    print_json(&outcome)
}

async fn watch(dash: &Dashboard) -> ApiResult<()> {
    let token = CancellationToken::new();
    install_signal_handlers(&token)?;

    let loaded = dash.start().await?;
    log::info!("Initial load fetched {loaded} entities");

    let mut snapshots = dash.sync().watch();
    let mut conn = dash.sync().connection_watch();

    loop {
        tokio::select! {
            () = token.cancelled() => break,
            res = snapshots.changed() => {
                if res.is_err() {
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                log::debug!("Snapshot updated: {} entities, {} seed", snapshot.len(), snapshot.seed_count());
                if let Err(err) = dash.record_history().await {
                    log::warn!("Could not record sensor history: {err}");
                }
            }
            res = conn.changed() => {
                if res.is_err() {
                    break;
                }
                let state = *conn.borrow_and_update();
                log::info!("Live connection {state}");
            }
        }
    }

    dash.shutdown();
    Ok(())
}

async fn run() -> ApiResult<()> {
    init_logging()?;

    let args = Args::parse();

    let config = config::parse(&args.config)?;
    log::debug!("Configuration loaded successfully");

    let dash = Dashboard::from_config(config)?;

    match args.command {
        Cmd::Watch => watch(&dash).await?,

        Cmd::Status => print_json(&dash.remote().get_connection_status().await)?,

        Cmd::Toggle { entity_id } => {
            dash.start().await?;
            let ticket = dash.sync().toggle_entity(&entity_id)?;
            finish(&dash, &entity_id, ticket).await?;
            dash.shutdown();
        }

        Cmd::Light {
            entity_id,
            state,
            brightness,
        } => {
            dash.start().await?;
            let options = LightOptions {
                brightness,
                rgb_color: None,
            };
            let action = LightAction::from_on(state == "on");
            let ticket = dash.sync().control_light(&entity_id, action, options)?;
            finish(&dash, &entity_id, ticket).await?;
            dash.shutdown();
        }

        Cmd::Climate {
            entity_id,
            mode,
            temperature,
            fan_mode,
        } => {
            dash.start().await?;
            let update = ClimateUpdate {
                hvac_mode: mode,
                temperature,
                fan_mode,
            };
            let ticket = dash.sync().update_climate_entity(&entity_id, update)?;
            finish(&dash, &entity_id, ticket).await?;
            dash.shutdown();
        }

        Cmd::Averages { local } => {
            let averages = if local {
                dash.local_averages().await
            } else {
                dash.remote_averages().await?
            };
            print_json(&averages)?;
        }

        Cmd::Devices { set, entity } => {
            let store = dash.devices();
            let devices = match (set, entity) {
                (Some(device_id), Some(entity)) => store.update_entity(&device_id, &entity)?,
                _ => store.load_or_init()?,
            };
            for device in devices.iter() {
                println!("{:<12} {:<24} {}", device.id, device.name, device.entity);
            }
            println!();
            println!("tracked: {}", devices.tracked_entity_ids().join(", "));
        }

        Cmd::SetRemote {
            url,
            token,
            websocket_url,
            use_proxy,
            reset,
        } => {
            let remote = dash.remote();
            if reset {
                remote.reset_config()?;
            } else {
                remote.save_config(RemoteConfigUpdate {
                    base_url: url,
                    token,
                    websocket_url,
                    use_proxy,
                })?;
            }
            let mut shown = remote.get_config();
            if !shown.token.is_empty() {
                shown.token = "********".to_string();
            }
            print_json(&shown)?;
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        log::error!("hassdash error: {err}");
        log::error!("Fatal error encountered, cannot continue.");
        std::process::exit(1);
    }
}
