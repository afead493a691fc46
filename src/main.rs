use anyhow::Context;
use feeder_monitor::{
    build_card, AcquisitionScheduler, DisplaySide, EquipmentClass, FeederConfig, GatewayReader,
    ModbusTcpReader, RegisterReader, SimulatedRegisterReader,
};
use std::{env, sync::Arc, time::Duration};
use tokio::time;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config_path =
        env::var("FEEDERS_CONFIG").context("Required to set FEEDERS_CONFIG to a feeders JSON file")?;
    let feeders = FeederConfig::load_feeders(&config_path)
        .with_context(|| format!("Cant load feeders from `{config_path}`"))?;
    tracing::info!(feeders = feeders.len(), path = %config_path, "loaded feeder configuration");

    let reader = register_reader_from_env()?;
    let scheduler = AcquisitionScheduler::new(reader);

    // Targets with incomplete connection settings stay inactive; the scheduler logs why.
    for feeder in &feeders {
        for equipment in EquipmentClass::ALL {
            let _ = scheduler.start(feeder, equipment, None);
        }
    }

    let display_interval = display_interval(env::var("DISPLAY_INTERVAL_MS").ok().as_deref());
    let mut display_tick = time::interval(display_interval);

    loop {
        tokio::select! {
            _ = display_tick.tick() => log_cards(&scheduler, &feeders),
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    tracing::error!(error = %e, "cant listen for shutdown signal");
                }
                break;
            }
        }
    }

    scheduler.shutdown();
    Ok(())
}

fn register_reader_from_env() -> anyhow::Result<Arc<dyn RegisterReader>> {
    let source = env::var("REGISTER_SOURCE").unwrap_or_else(|_| "modbus".to_string());
    let reader: Arc<dyn RegisterReader> = match source.to_ascii_lowercase().as_str() {
        "modbus" => Arc::new(ModbusTcpReader::new()),
        "gateway" => {
            let url = env::var("GATEWAY_URL")
                .context("Required to set GATEWAY_URL when REGISTER_SOURCE=gateway")?;
            Arc::new(GatewayReader::new(url))
        }
        "simulated" => Arc::new(SimulatedRegisterReader::new()),
        other => anyhow::bail!("Unknown REGISTER_SOURCE `{other}`"),
    };
    tracing::info!(%source, "using register source");
    Ok(reader)
}

fn log_cards(scheduler: &AcquisitionScheduler, feeders: &[FeederConfig]) {
    for feeder in feeders {
        let card = build_card(feeder, &scheduler.snapshots_for_feeder(&feeder.id));
        let relay = scheduler.measurement_state(&feeder.target_key(EquipmentClass::Relay));
        let analyzer = scheduler.measurement_state(&feeder.target_key(EquipmentClass::Analyzer));
        let render = |side: &DisplaySide| {
            side.slots
                .iter()
                .map(|slot| format!("{}={}", slot.label, slot.text))
                .collect::<Vec<_>>()
                .join(" ")
        };
        tracing::info!(
            feeder = %card.feeder_id,
            relay_reads = relay.read_sequence,
            analyzer_reads = analyzer.read_sequence,
            top = %format!("[{}] {}", card.top.title, render(&card.top)),
            bottom = %format!("[{}] {}", card.bottom.title, render(&card.bottom)),
            "{}",
            card.name
        );
    }
}

/// Parses `DISPLAY_INTERVAL_MS`; missing, malformed or zero values mean one second.
fn display_interval(raw: Option<&str>) -> Duration {
    let millis = raw
        .and_then(|ms| ms.trim().parse::<u64>().ok())
        .filter(|ms| *ms > 0)
        .unwrap_or(1000);
    Duration::from_millis(millis)
}
