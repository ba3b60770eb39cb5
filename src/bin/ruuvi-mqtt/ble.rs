pub mod ruuvi;

use anyhow::{Context as _, Result, anyhow};
use btleplug::{
    api::{Central, CentralEvent, Manager as _, ScanFilter},
    platform::Manager,
};
use ruuvi_mqtt::{
    ingest::{Ingester, run_ingest},
    ruuvi::RawReading,
};
use tokio_stream::StreamExt as _;
use tracing::{debug, info};

use crate::ble::ruuvi::{decode_manufacturer_data, get_ruuvi_manufacturer_data};

/// Scans for RuuviTag advertisements on the first Bluetooth adapter and feeds
/// them to `ingester`.
pub async fn ingest_advertisements(ingester: Ingester) -> Result<()> {
    let manager = Manager::new()
        .await
        .context("failed to initialize Bluetooth manager")?;

    let adapters = manager
        .adapters()
        .await
        .context("failed to get Bluetooth adapters")?;

    let adapter = adapters
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("no Bluetooth adapters found"))?;

    let events = adapter
        .events()
        .await
        .context("failed to subscribe to BLE events")?;

    adapter
        .start_scan(ScanFilter::default())
        .await
        .context("failed to start BLE scan")?;

    info!("scanning for RuuviTags");

    run_ingest(ingester, events.filter_map(decode_event)).await
}

fn decode_event(event: CentralEvent) -> Option<RawReading> {
    let CentralEvent::ManufacturerDataAdvertisement {
        id,
        manufacturer_data,
    } = event
    else {
        return None;
    };

    let data = get_ruuvi_manufacturer_data(&manufacturer_data)?;

    match decode_manufacturer_data(data) {
        Ok(reading) => Some(reading),
        Err(err) => {
            debug!(?id, "failed to decode Ruuvi manufacturer data: {err:#}");
            None
        }
    }
}
