pub mod calibration;
pub mod config;
pub mod delivery;
pub mod derived;
pub mod ingest;
pub mod record;
pub mod ruuvi;
pub mod supervisor;
