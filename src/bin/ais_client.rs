use std::{error::Error, thread, time::Duration};

use ais140::{
    AisClient, ClientConfig, TransportKind,
    protocol::{
        AlertId, Emergency, Heartbeat, Hemisphere, LocationAlert, Login, PacketStatus, PacketType,
    },
};
use clap::Parser;
use log::info;

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Server ip address
    #[arg(long, required_unless_present = "domain")]
    ip: Option<String>,
    /// Server port
    #[arg(long, default_value_t = 31500)]
    port: u16,
    /// Server domain name, resolved on every connect
    #[arg(long)]
    domain: Option<String>,
    #[arg(long, value_enum, default_value_t = TransportKind::Tcp)]
    method: TransportKind,
    /// TCP keep-alive in seconds, 0 disables it
    #[arg(long, default_value_t = 0)]
    keep_alive: u32,
    /// Seconds to wait for each record to be acknowledged, 0 to fire and forget
    #[arg(long, default_value_t = 10)]
    ack_timeout: u64,
    /// Seconds to listen for downlink commands after the emergency record
    #[arg(long, default_value_t = 20)]
    listen: u64,
    #[arg(long, default_value = "V1")]
    vendor_id: String,
    #[arg(long, default_value = "864000000000000")]
    imei: String,
    #[arg(long, default_value = "KA01AB1234")]
    vehicle: String,
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let cli = Cli::parse();
    let mut config = ClientConfig::new()
        .with_port(cli.port)
        .with_kind(cli.method)
        .with_keep_alive(cli.keep_alive)
        .with_ack_timeout(Duration::from_secs(cli.ack_timeout));
    if let Some(ip) = &cli.ip {
        config = config.with_ip(ip);
    }
    if let Some(domain) = &cli.domain {
        config = config.with_domain(domain);
    }

    let mut client = AisClient::new(config)?;
    client.set_callback(|command| {
        let about = command.config_key().map_or("unknown setting", |key| key.description());
        info!("server command {command} ({about})");
    });

    if !client.connect() {
        return Err("could not connect to the tracking server".into());
    }

    let login = Login {
        vendor_id: cli.vendor_id.clone(),
        device_name: cli.vehicle.clone(),
        imei: cli.imei.clone(),
        firmware_version: "FW1.0".into(),
        protocol_version: "AIS140".into(),
        latitude: "12.896545".into(),
        latitude_dir: Hemisphere::North,
        longitude: "76.358759".into(),
        longitude_dir: Hemisphere::East,
    };
    info!("login sent: {}", client.send_login(&login));

    let heartbeat = Heartbeat {
        vendor_id: cli.vendor_id.clone(),
        firmware_version: "FW1.0".into(),
        imei: cli.imei.clone(),
        battery_percentage: "60%".into(),
        low_battery_threshold: "30%".into(),
        memory_percentage: "30%".into(),
        update_rate_ignition_on: 10,
        update_rate_ignition_off: 60,
        digital_io_status: "0001".into(),
        analog_io_status: "12.6".into(),
    };
    info!("heartbeat sent: {}", client.send_heartbeat(&heartbeat));

    let alert = LocationAlert {
        vendor_id: cli.vendor_id.clone(),
        firmware_version: "FW1.0".into(),
        packet_type: PacketType::NormalReport,
        alert_id: AlertId::LocationUpdate,
        packet_status: PacketStatus::Live,
        imei: cli.imei.clone(),
        vehicle_reg_no: cli.vehicle.clone(),
        gps_fix: 1,
        date: "29042024".into(),
        time: "152000".into(),
        latitude: "12.896545".into(),
        latitude_dir: Hemisphere::North,
        longitude: "76.358759".into(),
        longitude_dir: Hemisphere::East,
        speed: 25.0,
        heading: 135.0,
        satellites: 10,
        altitude: 76.0,
        pdop: 2.5,
        hdop: 1.9,
        operator_name: "CMNET".into(),
        ignition: 1,
        main_power_status: 1,
        main_input_voltage: 12.4,
        internal_battery_voltage: 4.2,
        emergency_status: 0,
        tamper_alert: "C".into(),
        gsm_strength: 31,
        mcc: 404,
        mnc: 98,
        lac: 123,
        cell_id: 456,
        nmr: "1,2,3,1,2,3,1,2,3,1,2,3".into(),
        digital_input_status: "0000".into(),
        digital_output_status: "00".into(),
        analog_input_1: 6.7,
        analog_input_2: 2.5,
        odometer: 123456,
    };
    info!("location sent: {}", client.send_location_alert(&alert));

    let emergency = Emergency {
        vendor_id: cli.vendor_id.clone(),
        packet_type: "EMR".into(),
        imei: cli.imei.clone(),
        packet_status: "NM".into(),
        date_time: "18122017124850".into(),
        gps_fix: "A".into(),
        latitude: "12.896545".into(),
        latitude_dir: Hemisphere::North,
        longitude: "76.358759".into(),
        longitude_dir: Hemisphere::East,
        altitude: 123.0,
        speed: 25.0,
        distance: 12345.0,
        provider: "G".into(),
        vehicle_reg_no: cli.vehicle.clone(),
        reply_number: "NA".into(),
    };
    info!("emergency sent: {}", client.send_emergency(&emergency));

    thread::sleep(Duration::from_secs(cli.listen));
    client.disconnect();
    Ok(())
}
