//! Outbound AIS-140 records.
//!
//! Every record the device sends is ASCII text of the form
//!
//! ```text
//! $,<TAG>,<field>,<field>,...*[checksum]
//! ```
//!
//! Each packet kind is a struct holding that kind's fields in wire order, and
//! [`OutboundPacket`] tags a borrowed struct with its kind so it can be encoded:
//!
//! | Kind | Tag | Checksum |
//! |------|-----|----------|
//! | [`Login`] | `LGN` | none |
//! | [`Heartbeat`] | `HBT` | none |
//! | [`LocationAlert`] | `NRM` | XOR of the body after `$,`, as `,<HEX>*` |
//! | [`Emergency`] | `EPB` | CRC-32 of the whole record, right after `*` |
//!
//! Location/alert records also carry a [`FrameNumber`] from the client's
//! [`FrameCounter`], placed after the last field.
use std::{
    fmt::{self, Write},
    sync::atomic::{AtomicU32, Ordering},
};

use log::warn;

use crate::checksum::{crc32_checksum, xor_checksum};

pub const RECORD_START: &str = "$,";
pub const RECORD_END: char = '*';
pub const FRAME_NUMBER_MAX: u32 = 999_999;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hemisphere {
    North,
    South,
    East,
    West,
}

impl fmt::Display for Hemisphere {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Hemisphere::North => "N",
            Hemisphere::South => "S",
            Hemisphere::East => "E",
            Hemisphere::West => "W",
        };
        f.write_str(s)
    }
}

/// Event class of a location/alert record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    NormalReport,
    EmergencyAlert,
    TamperAlert,
    HealthPacket,
    IgnitionOn,
    IgnitionOff,
    VehicleBatteryDisconnected,
    VehicleBatteryReconnected,
    InternalBatteryLow,
    HarshBraking,
    HarshAcceleration,
    RashTurning,
    SosWireDisconnect,
    OverspeedAlert,
}

impl PacketType {
    pub fn code(&self) -> &'static str {
        match self {
            PacketType::NormalReport => "NR",
            PacketType::EmergencyAlert => "EA",
            PacketType::TamperAlert => "TA",
            PacketType::HealthPacket => "HP",
            PacketType::IgnitionOn => "IN",
            PacketType::IgnitionOff => "IF",
            PacketType::VehicleBatteryDisconnected => "BD",
            PacketType::VehicleBatteryReconnected => "BR",
            PacketType::InternalBatteryLow => "BL",
            PacketType::HarshBraking => "HB",
            PacketType::HarshAcceleration => "HA",
            PacketType::RashTurning => "RT",
            PacketType::SosWireDisconnect => "WD",
            PacketType::OverspeedAlert => "OS",
        }
    }
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertId {
    LocationUpdate = 1,
    LocationUpdateHistory = 2,
    MainsOff = 3,
    LowBattery = 4,
    LowBatteryRemoved = 5,
    MainsOn = 6,
    IgnitionOn = 7,
    IgnitionOff = 8,
    TamperAlert = 9,
    EmergencyOn = 10,
    EmergencyOff = 11,
    OtaAlert = 12,
    HarshBraking = 13,
    HarshAcceleration = 14,
    RashTurning = 15,
    WireDisconnect = 16,
    Overspeed = 17,
}

impl fmt::Display for AlertId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}", *self as u8)
    }
}

/// Whether a location record is live or replayed from storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketStatus {
    Live,
    History,
}

impl fmt::Display for PacketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PacketStatus::Live => f.write_str("L"),
            PacketStatus::History => f.write_str("H"),
        }
    }
}

/// Sequence number of a location/alert record, `000001` through `999999`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct FrameNumber(u32);

impl FrameNumber {
    pub fn value(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for FrameNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:06}", self.0)
    }
}

/// Cycling source of [`FrameNumber`]s; wraps back to 1 after 999999.
#[derive(Debug)]
pub struct FrameCounter {
    next: AtomicU32,
}

impl Default for FrameCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameCounter {
    pub fn new() -> Self {
        Self {
            next: AtomicU32::new(1),
        }
    }

    pub fn next(&self) -> FrameNumber {
        let current = self
            .next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                Some(if n >= FRAME_NUMBER_MAX { 1 } else { n + 1 })
            })
            .unwrap_or(1);
        FrameNumber(current)
    }

    pub fn reset(&self) {
        self.next.store(1, Ordering::SeqCst);
    }
}

/// A packet kind with a fixed, ordered field list.
pub trait Record {
    const TAG: &'static str;

    fn fields(&self) -> Vec<&dyn fmt::Display>;
}

/// `$,TAG,f1,f2,...` without terminator.
fn body<R: Record>(record: &R) -> String {
    let mut out = format!("{RECORD_START}{}", R::TAG);
    for field in record.fields() {
        let _ = write!(out, ",{field}");
    }
    out
}

#[derive(Debug, Clone, PartialEq)]
pub struct Login {
    pub vendor_id: String,
    pub device_name: String,
    pub imei: String,
    pub firmware_version: String,
    pub protocol_version: String,
    pub latitude: String,
    pub latitude_dir: Hemisphere,
    pub longitude: String,
    pub longitude_dir: Hemisphere,
}

impl Record for Login {
    const TAG: &'static str = "LGN";

    fn fields(&self) -> Vec<&dyn fmt::Display> {
        let fields: [&dyn fmt::Display; 9] = [
            &self.vendor_id,
            &self.device_name,
            &self.imei,
            &self.firmware_version,
            &self.protocol_version,
            &self.latitude,
            &self.latitude_dir,
            &self.longitude,
            &self.longitude_dir,
        ];
        fields.into()
    }
}

/// Health monitoring record.
#[derive(Debug, Clone, PartialEq)]
pub struct Heartbeat {
    pub vendor_id: String,
    pub firmware_version: String,
    pub imei: String,
    pub battery_percentage: String,
    pub low_battery_threshold: String,
    pub memory_percentage: String,
    /// Seconds between reports with ignition on.
    pub update_rate_ignition_on: u32,
    /// Seconds between reports with ignition off.
    pub update_rate_ignition_off: u32,
    pub digital_io_status: String,
    pub analog_io_status: String,
}

impl Record for Heartbeat {
    const TAG: &'static str = "HBT";

    fn fields(&self) -> Vec<&dyn fmt::Display> {
        let fields: [&dyn fmt::Display; 10] = [
            &self.vendor_id,
            &self.firmware_version,
            &self.imei,
            &self.battery_percentage,
            &self.low_battery_threshold,
            &self.memory_percentage,
            &self.update_rate_ignition_on,
            &self.update_rate_ignition_off,
            &self.digital_io_status,
            &self.analog_io_status,
        ];
        fields.into()
    }
}

/// Full telemetry record; the frame number is added by the sender.
#[derive(Debug, Clone, PartialEq)]
pub struct LocationAlert {
    pub vendor_id: String,
    pub firmware_version: String,
    pub packet_type: PacketType,
    pub alert_id: AlertId,
    pub packet_status: PacketStatus,
    pub imei: String,
    pub vehicle_reg_no: String,
    pub gps_fix: u8,
    /// `DDMMYYYY`
    pub date: String,
    /// `hhmmss`
    pub time: String,
    pub latitude: String,
    pub latitude_dir: Hemisphere,
    pub longitude: String,
    pub longitude_dir: Hemisphere,
    pub speed: f64,
    pub heading: f64,
    pub satellites: u8,
    pub altitude: f64,
    pub pdop: f64,
    pub hdop: f64,
    pub operator_name: String,
    pub ignition: u8,
    pub main_power_status: u8,
    pub main_input_voltage: f64,
    pub internal_battery_voltage: f64,
    pub emergency_status: u8,
    pub tamper_alert: String,
    pub gsm_strength: u8,
    pub mcc: u16,
    pub mnc: u16,
    pub lac: u32,
    pub cell_id: u32,
    /// Neighbouring cell measurements, already comma-joined.
    pub nmr: String,
    pub digital_input_status: String,
    pub digital_output_status: String,
    pub analog_input_1: f64,
    pub analog_input_2: f64,
    pub odometer: u64,
}

impl Record for LocationAlert {
    const TAG: &'static str = "NRM";

    fn fields(&self) -> Vec<&dyn fmt::Display> {
        let fields: [&dyn fmt::Display; 38] = [
            &self.vendor_id,
            &self.firmware_version,
            &self.packet_type,
            &self.alert_id,
            &self.packet_status,
            &self.imei,
            &self.vehicle_reg_no,
            &self.gps_fix,
            &self.date,
            &self.time,
            &self.latitude,
            &self.latitude_dir,
            &self.longitude,
            &self.longitude_dir,
            &self.speed,
            &self.heading,
            &self.satellites,
            &self.altitude,
            &self.pdop,
            &self.hdop,
            &self.operator_name,
            &self.ignition,
            &self.main_power_status,
            &self.main_input_voltage,
            &self.internal_battery_voltage,
            &self.emergency_status,
            &self.tamper_alert,
            &self.gsm_strength,
            &self.mcc,
            &self.mnc,
            &self.lac,
            &self.cell_id,
            &self.nmr,
            &self.digital_input_status,
            &self.digital_output_status,
            &self.analog_input_1,
            &self.analog_input_2,
            &self.odometer,
        ];
        fields.into()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Emergency {
    pub vendor_id: String,
    pub packet_type: String,
    pub imei: String,
    pub packet_status: String,
    /// `DDMMYYYYhhmmss`
    pub date_time: String,
    pub gps_fix: String,
    pub latitude: String,
    pub latitude_dir: Hemisphere,
    pub longitude: String,
    pub longitude_dir: Hemisphere,
    pub altitude: f64,
    pub speed: f64,
    pub distance: f64,
    pub provider: String,
    pub vehicle_reg_no: String,
    pub reply_number: String,
}

impl Record for Emergency {
    const TAG: &'static str = "EPB";

    fn fields(&self) -> Vec<&dyn fmt::Display> {
        let fields: [&dyn fmt::Display; 16] = [
            &self.vendor_id,
            &self.packet_type,
            &self.imei,
            &self.packet_status,
            &self.date_time,
            &self.gps_fix,
            &self.latitude,
            &self.latitude_dir,
            &self.longitude,
            &self.longitude_dir,
            &self.altitude,
            &self.speed,
            &self.distance,
            &self.provider,
            &self.vehicle_reg_no,
            &self.reply_number,
        ];
        fields.into()
    }
}

/// A record ready to be encoded for one send.
#[derive(Debug, Clone, Copy)]
pub enum OutboundPacket<'a> {
    Login(&'a Login),
    Heartbeat(&'a Heartbeat),
    LocationAlert(&'a LocationAlert, FrameNumber),
    Emergency(&'a Emergency),
}

impl OutboundPacket<'_> {
    pub fn tag(&self) -> &'static str {
        match self {
            OutboundPacket::Login(_) => Login::TAG,
            OutboundPacket::Heartbeat(_) => Heartbeat::TAG,
            OutboundPacket::LocationAlert(..) => LocationAlert::TAG,
            OutboundPacket::Emergency(_) => Emergency::TAG,
        }
    }

    pub fn encode(&self) -> String {
        match self {
            OutboundPacket::Login(login) => format!("{}{RECORD_END}", body(*login)),
            OutboundPacket::Heartbeat(heartbeat) => format!("{}{RECORD_END}", body(*heartbeat)),
            OutboundPacket::LocationAlert(alert, frame) => {
                let record = format!("{},{frame}", body(*alert));
                let csum = xor_checksum(&record[RECORD_START.len()..]);
                format!("{record},{csum}{RECORD_END}")
            }
            OutboundPacket::Emergency(emergency) => {
                // The CRC follows the terminator directly, unlike the NRM checksum.
                let record = format!("{}{RECORD_END}", body(*emergency));
                match crc32_checksum(&record) {
                    Ok(csum) => record + &csum,
                    Err(e) => {
                        warn!("sending {} record without checksum: {e}", Emergency::TAG);
                        record
                    }
                }
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::{fixtures::*, *};

    #[test]
    fn login_record() {
        let login = login();
        assert_eq!(
            OutboundPacket::Login(&login).encode(),
            "$,LGN,V1,DEV,IMEI1,FW1,AIS140,12.9,N,77.5,E*"
        );
    }

    #[test]
    fn heartbeat_record() {
        let heartbeat = heartbeat();
        assert_eq!(
            OutboundPacket::Heartbeat(&heartbeat).encode(),
            "$,HBT,V1,FW1,IMEI1,60%,30%,30%,10,60,0001,12.6*"
        );
    }

    #[test]
    fn location_alert_record() {
        let alert = location_alert();
        let record = OutboundPacket::LocationAlert(&alert, FrameNumber(42)).encode();

        assert!(record.starts_with("$,NRM,V1,FW1,NR,01,L,IMEI1,KA01AB1234,1,29042024,152000,"));
        assert!(record.contains(",25,135,10,76,2.5,1.9,OPR,1,1,12.4,4.2,0,C,31,404,98,123,456,"));
        assert!(record.ends_with('*'));

        let (body, csum) = record[..record.len() - 1].rsplit_once(',').unwrap();
        assert!(body.ends_with(",123456,000042"));
        assert_eq!(csum, xor_checksum(&body[2..]));
    }

    #[test]
    fn location_checksum_excludes_record_start() {
        let alert = location_alert();
        let record = OutboundPacket::LocationAlert(&alert, FrameNumber(1)).encode();
        let body = &record[..record.rfind(',').unwrap()];

        // XOR of "$," is 0x24 ^ 0x2C, so including it would change the checksum.
        assert_ne!(xor_checksum(body), xor_checksum(&body[2..]));
        assert!(record.ends_with(&format!(",{}*", xor_checksum(&body[2..]))));
    }

    #[cfg(feature = "crc32")]
    #[test]
    fn emergency_record() {
        let emergency = emergency();
        let record = OutboundPacket::Emergency(&emergency).encode();
        let expected = "$,EPB,V1,EMR,IMEI1,NM,18122017124850,A,12.896545,N,76.358759,E,123,25,12345,G,CAR12345,NA*";

        assert!(record.starts_with(expected));
        assert_eq!(&record[expected.len()..], crc32_checksum(expected).unwrap());
    }

    #[cfg(not(feature = "crc32"))]
    #[test]
    fn emergency_record_without_crc_engine() {
        let emergency = emergency();
        assert!(OutboundPacket::Emergency(&emergency).encode().ends_with("NA*"));
    }

    #[test]
    fn packet_tags() {
        let (login, heartbeat, alert, emergency) =
            (login(), heartbeat(), location_alert(), emergency());
        assert_eq!(OutboundPacket::Login(&login).tag(), "LGN");
        assert_eq!(OutboundPacket::Heartbeat(&heartbeat).tag(), "HBT");
        assert_eq!(
            OutboundPacket::LocationAlert(&alert, FrameNumber(1)).tag(),
            "NRM"
        );
        assert_eq!(OutboundPacket::Emergency(&emergency).tag(), "EPB");
    }

    #[test]
    fn alert_id_codes() {
        assert_eq!(AlertId::LocationUpdate.to_string(), "01");
        assert_eq!(AlertId::Overspeed.to_string(), "17");
        assert_eq!(PacketType::SosWireDisconnect.to_string(), "WD");
    }

    #[test]
    fn frame_numbers_start_at_one() {
        let counter = FrameCounter::new();
        assert_eq!(counter.next().to_string(), "000001");
        assert_eq!(counter.next().to_string(), "000002");
    }

    #[test]
    fn frame_numbers_wrap() {
        let counter = FrameCounter::new();
        let mut last = counter.next();
        for _ in 1..FRAME_NUMBER_MAX {
            last = counter.next();
        }
        assert_eq!(last.to_string(), "999999");
        assert_eq!(counter.next().to_string(), "000001");
    }

    #[test]
    fn frame_counter_reset() {
        let counter = FrameCounter::new();
        counter.next();
        counter.next();
        counter.reset();
        assert_eq!(counter.next().value(), 1);
    }
}
