use crate::modem::command::Command;
use crate::modem::matcher::ResponsePattern;
use crate::modem::parse::{ParseError, find};
use crate::modem::session::{CommandSession, StepError, Timeouts};
use crate::modem::transport::Transport;
use std::time::Duration;
use thiserror::Error;

// Status field of a valid RMC-style report; the latitude field follows it.
const FIX_MARKER: &[u8] = b",A,";
const FIX_MARKER_NAME: &str = ",A,";
const NO_FIX_SENTINEL: &[u8] = b"0000";

pub const FIX_UNAVAILABLE: &str = "GPS FIX UNAVAILABLE";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Position {
    pub latitude: String,
    pub lat_hemisphere: String,
    pub longitude: String,
    pub lon_hemisphere: String,
}

impl Position {
    pub fn sms_body(&self) -> String {
        format!("LATITUDE {} LONGITUDE {}", self.latitude, self.longitude)
    }

    // Signed decimal degrees, for logs.
    pub fn decimal_degrees(&self) -> Option<(f64, f64)> {
        let lat = parse_nmea_coord(&self.latitude, &self.lat_hemisphere, 2)?;
        let lon = parse_nmea_coord(&self.longitude, &self.lon_hemisphere, 3)?;
        Some((lat, lon))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GpsFix {
    Position(Position),
    NoFix,
}

impl GpsFix {
    pub fn sms_body(&self) -> String {
        match self {
            GpsFix::Position(position) => position.sms_body(),
            GpsFix::NoFix => FIX_UNAVAILABLE.to_string(),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FixError {
    #[error(transparent)]
    Step(#[from] StepError),
    #[error("GPS report unreadable: {0}")]
    Parse(#[from] ParseError),
}

// Power the receiver and restart its search.
pub fn power_on<T: Transport>(
    session: &mut CommandSession<T>,
    timeouts: Timeouts,
) -> Result<(), StepError> {
    let ok = ResponsePattern::ok();
    session.run_step("AT+CGPSPWR=1", &ok, timeouts.command)?;
    session.run_step("AT+CGPSRST=1", &ok, timeouts.command)?;
    Ok(())
}

// Ask the receiver for its current RMC report and parse it.
pub fn query_fix<T: Transport>(
    session: &mut CommandSession<T>,
    timeout: Duration,
) -> Result<GpsFix, FixError> {
    let command = Command::at("AT+CGPSINF=32").map_err(StepError::from)?;
    let reply = session.exchange(&command, &ResponsePattern::ok(), timeout);
    reply
        .outcome
        .into_result()
        .map_err(|source| StepError::exchange(command.text(), source))?;
    Ok(parse_fix(&reply.bytes)?)
}

// Extract the fix from a `AT+CGPSINF=32` response.
// Expected shape after the marker: `<lat>,<N|S>,<lon>,<E|W>,...`. Scanning
// never leaves `raw`, so a missing field is an error rather than a hang.
pub fn parse_fix(raw: &[u8]) -> Result<GpsFix, ParseError> {
    let start = find(raw, FIX_MARKER).ok_or(ParseError::MarkerNotFound {
        marker: FIX_MARKER_NAME,
    })? + FIX_MARKER.len();
    let rest = &raw[start..];

    let (latitude, rest) = take_field(rest, "latitude")?;
    let Some(latitude) = coordinate(latitude, "latitude")? else {
        return Ok(GpsFix::NoFix);
    };
    let (lat_hemisphere, rest) = take_field(rest, "latitude hemisphere")?;
    let (longitude, rest) = take_field(rest, "longitude")?;
    let Some(longitude) = coordinate(longitude, "longitude")? else {
        return Ok(GpsFix::NoFix);
    };
    let lon_hemisphere = rest
        .iter()
        .take_while(|byte| byte.is_ascii_alphabetic())
        .map(|&byte| byte as char)
        .collect();

    Ok(GpsFix::Position(Position {
        latitude,
        lat_hemisphere: String::from_utf8_lossy(lat_hemisphere).into_owned(),
        longitude,
        lon_hemisphere,
    }))
}

// Split off one comma-terminated field.
fn take_field<'a>(bytes: &'a [u8], field: &'static str) -> Result<(&'a [u8], &'a [u8]), ParseError> {
    let end = bytes
        .iter()
        .position(|&byte| byte == b',')
        .ok_or(ParseError::UnterminatedField { field })?;
    Ok((&bytes[..end], &bytes[end + 1..]))
}

// None means the receiver reported its no-fix sentinel.
fn coordinate(value: &[u8], field: &'static str) -> Result<Option<String>, ParseError> {
    if value.is_empty() {
        return Err(ParseError::EmptyField { field });
    }
    if value.starts_with(NO_FIX_SENTINEL) {
        return Ok(None);
    }
    if let Some(&byte) = value.iter().find(|&&byte| !is_coordinate_byte(byte)) {
        return Err(ParseError::InvalidCharacter { field, byte });
    }
    Ok(Some(String::from_utf8_lossy(value).into_owned()))
}

fn is_coordinate_byte(byte: u8) -> bool {
    byte.is_ascii_digit() || matches!(byte, b'.' | b'-' | b'+')
}

fn parse_nmea_coord(value: &str, hemi: &str, degree_digits: usize) -> Option<f64> {
    if value.len() <= degree_digits {
        return None;
    }

    let (deg_str, min_str) = value.split_at(degree_digits);
    let degrees = deg_str.parse::<f64>().ok()?;
    let minutes = min_str.parse::<f64>().ok()?;

    let mut decimal = degrees + (minutes / 60.0);
    if hemi == "S" || hemi == "W" {
        decimal = -decimal;
    }
    Some(decimal)
}
