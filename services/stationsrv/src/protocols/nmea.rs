//! NMEA 0183 sentence decoder
//!
//! Decodes GGA (fix), GSA (DOP) and GSV (satellites in view) sentences from a
//! station's raw data stream. GSV parts are buffered per talker and released as
//! one combined view once the multi-constellation burst has gone quiet.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::trace;

/// Time without a new GSV part after which the burst is considered complete
pub const GSV_QUIESCENCE: Duration = Duration::from_millis(100);

/// Placeholder for absent dilution-of-precision values
pub const DOP_MISSING: f64 = 99.99;

const GSA_MAX_ACTIVE: usize = 12;

/// Position fix from a GGA sentence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fix {
    pub timestamp_utc: String,
    pub latitude: f64,
    pub longitude: f64,
    pub fix_status: String,
    pub satellites: u32,
    pub hdop: f64,
    pub altitude: f64,
}

/// Active satellites and dilution of precision from a GSA sentence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dop {
    pub active_sats: Vec<i32>,
    pub pdop: f64,
    pub hdop: f64,
    pub vdop: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Satellite {
    pub prn: i32,
    pub elevation: i32,
    pub azimuth: i32,
    pub snr: i32,
}

/// All satellites gathered from one GSV burst, across talkers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SatelliteView {
    pub satellites: Vec<Satellite>,
}

/// One decoded result, serialized with the sentence kind under `type`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum NmeaReport {
    #[serde(rename = "GGA")]
    Fix(Fix),
    #[serde(rename = "GSA")]
    Dop(Dop),
    #[serde(rename = "GSV")]
    SatelliteView(SatelliteView),
}

/// GGA fix quality code to display name
pub fn fix_status(code: i64) -> String {
    match code {
        0 => "INVALID".to_string(),
        1 => "GPS (SPS)".to_string(),
        2 => "DGPS".to_string(),
        3 => "PPS".to_string(),
        4 => "RTK_FIXED".to_string(),
        5 => "RTK_FLOAT".to_string(),
        6 => "ESTIMATED".to_string(),
        other => format!("UNKNOWN_{other}"),
    }
}

/// `ddmm.mmmm` plus hemisphere to signed decimal degrees, 8 places
pub fn dms_to_decimal(dms: &str, hemisphere: &str) -> Option<f64> {
    let value: f64 = dms.trim().parse().ok()?;
    let degrees = (value / 100.0).trunc();
    let minutes = value - degrees * 100.0;
    let mut decimal = degrees + minutes / 60.0;
    if matches!(hemisphere, "S" | "W") {
        decimal = -decimal;
    }
    Some((decimal * 1e8).round() / 1e8)
}

#[derive(Debug, Default)]
struct TalkerBuffer {
    satellites: Vec<Satellite>,
    expected_parts: u32,
}

/// Stateful decoder, one per station stream
#[derive(Debug, Default)]
pub struct NmeaDecoder {
    gsv: HashMap<String, TalkerBuffer>,
    last_gsv: Option<Instant>,
}

impl NmeaDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode one line using the current time for GSV quiescence
    pub fn decode(&mut self, line: &str) -> Option<NmeaReport> {
        self.decode_at(line, Instant::now())
    }

    /// Decode one line as if received at `now`.
    ///
    /// At most one result comes back per call. A pending GSV burst whose last
    /// part is older than [`GSV_QUIESCENCE`] is flushed first and wins over a
    /// GGA/GSA decoded from this same line.
    pub fn decode_at(&mut self, line: &str, now: Instant) -> Option<NmeaReport> {
        let single = self.parse_sentence(line, now);

        if let Some(view) = self.flush_if_quiet(now) {
            return Some(NmeaReport::SatelliteView(view));
        }
        single
    }

    /// Satellites currently buffered across all talkers
    pub fn pending_satellites(&self) -> usize {
        self.gsv.values().map(|t| t.satellites.len()).sum()
    }

    fn parse_sentence(&mut self, line: &str, now: Instant) -> Option<NmeaReport> {
        if !line.starts_with('$') {
            return None;
        }
        let (body, _checksum) = line.split_once('*')?;
        let fields: Vec<&str> = body.split(',').collect();

        match fields[0].get(3..)? {
            "GGA" => parse_gga(&fields).map(NmeaReport::Fix),
            "GSA" => parse_gsa(&fields).map(NmeaReport::Dop),
            "GSV" => {
                self.fold_gsv(&fields, now);
                None
            },
            _ => None,
        }
    }

    fn fold_gsv(&mut self, fields: &[&str], now: Instant) {
        if fields.len() < 4 {
            return;
        }
        let Some(talker) = fields[0].get(1..3) else {
            return;
        };
        let (Ok(total), Ok(part)) = (
            fields[1].trim().parse::<u32>(),
            fields[2].trim().parse::<u32>(),
        ) else {
            return;
        };

        if part == 1 {
            self.gsv.insert(
                talker.to_string(),
                TalkerBuffer {
                    satellites: Vec::new(),
                    expected_parts: total,
                },
            );
        }

        // Stray part without its part 1
        let Some(buffer) = self.gsv.get_mut(talker) else {
            return;
        };

        buffer
            .satellites
            .extend(fields[4..].chunks(4).filter_map(parse_satellite));
        if part == buffer.expected_parts {
            trace!("GSV {} complete ({} parts)", talker, total);
        }
        self.last_gsv = Some(now);
    }

    fn flush_if_quiet(&mut self, now: Instant) -> Option<SatelliteView> {
        let last = self.last_gsv?;
        if now.saturating_duration_since(last) <= GSV_QUIESCENCE {
            return None;
        }

        let mut talkers: Vec<_> = self.gsv.drain().collect();
        if talkers.iter().all(|(_, t)| t.satellites.is_empty()) {
            // Nothing to release; keep waiting for real parts
            self.gsv.extend(talkers);
            return None;
        }
        talkers.sort_by(|a, b| a.0.cmp(&b.0));
        self.last_gsv = None;

        let satellites = talkers
            .into_iter()
            .flat_map(|(_, buffer)| buffer.satellites)
            .collect();
        Some(SatelliteView { satellites })
    }
}

fn parse_optional_i32(field: &str) -> Option<i32> {
    if field.is_empty() {
        Some(0)
    } else {
        field.trim().parse().ok()
    }
}

fn parse_satellite(chunk: &[&str]) -> Option<Satellite> {
    if chunk.len() < 4 || chunk[0].is_empty() {
        return None;
    }
    Some(Satellite {
        prn: chunk[0].trim().parse().ok()?,
        elevation: parse_optional_i32(chunk[1])?,
        azimuth: parse_optional_i32(chunk[2])?,
        snr: parse_optional_i32(chunk[3])?,
    })
}

fn parse_dop(field: &str) -> Option<f64> {
    if field.is_empty() {
        Some(DOP_MISSING)
    } else {
        field.trim().parse().ok()
    }
}

fn parse_gga(fields: &[&str]) -> Option<Fix> {
    if fields.len() < 11 || [2, 3, 4, 5, 6, 7, 9].iter().any(|&i| fields[i].is_empty()) {
        return None;
    }
    let quality: i64 = fields[6].trim().parse().ok()?;
    Some(Fix {
        timestamp_utc: fields[1].to_string(),
        latitude: dms_to_decimal(fields[2], fields[3])?,
        longitude: dms_to_decimal(fields[4], fields[5])?,
        fix_status: fix_status(quality),
        satellites: fields[7].trim().parse().ok()?,
        hdop: parse_dop(fields[8])?,
        altitude: fields[9].trim().parse().ok()?,
    })
}

fn parse_gsa(fields: &[&str]) -> Option<Dop> {
    if fields.len() < 18 {
        return None;
    }
    let active_sats = fields[3..3 + GSA_MAX_ACTIVE]
        .iter()
        .filter(|f| !f.is_empty())
        .map(|f| f.trim().parse().ok())
        .collect::<Option<Vec<i32>>>()?;
    Some(Dop {
        active_sats,
        pdop: parse_dop(fields[15])?,
        hdop: parse_dop(fields[16])?,
        vdop: parse_dop(fields[17])?,
    })
}
