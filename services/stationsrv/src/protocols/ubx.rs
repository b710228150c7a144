//! UBX binary frames for u-blox receivers
//!
//! Only the two base-station configuration messages are produced here. Both use
//! a fixed 48-byte frame with the layout below, followed by a constant
//! save-configuration frame.
//!
//! | Offset | Width | Field                                   |
//! |--------|-------|-----------------------------------------|
//! | 0..6   | 6     | header `B5 62 06 71 28 00`              |
//! | 8      | u8    | mode (1 survey-in, 2 fixed)             |
//! | 9      | u8    | position type (1 = LLA)                 |
//! | 10..14 | i32   | latitude, deg * 1e7                     |
//! | 14..18 | i32   | longitude, deg * 1e7                    |
//! | 18..22 | i32   | altitude, cm                            |
//! | 22     | i8    | latitude high-precision residual        |
//! | 23     | i8    | longitude high-precision residual       |
//! | 24     | i8    | altitude high-precision residual        |
//! | 26..30 | u32   | fixed position accuracy, m * 1e4        |
//! | 30..34 | u32   | survey-in minimum duration, s           |
//! | 34..38 | u32   | survey-in accuracy limit, m * 1e4       |
//! | 46, 47 | u8    | checksum A, B over bytes 2..=45         |
//!
//! All multi-byte fields are little-endian.

pub const FRAME_LEN: usize = 48;
pub const HEADER: [u8; 6] = [0xB5, 0x62, 0x06, 0x71, 0x28, 0x00];

/// Persists the current configuration to the receiver's non-volatile storage
pub const SAVE_CONFIG: [u8; 21] = [
    0xB5, 0x62, 0x06, 0x09, 0x0D, 0x00, 0x00, 0x00, 0x00, 0x00, 0xFF, 0xFF, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x03, 0x1D, 0xAB,
];

const MODE_OFFSET: usize = 8;
const POS_TYPE_OFFSET: usize = 9;
const LAT_OFFSET: usize = 10;
const LON_OFFSET: usize = 14;
const ALT_OFFSET: usize = 18;
const LAT_HP_OFFSET: usize = 22;
const LON_HP_OFFSET: usize = 23;
const ALT_HP_OFFSET: usize = 24;
const FIXED_ACC_OFFSET: usize = 26;
const SVIN_DUR_OFFSET: usize = 30;
const SVIN_ACC_OFFSET: usize = 34;
const CK_A_OFFSET: usize = 46;
const CK_B_OFFSET: usize = 47;

const MODE_SURVEY_IN: u8 = 1;
const MODE_FIXED: u8 = 2;
const POS_TYPE_LLA: u8 = 1;

const LLA_SCALE: f64 = 1e7;
const ALT_SCALE: f64 = 100.0;
const ACC_SCALE: f64 = 10_000.0;
const HP_SCALE: f64 = 100.0;

/// Fletcher-style running sums over bytes `2..=45` of a frame
pub fn checksum(frame: &[u8; FRAME_LEN]) -> (u8, u8) {
    frame[2..CK_A_OFFSET]
        .iter()
        .fold((0u8, 0u8), |(a, b), &byte| {
            let a = a.wrapping_add(byte);
            (a, b.wrapping_add(a))
        })
}

fn new_frame(mode: u8) -> [u8; FRAME_LEN] {
    let mut frame = [0u8; FRAME_LEN];
    frame[..HEADER.len()].copy_from_slice(&HEADER);
    frame[MODE_OFFSET] = mode;
    frame
}

fn seal(mut frame: [u8; FRAME_LEN]) -> Vec<Vec<u8>> {
    let (a, b) = checksum(&frame);
    frame[CK_A_OFFSET] = a;
    frame[CK_B_OFFSET] = b;
    vec![frame.to_vec(), SAVE_CONFIG.to_vec()]
}

fn put_u32(frame: &mut [u8], offset: usize, value: u32) {
    frame[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

fn put_i32(frame: &mut [u8], offset: usize, value: i32) {
    frame[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

fn scaled_accuracy(meters: f64) -> u32 {
    (meters * ACC_SCALE).round().max(0.0) as u32
}

/// Split a scaled quantity into the stored integer and its high-precision
/// residual in hundredths of the integer's unit.
fn split_high_precision(scaled: f64) -> (i32, i8) {
    let integer = scaled.round();
    let residual = ((scaled - integer) * HP_SCALE).round();
    (integer as i32, residual as i8)
}

/// Survey-in: the receiver averages its own position for at least
/// `duration_secs` and until the estimate is better than `accuracy_m`.
pub fn survey_in(duration_secs: u32, accuracy_m: f64) -> Vec<Vec<u8>> {
    let mut frame = new_frame(MODE_SURVEY_IN);
    put_u32(&mut frame, SVIN_DUR_OFFSET, duration_secs);
    put_u32(&mut frame, SVIN_ACC_OFFSET, scaled_accuracy(accuracy_m));
    seal(frame)
}

/// Fixed position given as latitude/longitude in degrees and altitude in meters
pub fn fixed_lla(lat: f64, lon: f64, alt_m: f64, accuracy_m: f64) -> Vec<Vec<u8>> {
    let mut frame = new_frame(MODE_FIXED);
    frame[POS_TYPE_OFFSET] = POS_TYPE_LLA;

    let (lat_i, lat_hp) = split_high_precision(lat * LLA_SCALE);
    let (lon_i, lon_hp) = split_high_precision(lon * LLA_SCALE);
    let (alt_i, alt_hp) = split_high_precision(alt_m * ALT_SCALE);

    put_i32(&mut frame, LAT_OFFSET, lat_i);
    put_i32(&mut frame, LON_OFFSET, lon_i);
    put_i32(&mut frame, ALT_OFFSET, alt_i);
    frame[LAT_HP_OFFSET] = lat_hp as u8;
    frame[LON_HP_OFFSET] = lon_hp as u8;
    frame[ALT_HP_OFFSET] = alt_hp as u8;
    put_u32(&mut frame, FIXED_ACC_OFFSET, scaled_accuracy(accuracy_m));

    seal(frame)
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    fn read_u32(frame: &[u8], offset: usize) -> u32 {
        u32::from_le_bytes(frame[offset..offset + 4].try_into().unwrap())
    }

    fn read_i32(frame: &[u8], offset: usize) -> i32 {
        i32::from_le_bytes(frame[offset..offset + 4].try_into().unwrap())
    }

    fn verify_checksum(frame: &[u8]) {
        let mut a = 0u8;
        let mut b = 0u8;
        for &byte in &frame[2..46] {
            a = a.wrapping_add(byte);
            b = b.wrapping_add(a);
        }
        assert_eq!((frame[46], frame[47]), (a, b));
    }

    #[test]
    fn test_survey_in_layout() {
        for (duration, accuracy) in [(300u32, 0.01), (60, 2.5), (86_400, 0.0)] {
            let frames = survey_in(duration, accuracy);
            assert_eq!(frames.len(), 2);
            let frame = &frames[0];
            assert_eq!(frame.len(), FRAME_LEN);
            assert_eq!(&frame[..6], &HEADER);
            assert_eq!(frame[8], 1);
            assert_eq!(read_u32(frame, 30), duration);
            assert_eq!(read_u32(frame, 34), (accuracy * 10_000.0).round() as u32);
            verify_checksum(frame);
            assert_eq!(frames[1], SAVE_CONFIG.to_vec());
        }
    }

    #[test]
    fn test_survey_in_known_bytes() {
        let frames = survey_in(300, 0.01);
        let frame = &frames[0];
        // 300 s = 0x012C, 0.01 m = 100
        assert_eq!(&frame[30..34], &[0x2C, 0x01, 0x00, 0x00]);
        assert_eq!(&frame[34..38], &[0x64, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn test_fixed_lla_recovers_inputs() {
        let frames = fixed_lla(21.0285, 105.8542, 10.5, 10.0);
        let frame = &frames[0];

        assert_eq!(frame[8], 2);
        assert_eq!(frame[9], 1);

        let lat = read_i32(frame, 10) as f64 + frame[22] as i8 as f64 / 100.0;
        let lon = read_i32(frame, 14) as f64 + frame[23] as i8 as f64 / 100.0;
        let alt = read_i32(frame, 18) as f64 + frame[24] as i8 as f64 / 100.0;

        assert!((lat / 1e7 - 21.0285).abs() < 1e-9);
        assert!((lon / 1e7 - 105.8542).abs() < 1e-9);
        assert!((alt / 100.0 - 10.5).abs() < 1e-6);
        assert_eq!(read_i32(frame, 18), 1050);
        assert_eq!(read_u32(frame, 26), 100_000);
        verify_checksum(frame);
        assert_eq!(frames[1], SAVE_CONFIG.to_vec());
    }

    #[test]
    fn test_fixed_lla_southern_western_hemisphere() {
        let frames = fixed_lla(-33.856_784_123, -151.215_297_456, -5.25, 0.5);
        let frame = &frames[0];
        assert_eq!(read_i32(frame, 10), -338_567_841);
        assert_eq!(read_i32(frame, 14), -1_512_152_975);
        assert_eq!(read_i32(frame, 18), -525);

        // Sub-unit remainders land in the signed residual bytes
        let lat_hp = frame[22] as i8;
        let lon_hp = frame[23] as i8;
        assert!((-50..=50).contains(&lat_hp));
        assert!((-50..=50).contains(&lon_hp));
        let lat = (read_i32(frame, 10) as f64 + lat_hp as f64 / 100.0) / 1e7;
        assert!((lat + 33.856_784_123).abs() < 1e-9);
        verify_checksum(frame);
    }

    #[test]
    fn test_split_high_precision() {
        assert_eq!(split_high_precision(1050.0), (1050, 0));
        assert_eq!(split_high_precision(10.25), (10, 25));
        assert_eq!(split_high_precision(10.75), (11, -25));
    }
}
