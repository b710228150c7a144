//! Unicore text commands
//!
//! Each command is a single ASCII buffer of CRLF-terminated lines ending with
//! `SAVECONFIG`.

const SAVE: &str = "SAVECONFIG\r\n";

/// Render a decimal the way the station firmware tooling writes it: shortest
/// round-trip digits, integral values keep one fractional digit.
pub fn format_decimal(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e16 {
        format!("{value:.1}")
    } else {
        format!("{value}")
    }
}

/// `MODE BASE TIME <duration> [<accuracy>]`, accuracy omitted when not positive
pub fn survey_in(duration_secs: u32, accuracy_m: f64) -> Vec<Vec<u8>> {
    let line = if accuracy_m > 0.0 {
        format!(
            "MODE BASE TIME {} {}\r\n",
            duration_secs,
            format_decimal(accuracy_m)
        )
    } else {
        format!("MODE BASE TIME {duration_secs}\r\n")
    };
    vec![format!("{line}{SAVE}").into_bytes()]
}

/// `MODE BASE <lat> <lon> <alt>`
pub fn fixed_lla(lat: f64, lon: f64, alt_m: f64) -> Vec<Vec<u8>> {
    let line = format!(
        "MODE BASE {} {} {}\r\n",
        format_decimal(lat),
        format_decimal(lon),
        format_decimal(alt_m)
    );
    vec![format!("{line}{SAVE}").into_bytes()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_decimal() {
        assert_eq!(format_decimal(10.0), "10.0");
        assert_eq!(format_decimal(0.5), "0.5");
        assert_eq!(format_decimal(-105.8542), "-105.8542");
        assert_eq!(format_decimal(21.0285), "21.0285");
    }

    #[test]
    fn test_survey_in_with_accuracy() {
        let cmds = survey_in(300, 2.5);
        assert_eq!(cmds, vec![b"MODE BASE TIME 300 2.5\r\nSAVECONFIG\r\n".to_vec()]);
    }

    #[test]
    fn test_survey_in_without_accuracy() {
        let cmds = survey_in(120, 0.0);
        assert_eq!(cmds, vec![b"MODE BASE TIME 120\r\nSAVECONFIG\r\n".to_vec()]);
        assert_eq!(survey_in(120, -1.0), cmds);
    }

    #[test]
    fn test_fixed_lla() {
        let cmds = fixed_lla(21.0285, 105.8542, 10.0);
        assert_eq!(
            String::from_utf8(cmds[0].clone()).ok().as_deref(),
            Some("MODE BASE 21.0285 105.8542 10.0\r\nSAVECONFIG\r\n")
        );
    }
}
