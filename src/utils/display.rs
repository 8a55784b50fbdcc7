use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};

/// Convert an ASN (4 byte) as dotted if it exceeds the 2-byte limit
/// E.g. 4259840100 -> "65000.100"
pub fn u32_to_dotted(asn: u32, sep: char) -> String {
    if asn <= u32::from(u16::MAX) {
        format!("{}", asn)
    } else {
        format!("{}{}{}", asn >> 16, sep, asn & 0xffff)
    }
}

fn fit_with_remainder(dividend: u64, divisor: u64) -> (u64, u64) {
    let fit = dividend / divisor;
    let remainder = dividend % divisor;
    (fit, remainder)
}

pub fn get_elapsed_time<Tz>(time: DateTime<Tz>) -> chrono::Duration
where
    Tz: TimeZone,
{
    Utc::now().signed_duration_since(time)
}

/// Given a duration, format like "00:00:00"
pub fn format_elapsed_time(elapsed: Duration) -> String {
    let elapsed = elapsed.as_secs();
    let (hours, remainder) = fit_with_remainder(elapsed, 3600);
    let (minutes, seconds) = fit_with_remainder(remainder, 60);
    format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
}

/// Given a timestamp, get the elapsed time and return formatted string
pub fn format_time_as_elapsed<Tz>(time: DateTime<Tz>) -> String
where
    Tz: TimeZone,
{
    let elapsed = get_elapsed_time(time).to_std().unwrap_or_default();
    format_elapsed_time(elapsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_u32_to_dotted() {
        assert_eq!(u32_to_dotted(100, '.'), "100".to_string());
        assert_eq!(u32_to_dotted(65535, '.'), "65535".to_string());
        assert_eq!(u32_to_dotted(4259840100, '.'), "65000.100".to_string());
    }

    #[test]
    fn test_format_elapsed_time() {
        assert_eq!(format_elapsed_time(Duration::from_secs(0)), "00:00:00");
        assert_eq!(format_elapsed_time(Duration::from_secs(3725)), "01:02:05");
    }

    #[test]
    fn test_format_time_as_elapsed() {
        let then = Utc::now() - chrono::Duration::seconds(61);
        assert_eq!(format_time_as_elapsed(then), "00:01:01");
    }
}
