//! # NMEA Checksum
//!
//! 8-bit XOR of every byte strictly between `$` and `*`, printed as two
//! uppercase hex digits.

/// XOR checksum over a sentence body (the part between `$` and `*`)
///
/// # Examples
///
/// ```
/// use starlink_gps_bridge::nmea::checksum::nmea_checksum;
///
/// assert_eq!(nmea_checksum("GPVTG,0.0,T,,M,0.0,N,0.0,K,"), 0x4C);
/// ```
pub fn nmea_checksum(body: &str) -> u8 {
    body.bytes().fold(0u8, |acc, byte| acc ^ byte)
}

/// Wrap a sentence body as `$<body>*HH`
pub fn frame_sentence(body: &str) -> String {
    format!("${}*{:02X}", body, nmea_checksum(body))
}

/// Split a framed sentence into body and checksum and verify it
///
/// Returns the body on success. Sentences without a `*HH` suffix are accepted
/// as-is; some receivers omit the checksum.
///
/// # Errors
///
/// Returns a description of the problem when the sentence does not start with
/// `$`, the checksum is not two hex digits, or it does not match.
pub fn verify_sentence(sentence: &str) -> Result<&str, String> {
    let sentence = sentence.trim_end_matches(['\r', '\n']);
    let rest = sentence
        .strip_prefix('$')
        .ok_or_else(|| format!("sentence does not start with '$': {:?}", sentence))?;

    let Some((body, checksum)) = rest.rsplit_once('*') else {
        return Ok(rest);
    };

    let expected = u8::from_str_radix(checksum, 16)
        .map_err(|_| format!("bad checksum field {:?}", checksum))?;
    let actual = nmea_checksum(body);

    if checksum.len() != 2 || expected != actual {
        return Err(format!(
            "checksum mismatch: expected {:02X}, got {:02X}",
            actual, expected
        ));
    }

    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_empty() {
        assert_eq!(nmea_checksum(""), 0x00);
    }

    #[test]
    fn test_checksum_known_sentence() {
        // Widely published reference sentence
        let body = "GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,";
        assert_eq!(nmea_checksum(body), 0x47);
    }

    #[test]
    fn test_frame_sentence_format() {
        let framed = frame_sentence("GPVTG,0.0,T,,M,0.0,N,0.0,K,");
        assert_eq!(framed, "$GPVTG,0.0,T,,M,0.0,N,0.0,K,*4C");
    }

    #[test]
    fn test_frame_sentence_uppercase_hex() {
        let framed = frame_sentence("GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,");
        assert!(framed.ends_with("*47"));

        let framed = frame_sentence("z");
        assert!(framed.ends_with("*7A"));
    }

    #[test]
    fn test_verify_accepts_valid() {
        let body = verify_sentence("$GPVTG,0.0,T,,M,0.0,N,0.0,K,*4C\r\n").unwrap();
        assert_eq!(body, "GPVTG,0.0,T,,M,0.0,N,0.0,K,");
    }

    #[test]
    fn test_verify_rejects_mismatch() {
        assert!(verify_sentence("$GPVTG,0.0,T,,M,0.0,N,0.0,K,*4D").is_err());
        assert!(verify_sentence("$GPVTG,0.0,T,,M,0.0,N,0.0,K,*ZZ").is_err());
        assert!(verify_sentence("GPVTG,0.0,T,,M,0.0,N,0.0,K,*4C").is_err());
    }

    #[test]
    fn test_verify_without_checksum() {
        assert_eq!(verify_sentence("$GPTXT,hello").unwrap(), "GPTXT,hello");
    }
}
