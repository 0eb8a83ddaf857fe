//! Low-level pieces of the `dataString` grammars: float text in the style the
//! Java deserializer writes, field tokenizing, and base64 blocks of
//! big-endian doubles.

use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};

use crate::error::{Result, TransformError};

/// Formats a float as the shortest text that parses back to the same value,
/// with an upper-case exponent marker and no leading zero in the exponent.
///
/// # Examples
/// ```
/// use rendertform::data_string::format_float;
/// assert_eq!(format_float(0.972637082773), "0.972637082773");
/// assert_eq!(format_float(-3.08962731867e-6), "-3.08962731867E-6");
/// assert_eq!(format_float(1e16), "1.0E+16");
/// assert_eq!(format_float(2.0), "2.0");
/// ```
pub fn format_float(value: f64) -> String {
    if value.is_infinite() {
        return if value > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    let text = format!("{:?}", value);
    match text.find('e') {
        Some(pos) => {
            let (mantissa, exponent) = text.split_at(pos);
            let exponent = &exponent[1..];
            let mantissa = if mantissa.contains('.') {
                mantissa.to_string()
            } else {
                format!("{}.0", mantissa)
            };
            match exponent.strip_prefix('-') {
                Some(magnitude) => format!("{}E-{}", mantissa, magnitude),
                None => format!("{}E+{}", mantissa, exponent),
            }
        }
        None => text,
    }
}

/// Joins floats with single spaces using [`format_float`].
pub fn join_floats<'a>(values: impl IntoIterator<Item = &'a f64>) -> String {
    values
        .into_iter()
        .map(|v| format_float(*v))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Splits a dataString into its whitespace separated fields.
pub fn fields(data_string: &str) -> Vec<&str> {
    data_string.split_whitespace().collect()
}

/// Parses one float field, naming `what` in the error.
pub fn parse_float(field: &str, what: &str) -> Result<f64> {
    field
        .parse::<f64>()
        .map_err(|e| TransformError::format(format!("invalid {} '{}': {}", what, field, e)))
}

/// Parses one non-negative integer field, naming `what` in the error.
pub fn parse_count(field: &str, what: &str) -> Result<usize> {
    field
        .parse::<usize>()
        .map_err(|e| TransformError::format(format!("invalid {} '{}': {}", what, field, e)))
}

/// Parses a run of float fields.
pub fn parse_floats(fields: &[&str], what: &str) -> Result<Vec<f64>> {
    fields.iter().map(|f| parse_float(f, what)).collect()
}

/// Encodes doubles as big-endian IEEE-754 bytes in standard base64.
pub fn encode_f64_block(values: &[f64]) -> String {
    let mut bytes = Vec::with_capacity(values.len() * 8);
    for value in values {
        bytes.extend_from_slice(&value.to_be_bytes());
    }
    BASE64_STANDARD.encode(bytes)
}

/// Decodes a base64 block of big-endian doubles.
pub fn decode_f64_block(text: &str) -> Result<Vec<f64>> {
    let bytes = BASE64_STANDARD
        .decode(text)
        .map_err(|e| TransformError::format(format!("invalid base64 block: {}", e)))?;
    if bytes.len() % 8 != 0 {
        return Err(TransformError::format(format!(
            "base64 block holds {} bytes, not a whole number of doubles",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(8)
        .map(|chunk| {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(chunk);
            f64::from_be_bytes(raw)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float_text_parses_back_exactly() {
        for value in [
            67572.7356991,
            -3.08962731867e-6,
            1.36924119761e-7,
            2.714668570418218e9,
            1.3844135530148071e19,
            0.0,
            -0.5,
        ] {
            let text = format_float(value);
            assert!(!text.contains('e'), "{}", text);
            assert!(!text.contains("E-0") && !text.contains("E+0"), "{}", text);
            assert_eq!(parse_float(&text, "value").unwrap(), value);
        }
    }

    #[test]
    fn f64_block_is_big_endian() {
        // 1.0 is 0x3FF0000000000000
        assert_eq!(encode_f64_block(&[1.0]), "P/AAAAAAAAA=");
        let values = vec![1.5, -2.25, 1e-300, 12345.678];
        assert_eq!(decode_f64_block(&encode_f64_block(&values)).unwrap(), values);
    }

    #[test]
    fn truncated_block_is_rejected() {
        let text = BASE64_STANDARD.encode([0u8; 12]);
        assert!(matches!(
            decode_f64_block(&text),
            Err(TransformError::Format(_))
        ));
        assert!(decode_f64_block("not base64!").is_err());
    }

    #[test]
    fn bad_fields_name_what_failed() {
        let err = parse_float("abc", "coefficient").unwrap_err();
        assert!(err.to_string().contains("coefficient"));
        assert!(parse_count("-1", "length").is_err());
    }
}
