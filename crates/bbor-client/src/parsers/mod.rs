//! Measurement file readers.
//!
//! Each format yields a [`Histogram`]; the server only accepts the
//! two-column CSV produced by [`Histogram::to_csv_bytes`].

mod csv;
mod twota;
mod xrdml;

use std::fs;
use std::path::Path;

use crate::error::ParseError;
use crate::params::NamedBytes;

#[derive(Debug, Clone, PartialEq)]
pub struct Histogram {
    pub header: String,
    pub two_theta: Vec<f64>,
    pub counts: Vec<f64>,
}

impl Histogram {
    pub fn len(&self) -> usize {
        self.two_theta.len()
    }

    pub fn is_empty(&self) -> bool {
        self.two_theta.is_empty()
    }

    /// `angle,count` per line, no title row.
    pub fn to_csv_bytes(&self) -> Vec<u8> {
        let mut out = String::with_capacity(self.len() * 16);
        for (angle, count) in self.two_theta.iter().zip(&self.counts) {
            out.push_str(&format!("{:?},{:?}\n", angle, count));
        }
        out.into_bytes()
    }
}

/// Reads one measurement file format into a [`Histogram`].
pub trait MeasurementParser {
    /// Lowercase extensions this parser handles.
    fn extensions(&self) -> &'static [&'static str];

    fn parse(&self, name: &str, content: &str) -> Result<Histogram, ParseError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeasurementFormat {
    Csv,
    TwoTheta,
    Xrdml,
}

impl MeasurementFormat {
    pub const ALL: [MeasurementFormat; 3] = [
        MeasurementFormat::Csv,
        MeasurementFormat::TwoTheta,
        MeasurementFormat::Xrdml,
    ];

    /// Picks the format from the file extension, case-insensitively.
    pub fn from_file_name(name: &str) -> Result<Self, ParseError> {
        let ext = Path::new(name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        Self::ALL
            .into_iter()
            .find(|format| format.extensions().contains(&ext.as_str()))
            .ok_or(ParseError::UnsupportedExtension(ext))
    }
}

impl MeasurementParser for MeasurementFormat {
    fn extensions(&self) -> &'static [&'static str] {
        match self {
            MeasurementFormat::Csv => &["csv"],
            MeasurementFormat::TwoTheta => &["2ta"],
            MeasurementFormat::Xrdml => &["xrdml"],
        }
    }

    fn parse(&self, name: &str, content: &str) -> Result<Histogram, ParseError> {
        let histogram = match self {
            MeasurementFormat::Csv => csv::parse(name, content)?,
            MeasurementFormat::TwoTheta => twota::parse(name, content)?,
            MeasurementFormat::Xrdml => xrdml::parse(name, content)?,
        };
        if histogram.is_empty() {
            return Err(malformed(name, "no data points"));
        }
        Ok(histogram)
    }
}

/// Parser selected by the extension of `name`.
pub fn parser_for(name: &str) -> Result<Box<dyn MeasurementParser>, ParseError> {
    Ok(Box::new(MeasurementFormat::from_file_name(name)?))
}

/// A parsed measurement ready for upload.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedMeasurement {
    pub source_name: String,
    pub histogram: Histogram,
}

impl ParsedMeasurement {
    /// Source name with its extension replaced by `.csv`.
    pub fn csv_name(&self) -> String {
        Path::new(&self.source_name)
            .with_extension("csv")
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("{}.csv", self.source_name))
    }

    pub fn to_upload(&self) -> NamedBytes {
        NamedBytes::new(self.csv_name(), self.histogram.to_csv_bytes())
    }
}

pub fn parse_bytes(name: &str, content: &[u8]) -> Result<ParsedMeasurement, ParseError> {
    let parser = parser_for(name)?;
    let text = std::str::from_utf8(content).map_err(|_| ParseError::Encoding {
        name: name.to_string(),
    })?;
    Ok(ParsedMeasurement {
        source_name: name.to_string(),
        histogram: parser.parse(name, text)?,
    })
}

pub fn parse_file(path: &Path) -> Result<ParsedMeasurement, ParseError> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let content = fs::read(path)?;
    parse_bytes(&name, &content)
}

pub(crate) fn malformed(name: &str, reason: impl Into<String>) -> ParseError {
    ParseError::Malformed {
        name: name.to_string(),
        reason: reason.into(),
    }
}

/// A token made only of digits, sign, decimal point and exponent marker.
pub(crate) fn parse_number(token: &str) -> Option<f64> {
    if token.is_empty()
        || !token
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | '.' | 'e' | 'E'))
    {
        return None;
    }
    token.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_selection_is_case_insensitive() {
        assert_eq!(
            MeasurementFormat::from_file_name("A.XRDML").expect("xrdml"),
            MeasurementFormat::Xrdml
        );
        assert_eq!(
            MeasurementFormat::from_file_name("b.2ta").expect("2ta"),
            MeasurementFormat::TwoTheta
        );
        assert!(matches!(
            MeasurementFormat::from_file_name("c.raw"),
            Err(ParseError::UnsupportedExtension(ext)) if ext == "raw"
        ));
    }

    #[test]
    fn every_parser_extension_is_an_accepted_measurement_suffix() {
        for format in MeasurementFormat::ALL {
            for ext in format.extensions() {
                assert!(crate::config::MEASUREMENT_SUFFIXES.contains(ext), "{}", ext);
            }
        }
        assert_eq!(
            parser_for("scan.CSV").expect("csv").extensions(),
            &["csv"]
        );
    }

    #[test]
    fn csv_serialization_keeps_float_notation() {
        let histogram = Histogram {
            header: String::new(),
            two_theta: vec![10.0, 10.02],
            counts: vec![5.0, 7.5],
        };
        assert_eq!(
            String::from_utf8(histogram.to_csv_bytes()).expect("utf8"),
            "10.0,5.0\n10.02,7.5\n"
        );
    }

    #[test]
    fn upload_name_swaps_extension() {
        let parsed = parse_bytes("scan.2ta", b"10 1\n11 2\n").expect("parse");
        let upload = parsed.to_upload();
        assert_eq!(upload.name, "scan.csv");
        assert_eq!(upload.content, b"10.0,1.0\n11.0,2.0\n".to_vec());
    }

    #[test]
    fn non_utf8_content_is_rejected() {
        assert!(matches!(
            parse_bytes("x.csv", &[0xff, 0xfe, 0x00]),
            Err(ParseError::Encoding { .. })
        ));
    }

    #[test]
    fn number_tokens_reject_words() {
        assert_eq!(parse_number("-.456"), Some(-0.456));
        assert_eq!(parse_number("+7e-8"), Some(7e-8));
        assert_eq!(parse_number("nan"), None);
        assert_eq!(parse_number("abc"), None);
    }
}
