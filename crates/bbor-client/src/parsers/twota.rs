use super::{malformed, parse_number, Histogram};
use crate::error::ParseError;

/// Headerless `angle counts` rows separated by whitespace.
pub(super) fn parse(name: &str, content: &str) -> Result<Histogram, ParseError> {
    let mut two_theta = Vec::new();
    let mut counts = Vec::new();
    for (i, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let mut columns = line.split_whitespace().map(parse_number);
        match (columns.next().flatten(), columns.next().flatten()) {
            (Some(angle), Some(count)) => {
                two_theta.push(angle);
                counts.push(count);
            }
            _ => return Err(malformed(name, format!("line {} is not numeric", i + 1))),
        }
    }
    Ok(Histogram {
        header: String::new(),
        two_theta,
        counts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_two_columns() {
        let histogram = parse("a.2ta", "10.0 12\n10.1 15\n\n").expect("parse");
        assert_eq!(histogram.two_theta, vec![10.0, 10.1]);
        assert_eq!(histogram.counts, vec![12.0, 15.0]);
        assert!(histogram.header.is_empty());
    }

    #[test]
    fn text_rows_are_rejected() {
        let err = parse("a.2ta", "angle counts\n10 1\n").expect_err("header not allowed");
        assert!(err.to_string().contains("line 1"), "{}", err);
    }
}
