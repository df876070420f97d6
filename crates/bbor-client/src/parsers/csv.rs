use super::{malformed, parse_number, Histogram};
use crate::error::ParseError;

/// Consecutive numeric lines needed to accept the start of the data block.
const MIN_MATCHING_LINES: usize = 10;
/// The data block has to start within this many lines.
const MAX_READ_LINES: usize = 200;

fn split_columns(line: &str) -> impl Iterator<Item = &str> {
    line.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|t| !t.is_empty())
}

/// Two or more numeric columns separated by commas or whitespace.
fn is_data_line(line: &str) -> bool {
    let mut columns = 0;
    for token in split_columns(line) {
        if parse_number(token).is_none() {
            return false;
        }
        columns += 1;
    }
    columns >= 2
}

fn data_start(name: &str, lines: &[&str]) -> Result<usize, ParseError> {
    let mut run = 0;
    for (i, line) in lines.iter().enumerate() {
        if is_data_line(line) {
            run += 1;
            if run >= MIN_MATCHING_LINES {
                return Ok(i + 1 - run);
            }
        } else {
            if i >= MAX_READ_LINES {
                return Err(malformed(name, "cannot locate the numeric data block"));
            }
            run = 0;
        }
    }
    Err(malformed(name, "measurement file too short"))
}

/// Free-form header followed by a numeric block; columns 1 and 2 are used.
pub(super) fn parse(name: &str, content: &str) -> Result<Histogram, ParseError> {
    let lines: Vec<&str> = content.lines().collect();
    let start = data_start(name, &lines)?;
    let header = lines[..start].join("\n");

    let mut two_theta = Vec::new();
    let mut counts = Vec::new();
    for (offset, line) in lines[start..].iter().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let mut columns = split_columns(line).map(parse_number);
        match (columns.next().flatten(), columns.next().flatten()) {
            (Some(angle), Some(count)) => {
                two_theta.push(angle);
                counts.push(count);
            }
            _ => {
                return Err(malformed(
                    name,
                    format!("line {} is not numeric", start + offset + 1),
                ))
            }
        }
    }
    Ok(Histogram {
        header,
        two_theta,
        counts,
    })
}
