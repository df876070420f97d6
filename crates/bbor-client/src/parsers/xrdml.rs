use super::{malformed, parse_number, Histogram};
use crate::error::ParseError;

/// Byte range of the text between `<tag ...>` and `</tag>`, searching from `from`.
fn element_text(content: &str, tag: &str, from: usize) -> Option<(usize, usize)> {
    let open = format!("<{}", tag);
    let close = format!("</{}>", tag);
    let mut search = from;
    loop {
        let start = search + content[search..].find(&open)?;
        let after_name = start + open.len();
        // Reject longer tag names sharing the prefix, e.g. <countsExtra>.
        let next = content[after_name..].chars().next()?;
        if next == '>' || next.is_whitespace() {
            let body_start = after_name + content[after_name..].find('>')? + 1;
            let body_end = body_start + content[body_start..].find(&close)?;
            return Some((body_start, body_end));
        }
        search = after_name;
    }
}

fn number_in(name: &str, content: &str, tag: &str, from: usize) -> Result<f64, ParseError> {
    let (start, end) = element_text(content, tag, from)
        .ok_or_else(|| malformed(name, format!("missing <{}>", tag)))?;
    parse_number(content[start..end].trim())
        .ok_or_else(|| malformed(name, format!("<{}> is not numeric", tag)))
}

/// Offset of the `<positions>` element for the 2Theta axis.
fn two_theta_positions(content: &str) -> Option<usize> {
    let mut search = 0;
    while let Some(found) = content[search..].find("<positions") {
        let start = search + found;
        let tag_end = start + content[start..].find('>')?;
        let tag = &content[start..tag_end];
        if tag.contains("axis=\"2Theta\"") || tag.contains("axis='2Theta'") {
            return Some(start);
        }
        search = tag_end;
    }
    None
}

/// Reads the scan of an XRDML document.
///
/// Angles are spaced evenly between the start and end positions of the
/// 2Theta axis. Other axes never supply the range.
pub(super) fn parse(name: &str, content: &str) -> Result<Histogram, ParseError> {
    let (counts_start, counts_end) = element_text(content, "counts", 0)
        .ok_or_else(|| malformed(name, "missing <counts>"))?;
    let counts = content[counts_start..counts_end]
        .split_whitespace()
        .map(|t| {
            parse_number(t).ok_or_else(|| malformed(name, format!("count {:?} is not numeric", t)))
        })
        .collect::<Result<Vec<f64>, _>>()?;
    if counts.len() < 2 {
        return Err(malformed(name, "fewer than two counts"));
    }

    let (axis_start, axis_end) = two_theta_positions(content)
        .and_then(|at| element_text(content, "positions", at))
        .ok_or_else(|| malformed(name, "missing 2Theta positions"))?;
    let axis = &content[axis_start..axis_end];
    let start = number_in(name, axis, "startPosition", 0)?;
    let end = number_in(name, axis, "endPosition", 0)?;
    let step = (end - start) / (counts.len() - 1) as f64;
    let two_theta = (0..counts.len()).map(|i| start + i as f64 * step).collect();

    let header = format!("{}{}", &content[..counts_start], &content[counts_end..]);
    Ok(Histogram {
        header,
        two_theta,
        counts,
    })
}
