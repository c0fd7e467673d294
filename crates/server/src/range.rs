/// An inclusive byte span within a file of known size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    pub fn content_range(&self, size: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, size)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeError {
    /// Malformed, multi-range or non-byte units.
    Invalid,
    /// Well formed but starts past the end of the file.
    Unsatisfiable,
}

/// Parses a single `Range: bytes=...` value against a file of `size` bytes.
/// Open ends and overlong ends are clamped to the last byte.
pub fn parse_range_header(value: &str, size: u64) -> Result<ByteRange, RangeError> {
    let (unit, ranges) = value.trim().split_once('=').ok_or(RangeError::Invalid)?;
    if !unit.trim().eq_ignore_ascii_case("bytes") || ranges.contains(',') {
        return Err(RangeError::Invalid);
    }
    let (first, last) = ranges.trim().split_once('-').ok_or(RangeError::Invalid)?;
    let parse = |s: &str| s.trim().parse::<u64>().map_err(|_| RangeError::Invalid);

    if first.trim().is_empty() {
        let suffix = parse(last)?;
        if suffix == 0 || size == 0 {
            return Err(RangeError::Unsatisfiable);
        }
        return Ok(ByteRange {
            start: size.saturating_sub(suffix),
            end: size - 1,
        });
    }

    let start = parse(first)?;
    let end = if last.trim().is_empty() {
        None
    } else {
        Some(parse(last)?)
    };
    if let Some(end) = end {
        if end < start {
            return Err(RangeError::Invalid);
        }
    }
    if start >= size {
        return Err(RangeError::Unsatisfiable);
    }
    let last_byte = size - 1;
    Ok(ByteRange {
        start,
        end: end.map_or(last_byte, |end| end.min(last_byte)),
    })
}
