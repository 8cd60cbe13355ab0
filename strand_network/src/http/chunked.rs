use super::FramingError;

/// Longest chunk-size line accepted, extensions included
const MAX_SIZE_LINE: usize = 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Size,
    Data(usize),
    DataEnd,
    Trailer,
    Done,
}

/// Incremental decoder for `Transfer-Encoding: chunked` content.
#[derive(Clone, Debug)]
pub struct ChunkedDecoder {
    state: State,
}

impl Default for ChunkedDecoder {
    fn default() -> Self {
        Self::new()
    }
}

fn line_end(input: &[u8]) -> Option<usize> {
    input.windows(2).position(|w| w == b"\r\n")
}

/// Append as much of `bytes` as fits in `limit` total bytes, returning how
/// many were taken. The allocation behind `out` never grows past `limit`.
pub fn extend_capped(out: &mut Vec<u8>, bytes: &[u8], limit: usize) -> usize {
    let take = bytes.len().min(limit.saturating_sub(out.len()));
    let needed = out.len() + take;
    if needed > out.capacity() {
        let grown = out.capacity().saturating_mul(2).max(needed).min(limit);
        out.reserve_exact(grown - out.len());
    }
    out.extend_from_slice(&bytes[..take]);
    take
}

impl ChunkedDecoder {
    pub fn new() -> Self {
        Self { state: State::Size }
    }

    /// Whether the terminating chunk and trailer have been seen
    pub fn is_done(&self) -> bool {
        self.state == State::Done
    }

    /// Decode what can be decoded from `input`, appending content to `out`.
    ///
    /// Returns the number of input bytes consumed; the rest must be offered
    /// again with more appended. Content is taken up to `limit` total bytes
    /// in `out`; anything beyond that is an error.
    pub fn decode(
        &mut self,
        input: &[u8],
        out: &mut Vec<u8>,
        limit: usize,
    ) -> Result<usize, FramingError> {
        let mut pos = 0;

        loop {
            let rest = &input[pos..];
            match self.state {
                State::Done => return Ok(pos),
                State::Size => {
                    let end = match line_end(rest) {
                        Some(end) => end,
                        None if rest.len() > MAX_SIZE_LINE => {
                            return Err(FramingError::Chunk("size line too long"))
                        }
                        None => return Ok(pos),
                    };
                    let line = std::str::from_utf8(&rest[..end])
                        .map_err(|_| FramingError::Chunk("size is not text"))?;
                    let size = line.split(';').next().unwrap_or("").trim();
                    let size = usize::from_str_radix(size, 16)
                        .map_err(|_| FramingError::Chunk("invalid size"))?;

                    pos += end + 2;
                    self.state = if size == 0 {
                        State::Trailer
                    } else {
                        State::Data(size)
                    };
                }
                State::Data(remaining) => {
                    if rest.is_empty() {
                        return Ok(pos);
                    }
                    let take = remaining.min(rest.len());
                    let taken = extend_capped(out, &rest[..take], limit);
                    pos += taken;
                    if taken < take {
                        return Err(FramingError::ContentTooLarge(limit));
                    }
                    self.state = if take == remaining {
                        State::DataEnd
                    } else {
                        State::Data(remaining - take)
                    };
                }
                State::DataEnd => {
                    if rest.len() < 2 {
                        return Ok(pos);
                    }
                    if &rest[..2] != b"\r\n" {
                        return Err(FramingError::Chunk("missing chunk terminator"));
                    }
                    pos += 2;
                    self.state = State::Size;
                }
                State::Trailer => {
                    let end = match line_end(rest) {
                        Some(end) => end,
                        None if rest.len() > MAX_SIZE_LINE => {
                            return Err(FramingError::Chunk("trailer line too long"))
                        }
                        None => return Ok(pos),
                    };
                    pos += end + 2;
                    if end == 0 {
                        self.state = State::Done;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_across_reads() {
        let wire = b"4\r\nWiki\r\n5;ext=1\r\npedia\r\n0\r\nExpires: never\r\n\r\nNEXT";
        let mut decoder = ChunkedDecoder::new();
        let mut out = Vec::new();
        let mut pending = Vec::new();
        let mut consumed_total = 0;

        for piece in wire.chunks(3) {
            pending.extend_from_slice(piece);
            let used = decoder.decode(&pending, &mut out, 1024).unwrap();
            pending.drain(..used);
            consumed_total += used;
            if decoder.is_done() {
                break;
            }
        }

        assert!(decoder.is_done());
        assert_eq!(&out[..], b"Wikipedia");
        assert_eq!(consumed_total, wire.len() - 4);
    }

    #[test]
    fn enforces_limit() {
        let mut decoder = ChunkedDecoder::new();
        let mut out = Vec::new();
        assert_eq!(
            decoder.decode(b"a\r\n0123456789\r\n0\r\n\r\n", &mut out, 8),
            Err(FramingError::ContentTooLarge(8))
        );
        assert_eq!(out, b"01234567");
        assert!(out.capacity() <= 8);
    }

    #[test]
    fn capped_growth() {
        let mut out = Vec::new();
        assert_eq!(extend_capped(&mut out, b"abc", 5), 3);
        assert_eq!(extend_capped(&mut out, b"defg", 5), 2);
        assert_eq!(extend_capped(&mut out, b"h", 5), 0);
        assert_eq!(out, b"abcde");
        assert!(out.capacity() <= 5);
    }

    #[test]
    fn rejects_garbage() {
        let mut decoder = ChunkedDecoder::new();
        let mut out = Vec::new();
        assert!(decoder.decode(b"zz\r\n", &mut out, 8).is_err());
    }
}
