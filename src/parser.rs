// Slice-based STOMP frame parser (produces owned Vecs from input slices)

/// Raw pieces of one frame: command, headers in wire order, body, and the
/// number of input bytes consumed through the NUL terminator.
pub type RawFrame = (Vec<u8>, Vec<(Vec<u8>, Vec<u8>)>, Vec<u8>, usize);

type ParseResult = Result<Option<RawFrame>, String>;

/// Length of the end-of-line sequence at the start of `input`: 1 for LF,
/// 2 for CRLF, 0 otherwise.
pub fn eol_len(input: &[u8]) -> usize {
    match input {
        [b'\n', ..] => 1,
        [b'\r', b'\n', ..] => 2,
        _ => 0,
    }
}

fn strip_cr(line: &[u8]) -> &[u8] {
    match line.split_last() {
        Some((b'\r', rest)) => rest,
        _ => line,
    }
}

/// Parse a single STOMP frame from a raw byte slice.
///
/// The body is delimited by the first NUL byte; `content-length` is not
/// consulted. Leading EOLs are skipped.
///
/// Returns Ok(Some(..)) when a full frame was parsed, Ok(None) when more
/// bytes are required, and Err on protocol errors: an absent command line,
/// a frame that ends before the blank line closing its headers, or a header
/// line without a `:` separator.
pub fn parse_frame_slice(input: &[u8]) -> ParseResult {
    let len = input.len();
    let mut pos = 0usize;
    loop {
        let eol = eol_len(&input[pos..]);
        if eol == 0 {
            break;
        }
        pos += eol;
    }
    if pos >= len {
        return Ok(None);
    }

    // command line
    let cmd_end_rel = match input[pos..].iter().position(|&b| b == b'\n') {
        Some(i) => i,
        None if input[pos..].contains(&0) => return Err("missing command line".to_string()),
        None => return Ok(None),
    };
    let command = strip_cr(&input[pos..pos + cmd_end_rel]);
    if command.is_empty() || command.contains(&0) {
        return Err("missing command line".to_string());
    }
    let command = command.to_vec();
    pos += cmd_end_rel + 1;

    // headers until an empty line
    let mut headers: Vec<(Vec<u8>, Vec<u8>)> = Vec::new();
    loop {
        if pos >= len {
            return Ok(None);
        }
        let eol = eol_len(&input[pos..]);
        if eol > 0 {
            pos += eol;
            break;
        }
        let line_end_rel = match input[pos..].iter().position(|&b| b == b'\n') {
            Some(i) => i,
            None if input[pos..].contains(&0) => {
                return Err("missing blank line after headers".to_string());
            }
            None => return Ok(None),
        };
        let line = strip_cr(&input[pos..pos + line_end_rel]);
        if line.contains(&0) {
            return Err("missing blank line after headers".to_string());
        }
        match line.iter().position(|&b| b == b':') {
            Some(colon) => headers.push((line[..colon].to_vec(), line[colon + 1..].to_vec())),
            None => {
                return Err(format!(
                    "malformed header line: {:?}",
                    String::from_utf8_lossy(line)
                ));
            }
        }
        pos += line_end_rel + 1;
    }

    // NUL-terminated body
    match input[pos..].iter().position(|&b| b == 0) {
        Some(nul_rel) => {
            let body = input[pos..pos + nul_rel].to_vec();
            pos += nul_rel + 1;
            Ok(Some((command, headers, body, pos)))
        }
        None => Ok(None),
    }
}
