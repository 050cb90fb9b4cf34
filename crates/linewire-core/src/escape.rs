//! Backslash escape grammar for transmitted lines.
//!
//! A logical line may carry literal delimiter bytes by escaping them. The
//! grammar is a wire-format contract and is versioned by
//! [`ESCAPE_GRAMMAR_VERSION`]:
//!
//! | Input      | Output      |
//! |------------|-------------|
//! | `\\`       | `\`         |
//! | `\n`       | LF (`0x0A`) |
//! | `\r`       | CR (`0x0D`) |
//! | `\` + other byte | both bytes unchanged |
//! | trailing lone `\` | `\` unchanged |
//!
//! Escapes never nest: the output of one escape is not rescanned.

/// Version of the escape grammar implemented by [`unescape`].
pub const ESCAPE_GRAMMAR_VERSION: u32 = 1;

const BACKSLASH: u8 = b'\\';

/// Resolve escapes in a raw line, returning the decoded line.
///
/// Lines without a backslash are returned as-is with no allocation.
/// The output is never longer than the input.
pub fn unescape(raw: Vec<u8>) -> Vec<u8> {
    let Some(first) = raw.iter().position(|&b| b == BACKSLASH) else {
        return raw;
    };

    let mut out = Vec::with_capacity(raw.len());
    out.extend_from_slice(&raw[..first]);

    let mut bytes = raw[first..].iter().copied();
    while let Some(b) = bytes.next() {
        if b != BACKSLASH {
            out.push(b);
            continue;
        }
        match bytes.next() {
            Some(BACKSLASH) => out.push(BACKSLASH),
            Some(b'n') => out.push(b'\n'),
            Some(b'r') => out.push(b'\r'),
            Some(other) => {
                out.push(BACKSLASH);
                out.push(other);
            }
            // Incomplete escape at end of line.
            None => out.push(BACKSLASH),
        }
    }
    out
}
