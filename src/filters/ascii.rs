//! ASCIIHexDecode and ASCII85Decode.

use crate::error::DecompressError;
use crate::lexer::is_whitespace;

/// Decode hexadecimal pairs up to `>`. Whitespace is ignored and an odd final
/// digit is completed with 0.
pub fn hex_decode(input: &[u8]) -> Result<Vec<u8>, DecompressError> {
    let mut output = Vec::with_capacity(input.len() / 2);
    let mut pending = None;

    for &c in input {
        if c == b'>' {
            break;
        }
        if is_whitespace(c) {
            continue;
        }
        let digit = (c as char).to_digit(16).ok_or(DecompressError::AsciiHex(c))? as u8;
        pending = match pending {
            None => Some(digit << 4),
            Some(high) => {
                output.push(high | digit);
                None
            }
        };
    }
    output.extend(pending);
    Ok(output)
}

/// Decode base-85 data up to `~>`, accepting an optional `<~` prefix.
pub fn ascii85_decode(input: &[u8]) -> Result<Vec<u8>, DecompressError> {
    let input = input.strip_prefix(b"<~").unwrap_or(input);
    let mut output = Vec::with_capacity(input.len() * 4 / 5);
    let mut group = [0u8; 5];
    let mut len = 0;

    for &c in input {
        match c {
            b'~' => break,
            b'z' if len == 0 => output.extend_from_slice(&[0; 4]),
            b'z' => return Err(DecompressError::Ascii85("'z' inside a group")),
            b'!'..=b'u' => {
                group[len] = c - b'!';
                len += 1;
                if len == 5 {
                    output.extend_from_slice(&group_value(&group)?.to_be_bytes());
                    len = 0;
                }
            }
            _ if is_whitespace(c) => {}
            _ => return Err(DecompressError::Ascii85("byte outside the base-85 alphabet")),
        }
    }

    match len {
        0 => {}
        1 => return Err(DecompressError::Ascii85("final group has a single digit")),
        _ => {
            group[len..].fill(b'u' - b'!');
            let bytes = group_value(&group)?.to_be_bytes();
            output.extend_from_slice(&bytes[..len - 1]);
        }
    }
    Ok(output)
}

fn group_value(group: &[u8; 5]) -> Result<u32, DecompressError> {
    let value = group.iter().fold(0u64, |acc, &digit| acc * 85 + u64::from(digit));
    u32::try_from(value).map_err(|_| DecompressError::Ascii85("group value overflows 32 bits"))
}
