/// RunLengthDecode.
///
/// A length byte below 128 copies the next `length + 1` bytes, above 128 repeats the
/// next byte `257 - length` times, and 128 ends the data. A truncated run copies what
/// is there.
pub fn decode(input: &[u8]) -> Vec<u8> {
    let mut output = Vec::with_capacity(input.len() * 2);
    let mut pos = 0;

    while let Some(&length) = input.get(pos) {
        pos += 1;
        match length {
            128 => break,
            0..=127 => {
                let end = (pos + length as usize + 1).min(input.len());
                output.extend_from_slice(&input[pos..end]);
                pos = end;
            }
            _ => {
                if let Some(&byte) = input.get(pos) {
                    output.extend(std::iter::repeat_n(byte, 257 - length as usize));
                }
                pos += 1;
            }
        }
    }
    output
}
