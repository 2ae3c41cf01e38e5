use crate::error::DecompressError;
use crate::{Dictionary, Object, Result};
use log::warn;
use weezl::{BitOrder, decode::Decoder};

/// LZWDecode. `/EarlyChange` defaults to 1, where the code width grows one code
/// early, which is the TIFF convention.
pub fn decode(input: &[u8], params: Option<&Dictionary>) -> Result<Vec<u8>> {
    let early_change = params
        .and_then(|p| p.get(b"EarlyChange").and_then(Object::as_i64).ok())
        .unwrap_or(1);

    let mut decoder = if early_change == 0 {
        Decoder::new(BitOrder::Msb, 8)
    } else {
        Decoder::with_tiff_size_switch(BitOrder::Msb, 8)
    };
    let mut output = Vec::with_capacity(input.len() * 2);
    let result = decoder.into_vec(&mut output).decode(input);
    if let Err(err) = result.status {
        if output.is_empty() {
            return Err(DecompressError::Lzw(err.to_string()).into());
        }
        warn!("LZW stream is corrupt after {} bytes: {}", output.len(), err);
    }
    super::apply_predictor(output, params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dictionary;
    use weezl::encode::Encoder;

    #[test]
    fn reference_example() {
        let encoded = [0x80, 0x0B, 0x60, 0x50, 0x22, 0x0C, 0x0C, 0x85, 0x01];
        assert_eq!(decode(&encoded, None).unwrap(), b"-----A---B");
    }

    #[test]
    fn early_change_selects_code_width_switch() {
        let data: Vec<u8> = (0..3000u32).map(|i| (i % 97) as u8 ^ (i / 97) as u8).collect();

        let early = Encoder::with_tiff_size_switch(BitOrder::Msb, 8).encode(&data).unwrap();
        assert_eq!(decode(&early, None).unwrap(), data);

        let late = Encoder::new(BitOrder::Msb, 8).encode(&data).unwrap();
        let params = dictionary! { "EarlyChange" => 0 };
        assert_eq!(decode(&late, Some(&params)).unwrap(), data);
    }
}
