//! Stream filters.
//!
//! Each filter is a plain function from bytes (plus its decode parameters) to bytes.
//! [`decode`] chains them in the order given by the stream's `/Filter` entry.

pub mod ascii;
pub mod lzw;
pub mod png;
pub mod run_length;

use crate::error::DecompressError;
use crate::{Dictionary, Error, Object, Result};
use log::warn;
use std::borrow::Cow;
use std::io::Read;

/// Apply `filters` left to right. `params[i]` holds the decode parameters of `filters[i]`;
/// missing entries count as no parameters.
///
/// Image codecs (`DCTDecode`, `JPXDecode`) are passed through when they are the final
/// filter. Any other filter without an implementation fails with
/// [`Error::UnsupportedFilter`] and the partially decoded data is dropped.
pub fn decode(input: &[u8], filters: &[&[u8]], params: &[Option<&Dictionary>]) -> Result<Vec<u8>> {
    let mut data = Cow::Borrowed(input);
    for (i, &name) in filters.iter().enumerate() {
        let params = params.get(i).copied().flatten();
        let last = i + 1 == filters.len();
        data = match name {
            b"FlateDecode" | b"Fl" => Cow::Owned(flate_decode(&data, params)?),
            b"LZWDecode" | b"LZW" => Cow::Owned(lzw::decode(&data, params)?),
            b"ASCIIHexDecode" | b"AHx" => Cow::Owned(ascii::hex_decode(&data)?),
            b"ASCII85Decode" | b"A85" => Cow::Owned(ascii::ascii85_decode(&data)?),
            b"RunLengthDecode" | b"RL" => Cow::Owned(run_length::decode(&data)),
            // Decryption has already been applied by the time filters run.
            b"Crypt" => data,
            b"DCTDecode" | b"DCT" | b"JPXDecode" if last => data,
            _ => return Err(Error::UnsupportedFilter(String::from_utf8_lossy(name).into_owned())),
        };
    }
    Ok(data.into_owned())
}

/// Inflate zlib data, then undo any predictor.
pub fn flate_decode(input: &[u8], params: Option<&Dictionary>) -> Result<Vec<u8>> {
    use flate2::read::ZlibDecoder;

    let mut output = Vec::with_capacity(input.len() * 2);
    if !input.is_empty() {
        let mut decoder = ZlibDecoder::new(input);
        if let Err(err) = decoder.read_to_end(&mut output) {
            if output.is_empty() {
                return Err(DecompressError::Flate(err).into());
            }
            warn!("flate stream is corrupt after {} bytes: {}", output.len(), err);
        }
    }
    apply_predictor(output, params)
}

fn param(params: &Dictionary, key: &[u8], default: i64) -> i64 {
    params.get(key).and_then(Object::as_i64).unwrap_or(default)
}

/// Undo the differencing selected by `/Predictor` in a Flate or LZW parameter dictionary.
pub fn apply_predictor(data: Vec<u8>, params: Option<&Dictionary>) -> Result<Vec<u8>> {
    let Some(params) = params else {
        return Ok(data);
    };
    let predictor = param(params, b"Predictor", 1);
    if predictor <= 1 {
        return Ok(data);
    }

    let colors = param(params, b"Colors", 1);
    let bits = param(params, b"BitsPerComponent", 8);
    let columns = param(params, b"Columns", 1);
    if !(1..=32).contains(&colors) || ![1, 2, 4, 8, 16].contains(&bits) || columns < 1 {
        return Err(DecompressError::Predictor("Colors, BitsPerComponent or Columns out of range").into());
    }
    if data.is_empty() {
        return Ok(data);
    }
    let (colors, bits) = (colors as usize, bits as usize);
    let bytes_per_pixel = (colors * bits).div_ceil(8);
    let bytes_per_row = usize::try_from(columns)
        .ok()
        .and_then(|columns| columns.checked_mul(colors * bits))
        .map(|row_bits| row_bits.div_ceil(8))
        .filter(|&row| row <= data.len())
        .ok_or(DecompressError::Predictor("row size exceeds the data"))?;

    match predictor {
        2 => {
            if bits != 8 {
                return Err(Error::Unsupported("TIFF predictor with BitsPerComponent other than 8"));
            }
            Ok(tiff_decode(data, colors, bytes_per_row))
        }
        10..=15 => Ok(png::decode_frame(&data, bytes_per_pixel, bytes_per_row)?),
        _ => Err(DecompressError::Predictor("unknown predictor").into()),
    }
}

/// TIFF predictor 2: every component is stored as the difference to the same
/// component of the pixel on its left.
fn tiff_decode(mut data: Vec<u8>, colors: usize, bytes_per_row: usize) -> Vec<u8> {
    for row in data.chunks_mut(bytes_per_row) {
        for i in colors..row.len() {
            row[i] = row[i].wrapping_add(row[i - colors]);
        }
    }
    data
}
