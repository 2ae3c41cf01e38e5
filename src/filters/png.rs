//! PNG row predictors (`/Predictor` 10 to 15).
//!
//! Every row starts with a tag byte selecting the filter for that row, so the
//! particular predictor number 10..15 does not matter when decoding.

use crate::error::DecompressError;
use std::convert::{TryFrom, TryInto};
use std::mem;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterType {
    None,
    Sub,
    Up,
    Avg,
    Paeth,
}

impl TryFrom<u8> for FilterType {
    type Error = DecompressError;

    fn try_from(n: u8) -> Result<FilterType, DecompressError> {
        match n {
            0 => Ok(FilterType::None),
            1 => Ok(FilterType::Sub),
            2 => Ok(FilterType::Up),
            3 => Ok(FilterType::Avg),
            4 => Ok(FilterType::Paeth),
            _ => Err(DecompressError::PngFilter(n)),
        }
    }
}

fn paeth_predict(left: u8, above: u8, upperleft: u8) -> u8 {
    let (a, b, c) = (i16::from(left), i16::from(above), i16::from(upperleft));
    let estimate = a + b - c;
    let (pa, pb, pc) = ((estimate - a).abs(), (estimate - b).abs(), (estimate - c).abs());

    if pa <= pb && pa <= pc {
        left
    } else if pb <= pc {
        above
    } else {
        upperleft
    }
}

/// Reverse one row in place. `previous` is the already decoded row above (zeros for the first row).
pub fn decode_row(filter: FilterType, bpp: usize, previous: &[u8], current: &mut [u8]) {
    let len = current.len();
    let bpp = bpp.min(len);

    match filter {
        FilterType::None => (),
        FilterType::Sub => {
            for i in bpp..len {
                current[i] = current[i].wrapping_add(current[i - bpp]);
            }
        }
        FilterType::Up => {
            for i in 0..len {
                current[i] = current[i].wrapping_add(previous[i]);
            }
        }
        FilterType::Avg => {
            for i in 0..bpp {
                current[i] = current[i].wrapping_add(previous[i] / 2);
            }
            for i in bpp..len {
                let average = (u16::from(current[i - bpp]) + u16::from(previous[i])) / 2;
                current[i] = current[i].wrapping_add(average as u8);
            }
        }
        FilterType::Paeth => {
            for i in 0..bpp {
                current[i] = current[i].wrapping_add(paeth_predict(0, previous[i], 0));
            }
            for i in bpp..len {
                current[i] = current[i].wrapping_add(paeth_predict(current[i - bpp], previous[i], previous[i - bpp]));
            }
        }
    }
}

/// Decode all rows of `content`. A short final row is decoded as far as it goes.
pub fn decode_frame(content: &[u8], bytes_per_pixel: usize, bytes_per_row: usize) -> Result<Vec<u8>, DecompressError> {
    let mut previous = vec![0_u8; bytes_per_row];
    let mut current = vec![0_u8; bytes_per_row];
    let mut decoded = Vec::with_capacity(content.len());

    for row in content.chunks(bytes_per_row + 1) {
        let filter: FilterType = row[0].try_into()?;
        let data = &row[1..];
        current[..data.len()].copy_from_slice(data);
        current[data.len()..].fill(0);

        decode_row(filter, bytes_per_pixel, &previous, &mut current);
        decoded.extend_from_slice(&current[..data.len()]);
        mem::swap(&mut previous, &mut current);
    }
    Ok(decoded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn avg_uses_both_neighbours() {
        let previous = [200, 100];
        let mut current = [10, 5];
        decode_row(FilterType::Avg, 1, &previous, &mut current);
        // First byte: 10 + 200/2. Second: 5 + (110 + 100)/2.
        assert_eq!(current, [110, 110]);
    }

    #[test]
    fn paeth_rows() {
        let content = [4, 1, 2, 4, 1, 1];
        assert_eq!(decode_frame(&content, 1, 2).unwrap(), vec![1, 3, 2, 4]);
    }

    #[test]
    fn bad_row_tag() {
        assert!(matches!(decode_frame(&[7, 0, 0], 1, 2), Err(DecompressError::PngFilter(7))));
    }
}
