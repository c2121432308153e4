//! Packing of boolean sample arrays into integer words, one bit per line.
//!
//! Digital cards address their lines in ports: all lines of a port are written together as one
//! word per sample. [`pack_bits`] builds those words from independently expanded lines.
//!
//! ```
//! use ndarray::array;
//! use pscompiler_backend::bitfield::*;
//!
//! let line0 = array![true, false, true];
//! let line3 = array![false, false, true];
//! let words = pack_bits(&[(0, line0.view()), (3, line3.view())], 8).unwrap();
//! assert_eq!(words, array![0b0001u64, 0b0000, 0b1001]);
//! assert_eq!(unpack_bit(&words, 3).unwrap(), line3);
//! ```

use std::collections::BTreeSet;

use ndarray::{Array1, ArrayView1};

use crate::error::*;

/// Widest word the packer can produce.
pub const MAX_WIDTH: usize = u64::BITS as usize;

/// Packs `lines`, each given as `(bit index, samples)`, into words of `width` bits.
///
/// Bits not covered by any line are zero. Fails with [`CompileError::BitfieldWidth`] if the
/// lines have unequal lengths, there are more lines than bits, a bit index does not fit into
/// `width`, two lines share a bit index, or `width` exceeds [`MAX_WIDTH`].
pub fn pack_bits(lines: &[(usize, ArrayView1<bool>)], width: usize) -> Result<Array1<u64>> {
    if width == 0 || width > MAX_WIDTH {
        return Err(CompileError::BitfieldWidth(format!(
            "word width must be between 1 and {MAX_WIDTH} bits, got {width}"
        )));
    }
    if lines.len() > width {
        return Err(CompileError::BitfieldWidth(format!(
            "{} lines cannot be packed into {width}-bit words",
            lines.len()
        )));
    }
    let len = lines.first().map_or(0, |(_, samples)| samples.len());
    let mut used = BTreeSet::new();
    for (bit, samples) in lines {
        if samples.len() != len {
            return Err(CompileError::BitfieldWidth(format!(
                "line at bit {bit} has {} samples, expected {len}",
                samples.len()
            )));
        }
        if *bit >= width {
            return Err(CompileError::BitfieldWidth(format!(
                "bit index {bit} does not fit into {width}-bit words"
            )));
        }
        if !used.insert(*bit) {
            return Err(CompileError::BitfieldWidth(format!(
                "bit index {bit} is assigned to more than one line"
            )));
        }
    }

    let mut words = Array1::<u64>::zeros(len);
    for (bit, samples) in lines {
        words.zip_mut_with(samples, |word, &high| *word |= (high as u64) << *bit);
    }
    Ok(words)
}

/// Extracts bit `bit` of every word.
pub fn unpack_bit(words: &Array1<u64>, bit: usize) -> Result<Array1<bool>> {
    if bit >= MAX_WIDTH {
        return Err(CompileError::BitfieldWidth(format!(
            "bit index {bit} does not fit into {MAX_WIDTH}-bit words"
        )));
    }
    Ok(words.mapv(|word| (word >> bit) & 1 == 1))
}

/// Converts an expanded digital sample array (values `0.0`/`1.0`) into booleans.
pub fn to_bool(samples: &Array1<f64>) -> Array1<bool> {
    samples.mapv(|value| value != 0.)
}

#[cfg(test)]
mod test {
    use ndarray::array;

    use crate::bitfield::*;

    #[test]
    fn packing_round_trip() {
        let lines = [
            array![true, false, true, true],
            array![false, true, true, false],
            array![true, true, false, false],
        ];
        let bits = [0, 7, 31];
        let views: Vec<(usize, ArrayView1<bool>)> = bits
            .iter()
            .zip(lines.iter())
            .map(|(&bit, line)| (bit, line.view()))
            .collect();
        let words = pack_bits(&views, 32).unwrap();
        assert_eq!(words[1], (1 << 7) | (1 << 31));
        for (bit, line) in bits.iter().zip(lines.iter()) {
            assert_eq!(&unpack_bit(&words, *bit).unwrap(), line);
        }
        // Unassigned bits stay clear
        assert!(unpack_bit(&words, 3).unwrap().iter().all(|b| !b));
    }

    #[test]
    fn full_width() {
        let line = array![true, true];
        let words = pack_bits(&[(63, line.view())], 64).unwrap();
        assert_eq!(words, array![1u64 << 63, 1u64 << 63]);
    }

    #[test]
    fn rejects_malformed_input() {
        let a = array![true, false];
        let b = array![true];
        fn err(lines: &[(usize, ArrayView1<bool>)], width: usize) -> CompileError {
            pack_bits(lines, width).unwrap_err()
        }

        assert!(matches!(err(&[(0, a.view()), (1, b.view())], 8), CompileError::BitfieldWidth(_)));
        assert!(matches!(err(&[(8, a.view())], 8), CompileError::BitfieldWidth(_)));
        assert!(matches!(err(&[(2, a.view()), (2, a.view())], 8), CompileError::BitfieldWidth(_)));
        assert!(matches!(
            err(&[(0, a.view()), (1, a.view()), (2, a.view())], 2),
            CompileError::BitfieldWidth(_)
        ));
        assert!(matches!(err(&[(0, a.view())], 65), CompileError::BitfieldWidth(_)));
    }

    #[test]
    fn bool_conversion() {
        assert_eq!(to_bool(&array![0., 1., 1., 0.]), array![false, true, true, false]);
    }
}
