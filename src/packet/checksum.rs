// internet checksum (rfc 1071) helpers

/// Add the big-endian 16-bit words of `data` to `sum`.
///
/// An odd trailing byte is treated as the high byte of a zero-padded word.
pub fn sum_words(mut sum: u32, data: &[u8]) -> u32 {
    let mut chunks = data.chunks_exact(2);
    for word in &mut chunks {
        sum += u32::from(u16::from_be_bytes([word[0], word[1]]));
    }
    if let [last] = chunks.remainder() {
        sum += u32::from(*last) << 8;
    }
    sum
}

/// Fold the carries back into 16 bits.
pub fn fold(mut sum: u32) -> u16 {
    while sum > 0xffff {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    sum as u16
}

/// One's complement of the folded sum, ready to be written in a checksum field.
pub fn finish(sum: u32) -> u16 {
    !fold(sum)
}

/// A region whose checksum field is correct sums (folded) to 0xffff.
pub fn verify(sum: u32) -> bool {
    fold(sum) == 0xffff
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rfc1071_example() {
        // example from rfc 1071, section 3
        let data = [0x00, 0x01, 0xf2, 0x03, 0xf4, 0xf5, 0xf6, 0xf7];
        assert_eq!(fold(sum_words(0, &data)), 0xddf2);
        assert_eq!(finish(sum_words(0, &data)), !0xddf2);
    }

    #[test]
    fn test_odd_length_is_padded() {
        assert_eq!(sum_words(0, &[0x12]), 0x1200);
        assert_eq!(sum_words(0, &[0x12, 0x34, 0x56]), 0x1234 + 0x5600);
    }

    #[test]
    fn test_verify_after_finish() {
        let mut data = vec![0x45, 0x00, 0x00, 0x1c, 0x12, 0x34, 0x00, 0x00];
        let checksum = finish(sum_words(0, &data));
        data.extend_from_slice(&checksum.to_be_bytes());
        assert!(verify(sum_words(0, &data)));
    }
}
