//! Register-level decoding for the inverter's `Data` array.
//!
//! Positions and scales are the vendor protocol; see the register table this
//! module encodes as named constants rather than magic indices scattered
//! through the decoder.

/// `value mod 256`, for fields the vendor packs into a single byte but
/// transmits as a wider integer.
pub fn unsigned_8(value: i64) -> u8 {
    value.rem_euclid(256) as u8
}

/// Two's-complement 16-bit wraparound.
pub fn signed_16(value: i64) -> i32 {
    if value > 32767 {
        (value - 65536) as i32
    } else {
        value as i32
    }
}

/// Unsigned 32-bit composed from a (low, high) 16-bit word pair.
pub fn unsigned_32(low_word: i64, high_word: i64) -> u32 {
    (high_word * 65536 + low_word) as u32
}

/// Signed 32-bit composed from a (low, high) 16-bit word pair.
pub fn signed_32(low_word: i64, high_word: i64) -> i32 {
    if high_word < 32768 {
        (65536 * high_word + low_word) as i32
    } else {
        (low_word + 65536 * high_word - 4_294_967_296) as i32
    }
}

/// `value` if non-negative, else 0. Used to split a signed flow into its
/// positive-direction view.
pub fn positive(value: f64) -> f64 {
    if value >= 0.0 {
        value
    } else {
        0.0
    }
}

/// `-value` if that is non-negative, else 0. The complementary view of
/// [`positive`] for the opposite flow direction.
pub fn invert_positive(value: f64) -> f64 {
    let inverted = -value;
    if inverted >= 0.0 {
        inverted
    } else {
        0.0
    }
}

pub(crate) const POS_AC_VOLTAGE: usize = 4;
pub(crate) const POS_AC_CURRENT: usize = 5;
pub(crate) const POS_AC_POWER: usize = 6;
pub(crate) const POS_AC_FREQUENCY: usize = 7;
pub(crate) const POS_RUN_MODE: usize = 10;
pub(crate) const POS_STRING_VOLTAGE: [usize; 3] = [11, 12, 13];
pub(crate) const POS_STRING_CURRENT: [usize; 3] = [15, 16, 17];
pub(crate) const POS_STRING_POWER: [usize; 3] = [19, 20, 21];
pub(crate) const POS_GRID_POWER_LOW: usize = 28;
pub(crate) const POS_GRID_POWER_HIGH: usize = 29;
pub(crate) const POS_TO_HOME: usize = 30;
pub(crate) const POS_IMPORTED_TOTAL_LOW: usize = 37;
pub(crate) const POS_IMPORTED_TOTAL_HIGH: usize = 38;
pub(crate) const POS_IMPORTED_TODAY: usize = 39;
pub(crate) const POS_YIELD_TOTAL_LOW: usize = 41;
pub(crate) const POS_YIELD_TOTAL_HIGH: usize = 42;
pub(crate) const POS_YIELD_TODAY: usize = 43;
pub(crate) const POS_BATTERY_VOLTAGE: usize = 89;
pub(crate) const POS_BATTERY_POWER: usize = 91;
pub(crate) const POS_BATTERY_TEMPERATURE: usize = 92;
pub(crate) const POS_BATTERY_SOC: usize = 93;

/// Highest register position this decoder touches; a shorter array is a
/// protocol error.
pub(crate) const MIN_ARRAY_LEN: usize = POS_BATTERY_SOC + 1;

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn unsigned_8_wraps() {
        assert_eq!(unsigned_8(10), 10);
        assert_eq!(unsigned_8(256), 0);
        assert_eq!(unsigned_8(257), 1);
    }

    #[test]
    fn signed_16_examples() {
        assert_eq!(signed_16(0), 0);
        assert_eq!(signed_16(32767), 32767);
        assert_eq!(signed_16(32768), -32768);
        assert_eq!(signed_16(65535), -1);
    }

    #[test]
    fn unsigned_32_composes_words() {
        assert_eq!(unsigned_32(100, 1), 65636);
    }

    #[test]
    fn signed_32_examples() {
        assert_eq!(signed_32(100, 0), 100);
        assert_eq!(signed_32(0, 65535), -65536);
    }

    #[test]
    fn positive_and_invert_positive_are_complementary() {
        assert_eq!(positive(500.0), 500.0);
        assert_eq!(positive(-500.0), 0.0);
        assert_eq!(invert_positive(500.0), 0.0);
        assert_eq!(invert_positive(-500.0), 500.0);
    }

    proptest! {
        #[test]
        fn signed_16_roundtrips_through_its_own_wire_encoding(v in -32768i32..=32767i32) {
            let wire = if v < 0 { (v + 65536) as i64 } else { v as i64 };
            prop_assert_eq!(signed_16(wire), v);
        }

        #[test]
        fn signed_32_roundtrips_through_its_own_wire_encoding(v in i32::MIN..=i32::MAX) {
            let unsigned = v as i64 as u32 as u64;
            let low = (unsigned & 0xFFFF) as i64;
            let high = (unsigned >> 16) as i64;
            prop_assert_eq!(signed_32(low, high), v);
        }

        #[test]
        fn unsigned_32_roundtrips_through_its_own_wire_encoding(low in 0i64..65536, high in 0i64..65536) {
            let composed = unsigned_32(low, high);
            prop_assert_eq!(composed as i64, high * 65536 + low);
        }
    }
}
