//! 8-bit arithmetic with carry and borrow.

/// Add with carry-in, returning `(acc + operand + carry_in) mod 256` and the
/// carry out (true when the unmasked sum exceeds 255).
#[inline]
pub fn add(acc: u8, operand: u8, carry_in: bool) -> (u8, bool) {
    let sum = acc as u16 + operand as u16 + carry_in as u16;
    (sum as u8, sum > 0xFF)
}

/// Subtract with borrow-in, returning `(acc - operand - borrow_in) mod 256`
/// and the borrow out (true when the signed difference is below zero).
#[inline]
pub fn sub(acc: u8, operand: u8, borrow_in: bool) -> (u8, bool) {
    let diff = acc as i16 - operand as i16 - borrow_in as i16;
    (diff as u8, diff < 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_add_without_carry() {
        assert_eq!(add(5, 3, false), (8, false));
        assert_eq!(add(0, 0, false), (0, false));
    }

    #[test]
    fn test_add_overflow() {
        assert_eq!(add(0xFF, 1, false), (0, true));
        assert_eq!(add(0x80, 0x80, false), (0, true));
        assert_eq!(add(0xFF, 0xFF, true), (0xFF, true));
    }

    #[test]
    fn test_add_carry_in() {
        assert_eq!(add(1, 1, true), (3, false));
        assert_eq!(add(0xFE, 1, true), (0, true));
    }

    #[test]
    fn test_sub_borrow() {
        assert_eq!(sub(0, 1, false), (0xFF, true));
        assert_eq!(sub(5, 5, false), (0, false));
        assert_eq!(sub(5, 5, true), (0xFF, true));
        assert_eq!(sub(10, 3, true), (6, false));
    }

    proptest! {
        #[test]
        fn add_matches_wide_sum(a in any::<u8>(), b in any::<u8>(), c in any::<bool>()) {
            let wide = a as u32 + b as u32 + c as u32;
            let (value, carry) = add(a, b, c);
            prop_assert_eq!(value as u32, wide % 256);
            prop_assert_eq!(carry, wide > 255);
        }

        #[test]
        fn sub_undoes_add(a in any::<u8>(), x in any::<u8>()) {
            let (sum, _) = add(a, x, false);
            let (back, _) = sub(sum, x, false);
            prop_assert_eq!(back, a);
        }

        #[test]
        fn sub_borrows_iff_operand_larger(a in any::<u8>(), b in any::<u8>()) {
            let (_, borrow) = sub(a, b, false);
            prop_assert_eq!(borrow, b > a);
        }
    }
}
