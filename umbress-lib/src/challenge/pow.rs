/// Expected answer of the automated challenge for `seed`.
///
/// Digits fold left with `acc = f(acc) * f(d)` where `f(0) = 1` and `f(x) = x` otherwise;
/// a lone digit is kept as is and a seed without digits folds to 0. The fold is then
/// multiplied by the number of non-digit characters.
pub fn solve(seed: &str) -> u128 {
    let mut digits = seed.chars().filter_map(|c| c.to_digit(10)).map(u128::from);
    let others = seed.chars().filter(|c| !c.is_ascii_digit()).count() as u128;

    let folded = match digits.next() {
        None => 0,
        Some(first) => digits.fold(first, |acc, d| unit(acc).saturating_mul(unit(d))),
    };
    folded.saturating_mul(others)
}

fn unit(x: u128) -> u128 {
    if x == 0 {
        1
    } else {
        x
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_digits_count_as_one() {
        // 2 * f(0) * 3 = 6, three letters
        assert_eq!(solve("a2b0c3"), 18);
    }

    #[test]
    fn single_digit_kept_raw() {
        assert_eq!(solve("0abc"), 0);
        assert_eq!(solve("7ab"), 14);
    }

    #[test]
    fn no_digits_or_no_letters() {
        assert_eq!(solve("abcdef"), 0);
        assert_eq!(solve("123"), 0);
    }

    #[test]
    fn uuid_seed() {
        assert_eq!(solve("0f8fad5b-d9cb-469f-a165-70867728950e"), 414_797_967_360_000);
    }
}
