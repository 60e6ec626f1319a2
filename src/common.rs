pub fn eq_ignore_case(a: &str, b: &str) -> bool {
    a.chars()
        .map(std::primitive::char::to_lowercase)
        .flatten()
        .eq(b.chars().map(std::primitive::char::to_lowercase).flatten())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn compares_without_case() {
        assert!(eq_ignore_case("ld", "LD"));
        assert!(eq_ignore_case("Loop.End", "loop.end"));
        assert!(!eq_ignore_case("ld", "ldi"));
    }
}
