/// Translate a camelCase identifier into the engine's snake_case attribute names.
/// Identifiers already in snake_case pass through unchanged.
pub fn to_snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let mut prev_lower_or_digit = false;

    for c in name.chars() {
        if c.is_ascii_uppercase() {
            if prev_lower_or_digit {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
            prev_lower_or_digit = false;
        } else {
            out.push(c);
            prev_lower_or_digit = c.is_ascii_lowercase() || c.is_ascii_digit();
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::to_snake_case;

    #[test]
    fn converts_camel_case() {
        assert_eq!(to_snake_case("useBias"), "use_bias");
        assert_eq!(to_snake_case("batchInputShape"), "batch_input_shape");
        assert_eq!(to_snake_case("recurrentActivation"), "recurrent_activation");
    }

    #[test]
    fn leaves_snake_case_alone() {
        assert_eq!(to_snake_case("use_bias"), "use_bias");
        assert_eq!(to_snake_case("units"), "units");
    }
}
