//! JSONC parse options shared by `Config::load` — comments and trailing
//! commas allowed, same permissive dialect the teacher's `discover::Config`
//! parses `jvl.json` with.

use jsonc_parser::ParseOptions;

/// Standard parse options: comments + trailing commas allowed.
pub fn parse_options() -> ParseOptions {
    ParseOptions {
        allow_comments: true,
        allow_trailing_commas: true,
        allow_loose_object_property_names: false,
        allow_single_quoted_strings: false,
        allow_hexadecimal_numbers: false,
        allow_missing_commas: false,
        allow_unary_plus_numbers: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_comments_and_trailing_commas() {
        let opts = parse_options();
        assert!(opts.allow_comments);
        assert!(opts.allow_trailing_commas);
        assert!(!opts.allow_single_quoted_strings);
    }
}
