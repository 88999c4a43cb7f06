//! Path glob matching: exact match is
//! case-insensitive; `*` matches any run of characters except `/`; `**`
//! matches any run including `/`; `?` matches exactly one character. A
//! pattern of the exact shape `<prefix>/*` (a single trailing `*` segment,
//! no other wildcards) is a prefix match and crosses slashes the same way
//! `<prefix>/**` does. Either side's trailing `/` is trimmed before
//! matching.

pub fn glob_match(pattern: &str, path: &str) -> bool {
    let pattern = trim_trailing_slash(pattern);
    let path = trim_trailing_slash(path);

    if !pattern.contains(['*', '?']) {
        return pattern.eq_ignore_ascii_case(path);
    }

    if let Some(prefix) = pattern.strip_suffix("/*") {
        if !prefix.contains(['*', '?']) {
            let prefix_with_slash = format!("{prefix}/");
            return path.len() >= prefix_with_slash.len() && path[..prefix_with_slash.len()].eq_ignore_ascii_case(&prefix_with_slash);
        }
    }

    match_segments(pattern.as_bytes(), path.as_bytes())
}

fn trim_trailing_slash(s: &str) -> &str {
    if s.len() > 1 {
        s.strip_suffix('/').unwrap_or(s)
    } else {
        s
    }
}

fn match_segments(pattern: &[u8], path: &[u8]) -> bool {
    match_from(pattern, path)
}

fn match_from(pattern: &[u8], path: &[u8]) -> bool {
    if pattern.is_empty() {
        return path.is_empty();
    }

    if pattern.starts_with(b"**") {
        let rest = &pattern[2..];
        if match_from(rest, path) {
            return true;
        }
        for i in 0..path.len() {
            if match_from(rest, &path[i + 1..]) {
                return true;
            }
        }
        return false;
    }

    if pattern[0] == b'*' {
        let rest = &pattern[1..];
        if match_from(rest, path) {
            return true;
        }
        for i in 0..path.len() {
            if path[i] == b'/' {
                break;
            }
            if match_from(rest, &path[i + 1..]) {
                return true;
            }
        }
        return false;
    }

    if pattern[0] == b'?' {
        if path.is_empty() || path[0] == b'/' {
            return false;
        }
        return match_from(&pattern[1..], &path[1..]);
    }

    if path.is_empty() {
        return false;
    }

    if pattern[0].to_ascii_lowercase() != path[0].to_ascii_lowercase() {
        return false;
    }

    match_from(&pattern[1..], &path[1..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_match_is_case_insensitive() {
        assert!(glob_match("/Login", "/login"));
        assert!(!glob_match("/login", "/logout"));
    }

    #[test]
    fn trailing_star_segment_is_a_prefix_match_and_crosses_slashes() {
        assert!(glob_match("/static/*", "/static/app.js"));
        assert!(glob_match("/static/*", "/static/js/app.js"));
        assert!(glob_match("/static/*", "/static/js/deep/app.js"));
    }

    #[test]
    fn a_star_mid_pattern_does_not_cross_slash() {
        assert!(glob_match("/item-*.js", "/item-1.js"));
        assert!(!glob_match("/item-*.js", "/item-1/2.js"));
    }

    #[test]
    fn double_star_crosses_slashes() {
        assert!(glob_match("/static/**", "/static/js/deep/app.js"));
    }

    #[test]
    fn question_mark_matches_one_char() {
        assert!(glob_match("/item?", "/item1"));
        assert!(!glob_match("/item?", "/item12"));
    }

    #[test]
    fn trailing_slash_is_ignored_on_either_side() {
        assert!(glob_match("/api/*/", "/api/v1"));
        assert!(glob_match("/api/*", "/api/v1/"));
        assert!(glob_match("/login/", "/login"));
    }
}
