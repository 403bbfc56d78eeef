//! Redis-style glob matching for `KEYS`
//!
//! Supports `*`, `?`, `[abc]`, `[a-z]`, `[^abc]` and `\` escapes.

/// Returns true if `key` matches the glob `pattern`
pub fn glob_match(pattern: &str, key: &str) -> bool {
    match_from(pattern.as_bytes(), key.as_bytes())
}

fn match_from(pattern: &[u8], key: &[u8]) -> bool {
    let Some((&p_char, p_rest)) = pattern.split_first() else {
        return key.is_empty();
    };

    match p_char {
        b'*' => {
            // Collapse runs of '*'
            let mut rest = p_rest;
            while rest.first() == Some(&b'*') {
                rest = &rest[1..];
            }
            if rest.is_empty() {
                return true;
            }
            (0..=key.len()).any(|i| match_from(rest, &key[i..]))
        }
        b'?' => match key.split_first() {
            Some((_, k_rest)) => match_from(p_rest, k_rest),
            None => false,
        },
        b'[' => {
            let Some((&k_char, k_rest)) = key.split_first() else {
                return false;
            };
            match match_class(p_rest, k_char) {
                Some((true, after_class)) => match_from(after_class, k_rest),
                _ => false,
            }
        }
        b'\\' if !p_rest.is_empty() => match key.split_first() {
            Some((&k_char, k_rest)) if k_char == p_rest[0] => match_from(&p_rest[1..], k_rest),
            _ => false,
        },
        literal => match key.split_first() {
            Some((&k_char, k_rest)) if k_char == literal => match_from(p_rest, k_rest),
            _ => false,
        },
    }
}

/// Match one byte against a `[...]` class. `class` starts just after `[`.
/// Returns whether it matched and the pattern remaining after `]`, or None
/// for an unterminated class (which never matches).
fn match_class(class: &[u8], c: u8) -> Option<(bool, &[u8])> {
    let (negate, mut i) = if class.first() == Some(&b'^') {
        (true, 1)
    } else {
        (false, 0)
    };

    let mut matched = false;
    loop {
        match *class.get(i)? {
            b']' => break,
            b'\\' => {
                if *class.get(i + 1)? == c {
                    matched = true;
                }
                i += 2;
            }
            start
                if class.get(i + 1) == Some(&b'-')
                    && class.get(i + 2).is_some_and(|e| *e != b']') =>
            {
                let end = class[i + 2];
                let (lo, hi) = if start <= end { (start, end) } else { (end, start) };
                if (lo..=hi).contains(&c) {
                    matched = true;
                }
                i += 3;
            }
            single => {
                if single == c {
                    matched = true;
                }
                i += 1;
            }
        }
    }

    Some((matched != negate, &class[i + 1..]))
}
