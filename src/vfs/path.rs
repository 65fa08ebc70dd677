use crate::{Error, Result};
use regex::Regex;

/// Split a relative path into its components, dropping empty and `.` parts.
pub fn split_components(path: &str) -> Vec<&str> {
    path.split('/')
        .filter(|c| !c.is_empty() && *c != ".")
        .collect()
}

/// Join a walk-relative directory and a child name.
pub fn join_rel(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{dir}/{name}")
    }
}

/// The basename of a `/`-separated path.
pub fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// The parent of a `/`-separated path, empty for top-level names.
pub fn parent(path: &str) -> &str {
    match path.rfind('/') {
        Some(i) => &path[..i],
        None => "",
    }
}

/// Shell-style wildcard match (`*`, `?`, `[seq]`) over a whole string.
pub fn wildcard_match(text: &str, pattern: &str) -> bool {
    let re = translate(pattern);
    Regex::new(&re).map(|re| re.is_match(text)).unwrap_or(false)
}

/// Translates a shell wildcard pattern to an anchored regex.
fn translate(pattern: &str) -> String {
    let mut re = String::from("^(?s)");
    let chars: Vec<char> = pattern.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            '[' => {
                // scan for the closing bracket; a lone '[' is literal
                let mut j = i + 1;
                if j < chars.len() && (chars[j] == '!' || chars[j] == ']') {
                    j += 1;
                }
                while j < chars.len() && chars[j] != ']' {
                    j += 1;
                }
                if j >= chars.len() {
                    re.push_str("\\[");
                } else {
                    re.push('[');
                    let mut k = i + 1;
                    if chars[k] == '!' {
                        re.push('^');
                        k += 1;
                    }
                    while k < j {
                        if chars[k] == '\\' || chars[k] == '^' {
                            re.push('\\');
                        }
                        re.push(chars[k]);
                        k += 1;
                    }
                    re.push(']');
                    i = j;
                }
            }
            c => re.push_str(&regex::escape(&c.to_string())),
        }
        i += 1;
    }
    re.push('$');
    re
}

/// Rejects patterns the matcher does not support: empty patterns, absolute
/// patterns, `..` components, more than one `**`, or `**` glued to text.
fn validate_pattern<'a>(pattern: &'a str) -> Result<Vec<&'a str>> {
    if pattern.is_empty() || pattern.starts_with('/') {
        return Err(Error::UnsupportedPattern(pattern.to_string()));
    }
    let parts = split_components(pattern);
    if parts.is_empty() {
        return Err(Error::UnsupportedPattern(pattern.to_string()));
    }
    let mut dblstars = 0;
    for part in &parts {
        if *part == ".." {
            return Err(Error::UnsupportedPattern(pattern.to_string()));
        }
        if part.contains("**") {
            if part.len() > 2 {
                return Err(Error::UnsupportedPattern(pattern.to_string()));
            }
            dblstars += 1;
        }
    }
    if dblstars > 1 {
        return Err(Error::UnsupportedPattern(pattern.to_string()));
    }
    Ok(parts)
}

/// Match a path against a pattern with component wildcards and at most one
/// `**` that absorbs zero or more intermediate directories. A trailing `**`
/// matches directories only.
pub fn fnmatch_path(path: &str, pattern: &str, is_file: bool) -> Result<bool> {
    let patt = validate_pattern(pattern)?;
    if is_file && patt.last() == Some(&"**") {
        return Ok(false);
    }
    let parts = split_components(path);
    let dbl_index = patt.iter().position(|p| *p == "**");

    match dbl_index {
        None => {
            if parts.len() != patt.len() {
                return Ok(false);
            }
            Ok(parts
                .iter()
                .zip(patt.iter())
                .all(|(comp, p)| wildcard_match(comp, p)))
        }
        Some(i) => {
            // the prefix before ** matches from the front, the suffix after
            // it from the back; the middle is absorbed
            if parts.len() + 1 < patt.len() {
                return Ok(false);
            }
            for k in 0..i {
                if !wildcard_match(parts[k], patt[k]) {
                    return Ok(false);
                }
            }
            let rev = patt.len() - i - 1;
            for k in 0..rev {
                let comp = parts[parts.len() - rev + k];
                let p = patt[patt.len() - rev + k];
                if !wildcard_match(comp, p) {
                    return Ok(false);
                }
            }
            Ok(true)
        }
    }
}

/// A directory child as reported by a backend's lister.
pub struct Entry {
    pub name: String,
    pub is_dir: bool,
}

/// Walks a tree through the pluggable `list_dir` and collects every path
/// matching `pattern`, relative to the walk root. Both backends share this;
/// they only supply their own lister.
pub fn glob_walk<L>(pattern: &str, list_dir: &mut L) -> Result<Vec<String>>
where
    L: FnMut(&str) -> Result<Vec<Entry>>,
{
    validate_pattern(pattern)?;
    let mut out = Vec::new();
    walk("", pattern, list_dir, &mut out)?;
    Ok(out)
}

fn walk<L>(dir: &str, pattern: &str, list_dir: &mut L, out: &mut Vec<String>) -> Result<()>
where
    L: FnMut(&str) -> Result<Vec<Entry>>,
{
    let entries = list_dir(dir)?;
    for entry in entries.iter().filter(|e| !e.is_dir) {
        let path = join_rel(dir, &entry.name);
        if fnmatch_path(&path, pattern, true)? {
            out.push(path);
        }
    }
    for entry in entries.iter().filter(|e| e.is_dir) {
        let path = join_rel(dir, &entry.name);
        if fnmatch_path(&path, pattern, false)? {
            out.push(path.clone());
        }
        walk(&path, pattern, list_dir, out)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_strips_dot_and_empty() {
        assert_eq!(split_components("./a/b/"), vec!["a", "b"]);
        assert_eq!(split_components("a"), vec!["a"]);
    }

    #[test]
    fn basename_and_parent() {
        assert_eq!(basename("a/b/c.txt"), "c.txt");
        assert_eq!(basename("c.txt"), "c.txt");
        assert_eq!(parent("a/b/c.txt"), "a/b");
        assert_eq!(parent("c.txt"), "");
    }

    #[test]
    fn wildcard_basics() {
        assert!(wildcard_match("output2.txt", "*2.txt*"));
        assert!(wildcard_match("file.in", "*.in"));
        assert!(wildcard_match("a", "?"));
        assert!(!wildcard_match("file.out", "*.in"));
        assert!(wildcard_match("ab3", "ab[0-9]"));
        assert!(!wildcard_match("abx", "ab[0-9]"));
    }

    #[test]
    fn match_without_doublestar_needs_equal_depth() {
        assert!(fnmatch_path("sub/to_delete.txt", "*/to_delete.txt", true).unwrap());
        assert!(!fnmatch_path("to_delete.txt", "*/to_delete.txt", true).unwrap());
        assert!(!fnmatch_path("a/b/to_delete.txt", "*/to_delete.txt", true).unwrap());
        assert!(fnmatch_path("deletefolder", "deletefolder", false).unwrap());
    }

    #[test]
    fn match_with_doublestar_absorbs_middle() {
        assert!(fnmatch_path("a/x/y/b.txt", "a/**/b.txt", true).unwrap());
        assert!(fnmatch_path("a/b.txt", "a/**/b.txt", true).unwrap());
        assert!(!fnmatch_path("c/x/b.txt", "a/**/b.txt", true).unwrap());
        assert!(fnmatch_path("out/sub/file_old.txt", "out/**/*old*", true).unwrap());
    }

    #[test]
    fn trailing_doublestar_matches_directories_only() {
        assert!(fnmatch_path("a/sub", "a/**", false).unwrap());
        assert!(!fnmatch_path("a/file.txt", "a/**", true).unwrap());
    }

    #[test]
    fn leading_dot_slash_is_stripped() {
        assert!(fnmatch_path("a/b.txt", "./a/b.txt", true).unwrap());
    }

    #[test]
    fn unsupported_patterns() {
        assert!(matches!(
            fnmatch_path("a", "a**", false),
            Err(Error::UnsupportedPattern(_))
        ));
        assert!(matches!(
            fnmatch_path("a", "**/x/**", false),
            Err(Error::UnsupportedPattern(_))
        ));
        assert!(matches!(
            fnmatch_path("a", "", false),
            Err(Error::UnsupportedPattern(_))
        ));
        assert!(matches!(
            fnmatch_path("a", "/abs/path", false),
            Err(Error::UnsupportedPattern(_))
        ));
        assert!(matches!(
            fnmatch_path("a", "../escape", false),
            Err(Error::UnsupportedPattern(_))
        ));
    }

    fn fake_tree() -> Vec<(&'static str, Vec<Entry>)> {
        vec![
            (
                "",
                vec![
                    Entry {
                        name: "file.txt".into(),
                        is_dir: false,
                    },
                    Entry {
                        name: "sub".into(),
                        is_dir: true,
                    },
                ],
            ),
            (
                "sub",
                vec![
                    Entry {
                        name: "inner.txt".into(),
                        is_dir: false,
                    },
                    Entry {
                        name: "deep".into(),
                        is_dir: true,
                    },
                ],
            ),
            ("sub/deep", vec![]),
        ]
    }

    fn lister(dir: &str) -> Result<Vec<Entry>> {
        for (d, entries) in fake_tree() {
            if d == dir {
                return Ok(entries);
            }
        }
        Ok(vec![])
    }

    #[test]
    fn glob_walk_over_fake_tree() {
        let all = glob_walk("**/*", &mut lister).unwrap();
        assert_eq!(
            all,
            vec!["file.txt", "sub", "sub/inner.txt", "sub/deep"]
        );
        let txt = glob_walk("sub/*.txt", &mut lister).unwrap();
        assert_eq!(txt, vec!["sub/inner.txt"]);
        let dirs = glob_walk("**", &mut lister).unwrap();
        assert_eq!(dirs, vec!["sub", "sub/deep"]);
    }
}
