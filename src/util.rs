//! Small shared helpers.

/// Strips path separators, shell-unsafe characters, and control characters
/// from a filename. Receivers run every incoming name through this before
/// touching the filesystem; senders run it so both sides agree on the name.
/// An input that sanitizes to nothing yields `"f"` so a file is still
/// produced.
pub fn clean_filename(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        if matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|') {
            continue;
        }
        if c.is_control() {
            continue;
        }
        out.push(c);
    }
    if out.is_empty() {
        out.push('f');
    }
    out
}

/// Sanitizes the advisory path hint: control characters and the quoting/
/// redirection set are dropped, separators are kept (it is a path).
pub fn clean_path(input: &str) -> String {
    input
        .chars()
        .filter(|c| !c.is_control() && !matches!(c, '"' | '<' | '>' | '|'))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_separators_and_specials() {
        assert_eq!(clean_filename("../../etc/passwd"), "......etcpasswd");
        assert_eq!(clean_filename("a\\b:c*d?e\"f<g>h|i"), "abcdefghi");
    }

    #[test]
    fn strips_control_characters() {
        assert_eq!(clean_filename("na\x00me\x1f.bin\x7f"), "name.bin");
    }

    #[test]
    fn empty_input_gets_placeholder() {
        assert_eq!(clean_filename(""), "f");
        assert_eq!(clean_filename("///"), "f");
    }

    #[test]
    fn path_hint_keeps_separators() {
        assert_eq!(clean_path("/srv/data/file<1>.bin"), "/srv/data/file1.bin");
    }
}
