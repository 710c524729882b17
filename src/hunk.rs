use std::fmt;

use anyhow::{Result, anyhow, bail};
use regex::Regex;

use crate::lines::normalize_to_lf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hunk {
    pub original_start: usize,
    pub new_start: usize,
    pub original_lines: Vec<String>,
    pub new_lines: Vec<String>,
}

impl fmt::Display for Hunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "@@ -{},{} +{},{} @@",
            self.original_start,
            self.original_lines.len(),
            self.new_start,
            self.new_lines.len()
        )?;
        write_side(f, '-', &self.original_lines)?;
        write_side(f, '+', &self.new_lines)
    }
}

fn write_side(f: &mut fmt::Formatter<'_>, marker: char, lines: &[String]) -> fmt::Result {
    for line in lines {
        write!(f, "{marker}{line}")?;
        if !line.ends_with('\n') {
            write!(f, "\n\\ No newline at end of file\n")?;
        }
    }
    Ok(())
}

struct HunkBuilder {
    header: String,
    original_start: usize,
    new_start: usize,
    original_declared: usize,
    new_declared: usize,
    original_lines: Vec<String>,
    new_lines: Vec<String>,
}

impl HunkBuilder {
    fn push_original(&mut self, line: String) -> Result<()> {
        if self.original_lines.len() == self.original_declared {
            bail!(
                "hunk '{}' has more original lines than its declared count {}",
                self.header,
                self.original_declared
            );
        }
        self.original_lines.push(line);
        Ok(())
    }

    fn push_new(&mut self, line: String) -> Result<()> {
        if self.new_lines.len() == self.new_declared {
            bail!(
                "hunk '{}' has more new lines than its declared count {}",
                self.header,
                self.new_declared
            );
        }
        self.new_lines.push(line);
        Ok(())
    }

    fn finish(self) -> Result<Hunk> {
        if self.original_lines.len() != self.original_declared {
            bail!(
                "hunk '{}' declares {} original lines but supplies {}",
                self.header,
                self.original_declared,
                self.original_lines.len()
            );
        }
        if self.new_lines.len() != self.new_declared {
            bail!(
                "hunk '{}' declares {} new lines but supplies {}",
                self.header,
                self.new_declared,
                self.new_lines.len()
            );
        }
        Ok(Hunk {
            original_start: self.original_start,
            new_start: self.new_start,
            original_lines: self.original_lines,
            new_lines: self.new_lines,
        })
    }
}

pub fn parse_patch(text: &str) -> Result<Vec<Hunk>> {
    let header_pattern = Regex::new(r"^@@ -(\d+),(\d+) \+(\d+),(\d+) @@")?;
    let normalized = normalize_to_lf(text);
    let raw_lines: Vec<&str> = normalized.split('\n').collect();

    let mut hunks = Vec::new();
    let mut current: Option<HunkBuilder> = None;

    for (idx, raw) in raw_lines.iter().enumerate() {
        if raw.is_empty() {
            continue;
        }
        if raw.starts_with('@') {
            let caps = header_pattern
                .captures(raw)
                .ok_or_else(|| anyhow!("malformed hunk header '{raw}'"))?;
            if let Some(done) = current.take() {
                hunks.push(done.finish()?);
            }
            current = Some(HunkBuilder {
                header: raw.to_string(),
                original_start: caps[1].parse()?,
                original_declared: caps[2].parse()?,
                new_start: caps[3].parse()?,
                new_declared: caps[4].parse()?,
                original_lines: Vec::new(),
                new_lines: Vec::new(),
            });
            continue;
        }
        // File headers and any other prologue before the first hunk.
        let Some(builder) = current.as_mut() else {
            continue;
        };

        // A following '\' marker means this line has no terminator in the file;
        // the marker itself carries no content.
        let keep_newline = raw_lines
            .get(idx + 1)
            .map_or(true, |next| !next.starts_with('\\'));
        match raw.as_bytes()[0] {
            b' ' => {
                let content = body_line(raw, keep_newline);
                builder.push_original(content.clone())?;
                builder.push_new(content)?;
            }
            b'-' => builder.push_original(body_line(raw, keep_newline))?,
            b'+' => builder.push_new(body_line(raw, keep_newline))?,
            _ => {}
        }
    }

    if let Some(done) = current.take() {
        hunks.push(done.finish()?);
    }
    Ok(hunks)
}

fn body_line(raw: &str, keep_newline: bool) -> String {
    let mut content = raw[1..].to_string();
    if keep_newline {
        content.push('\n');
    }
    content
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconstructs_both_sides_of_a_hunk() {
        let text = "\
--- a/notes.txt
+++ b/notes.txt
@@ -1,3 +1,4 @@
 keep
-old
+new
+extra
 tail
";
        let hunks = parse_patch(text).expect("patch parses");
        assert_eq!(hunks.len(), 1);
        let hunk = &hunks[0];
        assert_eq!(hunk.original_start, 1);
        assert_eq!(hunk.new_start, 1);
        assert_eq!(hunk.original_lines, vec!["keep\n", "old\n", "tail\n"]);
        assert_eq!(hunk.new_lines, vec!["keep\n", "new\n", "extra\n", "tail\n"]);
    }

    #[test]
    fn multiple_hunks_keep_header_order() {
        let text = "\
@@ -1,1 +1,1 @@
-a
+b
@@ -10,1 +10,1 @@
-x
+y
";
        let hunks = parse_patch(text).expect("patch parses");
        assert_eq!(hunks.len(), 2);
        assert_eq!(hunks[0].original_lines, vec!["a\n"]);
        assert_eq!(hunks[1].original_start, 10);
        assert_eq!(hunks[1].new_lines, vec!["y\n"]);
    }

    #[test]
    fn no_newline_marker_strips_the_terminator() {
        let text = "\
@@ -1,1 +1,2 @@
-a
+a
+last
\\ No newline at end of file
";
        let hunks = parse_patch(text).expect("patch parses");
        assert_eq!(hunks[0].new_lines, vec!["a\n", "last"]);
        assert_eq!(hunks[0].original_lines, vec!["a\n"]);
    }

    #[test]
    fn crlf_patch_text_is_accepted() {
        let text = "@@ -1,1 +1,1 @@\r\n-a\r\n+b\r\n";
        let hunks = parse_patch(text).expect("patch parses");
        assert_eq!(hunks[0].original_lines, vec!["a\n"]);
        assert_eq!(hunks[0].new_lines, vec!["b\n"]);
    }

    #[test]
    fn malformed_header_names_the_line() {
        let err = parse_patch("@@ -1,2 +3 @@\n").expect_err("header must be rejected");
        assert!(err.to_string().contains("@@ -1,2 +3 @@"), "{err}");
    }

    #[test]
    fn undercounted_body_is_rejected() {
        let text = "\
@@ -1,3 +1,1 @@
-a
-b
+c
";
        let err = parse_patch(text).expect_err("short body must be rejected");
        assert!(err.to_string().contains("declares 3 original lines"), "{err}");
    }

    #[test]
    fn overcounted_body_is_rejected() {
        let text = "\
@@ -1,1 +1,1 @@
-a
-b
+c
";
        let err = parse_patch(text).expect_err("long body must be rejected");
        assert!(err.to_string().contains("more original lines"), "{err}");
    }

    #[test]
    fn prologue_lines_are_ignored() {
        let text = "\
diff notes
index 1111..2222
--- a/x
+++ b/x
@@ -4,1 +4,1 @@
-p
+q
";
        let hunks = parse_patch(text).expect("patch parses");
        assert_eq!(hunks.len(), 1);
        assert_eq!(hunks[0].original_lines, vec!["p\n"]);
    }

    #[test]
    fn display_round_trips_through_the_parser() {
        let hunk = Hunk {
            original_start: 3,
            new_start: 4,
            original_lines: vec!["a\n".into(), "b\n".into()],
            new_lines: vec!["a\n".into(), "c".into()],
        };
        let rendered = hunk.to_string();
        let reparsed = parse_patch(&rendered).expect("rendered hunk parses");
        assert_eq!(reparsed, vec![hunk]);
    }
}
