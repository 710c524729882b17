use crate::hunk::Hunk;
use crate::lines::{
    detect_line_ending_style, normalize_to_lf, restore_from_lf, split_lines_inclusive,
};

pub const DEFAULT_MAX_OFFSET: usize = 1000;

#[derive(Debug, Clone)]
pub struct ApplyOutcome {
    pub text: String,
    pub applied: Vec<bool>,
}

impl ApplyOutcome {
    pub fn fully_applied(&self) -> bool {
        self.applied.iter().all(|ok| *ok)
    }

    pub fn applied_count(&self) -> usize {
        self.applied.iter().filter(|ok| **ok).count()
    }

    pub fn failed_count(&self) -> usize {
        self.applied.len() - self.applied_count()
    }
}

pub fn apply_hunk(input: &str, hunk: &Hunk, max_offset: usize) -> (String, bool) {
    let style = detect_line_ending_style(input);
    let (patched, applied) = apply_normalized(&normalize_to_lf(input), hunk, max_offset);
    (restore_from_lf(patched, style), applied)
}

pub fn apply_hunks(input: &str, hunks: &[Hunk], max_offset: usize) -> ApplyOutcome {
    let style = detect_line_ending_style(input);
    let mut text = normalize_to_lf(input).into_owned();
    let mut applied = Vec::with_capacity(hunks.len());
    for hunk in hunks {
        let (next, ok) = apply_normalized(&text, hunk, max_offset);
        text = next;
        applied.push(ok);
    }
    ApplyOutcome {
        text: restore_from_lf(text, style),
        applied,
    }
}

// Expects LF-normalized input. Each hunk is applied at most once; a hunk that
// never matches leaves the buffer untouched. Later hunks scan the output of
// earlier ones, which is how line drift from preceding edits is absorbed.
fn apply_normalized(input: &str, hunk: &Hunk, max_offset: usize) -> (String, bool) {
    let in_lines = split_lines_inclusive(input);
    let mut output = String::with_capacity(input.len());
    let mut applied = false;

    let mut i = 0;
    while i < in_lines.len() {
        if !applied
            && i + hunk.original_lines.len() <= in_lines.len()
            && hunk.new_start.abs_diff(i) < max_offset
            && matches_at(&in_lines, i, &hunk.original_lines)
        {
            for line in &hunk.new_lines {
                output.push_str(line);
            }
            i += hunk.original_lines.len();
            applied = true;
            continue;
        }
        output.push_str(in_lines[i]);
        i += 1;
    }

    (output, applied)
}

fn matches_at(in_lines: &[&str], start: usize, original: &[String]) -> bool {
    original
        .iter()
        .enumerate()
        .all(|(offset, line)| in_lines[start + offset] == line.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hunk::parse_patch;

    fn hunk(
        original_start: usize,
        new_start: usize,
        original: &[&str],
        new: &[&str],
    ) -> Hunk {
        Hunk {
            original_start,
            new_start,
            original_lines: original.iter().map(|s| s.to_string()).collect(),
            new_lines: new.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn exact_context_replaces_only_the_matched_span() {
        let input = "head\na\nb\ntail\n";
        let hunk = hunk(2, 2, &["a\n", "b\n"], &["a\n", "B\n", "c\n"]);
        let (patched, ok) = apply_hunk(input, &hunk, DEFAULT_MAX_OFFSET);
        assert!(ok);
        assert_eq!(patched, "head\na\nB\nc\ntail\n");
    }

    #[test]
    fn missing_context_leaves_the_buffer_byte_identical() {
        let input = "one\ntwo\nthree";
        let hunk = hunk(1, 1, &["nowhere\n"], &["replacement\n"]);
        let (patched, ok) = apply_hunk(input, &hunk, DEFAULT_MAX_OFFSET);
        assert!(!ok);
        assert_eq!(patched, input);
    }

    #[test]
    fn offset_bound_rejects_distant_matches() {
        let mut input = String::new();
        for i in 0..40 {
            input.push_str(&format!("filler{i}\n"));
        }
        input.push_str("needle\n");
        let hunk = hunk(1, 1, &["needle\n"], &["patched\n"]);

        let (patched, ok) = apply_hunk(&input, &hunk, 10);
        assert!(!ok);
        assert_eq!(patched, input);

        let (_, ok) = apply_hunk(&input, &hunk, DEFAULT_MAX_OFFSET);
        assert!(ok);
    }

    #[test]
    fn hunk_applies_at_most_once_per_invocation() {
        let input = "x\ny\nx\ny\n";
        let hunk = hunk(1, 1, &["x\n"], &["z\n"]);
        let (patched, ok) = apply_hunk(input, &hunk, DEFAULT_MAX_OFFSET);
        assert!(ok);
        assert_eq!(patched, "z\ny\nx\ny\n");
    }

    #[test]
    fn later_hunks_scan_the_output_of_earlier_ones() {
        let input = "a\nb\n";
        let first = hunk(1, 1, &["a\n"], &["a2\n"]);
        let second = hunk(1, 1, &["a2\n", "b\n"], &["a2\n", "b2\n"]);

        let outcome = apply_hunks(input, &[first, second.clone()], DEFAULT_MAX_OFFSET);
        assert_eq!(outcome.applied, vec![true, true]);
        assert_eq!(outcome.text, "a2\nb2\n");
        assert!(outcome.fully_applied());

        // The second hunk's context only exists after the first one ran.
        let alone = apply_hunks(input, &[second], DEFAULT_MAX_OFFSET);
        assert_eq!(alone.applied, vec![false]);
        assert_eq!(alone.text, input);
        assert_eq!(alone.failed_count(), 1);
    }

    #[test]
    fn crlf_convention_survives_patching() {
        let input = "alpha\r\nbeta\r\n";
        let hunk = hunk(1, 1, &["beta\n"], &["beta2\n"]);
        let (patched, ok) = apply_hunk(input, &hunk, DEFAULT_MAX_OFFSET);
        assert!(ok);
        assert_eq!(patched, "alpha\r\nbeta2\r\n");
    }

    #[test]
    fn matching_never_reads_past_the_buffer_end() {
        let input = "a\nb\n";
        let hunk = hunk(1, 1, &["a\n", "b\n", "c\n"], &["whatever\n"]);
        let (patched, ok) = apply_hunk(input, &hunk, DEFAULT_MAX_OFFSET);
        assert!(!ok);
        assert_eq!(patched, input);
    }

    #[test]
    fn parsed_no_newline_hunk_abuts_following_content() {
        let patch_text = "\
--- test1.txt
+++ test2.txt
@@ -1,3 +1,4 @@
-line1
+newline1
 line2
-line3
+sus
+newline3
\\ No newline at end of file
";
        let hunks = parse_patch(patch_text).expect("patch parses");
        assert_eq!(hunks.len(), 1);
        assert_eq!(hunks[0].original_lines, vec!["line1\n", "line2\n", "line3\n"]);
        assert_eq!(
            hunks[0].new_lines,
            vec!["newline1\n", "line2\n", "sus\n", "newline3"]
        );

        let input = "intruder1\nline1\nline2\nline3\nintruder2";
        let outcome = apply_hunks(input, &hunks, DEFAULT_MAX_OFFSET);
        assert_eq!(outcome.applied, vec![true]);
        assert_eq!(outcome.text, "intruder1\nnewline1\nline2\nsus\nnewline3intruder2");
    }

    #[test]
    fn unterminated_final_line_can_be_matched() {
        let input = "a\nend";
        let hunk = hunk(2, 2, &["end"], &["end!"]);
        let (patched, ok) = apply_hunk(input, &hunk, DEFAULT_MAX_OFFSET);
        assert!(ok);
        assert_eq!(patched, "a\nend!");
    }
}
