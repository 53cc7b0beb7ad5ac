//! Prompt rendering for lessons

use crate::record::Lesson;

const EXCERPT_MAX_LINES: usize = 20;

/// Render lessons as a prompt section, empty when there are none
pub fn format_lessons(lessons: &[Lesson]) -> String {
    if lessons.is_empty() {
        return String::new();
    }

    let mut output = String::from("## Lessons From Similar Tasks\n\n");

    for lesson in lessons {
        let record = &lesson.record;
        let outcome = if record.success { "succeeded" } else { "failed" };
        output.push_str(&format!(
            "**{}** ({} after {} attempt{}, similarity: {:.0}%)\n",
            record.task.lines().next().unwrap_or_default().trim(),
            outcome,
            record.attempts,
            if record.attempts == 1 { "" } else { "s" },
            lesson.similarity * 100.0
        ));

        if record.success && !record.code.trim().is_empty() {
            output.push_str("```\n");
            output.push_str(&excerpt(&record.code));
            output.push_str("\n```\n\n");
        } else {
            output.push_str("- Every attempt failed; do not repeat that approach.\n\n");
        }
    }

    output
}

fn excerpt(code: &str) -> String {
    let lines: Vec<&str> = code.trim_end().lines().collect();
    if lines.len() <= EXCERPT_MAX_LINES {
        return lines.join("\n");
    }
    format!(
        "{}\n# ... {} more lines",
        lines[..EXCERPT_MAX_LINES].join("\n"),
        lines.len() - EXCERPT_MAX_LINES
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::MemoryRecord;

    fn lesson(task: &str, code: &str, success: bool, attempts: u32) -> Lesson {
        Lesson {
            record: MemoryRecord::new(task, code, success, attempts),
            similarity: 0.5,
        }
    }

    #[test]
    fn test_empty_lessons_render_nothing() {
        assert_eq!(format_lessons(&[]), "");
    }

    #[test]
    fn test_success_includes_code() {
        let rendered = format_lessons(&[lesson("sum a csv column", "import csv\nprint(1)", true, 2)]);
        assert!(rendered.contains("## Lessons From Similar Tasks"));
        assert!(rendered.contains("**sum a csv column** (succeeded after 2 attempts, similarity: 50%)"));
        assert!(rendered.contains("import csv\nprint(1)"));
    }

    #[test]
    fn test_failure_warns_instead_of_showing_code() {
        let rendered = format_lessons(&[lesson("scrape a site", "import requests", false, 1)]);
        assert!(rendered.contains("failed after 1 attempt,"));
        assert!(!rendered.contains("import requests"));
        assert!(rendered.contains("do not repeat"));
    }

    #[test]
    fn test_long_code_is_excerpted() {
        let code: String = (0..50).map(|i| format!("x{} = {}\n", i, i)).collect();
        let rendered = format_lessons(&[lesson("long task", &code, true, 1)]);
        assert!(rendered.contains("x19 = 19"));
        assert!(!rendered.contains("x20 = 20"));
        assert!(rendered.contains("30 more lines"));
    }
}
