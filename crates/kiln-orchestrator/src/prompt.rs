//! Prompt builder for generation attempts
//!
//! Every attempt starts from a fresh prompt. What carries over between
//! attempts is the lessons section and the previous attempt's diagnosis.

use kiln_core::{CriticVerdict, Task};

/// Human name for a source file extension
pub fn language_for_extension(extension: &str) -> &str {
    match extension.trim_start_matches('.') {
        "py" => "Python",
        "js" | "mjs" => "JavaScript",
        "ts" => "TypeScript",
        "rb" => "Ruby",
        "sh" => "POSIX shell",
        "lua" => "Lua",
        "pl" => "Perl",
        other => other,
    }
}

/// Standing instructions sent as the system message
pub fn system_prompt(language: &str) -> String {
    format!(
        "You are a careful {language} programmer.\n\
         Write one complete, self-contained {language} program that solves the task.\n\
         The program runs unattended in an isolated sandbox: there is no network, no user \
         input, and only the standard library is available. Print the answer to stdout.\n\n\
         Reply with exactly one fenced code block holding the whole program, then a final \
         line of the form `Confidence: NN%` giving how likely the program is to run correctly."
    )
}

/// Instructions for one attempt
///
/// `lessons` is the rendered lessons section (may be empty) and `feedback`
/// the diagnosis of the previous attempt, absent on the first.
pub fn build_generation_prompt(
    task: &Task,
    lessons: &str,
    feedback: Option<&CriticVerdict>,
    attempt: usize,
    max_attempts: usize,
) -> String {
    let mut prompt = String::new();

    prompt.push_str(&format!(
        "# TASK (attempt {} of {})\n\n",
        attempt, max_attempts
    ));
    prompt.push_str(task.description().trim());
    prompt.push_str("\n\n");

    if !lessons.trim().is_empty() {
        prompt.push_str(lessons.trim_end());
        prompt.push_str("\n\n");
    }

    if let Some(verdict) = feedback.filter(|v| !v.is_pass()) {
        prompt.push_str("## PREVIOUS ATTEMPT FAILED\n\n");
        prompt.push_str(&format!("**Category:** {}\n", verdict.category));
        if !verdict.hint.trim().is_empty() {
            prompt.push_str(&format!("**Hint:** {}\n", verdict.hint.trim()));
        }
        prompt.push_str("\nWrite a new program that avoids this problem.\n");
    }

    prompt
}
