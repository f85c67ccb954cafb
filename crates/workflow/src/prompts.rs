//! Prompt templates for the summarization collaborator.

/// Section headings of the structured summary, in fixed order.
pub const SUMMARY_SECTIONS: [&str; 6] = [
    "Major Topics",
    "Key Points",
    "Decisions",
    "Action Items",
    "Risks/Issues",
    "Next Steps",
];

/// Prompt for a single-pass or final (reduce) structured summary.
pub fn structured_summary(text: &str) -> String {
    let sections = SUMMARY_SECTIONS
        .iter()
        .map(|s| format!("## {s}"))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "You are writing meeting minutes. Summarize the following transcript \
         into exactly these Markdown sections, in this order, keeping every \
         heading even when a section is empty:\n\n{sections}\n\n\
         Transcript:\n{text}"
    )
}

/// Prompt for one map-phase partial summary.
pub fn partial_summary(chunk: &str, index: usize, total: usize) -> String {
    format!(
        "Summarize part {part} of {total} of a meeting transcript in a few \
         dense sentences. Keep concrete names, dates, numbers, and decisions.\n\n\
         {chunk}",
        part = index + 1,
    )
}

/// Prompt combining several partial summaries into one.
pub fn combine_partials(partials: &[String]) -> String {
    format!(
        "Merge the following partial summaries of one meeting into a single \
         coherent summary. Do not lose decisions or action items.\n\n{}",
        partials.join("\n\n---\n\n")
    )
}

/// Prompt for the one-line description shown in listings.
pub fn one_line_title(text: &str) -> String {
    let head: String = text.chars().take(2000).collect();
    format!(
        "Describe the following document in one short line (at most 80 \
         characters, no quotes, same language as the text):\n\n{head}"
    )
}

/// Make sure every fixed section heading is present, appending any that the
/// collaborator dropped so the artifact shape stays stable.
pub fn ensure_sections(summary: &str) -> String {
    let mut result = summary.trim_end().to_string();
    for section in SUMMARY_SECTIONS {
        let heading = format!("## {section}");
        if !result.contains(&heading) {
            result.push_str("\n\n");
            result.push_str(&heading);
            result.push_str("\n- (none)");
        }
    }
    result.push('\n');
    result
}
