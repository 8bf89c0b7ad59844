use once_cell::sync::Lazy;
use regex::Regex;

use crate::research::session::Task;

static TASK_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d+)[.)\-]\s*(.*)$").expect("task marker pattern is valid"));

/// Splits a numbered plan into tasks.
///
/// A task starts on a line beginning with digits followed by `.`, `)` or `-`
/// and runs until the next such line, a blank line, or the end of the text.
/// Ordinals are kept verbatim and bodies are folded onto one line. Text with
/// no numbered lines yields no tasks.
pub fn parse_tasks(plan_text: &str) -> Vec<Task> {
    let mut tasks = Vec::new();
    let mut current: Option<(String, Vec<&str>)> = None;

    for line in plan_text.lines() {
        let line = line.trim_end_matches('\r');
        if let Some(caps) = TASK_MARKER.captures(line) {
            flush(&mut current, &mut tasks);
            let ordinal = caps[1].to_string();
            let first = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
            current = Some((ordinal, vec![first]));
        } else if line.trim().is_empty() {
            flush(&mut current, &mut tasks);
        } else if let Some((_, body)) = current.as_mut() {
            body.push(line);
        }
    }
    flush(&mut current, &mut tasks);

    tasks
}

fn flush(current: &mut Option<(String, Vec<&str>)>, tasks: &mut Vec<Task>) {
    let Some((ordinal, body)) = current.take() else {
        return;
    };
    let description = body.join("\n").trim().replace('\n', " ");
    if !description.is_empty() {
        tasks.push(Task::new(ordinal, description));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ordinals(tasks: &[Task]) -> Vec<&str> {
        tasks.iter().map(|task| task.ordinal.as_str()).collect()
    }

    #[test]
    fn parses_each_marker_style() {
        let tasks = parse_tasks("1. Map competitors\n2) Size the market\n3- Review regulation");
        assert_eq!(ordinals(&tasks), vec!["1", "2", "3"]);
        assert_eq!(tasks[1].description, "Size the market");
        assert!(tasks.iter().all(|task| task.selected));
    }

    #[test]
    fn folds_multi_line_bodies() {
        let tasks = parse_tasks("1. Identify vendors\nwith public pricing\n  and reviews\n2. Next");
        assert_eq!(tasks[0].description, "Identify vendors with public pricing   and reviews");
        assert_eq!(tasks[1].description, "Next");
    }

    #[test]
    fn blank_line_ends_a_task_and_trailing_prose_is_ignored() {
        let plan = "Here is the plan:\n\n1. First task\n\nThis closing remark is not a task.";
        let tasks = parse_tasks(plan);
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].description, "First task");
    }

    #[test]
    fn ordinals_are_preserved_verbatim() {
        let tasks = parse_tasks("3. c\n1. a\n1. again\n10. j");
        assert_eq!(ordinals(&tasks), vec!["3", "1", "1", "10"]);
    }

    #[test]
    fn text_without_numbered_lines_yields_nothing() {
        assert!(parse_tasks("").is_empty());
        assert!(parse_tasks("No list here.\n- bullet\n  2. indented").is_empty());
    }

    #[test]
    fn empty_items_are_skipped() {
        let tasks = parse_tasks("1.\n2. Real task\r\n");
        assert_eq!(ordinals(&tasks), vec!["2"]);
    }

    #[test]
    fn seven_task_plan_parses_completely() {
        let plan = "1. Identify top 5 competitors - pricing and positioning\n\
                    2. Estimate market size - SMB and mid-market\n\
                    3. Map regulatory constraints - works councils and GDPR\n\
                    4. Survey buyer personas - HR leads in Mittelstand\n\
                    5. Analyze distribution channels - partners and resellers\n\
                    6. Review funding activity - last three years\n\
                    7. Summarize entry risks - localization and support";
        let tasks = parse_tasks(plan);
        assert_eq!(ordinals(&tasks), vec!["1", "2", "3", "4", "5", "6", "7"]);
        assert_eq!(
            tasks[0].description,
            "Identify top 5 competitors - pricing and positioning"
        );
    }
}
