pub(super) fn push_line(module: &mut String, indent: usize, line: &str) {
    if line.is_empty() {
        module.push('\n');
        return;
    }
    module.push_str(&"  ".repeat(indent));
    module.push_str(line);
    module.push('\n');
}

/// Pushes a multi-line block, stripping its common leading whitespace and
/// re-indenting it at `indent`.
pub(super) fn push_block(module: &mut String, indent: usize, block: &str) {
    if block.is_empty() {
        return;
    }
    let mut lines: Vec<&str> = block.split('\n').collect();
    if matches!(lines.first(), Some(line) if line.trim().is_empty()) {
        lines.remove(0);
    }
    if matches!(lines.last(), Some(line) if line.trim().is_empty()) {
        lines.pop();
    }

    let min_indent = lines
        .iter()
        .filter(|line| !line.trim().is_empty())
        .map(|line| line.chars().take_while(|c| *c == ' ' || *c == '\t').count())
        .min()
        .unwrap_or(0);

    for line in lines {
        if line.trim().is_empty() {
            module.push('\n');
            continue;
        }
        push_line(module, indent, &line[min_indent..]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_block_reindents() {
        let mut module = String::new();
        push_block(
            &mut module,
            1,
            r#"
                for (;;) {
                  break;
                }
            "#,
        );
        assert_eq!(module, "  for (;;) {\n    break;\n  }\n");
    }
}
