//! Minimal helpers for pipe-table markdown.

/// Lines that belong to a pipe table (first non-space character is `|`).
pub fn table_lines(markdown: &str) -> Vec<&str> {
    markdown
        .lines()
        .map(str::trim)
        .filter(|line| line.starts_with('|'))
        .collect()
}

/// Split one table row into trimmed cell texts.
pub fn split_cells(line: &str) -> Vec<String> {
    let inner = line.trim();
    let inner = inner.strip_prefix('|').unwrap_or(inner);
    let inner = inner.strip_suffix('|').unwrap_or(inner);
    inner.split('|').map(|cell| cell.trim().to_string()).collect()
}

/// Column count of the first table row, or 0 when there is no table.
pub fn column_count(markdown: &str) -> usize {
    table_lines(markdown)
        .first()
        .map(|line| split_cells(line).len())
        .unwrap_or(0)
}

/// Cell texts of the first table row.
pub fn header_cells(markdown: &str) -> Vec<String> {
    table_lines(markdown)
        .first()
        .map(|line| split_cells(line))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    const TABLE: &str = indoc! {"
        表6-2 疏散距离
        | 名称 | 一级 | 二级 |
        |---|---|---|
        | 住宅 | 40 | 35 |
    "};

    #[test]
    fn ignores_non_table_lines() {
        assert_eq!(table_lines(TABLE).len(), 3);
    }

    #[test]
    fn counts_columns_from_first_row() {
        assert_eq!(column_count(TABLE), 3);
        assert_eq!(header_cells(TABLE), vec!["名称", "一级", "二级"]);
    }

    #[test]
    fn no_table_means_zero_columns() {
        assert_eq!(column_count("plain prose"), 0);
        assert!(header_cells("plain prose").is_empty());
    }
}
