use std::io::{self, Write};

use tabwriter::TabWriter;

/// Column-aligned plain text table with a title line.
pub fn render(title: &str, headers: &[&str], rows: &[Vec<String>]) -> io::Result<String> {
    let mut tab_writer = TabWriter::new(Vec::new()).padding(3);
    writeln!(&mut tab_writer, "{}", headers.join("\t"))?;
    writeln!(
        &mut tab_writer,
        "{}",
        headers
            .iter()
            .map(|h| "-".repeat(h.len()))
            .collect::<Vec<_>>()
            .join("\t")
    )?;
    for row in rows {
        writeln!(&mut tab_writer, "{}", row.join("\t"))?;
    }
    tab_writer.flush()?;

    let body = tab_writer
        .into_inner()
        .map_err(|_| io::Error::new(io::ErrorKind::Other, "table flush failed"))?;
    Ok(format!("{}\n{}", title, String::from_utf8_lossy(&body)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_columns_are_aligned() {
        let rows = vec![
            vec!["1".to_string(), "gdrive".to_string()],
            vec!["2".to_string(), "s3".to_string()],
        ];
        let table = render("Available Cloud Drives", &["Number", "Remote Name"], &rows).unwrap();
        let lines: Vec<&str> = table.lines().collect();

        assert_eq!(lines[0], "Available Cloud Drives");
        assert!(lines[1].starts_with("Number"));
        let column = lines[1].find("Remote Name").unwrap();
        assert_eq!(lines[3].find("gdrive"), Some(column));
        assert_eq!(lines[4].find("s3"), Some(column));
    }
}
