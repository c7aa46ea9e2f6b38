//! HTML listing of the document root.

use std::fmt::Write as _;
use std::io;
use std::path::Path;

/// A listed file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingEntry {
    pub name: String,
    pub size: u64,
}

/// Regular files directly under `root`, sorted by name.
pub async fn read_entries(root: &Path) -> io::Result<Vec<ListingEntry>> {
    let mut dir = tokio::fs::read_dir(root).await?;
    let mut entries = Vec::new();

    while let Some(entry) = dir.next_entry().await? {
        let meta = match entry.metadata().await {
            Ok(meta) => meta,
            Err(e) => {
                tracing::debug!(path = %entry.path().display(), error = %e, "skipping entry");
                continue;
            }
        };
        if meta.is_dir() {
            continue;
        }
        entries.push(ListingEntry {
            name: entry.file_name().to_string_lossy().into_owned(),
            size: meta.len(),
        });
    }

    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}

/// Render the listing page.
pub fn render(title: &str, entries: &[ListingEntry]) -> String {
    let mut html = String::with_capacity(1024 + entries.len() * 128);
    html.push_str(HEAD);
    let _ = writeln!(html, "    <title>{}</title>", escape(title));
    html.push_str(TABLE_START);

    for entry in entries {
        let name = escape(&entry.name);
        let _ = write!(
            html,
            "      <tr>\n        <td><a href=\"/{name}\" download>{name}</a></td>\n        <td>{}</td>\n      </tr>\n",
            size_unit(entry.size)
        );
    }

    html.push_str(TAIL);
    html
}

/// Size in the largest whole unit: MB, KB or Bytes.
pub fn size_unit(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * 1024;

    if bytes >= MB {
        format!("{} MB", bytes / MB)
    } else if bytes >= KB {
        format!("{} KB", bytes / KB)
    } else {
        format!("{bytes} Bytes")
    }
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

const HEAD: &str = r#"<!DOCTYPE html>
<html>
  <head>
    <meta charset="UTF-8">
    <link rel="shortcut icon" href="data:," />
    <style>
      a { color: blue; }
      a:hover { color: purple; }
    </style>
"#;

const TABLE_START: &str = r#"  </head>
  <body>
    <table style="border-spacing: 5px;">
      <tr>
        <td style="border: 1px solid; min-width: 100px;">Name</td>
        <td style="border: 1px solid;">Size</td>
      </tr>
"#;

const TAIL: &str = "    </table>\n  </body>\n</html>";
