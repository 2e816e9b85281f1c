use std::io::IsTerminal;

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

/// Print one JSON document on a single line.
pub fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

pub fn print_table(header: &[&str], rows: Vec<Vec<String>>) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header.to_vec());
    for row in rows {
        table.add_row(row);
    }
    println!("{table}");
}

/// Two-column key/value listing.
pub fn print_fields(fields: &[(&str, String)], format: OutputFormat) {
    match format {
        OutputFormat::Table => print_table(
            &["FIELD", "VALUE"],
            fields
                .iter()
                .map(|(key, value)| vec![key.to_string(), value.clone()])
                .collect(),
        ),
        OutputFormat::Pretty | OutputFormat::Json => {
            for (key, value) in fields {
                println!("{key}: {value}");
            }
        }
    }
}

/// Lowercase hex, eight bytes per line.
pub fn hex_words(data: &[u8]) -> Vec<String> {
    data.chunks(8)
        .map(|word| word.iter().map(|b| format!("{b:02x}")).collect::<Vec<_>>().join(" "))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_groups_by_word() {
        let data: Vec<u8> = (0..10).collect();
        assert_eq!(
            hex_words(&data),
            vec!["00 01 02 03 04 05 06 07".to_string(), "08 09".to_string()]
        );
    }
}
