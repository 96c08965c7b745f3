//! Turns the raw text of one engine command into a report fragment.
//!
//! Three command families are recognised and parsed into tables by positional
//! whitespace-separated fields:
//! - imports (`ii`): header line, then `nth vaddr bind type lib name ...`
//! - exports (`iE`): header line, then `nth paddr vaddr bind type size lib name demangled...`
//! - strings (`izz*`): no header, `f1 f2 addr f4 f5 type encoding value...`
//!
//! Everything else, and blank string/export output, becomes a preformatted block.
//! Rows with too few fields are dropped one by one; the rest of the table survives.

use crate::aggregator::MissingDescriptor;
use crate::catalog::DescriptorCatalog;

pub const NO_DESCRIPTION: &str = "No description available";

const IMPORT_FIELDS: usize = 6;
const EXPORT_FIELDS: usize = 9;
const STRING_FIELDS: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportRecord {
    pub ordinal: String,
    pub virtual_address: String,
    pub binding: String,
    pub kind: String,
    pub library: String,
    pub symbol: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportRecord {
    pub ordinal: String,
    pub physical_address: String,
    pub virtual_address: String,
    pub binding: String,
    pub kind: String,
    pub size: String,
    pub library: String,
    pub symbol: String,
    pub demangled_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StringRecord {
    pub field1: String,
    pub field2: String,
    pub address: String,
    pub field4: String,
    pub field5: String,
    pub kind: String,
    pub encoding: String,
    /// Remainder of the line, inner whitespace collapsed to single spaces.
    pub value: String,
}

/// One rendered unit of report output for one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportFragment {
    GenericBlock(String),
    ImportTable(Vec<ImportRecord>),
    ExportTable(Vec<ExportRecord>),
    StringTable(Vec<StringRecord>),
}

impl ReportFragment {
    pub fn row_count(&self) -> Option<usize> {
        match self {
            ReportFragment::GenericBlock(_) => None,
            ReportFragment::ImportTable(rows) => Some(rows.len()),
            ReportFragment::ExportTable(rows) => Some(rows.len()),
            ReportFragment::StringTable(rows) => Some(rows.len()),
        }
    }
}

/// Renderer output: the fragment plus what the session has to forward.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    pub fragment: ReportFragment,
    /// Imported symbols with no catalog entry, in row order.
    pub unresolved: Vec<MissingDescriptor>,
    /// Table rows dropped for having too few fields.
    pub skipped_rows: usize,
}

impl Rendered {
    fn generic(output: &str) -> Self {
        Self {
            fragment: ReportFragment::GenericBlock(output.to_string()),
            unresolved: Vec::new(),
            skipped_rows: 0,
        }
    }
}

/// Output-format strategy. Swappable per engine output version without
/// touching sessions or the orchestrator.
pub trait Renderer: Sync {
    fn render(&self, command: &str, output: &str, catalog: &DescriptorCatalog) -> Rendered;
}

/// Command names that select the structured tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableCommands {
    pub imports: String,
    pub exports: String,
    /// Any command starting with this prefix is a strings listing.
    pub strings_prefix: String,
}

impl Default for TableCommands {
    fn default() -> Self {
        Self {
            imports: "ii".to_string(),
            exports: "iE".to_string(),
            strings_prefix: "izz".to_string(),
        }
    }
}

/// Positional field parser for radare2's plain-text listings.
#[derive(Debug, Clone, Default)]
pub struct PositionalRenderer {
    commands: TableCommands,
}

impl PositionalRenderer {
    pub fn new(commands: TableCommands) -> Self {
        Self { commands }
    }
}

impl Renderer for PositionalRenderer {
    fn render(&self, command: &str, output: &str, catalog: &DescriptorCatalog) -> Rendered {
        let blank = output.trim().is_empty();

        if command == self.commands.imports {
            render_imports(output, catalog)
        } else if command.starts_with(self.commands.strings_prefix.as_str()) && !blank {
            render_strings(output)
        } else if command == self.commands.exports && !blank {
            render_exports(output)
        } else {
            Rendered::generic(output)
        }
    }
}

fn render_imports(output: &str, catalog: &DescriptorCatalog) -> Rendered {
    let (fields, skipped_rows) = split_rows(output.lines().skip(1), IMPORT_FIELDS);
    let mut rows = Vec::with_capacity(fields.len());
    let mut unresolved = Vec::new();

    for parts in fields {
        let (library, symbol) = (parts[4], parts[5]);
        let description = match catalog.lookup(symbol) {
            Some(text) => text.to_string(),
            None => {
                unresolved.push(MissingDescriptor::new(library, symbol));
                NO_DESCRIPTION.to_string()
            }
        };

        rows.push(ImportRecord {
            ordinal: parts[0].to_string(),
            virtual_address: parts[1].to_string(),
            binding: parts[2].to_string(),
            kind: parts[3].to_string(),
            library: library.to_string(),
            symbol: symbol.to_string(),
            description,
        });
    }

    Rendered {
        fragment: ReportFragment::ImportTable(rows),
        unresolved,
        skipped_rows,
    }
}

fn render_exports(output: &str) -> Rendered {
    let (fields, skipped_rows) = split_rows(output.lines().skip(1), EXPORT_FIELDS);
    let rows = fields
        .into_iter()
        .map(|parts| ExportRecord {
            ordinal: parts[0].to_string(),
            physical_address: parts[1].to_string(),
            virtual_address: parts[2].to_string(),
            binding: parts[3].to_string(),
            kind: parts[4].to_string(),
            size: parts[5].to_string(),
            library: parts[6].to_string(),
            symbol: parts[7].to_string(),
            demangled_name: parts[8..].join(" "),
        })
        .collect();

    Rendered {
        fragment: ReportFragment::ExportTable(rows),
        unresolved: Vec::new(),
        skipped_rows,
    }
}

fn render_strings(output: &str) -> Rendered {
    let (fields, skipped_rows) = split_rows(output.lines(), STRING_FIELDS);
    let rows = fields
        .into_iter()
        .map(|parts| StringRecord {
            field1: parts[0].to_string(),
            field2: parts[1].to_string(),
            address: parts[2].to_string(),
            field4: parts[3].to_string(),
            field5: parts[4].to_string(),
            kind: parts[5].to_string(),
            encoding: parts[6].to_string(),
            value: parts[7..].join(" "),
        })
        .collect();

    Rendered {
        fragment: ReportFragment::StringTable(rows),
        unresolved: Vec::new(),
        skipped_rows,
    }
}

/// Split lines into whitespace fields, keeping rows with at least `min_fields`.
/// Returns the kept rows and how many non-blank lines were dropped.
fn split_rows<'a>(
    lines: impl Iterator<Item = &'a str>,
    min_fields: usize,
) -> (Vec<Vec<&'a str>>, usize) {
    let mut rows = Vec::new();
    let mut skipped = 0;

    for line in lines {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() >= min_fields {
            rows.push(parts);
        } else if !parts.is_empty() {
            skipped += 1;
        }
    }

    (rows, skipped)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> DescriptorCatalog {
        [("CreateFileW", "Creates a file")].into_iter().collect()
    }

    #[test]
    fn test_imports_table_with_descriptions() {
        let output = "nth vaddr      bind   type lib          name\n\
                      1   0x1000     GLOBAL FUNC kernel32.dll CreateFileW\n\
                      2   0x2004     GLOBAL FUNC kernel32.dll UnknownFunc\n";
        let rendered = PositionalRenderer::default().render("ii", output, &catalog());

        let ReportFragment::ImportTable(rows) = &rendered.fragment else {
            panic!("expected import table, got {:?}", rendered.fragment);
        };
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].symbol, "CreateFileW");
        assert_eq!(rows[0].description, "Creates a file");
        assert_eq!(rows[1].description, NO_DESCRIPTION);
        assert_eq!(
            rendered.unresolved,
            vec![MissingDescriptor::new("kernel32.dll", "UnknownFunc")]
        );
    }

    #[test]
    fn test_malformed_rows_are_dropped() {
        let output = "header\n\
                      1 0x1000 GLOBAL FUNC kernel32.dll CreateFileW\n\
                      2 0x2000 GLOBAL\n\
                      garbage\n\
                      3 0x3000 WEAK FUNC user32.dll MessageBoxA extra tokens\n";
        let rendered = PositionalRenderer::default().render("ii", output, &catalog());

        assert_eq!(rendered.fragment.row_count(), Some(2));
        assert_eq!(rendered.skipped_rows, 2);
        let ReportFragment::ImportTable(rows) = &rendered.fragment else {
            panic!("expected import table");
        };
        assert_eq!(rows[1].symbol, "MessageBoxA");
        assert_eq!(rows[1].kind, "FUNC");
    }

    #[test]
    fn test_blank_imports_render_empty_table() {
        let rendered = PositionalRenderer::default().render("ii", "", &catalog());
        assert_eq!(rendered.fragment, ReportFragment::ImportTable(Vec::new()));
        assert!(rendered.unresolved.is_empty());
    }

    #[test]
    fn test_exports_join_demangled_name() {
        let output = "nth paddr vaddr bind type size lib name demangled\n\
                      0 0x400 0x401000 GLOBAL FUNC 12 app.dll _Z3fooi foo(int, char const*)\n\
                      1 0x500 0x402000 GLOBAL FUNC 8 app.dll\n";
        let rendered = PositionalRenderer::default().render("iE", output, &catalog());

        let ReportFragment::ExportTable(rows) = &rendered.fragment else {
            panic!("expected export table");
        };
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].symbol, "_Z3fooi");
        assert_eq!(rows[0].demangled_name, "foo(int, char const*)");
        assert_eq!(rendered.skipped_rows, 1);
    }

    #[test]
    fn test_strings_have_no_header() {
        let output = "0 0x00000400 0x00401000 5 6 .rdata ascii hello world\n\
                      1 0x00000410 0x00401010 3 4 .rdata utf16le abc\n\
                      too few fields\n";
        let rendered = PositionalRenderer::default().render("izz~http", output, &catalog());

        let ReportFragment::StringTable(rows) = &rendered.fragment else {
            panic!("expected string table");
        };
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].address, "0x00401000");
        assert_eq!(rows[0].encoding, "ascii");
        assert_eq!(rows[0].value, "hello world");
        assert_eq!(rows[1].kind, ".rdata");
        assert_eq!(rows[1].encoding, "utf16le");
        assert_eq!(rendered.skipped_rows, 1);
    }

    #[test]
    fn test_blank_structured_output_falls_back_to_block() {
        let renderer = PositionalRenderer::default();
        for command in ["izz", "iE"] {
            let rendered = renderer.render(command, "  \n", &catalog());
            assert_eq!(
                rendered.fragment,
                ReportFragment::GenericBlock("  \n".to_string()),
                "command {}",
                command
            );
        }
    }

    #[test]
    fn test_other_commands_are_generic() {
        let output = "arch     x86\nbits     64\n";
        let rendered = PositionalRenderer::default().render("i", output, &catalog());
        assert_eq!(rendered.fragment, ReportFragment::GenericBlock(output.to_string()));
        assert_eq!(rendered.fragment.row_count(), None);
    }

    #[test]
    fn test_custom_table_commands() {
        let renderer = PositionalRenderer::new(TableCommands {
            imports: "list-imports".to_string(),
            exports: "list-exports".to_string(),
            strings_prefix: "list-strings".to_string(),
        });
        let output = "header\n1 0x1000 GLOBAL FUNC kernel32.dll CreateFileW\n";

        let rendered = renderer.render("list-imports", output, &catalog());
        assert_eq!(rendered.fragment.row_count(), Some(1));

        let rendered = renderer.render("ii", output, &catalog());
        assert!(matches!(rendered.fragment, ReportFragment::GenericBlock(_)));
    }
}
