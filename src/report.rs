// Per-artifact HTML report, written incrementally as commands complete
use crate::render::ReportFragment;
use chrono::Local;
use std::borrow::Cow;
use std::fmt::Display;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

const STYLE: &str = "\
body { font-family: Arial, sans-serif; }
a { color: #1a73e8; text-decoration: none; }
a:hover { text-decoration: underline; }
pre { background: #f4f4f4; padding: 10px; border-radius: 5px; }
table { border-collapse: collapse; width: 100%; }
th, td { border: 1px solid #ddd; padding: 8px; text-align: left; }
th { background-color: #f2f2f2; }
.error { color: red; }
";

const IMPORT_HEADERS: [&str; 7] = ["nth", "vaddr", "bind", "type", "lib", "name", "Description"];
const EXPORT_HEADERS: [&str; 9] = [
    "nth", "paddr", "vaddr", "bind", "type", "size", "lib", "name", "demangled",
];
const STRING_HEADERS: [&str; 8] = [
    "Field 1", "Field 2", "Address", "Field 4", "Field 5", "Type", "Encoding", "Value",
];

/// Report location for an artifact: `<output_dir>/<file stem>.html`.
pub fn report_path(output_dir: &Path, artifact: &Path) -> PathBuf {
    let stem = artifact
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "artifact".to_string());
    output_dir.join(format!("{}.html", stem))
}

/// Anchor id of a command's section. Indexed so repeated commands stay unique.
pub fn section_anchor(index: usize, command: &str) -> String {
    let slug: String = command
        .chars()
        .map(|c| if c.is_whitespace() { '_' } else { c })
        .collect();
    format!("cmd-{}-{}", index, slug)
}

/// Owns one artifact's report file for the lifetime of its session.
pub struct ReportWriter {
    out: BufWriter<File>,
    path: PathBuf,
    artifact: String,
}

impl ReportWriter {
    /// Create the file and write the header plus the full table of contents.
    pub fn create(path: &Path, artifact: &Path, commands: &[String]) -> io::Result<Self> {
        let file = File::create(path)?;
        let mut writer = Self {
            out: BufWriter::new(file),
            path: path.to_path_buf(),
            artifact: artifact.display().to_string(),
        };
        writer.write_header(commands)?;
        Ok(writer)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_header(&mut self, commands: &[String]) -> io::Result<()> {
        let title = escape(&self.artifact);
        let out = &mut self.out;

        writeln!(out, "<!DOCTYPE html>\n<html>\n<head>")?;
        writeln!(out, "<meta charset=\"utf-8\">")?;
        writeln!(out, "<title>Analysis Results for {}</title>", title)?;
        writeln!(out, "<style>\n{}</style>", STYLE)?;
        writeln!(out, "</head>\n<body>")?;
        writeln!(out, "<h1>Analysis Results for {}</h1>", title)?;
        writeln!(
            out,
            "<p>Generated {}</p>",
            Local::now().format("%Y-%m-%d %H:%M:%S")
        )?;

        writeln!(out, "<h2>Commands:</h2>\n<ul>")?;
        for (index, command) in commands.iter().enumerate() {
            writeln!(
                out,
                "<li><a href=\"#{}\">{}</a></li>",
                escape(&section_anchor(index, command)),
                escape(command)
            )?;
        }
        writeln!(out, "</ul>\n<h2>Results:</h2>")?;

        out.flush()
    }

    fn write_heading(&mut self, index: usize, command: &str) -> io::Result<()> {
        writeln!(
            self.out,
            "<h3 id=\"{}\">Command: {}</h3>",
            escape(&section_anchor(index, command)),
            escape(command)
        )
    }

    /// Append one command's section and flush it to disk.
    pub fn write_fragment(
        &mut self,
        index: usize,
        command: &str,
        fragment: &ReportFragment,
    ) -> io::Result<()> {
        self.write_heading(index, command)?;

        match fragment {
            ReportFragment::GenericBlock(text) => {
                writeln!(self.out, "<pre>{}</pre>", escape(text))?;
            }
            ReportFragment::ImportTable(rows) => {
                self.write_table(
                    "Imports",
                    &IMPORT_HEADERS,
                    rows.iter().map(|r| {
                        vec![
                            r.ordinal.as_str(),
                            &r.virtual_address,
                            &r.binding,
                            &r.kind,
                            &r.library,
                            &r.symbol,
                            &r.description,
                        ]
                    }),
                )?;
            }
            ReportFragment::ExportTable(rows) => {
                self.write_table(
                    "Exports",
                    &EXPORT_HEADERS,
                    rows.iter().map(|r| {
                        vec![
                            r.ordinal.as_str(),
                            &r.physical_address,
                            &r.virtual_address,
                            &r.binding,
                            &r.kind,
                            &r.size,
                            &r.library,
                            &r.symbol,
                            &r.demangled_name,
                        ]
                    }),
                )?;
            }
            ReportFragment::StringTable(rows) => {
                self.write_table(
                    "Strings",
                    &STRING_HEADERS,
                    rows.iter().map(|r| {
                        vec![
                            r.field1.as_str(),
                            &r.field2,
                            &r.address,
                            &r.field4,
                            &r.field5,
                            &r.kind,
                            &r.encoding,
                            &r.value,
                        ]
                    }),
                )?;
            }
        }

        self.out.flush()
    }

    /// Append a visibly marked error section for a command that failed.
    pub fn write_command_error(
        &mut self,
        index: usize,
        command: &str,
        error: &dyn Display,
    ) -> io::Result<()> {
        self.write_heading(index, command)?;
        writeln!(
            self.out,
            "<p class=\"error\">Error executing command '{}' for {}: {}</p>",
            escape(command),
            escape(&self.artifact),
            escape(&error.to_string())
        )?;
        self.out.flush()
    }

    fn write_table<'a>(
        &mut self,
        caption: &str,
        headers: &[&str],
        rows: impl Iterator<Item = Vec<&'a str>>,
    ) -> io::Result<()> {
        writeln!(self.out, "<h4>{}:</h4>\n<table>", caption)?;

        write!(self.out, "<tr>")?;
        for header in headers {
            write!(self.out, "<th>{}</th>", header)?;
        }
        writeln!(self.out, "</tr>")?;

        for row in rows {
            write!(self.out, "<tr>")?;
            for cell in row {
                write!(self.out, "<td>{}</td>", escape(cell))?;
            }
            writeln!(self.out, "</tr>")?;
        }

        writeln!(self.out, "</table>")
    }

    /// Close the document and return its path.
    pub fn finish(mut self) -> io::Result<PathBuf> {
        writeln!(self.out, "</body>\n</html>")?;
        self.out.flush()?;
        Ok(self.path)
    }
}

fn escape(text: &str) -> Cow<'_, str> {
    if !text.contains(['&', '<', '>', '"', '\'']) {
        return Cow::Borrowed(text);
    }

    let mut escaped = String::with_capacity(text.len() + 16);
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    Cow::Owned(escaped)
}
