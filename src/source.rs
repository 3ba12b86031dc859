//! Reference [`DocumentSource`] adapters for files and in-memory documents.

use std::{
    collections::HashMap,
    io::{BufRead, BufReader, Read},
    path::Path,
};

use encoding_rs::{Encoding, UTF_8};
use log::debug;
use serde_json::Value as JsonValue;

use crate::{
    document::{DocumentSource, GenericDocument, Node},
    error::DocumentError,
    io_utils::{self, InputFormat},
};

fn open(input: &str) -> Result<Box<dyn Read>, DocumentError> {
    let path = Path::new(input);
    if !io_utils::is_dash(path) && !path.exists() {
        return Err(DocumentError::NotFound {
            input: input.to_string(),
        });
    }
    io_utils::open_input(path).map_err(|source| DocumentError::Read {
        input: input.to_string(),
        source,
    })
}

fn parse_error(input: &str, message: impl Into<String>) -> DocumentError {
    DocumentError::Parse {
        input: input.to_string(),
        message: message.into(),
    }
}

/// JSON documents: a single object, an array of objects, or JSON Lines when
/// the extension is `.jsonl` / `.ndjson`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonDocumentSource;

impl JsonDocumentSource {
    fn read_lines(&self, input: &str, reader: Box<dyn Read>) -> Result<Vec<Node>, DocumentError> {
        let mut records = Vec::new();
        for (idx, line) in BufReader::new(reader).lines().enumerate() {
            let line = line.map_err(|source| DocumentError::Read {
                input: input.to_string(),
                source,
            })?;
            if line.trim().is_empty() {
                continue;
            }
            let value: JsonValue = serde_json::from_str(&line)
                .map_err(|err| parse_error(input, format!("line {}: {err}", idx + 1)))?;
            records.push(Node::from(value));
        }
        Ok(records)
    }
}

impl DocumentSource for JsonDocumentSource {
    fn fetch(&self, input: &str) -> Result<GenericDocument, DocumentError> {
        let reader = open(input)?;
        let document = if InputFormat::from_path(Path::new(input)) == Some(InputFormat::JsonLines) {
            GenericDocument::new(self.read_lines(input, reader)?)
        } else {
            let value: JsonValue = serde_json::from_reader(reader)
                .map_err(|err| parse_error(input, err.to_string()))?;
            GenericDocument::from_json(value)
        };
        debug!("Read {} JSON record(s) from '{input}'", document.len());
        Ok(document.with_source(input))
    }
}

/// CSV with a header row. Empty cells are `Null`; everything else is
/// untyped text left for the builder to classify.
#[derive(Debug, Clone, Copy)]
pub struct CsvDocumentSource {
    delimiter: Option<u8>,
    encoding: &'static Encoding,
}

impl Default for CsvDocumentSource {
    fn default() -> Self {
        Self {
            delimiter: None,
            encoding: UTF_8,
        }
    }
}

impl CsvDocumentSource {
    pub fn new(delimiter: Option<u8>, encoding: &'static Encoding) -> Self {
        Self {
            delimiter,
            encoding,
        }
    }
}

impl DocumentSource for CsvDocumentSource {
    fn fetch(&self, input: &str) -> Result<GenericDocument, DocumentError> {
        let path = Path::new(input);
        let delimiter = io_utils::resolve_input_delimiter(path, self.delimiter);
        let mut reader = io_utils::open_csv_reader(open(input)?, delimiter);
        let headers = io_utils::reader_headers(&mut reader, self.encoding)
            .map_err(|err| parse_error(input, format!("{err:#}")))?;

        let mut records = Vec::new();
        let mut row = csv::ByteRecord::new();
        loop {
            match reader.read_byte_record(&mut row) {
                Ok(true) => {}
                Ok(false) => break,
                Err(err) => return Err(parse_error(input, err.to_string())),
            }
            let cells = io_utils::decode_record(&row, self.encoding).map_err(|err| {
                parse_error(input, format!("row {}: {err:#}", records.len() + 1))
            })?;
            records.push(Node::Map(
                headers
                    .iter()
                    .zip(cells)
                    .map(|(header, cell)| {
                        let value = if cell.trim().is_empty() {
                            Node::Null
                        } else {
                            Node::Text(cell)
                        };
                        (header.trim().to_string(), value)
                    })
                    .collect(),
            ));
        }
        debug!(
            "Read {} CSV row(s) across {} column(s) from '{input}'",
            records.len(),
            headers.len()
        );
        Ok(GenericDocument::new(records).with_source(input))
    }
}

/// Picks the JSON or CSV source by file extension.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileDocumentSource {
    json: JsonDocumentSource,
    csv: CsvDocumentSource,
}

impl FileDocumentSource {
    pub fn new(csv: CsvDocumentSource) -> Self {
        Self {
            json: JsonDocumentSource,
            csv,
        }
    }
}

impl DocumentSource for FileDocumentSource {
    fn fetch(&self, input: &str) -> Result<GenericDocument, DocumentError> {
        match InputFormat::from_path(Path::new(input)) {
            Some(InputFormat::Json | InputFormat::JsonLines) => self.json.fetch(input),
            Some(InputFormat::Csv) => self.csv.fetch(input),
            None if io_utils::is_dash(Path::new(input)) => self.json.fetch(input),
            None => Err(DocumentError::UnsupportedFormat {
                input: input.to_string(),
            }),
        }
    }
}

/// Documents registered under a name; for embedding and tests.
#[derive(Debug, Clone, Default)]
pub struct InMemorySource {
    documents: HashMap<String, GenericDocument>,
}

impl InMemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_document(mut self, name: impl Into<String>, document: GenericDocument) -> Self {
        let name = name.into();
        self.documents
            .insert(name.clone(), document.with_source(name));
        self
    }

    pub fn with_json(self, name: impl Into<String>, value: JsonValue) -> Self {
        self.with_document(name, GenericDocument::from_json(value))
    }
}

impl DocumentSource for InMemorySource {
    fn fetch(&self, input: &str) -> Result<GenericDocument, DocumentError> {
        self.documents
            .get(input)
            .cloned()
            .ok_or_else(|| DocumentError::NotFound {
                input: input.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn csv_cells_are_untyped_text() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("orders.csv");
        fs::write(&path, "id,amount,note\n1,12.50,\n2,7,late\n").unwrap();
        let document = CsvDocumentSource::default()
            .fetch(path.to_str().unwrap())
            .unwrap();
        assert_eq!(document.len(), 2);
        assert_eq!(
            document.records[0],
            Node::map([
                ("id", Node::Text("1".to_string())),
                ("amount", Node::Text("12.50".to_string())),
                ("note", Node::Null),
            ])
        );
    }

    #[test]
    fn json_lines_skip_blank_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        fs::write(&path, "{\"id\": 1}\n\n{\"id\": 2}\n").unwrap();
        let document = FileDocumentSource::default()
            .fetch(path.to_str().unwrap())
            .unwrap();
        assert_eq!(document.len(), 2);
    }

    #[test]
    fn malformed_json_names_the_line() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        fs::write(&path, "{\"id\": 1}\n{oops}\n").unwrap();
        let err = JsonDocumentSource.fetch(path.to_str().unwrap()).unwrap_err();
        assert!(err.to_string().contains("line 2"), "{err}");
    }

    #[test]
    fn unknown_extensions_are_unsupported() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("blob.parquet");
        fs::write(&path, b"PAR1").unwrap();
        let err = FileDocumentSource::default()
            .fetch(path.to_str().unwrap())
            .unwrap_err();
        assert!(matches!(err, DocumentError::UnsupportedFormat { .. }));
        let missing = JsonDocumentSource.fetch("/nonexistent/input.json").unwrap_err();
        assert!(matches!(missing, DocumentError::NotFound { .. }));
    }
}
