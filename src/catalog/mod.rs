pub mod updater;

use std::path::{Path, PathBuf};

use csv::{ReaderBuilder, StringRecord};
use tracing::warn;

use crate::config::Settings;
use crate::error::CatalogError;
use crate::gallery::ProductId;

pub use updater::update_catalog;

/// Header name with BOM, surrounding whitespace and stray quote characters removed.
///
/// Every column lookup goes through this, so `Identificador URL` and
/// `"Identificador URL"` resolve to the same column.
pub fn canonical_header(raw: &str) -> &str {
    raw.trim_start_matches('\u{feff}')
        .trim()
        .trim_matches('"')
        .trim()
}

/// A parsed catalog: canonical headers plus raw rows, in file order.
#[derive(Debug)]
pub struct Catalog {
    pub path: PathBuf,
    pub headers: Vec<String>,
    pub rows: Vec<StringRecord>,
    id_column: usize,
}

impl Catalog {
    pub fn read(path: &Path, settings: &Settings) -> Result<Catalog, CatalogError> {
        let read_err = |source| CatalogError::Read {
            path: path.to_path_buf(),
            source,
        };

        let mut reader = ReaderBuilder::new()
            .delimiter(settings.delimiter_byte())
            .has_headers(true)
            .flexible(true)
            .from_path(path)
            .map_err(read_err)?;

        let headers: Vec<String> = reader
            .headers()
            .map_err(read_err)?
            .iter()
            .map(|h| canonical_header(h).to_string())
            .collect();

        let id_column = column_index(&headers, &settings.identifier_column).ok_or_else(|| {
            CatalogError::MissingColumn {
                column: settings.identifier_column.clone(),
                path: path.to_path_buf(),
            }
        })?;

        let rows = reader
            .records()
            .collect::<Result<Vec<_>, _>>()
            .map_err(read_err)?;

        Ok(Catalog {
            path: path.to_path_buf(),
            headers,
            rows,
            id_column,
        })
    }

    pub fn column(&self, name: &str) -> Option<usize> {
        column_index(&self.headers, name)
    }

    /// Raw identifier field of `row`, trimmed; `None` when missing or blank.
    pub fn identifier_field<'r>(&self, row: &'r StringRecord) -> Option<&'r str> {
        row.get(self.id_column)
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }

    /// Valid identifiers in file order. Blank fields are skipped silently,
    /// unusable ones with a warning.
    pub fn identifiers(&self) -> Vec<ProductId> {
        self.rows
            .iter()
            .filter_map(|row| self.identifier_field(row))
            .filter_map(|raw| {
                let id = ProductId::parse(raw);
                if id.is_none() {
                    warn!("Skipping unusable identifier {:?}", raw);
                }
                id
            })
            .collect()
    }
}

fn column_index(headers: &[String], name: &str) -> Option<usize> {
    let wanted = canonical_header(name);
    headers.iter().position(|h| h == wanted)
}
