use std::path::{Path, PathBuf};

use csv::{QuoteStyle, StringRecord, WriterBuilder};
use tracing::{debug, info, warn};

use super::Catalog;
use crate::config::Settings;
use crate::error::CatalogError;
use crate::gallery::ProductId;

pub struct UpdateSummary {
    pub rows: usize,
    pub with_images: usize,
    pub urls: usize,
}

/// Rewrite the catalog at `input` into `output` (usually the same file) with
/// the URL column filled from the image directories under `image_root`.
pub fn update_catalog(
    settings: &Settings,
    input: &Path,
    output: &Path,
) -> Result<UpdateSummary, CatalogError> {
    rewrite_catalog(settings, input, output, |id| image_urls(settings, id))
}

fn rewrite_catalog<R>(
    settings: &Settings,
    input: &Path,
    output: &Path,
    resolve: R,
) -> Result<UpdateSummary, CatalogError>
where
    R: Fn(&ProductId) -> Result<Vec<String>, CatalogError>,
{
    let catalog = Catalog::read(input, settings)?;
    info!("Read {} records from {}", catalog.rows.len(), input.display());

    let mut headers = catalog.headers.clone();
    let url_column = match catalog.column(&settings.url_column) {
        Some(i) => i,
        None => {
            // Appended after the widest row so trailing unnamed fields survive.
            let widest = catalog.rows.iter().map(StringRecord::len).max().unwrap_or(0);
            if widest > headers.len() {
                warn!(
                    "{} has rows with {} fields but only {} headers; padding the header",
                    input.display(),
                    widest,
                    headers.len()
                );
                headers.resize(widest, String::new());
            }
            headers.push(settings.url_column.clone());
            headers.len() - 1
        }
    };

    let mut summary = UpdateSummary {
        rows: 0,
        with_images: 0,
        urls: 0,
    };
    let mut records = Vec::with_capacity(catalog.rows.len());
    for row in &catalog.rows {
        summary.rows += 1;
        let urls = row_urls(&catalog, row, summary.rows, &resolve);
        if !urls.is_empty() {
            summary.with_images += 1;
            summary.urls += urls.len();
        }
        records.push(with_field(row, headers.len(), url_column, &urls.join(",")));
    }

    write_records(settings, output, &headers, &records)?;
    info!("Updated {} with image URLs", output.display());
    Ok(summary)
}

/// URLs for one catalog row. A row whose directory cannot be listed gets none.
fn row_urls<R>(catalog: &Catalog, row: &StringRecord, line: usize, resolve: &R) -> Vec<String>
where
    R: Fn(&ProductId) -> Result<Vec<String>, CatalogError>,
{
    let raw = match catalog.identifier_field(row) {
        Some(raw) => raw,
        None => {
            warn!("Row {} has no identifier", line);
            return Vec::new();
        }
    };
    let id = match ProductId::parse(raw) {
        Some(id) => id,
        None => {
            warn!("Row {} has unusable identifier {:?}", line, raw);
            return Vec::new();
        }
    };
    resolve(&id).unwrap_or_else(|e| {
        warn!("Row {} ({}): {}; leaving its URLs empty", line, id, e);
        Vec::new()
    })
}

/// Published URLs for every recognized image in `<image_root>/<id>`.
pub fn image_urls(settings: &Settings, id: &ProductId) -> Result<Vec<String>, CatalogError> {
    let dir = settings.image_root.join(id.as_str());
    if !dir.is_dir() {
        debug!("No image directory at {}", dir.display());
        return Ok(Vec::new());
    }

    let files = list_images(&dir, &settings.image_extensions)?;
    let base = settings.published_base_url.trim_end_matches('/');
    Ok(files
        .iter()
        .map(|file| format!("{}/{}/{}", base, id, urlencoding::encode(file)))
        .collect())
}

/// Image filenames in `dir`, in gallery order: files named `<position>-...`
/// sort by position, anything else sorts by name ahead of them.
pub fn list_images(dir: &Path, extensions: &[String]) -> Result<Vec<String>, CatalogError> {
    let io_err = |source| CatalogError::Io {
        path: dir.to_path_buf(),
        source,
    };

    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(io_err)? {
        let entry = entry.map_err(io_err)?;
        if !entry.file_type().map_err(io_err)?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if has_image_extension(&name, extensions) {
            files.push(name);
        }
    }
    files.sort_by(|a, b| (position_prefix(a), a).cmp(&(position_prefix(b), b)));
    Ok(files)
}

fn has_image_extension(name: &str, extensions: &[String]) -> bool {
    let ext = match Path::new(name).extension() {
        Some(ext) => ext.to_string_lossy().to_lowercase(),
        None => return false,
    };
    extensions
        .iter()
        .any(|e| e.trim_start_matches('.').eq_ignore_ascii_case(&ext))
}

fn position_prefix(name: &str) -> Option<u32> {
    name.split_once('-')?.0.parse().ok()
}

fn with_field(row: &StringRecord, width: usize, index: usize, value: &str) -> StringRecord {
    let mut fields: Vec<&str> = row.iter().collect();
    if fields.len() < width {
        fields.resize(width, "");
    }
    fields[index] = value;
    StringRecord::from(fields)
}

/// Write every field quoted to a sibling temp file, then rename over `output`.
fn write_records(
    settings: &Settings,
    output: &Path,
    headers: &[String],
    records: &[StringRecord],
) -> Result<(), CatalogError> {
    let tmp = temp_path(output);
    let write_err = |source| CatalogError::Write {
        path: output.to_path_buf(),
        source,
    };

    let mut builder = WriterBuilder::new();
    builder
        .delimiter(settings.delimiter_byte())
        .quote_style(QuoteStyle::Always)
        .flexible(true);
    if let Some(escape) = settings.escape_byte() {
        builder.double_quote(false).escape(escape);
    }

    let mut writer = builder.from_path(&tmp).map_err(write_err)?;
    let written = write_all(&mut writer, headers, records);
    drop(writer);

    if let Err(source) = written {
        let _ = std::fs::remove_file(&tmp);
        return Err(write_err(source));
    }
    std::fs::rename(&tmp, output).map_err(|source| CatalogError::Io {
        path: output.to_path_buf(),
        source,
    })
}

fn write_all<W: std::io::Write>(
    writer: &mut csv::Writer<W>,
    headers: &[String],
    records: &[StringRecord],
) -> csv::Result<()> {
    writer.write_record(headers)?;
    for record in records {
        writer.write_record(record)?;
    }
    writer.flush()?;
    Ok(())
}

fn temp_path(output: &Path) -> PathBuf {
    let mut name = output.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    output.with_file_name(name)
}
