//! `Formatter`/`Compressor` (C7): serialize a YAML document to the requested
//! wire format and gzip it if requested. Grounded in the teacher's
//! `gather/writer.rs` `Writer::store`/`Encoding`, generalised from the
//! teacher's whole-archive gzip/zip encodings to per-file gzip the way
//! §4.7 specifies, and its `FormatCodeFromString` carried over from
//! `original_source/operator/pkg/kc/util.go` (SPEC_FULL.md §11).

use std::fmt;
use std::fs::{self, File};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::Value;

use crate::error::DumpError;
use crate::transform;

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum Format {
    Yaml,
    Json,
    #[value(name = "json_lines")]
    JsonLines,
    #[value(name = "json_lines_wrapped")]
    JsonLinesWrapped,
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Format::Yaml => "yaml",
            Format::Json => "json",
            Format::JsonLines => "json_lines",
            Format::JsonLinesWrapped => "json_lines_wrapped",
        };
        write!(f, "{s}")
    }
}

impl FromStr for Format {
    type Err = DumpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "yaml" => Ok(Format::Yaml),
            "json" => Ok(Format::Json),
            "json_lines" => Ok(Format::JsonLines),
            "json_lines_wrapped" => Ok(Format::JsonLinesWrapped),
            other => Err(DumpError::Config(format!("unknown format code `{other}`"))),
        }
    }
}

impl Format {
    fn extension(&self) -> &'static str {
        match self {
            Format::Yaml => "yaml",
            Format::Json | Format::JsonLines | Format::JsonLinesWrapped => "json",
        }
    }

    fn render(&self, yaml_body: &str) -> Result<String, DumpError> {
        let to_transform_err = |e: anyhow::Error| DumpError::Transform { expr: format!("{self}"), source: e };

        match self {
            Format::Yaml => Ok(yaml_body.to_string()),
            Format::Json => {
                let value: Value = transform::yaml_to_value(yaml_body).map_err(to_transform_err)?;
                transform::value_to_json_compact(&value).map_err(to_transform_err)
            }
            Format::JsonLines => {
                let value = transform::yaml_to_value(yaml_body).map_err(to_transform_err)?;
                transform::items_to_json_lines(&value, false).map_err(to_transform_err)
            }
            Format::JsonLinesWrapped => {
                let value = transform::yaml_to_value(yaml_body).map_err(to_transform_err)?;
                transform::items_to_json_lines(&value, true).map_err(to_transform_err)
            }
        }
    }
}

/// Rewrites `stem`'s extension to match `format`, appending `.gz` when
/// `gzip` is set. `stem` carries no extension of its own in this dumper's
/// call sites (`foo_example_com_v1`, `namespaces_v1`, `version`), but the
/// rewrite still only touches the final dotted component per §3.
pub fn suffixed_path(root: &Path, stem: &str, format: Format, gzip: bool) -> PathBuf {
    let mut path = root.join(stem);
    path.set_extension(format.extension());
    if gzip {
        let mut name = path.into_os_string();
        name.push(".gz");
        path = PathBuf::from(name);
    }
    path
}

/// Serializes `yaml_body` per `format` and writes it at `root/<stem>.<ext>`,
/// gzip-compressing when `gzip` is set. Returns the final path written.
pub fn write_document(
    root: &Path,
    stem: &str,
    yaml_body: &str,
    format: Format,
    gzip: bool,
) -> Result<PathBuf, DumpError> {
    let rendered = format.render(yaml_body)?;
    let path = suffixed_path(root, stem, format, gzip);

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| DumpError::Writer(format!("creating {parent:?}: {e}")))?;
    }

    if gzip {
        let file = File::create(&path).map_err(|e| DumpError::Writer(format!("creating {path:?}: {e}")))?;
        let mut encoder = GzEncoder::new(file, Compression::default());
        encoder
            .write_all(rendered.as_bytes())
            .map_err(|e| DumpError::Writer(format!("writing {path:?}: {e}")))?;
        encoder.finish().map_err(|e| DumpError::Writer(format!("finishing {path:?}: {e}")))?;
    } else {
        fs::write(&path, rendered).map_err(|e| DumpError::Writer(format!("writing {path:?}: {e}")))?;
    }

    Ok(path)
}

/// `<gvPath>`: every `/` and `.` in a groupVersion replaced with `_`.
pub fn gv_path(group_version: &str) -> String {
    group_version.replace(['/', '.'], "_")
}

/// `<ns_underscored>`: every `-` in a namespace name replaced with `_`.
pub fn namespace_dir(namespace: &str) -> String {
    namespace.replace('-', "_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tempfile::tempdir;

    #[test]
    fn format_from_str_rejects_unknown_code() {
        assert!(matches!("bogus".parse::<Format>(), Err(DumpError::Config(_))));
        assert_eq!("yaml".parse::<Format>().unwrap(), Format::Yaml);
        assert_eq!("json_lines_wrapped".parse::<Format>().unwrap(), Format::JsonLinesWrapped);
    }

    #[test]
    fn gv_path_and_namespace_dir_rewrite_rules() {
        assert_eq!(gv_path("apps/v1"), "apps_v1");
        assert_eq!(gv_path("foo.example.com/v1"), "foo_example_com_v1");
        assert_eq!(namespace_dir("kube-system"), "kube_system");
    }

    #[test]
    fn write_document_json_lines_one_object_per_line() {
        let dir = tempdir().unwrap();
        let yaml = "items:\n  - a: 1\n  - a: 2\n";
        let path = write_document(dir.path(), "nodes_v1", yaml, Format::JsonLines, false).unwrap();
        assert_eq!(path.extension().unwrap(), "json");
        let content = fs::read_to_string(path).unwrap();
        assert_eq!(content, "{\"a\":1}\n{\"a\":2}\n");
    }

    #[test]
    fn write_document_gzip_roundtrips_to_plaintext() {
        let dir = tempdir().unwrap();
        let yaml = "kind: Foo\nitems: []\n";
        let path = write_document(dir.path(), "foo_v1", yaml, Format::Yaml, true).unwrap();
        assert!(path.to_string_lossy().ends_with(".yaml.gz"));

        let file = File::open(&path).unwrap();
        let mut decoder = flate2::read::GzDecoder::new(file);
        let mut out = String::new();
        decoder.read_to_string(&mut out).unwrap();
        assert_eq!(out, yaml);
    }
}
