use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::{debug, info};
use url::Url;

use crate::db::state::UploadStatus;
use crate::db::Store;
use crate::workflow::GenerationError;

/// Inputs the engine fetches itself
pub fn is_remote(path: &str) -> bool {
    matches!(Url::parse(path), Ok(url) if matches!(url.scheme(), "http" | "https" | "ftp"))
}

/// Resolves configuration paths to the paths written into the parameter document
///
/// Files in the upload area are stored under opaque codes. The engine and downstream tools sniff
/// formats from file names, so uploaded files are linked into the project's `input/` directory
/// under their original names instead.
pub struct Materializer<'a> {
    pub store: &'a Store,
    pub uploads_dir: &'a Path,
    pub input_dir: PathBuf,
}

impl Materializer<'_> {
    /// Resolve every path, collecting one error line per missing file
    pub fn resolve_all(&self, paths: &[&str]) -> Result<HashMap<String, String>, GenerationError> {
        let mut resolved = HashMap::new();
        let mut missing = Vec::new();

        for path in paths {
            if resolved.contains_key(*path) {
                continue;
            }
            match self.resolve(path) {
                Ok(Some(to)) => {
                    resolved.insert(path.to_string(), to);
                }
                Ok(None) => missing.push(format!("file not found: {path}")),
                Err(err) => missing.push(format!("can't link input {path}: {err}")),
            }
        }

        match missing.is_empty() {
            true => Ok(resolved),
            false => Err(GenerationError::MissingInputs(missing)),
        }
    }

    /// `Ok(None)` when the file doesn't exist
    fn resolve(&self, path: &str) -> io::Result<Option<String>> {
        if is_remote(path) {
            return Ok(Some(path.to_string()));
        }
        let local = Path::new(path);
        if !local.starts_with(self.uploads_dir) {
            return Ok(local.exists().then(|| path.to_string()));
        }

        let code = match local.file_name().and_then(|n| n.to_str()) {
            Some(code) => code,
            None => return Ok(None),
        };
        let upload = match self.store.get_upload(code) {
            Ok(Some(upload)) if upload.status == UploadStatus::Live => upload,
            Ok(_) => {
                debug!("Upload {code} is missing or deleted");
                return Ok(None);
            }
            Err(err) => return Err(io::Error::new(io::ErrorKind::Other, err.to_string())),
        };
        if !local.exists() {
            return Ok(None);
        }
        let linked = self.link(local, &upload.name)?;
        Ok(Some(linked.to_string_lossy().into_owned()))
    }

    /// Link `blob` as `input/<name>`, or `input/<stem>_<n><ext>` if the name is taken by another
    /// file. An existing link to the same blob is reused.
    ///
    /// Only the last component of `name` is used, so a link never leaves `input/`.
    pub fn link(&self, blob: &Path, name: &str) -> io::Result<PathBuf> {
        fs::create_dir_all(&self.input_dir)?;
        let name = link_name(name, blob)?;
        let (stem, ext) = split_name(name);

        for n in 0.. {
            let candidate = match n {
                0 => name.to_string(),
                n => format!("{stem}_{n}{ext}"),
            };
            let target = self.input_dir.join(&candidate);
            match fs::symlink_metadata(&target) {
                Err(err) if err.kind() == io::ErrorKind::NotFound => {
                    info!("Linking upload {} as {}", blob.display(), target.display());
                    place(blob, &target)?;
                    return Ok(target);
                }
                Err(err) => return Err(err),
                Ok(_) if same_file(blob, &target) => return Ok(target),
                Ok(_) => continue,
            }
        }
        unreachable!("exhausted link names")
    }
}

/// Last component of a display name, falling back to the blob's own name (the upload code)
fn link_name<'a>(name: &'a str, blob: &'a Path) -> io::Result<&'a str> {
    let usable = |path: &'a Path| path.file_name().and_then(|n| n.to_str()).filter(|n| !n.is_empty());
    usable(Path::new(name))
        .or_else(|| usable(blob))
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, format!("no usable file name for {}", blob.display())))
}

/// `reads.fastq.gz` -> (`reads`, `.fastq.gz`), keeping compound extensions intact
fn split_name(name: &str) -> (&str, &str) {
    match name.char_indices().skip(1).find(|(_, c)| *c == '.') {
        Some((i, _)) => name.split_at(i),
        None => (name, ""),
    }
}

#[cfg(unix)]
fn place(blob: &Path, target: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(blob, target)
}

#[cfg(not(unix))]
fn place(blob: &Path, target: &Path) -> io::Result<()> {
    fs::copy(blob, target).map(|_| ())
}

#[cfg(unix)]
fn same_file(blob: &Path, target: &Path) -> bool {
    matches!(fs::read_link(target), Ok(link) if link == blob)
}

#[cfg(not(unix))]
fn same_file(blob: &Path, target: &Path) -> bool {
    match (fs::metadata(blob), fs::metadata(target)) {
        (Ok(a), Ok(b)) => a.len() == b.len(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::db::upload::Upload;

    struct Fixture {
        tmp: TempDir,
        store: Store,
    }

    impl Fixture {
        fn new() -> Fixture {
            let tmp = TempDir::new().unwrap();
            fs::create_dir_all(tmp.path().join("uploads")).unwrap();
            Fixture { tmp, store: Store::open_in_memory().unwrap() }
        }

        fn upload(&self, code: &str, name: &str) -> String {
            let path = self.tmp.path().join("uploads").join(code);
            fs::write(&path, code).unwrap();
            self.store.insert_upload(&Upload::new(code, name, "owner", 4)).unwrap();
            path.to_string_lossy().into_owned()
        }

        fn materializer(&self) -> Materializer<'_> {
            Materializer {
                store: &self.store,
                uploads_dir: Box::leak(self.tmp.path().join("uploads").into_boxed_path()),
                input_dir: self.tmp.path().join("project/input"),
            }
        }
    }

    #[test]
    fn test_uploads_are_linked_by_display_name() {
        let fx = Fixture::new();
        let a = fx.upload("u1", "reads.fastq.gz");
        let b = fx.upload("u2", "reads.fastq.gz");
        let m = fx.materializer();

        let resolved = m.resolve_all(&[a.as_str(), b.as_str(), a.as_str()]).unwrap();
        let input_dir = fx.tmp.path().join("project/input");
        assert_eq!(resolved[&a], input_dir.join("reads.fastq.gz").to_string_lossy());
        assert_eq!(resolved[&b], input_dir.join("reads_1.fastq.gz").to_string_lossy());
        assert_eq!(fs::read_to_string(&resolved[&b]).unwrap(), "u2");

        // a second generation reuses the existing links
        let again = m.resolve_all(&[b.as_str()]).unwrap();
        assert_eq!(again[&b], resolved[&b]);
        assert_eq!(fs::read_dir(&input_dir).unwrap().count(), 2);
    }

    #[test]
    fn test_missing_inputs_are_all_reported() {
        let fx = Fixture::new();
        let deleted_blob = fx.upload("u1", "reads.fastq.gz");
        fs::remove_file(&deleted_blob).unwrap();
        let unknown = fx.tmp.path().join("uploads/u9").to_string_lossy().into_owned();
        let plain = fx.tmp.path().join("data/contigs.fna").to_string_lossy().into_owned();

        let err = fx
            .materializer()
            .resolve_all(&[deleted_blob.as_str(), unknown.as_str(), plain.as_str(), "https://example.org/r.fq"])
            .unwrap_err();
        match err {
            GenerationError::MissingInputs(missing) => {
                assert_eq!(missing.len(), 3);
                assert_eq!(missing[0], format!("file not found: {deleted_blob}"));
                assert_eq!(missing[2], format!("file not found: {plain}"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_display_names_stay_inside_input_dir() {
        let fx = Fixture::new();
        let escaping = fx.upload("u1", "../../escaped.fq");
        let parent = fx.upload("u2", "..");
        let m = fx.materializer();

        let resolved = m.resolve_all(&[escaping.as_str(), parent.as_str()]).unwrap();
        let input_dir = fx.tmp.path().join("project/input");
        assert_eq!(resolved[&escaping], input_dir.join("escaped.fq").to_string_lossy());
        assert_eq!(resolved[&parent], input_dir.join("u2").to_string_lossy());
        assert!(!fx.tmp.path().join("escaped.fq").exists());
        assert_eq!(fs::read_dir(&input_dir).unwrap().count(), 2);
    }

    #[test]
    fn test_split_name() {
        assert_eq!(split_name("reads.fastq.gz"), ("reads", ".fastq.gz"));
        assert_eq!(split_name("README"), ("README", ""));
        assert_eq!(split_name(".hidden"), (".hidden", ""));
    }

    #[test]
    fn test_is_remote() {
        assert!(is_remote("https://example.org/reads.fq.gz"));
        assert!(!is_remote("/data/reads.fq.gz"));
        assert!(!is_remote("reads.fq.gz"));
    }
}
