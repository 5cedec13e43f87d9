//! Scan file naming shared by the compute steps.

use std::path::Path;

/// A raw scan split into the parts the reconstruction scripts take.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanPath {
    /// Name of the folder holding the scan; empty for top-level scans.
    pub folder: String,
    /// File name without extension.
    pub stem: String,
}

impl ScanPath {
    /// Split an endpoint-relative scan path. `None` when the path has no file name.
    #[must_use]
    pub fn parse(file_path: &str) -> Option<Self> {
        let path = Path::new(file_path);
        let stem = path.file_stem()?.to_str()?.to_string();
        let folder = path
            .parent()
            .and_then(Path::file_name)
            .and_then(|name| name.to_str())
            .unwrap_or_default()
            .to_string();
        Some(Self { folder, stem })
    }

    fn prefix(&self, root: &str) -> String {
        let root = root.trim_end_matches('/');
        if self.folder.is_empty() {
            root.to_string()
        } else {
            format!("{root}/{}", self.folder)
        }
    }

    /// Directory the reconstruction writes its slices to, under `root`.
    #[must_use]
    pub fn reconstruction_dir(&self, root: &str) -> String {
        format!("{}/rec{}/", self.prefix(root), self.stem)
    }

    /// Raw HDF5 file under `root`.
    #[must_use]
    pub fn raw_file(&self, root: &str) -> String {
        format!("{}/{}.h5", self.prefix(root), self.stem)
    }

    /// Endpoint-relative path of the reconstruction output.
    #[must_use]
    pub fn reconstruction_relative(&self) -> String {
        self.reconstruction_dir("").trim_start_matches('/').to_string()
    }

    /// Endpoint-relative path of the multi-resolution output.
    #[must_use]
    pub fn multi_resolution_relative(&self) -> String {
        format!(
            "{}.zarr",
            self.reconstruction_relative().trim_end_matches('/')
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_scan_paths_split_into_folder_and_stem() {
        let scan = ScanPath::parse("/2024/20241216_mice/scan_0001.h5");
        assert_eq!(
            scan,
            Some(ScanPath {
                folder: "20241216_mice".into(),
                stem: "scan_0001".into(),
            })
        );
    }

    #[test]
    fn derived_paths_follow_reconstruction_layout() -> anyhow::Result<()> {
        let scan = ScanPath::parse("42/mice.h5").ok_or_else(|| anyhow::anyhow!("unparsed"))?;
        assert_eq!(scan.reconstruction_dir("/data/scratch/"), "/data/scratch/42/recmice/");
        assert_eq!(scan.raw_file("/data/raw"), "/data/raw/42/mice.h5");
        assert_eq!(scan.reconstruction_relative(), "42/recmice/");
        assert_eq!(scan.multi_resolution_relative(), "42/recmice.zarr");

        let top = ScanPath::parse("mice.h5").ok_or_else(|| anyhow::anyhow!("unparsed"))?;
        assert_eq!(top.folder, "");
        assert_eq!(top.reconstruction_relative(), "recmice/");
        Ok(())
    }

    #[test]
    fn empty_paths_do_not_parse() {
        assert!(ScanPath::parse("").is_none());
        assert!(ScanPath::parse("/").is_none());
    }
}
