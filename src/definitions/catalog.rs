//! Which definition files exist and where they live.

use crate::core::StorePath;

use std::path::{Path, PathBuf};

/// Official definition families.
pub const FAMILIES: [&str; 3] = ["main", "daily", "bytecode"];

/// On-disk variants of each family, lowest priority first.
pub const SUFFIXES: [&str; 2] = ["cld", "cvd"];

/// Tag holding a definition file's MD5 checksum in the shared store.
pub const CHECKSUM_TAG: &str = "md5";

/// Community signature files distributed alongside the official ones.
pub const EXTRA_FILES: [&str; 48] = [
    "MiscreantPunch099-Low.ldb",
    "badmacro.ndb",
    "blurl.ndb",
    "bofhland_cracked_URL.ndb",
    "bofhland_malware_URL.ndb",
    "bofhland_malware_attach.hdb",
    "bofhland_phishing_URL.ndb",
    "ditekshen.ldb",
    "exexor99.ldb",
    "foxhole_filename.cdb",
    "foxhole_generic.cdb",
    "foxhole_js.cdb",
    "foxhole_js.ndb",
    "hackingteam.hsb",
    "interserver256.hdb",
    "interservertopline.db",
    "junk.ndb",
    "jurlbl.ndb",
    "jurlbla.ndb",
    "lott.ndb",
    "malwarehash.hsb",
    "miscreantpunch.hdb",
    "phish.ndb",
    "phishtank.ndb",
    "porcupine.ndb",
    "rfxn.hdb",
    "rfxn.ndb",
    "rfxn.yara",
    "rogue.hdb",
    "scam.ndb",
    "shell.ldb",
    "shelter.ldb",
    "spamattach.hdb",
    "spamimg.hdb",
    "spear.ndb",
    "spearl.ndb",
    "twinclams.ldb",
    "twinwave.ign2",
    "urlhaus.ndb",
    "whitelist.fp",
    "winnow.attachments.hdb",
    "winnow_bad_cw.hdb",
    "winnow_extended_malware.hdb",
    "winnow_extended_malware_links.ndb",
    "winnow_malware.hdb",
    "winnow_malware_links.ndb",
    "winnow_phish_complete_url.ndb",
    "winnow_spam_complete.ndb",
];

/// One definition file, local and remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefinitionFile {
    /// Family for official files; the file name for extra files.
    pub family: String,
    /// Suffix for official files.
    pub suffix: Option<String>,
    /// File name, e.g. `main.cvd`.
    pub filename: String,
    /// Key in the shared store.
    pub remote_path: StorePath,
    /// Path in the local definitions directory.
    pub local_path: PathBuf,
}

/// The set of definition files kept in sync.
#[derive(Debug, Clone)]
pub struct DefinitionCatalog {
    families: Vec<String>,
    suffixes: Vec<String>,
    extra_files: Vec<String>,
    include_extra: bool,
}

impl Default for DefinitionCatalog {
    fn default() -> Self {
        Self {
            families: FAMILIES.iter().map(|s| s.to_string()).collect(),
            suffixes: SUFFIXES.iter().map(|s| s.to_string()).collect(),
            extra_files: EXTRA_FILES.iter().map(|s| s.to_string()).collect(),
            include_extra: false,
        }
    }
}

impl DefinitionCatalog {
    /// The official families and suffixes, extra files excluded.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the family list.
    pub fn with_families<I, S>(mut self, families: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.families = families.into_iter().map(Into::into).collect();
        self
    }

    /// Replaces the suffix priority list.
    pub fn with_suffixes<I, S>(mut self, suffixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.suffixes = suffixes.into_iter().map(Into::into).collect();
        self
    }

    /// Includes or excludes the extra files.
    pub fn with_extra(mut self, include: bool) -> Self {
        self.include_extra = include;
        self
    }

    /// Replaces the extra file list.
    pub fn with_extra_files<I, S>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extra_files = files.into_iter().map(Into::into).collect();
        self
    }

    /// Returns `true` when extra files are synced.
    pub fn includes_extra(&self) -> bool {
        self.include_extra
    }

    /// Returns the families in order.
    pub fn families(&self) -> &[String] {
        &self.families
    }

    /// Returns the official files of `family`, in suffix priority order.
    pub fn family_files(&self, family: &str, prefix: &StorePath, local_dir: &Path) -> Vec<DefinitionFile> {
        self.suffixes
            .iter()
            .map(|suffix| {
                let filename = format!("{}.{}", family, suffix);
                DefinitionFile {
                    family: family.to_string(),
                    suffix: Some(suffix.clone()),
                    remote_path: prefix.join(&filename),
                    local_path: local_dir.join(&filename),
                    filename,
                }
            })
            .collect()
    }

    /// Returns the extra files when included, otherwise nothing.
    pub fn extra(&self, prefix: &StorePath, local_dir: &Path) -> Vec<DefinitionFile> {
        if !self.include_extra {
            return Vec::new();
        }
        self.extra_files
            .iter()
            .map(|filename| DefinitionFile {
                family: filename.clone(),
                suffix: None,
                filename: filename.clone(),
                remote_path: prefix.join(filename),
                local_path: local_dir.join(filename),
            })
            .collect()
    }

    /// Returns every file kept in sync: official files family by family,
    /// then extra files when included.
    pub fn all_files(&self, prefix: &StorePath, local_dir: &Path) -> Vec<DefinitionFile> {
        let mut files: Vec<DefinitionFile> = self
            .families
            .iter()
            .flat_map(|family| self.family_files(family, prefix, local_dir))
            .collect();
        files.extend(self.extra(prefix, local_dir));
        files
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_official_files_in_priority_order() {
        let catalog = DefinitionCatalog::new();
        let files = catalog.all_files(&StorePath::new("clamav_defs"), Path::new("/tmp/defs"));
        let names: Vec<&str> = files.iter().map(|f| f.filename.as_str()).collect();
        assert_eq!(
            names,
            vec!["main.cld", "main.cvd", "daily.cld", "daily.cvd", "bytecode.cld", "bytecode.cvd"]
        );
        assert_eq!(files[1].remote_path.as_str(), "clamav_defs/main.cvd");
        assert_eq!(files[1].local_path, PathBuf::from("/tmp/defs/main.cvd"));
    }

    #[test]
    fn test_extra_files_opt_in() {
        let prefix = StorePath::new("defs");
        let dir = Path::new("/tmp/defs");
        assert!(DefinitionCatalog::new().extra(&prefix, dir).is_empty());

        let extra = DefinitionCatalog::new().with_extra(true).extra(&prefix, dir);
        assert_eq!(extra.len(), EXTRA_FILES.len());
        assert_eq!(extra[0].family, "MiscreantPunch099-Low.ldb");
        assert_eq!(extra[0].suffix, None);
    }
}
