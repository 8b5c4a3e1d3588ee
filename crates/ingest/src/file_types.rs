//! The `FileTypes` stage: classify every file of a repository by name.

use crate::target::resolve_target;
use blamemux_types::{
    BlamemuxError, Extension, FileType, FileTypesSummary, Repository, Result, StageReport, Store,
};
use regex::Regex;
use std::sync::{Arc, OnceLock};
use tracing::info;

/// Ordered rules; the first matching pattern wins.
const RULES: &[(FileType, &str)] = &[
    (
        FileType::Build,
        r"(?i)(^|/)(makefile(\.am|\.in)?|configure(\.ac|\.in)?|cmakelists\.txt|build\.gradle|pom\.xml|cargo\.(toml|lock)|setup\.(py|cfg)|meson\.build|sconstruct|.*\.(mk|cmake|m4|pro|spec))$",
    ),
    (
        FileType::I18n,
        r"(?i)(\.(po|pot|mo|gmo|xlf|xliff)$|(^|/)(po|i18n|locale|locales)/)",
    ),
    (
        FileType::Ui,
        r"(?i)\.(ui|glade|xib|nib|storyboard|desktop|xul|qml|css|scss|less)$",
    ),
    (
        FileType::Documentation,
        r"(?i)((^|/)(readme|changelog|news|authors|copying|license|install|todo|hacking|thanks)(\.[a-z]+)?$|\.(md|rst|txt|texi|texinfo|man|[1-8]|sgml|docbook|pdf|html?|tex)$|(^|/)docs?/)",
    ),
    (
        FileType::Image,
        r"(?i)\.(png|jpe?g|gif|bmp|ico|icns|svgz?|xpm|xbm|tiff?|webp|xcf|psd)$",
    ),
    (
        FileType::Multimedia,
        r"(?i)\.(wav|mp3|ogg|oga|flac|mid|midi|avi|mpe?g|mp4|mov|webm|mkv|ttf|otf)$",
    ),
    (
        FileType::Package,
        r"(?i)\.(tar|gz|tgz|bz2|xz|zip|jar|war|rpm|deb|dmg|msi|7z|whl|gem)$",
    ),
    (
        FileType::Code,
        r"(?i)\.(c|h|cc|cpp|cxx|hh|hpp|hxx|m|mm|rs|go|java|kt|scala|cs|fs|vb|py|pyx|rb|pl|pm|php|js|jsx|ts|tsx|mjs|lua|sh|bash|zsh|el|lisp|scm|clj|hs|ml|mli|erl|ex|exs|swift|d|f|f90|pas|adb|ads|s|asm|sql|r|tcl|vala|idl)$",
    ),
];

static COMPILED: OnceLock<Vec<(FileType, Regex)>> = OnceLock::new();

fn rules() -> &'static [(FileType, Regex)] {
    COMPILED.get_or_init(|| {
        RULES
            .iter()
            .map(|(kind, pattern)| (*kind, Regex::new(pattern).expect("valid regex")))
            .collect()
    })
}

/// Classify a file name or repository-relative path.
pub fn classify(path: &str) -> FileType {
    rules()
        .iter()
        .find(|(_, re)| re.is_match(path))
        .map(|(kind, _)| *kind)
        .unwrap_or(FileType::Unknown)
}

#[derive(Debug, Default)]
pub struct FileTypes;

impl Extension for FileTypes {
    fn name(&self) -> &'static str {
        "FileTypes"
    }

    fn run(&self, repo: Arc<dyn Repository>, uri: &str, store: &dyn Store) -> Result<StageReport> {
        let target = resolve_target(repo.as_ref(), uri, store)?;
        store
            .create_file_types_table()
            .map_err(|e| BlamemuxError::Run(format!("cannot create file_types table: {}", e)))?;

        let rows: Vec<(i64, FileType)> = store
            .unclassified_files(target.repository_id)?
            .into_iter()
            .map(|(file_id, path)| (file_id, classify(&path)))
            .collect();
        if !rows.is_empty() {
            store.insert_file_types(&rows)?;
        }

        let summary = FileTypesSummary {
            files_classified: rows.len(),
            code_files: rows.iter().filter(|(_, t)| t.is_code_bearing()).count(),
        };
        info!(
            repo = %target.repo_uri,
            classified = summary.files_classified,
            code = summary.code_files,
            "file types classified"
        );
        Ok(StageReport::FileTypes(summary))
    }

    fn backout(&self, repo: Arc<dyn Repository>, uri: &str, store: &dyn Store) -> Result<usize> {
        let target = resolve_target(repo.as_ref(), uri, store)?;
        let removed = store.backout_file_types(target.repository_id)?;
        info!(repo = %target.repo_uri, removed, "file types backed out");
        Ok(removed)
    }
}
