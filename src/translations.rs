//! Translation catalog deployment.
//!
//! For each requested language the Qt catalogs (`qtbase_de.qm`,
//! `qtdeclarative_de.qm`, ...) are aggregated into a single
//! `qt_<lang>.qm` with `lconvert`; if aggregation fails the individual
//! catalogs are copied as-is.

use std::fs;
use std::path::{Path, PathBuf};

use crate::fsops::copy_file_fresh;
use crate::host;
use crate::layout;
use crate::process::Cmd;
use crate::resolve::ResolveContext;

/// Languages to deploy: the explicit request, or the locale environment
/// (`LC_ALL` before `LANG`), always including `en`.
pub fn languages(ctx: &ResolveContext) -> Vec<String> {
    if !ctx.plan.languages.is_empty() {
        return ctx.plan.languages.clone();
    }
    detect_languages_from_env()
}

fn detect_languages_from_env() -> Vec<String> {
    let mut langs = Vec::new();
    let lc_all = host::get_env("LC_ALL");
    let lang = host::get_env("LANG");
    let pick = if !lc_all.is_empty() { lc_all } else { lang };
    let tag = parse_locale_tag(&pick);
    if !tag.is_empty() {
        langs.push(tag);
    }
    if !langs.iter().any(|l| l == "en") {
        langs.push("en".to_string());
    }
    langs
}

/// Leading language tag of a locale like `de_DE.UTF-8`, lowercased.
fn parse_locale_tag(locale: &str) -> String {
    let end = locale
        .find(|c| c == '_' || c == '.' || c == '@' || c == ' ')
        .unwrap_or(locale.len());
    locale[..end].to_lowercase()
}

/// Catalog files in the Qt translations directory for one language.
fn catalogs_for_language(qt_translations: &Path, lang: &str) -> Vec<PathBuf> {
    let suffix = format!("_{}.qm", lang);
    let mut files = Vec::new();
    let Ok(entries) = fs::read_dir(qt_translations) else {
        return files;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.len() > suffix.len() && name.ends_with(&suffix) {
            files.push(path);
        }
    }
    files.sort();
    files
}

/// Concatenate catalogs into one `.qm`; true only when the tool
/// succeeded and the output exists.
fn run_lconvert(inputs: &[PathBuf], output: &Path) -> bool {
    if inputs.is_empty() {
        return false;
    }
    let mut cmd = Cmd::new("lconvert").arg("-o").arg_path(output);
    for input in inputs {
        cmd = cmd.arg("-i").arg_path(input);
    }
    match cmd.allow_fail().run() {
        Ok(result) => result.success() && output.exists(),
        Err(_) => false,
    }
}

/// Deploy the requested translation catalogs into the output tree.
/// Nothing happens when the Qt translations directory is absent.
pub fn deploy_translations(ctx: &ResolveContext) {
    let Some(qt_translations) = &ctx.qt.translations else {
        return;
    };
    let out_dir = layout::translations_dir(ctx.plan.kind, &ctx.plan.output_root);
    if let Err(e) = fs::create_dir_all(&out_dir) {
        eprintln!("Warning: failed to create {}: {}", out_dir.display(), e);
        return;
    }

    for lang in languages(ctx) {
        let catalogs = catalogs_for_language(qt_translations, &lang);
        if catalogs.is_empty() {
            continue;
        }
        let aggregated = out_dir.join(format!("qt_{}.qm", lang));
        if !run_lconvert(&catalogs, &aggregated) {
            for catalog in &catalogs {
                if let Err(e) = copy_file_fresh(catalog, &out_dir.join(catalog.file_name().unwrap_or_default())) {
                    eprintln!("Warning: {}", e);
                }
            }
        }
    }
}
